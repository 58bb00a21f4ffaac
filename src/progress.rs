//! Progress-callback trait for batch conversion events.
//!
//! [`crate::client::run_batch`] reports every per-file step through an
//! [`Arc<dyn BatchProgressCallback>`]. The CLI renders these as an indicatif
//! progress bar; library callers can forward them anywhere they like.
//!
//! # Example
//!
//! ```rust
//! use pdf2md_queue::BatchProgressCallback;
//! use std::path::Path;
//! use std::sync::atomic::{AtomicUsize, Ordering};
//!
//! #[derive(Default)]
//! struct CountingCallback {
//!     done: AtomicUsize,
//! }
//!
//! impl BatchProgressCallback for CountingCallback {
//!     fn on_file_complete(&self, input: &Path, output: &Path) {
//!         let n = self.done.fetch_add(1, Ordering::SeqCst) + 1;
//!         eprintln!("#{n}: {} -> {}", input.display(), output.display());
//!     }
//! }
//!
//! let cb = CountingCallback::default();
//! cb.on_file_complete(Path::new("a.pdf"), Path::new("a.md"));
//! assert_eq!(cb.done.load(Ordering::SeqCst), 1);
//! ```

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Called by the batch runner as files move through submit → poll → save.
///
/// Files are processed concurrently, so every method except
/// `on_batch_start` / `on_batch_complete` may be called from several tasks
/// at once. All methods default to no-ops.
pub trait BatchProgressCallback: Send + Sync {
    /// Called once, before any file is touched.
    ///
    /// # Arguments
    /// * `total`  : files that will be attempted
    /// * `skipped`: files skipped because their output already exists
    fn on_batch_start(&self, total: usize, skipped: usize) {
        let _ = (total, skipped);
    }

    /// Called when `input` already has a Markdown output and is not resubmitted.
    fn on_file_skipped(&self, input: &Path) {
        let _ = input;
    }

    /// Called just before the upload starts.
    fn on_file_start(&self, input: &Path) {
        let _ = input;
    }

    /// Called once the server has accepted `input` as `job_id`.
    fn on_file_submitted(&self, input: &Path, job_id: &str) {
        let _ = (input, job_id);
    }

    /// Called after the Markdown has been written to `output`.
    fn on_file_complete(&self, input: &Path, output: &Path) {
        let _ = (input, output);
    }

    /// Called when `input` could not be converted, for whatever reason.
    fn on_file_error(&self, input: &Path, error: &str) {
        let _ = (input, error);
    }

    /// Called once, after every file has an outcome.
    fn on_batch_complete(&self, succeeded: usize, failed: usize, elapsed: Duration) {
        let _ = (succeeded, failed, elapsed);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl BatchProgressCallback for NoopProgressCallback {}

/// Shared handle passed to [`crate::client::run_batch`].
pub type ProgressCallback = Arc<dyn BatchProgressCallback>;
