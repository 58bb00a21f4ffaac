//! Error types for the pdf2md-queue library.
//!
//! The split mirrors the two ways things go wrong in an asynchronous
//! conversion service:
//!
//! * [`QueueError`] (**caller-facing or fatal**): a submission was rejected,
//!   a job id is unknown, the configuration is unusable, or the queue is
//!   shutting down. Returned as `Err(QueueError)` from
//!   [`crate::manager::QueueManager`] operations.
//!
//! * [`ConversionError`] (**per-job**): the engine could not convert one
//!   document. It never escapes a worker; its display text becomes the
//!   `error` of the FAILED job record.
//!
//! * [`TransitionError`] (**internal**): a conditional state transition did
//!   not apply. Workers log it as an anomaly and move on.
//!
//! * [`ClientError`]: everything the polling client can run into
//!   (feature `client`).

use crate::job::{JobId, JobState};
use std::path::PathBuf;
use thiserror::Error;

/// Errors returned by the queue manager and its configuration layer.
#[derive(Debug, Error)]
pub enum QueueError {
    // ── Caller errors ─────────────────────────────────────────────────────
    /// No job with this id exists (never submitted, unparseable, or evicted).
    #[error("Job not found: {0}")]
    JobNotFound(String),

    /// The submission was malformed; no job id was issued.
    #[error("Invalid submission: {0}")]
    InvalidSubmission(String),

    // ── Fatal errors ──────────────────────────────────────────────────────
    /// The work queue has been closed by a shutdown; nothing new is accepted.
    #[error("The queue is shutting down and no longer accepts jobs")]
    ShuttingDown,

    /// Builder or file validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A configuration file exists but could not be read.
    #[error("Failed to read configuration file '{path}': {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A configuration file was read but is not valid JSON for its schema.
    #[error("Failed to parse configuration file '{path}': {source}")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// The configured conversion engine could not be initialised.
    #[error("Conversion engine unavailable: {0}")]
    EngineUnavailable(String),

    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A non-fatal error for a single document.
///
/// Stored (as text) on the FAILED job; other jobs are unaffected.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConversionError {
    /// The bytes do not start with the `%PDF` magic.
    #[error("Document is not a PDF (first bytes: {magic:?})")]
    NotAPdf { magic: Vec<u8> },

    /// The PDF header, trailer or xref could not be parsed.
    #[error("PDF is corrupt: {0}")]
    Corrupt(String),

    /// The PDF is encrypted; the service has no password to offer.
    #[error("PDF is encrypted and requires a password")]
    PasswordRequired,

    /// A single page could not be processed.
    #[error("Page {page}: {detail}")]
    PageFailed { page: usize, detail: String },

    /// Every page of the document failed.
    #[error("All {total} pages failed. First error: {first_error}")]
    AllPagesFailed { total: usize, first_error: String },

    /// The engine itself is misconfigured or its backend is unreachable.
    #[error("Engine error: {0}")]
    Engine(String),
}

/// Why a conditional transition on the job store did not apply.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransitionError {
    /// The id is not in the store.
    #[error("job {0} not found")]
    NotFound(JobId),

    /// The record was not in the expected `from` state. Nothing changed.
    #[error("job {id}: expected state {expected}, found {actual}")]
    Conflict {
        id: JobId,
        expected: JobState,
        actual: JobState,
    },

    /// `from → to` is not an edge of the job state machine.
    #[error("illegal transition {from} → {to}")]
    IllegalTransition { from: JobState, to: JobState },

    /// The mutator left the record breaking a record invariant; rolled back.
    #[error("job {id}: mutator left an inconsistent {state} record, rolled back")]
    Inconsistent { id: JobId, state: JobState },
}

/// Errors raised by the polling client.
#[cfg(feature = "client")]
#[derive(Debug, Error)]
pub enum ClientError {
    /// Transport-level failure (connect, TLS, timeout, body decode).
    #[error("Request to '{url}' failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// The server answered with a status the protocol does not expect.
    #[error("Unexpected HTTP {status} from '{url}': {body}")]
    UnexpectedStatus {
        url: String,
        status: u16,
        body: String,
    },

    /// The server does not know the job (404).
    #[error("Server does not know job {0}")]
    JobNotFound(String),

    /// The job reached FAILED on the server.
    #[error("{error}")]
    JobFailed { job_id: String, error: String },

    /// The wait budget ran out before the job reached a terminal state.
    /// The job may still finish on the server.
    #[error("Timed out after {waited_secs}s waiting for job {job_id}")]
    Timeout { job_id: String, waited_secs: u64 },

    /// Local file I/O failed (reading the input or writing the Markdown).
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// An input path is neither a PDF file nor a directory.
    #[error("Not a PDF file or directory: '{0}'")]
    InvalidInput(PathBuf),
}

#[cfg(feature = "client")]
impl ClientError {
    /// Whether retrying the same request later may succeed.
    ///
    /// Used by the poll loop: a flaky status call is not a job failure.
    pub fn is_transient(&self) -> bool {
        match self {
            ClientError::Http { source, .. } => source.is_timeout() || source.is_connect(),
            ClientError::UnexpectedStatus { status, .. } => *status >= 500,
            _ => false,
        }
    }
}
