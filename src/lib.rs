//! # pdf2md-queue
//!
//! Asynchronous PDF → Markdown conversion as a service: submit a document,
//! get a job id back immediately, poll until the job is done.
//!
//! ## Architecture
//!
//! ```text
//!  client ──POST /submit──▶ server ──▶ QueueManager::submit
//!                                         │ JobStore::create (QUEUED)
//!                                         ▼
//!                                      WorkQueue (FIFO of job ids)
//!                                         │
//!                         ┌───────────────┼───────────────┐
//!                         ▼               ▼               ▼
//!                      worker 0        worker 1   …   worker N-1
//!                         │ claim: QUEUED → PROCESSING (exactly one wins)
//!                         │ ConversionEngine::convert (spawn_blocking)
//!                         ▼
//!                      COMPLETED + result  |  FAILED + cause
//!
//!  client ──GET /status/{id}── … ──GET /result/{id}──▶ <stem>.md
//! ```
//!
//! Jobs live in memory only. Terminal jobs are evicted after the configured
//! retention window.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use pdf2md_queue::engine::{self, ConvertedDocument};
//! use pdf2md_queue::{JobOutcome, QueueConfig, QueueManager};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let engine = Arc::new(engine::from_fn("echo", |bytes: &[u8]| {
//!         Ok(ConvertedDocument::from_markdown(String::from_utf8_lossy(bytes)))
//!     }));
//!     let manager = QueueManager::start(engine, QueueConfig::builder().workers(2).build()?)?;
//!
//!     let id = manager.submit("# Title".into(), "title.pdf")?;
//!     loop {
//!         match manager.result(&id)? {
//!             JobOutcome::Ready(doc) => break println!("{}", doc.markdown),
//!             JobOutcome::Failed(cause) => break eprintln!("failed: {cause}"),
//!             JobOutcome::Pending(_) => tokio::time::sleep(std::time::Duration::from_millis(50)).await,
//!         }
//!     }
//!     manager.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature  | Default | Description |
//! |----------|---------|-------------|
//! | `server` | via cli | axum HTTP surface ([`server`]) |
//! | `client` | via cli | reqwest polling client and batch runner ([`client`]) |
//! | `cli`    | on      | `pdf2md-server` and `pdf2md-client` binaries (clap + anyhow + tracing-subscriber + indicatif) |
//! | `pdfium` | on      | Text-layer engine over a runtime-loaded pdfium library |
//! | `vision` | on      | Vision-LLM engine: rasterise with pdfium, transcribe with edgequake-llm |
//!
//! Disable the defaults to embed only the queue with your own engine:
//! ```toml
//! pdf2md-queue = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod engine;
pub mod error;
pub mod job;
pub mod manager;
pub mod pool;
pub mod progress;
pub mod queue;
pub mod store;
pub mod wire;

#[cfg(feature = "server")]
pub mod server;

#[cfg(feature = "client")]
pub mod client;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{
    ClientConfig, ClientConfigBuilder, EngineConfig, EngineKind, QueueConfig, QueueConfigBuilder,
    ServerConfig, ShutdownPolicy,
};
pub use engine::{ConversionEngine, ConvertedDocument, ExtractedAsset};
pub use error::{ConversionError, QueueError, TransitionError};
pub use job::{JobId, JobRecord, JobResult, JobState};
pub use manager::{JobOutcome, QueueManager, QueueStats};
pub use progress::{BatchProgressCallback, NoopProgressCallback, ProgressCallback};

#[cfg(feature = "client")]
pub use client::{BatchOptions, BatchReport, ConversionClient};
#[cfg(feature = "client")]
pub use error::ClientError;
