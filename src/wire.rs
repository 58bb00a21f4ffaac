//! JSON bodies exchanged between the HTTP server and the polling client.
//!
//! Shared by both sides so the protocol cannot drift. Timestamps are
//! RFC 3339 UTC; job states are lowercase strings.

use crate::job::{JobRecord, JobState};
use crate::manager::QueueStats;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const SERVICE_NAME: &str = "PDF to Markdown Converter";

/// Message on a 202 from `/result/{job_id}`.
pub const NOT_READY_MESSAGE: &str = "Job not completed yet";

/// `GET /health`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
}

impl HealthResponse {
    pub fn healthy() -> Self {
        Self {
            status: "healthy".into(),
            service: SERVICE_NAME.into(),
            version: env!("CARGO_PKG_VERSION").into(),
        }
    }
}

/// `POST /submit` with a single `file` part.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub job_id: String,
    pub filename: String,
    pub status: JobState,
}

/// One entry of a `files[]` batch submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSubmitEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    pub filename: String,
    /// `queued` or `rejected`.
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BatchSubmitEntry {
    pub fn queued(job_id: String, filename: String) -> Self {
        Self {
            job_id: Some(job_id),
            filename,
            status: JobState::Queued.as_str().into(),
            error: None,
        }
    }

    pub fn rejected(filename: String, error: impl Into<String>) -> Self {
        Self {
            job_id: None,
            filename,
            status: "rejected".into(),
            error: Some(error.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSubmitResponse {
    pub jobs: Vec<BatchSubmitEntry>,
}

/// `GET /status/{job_id}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusResponse {
    pub job_id: String,
    pub filename: String,
    pub status: JobState,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub has_result: bool,
}

impl From<&JobRecord> for StatusResponse {
    fn from(record: &JobRecord) -> Self {
        Self {
            job_id: record.id().to_string(),
            filename: record.filename().to_string(),
            status: record.state(),
            created_at: record.created_at(),
            started_at: record.started_at(),
            completed_at: record.completed_at(),
            error: record.error().map(str::to_string),
            has_result: record.result().is_some(),
        }
    }
}

/// `GET /result/{job_id}`, 200.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultResponse {
    pub job_id: String,
    pub filename: String,
    pub markdown: String,
    pub image_count: usize,
    pub completed_at: Option<DateTime<Utc>>,
}

/// `GET /result/{job_id}`, 202.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingResponse {
    pub job_id: String,
    pub status: JobState,
    pub message: String,
}

/// `GET /result/{job_id}`, 422.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedResponse {
    pub job_id: String,
    pub filename: String,
    pub status: JobState,
    pub error: String,
}

/// `GET /stats`
pub type StatsResponse = QueueStats;

/// Any 4xx/5xx body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }
}

/// 413 from `/submit`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TooLargeResponse {
    pub error: String,
    pub max_size_mb: u64,
}

/// `POST /batch/status` request body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchStatusRequest {
    pub job_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BatchStatusEntry {
    Found(StatusResponse),
    Missing { job_id: String, error: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchStatusResponse {
    pub results: Vec<BatchStatusEntry>,
}
