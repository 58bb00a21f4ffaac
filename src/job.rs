//! The job record: the unit of state tracked per submission.
//!
//! A [`JobRecord`] is owned by the [`crate::store::JobStore`]; everything
//! outside the store sees snapshot copies. Fields are private so a snapshot
//! cannot be edited into a state the store would never produce, and the
//! record-level invariants live in [`JobRecord::is_consistent`], which the
//! store checks after every transition.
//!
//! The conversion output is shared behind an `Arc`, so a snapshot of a
//! completed job never copies its Markdown or asset buffers.

use crate::engine::ConvertedDocument;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use uuid::Uuid;

/// Opaque, never-reused job identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim()).map(Self)
    }
}

/// Lifecycle state of a job.
///
/// ```text
/// QUEUED ──▶ PROCESSING ──▶ COMPLETED
///                      └──▶ FAILED
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Queued,
    Processing,
    Completed,
    Failed,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Queued => "queued",
            JobState::Processing => "processing",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
        }
    }

    /// `COMPLETED` and `FAILED` are terminal: no transition leaves them.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }

    /// Whether `self → next` is an edge of the state machine.
    pub fn can_transition_to(&self, next: JobState) -> bool {
        matches!(
            (self, next),
            (JobState::Queued, JobState::Processing)
                | (JobState::Processing, JobState::Completed)
                | (JobState::Processing, JobState::Failed)
        )
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "queued" => Ok(JobState::Queued),
            "processing" => Ok(JobState::Processing),
            "completed" => Ok(JobState::Completed),
            "failed" => Ok(JobState::Failed),
            other => Err(format!("Invalid job state: {other}")),
        }
    }
}

/// Output of a successful job.
pub type JobResult = ConvertedDocument;

/// Everything the service knows about one submission.
#[derive(Debug, Clone)]
pub struct JobRecord {
    id: JobId,
    filename: String,
    state: JobState,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    result: Option<Arc<JobResult>>,
    error: Option<String>,
    /// Submitted bytes, held until the claiming worker takes them.
    document: Option<Bytes>,
}

impl JobRecord {
    pub(crate) fn new(id: JobId, filename: String, document: Bytes) -> Self {
        Self {
            id,
            filename,
            state: JobState::Queued,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            result: None,
            error: None,
            document: Some(document),
        }
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    pub fn result(&self) -> Option<&JobResult> {
        self.result.as_deref()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Consume a snapshot and keep only its result.
    pub fn into_result(self) -> Option<Arc<JobResult>> {
        self.result
    }

    /// Record the start of processing. A second call is ignored.
    ///
    /// The timestamp is clamped to `created_at` so the ordering invariant
    /// holds even if the wall clock steps backwards.
    pub fn mark_started(&mut self, at: DateTime<Utc>) {
        if self.started_at.is_none() {
            self.started_at = Some(at.max(self.created_at));
        }
    }

    /// Attach a successful conversion and stamp completion.
    pub fn set_result(&mut self, result: JobResult, at: DateTime<Utc>) {
        self.result = Some(Arc::new(result));
        self.error = None;
        self.stamp_completed(at);
    }

    /// Attach a failure cause and stamp completion.
    pub fn set_error(&mut self, cause: impl Into<String>, at: DateTime<Utc>) {
        self.error = Some(cause.into());
        self.result = None;
        self.stamp_completed(at);
    }

    fn stamp_completed(&mut self, at: DateTime<Utc>) {
        if self.completed_at.is_none() {
            let floor = self.started_at.unwrap_or(self.created_at);
            self.completed_at = Some(at.max(floor));
        }
    }

    pub(crate) fn take_document(&mut self) -> Option<Bytes> {
        self.document.take()
    }

    pub(crate) fn set_state(&mut self, state: JobState) {
        self.state = state;
    }

    /// A copy safe to hand out: identical except that it never carries the
    /// submitted document bytes.
    pub(crate) fn snapshot(&self) -> JobRecord {
        JobRecord {
            id: self.id,
            filename: self.filename.clone(),
            state: self.state,
            created_at: self.created_at,
            started_at: self.started_at,
            completed_at: self.completed_at,
            result: self.result.clone(),
            error: self.error.clone(),
            document: None,
        }
    }

    /// Check the record-level invariants:
    ///
    /// * `result` is set iff COMPLETED, `error` iff FAILED;
    /// * `started_at` is set from PROCESSING on, `completed_at` iff terminal;
    /// * `created_at ≤ started_at ≤ completed_at` where present.
    pub fn is_consistent(&self) -> bool {
        let outcome_ok = match self.state {
            JobState::Queued | JobState::Processing => {
                self.result.is_none() && self.error.is_none()
            }
            JobState::Completed => self.result.is_some() && self.error.is_none(),
            JobState::Failed => self.error.is_some() && self.result.is_none(),
        };

        let stamps_ok = match self.state {
            JobState::Queued => self.started_at.is_none() && self.completed_at.is_none(),
            JobState::Processing => self.started_at.is_some() && self.completed_at.is_none(),
            JobState::Completed | JobState::Failed => {
                self.started_at.is_some() && self.completed_at.is_some()
            }
        };

        let order_ok = match (self.started_at, self.completed_at) {
            (Some(s), Some(c)) => self.created_at <= s && s <= c,
            (Some(s), None) => self.created_at <= s,
            (None, Some(c)) => self.created_at <= c,
            (None, None) => true,
        };

        outcome_ok && stamps_ok && order_ok
    }
}
