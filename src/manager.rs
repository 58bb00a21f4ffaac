//! The queue manager: the one object the HTTP layer talks to.
//!
//! Owns the job store, the work queue, the worker pool and the retention
//! sweeper. All methods take `&self` and are safe to call from any number
//! of request handlers at once.

use crate::config::QueueConfig;
use crate::engine::ConversionEngine;
use crate::error::QueueError;
use crate::job::{JobId, JobRecord, JobResult, JobState};
use crate::pool::WorkerPool;
use crate::queue::WorkQueue;
use crate::store::JobStore;
use bytes::Bytes;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// What a result request sees.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    /// COMPLETED: the conversion output, shared with the store.
    Ready(Arc<JobResult>),
    /// Not terminal yet; carries the current state.
    Pending(JobState),
    /// FAILED: the recorded cause.
    Failed(String),
}

/// Queue-wide counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    /// Ids waiting in the work queue.
    pub queue_size: usize,
    pub total_jobs: usize,
    pub queued: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
}

pub struct QueueManager {
    store: Arc<JobStore>,
    queue: Arc<WorkQueue>,
    pool: WorkerPool,
    config: QueueConfig,
    sweeper_cancel: CancellationToken,
    sweeper: Mutex<Option<JoinHandle<()>>>,
    stopped: AtomicBool,
}

impl QueueManager {
    /// Validate `config`, spawn the worker pool and the retention sweeper.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(
        engine: Arc<dyn ConversionEngine>,
        config: QueueConfig,
    ) -> Result<Self, QueueError> {
        config.validate()?;
        tokio::runtime::Handle::try_current()
            .map_err(|e| QueueError::Internal(format!("no tokio runtime: {e}")))?;

        let store = Arc::new(JobStore::new());
        let queue = Arc::new(WorkQueue::new());
        let pool = WorkerPool::spawn(
            config.workers,
            Arc::clone(&store),
            Arc::clone(&queue),
            engine,
            config.shutdown_policy,
        );

        let sweeper_cancel = CancellationToken::new();
        let sweeper = config.retention().map(|ttl| {
            tokio::spawn(sweep(
                Arc::clone(&store),
                ttl,
                config.sweep_interval(),
                sweeper_cancel.clone(),
            ))
        });

        info!(
            workers = config.workers,
            retention_secs = ?config.retention_secs,
            "queue manager started"
        );

        Ok(Self {
            store,
            queue,
            pool,
            config,
            sweeper_cancel,
            sweeper: Mutex::new(sweeper),
            stopped: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    pub fn worker_count(&self) -> usize {
        self.pool.size()
    }

    /// Ids pushed but not yet popped by a worker.
    pub fn queue_depth(&self) -> usize {
        self.queue.depth()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.queue.is_closed()
    }

    /// Accept a document for conversion.
    ///
    /// Rejected submissions never get an id.
    pub fn submit(&self, document: Bytes, filename: &str) -> Result<JobId, QueueError> {
        let filename = filename.trim();
        if filename.is_empty() {
            return Err(QueueError::InvalidSubmission("filename is empty".into()));
        }
        if document.is_empty() {
            return Err(QueueError::InvalidSubmission(format!(
                "'{filename}' is empty"
            )));
        }
        if self.queue.is_closed() {
            return Err(QueueError::ShuttingDown);
        }

        let size = document.len();
        let id = self.store.create(filename, document);
        if let Err(e) = self.queue.push(id) {
            self.store.remove(&id);
            return Err(e);
        }
        info!(job_id = %id, filename, bytes = size, "job queued");
        Ok(id)
    }

    /// Snapshot of a job.
    pub fn status(&self, id: &JobId) -> Result<JobRecord, QueueError> {
        self.store
            .get(id)
            .ok_or_else(|| QueueError::JobNotFound(id.to_string()))
    }

    pub fn result(&self, id: &JobId) -> Result<JobOutcome, QueueError> {
        let record = self.status(id)?;
        match record.state() {
            JobState::Queued | JobState::Processing => Ok(JobOutcome::Pending(record.state())),
            JobState::Failed => Ok(JobOutcome::Failed(
                record.error().unwrap_or("unknown error").to_string(),
            )),
            JobState::Completed => record
                .into_result()
                .map(JobOutcome::Ready)
                .ok_or_else(|| QueueError::Internal(format!("job {id} completed without a result"))),
        }
    }

    /// Counters gathered without a global lock; approximate under load.
    pub fn stats(&self) -> QueueStats {
        let counts = self.store.counts();
        QueueStats {
            queue_size: self.queue_depth(),
            total_jobs: counts.total(),
            queued: counts.queued,
            processing: counts.processing,
            completed: counts.completed,
            failed: counts.failed,
        }
    }

    /// Look up several ids at once. Unknown or unparseable ids map to `None`.
    pub fn batch_status<S: AsRef<str>>(&self, ids: &[S]) -> Vec<(String, Option<JobRecord>)> {
        ids.iter()
            .map(|raw| {
                let raw = raw.as_ref();
                let record = parse_job_id(raw).ok().and_then(|id| self.store.get(&id));
                (raw.to_string(), record)
            })
            .collect()
    }

    /// Drop terminal jobs older than the retention window now, without
    /// waiting for the sweeper. Returns the number evicted.
    pub fn evict_expired(&self) -> usize {
        match self.config.retention() {
            Some(ttl) => evict_older_than(&self.store, ttl),
            None => 0,
        }
    }

    /// Stop accepting jobs, let the pool finish per its shutdown policy and
    /// stop the sweeper. Safe to call more than once.
    pub async fn shutdown(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        info!(policy = ?self.config.shutdown_policy, "shutting down queue manager");
        self.pool.shutdown().await;
        self.sweeper_cancel.cancel();

        let sweeper = self
            .sweeper
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = sweeper {
            if let Err(e) = handle.await {
                warn!("retention sweeper ended abnormally: {e}");
            }
        }
        info!("queue manager stopped");
    }
}

impl Drop for QueueManager {
    fn drop(&mut self) {
        self.pool.abort_waiting();
        self.sweeper_cancel.cancel();
    }
}

/// Parse a job id from its wire form. Unparseable ids are reported as not
/// found: to a caller they are indistinguishable from an unknown id.
pub fn parse_job_id(raw: &str) -> Result<JobId, QueueError> {
    raw.parse()
        .map_err(|_| QueueError::JobNotFound(raw.to_string()))
}

fn evict_older_than(store: &JobStore, ttl: Duration) -> usize {
    let Ok(ttl) = chrono::Duration::from_std(ttl) else {
        return 0;
    };
    let Some(cutoff) = Utc::now().checked_sub_signed(ttl) else {
        return 0;
    };
    let evicted = store.evict_finished_before(cutoff);
    if evicted > 0 {
        info!(evicted, "evicted expired jobs");
    }
    evicted
}

async fn sweep(store: Arc<JobStore>, ttl: Duration, every: Duration, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + every, every);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                evict_older_than(&store, ttl);
            }
        }
    }
    debug!("retention sweeper stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{from_fn, ConvertedDocument};

    fn echo() -> Arc<dyn ConversionEngine> {
        Arc::new(from_fn("echo", |bytes: &[u8]| {
            Ok(ConvertedDocument::from_markdown(String::from_utf8_lossy(bytes)))
        }))
    }

    #[tokio::test]
    async fn rejects_empty_submissions_without_creating_jobs() {
        let manager = QueueManager::start(echo(), QueueConfig::default()).unwrap();
        assert!(matches!(
            manager.submit(Bytes::new(), "a.pdf"),
            Err(QueueError::InvalidSubmission(_))
        ));
        assert!(matches!(
            manager.submit(Bytes::from_static(b"%PDF"), "   "),
            Err(QueueError::InvalidSubmission(_))
        ));
        assert_eq!(manager.stats().total_jobs, 0);
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn submit_after_shutdown_is_refused() {
        let manager = QueueManager::start(echo(), QueueConfig::default()).unwrap();
        manager.shutdown().await;
        manager.shutdown().await;
        assert!(manager.is_shutting_down());
        assert!(matches!(
            manager.submit(Bytes::from_static(b"%PDF"), "late.pdf"),
            Err(QueueError::ShuttingDown)
        ));
        assert_eq!(manager.stats().total_jobs, 0);
    }

    #[tokio::test]
    async fn garbage_ids_are_not_found() {
        let manager = QueueManager::start(echo(), QueueConfig::default()).unwrap();
        assert!(matches!(
            parse_job_id("../../etc/passwd"),
            Err(QueueError::JobNotFound(_))
        ));
        let batch = manager.batch_status(&["nope", "also-nope"]);
        assert_eq!(batch.len(), 2);
        assert!(batch.iter().all(|(_, rec)| rec.is_none()));
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn retention_disabled_never_evicts() {
        let config = QueueConfig::builder().retention(None).build().unwrap();
        let manager = QueueManager::start(echo(), config).unwrap();
        assert!(manager.config().retention().is_none());
        assert_eq!(manager.evict_expired(), 0);
        manager.shutdown().await;
    }

    #[test]
    fn start_requires_a_runtime() {
        let err = QueueManager::start(echo(), QueueConfig::default())
            .err()
            .unwrap();
        assert!(matches!(err, QueueError::Internal(_)));
    }
}
