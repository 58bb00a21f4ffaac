//! Fixed-size worker pool.
//!
//! Each worker is a tokio task running the same loop:
//!
//! ```text
//! pop id ─▶ claim (QUEUED → PROCESSING) ─▶ engine.convert on the blocking pool
//!        ◀─ record (PROCESSING → COMPLETED | FAILED) ◀─┘
//! ```
//!
//! The claim is a conditional store transition, so a job is processed at
//! most once even if its id were delivered twice. Engine errors and panics
//! become FAILED records; nothing a document does can end a worker.

use crate::config::ShutdownPolicy;
use crate::engine::ConversionEngine;
use crate::error::TransitionError;
use crate::job::{JobId, JobState};
use crate::queue::WorkQueue;
use crate::store::JobStore;
use chrono::Utc;
use std::any::Any;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

/// State shared by every worker.
struct Shared {
    store: Arc<JobStore>,
    queue: Arc<WorkQueue>,
    engine: Arc<dyn ConversionEngine>,
    /// Present when the engine is not reentrant: held across each call.
    gate: Option<Arc<Mutex<()>>>,
    cancel: CancellationToken,
    policy: ShutdownPolicy,
}

pub struct WorkerPool {
    shared: Arc<Shared>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    size: usize,
}

impl WorkerPool {
    /// Spawn `workers` tasks on the current runtime.
    pub fn spawn(
        workers: usize,
        store: Arc<JobStore>,
        queue: Arc<WorkQueue>,
        engine: Arc<dyn ConversionEngine>,
        policy: ShutdownPolicy,
    ) -> Self {
        let gate = (!engine.is_reentrant()).then(|| Arc::new(Mutex::new(())));
        info!(
            workers,
            engine = engine.name(),
            serialised = gate.is_some(),
            ?policy,
            "starting worker pool"
        );

        let shared = Arc::new(Shared {
            store,
            queue,
            engine,
            gate,
            cancel: CancellationToken::new(),
            policy,
        });

        let handles = (1..=workers)
            .map(|n| {
                let shared = Arc::clone(&shared);
                tokio::spawn(run_worker(shared).instrument(info_span!("worker", worker = n)))
            })
            .collect();

        Self {
            shared,
            handles: Mutex::new(handles),
            size: workers,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Close the queue and wait for every worker to exit.
    ///
    /// Under [`ShutdownPolicy::Drain`] workers empty the queue first; under
    /// [`ShutdownPolicy::Abandon`] they stop after the job in hand. A second
    /// call returns immediately.
    pub async fn shutdown(&self) {
        self.shared.queue.close();
        if self.shared.policy == ShutdownPolicy::Abandon {
            self.shared.cancel.cancel();
        }

        let handles: Vec<_> = std::mem::take(
            &mut *self.handles.lock().unwrap_or_else(PoisonError::into_inner),
        );
        if handles.is_empty() {
            return;
        }
        for handle in handles {
            if let Err(e) = handle.await {
                error!("worker task ended abnormally: {e}");
            }
        }
        info!(
            left_queued = self.shared.queue.depth(),
            "worker pool stopped"
        );
    }

    /// Stop without waiting; used when the owner is dropped.
    pub(crate) fn abort_waiting(&self) {
        self.shared.queue.close();
        self.shared.cancel.cancel();
    }
}

async fn run_worker(shared: Arc<Shared>) {
    debug!("worker ready");
    loop {
        let next = match shared.policy {
            ShutdownPolicy::Drain => shared.queue.pop().await,
            ShutdownPolicy::Abandon => tokio::select! {
                biased;
                _ = shared.cancel.cancelled() => None,
                id = shared.queue.pop() => id,
            },
        };
        let Some(id) = next else { break };
        process(&shared, id)
            .instrument(info_span!("job", job_id = %id))
            .await;
    }
    debug!("worker exiting");
}

async fn process(shared: &Shared, id: JobId) {
    let claimed = shared
        .store
        .transition(&id, JobState::Queued, JobState::Processing, |record| {
            record.mark_started(Utc::now());
            (record.filename().to_string(), record.take_document())
        });

    let (filename, document) = match claimed {
        Ok((filename, Some(document))) => (filename, document),
        Ok((_, None)) => {
            finish(shared, id, Err("submitted document is missing".into()));
            return;
        }
        Err(e @ TransitionError::Conflict { .. }) => {
            warn!("claim skipped: {e}");
            return;
        }
        Err(e) => {
            warn!("claim failed: {e}");
            return;
        }
    };

    info!(%filename, bytes = document.len(), "processing");
    let started = Instant::now();

    let engine = Arc::clone(&shared.engine);
    let gate = shared.gate.clone();
    let joined = tokio::task::spawn_blocking(move || {
        let _serialised = gate
            .as_ref()
            .map(|g| g.lock().unwrap_or_else(PoisonError::into_inner));
        engine.convert(&document)
    })
    .await;

    let outcome = match joined {
        Ok(Ok(doc)) => Ok(doc),
        Ok(Err(e)) => Err(e.to_string()),
        Err(e) if e.is_panic() => Err(format!(
            "conversion panicked: {}",
            panic_message(e.into_panic().as_ref())
        )),
        Err(e) => Err(format!("conversion task cancelled: {e}")),
    };

    match &outcome {
        Ok(doc) => info!(
            %filename,
            elapsed_ms = started.elapsed().as_millis() as u64,
            images = doc.image_count(),
            "completed"
        ),
        Err(cause) => error!(
            %filename,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "failed: {cause}"
        ),
    }
    finish(shared, id, outcome);
}

fn finish(shared: &Shared, id: JobId, outcome: Result<crate::job::JobResult, String>) {
    let now = Utc::now();
    let recorded = match outcome {
        Ok(doc) => shared
            .store
            .transition(&id, JobState::Processing, JobState::Completed, |r| {
                r.set_result(doc, now)
            }),
        Err(cause) => shared
            .store
            .transition(&id, JobState::Processing, JobState::Failed, |r| {
                r.set_error(cause, now)
            }),
    };
    if let Err(e) = recorded {
        warn!("could not record outcome: {e}");
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        *s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "unknown panic payload"
    }
}
