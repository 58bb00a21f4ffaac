//! In-memory job store.
//!
//! One store-wide `RwLock` guards the id → record map; each record has its
//! own `Mutex`. Lookups take the map's read lock only long enough to clone
//! the record's `Arc`, so a slow transition on one job never blocks status
//! reads on another.
//!
//! [`JobStore::transition`] is the only way to mutate a record after
//! creation. It is a compare-and-set on the record's state: of any number
//! of concurrent callers using the same `from`, at most one succeeds.

use crate::error::TransitionError;
use crate::job::{JobId, JobRecord, JobState};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

type Slot = Arc<Mutex<JobRecord>>;

/// Per-state job counts.
///
/// Collected record by record without a global lock, so under concurrent
/// load the figures are a close approximation, not a consistent cut.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StateCounts {
    pub queued: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
}

impl StateCounts {
    pub fn total(&self) -> usize {
        self.queued + self.processing + self.completed + self.failed
    }
}

#[derive(Debug, Default)]
pub struct JobStore {
    jobs: RwLock<HashMap<JobId, Slot>>,
}

fn lock(slot: &Slot) -> MutexGuard<'_, JobRecord> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

impl JobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a fresh QUEUED record and return its id.
    pub fn create(&self, filename: impl Into<String>, document: Bytes) -> JobId {
        let id = JobId::new();
        let record = JobRecord::new(id, filename.into(), document);
        self.jobs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, Arc::new(Mutex::new(record)));
        id
    }

    fn slot(&self, id: &JobId) -> Option<Slot> {
        self.jobs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    /// Snapshot of one record. Later changes do not affect the copy.
    pub fn get(&self, id: &JobId) -> Option<JobRecord> {
        self.slot(id).map(|slot| lock(&slot).snapshot())
    }

    /// Forget a record that was never handed to a worker.
    pub(crate) fn remove(&self, id: &JobId) -> bool {
        self.jobs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id)
            .is_some()
    }

    pub fn len(&self) -> usize {
        self.jobs.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Atomically move `id` from `from` to `to`, running `mutate` under the
    /// record lock first.
    ///
    /// The mutator sees the record still in `from`; the new state is applied
    /// after it returns. If the resulting record breaks an invariant, the
    /// whole transition is undone and `Inconsistent` is returned.
    pub fn transition<R>(
        &self,
        id: &JobId,
        from: JobState,
        to: JobState,
        mutate: impl FnOnce(&mut JobRecord) -> R,
    ) -> Result<R, TransitionError> {
        if !from.can_transition_to(to) {
            return Err(TransitionError::IllegalTransition { from, to });
        }
        let slot = self.slot(id).ok_or(TransitionError::NotFound(*id))?;
        let mut record = lock(&slot);

        if record.state() != from {
            return Err(TransitionError::Conflict {
                id: *id,
                expected: from,
                actual: record.state(),
            });
        }

        let before = record.clone();
        let out = mutate(&mut record);
        record.set_state(to);

        if !record.is_consistent() {
            *record = before;
            return Err(TransitionError::Inconsistent { id: *id, state: to });
        }
        Ok(out)
    }

    pub fn counts(&self) -> StateCounts {
        let slots: Vec<Slot> = self
            .jobs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();

        let mut counts = StateCounts::default();
        for slot in &slots {
            match lock(slot).state() {
                JobState::Queued => counts.queued += 1,
                JobState::Processing => counts.processing += 1,
                JobState::Completed => counts.completed += 1,
                JobState::Failed => counts.failed += 1,
            }
        }
        counts
    }

    /// Drop terminal records whose `completed_at` is before `cutoff`.
    /// Returns how many were removed.
    pub fn evict_finished_before(&self, cutoff: DateTime<Utc>) -> usize {
        let mut jobs = self.jobs.write().unwrap_or_else(PoisonError::into_inner);
        let before = jobs.len();
        jobs.retain(|_, slot| {
            let record = lock(slot);
            !(record.state().is_terminal()
                && record.completed_at().is_some_and(|done| done < cutoff))
        });
        before - jobs.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::ConvertedDocument;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Barrier;

    fn pdf() -> Bytes {
        Bytes::from_static(b"%PDF-1.4 test")
    }

    fn claim(store: &JobStore, id: &JobId) -> Result<Option<Bytes>, TransitionError> {
        store.transition(id, JobState::Queued, JobState::Processing, |r| {
            r.mark_started(Utc::now());
            r.take_document()
        })
    }

    #[test]
    fn create_then_get_is_queued() {
        let store = JobStore::new();
        let id = store.create("doc.pdf", pdf());
        let rec = store.get(&id).unwrap();
        assert_eq!(rec.state(), JobState::Queued);
        assert_eq!(rec.filename(), "doc.pdf");
        assert!(rec.started_at().is_none());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn unknown_id_is_not_found() {
        let store = JobStore::new();
        let id = JobId::new();
        assert!(store.get(&id).is_none());
        assert_eq!(claim(&store, &id), Err(TransitionError::NotFound(id)));
    }

    #[test]
    fn claim_hands_over_document_once() {
        let store = JobStore::new();
        let id = store.create("doc.pdf", pdf());
        assert_eq!(claim(&store, &id).unwrap(), Some(pdf()));
        let err = claim(&store, &id).unwrap_err();
        assert!(matches!(
            err,
            TransitionError::Conflict {
                actual: JobState::Processing,
                ..
            }
        ));
    }

    #[test]
    fn illegal_edge_is_rejected_before_lookup() {
        let store = JobStore::new();
        let id = store.create("doc.pdf", pdf());
        let err = store
            .transition(&id, JobState::Queued, JobState::Completed, |_| ())
            .unwrap_err();
        assert_eq!(
            err,
            TransitionError::IllegalTransition {
                from: JobState::Queued,
                to: JobState::Completed
            }
        );
        assert_eq!(store.get(&id).unwrap().state(), JobState::Queued);
    }

    #[test]
    fn inconsistent_mutation_is_rolled_back() {
        let store = JobStore::new();
        let id = store.create("doc.pdf", pdf());
        claim(&store, &id).unwrap();

        // COMPLETED with no result attached
        let err = store
            .transition(&id, JobState::Processing, JobState::Completed, |_| ())
            .unwrap_err();
        assert!(matches!(err, TransitionError::Inconsistent { .. }));
        let rec = store.get(&id).unwrap();
        assert_eq!(rec.state(), JobState::Processing);
        assert!(rec.completed_at().is_none());
    }

    #[test]
    fn exactly_one_racing_claim_wins() {
        const THREADS: usize = 16;
        let store = JobStore::new();
        let id = store.create("race.pdf", pdf());
        let barrier = Barrier::new(THREADS);
        let wins = AtomicUsize::new(0);
        let conflicts = AtomicUsize::new(0);

        std::thread::scope(|s| {
            for _ in 0..THREADS {
                s.spawn(|| {
                    barrier.wait();
                    match claim(&store, &id) {
                        Ok(_) => wins.fetch_add(1, Ordering::SeqCst),
                        Err(TransitionError::Conflict { .. }) => {
                            conflicts.fetch_add(1, Ordering::SeqCst)
                        }
                        Err(other) => panic!("unexpected error: {other}"),
                    };
                });
            }
        });

        assert_eq!(wins.load(Ordering::SeqCst), 1);
        assert_eq!(conflicts.load(Ordering::SeqCst), THREADS - 1);
    }

    #[test]
    fn counts_and_eviction() {
        let store = JobStore::new();
        let done = store.create("done.pdf", pdf());
        let _waiting = store.create("waiting.pdf", pdf());
        claim(&store, &done).unwrap();
        store
            .transition(&done, JobState::Processing, JobState::Completed, |r| {
                r.set_result(
                    ConvertedDocument {
                        markdown: "# ok".into(),
                        assets: Vec::new(),
                    },
                    Utc::now(),
                )
            })
            .unwrap();

        let counts = store.counts();
        assert_eq!(counts.completed, 1);
        assert_eq!(counts.queued, 1);
        assert_eq!(counts.total(), 2);

        // cutoff in the past keeps everything
        assert_eq!(store.evict_finished_before(Utc::now() - chrono::Duration::hours(1)), 0);
        // cutoff in the future drops only the terminal record
        assert_eq!(store.evict_finished_before(Utc::now() + chrono::Duration::hours(1)), 1);
        assert!(store.get(&done).is_none());
        assert_eq!(store.len(), 1);
    }
}
