//! FIFO work queue of job ids.
//!
//! A `tokio::sync::mpsc` unbounded channel. Workers share the receiver
//! behind an async mutex, so an idle worker suspends in [`WorkQueue::pop`]
//! without spinning. Closing drops the sender: workers drain whatever is
//! still buffered and then see `None`.

use crate::error::QueueError;
use crate::job::JobId;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

#[derive(Debug)]
pub struct WorkQueue {
    tx: Mutex<Option<UnboundedSender<JobId>>>,
    rx: tokio::sync::Mutex<UnboundedReceiver<JobId>>,
    depth: AtomicUsize,
}

impl Default for WorkQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkQueue {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx: Mutex::new(Some(tx)),
            rx: tokio::sync::Mutex::new(rx),
            depth: AtomicUsize::new(0),
        }
    }

    /// Enqueue an id. Never blocks; fails only once the queue is closed.
    pub fn push(&self, id: JobId) -> Result<(), QueueError> {
        let guard = self.tx.lock().unwrap_or_else(PoisonError::into_inner);
        let tx = guard.as_ref().ok_or(QueueError::ShuttingDown)?;
        // Count before sending so a fast pop never underflows the gauge.
        self.depth.fetch_add(1, Ordering::SeqCst);
        if tx.send(id).is_err() {
            self.depth.fetch_sub(1, Ordering::SeqCst);
            return Err(QueueError::ShuttingDown);
        }
        Ok(())
    }

    /// Wait for the next id in FIFO order.
    ///
    /// Returns `None` once the queue is closed and fully drained.
    pub async fn pop(&self) -> Option<JobId> {
        let id = self.rx.lock().await.recv().await?;
        self.depth.fetch_sub(1, Ordering::SeqCst);
        Some(id)
    }

    /// Stop accepting pushes. Buffered ids remain poppable. Idempotent.
    pub fn close(&self) {
        self.tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    pub fn is_closed(&self) -> bool {
        self.tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }

    /// Ids pushed but not yet popped.
    pub fn depth(&self) -> usize {
        self.depth.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fifo_order() {
        let q = WorkQueue::new();
        let ids: Vec<JobId> = (0..5).map(|_| JobId::new()).collect();
        for id in &ids {
            q.push(*id).unwrap();
        }
        assert_eq!(q.depth(), 5);
        for id in &ids {
            assert_eq!(q.pop().await, Some(*id));
        }
        assert_eq!(q.depth(), 0);
    }

    #[tokio::test]
    async fn close_drains_then_ends() {
        let q = WorkQueue::new();
        let id = JobId::new();
        q.push(id).unwrap();
        q.close();
        q.close();
        assert!(q.is_closed());
        assert!(matches!(q.push(JobId::new()), Err(QueueError::ShuttingDown)));
        assert_eq!(q.pop().await, Some(id));
        assert_eq!(q.pop().await, None);
    }

    #[tokio::test]
    async fn idle_pop_wakes_on_push() {
        let q = std::sync::Arc::new(WorkQueue::new());
        let waiter = {
            let q = q.clone();
            tokio::spawn(async move { q.pop().await })
        };
        tokio::task::yield_now().await;
        let id = JobId::new();
        q.push(id).unwrap();
        assert_eq!(waiter.await.unwrap(), Some(id));
    }
}
