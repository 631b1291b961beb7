//! FIFO mutual exclusion over the underlying transport (§4.D).
//!
//! Register transmits, tunnel reads, and tunnel writes all contend on a
//! single admission queue that runs at most one operation at a time.
//! Grounded on `mjlib::multiplex::ThreadedClient`'s single-worker-thread
//! request queue (`original_source/mjlib/multiplex/threaded_client.cc`),
//! reshaped around a fair `tokio::sync::Semaphore` instead of a thread
//! plus condition variable.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use tokio::sync::Semaphore;

use crate::error::ClientError;

/// Identifies one queued operation so it can be cancelled before it
/// starts. Already-running operations ignore cancellation (§4.D).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Nonce(u64);

pub struct RequestQueue {
    admission: Semaphore,
    next_nonce: AtomicU64,
    cancelled: Mutex<HashSet<u64>>,
}

impl RequestQueue {
    pub fn new() -> Self {
        RequestQueue {
            admission: Semaphore::new(1),
            next_nonce: AtomicU64::new(0),
            cancelled: Mutex::new(HashSet::new()),
        }
    }

    /// Reserve a nonce for an operation that has not yet enqueued.
    pub fn issue_nonce(&self) -> Nonce {
        Nonce(self.next_nonce.fetch_add(1, Ordering::Relaxed))
    }

    /// Cancel a not-yet-started operation. A no-op if it already ran or
    /// was never issued.
    pub fn cancel(&self, nonce: Nonce) {
        self.cancelled.lock().unwrap().insert(nonce.0);
    }

    /// Run `op` once this nonce reaches the head of the queue, unless it
    /// was cancelled first.
    pub async fn run<F, Fut, R>(&self, nonce: Nonce, op: F) -> Result<R, ClientError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = R>,
    {
        let _permit = self.admission.acquire().await.expect("semaphore is never closed");
        if self.cancelled.lock().unwrap().remove(&nonce.0) {
            return Err(ClientError::Cancelled);
        }
        Ok(op().await)
    }
}

impl Default for RequestQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn operations_run_in_fifo_order() {
        let queue = RequestQueue::new();
        let order = std::sync::Arc::new(Mutex::new(Vec::new()));

        let n1 = queue.issue_nonce();
        let n2 = queue.issue_nonce();

        let o1 = order.clone();
        let first = queue.run(n1, || async move {
            o1.lock().unwrap().push(1);
        });
        let o2 = order.clone();
        let second = queue.run(n2, || async move {
            o2.lock().unwrap().push(2);
        });

        let (_, _) = tokio::join!(first, second);
        assert_eq!(*order.lock().unwrap(), vec![1, 2]);
    }

    #[tokio::test]
    async fn cancelling_before_it_runs_skips_the_operation() {
        let queue = RequestQueue::new();
        let nonce = queue.issue_nonce();
        queue.cancel(nonce);
        let ran = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
        let ran2 = ran.clone();
        let result = queue.run(nonce, || async move {
            ran2.store(true, Ordering::SeqCst);
        }).await;
        assert!(matches!(result, Err(ClientError::Cancelled)));
        assert!(!ran.load(Ordering::SeqCst));
    }
}
