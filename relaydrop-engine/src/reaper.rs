//! The join queue: relay workers announce their own completion, and the
//! accept loop reaps them without ever blocking on one that is still
//! running.
//!
//! A worker's completion is always sent from a drop guard, so a worker that
//! returns, panics or is aborted still shows up exactly once.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error};

use crate::worker::WorkerOutcome;

/// Identifies one relay worker for the lifetime of the relay.
pub type WorkerId = u64;

/// A finished worker, as reported to the accept loop.
#[derive(Clone, Debug)]
pub struct Completion {
    pub worker_id: WorkerId,
    pub outcome: WorkerOutcome,
}

type Handles = Arc<Mutex<HashMap<WorkerId, JoinHandle<()>>>>;

/// Creates a connected spawner and reaper.
pub fn join_queue() -> (JoinQueue, Reaper) {
    let (done_tx, done_rx) = mpsc::unbounded_channel();
    let handles: Handles = Arc::default();
    (
        JoinQueue {
            next_id: Arc::new(AtomicU64::new(1)),
            handles: Arc::clone(&handles),
            done_tx,
        },
        Reaper { handles, done_rx },
    )
}

/// Spawning side. Cloned into every handshake task.
#[derive(Clone)]
pub struct JoinQueue {
    next_id: Arc<AtomicU64>,
    handles: Handles,
    done_tx: mpsc::UnboundedSender<Completion>,
}

impl JoinQueue {
    /// Hands out a fresh worker id so callers can log and emit events
    /// before the worker exists.
    pub fn reserve_id(&self) -> WorkerId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Spawns `work` as worker `id`. Its outcome is queued for the reaper
    /// when it finishes.
    pub fn spawn<F>(&self, id: WorkerId, work: F)
    where
        F: Future<Output = WorkerOutcome> + Send + 'static,
    {
        let guard = CompletionGuard {
            worker_id: id,
            outcome: None,
            done_tx: self.done_tx.clone(),
        };

        // Held across the spawn: a completion can arrive before the insert,
        // and the reaper must still find the handle.
        let mut handles = self.handles.lock().unwrap_or_else(PoisonError::into_inner);
        let handle = tokio::spawn(async move {
            let mut guard = guard;
            guard.outcome = Some(work.await);
        });
        handles.insert(id, handle);
    }

    /// Workers spawned and not yet reaped.
    pub fn outstanding(&self) -> usize {
        self.handles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// Sends the completion when the worker task ends, however it ends.
struct CompletionGuard {
    worker_id: WorkerId,
    outcome: Option<WorkerOutcome>,
    done_tx: mpsc::UnboundedSender<Completion>,
}

impl Drop for CompletionGuard {
    fn drop(&mut self) {
        let outcome = self.outcome.take().unwrap_or(WorkerOutcome::Aborted);
        // The reaper is gone only after the relay has finished shutting down.
        let _ = self.done_tx.send(Completion {
            worker_id: self.worker_id,
            outcome,
        });
    }
}

/// Reaping side. Owned by the accept loop.
pub struct Reaper {
    handles: Handles,
    done_rx: mpsc::UnboundedReceiver<Completion>,
}

impl Reaper {
    /// Waits for the next worker to finish. Cancel safe.
    ///
    /// Never returns `None` while the relay holds a [`JoinQueue`].
    pub async fn next(&mut self) -> Option<Completion> {
        self.done_rx.recv().await
    }

    /// Returns an already finished worker, if any, without waiting.
    pub fn try_next(&mut self) -> Option<Completion> {
        self.done_rx.try_recv().ok()
    }

    /// Joins the finished worker's task and releases its slot.
    ///
    /// A worker whose task panicked is reported as
    /// [`WorkerOutcome::Panicked`] whatever its guard recorded.
    pub async fn reap(&mut self, completion: Completion) -> Completion {
        let handle = self
            .handles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&completion.worker_id);

        let Some(handle) = handle else {
            debug!(worker_id = completion.worker_id, "Worker already reaped");
            return completion;
        };

        match handle.await {
            Ok(()) => completion,
            Err(e) if e.is_panic() => {
                error!(worker_id = completion.worker_id, "Relay worker panicked");
                Completion {
                    worker_id: completion.worker_id,
                    outcome: WorkerOutcome::Panicked,
                }
            }
            Err(_) => Completion {
                worker_id: completion.worker_id,
                outcome: WorkerOutcome::Aborted,
            },
        }
    }

    /// Workers spawned and not yet reaped.
    pub fn outstanding(&self) -> usize {
        self.handles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}
