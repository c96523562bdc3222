//! # Worker unit.
//!
//! A worker is a long-lived task bound to one FIFO queue. It runs one job at a
//! time, reports failures, and exits only when its queue is closed.
//!
//! ```text
//! submit ──► pending += 1 ──► [mpsc queue] ──► run(job) ──► report ──► pending -= 1
//! ```
//!
//! `pending` counts jobs enqueued or running; a worker is idle iff it is zero.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use futures::FutureExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::{RuntimeError, TaskError, panic_message};
use crate::events::{Event, EventBus, topics};

use super::job::Job;

/// Identity of a worker unit.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkerId(pub(crate) u64);

impl WorkerId {
    /// Raw numeric value.
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "worker#{}", self.0)
    }
}

pub(crate) struct Worker {
    pub(crate) id: WorkerId,
    pub(crate) tx: mpsc::UnboundedSender<Job>,
    pub(crate) pending: Arc<AtomicUsize>,
    pub(crate) join: JoinHandle<()>,
}

impl Worker {
    /// Spawns the worker task. Must be called within a tokio runtime.
    pub(crate) fn spawn(id: WorkerId, bus: EventBus) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let pending = Arc::new(AtomicUsize::new(0));
        let join = tokio::spawn(run(id, rx, Arc::clone(&pending), bus));
        debug!(worker = %id, "worker started");
        Self {
            id,
            tx,
            pending,
            join,
        }
    }

    /// Claims the worker if idle.
    pub(crate) fn try_claim(&self) -> bool {
        self.pending
            .compare_exchange(0, 1, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    pub(crate) fn is_busy(&self) -> bool {
        self.pending.load(Ordering::SeqCst) > 0
    }

    /// Enqueues a job whose slot was already counted in `pending`.
    pub(crate) fn enqueue_claimed(&self, job: Job) -> Result<WorkerId, RuntimeError> {
        match self.tx.send(job) {
            Ok(()) => Ok(self.id),
            Err(_) => {
                self.pending.fetch_sub(1, Ordering::SeqCst);
                Err(RuntimeError::ShutdownInProgress { phase: "pool" })
            }
        }
    }

    /// Appends a job regardless of the worker's state.
    pub(crate) fn enqueue(&self, job: Job) -> Result<WorkerId, RuntimeError> {
        self.pending.fetch_add(1, Ordering::SeqCst);
        self.enqueue_claimed(job)
    }
}

async fn run(
    id: WorkerId,
    mut rx: mpsc::UnboundedReceiver<Job>,
    pending: Arc<AtomicUsize>,
    bus: EventBus,
) {
    while let Some(job) = rx.recv().await {
        let name = job.name().to_string();
        let outcome = std::panic::AssertUnwindSafe(async move { job.into_future().await })
            .catch_unwind()
            .await;

        let failure = match outcome {
            Ok(Ok(())) => None,
            Ok(Err(e)) if e.is_failure() => Some(e),
            Ok(Err(e)) => {
                debug!(worker = %id, job = %name, reason = e.as_label(), "job stopped early");
                None
            }
            Err(panic) => Some(TaskError::fail(format!(
                "panicked: {}",
                panic_message(&*panic)
            ))),
        };

        if let Some(err) = failure {
            warn!(worker = %id, job = %name, error = %err, "job failed");
            bus.publish(
                Event::new(topics::JOB_FAILED)
                    .with_source(name)
                    .with_reason(err.as_message())
                    .with_payload(err),
            );
        }
        pending.fetch_sub(1, Ordering::SeqCst);
    }
    debug!(worker = %id, "worker stopped");
}
