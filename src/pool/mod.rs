//! # Elastic worker pool.
//!
//! [`WorkerPool`] hands deferred jobs to long-lived workers, each owning a private
//! FIFO queue. It grows on demand up to a hard cap and prefers reusing idle workers.
//!
//! ## Architecture
//! ```text
//! submit(job)
//!    ├─ first idle worker (registration order) ──► its queue
//!    ├─ none idle, len < cap ──► spawn worker ──► its queue
//!    └─ none idle, len == cap ──► Err(ResourceExhausted)
//!
//! submit_to(id, job) ──► that worker's queue (runs after its earlier jobs)
//! ```
//!
//! ## Rules
//! - `submit` never blocks and never waits for a worker to free up.
//! - Blocking calls belong in [`Job::blocking`]; async jobs share the runtime threads.
//! - Ordering is guaranteed only within one worker's queue.
//! - Failed or panicking jobs are logged and published on `pool.job_failed`;
//!   the worker keeps serving its queue.
//! - `shutdown` closes every queue and waits for workers to finish what they
//!   hold. Nothing is aborted.

mod job;
mod worker;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::core::Config;
use crate::core::shutdown::join_with_warning;
use crate::error::RuntimeError;
use crate::events::EventBus;

pub use job::{BoxJobFuture, Job};
pub use worker::WorkerId;

use worker::Worker;

/// Elastic set of workers with per-worker FIFO queues.
pub struct WorkerPool {
    workers: Mutex<Vec<Worker>>,
    next_id: AtomicU64,
    closed: AtomicBool,
    cap: usize,
    warn_after: Duration,
    bus: EventBus,
}

impl WorkerPool {
    /// Creates an empty pool; workers are spawned lazily by `submit`.
    pub fn new(cfg: &Config, bus: EventBus) -> Self {
        Self {
            workers: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
            cap: cfg.worker_cap_clamped(),
            warn_after: cfg.shutdown_warn_after,
            bus,
        }
    }

    /// Queues `job` on an idle worker, spawning one if needed.
    ///
    /// Must be called within a tokio runtime.
    ///
    /// ### Errors
    /// - [`RuntimeError::ResourceExhausted`] when every worker is busy and the cap is reached
    /// - [`RuntimeError::ShutdownInProgress`] after [`WorkerPool::shutdown`]
    pub fn submit(&self, job: Job) -> Result<WorkerId, RuntimeError> {
        let mut workers = self.workers.lock();
        if self.closed.load(Ordering::SeqCst) {
            return Err(RuntimeError::ShutdownInProgress { phase: "pool" });
        }

        if let Some(idle) = workers.iter().find(|w| w.try_claim()) {
            return idle.enqueue_claimed(job);
        }

        if workers.len() >= self.cap {
            debug!(cap = self.cap, job = job.name(), "pool exhausted");
            return Err(RuntimeError::ResourceExhausted { cap: self.cap });
        }

        let id = WorkerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let fresh = Worker::spawn(id, self.bus.clone());
        fresh.pending.store(1, Ordering::SeqCst);
        let res = fresh.enqueue_claimed(job);
        workers.push(fresh);
        res
    }

    /// Appends `job` to the queue of `worker`, busy or not.
    ///
    /// ### Errors
    /// - [`RuntimeError::UnknownWorker`] if the pool never created `worker`
    /// - [`RuntimeError::ShutdownInProgress`] after [`WorkerPool::shutdown`]
    pub fn submit_to(&self, worker: WorkerId, job: Job) -> Result<WorkerId, RuntimeError> {
        let workers = self.workers.lock();
        if self.closed.load(Ordering::SeqCst) {
            return Err(RuntimeError::ShutdownInProgress { phase: "pool" });
        }
        workers
            .iter()
            .find(|w| w.id == worker)
            .ok_or(RuntimeError::UnknownWorker { worker: worker.0 })?
            .enqueue(job)
    }

    /// Number of workers created so far (until shutdown).
    pub fn worker_count(&self) -> usize {
        self.workers.lock().len()
    }

    /// Number of workers holding queued or running jobs.
    pub fn busy_count(&self) -> usize {
        self.workers.lock().iter().filter(|w| w.is_busy()).count()
    }

    /// True when no worker holds a job.
    pub fn is_idle(&self) -> bool {
        self.busy_count() == 0
    }

    /// True once shutdown began.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Stops accepting jobs and waits for every worker to drain its queue.
    ///
    /// Idempotent.
    pub async fn shutdown(&self) {
        let workers = {
            let mut guard = self.workers.lock();
            self.closed.store(true, Ordering::SeqCst);
            std::mem::take(&mut *guard)
        };
        if workers.is_empty() {
            return;
        }

        info!(workers = workers.len(), "shutting down worker pool");
        let joins: Vec<_> = workers
            .into_iter()
            .map(|w| {
                drop(w.tx);
                (w.id, w.join)
            })
            .collect();
        for (id, join) in joins {
            join_with_warning(&id.to_string(), join, self.warn_after).await;
        }
        info!("worker pool stopped");
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("cap", &self.cap)
            .field("workers", &self.worker_count())
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tokio::sync::{Semaphore, oneshot};

    use super::*;
    use crate::error::TaskError;
    use crate::events::{Event, topics};

    fn pool(cap: usize) -> (WorkerPool, EventBus) {
        let bus = EventBus::default();
        let cfg = Config {
            worker_cap: cap,
            ..Config::default()
        };
        (WorkerPool::new(&cfg, bus.clone()), bus)
    }

    fn blocked(gate: &Arc<Semaphore>) -> Job {
        let gate = Arc::clone(gate);
        Job::new("blocked", move || async move {
            let _permit = gate.acquire().await;
            Ok(())
        })
    }

    async fn settle(pool: &WorkerPool) {
        while !pool.is_idle() {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn idle_worker_is_reused() {
        let (pool, _bus) = pool(4);
        let first = pool.submit(Job::new("a", || async { Ok(()) })).unwrap();
        settle(&pool).await;
        let second = pool.submit(Job::new("b", || async { Ok(()) })).unwrap();
        assert_eq!(first, second);
        assert_eq!(pool.worker_count(), 1);
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn grows_until_cap_then_exhausts() {
        let (pool, _bus) = pool(2);
        let gate = Arc::new(Semaphore::new(0));

        let a = pool.submit(blocked(&gate)).unwrap();
        let b = pool.submit(blocked(&gate)).unwrap();
        assert_ne!(a, b);
        assert_eq!(pool.busy_count(), 2);

        let err = pool.submit(Job::new("c", || async { Ok(()) })).unwrap_err();
        assert!(matches!(err, RuntimeError::ResourceExhausted { cap: 2 }));

        gate.add_permits(2);
        settle(&pool).await;
        assert!(pool.submit(Job::new("d", || async { Ok(()) })).is_ok());
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn submit_to_runs_in_order() {
        let (pool, _bus) = pool(4);
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));

        let log = Arc::clone(&order);
        let id = pool
            .submit(Job::new("first", move || async move {
                tokio::task::yield_now().await;
                log.lock().push(1);
                Ok(())
            }))
            .unwrap();
        let log = Arc::clone(&order);
        pool.submit_to(id, Job::new("second", move || async move {
            log.lock().push(2);
            Ok(())
        }))
        .unwrap();

        settle(&pool).await;
        assert_eq!(*order.lock(), vec![1, 2]);

        let err = pool
            .submit_to(WorkerId(999), Job::new("x", || async { Ok(()) }))
            .unwrap_err();
        assert!(matches!(err, RuntimeError::UnknownWorker { worker: 999 }));
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn failures_are_reported_and_worker_survives() {
        let (pool, bus) = pool(1);
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        bus.subscribe(
            crate::SubscriberId::next(),
            topics::JOB_FAILED,
            crate::HandlerFn::arc("sink", move |ev: &Event| {
                sink.lock().push(ev.source.as_deref().unwrap_or_default().to_string());
                Ok(())
            }),
        );

        pool.submit(Job::new("fails", || async { Err(TaskError::fail("nope")) }))
            .unwrap();
        settle(&pool).await;
        pool.submit(Job::new("panics", || async {
            if true {
                panic!("bad job");
            }
            Ok(())
        }))
        .unwrap();
        settle(&pool).await;
        pool.submit(Job::new("quiet", || async { Err(TaskError::Canceled) }))
            .unwrap();
        settle(&pool).await;

        let (tx, rx) = oneshot::channel();
        pool.submit(Job::new("after", move || async move {
            let _ = tx.send(());
            Ok(())
        }))
        .unwrap();
        rx.await.unwrap();

        bus.drain();
        assert_eq!(*seen.lock(), vec!["fails", "panics"]);
        assert_eq!(pool.worker_count(), 1);
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_finishes_queued_jobs_and_rejects_new_ones() {
        let (pool, _bus) = pool(1);
        let done = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let id = {
            let done = Arc::clone(&done);
            pool.submit(Job::new("one", move || async move {
                tokio::time::sleep(Duration::from_millis(5)).await;
                done.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }))
            .unwrap()
        };
        for _ in 0..3 {
            let done = Arc::clone(&done);
            pool.submit_to(id, Job::new("more", move || async move {
                done.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }))
            .unwrap();
        }

        pool.shutdown().await;
        assert_eq!(done.load(Ordering::SeqCst), 4);
        assert_eq!(pool.worker_count(), 0);

        let err = pool.submit(Job::new("late", || async { Ok(()) })).unwrap_err();
        assert!(err.is_shutdown());
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn blocking_job_leaves_the_runtime_free() {
        let (pool, _bus) = pool(2);
        let (go_tx, go_rx) = std::sync::mpsc::channel::<()>();
        let (done_tx, done_rx) = oneshot::channel();

        pool.submit(Job::blocking("hash", move || {
            go_rx.recv().map_err(|e| TaskError::fail(e.to_string()))?;
            let _ = done_tx.send(());
            Ok(())
        }))
        .unwrap();

        // On a current-thread runtime this only resumes if the job is off-thread.
        tokio::time::sleep(Duration::from_millis(20)).await;
        go_tx.send(()).unwrap();
        done_rx.await.unwrap();
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn blocking_job_failures_are_reported() {
        let (pool, bus) = pool(1);
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        bus.subscribe(
            crate::SubscriberId::next(),
            topics::JOB_FAILED,
            crate::HandlerFn::arc("sink", move |ev: &Event| {
                let msg = ev.payload::<TaskError>().map(|e| e.as_message());
                sink.lock().push(msg.unwrap_or_default());
                Ok(())
            }),
        );

        pool.submit(Job::blocking("read_file", || Err(TaskError::fail("no such file"))))
            .unwrap();
        settle(&pool).await;
        pool.submit(Job::blocking("decode", || panic!("corrupt header")))
            .unwrap();
        pool.shutdown().await;

        bus.drain();
        assert_eq!(
            *seen.lock(),
            vec!["error: no such file", "error: panicked: corrupt header"]
        );
    }
}
