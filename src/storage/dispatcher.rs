//! # Single-writer storage dispatcher.
//!
//! [`StorageDispatcher`] serializes every access to a [`StorageEngine`] through one
//! writer task with three priority bands.
//!
//! ## Architecture
//! ```text
//! read()                ──► [High]          ─┐
//! write()               ──► [High]  (async)  ├──► writer task ──► engine
//! write_synchronous()   ──► [Low]            │    (High > Low > Interruptable,
//! write_interruptable() ──► [Interruptable] ─┘     FIFO within a band)
//! ```
//!
//! ## Rules
//! - Exactly one job runs at a time; the engine is owned by the writer task.
//! - While an interruptable job runs, a `High`/`Low` arrival cancels its interrupt
//!   token and runs right after it stops.
//! - Synchronous callers get the engine's [`StorageError`]. Failed asynchronous
//!   writes are logged and published on `storage.write_failed` whether or not
//!   their handle is awaited.
//! - `shutdown` refuses new jobs, lets queued ones finish, closes the engine and
//!   waits for the writer.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures::FutureExt;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::core::Config;
use crate::core::shutdown::join_with_warning;
use crate::error::{RuntimeError, StorageError, panic_message};
use crate::events::{Event, EventBus, topics};

use super::engine::{Priority, StorageAction, StorageEngine};
use super::handle::{WriteHandle, dropped};

type Reply<T> = oneshot::Sender<Result<T, StorageError>>;

/// Action name used for maintenance passes.
const MAINTAIN: &str = "maintain";

enum Op<E: StorageEngine> {
    Read {
        action: E::Action,
        reply: Reply<E::Output>,
    },
    Write {
        action: E::Action,
        synchronous: bool,
        reply: Reply<E::Output>,
    },
    Maintain {
        stop_at: Option<Instant>,
        reply: Reply<()>,
    },
}

struct StorageJob<E: StorageEngine> {
    name: &'static str,
    priority: Priority,
    interrupt: CancellationToken,
    op: Op<E>,
}

struct Bands<E: StorageEngine> {
    high: mpsc::UnboundedSender<StorageJob<E>>,
    low: mpsc::UnboundedSender<StorageJob<E>>,
    interruptable: mpsc::UnboundedSender<StorageJob<E>>,
}

struct Receivers<E: StorageEngine> {
    high: mpsc::UnboundedReceiver<StorageJob<E>>,
    low: mpsc::UnboundedReceiver<StorageJob<E>>,
    interruptable: mpsc::UnboundedReceiver<StorageJob<E>>,
}

#[derive(Default)]
struct WriterState {
    doing_job: AtomicBool,
    finished: AtomicBool,
}

/// Prioritized single-writer front end of a storage engine.
pub struct StorageDispatcher<E: StorageEngine> {
    bands: Mutex<Option<Bands<E>>>,
    writer: tokio::sync::Mutex<Option<JoinHandle<()>>>,
    state: Arc<WriterState>,
    first_start: bool,
    warn_after: Duration,
}

impl<E: StorageEngine> StorageDispatcher<E> {
    /// Takes ownership of `engine` and spawns the writer task.
    ///
    /// Must be called within a tokio runtime.
    pub fn start(engine: E, cfg: &Config, bus: EventBus) -> Self {
        let (high_tx, high) = mpsc::unbounded_channel();
        let (low_tx, low) = mpsc::unbounded_channel();
        let (int_tx, interruptable) = mpsc::unbounded_channel();

        let first_start = engine.is_first_start();
        let state = Arc::new(WriterState::default());
        let writer = tokio::spawn(writer_loop(
            engine,
            Receivers {
                high,
                low,
                interruptable,
            },
            Arc::clone(&state),
            bus,
        ));
        info!(first_start, "storage writer started");

        Self {
            bands: Mutex::new(Some(Bands {
                high: high_tx,
                low: low_tx,
                interruptable: int_tx,
            })),
            writer: tokio::sync::Mutex::new(Some(writer)),
            state,
            first_start,
            warn_after: cfg.shutdown_warn_after,
        }
    }

    /// Reads through the `High` band and waits for the result.
    pub async fn read(&self, action: E::Action) -> Result<E::Output, RuntimeError> {
        let name = action.name();
        let (reply, rx) = oneshot::channel();
        self.enqueue(StorageJob {
            name,
            priority: Priority::High,
            interrupt: CancellationToken::new(),
            op: Op::Read { action, reply },
        })?;
        settle(name, rx).await
    }

    /// Queues an asynchronous write on the `High` band.
    pub fn write(&self, action: E::Action) -> Result<WriteHandle<E::Output>, RuntimeError> {
        let name = action.name();
        let (reply, rx) = oneshot::channel();
        self.enqueue(StorageJob {
            name,
            priority: Priority::High,
            interrupt: CancellationToken::new(),
            op: Op::Write {
                action,
                synchronous: false,
                reply,
            },
        })?;
        Ok(WriteHandle::new(name, rx))
    }

    /// Writes through the `Low` band and waits for completion.
    pub async fn write_synchronous(&self, action: E::Action) -> Result<E::Output, RuntimeError> {
        let name = action.name();
        let (reply, rx) = oneshot::channel();
        self.enqueue(StorageJob {
            name,
            priority: Priority::Low,
            interrupt: CancellationToken::new(),
            op: Op::Write {
                action,
                synchronous: true,
                reply,
            },
        })?;
        settle(name, rx).await
    }

    /// Writes through the `Interruptable` band and waits for completion.
    pub async fn write_interruptable(&self, action: E::Action) -> Result<E::Output, RuntimeError> {
        self.write_interruptable_with(action, CancellationToken::new())
            .await
    }

    /// Like [`write_interruptable`](Self::write_interruptable); cancelling `token`
    /// also interrupts the write.
    pub async fn write_interruptable_with(
        &self,
        action: E::Action,
        token: CancellationToken,
    ) -> Result<E::Output, RuntimeError> {
        let name = action.name();
        let (reply, rx) = oneshot::channel();
        self.enqueue(StorageJob {
            name,
            priority: Priority::Interruptable,
            interrupt: token.child_token(),
            op: Op::Write {
                action,
                synchronous: true,
                reply,
            },
        })?;
        settle(name, rx).await
    }

    /// Runs an interruptable maintenance pass bounded by `stop_at`.
    pub async fn maintain(
        &self,
        stop_at: Option<Instant>,
        token: CancellationToken,
    ) -> Result<(), RuntimeError> {
        let (reply, rx) = oneshot::channel();
        self.enqueue(StorageJob {
            name: MAINTAIN,
            priority: Priority::Interruptable,
            interrupt: token.child_token(),
            op: Op::Maintain { stop_at, reply },
        })?;
        settle(MAINTAIN, rx).await
    }

    /// True while the writer executes a job.
    pub fn currently_doing_job(&self) -> bool {
        self.state.doing_job.load(Ordering::SeqCst)
    }

    /// True once the writer closed the engine and exited.
    pub fn loop_is_finished(&self) -> bool {
        self.state.finished.load(Ordering::SeqCst)
    }

    /// True if the engine created its storage from scratch.
    pub fn is_first_start(&self) -> bool {
        self.first_start
    }

    /// True once shutdown began.
    pub fn is_closed(&self) -> bool {
        self.bands.lock().is_none()
    }

    /// Refuses new jobs, drains the queued ones, closes the engine and awaits the writer.
    ///
    /// Idempotent; concurrent callers all return after the writer is gone.
    pub async fn shutdown(&self) {
        let bands = self.bands.lock().take();
        drop(bands);

        let mut writer = self.writer.lock().await;
        if let Some(handle) = writer.take() {
            info!("waiting for storage writer to finish queued jobs");
            join_with_warning("storage_writer", handle, self.warn_after).await;
        }
    }

    fn enqueue(&self, job: StorageJob<E>) -> Result<(), RuntimeError> {
        let bands = self.bands.lock();
        let Some(bands) = bands.as_ref() else {
            return Err(RuntimeError::ShutdownInProgress { phase: "model" });
        };
        let tx = match job.priority {
            Priority::High => &bands.high,
            Priority::Low => &bands.low,
            Priority::Interruptable => &bands.interruptable,
        };
        debug!(action = job.name, priority = job.priority.as_label(), "storage job queued");
        tx.send(job)
            .map_err(|_| RuntimeError::ShutdownInProgress { phase: "model" })
    }
}

impl<E: StorageEngine> std::fmt::Debug for StorageDispatcher<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageDispatcher")
            .field("doing_job", &self.currently_doing_job())
            .field("finished", &self.loop_is_finished())
            .field("first_start", &self.first_start)
            .finish()
    }
}

async fn settle<T>(
    name: &'static str,
    rx: oneshot::Receiver<Result<T, StorageError>>,
) -> Result<T, RuntimeError> {
    match rx.await {
        Ok(res) => res.map_err(RuntimeError::from),
        Err(_) => Err(dropped(name).into()),
    }
}

async fn writer_loop<E: StorageEngine>(
    mut engine: E,
    mut rx: Receivers<E>,
    state: Arc<WriterState>,
    bus: EventBus,
) {
    // Arrival that pre-empted an interruptable job; served before the channels.
    let mut stash: Option<StorageJob<E>> = None;

    loop {
        let job = match stash.take() {
            Some(job) if job.priority == Priority::High => job,
            Some(job) => match rx.high.try_recv() {
                Ok(high) => {
                    stash = Some(job);
                    high
                }
                Err(_) => job,
            },
            None => tokio::select! {
                biased;
                Some(job) = rx.high.recv() => job,
                Some(job) = rx.low.recv() => job,
                Some(job) = rx.interruptable.recv() => job,
                else => break,
            },
        };

        state.doing_job.store(true, Ordering::SeqCst);
        let name = job.name;
        let interrupt = job.interrupt.clone();
        let preemptible = job.priority == Priority::Interruptable;

        let run = AssertUnwindSafe(perform(&mut engine, job, &bus)).catch_unwind();
        tokio::pin!(run);

        let outcome = if preemptible && stash.is_none() {
            tokio::select! {
                biased;
                res = &mut run => res,
                Some(next) = rx.high.recv() => {
                    debug!(action = name, "interruptable job pre-empted by high priority job");
                    stash = Some(next);
                    interrupt.cancel();
                    run.await
                }
                Some(next) = rx.low.recv() => {
                    debug!(action = name, "interruptable job pre-empted by low priority job");
                    stash = Some(next);
                    interrupt.cancel();
                    run.await
                }
            }
        } else {
            run.await
        };

        if let Err(panic) = outcome {
            error!(action = name, panic = %panic_message(&*panic), "storage job panicked");
        }
        state.doing_job.store(false, Ordering::SeqCst);
    }

    if let Err(e) = engine.close().await {
        error!(error = %e, "storage engine failed to close");
    }
    state.finished.store(true, Ordering::SeqCst);
    info!("storage writer finished");
}

async fn perform<E: StorageEngine>(engine: &mut E, job: StorageJob<E>, bus: &EventBus) {
    let StorageJob {
        name,
        priority,
        interrupt,
        op,
    } = job;

    match op {
        Op::Read { action, reply } => {
            let res = engine.read(action, priority).await;
            let _ = reply.send(res);
        }
        Op::Write {
            action,
            synchronous,
            reply,
        } => {
            let res = if interrupt.is_cancelled() {
                Err(StorageError::Interrupted { action: name })
            } else {
                engine.write(action, priority, synchronous, &interrupt).await
            };
            if !synchronous {
                if let Err(e) = &res {
                    warn!(action = name, error = %e, "asynchronous write failed");
                    bus.publish(
                        Event::new(topics::WRITE_FAILED)
                            .with_source(name)
                            .with_reason(e.as_message())
                            .with_payload(e.clone()),
                    );
                }
            }
            let _ = reply.send(res);
        }
        Op::Maintain { stop_at, reply } => {
            let res = if interrupt.is_cancelled() {
                Err(StorageError::Interrupted { action: name })
            } else {
                engine.maintain(stop_at, &interrupt).await
            };
            let _ = reply.send(res);
        }
    }
}
