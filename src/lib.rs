//! # appvisor
//!
//! **Appvisor** is the runtime controller of a long-running desktop application.
//!
//! It owns the process-wide machinery an application core needs around its
//! storage engine: a topic-keyed event bus, an elastic worker pool, periodic
//! daemons gated on system activity, a single-writer storage dispatcher, and a
//! two-phase (view, then model) shutdown.
//!
//! ## Architecture
//! ### Overview
//! ```text
//! ┌───────────────────────────────────────────────────────────────────┐
//! │  Controller (process-wide runtime object)                         │
//! │  - EventBus       (topic → handlers, deferred queue + pump)       │
//! │  - WorkerPool     (elastic, capped, per-worker FIFO)              │
//! │  - DaemonScheduler(periodic + big-job daemons, AliveTracker)      │
//! │  - StorageDispatcher (one writer task, High/Low/Interruptable)    │
//! │  - Signals        (busy / idle / just-woke-from-sleep)            │
//! │  - CacheRegistry  (clear / maintain named caches)                 │
//! └──────┬──────────────────┬──────────────────┬───────────────┬──────┘
//!        ▼                  ▼                  ▼               ▼
//!   publish/subscribe  call_to_worker    daemon cycles    read / write*
//!        │                  │                  │               │
//!        │     failures ────┴──────────────────┴───────────────┘
//!        ▼          │
//!   handlers  ◄─────┘  pool.job_failed, daemon.failed, storage.write_failed
//! ```
//!
//! ### Lifecycle
//! ```text
//! builder().build() ─► init_model() ─► init_view() ─► ... ─► shutdown_view() ─► shutdown_model()
//!                       storage up      pump+daemons          daemons, pool,      storage drained,
//!                                                             pump drained        writer closed
//! ```
//!
//! ## Features
//! | Area              | Description                                                   | Key types / traits                      |
//! |-------------------|---------------------------------------------------------------|-----------------------------------------|
//! | **Controller**    | Lifecycle, shutdown ordering, pass-through API.               | [`Controller`], [`Phase`]               |
//! | **Events**        | Topic-keyed synchronous dispatch and deferred queue.          | [`EventBus`], [`Event`], [`Subscribe`]  |
//! | **Workers**       | Deferred jobs on an elastic pool.                             | [`WorkerPool`], [`Job`]                 |
//! | **Daemons**       | Periodic housekeeping gated by system activity.               | [`DaemonSpec`], [`DaemonFn`]            |
//! | **Storage**       | Prioritized single-writer access to an external engine.       | [`StorageEngine`], [`StorageDispatcher`]|
//! | **Errors**        | Typed errors for the runtime, storage, jobs and handlers.     | [`RuntimeError`], [`TaskError`]         |
//! | **Configuration** | Centralize runtime settings.                                  | [`Config`]                              |
//!
//! ## Optional features
//! - `logging`: exports a simple built-in [`LogWriter`] that logs runtime topics.
//!
//! ## Example
//! ```rust
//! use std::time::Duration;
//! use appvisor::{Config, Controller, Job, Priority, StorageAction, StorageEngine, StorageError, TaskError};
//! use tokio_util::sync::CancellationToken;
//!
//! struct Put(u32);
//! impl StorageAction for Put { fn name(&self) -> &'static str { "put" } }
//!
//! #[derive(Default)]
//! struct Memory(Vec<u32>);
//!
//! #[async_trait::async_trait]
//! impl StorageEngine for Memory {
//!     type Action = Put;
//!     type Output = usize;
//!     async fn read(&mut self, _a: Put, _p: Priority) -> Result<usize, StorageError> {
//!         Ok(self.0.len())
//!     }
//!     async fn write(&mut self, a: Put, _p: Priority, _s: bool, _i: &CancellationToken)
//!         -> Result<usize, StorageError> {
//!         self.0.push(a.0);
//!         Ok(self.0.len())
//!     }
//! }
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let cfg = Config { no_daemons: true, ..Config::default() };
//!     let controller = Controller::builder(cfg, Memory::default()).build();
//!
//!     controller.init_model()?;
//!     controller.init_view()?;
//!
//!     controller.write(Put(1))?.await?;
//!     assert_eq!(controller.write_synchronous(Put(2)).await?, 2);
//!
//!     controller.call_to_worker(Job::new("hello", || async {
//!         tokio::time::sleep(Duration::from_millis(1)).await;
//!         Ok::<_, TaskError>(())
//!     }))?;
//!
//!     controller.shutdown_view().await;
//!     controller.shutdown_model().await;
//!     Ok(())
//! }
//! ```
mod core;
mod daemons;
mod error;
mod events;
mod pool;
mod storage;
mod subscribers;

// ---- Public re-exports ----

pub use core::{
    Cache, CacheRegistry, Config, Controller, ControllerBuilder, NO_WAL_MARKER, Phase, Signals,
    wait_for_shutdown_signal,
};
pub use daemons::{
    AliveTracker, BoxDaemonFuture, Daemon, DaemonContext, DaemonFn, DaemonKind, DaemonScheduler,
    DaemonSpec,
};
pub use error::{HandlerError, RuntimeError, StorageError, TaskError};
pub use events::{Event, EventBus, Topic, topics};
pub use pool::{BoxJobFuture, Job, WorkerId, WorkerPool};
pub use storage::{Priority, StorageAction, StorageDispatcher, StorageEngine, WriteHandle};
pub use subscribers::{HandlerFn, Subscribe, SubscriberId};

// Optional: expose a simple built-in logger subscriber.
// Enable with: `--features logging`
#[cfg(feature = "logging")]
pub use subscribers::LogWriter;
