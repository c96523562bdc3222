//! # Controller: the process-wide runtime object.
//!
//! The [`Controller`] owns the event bus, the worker pool, the daemon scheduler,
//! the storage dispatcher and the lifecycle state machine that starts and stops
//! them in order.
//!
//! ## High-level architecture
//! ```text
//! Controller::builder(cfg, engine) ──► build() ──► Arc<Controller>
//!
//! init_model():  engine ──► StorageDispatcher::start   (writer task)
//! init_view():   event pump (bus.wait_for_work → drain)
//!                daemons: sleep_check, maintain_memory, maintain_storage, + registered
//!
//! shutdown_view():                       shutdown_model():
//!   signal view shutdown                   signal model shutdown (storage calls rejected)
//!   daemons.shutdown()   (join)            wait for an in-progress view shutdown
//!   pool.shutdown()      (join)            dispatcher.shutdown() (queued jobs drain)
//!   pump stop + final drain                publish controller.model_shutdown
//!   publish controller.view_shutdown
//! ```
//!
//! ## Rules
//! - The pump stops last in `shutdown_view`; its final drain delivers what the
//!   daemons and in-flight jobs published before they exited.
//! - Both shutdowns are idempotent and safe to call from several tasks at once.
//! - `shutdown_model` may run without `shutdown_view` (crash path); daemons still
//!   holding the controller then get `ShutdownInProgress` from storage calls.
//! - Lifecycle transitions are published with `publish_immediate`.
//!
//! ## Example
//! ```no_run
//! use appvisor::{Config, Controller, Priority, StorageAction, StorageEngine, StorageError};
//! use tokio_util::sync::CancellationToken;
//!
//! struct Noop;
//! impl StorageAction for Noop { fn name(&self) -> &'static str { "noop" } }
//!
//! struct Engine;
//!
//! #[async_trait::async_trait]
//! impl StorageEngine for Engine {
//!     type Action = Noop;
//!     type Output = ();
//!     async fn read(&mut self, _a: Noop, _p: Priority) -> Result<(), StorageError> { Ok(()) }
//!     async fn write(&mut self, _a: Noop, _p: Priority, _s: bool, _i: &CancellationToken)
//!         -> Result<(), StorageError> { Ok(()) }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), appvisor::RuntimeError> {
//!     let controller = Controller::builder(Config::default(), Engine).build();
//!     controller.run_until_signal().await
//! }
//! ```

use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock, Weak};
use std::time::SystemTime;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::daemons::{DaemonScheduler, DaemonSpec};
use crate::error::RuntimeError;
use crate::events::{Event, EventBus, Topic, topics};
use crate::pool::{Job, WorkerId, WorkerPool};
use crate::storage::{StorageDispatcher, StorageEngine, WriteHandle};
use crate::subscribers::{Subscribe, SubscriberId};

use super::builder::ControllerBuilder;
use super::builtin::builtin_daemons;
use super::caches::{Cache, CacheRegistry};
use super::lifecycle::{Lifecycle, Phase};
use super::shutdown::{join_with_warning, wait_for_shutdown_signal};
use super::{Config, Signals};

struct Pump {
    stop: CancellationToken,
    join: JoinHandle<()>,
}

/// Runtime controller of a desktop application.
pub struct Controller<E: StorageEngine> {
    cfg: Config,
    bus: EventBus,
    pool: WorkerPool,
    signals: Arc<Signals>,
    daemons: DaemonScheduler,
    extra_daemons: Mutex<Vec<DaemonSpec>>,
    engine: Mutex<Option<E>>,
    storage: OnceLock<StorageDispatcher<E>>,
    caches: CacheRegistry,
    lifecycle: Lifecycle,
    pump: Mutex<Option<Pump>>,
    me: Weak<Self>,
}

impl<E: StorageEngine> Controller<E> {
    /// Starts building a controller around `engine`.
    pub fn builder(cfg: Config, engine: E) -> ControllerBuilder<E> {
        ControllerBuilder::new(cfg, engine)
    }

    pub(crate) fn new_internal(
        cfg: Config,
        engine: E,
        daemons: Vec<DaemonSpec>,
        me: Weak<Self>,
    ) -> Self {
        let bus = EventBus::from_config(&cfg);
        let signals = Arc::new(Signals::new(&cfg));
        Self {
            pool: WorkerPool::new(&cfg, bus.clone()),
            daemons: DaemonScheduler::new(&cfg, Arc::clone(&signals), bus.clone()),
            extra_daemons: Mutex::new(daemons),
            engine: Mutex::new(Some(engine)),
            storage: OnceLock::new(),
            caches: CacheRegistry::new(),
            lifecycle: Lifecycle::new(),
            pump: Mutex::new(None),
            signals,
            bus,
            cfg,
            me,
        }
    }

    // ---- lifecycle -------------------------------------------------------

    /// Starts the storage dispatcher. A second call is a no-op.
    ///
    /// Must be called within a tokio runtime.
    pub fn init_model(&self) -> Result<(), RuntimeError> {
        let started = self.lifecycle.update(|flags| {
            if flags.model_shutdown_signaled {
                return Err(RuntimeError::ShutdownInProgress { phase: "model" });
            }
            if flags.model_initialized {
                return Ok(false);
            }
            let Some(engine) = self.engine.lock().take() else {
                return Ok(false);
            };
            let _ = self
                .storage
                .set(StorageDispatcher::start(engine, &self.cfg, self.bus.clone()));
            flags.model_initialized = true;
            Ok(true)
        })?;

        if started {
            if self.no_wal() {
                info!("write-ahead logging disabled");
            }
            info!(first_start = self.is_first_start(), "model initialized");
            self.publish_lifecycle(topics::MODEL_INITIALIZED);
        }
        Ok(())
    }

    /// Starts the event pump and, unless `no_daemons`, every daemon. A second call is a no-op.
    ///
    /// ### Errors
    /// - [`RuntimeError::NotInitialized`] before `init_model`
    /// - [`RuntimeError::ShutdownInProgress`] once view shutdown was signaled
    pub fn init_view(&self) -> Result<(), RuntimeError> {
        let started = self.lifecycle.update(|flags| {
            if !flags.model_initialized {
                return Err(RuntimeError::NotInitialized {
                    operation: "init_view",
                });
            }
            if flags.view_shutdown_signaled {
                return Err(RuntimeError::ShutdownInProgress { phase: "view" });
            }
            if flags.view_initialized {
                return Ok(false);
            }
            flags.view_initialized = true;
            Ok(true)
        })?;
        if !started {
            return Ok(());
        }

        self.start_pump()?;

        if self.cfg.no_daemons {
            info!("daemons disabled");
        } else {
            let mut specs = builtin_daemons(&self.cfg, &self.me);
            specs.append(&mut self.extra_daemons.lock());
            for spec in specs {
                self.daemons.spawn(spec)?;
            }
            info!(daemons = ?self.daemons.names(), "daemons started");
        }

        info!("view initialized");
        self.publish_lifecycle(topics::VIEW_INITIALIZED);
        Ok(())
    }

    /// Stops daemons, the worker pool and then the event pump. Idempotent.
    pub async fn shutdown_view(&self) {
        let _gate = self.lifecycle.view_gate.lock().await;
        if self.lifecycle.flags().view_shutdown_done {
            return;
        }
        self.lifecycle.signal_view_shutdown();
        info!("view shutting down");

        self.daemons.shutdown().await;
        self.pool.shutdown().await;
        self.stop_pump().await;

        self.lifecycle.update(|f| f.view_shutdown_done = true);
        info!("view shut down");
        self.publish_lifecycle(topics::VIEW_SHUTDOWN);
    }

    /// Rejects new storage calls, waits for an in-progress view shutdown and
    /// drains the storage writer. Idempotent.
    pub async fn shutdown_model(&self) {
        self.lifecycle.signal_model_shutdown();

        // Passing through the gate waits for a view shutdown already underway.
        drop(self.lifecycle.view_gate.lock().await);

        let _gate = self.lifecycle.model_gate.lock().await;
        if self.lifecycle.flags().model_shutdown_done {
            return;
        }
        info!("model shutting down");

        if let Some(storage) = self.storage.get() {
            storage.shutdown().await;
        }

        self.lifecycle.update(|f| f.model_shutdown_done = true);
        info!("model shut down");
        self.publish_lifecycle(topics::MODEL_SHUTDOWN);
    }

    /// Headless run: init model and view, wait for a termination signal, shut down.
    pub async fn run_until_signal(&self) -> Result<(), RuntimeError> {
        self.init_model()?;
        self.init_view()?;
        info!("running; waiting for termination signal");
        wait_for_shutdown_signal().await?;
        info!("termination signal received");
        self.shutdown_view().await;
        self.shutdown_model().await;
        Ok(())
    }

    /// Waits until every deferred publication has been delivered.
    ///
    /// Drains inline when the pump is not running.
    ///
    /// ### Errors
    /// - [`RuntimeError::ShutdownInProgress`] once view shutdown was signaled
    pub async fn wait_until_events_drained(&self) -> Result<(), RuntimeError> {
        let view_stop = self.lifecycle.view_stop();
        if view_stop.is_cancelled() {
            return Err(RuntimeError::ShutdownInProgress { phase: "view" });
        }
        if self.bus.is_quiescent() {
            return Ok(());
        }

        if self.pump.lock().is_none() {
            while !self.bus.is_quiescent() {
                if self.bus.drain() == 0 {
                    // Called from inside a handler; the outer drain finishes the job.
                    break;
                }
            }
            return Ok(());
        }

        tokio::select! {
            _ = self.bus.wait_quiescent() => Ok(()),
            _ = view_stop.cancelled() => Err(RuntimeError::ShutdownInProgress { phase: "view" }),
        }
    }

    /// Current lifecycle phase.
    pub fn phase(&self) -> Phase {
        self.lifecycle.phase()
    }

    /// True once `shutdown_view` completed.
    pub fn view_is_shutdown(&self) -> bool {
        self.lifecycle.flags().view_shutdown_done
    }

    /// True once `shutdown_model` completed.
    pub fn model_is_shutdown(&self) -> bool {
        self.lifecycle.flags().model_shutdown_done
    }

    /// True once view shutdown was signaled.
    pub fn view_shutdown_signaled(&self) -> bool {
        self.lifecycle.flags().view_shutdown_signaled
    }

    /// True once model shutdown was signaled.
    pub fn model_shutdown_signaled(&self) -> bool {
        self.lifecycle.flags().model_shutdown_signaled
    }

    /// Wall-clock time the controller was created.
    pub fn boot_time(&self) -> SystemTime {
        self.lifecycle.boot_time()
    }

    // ---- events ----------------------------------------------------------

    /// Queues `event` for the event pump.
    pub fn publish(&self, event: Event) {
        self.bus.publish(event);
    }

    /// Dispatches `event` synchronously on the calling thread.
    pub fn publish_immediate(&self, event: &Event) -> usize {
        self.bus.publish_immediate(event)
    }

    /// Registers `handler` for `topic` under `subscriber`.
    pub fn subscribe(
        &self,
        subscriber: SubscriberId,
        topic: impl Into<Topic>,
        handler: Arc<dyn Subscribe>,
    ) {
        self.bus.subscribe(subscriber, topic, handler);
    }

    /// Removes the handler of `subscriber` for `topic`.
    pub fn unsubscribe(&self, subscriber: SubscriberId, topic: &str) -> bool {
        self.bus.unsubscribe(subscriber, topic)
    }

    /// Removes every handler of `subscriber`.
    pub fn unsubscribe_all(&self, subscriber: SubscriberId) -> usize {
        self.bus.unsubscribe_all(subscriber)
    }

    // ---- workers ---------------------------------------------------------

    /// Hands `job` to an idle worker, growing the pool up to its cap.
    ///
    /// Wrap synchronous work (file I/O, hashing) in [`Job::blocking`] so it runs on
    /// the blocking thread pool instead of a runtime thread.
    pub fn call_to_worker(&self, job: Job) -> Result<WorkerId, RuntimeError> {
        self.pool.submit(job)
    }

    /// Appends `job` to the queue of a specific worker.
    pub fn call_to_worker_on(&self, worker: WorkerId, job: Job) -> Result<WorkerId, RuntimeError> {
        self.pool.submit_to(worker, job)
    }

    // ---- storage ---------------------------------------------------------

    /// High-priority read; waits for the result.
    pub async fn read(&self, action: E::Action) -> Result<E::Output, RuntimeError> {
        self.storage("read")?.read(action).await
    }

    /// High-priority asynchronous write.
    pub fn write(&self, action: E::Action) -> Result<WriteHandle<E::Output>, RuntimeError> {
        self.storage("write")?.write(action)
    }

    /// Low-priority write; waits for completion.
    pub async fn write_synchronous(&self, action: E::Action) -> Result<E::Output, RuntimeError> {
        self.storage("write_synchronous")?
            .write_synchronous(action)
            .await
    }

    /// Interruptable write; waits for completion.
    pub async fn write_interruptable(&self, action: E::Action) -> Result<E::Output, RuntimeError> {
        self.storage("write_interruptable")?
            .write_interruptable(action)
            .await
    }

    /// Interruptable write that also stops when `token` is cancelled.
    pub async fn write_interruptable_with(
        &self,
        action: E::Action,
        token: CancellationToken,
    ) -> Result<E::Output, RuntimeError> {
        self.storage("write_interruptable")?
            .write_interruptable_with(action, token)
            .await
    }

    /// Storage maintenance pass that stops at `stop_at`.
    pub async fn maintain_storage(&self, stop_at: Option<Instant>) -> Result<(), RuntimeError> {
        self.maintain_storage_with(stop_at, CancellationToken::new())
            .await
    }

    /// Storage maintenance pass that stops at `stop_at` or when `token` is cancelled.
    pub async fn maintain_storage_with(
        &self,
        stop_at: Option<Instant>,
        token: CancellationToken,
    ) -> Result<(), RuntimeError> {
        self.storage("maintain_storage")?
            .maintain(stop_at, token)
            .await
    }

    /// True while the storage writer executes a job.
    pub fn storage_currently_doing_job(&self) -> bool {
        self.storage.get().is_some_and(|s| s.currently_doing_job())
    }

    /// True if the engine created its storage from scratch.
    pub fn is_first_start(&self) -> bool {
        self.storage.get().is_some_and(|s| s.is_first_start())
    }

    /// Storage directory, if configured.
    pub fn db_dir(&self) -> Option<&Path> {
        self.cfg.db_dir.as_deref()
    }

    /// True if write-ahead logging is off (config flag or marker file).
    pub fn no_wal(&self) -> bool {
        self.cfg.no_wal || self.cfg.no_wal_marker().is_some_and(|p| p.exists())
    }

    /// Creates the `no-wal` marker in the storage directory.
    pub fn create_no_wal_file(&self) -> Result<PathBuf, RuntimeError> {
        let marker = self.cfg.no_wal_marker().ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, "no storage directory configured")
        })?;
        std::fs::File::create(&marker)?;
        info!(path = %marker.display(), "created no-wal marker");
        Ok(marker)
    }

    // ---- signals ---------------------------------------------------------

    /// False right after a wake from sleep or while the system is busy.
    pub fn good_time_to_do_background_work(&self) -> bool {
        self.signals.good_time_to_do_background_work()
    }

    /// True within the grace window after a detected wake.
    pub fn just_woke_from_sleep(&self) -> bool {
        self.signals.just_woke_from_sleep()
    }

    /// Checks for a suspend/resume now.
    pub fn sleep_check(&self) -> bool {
        self.signals.sleep_check()
    }

    /// True if heavy foreground work is flagged.
    pub fn system_busy(&self) -> bool {
        self.signals.system_busy()
    }

    /// Raises or clears the busy flag.
    pub fn set_system_busy(&self, busy: bool) {
        self.signals.set_system_busy(busy);
    }

    /// True if the user is idle.
    pub fn currently_idle(&self) -> bool {
        self.signals.currently_idle()
    }

    /// Records whether the user is idle.
    pub fn set_idle(&self, idle: bool) {
        self.signals.set_idle(idle);
    }

    // ---- caches ----------------------------------------------------------

    /// Registers a named cache; returns the one it replaced.
    pub fn register_cache(&self, name: impl Into<String>, cache: Arc<dyn Cache>) -> Option<Arc<dyn Cache>> {
        self.caches.register(name, cache)
    }

    /// Looks a cache up by name.
    pub fn cache(&self, name: &str) -> Option<Arc<dyn Cache>> {
        self.caches.get(name)
    }

    /// Clears every registered cache.
    pub fn clear_caches(&self) {
        self.caches.clear_all();
    }

    /// Runs housekeeping on every registered cache.
    pub fn maintain_memory(&self) {
        debug!("maintaining caches");
        self.caches.maintain_all();
    }

    // ---- components ------------------------------------------------------

    /// Runtime configuration.
    pub fn config(&self) -> &Config {
        &self.cfg
    }

    /// The event bus.
    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// The worker pool.
    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    /// Busy/idle/sleep signals.
    pub fn signals(&self) -> &Arc<Signals> {
        &self.signals
    }

    /// The daemon scheduler.
    pub fn daemons(&self) -> &DaemonScheduler {
        &self.daemons
    }

    // ---- internals -------------------------------------------------------

    fn storage(&self, operation: &'static str) -> Result<&StorageDispatcher<E>, RuntimeError> {
        if self.lifecycle.flags().model_shutdown_signaled {
            return Err(RuntimeError::ShutdownInProgress { phase: "model" });
        }
        self.storage
            .get()
            .ok_or(RuntimeError::NotInitialized { operation })
    }

    // Checked under the pump lock: `stop_pump` runs after the signal, so a pump
    // stored here is always seen by it.
    fn start_pump(&self) -> Result<(), RuntimeError> {
        let mut slot = self.pump.lock();
        if self.lifecycle.flags().view_shutdown_signaled {
            return Err(RuntimeError::ShutdownInProgress { phase: "view" });
        }

        let stop = CancellationToken::new();
        let bus = self.bus.clone();
        let token = stop.clone();
        let join = tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = bus.wait_for_work() => {}
                }
                if bus.drain() == 0 {
                    // Another drain is running; wait for it instead of spinning.
                    tokio::select! {
                        biased;
                        _ = token.cancelled() => break,
                        _ = bus.wait_drain_finished() => {}
                    }
                }
            }
            // Deliver what is already queued before going away.
            while !bus.is_quiescent() {
                if bus.drain() == 0 {
                    bus.wait_drain_finished().await;
                }
            }
            debug!("event pump stopped");
        });
        *slot = Some(Pump { stop, join });
        debug!("event pump started");
        Ok(())
    }

    async fn stop_pump(&self) {
        let pump = self.pump.lock().take();
        if let Some(Pump { stop, join }) = pump {
            stop.cancel();
            join_with_warning("event_pump", join, self.cfg.shutdown_warn_after).await;
        }
        if !self.bus.is_quiescent() {
            warn!(pending = self.bus.pending(), "events left undelivered after view shutdown");
        }
    }

    fn publish_lifecycle(&self, topic: &'static str) {
        self.bus
            .publish_immediate(&Event::new(topic).with_source("controller"));
    }
}

impl<E: StorageEngine> std::fmt::Debug for Controller<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Controller")
            .field("phase", &self.phase())
            .field("bus", &self.bus)
            .field("pool", &self.pool)
            .field("daemons", &self.daemons)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::error::{StorageError, TaskError};
    use crate::storage::{Priority, StorageAction};
    use crate::subscribers::HandlerFn;

    struct Put(u32);

    impl StorageAction for Put {
        fn name(&self) -> &'static str {
            "put"
        }
    }

    #[derive(Default)]
    struct Memory {
        log: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl StorageEngine for Memory {
        type Action = Put;
        type Output = usize;

        async fn read(&mut self, _action: Put, _priority: Priority) -> Result<usize, StorageError> {
            Ok(self.log.lock().len())
        }

        async fn write(
            &mut self,
            action: Put,
            _priority: Priority,
            _synchronous: bool,
            _interrupt: &CancellationToken,
        ) -> Result<usize, StorageError> {
            self.log.lock().push(format!("put:{}", action.0));
            Ok(self.log.lock().len())
        }

        async fn maintain(
            &mut self,
            _stop_at: Option<Instant>,
            _interrupt: &CancellationToken,
        ) -> Result<(), StorageError> {
            self.log.lock().push("maintain".to_string());
            Ok(())
        }

        async fn close(&mut self) -> Result<(), StorageError> {
            self.log.lock().push("close".to_string());
            Ok(())
        }
    }

    fn quiet() -> Config {
        Config {
            no_daemons: true,
            ..Config::default()
        }
    }

    type Seen = Arc<Mutex<Vec<String>>>;

    fn recorder(
        topics: &[&'static str],
        mut builder: ControllerBuilder<Memory>,
    ) -> (ControllerBuilder<Memory>, Seen) {
        let seen = Seen::default();
        let id = SubscriberId::next();
        for topic in topics {
            let sink = Arc::clone(&seen);
            builder = builder.with_subscriber(
                id,
                *topic,
                HandlerFn::arc("recorder", move |ev: &Event| {
                    sink.lock().push(ev.topic.as_str().to_string());
                    Ok(())
                }),
            );
        }
        (builder, seen)
    }

    const LIFECYCLE: [&str; 4] = [
        topics::MODEL_INITIALIZED,
        topics::VIEW_INITIALIZED,
        topics::VIEW_SHUTDOWN,
        topics::MODEL_SHUTDOWN,
    ];

    #[tokio::test]
    async fn full_lifecycle_publishes_every_phase() {
        let (builder, seen) = recorder(&LIFECYCLE, Controller::builder(quiet(), Memory::default()));
        let ctl = builder.build();
        assert_eq!(ctl.phase(), Phase::Created);

        ctl.init_model().unwrap();
        ctl.init_model().unwrap();
        assert_eq!(ctl.phase(), Phase::ModelInitialized);
        ctl.init_view().unwrap();
        assert_eq!(ctl.phase(), Phase::ViewInitialized);

        ctl.shutdown_view().await;
        assert!(ctl.view_is_shutdown());
        assert_eq!(ctl.phase(), Phase::ViewShutdown);
        ctl.shutdown_model().await;
        ctl.shutdown_model().await;
        assert!(ctl.model_is_shutdown());
        assert_eq!(ctl.phase(), Phase::ModelShutdown);

        assert_eq!(*seen.lock(), LIFECYCLE.to_vec());
    }

    #[tokio::test]
    async fn init_view_requires_model() {
        let ctl = Controller::builder(quiet(), Memory::default()).build();
        let err = ctl.init_view().unwrap_err();
        assert_eq!(err.as_label(), "runtime_not_initialized");
    }

    #[tokio::test]
    async fn storage_rejected_before_init_and_after_model_shutdown() {
        let engine = Memory::default();
        let log = Arc::clone(&engine.log);
        let ctl = Controller::builder(quiet(), engine).build();

        let err = ctl.write_synchronous(Put(1)).await.unwrap_err();
        assert_eq!(err.as_label(), "runtime_not_initialized");

        ctl.init_model().unwrap();
        assert_eq!(ctl.write_synchronous(Put(1)).await.unwrap(), 1);
        let pending = ctl.write(Put(2)).unwrap();

        ctl.shutdown_model().await;
        assert_eq!(pending.await.unwrap(), 2);
        assert_eq!(*log.lock(), vec!["put:1", "put:2", "close"]);

        let err = ctl.read(Put(0)).await.unwrap_err();
        assert!(err.is_shutdown());
        assert!(ctl.write(Put(3)).unwrap_err().is_shutdown());
        assert!(ctl.init_model().unwrap_err().is_shutdown());
    }

    #[tokio::test]
    async fn model_shutdown_without_view_shutdown() {
        let (builder, seen) = recorder(&LIFECYCLE, Controller::builder(quiet(), Memory::default()));
        let ctl = builder.build();
        ctl.init_model().unwrap();
        ctl.init_view().unwrap();

        ctl.shutdown_model().await;
        assert_eq!(ctl.phase(), Phase::ModelShutdown);
        assert!(!ctl.view_shutdown_signaled());

        ctl.shutdown_view().await;
        assert!(ctl.view_is_shutdown());
        assert_eq!(
            *seen.lock(),
            vec![
                topics::MODEL_INITIALIZED,
                topics::VIEW_INITIALIZED,
                topics::MODEL_SHUTDOWN,
                topics::VIEW_SHUTDOWN,
            ]
        );
    }

    #[tokio::test]
    async fn concurrent_shutdowns_finish_view_first() {
        let (builder, seen) = recorder(&LIFECYCLE[2..], Controller::builder(quiet(), Memory::default()));
        let ctl = builder.build();
        ctl.init_model().unwrap();
        ctl.init_view().unwrap();

        tokio::join!(ctl.shutdown_view(), ctl.shutdown_model(), ctl.shutdown_view());
        assert_eq!(*seen.lock(), vec![topics::VIEW_SHUTDOWN, topics::MODEL_SHUTDOWN]);
    }

    #[tokio::test]
    async fn pump_delivers_deferred_events() {
        let (builder, seen) = recorder(&["files.imported"], Controller::builder(quiet(), Memory::default()));
        let ctl = builder.build();
        ctl.init_model().unwrap();
        ctl.init_view().unwrap();

        for _ in 0..5 {
            ctl.publish(Event::new("files.imported"));
        }
        ctl.wait_until_events_drained().await.unwrap();
        assert_eq!(seen.lock().len(), 5);

        ctl.shutdown_view().await;
        let err = ctl.wait_until_events_drained().await.unwrap_err();
        assert!(err.is_shutdown());
        ctl.shutdown_model().await;
    }

    #[tokio::test]
    async fn drains_inline_without_pump() {
        let (builder, seen) = recorder(&["files.imported"], Controller::builder(quiet(), Memory::default()));
        let ctl = builder.build();

        ctl.publish(Event::new("files.imported"));
        ctl.publish(Event::new("files.imported"));
        ctl.wait_until_events_drained().await.unwrap();
        assert_eq!(seen.lock().len(), 2);
    }

    #[tokio::test]
    async fn jobs_run_until_view_shutdown() {
        let ctl = Controller::builder(quiet(), Memory::default()).build();
        ctl.init_model().unwrap();
        ctl.init_view().unwrap();

        let (tx, rx) = tokio::sync::oneshot::channel();
        ctl.call_to_worker(Job::new("answer", move || async move {
            let _ = tx.send(42);
            Ok::<_, TaskError>(())
        }))
        .unwrap();
        assert_eq!(rx.await.unwrap(), 42);

        ctl.shutdown_view().await;
        let err = ctl
            .call_to_worker(Job::new("late", || async { Ok::<_, TaskError>(()) }))
            .unwrap_err();
        assert!(err.is_shutdown());
        ctl.shutdown_model().await;
    }

    #[tokio::test(start_paused = true)]
    async fn view_shutdown_delivers_events_from_running_jobs() {
        let (builder, seen) = recorder(
            &["job.done", topics::JOB_FAILED],
            Controller::builder(quiet(), Memory::default()),
        );
        let ctl = builder.build();
        ctl.init_model().unwrap();
        ctl.init_view().unwrap();

        let bus = ctl.bus().clone();
        ctl.call_to_worker(Job::new("finish", move || async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            bus.publish(Event::new("job.done"));
            Ok::<_, TaskError>(())
        }))
        .unwrap();
        ctl.call_to_worker(Job::new("flaky", || async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            Err::<(), _>(TaskError::fail("disk full"))
        }))
        .unwrap();

        ctl.shutdown_view().await;
        let mut seen = seen.lock().clone();
        seen.sort();
        assert_eq!(seen, vec!["job.done", topics::JOB_FAILED]);
        assert!(ctl.bus().is_quiescent());
        ctl.shutdown_model().await;
    }

    #[tokio::test]
    async fn pump_is_not_started_after_view_shutdown_signal() {
        let ctl = Controller::builder(quiet(), Memory::default()).build();
        ctl.init_model().unwrap();
        ctl.lifecycle.signal_view_shutdown();

        let err = ctl.start_pump().unwrap_err();
        assert!(err.is_shutdown());
        assert!(ctl.pump.lock().is_none());
        ctl.shutdown_view().await;
        ctl.shutdown_model().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn waiting_for_drain_fails_when_view_shuts_down() {
        let (entered_tx, entered_rx) = tokio::sync::oneshot::channel::<()>();
        let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();
        let entered_tx = Mutex::new(Some(entered_tx));
        let release_rx = Mutex::new(release_rx);
        let ctl = Controller::builder(quiet(), Memory::default())
            .with_subscriber(
                SubscriberId::next(),
                "slow",
                HandlerFn::arc("slow", move |_ev: &Event| {
                    if let Some(tx) = entered_tx.lock().take() {
                        let _ = tx.send(());
                    }
                    let _ = release_rx.lock().recv();
                    Ok(())
                }),
            )
            .build();
        ctl.init_model().unwrap();
        ctl.init_view().unwrap();

        ctl.publish(Event::new("slow"));
        entered_rx.await.unwrap();

        let waiter = {
            let ctl = Arc::clone(&ctl);
            tokio::spawn(async move { ctl.wait_until_events_drained().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        let shutdown = {
            let ctl = Arc::clone(&ctl);
            tokio::spawn(async move { ctl.shutdown_view().await })
        };
        let err = waiter.await.unwrap().unwrap_err();
        assert!(err.is_shutdown());

        release_tx.send(()).unwrap();
        shutdown.await.unwrap();
        assert!(ctl.view_is_shutdown());
        ctl.shutdown_model().await;
    }

    #[derive(Default)]
    struct Trimmed(Mutex<u32>);

    impl Cache for Trimmed {
        fn clear(&self) {
            *self.0.lock() = 0;
        }

        fn maintain(&self) {
            *self.0.lock() += 1;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn builtin_daemons_maintain_caches_and_storage() {
        let engine = Memory::default();
        let log = Arc::clone(&engine.log);
        let cache = Arc::new(Trimmed::default());
        let ctl = Controller::builder(Config::default(), engine)
            .with_cache("thumbnails", cache.clone())
            .build();
        ctl.init_model().unwrap();
        ctl.init_view().unwrap();
        assert_eq!(
            ctl.daemons().names(),
            vec!["sleep_check", "maintain_memory", "maintain_storage"]
        );

        tokio::time::sleep(Duration::from_secs(301)).await;
        assert_eq!(*cache.0.lock(), 1);
        assert_eq!(*log.lock(), vec!["maintain"]);

        ctl.set_system_busy(true);
        tokio::time::sleep(Duration::from_secs(300)).await;
        assert_eq!(*cache.0.lock(), 1);

        ctl.clear_caches();
        assert_eq!(*cache.0.lock(), 0);

        ctl.shutdown_view().await;
        ctl.shutdown_model().await;
        assert_eq!(*log.lock(), vec!["maintain", "close"]);
    }

    #[tokio::test]
    async fn no_wal_marker_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = Config {
            db_dir: Some(dir.path().to_path_buf()),
            ..quiet()
        };
        let ctl = Controller::builder(cfg, Memory::default()).build();
        assert!(!ctl.no_wal());

        let marker = ctl.create_no_wal_file().unwrap();
        assert!(marker.exists());
        assert!(ctl.no_wal());

        let bare = Controller::builder(quiet(), Memory::default()).build();
        assert!(bare.create_no_wal_file().is_err());
    }
}
