//! # Periodic daemons.
//!
//! [`DaemonScheduler`] runs each [`DaemonSpec`] on its own timer loop, gated by the
//! global [`Signals`](crate::Signals), and stops them all on shutdown.
//!
//! ## Architecture
//! ```text
//! DaemonScheduler::spawn(spec) ──► tokio task: run_daemon(spec)
//!                                      │ tick ─► gate ─► cycle ─► report
//!                                      └ stop token (shared, cancelled by shutdown)
//!
//! shutdown():
//!   cancel token ──► join all runners ──► every `shutdown_warn_after`:
//!                                         log daemons still mid-cycle (AliveTracker)
//! ```
//!
//! ## Rules
//! - Shutdown never aborts a cycle; it waits for each runner's exit.
//! - Spawning after shutdown fails with `ShutdownInProgress`.

mod alive;
mod context;
mod daemon;
mod runner;

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::core::{Config, Signals};
use crate::error::{RuntimeError, panic_message};
use crate::events::EventBus;

pub use alive::AliveTracker;
pub use context::DaemonContext;
pub use daemon::{BoxDaemonFuture, Daemon, DaemonFn, DaemonKind, DaemonSpec};

use runner::{RunnerEnv, run_daemon};

/// Owner of every running daemon.
pub struct DaemonScheduler {
    env: RunnerEnv,
    handles: Mutex<Vec<(String, JoinHandle<()>)>>,
    warn_after: Duration,
}

impl DaemonScheduler {
    /// Creates a scheduler with no daemons.
    pub fn new(cfg: &Config, signals: Arc<Signals>, bus: EventBus) -> Self {
        Self {
            env: RunnerEnv {
                token: CancellationToken::new(),
                signals,
                alive: Arc::new(AliveTracker::new()),
                bus,
                cfg: Arc::new(cfg.clone()),
            },
            handles: Mutex::new(Vec::new()),
            warn_after: cfg.shutdown_warn_after,
        }
    }

    /// Starts the timer loop of `spec`. Must be called within a tokio runtime.
    pub fn spawn(&self, spec: DaemonSpec) -> Result<(), RuntimeError> {
        let mut handles = self.handles.lock();
        if self.env.token.is_cancelled() {
            return Err(RuntimeError::ShutdownInProgress { phase: "view" });
        }
        let name = spec.name().to_string();
        let handle = tokio::spawn(run_daemon(spec, self.env.clone()));
        handles.push((name, handle));
        Ok(())
    }

    /// Names of the daemons started so far (until shutdown).
    pub fn names(&self) -> Vec<String> {
        self.handles.lock().iter().map(|(n, _)| n.clone()).collect()
    }

    /// Liveness tracker of the running cycles.
    pub fn alive(&self) -> &Arc<AliveTracker> {
        &self.env.alive
    }

    /// Stop token shared by every daemon.
    pub fn token(&self) -> &CancellationToken {
        &self.env.token
    }

    /// Signals stop and waits for every daemon to exit. Idempotent.
    pub async fn shutdown(&self) {
        let handles = {
            let mut guard = self.handles.lock();
            self.env.token.cancel();
            std::mem::take(&mut *guard)
        };
        if handles.is_empty() {
            return;
        }
        info!(daemons = handles.len(), "stopping daemons");

        let (names, joins): (Vec<String>, Vec<JoinHandle<()>>) = handles.into_iter().unzip();
        let all = futures::future::join_all(joins);
        tokio::pin!(all);

        let warn_after = self.warn_after.max(Duration::from_millis(1));
        let results = loop {
            match tokio::time::timeout(warn_after, &mut all).await {
                Ok(results) => break results,
                Err(_) => {
                    let stuck = self.env.alive.snapshot();
                    warn!(stuck = ?stuck, "daemons still running a cycle");
                }
            }
        };

        for (name, res) in names.iter().zip(results) {
            if let Err(e) = res {
                if e.is_panic() {
                    let msg = panic_message(&*e.into_panic());
                    error!(daemon = %name, panic = %msg, "daemon runner panicked");
                }
            }
        }
        info!("daemons stopped");
    }
}

impl std::fmt::Debug for DaemonScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DaemonScheduler")
            .field("daemons", &self.names())
            .field("stopped", &self.env.token.is_cancelled())
            .finish()
    }
}
