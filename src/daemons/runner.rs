//! # Daemon runner: one timer loop per daemon.
//!
//! ## Architecture
//! ```text
//! loop {
//!   ├─► wait for tick or stop ──► stop → break
//!   ├─► gate: non-critical && !good_time ──► skip cycle
//!   ├─► alive.enter(name)
//!   ├─► daemon.run(ctx) (panics caught)
//!   ├─► alive.leave(name)
//!   └─► Ok          → reset failure streak
//!       Interrupted → debug, next cycle resumes
//!       Fail/panic  → streak += 1, log, publish `daemon.failed`
//! }
//! ```
//!
//! ## Rules
//! - Ticks missed while a cycle runs are skipped, never queued.
//! - A running cycle is never aborted; it sees stop through its context.
//! - From `daemon_failure_alert` consecutive failures on, each failure is logged at error level.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::core::{Config, Signals};
use crate::error::{RuntimeError, panic_message};
use crate::events::{Event, EventBus, topics};

use super::alive::AliveTracker;
use super::context::DaemonContext;
use super::daemon::{DaemonKind, DaemonSpec};

/// Shared collaborators of every daemon runner.
#[derive(Clone)]
pub(crate) struct RunnerEnv {
    pub(crate) token: CancellationToken,
    pub(crate) signals: Arc<Signals>,
    pub(crate) alive: Arc<AliveTracker>,
    pub(crate) bus: EventBus,
    pub(crate) cfg: Arc<Config>,
}

impl RunnerEnv {
    fn deadline(&self, kind: DaemonKind) -> Option<Instant> {
        match kind {
            DaemonKind::BigJob => self.cfg.big_job_deadline(Instant::now()),
            DaemonKind::Periodic => None,
        }
    }
}

/// Runs `spec` until the stop token fires.
pub(crate) async fn run_daemon(spec: DaemonSpec, env: RunnerEnv) {
    let name: Arc<str> = Arc::from(spec.name());
    let period = spec.period();
    let mut ticker = time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut streak: u32 = 0;

    debug!(daemon = %name, period = ?period, kind = ?spec.kind(), "daemon started");
    loop {
        tokio::select! {
            biased;
            _ = env.token.cancelled() => break,
            _ = ticker.tick() => {}
        }

        if !spec.is_critical() && !env.signals.good_time_to_do_background_work() {
            debug!(daemon = %name, "not a good time for background work; skipping cycle");
            continue;
        }

        let ctx = DaemonContext::new(
            Arc::clone(&name),
            spec.kind(),
            spec.is_critical(),
            env.token.child_token(),
            Arc::clone(&env.signals),
            env.deadline(spec.kind()),
        );

        env.alive.enter(&name);
        let outcome = AssertUnwindSafe(async { spec.daemon().run(ctx).await })
            .catch_unwind()
            .await;
        env.alive.leave(&name);

        let failure = match outcome {
            Ok(Ok(())) => {
                streak = 0;
                None
            }
            Ok(Err(e)) if !e.is_failure() => {
                debug!(daemon = %name, reason = e.as_label(), "daemon cycle stopped early");
                None
            }
            Ok(Err(e)) => Some(e.as_message()),
            Err(panic) => Some(format!("panicked: {}", panic_message(&*panic))),
        };

        if let Some(reason) = failure {
            streak = streak.saturating_add(1);
            report(&env, &name, streak, reason);
        }
    }
    debug!(daemon = %name, "daemon stopped");
}

fn report(env: &RunnerEnv, name: &Arc<str>, streak: u32, reason: String) {
    if env.cfg.failure_alert().is_some_and(|n| streak >= n) {
        error!(daemon = %name, streak, %reason, "daemon keeps failing");
    } else {
        warn!(daemon = %name, streak, %reason, "daemon cycle failed");
    }

    let err = RuntimeError::DaemonFailure {
        daemon: name.to_string(),
        reason: reason.clone(),
    };
    env.bus.publish(
        Event::new(topics::DAEMON_FAILED)
            .with_source(Arc::clone(name))
            .with_reason(reason)
            .with_payload(err),
    );
}
