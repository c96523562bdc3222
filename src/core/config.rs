//! # Global runtime configuration.
//!
//! Provides [`Config`] centralized settings for the controller and its components.
//!
//! Config is used in two ways:
//! 1. **Controller creation**: `Controller::builder(config, engine)`
//! 2. **Component construction**: `EventBus::from_config`, `WorkerPool::new`, the daemon scheduler
//!
//! ## Sentinel values
//! - `worker_cap = 0` → clamped to 1 (a pool always has room for one worker)
//! - `drain_limit = 0` → clamped to 1
//! - `big_job_budget = 0s` → big-job passes have no deadline
//! - `daemon_failure_alert = 0` → never escalate repeated daemon failures

use std::path::PathBuf;
use std::time::Duration;

use tokio::time::Instant;

/// Name of the marker file that disables write-ahead logging.
pub const NO_WAL_MARKER: &str = "no-wal";

/// Global configuration for the controller runtime.
///
/// ## Field groups
/// - **Workers**: `worker_cap`
/// - **Sleep detection**: `sleep_threshold`, `wake_grace`, `sleep_check_period`
/// - **Daemons**: `no_daemons`, `maintain_memory_period`, `maintain_storage_period`,
///   `big_job_budget`, `daemon_failure_alert`
/// - **Event bus**: `drain_limit`, `ignored_handler_errors`
/// - **Shutdown**: `shutdown_warn_after`
/// - **Storage**: `db_dir`, `no_wal`
///
/// ## Notes
/// All fields are public for flexibility. Prefer the helper accessors to avoid
/// sprinkling sentinel checks (`0`) across the codebase.
#[derive(Clone, Debug)]
pub struct Config {
    /// Do not start any daemon in `init_view` (headless tools, tests).
    pub no_daemons: bool,

    /// Hard cap on the number of pool workers.
    pub worker_cap: usize,

    /// Gap between two sleep checks above which the machine is assumed to have slept.
    pub sleep_threshold: Duration,

    /// How long `just_woke_from_sleep()` stays true after a detected wake.
    pub wake_grace: Duration,

    /// Maximum deliveries per `EventBus::drain` call.
    pub drain_limit: usize,

    /// Shutdown waits longer than this are logged (the wait continues).
    pub shutdown_warn_after: Duration,

    /// Consecutive daemon failures from which each failure is logged at error level.
    pub daemon_failure_alert: u32,

    /// Period of the built-in `sleep_check` daemon.
    pub sleep_check_period: Duration,

    /// Period of the built-in `maintain_memory` daemon.
    pub maintain_memory_period: Duration,

    /// Period of the built-in `maintain_storage` big-job daemon.
    pub maintain_storage_period: Duration,

    /// Per-pass deadline for big-job daemons.
    ///
    /// - `Duration::ZERO` = no deadline
    pub big_job_budget: Duration,

    /// Handler failure labels that are dropped instead of reported.
    pub ignored_handler_errors: Vec<String>,

    /// Storage directory; hosts the `no-wal` marker.
    pub db_dir: Option<PathBuf>,

    /// Force write-ahead logging off regardless of the marker file.
    pub no_wal: bool,
}

impl Config {
    /// Returns the worker cap clamped to a minimum of 1.
    #[inline]
    pub fn worker_cap_clamped(&self) -> usize {
        self.worker_cap.max(1)
    }

    /// Returns the drain limit clamped to a minimum of 1.
    #[inline]
    pub fn drain_limit_clamped(&self) -> usize {
        self.drain_limit.max(1)
    }

    /// Returns the deadline of a big-job pass starting at `start`.
    ///
    /// - `None` → no deadline
    /// - `Some(t)` → `checkpoint()` fails once `t` has passed
    #[inline]
    pub fn big_job_deadline(&self, start: Instant) -> Option<Instant> {
        if self.big_job_budget == Duration::ZERO {
            None
        } else {
            Some(start + self.big_job_budget)
        }
    }

    /// Returns the consecutive-failure threshold as an `Option`.
    #[inline]
    pub fn failure_alert(&self) -> Option<u32> {
        if self.daemon_failure_alert == 0 {
            None
        } else {
            Some(self.daemon_failure_alert)
        }
    }

    /// Path of the `no-wal` marker, if a storage directory is configured.
    pub fn no_wal_marker(&self) -> Option<PathBuf> {
        self.db_dir.as_ref().map(|dir| dir.join(NO_WAL_MARKER))
    }
}

impl Default for Config {
    /// Default configuration:
    ///
    /// - `worker_cap = 100`
    /// - `sleep_threshold = 600s`, `wake_grace = 180s`, `sleep_check_period = 120s`
    /// - `maintain_memory_period = 300s`, `maintain_storage_period = 300s`
    /// - `big_job_budget = 30s`
    /// - `drain_limit = 1024`
    /// - `shutdown_warn_after = 10s`
    /// - `daemon_failure_alert = 5`
    /// - `ignored_handler_errors = ["handler_subscriber_gone"]`
    fn default() -> Self {
        Self {
            no_daemons: false,
            worker_cap: 100,
            sleep_threshold: Duration::from_secs(600),
            wake_grace: Duration::from_secs(180),
            drain_limit: 1024,
            shutdown_warn_after: Duration::from_secs(10),
            daemon_failure_alert: 5,
            sleep_check_period: Duration::from_secs(120),
            maintain_memory_period: Duration::from_secs(300),
            maintain_storage_period: Duration::from_secs(300),
            big_job_budget: Duration::from_secs(30),
            ignored_handler_errors: vec!["handler_subscriber_gone".to_string()],
            db_dir: None,
            no_wal: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentinels_are_clamped() {
        let cfg = Config {
            worker_cap: 0,
            drain_limit: 0,
            big_job_budget: Duration::ZERO,
            daemon_failure_alert: 0,
            ..Config::default()
        };
        assert_eq!(cfg.worker_cap_clamped(), 1);
        assert_eq!(cfg.drain_limit_clamped(), 1);
        assert_eq!(cfg.big_job_deadline(Instant::now()), None);
        assert_eq!(cfg.failure_alert(), None);
    }

    #[test]
    fn marker_lives_in_db_dir() {
        let cfg = Config {
            db_dir: Some(PathBuf::from("/data/db")),
            ..Config::default()
        };
        assert_eq!(cfg.no_wal_marker(), Some(PathBuf::from("/data/db/no-wal")));
        assert_eq!(Config::default().no_wal_marker(), None);
    }
}
