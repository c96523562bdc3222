//! # Daemon liveness tracker.
//!
//! Records which daemons are currently inside a cycle so that a slow shutdown
//! can name the culprits.
//!
//! ```text
//! runner ── enter(name) ──► [cycle] ── leave(name)
//!                               │
//! scheduler.shutdown() ── snapshot() ──► [("maintain_storage", 12s), ...]
//! ```
//!
//! ## Rules
//! - `enter`/`leave` pairs come from one runner; a daemon is never in two cycles at once.
//! - `snapshot` is sorted by name.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

#[derive(Debug, Default)]
struct DaemonState {
    /// Start of the running cycle, if any.
    since: Option<Instant>,
    /// Completed cycles.
    cycles: u64,
}

/// Thread-safe record of daemons that are mid-cycle.
#[derive(Debug, Default)]
pub struct AliveTracker {
    state: Mutex<HashMap<Arc<str>, DaemonState>>,
}

impl AliveTracker {
    /// Creates an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks `name` as running a cycle.
    pub fn enter(&self, name: &Arc<str>) {
        let mut state = self.state.lock();
        state.entry(Arc::clone(name)).or_default().since = Some(Instant::now());
    }

    /// Marks the running cycle of `name` as finished.
    pub fn leave(&self, name: &Arc<str>) {
        let mut state = self.state.lock();
        let entry = state.entry(Arc::clone(name)).or_default();
        if entry.since.take().is_some() {
            entry.cycles += 1;
        }
    }

    /// Daemons currently mid-cycle, with the time spent in that cycle.
    pub fn snapshot(&self) -> Vec<(String, Duration)> {
        let now = Instant::now();
        let state = self.state.lock();
        let mut alive: Vec<(String, Duration)> = state
            .iter()
            .filter_map(|(name, s)| s.since.map(|t| (name.to_string(), now - t)))
            .collect();
        alive.sort_unstable_by(|a, b| a.0.cmp(&b.0));
        alive
    }

    /// True if `name` is mid-cycle.
    pub fn is_alive(&self, name: &str) -> bool {
        self.state
            .lock()
            .get(name)
            .is_some_and(|s| s.since.is_some())
    }

    /// Number of completed cycles of `name`.
    pub fn cycles(&self, name: &str) -> u64 {
        self.state.lock().get(name).map_or(0, |s| s.cycles)
    }
}
