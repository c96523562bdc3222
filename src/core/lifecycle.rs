//! # Controller lifecycle state.
//!
//! ```text
//! Created ─► ModelInitialized ─► ViewInitialized ─► ViewShuttingDown ─► ViewShutdown
//!                                                                          │
//!                                       ModelShutdown ◄─ ModelShuttingDown ◄┘
//! ```
//!
//! The phase is derived from monotonic flags; a flag never goes back to `false`.
//! Model shutdown may be signaled without a view shutdown (crash path), in which
//! case the phase jumps straight to `ModelShuttingDown`.

use std::fmt;
use std::time::SystemTime;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

/// Lifecycle phase of a controller.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Phase {
    /// Built, nothing started.
    Created,
    /// Storage dispatcher running.
    ModelInitialized,
    /// Event pump and daemons running.
    ViewInitialized,
    /// View shutdown signaled, daemons/pump/workers stopping.
    ViewShuttingDown,
    /// View components stopped.
    ViewShutdown,
    /// Model shutdown signaled, storage draining.
    ModelShuttingDown,
    /// Storage writer gone.
    ModelShutdown,
}

impl Phase {
    /// Stable label for logs.
    pub fn as_label(self) -> &'static str {
        match self {
            Phase::Created => "created",
            Phase::ModelInitialized => "model_initialized",
            Phase::ViewInitialized => "view_initialized",
            Phase::ViewShuttingDown => "view_shutting_down",
            Phase::ViewShutdown => "view_shutdown",
            Phase::ModelShuttingDown => "model_shutting_down",
            Phase::ModelShutdown => "model_shutdown",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_label())
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct Flags {
    pub(crate) model_initialized: bool,
    pub(crate) view_initialized: bool,
    pub(crate) view_shutdown_signaled: bool,
    pub(crate) view_shutdown_done: bool,
    pub(crate) model_shutdown_signaled: bool,
    pub(crate) model_shutdown_done: bool,
}

impl Flags {
    pub(crate) fn phase(&self) -> Phase {
        if self.model_shutdown_done {
            Phase::ModelShutdown
        } else if self.model_shutdown_signaled {
            Phase::ModelShuttingDown
        } else if self.view_shutdown_done {
            Phase::ViewShutdown
        } else if self.view_shutdown_signaled {
            Phase::ViewShuttingDown
        } else if self.view_initialized {
            Phase::ViewInitialized
        } else if self.model_initialized {
            Phase::ModelInitialized
        } else {
            Phase::Created
        }
    }
}

/// Flags plus the gates that serialize the two shutdown sequences.
pub(crate) struct Lifecycle {
    flags: Mutex<Flags>,
    boot_time: SystemTime,
    /// Cancelled as soon as view shutdown is signaled.
    view_stop: CancellationToken,
    /// Held for the whole view shutdown; model shutdown passes through it.
    pub(crate) view_gate: tokio::sync::Mutex<()>,
    pub(crate) model_gate: tokio::sync::Mutex<()>,
}

impl Lifecycle {
    pub(crate) fn new() -> Self {
        Self {
            flags: Mutex::new(Flags::default()),
            boot_time: SystemTime::now(),
            view_stop: CancellationToken::new(),
            view_gate: tokio::sync::Mutex::new(()),
            model_gate: tokio::sync::Mutex::new(()),
        }
    }

    pub(crate) fn phase(&self) -> Phase {
        self.flags.lock().phase()
    }

    pub(crate) fn flags(&self) -> Flags {
        *self.flags.lock()
    }

    /// Applies `f` to the flags under the lock.
    pub(crate) fn update<R>(&self, f: impl FnOnce(&mut Flags) -> R) -> R {
        f(&mut self.flags.lock())
    }

    pub(crate) fn boot_time(&self) -> SystemTime {
        self.boot_time
    }

    pub(crate) fn view_stop(&self) -> &CancellationToken {
        &self.view_stop
    }

    /// Marks view shutdown signaled; returns `false` if it already was.
    pub(crate) fn signal_view_shutdown(&self) -> bool {
        let first = self.update(|f| !std::mem::replace(&mut f.view_shutdown_signaled, true));
        self.view_stop.cancel();
        first
    }

    /// Marks model shutdown signaled; returns `false` if it already was.
    pub(crate) fn signal_model_shutdown(&self) -> bool {
        self.update(|f| !std::mem::replace(&mut f.model_shutdown_signaled, true))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phases_follow_flags() {
        let life = Lifecycle::new();
        assert_eq!(life.phase(), Phase::Created);

        life.update(|f| f.model_initialized = true);
        assert_eq!(life.phase(), Phase::ModelInitialized);
        life.update(|f| f.view_initialized = true);
        assert_eq!(life.phase(), Phase::ViewInitialized);

        assert!(life.signal_view_shutdown());
        assert!(!life.signal_view_shutdown());
        assert!(life.view_stop().is_cancelled());
        assert_eq!(life.phase(), Phase::ViewShuttingDown);

        life.update(|f| f.view_shutdown_done = true);
        assert_eq!(life.phase(), Phase::ViewShutdown);

        assert!(life.signal_model_shutdown());
        assert_eq!(life.phase(), Phase::ModelShuttingDown);
        life.update(|f| f.model_shutdown_done = true);
        assert_eq!(life.phase(), Phase::ModelShutdown);
    }

    #[test]
    fn model_shutdown_without_view_shutdown() {
        let life = Lifecycle::new();
        life.update(|f| {
            f.model_initialized = true;
            f.view_initialized = true;
        });
        life.signal_model_shutdown();
        assert_eq!(life.phase(), Phase::ModelShuttingDown);
        assert!(!life.flags().view_shutdown_signaled);
    }
}
