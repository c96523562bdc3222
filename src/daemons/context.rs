//! Per-cycle context handed to a daemon.

use std::sync::Arc;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::core::Signals;
use crate::error::TaskError;

use super::daemon::DaemonKind;

/// Everything a daemon cycle needs to cooperate with shutdown and the gates.
#[derive(Clone)]
pub struct DaemonContext {
    name: Arc<str>,
    kind: DaemonKind,
    critical: bool,
    token: CancellationToken,
    signals: Arc<Signals>,
    deadline: Option<Instant>,
}

impl DaemonContext {
    pub(crate) fn new(
        name: Arc<str>,
        kind: DaemonKind,
        critical: bool,
        token: CancellationToken,
        signals: Arc<Signals>,
        deadline: Option<Instant>,
    ) -> Self {
        Self {
            name,
            kind,
            critical,
            token,
            signals,
            deadline,
        }
    }

    /// Daemon name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stop token; cancelled when the scheduler shuts down.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// True once stop was signaled.
    pub fn is_stopping(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Deadline of the current big-job pass, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Shared activity signals.
    pub fn signals(&self) -> &Arc<Signals> {
        &self.signals
    }

    /// Fails with [`TaskError::Interrupted`] when the cycle should stop now.
    ///
    /// Stops on shutdown for every daemon. Big jobs also stop when their pass
    /// deadline has passed and, unless critical, when it is no longer a good
    /// time for background work.
    pub fn checkpoint(&self) -> Result<(), TaskError> {
        if self.token.is_cancelled() {
            return Err(TaskError::Interrupted);
        }
        if self.kind != DaemonKind::BigJob {
            return Ok(());
        }
        if self.deadline.is_some_and(|d| Instant::now() >= d) {
            return Err(TaskError::Interrupted);
        }
        if !self.critical && !self.signals.good_time_to_do_background_work() {
            return Err(TaskError::Interrupted);
        }
        Ok(())
    }
}

impl std::fmt::Debug for DaemonContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DaemonContext")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("deadline", &self.deadline)
            .field("stopping", &self.is_stopping())
            .finish()
    }
}
