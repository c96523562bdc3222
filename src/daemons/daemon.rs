//! # Daemon abstraction and specification.
//!
//! A daemon is a periodic background routine. It is described by a [`DaemonSpec`]:
//! the callable ([`Daemon`]), its period, its [`DaemonKind`] and whether it is
//! `critical` (critical daemons run even when it is not a good time for background work).
//!
//! ## Example
//! ```rust
//! use std::time::Duration;
//! use appvisor::{DaemonContext, DaemonFn, DaemonSpec, TaskError};
//!
//! let purge = DaemonSpec::big_job(
//!     DaemonFn::arc("purge_trash", |ctx: DaemonContext| async move {
//!         for _batch in 0..100 {
//!             ctx.checkpoint()?;
//!             // delete one batch...
//!         }
//!         Ok::<_, TaskError>(())
//!     }),
//!     Duration::from_secs(600),
//! );
//! assert_eq!(purge.name(), "purge_trash");
//! ```

use std::borrow::Cow;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use crate::error::TaskError;

use super::context::DaemonContext;

/// Boxed future returned by [`Daemon::run`].
pub type BoxDaemonFuture = Pin<Box<dyn Future<Output = Result<(), TaskError>> + Send + 'static>>;

/// Timing flavour of a daemon.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DaemonKind {
    /// Wakes every period and runs once.
    Periodic,
    /// Same timing; long passes that must stop at [`DaemonContext::checkpoint`].
    BigJob,
}

/// A periodic background routine.
///
/// Each call to [`Daemon::run`] produces the future for one cycle.
pub trait Daemon: Send + Sync + 'static {
    /// Stable daemon name (logs, failure reports, stuck-daemon diagnostics).
    fn name(&self) -> &str;

    /// Builds the future for one cycle.
    fn run(&self, ctx: DaemonContext) -> BoxDaemonFuture;
}

/// Closure-backed daemon.
pub struct DaemonFn<F> {
    name: Cow<'static, str>,
    f: F,
}

impl<F, Fut> DaemonFn<F>
where
    F: Fn(DaemonContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), TaskError>> + Send + 'static,
{
    /// Creates a new function-backed daemon.
    pub fn new(name: impl Into<Cow<'static, str>>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }

    /// Creates the daemon and returns it as a shared handle.
    pub fn arc(name: impl Into<Cow<'static, str>>, f: F) -> Arc<Self> {
        Arc::new(Self::new(name, f))
    }
}

impl<F, Fut> Daemon for DaemonFn<F>
where
    F: Fn(DaemonContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), TaskError>> + Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&self, ctx: DaemonContext) -> BoxDaemonFuture {
        Box::pin((self.f)(ctx))
    }
}

/// Scheduling description of one daemon.
#[derive(Clone)]
pub struct DaemonSpec {
    daemon: Arc<dyn Daemon>,
    kind: DaemonKind,
    period: Duration,
    critical: bool,
}

impl DaemonSpec {
    /// A plain periodic daemon.
    pub fn periodic(daemon: Arc<dyn Daemon>, period: Duration) -> Self {
        Self {
            daemon,
            kind: DaemonKind::Periodic,
            period,
            critical: false,
        }
    }

    /// A big-job daemon whose passes are bounded by checkpoints.
    pub fn big_job(daemon: Arc<dyn Daemon>, period: Duration) -> Self {
        Self {
            daemon,
            kind: DaemonKind::BigJob,
            period,
            critical: false,
        }
    }

    /// Marks the daemon critical: it ignores the busy/sleep gates.
    #[must_use]
    pub fn critical(mut self) -> Self {
        self.critical = true;
        self
    }

    /// Daemon name.
    pub fn name(&self) -> &str {
        self.daemon.name()
    }

    /// Daemon kind.
    pub fn kind(&self) -> DaemonKind {
        self.kind
    }

    /// Cycle period; zero is clamped to one millisecond.
    pub fn period(&self) -> Duration {
        self.period.max(Duration::from_millis(1))
    }

    /// True for daemons that bypass the gates.
    pub fn is_critical(&self) -> bool {
        self.critical
    }

    pub(crate) fn daemon(&self) -> &Arc<dyn Daemon> {
        &self.daemon
    }
}

impl std::fmt::Debug for DaemonSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DaemonSpec")
            .field("name", &self.name())
            .field("kind", &self.kind)
            .field("period", &self.period)
            .field("critical", &self.critical)
            .finish()
    }
}
