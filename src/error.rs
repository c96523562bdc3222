//! Error types used by the appvisor runtime, its jobs and its handlers.
//!
//! This module defines the error enums:
//!
//! - [`RuntimeError`]: errors raised by the controller and its components.
//! - [`StorageError`]: errors raised by the storage engine, tagged with the action name.
//! - [`TaskError`]: errors returned by worker-pool jobs and daemon cycles.
//! - [`HandlerError`]: errors returned by bus subscribers.
//!
//! All types provide `as_label` (stable snake_case, for logs/filters) and
//! `as_message` helpers.

use std::io;

use thiserror::Error;

/// # Errors produced by the appvisor runtime.
///
/// These represent failures of the orchestration layer itself or errors it
/// propagates from its collaborators (the storage engine).
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// Every worker is busy and the pool already holds `cap` workers.
    #[error("worker pool exhausted: all {cap} workers are busy")]
    ResourceExhausted {
        /// The configured hard cap.
        cap: usize,
    },

    /// Error propagated from the storage engine.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// The operation was attempted after view or model shutdown began.
    #[error("shutdown in progress: {phase}")]
    ShutdownInProgress {
        /// Which teardown phase rejected the call (`"view"`, `"model"`, `"pool"`, ...).
        phase: &'static str,
    },

    /// A bus subscriber failed while handling an event.
    ///
    /// Never returned to publishers; carried by `bus.handler_failed` events.
    #[error("subscriber '{subscriber}' failed on topic '{topic}': {reason}")]
    SubscriberHandlerFailure {
        /// Subscriber name.
        subscriber: String,
        /// Topic being dispatched.
        topic: String,
        /// Failure message.
        reason: String,
    },

    /// A daemon cycle failed or panicked.
    ///
    /// Never returned to callers; carried by `daemon.failed` events.
    #[error("daemon '{daemon}' cycle failed: {reason}")]
    DaemonFailure {
        /// Daemon name.
        daemon: String,
        /// Failure message.
        reason: String,
    },

    /// The operation needs a lifecycle phase that has not been entered yet.
    #[error("{operation} called before the model was initialized")]
    NotInitialized {
        /// The rejected operation.
        operation: &'static str,
    },

    /// `submit_to` targeted a worker the pool does not know.
    #[error("worker {worker} not found")]
    UnknownWorker {
        /// Requested worker id.
        worker: u64,
    },

    /// Filesystem error while handling controller markers.
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

impl RuntimeError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use appvisor::RuntimeError;
    ///
    /// let err = RuntimeError::ResourceExhausted { cap: 100 };
    /// assert_eq!(err.as_label(), "runtime_resource_exhausted");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            RuntimeError::ResourceExhausted { .. } => "runtime_resource_exhausted",
            RuntimeError::Storage(e) => e.as_label(),
            RuntimeError::ShutdownInProgress { .. } => "runtime_shutdown_in_progress",
            RuntimeError::SubscriberHandlerFailure { .. } => "runtime_handler_failure",
            RuntimeError::DaemonFailure { .. } => "runtime_daemon_failure",
            RuntimeError::NotInitialized { .. } => "runtime_not_initialized",
            RuntimeError::UnknownWorker { .. } => "runtime_unknown_worker",
            RuntimeError::Io(_) => "runtime_io",
        }
    }

    /// Returns a human-readable message with details about the error.
    pub fn as_message(&self) -> String {
        match self {
            RuntimeError::ResourceExhausted { cap } => format!("all {cap} workers busy"),
            RuntimeError::Storage(e) => e.as_message(),
            RuntimeError::ShutdownInProgress { phase } => format!("{phase} shutting down"),
            RuntimeError::SubscriberHandlerFailure {
                subscriber,
                topic,
                reason,
            } => format!("subscriber={subscriber} topic={topic} reason={reason}"),
            RuntimeError::DaemonFailure { daemon, reason } => {
                format!("daemon={daemon} reason={reason}")
            }
            RuntimeError::NotInitialized { operation } => {
                format!("{operation} before init_model")
            }
            RuntimeError::UnknownWorker { worker } => format!("worker={worker}"),
            RuntimeError::Io(e) => format!("io: {e}"),
        }
    }

    /// True for [`RuntimeError::ShutdownInProgress`].
    pub fn is_shutdown(&self) -> bool {
        matches!(self, RuntimeError::ShutdownInProgress { .. })
    }
}

/// # Errors produced by the storage engine.
///
/// Both variants carry the name of the action that failed so that
/// out-of-band reports stay attributable.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// The engine rejected or failed the action.
    #[error("storage action '{action}' failed: {error}")]
    Failed {
        /// Action name (see [`StorageAction::name`](crate::StorageAction::name)).
        action: &'static str,
        /// Engine error message.
        error: String,
    },

    /// An interruptable job stopped early because it was pre-empted or cancelled.
    #[error("storage action '{action}' interrupted")]
    Interrupted {
        /// Action name.
        action: &'static str,
    },
}

impl StorageError {
    /// Shorthand for [`StorageError::Failed`].
    pub fn failed(action: &'static str, error: impl Into<String>) -> Self {
        StorageError::Failed {
            action,
            error: error.into(),
        }
    }

    /// Name of the action that failed.
    pub fn action(&self) -> &'static str {
        match self {
            StorageError::Failed { action, .. } | StorageError::Interrupted { action } => action,
        }
    }

    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            StorageError::Failed { .. } => "storage_failed",
            StorageError::Interrupted { .. } => "storage_interrupted",
        }
    }

    /// Returns a human-readable message with details about the error.
    pub fn as_message(&self) -> String {
        match self {
            StorageError::Failed { action, error } => format!("{action}: {error}"),
            StorageError::Interrupted { action } => format!("{action}: interrupted"),
        }
    }
}

/// # Errors returned by worker-pool jobs and daemon cycles.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum TaskError {
    /// Execution failed; the next daemon cycle still runs.
    #[error("execution failed: {error}")]
    Fail {
        /// The underlying error message.
        error: String,
    },

    /// A big-job pass stopped at a checkpoint (stop, pause or deadline).
    #[error("interrupted at checkpoint")]
    Interrupted,

    /// The runtime is shutting down underneath the task.
    #[error("context cancelled")]
    Canceled,
}

impl TaskError {
    /// Shorthand for [`TaskError::Fail`].
    pub fn fail(error: impl Into<String>) -> Self {
        TaskError::Fail {
            error: error.into(),
        }
    }

    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use appvisor::TaskError;
    ///
    /// assert_eq!(TaskError::Interrupted.as_label(), "task_interrupted");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            TaskError::Fail { .. } => "task_failed",
            TaskError::Interrupted => "task_interrupted",
            TaskError::Canceled => "task_canceled",
        }
    }

    /// Returns a human-readable message with details about the error.
    pub fn as_message(&self) -> String {
        match self {
            TaskError::Fail { error } => format!("error: {error}"),
            TaskError::Interrupted => "interrupted".to_string(),
            TaskError::Canceled => "context cancelled".to_string(),
        }
    }

    /// Whether this outcome should be reported as a failure.
    ///
    /// Interruption and cancellation are cooperative exits, not failures.
    pub fn is_failure(&self) -> bool {
        matches!(self, TaskError::Fail { .. })
    }
}

impl From<RuntimeError> for TaskError {
    fn from(err: RuntimeError) -> Self {
        match err {
            RuntimeError::ShutdownInProgress { .. } => TaskError::Canceled,
            RuntimeError::Storage(StorageError::Interrupted { .. }) => TaskError::Interrupted,
            other => TaskError::Fail {
                error: other.to_string(),
            },
        }
    }
}

impl From<StorageError> for TaskError {
    fn from(err: StorageError) -> Self {
        RuntimeError::Storage(err).into()
    }
}

/// # Errors returned by bus subscribers.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HandlerError {
    /// The object behind the handler is already torn down.
    ///
    /// Ignored by default (see [`Config::ignored_handler_errors`](crate::Config::ignored_handler_errors)).
    #[error("subscriber is gone")]
    SubscriberGone,

    /// The handler failed.
    #[error("handler failed: {error}")]
    Fail {
        /// The underlying error message.
        error: String,
    },
}

impl HandlerError {
    /// Shorthand for [`HandlerError::Fail`].
    pub fn fail(error: impl Into<String>) -> Self {
        HandlerError::Fail {
            error: error.into(),
        }
    }

    /// Returns a short stable label (snake_case) used by the ignore-list.
    pub fn as_label(&self) -> &'static str {
        match self {
            HandlerError::SubscriberGone => "handler_subscriber_gone",
            HandlerError::Fail { .. } => "handler_failed",
        }
    }
}

/// Label used for handler panics (matches the ignore-list vocabulary).
pub(crate) const HANDLER_PANICKED: &str = "handler_panicked";

/// Extracts a printable message from a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&'static str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}
