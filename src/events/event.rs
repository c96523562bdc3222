//! # Events carried by the bus.
//!
//! An [`Event`] is keyed by a [`Topic`] (any string) and carries optional
//! metadata: a source name, a human-readable reason and a type-erased payload
//! that stands in for positional arguments.
//!
//! ## Ordering guarantees
//! Each event has a globally unique sequence number (`seq`) that increases monotonically.
//! Use `seq` to restore creation order when events are observed out of order.
//!
//! ## Example
//! ```rust
//! use appvisor::Event;
//!
//! let ev = Event::new("files.imported")
//!     .with_source("import-worker")
//!     .with_reason("3 files")
//!     .with_payload(3usize);
//!
//! assert_eq!(ev.topic.as_str(), "files.imported");
//! assert_eq!(ev.payload::<usize>(), Some(&3));
//! assert_eq!(ev.payload::<String>(), None);
//! ```

use std::any::Any;
use std::borrow::Borrow;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::SystemTime;

/// Global sequence counter for event ordering.
static EVENT_SEQ: AtomicU64 = AtomicU64::new(1);

/// Opaque topic identifying a class of events.
///
/// No registry of valid topics is enforced; any string is legal.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Topic(Arc<str>);

impl Topic {
    /// Creates a topic from any string.
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self(name.into())
    }

    /// Returns the topic string.
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Topic({:?})", &*self.0)
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Topic {
    fn from(s: &str) -> Self {
        Self(Arc::from(s))
    }
}

impl From<String> for Topic {
    fn from(s: String) -> Self {
        Self(Arc::from(s))
    }
}

impl From<&Topic> for Topic {
    fn from(t: &Topic) -> Self {
        t.clone()
    }
}

impl Borrow<str> for Topic {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Topics published by the runtime itself.
pub mod topics {
    /// Published (immediate) after `init_model`.
    pub const MODEL_INITIALIZED: &str = "controller.model_initialized";
    /// Published (immediate) after `init_view`.
    pub const VIEW_INITIALIZED: &str = "controller.view_initialized";
    /// Published (immediate) once daemons, pump and workers are down.
    pub const VIEW_SHUTDOWN: &str = "controller.view_shutdown";
    /// Published (immediate) once the storage writer is down.
    pub const MODEL_SHUTDOWN: &str = "controller.model_shutdown";
    /// An asynchronous storage write failed; payload is the `StorageError`.
    pub const WRITE_FAILED: &str = "storage.write_failed";
    /// A worker-pool job failed or panicked; payload is the `TaskError`.
    pub const JOB_FAILED: &str = "pool.job_failed";
    /// A daemon cycle failed or panicked; payload is the `RuntimeError` report.
    pub const DAEMON_FAILED: &str = "daemon.failed";
    /// A bus subscriber failed; payload is the `RuntimeError` report.
    pub const HANDLER_FAILED: &str = "bus.handler_failed";
}

/// Published event with optional metadata.
///
/// - `seq`: monotonic global sequence for ordering
/// - `at`: wall-clock timestamp (for logs)
/// - `payload`: shared, type-erased arguments; read back with [`Event::payload`]
#[derive(Clone)]
pub struct Event {
    /// Globally unique, monotonically increasing sequence number.
    pub seq: u64,
    /// Wall-clock timestamp.
    pub at: SystemTime,
    /// Event topic.
    pub topic: Topic,
    /// Name of the component that produced the event, if known.
    pub source: Option<Arc<str>>,
    /// Human-readable reason (errors, progress details, etc.).
    pub reason: Option<Arc<str>>,

    payload: Option<Arc<dyn Any + Send + Sync>>,
}

impl Event {
    /// Creates a new event for `topic` with current timestamp and next sequence number.
    pub fn new(topic: impl Into<Topic>) -> Self {
        Self {
            seq: EVENT_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            at: SystemTime::now(),
            topic: topic.into(),
            source: None,
            reason: None,
            payload: None,
        }
    }

    /// Attaches a source name.
    #[inline]
    pub fn with_source(mut self, source: impl Into<Arc<str>>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Attaches a human-readable reason.
    #[inline]
    pub fn with_reason(mut self, reason: impl Into<Arc<str>>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Attaches a payload value.
    #[inline]
    pub fn with_payload<T: Any + Send + Sync>(mut self, value: T) -> Self {
        self.payload = Some(Arc::new(value));
        self
    }

    /// Attaches an already shared payload.
    #[inline]
    pub fn with_shared_payload(mut self, value: Arc<dyn Any + Send + Sync>) -> Self {
        self.payload = Some(value);
        self
    }

    /// Returns the payload if present and of type `T`.
    pub fn payload<T: Any>(&self) -> Option<&T> {
        self.payload.as_deref().and_then(|p| p.downcast_ref::<T>())
    }

    /// True if any payload is attached.
    #[inline]
    pub fn has_payload(&self) -> bool {
        self.payload.is_some()
    }

    /// True if the event was published on `topic`.
    #[inline]
    pub fn is(&self, topic: &str) -> bool {
        self.topic.as_str() == topic
    }
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event")
            .field("seq", &self.seq)
            .field("topic", &self.topic)
            .field("source", &self.source)
            .field("reason", &self.reason)
            .field("has_payload", &self.payload.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_is_monotonic() {
        let a = Event::new("a");
        let b = Event::new("b");
        assert!(b.seq > a.seq);
    }

    #[test]
    fn topic_compares_by_string() {
        assert_eq!(Topic::from("x.y"), Topic::new(String::from("x.y")));
        assert_ne!(Topic::from("x.y"), Topic::from("x.z"));
    }
}
