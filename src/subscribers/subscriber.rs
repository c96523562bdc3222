//! # Event subscriber trait.
//!
//! Provides [`Subscribe`] an extension point for plugging handlers into the
//! [`EventBus`](crate::EventBus), and [`SubscriberId`] the stable identity a
//! subscriber registers under.
//!
//! ## Architecture
//! ```text
//! publish_immediate(ev) ──► handlers(topic) ──► subscriber.on_event(&ev)   (caller thread)
//! publish(ev) ──► [deferred queue] ──► drain() ──► subscriber.on_event(&ev) (drain context)
//!                                           └─► Err / panic → bus.handler_failed
//! ```
//!
//! ## Rules
//! - Handlers run synchronously; keep them short and never block on the runtime.
//! - A failing or panicking handler never stops delivery to the other subscribers.
//! - Identity is explicit: the bus holds a handler only until the subscriber
//!   calls `unsubscribe`/`unsubscribe_all` during its own teardown. A handler
//!   whose owner is already gone should return [`HandlerError::SubscriberGone`],
//!   which is ignored by default.
//!
//! ## Example
//! ```rust
//! use appvisor::{Event, HandlerError, Subscribe};
//!
//! struct Refresh;
//!
//! impl Subscribe for Refresh {
//!     fn on_event(&self, ev: &Event) -> Result<(), HandlerError> {
//!         if ev.payload::<u32>().is_none() {
//!             return Err(HandlerError::fail("missing count"));
//!         }
//!         Ok(())
//!     }
//!
//!     fn name(&self) -> &'static str { "refresh" }
//! }
//! ```

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::HandlerError;
use crate::events::Event;

static SUBSCRIBER_SEQ: AtomicU64 = AtomicU64::new(1);

/// Stable identity of a subscriber.
///
/// Used for deduplication (one handler per `(subscriber, topic)`) and for
/// bulk unregistration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(u64);

impl SubscriberId {
    /// Allocates a fresh, process-unique id.
    pub fn next() -> Self {
        Self(SUBSCRIBER_SEQ.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw numeric value.
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub#{}", self.0)
    }
}

/// Event handler registered on the bus.
///
/// ### Implementation requirements
/// - Return quickly; handlers run on the publisher thread (immediate) or on
///   the drain context (deferred).
/// - Report failures through [`HandlerError`] instead of panicking; panics are
///   still caught and reported as `handler_panicked`.
pub trait Subscribe: Send + Sync + 'static {
    /// Handles a single event.
    fn on_event(&self, event: &Event) -> Result<(), HandlerError>;

    /// Returns the subscriber name used in logs and failure reports.
    ///
    /// The default uses `type_name::<Self>()`, which can be verbose - override it when possible.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}
