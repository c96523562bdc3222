//! # Function-backed subscriber (`HandlerFn`)
//!
//! [`HandlerFn`] wraps a closure `F: Fn(&Event) -> Result<(), HandlerError>` so that
//! one-off handlers do not need a dedicated type.
//!
//! Shared state goes into the closure explicitly (`Arc<...>` captured by `move`).
//!
//! ## Example
//! ```rust
//! use std::sync::Arc;
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use appvisor::{Event, HandlerFn, Subscribe};
//!
//! let seen = Arc::new(AtomicUsize::new(0));
//! let counter = Arc::clone(&seen);
//! let h = HandlerFn::arc("counter", move |_ev: &Event| {
//!     counter.fetch_add(1, Ordering::Relaxed);
//!     Ok(())
//! });
//!
//! assert_eq!(h.name(), "counter");
//! h.on_event(&Event::new("x")).unwrap();
//! assert_eq!(seen.load(Ordering::Relaxed), 1);
//! ```

use std::sync::Arc;

use crate::error::HandlerError;
use crate::events::Event;
use crate::subscribers::Subscribe;

/// Closure-backed subscriber.
pub struct HandlerFn<F> {
    name: &'static str,
    f: F,
}

impl<F> HandlerFn<F>
where
    F: Fn(&Event) -> Result<(), HandlerError> + Send + Sync + 'static,
{
    /// Creates a new function-backed subscriber.
    ///
    /// Prefer [`HandlerFn::arc`] when you immediately need an `Arc<dyn Subscribe>`.
    pub fn new(name: &'static str, f: F) -> Self {
        Self { name, f }
    }

    /// Creates the subscriber and returns it as a shared handle.
    pub fn arc(name: &'static str, f: F) -> Arc<Self> {
        Arc::new(Self::new(name, f))
    }
}

impl<F> Subscribe for HandlerFn<F>
where
    F: Fn(&Event) -> Result<(), HandlerError> + Send + Sync + 'static,
{
    fn on_event(&self, event: &Event) -> Result<(), HandlerError> {
        (self.f)(event)
    }

    fn name(&self) -> &'static str {
        self.name
    }
}

impl<F> std::fmt::Debug for HandlerFn<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerFn").field("name", &self.name).finish()
    }
}
