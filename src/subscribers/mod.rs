//! # Event subscribers for the appvisor runtime.
//!
//! This module provides the [`Subscribe`] trait, the [`SubscriberId`] identity
//! handlers register under, and built-in implementations.
//!
//! ## Architecture
//! ```text
//! EventBus ──► handlers(topic) in registration order
//!                 │
//!                 ├──► Subscribe::on_event(&Event)
//!                 │        │
//!                 │   ┌────┴──────┬───────────┬────────┐
//!                 │   ▼           ▼           ▼        ▼
//!                 │ LogWriter  HandlerFn    Custom    ...
//!                 │
//!                 └──► Err / panic ──► bus.handler_failed (unless ignored)
//! ```
//!
//! ## Implementing custom subscribers
//! ```no_run
//! use std::sync::Arc;
//! use appvisor::{Event, EventBus, HandlerError, Subscribe, SubscriberId};
//!
//! struct Thumbnails;
//!
//! impl Subscribe for Thumbnails {
//!     fn on_event(&self, ev: &Event) -> Result<(), HandlerError> {
//!         let _ = ev.payload::<u64>();
//!         Ok(())
//!     }
//!     fn name(&self) -> &'static str { "thumbnails" }
//! }
//!
//! let bus = EventBus::default();
//! bus.subscribe(SubscriberId::next(), "files.imported", Arc::new(Thumbnails));
//! ```

mod handler_fn;
#[cfg(feature = "logging")]
mod log;
mod subscriber;

pub use handler_fn::HandlerFn;
#[cfg(feature = "logging")]
pub use log::LogWriter;
pub use subscriber::{Subscribe, SubscriberId};
