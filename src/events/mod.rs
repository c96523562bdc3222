//! # Runtime events.
//!
//! - [`Event`] / [`Topic`]: the published record and its key.
//! - [`topics`]: topics emitted by the runtime itself.
//! - [`EventBus`]: topic-keyed publish/subscribe with a deferred queue.

mod bus;
mod event;

pub use bus::EventBus;
pub use event::{Event, Topic, topics};
