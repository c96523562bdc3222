//! # Storage access.
//!
//! - [`StorageEngine`] / [`StorageAction`]: the contract an external engine implements.
//! - [`StorageDispatcher`]: owns the engine on one writer task and serializes access
//!   through the [`Priority`] bands.
//! - [`WriteHandle`]: completion of an asynchronous write.

mod dispatcher;
mod engine;
mod handle;

pub use dispatcher::StorageDispatcher;
pub use engine::{Priority, StorageAction, StorageEngine};
pub use handle::WriteHandle;
