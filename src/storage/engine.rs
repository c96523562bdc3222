//! # Storage engine contract.
//!
//! The engine is an external collaborator: the dispatcher owns it on a single
//! writer task and feeds it one job at a time. Engines therefore take `&mut self`
//! and never need internal locking.
//!
//! Actions are a closed, engine-defined set (usually an enum) implementing
//! [`StorageAction`]; the name is used in logs and failure reports.
//!
//! ## Example
//! ```rust
//! use appvisor::{Priority, StorageAction, StorageEngine, StorageError};
//! use tokio_util::sync::CancellationToken;
//!
//! enum Action { Get(String), Put(String, String) }
//!
//! impl StorageAction for Action {
//!     fn name(&self) -> &'static str {
//!         match self { Action::Get(_) => "get", Action::Put(..) => "put" }
//!     }
//! }
//!
//! #[derive(Default)]
//! struct Memory(std::collections::HashMap<String, String>);
//!
//! #[async_trait::async_trait]
//! impl StorageEngine for Memory {
//!     type Action = Action;
//!     type Output = Option<String>;
//!
//!     async fn read(&mut self, action: Action, _p: Priority) -> Result<Option<String>, StorageError> {
//!         match action {
//!             Action::Get(k) => Ok(self.0.get(&k).cloned()),
//!             other => Err(StorageError::failed(other.name(), "not a read")),
//!         }
//!     }
//!
//!     async fn write(
//!         &mut self,
//!         action: Action,
//!         _p: Priority,
//!         _synchronous: bool,
//!         _interrupt: &CancellationToken,
//!     ) -> Result<Option<String>, StorageError> {
//!         match action {
//!             Action::Put(k, v) => Ok(self.0.insert(k, v)),
//!             other => Err(StorageError::failed(other.name(), "not a write")),
//!         }
//!     }
//! }
//! ```

use async_trait::async_trait;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::StorageError;

/// Priority band of a storage job.
///
/// The writer always serves `High` before `Low` before `Interruptable`,
/// FIFO within a band.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Priority {
    /// Reads and asynchronous writes.
    High,
    /// Synchronous writes.
    Low,
    /// Long writes that yield to `High`/`Low` arrivals.
    Interruptable,
}

impl Priority {
    /// Stable label for logs.
    pub fn as_label(self) -> &'static str {
        match self {
            Priority::High => "high",
            Priority::Low => "low",
            Priority::Interruptable => "interruptable",
        }
    }
}

/// A named engine action.
pub trait StorageAction: Send + 'static {
    /// Action name used in logs and error reports.
    fn name(&self) -> &'static str;
}

/// Storage engine driven by the dispatcher's writer task.
///
/// ### Implementation requirements
/// - Long writes should poll `interrupt` and return [`StorageError::Interrupted`] when it fires.
/// - Errors carry the action name (see [`StorageError::failed`]).
#[async_trait]
pub trait StorageEngine: Send + 'static {
    /// Closed set of actions the engine understands.
    type Action: StorageAction;
    /// Result payload of reads and writes.
    type Output: Send + 'static;

    /// Executes a read.
    async fn read(
        &mut self,
        action: Self::Action,
        priority: Priority,
    ) -> Result<Self::Output, StorageError>;

    /// Executes a write.
    async fn write(
        &mut self,
        action: Self::Action,
        priority: Priority,
        synchronous: bool,
        interrupt: &CancellationToken,
    ) -> Result<Self::Output, StorageError>;

    /// Runs a maintenance pass that should stop at `stop_at` or when `interrupt` fires.
    async fn maintain(
        &mut self,
        stop_at: Option<Instant>,
        interrupt: &CancellationToken,
    ) -> Result<(), StorageError> {
        let _ = (stop_at, interrupt);
        Ok(())
    }

    /// True if the engine created its storage from scratch.
    fn is_first_start(&self) -> bool {
        false
    }

    /// Releases engine resources; called once, after the last job.
    async fn close(&mut self) -> Result<(), StorageError> {
        Ok(())
    }
}
