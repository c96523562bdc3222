//! Completion handle for asynchronous writes.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::sync::oneshot;

use crate::error::{RuntimeError, StorageError};

/// Result of a write queued with [`StorageDispatcher::write`](crate::StorageDispatcher::write).
///
/// Awaiting yields the engine's result; dropping the handle is fine, failures
/// are still reported on `storage.write_failed`.
#[must_use = "dropping the handle discards the result; failures are still published"]
pub struct WriteHandle<T> {
    action: &'static str,
    rx: oneshot::Receiver<Result<T, StorageError>>,
}

impl<T> WriteHandle<T> {
    pub(crate) fn new(action: &'static str, rx: oneshot::Receiver<Result<T, StorageError>>) -> Self {
        Self { action, rx }
    }

    /// Name of the queued action.
    pub fn action(&self) -> &'static str {
        self.action
    }
}

impl<T> Future for WriteHandle<T> {
    type Output = Result<T, RuntimeError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let action = self.action;
        Pin::new(&mut self.rx).poll(cx).map(|res| match res {
            Ok(Ok(v)) => Ok(v),
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Err(dropped(action).into()),
        })
    }
}

/// Error for a job whose reply was dropped by the writer.
pub(crate) fn dropped(action: &'static str) -> StorageError {
    StorageError::failed(action, "storage writer dropped the job")
}

impl<T> std::fmt::Debug for WriteHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteHandle").field("action", &self.action).finish()
    }
}
