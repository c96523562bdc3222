//! # Deferred jobs.
//!
//! A [`Job`] is a named one-shot closure producing a future. It is owned by exactly
//! one worker queue until that worker runs it, exactly once.
//!
//! Synchronous work (file I/O, hashing, decoding) goes through [`Job::blocking`]:
//! the closure runs on tokio's blocking thread pool, so it never stalls the
//! storage writer, the event pump or the daemons. The worker still waits for it,
//! so its queue order holds.
//!
//! ## Example
//! ```rust
//! use appvisor::{Job, TaskError};
//!
//! let job = Job::new("regen-thumbnails", || async {
//!     // do work...
//!     Ok::<_, TaskError>(())
//! });
//! assert_eq!(job.name(), "regen-thumbnails");
//! ```

use std::borrow::Cow;
use std::fmt;
use std::future::Future;
use std::pin::Pin;

use crate::error::TaskError;

/// Boxed future produced by a job.
pub type BoxJobFuture = Pin<Box<dyn Future<Output = Result<(), TaskError>> + Send + 'static>>;

/// Named unit of deferred work.
pub struct Job {
    name: Cow<'static, str>,
    run: Box<dyn FnOnce() -> BoxJobFuture + Send + 'static>,
}

impl Job {
    /// Creates a job from a closure that builds its future when the worker picks it up.
    pub fn new<F, Fut>(name: impl Into<Cow<'static, str>>, f: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), TaskError>> + Send + 'static,
    {
        Self {
            name: name.into(),
            run: Box::new(move || Box::pin(f())),
        }
    }

    /// Creates a job running the synchronous `f` on the blocking thread pool.
    ///
    /// A panic inside `f` is reported like a panic of an async job.
    pub fn blocking<F>(name: impl Into<Cow<'static, str>>, f: F) -> Self
    where
        F: FnOnce() -> Result<(), TaskError> + Send + 'static,
    {
        Self::new(name, move || async move {
            match tokio::task::spawn_blocking(f).await {
                Ok(res) => res,
                Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
                Err(_) => Err(TaskError::Canceled),
            }
        })
    }

    /// Job name used in logs and failure reports.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Consumes the job, building its future.
    pub(crate) fn into_future(self) -> BoxJobFuture {
        (self.run)()
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job").field("name", &self.name).finish()
    }
}
