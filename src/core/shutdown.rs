//! # Termination signals and shutdown waits.
//!
//! - [`wait_for_shutdown_signal`]: completes when the process receives a termination signal.
//! - [`join_with_warning`]: awaits a task handle, logging while it overruns its budget.
//!
//! ## Signals
//! **Unix platforms:**
//! - `SIGINT` (Ctrl-C in terminal)
//! - `SIGTERM` (default kill signal, used by session managers)
//! - `SIGQUIT` (quit signal)
//!
//! **Other platforms:**
//! - `Ctrl-C` via [`tokio::signal::ctrl_c`]

use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{error, warn};

use crate::error::panic_message;

/// Waits for a termination signal.
///
/// Each call creates independent signal listeners.
///
/// Returns `Ok(())` when any signal is received, or `Err` if signal registration fails.
#[cfg(unix)]
pub async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigquit = signal(SignalKind::quit())?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {},
        _ = sigint.recv()  => {},
        _ = sigterm.recv() => {},
        _ = sigquit.recv() => {},
    }
    Ok(())
}

/// Waits for a termination signal.
///
/// Returns `Ok(())` when Ctrl-C is received, or `Err` if signal registration fails.
#[cfg(not(unix))]
pub async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}

/// Awaits `handle` to completion.
///
/// Never aborts the task: every `warn_after` without completion is logged and the
/// wait goes on. A panic inside the task is logged at error level.
pub(crate) async fn join_with_warning(what: &str, mut handle: JoinHandle<()>, warn_after: Duration) {
    let warn_after = warn_after.max(Duration::from_millis(1));
    let mut waited = Duration::ZERO;
    loop {
        match tokio::time::timeout(warn_after, &mut handle).await {
            Ok(Ok(())) => return,
            Ok(Err(e)) if e.is_panic() => {
                let msg = panic_message(&*e.into_panic());
                error!(task = what, panic = %msg, "task panicked during shutdown");
                return;
            }
            Ok(Err(_)) => return,
            Err(_) => {
                waited += warn_after;
                warn!(task = what, waited = ?waited, "still waiting for task to finish");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn join_waits_past_the_warning() {
        let handle = tokio::spawn(async {
            tokio::time::sleep(Duration::from_secs(5)).await;
        });
        let started = tokio::time::Instant::now();
        join_with_warning("slow", handle, Duration::from_secs(1)).await;
        assert!(started.elapsed() >= Duration::from_secs(5));
    }

    #[tokio::test]
    async fn join_survives_panicking_task() {
        let handle = tokio::spawn(async {
            if true {
                panic!("boom");
            }
        });
        join_with_warning("panicky", handle, Duration::from_secs(1)).await;
    }
}
