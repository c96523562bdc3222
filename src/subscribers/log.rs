//! # Logging subscriber for runtime topics.
//!
//! [`LogWriter`] mirrors the topics published by the runtime itself to `tracing`.
//! Useful during development; production setups usually subscribe their own handlers.
//!
//! ## Output
//! ```text
//! INFO  lifecycle topic=controller.view_shutdown
//! WARN  job failed seq=42 source=pool reason="worker 3: error: disk full"
//! ```
//!
//! ## Example
//! ```no_run
//! # use std::sync::Arc;
//! # use appvisor::{EventBus, LogWriter, SubscriberId};
//! # let bus = EventBus::default();
//! LogWriter::attach(&bus);
//! ```

use std::sync::Arc;

use tracing::{info, warn};

use crate::error::HandlerError;
use crate::events::{Event, EventBus, topics};
use crate::subscribers::{Subscribe, SubscriberId};

/// Topics the writer registers for.
const WATCHED: [&str; 8] = [
    topics::MODEL_INITIALIZED,
    topics::VIEW_INITIALIZED,
    topics::VIEW_SHUTDOWN,
    topics::MODEL_SHUTDOWN,
    topics::WRITE_FAILED,
    topics::JOB_FAILED,
    topics::DAEMON_FAILED,
    topics::HANDLER_FAILED,
];

/// `tracing` sink for runtime topics.
///
/// Enabled via the `logging` feature.
pub struct LogWriter;

impl LogWriter {
    /// Subscribes a writer to every runtime topic; returns its id for later `unsubscribe_all`.
    pub fn attach(bus: &EventBus) -> SubscriberId {
        let id = SubscriberId::next();
        let writer: Arc<dyn Subscribe> = Arc::new(LogWriter);
        for topic in WATCHED {
            bus.subscribe(id, topic, Arc::clone(&writer));
        }
        id
    }
}

impl Subscribe for LogWriter {
    fn on_event(&self, e: &Event) -> Result<(), HandlerError> {
        let source = e.source.as_deref().unwrap_or("-");
        let reason = e.reason.as_deref().unwrap_or("");
        match e.topic.as_str() {
            topics::WRITE_FAILED => {
                warn!(seq = e.seq, source, reason, "storage write failed")
            }
            topics::JOB_FAILED => warn!(seq = e.seq, source, reason, "job failed"),
            topics::DAEMON_FAILED => warn!(seq = e.seq, source, reason, "daemon failed"),
            topics::HANDLER_FAILED => {
                warn!(seq = e.seq, source, reason, "subscriber failed")
            }
            other => info!(topic = other, "lifecycle"),
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "log_writer"
    }
}
