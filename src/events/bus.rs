//! # Topic-keyed event bus.
//!
//! [`EventBus`] is the process-wide publish/subscribe registry. Handlers are
//! registered per `(subscriber, topic)` and receive events either synchronously
//! on the publisher's thread ([`EventBus::publish_immediate`]) or later, when the
//! owning drain context calls [`EventBus::drain`] ([`EventBus::publish`]).
//!
//! ## Architecture
//! ```text
//! Publishers (many threads / tasks):
//!   worker ──┐
//!   daemon ──┼── publish(ev) ──► [deferred queue] ──wake──► pump ──► drain()
//!   writer ──┘                                                         │
//!                                                                      ▼
//!   caller ───── publish_immediate(ev) ─────────────────────► dispatch(ev)
//!                                                                      │
//!                                           handlers(topic) in registration order
//! ```
//!
//! ## Rules
//! - At most one handler per `(subscriber, topic)`; re-subscribing replaces the
//!   handler and keeps its position.
//! - Handlers are snapshotted before dispatch; no lock is held while user code runs.
//!   Handlers may publish, subscribe or unsubscribe freely.
//! - A drain delivers at most `drain_limit` events. Leftovers stay queued and the
//!   drain context is woken again.
//! - `drain()` is not re-entrant: a nested or concurrent call returns `0`.
//! - A failing or panicking handler never prevents delivery to the others.
//!   Failures outside the ignore-list are logged and re-published as
//!   [`topics::HANDLER_FAILED`].

use std::collections::VecDeque;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{Mutex, RwLock};
use tokio::sync::Notify;
use tracing::{debug, warn};

use crate::core::Config;
use crate::error::{HANDLER_PANICKED, RuntimeError, panic_message};
use crate::subscribers::{Subscribe, SubscriberId};

use super::event::{Event, Topic, topics};

/// One registered handler.
struct Subscription {
    subscriber: SubscriberId,
    topic: Topic,
    handler: Arc<dyn Subscribe>,
}

struct Inner {
    registry: RwLock<Vec<Subscription>>,
    queue: Mutex<VecDeque<Event>>,
    draining: AtomicBool,
    /// Signalled on every deferred publish (stores a permit for the pump).
    wake: Notify,
    /// Signalled when a drain ends with an empty queue.
    quiescent: Notify,
    /// Signalled whenever a drain ends.
    drain_done: Notify,
    drain_limit: usize,
    ignored: Vec<String>,
}

/// Publish/subscribe registry with a deferred queue.
///
/// Cheap to clone; clones share the same registry and queue.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<Inner>,
}

/// Resets the draining flag even if dispatch unwinds.
struct DrainGuard<'a>(&'a AtomicBool);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl EventBus {
    /// Creates a bus delivering at most `drain_limit` events per drain.
    ///
    /// `ignored` lists handler failure labels (see [`HandlerError::as_label`](crate::HandlerError::as_label))
    /// that are dropped instead of being reported. A `drain_limit` of zero is clamped to one.
    pub fn new(drain_limit: usize, ignored: Vec<String>) -> Self {
        Self {
            inner: Arc::new(Inner {
                registry: RwLock::new(Vec::new()),
                queue: Mutex::new(VecDeque::new()),
                draining: AtomicBool::new(false),
                wake: Notify::new(),
                quiescent: Notify::new(),
                drain_done: Notify::new(),
                drain_limit: drain_limit.max(1),
                ignored,
            }),
        }
    }

    /// Creates a bus from the runtime configuration.
    pub fn from_config(cfg: &Config) -> Self {
        Self::new(cfg.drain_limit_clamped(), cfg.ignored_handler_errors.clone())
    }

    /// Registers `handler` for `topic` under `subscriber`.
    ///
    /// Replaces an existing handler for the same pair in place.
    pub fn subscribe(
        &self,
        subscriber: SubscriberId,
        topic: impl Into<Topic>,
        handler: Arc<dyn Subscribe>,
    ) {
        let topic = topic.into();
        let mut registry = self.inner.registry.write();
        if let Some(existing) = registry
            .iter_mut()
            .find(|s| s.subscriber == subscriber && s.topic == topic)
        {
            existing.handler = handler;
            return;
        }
        debug!(subscriber = %subscriber, topic = %topic, "subscribed");
        registry.push(Subscription {
            subscriber,
            topic,
            handler,
        });
    }

    /// Removes the handler registered for `(subscriber, topic)`.
    ///
    /// Returns `true` if one was registered.
    pub fn unsubscribe(&self, subscriber: SubscriberId, topic: &str) -> bool {
        let mut registry = self.inner.registry.write();
        let before = registry.len();
        registry.retain(|s| !(s.subscriber == subscriber && s.topic.as_str() == topic));
        before != registry.len()
    }

    /// Removes every handler registered by `subscriber`; returns how many were removed.
    pub fn unsubscribe_all(&self, subscriber: SubscriberId) -> usize {
        let mut registry = self.inner.registry.write();
        let before = registry.len();
        registry.retain(|s| s.subscriber != subscriber);
        before - registry.len()
    }

    /// Number of handlers currently registered for `topic`.
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.inner
            .registry
            .read()
            .iter()
            .filter(|s| s.topic.as_str() == topic)
            .count()
    }

    /// Queues `event` for deferred dispatch and wakes the drain context.
    ///
    /// Never blocks and never runs handlers.
    pub fn publish(&self, event: Event) {
        self.inner.queue.lock().push_back(event);
        self.inner.wake.notify_one();
    }

    /// Dispatches `event` to every current handler of its topic on the calling thread.
    ///
    /// Returns the number of handlers invoked.
    pub fn publish_immediate(&self, event: &Event) -> usize {
        self.dispatch(event)
    }

    /// Delivers queued events, including those published by handlers during the drain.
    ///
    /// Returns the number of events delivered. Returns `0` right away if another
    /// drain is in progress.
    pub fn drain(&self) -> usize {
        if self
            .inner
            .draining
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return 0;
        }

        let mut delivered = 0;
        {
            let _guard = DrainGuard(&self.inner.draining);
            while delivered < self.inner.drain_limit {
                let next = self.inner.queue.lock().pop_front();
                let Some(ev) = next else { break };
                self.dispatch(&ev);
                delivered += 1;
            }
        }
        self.inner.drain_done.notify_waiters();

        let leftover = self.inner.queue.lock().len();
        if leftover > 0 {
            warn!(
                delivered,
                leftover,
                limit = self.inner.drain_limit,
                "drain limit reached; rescheduling"
            );
            self.inner.wake.notify_one();
        } else {
            self.inner.quiescent.notify_waiters();
        }
        delivered
    }

    /// True while a drain is running.
    pub fn is_draining(&self) -> bool {
        self.inner.draining.load(Ordering::SeqCst)
    }

    /// Number of deferred events waiting for a drain.
    pub fn pending(&self) -> usize {
        self.inner.queue.lock().len()
    }

    /// True when nothing is queued and no drain is in progress.
    pub fn is_quiescent(&self) -> bool {
        // Queue first: a drain pops before it clears the flag.
        self.inner.queue.lock().is_empty() && !self.is_draining()
    }

    /// Resolves once deferred events are waiting.
    pub async fn wait_for_work(&self) {
        loop {
            let notified = self.inner.wake.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.pending() > 0 {
                return;
            }
            notified.await;
        }
    }

    /// Resolves once no drain is running.
    pub async fn wait_drain_finished(&self) {
        loop {
            let notified = self.inner.drain_done.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if !self.is_draining() {
                return;
            }
            notified.await;
        }
    }

    /// Resolves once the bus is quiescent.
    ///
    /// Someone else has to drain; this only waits.
    pub async fn wait_quiescent(&self) {
        loop {
            let notified = self.inner.quiescent.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_quiescent() {
                return;
            }
            notified.await;
        }
    }

    fn dispatch(&self, ev: &Event) -> usize {
        let handlers: Vec<(SubscriberId, Arc<dyn Subscribe>)> = self
            .inner
            .registry
            .read()
            .iter()
            .filter(|s| s.topic == ev.topic)
            .map(|s| (s.subscriber, Arc::clone(&s.handler)))
            .collect();

        for (id, handler) in &handlers {
            match catch_unwind(AssertUnwindSafe(|| handler.on_event(ev))) {
                Ok(Ok(())) => {}
                Ok(Err(err)) => self.report(*id, handler.name(), ev, err.as_label(), err.to_string()),
                Err(panic) => {
                    let msg = panic_message(&*panic);
                    self.report(*id, handler.name(), ev, HANDLER_PANICKED, format!("panicked: {msg}"));
                }
            }
        }
        handlers.len()
    }

    fn report(&self, id: SubscriberId, name: &'static str, ev: &Event, label: &str, reason: String) {
        if self.inner.ignored.iter().any(|l| l == label) {
            debug!(subscriber = %id, name, topic = %ev.topic, label, "ignored handler failure");
            return;
        }
        warn!(subscriber = %id, name, topic = %ev.topic, label, %reason, "handler failed");

        if ev.is(topics::HANDLER_FAILED) {
            return;
        }
        let report = RuntimeError::SubscriberHandlerFailure {
            subscriber: name.to_string(),
            topic: ev.topic.to_string(),
            reason: reason.clone(),
        };
        self.publish(
            Event::new(topics::HANDLER_FAILED)
                .with_source(name)
                .with_reason(reason)
                .with_payload(report),
        );
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("handlers", &self.inner.registry.read().len())
            .field("pending", &self.pending())
            .field("draining", &self.is_draining())
            .finish()
    }
}
