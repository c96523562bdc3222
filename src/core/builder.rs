use std::sync::Arc;

use crate::daemons::{Daemon, DaemonSpec};
use crate::events::Topic;
use crate::storage::StorageEngine;
use crate::subscribers::{Subscribe, SubscriberId};

use super::caches::Cache;
use super::{Config, Controller};

/// Builder for a [`Controller`] with application daemons, caches and subscribers.
pub struct ControllerBuilder<E: StorageEngine> {
    cfg: Config,
    engine: E,
    daemons: Vec<DaemonSpec>,
    caches: Vec<(String, Arc<dyn Cache>)>,
    subscribers: Vec<(SubscriberId, Topic, Arc<dyn Subscribe>)>,
}

impl<E: StorageEngine> ControllerBuilder<E> {
    /// Creates a new builder with the given configuration and storage engine.
    pub fn new(cfg: Config, engine: E) -> Self {
        Self {
            cfg,
            engine,
            daemons: Vec::new(),
            caches: Vec::new(),
            subscribers: Vec::new(),
        }
    }

    /// Adds a daemon started by `init_view` next to the built-in ones.
    pub fn with_daemon(mut self, spec: DaemonSpec) -> Self {
        self.daemons.push(spec);
        self
    }

    /// Adds several daemons.
    pub fn with_daemons(mut self, specs: impl IntoIterator<Item = DaemonSpec>) -> Self {
        self.daemons.extend(specs);
        self
    }

    /// Registers a named cache.
    pub fn with_cache(mut self, name: impl Into<String>, cache: Arc<dyn Cache>) -> Self {
        self.caches.push((name.into(), cache));
        self
    }

    /// Subscribes `handler` to `topic` before anything is published.
    ///
    /// Use this for handlers that must observe `controller.model_initialized`.
    pub fn with_subscriber(
        mut self,
        subscriber: SubscriberId,
        topic: impl Into<Topic>,
        handler: Arc<dyn Subscribe>,
    ) -> Self {
        self.subscribers.push((subscriber, topic.into(), handler));
        self
    }

    /// Builds the controller. Nothing is started until `init_model`.
    pub fn build(self) -> Arc<Controller<E>> {
        let Self {
            cfg,
            engine,
            daemons,
            caches,
            subscribers,
        } = self;

        let controller =
            Arc::new_cyclic(|me| Controller::new_internal(cfg, engine, daemons, me.clone()));

        for (name, cache) in caches {
            controller.register_cache(name, cache);
        }
        for (id, topic, handler) in subscribers {
            controller.subscribe(id, topic, handler);
        }
        controller
    }
}

impl<E: StorageEngine> std::fmt::Debug for ControllerBuilder<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let daemons: Vec<&str> = self.daemons.iter().map(|d| d.name()).collect();
        f.debug_struct("ControllerBuilder")
            .field("cfg", &self.cfg)
            .field("daemons", &daemons)
            .field("caches", &self.caches.len())
            .field("subscribers", &self.subscribers.len())
            .finish()
    }
}
