use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::{
    config::Config,
    events::Bus,
    logger::Logger,
    net::{CookieJar, Fetch},
    storage::StorageFactory,
    subscribers::{Subscribe, SubscriberSet},
    tasks::TaskRegistry,
};

use super::{Context, Fetcher, Gate, Service};

/// Builder for constructing a [`Service`] and its shared [`Context`].
pub struct ServiceBuilder {
    cfg: Config,
    subscribers: Vec<Arc<dyn Subscribe>>,
    registry: TaskRegistry,
}

impl ServiceBuilder {
    /// Creates a new builder with the given configuration and the built-in
    /// task variants.
    pub fn new(cfg: Config) -> Self {
        Self {
            cfg,
            subscribers: Vec::new(),
            registry: TaskRegistry::builtin(),
        }
    }

    /// Sets event subscribers for observability.
    ///
    /// Subscribers receive runtime events (state changes, logs, job and task
    /// lifecycle) through dedicated workers with bounded queues.
    pub fn with_subscribers(mut self, subscribers: Vec<Arc<dyn Subscribe>>) -> Self {
        self.subscribers = subscribers;
        self
    }

    /// Replaces the task registry.
    pub fn with_registry(mut self, registry: TaskRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Builds the service. Must be called from within a tokio runtime.
    ///
    /// Initializes:
    /// - event bus and logger
    /// - run-loop gate (in `Stopped`) and the paced fetcher
    /// - subscriber workers and the listener feeding them
    pub fn build(
        self,
        fetch: Arc<dyn Fetch>,
        cookies: Arc<dyn CookieJar>,
        storage: Arc<dyn StorageFactory>,
    ) -> Arc<Service> {
        let bus = Bus::new(self.cfg.bus_capacity_clamped());
        let logger = Logger::new(bus.clone(), self.cfg.log_level, self.cfg.log_history);
        let gate = Arc::new(Gate::new(bus.clone()));
        let fetcher = Arc::new(Fetcher::new(fetch, gate.clone(), self.cfg.pacing()));
        let runtime_token = CancellationToken::new();

        if !self.subscribers.is_empty() {
            let subs = SubscriberSet::new(self.subscribers, bus.clone());
            subscriber_listener(&bus, subs, runtime_token.clone());
        }

        let ctx = Arc::new(Context {
            config: self.cfg,
            bus,
            logger,
            gate,
            fetcher,
            storage,
            cookies,
            registry: Arc::new(self.registry),
        });
        Arc::new(Service::new_internal(ctx, runtime_token))
    }
}

/// Subscribes to the bus and forwards events to the subscriber set until
/// `token` is cancelled, then drains the subscriber workers.
fn subscriber_listener(bus: &Bus, subs: SubscriberSet, token: CancellationToken) {
    let mut rx = bus.subscribe();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                msg = rx.recv() => match msg {
                    Ok(ev) => subs.emit(&ev),
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!(skipped = n, "subscriber listener lagged");
                    }
                }
            }
        }
        subs.shutdown().await;
    });
}
