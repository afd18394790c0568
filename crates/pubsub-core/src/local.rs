//! # Local Bus
//!
//! In-process fan-out. Each channel owns a dispatcher holding its
//! subscriptions; all dispatchers share one bounded [`DeliveryPool`].
//!
//! ```text
//! publish(msg) ─► validate ─► enrich ─► channels[msg.channel].post(msg)
//!                                              │
//!                                              └─► pool.schedule(msg, subs)
//! ```
//!
//! Publishing never waits for subscribers; it only takes the channel map's
//! read lock and a snapshot of the channel's subscriptions.

use crate::bus::{prepare_publish, validate_channel, PubsubBus};
use crate::config::LocalBusConfig;
use crate::dispatch::DeliveryPool;
use crate::enricher::EnricherChain;
use crate::error::BusError;
use crate::filter::EventFilter;
use crate::lifecycle::{BusState, Lifecycle};
use crate::message::Message;
use crate::permission::Authentication;
use crate::subscriber::{ChannelSubscriber, Registration, SubscriberList, Subscription};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Per-channel dispatcher. Created lazily, kept for the bus lifetime.
struct ChannelDispatcher {
    name: String,
    subscribers: RwLock<SubscriberList>,
    pool: DeliveryPool,
}

impl ChannelDispatcher {
    fn new(name: &str, pool: DeliveryPool) -> Self {
        Self {
            name: name.to_string(),
            subscribers: RwLock::new(SubscriberList::new()),
            pool,
        }
    }

    /// Schedule one delivery per subscription. Returns the count.
    fn post(&self, message: Message) -> usize {
        let subscriptions = self.subscribers.read().to_vec();
        if subscriptions.is_empty() {
            debug!(channel = %self.name, "No subscribers on channel");
            return 0;
        }
        self.pool.schedule(Arc::new(message), subscriptions)
    }
}

/// In-process bus backed by a bounded worker pool.
pub struct LocalBus {
    /// Created/Running/ShuttingDown/Stopped state, shared by every operation.
    lifecycle: Lifecycle,
    /// Bounded pool all channel dispatchers schedule deliveries on.
    pool: DeliveryPool,
    /// Dispatcher per channel name, created on first use.
    channels: RwLock<HashMap<String, Arc<ChannelDispatcher>>>,
    /// Enrichers applied to every published message, in registration order.
    enrichers: EnricherChain,
    /// Messages accepted by `publish`.
    events_published: AtomicU64,
    /// How long shutdown waits for running deliveries.
    drain_timeout: Duration,
}

impl LocalBus {
    /// Create a running bus with the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(LocalBusConfig::default())
    }

    /// Create a running bus configured from the environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self::with_config(LocalBusConfig::from_env())
    }

    #[must_use]
    pub fn with_config(config: LocalBusConfig) -> Self {
        let bus = Self {
            lifecycle: Lifecycle::new(),
            pool: DeliveryPool::new(config.max_workers),
            channels: RwLock::new(HashMap::new()),
            enrichers: EnricherChain::new(),
            events_published: AtomicU64::new(0),
            drain_timeout: config.drain_timeout,
        };
        bus.lifecycle.start();
        bus
    }

    fn channel(&self, name: &str) -> Arc<ChannelDispatcher> {
        if let Some(dispatcher) = self.channels.read().get(name) {
            return Arc::clone(dispatcher);
        }
        let mut channels = self.channels.write();
        Arc::clone(
            channels
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(ChannelDispatcher::new(name, self.pool.clone()))),
        )
    }

    /// Number of subscriptions on `channel`.
    #[must_use]
    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.channels
            .read()
            .get(channel)
            .map_or(0, |d| d.subscribers.read().len())
    }

    /// Channels created so far, sorted. Includes channels without subscribers.
    #[must_use]
    pub fn channel_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.channels.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Messages accepted by `publish` since creation.
    #[must_use]
    pub fn events_published(&self) -> u64 {
        self.events_published.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn max_workers(&self) -> usize {
        self.pool.max_workers()
    }

    /// Deliveries scheduled but not finished.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.pool.in_flight()
    }
}

impl Default for LocalBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PubsubBus for LocalBus {
    async fn publish(&self, mut message: Message) -> Result<(), BusError> {
        self.lifecycle.ensure_running()?;
        let channel = prepare_publish(&mut message, &self.enrichers)?;

        self.events_published.fetch_add(1, Ordering::Relaxed);
        let scheduled = self.channel(&channel).post(message);
        debug!(channel = %channel, deliveries = scheduled, "Message published");
        Ok(())
    }

    async fn subscribe(
        &self,
        channel: &str,
        subscriber: Arc<dyn ChannelSubscriber>,
        auth: Authentication,
        filter: Option<EventFilter>,
    ) -> Result<(), BusError> {
        self.lifecycle.ensure_running()?;
        validate_channel(channel)?;

        let name = subscriber.name().to_string();
        let subscription = Subscription::new(channel, subscriber, auth, filter);
        let registration = self.channel(channel).subscribers.write().upsert(subscription);
        match registration {
            Registration::Added { .. } => {
                debug!(channel, subscriber = %name, "Subscription added");
            }
            Registration::Replaced => {
                debug!(channel, subscriber = %name, "Subscription replaced");
            }
        }
        Ok(())
    }

    async fn unsubscribe(
        &self,
        channel: &str,
        subscriber: &Arc<dyn ChannelSubscriber>,
    ) -> Result<(), BusError> {
        self.lifecycle.ensure_running()?;

        let dispatcher = self.channels.read().get(channel).cloned();
        if let Some(dispatcher) = dispatcher {
            let removal = dispatcher.subscribers.write().remove(subscriber);
            debug!(channel, subscriber = subscriber.name(), ?removal, "Unsubscribed");
        }
        Ok(())
    }

    async fn shutdown(&self) {
        let Some(guard) = self.lifecycle.claim_shutdown() else {
            self.lifecycle.wait_stopped().await;
            return;
        };
        let guard = guard.on_abandon(|| {
            self.pool.abort();
            self.channels.write().clear();
        });

        info!(in_flight = self.pool.in_flight(), "Shutting down local bus");
        self.pool.shutdown(self.drain_timeout).await;
        self.channels.write().clear();
        guard.complete();
        info!("Local bus stopped");
    }

    fn state(&self) -> BusState {
        self.lifecycle.state()
    }

    fn enrichers(&self) -> &EnricherChain {
        &self.enrichers
    }
}
