//! # Subscribers
//!
//! Defines the subscription side of the bus: the callback capability
//! supplied by callers and the bookkeeping both bus variants share.

use crate::filter::EventFilter;
use crate::message::Message;
use crate::permission::Authentication;
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Receives messages published on the channels it subscribed to.
///
/// Every delivery hands the subscriber its own copy of the message.
/// Errors and panics are logged by the bus and never reach the publisher.
#[async_trait]
pub trait ChannelSubscriber: Send + Sync {
    async fn on_message(&self, message: Message) -> anyhow::Result<()>;

    /// Name used in log lines.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

/// A (channel, subscriber, auth context, optional filter) registration.
#[derive(Clone)]
pub struct Subscription {
    channel: String,
    subscriber: Arc<dyn ChannelSubscriber>,
    auth: Authentication,
    filter: Option<EventFilter>,
}

impl Subscription {
    #[must_use]
    pub fn new(
        channel: impl Into<String>,
        subscriber: Arc<dyn ChannelSubscriber>,
        auth: Authentication,
        filter: Option<EventFilter>,
    ) -> Self {
        Self {
            channel: channel.into(),
            subscriber,
            auth,
            filter,
        }
    }

    #[must_use]
    pub fn channel(&self) -> &str {
        &self.channel
    }

    #[must_use]
    pub fn subscriber(&self) -> &Arc<dyn ChannelSubscriber> {
        &self.subscriber
    }

    #[must_use]
    pub fn auth(&self) -> &Authentication {
        &self.auth
    }

    #[must_use]
    pub fn filter(&self) -> Option<&EventFilter> {
        self.filter.as_ref()
    }

    /// Is this registration owned by `subscriber`? Identity, not equality.
    #[must_use]
    pub fn is_for(&self, subscriber: &Arc<dyn ChannelSubscriber>) -> bool {
        Arc::ptr_eq(&self.subscriber, subscriber)
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("channel", &self.channel)
            .field("subscriber", &self.subscriber.name())
            .field("principal", &self.auth.principal())
            .field("filter", &self.filter)
            .finish()
    }
}

/// Result of registering a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    /// New registration; `first_on_channel` is true when the channel had none.
    Added { first_on_channel: bool },
    /// The subscriber was already registered; filter and auth were replaced.
    Replaced,
}

/// Result of removing a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Removal {
    NotFound,
    /// Removed; `last_on_channel` is true when the channel has none left.
    Removed { last_on_channel: bool },
}

/// Subscriptions registered on a single channel.
///
/// A given subscriber appears at most once.
#[derive(Debug, Clone, Default)]
pub struct SubscriberList {
    entries: Vec<Subscription>,
}

impl SubscriberList {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert(&mut self, subscription: Subscription) -> Registration {
        if let Some(existing) = self
            .entries
            .iter_mut()
            .find(|s| s.is_for(&subscription.subscriber))
        {
            *existing = subscription;
            return Registration::Replaced;
        }
        let first_on_channel = self.entries.is_empty();
        self.entries.push(subscription);
        Registration::Added { first_on_channel }
    }

    pub fn remove(&mut self, subscriber: &Arc<dyn ChannelSubscriber>) -> Removal {
        let before = self.entries.len();
        self.entries.retain(|s| !s.is_for(subscriber));
        if self.entries.len() == before {
            Removal::NotFound
        } else {
            Removal::Removed {
                last_on_channel: self.entries.is_empty(),
            }
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Subscription> {
        self.entries.iter()
    }

    /// Owned copy for dispatch outside any lock.
    #[must_use]
    pub fn to_vec(&self) -> Vec<Subscription> {
        self.entries.clone()
    }
}

/// Channel name -> subscriptions, for buses that keep one table.
#[derive(Debug, Default)]
pub struct SubscriptionTable {
    channels: HashMap<String, SubscriberList>,
}

impl SubscriptionTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert(&mut self, subscription: Subscription) -> Registration {
        self.channels
            .entry(subscription.channel.clone())
            .or_default()
            .upsert(subscription)
    }

    pub fn remove(&mut self, channel: &str, subscriber: &Arc<dyn ChannelSubscriber>) -> Removal {
        let Some(list) = self.channels.get_mut(channel) else {
            return Removal::NotFound;
        };
        let removal = list.remove(subscriber);
        if list.is_empty() {
            self.channels.remove(channel);
        }
        removal
    }

    /// Subscriptions of `channel`, copied out for dispatch.
    #[must_use]
    pub fn subscriptions(&self, channel: &str) -> Vec<Subscription> {
        self.channels
            .get(channel)
            .map(SubscriberList::to_vec)
            .unwrap_or_default()
    }

    #[must_use]
    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.channels.get(channel).map_or(0, SubscriberList::len)
    }

    #[must_use]
    pub fn has_channel(&self, channel: &str) -> bool {
        self.channels.contains_key(channel)
    }

    /// Channels with at least one subscription.
    pub fn channels(&self) -> impl Iterator<Item = &str> {
        self.channels.keys().map(String::as_str)
    }

    pub fn clear(&mut self) {
        self.channels.clear();
    }
}
