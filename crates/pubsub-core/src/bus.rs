//! # Bus Contract
//!
//! The operations every bus variant supports, plus the publish-time steps
//! they all share.

use crate::enricher::{EnricherChain, MessageEnricher};
use crate::error::BusError;
use crate::filter::EventFilter;
use crate::lifecycle::BusState;
use crate::message::Message;
use crate::permission::Authentication;
use crate::props::EventProps;
use crate::subscriber::ChannelSubscriber;
use async_trait::async_trait;
use std::sync::Arc;

/// Channel based publish/subscribe bus.
///
/// Operations are only valid while the bus is [`BusState::Running`];
/// afterwards they fail fast with [`BusError::NotRunning`].
#[async_trait]
pub trait PubsubBus: Send + Sync {
    /// Publish a message on its channel.
    ///
    /// Fails before any delivery when the channel or event name is missing
    /// or an enricher fails.
    async fn publish(&self, message: Message) -> Result<(), BusError>;

    /// Register `subscriber` on `channel`.
    ///
    /// Subscribing the same subscriber twice to one channel replaces the
    /// earlier registration (auth context and filter).
    async fn subscribe(
        &self,
        channel: &str,
        subscriber: Arc<dyn ChannelSubscriber>,
        auth: Authentication,
        filter: Option<EventFilter>,
    ) -> Result<(), BusError>;

    /// Remove `subscriber` from `channel`. No-op if it was not registered.
    async fn unsubscribe(
        &self,
        channel: &str,
        subscriber: &Arc<dyn ChannelSubscriber>,
    ) -> Result<(), BusError>;

    /// Release every resource held by the bus. Idempotent.
    async fn shutdown(&self);

    fn state(&self) -> BusState;

    fn enrichers(&self) -> &EnricherChain;

    /// Append an enricher; enrichers run in registration order.
    fn register_enricher(&self, enricher: Arc<dyn MessageEnricher>) {
        self.enrichers().register(enricher);
    }
}

/// Reject empty channel names.
pub fn validate_channel(channel: &str) -> Result<(), BusError> {
    if channel.is_empty() {
        return Err(BusError::MissingProperty {
            property: EventProps::ChannelName.as_str(),
        });
    }
    Ok(())
}

/// Validate, tag and enrich a message. Returns the channel to publish on.
pub fn prepare_publish(message: &mut Message, enrichers: &EnricherChain) -> Result<String, BusError> {
    require(message, EventProps::ChannelName)?;
    require(message, EventProps::EventName)?;

    let object_type = message
        .access()
        .and_then(|access| access.resolve())
        .map(|object| object.object_type().to_string());
    if let Some(object_type) = object_type {
        message.set(EventProps::ObjectType, object_type);
    }

    enrichers.apply(message)?;

    // An enricher may not drop the channel.
    require(message, EventProps::ChannelName).map(str::to_owned)
}

fn require(message: &Message, prop: EventProps) -> Result<&str, BusError> {
    message
        .get(prop)
        .filter(|value| !value.is_empty())
        .ok_or(BusError::MissingProperty {
            property: prop.as_str(),
        })
}
