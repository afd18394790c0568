//! # Transport Abstraction
//!
//! What a [`RelayBus`](crate::RelayBus) needs from an external pub/sub
//! system: short-lived publishes, one long-lived receive connection per bus,
//! and a way to observe how many channels that connection is subscribed to.

use async_trait::async_trait;
use pubsub_core::TransportError;

/// Push notification read from a receive connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushEvent {
    /// A payload published on `channel`.
    Message { channel: String, payload: String },
    /// Subscribe acknowledged; `count` is the connection's subscription count.
    Subscribed { channel: String, count: usize },
    /// Unsubscribe acknowledged; `count` is the connection's subscription count.
    Unsubscribed { channel: String, count: usize },
}

/// The single blocking connection a relay bus receives on.
#[async_trait]
pub trait ReceiveConnection: Send {
    /// Add physical subscriptions. Transports may also report the
    /// acknowledgements as push events.
    async fn subscribe(&mut self, channels: &[String]) -> Result<(), TransportError>;

    /// Remove physical subscriptions.
    async fn unsubscribe(&mut self, channels: &[String]) -> Result<(), TransportError>;

    /// Next push event, or `None` once the connection is closed.
    ///
    /// Must be cancel safe: dropping the future loses no event.
    async fn next_event(&mut self) -> Result<Option<PushEvent>, TransportError>;

    async fn close(&mut self);
}

/// External pub/sub system shared by many bus instances.
#[async_trait]
pub trait PubsubTransport: Send + Sync {
    /// Send `payload` on `channel`. Returns how many receivers got it.
    async fn publish(&self, channel: &str, payload: &str) -> Result<usize, TransportError>;

    /// Open a receive connection identified by `client_name`.
    async fn open_receiver(
        &self,
        client_name: &str,
    ) -> Result<Box<dyn ReceiveConnection>, TransportError>;

    /// Channels the connection named `client_name` is subscribed to.
    async fn subscription_count(&self, client_name: &str) -> Result<usize, TransportError>;

    /// Channels with at least one subscriber across all clients, sorted.
    async fn active_channels(&self) -> Result<Vec<String>, TransportError>;

    /// Release shared connections. Later operations fail.
    async fn shutdown(&self);
}
