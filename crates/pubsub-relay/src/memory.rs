//! # In-Memory Broker
//!
//! A [`PubsubTransport`] living inside the process. Several relay buses
//! sharing one broker behave like processes sharing one Redis server, which
//! makes the relay protocol testable without a network.

use crate::transport::{PubsubTransport, PushEvent, ReceiveConnection};
use async_trait::async_trait;
use parking_lot::Mutex;
use pubsub_core::TransportError;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

struct Client {
    name: String,
    channels: BTreeSet<String>,
    sender: mpsc::UnboundedSender<PushEvent>,
}

#[derive(Default)]
struct BrokerInner {
    clients: Mutex<HashMap<u64, Client>>,
    next_id: AtomicU64,
    offline: AtomicBool,
}

impl BrokerInner {
    fn check_online(&self) -> Result<(), TransportError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(TransportError::ConnectionClosed);
        }
        Ok(())
    }

    fn disconnect(&self, id: u64) {
        self.clients.lock().remove(&id);
    }
}

/// Process-local pub/sub broker. Clones share the same state.
#[derive(Clone, Default)]
pub struct MemoryBroker {
    inner: Arc<BrokerInner>,
}

impl MemoryBroker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every operation fail with [`TransportError::ConnectionClosed`].
    pub fn set_offline(&self, offline: bool) {
        self.inner.offline.store(offline, Ordering::SeqCst);
    }

    /// Drop every receive connection, as a server restart would.
    pub fn disconnect_all(&self) {
        let dropped = {
            let mut clients = self.inner.clients.lock();
            let n = clients.len();
            clients.clear();
            n
        };
        debug!(clients = dropped, "Memory broker dropped all receive connections");
    }

    /// Number of open receive connections.
    #[must_use]
    pub fn client_count(&self) -> usize {
        self.inner.clients.lock().len()
    }
}

impl std::fmt::Debug for MemoryBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryBroker")
            .field("clients", &self.client_count())
            .finish()
    }
}

#[async_trait]
impl PubsubTransport for MemoryBroker {
    async fn publish(&self, channel: &str, payload: &str) -> Result<usize, TransportError> {
        self.inner.check_online()?;
        let clients = self.inner.clients.lock();
        let mut receivers = 0;
        for client in clients.values().filter(|c| c.channels.contains(channel)) {
            let event = PushEvent::Message {
                channel: channel.to_string(),
                payload: payload.to_string(),
            };
            if client.sender.send(event).is_ok() {
                receivers += 1;
            }
        }
        Ok(receivers)
    }

    async fn open_receiver(
        &self,
        client_name: &str,
    ) -> Result<Box<dyn ReceiveConnection>, TransportError> {
        self.inner.check_online()?;
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = mpsc::unbounded_channel();
        self.inner.clients.lock().insert(
            id,
            Client {
                name: client_name.to_string(),
                channels: BTreeSet::new(),
                sender,
            },
        );
        Ok(Box::new(MemoryReceiveConnection {
            id,
            broker: Arc::clone(&self.inner),
            receiver,
        }))
    }

    async fn subscription_count(&self, client_name: &str) -> Result<usize, TransportError> {
        self.inner.check_online()?;
        Ok(self
            .inner
            .clients
            .lock()
            .values()
            .filter(|c| c.name == client_name)
            .map(|c| c.channels.len())
            .sum())
    }

    async fn active_channels(&self) -> Result<Vec<String>, TransportError> {
        self.inner.check_online()?;
        let clients = self.inner.clients.lock();
        let channels: BTreeSet<&String> = clients.values().flat_map(|c| &c.channels).collect();
        Ok(channels.into_iter().cloned().collect())
    }

    async fn shutdown(&self) {}
}

/// Receive side of a [`MemoryBroker`] client.
pub struct MemoryReceiveConnection {
    id: u64,
    broker: Arc<BrokerInner>,
    receiver: mpsc::UnboundedReceiver<PushEvent>,
}

impl MemoryReceiveConnection {
    fn update(&self, channels: &[String], add: bool) -> Result<(), TransportError> {
        self.broker.check_online()?;
        let mut clients = self.broker.clients.lock();
        let client = clients
            .get_mut(&self.id)
            .ok_or(TransportError::ConnectionClosed)?;

        for channel in channels {
            if add {
                client.channels.insert(channel.clone());
            } else {
                client.channels.remove(channel);
            }
            let count = client.channels.len();
            let ack = if add {
                PushEvent::Subscribed {
                    channel: channel.clone(),
                    count,
                }
            } else {
                PushEvent::Unsubscribed {
                    channel: channel.clone(),
                    count,
                }
            };
            let _ = client.sender.send(ack);
        }
        Ok(())
    }
}

#[async_trait]
impl ReceiveConnection for MemoryReceiveConnection {
    async fn subscribe(&mut self, channels: &[String]) -> Result<(), TransportError> {
        self.update(channels, true)
    }

    async fn unsubscribe(&mut self, channels: &[String]) -> Result<(), TransportError> {
        self.update(channels, false)
    }

    async fn next_event(&mut self) -> Result<Option<PushEvent>, TransportError> {
        Ok(self.receiver.recv().await)
    }

    async fn close(&mut self) {
        self.broker.disconnect(self.id);
        self.receiver.close();
    }
}

impl Drop for MemoryReceiveConnection {
    fn drop(&mut self) {
        self.broker.disconnect(self.id);
    }
}
