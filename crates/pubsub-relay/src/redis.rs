//! # Redis Transport
//!
//! [`PubsubTransport`] over Redis pub/sub, on the `redis` crate.
//!
//! | Operation            | Connection                   | Command                   |
//! |----------------------|------------------------------|---------------------------|
//! | publish              | shared [`ConnectionManager`] | `PUBLISH channel payload` |
//! | active channels      | shared [`ConnectionManager`] | `PUBSUB CHANNELS *`       |
//! | open receiver        | dedicated [`PubSub`]         | `SUBSCRIBE`/`UNSUBSCRIBE` |
//! | subscription count   | acknowledged `SUBSCRIBE`s of the receivers opened under a name |
//!
//! The manager multiplexes requests over one connection and reconnects
//! after failures. Replies are matched to requests by the client, so a
//! publish abandoned mid-flight never hands its reply to the next caller.
//!
//! A [`PubSub`] connection only accepts subscribe-mode commands, so it cannot
//! be named with `CLIENT SETNAME`. Instead each receiver records how many
//! subscriptions the server acknowledged on it, and drops to zero as soon as
//! its stream ends.

use crate::config::RedisConfig;
use crate::transport::{PubsubTransport, PushEvent, ReceiveConnection};
use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use pubsub_core::TransportError;
use ::redis::aio::{ConnectionManager, PubSub};
use ::redis::{Client, ErrorKind, RedisError};
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Acknowledged subscriptions per open receive connection.
#[derive(Debug, Default)]
struct Acknowledged {
    receivers: Mutex<HashMap<u64, (String, usize)>>,
    next_id: AtomicU64,
}

impl Acknowledged {
    fn register(&self, client_name: &str) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.receivers
            .lock()
            .insert(id, (client_name.to_string(), 0));
        id
    }

    fn record(&self, id: u64, count: usize) {
        if let Some((_, acknowledged)) = self.receivers.lock().get_mut(&id) {
            *acknowledged = count;
        }
    }

    fn release(&self, id: u64) {
        self.receivers.lock().remove(&id);
    }

    fn count(&self, client_name: &str) -> usize {
        self.receivers
            .lock()
            .values()
            .filter(|(name, _)| name == client_name)
            .map(|(_, count)| count)
            .sum()
    }
}

pub struct RedisTransport {
    config: RedisConfig,
    client: Client,
    /// Created on first publish or query, dropped on shutdown.
    manager: tokio::sync::Mutex<Option<ConnectionManager>>,
    closed: AtomicBool,
    acknowledged: Arc<Acknowledged>,
}

impl RedisTransport {
    /// Create a transport. No connection is opened until first use.
    ///
    /// Fails only if the configuration does not form a valid Redis URL.
    pub fn new(config: RedisConfig) -> Result<Self, TransportError> {
        let client = Client::open(config.url().as_str()).map_err(transport_error)?;
        Ok(Self {
            config,
            client,
            manager: tokio::sync::Mutex::new(None),
            closed: AtomicBool::new(false),
            acknowledged: Arc::new(Acknowledged::default()),
        })
    }

    #[must_use]
    pub fn config(&self) -> &RedisConfig {
        &self.config
    }

    fn ensure_open(&self) -> Result<(), TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::ConnectionClosed);
        }
        Ok(())
    }

    async fn manager(&self) -> Result<ConnectionManager, TransportError> {
        let mut slot = self.manager.lock().await;
        self.ensure_open()?;
        if let Some(manager) = slot.as_ref() {
            return Ok(manager.clone());
        }

        let connect = ConnectionManager::new(self.client.clone());
        let manager = tokio::time::timeout(self.config.connect_timeout, connect)
            .await
            .map_err(|_| TransportError::ConnectTimeout)?
            .map_err(transport_error)?;
        debug!(url = %self.config.url(), "Connected to Redis");
        *slot = Some(manager.clone());
        Ok(manager)
    }
}

impl std::fmt::Debug for RedisTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisTransport")
            .field("config", &self.config)
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl PubsubTransport for RedisTransport {
    async fn publish(&self, channel: &str, payload: &str) -> Result<usize, TransportError> {
        let mut conn = self.manager().await?;
        let receivers: usize = ::redis::cmd("PUBLISH")
            .arg(channel)
            .arg(payload)
            .query_async(&mut conn)
            .await
            .map_err(transport_error)?;
        Ok(receivers)
    }

    async fn open_receiver(
        &self,
        client_name: &str,
    ) -> Result<Box<dyn ReceiveConnection>, TransportError> {
        self.ensure_open()?;
        let connect = self.client.get_async_pubsub();
        let pubsub = tokio::time::timeout(self.config.connect_timeout, connect)
            .await
            .map_err(|_| TransportError::ConnectTimeout)?
            .map_err(transport_error)?;

        let id = self.acknowledged.register(client_name);
        debug!(client = client_name, url = %self.config.url(), "Opened receive connection");
        Ok(Box::new(RedisReceiveConnection {
            pubsub,
            id,
            channels: BTreeSet::new(),
            acknowledged: Arc::clone(&self.acknowledged),
        }))
    }

    async fn subscription_count(&self, client_name: &str) -> Result<usize, TransportError> {
        Ok(self.acknowledged.count(client_name))
    }

    async fn active_channels(&self) -> Result<Vec<String>, TransportError> {
        let mut conn = self.manager().await?;
        let mut channels: Vec<String> = ::redis::cmd("PUBSUB")
            .arg("CHANNELS")
            .arg("*")
            .query_async(&mut conn)
            .await
            .map_err(transport_error)?;
        channels.sort();
        Ok(channels)
    }

    async fn shutdown(&self) {
        self.closed.store(true, Ordering::Release);
        if self.manager.lock().await.take().is_some() {
            debug!(url = %self.config.url(), "Released Redis connection");
        }
    }
}

/// Dedicated connection in subscribe mode.
pub struct RedisReceiveConnection {
    pubsub: PubSub,
    id: u64,
    channels: BTreeSet<String>,
    acknowledged: Arc<Acknowledged>,
}

#[async_trait]
impl ReceiveConnection for RedisReceiveConnection {
    async fn subscribe(&mut self, channels: &[String]) -> Result<(), TransportError> {
        for channel in channels {
            self.pubsub
                .subscribe(channel.as_str())
                .await
                .map_err(transport_error)?;
            self.channels.insert(channel.clone());
            self.acknowledged.record(self.id, self.channels.len());
        }
        Ok(())
    }

    async fn unsubscribe(&mut self, channels: &[String]) -> Result<(), TransportError> {
        for channel in channels {
            self.pubsub
                .unsubscribe(channel.as_str())
                .await
                .map_err(transport_error)?;
            self.channels.remove(channel);
            self.acknowledged.record(self.id, self.channels.len());
        }
        Ok(())
    }

    async fn next_event(&mut self) -> Result<Option<PushEvent>, TransportError> {
        loop {
            let Some(msg) = self.pubsub.on_message().next().await else {
                // The server forgets every subscription with the socket.
                self.channels.clear();
                self.acknowledged.release(self.id);
                return Ok(None);
            };
            match msg.get_payload::<String>() {
                Ok(payload) => {
                    return Ok(Some(PushEvent::Message {
                        channel: msg.get_channel_name().to_string(),
                        payload,
                    }));
                }
                Err(e) => {
                    warn!(channel = msg.get_channel_name(), error = %e, "Dropping undecodable payload");
                }
            }
        }
    }

    async fn close(&mut self) {
        // Subscriptions end with the socket when the connection is dropped.
        self.channels.clear();
        self.acknowledged.release(self.id);
    }
}

impl Drop for RedisReceiveConnection {
    fn drop(&mut self) {
        self.acknowledged.release(self.id);
    }
}

fn transport_error(e: RedisError) -> TransportError {
    if e.is_connection_dropped() {
        return TransportError::ConnectionClosed;
    }
    match e.kind() {
        ErrorKind::ResponseError | ErrorKind::ExtensionError => TransportError::Server(e.to_string()),
        _ => TransportError::Client(Box::new(e)),
    }
}
