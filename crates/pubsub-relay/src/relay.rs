//! # Relay Bus
//!
//! Makes the bus contract work across processes by relaying messages
//! through a [`PubsubTransport`], while keeping exactly one physical
//! subscription per channel that has local subscribers.
//!
//! ```text
//!  subscribe ─┐                              ┌──────────────────────┐
//!  unsubscribe├─► listener lock ─ commands ─►│ receive worker       │
//!             │   (physical set)             │  one connection      │
//!             │                              │  SUBSCRIBE/UNSUB     │
//!             └─► bounded wait on            │  message ─► deliver  │
//!                 subscription_count         └──────────┬───────────┘
//!                                                       │
//!  publish ─► validate ─► enrich ─► JSON ─► transport ──┘ (any instance)
//! ```
//!
//! ## Rules
//!
//! - The receive worker starts on the first subscribe, not at construction
//! - Confirmation timeouts are logged; the local subscription stays effective
//! - A dead or incomplete receive connection is rebuilt on the next subscribe
//! - Publish never takes the listener lock
//! - Inbound messages carry properties only; an [`AccessResolver`] may
//!   re-attach their access-control association

use crate::config::RelayConfig;
use crate::transport::{PubsubTransport, PushEvent, ReceiveConnection};
use async_trait::async_trait;
use parking_lot::RwLock;
use pubsub_core::{
    prepare_publish, validate_channel, wait_until, AccessResolver, Authentication, BusError,
    BusState, ChannelSubscriber, DeliveryPool, EnricherChain, EventFilter, Lifecycle, Message,
    PubsubBus, Registration, Removal, Subscription, SubscriptionTable, TransportError, WaitError,
    WaitPolicy,
};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

type Reply = oneshot::Sender<Result<(), TransportError>>;

/// Structural change applied by the receive worker.
enum Command {
    Subscribe { channels: Vec<String>, reply: Reply },
    Unsubscribe { channels: Vec<String>, reply: Reply },
}

struct ReceiveWorker {
    commands: mpsc::UnboundedSender<Command>,
    handle: JoinHandle<()>,
}

impl ReceiveWorker {
    /// False once the receive loop has exited, for whatever reason.
    fn is_alive(&self) -> bool {
        !self.handle.is_finished() && !self.commands.is_closed()
    }
}

/// State guarded by the listener lock.
#[derive(Default)]
struct Listener {
    /// Channels subscribed on the receive connection.
    physical: BTreeSet<String>,
    /// Task owning the receive connection, started on first subscribe.
    worker: Option<ReceiveWorker>,
}

/// What the receive worker needs to deliver inbound messages.
#[derive(Clone)]
struct Inbound {
    subscriptions: Arc<RwLock<SubscriptionTable>>,
    pool: DeliveryPool,
    resolver: Option<Arc<dyn AccessResolver>>,
}

impl Inbound {
    fn dispatch(&self, channel: &str, payload: &str) {
        let mut message = match Message::from_json(payload) {
            Ok(message) => message,
            Err(e) => {
                warn!(channel, error = %e, "Dropping malformed inbound payload");
                return;
            }
        };
        if let Some(resolver) = &self.resolver {
            message.set_access(resolver.resolve(&message));
        }

        let subscriptions = self.subscriptions.read().subscriptions(channel);
        if subscriptions.is_empty() {
            trace!(channel, "Inbound message without local subscribers");
            return;
        }
        self.pool.schedule(Arc::new(message), subscriptions);
    }
}

/// Bus relayed through an external pub/sub transport.
pub struct RelayBus {
    /// Publishes, receive connections and subscription counts.
    transport: Arc<dyn PubsubTransport>,
    /// Random UUID naming this bus's receive connection on the transport.
    client_name: String,
    /// Created/Running/ShuttingDown/Stopped state, shared by every operation.
    lifecycle: Lifecycle,
    /// Bound on waiting for the transport to confirm a physical change.
    policy: WaitPolicy,
    /// How long shutdown waits for running deliveries.
    drain_timeout: Duration,
    /// Serializes structural changes: physical set and receive worker.
    listener: Mutex<Listener>,
    /// Local subscriptions, delivery pool and resolver used by the worker.
    inbound: Inbound,
    /// Enrichers applied to every published message, in registration order.
    enrichers: EnricherChain,
    /// Cancelled on shutdown or drop; stops the worker and confirmation waits.
    cancel: CancellationToken,
    /// Messages handed to the transport.
    events_published: AtomicU64,
}

impl RelayBus {
    /// Create a running bus. No connection is opened until first subscribe.
    #[must_use]
    pub fn new(transport: Arc<dyn PubsubTransport>, config: RelayConfig) -> Self {
        let bus = Self {
            transport,
            client_name: Uuid::new_v4().to_string(),
            lifecycle: Lifecycle::new(),
            policy: config.confirm,
            drain_timeout: config.delivery.drain_timeout,
            listener: Mutex::new(Listener::default()),
            inbound: Inbound {
                subscriptions: Arc::new(RwLock::new(SubscriptionTable::new())),
                pool: DeliveryPool::new(config.delivery.max_workers),
                resolver: None,
            },
            enrichers: EnricherChain::new(),
            cancel: CancellationToken::new(),
            events_published: AtomicU64::new(0),
        };
        bus.lifecycle.start();
        bus
    }

    /// Re-attach access control to inbound messages with `resolver`.
    #[must_use]
    pub fn with_resolver(mut self, resolver: Arc<dyn AccessResolver>) -> Self {
        self.inbound.resolver = Some(resolver);
        self
    }

    /// Name of the receive connection on the transport.
    #[must_use]
    pub fn client_name(&self) -> &str {
        &self.client_name
    }

    /// Channels this bus believes are physically subscribed, sorted.
    pub async fn physical_channels(&self) -> Vec<String> {
        self.listener.lock().await.physical.iter().cloned().collect()
    }

    /// Channels with at least one subscriber on the transport, sorted.
    pub async fn transport_channels(&self) -> Result<Vec<String>, BusError> {
        Ok(self.transport.active_channels().await?)
    }

    /// Physical subscriptions the transport reports for this bus.
    pub async fn confirmed_subscriptions(&self) -> Result<usize, BusError> {
        Ok(self.transport.subscription_count(&self.client_name).await?)
    }

    /// Channels with at least one local subscription, sorted.
    #[must_use]
    pub fn channel_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .inbound
            .subscriptions
            .read()
            .channels()
            .map(str::to_owned)
            .collect();
        names.sort();
        names
    }

    #[must_use]
    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.inbound.subscriptions.read().subscriber_count(channel)
    }

    /// Messages handed to the transport since creation.
    #[must_use]
    pub fn events_published(&self) -> u64 {
        self.events_published.load(Ordering::Relaxed)
    }

    /// True when the receive connection no longer carries every channel in
    /// the physical set: the worker exited, or the transport lost some of
    /// its subscriptions.
    async fn needs_recovery(&self, listener: &Listener) -> bool {
        if listener.physical.is_empty() {
            return false;
        }
        if !listener.worker.as_ref().is_some_and(ReceiveWorker::is_alive) {
            return true;
        }
        match self.transport.subscription_count(&self.client_name).await {
            Ok(count) => count < listener.physical.len(),
            Err(e) => {
                debug!(error = %e, "Subscription count unavailable, assuming worker healthy");
                false
            }
        }
    }

    /// Subscribe `channel` on the receive connection. With `recover`, or when
    /// the worker cannot take the command, a new worker is started with the
    /// whole physical set.
    async fn add_physical(
        &self,
        listener: &mut Listener,
        channel: &str,
        recover: bool,
    ) -> Result<(), BusError> {
        let sent = match listener.worker.as_ref().filter(|w| !recover && w.is_alive()) {
            Some(worker) => {
                let channels = vec![channel.to_string()];
                send_command(worker, |reply| Command::Subscribe { channels, reply }).await
            }
            None => Err(TransportError::ConnectionClosed.into()),
        };

        if let Err(e) = sent {
            // First subscribe, or the connection died: resubscribe everything.
            self.lifecycle.ensure_running()?;
            let mut wanted = listener.physical.clone();
            wanted.insert(channel.to_string());
            let initial: Vec<String> = wanted.into_iter().collect();
            if let Some(old) = listener.worker.take() {
                warn!(
                    client = %self.client_name,
                    error = %e,
                    channels = initial.len(),
                    "Receive worker gone, restarting"
                );
                old.handle.abort();
            }
            listener.worker = Some(self.start_worker(&initial).await?);
        }

        listener.physical.insert(channel.to_string());
        self.confirm(listener.physical.len(), "subscribe", channel).await;
        Ok(())
    }

    async fn remove_physical(&self, listener: &mut Listener, channel: &str) -> Result<(), BusError> {
        if !listener.physical.remove(channel) {
            return Ok(());
        }
        let Some(worker) = listener.worker.as_ref().filter(|w| w.is_alive()) else {
            // Nothing is subscribed on a dead connection.
            return Ok(());
        };
        let channels = vec![channel.to_string()];
        send_command(worker, |reply| Command::Unsubscribe { channels, reply }).await?;
        self.confirm(listener.physical.len(), "unsubscribe", channel).await;
        Ok(())
    }

    async fn start_worker(&self, initial: &[String]) -> Result<ReceiveWorker, BusError> {
        let mut conn = self.transport.open_receiver(&self.client_name).await?;
        if let Err(e) = conn.subscribe(initial).await {
            conn.close().await;
            return Err(e.into());
        }

        let (commands, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(receive_loop(
            conn,
            rx,
            self.inbound.clone(),
            self.cancel.clone(),
            self.client_name.clone(),
        ));
        info!(client = %self.client_name, channels = initial.len(), "Receive worker started");
        Ok(ReceiveWorker { commands, handle })
    }

    /// Bounded wait until the transport reports `expected` subscriptions.
    async fn confirm(&self, expected: usize, action: &str, channel: &str) {
        let transport = &self.transport;
        let client = self.client_name.as_str();
        let result = wait_until(self.policy, &self.cancel, move || async move {
            match transport.subscription_count(client).await {
                Ok(count) => count == expected,
                Err(e) => {
                    debug!(error = %e, "Subscription count unavailable");
                    false
                }
            }
        })
        .await;

        match result {
            Ok(attempts) => {
                debug!(channel, action, expected, attempts, "Physical subscription confirmed");
            }
            Err(WaitError::TimedOut { attempts, elapsed }) => {
                warn!(
                    channel,
                    action,
                    expected,
                    attempts,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Physical subscription not confirmed in time"
                );
            }
            Err(WaitError::Cancelled) => {
                debug!(channel, action, "Confirmation wait cancelled by shutdown");
            }
        }
    }
}

async fn send_command(
    worker: &ReceiveWorker,
    command: impl FnOnce(Reply) -> Command,
) -> Result<(), BusError> {
    let (reply, rx) = oneshot::channel();
    worker
        .commands
        .send(command(reply))
        .map_err(|_| TransportError::ConnectionClosed)?;
    rx.await.map_err(|_| TransportError::ConnectionClosed)??;
    Ok(())
}

async fn receive_loop(
    mut conn: Box<dyn ReceiveConnection>,
    mut commands: mpsc::UnboundedReceiver<Command>,
    inbound: Inbound,
    cancel: CancellationToken,
    client: String,
) {
    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                debug!(client = %client, "Receive worker cancelled");
                break;
            }

            command = commands.recv() => match command {
                Some(Command::Subscribe { channels, reply }) => {
                    let _ = reply.send(conn.subscribe(&channels).await);
                }
                Some(Command::Unsubscribe { channels, reply }) => {
                    let _ = reply.send(conn.unsubscribe(&channels).await);
                }
                None => break,
            },

            event = conn.next_event() => match event {
                Ok(Some(PushEvent::Message { channel, payload })) => {
                    inbound.dispatch(&channel, &payload);
                }
                Ok(Some(PushEvent::Subscribed { channel, count })) => {
                    trace!(client = %client, channel = %channel, count, "Subscribed");
                }
                Ok(Some(PushEvent::Unsubscribed { channel, count })) => {
                    trace!(client = %client, channel = %channel, count, "Unsubscribed");
                }
                Ok(None) => {
                    warn!(client = %client, "Receive connection closed by transport");
                    break;
                }
                Err(e) => {
                    error!(client = %client, error = %e, "Receive worker failed");
                    break;
                }
            },
        }
    }
    conn.close().await;
}

impl Drop for RelayBus {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[async_trait]
impl PubsubBus for RelayBus {
    async fn publish(&self, mut message: Message) -> Result<(), BusError> {
        self.lifecycle.ensure_running()?;
        let channel = prepare_publish(&mut message, &self.enrichers)?;
        let payload = message.to_json()?;

        let receivers = self.transport.publish(&channel, &payload).await?;
        self.events_published.fetch_add(1, Ordering::Relaxed);
        debug!(channel = %channel, receivers, "Message relayed");
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

        let mut listener = self.listener.lock().await;
        // Shutdown may have started while waiting for the lock.
        self.lifecycle.ensure_running()?;

        let recover = self.needs_recovery(&listener).await;
        if recover || !listener.physical.contains(channel) {
            self.add_physical(&mut listener, channel, recover).await?;
        }

        let name = subscriber.name().to_string();
        let registration = self
            .inbound
            .subscriptions
            .write()
            .upsert(Subscription::new(channel, subscriber, auth, filter));
        match registration {
            Registration::Added { .. } => debug!(channel, subscriber = %name, "Subscription added"),
            Registration::Replaced => debug!(channel, subscriber = %name, "Subscription replaced"),
        }
        Ok(())
    }

    async fn unsubscribe(
        &self,
        channel: &str,
        subscriber: &Arc<dyn ChannelSubscriber>,
    ) -> Result<(), BusError> {
        self.lifecycle.ensure_running()?;

        let mut listener = self.listener.lock().await;
        self.lifecycle.ensure_running()?;

        let removal = self.inbound.subscriptions.write().remove(channel, subscriber);
        debug!(channel, subscriber = subscriber.name(), ?removal, "Unsubscribed");
        if removal == (Removal::Removed { last_on_channel: true }) {
            self.remove_physical(&mut listener, channel).await?;
        }
        Ok(())
    }

    async fn shutdown(&self) {
        let Some(guard) = self.lifecycle.claim_shutdown() else {
            self.lifecycle.wait_stopped().await;
            return;
        };
        let guard = guard.on_abandon(|| {
            if let Ok(mut listener) = self.listener.try_lock() {
                listener.physical.clear();
                if let Some(worker) = listener.worker.take() {
                    worker.handle.abort();
                }
            }
            self.inbound.pool.abort();
            self.inbound.subscriptions.write().clear();
        });

        info!(client = %self.client_name, "Shutting down relay bus");
        // Wakes the receive worker and any confirmation wait holding the lock.
        self.cancel.cancel();

        let worker = {
            let mut listener = self.listener.lock().await;
            listener.physical.clear();
            listener.worker.take()
        };
        if let Some(worker) = worker {
            if let Err(e) = worker.handle.await {
                warn!(error = %e, "Receive worker ended abnormally");
            }
        }

        self.inbound.pool.shutdown(self.drain_timeout).await;
        self.transport.shutdown().await;
        self.inbound.subscriptions.write().clear();
        guard.complete();
        info!(client = %self.client_name, "Relay bus stopped");
    }

    fn state(&self) -> BusState {
        self.lifecycle.state()
    }

    fn enrichers(&self) -> &EnricherChain {
        &self.enrichers
    }
}
