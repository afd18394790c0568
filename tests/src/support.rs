//! Shared fixtures for the integration suites.

use async_trait::async_trait;
use parking_lot::Mutex;
use pubsub_core::{
    AccessControlled, Authentication, ChannelSubscriber, Message, Permission, ProtectedObject,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Max time a test waits for asynchronous deliveries.
pub const DELIVERY_TIMEOUT: Duration = Duration::from_secs(2);

/// Subscriber that keeps every message it receives.
#[derive(Debug, Default)]
pub struct RecordingSubscriber {
    name: String,
    received: Mutex<Vec<Message>>,
}

impl RecordingSubscriber {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            received: Mutex::new(Vec::new()),
        })
    }

    #[must_use]
    pub fn count(&self) -> usize {
        self.received.lock().len()
    }

    #[must_use]
    pub fn received(&self) -> Vec<Message> {
        self.received.lock().clone()
    }

    /// Poll until at least `count` messages arrived or the delivery timeout
    /// passes. Returns the final count.
    pub async fn wait_for_count(&self, count: usize) -> usize {
        let deadline = tokio::time::Instant::now() + DELIVERY_TIMEOUT;
        while self.count() < count && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        self.count()
    }

    /// Give stray deliveries a chance to arrive, then report the count.
    pub async fn settled_count(&self) -> usize {
        tokio::time::sleep(Duration::from_millis(100)).await;
        self.count()
    }
}

#[async_trait]
impl ChannelSubscriber for RecordingSubscriber {
    async fn on_message(&self, message: Message) -> anyhow::Result<()> {
        self.received.lock().push(message);
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Subscriber that always fails.
#[derive(Debug, Default)]
pub struct FailingSubscriber;

#[async_trait]
impl ChannelSubscriber for FailingSubscriber {
    async fn on_message(&self, _message: Message) -> anyhow::Result<()> {
        anyhow::bail!("subscriber rejected the message")
    }
}

/// Protected object whose read permission can be toggled.
#[derive(Debug)]
pub struct SwitchableFolder {
    readable: AtomicBool,
}

impl SwitchableFolder {
    #[must_use]
    pub fn new(readable: bool) -> Arc<Self> {
        Arc::new(Self {
            readable: AtomicBool::new(readable),
        })
    }

    pub fn set_readable(&self, readable: bool) {
        self.readable.store(readable, Ordering::SeqCst);
    }
}

impl ProtectedObject for SwitchableFolder {
    fn object_type(&self) -> &str {
        "folder"
    }

    fn has_permission(&self, auth: &Authentication, permission: &Permission) -> bool {
        auth.is_system() || (*permission == Permission::READ && self.readable.load(Ordering::SeqCst))
    }
}

/// Access association resolving to a [`SwitchableFolder`], or to nothing.
pub struct FolderAccess(pub Option<Arc<SwitchableFolder>>);

impl AccessControlled for FolderAccess {
    fn resolve(&self) -> Option<Arc<dyn ProtectedObject>> {
        self.0
            .as_ref()
            .map(|folder| Arc::clone(folder) as Arc<dyn ProtectedObject>)
    }
}

/// A message with channel and event set.
#[must_use]
pub fn event(channel: &str, name: &str) -> Message {
    Message::new().with_channel(channel).with_event(name)
}

/// Upcast a concrete subscriber for the bus API.
#[must_use]
pub fn as_subscriber<S: ChannelSubscriber + 'static>(subscriber: &Arc<S>) -> Arc<dyn ChannelSubscriber> {
    Arc::clone(subscriber) as Arc<dyn ChannelSubscriber>
}
