//! # Delivery
//!
//! Per-subscription delivery and the bounded worker pool it runs on.
//!
//! ```text
//! schedule(msg, [s1, s2, s3])
//!     │
//!     ├──► task ─► permit ─► filter ─► permission ─► s1.on_message(copy)
//!     ├──► task ─► permit ─► ...                      s2.on_message(copy)
//!     └──► task ─► permit ─► ...                      s3.on_message(copy)
//! ```
//!
//! Every (message, subscription) pair is its own task. At most
//! `max_workers` of them run a subscriber at any time; idle tasks do not
//! exist, so the pool shrinks to nothing between bursts.
//!
//! A failing or panicking subscriber is logged and does not affect others.

use crate::message::Message;
use crate::permission::is_visible_to;
use crate::subscriber::Subscription;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, warn};

/// What happened to one (message, subscription) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered,
    /// The subscription filter did not match.
    Filtered,
    /// The permission gate hid the message.
    Denied,
    /// The subscriber returned an error.
    Failed,
    /// The subscriber panicked.
    Panicked,
}

/// Filter, permission gate, then hand the subscriber its own copy.
pub async fn deliver(subscription: &Subscription, message: &Message) -> DeliveryOutcome {
    if let Some(filter) = subscription.filter() {
        if !message.contains_all(filter) {
            return DeliveryOutcome::Filtered;
        }
    }

    if !is_visible_to(message, subscription.auth()) {
        debug!(
            channel = subscription.channel(),
            principal = subscription.auth().principal(),
            "Message hidden by permission gate"
        );
        return DeliveryOutcome::Denied;
    }

    let subscriber = subscription.subscriber();
    let fut = subscriber.on_message(message.snapshot());
    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(Ok(())) => DeliveryOutcome::Delivered,
        Ok(Err(e)) => {
            warn!(
                channel = subscription.channel(),
                subscriber = subscriber.name(),
                error = %e,
                "Subscriber failed to handle message"
            );
            DeliveryOutcome::Failed
        }
        Err(panic_err) => {
            let info = if let Some(msg) = panic_err.downcast_ref::<&'static str>() {
                (*msg).to_string()
            } else if let Some(msg) = panic_err.downcast_ref::<String>() {
                msg.clone()
            } else {
                "unknown panic".to_string()
            };
            warn!(
                channel = subscription.channel(),
                subscriber = subscriber.name(),
                panic = %info,
                "Subscriber panicked while handling message"
            );
            DeliveryOutcome::Panicked
        }
    }
}

/// Shared, bounded, elastic pool that runs deliveries.
///
/// Cloning is cheap; clones share the same permits and task tracker.
#[derive(Debug, Clone)]
pub struct DeliveryPool {
    permits: Arc<Semaphore>,
    tracker: TaskTracker,
    cancel: CancellationToken,
    max_workers: usize,
}

impl DeliveryPool {
    /// Create a pool running at most `max_workers` deliveries at once.
    #[must_use]
    pub fn new(max_workers: usize) -> Self {
        let max_workers = max_workers.max(1);
        Self {
            permits: Arc::new(Semaphore::new(max_workers)),
            tracker: TaskTracker::new(),
            cancel: CancellationToken::new(),
            max_workers,
        }
    }

    #[must_use]
    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    /// Deliveries scheduled but not yet finished.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.cancel.is_cancelled() || self.permits.is_closed()
    }

    /// Schedule one delivery task per subscription. Returns how many were scheduled.
    ///
    /// Must be called from within a tokio runtime.
    pub fn schedule(&self, message: Arc<Message>, subscriptions: Vec<Subscription>) -> usize {
        if self.is_shut_down() {
            debug!("Delivery pool is shut down, message dropped");
            return 0;
        }

        let scheduled = subscriptions.len();
        for subscription in subscriptions {
            let message = Arc::clone(&message);
            let permits = Arc::clone(&self.permits);
            let cancel = self.cancel.clone();

            self.tracker.spawn(async move {
                let permit = tokio::select! {
                    biased;
                    () = cancel.cancelled() => None,
                    permit = permits.acquire_owned() => permit.ok(),
                };
                let Some(_permit) = permit else {
                    debug!(
                        channel = subscription.channel(),
                        "Delivery dropped, pool shutting down"
                    );
                    return;
                };
                deliver(&subscription, &message).await;
            });
        }
        scheduled
    }

    /// Stop accepting work and wait up to `grace` for running deliveries.
    ///
    /// Deliveries still queued or running after `grace` are abandoned.
    pub async fn shutdown(&self, grace: Duration) {
        self.tracker.close();
        if tokio::time::timeout(grace, self.tracker.wait()).await.is_err() {
            warn!(
                in_flight = self.tracker.len(),
                "Deliveries still running after drain timeout, abandoning them"
            );
        }
        self.abort();
    }

    /// Stop accepting work without waiting. Queued deliveries are dropped,
    /// running ones finish on their own.
    pub fn abort(&self) {
        self.tracker.close();
        self.cancel.cancel();
        self.permits.close();
    }
}
