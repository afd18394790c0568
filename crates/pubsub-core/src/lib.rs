//! # Pubsub Core - Channel Based Publish/Subscribe
//!
//! Lightweight, best-effort, at-most-once event bus. Publishers post flat
//! property-bag [`Message`]s on named channels; subscribers register per
//! channel with an authentication context and an optional [`EventFilter`].
//!
//! ## Delivery Path
//!
//! ```text
//! ┌───────────┐  publish()  ┌──────────────┐   filter    ┌──────────────┐
//! │ Publisher │ ──────────► │  PubsubBus   │ ──────────► │ Subscriber A │
//! └───────────┘             │              │ permission  └──────────────┘
//!                           │ validate     │ ──────────► ┌──────────────┐
//!                           │ enrich       │   copy      │ Subscriber B │
//!                           └──────────────┘             └──────────────┘
//! ```
//!
//! ## Guarantees
//!
//! - **No ordering:** neither across channels nor between two messages to
//!   the same subscriber
//! - **Isolation:** a failing subscriber never affects others or the publisher
//! - **Fail-closed:** access-controlled messages whose object cannot be
//!   resolved reach nobody
//!
//! This crate holds the message model, the bus contract and the in-process
//! [`LocalBus`]. The distributed relay lives in `pubsub-relay`.

// Nursery lints that are too strict
#![allow(clippy::missing_const_for_fn)]
// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::panic))]

pub mod bus;
pub mod config;
pub mod dispatch;
pub mod enricher;
pub mod error;
pub mod filter;
pub mod lifecycle;
pub mod local;
pub mod message;
pub mod permission;
pub mod props;
pub mod registry;
pub mod retry;
pub mod subscriber;

// Re-export main types
pub use bus::{prepare_publish, validate_channel, PubsubBus};
pub use config::{BusKind, LocalBusConfig};
pub use dispatch::{deliver, DeliveryOutcome, DeliveryPool};
pub use enricher::{EnricherChain, MessageEnricher};
pub use error::{BusError, TransportError};
pub use filter::EventFilter;
pub use lifecycle::{BusState, Lifecycle, ShutdownGuard};
pub use local::LocalBus;
pub use message::Message;
pub use permission::{
    is_visible_to, AccessControlled, AccessResolver, Authentication, Permission, ProtectedObject,
};
pub use props::EventProps;
pub use registry::{BusFactory, BusRegistry};
pub use retry::{wait_until, WaitError, WaitPolicy};
pub use subscriber::{
    ChannelSubscriber, Registration, Removal, SubscriberList, Subscription, SubscriptionTable,
};
