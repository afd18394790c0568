//! # Pubsub Relay - Distributed Bus Backend
//!
//! Relays the bus contract of `pubsub-core` across processes through an
//! external pub/sub transport.
//!
//! ## Transports
//!
//! - [`RedisTransport`]: Redis pub/sub through the `redis` crate, plain TCP
//!   or TLS
//! - [`MemoryBroker`]: in-process broker with the same semantics, for tests
//!   and single-process deployments
//!
//! ## Wire Format
//!
//! One flat JSON object per message, published on the channel of the same
//! name. No envelope, no compression.

// Nursery lints that are too strict
#![allow(clippy::missing_const_for_fn)]
// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::panic))]

pub mod config;
pub mod memory;
pub mod redis;
pub mod relay;
pub mod selection;
pub mod transport;

// Re-export main types
pub use config::{RedisConfig, RelayConfig};
pub use memory::MemoryBroker;
pub use crate::redis::RedisTransport;
pub use relay::RelayBus;
pub use selection::{bus_from_env, install_default_factory};
pub use transport::{PubsubTransport, PushEvent, ReceiveConnection};
