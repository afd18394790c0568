//! # pubsub-light Test Suite
//!
//! Cross-crate tests exercising the bus contract through every backend.
//!
//! ## Structure
//!
//! ```text
//! tests/
//! ├── src/
//! │   ├── support.rs        # Recording subscribers, fixtures
//! │   └── integration/
//! │       ├── local_bus.rs  # In-process fan-out, filters, permissions
//! │       ├── relay_bus.rs  # Relay over the in-memory broker, chaos
//! │       └── registry.rs   # Process-wide instance and override hook
//! └── benches/
//!     └── bus_benchmarks.rs
//! ```
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test -p pubsub-tests
//! cargo test -p pubsub-tests integration::relay_bus::
//! cargo bench -p pubsub-tests
//! ```

pub mod integration;
pub mod support;
