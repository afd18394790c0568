//! # Pubsub Telemetry
//!
//! Structured logging setup shared by pubsub-light binaries and tests.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use pubsub_telemetry::{init_tracing, TelemetryConfig};
//!
//! fn main() {
//!     let config = TelemetryConfig::from_env();
//!     init_tracing(&config).expect("Failed to init logging");
//!     // Bus activity is now logged with structured fields
//! }
//! ```
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `RUST_LOG` / `PUBSUB_LOG_LEVEL` | `info` | Log filter |
//! | `PUBSUB_JSON_LOGS` | `false` (`true` in containers) | JSON output |
//! | `PUBSUB_SERVICE_NAME` | `pubsub-light` | Service name |
//! | `NO_COLOR` | unset | Disable ANSI colors |

#![warn(missing_docs)]

mod config;
mod tracing_setup;

pub use config::TelemetryConfig;
pub use tracing_setup::{init_test_tracing, init_tracing};

use thiserror::Error;

/// Telemetry initialization errors
#[derive(Error, Debug)]
pub enum TelemetryError {
    /// The log filter directive could not be parsed
    #[error("Invalid log filter: {0}")]
    InvalidFilter(String),

    /// A global subscriber was already installed
    #[error("Global subscriber already initialized: {0}")]
    AlreadyInitialized(String),
}
