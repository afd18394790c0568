//! Relay configuration from environment variables.

use pubsub_core::{LocalBusConfig, WaitPolicy};
use std::env;
use std::time::Duration;

/// Connection settings for a Redis server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedisConfig {
    /// Server host name
    pub host: String,

    /// Server port
    pub port: u16,

    /// Connect over TLS (`rediss://`)
    pub tls: bool,

    /// Max time to establish a connection
    pub connect_timeout: Duration,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 6379,
            tls: false,
            connect_timeout: Duration::from_secs(2),
        }
    }
}

impl RedisConfig {
    /// Create configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `PUBSUB_REDIS_HOST`: Redis host (default: localhost)
    /// - `PUBSUB_REDIS_PORT`: Redis port (default: 6379)
    /// - `PUBSUB_REDIS_SSL`: Connect over TLS (default: false)
    /// - `PUBSUB_REDIS_CONNECT_TIMEOUT_MS`: Connect timeout (default: 2000)
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            host: env::var("PUBSUB_REDIS_HOST").unwrap_or_else(|_| defaults.host.clone()),

            port: env::var("PUBSUB_REDIS_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(defaults.port),

            tls: env::var("PUBSUB_REDIS_SSL")
                .ok()
                .and_then(|v| parse_flag(&v))
                .unwrap_or(defaults.tls),

            connect_timeout: env::var("PUBSUB_REDIS_CONNECT_TIMEOUT_MS")
                .ok()
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_millis)
                .unwrap_or(defaults.connect_timeout),
        }
    }

    /// Connection URL, `rediss://` when TLS is enabled.
    #[must_use]
    pub fn url(&self) -> String {
        let scheme = if self.tls { "rediss" } else { "redis" };
        format!("{scheme}://{}:{}/", self.host, self.port)
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Settings of a relay bus independent of its transport.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelayConfig {
    /// Bounded wait for physical subscription changes
    pub confirm: WaitPolicy,

    /// Delivery pool size and drain timeout
    pub delivery: LocalBusConfig,
}

impl RelayConfig {
    /// See [`WaitPolicy::from_env`] and [`LocalBusConfig::from_env`].
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            confirm: WaitPolicy::from_env(),
            delivery: LocalBusConfig::from_env(),
        }
    }
}
