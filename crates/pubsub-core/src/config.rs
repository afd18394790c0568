//! Bus configuration from environment variables.

use crate::retry::env_millis;
use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Default upper bound on concurrently running deliveries.
pub const DEFAULT_MAX_WORKERS: usize = 5;

/// Default time shutdown waits for in-flight deliveries.
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Configuration for the in-process bus and its worker pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalBusConfig {
    /// Max deliveries running at once
    pub max_workers: usize,

    /// How long shutdown drains in-flight deliveries
    pub drain_timeout: Duration,
}

impl Default for LocalBusConfig {
    fn default() -> Self {
        Self {
            max_workers: DEFAULT_MAX_WORKERS,
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
        }
    }
}

impl LocalBusConfig {
    /// Create configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `PUBSUB_LOCAL_MAX_THREADS`: Max concurrent deliveries (default: 5)
    /// - `PUBSUB_DRAIN_TIMEOUT_MS`: Shutdown drain timeout (default: 5000)
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            max_workers: env::var("PUBSUB_LOCAL_MAX_THREADS")
                .ok()
                .and_then(|v| v.trim().parse().ok())
                .filter(|n| *n > 0)
                .unwrap_or(DEFAULT_MAX_WORKERS),

            drain_timeout: env_millis("PUBSUB_DRAIN_TIMEOUT_MS").unwrap_or(DEFAULT_DRAIN_TIMEOUT),
        }
    }
}

/// Which bus variant the process should run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BusKind {
    /// In-process fan-out.
    #[default]
    Local,
    /// Relay through an in-memory broker (single process, for tests).
    Memory,
    /// Relay through Redis pub/sub.
    Redis,
}

impl BusKind {
    /// Read `PUBSUB_BUS`; unknown or unset values fall back to `Local`.
    #[must_use]
    pub fn from_env() -> Self {
        env::var("PUBSUB_BUS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or_default()
    }
}

impl FromStr for BusKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "memory" => Ok(Self::Memory),
            "redis" => Ok(Self::Redis),
            other => Err(format!("unknown bus kind '{other}'")),
        }
    }
}

impl fmt::Display for BusKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Local => "local",
            Self::Memory => "memory",
            Self::Redis => "redis",
        })
    }
}
