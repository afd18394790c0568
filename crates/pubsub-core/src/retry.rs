//! # Bounded Waits
//!
//! Polls a condition at a fixed interval until it holds, the deadline
//! passes or the caller is cancelled. Used to confirm that the transport
//! has applied a subscription change.

use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Default upper bound for a confirmation wait.
pub const DEFAULT_CONFIRM_TIMEOUT: Duration = Duration::from_secs(5);

/// Default gap between two checks.
pub const DEFAULT_CONFIRM_POLL: Duration = Duration::from_millis(10);

/// Timeout and poll interval for [`wait_until`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitPolicy {
    pub timeout: Duration,
    pub interval: Duration,
}

impl WaitPolicy {
    #[must_use]
    pub const fn new(timeout: Duration, interval: Duration) -> Self {
        Self { timeout, interval }
    }

    /// Read `PUBSUB_CONFIRM_TIMEOUT_MS` and `PUBSUB_CONFIRM_POLL_MS`.
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            timeout: env_millis("PUBSUB_CONFIRM_TIMEOUT_MS").unwrap_or(DEFAULT_CONFIRM_TIMEOUT),
            interval: env_millis("PUBSUB_CONFIRM_POLL_MS").unwrap_or(DEFAULT_CONFIRM_POLL),
        }
    }
}

impl Default for WaitPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_CONFIRM_TIMEOUT, DEFAULT_CONFIRM_POLL)
    }
}

/// Why a bounded wait gave up.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum WaitError {
    #[error("Condition not met after {attempts} attempts ({elapsed:?})")]
    TimedOut { attempts: u32, elapsed: Duration },

    #[error("Wait cancelled")]
    Cancelled,
}

/// Check until it returns true. Returns the number of checks made.
///
/// The check always runs at least once, even with a zero timeout.
pub async fn wait_until<F, Fut>(
    policy: WaitPolicy,
    cancel: &CancellationToken,
    mut check: F,
) -> Result<u32, WaitError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let started = Instant::now();
    let deadline = started + policy.timeout;
    let mut attempts = 0u32;

    loop {
        if cancel.is_cancelled() {
            return Err(WaitError::Cancelled);
        }
        attempts += 1;
        if check().await {
            return Ok(attempts);
        }
        if Instant::now() >= deadline {
            return Err(WaitError::TimedOut {
                attempts,
                elapsed: started.elapsed(),
            });
        }
        tokio::select! {
            () = cancel.cancelled() => return Err(WaitError::Cancelled),
            () = tokio::time::sleep(policy.interval) => {}
        }
    }
}

pub(crate) fn env_millis(name: &str) -> Option<Duration> {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_millis)
}
