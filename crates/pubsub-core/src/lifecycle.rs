//! # Bus Lifecycle
//!
//! ```text
//! Created ──start──► Running ──shutdown──► ShuttingDown ──► Stopped
//! ```
//!
//! Only the first shutdown caller performs the teardown; every later caller
//! waits on the same watch channel until `Stopped` is observed. The claim is
//! held by a [`ShutdownGuard`], so a teardown whose future is dropped half way
//! still ends in `Stopped` instead of leaving later callers waiting forever.

use crate::error::BusError;
use tokio::sync::watch;
use tracing::warn;

/// Observable state of a bus instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BusState {
    Created,
    Running,
    ShuttingDown,
    Stopped,
}

impl BusState {
    #[must_use]
    pub fn is_running(self) -> bool {
        self == Self::Running
    }
}

/// State machine shared by every bus variant.
#[derive(Debug)]
pub struct Lifecycle {
    state: watch::Sender<BusState>,
}

impl Lifecycle {
    #[must_use]
    pub fn new() -> Self {
        let (state, _) = watch::channel(BusState::Created);
        Self { state }
    }

    /// Move `Created -> Running`. Returns false for any other origin state.
    pub fn start(&self) -> bool {
        self.state.send_if_modified(|state| {
            if *state == BusState::Created {
                *state = BusState::Running;
                true
            } else {
                false
            }
        })
    }

    #[must_use]
    pub fn state(&self) -> BusState {
        *self.state.borrow()
    }

    /// Fail with [`BusError::NotRunning`] unless the bus is running.
    pub fn ensure_running(&self) -> Result<(), BusError> {
        match self.state() {
            BusState::Running => Ok(()),
            state => Err(BusError::NotRunning { state }),
        }
    }

    /// Claim the shutdown. Exactly one caller gets `true`.
    pub fn begin_shutdown(&self) -> bool {
        self.state.send_if_modified(|state| match *state {
            BusState::Created | BusState::Running => {
                *state = BusState::ShuttingDown;
                true
            }
            BusState::ShuttingDown | BusState::Stopped => false,
        })
    }

    /// Claim the shutdown and hold the claim in a guard. `None` when another
    /// caller already claimed it.
    #[must_use]
    pub fn claim_shutdown(&self) -> Option<ShutdownGuard<'_>> {
        self.begin_shutdown().then(|| ShutdownGuard {
            lifecycle: self,
            on_abandon: None,
            completed: false,
        })
    }

    pub fn finish_shutdown(&self) {
        self.state.send_replace(BusState::Stopped);
    }

    /// Wait until the claiming caller has finished the teardown.
    pub async fn wait_stopped(&self) {
        let mut rx = self.state.subscribe();
        // The sender lives in `self`, so the channel cannot close here.
        let _ = rx.wait_for(|state| *state == BusState::Stopped).await;
    }
}

/// Claim on a running teardown. Dropping it moves the bus to `Stopped`.
///
/// If the guard is dropped before [`ShutdownGuard::complete`], the teardown
/// was abandoned: the `on_abandon` hook releases what it can synchronously
/// before the state flips.
pub struct ShutdownGuard<'a> {
    lifecycle: &'a Lifecycle,
    on_abandon: Option<Box<dyn FnOnce() + Send + 'a>>,
    completed: bool,
}

impl<'a> ShutdownGuard<'a> {
    /// Register the synchronous cleanup for an abandoned teardown.
    #[must_use]
    pub fn on_abandon(mut self, cleanup: impl FnOnce() + Send + 'a) -> Self {
        self.on_abandon = Some(Box::new(cleanup));
        self
    }

    /// The teardown ran to the end.
    pub fn complete(mut self) {
        self.completed = true;
    }
}

impl Drop for ShutdownGuard<'_> {
    fn drop(&mut self) {
        if !self.completed {
            warn!("Shutdown abandoned before completion, forcing stop");
            if let Some(cleanup) = self.on_abandon.take() {
                cleanup();
            }
        }
        self.lifecycle.finish_shutdown();
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}
