//! # Bus Registry
//!
//! Resolves the process-wide bus once, on first use, through a replaceable
//! factory. Tests install their own instance with [`BusRegistry::override_bus`].

use crate::bus::PubsubBus;
use crate::error::BusError;
use crate::local::LocalBus;
use lazy_static::lazy_static;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info};

/// Builds the bus instance when the registry is first asked for one.
pub type BusFactory = Arc<dyn Fn() -> Result<Arc<dyn PubsubBus>, BusError> + Send + Sync>;

lazy_static! {
    static ref GLOBAL: BusRegistry = BusRegistry::local();
}

/// Lazily resolved, swappable bus holder.
pub struct BusRegistry {
    factory: Mutex<BusFactory>,
    instance: Mutex<Option<Arc<dyn PubsubBus>>>,
}

impl BusRegistry {
    #[must_use]
    pub fn new(factory: BusFactory) -> Self {
        Self {
            factory: Mutex::new(factory),
            instance: Mutex::new(None),
        }
    }

    /// Registry whose factory builds a [`LocalBus`] from the environment.
    #[must_use]
    pub fn local() -> Self {
        Self::new(Arc::new(|| -> Result<Arc<dyn PubsubBus>, BusError> {
            Ok(Arc::new(LocalBus::from_env()))
        }))
    }

    /// The process-wide registry. Defaults to a [`LocalBus`].
    #[must_use]
    pub fn global() -> &'static BusRegistry {
        &GLOBAL
    }

    /// Resolve the bus, building it on first call.
    pub fn bus(&self) -> Result<Arc<dyn PubsubBus>, BusError> {
        let mut instance = self.instance.lock();
        if let Some(bus) = instance.as_ref() {
            return Ok(Arc::clone(bus));
        }
        let factory = Arc::clone(&self.factory.lock());
        let bus = factory()?;
        info!("Bus instance resolved");
        *instance = Some(Arc::clone(&bus));
        Ok(bus)
    }

    /// Is a bus currently resolved?
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        self.instance.lock().is_some()
    }

    /// Replace the factory. Affects the next resolution only.
    pub fn set_factory(&self, factory: BusFactory) {
        *self.factory.lock() = factory;
    }

    /// Install `bus` directly. Returns the previously resolved instance.
    pub fn override_bus(&self, bus: Arc<dyn PubsubBus>) -> Option<Arc<dyn PubsubBus>> {
        debug!("Bus instance overridden");
        self.instance.lock().replace(bus)
    }

    /// Forget the resolved instance without shutting it down.
    pub fn reset(&self) -> Option<Arc<dyn PubsubBus>> {
        self.instance.lock().take()
    }

    /// Shut down and forget the resolved instance, if any.
    pub async fn shutdown(&self) {
        let bus = self.reset();
        if let Some(bus) = bus {
            bus.shutdown().await;
        }
    }
}

impl std::fmt::Debug for BusRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BusRegistry")
            .field("resolved", &self.is_resolved())
            .finish()
    }
}
