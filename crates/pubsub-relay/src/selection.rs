//! Environment-driven bus selection for the process-wide registry.

use crate::config::{RedisConfig, RelayConfig};
use crate::memory::MemoryBroker;
use crate::redis::RedisTransport;
use crate::relay::RelayBus;
use pubsub_core::{BusError, BusKind, BusRegistry, LocalBus, PubsubBus};
use std::sync::Arc;
use tracing::info;

/// Build the bus variant named by `PUBSUB_BUS`.
pub fn bus_from_env() -> Result<Arc<dyn PubsubBus>, BusError> {
    build(BusKind::from_env())
}

/// Build a bus of the given kind, configured from the environment.
pub fn build(kind: BusKind) -> Result<Arc<dyn PubsubBus>, BusError> {
    info!(kind = %kind, "Selecting pubsub bus");
    let bus: Arc<dyn PubsubBus> = match kind {
        BusKind::Local => Arc::new(LocalBus::from_env()),
        BusKind::Memory => Arc::new(RelayBus::new(
            Arc::new(MemoryBroker::new()),
            RelayConfig::from_env(),
        )),
        BusKind::Redis => Arc::new(RelayBus::new(
            Arc::new(RedisTransport::new(RedisConfig::from_env())?),
            RelayConfig::from_env(),
        )),
    };
    Ok(bus)
}

/// Make `registry` resolve its bus through [`bus_from_env`].
pub fn install_default_factory(registry: &BusRegistry) {
    registry.set_factory(Arc::new(bus_from_env));
}
