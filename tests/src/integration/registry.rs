//! # Registry Flows
//!
//! The process-wide bus instance: lazy resolution through a replaceable
//! factory, and the override hook tests use to install their own bus.

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use pubsub_core::{
        Authentication, BusError, BusKind, BusRegistry, BusState, LocalBus, PubsubBus,
    };
    use pubsub_relay::{install_default_factory, selection, MemoryBroker, RelayBus, RelayConfig};

    use crate::support::{as_subscriber, event, RecordingSubscriber};

    fn counting_registry(builds: &Arc<AtomicUsize>) -> BusRegistry {
        let builds = Arc::clone(builds);
        BusRegistry::new(Arc::new(move || -> Result<Arc<dyn PubsubBus>, BusError> {
            builds.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(LocalBus::new()))
        }))
    }

    #[tokio::test]
    async fn test_bus_is_resolved_once() {
        let builds = Arc::new(AtomicUsize::new(0));
        let registry = counting_registry(&builds);
        assert!(!registry.is_resolved());

        let first = registry.bus().unwrap();
        let second = registry.bus().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(builds.load(Ordering::SeqCst), 1);

        registry.shutdown().await;
        assert_eq!(first.state(), BusState::Stopped);
        assert!(!registry.is_resolved());

        let third = registry.bus().unwrap();
        assert_eq!(third.state(), BusState::Running);
        assert_eq!(builds.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_override_replaces_resolved_bus() {
        let builds = Arc::new(AtomicUsize::new(0));
        let registry = counting_registry(&builds);
        let resolved = registry.bus().unwrap();

        let broker = MemoryBroker::new();
        let replacement: Arc<dyn PubsubBus> =
            Arc::new(RelayBus::new(Arc::new(broker.clone()), RelayConfig::default()));
        let previous = registry.override_bus(Arc::clone(&replacement));
        assert!(Arc::ptr_eq(&previous.unwrap(), &resolved));
        assert!(Arc::ptr_eq(&registry.bus().unwrap(), &replacement));
        assert_eq!(builds.load(Ordering::SeqCst), 1);

        // Code that resolves the bus now talks through the broker.
        let sub = RecordingSubscriber::new("sub");
        registry
            .bus()
            .unwrap()
            .subscribe("job", as_subscriber(&sub), Authentication::system(), None)
            .await
            .unwrap();
        assert_eq!(broker.client_count(), 1);
        registry
            .bus()
            .unwrap()
            .publish(event("job", "started"))
            .await
            .unwrap();
        assert_eq!(sub.wait_for_count(1).await, 1);

        registry.shutdown().await;
        assert_eq!(broker.client_count(), 0);
        resolved.shutdown().await;
    }

    #[tokio::test]
    async fn test_failing_factory_leaves_registry_unresolved() {
        let registry = BusRegistry::new(Arc::new(|| -> Result<Arc<dyn PubsubBus>, BusError> {
            Err(BusError::NoBusAvailable("transport unreachable".into()))
        }));
        assert!(matches!(registry.bus(), Err(BusError::NoBusAvailable(_))));
        assert!(!registry.is_resolved());

        registry.set_factory(Arc::new(|| -> Result<Arc<dyn PubsubBus>, BusError> {
            selection::build(BusKind::Memory)
        }));
        let bus = registry.bus().unwrap();
        assert_eq!(bus.state(), BusState::Running);
        registry.shutdown().await;
    }

    #[tokio::test]
    async fn test_default_factory_builds_from_environment() {
        let registry = BusRegistry::local();
        install_default_factory(&registry);
        let bus = registry.bus().unwrap();
        assert_eq!(bus.state(), BusState::Running);
        registry.shutdown().await;
        assert_eq!(bus.state(), BusState::Stopped);
    }

    #[tokio::test]
    async fn test_global_registry_accepts_override() {
        let global = BusRegistry::global();
        let installed: Arc<dyn PubsubBus> = Arc::new(LocalBus::new());
        global.override_bus(Arc::clone(&installed));
        assert!(Arc::ptr_eq(&BusRegistry::global().bus().unwrap(), &installed));
        global.shutdown().await;
        assert_eq!(installed.state(), BusState::Stopped);
    }
}
