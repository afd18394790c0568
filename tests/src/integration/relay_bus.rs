//! # Relay Bus Flows
//!
//! Several relay bus instances sharing one in-memory broker, standing in
//! for processes sharing a Redis server:
//!
//! 1. **Relay**: a publish on any instance reaches subscribers on all of them
//! 2. **Gating**: filters and the permission gate apply to relayed messages
//! 3. **Convergence**: after random concurrent subscribe/unsubscribe churn,
//!    the physical subscriptions match the channels with local subscribers
//! 4. **Lifecycle**: shutdown releases the receive connection

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::sync::Arc;
    use std::time::Duration;

    use pubsub_core::{
        AccessControlled, AccessResolver, Authentication, BusError, BusState, ChannelSubscriber,
        EventFilter, EventProps, LocalBusConfig, Message, PubsubBus, WaitPolicy,
    };
    use pubsub_relay::{MemoryBroker, RelayBus, RelayConfig};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    use crate::support::{as_subscriber, event, FolderAccess, RecordingSubscriber, SwitchableFolder};

    // =============================================================================
    // TEST FIXTURES
    // =============================================================================

    const CHANNELS: [&str; 5] = ["job", "run", "node", "queue", "item"];

    fn config() -> RelayConfig {
        RelayConfig {
            confirm: WaitPolicy::new(Duration::from_secs(1), Duration::from_millis(2)),
            delivery: LocalBusConfig {
                max_workers: 4,
                drain_timeout: Duration::from_secs(2),
            },
        }
    }

    fn relay(broker: &MemoryBroker) -> RelayBus {
        pubsub_telemetry::init_test_tracing();
        RelayBus::new(Arc::new(broker.clone()), config())
    }

    /// Resolves `object_name` of inbound messages against one folder.
    struct FolderResolver {
        folder: Arc<SwitchableFolder>,
    }

    impl AccessResolver for FolderResolver {
        fn resolve(&self, message: &Message) -> Option<Arc<dyn AccessControlled>> {
            message.object_name().map(|_| {
                Arc::new(FolderAccess(Some(Arc::clone(&self.folder)))) as Arc<dyn AccessControlled>
            })
        }
    }

    // =============================================================================
    // RELAY
    // =============================================================================

    #[tokio::test]
    async fn test_publish_reaches_every_instance() {
        let broker = MemoryBroker::new();
        let buses: Vec<_> = (0..3).map(|_| relay(&broker)).collect();
        let subscribers: Vec<_> = (0..3)
            .map(|i| RecordingSubscriber::new(format!("sub-{i}")))
            .collect();
        for (bus, sub) in buses.iter().zip(&subscribers) {
            bus.subscribe("job", as_subscriber(sub), Authentication::system(), None)
                .await
                .unwrap();
        }

        buses[0].publish(event("job", "started")).await.unwrap();
        buses[2].publish(event("job", "finished")).await.unwrap();

        for sub in &subscribers {
            assert_eq!(sub.wait_for_count(2).await, 2);
        }
        let names: BTreeSet<_> = subscribers[1]
            .received()
            .iter()
            .filter_map(|m| m.event_name().map(str::to_owned))
            .collect();
        assert_eq!(names, BTreeSet::from(["started".to_string(), "finished".to_string()]));

        for bus in &buses {
            bus.shutdown().await;
        }
        assert_eq!(broker.client_count(), 0);
    }

    #[tokio::test]
    async fn test_relayed_properties_survive_the_wire() {
        let broker = MemoryBroker::new();
        let sender = relay(&broker);
        let receiver = relay(&broker);
        let sub = RecordingSubscriber::new("sub");
        receiver
            .subscribe("job", as_subscriber(&sub), Authentication::system(), None)
            .await
            .unwrap();

        sender.register_enricher(Arc::new(|m: &mut Message| -> anyhow::Result<()> {
            m.set("origin", "sender");
            Ok(())
        }));
        let message = event("job", "started").with("build", "42");
        let sent = message.properties().clone();
        sender.publish(message).await.unwrap();

        assert_eq!(sub.wait_for_count(1).await, 1);
        let received = &sub.received()[0];
        for (name, value) in &sent {
            assert_eq!(received.get(name), Some(value.as_str()));
        }
        assert_eq!(received.get("origin"), Some("sender"));
    }

    // =============================================================================
    // GATING
    // =============================================================================

    #[tokio::test]
    async fn test_filter_applies_to_relayed_messages() {
        let broker = MemoryBroker::new();
        let sender = relay(&broker);
        let receiver = relay(&broker);
        let joba_only = RecordingSubscriber::new("joba-only");
        receiver
            .subscribe(
                "job",
                as_subscriber(&joba_only),
                Authentication::system(),
                Some(EventFilter::new().with("job_name", "joba")),
            )
            .await
            .unwrap();

        for job in ["joba", "jobb", "jobc"] {
            sender
                .publish(event("job", "started").with("job_name", job))
                .await
                .unwrap();
        }

        assert_eq!(joba_only.wait_for_count(1).await, 1);
        assert_eq!(joba_only.settled_count().await, 1);
    }

    #[tokio::test]
    async fn test_resolver_reattaches_permission_gate() {
        let broker = MemoryBroker::new();
        let folder = SwitchableFolder::new(false);
        let sender = relay(&broker);
        let receiver = relay(&broker).with_resolver(Arc::new(FolderResolver {
            folder: Arc::clone(&folder),
        }));

        let admin = RecordingSubscriber::new("admin");
        let visitor = RecordingSubscriber::new("visitor");
        receiver
            .subscribe("job", as_subscriber(&admin), Authentication::system(), None)
            .await
            .unwrap();
        receiver
            .subscribe(
                "job",
                as_subscriber(&visitor),
                Authentication::anonymous(),
                None,
            )
            .await
            .unwrap();

        let guarded = || event("job", "started").with(EventProps::ObjectName, "folder/job");

        sender.publish(guarded()).await.unwrap();
        assert_eq!(admin.wait_for_count(1).await, 1);
        assert_eq!(visitor.settled_count().await, 0);

        folder.set_readable(true);
        sender.publish(guarded()).await.unwrap();
        assert_eq!(visitor.wait_for_count(1).await, 1);

        // Messages without an object are not guarded.
        sender.publish(event("job", "tick")).await.unwrap();
        assert_eq!(visitor.wait_for_count(2).await, 2);
    }

    // =============================================================================
    // CONVERGENCE
    // =============================================================================

    /// Random subscribe/unsubscribe/publish churn from several tasks on two
    /// instances. Afterwards each instance holds exactly one physical
    /// subscription per channel with local subscribers, and the broker
    /// agrees.
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_physical_subscriptions_converge_under_churn() {
        let broker = MemoryBroker::new();
        let buses = [Arc::new(relay(&broker)), Arc::new(relay(&broker))];

        let mut tasks = Vec::new();
        for seed in 0..8u64 {
            let bus = Arc::clone(&buses[(seed % 2) as usize]);
            tasks.push(tokio::spawn(async move {
                let mut rng = StdRng::seed_from_u64(seed);
                let subscribers: Vec<Arc<dyn ChannelSubscriber>> = (0..3)
                    .map(|i| as_subscriber(&RecordingSubscriber::new(format!("t{seed}-{i}"))))
                    .collect();

                for _ in 0..60 {
                    let channel = CHANNELS[rng.gen_range(0..CHANNELS.len())];
                    let subscriber = &subscribers[rng.gen_range(0..subscribers.len())];
                    match rng.gen_range(0..10) {
                        0..=4 => bus
                            .subscribe(channel, Arc::clone(subscriber), Authentication::system(), None)
                            .await
                            .unwrap(),
                        5..=8 => bus.unsubscribe(channel, subscriber).await.unwrap(),
                        _ => bus.publish(event(channel, "tick")).await.unwrap(),
                    }
                }
            }));
        }
        for task in futures::future::join_all(tasks).await {
            task.unwrap();
        }

        let mut expected_on_broker = BTreeSet::new();
        for bus in &buses {
            let local = bus.channel_names();
            assert_eq!(bus.physical_channels().await, local);
            assert_eq!(bus.confirmed_subscriptions().await.unwrap(), local.len());
            expected_on_broker.extend(local);
        }
        let on_broker: BTreeSet<_> = buses[0]
            .transport_channels()
            .await
            .unwrap()
            .into_iter()
            .collect();
        assert_eq!(on_broker, expected_on_broker);

        for bus in &buses {
            bus.shutdown().await;
        }
        assert_eq!(broker.client_count(), 0);
    }

    // =============================================================================
    // LIFECYCLE
    // =============================================================================

    #[tokio::test]
    async fn test_shutdown_is_final_and_idempotent() {
        let broker = MemoryBroker::new();
        let bus = Arc::new(relay(&broker));
        let sub = RecordingSubscriber::new("sub");
        bus.subscribe("job", as_subscriber(&sub), Authentication::system(), None)
            .await
            .unwrap();
        assert_eq!(broker.client_count(), 1);

        tokio::join!(bus.shutdown(), bus.shutdown(), bus.shutdown());

        assert_eq!(bus.state(), BusState::Stopped);
        assert_eq!(broker.client_count(), 0);
        assert!(bus.physical_channels().await.is_empty());
        assert!(bus.channel_names().is_empty());
        assert!(matches!(
            bus.subscribe("job", as_subscriber(&sub), Authentication::system(), None)
                .await,
            Err(BusError::NotRunning { .. })
        ));
        assert!(matches!(
            bus.unsubscribe("job", &as_subscriber(&sub)).await,
            Err(BusError::NotRunning { .. })
        ));
    }

    #[tokio::test]
    async fn test_offline_broker_fails_subscribe_without_side_effects() {
        let broker = MemoryBroker::new();
        let bus = relay(&broker);
        let sub = RecordingSubscriber::new("sub");
        broker.set_offline(true);

        assert!(matches!(
            bus.subscribe("job", as_subscriber(&sub), Authentication::system(), None)
                .await,
            Err(BusError::Transport(_))
        ));
        assert_eq!(bus.subscriber_count("job"), 0);

        broker.set_offline(false);
        bus.subscribe("job", as_subscriber(&sub), Authentication::system(), None)
            .await
            .unwrap();
        assert_eq!(bus.physical_channels().await, vec!["job"]);
        bus.publish(event("job", "started")).await.unwrap();
        assert_eq!(sub.wait_for_count(1).await, 1);
    }
}
