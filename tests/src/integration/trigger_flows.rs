//! # Trigger Flows
//!
//! A workflow DON subscribing to a trigger hosted on a capability DON:
//!
//! ```text
//! [TriggerSubscriber x N] ──RegisterTrigger (refresh)──→ [TriggerPublisher x M]
//!                                                               │ 2F+1 fresh
//!                                                               ↓
//!                                                        [StreamsTrigger]
//!                                                               │ events
//! [callback] ←── F+1 identical ←──────── TriggerEvent ──────────┘
//! ```

use super::harness::{init_test_logging, StreamsTrigger, TestDon};
use rc_01_dispatcher::InMemoryNetwork;
use rc_04_trigger::{TriggerPublisher, TriggerSubscriber};
use serde_json::json;
use shared_types::{
    CapabilityType, RemoteCapabilityInfo, RemoteTriggerConfig, RequestMetadata, SystemClock,
    TriggerCapability, TriggerEvent, TriggerRegistrationRequest, TriggerResponse, TriggerStream,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

const CAPABILITY: &str = "streams-trigger@1.0.0";
const WORKFLOW_DON: u32 = 1;
const CAPABILITY_DON: u32 = 2;

struct Topology {
    workflow: TestDon,
    capability: TestDon,
    triggers: Vec<Arc<StreamsTrigger>>,
    publishers: Vec<Arc<TriggerPublisher>>,
    subscribers: Vec<Arc<TriggerSubscriber>>,
}

fn trigger_config() -> RemoteTriggerConfig {
    RemoteTriggerConfig {
        registration_refresh: Duration::from_millis(100),
        registration_expiry: Duration::from_secs(2),
        message_expiry: Duration::from_secs(2),
        batch_collection_period: Duration::from_millis(50),
        ..Default::default()
    }
}

impl Topology {
    fn build(config: RemoteTriggerConfig) -> Self {
        let network = InMemoryNetwork::new();
        let workflow = TestDon::spawn(&network, WORKFLOW_DON, 1, 4, 4, 1);
        let capability = TestDon::spawn(&network, CAPABILITY_DON, 101, 4, 4, 1);

        let mut triggers = Vec::new();
        let mut publishers = Vec::new();
        for node in &capability.nodes {
            let trigger = Arc::new(StreamsTrigger::default());
            let publisher = TriggerPublisher::new(
                CAPABILITY,
                capability.info.clone(),
                vec![workflow.info.clone()],
                trigger.clone(),
                node.clone(),
                config.clone(),
                Arc::new(SystemClock),
            );
            publisher.start().unwrap();
            triggers.push(trigger);
            publishers.push(publisher);
        }

        let remote = RemoteCapabilityInfo {
            id: CAPABILITY.to_string(),
            capability_type: CapabilityType::Trigger,
            don: capability.info.clone(),
        };
        let subscribers = workflow
            .nodes
            .iter()
            .map(|node| {
                let subscriber = TriggerSubscriber::new(
                    remote.clone(),
                    workflow.info.clone(),
                    node.clone(),
                    config.clone(),
                    Arc::new(SystemClock),
                );
                subscriber.start().unwrap();
                subscriber
            })
            .collect();

        Self {
            workflow,
            capability,
            triggers,
            publishers,
            subscribers,
        }
    }

    async fn register_everywhere(&self, workflow_id: &str) -> Vec<TriggerStream> {
        let mut streams = Vec::new();
        for subscriber in &self.subscribers {
            streams.push(
                subscriber
                    .register_trigger(registration(workflow_id))
                    .await
                    .unwrap(),
            );
        }
        streams
    }

    /// Wait until every underlying trigger saw `count` registrations.
    async fn wait_for_registrations(&self, count: usize) {
        timeout(Duration::from_secs(5), async {
            while self
                .triggers
                .iter()
                .any(|t| t.registration_count() < count)
            {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .expect("publishers should register with the underlying trigger");
    }

    async fn shutdown(&self) {
        for subscriber in &self.subscribers {
            subscriber.close();
        }
        for publisher in &self.publishers {
            publisher.close().await;
        }
        self.workflow.close().await;
        self.capability.close().await;
    }
}

fn registration(workflow_id: &str) -> TriggerRegistrationRequest {
    TriggerRegistrationRequest {
        trigger_id: "streams".into(),
        metadata: RequestMetadata {
            workflow_id: workflow_id.into(),
            workflow_don_id: WORKFLOW_DON,
            ..Default::default()
        },
        config: json!({"feedIds": ["eth-usd"]}),
    }
}

fn price_event(id: &str, price: u64) -> TriggerResponse {
    TriggerResponse {
        event: TriggerEvent {
            trigger_type: "streams".into(),
            id: id.into(),
            outputs: json!({"price": price}),
        },
        error: None,
    }
}

// =============================================================================
// HAPPY PATH
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_event_reaches_every_subscriber() {
    init_test_logging();
    let topology = Topology::build(trigger_config());
    let mut streams = topology.register_everywhere("workflow-1").await;

    topology.wait_for_registrations(1).await;
    for trigger in &topology.triggers {
        assert_eq!(trigger.registered.lock()[0], registration("workflow-1"));
    }

    let event = price_event("event-1", 1_000);
    for trigger in &topology.triggers {
        trigger.emit(event.clone()).await;
    }

    for stream in &mut streams {
        let delivered = timeout(Duration::from_secs(5), stream.recv())
            .await
            .expect("event should be delivered")
            .expect("callback open");
        assert_eq!(delivered, event);
    }

    // Delivered once, even though all four publishers sent it.
    tokio::time::sleep(Duration::from_millis(300)).await;
    for stream in &mut streams {
        assert!(stream.try_recv().is_err());
    }

    topology.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_events_for_two_workflows_share_a_batch() {
    init_test_logging();
    let topology = Topology::build(trigger_config());
    let mut first = topology.register_everywhere("workflow-1").await;
    let mut second = topology.register_everywhere("workflow-2").await;
    topology.wait_for_registrations(2).await;

    let event = price_event("event-7", 7);
    for trigger in &topology.triggers {
        trigger.emit(event.clone()).await;
    }

    for stream in first.iter_mut().chain(second.iter_mut()) {
        let delivered = timeout(Duration::from_secs(5), stream.recv())
            .await
            .expect("event should be delivered")
            .expect("callback open");
        assert_eq!(delivered.event.id, "event-7");
    }

    topology.shutdown().await;
}

// =============================================================================
// AGREEMENT
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_single_faulty_publisher_cannot_inject_events() {
    init_test_logging();
    let topology = Topology::build(trigger_config());
    let mut streams = topology.register_everywhere("workflow-1").await;
    topology.wait_for_registrations(1).await;

    // Only one capability node emits; F+1 = 2 agreeing nodes are required.
    topology.triggers[0].emit(price_event("forged", 1)).await;

    tokio::time::sleep(Duration::from_millis(500)).await;
    for stream in &mut streams {
        assert!(stream.try_recv().is_err());
    }

    topology.shutdown().await;
}

// =============================================================================
// EXPIRY
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_unregistered_workflow_expires_on_publishers() {
    init_test_logging();
    let config = RemoteTriggerConfig {
        registration_expiry: Duration::from_millis(500),
        ..trigger_config()
    };
    let topology = Topology::build(config);
    let _streams = topology.register_everywhere("workflow-1").await;
    topology.wait_for_registrations(1).await;

    for subscriber in &topology.subscribers {
        subscriber
            .unregister_trigger(registration("workflow-1"))
            .await
            .unwrap();
    }

    timeout(Duration::from_secs(5), async {
        while topology
            .triggers
            .iter()
            .any(|t| t.unregistered.lock().is_empty())
        {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    })
    .await
    .expect("publishers should drop the stale registration");

    for publisher in &topology.publishers {
        assert_eq!(publisher.registration_count(), 0);
    }

    topology.shutdown().await;
}
