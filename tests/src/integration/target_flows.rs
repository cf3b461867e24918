//! # Target Flows
//!
//! A workflow DON calling a target capability hosted on a capability DON:
//!
//! ```text
//! [TargetClient x N] ──Execute──→ [Dispatcher] ──→ [TargetServer x M] ──→ [EchoTarget]
//!         ↑                                               │
//!         └──────────── F+1 identical replies ←───────────┘
//! ```

use super::harness::{init_test_logging, EchoTarget, TestDon};
use rc_01_dispatcher::InMemoryNetwork;
use rc_03_target::{TargetClient, TargetServer};
use serde_json::{json, Value};
use shared_types::{
    CapabilityError, CapabilityRequest, CapabilityType, RemoteCapabilityInfo,
    RemoteTargetConfig, RequestMetadata, ResponseResult, TargetCapability,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

const CAPABILITY: &str = "write_chain@1.0.0";
const WORKFLOW_DON: u32 = 1;
const CAPABILITY_DON: u32 = 2;

struct Topology {
    workflow: TestDon,
    capability: TestDon,
    clients: Vec<Arc<TargetClient>>,
    servers: Vec<Arc<TargetServer>>,
}

impl Topology {
    /// Build both DONs, a server on every live capability node and a client
    /// on every workflow node.
    fn build(
        workflow_size: usize,
        workflow_f: u8,
        capability_size: usize,
        capability_live: usize,
        capability_f: u8,
        target: Arc<dyn TargetCapability>,
        config: RemoteTargetConfig,
    ) -> Self {
        let network = InMemoryNetwork::new();
        let workflow = TestDon::spawn(&network, WORKFLOW_DON, 1, workflow_size, workflow_size, workflow_f);
        let capability = TestDon::spawn(
            &network,
            CAPABILITY_DON,
            101,
            capability_size,
            capability_live,
            capability_f,
        );

        let servers = capability
            .nodes
            .iter()
            .map(|node| {
                let server = TargetServer::new(
                    CAPABILITY,
                    capability.info.clone(),
                    vec![workflow.info.clone()],
                    Arc::clone(&target),
                    node.clone(),
                    config.clone(),
                );
                server.start().unwrap();
                server
            })
            .collect();

        let remote = RemoteCapabilityInfo {
            id: CAPABILITY.to_string(),
            capability_type: CapabilityType::Target,
            don: capability.info.clone(),
        };
        let clients = workflow
            .nodes
            .iter()
            .map(|node| {
                let client = TargetClient::new(
                    remote.clone(),
                    workflow.info.clone(),
                    node.clone(),
                    config.clone(),
                );
                client.start().unwrap();
                client
            })
            .collect();

        Self {
            workflow,
            capability,
            clients,
            servers,
        }
    }

    /// Run `Execute` on every client concurrently and collect the outcomes.
    async fn execute_everywhere(&self, request: CapabilityRequest) -> Vec<ResponseResult> {
        let handles: Vec<_> = self
            .clients
            .iter()
            .map(|client| {
                let client = Arc::clone(client);
                let request = request.clone();
                tokio::spawn(execute_once(client, request))
            })
            .collect();

        let mut results = Vec::new();
        for handle in handles {
            results.push(handle.await.unwrap());
        }
        results
    }

    async fn shutdown(&self) {
        for client in &self.clients {
            client.close();
        }
        for server in &self.servers {
            server.close();
        }
        self.workflow.close().await;
        self.capability.close().await;
    }
}

async fn execute_once(client: Arc<TargetClient>, request: CapabilityRequest) -> ResponseResult {
    let mut stream = client.execute(request).await?;
    stream.recv().await.unwrap_or(Err(CapabilityError::Closed))
}

fn request(execution_id: &str, config: Value) -> CapabilityRequest {
    CapabilityRequest {
        metadata: RequestMetadata {
            workflow_id: "workflow-1".into(),
            workflow_execution_id: execution_id.into(),
            workflow_don_id: WORKFLOW_DON,
            ..Default::default()
        },
        config,
        inputs: json!({"executeValue1": "aValue1"}),
    }
}

fn config(request_timeout: Duration) -> RemoteTargetConfig {
    RemoteTargetConfig {
        request_timeout,
        ..Default::default()
    }
}

// =============================================================================
// HAPPY PATH
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_every_caller_receives_the_response() {
    init_test_logging();
    let target = Arc::new(EchoTarget::default());
    let topology = Topology::build(10, 9, 10, 10, 9, target.clone(), config(Duration::from_secs(10)));

    let results = timeout(
        Duration::from_secs(15),
        topology.execute_everywhere(request("exec-1", json!({}))),
    )
    .await
    .expect("execute should resolve within the request timeout");

    assert_eq!(results.len(), 10);
    for result in results {
        let response = result.expect("execute should succeed");
        assert_eq!(response.value, json!({"response": "aValue1"}));
    }
    // Every server executes exactly once for the shared request.
    assert_eq!(target.execution_count(), 10);

    topology.shutdown().await;
}

// =============================================================================
// ERROR PROPAGATION
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_underlying_error_reaches_every_caller() {
    init_test_logging();
    let target = Arc::new(EchoTarget::failing("an error"));
    let topology = Topology::build(10, 9, 10, 10, 9, target, config(Duration::from_secs(10)));

    let results = timeout(
        Duration::from_secs(15),
        topology.execute_everywhere(request("exec-1", json!({}))),
    )
    .await
    .expect("execute should resolve within the request timeout");

    for result in results {
        assert_eq!(
            result.unwrap_err().to_string(),
            "failed to execute capability: an error"
        );
    }

    topology.shutdown().await;
}

// =============================================================================
// TIMEOUT HANDLING
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_too_few_live_responders_times_out() {
    init_test_logging();
    let target = Arc::new(EchoTarget::default());
    // F = 3 needs 4 identical replies; only 3 capability nodes are up.
    let topology = Topology::build(4, 1, 10, 3, 3, target, config(Duration::from_secs(1)));

    let results = timeout(
        Duration::from_secs(5),
        topology.execute_everywhere(request("exec-1", json!({}))),
    )
    .await
    .expect("execute must not block past the request timeout");

    for result in results {
        assert_eq!(result.unwrap_err(), CapabilityError::Timeout);
    }
    for client in &topology.clients {
        assert_eq!(client.in_flight(), 0);
    }

    topology.shutdown().await;
}

// =============================================================================
// TRANSMISSION SCHEDULE
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_one_at_a_time_stops_after_quorum() {
    init_test_logging();
    let target = Arc::new(EchoTarget::default());
    // 4 capability nodes with F = 1: two agreeing replies resolve the call,
    // so the last two scheduled members are never contacted.
    let topology = Topology::build(2, 1, 4, 4, 1, target.clone(), config(Duration::from_secs(10)));
    let schedule = json!({"schedule": "oneAtATime", "deltaStage": "300ms"});

    let results = timeout(
        Duration::from_secs(5),
        topology.execute_everywhere(request("exec-1", schedule)),
    )
    .await
    .expect("execute should resolve");
    for result in results {
        assert_eq!(result.unwrap().value, json!({"response": "aValue1"}));
    }

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(target.execution_count(), 2);

    topology.shutdown().await;
}

// =============================================================================
// AUTHORIZATION
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_unknown_caller_don_cannot_execute() {
    init_test_logging();
    let network = InMemoryNetwork::new();
    let capability = TestDon::spawn(&network, CAPABILITY_DON, 101, 4, 4, 1);
    let registered = TestDon::spawn(&network, WORKFLOW_DON, 1, 4, 0, 1);
    let outsiders = TestDon::spawn(&network, 9, 51, 2, 2, 0);
    let target = Arc::new(EchoTarget::default());

    let servers: Vec<_> = capability
        .nodes
        .iter()
        .map(|node| {
            let server = TargetServer::new(
                CAPABILITY,
                capability.info.clone(),
                vec![registered.info.clone()],
                target.clone(),
                node.clone(),
                config(Duration::from_secs(1)),
            );
            server.start().unwrap();
            server
        })
        .collect();

    let remote = RemoteCapabilityInfo {
        id: CAPABILITY.to_string(),
        capability_type: CapabilityType::Target,
        don: capability.info.clone(),
    };
    let client = TargetClient::new(
        remote,
        outsiders.info.clone(),
        outsiders.nodes[0].clone(),
        config(Duration::from_millis(500)),
    );
    client.start().unwrap();

    let mut stream = client.execute(request("exec-1", json!({}))).await.unwrap();
    let outcome = timeout(Duration::from_secs(3), stream.recv())
        .await
        .expect("client must time out");
    assert_eq!(outcome, Some(Err(CapabilityError::Timeout)));
    assert_eq!(target.execution_count(), 0);

    client.close();
    for server in servers {
        server.close();
    }
    capability.close().await;
    outsiders.close().await;
}
