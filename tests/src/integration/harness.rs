//! # Test Harness
//!
//! Builds DONs of real nodes on one `InMemoryNetwork` plus fake underlying
//! capabilities with observable side effects.

use async_trait::async_trait;
use parking_lot::Mutex;
use rc_01_dispatcher::{Dispatcher, InMemoryNetwork, KeyPairSigner, MemoryTransport};
use rc_telemetry::{init_logging, log_peer_event, TelemetryConfig};
use serde_json::json;
use shared_types::{
    CapabilityError, CapabilityRequest, CapabilityResponse, DispatcherConfig, DonId, DonInfo,
    PeerId, ResponseStream, TargetCapability, TriggerCapability, TriggerRegistrationRequest,
    TriggerResponse, TriggerStream,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

pub type NodeDispatcher = Dispatcher<MemoryTransport, KeyPairSigner>;

/// Route engine logs to the test output; honours `RC_LOG_LEVEL`.
pub fn init_test_logging() {
    let _ = init_logging(&TelemetryConfig::from_env());
}

/// A DON whose first `live` members are connected and running.
pub struct TestDon {
    pub info: DonInfo,
    pub nodes: Vec<Arc<NodeDispatcher>>,
}

impl TestDon {
    /// Create a DON of `size` members with keys derived from `seed_base + i`.
    /// Only the first `live` members get a dispatcher.
    pub fn spawn(
        network: &Arc<InMemoryNetwork>,
        id: DonId,
        seed_base: u8,
        size: usize,
        live: usize,
        f: u8,
    ) -> Self {
        let signers: Vec<Arc<KeyPairSigner>> = (0..size)
            .map(|i| Arc::new(KeyPairSigner::from_seed([seed_base + i as u8; 32])))
            .collect();
        let members: Vec<PeerId> = signers.iter().map(|s| s.peer_id()).collect();
        let info = DonInfo::new(id, members, f, [id as u8; 16]).expect("valid DON");

        let nodes = signers
            .into_iter()
            .take(live)
            .map(|signer| {
                let peer_id = signer.peer_id();
                let transport = network.connect(peer_id);
                let dispatcher = Arc::new(Dispatcher::new(
                    transport,
                    signer,
                    DispatcherConfig::default(),
                ));
                dispatcher.start();
                log_peer_event!(debug, "harness", "Node started", peer_id, don_id = id);
                dispatcher
            })
            .collect();

        Self { info, nodes }
    }

    pub async fn close(&self) {
        for node in &self.nodes {
            node.close().await;
        }
    }
}

/// Returns `{"response": inputs.executeValue1}`, or fails with `fail_with`.
#[derive(Default)]
pub struct EchoTarget {
    pub executions: AtomicUsize,
    pub fail_with: Option<String>,
}

impl EchoTarget {
    pub fn failing(message: &str) -> Self {
        Self {
            executions: AtomicUsize::new(0),
            fail_with: Some(message.to_string()),
        }
    }

    pub fn execution_count(&self) -> usize {
        self.executions.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TargetCapability for EchoTarget {
    async fn execute(&self, request: CapabilityRequest) -> Result<ResponseStream, CapabilityError> {
        self.executions.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = &self.fail_with {
            return Err(CapabilityError::Execution(message.clone()));
        }
        let (tx, rx) = mpsc::channel(1);
        let value = json!({"response": request.inputs["executeValue1"]});
        let _ = tx.send(Ok(CapabilityResponse { value })).await;
        Ok(rx)
    }
}

/// Trigger that hands its callbacks to the test.
#[derive(Default)]
pub struct StreamsTrigger {
    pub registered: Mutex<Vec<TriggerRegistrationRequest>>,
    pub unregistered: Mutex<Vec<TriggerRegistrationRequest>>,
    pub callbacks: Mutex<Vec<mpsc::Sender<TriggerResponse>>>,
}

impl StreamsTrigger {
    pub fn registration_count(&self) -> usize {
        self.registered.lock().len()
    }

    /// Push `event` to every open callback.
    pub async fn emit(&self, event: TriggerResponse) {
        let callbacks = self.callbacks.lock().clone();
        for callback in callbacks {
            let _ = callback.send(event.clone()).await;
        }
    }
}

#[async_trait]
impl TriggerCapability for StreamsTrigger {
    async fn register_trigger(
        &self,
        request: TriggerRegistrationRequest,
    ) -> Result<TriggerStream, CapabilityError> {
        self.registered.lock().push(request);
        let (tx, rx) = mpsc::channel(16);
        self.callbacks.lock().push(tx);
        Ok(rx)
    }

    async fn unregister_trigger(
        &self,
        request: TriggerRegistrationRequest,
    ) -> Result<(), CapabilityError> {
        self.unregistered.lock().push(request);
        Ok(())
    }
}
