//! # Target Client
//!
//! Remote proxy for a target capability, running on a workflow DON node.
//! Implements `TargetCapability`, so callers cannot tell it from a local
//! capability.
//!
//! ## Execute
//!
//! 1. Derive the message ID `"{workflow_id}:{workflow_execution_id}"`
//! 2. Resolve the transmission schedule (request config, else client default)
//! 3. Create a `ClientRequest`, which schedules one send per capability DON
//!    member
//! 4. Return the response stream immediately
//!
//! Replies are routed back through the dispatcher to `Receiver::receive`.
//! A background sweep times out requests older than `request_timeout`.

use crate::metrics;
use crate::request::ClientRequest;
use async_trait::async_trait;
use parking_lot::Mutex;
use rc_01_dispatcher::{DispatchError, DispatcherApi, Receiver};
use rc_02_quorum::peer_id_to_transmission_delay;
use serde_json::Value;
use shared_types::{
    sanitize_log_string, to_payload, CapabilityError, CapabilityRequest, DonInfo, MessageBody,
    Method, RemoteCapabilityInfo, RemoteTargetConfig, ResponseStream, TargetCapability,
    TransmissionConfig, TransmissionSchedule,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Request config key selecting the transmission schedule.
pub const SCHEDULE_KEY: &str = "schedule";
/// Request config key with the delay between schedule waves.
pub const DELTA_STAGE_KEY: &str = "deltaStage";

pub struct TargetClient {
    remote_capability: RemoteCapabilityInfo,
    local_don: DonInfo,
    dispatcher: Arc<dyn DispatcherApi>,
    config: RemoteTargetConfig,
    requests: Mutex<HashMap<String, ClientRequest>>,
    shutdown: watch::Sender<bool>,
    expiry_task: Mutex<Option<JoinHandle<()>>>,
}

impl TargetClient {
    pub fn new(
        remote_capability: RemoteCapabilityInfo,
        local_don: DonInfo,
        dispatcher: Arc<dyn DispatcherApi>,
        mut config: RemoteTargetConfig,
    ) -> Arc<Self> {
        config.apply_defaults();
        let (shutdown, _) = watch::channel(false);
        Arc::new(Self {
            remote_capability,
            local_don,
            dispatcher,
            config,
            requests: Mutex::new(HashMap::new()),
            shutdown,
            expiry_task: Mutex::new(None),
        })
    }

    /// Register with the dispatcher and start the expiry sweep.
    pub fn start(self: &Arc<Self>) -> Result<(), DispatchError> {
        self.dispatcher.set_receiver(
            &self.remote_capability.id,
            self.remote_capability.don.id,
            Arc::clone(self) as Arc<dyn Receiver>,
        )?;

        let client = Arc::clone(self);
        let mut shutdown = self.shutdown.subscribe();
        let period = expiry_check_period(self.config.request_timeout);
        *self.expiry_task.lock() = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    _ = ticker.tick() => client.expire_requests(),
                }
            }
        }));

        info!(
            capability_id = %self.remote_capability.id,
            don_id = self.remote_capability.don.id,
            "Target client started"
        );
        Ok(())
    }

    /// Stop the sweep, unregister, and cancel every in-flight request.
    pub fn close(&self) {
        self.shutdown.send_replace(true);
        if let Some(task) = self.expiry_task.lock().take() {
            task.abort();
        }
        self.dispatcher
            .remove_receiver(&self.remote_capability.id, self.remote_capability.don.id);

        let mut requests = self.requests.lock();
        for (_, mut request) in requests.drain() {
            request.cancel(CapabilityError::Closed);
        }
    }

    /// Number of requests not yet swept.
    pub fn in_flight(&self) -> usize {
        self.requests.lock().len()
    }

    fn expire_requests(&self) {
        let mut requests = self.requests.lock();
        requests.retain(|message_id, request| {
            if !request.is_expired() {
                return true;
            }
            if !request.is_resolved() {
                warn!(message_id = %message_id, "Request timed out");
                metrics::record_request_expired("client");
            }
            request.cancel(CapabilityError::Timeout);
            false
        });
    }
}

fn expiry_check_period(request_timeout: Duration) -> Duration {
    (request_timeout / 2).max(Duration::from_millis(10))
}

fn message_id(request: &CapabilityRequest) -> Result<String, CapabilityError> {
    let metadata = &request.metadata;
    if metadata.workflow_id.is_empty() || metadata.workflow_execution_id.is_empty() {
        return Err(CapabilityError::InvalidRequest(
            "workflow ID and workflow execution ID must be set".to_string(),
        ));
    }
    Ok(format!(
        "{}:{}",
        metadata.workflow_id, metadata.workflow_execution_id
    ))
}

/// Transmission settings from a request's config, falling back to `default`.
pub fn transmission_config(
    config: &Value,
    default: &TransmissionConfig,
) -> Result<TransmissionConfig, CapabilityError> {
    let mut resolved = *default;

    if let Some(schedule) = config.get(SCHEDULE_KEY) {
        let name = schedule.as_str().ok_or_else(|| {
            CapabilityError::InvalidRequest(format!("{SCHEDULE_KEY} must be a string"))
        })?;
        resolved.schedule = name
            .parse::<TransmissionSchedule>()
            .map_err(|e| CapabilityError::InvalidRequest(e.to_string()))?;
    }

    if let Some(delta) = config.get(DELTA_STAGE_KEY) {
        let text = delta.as_str().ok_or_else(|| {
            CapabilityError::InvalidRequest(format!("{DELTA_STAGE_KEY} must be a string"))
        })?;
        resolved.delta_stage = humantime::parse_duration(text).map_err(|e| {
            CapabilityError::InvalidRequest(format!("invalid {DELTA_STAGE_KEY}: {e}"))
        })?;
    }

    Ok(resolved)
}

#[async_trait]
impl TargetCapability for TargetClient {
    async fn execute(&self, request: CapabilityRequest) -> Result<ResponseStream, CapabilityError> {
        if *self.shutdown.borrow() {
            return Err(CapabilityError::Closed);
        }

        let message_id = message_id(&request)?;
        let transmission = transmission_config(&request.config, &self.config.transmission)?;
        let payload =
            to_payload(&request).map_err(|e| CapabilityError::InvalidRequest(e.to_string()))?;

        let don = &self.remote_capability.don;
        let delays = peer_id_to_transmission_delay(
            &don.members,
            &don.shared_secret,
            &request.metadata.workflow_execution_id,
            &transmission,
        );
        let body = MessageBody::new(
            self.remote_capability.id.clone(),
            don.id,
            self.local_don.id,
            Method::Execute,
        )
        .with_message_id(message_id.clone().into_bytes())
        .with_payload(payload);

        let mut requests = self.requests.lock();
        if requests.contains_key(&message_id) {
            return Err(CapabilityError::InvalidRequest(format!(
                "request for message ID {message_id} already exists"
            )));
        }

        let (client_request, response) = ClientRequest::new(
            Arc::clone(&self.dispatcher),
            body,
            delays,
            don.f_plus_one(),
            self.config.request_timeout,
        );
        requests.insert(message_id.clone(), client_request);
        metrics::record_request_started();
        debug!(message_id = %message_id, "Request started");

        Ok(response)
    }
}

#[async_trait]
impl Receiver for TargetClient {
    async fn receive(&self, body: MessageBody) {
        if body.method != Method::Execute {
            warn!(method = %body.method, "Unexpected method for target client");
            return;
        }
        let sender = match body.sender_peer_id() {
            Ok(sender) => sender,
            Err(e) => {
                warn!(error = %e, "Response with invalid sender");
                return;
            }
        };

        let message_id = body.message_id_str();
        let mut requests = self.requests.lock();
        let Some(request) = requests.get_mut(&message_id) else {
            debug!(
                message_id = %sanitize_log_string(&message_id),
                peer_id = %sender,
                "Response for unknown request"
            );
            return;
        };

        if let Err(e) = request.on_message(sender, &body) {
            warn!(
                message_id = %sanitize_log_string(&message_id),
                error = %e,
                "Rejected response"
            );
        }
    }
}
