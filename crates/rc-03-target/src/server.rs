//! # Target Server
//!
//! Runs on a capability DON node and fronts the real target capability.
//!
//! ## Request Keys
//!
//! Requests are keyed by `message_id ‖ hex(sha256(payload))`. A message ID
//! reused with a different payload is a different request, so a faulty
//! caller cannot substitute the payload others agreed on.
//!
//! ## Execution
//!
//! Once `F+1` members of the calling DON sent the same request, the
//! underlying capability runs exactly once, bounded by the request's
//! remaining lifetime. The outcome is replayed to every requester, including
//! those that arrive later. Replies are sent after the lock is released.

use crate::metrics;
use crate::request::{ExecutionFailure, ExecutionOutcome, ServerAction, ServerRequest};
use async_trait::async_trait;
use parking_lot::Mutex;
use rc_01_dispatcher::{DispatchError, DispatcherApi, Receiver};
use shared_crypto::sha256_hex;
use shared_types::{
    from_payload, sanitize_log_string, to_payload, CapabilityError, CapabilityRequest,
    CapabilityResponse, DonId,
    DonInfo, ErrorCode, MessageBody, Method, PeerId, RemoteTargetConfig, TargetCapability,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

type RequestTable = Arc<Mutex<HashMap<String, ServerRequest>>>;

pub struct TargetServer {
    capability_id: String,
    local_don: DonInfo,
    workflow_dons: HashMap<DonId, DonInfo>,
    underlying: Arc<dyn TargetCapability>,
    dispatcher: Arc<dyn DispatcherApi>,
    config: RemoteTargetConfig,
    requests: RequestTable,
    shutdown: watch::Sender<bool>,
    expiry_task: Mutex<Option<JoinHandle<()>>>,
}

impl TargetServer {
    pub fn new(
        capability_id: impl Into<String>,
        local_don: DonInfo,
        workflow_dons: Vec<DonInfo>,
        underlying: Arc<dyn TargetCapability>,
        dispatcher: Arc<dyn DispatcherApi>,
        mut config: RemoteTargetConfig,
    ) -> Arc<Self> {
        config.apply_defaults();
        let (shutdown, _) = watch::channel(false);
        Arc::new(Self {
            capability_id: capability_id.into(),
            local_don,
            workflow_dons: workflow_dons.into_iter().map(|d| (d.id, d)).collect(),
            underlying,
            dispatcher,
            config,
            requests: Arc::new(Mutex::new(HashMap::new())),
            shutdown,
            expiry_task: Mutex::new(None),
        })
    }

    /// Register with the dispatcher and start the expiry sweep.
    pub fn start(self: &Arc<Self>) -> Result<(), DispatchError> {
        self.dispatcher.set_receiver(
            &self.capability_id,
            self.local_don.id,
            Arc::clone(self) as Arc<dyn Receiver>,
        )?;

        let server = Arc::clone(self);
        let mut shutdown = self.shutdown.subscribe();
        let period = (self.config.request_timeout / 2).max(Duration::from_millis(10));
        *self.expiry_task.lock() = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    _ = ticker.tick() => server.expire_requests().await,
                }
            }
        }));

        info!(
            capability_id = %self.capability_id,
            don_id = self.local_don.id,
            "Target server started"
        );
        Ok(())
    }

    pub fn close(&self) {
        self.shutdown.send_replace(true);
        if let Some(task) = self.expiry_task.lock().take() {
            task.abort();
        }
        self.dispatcher
            .remove_receiver(&self.capability_id, self.local_don.id);
        self.requests.lock().clear();
    }

    /// Number of tracked request keys.
    pub fn tracked_requests(&self) -> usize {
        self.requests.lock().len()
    }

    async fn expire_requests(&self) {
        let replies = {
            let mut requests = self.requests.lock();
            let mut replies = Vec::new();
            requests.retain(|key, request| {
                if !request.is_expired() {
                    return true;
                }
                if !request.has_outcome() {
                    warn!(request_key = %key, "Request expired before execution finished");
                    metrics::record_request_expired("server");
                }
                replies.extend(request.expire());
                false
            });
            replies
        };
        send_replies(&self.dispatcher, replies).await;
    }
}

/// Key under which a request is tracked.
pub fn request_key(message_id: &[u8], payload: &[u8]) -> String {
    format!(
        "{}{}",
        String::from_utf8_lossy(message_id),
        sha256_hex(payload)
    )
}

async fn send_replies(dispatcher: &Arc<dyn DispatcherApi>, replies: Vec<(PeerId, MessageBody)>) {
    for (peer, body) in replies {
        if let Err(e) = dispatcher.send(peer, body).await {
            error!(peer_id = %peer, error = %e, "Failed to send response");
        }
    }
}

async fn first_response(
    underlying: Arc<dyn TargetCapability>,
    request: CapabilityRequest,
) -> Result<CapabilityResponse, CapabilityError> {
    let mut stream = underlying.execute(request).await?;
    match stream.recv().await {
        Some(result) => result,
        None => Err(CapabilityError::Execution(
            "capability closed without a response".to_string(),
        )),
    }
}

async fn execute_capability(
    underlying: Arc<dyn TargetCapability>,
    payload: Vec<u8>,
    budget: Duration,
) -> ExecutionOutcome {
    let request: CapabilityRequest = from_payload(&payload).map_err(|e| {
        ExecutionFailure::new(
            ErrorCode::InvalidRequest,
            format!("failed to decode capability request: {e}"),
        )
    })?;

    let response = match tokio::time::timeout(budget, first_response(underlying, request)).await {
        Ok(Ok(response)) => response,
        Ok(Err(e)) => {
            return Err(ExecutionFailure::new(
                ErrorCode::InternalError,
                format!("failed to execute capability: {e}"),
            ))
        }
        Err(_) => {
            return Err(ExecutionFailure::new(
                ErrorCode::InternalError,
                "failed to execute capability: execution timed out",
            ))
        }
    };

    to_payload(&response).map_err(|e| {
        ExecutionFailure::new(
            ErrorCode::InternalError,
            format!("failed to encode capability response: {e}"),
        )
    })
}

#[async_trait]
impl Receiver for TargetServer {
    async fn receive(&self, body: MessageBody) {
        if body.method != Method::Execute {
            warn!(method = %body.method, "Unexpected method for target server");
            return;
        }
        let sender = match body.sender_peer_id() {
            Ok(sender) => sender,
            Err(e) => {
                warn!(error = %e, "Request with invalid sender");
                return;
            }
        };
        let Some(calling_don) = self.workflow_dons.get(&body.caller_don_id) else {
            warn!(
                don_id = body.caller_don_id,
                peer_id = %sender,
                "Request from unknown calling DON"
            );
            return;
        };
        if !calling_don.contains(&sender) {
            warn!(
                don_id = calling_don.id,
                peer_id = %sender,
                "Request from peer outside the calling DON"
            );
            return;
        }

        let key = request_key(&body.message_id, &body.payload);
        let action = {
            let mut requests = self.requests.lock();
            requests
                .entry(key.clone())
                .or_insert_with(|| {
                    ServerRequest::new(&body, calling_don.f_plus_one(), self.config.request_timeout)
                })
                .add_requester(sender, calling_don)
        };

        match action {
            Err(e) => warn!(
                message_id = %sanitize_log_string(&body.message_id_str()),
                error = %e,
                "Rejected request"
            ),
            Ok(ServerAction::Wait) => {
                debug!(request_key = %key, peer_id = %sender, "Requester recorded")
            }
            Ok(ServerAction::Reply(replies)) => send_replies(&self.dispatcher, replies).await,
            Ok(ServerAction::Execute { payload, budget }) => {
                let underlying = Arc::clone(&self.underlying);
                let dispatcher = Arc::clone(&self.dispatcher);
                let requests = Arc::clone(&self.requests);
                debug!(request_key = %key, "Quorum reached, executing capability");

                tokio::spawn(async move {
                    let outcome = execute_capability(underlying, payload, budget).await;
                    metrics::record_capability_execution(if outcome.is_ok() {
                        "success"
                    } else {
                        "error"
                    });
                    if let Err(failure) = &outcome {
                        error!(request_key = %key, error = %failure.message, "Capability execution failed");
                    }

                    let replies = requests
                        .lock()
                        .get_mut(&key)
                        .map(|request| request.set_outcome(outcome))
                        .unwrap_or_default();
                    send_replies(&dispatcher, replies).await;
                });
            }
        }
    }
}
