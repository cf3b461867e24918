//! # Client Request
//!
//! One outstanding `Execute` on the caller side.
//!
//! ## Lifecycle
//!
//! ```text
//! new() ── scheduled sends ──> on_message()* ── F+1 agree ──> resolved
//!                                     └──── cancel() / expiry ─────┘
//! ```
//!
//! Successful replies are tallied by payload hash and error replies by error
//! string; the first tally to reach `F+1` of the capability DON wins. The
//! response channel is written exactly once.
//!
//! Every scheduled send lives in a `JoinSet` owned by the request. Resolving
//! fires the done-signal and aborts the set, so members that have not been
//! contacted yet never are.

use crate::errors::TargetError;
use crate::metrics;
use rc_01_dispatcher::DispatcherApi;
use shared_crypto::sha256;
use shared_types::{
    from_payload, CapabilityError, CapabilityResponse, MessageBody, PeerId, ResponseResult,
    ResponseStream,
};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, error};

pub struct ClientRequest {
    message_id: String,
    created_at: Instant,
    request_timeout: Duration,
    required_identical: usize,
    expected_senders: HashSet<PeerId>,
    responded: HashSet<PeerId>,
    success_tally: HashMap<[u8; 32], usize>,
    error_tally: HashMap<String, usize>,
    response_tx: Option<mpsc::Sender<ResponseResult>>,
    done: watch::Sender<bool>,
    sends: JoinSet<()>,
}

impl ClientRequest {
    /// Create the request and schedule a send to every member with a delay.
    ///
    /// Members absent from `delays` are neither contacted nor accepted as
    /// responders.
    pub fn new(
        dispatcher: Arc<dyn DispatcherApi>,
        body: MessageBody,
        delays: HashMap<PeerId, Duration>,
        required_identical: usize,
        request_timeout: Duration,
    ) -> (Self, ResponseStream) {
        let (response_tx, response_rx) = mpsc::channel(1);
        let (done, _) = watch::channel(false);
        let message_id = body.message_id_str();

        let mut sends = JoinSet::new();
        for (peer, delay) in &delays {
            let dispatcher = Arc::clone(&dispatcher);
            let body = body.clone();
            let mut done = done.subscribe();
            let (peer, delay) = (*peer, *delay);
            let message_id = message_id.clone();

            sends.spawn(async move {
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = done.wait_for(|resolved| *resolved) => return,
                }
                if let Err(e) = dispatcher.send(peer, body).await {
                    error!(peer_id = %peer, message_id = %message_id, error = %e, "Failed to send request");
                }
            });
        }

        let request = Self {
            message_id,
            created_at: Instant::now(),
            request_timeout,
            required_identical,
            expected_senders: delays.into_keys().collect(),
            responded: HashSet::new(),
            success_tally: HashMap::new(),
            error_tally: HashMap::new(),
            response_tx: Some(response_tx),
            done,
            sends,
        };
        (request, response_rx)
    }

    /// Feed one reply.
    ///
    /// # Errors
    /// - `UnexpectedSender` if the peer was never scheduled
    /// - `DuplicateResponse` if the peer already replied
    pub fn on_message(&mut self, sender: PeerId, body: &MessageBody) -> Result<(), TargetError> {
        if self.is_resolved() {
            return Ok(());
        }
        if !self.expected_senders.contains(&sender) {
            return Err(TargetError::UnexpectedSender(sender));
        }
        if !self.responded.insert(sender) {
            return Err(TargetError::DuplicateResponse(sender));
        }

        if body.error.is_ok() {
            let count = self.success_tally.entry(sha256(&body.payload)).or_insert(0);
            *count += 1;
            if *count >= self.required_identical {
                let result = from_payload::<CapabilityResponse>(&body.payload).map_err(|e| {
                    CapabilityError::Remote(format!("failed to decode response: {e}"))
                });
                self.resolve(result);
            }
        } else {
            let count = self.error_tally.entry(body.error_msg.clone()).or_insert(0);
            *count += 1;
            if *count >= self.required_identical {
                self.resolve(Err(CapabilityError::Remote(body.error_msg.clone())));
            }
        }
        Ok(())
    }

    /// Resolve with `err` unless already resolved.
    pub fn cancel(&mut self, err: CapabilityError) {
        self.resolve(Err(err));
    }

    fn resolve(&mut self, result: ResponseResult) {
        let Some(tx) = self.response_tx.take() else {
            return;
        };

        metrics::record_request_resolved(match &result {
            Ok(_) => "success",
            Err(CapabilityError::Timeout) => "timeout",
            Err(_) => "error",
        });
        debug!(message_id = %self.message_id, success = result.is_ok(), "Request resolved");

        let _ = tx.try_send(result);
        self.done.send_replace(true);
        self.sends.abort_all();
    }

    pub fn is_resolved(&self) -> bool {
        self.response_tx.is_none()
    }

    pub fn is_expired(&self) -> bool {
        self.created_at.elapsed() > self.request_timeout
    }

    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    /// Peers this request was (or will be) sent to.
    pub fn expected_senders(&self) -> &HashSet<PeerId> {
        &self.expected_senders
    }
}
