//! # Dispatcher Service
//!
//! Owns the node's transport and signer, and the table of registered
//! receivers keyed by `(capability_id, capability_don_id)`.
//!
//! ## Inbound Pipeline
//!
//! ```text
//! frame -> SenderRateLimiter -> validate_message -> receiver queue -> Receiver::receive
//! ```
//!
//! Each receiver gets its own bounded queue and worker task, so a slow engine
//! only delays its own traffic. A full queue drops the message.
//!
//! ## Error Replies
//!
//! Validation failures and unknown routing keys are answered with an error
//! reply carrying no payload. Inbound messages that already are error
//! replies are never answered.

use crate::domain::errors::DispatchError;
use crate::domain::validation::validate_message;
use crate::metrics;
use crate::ports::inbound::{DispatcherApi, Receiver};
use crate::ports::outbound::{MessageSigner, Transport, TransportMessage};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use shared_types::{
    sanitize_log_string, Clock, DispatcherConfig, DonId, ErrorCode, MessageBody, PeerId,
    SenderRateLimiter, SignedMessage, SystemClock,
};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};


type ReceiverKey = (String, DonId);

struct ReceiverSlot {
    queue: mpsc::Sender<MessageBody>,
    worker: JoinHandle<()>,
}

/// Dispatcher
///
/// One per node. Call `start()` to run the inbound loop and `close()` to
/// stop it together with every receiver worker.
pub struct Dispatcher<T, S>
where
    T: Transport + 'static,
    S: MessageSigner + 'static,
{
    transport: Arc<T>,
    signer: Arc<S>,
    peer_id: PeerId,
    config: DispatcherConfig,
    clock: Arc<dyn Clock>,
    rate_limiter: SenderRateLimiter,
    receivers: RwLock<HashMap<ReceiverKey, ReceiverSlot>>,
    shutdown: watch::Sender<bool>,
    inbound_task: Mutex<Option<JoinHandle<()>>>,
}

impl<T, S> Dispatcher<T, S>
where
    T: Transport + 'static,
    S: MessageSigner + 'static,
{
    pub fn new(transport: Arc<T>, signer: Arc<S>, mut config: DispatcherConfig) -> Self {
        config.apply_defaults();
        let (shutdown, _) = watch::channel(false);
        Self {
            peer_id: transport.peer_id(),
            rate_limiter: SenderRateLimiter::new(config.rate_limit),
            transport,
            signer,
            config,
            clock: Arc::new(SystemClock),
            receivers: RwLock::new(HashMap::new()),
            shutdown,
            inbound_task: Mutex::new(None),
        }
    }

    /// Set custom clock (for testing)
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Spawn the inbound loop. Calling it twice has no effect.
    pub fn start(self: &Arc<Self>) {
        let mut task = self.inbound_task.lock();
        if task.is_some() {
            return;
        }
        let dispatcher = Arc::clone(self);
        let shutdown = self.shutdown.subscribe();
        *task = Some(tokio::spawn(dispatcher.run(shutdown)));
        info!(peer_id = %self.peer_id, "Dispatcher started");
    }

    /// Stop the inbound loop and every receiver worker.
    pub async fn close(&self) {
        self.shutdown.send_replace(true);

        let task = self.inbound_task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }

        for (_, slot) in self.receivers.write().drain() {
            slot.worker.abort();
        }
        info!(peer_id = %self.peer_id, "Dispatcher closed");
    }

    /// Number of registered receivers.
    pub fn receiver_count(&self) -> usize {
        self.receivers.read().len()
    }

    async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                frame = self.transport.receive() => match frame {
                    Some(frame) => self.handle_inbound(frame).await,
                    None => {
                        info!(peer_id = %self.peer_id, "Transport closed, stopping inbound loop");
                        break;
                    }
                },
            }
        }
    }

    async fn handle_inbound(&self, frame: TransportMessage) {
        if !self.rate_limiter.allow(&frame.sender) {
            debug!(peer_id = %frame.sender, "Rate limit exceeded, dropping message");
            metrics::record_message_dropped("rate_limited");
            return;
        }

        let body = match validate_message(&frame.payload, &frame.sender, &self.peer_id) {
            Ok(body) => body,
            Err(invalid) => {
                warn!(
                    peer_id = %frame.sender,
                    reason = %invalid.reason,
                    "Received invalid message"
                );
                metrics::record_message_dropped("validation_failed");
                if let Some(body) = invalid.partial_body {
                    self.try_respond_with_error(
                        frame.sender,
                        body,
                        ErrorCode::ValidationFailed,
                        invalid.reason.to_string(),
                    )
                    .await;
                }
                return;
            }
        };

        let key = (body.capability_id.clone(), body.capability_don_id);
        let queue = self.receivers.read().get(&key).map(|slot| slot.queue.clone());

        let Some(queue) = queue else {
            warn!(
                capability_id = %sanitize_log_string(&body.capability_id),
                don_id = body.capability_don_id,
                peer_id = %frame.sender,
                "No receiver registered for capability"
            );
            metrics::record_message_dropped("capability_not_found");
            self.try_respond_with_error(
                frame.sender,
                body,
                ErrorCode::CapabilityNotFound,
                "capability not found".to_string(),
            )
            .await;
            return;
        };

        match queue.try_send(body) {
            Ok(()) => {
                metrics::record_message_received();
                metrics::set_receiver_queue_usage(
                    &key.0,
                    self.config.receiver_buffer_size - queue.capacity(),
                );
            }
            Err(TrySendError::Full(body)) => {
                warn!(
                    capability_id = %sanitize_log_string(&body.capability_id),
                    don_id = body.capability_don_id,
                    "Receiver queue full, dropping message"
                );
                metrics::record_message_dropped("queue_full");
            }
            Err(TrySendError::Closed(_)) => {
                debug!(don_id = key.1, "Receiver removed while routing, dropping message");
            }
        }
    }

    async fn try_respond_with_error(
        &self,
        peer: PeerId,
        body: MessageBody,
        code: ErrorCode,
        error_msg: String,
    ) {
        if body.is_error() {
            debug!(peer_id = %peer, "Not replying to an error reply");
            return;
        }

        let reply = MessageBody::new(
            body.capability_id,
            body.capability_don_id,
            body.caller_don_id,
            body.method,
        )
        .with_message_id(body.message_id)
        .with_error(code, error_msg);

        if let Err(e) = self.send_message(peer, reply).await {
            error!(peer_id = %peer, error = %e, "Failed to send error reply");
        }
    }

    async fn send_message(&self, peer: PeerId, mut body: MessageBody) -> Result<(), DispatchError> {
        if *self.shutdown.borrow() {
            return Err(DispatchError::Closed);
        }

        body.version = self.config.supported_version;
        body.sender = self.peer_id.to_vec();
        body.receiver = peer.to_vec();
        body.timestamp = self.clock.now_millis();

        let raw = body.encode()?;
        let signature = self.signer.sign(&raw)?;
        let envelope = SignedMessage {
            signature,
            body: raw,
        }
        .encode()?;

        self.transport.send(peer, envelope).await?;
        metrics::record_message_sent();
        Ok(())
    }
}

#[async_trait]
impl<T, S> DispatcherApi for Dispatcher<T, S>
where
    T: Transport + 'static,
    S: MessageSigner + 'static,
{
    fn peer_id(&self) -> PeerId {
        self.peer_id
    }

    async fn send(&self, peer: PeerId, body: MessageBody) -> Result<(), DispatchError> {
        self.send_message(peer, body).await
    }

    fn set_receiver(
        &self,
        capability_id: &str,
        don_id: DonId,
        receiver: Arc<dyn Receiver>,
    ) -> Result<(), DispatchError> {
        let mut receivers = self.receivers.write();
        let key = (capability_id.to_string(), don_id);
        if receivers.contains_key(&key) {
            return Err(DispatchError::ReceiverExists {
                capability_id: capability_id.to_string(),
                don_id,
            });
        }

        let (queue, mut inbox) = mpsc::channel::<MessageBody>(self.config.receiver_buffer_size);
        let worker = tokio::spawn(async move {
            while let Some(body) = inbox.recv().await {
                receiver.receive(body).await;
            }
        });

        receivers.insert(key, ReceiverSlot { queue, worker });
        debug!(capability_id, don_id, "Receiver registered");
        Ok(())
    }

    fn remove_receiver(&self, capability_id: &str, don_id: DonId) {
        let removed = self
            .receivers
            .write()
            .remove(&(capability_id.to_string(), don_id));
        if let Some(slot) = removed {
            slot.worker.abort();
            metrics::set_receiver_queue_usage(capability_id, 0);
            debug!(capability_id, don_id, "Receiver removed");
        }
    }
}
