//! # Test Utilities
//!
//! A `DispatcherApi` that records instead of sending, for engine tests.
//!
//! Enable with the `test-utils` feature flag.

use crate::domain::errors::DispatchError;
use crate::ports::inbound::{DispatcherApi, Receiver};
use async_trait::async_trait;
use parking_lot::Mutex;
use shared_types::{DonId, MessageBody, PeerId};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Records every sent message and registered receiver.
pub struct RecordingDispatcher {
    peer_id: PeerId,
    sent: Mutex<Vec<(PeerId, MessageBody)>>,
    receivers: Mutex<HashMap<(String, DonId), Arc<dyn Receiver>>>,
    notify: Mutex<Option<mpsc::UnboundedSender<(PeerId, MessageBody)>>>,
}

impl RecordingDispatcher {
    pub fn new(peer_id: PeerId) -> Arc<Self> {
        Arc::new(Self {
            peer_id,
            sent: Mutex::new(Vec::new()),
            receivers: Mutex::new(HashMap::new()),
            notify: Mutex::new(None),
        })
    }

    /// Stream of sent messages, for tests that wait on background sends.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<(PeerId, MessageBody)> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.notify.lock() = Some(tx);
        rx
    }

    /// Everything sent so far.
    pub fn sent(&self) -> Vec<(PeerId, MessageBody)> {
        self.sent.lock().clone()
    }

    /// Messages sent to `peer`.
    pub fn sent_to(&self, peer: &PeerId) -> Vec<MessageBody> {
        self.sent
            .lock()
            .iter()
            .filter(|(to, _)| to == peer)
            .map(|(_, body)| body.clone())
            .collect()
    }

    pub fn clear(&self) {
        self.sent.lock().clear();
    }

    pub fn has_receiver(&self, capability_id: &str, don_id: DonId) -> bool {
        self.receivers
            .lock()
            .contains_key(&(capability_id.to_string(), don_id))
    }
}

#[async_trait]
impl DispatcherApi for RecordingDispatcher {
    fn peer_id(&self) -> PeerId {
        self.peer_id
    }

    async fn send(&self, peer: PeerId, mut body: MessageBody) -> Result<(), DispatchError> {
        body.sender = self.peer_id.to_vec();
        body.receiver = peer.to_vec();
        self.sent.lock().push((peer, body.clone()));
        if let Some(tx) = self.notify.lock().as_ref() {
            let _ = tx.send((peer, body));
        }
        Ok(())
    }

    fn set_receiver(
        &self,
        capability_id: &str,
        don_id: DonId,
        receiver: Arc<dyn Receiver>,
    ) -> Result<(), DispatchError> {
        let mut receivers = self.receivers.lock();
        let key = (capability_id.to_string(), don_id);
        if receivers.contains_key(&key) {
            return Err(DispatchError::ReceiverExists {
                capability_id: capability_id.to_string(),
                don_id,
            });
        }
        receivers.insert(key, receiver);
        Ok(())
    }

    fn remove_receiver(&self, capability_id: &str, don_id: DonId) {
        self.receivers
            .lock()
            .remove(&(capability_id.to_string(), don_id));
    }
}
