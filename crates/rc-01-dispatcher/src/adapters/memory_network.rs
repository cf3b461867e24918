//! # In-Memory Network
//!
//! A `Transport` backed by tokio channels. Every node connected to the same
//! `InMemoryNetwork` can reach every other one; disconnecting a node makes it
//! unreachable and ends its receive stream.

use crate::domain::errors::DispatchError;
use crate::ports::outbound::{Transport, TransportMessage};
use async_trait::async_trait;
use parking_lot::RwLock;
use shared_types::PeerId;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

/// Shared switchboard for in-process nodes.
#[derive(Default)]
pub struct InMemoryNetwork {
    inboxes: RwLock<HashMap<PeerId, mpsc::UnboundedSender<TransportMessage>>>,
}

impl InMemoryNetwork {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Attach a node. Reconnecting an ID replaces its previous inbox.
    pub fn connect(self: &Arc<Self>, peer_id: PeerId) -> Arc<MemoryTransport> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inboxes.write().insert(peer_id, tx);
        Arc::new(MemoryTransport {
            peer_id,
            network: Arc::clone(self),
            inbox: Mutex::new(rx),
        })
    }

    /// Detach a node; messages to it fail from now on.
    pub fn disconnect(&self, peer_id: &PeerId) {
        self.inboxes.write().remove(peer_id);
    }

    pub fn is_connected(&self, peer_id: &PeerId) -> bool {
        self.inboxes.read().contains_key(peer_id)
    }

    fn deliver(&self, from: PeerId, to: PeerId, payload: Vec<u8>) -> Result<(), DispatchError> {
        let inboxes = self.inboxes.read();
        let inbox = inboxes
            .get(&to)
            .ok_or_else(|| DispatchError::Transport(format!("peer {to} unreachable")))?;
        inbox
            .send(TransportMessage {
                sender: from,
                payload,
            })
            .map_err(|_| DispatchError::Transport(format!("peer {to} closed")))
    }
}

/// One node's view of an `InMemoryNetwork`.
pub struct MemoryTransport {
    peer_id: PeerId,
    network: Arc<InMemoryNetwork>,
    inbox: Mutex<mpsc::UnboundedReceiver<TransportMessage>>,
}

#[async_trait]
impl Transport for MemoryTransport {
    fn peer_id(&self) -> PeerId {
        self.peer_id
    }

    async fn send(&self, peer: PeerId, payload: Vec<u8>) -> Result<(), DispatchError> {
        self.network.deliver(self.peer_id, peer, payload)
    }

    async fn receive(&self) -> Option<TransportMessage> {
        self.inbox.lock().await.recv().await
    }
}
