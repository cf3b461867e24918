//! Driven ports (Outbound dependencies)

use crate::domain::errors::DispatchError;
use async_trait::async_trait;
use shared_types::PeerId;

/// A frame as delivered by the network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportMessage {
    /// Peer the transport received the frame from.
    pub sender: PeerId,
    pub payload: Vec<u8>,
}

/// Peer-to-peer network transport.
#[async_trait]
pub trait Transport: Send + Sync {
    /// The local node's identity on the network.
    fn peer_id(&self) -> PeerId;

    async fn send(&self, peer: PeerId, payload: Vec<u8>) -> Result<(), DispatchError>;

    /// Next inbound frame, or `None` once the transport is closed.
    async fn receive(&self) -> Option<TransportMessage>;
}

/// Signs serialized message bodies with the node's key.
pub trait MessageSigner: Send + Sync {
    fn sign(&self, data: &[u8]) -> Result<Vec<u8>, DispatchError>;
}
