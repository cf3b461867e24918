//! Driving ports (Inbound API)

use crate::domain::errors::DispatchError;
use async_trait::async_trait;
use shared_types::{DonId, MessageBody, PeerId};
use std::sync::Arc;

/// Something that accepts routed, already-authenticated messages.
///
/// Protocol engines hand an `Arc<dyn Receiver>` to the dispatcher when they
/// register, so the dispatcher never needs their concrete type.
#[async_trait]
pub trait Receiver: Send + Sync {
    async fn receive(&self, body: MessageBody);
}

/// API the protocol engines use to talk to the network.
#[async_trait]
pub trait DispatcherApi: Send + Sync {
    /// The local node's identity.
    fn peer_id(&self) -> PeerId;

    /// Stamp, sign and send `body` to `peer`.
    async fn send(&self, peer: PeerId, body: MessageBody) -> Result<(), DispatchError>;

    /// Register the single receiver for `(capability_id, don_id)`.
    ///
    /// # Errors
    /// - `ReceiverExists` if one is already registered
    fn set_receiver(
        &self,
        capability_id: &str,
        don_id: DonId,
        receiver: Arc<dyn Receiver>,
    ) -> Result<(), DispatchError>;

    /// Remove a receiver. Removing an unknown key is a no-op.
    fn remove_receiver(&self, capability_id: &str, don_id: DonId);
}
