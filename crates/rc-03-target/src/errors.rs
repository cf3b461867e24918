//! Target engine error types.

use rc_01_dispatcher::DispatchError;
use shared_types::{DonId, PeerId};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TargetError {
    /// A response came from a peer that was never sent the request.
    #[error("response from unexpected sender {0}")]
    UnexpectedSender(PeerId),

    #[error("response from {0} already received")]
    DuplicateResponse(PeerId),

    #[error("peer {peer} is not a member of DON {don_id}")]
    NotDonMember { peer: PeerId, don_id: DonId },

    #[error("request from {0} already received")]
    DuplicateRequester(PeerId),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}
