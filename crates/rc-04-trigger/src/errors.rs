//! Trigger engine error types.

use rc_01_dispatcher::DispatchError;
use rc_02_quorum::AggregationError;
use shared_types::{CapabilityError, DonId, PeerId, TypesError};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TriggerError {
    #[error("peer {peer} is not a member of DON {don_id}")]
    NotDonMember { peer: PeerId, don_id: DonId },

    #[error("unknown calling DON {0}")]
    UnknownCallerDon(DonId),

    /// A `TriggerEvent` arrived without its metadata block.
    #[error("trigger event without metadata")]
    MissingMetadata,

    #[error("unexpected method {0}")]
    UnexpectedMethod(String),

    #[error(transparent)]
    Aggregation(#[from] AggregationError),

    #[error(transparent)]
    Types(#[from] TypesError),

    #[error(transparent)]
    Capability(#[from] CapabilityError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}
