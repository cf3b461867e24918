//! Dispatcher error types.

use shared_types::{DonId, MessageBody, TypesError};
use thiserror::Error;

/// Errors surfaced by the dispatcher API.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    /// A receiver is already registered for this capability instance.
    #[error("receiver already exists for capability {capability_id} on DON {don_id}")]
    ReceiverExists {
        capability_id: String,
        don_id: DonId,
    },

    #[error("failed to encode message: {0}")]
    Encode(String),

    #[error("failed to sign message: {0}")]
    Signing(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("dispatcher is closed")]
    Closed,
}

impl From<TypesError> for DispatchError {
    fn from(err: TypesError) -> Self {
        DispatchError::Encode(err.to_string())
    }
}

/// Reasons an inbound envelope is rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),

    #[error("malformed message body: {0}")]
    MalformedBody(String),

    #[error("invalid sender length: {0}")]
    InvalidSenderLength(usize),

    #[error("invalid receiver length: {0}")]
    InvalidReceiverLength(usize),

    #[error("signature verification failed: {0}")]
    InvalidSignature(String),

    #[error("declared sender does not match transport sender")]
    SenderMismatch,

    #[error("declared receiver does not match local peer")]
    ReceiverMismatch,
}

/// A failed validation, with the body when it could be decoded so the
/// dispatcher can still address an error reply.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{reason}")]
pub struct InvalidMessage {
    pub reason: ValidationError,
    pub partial_body: Option<MessageBody>,
}

impl InvalidMessage {
    pub(crate) fn without_body(reason: ValidationError) -> Self {
        Self {
            reason,
            partial_body: None,
        }
    }

    pub(crate) fn with_body(reason: ValidationError, body: MessageBody) -> Self {
        Self {
            reason,
            partial_body: Some(body),
        }
    }
}
