//! # Signed Wire Envelope
//!
//! Every message exchanged between DONs travels as two nested frames:
//!
//! ```text
//! SignedMessage { signature, body: bincode(MessageBody) }
//! ```
//!
//! ## Security Properties
//!
//! - The signature covers exactly the serialized body bytes.
//! - `sender` and `receiver` stay raw bytes on the wire so that a malformed
//!   length can be reported as a validation failure instead of a decode error.
//! - An error reply never carries a payload.

use crate::{DonId, PeerId, TypesError};
use bincode::Options;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, Bytes};
use std::fmt;

/// The only protocol version currently produced.
pub const PROTOCOL_VERSION: u32 = 1;

/// Upper bound on any decoded frame, protects against hostile length prefixes.
pub const MAX_MESSAGE_SIZE: u64 = 5 * 1024 * 1024;

fn codec() -> impl Options {
    bincode::DefaultOptions::new().with_limit(MAX_MESSAGE_SIZE)
}

/// Closed set of protocol methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Method {
    RegisterTrigger,
    UnregisterTrigger,
    TriggerEvent,
    Execute,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Method::RegisterTrigger => "RegisterTrigger",
            Method::UnregisterTrigger => "UnregisterTrigger",
            Method::TriggerEvent => "TriggerEvent",
            Method::Execute => "Execute",
        };
        f.write_str(name)
    }
}

/// Protocol-level error codes carried in a reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ErrorCode {
    #[default]
    Ok,
    ValidationFailed,
    CapabilityNotFound,
    InvalidRequest,
    InternalError,
    Timeout,
}

impl ErrorCode {
    /// Whether this is the success code.
    #[must_use]
    pub fn is_ok(&self) -> bool {
        matches!(self, ErrorCode::Ok)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorCode::Ok => "OK",
            ErrorCode::ValidationFailed => "VALIDATION_FAILED",
            ErrorCode::CapabilityNotFound => "CAPABILITY_NOT_FOUND",
            ErrorCode::InvalidRequest => "INVALID_REQUEST",
            ErrorCode::InternalError => "INTERNAL_ERROR",
            ErrorCode::Timeout => "TIMEOUT",
        };
        f.write_str(name)
    }
}

/// Routing data attached to `TriggerEvent` messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerEventMetadata {
    /// Identifier of the event emitted by the underlying trigger.
    pub trigger_event_id: String,
    /// Workflows the event is addressed to.
    pub workflow_ids: Vec<String>,
}

/// The protocol unit once the envelope is opened.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageBody {
    // =========================================================================
    // HEADER SECTION (stamped by the dispatcher)
    // =========================================================================
    /// Protocol version.
    pub version: u32,
    /// Author of the message; must equal the transport-level sender.
    #[serde_as(as = "Bytes")]
    pub sender: Vec<u8>,
    /// Intended recipient; must equal the local peer ID.
    #[serde_as(as = "Bytes")]
    pub receiver: Vec<u8>,
    /// Milliseconds since the Unix epoch at send time.
    pub timestamp: i64,

    // =========================================================================
    // ROUTING SECTION
    // =========================================================================
    /// Capability the message is about.
    pub capability_id: String,
    /// DON hosting the capability.
    pub capability_don_id: DonId,
    /// DON of the calling workflow.
    pub caller_don_id: DonId,
    /// Protocol method.
    pub method: Method,
    /// Caller-assigned correlation key.
    #[serde_as(as = "Bytes")]
    pub message_id: Vec<u8>,

    // =========================================================================
    // PAYLOAD SECTION
    // =========================================================================
    /// Method-specific payload, empty when `error != Ok`.
    #[serde_as(as = "Bytes")]
    pub payload: Vec<u8>,
    /// Error code of a reply.
    pub error: ErrorCode,
    /// Human-readable error message.
    pub error_msg: String,
    /// Present on `TriggerEvent` messages.
    pub metadata: Option<TriggerEventMetadata>,
}

impl MessageBody {
    /// Start a message for the given routing key; header fields are left for
    /// the dispatcher to stamp.
    pub fn new(
        capability_id: impl Into<String>,
        capability_don_id: DonId,
        caller_don_id: DonId,
        method: Method,
    ) -> Self {
        Self {
            version: 0,
            sender: Vec::new(),
            receiver: Vec::new(),
            timestamp: 0,
            capability_id: capability_id.into(),
            capability_don_id,
            caller_don_id,
            method,
            message_id: Vec::new(),
            payload: Vec::new(),
            error: ErrorCode::Ok,
            error_msg: String::new(),
            metadata: None,
        }
    }

    /// Attach a correlation ID.
    #[must_use]
    pub fn with_message_id(mut self, message_id: impl Into<Vec<u8>>) -> Self {
        self.message_id = message_id.into();
        self
    }

    /// Attach a payload.
    #[must_use]
    pub fn with_payload(mut self, payload: Vec<u8>) -> Self {
        self.payload = payload;
        self
    }

    /// Attach trigger event metadata.
    #[must_use]
    pub fn with_metadata(mut self, metadata: TriggerEventMetadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Turn this message into an error reply, dropping the payload.
    #[must_use]
    pub fn with_error(mut self, error: ErrorCode, error_msg: impl Into<String>) -> Self {
        self.error = error;
        self.error_msg = error_msg.into();
        self.payload = Vec::new();
        self
    }

    /// The declared author as a `PeerId`.
    pub fn sender_peer_id(&self) -> Result<PeerId, TypesError> {
        PeerId::from_slice(&self.sender)
    }

    /// The declared recipient as a `PeerId`.
    pub fn receiver_peer_id(&self) -> Result<PeerId, TypesError> {
        PeerId::from_slice(&self.receiver)
    }

    /// Correlation ID rendered as text (lossy for non-UTF-8 IDs).
    #[must_use]
    pub fn message_id_str(&self) -> String {
        String::from_utf8_lossy(&self.message_id).into_owned()
    }

    /// Whether this message is an error reply.
    #[must_use]
    pub fn is_error(&self) -> bool {
        !self.error.is_ok()
    }

    /// Serialize for signing.
    pub fn encode(&self) -> Result<Vec<u8>, TypesError> {
        codec()
            .serialize(self)
            .map_err(|e| TypesError::Encode(e.to_string()))
    }

    /// Deserialize from signed bytes.
    pub fn decode(bytes: &[u8]) -> Result<Self, TypesError> {
        codec()
            .deserialize(bytes)
            .map_err(|e| TypesError::Decode(e.to_string()))
    }
}

/// Outer frame: a signature over the raw body bytes.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedMessage {
    /// Ed25519 signature by the body's sender.
    #[serde_as(as = "Bytes")]
    pub signature: Vec<u8>,
    /// Serialized `MessageBody`.
    #[serde_as(as = "Bytes")]
    pub body: Vec<u8>,
}

impl SignedMessage {
    /// Serialize for the transport.
    pub fn encode(&self) -> Result<Vec<u8>, TypesError> {
        codec()
            .serialize(self)
            .map_err(|e| TypesError::Encode(e.to_string()))
    }

    /// Deserialize from transport bytes.
    pub fn decode(bytes: &[u8]) -> Result<Self, TypesError> {
        codec()
            .deserialize(bytes)
            .map_err(|e| TypesError::Decode(e.to_string()))
    }
}
