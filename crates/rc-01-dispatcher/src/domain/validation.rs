//! # Message Validator
//!
//! Authenticates an inbound envelope and opens its body.
//!
//! ## Checks (in order)
//!
//! 1. Envelope and body decode
//! 2. `sender` and `receiver` are exactly `PEER_ID_LENGTH` bytes
//! 3. The signature over the raw body verifies against `sender` as an
//!    ed25519 key
//! 4. `sender` equals the transport-level sender
//! 5. `receiver` equals the local peer
//!
//! Checks 4 and 5 fail even when the signature is valid.

use crate::domain::errors::{InvalidMessage, ValidationError};
use shared_crypto::{Ed25519PublicKey, Ed25519Signature};
use shared_types::{MessageBody, PeerId, SignedMessage, PEER_ID_LENGTH};

/// Validate a raw transport payload addressed to `local_peer`.
pub fn validate_message(
    raw: &[u8],
    transport_sender: &PeerId,
    local_peer: &PeerId,
) -> Result<MessageBody, InvalidMessage> {
    let envelope = SignedMessage::decode(raw).map_err(|e| {
        InvalidMessage::without_body(ValidationError::MalformedEnvelope(e.to_string()))
    })?;

    let body = MessageBody::decode(&envelope.body).map_err(|e| {
        InvalidMessage::without_body(ValidationError::MalformedBody(e.to_string()))
    })?;

    if body.sender.len() != PEER_ID_LENGTH {
        let len = body.sender.len();
        return Err(InvalidMessage::with_body(
            ValidationError::InvalidSenderLength(len),
            body,
        ));
    }
    if body.receiver.len() != PEER_ID_LENGTH {
        let len = body.receiver.len();
        return Err(InvalidMessage::with_body(
            ValidationError::InvalidReceiverLength(len),
            body,
        ));
    }

    if let Err(e) = verify_signature(&body.sender, &envelope.signature, &envelope.body) {
        return Err(InvalidMessage::with_body(e, body));
    }

    if body.sender.as_slice() != transport_sender.as_bytes() {
        return Err(InvalidMessage::with_body(
            ValidationError::SenderMismatch,
            body,
        ));
    }
    if body.receiver.as_slice() != local_peer.as_bytes() {
        return Err(InvalidMessage::with_body(
            ValidationError::ReceiverMismatch,
            body,
        ));
    }

    Ok(body)
}

fn verify_signature(sender: &[u8], signature: &[u8], signed: &[u8]) -> Result<(), ValidationError> {
    let key = Ed25519PublicKey::from_slice(sender)
        .map_err(|e| ValidationError::InvalidSignature(e.to_string()))?;
    let signature = Ed25519Signature::from_slice(signature)
        .map_err(|e| ValidationError::InvalidSignature(e.to_string()))?;
    key.verify(signed, &signature)
        .map_err(|e| ValidationError::InvalidSignature(e.to_string()))
}
