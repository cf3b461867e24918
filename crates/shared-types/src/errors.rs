//! # Error Types
//!
//! Errors raised while building or decoding the shared types.

use thiserror::Error;

/// Errors that can occur while handling shared types.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TypesError {
    /// A peer identifier had the wrong number of bytes.
    #[error("Invalid peer ID length: expected {expected}, got {actual}")]
    InvalidPeerIdLength { expected: usize, actual: usize },

    /// Encoding a wire structure failed.
    #[error("Encoding failed: {0}")]
    Encode(String),

    /// Decoding a wire structure failed.
    #[error("Decoding failed: {0}")]
    Decode(String),

    /// A configuration value could not be interpreted.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A DON definition is inconsistent.
    #[error("Invalid DON {don_id}: {reason}")]
    InvalidDon { don_id: u32, reason: String },
}
