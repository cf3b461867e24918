//! # Hashing
//!
//! - `sha256`: identity of a payload when counting byte-identical replies.
//! - `keccak256`: seed derivation for transmission schedules.

use sha2::{Digest, Sha256};
use sha3::Keccak256;

/// 256-bit hash output.
pub type Hash = [u8; 32];

/// SHA-256 of `data`.
pub fn sha256(data: &[u8]) -> Hash {
    Sha256::digest(data).into()
}

/// Lowercase hex SHA-256 of `data`.
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(sha256(data))
}

/// Keccak-256 over the concatenation of `inputs`.
pub fn keccak256(inputs: &[&[u8]]) -> Hash {
    let mut hasher = Keccak256::new();
    for input in inputs {
        hasher.update(input);
    }
    hasher.finalize().into()
}
