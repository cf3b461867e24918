//! Adapters for the outbound ports.

pub mod memory_network;
pub mod signer;
