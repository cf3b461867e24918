//! # Dispatcher (RC-01)
//!
//! The single ingress/egress point of a node for remote capability traffic.
//!
//! ## Architecture
//!
//! This crate follows hexagonal architecture:
//! - **Domain Layer** (`domain/`): Envelope validation, no I/O
//! - **Ports Layer** (`ports/`): `DispatcherApi` and `Receiver` (inbound),
//!   `Transport` and `MessageSigner` (outbound)
//! - **Service Layer** (`service/`): The `Dispatcher` and its inbound loop
//! - **Adapters** (`adapters/`): Ed25519 signer and an in-memory network
//!
//! ## Message Flow
//!
//! ```text
//! Outbound: MessageBody -> stamp header -> encode -> sign -> envelope -> Transport
//! Inbound:  Transport -> rate limit -> validate -> route by (capability, DON) -> Receiver
//! ```
//!
//! ## Security Notes
//!
//! - The transport-level sender must be the body's declared author (no relaying)
//! - An error reply is never answered with another error reply

pub mod adapters;
pub mod domain;
pub mod metrics;
pub mod ports;
pub mod service;

#[cfg(feature = "test-utils")]
pub mod test_utils;

// Re-export public API
pub use adapters::memory_network::{InMemoryNetwork, MemoryTransport};
pub use adapters::signer::KeyPairSigner;
pub use domain::errors::{DispatchError, InvalidMessage, ValidationError};
pub use domain::validation::validate_message;
pub use ports::inbound::{DispatcherApi, Receiver};
pub use ports::outbound::{MessageSigner, Transport, TransportMessage};
pub use service::Dispatcher;
