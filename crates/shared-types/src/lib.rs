//! # Shared Types Crate
//!
//! Domain entities, the signed wire envelope and the capability model shared
//! by every remote capability crate.
//!
//! ## Design Principles
//!
//! - **Single Source of Truth**: All cross-crate types are defined here.
//! - **Identity is the Key**: A `PeerId` is both the network address and the
//!   ed25519 verification key of a node.
//! - **Deterministic Payloads**: Identical values encode to identical bytes,
//!   which is what every quorum tally compares.

pub mod capabilities;
pub mod clock;
pub mod config;
pub mod entities;
pub mod envelope;
pub mod errors;
pub mod rate_limiter;
pub mod sanitize;

pub use capabilities::*;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::*;
pub use entities::*;
pub use envelope::*;
pub use errors::*;
pub use rate_limiter::{RateLimiter, SenderRateLimiter};
pub use sanitize::sanitize_log_string;
