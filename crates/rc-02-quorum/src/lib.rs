//! # Quorum Primitives (RC-02)
//!
//! Pure building blocks shared by the protocol engines. Nothing in this crate
//! performs I/O or holds a lock; engines own these values behind their own
//! mutex.
//!
//! | Module | Purpose |
//! |--------|---------|
//! | `message_cache` | Per-event, per-peer message collection with readiness queries |
//! | `transmission` | Secret-keyed, deterministic send delays across a DON |
//! | `aggregation` | Reduce peer payloads to one value (mode aggregator) |

pub mod aggregation;
pub mod errors;
pub mod message_cache;
pub mod transmission;

pub use aggregation::{aggregate_mode_raw, Aggregator, ModeAggregator};
pub use errors::AggregationError;
pub use message_cache::MessageCache;
pub use transmission::{peer_id_to_transmission_delay, schedule_waves};
