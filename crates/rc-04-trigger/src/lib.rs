//! # Remote Trigger Capabilities
//!
//! Registration and event streaming protocol for triggers hosted on another
//! DON.
//!
//! | Component | Runs on | Role |
//! |-----------|---------|------|
//! | `TriggerSubscriber` | workflow DON | Refreshes registrations, aggregates events |
//! | `TriggerPublisher` | capability DON | Registers on `2F+1` requests, fans out events |

pub mod errors;
pub mod metrics;
pub mod publisher;
pub mod subscriber;

pub use errors::TriggerError;
pub use publisher::{RegistrationKey, TriggerPublisher};
pub use subscriber::{EventAggregator, TriggerSubscriber};
