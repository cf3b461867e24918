//! # Remote Target Capabilities
//!
//! Request/response protocol for calling a target capability hosted on
//! another DON.
//!
//! ## Components
//!
//! | Component | Runs on | Role |
//! |-----------|---------|------|
//! | `TargetClient` | workflow DON | Fans a request out, waits for `F+1` identical replies |
//! | `TargetServer` | capability DON | Waits for `F+1` requesters, executes once, replays |
//!
//! Both sides register as receivers with the dispatcher and sweep expired
//! requests in the background.

pub mod client;
pub mod errors;
pub mod metrics;
pub mod request;
pub mod server;

pub use client::TargetClient;
pub use errors::TargetError;
pub use request::{ClientRequest, ExecutionFailure, ExecutionOutcome, ServerAction, ServerRequest};
pub use server::TargetServer;
