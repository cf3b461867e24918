//! Per-request state machines.
//!
//! - `ClientRequest`: caller side, fans a request out and tallies replies
//! - `ServerRequest`: callee side, collects requesters and replays one result

pub mod client_request;
pub mod server_request;

pub use client_request::ClientRequest;
pub use server_request::{ExecutionFailure, ExecutionOutcome, ServerAction, ServerRequest};
