//! Ports layer: inbound API and outbound collaborators.

pub mod inbound;
pub mod outbound;
