//! Domain layer: envelope validation and error types.

pub mod errors;
pub mod validation;
