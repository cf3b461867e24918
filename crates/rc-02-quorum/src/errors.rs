//! Aggregation error types.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AggregationError {
    #[error("not enough identical responses found: need {required}, best has {found}")]
    NotEnoughIdentical { required: usize, found: usize },

    #[error("failed to decode aggregated payload: {0}")]
    Decode(String),
}
