//! # Aggregation
//!
//! Reduces the payloads collected from several peers to one value.
//!
//! The mode aggregator counts byte-identical payloads and accepts the most
//! frequent one if it occurs at least `min_identical` times. With
//! `min_identical = F+1` at least one honest peer vouches for the result.

use crate::errors::AggregationError;
use serde::de::DeserializeOwned;
use shared_crypto::sha256;
use shared_types::from_payload;
use std::collections::HashMap;
use std::marker::PhantomData;

/// Aggregation policy.
pub trait Aggregator: Send + Sync {
    type Output;

    fn aggregate(&self, event_id: &str, payloads: &[Vec<u8>])
        -> Result<Self::Output, AggregationError>;
}

/// Most frequent payload occurring at least `min_identical` times.
///
/// Ties are broken by first appearance.
pub fn aggregate_mode_raw(
    payloads: &[Vec<u8>],
    min_identical: usize,
) -> Result<&[u8], AggregationError> {
    let mut counts: HashMap<[u8; 32], (usize, usize)> = HashMap::new();
    for (index, payload) in payloads.iter().enumerate() {
        counts.entry(sha256(payload)).or_insert((0, index)).0 += 1;
    }

    let best = counts
        .values()
        .copied()
        .max_by(|(count_a, first_a), (count_b, first_b)| {
            count_a.cmp(count_b).then(first_b.cmp(first_a))
        });

    match best {
        Some((count, index)) if count >= min_identical => Ok(payloads[index].as_slice()),
        Some((count, _)) => Err(AggregationError::NotEnoughIdentical {
            required: min_identical,
            found: count,
        }),
        None => Err(AggregationError::NotEnoughIdentical {
            required: min_identical,
            found: 0,
        }),
    }
}

/// Mode aggregator decoding the winning payload as `T`.
pub struct ModeAggregator<T> {
    min_identical: usize,
    _output: PhantomData<fn() -> T>,
}

impl<T> ModeAggregator<T> {
    pub fn new(min_identical: usize) -> Self {
        Self {
            min_identical,
            _output: PhantomData,
        }
    }

    pub fn min_identical(&self) -> usize {
        self.min_identical
    }
}

impl<T: DeserializeOwned> Aggregator for ModeAggregator<T> {
    type Output = T;

    fn aggregate(&self, _event_id: &str, payloads: &[Vec<u8>]) -> Result<T, AggregationError> {
        let winner = aggregate_mode_raw(payloads, self.min_identical)?;
        from_payload(winner).map_err(|e| AggregationError::Decode(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Deserialize)]
    struct Event {
        id: u32,
    }

    fn p(s: &str) -> Vec<u8> {
        s.as_bytes().to_vec()
    }

    #[test]
    fn test_mode_wins() {
        let payloads = vec![p("a"), p("b"), p("a"), p("c"), p("a")];
        assert_eq!(aggregate_mode_raw(&payloads, 2).unwrap(), b"a");
    }

    #[test]
    fn test_below_threshold_fails() {
        let payloads = vec![p("a"), p("b"), p("a")];
        assert_eq!(
            aggregate_mode_raw(&payloads, 3),
            Err(AggregationError::NotEnoughIdentical {
                required: 3,
                found: 2
            })
        );
    }

    #[test]
    fn test_empty_input_fails() {
        assert!(aggregate_mode_raw(&[], 1).is_err());
    }

    #[test]
    fn test_higher_count_beats_earlier_qualifier() {
        let payloads = vec![p("x"), p("x"), p("y"), p("y"), p("y")];
        assert_eq!(aggregate_mode_raw(&payloads, 2).unwrap(), b"y");
    }

    #[test]
    fn test_tie_goes_to_first_seen() {
        let payloads = vec![p("y"), p("x"), p("x"), p("y")];
        assert_eq!(aggregate_mode_raw(&payloads, 2).unwrap(), b"y");
    }

    #[test]
    fn test_mode_aggregator_decodes() {
        let agg = ModeAggregator::<Event>::new(2);
        let payloads = vec![p(r#"{"id":7}"#), p(r#"{"id":7}"#), p(r#"{"id":8}"#)];
        assert_eq!(agg.aggregate("ev", &payloads).unwrap(), Event { id: 7 });
    }

    #[test]
    fn test_mode_aggregator_reports_decode_failure() {
        let agg = ModeAggregator::<Event>::new(1);
        assert!(matches!(
            agg.aggregate("ev", &[p("not json")]),
            Err(AggregationError::Decode(_))
        ));
    }
}
