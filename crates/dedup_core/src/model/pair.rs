//! Scored candidate pairs produced by the external matcher.

use crate::model::record::RecordId;
use serde::{Deserialize, Serialize};

/// One scored comparison emitted by the probabilistic matcher.
///
/// Pairs are undirected; `(a, b)` and `(b, a)` describe the same edge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidatePair {
    pub record_id_left: RecordId,
    pub record_id_right: RecordId,
    /// Match probability in `[0, 1]`.
    pub match_probability: f64,
}

impl CandidatePair {
    pub fn new(left: RecordId, right: RecordId, match_probability: f64) -> Self {
        Self {
            record_id_left: left,
            record_id_right: right,
            match_probability,
        }
    }

    /// Inclusive threshold check: a probability equal to the threshold is accepted.
    pub fn is_accepted(&self, threshold: f64) -> bool {
        self.match_probability >= threshold
    }

    /// Endpoint ids ordered so that `(a, b)` and `(b, a)` compare equal.
    pub fn unordered_key(&self) -> (RecordId, RecordId) {
        unordered(&self.record_id_left, &self.record_id_right)
    }
}

/// Reference duplicate pair curated outside the matcher (ground truth).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferencePair {
    pub record_id_a: RecordId,
    pub record_id_b: RecordId,
}

impl ReferencePair {
    pub fn new(a: RecordId, b: RecordId) -> Self {
        Self {
            record_id_a: a,
            record_id_b: b,
        }
    }

    pub fn unordered_key(&self) -> (RecordId, RecordId) {
        unordered(&self.record_id_a, &self.record_id_b)
    }
}

fn unordered(a: &RecordId, b: &RecordId) -> (RecordId, RecordId) {
    if a <= b {
        (a.clone(), b.clone())
    } else {
        (b.clone(), a.clone())
    }
}
