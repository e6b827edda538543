//! Matcher quality against curated reference duplicates.
//!
//! # Invariants
//! - Pairs are unordered; a pair scored more than once counts once with its
//!   highest probability.
//! - Only scored pairs enter the confusion matrix; reference pairs the
//!   matcher never scored are reported separately.
//! - Ratios with an empty denominator are 0.

use crate::model::pair::{CandidatePair, ReferencePair};
use crate::model::record::RecordId;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ConfusionMatrix {
    pub true_positive: usize,
    pub false_positive: usize,
    pub true_negative: usize,
    pub false_negative: usize,
}

impl ConfusionMatrix {
    pub fn total(&self) -> usize {
        self.true_positive + self.false_positive + self.true_negative + self.false_negative
    }

    pub fn precision(&self) -> f64 {
        ratio(self.true_positive, self.true_positive + self.false_positive)
    }

    pub fn recall(&self) -> f64 {
        ratio(self.true_positive, self.true_positive + self.false_negative)
    }

    pub fn f1(&self) -> f64 {
        let (precision, recall) = (self.precision(), self.recall());
        if precision + recall > 0.0 {
            2.0 * precision * recall / (precision + recall)
        } else {
            0.0
        }
    }

    pub fn accuracy(&self) -> f64 {
        ratio(self.true_positive + self.true_negative, self.total())
    }

    pub fn specificity(&self) -> f64 {
        ratio(self.true_negative, self.true_negative + self.false_positive)
    }

    pub fn false_positive_rate(&self) -> f64 {
        ratio(self.false_positive, self.false_positive + self.true_negative)
    }

    pub fn false_negative_rate(&self) -> f64 {
        ratio(self.false_negative, self.false_negative + self.true_positive)
    }
}

/// Evaluation at one threshold.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvaluationReport {
    pub threshold: f64,
    pub scored_pairs: usize,
    pub reference_pairs: usize,
    /// Reference pairs absent from the matcher output.
    pub unscored_reference_pairs: usize,
    pub matrix: ConfusionMatrix,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub accuracy: f64,
    pub specificity: f64,
    pub false_positive_rate: f64,
    pub false_negative_rate: f64,
}

/// Scores `pairs` against `references` at `threshold`.
pub fn evaluate(
    pairs: &[CandidatePair],
    references: &[ReferencePair],
    threshold: f64,
) -> EvaluationReport {
    let scored = best_scores(pairs);
    let truth = reference_set(references);
    report(&scored, &truth, threshold)
}

/// Runs [`evaluate`] once per threshold, in the given order.
pub fn evaluate_thresholds(
    pairs: &[CandidatePair],
    references: &[ReferencePair],
    thresholds: &[f64],
) -> Vec<EvaluationReport> {
    let scored = best_scores(pairs);
    let truth = reference_set(references);
    thresholds
        .iter()
        .map(|&threshold| report(&scored, &truth, threshold))
        .collect()
}

type PairKey = (RecordId, RecordId);

fn best_scores(pairs: &[CandidatePair]) -> BTreeMap<PairKey, f64> {
    let mut scored = BTreeMap::new();
    for pair in pairs {
        let (a, b) = pair.unordered_key();
        if a == b {
            continue;
        }
        scored
            .entry((a, b))
            .and_modify(|best: &mut f64| *best = best.max(pair.match_probability))
            .or_insert(pair.match_probability);
    }
    scored
}

fn reference_set(references: &[ReferencePair]) -> BTreeSet<PairKey> {
    references
        .iter()
        .map(ReferencePair::unordered_key)
        .filter(|(a, b)| a != b)
        .collect()
}

fn report(
    scored: &BTreeMap<PairKey, f64>,
    truth: &BTreeSet<PairKey>,
    threshold: f64,
) -> EvaluationReport {
    let mut matrix = ConfusionMatrix::default();
    for (key, &probability) in scored {
        let predicted = probability >= threshold;
        let actual = truth.contains(key);
        match (predicted, actual) {
            (true, true) => matrix.true_positive += 1,
            (true, false) => matrix.false_positive += 1,
            (false, false) => matrix.true_negative += 1,
            (false, true) => matrix.false_negative += 1,
        }
    }

    EvaluationReport {
        threshold,
        scored_pairs: scored.len(),
        reference_pairs: truth.len(),
        unscored_reference_pairs: truth.iter().filter(|key| !scored.contains_key(*key)).count(),
        precision: matrix.precision(),
        recall: matrix.recall(),
        f1: matrix.f1(),
        accuracy: matrix.accuracy(),
        specificity: matrix.specificity(),
        false_positive_rate: matrix.false_positive_rate(),
        false_negative_rate: matrix.false_negative_rate(),
        matrix,
    }
}

fn ratio(numerator: usize, denominator: usize) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

#[cfg(test)]
mod tests {
    use super::{evaluate, evaluate_thresholds, ConfusionMatrix};
    use crate::model::pair::{CandidatePair, ReferencePair};
    use crate::model::record::RecordId;

    fn id(local: &str) -> RecordId {
        RecordId::new("crm", local)
    }

    fn pair(a: &str, b: &str, p: f64) -> CandidatePair {
        CandidatePair::new(id(a), id(b), p)
    }

    fn reference(a: &str, b: &str) -> ReferencePair {
        ReferencePair::new(id(a), id(b))
    }

    #[test]
    fn confusion_matrix_over_scored_pairs() {
        let pairs = [
            pair("1", "2", 0.95),
            pair("3", "4", 0.90),
            pair("5", "6", 0.10),
            pair("8", "7", 0.20),
        ];
        let references = [reference("2", "1"), reference("7", "8"), reference("9", "10")];
        let report = evaluate(&pairs, &references, 0.8);

        assert_eq!(
            report.matrix,
            ConfusionMatrix {
                true_positive: 1,
                false_positive: 1,
                true_negative: 1,
                false_negative: 1,
            }
        );
        assert_eq!(report.scored_pairs, 4);
        assert_eq!(report.reference_pairs, 3);
        assert_eq!(report.unscored_reference_pairs, 1);
        assert!((report.precision - 0.5).abs() < 1e-12);
        assert!((report.recall - 0.5).abs() < 1e-12);
        assert!((report.f1 - 0.5).abs() < 1e-12);
        assert!((report.accuracy - 0.5).abs() < 1e-12);
        assert!((report.specificity - 0.5).abs() < 1e-12);
    }

    #[test]
    fn repeated_pairs_use_best_score() {
        let pairs = [pair("1", "2", 0.3), pair("2", "1", 0.85)];
        let report = evaluate(&pairs, &[reference("1", "2")], 0.8);
        assert_eq!(report.scored_pairs, 1);
        assert_eq!(report.matrix.true_positive, 1);
    }

    #[test]
    fn empty_inputs_report_zero_ratios() {
        let report = evaluate(&[], &[], 0.8);
        assert_eq!(report.matrix.total(), 0);
        assert_eq!(report.precision, 0.0);
        assert_eq!(report.f1, 0.0);
        assert_eq!(report.false_negative_rate, 0.0);
    }

    #[test]
    fn threshold_sweep_trades_precision_for_recall() {
        let pairs = [pair("1", "2", 0.9), pair("3", "4", 0.6), pair("5", "6", 0.7)];
        let references = [reference("1", "2"), reference("3", "4")];
        let reports = evaluate_thresholds(&pairs, &references, &[0.5, 0.8]);
        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0].matrix.true_positive, 2);
        assert_eq!(reports[0].matrix.false_positive, 1);
        assert_eq!(reports[1].matrix.true_positive, 1);
        assert_eq!(reports[1].matrix.false_negative, 1);
        assert!(reports[0].recall > reports[1].recall);
    }
}
