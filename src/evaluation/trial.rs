//! Trials: scored results collected against a ground truth

use serde::Serialize;
use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::sync::Arc;

use crate::record::Record;

use super::{ConfusionMatrix, GroundTruth};

#[derive(Debug, Clone, Serialize)]
pub struct TrialResult {
    pub id1: String,
    pub id2: String,
    pub is_positive: bool,
    pub confidence: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extra: Option<serde_json::Value>,
    #[serde(skip)]
    seq: u64,
}

/// Heap order: higher confidence ranks higher, and among equal confidences the earlier result.
struct Ranked(TrialResult);

impl PartialEq for Ranked {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Ranked {}

impl PartialOrd for Ranked {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Ranked {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0
            .confidence
            .total_cmp(&other.0.confidence)
            .then(other.0.seq.cmp(&self.0.seq))
    }
}

/// One point of a confidence-threshold sweep
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ThresholdPoint {
    pub threshold: f64,
    pub matrix: ConfusionMatrix,
}

impl ThresholdPoint {
    /// `(recall, precision)`
    pub fn precision_recall(&self) -> (f64, f64) {
        (self.matrix.recall(), self.matrix.precision())
    }

    /// `(false positive rate, true positive rate)`
    pub fn roc(&self) -> (f64, f64) {
        (
            self.matrix.false_positive_rate(),
            self.matrix.true_positive_rate(),
        )
    }
}

/// Results of one experimental run
///
/// Only pairs present in the ground truth with `confidence >= min_confidence` are admitted.
/// With `top_k > 0` only the `k` highest-confidence results are kept, earlier results winning
/// ties.
pub struct Trial {
    label: String,
    ground_truth: Arc<GroundTruth>,
    min_confidence: f64,
    top_k: usize,
    single_dataset: bool,
    results: Vec<TrialResult>,
    top: BinaryHeap<Reverse<Ranked>>,
    next_seq: u64,
}

impl Trial {
    pub fn new(ground_truth: Arc<GroundTruth>) -> Self {
        Self {
            label: String::new(),
            ground_truth,
            min_confidence: f64::NEG_INFINITY,
            top_k: 0,
            single_dataset: false,
            results: Vec::new(),
            top: BinaryHeap::new(),
            next_seq: 0,
        }
    }

    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn min_confidence(mut self, min_confidence: f64) -> Self {
        self.min_confidence = min_confidence;
        self
    }

    pub fn top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    /// Results come from deduplicating one dataset, so ground-truth pairs match in either
    /// order.
    pub fn single_dataset(mut self, single_dataset: bool) -> Self {
        self.single_dataset = single_dataset;
        self
    }

    pub fn name(&self) -> &str {
        &self.label
    }

    pub fn ground_truth(&self) -> &Arc<GroundTruth> {
        &self.ground_truth
    }

    /// Returns whether the result was admitted.
    pub fn add_result(
        &mut self,
        record1: &Record,
        record2: &Record,
        is_positive: bool,
        confidence: f64,
    ) -> bool {
        self.add_result_by_id(record1.id(), record2.id(), is_positive, confidence, None)
    }

    pub fn add_result_with_extra(
        &mut self,
        record1: &Record,
        record2: &Record,
        is_positive: bool,
        confidence: f64,
        extra: serde_json::Value,
    ) -> bool {
        self.add_result_by_id(record1.id(), record2.id(), is_positive, confidence, Some(extra))
    }

    pub fn add_result_by_id(
        &mut self,
        id1: &str,
        id2: &str,
        is_positive: bool,
        confidence: f64,
        extra: Option<serde_json::Value>,
    ) -> bool {
        if confidence < self.min_confidence
            || !self.ground_truth.covers(id1, id2, self.single_dataset)
        {
            return false;
        }
        let result = TrialResult {
            id1: id1.to_string(),
            id2: id2.to_string(),
            is_positive,
            confidence,
            extra,
            seq: self.next_seq,
        };
        self.next_seq += 1;

        if self.top_k == 0 {
            self.results.push(result);
            return true;
        }
        if self.top.len() < self.top_k {
            self.top.push(Reverse(Ranked(result)));
            return true;
        }
        match self.top.peek() {
            Some(Reverse(lowest)) if confidence > lowest.0.confidence => {
                self.top.pop();
                self.top.push(Reverse(Ranked(result)));
                true
            }
            _ => false,
        }
    }

    pub fn len(&self) -> usize {
        self.results.len() + self.top.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Retained results, highest confidence first.
    pub fn results(&self) -> Vec<&TrialResult> {
        let mut results: Vec<&TrialResult> = self
            .results
            .iter()
            .chain(self.top.iter().map(|Reverse(ranked)| &ranked.0))
            .collect();
        results.sort_by(|a, b| {
            b.confidence
                .total_cmp(&a.confidence)
                .then(a.seq.cmp(&b.seq))
        });
        results
    }

    fn actual(&self, result: &TrialResult) -> bool {
        // admission guarantees membership
        self.ground_truth
            .lookup(&result.id1, &result.id2, self.single_dataset)
            .unwrap_or(false)
    }

    /// Classify every retained result against the ground truth.
    pub fn evaluate(&self) -> ConfusionMatrix {
        let mut matrix = ConfusionMatrix::default();
        for result in self.results() {
            matrix.record(result.is_positive, self.actual(result));
        }
        matrix
    }

    /// Re-classify retained results as positive when `confidence >= threshold`, per threshold.
    pub fn threshold_curve(&self, thresholds: &[f64]) -> Vec<ThresholdPoint> {
        let results = self.results();
        thresholds
            .iter()
            .map(|&threshold| {
                let mut matrix = ConfusionMatrix::default();
                for result in &results {
                    matrix.record(result.confidence >= threshold, self.actual(result));
                }
                ThresholdPoint { threshold, matrix }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ground_truth() -> Arc<GroundTruth> {
        let mut gt = GroundTruth::new();
        gt.add_positive("1", "a");
        gt.add_positive("2", "b");
        gt.add_negative("3", "c");
        gt.add_negative("4", "d");
        Arc::new(gt)
    }

    #[test]
    fn test_admission_rules() {
        let mut trial = Trial::new(ground_truth()).min_confidence(0.5);
        assert!(trial.add_result_by_id("1", "a", true, 0.9, None));
        assert!(!trial.add_result_by_id("1", "a", true, 0.4, None));
        assert!(!trial.add_result_by_id("9", "z", true, 0.9, None));
        assert_eq!(trial.len(), 1);
    }

    #[test]
    fn test_top_k_keeps_highest_and_earliest_ties() {
        let mut trial = Trial::new(ground_truth()).top_k(2);
        trial.add_result_by_id("3", "c", true, 0.5, None);
        trial.add_result_by_id("1", "a", true, 0.9, None);
        trial.add_result_by_id("4", "d", false, 0.5, None);
        trial.add_result_by_id("2", "b", true, 0.3, None);

        let kept: Vec<(&str, f64)> = trial
            .results()
            .into_iter()
            .map(|r| (r.id1.as_str(), r.confidence))
            .collect();
        assert_eq!(kept, vec![("1", 0.9), ("3", 0.5)]);
    }

    #[test]
    fn test_single_dataset_matches_either_order() {
        let mut gt = GroundTruth::new();
        gt.add_positive("2", "1");
        gt.add_negative("3", "1");
        let gt = Arc::new(gt);

        let mut linkage = Trial::new(gt.clone());
        assert!(!linkage.add_result_by_id("1", "2", true, 0.9, None));

        let mut dedup = Trial::new(gt).single_dataset(true);
        assert!(dedup.add_result_by_id("1", "2", true, 0.9, None));
        assert!(dedup.add_result_by_id("1", "3", true, 0.4, None));
        let matrix = dedup.evaluate();
        assert_eq!(matrix.true_positives, 1);
        assert_eq!(matrix.false_positives, 1);
    }

    #[test]
    fn test_threshold_curve() {
        let mut trial = Trial::new(ground_truth());
        trial.add_result_by_id("1", "a", true, 0.9, None);
        trial.add_result_by_id("3", "c", true, 0.6, None);
        trial.add_result_by_id("2", "b", false, 0.2, None);

        let curve = trial.threshold_curve(&[0.5, 0.1]);
        assert_eq!(curve[0].precision_recall(), (0.5, 0.5));
        assert_eq!(curve[1].precision_recall(), (1.0, 2.0 / 3.0));
        assert_eq!(curve[1].roc(), (1.0, 1.0));
    }
}
