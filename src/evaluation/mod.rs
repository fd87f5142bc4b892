//! Ground truth, trials and evaluation tables

use serde::Serialize;

pub mod ground_truth;
pub mod metrics;
pub mod trial;

pub use ground_truth::GroundTruth;
pub use metrics::ConfusionMatrix;
pub use trial::{ThresholdPoint, Trial, TrialResult};

/// One row of an evaluation table
#[derive(Debug, Clone, Serialize)]
pub struct TrialSummary {
    pub label: String,
    pub results: usize,
    pub matrix: ConfusionMatrix,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub false_positive_rate: f64,
}

/// An ordered list of trials
#[derive(Default)]
pub struct Evaluation {
    trials: Vec<Trial>,
}

impl Evaluation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_trial(&mut self, trial: Trial) {
        self.trials.push(trial);
    }

    pub fn trials(&self) -> &[Trial] {
        &self.trials
    }

    pub fn len(&self) -> usize {
        self.trials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trials.is_empty()
    }

    pub fn table(&self) -> Vec<TrialSummary> {
        self.trials
            .iter()
            .map(|trial| {
                let matrix = trial.evaluate();
                TrialSummary {
                    label: trial.name().to_string(),
                    results: trial.len(),
                    matrix,
                    precision: matrix.precision(),
                    recall: matrix.recall(),
                    f1: matrix.f1(),
                    false_positive_rate: matrix.false_positive_rate(),
                }
            })
            .collect()
    }

    /// One `(recall, precision)` point per trial, in trial order.
    pub fn precision_recall_curve(&self) -> Vec<(f64, f64)> {
        self.trials
            .iter()
            .map(|trial| {
                let m = trial.evaluate();
                (m.recall(), m.precision())
            })
            .collect()
    }

    /// One `(false positive rate, true positive rate)` point per trial, in trial order.
    pub fn roc_curve(&self) -> Vec<(f64, f64)> {
        self.trials
            .iter()
            .map(|trial| {
                let m = trial.evaluate();
                (m.false_positive_rate(), m.true_positive_rate())
            })
            .collect()
    }

    /// Confidence-threshold sweep of every trial.
    pub fn threshold_curves(&self, thresholds: &[f64]) -> Vec<(String, Vec<ThresholdPoint>)> {
        self.trials
            .iter()
            .map(|trial| (trial.name().to_string(), trial.threshold_curve(thresholds)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_table_and_curves_follow_trial_order() {
        let mut gt = GroundTruth::new();
        gt.add_positive("1", "a");
        gt.add_negative("2", "b");
        let gt = Arc::new(gt);

        let mut strict = Trial::new(gt.clone()).label("strict");
        strict.add_result_by_id("1", "a", true, 0.9, None);
        strict.add_result_by_id("2", "b", false, 0.1, None);

        let mut loose = Trial::new(gt).label("loose");
        loose.add_result_by_id("1", "a", true, 0.9, None);
        loose.add_result_by_id("2", "b", true, 0.6, None);

        let mut evaluation = Evaluation::new();
        evaluation.add_trial(strict);
        evaluation.add_trial(loose);

        let table = evaluation.table();
        assert_eq!(table[0].label, "strict");
        assert_eq!(table[0].precision, 1.0);
        assert_eq!(table[1].precision, 0.5);
        assert_eq!(evaluation.roc_curve(), vec![(0.0, 1.0), (1.0, 1.0)]);
        assert_eq!(evaluation.precision_recall_curve()[1], (1.0, 0.5));
        assert_eq!(evaluation.threshold_curves(&[0.5])[0].1.len(), 1);
    }
}
