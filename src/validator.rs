//! K-fold cross-validation
//!
//! The validator re-scores a [`TrainingResult`] by splitting its training data
//! into contiguous folds, refitting the classifier on the remaining folds and
//! scoring the held-out one. Folds run concurrently on the blocking pool and
//! are joined before averaging. A fold whose refit fails is left out of the
//! averages.

use crate::model::{accuracy, Classifier, StageModel};
use crate::trainer::{to_rows_and_labels, TrainingResult};
use crate::types::{FeatureRow, SleepStage, ValidationResult};
use std::ops::Range;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, warn};

/// Default number of folds
pub const DEFAULT_FOLDS: usize = 5;

const CLASS_COUNT: usize = SleepStage::CLASSES.len();

/// Actual-vs-predicted counts over the four scored stages
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConfusionMatrix {
    /// `counts[actual][predicted]`
    counts: [[usize; CLASS_COUNT]; CLASS_COUNT],
    /// Samples per actual class, including predictions outside the classes
    actual_totals: [usize; CLASS_COUNT],
}

impl ConfusionMatrix {
    pub fn record(&mut self, actual: u8, predicted: u8) {
        let actual = actual as usize;
        if actual >= CLASS_COUNT {
            return;
        }
        self.actual_totals[actual] += 1;
        if let Some(row) = self.counts[actual].get_mut(predicted as usize) {
            *row += 1;
        }
    }

    pub fn merge(&mut self, other: &ConfusionMatrix) {
        for actual in 0..CLASS_COUNT {
            self.actual_totals[actual] += other.actual_totals[actual];
            for predicted in 0..CLASS_COUNT {
                self.counts[actual][predicted] += other.counts[actual][predicted];
            }
        }
    }

    /// Macro-averaged precision; a class never predicted scores 1.0
    pub fn macro_precision(&self) -> f64 {
        let total: f64 = (0..CLASS_COUNT)
            .map(|class| {
                let predicted: usize = (0..CLASS_COUNT).map(|a| self.counts[a][class]).sum();
                ratio_or_one(self.counts[class][class], predicted)
            })
            .sum();
        total / CLASS_COUNT as f64
    }

    /// Macro-averaged recall; a class never observed scores 1.0
    pub fn macro_recall(&self) -> f64 {
        let total: f64 = (0..CLASS_COUNT)
            .map(|class| ratio_or_one(self.counts[class][class], self.actual_totals[class]))
            .sum();
        total / CLASS_COUNT as f64
    }

    fn tally(model: &dyn StageModel, rows: &[FeatureRow], labels: &[u8]) -> Self {
        let mut matrix = Self::default();
        for (row, &label) in rows.iter().zip(labels) {
            matrix.record(label, model.predict(row));
        }
        matrix
    }
}

fn ratio_or_one(numerator: usize, denominator: usize) -> f64 {
    if denominator == 0 {
        1.0
    } else {
        numerator as f64 / denominator as f64
    }
}

/// Harmonic mean of precision and recall, 0.0 when both are zero
pub fn f1_score(precision: f64, recall: f64) -> f64 {
    let f1 = 2.0 * precision * recall / (precision + recall);
    if f1.is_nan() {
        0.0
    } else {
        f1
    }
}

/// Contiguous fold ranges; the last fold absorbs the remainder
pub fn fold_ranges(count: usize, folds: usize) -> Vec<Range<usize>> {
    if folds == 0 || count < folds {
        return Vec::new();
    }
    let size = count / folds;
    (0..folds)
        .map(|i| {
            let start = i * size;
            let end = if i + 1 == folds { count } else { start + size };
            start..end
        })
        .collect()
}

/// Cross-validator
#[derive(Clone)]
pub struct Validator {
    classifier: Arc<dyn Classifier>,
    folds: usize,
}

impl Validator {
    pub fn new(classifier: Arc<dyn Classifier>, folds: usize) -> Self {
        Self { classifier, folds }
    }

    /// Cross-validate a training result. Never fails.
    ///
    /// A result without a model scores all zeros. When there are fewer
    /// samples than folds the trained model is scored on all of its data.
    pub async fn validate(&self, result: &TrainingResult) -> ValidationResult {
        let Some(model) = result.model.clone() else {
            return ValidationResult::default();
        };
        if result.training_data.is_empty() {
            return ValidationResult::default();
        }

        let (rows, labels) = to_rows_and_labels(&result.training_data);
        let ranges = fold_ranges(rows.len(), self.folds);

        if ranges.is_empty() {
            debug!(
                samples = rows.len(),
                folds = self.folds,
                "too few samples for cross-validation, scoring trained model"
            );
            return score_model(model.as_ref(), &rows, &labels);
        }

        let rows = Arc::new(rows);
        let labels = Arc::new(labels);
        let mut tasks = JoinSet::new();

        for (fold, range) in ranges.into_iter().enumerate() {
            let rows = Arc::clone(&rows);
            let labels = Arc::clone(&labels);
            let classifier = Arc::clone(&self.classifier);
            tasks.spawn_blocking(move || run_fold(fold, range, &rows, &labels, classifier.as_ref()));
        }

        let mut accuracies = Vec::with_capacity(self.folds);
        let mut pooled = ConfusionMatrix::default();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Some(outcome)) => {
                    accuracies.push(outcome.accuracy);
                    pooled.merge(&outcome.matrix);
                }
                Ok(None) => {}
                Err(e) => warn!(error = %e, "cross-validation fold did not complete"),
            }
        }

        if accuracies.is_empty() {
            warn!(folds = self.folds, "no cross-validation fold could be refitted");
            return ValidationResult::default();
        }
        let mean_accuracy = accuracies.iter().sum::<f64>() / accuracies.len() as f64;
        summarize(mean_accuracy, &pooled)
    }
}

struct FoldOutcome {
    accuracy: f64,
    matrix: ConfusionMatrix,
}

fn run_fold(
    fold: usize,
    range: Range<usize>,
    rows: &[FeatureRow],
    labels: &[u8],
    classifier: &dyn Classifier,
) -> Option<FoldOutcome> {
    let train_rows: Vec<FeatureRow> = rows[..range.start]
        .iter()
        .chain(&rows[range.end..])
        .copied()
        .collect();
    let train_labels: Vec<u8> = labels[..range.start]
        .iter()
        .chain(&labels[range.end..])
        .copied()
        .collect();

    let model = match classifier.fit(&train_rows, &train_labels) {
        Ok(model) => model,
        Err(e) => {
            warn!(fold, error = %e, "fold refit failed, skipping fold");
            return None;
        }
    };

    let test_rows = &rows[range.clone()];
    let test_labels = &labels[range];
    let outcome = FoldOutcome {
        accuracy: accuracy(model.as_ref(), test_rows, test_labels),
        matrix: ConfusionMatrix::tally(model.as_ref(), test_rows, test_labels),
    };
    debug!(fold, accuracy = outcome.accuracy, "fold scored");
    Some(outcome)
}

/// Score a model on labelled rows without refitting
pub fn score_model(model: &dyn StageModel, rows: &[FeatureRow], labels: &[u8]) -> ValidationResult {
    let matrix = ConfusionMatrix::tally(model, rows, labels);
    summarize(accuracy(model, rows, labels), &matrix)
}

fn summarize(accuracy: f64, matrix: &ConfusionMatrix) -> ValidationResult {
    let precision = matrix.macro_precision();
    let recall = matrix.macro_recall();
    ValidationResult {
        accuracy,
        precision,
        recall,
        f1: f1_score(precision, recall),
    }
}
