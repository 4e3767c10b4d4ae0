//! Model training
//!
//! Splits engineered features chronologically into training and validation
//! partitions, fits the configured [`Classifier`] on the training partition and
//! measures exact-match accuracy on the validation partition.

use crate::error::LearnError;
use crate::model::{accuracy, Classifier, ModelHandle};
use crate::types::{EngineeredFeature, FeatureRow};
use std::sync::Arc;
use tracing::debug;

/// Fitted model plus the data it was trained from
#[derive(Debug, Clone)]
pub struct TrainingResult {
    /// Validation-partition accuracy (training accuracy when the validation
    /// partition is empty)
    pub accuracy: f64,
    pub model: Option<ModelHandle>,
    /// Every feature vector passed to [`Trainer::train`], in order
    pub training_data: Vec<EngineeredFeature>,
    /// First index of the validation partition
    pub split_index: usize,
}

/// Chronological train/validation trainer
#[derive(Clone)]
pub struct Trainer {
    classifier: Arc<dyn Classifier>,
}

impl Trainer {
    pub fn new(classifier: Arc<dyn Classifier>) -> Self {
        Self { classifier }
    }

    /// Train on `features`, holding out the last `validation_split` share.
    pub fn train(
        &self,
        features: &[EngineeredFeature],
        validation_split: f64,
    ) -> Result<TrainingResult, LearnError> {
        if !(validation_split > 0.0 && validation_split < 1.0) {
            return Err(LearnError::InvalidConfig(format!(
                "validation_split must be in (0, 1), got {}",
                validation_split
            )));
        }
        if features.is_empty() {
            return Err(LearnError::InsufficientData(
                "no engineered features to train on".to_string(),
            ));
        }

        let (rows, labels) = to_rows_and_labels(features);
        if rows.len() != labels.len() {
            return Err(LearnError::FeatureCountMismatch {
                features: rows.len(),
                labels: labels.len(),
            });
        }

        let split = split_index(features.len(), validation_split);
        if split == 0 {
            return Err(LearnError::InsufficientData(format!(
                "{} samples leave an empty training partition at split {}",
                features.len(),
                validation_split
            )));
        }

        let model = self.classifier.fit(&rows[..split], &labels[..split])?;

        let accuracy = if split < rows.len() {
            accuracy(model.as_ref(), &rows[split..], &labels[split..])
        } else {
            accuracy(model.as_ref(), &rows, &labels)
        };

        debug!(
            samples = features.len(),
            split_index = split,
            accuracy,
            model = model.name(),
            "trained classifier"
        );

        Ok(TrainingResult {
            accuracy,
            model: Some(model),
            training_data: features.to_vec(),
            split_index: split,
        })
    }
}

/// Index of the first validation element: `floor(count * (1 - validation_split))`
pub fn split_index(count: usize, validation_split: f64) -> usize {
    let index = (count as f64 * (1.0 - validation_split)).floor() as usize;
    index.min(count)
}

/// Classifier rows and integer labels for a feature slice
pub fn to_rows_and_labels(features: &[EngineeredFeature]) -> (Vec<FeatureRow>, Vec<u8>) {
    features.iter().map(|f| (f.to_row(), f.label())).unzip()
}
