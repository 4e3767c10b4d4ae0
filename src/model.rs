//! Classifier capability and the default nearest-centroid model
//!
//! The pipeline never depends on a concrete model architecture. A
//! [`Classifier`] fits labelled feature rows and returns an opaque
//! [`ModelHandle`]; the handle predicts integer stage labels (see
//! [`SleepStage::label`]).

use crate::error::LearnError;
use crate::types::{FeatureRow, SleepStage, FEATURE_DIM};
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::sync::Arc;

/// A fitted sleep-stage model
pub trait StageModel: Debug + Send + Sync {
    /// Predict the integer stage label for one feature row
    fn predict(&self, row: &FeatureRow) -> u8;

    /// Algorithm name used in metadata
    fn name(&self) -> &str;

    /// Serialize the fitted parameters for persistence
    fn export(&self) -> Result<serde_json::Value, LearnError>;
}

/// Shared, immutable handle to a fitted model
pub type ModelHandle = Arc<dyn StageModel>;

/// Capability that fits a model from labelled rows
pub trait Classifier: Send + Sync {
    fn fit(&self, rows: &[FeatureRow], labels: &[u8]) -> Result<ModelHandle, LearnError>;
}

/// Fraction of rows whose prediction exactly matches the label
///
/// Returns 0.0 for empty input.
pub fn accuracy(model: &dyn StageModel, rows: &[FeatureRow], labels: &[u8]) -> f64 {
    if rows.is_empty() || rows.len() != labels.len() {
        return 0.0;
    }
    let correct = rows
        .iter()
        .zip(labels)
        .filter(|(row, label)| model.predict(row) == **label)
        .count();
    correct as f64 / rows.len() as f64
}

/// Nearest-centroid classifier over standardized feature columns
#[derive(Debug, Clone, Copy, Default)]
pub struct NearestCentroidClassifier;

impl Classifier for NearestCentroidClassifier {
    fn fit(&self, rows: &[FeatureRow], labels: &[u8]) -> Result<ModelHandle, LearnError> {
        if rows.len() != labels.len() {
            return Err(LearnError::FeatureCountMismatch {
                features: rows.len(),
                labels: labels.len(),
            });
        }
        if rows.is_empty() {
            return Err(LearnError::InsufficientData(
                "cannot fit a classifier on zero rows".to_string(),
            ));
        }

        let n = rows.len() as f64;
        let mut means = [0.0; FEATURE_DIM];
        for row in rows {
            for (mean, value) in means.iter_mut().zip(row) {
                *mean += value / n;
            }
        }

        let mut scales = [0.0; FEATURE_DIM];
        for row in rows {
            for (j, value) in row.iter().enumerate() {
                scales[j] += (value - means[j]).powi(2) / n;
            }
        }
        for scale in scales.iter_mut() {
            *scale = scale.sqrt();
            // Constant columns carry no information
            if *scale == 0.0 {
                *scale = 1.0;
            }
        }

        let mut sums = [[0.0; FEATURE_DIM]; SleepStage::CLASSES.len()];
        let mut counts = [0usize; SleepStage::CLASSES.len()];
        for (row, &label) in rows.iter().zip(labels) {
            let class = label as usize;
            if class >= counts.len() {
                return Err(LearnError::InsufficientData(format!(
                    "label {} is outside the stage classes",
                    label
                )));
            }
            counts[class] += 1;
            for j in 0..FEATURE_DIM {
                sums[class][j] += (row[j] - means[j]) / scales[j];
            }
        }

        let centroids = counts
            .iter()
            .zip(sums.iter())
            .enumerate()
            .filter(|(_, (count, _))| **count > 0)
            .map(|(class, (count, sum))| {
                let mut centroid = [0.0; FEATURE_DIM];
                for j in 0..FEATURE_DIM {
                    centroid[j] = sum[j] / *count as f64;
                }
                Centroid {
                    label: class as u8,
                    center: centroid.to_vec(),
                    support: *count,
                }
            })
            .collect();

        Ok(Arc::new(NearestCentroidModel {
            means: means.to_vec(),
            scales: scales.to_vec(),
            centroids,
        }))
    }
}

/// Class centroid in standardized feature space
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Centroid {
    pub label: u8,
    pub center: Vec<f64>,
    /// Number of training rows behind this centroid
    pub support: usize,
}

/// Fitted nearest-centroid model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NearestCentroidModel {
    means: Vec<f64>,
    scales: Vec<f64>,
    centroids: Vec<Centroid>,
}

impl StageModel for NearestCentroidModel {
    fn predict(&self, row: &FeatureRow) -> u8 {
        let standardized: Vec<f64> = row
            .iter()
            .zip(self.means.iter().zip(&self.scales))
            .map(|(value, (mean, scale))| (value - mean) / scale)
            .collect();

        // Ties resolve to the centroid with the lower label
        self.centroids
            .iter()
            .map(|c| {
                let distance: f64 = c
                    .center
                    .iter()
                    .zip(&standardized)
                    .map(|(a, b)| (a - b).powi(2))
                    .sum();
                (c.label, distance)
            })
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(label, _)| label)
            .unwrap_or_else(|| SleepStage::Awake.label())
    }

    fn name(&self) -> &str {
        "nearest_centroid"
    }

    fn export(&self) -> Result<serde_json::Value, LearnError> {
        Ok(serde_json::to_value(self)?)
    }
}
