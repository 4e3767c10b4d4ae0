//! Anomaly filtering for incremental training data
//!
//! A sample is anomalous when its heart rate or HRV lies more than
//! `sigma` population standard deviations from the mean of the batch.
//! Anomalies are only excluded from training; they stay in the buffer and
//! are still scored during evaluation.

use crate::normalizer::{mean, std_dev};
use crate::types::ProcessedSample;

/// Default deviation multiplier
pub const DEFAULT_ANOMALY_SIGMA: f64 = 2.0;

/// Mean and spread of one signal over a batch
#[derive(Debug, Clone, Copy)]
struct Spread {
    mean: f64,
    std: f64,
}

impl Spread {
    fn of(values: &[f64]) -> Option<Self> {
        Some(Self {
            mean: mean(values)?,
            std: std_dev(values)?,
        })
    }

    fn is_outlier(&self, value: f64, sigma: f64) -> bool {
        (value - self.mean).abs() > sigma * self.std
    }
}

/// Flag samples whose heart rate or HRV is an outlier within `samples`.
///
/// The mask is index-aligned with `samples`; an empty batch yields an empty
/// mask.
pub fn anomaly_mask(samples: &[ProcessedSample], sigma: f64) -> Vec<bool> {
    let heart_rates: Vec<f64> = samples.iter().map(|s| s.heart_rate).collect();
    let hrvs: Vec<f64> = samples.iter().map(|s| s.hrv).collect();

    let (Some(hr), Some(hrv)) = (Spread::of(&heart_rates), Spread::of(&hrvs)) else {
        return Vec::new();
    };

    samples
        .iter()
        .map(|s| hr.is_outlier(s.heart_rate, sigma) || hrv.is_outlier(s.hrv, sigma))
        .collect()
}
