//! Personalized thresholds
//!
//! Derives per-user heart-rate, HRV and respiratory-rate thresholds from the
//! raw signal values of engineered features. Asleep samples are preferred; if
//! a history has none, all samples are used.

use crate::normalizer::mean;
use crate::types::{EngineeredFeature, PersonalizedThresholds};

/// Threshold calculator
pub struct ThresholdCalculator;

impl ThresholdCalculator {
    /// Compute thresholds. Returns the defaults for empty input.
    pub fn calculate(features: &[EngineeredFeature]) -> PersonalizedThresholds {
        if features.is_empty() {
            return PersonalizedThresholds::default();
        }

        let asleep: Vec<&EngineeredFeature> = features
            .iter()
            .filter(|f| !f.actual_stage.is_awake())
            .collect();
        let basis: Vec<&EngineeredFeature> = if asleep.is_empty() {
            features.iter().collect()
        } else {
            asleep
        };

        let defaults = PersonalizedThresholds::default();
        let average = |pick: fn(&EngineeredFeature) -> f64| {
            let values: Vec<f64> = basis.iter().map(|f| pick(f)).collect();
            mean(&values)
        };
        let efficiency: Vec<f64> = features.iter().map(|f| f.sleep_efficiency).collect();

        PersonalizedThresholds {
            heart_rate: average(|f| f.raw.heart_rate).unwrap_or(defaults.heart_rate),
            hrv: average(|f| f.raw.hrv).unwrap_or(defaults.hrv),
            respiratory_rate: average(|f| f.raw.respiratory_rate)
                .unwrap_or(defaults.respiratory_rate),
            sleep_quality: mean(&efficiency).unwrap_or(defaults.sleep_quality),
        }
    }
}
