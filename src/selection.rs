//! Feature selection
//!
//! Scores the heart-rate, HRV and movement trends by their Pearson correlation
//! with sleep efficiency across the supplied feature set, and keeps the
//! vectors whose signed mean score clears a threshold.

use crate::normalizer::pearson_correlation;
use crate::types::{EngineeredFeature, FeatureImportance};

/// Importance key for the heart-rate trend
pub const HEART_RATE_TREND: &str = "heart_rate_trend";
/// Importance key for the HRV trend
pub const HRV_TREND: &str = "hrv_trend";
/// Importance key for the movement trend
pub const MOVEMENT_TREND: &str = "movement_trend";

/// Output of a selection pass
#[derive(Debug, Clone, PartialEq)]
pub struct Selection {
    pub selected: Vec<EngineeredFeature>,
    pub importance: FeatureImportance,
}

/// Correlation-based feature selector
pub struct FeatureSelector;

impl FeatureSelector {
    /// Select feature vectors whose aggregate score exceeds `threshold`.
    ///
    /// Correlations are computed over the whole slice, so the score is shared
    /// by every vector in one call. Meaningful scores need vectors from more
    /// than one window; within a single window the trends are constant and
    /// every correlation is 0.0.
    pub fn select(features: &[EngineeredFeature], threshold: f64) -> Selection {
        if features.is_empty() {
            return Selection {
                selected: Vec::new(),
                importance: FeatureImportance::new(),
            };
        }

        let efficiency: Vec<f64> = features.iter().map(|f| f.sleep_efficiency).collect();
        let trend = |pick: fn(&EngineeredFeature) -> f64| {
            let values: Vec<f64> = features.iter().map(pick).collect();
            pearson_correlation(&values, &efficiency)
        };

        let corr_hr = trend(|f| f.trends.heart_rate);
        let corr_hrv = trend(|f| f.trends.hrv);
        let corr_movement = trend(|f| f.trends.movement);

        let mut importance = FeatureImportance::new();
        importance.insert(HEART_RATE_TREND.to_string(), corr_hr);
        importance.insert(HRV_TREND.to_string(), corr_hrv);
        importance.insert(MOVEMENT_TREND.to_string(), corr_movement);

        let score = aggregate_score(corr_hr, corr_hrv, corr_movement);
        let selected = features
            .iter()
            .filter(|_| score > threshold)
            .cloned()
            .collect();

        Selection {
            selected,
            importance,
        }
    }
}

/// Signed mean of the three trend correlations
pub fn aggregate_score(corr_hr: f64, corr_hrv: f64, corr_movement: f64) -> f64 {
    (corr_hr + corr_hrv + corr_movement) / 3.0
}
