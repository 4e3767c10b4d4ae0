//! Feature engineering
//!
//! This module turns a window of processed samples into engineered features:
//! - Min-max normalized signal values per sample
//! - Least-squares trend per signal over the window
//! - Window-level sleep efficiency, latency and wake count

use crate::normalizer::{linear_trend, min_max_normalize};
use crate::types::{EngineeredFeature, ProcessedSample, SignalVector};
use chrono::Duration;

/// Feature engineer for converting processed samples into engineered features
pub struct FeatureEngineer;

impl FeatureEngineer {
    /// Engineer one feature vector per sample, preserving order.
    ///
    /// The whole slice is treated as a single window. An empty window yields
    /// an empty result.
    pub fn engineer(samples: &[ProcessedSample]) -> Vec<EngineeredFeature> {
        if samples.is_empty() {
            return Vec::new();
        }

        let columns = SignalColumns::extract(samples);
        let normalized = columns.map(min_max_normalize);
        let trends = SignalVector {
            heart_rate: linear_trend(&columns.heart_rate),
            hrv: linear_trend(&columns.hrv),
            movement: linear_trend(&columns.movement),
            blood_oxygen: linear_trend(&columns.blood_oxygen),
            temperature: linear_trend(&columns.temperature),
            respiratory_rate: linear_trend(&columns.respiratory_rate),
        };

        let sleep_efficiency = compute_sleep_efficiency(samples);
        let sleep_latency = compute_sleep_latency(samples);
        let wake_count = compute_wake_count(samples);

        samples
            .iter()
            .enumerate()
            .map(|(i, sample)| EngineeredFeature {
                timestamp: sample.timestamp,
                actual_stage: sample.actual_stage,
                normalized: SignalVector {
                    heart_rate: normalized.heart_rate[i],
                    hrv: normalized.hrv[i],
                    movement: normalized.movement[i],
                    blood_oxygen: normalized.blood_oxygen[i],
                    temperature: normalized.temperature[i],
                    respiratory_rate: normalized.respiratory_rate[i],
                },
                trends,
                raw: SignalVector::from_sample(sample),
                sleep_efficiency,
                sleep_latency,
                wake_count,
            })
            .collect()
    }

    /// Engineer a multi-night history.
    ///
    /// Samples are split into windows wherever two consecutive timestamps are
    /// more than `gap` apart; each window is engineered independently and the
    /// results are concatenated in input order.
    pub fn engineer_sessions(samples: &[ProcessedSample], gap: Duration) -> Vec<EngineeredFeature> {
        split_sessions(samples, gap)
            .into_iter()
            .flat_map(Self::engineer)
            .collect()
    }
}

/// Split an ordered sample sequence into windows separated by gaps larger than `gap`
pub fn split_sessions(samples: &[ProcessedSample], gap: Duration) -> Vec<&[ProcessedSample]> {
    let mut sessions = Vec::new();
    let mut start = 0;

    for i in 1..samples.len() {
        if samples[i].timestamp - samples[i - 1].timestamp > gap {
            sessions.push(&samples[start..i]);
            start = i;
        }
    }
    if start < samples.len() {
        sessions.push(&samples[start..]);
    }

    sessions
}

/// Column-wise view of the six signals of a window
struct SignalColumns<T> {
    heart_rate: T,
    hrv: T,
    movement: T,
    blood_oxygen: T,
    temperature: T,
    respiratory_rate: T,
}

impl SignalColumns<Vec<f64>> {
    fn extract(samples: &[ProcessedSample]) -> Self {
        let column = |f: fn(&ProcessedSample) -> f64| samples.iter().map(f).collect::<Vec<f64>>();
        Self {
            heart_rate: column(|s| s.heart_rate),
            hrv: column(|s| s.hrv),
            movement: column(|s| s.movement),
            blood_oxygen: column(|s| s.blood_oxygen),
            temperature: column(|s| s.temperature),
            respiratory_rate: column(|s| s.respiratory_rate),
        }
    }

    fn map<U>(&self, f: impl Fn(&[f64]) -> U) -> SignalColumns<U> {
        SignalColumns {
            heart_rate: f(&self.heart_rate),
            hrv: f(&self.hrv),
            movement: f(&self.movement),
            blood_oxygen: f(&self.blood_oxygen),
            temperature: f(&self.temperature),
            respiratory_rate: f(&self.respiratory_rate),
        }
    }
}

/// Fraction of samples not labelled awake
fn compute_sleep_efficiency(samples: &[ProcessedSample]) -> f64 {
    let asleep = samples
        .iter()
        .filter(|s| !s.actual_stage.is_awake())
        .count();
    asleep as f64 / samples.len() as f64
}

/// Index of the first non-awake sample; the window length means "never slept"
fn compute_sleep_latency(samples: &[ProcessedSample]) -> usize {
    samples
        .iter()
        .position(|s| !s.actual_stage.is_awake())
        .unwrap_or(samples.len())
}

/// Number of adjacent pairs where an asleep sample is followed by an awake one
fn compute_wake_count(samples: &[ProcessedSample]) -> usize {
    samples
        .windows(2)
        .filter(|pair| !pair[0].actual_stage.is_awake() && pair[1].actual_stage.is_awake())
        .count()
}
