//! Learning configuration
//!
//! [`LearningConfig`] collects every tunable constant of the training pipeline
//! and the continuous-learning controller. It round-trips through JSON, and
//! missing fields fall back to their defaults, so a config file only needs to
//! name what it overrides.

use crate::error::LearnError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Configuration for training runs and continuous learning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LearningConfig {
    // Pipeline
    /// Share of engineered features held out for validation, in (0, 1). Default: 0.2
    pub validation_split: f64,
    /// Minimum aggregate correlation score for feature selection. Default: 0.0
    pub selection_threshold: f64,
    /// Number of cross-validation folds. Default: 5
    pub folds: usize,
    /// Gap between samples that starts a new window. Default: 240 minutes
    pub session_gap_minutes: i64,
    /// Days of history collected for a full retrain. Default: 30
    pub history_days: i64,

    // Buffering
    /// Ring buffer capacity; the oldest sample is evicted beyond it. Default: 1000
    pub buffer_capacity: usize,
    /// Buffered samples required before a cycle evaluates. Default: 100
    pub min_samples_for_update: usize,
    /// Buffer size that forces an update. Default: 200
    pub buffer_saturation: usize,

    // Evaluation and validation
    /// Most recent samples scored when evaluating the deployed model. Default: 100
    pub evaluation_window: usize,
    /// Accuracy below which an update is requested. Default: 0.85
    pub accuracy_threshold: f64,
    /// Drop against the previous snapshot that requests an update. Default: 0.05
    pub accuracy_decline: f64,
    /// Most recent samples a candidate is validated on. Default: 20
    pub validation_window: usize,
    /// Allowed accuracy loss against the committed model. Default: 0.1
    pub rollback_margin: f64,
    /// Standard deviations from the mean that mark a sample anomalous. Default: 2.0
    pub anomaly_sigma: f64,
    /// Performance snapshots kept in history. Default: 100
    pub history_capacity: usize,

    // Scheduling
    /// Seconds between learning cycle checks. Default: 3600
    pub cycle_interval_secs: u64,
    /// Seconds between full historical retrains. Default: 86400
    pub full_retrain_interval_secs: u64,
    /// Upper bound on one update stage in seconds. Default: 300
    pub stage_timeout_secs: u64,
}

impl Default for LearningConfig {
    fn default() -> Self {
        Self {
            validation_split: 0.2,
            selection_threshold: 0.0,
            folds: 5,
            session_gap_minutes: 240,
            history_days: 30,
            buffer_capacity: 1000,
            min_samples_for_update: 100,
            buffer_saturation: 200,
            evaluation_window: 100,
            accuracy_threshold: 0.85,
            accuracy_decline: 0.05,
            validation_window: 20,
            rollback_margin: 0.1,
            anomaly_sigma: 2.0,
            history_capacity: 100,
            cycle_interval_secs: 3600,
            full_retrain_interval_secs: 86_400,
            stage_timeout_secs: 300,
        }
    }
}

impl LearningConfig {
    /// Parse a config from JSON and validate it
    pub fn from_json(json: &str) -> Result<Self, LearnError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize to pretty-printed JSON
    pub fn to_json(&self) -> Result<String, LearnError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Read and validate a JSON config file
    pub fn load(path: &Path) -> Result<Self, LearnError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json(&contents)
    }

    /// Check every field, reporting the first invalid one
    pub fn validate(&self) -> Result<(), LearnError> {
        if !(self.validation_split > 0.0 && self.validation_split < 1.0) {
            return Err(invalid("validation_split", "must be in (0, 1)"));
        }
        if !self.selection_threshold.is_finite() {
            return Err(invalid("selection_threshold", "must be finite"));
        }
        if self.folds < 2 {
            return Err(invalid("folds", "must be >= 2"));
        }
        if self.session_gap_minutes <= 0 {
            return Err(invalid("session_gap_minutes", "must be > 0"));
        }
        if self.history_days <= 0 {
            return Err(invalid("history_days", "must be > 0"));
        }
        if self.buffer_capacity == 0 {
            return Err(invalid("buffer_capacity", "must be > 0"));
        }
        if self.min_samples_for_update == 0 || self.min_samples_for_update > self.buffer_capacity {
            return Err(invalid(
                "min_samples_for_update",
                "must be in [1, buffer_capacity]",
            ));
        }
        if self.evaluation_window == 0 {
            return Err(invalid("evaluation_window", "must be > 0"));
        }
        if self.validation_window == 0 {
            return Err(invalid("validation_window", "must be > 0"));
        }
        if !(0.0..=1.0).contains(&self.accuracy_threshold) {
            return Err(invalid("accuracy_threshold", "must be in [0, 1]"));
        }
        if !(self.accuracy_decline >= 0.0) {
            return Err(invalid("accuracy_decline", "must be >= 0"));
        }
        if !(self.rollback_margin >= 0.0) {
            return Err(invalid("rollback_margin", "must be >= 0"));
        }
        if !(self.anomaly_sigma > 0.0) {
            return Err(invalid("anomaly_sigma", "must be > 0"));
        }
        if self.history_capacity == 0 {
            return Err(invalid("history_capacity", "must be > 0"));
        }
        if self.cycle_interval_secs == 0 || self.full_retrain_interval_secs == 0 {
            return Err(invalid("cycle_interval_secs", "intervals must be > 0"));
        }
        if self.stage_timeout_secs == 0 {
            return Err(invalid("stage_timeout_secs", "must be > 0"));
        }
        Ok(())
    }

    pub fn session_gap(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.session_gap_minutes)
    }

    pub fn history_window(&self) -> chrono::Duration {
        chrono::Duration::days(self.history_days)
    }

    pub fn cycle_interval(&self) -> Duration {
        Duration::from_secs(self.cycle_interval_secs)
    }

    pub fn full_retrain_interval(&self) -> Duration {
        Duration::from_secs(self.full_retrain_interval_secs)
    }

    pub fn stage_timeout(&self) -> Duration {
        Duration::from_secs(self.stage_timeout_secs)
    }
}

fn invalid(field: &str, reason: &str) -> LearnError {
    LearnError::InvalidConfig(format!("{}: {}", field, reason))
}
