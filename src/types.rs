//! Core types for the somna-learn pipeline
//!
//! This module defines the data structures that flow through each stage of the
//! pipeline: raw samples, fused processed samples, engineered features,
//! thresholds, metrics and the status/progress records exposed to callers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Number of numeric columns fed to a classifier per engineered feature
pub const FEATURE_DIM: usize = 12;

/// A single classifier input row
pub type FeatureRow = [f64; FEATURE_DIM];

/// Column names of [`FeatureRow`], in order
pub const FEATURE_NAMES: [&str; FEATURE_DIM] = [
    "heart_rate_norm",
    "hrv_norm",
    "movement_norm",
    "blood_oxygen_norm",
    "temperature_norm",
    "respiratory_rate_norm",
    "heart_rate_trend",
    "hrv_trend",
    "movement_trend",
    "sleep_efficiency",
    "sleep_latency",
    "wake_count",
];

/// Physiological signal kind carried by a [`RawSample`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalKind {
    HeartRate,
    Hrv,
    RespiratoryRate,
    Movement,
    BloodOxygen,
    Temperature,
    SleepStage,
}

impl SignalKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalKind::HeartRate => "heart_rate",
            SignalKind::Hrv => "hrv",
            SignalKind::RespiratoryRate => "respiratory_rate",
            SignalKind::Movement => "movement",
            SignalKind::BloodOxygen => "blood_oxygen",
            SignalKind::Temperature => "temperature",
            SignalKind::SleepStage => "sleep_stage",
        }
    }
}

/// Sleep stage classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SleepStage {
    Awake,
    Light,
    Deep,
    Rem,
    Unknown,
}

impl SleepStage {
    /// Stages scored by the validator, indexed by their label
    pub const CLASSES: [SleepStage; 4] = [
        SleepStage::Awake,
        SleepStage::Light,
        SleepStage::Deep,
        SleepStage::Rem,
    ];

    /// Integer training label. `Unknown` collapses onto `Awake`.
    pub fn label(self) -> u8 {
        match self {
            SleepStage::Awake | SleepStage::Unknown => 0,
            SleepStage::Light => 1,
            SleepStage::Deep => 2,
            SleepStage::Rem => 3,
        }
    }

    /// Decode a training label
    pub fn from_label(label: u8) -> Self {
        match label {
            0 => SleepStage::Awake,
            1 => SleepStage::Light,
            2 => SleepStage::Deep,
            3 => SleepStage::Rem,
            _ => SleepStage::Unknown,
        }
    }

    /// Decode a stage carried as a raw sample value
    pub fn from_value(value: f64) -> Self {
        if value.is_finite() && value >= 0.0 && value.fract() == 0.0 && value <= 3.0 {
            Self::from_label(value as u8)
        } else {
            SleepStage::Unknown
        }
    }

    pub fn is_awake(self) -> bool {
        matches!(self, SleepStage::Awake)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SleepStage::Awake => "awake",
            SleepStage::Light => "light",
            SleepStage::Deep => "deep",
            SleepStage::Rem => "rem",
            SleepStage::Unknown => "unknown",
        }
    }
}

/// Single time-stamped reading from the health-data source
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RawSample {
    pub timestamp: DateTime<Utc>,
    pub kind: SignalKind,
    pub value: f64,
}

impl RawSample {
    pub fn new(timestamp: DateTime<Utc>, kind: SignalKind, value: f64) -> Self {
        Self {
            timestamp,
            kind,
            value,
        }
    }
}

/// One fused record per time bucket
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProcessedSample {
    pub timestamp: DateTime<Utc>,
    /// Heart rate (bpm)
    pub heart_rate: f64,
    /// Heart rate variability (ms)
    pub hrv: f64,
    /// Respiratory rate (breaths per minute)
    pub respiratory_rate: f64,
    /// Blood oxygen saturation (percentage)
    pub blood_oxygen: f64,
    /// Body temperature (celsius)
    pub temperature: f64,
    /// Movement intensity (0-1)
    pub movement: f64,
    /// Labelled sleep stage for this bucket
    pub actual_stage: SleepStage,
}

/// The six physiological signals of a sample, in feature order
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct SignalVector {
    pub heart_rate: f64,
    pub hrv: f64,
    pub movement: f64,
    pub blood_oxygen: f64,
    pub temperature: f64,
    pub respiratory_rate: f64,
}

impl SignalVector {
    pub fn from_sample(sample: &ProcessedSample) -> Self {
        Self {
            heart_rate: sample.heart_rate,
            hrv: sample.hrv,
            movement: sample.movement,
            blood_oxygen: sample.blood_oxygen,
            temperature: sample.temperature,
            respiratory_rate: sample.respiratory_rate,
        }
    }
}

/// Per-sample feature vector plus window-level sleep metrics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineeredFeature {
    pub timestamp: DateTime<Utc>,
    pub actual_stage: SleepStage,
    /// Min-max normalized values over the window (0-1, 0.5 on zero range)
    pub normalized: SignalVector,
    /// Least-squares slope of each raw signal over the window
    pub trends: SignalVector,
    /// Original signal values
    pub raw: SignalVector,
    /// Fraction of window samples not labelled awake
    pub sleep_efficiency: f64,
    /// Index of the first non-awake sample (window length if none)
    pub sleep_latency: usize,
    /// Number of asleep -> awake transitions in the window
    pub wake_count: usize,
}

impl EngineeredFeature {
    /// Classifier input row, laid out as [`FEATURE_NAMES`]
    pub fn to_row(&self) -> FeatureRow {
        [
            self.normalized.heart_rate,
            self.normalized.hrv,
            self.normalized.movement,
            self.normalized.blood_oxygen,
            self.normalized.temperature,
            self.normalized.respiratory_rate,
            self.trends.heart_rate,
            self.trends.hrv,
            self.trends.movement,
            self.sleep_efficiency,
            self.sleep_latency as f64,
            self.wake_count as f64,
        ]
    }

    pub fn label(&self) -> u8 {
        self.actual_stage.label()
    }
}

/// Feature name -> signed correlation score
pub type FeatureImportance = BTreeMap<String, f64>;

/// Personalized per-signal thresholds
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PersonalizedThresholds {
    /// Heart rate (bpm)
    pub heart_rate: f64,
    /// HRV (ms)
    pub hrv: f64,
    /// Respiratory rate (breaths per minute)
    pub respiratory_rate: f64,
    /// Sleep quality (0-1)
    pub sleep_quality: f64,
}

impl Default for PersonalizedThresholds {
    fn default() -> Self {
        Self {
            heart_rate: 60.0,
            hrv: 50.0,
            respiratory_rate: 12.0,
            sleep_quality: 0.7,
        }
    }
}

/// Scores measured against held-out data
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ValidationResult {
    pub accuracy: f64,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
}

/// Semantic model version (`MAJOR.MINOR.PATCH`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ModelVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl ModelVersion {
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    pub fn bump_patch(self) -> Self {
        Self {
            patch: self.patch + 1,
            ..self
        }
    }
}

impl Default for ModelVersion {
    fn default() -> Self {
        Self::new(1, 0, 0)
    }
}

impl fmt::Display for ModelVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl FromStr for ModelVersion {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.trim().split('.').collect();
        if parts.len() != 3 {
            return Err(format!("expected MAJOR.MINOR.PATCH, got '{}'", s));
        }
        let parse = |part: &str| {
            part.parse::<u32>()
                .map_err(|e| format!("invalid version component '{}': {}", part, e))
        };
        Ok(Self::new(parse(parts[0])?, parse(parts[1])?, parse(parts[2])?))
    }
}

impl TryFrom<String> for ModelVersion {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ModelVersion> for String {
    fn from(version: ModelVersion) -> Self {
        version.to_string()
    }
}

/// Point-in-time measurement of the deployed model
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PerformanceSnapshot {
    pub timestamp: DateTime<Utc>,
    pub accuracy: f64,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    /// Number of samples the metrics were measured on
    pub sample_count: usize,
}

/// Snapshot of training state for status queries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingStatus {
    pub is_training: bool,
    /// Progress of the current run (0-1)
    pub progress: f64,
    pub accuracy: f64,
    pub data_point_count: usize,
    pub last_training: Option<DateTime<Utc>>,
    pub model_version: String,
}

/// Terminal success record of a one-shot training run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingOutcome {
    pub accuracy: f64,
    pub data_points: usize,
    pub model_version: String,
    pub thresholds: PersonalizedThresholds,
}

/// Event emitted by a one-shot training run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TrainingEvent {
    Progress { progress: f64, message: String },
    Completed(TrainingOutcome),
    Failed { message: String },
}

impl TrainingEvent {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TrainingEvent::Progress { .. })
    }
}
