//! Error types for somna-learn

use thiserror::Error;

/// Errors that can occur while training, validating or deploying a model
#[derive(Debug, Error)]
pub enum LearnError {
    #[error("Insufficient data for training: {0}")]
    InsufficientData(String),

    #[error("Feature/label count mismatch: {features} feature rows, {labels} labels")]
    FeatureCountMismatch { features: usize, labels: usize },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("No model available: {0}")]
    ModelUnavailable(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Sample source error: {0}")]
    Source(String),

    #[error("Failed to parse input: {0}")]
    ParseError(String),

    #[error("Invalid JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Operation timed out after {0} seconds")]
    Timeout(u64),

    #[error("Training already in progress")]
    TrainingInProgress,

    #[error("Background task failed: {0}")]
    TaskFailed(String),
}
