//! Model metadata encoding
//!
//! This module describes a deployed model as a JSON document stored next to
//! the model artifact: identity, training provenance, validation metrics and
//! the input/output layout a consumer needs to run it.

use crate::deployed::DeployedModel;
use crate::error::LearnError;
use crate::types::{SleepStage, ValidationResult, FEATURE_NAMES};
use crate::{PRODUCER_NAME, SOMNA_VERSION};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Current metadata schema version
pub const METADATA_VERSION: &str = "1.0.0";

/// Model name recorded in metadata
pub const MODEL_NAME: &str = "SleepStagePredictor";

/// Full metadata document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelMetadata {
    pub metadata_version: String,
    pub model_info: ModelInfo,
    pub training_info: TrainingInfo,
    pub performance_metrics: PerformanceMetrics,
    pub features: FeatureLayout,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub name: String,
    /// Deployed model version (`MAJOR.MINOR.PATCH`)
    pub version: String,
    pub description: String,
    pub producer: Producer,
    /// RFC 3339 time the model was installed
    pub created_at_utc: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Producer {
    pub name: String,
    pub version: String,
    pub instance_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingInfo {
    pub algorithm: String,
    pub training_samples: usize,
    pub validation_samples: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub accuracy: f64,
    pub precision: f64,
    pub recall: f64,
    pub f1_score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureLayout {
    pub input_features: Vec<String>,
    pub output_classes: Vec<String>,
}

/// Encoder that stamps metadata with a per-process instance id
pub struct MetadataEncoder {
    instance_id: String,
}

impl Default for MetadataEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl MetadataEncoder {
    /// Create a new encoder with a unique instance ID
    pub fn new() -> Self {
        Self {
            instance_id: Uuid::new_v4().to_string(),
        }
    }

    /// Create an encoder with a specific instance ID
    pub fn with_instance_id(instance_id: String) -> Self {
        Self { instance_id }
    }

    /// Describe a deployed model and the metrics it was accepted with
    pub fn encode(
        &self,
        deployed: &DeployedModel,
        metrics: &ValidationResult,
        validation_samples: usize,
    ) -> ModelMetadata {
        ModelMetadata {
            metadata_version: METADATA_VERSION.to_string(),
            model_info: ModelInfo {
                name: MODEL_NAME.to_string(),
                version: deployed.version.to_string(),
                description: "Personalized sleep stage classifier over engineered biometric features"
                    .to_string(),
                producer: Producer {
                    name: PRODUCER_NAME.to_string(),
                    version: SOMNA_VERSION.to_string(),
                    instance_id: self.instance_id.clone(),
                },
                created_at_utc: deployed.deployed_at.to_rfc3339(),
            },
            training_info: TrainingInfo {
                algorithm: deployed.model.name().to_string(),
                training_samples: deployed.training_samples,
                validation_samples,
            },
            performance_metrics: PerformanceMetrics {
                accuracy: metrics.accuracy,
                precision: metrics.precision,
                recall: metrics.recall,
                f1_score: metrics.f1,
            },
            features: FeatureLayout {
                input_features: FEATURE_NAMES.iter().map(|s| s.to_string()).collect(),
                output_classes: SleepStage::CLASSES
                    .iter()
                    .map(|s| s.as_str().to_string())
                    .collect(),
            },
        }
    }

    /// Encode to a pretty-printed JSON string
    pub fn encode_to_json(
        &self,
        deployed: &DeployedModel,
        metrics: &ValidationResult,
        validation_samples: usize,
    ) -> Result<String, LearnError> {
        let metadata = self.encode(deployed, metrics, validation_samples);
        serde_json::to_string_pretty(&metadata).map_err(LearnError::JsonError)
    }
}
