//! Somna Learn - On-device personalized sleep-stage training engine
//!
//! Somna turns a user's processed wearable samples into a personalized sleep
//! stage classifier through a deterministic pipeline: feature engineering →
//! feature selection → training → cross-validation → threshold calculation.
//!
//! ## Modules
//!
//! - **Training Pipeline**: One-shot training over the stored sample history
//! - **Continuous Learning**: Buffered incremental updates with gated commit
//!   and rollback of the deployed model
//! - **Service**: Host-facing facade with progress streaming and scheduling

pub mod aligner;
pub mod anomaly;
pub mod buffer;
pub mod config;
pub mod deployed;
pub mod error;
pub mod features;
pub mod learning;
pub mod metadata;
pub mod model;
pub mod normalizer;
pub mod pipeline;
pub mod selection;
pub mod service;
pub mod store;
pub mod synthetic;
pub mod thresholds;
pub mod trainer;
pub mod types;
pub mod validator;

pub use config::LearningConfig;
pub use deployed::{DeployedModel, ModelSlot};
pub use error::LearnError;
pub use learning::{ContinuousLearningController, CycleOutcome, LearningPhase};
pub use model::{Classifier, ModelHandle, NearestCentroidClassifier, StageModel};
pub use pipeline::{PipelineOutput, TrainingPipeline};
pub use service::SleepLearningService;

// Data exports
pub use aligner::SampleAligner;
pub use store::{ModelStore, ProgressSink, SampleSource, ThresholdSink};
pub use types::{
    PersonalizedThresholds, ProcessedSample, RawSample, SleepStage, TrainingEvent,
    TrainingOutcome, TrainingStatus, ValidationResult,
};

/// Somna version embedded in model metadata
pub const SOMNA_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Producer name for model metadata
pub const PRODUCER_NAME: &str = "somna-learn";
