//! Pipeline orchestration
//!
//! This module runs one full training pass over an ordered sample history:
//! feature engineering → feature selection → training → cross-validation →
//! threshold calculation. CPU-bound stages run on the blocking pool; progress
//! is reported to a [`ProgressSink`] between stages.

use crate::config::LearningConfig;
use crate::error::LearnError;
use crate::features::FeatureEngineer;
use crate::model::Classifier;
use crate::selection::FeatureSelector;
use crate::store::ProgressSink;
use crate::thresholds::ThresholdCalculator;
use crate::trainer::{Trainer, TrainingResult};
use crate::types::{FeatureImportance, PersonalizedThresholds, ProcessedSample, ValidationResult};
use crate::validator::Validator;
use std::sync::Arc;
use tracing::{info, warn};

/// Everything a training pass produces
#[derive(Debug, Clone)]
pub struct PipelineOutput {
    pub training: TrainingResult,
    pub validation: ValidationResult,
    pub thresholds: PersonalizedThresholds,
    pub importance: FeatureImportance,
    /// Engineered features before selection
    pub engineered_count: usize,
}

impl PipelineOutput {
    /// Features in the validation partition
    pub fn validation_samples(&self) -> usize {
        self.training.training_data.len() - self.training.split_index
    }
}

/// One-shot training pipeline
#[derive(Clone)]
pub struct TrainingPipeline {
    config: LearningConfig,
    trainer: Trainer,
    validator: Validator,
}

impl TrainingPipeline {
    pub fn new(classifier: Arc<dyn Classifier>, config: LearningConfig) -> Self {
        Self {
            trainer: Trainer::new(Arc::clone(&classifier)),
            validator: Validator::new(classifier, config.folds),
            config,
        }
    }

    /// Run every stage over `samples`, which must be ordered by timestamp.
    ///
    /// Pipeline stages:
    /// 1. FeatureEngineer - one window per session
    /// 2. FeatureSelector - falls back to every feature when none survive
    /// 3. Trainer - chronological split
    /// 4. Validator - k-fold cross-validation
    /// 5. ThresholdCalculator - over the selected features
    pub async fn run(
        &self,
        samples: Vec<ProcessedSample>,
        progress: &dyn ProgressSink,
    ) -> Result<PipelineOutput, LearnError> {
        if samples.is_empty() {
            return Err(LearnError::InsufficientData(
                "no samples in the requested history".to_string(),
            ));
        }

        // Stage 1: Engineer features per session
        progress.report(0.1, "Engineering features");
        let gap = self.config.session_gap();
        let engineered =
            run_blocking(move || FeatureEngineer::engineer_sessions(&samples, gap)).await?;
        let engineered_count = engineered.len();

        // Stage 2: Select features
        progress.report(0.3, "Selecting features");
        let selection = FeatureSelector::select(&engineered, self.config.selection_threshold);
        let features = if selection.selected.is_empty() {
            warn!(
                threshold = self.config.selection_threshold,
                engineered = engineered_count,
                "no features passed selection, training on all features"
            );
            engineered
        } else {
            selection.selected
        };

        // Stage 3: Train
        progress.report(0.5, "Training model");
        let trainer = self.trainer.clone();
        let split = self.config.validation_split;
        let training = run_blocking(move || trainer.train(&features, split)).await??;

        // Stage 4: Cross-validate
        progress.report(0.7, "Validating model");
        let validation = self.validator.validate(&training).await;

        // Stage 5: Personalized thresholds
        progress.report(0.9, "Calculating thresholds");
        let thresholds = ThresholdCalculator::calculate(&training.training_data);

        info!(
            engineered = engineered_count,
            trained_on = training.training_data.len(),
            holdout_accuracy = training.accuracy,
            cv_accuracy = validation.accuracy,
            f1 = validation.f1,
            "training pipeline finished"
        );

        Ok(PipelineOutput {
            training,
            validation,
            thresholds,
            importance: selection.importance,
            engineered_count,
        })
    }
}

/// Run CPU-bound work on the blocking pool
pub(crate) async fn run_blocking<T, F>(work: F) -> Result<T, LearnError>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| LearnError::TaskFailed(e.to_string()))
}


#[cfg(test)]
mod tests {
    use super::test_support::RecordingProgressSink;
    use super::*;
    use crate::model::NearestCentroidClassifier;
    use crate::synthetic::SyntheticSleepGenerator;
    use chrono::{TimeZone, Utc};

    fn pipeline() -> TrainingPipeline {
        TrainingPipeline::new(Arc::new(NearestCentroidClassifier), LearningConfig::default())
    }

    fn history() -> Vec<ProcessedSample> {
        SyntheticSleepGenerator::new(21).generate_nights(
            Utc.with_ymd_and_hms(2024, 1, 10, 23, 0, 0).unwrap(),
            5,
            96,
        )
    }

    #[tokio::test]
    async fn test_full_run() {
        let sink = RecordingProgressSink::default();
        let output = pipeline().run(history(), &sink).await.unwrap();

        assert_eq!(output.engineered_count, 480);
        assert!(output.training.model.is_some());
        assert_eq!(output.importance.len(), 3);
        assert_eq!(
            output.validation_samples() + output.training.split_index,
            output.training.training_data.len()
        );
        for metric in [output.validation.accuracy, output.validation.f1] {
            assert!((0.0..=1.0).contains(&metric));
        }
        // Synthetic asleep heart rates sit well inside the clamps
        assert!((40.0..=100.0).contains(&output.thresholds.heart_rate));
        assert!((0.0..=1.0).contains(&output.thresholds.sleep_quality));
    }

    #[tokio::test]
    async fn test_progress_is_monotonic() {
        let sink = RecordingProgressSink::default();
        pipeline().run(history(), &sink).await.unwrap();

        let reports = sink.reports.lock();
        assert_eq!(reports.len(), 5);
        assert!(reports.windows(2).all(|w| w[0].0 < w[1].0));
        assert_eq!(reports[0].1, "Engineering features");
    }

    #[tokio::test]
    async fn test_empty_history_fails() {
        let sink = RecordingProgressSink::default();
        let err = pipeline().run(Vec::new(), &sink).await.unwrap_err();
        assert!(matches!(err, LearnError::InsufficientData(_)));
        assert!(sink.reports.lock().is_empty());
    }

    #[tokio::test]
    async fn test_rejecting_threshold_falls_back_to_all_features() {
        let config = LearningConfig {
            selection_threshold: 0.999_999,
            ..Default::default()
        };
        let pipeline = TrainingPipeline::new(Arc::new(NearestCentroidClassifier), config);
        let output = pipeline
            .run(history(), &RecordingProgressSink::default())
            .await
            .unwrap();
        assert_eq!(output.training.training_data.len(), output.engineered_count);
    }
}
