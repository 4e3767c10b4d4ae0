//! Continuous learning
//!
//! The controller keeps a rolling buffer of recent samples and, once per
//! cycle, decides whether the deployed model needs an update. A cycle walks
//! an explicit state machine:
//!
//! ```text
//! Idle -> Buffering -> Evaluating -> Buffering                  (no update needed)
//!                                 -> Updating -> Validating -> Buffering
//!                                                 (committed or rolled back)
//! ```
//!
//! Each cycle engineers one snapshot of the buffer per session, so evaluation,
//! training and the commit gate all see identical feature rows. Anomalous
//! samples are dropped from training only.
//!
//! Cycles are single-flight: a trigger that arrives while one is running is
//! rejected with [`CycleOutcome::Skipped`]. Every write to the deployed slot
//! goes through the cycle gate. A rejected or failed candidate never touches
//! the slot; a committed one drains the samples it was trained on.

use crate::anomaly::anomaly_mask;
use crate::buffer::{PerformanceHistory, SampleBuffer};
use crate::config::LearningConfig;
use crate::deployed::{DeployedModel, ModelSlot};
use crate::error::LearnError;
use crate::features::FeatureEngineer;
use crate::metadata::MetadataEncoder;
use crate::model::{Classifier, ModelHandle, StageModel};
use crate::pipeline::run_blocking;
use crate::store::ModelStore;
use crate::trainer::{to_rows_and_labels, Trainer};
use crate::types::{
    EngineeredFeature, ModelVersion, PerformanceSnapshot, ProcessedSample, ValidationResult,
};
use crate::validator::score_model;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Controller state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LearningPhase {
    Idle,
    Buffering,
    Evaluating,
    Updating,
    Validating,
}

/// Why an update was requested
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateReason {
    BelowThreshold,
    AccuracyDeclined,
    BufferSaturated,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateDecision {
    pub should_update: bool,
    pub reasons: Vec<UpdateReason>,
}

/// Decide whether the deployed model should be retrained.
///
/// An update is requested when accuracy is below the threshold, when it fell
/// by more than the allowed decline since the previous snapshot, or when the
/// buffer has reached saturation.
pub fn decide_update(
    current_accuracy: f64,
    previous_accuracy: Option<f64>,
    buffered: usize,
    config: &LearningConfig,
) -> UpdateDecision {
    let mut reasons = Vec::new();
    if current_accuracy < config.accuracy_threshold {
        reasons.push(UpdateReason::BelowThreshold);
    }
    if let Some(previous) = previous_accuracy {
        if previous - current_accuracy > config.accuracy_decline {
            reasons.push(UpdateReason::AccuracyDeclined);
        }
    }
    if buffered >= config.buffer_saturation {
        reasons.push(UpdateReason::BufferSaturated);
    }
    UpdateDecision {
        should_update: !reasons.is_empty(),
        reasons,
    }
}

/// Candidate produced by the update stage
#[derive(Debug, Clone)]
pub struct LearningResult {
    /// Candidate holdout accuracy minus the committed accuracy
    pub improvement: f64,
    pub new_accuracy: f64,
    pub model: Option<ModelHandle>,
    pub success: bool,
    /// Features the candidate was fitted on
    pub training_samples: usize,
}

impl LearningResult {
    pub fn failed() -> Self {
        Self {
            improvement: 0.0,
            new_accuracy: 0.0,
            model: None,
            success: false,
            training_samples: 0,
        }
    }
}

/// How a cycle ended
#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    /// Another cycle was in flight
    Skipped,
    /// Not enough buffered samples to evaluate
    InsufficientData { buffered: usize },
    NoUpdateNeeded { accuracy: f64 },
    Committed {
        version: ModelVersion,
        accuracy: f64,
        improvement: f64,
    },
    RolledBack {
        candidate_accuracy: f64,
        committed_accuracy: f64,
    },
    Failed(String),
}

/// Buffer snapshot engineered once per cycle
struct PreparedBuffer {
    /// One feature per buffered sample, engineered per session
    features: Vec<EngineeredFeature>,
    /// Features of the samples that passed the anomaly filter
    training: Vec<EngineeredFeature>,
    /// Timestamp of the newest sample in the snapshot
    newest: Option<DateTime<Utc>>,
}

impl PreparedBuffer {
    fn build(samples: &[ProcessedSample], gap: Duration, sigma: f64) -> Self {
        let features = FeatureEngineer::engineer_sessions(samples, gap);
        let mask = anomaly_mask(samples, sigma);
        let training = features
            .iter()
            .zip(&mask)
            .filter(|(_, &anomalous)| !anomalous)
            .map(|(feature, _)| feature.clone())
            .collect();
        Self {
            features,
            training,
            newest: samples.last().map(|s| s.timestamp),
        }
    }

    /// The most recent `n` features, oldest first
    fn recent(&self, n: usize) -> &[EngineeredFeature] {
        &self.features[self.features.len().saturating_sub(n)..]
    }
}

/// Gated incremental learner around the deployed model slot
pub struct ContinuousLearningController {
    config: LearningConfig,
    trainer: Trainer,
    slot: Arc<ModelSlot>,
    store: Arc<dyn ModelStore>,
    encoder: MetadataEncoder,
    buffer: Mutex<SampleBuffer>,
    history: Mutex<PerformanceHistory>,
    phase: Mutex<LearningPhase>,
    last_update: Mutex<Option<DateTime<Utc>>>,
    pub(crate) cycle_gate: tokio::sync::Mutex<()>,
}

impl ContinuousLearningController {
    pub fn new(
        config: LearningConfig,
        classifier: Arc<dyn Classifier>,
        slot: Arc<ModelSlot>,
        store: Arc<dyn ModelStore>,
    ) -> Self {
        Self {
            trainer: Trainer::new(classifier),
            buffer: Mutex::new(SampleBuffer::new(config.buffer_capacity)),
            history: Mutex::new(PerformanceHistory::new(config.history_capacity)),
            config,
            slot,
            store,
            encoder: MetadataEncoder::new(),
            phase: Mutex::new(LearningPhase::Idle),
            last_update: Mutex::new(None),
            cycle_gate: tokio::sync::Mutex::new(()),
        }
    }

    pub fn config(&self) -> &LearningConfig {
        &self.config
    }

    pub fn phase(&self) -> LearningPhase {
        *self.phase.lock()
    }

    pub fn buffered(&self) -> usize {
        self.buffer.lock().len()
    }

    pub fn last_update(&self) -> Option<DateTime<Utc>> {
        *self.last_update.lock()
    }

    pub fn history(&self) -> Vec<PerformanceSnapshot> {
        self.history.lock().iter().copied().collect()
    }

    /// Whether a cycle is past buffering, without touching the cycle gate
    pub fn is_cycle_running(&self) -> bool {
        matches!(
            self.phase(),
            LearningPhase::Evaluating | LearningPhase::Updating | LearningPhase::Validating
        )
    }

    /// Append a sample to the ring buffer
    pub fn add_sample(&self, sample: ProcessedSample) {
        self.buffer.lock().push(sample);
        let mut phase = self.phase.lock();
        if *phase == LearningPhase::Idle {
            *phase = LearningPhase::Buffering;
        }
    }

    /// Append many samples under one lock
    pub fn add_samples(&self, samples: impl IntoIterator<Item = ProcessedSample>) {
        self.buffer.lock().extend(samples);
        let mut phase = self.phase.lock();
        if *phase == LearningPhase::Idle {
            *phase = LearningPhase::Buffering;
        }
    }

    /// Install a model trained outside a cycle.
    ///
    /// Waits for an in-flight cycle so the slot has a single writer at a time.
    pub async fn install_trained(
        &self,
        model: ModelHandle,
        metrics: &ValidationResult,
        training_samples: usize,
        validation_samples: usize,
    ) -> Arc<DeployedModel> {
        let _gate = self.cycle_gate.lock().await;
        self.commit(model, metrics, training_samples, validation_samples)
    }

    /// Run one learning cycle to completion
    pub async fn run_cycle(&self) -> CycleOutcome {
        let Ok(_gate) = self.cycle_gate.try_lock() else {
            debug!("learning cycle already in flight, skipping trigger");
            return CycleOutcome::Skipped;
        };

        let outcome = self.cycle().await;
        self.set_phase(LearningPhase::Buffering);

        match &outcome {
            CycleOutcome::Committed {
                version, accuracy, ..
            } => info!(version = %version, accuracy, "learning cycle committed"),
            CycleOutcome::RolledBack {
                candidate_accuracy,
                committed_accuracy,
            } => warn!(
                candidate_accuracy,
                committed_accuracy, "learning cycle rolled back"
            ),
            CycleOutcome::Failed(message) => warn!(error = %message, "learning cycle failed"),
            other => debug!(outcome = ?other, "learning cycle finished"),
        }
        outcome
    }

    async fn cycle(&self) -> CycleOutcome {
        let snapshot = self.buffer.lock().snapshot();
        let buffered = snapshot.len();
        if buffered < self.config.min_samples_for_update {
            return CycleOutcome::InsufficientData { buffered };
        }

        // Evaluating
        self.set_phase(LearningPhase::Evaluating);
        let gap = self.config.session_gap();
        let sigma = self.config.anomaly_sigma;
        let mut prepared =
            match run_blocking(move || PreparedBuffer::build(&snapshot, gap, sigma)).await {
                Ok(prepared) => prepared,
                Err(e) => return CycleOutcome::Failed(e.to_string()),
            };

        let evaluation = self.evaluate(&prepared);
        let current_accuracy = evaluation.map(|s| s.accuracy).unwrap_or(0.0);
        let previous_accuracy = self.history.lock().last().map(|s| s.accuracy);
        let decision = decide_update(
            current_accuracy,
            previous_accuracy,
            buffered,
            &self.config,
        );
        if let Some(evaluation) = evaluation {
            self.history.lock().record(evaluation);
        }
        info!(
            accuracy = current_accuracy,
            buffered,
            reasons = ?decision.reasons,
            "evaluated deployed model"
        );
        if !decision.should_update {
            return CycleOutcome::NoUpdateNeeded {
                accuracy: current_accuracy,
            };
        }

        // Updating
        self.set_phase(LearningPhase::Updating);
        debug!(
            buffered,
            excluded = prepared.features.len() - prepared.training.len(),
            "filtered anomalies from training data"
        );
        let training = std::mem::take(&mut prepared.training);
        let candidate = self.incremental_update(training).await;
        let model = match candidate.model.clone() {
            Some(model) if candidate.success => model,
            _ => return CycleOutcome::Failed("incremental update produced no model".to_string()),
        };

        // Validating
        self.set_phase(LearningPhase::Validating);
        let window = prepared.recent(self.config.validation_window);
        let validation = score_features(model.as_ref(), window);
        let committed_accuracy = self.slot.accuracy().unwrap_or(0.0);

        if validation.accuracy < committed_accuracy - self.config.rollback_margin {
            return CycleOutcome::RolledBack {
                candidate_accuracy: validation.accuracy,
                committed_accuracy,
            };
        }

        // Commit
        let deployed = self.commit(
            model,
            &validation,
            candidate.training_samples,
            window.len(),
        );
        if let Some(newest) = prepared.newest {
            let drained = self.buffer.lock().drain_through(newest);
            debug!(drained, "drained trained samples from buffer");
        }

        CycleOutcome::Committed {
            version: deployed.version,
            accuracy: validation.accuracy,
            improvement: validation.accuracy - committed_accuracy,
        }
    }

    /// Score the deployed model on the most recent prepared features
    fn evaluate(&self, prepared: &PreparedBuffer) -> Option<PerformanceSnapshot> {
        let deployed = self.slot.current()?;
        let window = prepared.recent(self.config.evaluation_window);
        if window.is_empty() {
            return None;
        }
        let scores = score_features(deployed.model.as_ref(), window);
        Some(snapshot(&scores, window.len()))
    }

    /// Train a candidate on the anomaly-filtered features of the buffer.
    ///
    /// Bounded by the stage timeout. Any failure, a timeout included, yields
    /// [`LearningResult::failed`].
    async fn incremental_update(&self, training: Vec<EngineeredFeature>) -> LearningResult {
        match self.fit_candidate(training).await {
            Ok(result) => result,
            Err(e) => {
                warn!(error = %e, "incremental update failed");
                LearningResult::failed()
            }
        }
    }

    async fn fit_candidate(
        &self,
        training: Vec<EngineeredFeature>,
    ) -> Result<LearningResult, LearnError> {
        let trainer = self.trainer.clone();
        let split = self.config.validation_split;
        let work = run_blocking(move || trainer.train(&training, split));

        let trained = tokio::time::timeout(self.config.stage_timeout(), work)
            .await
            .map_err(|_| LearnError::Timeout(self.config.stage_timeout_secs))???;

        let committed = self.slot.accuracy().unwrap_or(0.0);
        Ok(LearningResult {
            improvement: trained.accuracy - committed,
            new_accuracy: trained.accuracy,
            success: trained.model.is_some(),
            model: trained.model,
            training_samples: trained.split_index,
        })
    }

    /// Install, persist and record a model. Callers hold the cycle gate.
    fn commit(
        &self,
        model: ModelHandle,
        metrics: &ValidationResult,
        training_samples: usize,
        validation_samples: usize,
    ) -> Arc<DeployedModel> {
        let deployed = self
            .slot
            .install(model, metrics.accuracy, training_samples);
        let metadata = self.encoder.encode(&deployed, metrics, validation_samples);
        match self.store.save(&deployed, &metadata) {
            Ok(location) => info!(location = %location, "persisted model"),
            Err(e) => warn!(error = %e, "model persistence failed, keeping in-memory commit"),
        }

        self.history.lock().record(PerformanceSnapshot {
            timestamp: deployed.deployed_at,
            ..snapshot(metrics, validation_samples)
        });
        *self.last_update.lock() = Some(deployed.deployed_at);
        deployed
    }

    fn set_phase(&self, phase: LearningPhase) {
        *self.phase.lock() = phase;
    }
}

fn score_features(model: &dyn StageModel, features: &[EngineeredFeature]) -> ValidationResult {
    let (rows, labels) = to_rows_and_labels(features);
    score_model(model, &rows, &labels)
}

fn snapshot(scores: &ValidationResult, sample_count: usize) -> PerformanceSnapshot {
    PerformanceSnapshot {
        timestamp: Utc::now(),
        accuracy: scores.accuracy,
        precision: scores.precision,
        recall: scores.recall,
        f1: scores.f1,
        sample_count,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::test_support::{ConstantClassifier, ConstantModel};
    use crate::model::NearestCentroidClassifier;
    use crate::store::InMemoryModelStore;
    use crate::synthetic::SyntheticSleepGenerator;
    use crate::trainer::split_index;
    use crate::types::{FeatureRow, SleepStage};
    use chrono::{Duration, TimeZone};
    use pretty_assertions::assert_eq;

    fn light_samples(count: usize) -> Vec<ProcessedSample> {
        let start = Utc.with_ymd_and_hms(2024, 1, 15, 23, 0, 0).unwrap();
        (0..count)
            .map(|i| ProcessedSample {
                timestamp: start + Duration::minutes(i as i64),
                heart_rate: 56.0 + (i % 5) as f64,
                hrv: 44.0 + (i % 3) as f64,
                respiratory_rate: 13.0,
                blood_oxygen: 97.0,
                temperature: 36.5,
                movement: 0.1,
                actual_stage: SleepStage::Light,
            })
            .collect()
    }

    struct Harness {
        controller: ContinuousLearningController,
        slot: Arc<ModelSlot>,
        store: Arc<InMemoryModelStore>,
    }

    fn harness(classifier: Arc<dyn Classifier>, config: LearningConfig) -> Harness {
        let slot = Arc::new(ModelSlot::default());
        let store = Arc::new(InMemoryModelStore::default());
        let controller =
            ContinuousLearningController::new(config, classifier, slot.clone(), store.clone());
        Harness {
            controller,
            slot,
            store,
        }
    }

    #[test]
    fn test_saturated_buffer_alone_triggers_update() {
        let config = LearningConfig::default();
        let decision = decide_update(0.9, Some(0.9), 250, &config);
        assert_eq!(
            decision,
            UpdateDecision {
                should_update: true,
                reasons: vec![UpdateReason::BufferSaturated],
            }
        );
    }

    #[test]
    fn test_decision_reasons() {
        let config = LearningConfig::default();

        let healthy = decide_update(0.9, Some(0.92), 150, &config);
        assert!(!healthy.should_update);

        let low = decide_update(0.8, None, 150, &config);
        assert_eq!(low.reasons, vec![UpdateReason::BelowThreshold]);

        let declined = decide_update(0.88, Some(0.95), 150, &config);
        assert_eq!(declined.reasons, vec![UpdateReason::AccuracyDeclined]);
    }

    #[test]
    fn test_add_sample_moves_to_buffering() {
        let h = harness(Arc::new(NearestCentroidClassifier), LearningConfig::default());
        assert_eq!(h.controller.phase(), LearningPhase::Idle);
        h.controller.add_sample(light_samples(1)[0]);
        assert_eq!(h.controller.phase(), LearningPhase::Buffering);
        assert_eq!(h.controller.buffered(), 1);
    }

    #[test]
    fn test_buffer_is_bounded() {
        let h = harness(Arc::new(NearestCentroidClassifier), LearningConfig::default());
        h.controller.add_samples(light_samples(1500));
        assert_eq!(h.controller.buffered(), 1000);
    }

    #[tokio::test]
    async fn test_cycle_needs_minimum_samples() {
        let h = harness(Arc::new(NearestCentroidClassifier), LearningConfig::default());
        h.controller.add_samples(light_samples(99));

        assert_eq!(
            h.controller.run_cycle().await,
            CycleOutcome::InsufficientData { buffered: 99 }
        );
        assert!(h.slot.is_empty());
    }

    #[tokio::test]
    async fn test_cycle_commits_better_model() {
        let h = harness(Arc::new(NearestCentroidClassifier), LearningConfig::default());
        let initial = h.slot.install(Arc::new(ConstantModel(0)), 0.5, 100);
        h.controller.add_samples(light_samples(250));

        let outcome = h.controller.run_cycle().await;

        assert_eq!(
            outcome,
            CycleOutcome::Committed {
                version: ModelVersion::new(1, 0, 2),
                accuracy: 1.0,
                improvement: 0.5,
            }
        );
        let deployed = h.slot.current().unwrap();
        assert!(!Arc::ptr_eq(&deployed, &initial));
        assert_eq!(deployed.accuracy, 1.0);
        assert_eq!(h.store.saved().len(), 1);
        assert!(h.controller.last_update().is_some());
        assert_eq!(h.controller.phase(), LearningPhase::Buffering);
        // Evaluation snapshot plus commit snapshot
        assert_eq!(h.controller.history().len(), 2);
        assert_eq!(h.controller.buffered(), 0);
    }

    #[tokio::test]
    async fn test_cycle_rolls_back_worse_model() {
        // Candidates always predict deep sleep on an all-light buffer
        let h = harness(
            Arc::new(ConstantClassifier(SleepStage::Deep.label())),
            LearningConfig::default(),
        );
        let initial = h.slot.install(Arc::new(ConstantModel(0)), 0.95, 100);
        h.controller.add_samples(light_samples(250));

        let outcome = h.controller.run_cycle().await;

        assert_eq!(
            outcome,
            CycleOutcome::RolledBack {
                candidate_accuracy: 0.0,
                committed_accuracy: 0.95,
            }
        );
        assert!(Arc::ptr_eq(&h.slot.current().unwrap(), &initial));
        assert_eq!(h.slot.version(), ModelVersion::new(1, 0, 1));
        assert!(h.store.saved().is_empty());
        assert_eq!(h.controller.buffered(), 250);
    }

    #[tokio::test]
    async fn test_no_update_when_model_is_healthy() {
        let h = harness(Arc::new(NearestCentroidClassifier), LearningConfig::default());
        h.slot
            .install(Arc::new(ConstantModel(SleepStage::Light.label())), 1.0, 100);
        h.controller.add_samples(light_samples(150));

        assert_eq!(
            h.controller.run_cycle().await,
            CycleOutcome::NoUpdateNeeded { accuracy: 1.0 }
        );
        assert_eq!(h.slot.generation(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_trigger_is_skipped() {
        let h = harness(Arc::new(NearestCentroidClassifier), LearningConfig::default());
        h.controller.add_samples(light_samples(150));

        let _gate = h.controller.cycle_gate.lock().await;
        assert_eq!(h.controller.run_cycle().await, CycleOutcome::Skipped);
    }

    #[tokio::test]
    async fn test_candidate_at_rollback_margin_commits() {
        let config = LearningConfig::default();
        assert_eq!(1.0 - config.rollback_margin, 0.9);
        let light = SleepStage::Light.label();
        let h = harness(Arc::new(ConstantClassifier(light)), config);
        h.slot.install(Arc::new(ConstantModel(light)), 1.0, 100);

        // 18 of the last 20 samples are light, so the candidate scores 0.9
        let mut samples = light_samples(200);
        samples[185].actual_stage = SleepStage::Awake;
        samples[195].actual_stage = SleepStage::Awake;
        h.controller.add_samples(samples);

        assert_eq!(
            h.controller.run_cycle().await,
            CycleOutcome::Committed {
                version: ModelVersion::new(1, 0, 2),
                accuracy: 0.9,
                improvement: 0.9 - 1.0,
            }
        );
    }

    #[tokio::test]
    async fn test_commit_drains_trained_samples() {
        let h = harness(Arc::new(NearestCentroidClassifier), LearningConfig::default());
        h.controller.add_samples(light_samples(250));

        assert!(matches!(
            h.controller.run_cycle().await,
            CycleOutcome::Committed { .. }
        ));
        assert_eq!(
            h.controller.run_cycle().await,
            CycleOutcome::InsufficientData { buffered: 0 }
        );
        assert_eq!(h.slot.generation(), 1);
    }

    /// Classifier recording what it was fitted on; its models record every
    /// row they score and always predict light sleep
    #[derive(Debug, Default)]
    struct RecordingClassifier {
        fitted_rows: Arc<Mutex<Vec<FeatureRow>>>,
        fitted_labels: Arc<Mutex<Vec<u8>>>,
        scored_rows: Arc<Mutex<Vec<FeatureRow>>>,
    }

    #[derive(Debug)]
    struct RecordingModel {
        scored_rows: Arc<Mutex<Vec<FeatureRow>>>,
    }

    impl StageModel for RecordingModel {
        fn predict(&self, row: &FeatureRow) -> u8 {
            self.scored_rows.lock().push(*row);
            SleepStage::Light.label()
        }

        fn name(&self) -> &str {
            "recording"
        }

        fn export(&self) -> Result<serde_json::Value, LearnError> {
            Ok(serde_json::json!({}))
        }
    }

    impl Classifier for RecordingClassifier {
        fn fit(&self, rows: &[FeatureRow], labels: &[u8]) -> Result<ModelHandle, LearnError> {
            self.fitted_rows.lock().extend_from_slice(rows);
            self.fitted_labels.lock().extend_from_slice(labels);
            Ok(Arc::new(RecordingModel {
                scored_rows: Arc::clone(&self.scored_rows),
            }))
        }
    }

    #[tokio::test]
    async fn test_gate_scores_rows_engineered_like_training() {
        let config = LearningConfig::default();
        let classifier = Arc::new(RecordingClassifier::default());
        let h = harness(classifier.clone(), config.clone());
        let nights = SyntheticSleepGenerator::new(5).generate_nights(
            Utc.with_ymd_and_hms(2024, 1, 10, 23, 0, 0).unwrap(),
            3,
            96,
        );
        h.controller.add_samples(nights.clone());

        assert!(matches!(
            h.controller.run_cycle().await,
            CycleOutcome::Committed { .. }
        ));

        let features = FeatureEngineer::engineer_sessions(&nights, config.session_gap());
        let mask = anomaly_mask(&nights, config.anomaly_sigma);
        let kept: Vec<EngineeredFeature> = features
            .iter()
            .zip(&mask)
            .filter(|(_, &anomalous)| !anomalous)
            .map(|(feature, _)| feature.clone())
            .collect();
        let (kept_rows, _) = to_rows_and_labels(&kept);
        let split = split_index(kept.len(), config.validation_split);
        assert_eq!(*classifier.fitted_rows.lock(), kept_rows[..split].to_vec());

        // The commit gate scores last, after the trainer's holdout pass
        let (all_rows, _) = to_rows_and_labels(&features);
        let scored = classifier.scored_rows.lock();
        let window = config.validation_window;
        assert_eq!(
            &scored[scored.len() - window..],
            &all_rows[all_rows.len() - window..]
        );
    }

    #[tokio::test]
    async fn test_anomalies_are_evaluated_but_not_trained_on() {
        let config = LearningConfig {
            accuracy_threshold: 0.99,
            ..Default::default()
        };
        let classifier = Arc::new(RecordingClassifier::default());
        let h = harness(classifier.clone(), config);
        h.slot
            .install(Arc::new(ConstantModel(SleepStage::Light.label())), 0.5, 100);

        let mut samples = light_samples(100);
        for i in [20, 30, 40] {
            samples[i].heart_rate = 150.0;
            samples[i].actual_stage = SleepStage::Awake;
        }
        h.controller.add_samples(samples);

        assert!(matches!(
            h.controller.run_cycle().await,
            CycleOutcome::Committed { .. }
        ));

        // The deployed model is scored on all 100 samples, spikes included
        let evaluation = h.controller.history()[0];
        assert_eq!(evaluation.sample_count, 100);
        assert!((evaluation.accuracy - 0.97).abs() < 1e-9);

        let labels = classifier.fitted_labels.lock();
        assert_eq!(labels.len(), split_index(97, 0.2));
        assert!(!labels.contains(&SleepStage::Awake.label()));
    }

    #[tokio::test]
    async fn test_external_install_waits_for_cycle() {
        let h = harness(Arc::new(NearestCentroidClassifier), LearningConfig::default());
        let metrics = ValidationResult {
            accuracy: 0.9,
            precision: 0.9,
            recall: 0.9,
            f1: 0.9,
        };

        let gate = h.controller.cycle_gate.lock().await;
        let blocked = tokio::time::timeout(
            std::time::Duration::from_millis(50),
            h.controller
                .install_trained(Arc::new(ConstantModel(1)), &metrics, 80, 20),
        )
        .await;
        assert!(blocked.is_err());
        assert!(h.slot.is_empty());
        drop(gate);

        let deployed = h
            .controller
            .install_trained(Arc::new(ConstantModel(1)), &metrics, 80, 20)
            .await;
        assert_eq!(deployed.version, ModelVersion::new(1, 0, 1));
        assert_eq!(h.store.saved().len(), 1);
        assert_eq!(h.controller.history().len(), 1);
        assert_eq!(h.controller.last_update(), Some(deployed.deployed_at));
    }

    #[derive(Debug)]
    struct SlowClassifier;

    impl Classifier for SlowClassifier {
        fn fit(&self, _rows: &[FeatureRow], _labels: &[u8]) -> Result<ModelHandle, LearnError> {
            std::thread::sleep(std::time::Duration::from_millis(1500));
            Ok(Arc::new(ConstantModel(1)))
        }
    }

    #[tokio::test]
    async fn test_update_timeout_fails_cycle() {
        let config = LearningConfig {
            stage_timeout_secs: 1,
            ..Default::default()
        };
        let h = harness(Arc::new(SlowClassifier), config);
        h.controller.add_samples(light_samples(150));

        let outcome = h.controller.run_cycle().await;

        assert!(matches!(outcome, CycleOutcome::Failed(_)));
        assert!(h.slot.is_empty());
    }

    #[tokio::test]
    async fn test_failed_update_yields_failed_result() {
        let h = harness(Arc::new(NearestCentroidClassifier), LearningConfig::default());

        let result = h.controller.incremental_update(Vec::new()).await;

        assert!(!result.success);
        assert_eq!(result.improvement, 0.0);
        assert!(result.model.is_none());
        assert_eq!(result.training_samples, 0);
    }

    #[tokio::test]
    async fn test_timed_out_update_yields_failed_result() {
        let config = LearningConfig {
            stage_timeout_secs: 1,
            ..Default::default()
        };
        let h = harness(Arc::new(SlowClassifier), config);
        let features = FeatureEngineer::engineer(&light_samples(50));

        let result = h.controller.incremental_update(features).await;

        assert!(!result.success);
        assert!(result.model.is_none());
    }
}
