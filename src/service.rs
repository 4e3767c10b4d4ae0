//! Service facade
//!
//! [`SleepLearningService`] is the entry point for host applications. It owns
//! the deployed model slot, runs one-shot historical training with streamed
//! progress, feeds the continuous-learning controller and schedules its
//! cycles.
//!
//! Async entry points must be called from within a Tokio runtime.

use crate::config::LearningConfig;
use crate::deployed::ModelSlot;
use crate::error::LearnError;
use crate::learning::ContinuousLearningController;
use crate::model::Classifier;
use crate::pipeline::{run_blocking, TrainingPipeline};
use crate::store::{
    ChannelProgressSink, ModelStore, ProgressSink, SampleSource, ThresholdSink,
    TracingProgressSink,
};
use crate::types::{ProcessedSample, TrainingEvent, TrainingOutcome, TrainingStatus};
use chrono::Utc;
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Progress of the one-shot training run
#[derive(Debug, Clone, Copy, Default)]
struct RunState {
    is_training: bool,
    progress: f64,
}

struct Scheduler {
    shutdown: mpsc::Sender<()>,
    task: JoinHandle<()>,
}

struct Inner {
    config: LearningConfig,
    pipeline: TrainingPipeline,
    controller: ContinuousLearningController,
    slot: Arc<ModelSlot>,
    source: Arc<dyn SampleSource>,
    threshold_sink: Arc<dyn ThresholdSink>,
    run: Mutex<RunState>,
    training_gate: tokio::sync::Mutex<()>,
    scheduler: Mutex<Option<Scheduler>>,
}

/// On-device sleep model training and continuous learning
#[derive(Clone)]
pub struct SleepLearningService {
    inner: Arc<Inner>,
}

impl SleepLearningService {
    pub fn new(
        config: LearningConfig,
        classifier: Arc<dyn Classifier>,
        source: Arc<dyn SampleSource>,
        model_store: Arc<dyn ModelStore>,
        threshold_sink: Arc<dyn ThresholdSink>,
    ) -> Result<Self, LearnError> {
        config.validate()?;
        let slot = Arc::new(ModelSlot::default());
        let controller = ContinuousLearningController::new(
            config.clone(),
            Arc::clone(&classifier),
            Arc::clone(&slot),
            model_store,
        );

        Ok(Self {
            inner: Arc::new(Inner {
                pipeline: TrainingPipeline::new(classifier, config.clone()),
                config,
                controller,
                slot,
                source,
                threshold_sink,
                run: Mutex::new(RunState::default()),
                training_gate: tokio::sync::Mutex::new(()),
                scheduler: Mutex::new(None),
            }),
        })
    }

    pub fn slot(&self) -> Arc<ModelSlot> {
        Arc::clone(&self.inner.slot)
    }

    pub fn controller(&self) -> &ContinuousLearningController {
        &self.inner.controller
    }

    /// Train on the configured history window, streaming progress events.
    ///
    /// The stream ends with exactly one `Completed` or `Failed` event.
    pub fn train_on_historical_data(&self) -> UnboundedReceiver<TrainingEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let sink = ChannelProgressSink::new(tx.clone());
            let event = match inner.train_historical(&sink).await {
                Ok(outcome) => TrainingEvent::Completed(outcome),
                Err(e) => TrainingEvent::Failed {
                    message: e.to_string(),
                },
            };
            // A dropped receiver only means nobody is listening
            let _ = tx.send(event);
        });
        rx
    }

    /// Train on the configured history window, reporting to `progress`
    pub async fn train_historical(
        &self,
        progress: &dyn ProgressSink,
    ) -> Result<TrainingOutcome, LearnError> {
        self.inner.train_historical(progress).await
    }

    /// Start the cycle and full-retrain timers. No-op when already running.
    pub fn enable_continuous_learning(&self) {
        let mut scheduler = self.inner.scheduler.lock();
        if scheduler.as_ref().map_or(false, |s| !s.task.is_finished()) {
            return;
        }

        let (shutdown, shutdown_rx) = mpsc::channel(1);
        let task = tokio::spawn(run_scheduler(
            Arc::downgrade(&self.inner),
            self.inner.config.cycle_interval(),
            self.inner.config.full_retrain_interval(),
            shutdown_rx,
        ));
        *scheduler = Some(Scheduler { shutdown, task });
        info!(
            cycle_interval_secs = self.inner.config.cycle_interval_secs,
            full_retrain_interval_secs = self.inner.config.full_retrain_interval_secs,
            "continuous learning enabled"
        );
    }

    /// Stop scheduling cycles; an in-flight cycle still finishes
    pub fn disable_continuous_learning(&self) {
        if let Some(scheduler) = self.inner.scheduler.lock().take() {
            let _ = scheduler.shutdown.try_send(());
            info!("continuous learning disabled");
        }
    }

    /// Stop scheduling and wait for any in-flight cycle to finish
    pub async fn shutdown(&self) {
        let scheduler = self.inner.scheduler.lock().take();
        if let Some(scheduler) = scheduler {
            let _ = scheduler.shutdown.try_send(());
            if let Err(e) = scheduler.task.await {
                warn!(error = %e, "scheduler task ended abnormally");
            }
            info!("continuous learning stopped");
        }
    }

    pub fn is_continuous_learning_enabled(&self) -> bool {
        self.inner
            .scheduler
            .lock()
            .as_ref()
            .map_or(false, |s| !s.task.is_finished())
    }

    /// Buffer a new sample for continuous learning
    pub fn add_data_point(&self, sample: ProcessedSample) {
        self.inner.controller.add_sample(sample);
    }

    pub fn get_training_status(&self) -> TrainingStatus {
        let run = *self.inner.run.lock();
        let inner = &self.inner;
        TrainingStatus {
            is_training: run.is_training || inner.controller.is_cycle_running(),
            progress: run.progress,
            accuracy: inner.slot.accuracy().unwrap_or(0.0),
            data_point_count: inner.controller.buffered(),
            last_training: inner.controller.last_update(),
            model_version: inner.slot.version().to_string(),
        }
    }
}

impl Inner {
    async fn train_historical(
        &self,
        progress: &dyn ProgressSink,
    ) -> Result<TrainingOutcome, LearnError> {
        let Ok(_gate) = self.training_gate.try_lock() else {
            return Err(LearnError::TrainingInProgress);
        };

        *self.run.lock() = RunState {
            is_training: true,
            progress: 0.0,
        };
        let result = self.run_historical(progress).await;
        *self.run.lock() = RunState {
            is_training: false,
            progress: if result.is_ok() { 1.0 } else { 0.0 },
        };

        match &result {
            Ok(outcome) => info!(
                version = %outcome.model_version,
                accuracy = outcome.accuracy,
                data_points = outcome.data_points,
                "historical training completed"
            ),
            Err(e) => warn!(error = %e, "historical training failed"),
        }
        result
    }

    async fn run_historical(
        &self,
        forward: &dyn ProgressSink,
    ) -> Result<TrainingOutcome, LearnError> {
        let progress = StatusProgress {
            run: &self.run,
            forward,
        };

        progress.report(0.0, "Collecting historical data");
        let to = Utc::now();
        let from = to - self.config.history_window();
        let source = Arc::clone(&self.source);
        let samples = run_blocking(move || source.fetch(from, to)).await??;
        let data_points = samples.len();

        let output = self.pipeline.run(samples, &progress).await?;
        let model = output.training.model.clone().ok_or_else(|| {
            LearnError::ModelUnavailable("pipeline produced no model".to_string())
        })?;

        // Waits out an in-flight learning cycle
        let deployed = self
            .controller
            .install_trained(
                model,
                &output.validation,
                output.training.split_index,
                output.validation_samples(),
            )
            .await;
        if let Err(e) = self.threshold_sink.save(&output.thresholds) {
            warn!(error = %e, "threshold persistence failed");
        }

        progress.report(1.0, "Training complete");
        Ok(TrainingOutcome {
            accuracy: output.validation.accuracy,
            data_points,
            model_version: deployed.version.to_string(),
            thresholds: output.thresholds,
        })
    }
}

/// Mirrors progress into the run state before forwarding it
struct StatusProgress<'a> {
    run: &'a Mutex<RunState>,
    forward: &'a dyn ProgressSink,
}

impl ProgressSink for StatusProgress<'_> {
    fn report(&self, progress: f64, message: &str) {
        self.run.lock().progress = progress;
        self.forward.report(progress, message);
    }
}

/// Timer loop driving learning cycles and full retrains
async fn run_scheduler(
    inner: Weak<Inner>,
    cycle_every: Duration,
    retrain_every: Duration,
    mut shutdown_rx: mpsc::Receiver<()>,
) {
    let mut cycle = interval_at(Instant::now() + cycle_every, cycle_every);
    let mut retrain = interval_at(Instant::now() + retrain_every, retrain_every);
    cycle.set_missed_tick_behavior(MissedTickBehavior::Skip);
    retrain.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            _ = shutdown_rx.recv() => {
                debug!("scheduler shutdown requested");
                break;
            }
            _ = retrain.tick() => {
                let Some(inner) = inner.upgrade() else { break };
                if let Err(e) = inner.train_historical(&TracingProgressSink).await {
                    warn!(error = %e, "scheduled full retrain failed");
                }
            }
            _ = cycle.tick() => {
                let Some(inner) = inner.upgrade() else { break };
                inner.controller.run_cycle().await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::NearestCentroidClassifier;
    use crate::store::{InMemoryModelStore, InMemorySampleSource, InMemoryThresholdSink};
    use crate::synthetic::SyntheticSleepGenerator;
    use crate::types::SleepStage;
    use chrono::Duration as ChronoDuration;
    use pretty_assertions::assert_eq;

    struct Harness {
        service: SleepLearningService,
        store: Arc<InMemoryModelStore>,
        sink: Arc<InMemoryThresholdSink>,
    }

    fn harness(samples: Vec<ProcessedSample>, config: LearningConfig) -> Harness {
        let store = Arc::new(InMemoryModelStore::default());
        let sink = Arc::new(InMemoryThresholdSink::default());
        let service = SleepLearningService::new(
            config,
            Arc::new(NearestCentroidClassifier),
            Arc::new(InMemorySampleSource::new(samples)),
            store.clone(),
            sink.clone(),
        )
        .unwrap();
        Harness {
            service,
            store,
            sink,
        }
    }

    fn recent_nights() -> Vec<ProcessedSample> {
        let first = Utc::now() - ChronoDuration::days(6);
        SyntheticSleepGenerator::new(31).generate_nights(first, 5, 96)
    }

    fn light_samples(count: usize) -> Vec<ProcessedSample> {
        let start = Utc::now() - ChronoDuration::hours(8);
        (0..count)
            .map(|i| ProcessedSample {
                timestamp: start + ChronoDuration::minutes(i as i64),
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

    async fn collect(mut rx: UnboundedReceiver<TrainingEvent>) -> Vec<TrainingEvent> {
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            let terminal = event.is_terminal();
            events.push(event);
            if terminal {
                break;
            }
        }
        events
    }

    #[tokio::test]
    async fn test_historical_training_streams_events() {
        let h = harness(recent_nights(), LearningConfig::default());

        let events = collect(h.service.train_on_historical_data()).await;

        let Some(TrainingEvent::Completed(outcome)) = events.last() else {
            panic!("expected completion, got {:?}", events.last());
        };
        assert_eq!(outcome.data_points, 480);
        assert_eq!(outcome.model_version, "1.0.1");

        let progress: Vec<f64> = events
            .iter()
            .filter_map(|e| match e {
                TrainingEvent::Progress { progress, .. } => Some(*progress),
                _ => None,
            })
            .collect();
        assert_eq!(progress.first(), Some(&0.0));
        assert_eq!(progress.last(), Some(&1.0));
        assert!(progress.windows(2).all(|w| w[0] <= w[1]));

        assert_eq!(h.sink.latest(), Some(outcome.thresholds));
        assert_eq!(h.store.saved().len(), 1);

        let status = h.service.get_training_status();
        assert!(!status.is_training);
        assert_eq!(status.progress, 1.0);
        assert_eq!(status.model_version, "1.0.1");
        assert!(status.last_training.is_some());
        assert_eq!(status.accuracy, outcome.accuracy);
    }

    #[tokio::test]
    async fn test_failed_training_leaves_model_untouched() {
        let h = harness(Vec::new(), LearningConfig::default());

        let events = collect(h.service.train_on_historical_data()).await;

        assert!(matches!(events.last(), Some(TrainingEvent::Failed { .. })));
        assert!(h.service.slot().is_empty());
        assert!(h.sink.latest().is_none());
        let status = h.service.get_training_status();
        assert!(!status.is_training);
        assert_eq!(status.model_version, "1.0.0");
    }

    #[tokio::test]
    async fn test_concurrent_training_rejected() {
        let h = harness(recent_nights(), LearningConfig::default());
        let _gate = h.service.inner.training_gate.lock().await;

        let err = h
            .service
            .train_historical(&TracingProgressSink)
            .await
            .unwrap_err();
        assert!(matches!(err, LearnError::TrainingInProgress));
    }

    #[tokio::test]
    async fn test_add_data_point() {
        let h = harness(Vec::new(), LearningConfig::default());
        for sample in light_samples(3) {
            h.service.add_data_point(sample);
        }
        assert_eq!(h.service.get_training_status().data_point_count, 3);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = LearningConfig {
            folds: 0,
            ..Default::default()
        };
        let result = SleepLearningService::new(
            config,
            Arc::new(NearestCentroidClassifier),
            Arc::new(InMemorySampleSource::default()),
            Arc::new(InMemoryModelStore::default()),
            Arc::new(InMemoryThresholdSink::default()),
        );
        assert!(matches!(result, Err(LearnError::InvalidConfig(_))));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_scheduler_runs_cycles_until_disabled() {
        let config = LearningConfig {
            cycle_interval_secs: 1,
            ..Default::default()
        };
        let h = harness(Vec::new(), config);
        for sample in light_samples(250) {
            h.service.add_data_point(sample);
        }

        h.service.enable_continuous_learning();
        assert!(h.service.is_continuous_learning_enabled());
        tokio::time::sleep(Duration::from_millis(2500)).await;
        h.service.shutdown().await;

        assert!(!h.service.is_continuous_learning_enabled());
        assert!(!h.service.slot().is_empty());
        assert!(!h.store.saved().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_scheduler_runs_full_retrain() {
        let config = LearningConfig {
            full_retrain_interval_secs: 1,
            ..Default::default()
        };
        let h = harness(recent_nights(), config);

        h.service.enable_continuous_learning();
        tokio::time::sleep(Duration::from_millis(2500)).await;
        h.service.shutdown().await;

        // Nothing was buffered, so only the retrain timer can have installed
        assert_eq!(h.service.controller().buffered(), 0);
        assert!(!h.service.slot().is_empty());
        assert!(h.sink.latest().is_some());
        assert!(!h.store.saved().is_empty());
        assert!(!h.service.get_training_status().is_training);
    }

    #[tokio::test]
    async fn test_historical_install_waits_for_cycle() {
        let h = harness(recent_nights(), LearningConfig::default());
        let cycle = h.service.controller().cycle_gate.lock().await;

        let events = h.service.train_on_historical_data();
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(h.service.slot().is_empty());
        drop(cycle);

        let events = collect(events).await;
        assert!(matches!(events.last(), Some(TrainingEvent::Completed(_))));
        assert_eq!(h.service.slot().version().to_string(), "1.0.1");
    }
}
