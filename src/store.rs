//! Collaborator interfaces and their stock implementations
//!
//! The learning engine never touches sensors or disks directly. It reads
//! samples from a [`SampleSource`], persists accepted models through a
//! [`ModelStore`], hands thresholds to a [`ThresholdSink`] and reports progress
//! to a [`ProgressSink`]. In-memory, file-backed and `tracing` implementations
//! are provided.

use crate::deployed::DeployedModel;
use crate::error::LearnError;
use crate::metadata::ModelMetadata;
use crate::types::{ModelVersion, PersonalizedThresholds, ProcessedSample, TrainingEvent};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use std::path::{Path, PathBuf};
use tokio::sync::mpsc::UnboundedSender;
use tracing::info;

/// Read-only, time-ordered sample history
pub trait SampleSource: Send + Sync {
    /// Samples with `from <= timestamp < to`, ordered by timestamp
    fn fetch(&self, from: DateTime<Utc>, to: DateTime<Utc>)
        -> Result<Vec<ProcessedSample>, LearnError>;
}

/// Persistence for committed models
pub trait ModelStore: Send + Sync {
    /// Persist a model and its metadata, returning where it was written
    fn save(&self, deployed: &DeployedModel, metadata: &ModelMetadata)
        -> Result<String, LearnError>;
}

/// Consumer of freshly computed thresholds
pub trait ThresholdSink: Send + Sync {
    fn save(&self, thresholds: &PersonalizedThresholds) -> Result<(), LearnError>;
}

/// Observer of training progress (0-1 plus a message)
pub trait ProgressSink: Send + Sync {
    fn report(&self, progress: f64, message: &str);
}

// Sample sources

/// Sample source backed by a vector
#[derive(Debug, Default)]
pub struct InMemorySampleSource {
    samples: RwLock<Vec<ProcessedSample>>,
}

impl InMemorySampleSource {
    pub fn new(mut samples: Vec<ProcessedSample>) -> Self {
        samples.sort_by_key(|s| s.timestamp);
        Self {
            samples: RwLock::new(samples),
        }
    }

    pub fn push(&self, sample: ProcessedSample) {
        let mut samples = self.samples.write();
        let index = samples.partition_point(|s| s.timestamp <= sample.timestamp);
        samples.insert(index, sample);
    }

    pub fn len(&self) -> usize {
        self.samples.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.read().is_empty()
    }
}

impl SampleSource for InMemorySampleSource {
    fn fetch(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<ProcessedSample>, LearnError> {
        Ok(self
            .samples
            .read()
            .iter()
            .filter(|s| s.timestamp >= from && s.timestamp < to)
            .copied()
            .collect())
    }
}

/// Sample source reading a newline-delimited JSON file of processed samples
#[derive(Debug, Clone)]
pub struct NdjsonSampleSource {
    path: PathBuf,
}

impl NdjsonSampleSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl SampleSource for NdjsonSampleSource {
    fn fetch(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<ProcessedSample>, LearnError> {
        let contents = std::fs::read_to_string(&self.path).map_err(|e| {
            LearnError::Source(format!("cannot read {}: {}", self.path.display(), e))
        })?;
        let mut samples: Vec<ProcessedSample> = parse_processed_ndjson(&contents)?
            .into_iter()
            .filter(|s| s.timestamp >= from && s.timestamp < to)
            .collect();
        samples.sort_by_key(|s| s.timestamp);
        Ok(samples)
    }
}

/// Parse NDJSON containing processed samples
pub fn parse_processed_ndjson(ndjson: &str) -> Result<Vec<ProcessedSample>, LearnError> {
    let mut samples = Vec::new();
    for (line_num, line) in ndjson.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        match serde_json::from_str::<ProcessedSample>(trimmed) {
            Ok(sample) => samples.push(sample),
            Err(e) => {
                return Err(LearnError::ParseError(format!(
                    "Failed to parse line {}: {}",
                    line_num + 1,
                    e
                )));
            }
        }
    }
    Ok(samples)
}

/// Serialize samples as NDJSON, one sample per line
pub fn to_ndjson<T: serde::Serialize>(items: &[T]) -> Result<String, LearnError> {
    let mut out = String::new();
    for item in items {
        out.push_str(&serde_json::to_string(item)?);
        out.push('\n');
    }
    Ok(out)
}

// Model stores

/// Record of one in-memory save
#[derive(Debug, Clone)]
pub struct SavedModel {
    pub version: ModelVersion,
    pub parameters: serde_json::Value,
    pub metadata: ModelMetadata,
}

/// Model store that keeps every saved model in memory
#[derive(Debug, Default)]
pub struct InMemoryModelStore {
    saved: Mutex<Vec<SavedModel>>,
}

impl InMemoryModelStore {
    pub fn saved(&self) -> Vec<SavedModel> {
        self.saved.lock().clone()
    }

    pub fn latest(&self) -> Option<SavedModel> {
        self.saved.lock().last().cloned()
    }
}

impl ModelStore for InMemoryModelStore {
    fn save(
        &self,
        deployed: &DeployedModel,
        metadata: &ModelMetadata,
    ) -> Result<String, LearnError> {
        let parameters = deployed.model.export()?;
        self.saved.lock().push(SavedModel {
            version: deployed.version,
            parameters,
            metadata: metadata.clone(),
        });
        Ok(format!("memory://models/{}", deployed.version))
    }
}

/// Model store writing `<dir>/sleep_stage_model_v<version>.json` plus a
/// `_metadata.json` sibling
#[derive(Debug, Clone)]
pub struct FileModelStore {
    dir: PathBuf,
}

impl FileModelStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn model_path(&self, version: ModelVersion) -> PathBuf {
        self.dir
            .join(format!("sleep_stage_model_v{}.json", version))
    }

    pub fn metadata_path(&self, version: ModelVersion) -> PathBuf {
        self.dir
            .join(format!("sleep_stage_model_v{}_metadata.json", version))
    }
}

impl ModelStore for FileModelStore {
    fn save(
        &self,
        deployed: &DeployedModel,
        metadata: &ModelMetadata,
    ) -> Result<String, LearnError> {
        let persist = |path: &Path, json: String| {
            std::fs::write(path, json).map_err(|e| {
                LearnError::Persistence(format!("cannot write {}: {}", path.display(), e))
            })
        };

        std::fs::create_dir_all(&self.dir).map_err(|e| {
            LearnError::Persistence(format!("cannot create {}: {}", self.dir.display(), e))
        })?;

        let model_path = self.model_path(deployed.version);
        let parameters = deployed.model.export()?;
        persist(&model_path, serde_json::to_string_pretty(&parameters)?)?;
        persist(
            &self.metadata_path(deployed.version),
            serde_json::to_string_pretty(metadata)?,
        )?;

        Ok(model_path.display().to_string())
    }
}

// Threshold sinks

/// Threshold sink that keeps the most recent thresholds
#[derive(Debug, Default)]
pub struct InMemoryThresholdSink {
    latest: Mutex<Option<PersonalizedThresholds>>,
}

impl InMemoryThresholdSink {
    pub fn latest(&self) -> Option<PersonalizedThresholds> {
        *self.latest.lock()
    }
}

impl ThresholdSink for InMemoryThresholdSink {
    fn save(&self, thresholds: &PersonalizedThresholds) -> Result<(), LearnError> {
        *self.latest.lock() = Some(*thresholds);
        Ok(())
    }
}

/// Threshold sink writing pretty JSON to a file
#[derive(Debug, Clone)]
pub struct FileThresholdSink {
    path: PathBuf,
}

impl FileThresholdSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl ThresholdSink for FileThresholdSink {
    fn save(&self, thresholds: &PersonalizedThresholds) -> Result<(), LearnError> {
        let json = serde_json::to_string_pretty(thresholds)?;
        std::fs::write(&self.path, json).map_err(|e| {
            LearnError::Persistence(format!("cannot write {}: {}", self.path.display(), e))
        })
    }
}

// Progress sinks

/// Progress sink that logs through `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingProgressSink;

impl ProgressSink for TracingProgressSink {
    fn report(&self, progress: f64, message: &str) {
        info!(progress, step = message, "training progress");
    }
}

/// Progress sink forwarding progress as [`TrainingEvent::Progress`] events
#[derive(Debug, Clone)]
pub struct ChannelProgressSink {
    tx: UnboundedSender<TrainingEvent>,
}

impl ChannelProgressSink {
    pub fn new(tx: UnboundedSender<TrainingEvent>) -> Self {
        Self { tx }
    }
}

impl ProgressSink for ChannelProgressSink {
    fn report(&self, progress: f64, message: &str) {
        // A dropped receiver only means nobody is listening
        let _ = self.tx.send(TrainingEvent::Progress {
            progress,
            message: message.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deployed::ModelSlot;
    use crate::metadata::MetadataEncoder;
    use crate::model::test_support::ConstantModel;
    use crate::synthetic::SyntheticSleepGenerator;
    use crate::types::ValidationResult;
    use chrono::{Duration, TimeZone};
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, 23, 0, 0).unwrap()
    }

    fn temp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("somna-{}-{}", name, uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_in_memory_source_range() {
        let night = SyntheticSleepGenerator::new(1).generate_night(start(), 12);
        let source = InMemorySampleSource::new(night.clone());

        let fetched = source
            .fetch(start() + Duration::minutes(10), start() + Duration::minutes(30))
            .unwrap();
        // Samples at 10, 15, 20 and 25 minutes
        assert_eq!(fetched, night[2..6].to_vec());
    }

    #[test]
    fn test_in_memory_source_push_keeps_order() {
        let night = SyntheticSleepGenerator::new(2).generate_night(start(), 4);
        let source = InMemorySampleSource::new(vec![night[0], night[2]]);
        source.push(night[3]);
        source.push(night[1]);

        let all = source
            .fetch(start(), start() + Duration::days(1))
            .unwrap();
        assert_eq!(all, night);
    }

    #[test]
    fn test_ndjson_source_roundtrip() {
        let dir = temp_dir("source");
        let path = dir.join("samples.ndjson");
        let night = SyntheticSleepGenerator::new(3).generate_night(start(), 10);
        std::fs::write(&path, to_ndjson(&night).unwrap()).unwrap();

        let fetched = NdjsonSampleSource::new(&path)
            .fetch(start(), start() + Duration::days(1))
            .unwrap();
        assert_eq!(fetched.len(), 10);
        assert_eq!(fetched[0].timestamp, night[0].timestamp);

        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn test_parse_ndjson_reports_line() {
        let err = parse_processed_ndjson("\n{bad json}\n").unwrap_err();
        match err {
            LearnError::ParseError(message) => assert!(message.contains("line 2")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_missing_file_is_source_error() {
        let err = NdjsonSampleSource::new("/nonexistent/somna/samples.ndjson")
            .fetch(start(), start())
            .unwrap_err();
        assert!(matches!(err, LearnError::Source(_)));
    }

    #[test]
    fn test_file_model_store_writes_both_files() {
        let dir = temp_dir("models");
        let slot = ModelSlot::default();
        let deployed = slot.install(Arc::new(ConstantModel(2)), 0.9, 50);
        let metadata = MetadataEncoder::new().encode(&deployed, &ValidationResult::default(), 10);

        let store = FileModelStore::new(&dir);
        let location = store.save(&deployed, &metadata).unwrap();

        assert!(location.ends_with("sleep_stage_model_v1.0.1.json"));
        let parameters: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&location).unwrap()).unwrap();
        assert_eq!(parameters["label"], 2);
        assert!(store.metadata_path(deployed.version).exists());

        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn test_in_memory_stores() {
        let slot = ModelSlot::default();
        let deployed = slot.install(Arc::new(ConstantModel(1)), 0.9, 50);
        let metadata = MetadataEncoder::new().encode(&deployed, &ValidationResult::default(), 10);

        let store = InMemoryModelStore::default();
        assert_eq!(store.save(&deployed, &metadata).unwrap(), "memory://models/1.0.1");
        assert_eq!(store.latest().map(|s| s.version), Some(deployed.version));

        let sink = InMemoryThresholdSink::default();
        sink.save(&PersonalizedThresholds::default()).unwrap();
        assert_eq!(sink.latest(), Some(PersonalizedThresholds::default()));
    }

    #[test]
    fn test_channel_progress_sink() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let sink = ChannelProgressSink::new(tx);
        sink.report(0.25, "Engineering features");

        assert_eq!(
            rx.try_recv().unwrap(),
            TrainingEvent::Progress {
                progress: 0.25,
                message: "Engineering features".to_string()
            }
        );
    }
}
