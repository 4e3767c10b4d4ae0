//! Alignment of raw signal readings into processed samples
//!
//! Health stores deliver one reading per signal at irregular times. The
//! aligner groups readings into fixed-width time buckets and fuses each bucket
//! into a [`ProcessedSample`]:
//!
//! - signal values are averaged within a bucket
//! - a signal missing from a bucket carries its last value forward
//! - leading gaps are back-filled from the signal's first reading
//! - the stage is the last label in the bucket, carried forward when absent
//!   and `Unknown` until the first label
//!
//! Buckets without any reading are skipped, so gaps between nights survive
//! alignment.

use crate::error::LearnError;
use crate::store::SampleSource;
use crate::types::{ProcessedSample, RawSample, SignalKind, SleepStage};
use chrono::{DateTime, Duration, TimeZone, Utc};
use std::collections::BTreeMap;
use tracing::debug;

/// Default bucket width in seconds
pub const DEFAULT_BUCKET_SECONDS: i64 = 300;

const NUMERIC_SIGNALS: [SignalKind; 6] = [
    SignalKind::HeartRate,
    SignalKind::Hrv,
    SignalKind::RespiratoryRate,
    SignalKind::BloodOxygen,
    SignalKind::Temperature,
    SignalKind::Movement,
];

/// Problem found in one raw sample
#[derive(Debug, Clone, PartialEq)]
pub struct SampleIssue {
    pub index: usize,
    pub kind: SignalKind,
    pub reason: String,
}

/// Converts raw readings into bucketed processed samples
#[derive(Debug, Clone, Copy)]
pub struct SampleAligner {
    bucket_seconds: i64,
}

impl Default for SampleAligner {
    fn default() -> Self {
        Self::new(Duration::seconds(DEFAULT_BUCKET_SECONDS))
    }
}

impl SampleAligner {
    /// Create an aligner with the given bucket width (at least one second)
    pub fn new(bucket: Duration) -> Self {
        Self {
            bucket_seconds: bucket.num_seconds().max(1),
        }
    }

    pub fn bucket(&self) -> Duration {
        Duration::seconds(self.bucket_seconds)
    }

    /// Parse NDJSON (newline-delimited JSON) containing raw samples
    pub fn parse_ndjson(ndjson: &str) -> Result<Vec<RawSample>, LearnError> {
        let mut samples = Vec::new();
        for (line_num, line) in ndjson.lines().enumerate() {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            match serde_json::from_str::<RawSample>(trimmed) {
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

    /// Report every sample whose value is outside its signal's domain
    pub fn validate_samples(samples: &[RawSample]) -> Vec<SampleIssue> {
        samples
            .iter()
            .enumerate()
            .filter_map(|(index, sample)| {
                validate_value(sample).err().map(|reason| SampleIssue {
                    index,
                    kind: sample.kind,
                    reason,
                })
            })
            .collect()
    }

    /// Fuse raw readings into one processed sample per non-empty bucket
    pub fn align(&self, samples: &[RawSample]) -> Result<Vec<ProcessedSample>, LearnError> {
        if samples.is_empty() {
            return Ok(Vec::new());
        }
        if let Some(issue) = Self::validate_samples(samples).into_iter().next() {
            return Err(LearnError::ParseError(format!(
                "Invalid sample at index {} ({}): {}",
                issue.index,
                issue.kind.as_str(),
                issue.reason
            )));
        }

        let mut ordered: Vec<&RawSample> = samples.iter().collect();
        ordered.sort_by_key(|s| s.timestamp);

        let mut buckets: BTreeMap<i64, BucketAccumulator> = BTreeMap::new();
        for sample in ordered {
            let key = sample.timestamp.timestamp().div_euclid(self.bucket_seconds);
            buckets.entry(key).or_default().add(sample);
        }

        // Back-fill value for each signal: its first reading in time order
        let mut first_seen = [None; NUMERIC_SIGNALS.len()];
        for bucket in buckets.values() {
            for (slot, mean) in first_seen.iter_mut().zip(bucket.means()) {
                if slot.is_none() {
                    *slot = mean;
                }
            }
        }
        let mut carried = [0.0; NUMERIC_SIGNALS.len()];
        for (i, (kind, first)) in NUMERIC_SIGNALS.iter().zip(first_seen).enumerate() {
            carried[i] = first.ok_or_else(|| {
                LearnError::InsufficientData(format!("no {} readings to align", kind.as_str()))
            })?;
        }

        let mut stage = SleepStage::Unknown;
        let mut aligned = Vec::with_capacity(buckets.len());
        for (key, bucket) in &buckets {
            for (value, mean) in carried.iter_mut().zip(bucket.means()) {
                if let Some(mean) = mean {
                    *value = mean;
                }
            }
            if let Some(last) = bucket.last_stage {
                stage = last;
            }

            aligned.push(ProcessedSample {
                timestamp: self.bucket_start(*key)?,
                heart_rate: carried[0],
                hrv: carried[1],
                respiratory_rate: carried[2],
                blood_oxygen: carried[3],
                temperature: carried[4],
                movement: carried[5],
                actual_stage: stage,
            });
        }

        debug!(
            readings = samples.len(),
            buckets = aligned.len(),
            bucket_seconds = self.bucket_seconds,
            "aligned raw samples"
        );
        Ok(aligned)
    }

    fn bucket_start(&self, key: i64) -> Result<DateTime<Utc>, LearnError> {
        Utc.timestamp_opt(key * self.bucket_seconds, 0)
            .single()
            .ok_or_else(|| LearnError::ParseError(format!("bucket {} is out of range", key)))
    }
}

/// Explode processed samples into one raw reading per signal, stage included
pub fn to_raw_samples(samples: &[ProcessedSample]) -> Vec<RawSample> {
    samples
        .iter()
        .flat_map(|s| {
            [
                RawSample::new(s.timestamp, SignalKind::HeartRate, s.heart_rate),
                RawSample::new(s.timestamp, SignalKind::Hrv, s.hrv),
                RawSample::new(s.timestamp, SignalKind::RespiratoryRate, s.respiratory_rate),
                RawSample::new(s.timestamp, SignalKind::BloodOxygen, s.blood_oxygen),
                RawSample::new(s.timestamp, SignalKind::Temperature, s.temperature),
                RawSample::new(s.timestamp, SignalKind::Movement, s.movement),
                RawSample::new(
                    s.timestamp,
                    SignalKind::SleepStage,
                    s.actual_stage.label() as f64,
                ),
            ]
        })
        .collect()
}

fn validate_value(sample: &RawSample) -> Result<(), String> {
    let value = sample.value;
    if !value.is_finite() {
        return Err("value must be finite".to_string());
    }
    match sample.kind {
        SignalKind::HeartRate | SignalKind::RespiratoryRate if value <= 0.0 => {
            Err("must be positive".to_string())
        }
        SignalKind::Hrv | SignalKind::Movement if value < 0.0 => {
            Err("must be non-negative".to_string())
        }
        SignalKind::BloodOxygen if !(0.0..=100.0).contains(&value) => {
            Err("must be a percentage".to_string())
        }
        SignalKind::SleepStage if SleepStage::from_value(value) == SleepStage::Unknown => {
            Err(format!("unknown stage label {}", value))
        }
        _ => Ok(()),
    }
}

/// Readings collected for one bucket
#[derive(Default)]
struct BucketAccumulator {
    sums: [f64; NUMERIC_SIGNALS.len()],
    counts: [usize; NUMERIC_SIGNALS.len()],
    last_stage: Option<SleepStage>,
}

impl BucketAccumulator {
    fn add(&mut self, sample: &RawSample) {
        if sample.kind == SignalKind::SleepStage {
            self.last_stage = Some(SleepStage::from_value(sample.value));
            return;
        }
        if let Some(i) = NUMERIC_SIGNALS.iter().position(|k| *k == sample.kind) {
            self.sums[i] += sample.value;
            self.counts[i] += 1;
        }
    }

    fn means(&self) -> [Option<f64>; NUMERIC_SIGNALS.len()] {
        let mut means = [None; NUMERIC_SIGNALS.len()];
        for (i, mean) in means.iter_mut().enumerate() {
            if self.counts[i] > 0 {
                *mean = Some(self.sums[i] / self.counts[i] as f64);
            }
        }
        means
    }
}

/// Source of raw readings for a time range
pub trait RawSampleSource: Send + Sync {
    fn fetch_raw(&self, from: DateTime<Utc>, to: DateTime<Utc>)
        -> Result<Vec<RawSample>, LearnError>;
}

/// Raw source backed by a vector
#[derive(Debug, Default, Clone)]
pub struct InMemoryRawSource {
    samples: Vec<RawSample>,
}

impl InMemoryRawSource {
    pub fn new(samples: Vec<RawSample>) -> Self {
        Self { samples }
    }
}

impl RawSampleSource for InMemoryRawSource {
    fn fetch_raw(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<RawSample>, LearnError> {
        Ok(self
            .samples
            .iter()
            .filter(|s| s.timestamp >= from && s.timestamp < to)
            .copied()
            .collect())
    }
}

/// [`SampleSource`] that aligns a raw source on every fetch
pub struct AlignedSampleSource<R> {
    raw: R,
    aligner: SampleAligner,
}

impl<R: RawSampleSource> AlignedSampleSource<R> {
    pub fn new(raw: R, aligner: SampleAligner) -> Self {
        Self { raw, aligner }
    }
}

impl<R: RawSampleSource> SampleSource for AlignedSampleSource<R> {
    fn fetch(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<ProcessedSample>, LearnError> {
        let raw = self.raw.fetch_raw(from, to)?;
        self.aligner.align(&raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synthetic::SyntheticSleepGenerator;
    use pretty_assertions::assert_eq;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, 23, 0, 0).unwrap()
    }

    fn at(minute: i64, kind: SignalKind, value: f64) -> RawSample {
        RawSample::new(start() + Duration::minutes(minute), kind, value)
    }

    fn full_reading(minute: i64, heart_rate: f64) -> Vec<RawSample> {
        vec![
            at(minute, SignalKind::HeartRate, heart_rate),
            at(minute, SignalKind::Hrv, 40.0),
            at(minute, SignalKind::RespiratoryRate, 14.0),
            at(minute, SignalKind::BloodOxygen, 97.0),
            at(minute, SignalKind::Temperature, 36.5),
            at(minute, SignalKind::Movement, 0.2),
        ]
    }

    #[test]
    fn test_bucket_mean() {
        let mut raw = full_reading(0, 60.0);
        raw.push(at(2, SignalKind::HeartRate, 64.0));
        raw.push(at(1, SignalKind::SleepStage, 1.0));

        let aligned = SampleAligner::default().align(&raw).unwrap();
        assert_eq!(aligned.len(), 1);
        assert_eq!(aligned[0].heart_rate, 62.0);
        assert_eq!(aligned[0].actual_stage, SleepStage::Light);
        assert_eq!(aligned[0].timestamp, start());
    }

    #[test]
    fn test_carry_forward_and_back_fill() {
        let mut raw = vec![
            // Heart rate only appears in the second bucket
            at(0, SignalKind::Hrv, 40.0),
            at(0, SignalKind::RespiratoryRate, 14.0),
            at(0, SignalKind::BloodOxygen, 97.0),
            at(0, SignalKind::Temperature, 36.5),
            at(0, SignalKind::Movement, 0.2),
            at(0, SignalKind::SleepStage, 0.0),
        ];
        raw.push(at(5, SignalKind::HeartRate, 58.0));
        raw.push(at(10, SignalKind::Hrv, 48.0));
        raw.push(at(10, SignalKind::SleepStage, 2.0));

        let aligned = SampleAligner::default().align(&raw).unwrap();
        assert_eq!(aligned.len(), 3);
        // Back-filled from the first heart-rate reading
        assert_eq!(aligned[0].heart_rate, 58.0);
        // HRV carried forward into the second bucket
        assert_eq!(aligned[1].hrv, 40.0);
        assert_eq!(aligned[1].actual_stage, SleepStage::Awake);
        assert_eq!(aligned[2].hrv, 48.0);
        assert_eq!(aligned[2].heart_rate, 58.0);
        assert_eq!(aligned[2].actual_stage, SleepStage::Deep);
    }

    #[test]
    fn test_stage_unknown_until_first_label() {
        let mut raw = full_reading(0, 60.0);
        raw.extend(full_reading(5, 61.0));
        raw.push(at(5, SignalKind::SleepStage, 3.0));

        let aligned = SampleAligner::default().align(&raw).unwrap();
        assert_eq!(aligned[0].actual_stage, SleepStage::Unknown);
        assert_eq!(aligned[1].actual_stage, SleepStage::Rem);
    }

    #[test]
    fn test_missing_signal_fails() {
        let raw = vec![at(0, SignalKind::HeartRate, 60.0)];
        let err = SampleAligner::default().align(&raw).unwrap_err();
        assert!(matches!(err, LearnError::InsufficientData(_)));
    }

    #[test]
    fn test_invalid_values_reported() {
        let raw = vec![
            at(0, SignalKind::HeartRate, f64::NAN),
            at(0, SignalKind::BloodOxygen, 140.0),
            at(0, SignalKind::SleepStage, 7.0),
            at(0, SignalKind::Movement, 0.5),
        ];
        let issues = SampleAligner::validate_samples(&raw);
        let indices: Vec<usize> = issues.iter().map(|i| i.index).collect();
        assert_eq!(indices, vec![0, 1, 2]);

        assert!(matches!(
            SampleAligner::default().align(&raw),
            Err(LearnError::ParseError(_))
        ));
    }

    #[test]
    fn test_explode_then_align_restores_samples() {
        let night = SyntheticSleepGenerator::new(9).generate_night(start(), 24);
        let aligned = SampleAligner::default()
            .align(&to_raw_samples(&night))
            .unwrap();
        assert_eq!(aligned, night);
    }

    #[test]
    fn test_gap_buckets_are_skipped() {
        let mut raw = full_reading(0, 60.0);
        raw.extend(full_reading(600, 62.0));
        let aligned = SampleAligner::default().align(&raw).unwrap();
        assert_eq!(aligned.len(), 2);
        assert_eq!(aligned[1].timestamp - aligned[0].timestamp, Duration::hours(10));
    }

    #[test]
    fn test_parse_ndjson() {
        let line = serde_json::to_string(&at(0, SignalKind::HeartRate, 60.0)).unwrap();
        let parsed = SampleAligner::parse_ndjson(&format!("{}\n\n{}\n", line, line)).unwrap();
        assert_eq!(parsed.len(), 2);

        let err = SampleAligner::parse_ndjson(&format!("{}\nnope\n", line)).unwrap_err();
        assert!(err.to_string().contains("line 2"));
    }

    #[test]
    fn test_aligned_source() {
        let night = SyntheticSleepGenerator::new(4).generate_night(start(), 12);
        let source = AlignedSampleSource::new(
            InMemoryRawSource::new(to_raw_samples(&night)),
            SampleAligner::default(),
        );
        let fetched = source
            .fetch(start(), start() + Duration::minutes(30))
            .unwrap();
        assert_eq!(fetched, night[..6].to_vec());
    }
}
