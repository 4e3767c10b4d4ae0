//! Synthetic sleep data
//!
//! Deterministic (seeded) generator of realistic nights for tests, demos and
//! bootstrapping a model before any personal history exists. A night is split
//! into four phases by hours since sleep onset, each with its own stage
//! distribution and physiological ranges:
//!
//! | hours | stages (probability)                   | HR mean | HRV mean |
//! |-------|----------------------------------------|---------|----------|
//! | 0-1   | awake .3, light .7                     | 65      | 35       |
//! | 1-3   | light .4, deep .6                      | 55      | 45       |
//! | 3-5   | light .3, REM .7                       | 60      | 40       |
//! | 5+    | awake .2, light .4, deep .2, REM .2    | 62      | 38       |

use crate::types::{ProcessedSample, SleepStage};
use chrono::{DateTime, Duration, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Exp1, StandardNormal};

/// Default spacing between generated samples
pub const DEFAULT_EPOCH_MINUTES: i64 = 5;

/// Mean and standard deviation of a normally distributed signal
#[derive(Debug, Clone, Copy)]
struct Gaussian {
    mean: f64,
    std: f64,
}

const fn gaussian(mean: f64, std: f64) -> Gaussian {
    Gaussian { mean, std }
}

/// Distribution parameters for one phase of the night
#[derive(Debug, Clone, Copy)]
struct Phase {
    /// Phase applies while hours since onset is below this bound
    until_hours: f64,
    stages: &'static [(SleepStage, f64)],
    heart_rate: Gaussian,
    hrv: Gaussian,
    /// Mean of the exponential movement distribution
    movement_mean: f64,
    blood_oxygen: Gaussian,
    temperature: Gaussian,
    breathing_rate: Gaussian,
}

const PHASES: [Phase; 4] = [
    Phase {
        until_hours: 1.0,
        stages: &[(SleepStage::Awake, 0.3), (SleepStage::Light, 0.7)],
        heart_rate: gaussian(65.0, 8.0),
        hrv: gaussian(35.0, 10.0),
        movement_mean: 0.3,
        blood_oxygen: gaussian(96.0, 1.5),
        temperature: gaussian(36.8, 0.3),
        breathing_rate: gaussian(14.0, 2.0),
    },
    Phase {
        until_hours: 3.0,
        stages: &[(SleepStage::Light, 0.4), (SleepStage::Deep, 0.6)],
        heart_rate: gaussian(55.0, 6.0),
        hrv: gaussian(45.0, 8.0),
        movement_mean: 0.1,
        blood_oxygen: gaussian(97.0, 1.0),
        temperature: gaussian(36.5, 0.2),
        breathing_rate: gaussian(12.0, 1.5),
    },
    Phase {
        until_hours: 5.0,
        stages: &[(SleepStage::Light, 0.3), (SleepStage::Rem, 0.7)],
        heart_rate: gaussian(60.0, 10.0),
        hrv: gaussian(40.0, 12.0),
        movement_mean: 0.2,
        blood_oxygen: gaussian(96.5, 1.2),
        temperature: gaussian(36.7, 0.4),
        breathing_rate: gaussian(16.0, 3.0),
    },
    Phase {
        until_hours: f64::INFINITY,
        stages: &[
            (SleepStage::Awake, 0.2),
            (SleepStage::Light, 0.4),
            (SleepStage::Deep, 0.2),
            (SleepStage::Rem, 0.2),
        ],
        heart_rate: gaussian(62.0, 9.0),
        hrv: gaussian(38.0, 11.0),
        movement_mean: 0.25,
        blood_oxygen: gaussian(96.8, 1.3),
        temperature: gaussian(36.6, 0.3),
        breathing_rate: gaussian(15.0, 2.5),
    },
];

/// Seeded generator of synthetic nights
pub struct SyntheticSleepGenerator {
    rng: StdRng,
    epoch: Duration,
}

impl SyntheticSleepGenerator {
    /// Create a generator with the default 5 minute epoch
    pub fn new(seed: u64) -> Self {
        Self::with_epoch(seed, Duration::minutes(DEFAULT_EPOCH_MINUTES))
    }

    /// Create a generator with a custom spacing between samples
    pub fn with_epoch(seed: u64, epoch: Duration) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            epoch,
        }
    }

    /// Generate one night of `epochs` ordered samples starting at `start`
    pub fn generate_night(&mut self, start: DateTime<Utc>, epochs: usize) -> Vec<ProcessedSample> {
        (0..epochs)
            .map(|i| {
                let offset = self.epoch * i as i32;
                let hours = offset.num_seconds() as f64 / 3600.0;
                self.sample_at(start + offset, hours)
            })
            .collect()
    }

    /// Generate `nights` consecutive nights, one day apart
    pub fn generate_nights(
        &mut self,
        first_start: DateTime<Utc>,
        nights: usize,
        epochs_per_night: usize,
    ) -> Vec<ProcessedSample> {
        (0..nights)
            .flat_map(|night| {
                self.generate_night(first_start + Duration::days(night as i64), epochs_per_night)
            })
            .collect()
    }

    fn sample_at(&mut self, timestamp: DateTime<Utc>, hours: f64) -> ProcessedSample {
        let phase = PHASES
            .iter()
            .find(|p| hours < p.until_hours)
            .unwrap_or(&PHASES[PHASES.len() - 1]);

        let stage = self.pick_stage(phase.stages);
        let heart_rate = self.normal(phase.heart_rate) + self.noise(3.0);
        let hrv = self.normal(phase.hrv) + self.noise(5.0);
        let movement = self.exponential(phase.movement_mean) + self.noise(0.1);
        let blood_oxygen = self.normal(phase.blood_oxygen) + self.noise(0.5);
        let temperature = self.normal(phase.temperature) + self.noise(0.1);
        let breathing_rate = self.normal(phase.breathing_rate) + self.noise(1.0);

        ProcessedSample {
            timestamp,
            heart_rate: heart_rate.clamp(40.0, 100.0),
            hrv: hrv.clamp(10.0, 80.0),
            respiratory_rate: breathing_rate.clamp(8.0, 25.0),
            blood_oxygen: blood_oxygen.clamp(90.0, 100.0),
            temperature: temperature.clamp(35.5, 37.5),
            movement: movement.clamp(0.0, 1.0),
            actual_stage: stage,
        }
    }

    fn pick_stage(&mut self, stages: &[(SleepStage, f64)]) -> SleepStage {
        let roll: f64 = self.rng.gen();
        let mut cumulative = 0.0;
        for &(stage, probability) in stages {
            cumulative += probability;
            if roll < cumulative {
                return stage;
            }
        }
        stages
            .last()
            .map(|&(stage, _)| stage)
            .unwrap_or(SleepStage::Unknown)
    }

    fn normal(&mut self, g: Gaussian) -> f64 {
        let z: f64 = self.rng.sample(StandardNormal);
        g.mean + g.std * z
    }

    fn noise(&mut self, std: f64) -> f64 {
        self.normal(gaussian(0.0, std))
    }

    fn exponential(&mut self, mean: f64) -> f64 {
        let e: f64 = self.rng.sample(Exp1);
        e * mean
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, 23, 0, 0).unwrap()
    }

    #[test]
    fn test_same_seed_same_night() {
        let a = SyntheticSleepGenerator::new(42).generate_night(start(), 96);
        let b = SyntheticSleepGenerator::new(42).generate_night(start(), 96);
        assert_eq!(a, b);

        let c = SyntheticSleepGenerator::new(43).generate_night(start(), 96);
        assert_ne!(a, c);
    }

    #[test]
    fn test_samples_are_ordered_and_clamped() {
        let night = SyntheticSleepGenerator::new(1).generate_night(start(), 96);
        assert_eq!(night.len(), 96);
        assert_eq!(night[1].timestamp - night[0].timestamp, Duration::minutes(5));

        for pair in night.windows(2) {
            assert!(pair[0].timestamp < pair[1].timestamp);
        }
        for sample in &night {
            assert!((40.0..=100.0).contains(&sample.heart_rate));
            assert!((10.0..=80.0).contains(&sample.hrv));
            assert!((0.0..=1.0).contains(&sample.movement));
            assert!((90.0..=100.0).contains(&sample.blood_oxygen));
            assert!((35.5..=37.5).contains(&sample.temperature));
            assert!((8.0..=25.0).contains(&sample.respiratory_rate));
            assert_ne!(sample.actual_stage, SleepStage::Unknown);
        }
    }

    #[test]
    fn test_phase_stages() {
        let night = SyntheticSleepGenerator::new(3).generate_night(start(), 96);
        // Hours 1-3 only produce light or deep sleep
        for sample in &night[12..36] {
            assert!(matches!(
                sample.actual_stage,
                SleepStage::Light | SleepStage::Deep
            ));
        }
        // Hours 3-5 only produce light or REM sleep
        for sample in &night[36..60] {
            assert!(matches!(
                sample.actual_stage,
                SleepStage::Light | SleepStage::Rem
            ));
        }
    }

    #[test]
    fn test_generate_nights_spacing() {
        let nights = SyntheticSleepGenerator::new(5).generate_nights(start(), 3, 10);
        assert_eq!(nights.len(), 30);
        assert_eq!(nights[10].timestamp - nights[0].timestamp, Duration::days(1));
    }
}
