//! Deployed model slot
//!
//! Exactly one model is active at a time. Readers clone an `Arc` snapshot of
//! it under a read lock and keep using that snapshot even if a commit swaps
//! the slot meanwhile. Installs take the write lock, bump the PATCH version
//! and advance a generation counter.

use crate::model::ModelHandle;
use crate::types::ModelVersion;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::info;

/// An installed model with its deployment metadata
#[derive(Debug, Clone)]
pub struct DeployedModel {
    pub model: ModelHandle,
    pub version: ModelVersion,
    /// Accuracy recorded when the model was committed
    pub accuracy: f64,
    pub deployed_at: DateTime<Utc>,
    /// Number of engineered features the model was trained from
    pub training_samples: usize,
}

#[derive(Debug)]
struct SlotState {
    current: Option<Arc<DeployedModel>>,
    version: ModelVersion,
}

/// Single-writer, many-reader holder of the active model
#[derive(Debug)]
pub struct ModelSlot {
    state: RwLock<SlotState>,
    generation: AtomicU64,
}

impl Default for ModelSlot {
    fn default() -> Self {
        Self::new(ModelVersion::default())
    }
}

impl ModelSlot {
    /// Create an empty slot; the first install is `base` with PATCH bumped
    pub fn new(base: ModelVersion) -> Self {
        Self {
            state: RwLock::new(SlotState {
                current: None,
                version: base,
            }),
            generation: AtomicU64::new(0),
        }
    }

    /// Snapshot of the active model
    pub fn current(&self) -> Option<Arc<DeployedModel>> {
        self.state.read().current.clone()
    }

    pub fn is_empty(&self) -> bool {
        self.state.read().current.is_none()
    }

    /// Version of the active model, or the base version when empty
    pub fn version(&self) -> ModelVersion {
        self.state.read().version
    }

    /// Accuracy recorded for the active model
    pub fn accuracy(&self) -> Option<f64> {
        self.state.read().current.as_ref().map(|d| d.accuracy)
    }

    /// Number of installs so far
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Atomically replace the active model
    pub fn install(
        &self,
        model: ModelHandle,
        accuracy: f64,
        training_samples: usize,
    ) -> Arc<DeployedModel> {
        let mut state = self.state.write();
        let version = state.version.bump_patch();
        let deployed = Arc::new(DeployedModel {
            model,
            version,
            accuracy,
            deployed_at: Utc::now(),
            training_samples,
        });
        state.current = Some(Arc::clone(&deployed));
        state.version = version;
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        drop(state);

        info!(
            version = %version,
            accuracy,
            generation,
            "installed model"
        );
        deployed
    }
}
