//! Run registry: single-flight locking per feature key.
//!
//! At most one non-terminal run may exist per feature key. `acquire` is
//! compare-and-set under one mutex, so two near-simultaneous identical
//! requests can never both register.

use std::collections::HashMap;
use std::sync::Mutex;

use uuid::Uuid;

use crate::domain::error::{PipelineError, Result};
use crate::domain::request::FeatureKey;

/// In-memory mapping from feature key to the active run holding its lock.
#[derive(Debug, Default)]
pub struct RunRegistry {
    active: Mutex<HashMap<String, Uuid>>,
}

impl RunRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `run_id` as the active run for `key`.
    ///
    /// Fails with [`PipelineError::DuplicateRun`] if another run already
    /// holds the key; the registry is left unchanged in that case.
    pub fn acquire(&self, key: &FeatureKey, run_id: Uuid) -> Result<()> {
        let mut active = self.active.lock().unwrap();
        match active.entry(key.as_str().to_string()) {
            std::collections::hash_map::Entry::Occupied(entry) => {
                Err(PipelineError::DuplicateRun {
                    feature_key: key.as_str().to_string(),
                    run_id: *entry.get(),
                })
            }
            std::collections::hash_map::Entry::Vacant(entry) => {
                entry.insert(run_id);
                Ok(())
            }
        }
    }

    /// Release the lock for `key`. No-op if the key is not held.
    ///
    /// Called exactly once when a run enters a terminal state, after
    /// which a new run may be submitted for the same feature.
    pub fn release(&self, key: &FeatureKey) {
        let mut active = self.active.lock().unwrap();
        active.remove(key.as_str());
    }

    /// The run currently holding the lock for `key`, if any.
    pub fn active_run(&self, key: &FeatureKey) -> Option<Uuid> {
        let active = self.active.lock().unwrap();
        active.get(key.as_str()).copied()
    }

    /// Number of active (non-terminal) runs.
    pub fn active_count(&self) -> usize {
        self.active.lock().unwrap().len()
    }
}
