//! Append-only observation store
//!
//! Holds every accepted task-instance observation of one workflow execution.
//! Saves are idempotent by task-instance id.

use crate::models::ResourceObservation;
use dashmap::DashSet;
use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock};
use tracing::debug;

/// Thread-safe store of finished task instances
#[derive(Debug, Default)]
pub struct ObservationStore {
    seen: DashSet<String>,
    observations: RwLock<Vec<ResourceObservation>>,
}

impl ObservationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an observation
    ///
    /// Returns `false` without storing anything if the task instance was
    /// already recorded.
    pub fn save(&self, observation: ResourceObservation) -> bool {
        if !self.seen.insert(observation.task_instance_id.clone()) {
            debug!(
                task_instance = %observation.task_instance_id,
                "Ignoring duplicate observation"
            );
            return false;
        }

        self.observations
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(observation);
        true
    }

    pub fn contains(&self, task_instance_id: &str) -> bool {
        self.seen.contains(task_instance_id)
    }

    pub fn len(&self) -> usize {
        self.observations
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of all observations in arrival order
    pub fn observations(&self) -> Vec<ResourceObservation> {
        self.observations
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Observations grouped by task type
    pub fn by_task(&self) -> BTreeMap<String, Vec<ResourceObservation>> {
        let mut grouped: BTreeMap<String, Vec<ResourceObservation>> = BTreeMap::new();
        for observation in self.observations() {
            grouped
                .entry(observation.task.clone())
                .or_default()
                .push(observation);
        }
        grouped
    }
}
