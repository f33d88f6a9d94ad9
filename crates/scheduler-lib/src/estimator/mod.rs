//! Node speed estimation
//!
//! An estimator turns runtime observations into one comparable speed score
//! per node. Higher scores mean faster nodes. Every implementation answers
//! `None` until it can score the full expected node set.

mod constant;
mod matrix;
mod process;
mod regression;
mod transitive;

pub use constant::ConstantEstimator;
pub use matrix::{speed_scores, ClosedMatrix, RatioMatrix};
pub use process::{parse_response, ProcessEstimator};
pub use regression::{Range, RegressionLine};
pub use transitive::TransitiveEstimator;

use crate::config::{EstimatorKind, TaremaConfig};
use crate::error::{Result, TaremaError};
use crate::models::Observation;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Speed score per node name
pub type NodeEstimations = BTreeMap<String, f64>;

/// General ranking plus rankings for task types with enough samples of their own
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskSpecificEstimations {
    pub general: NodeEstimations,
    pub per_task: BTreeMap<String, NodeEstimations>,
}

/// Trait for node speed estimator implementations
pub trait NodeSpeedEstimator: Send + Sync {
    /// Short identifier used in logs and metrics
    fn name(&self) -> &'static str;

    /// Record one finished task instance
    fn add_data_point(&self, observation: &Observation);

    /// Current speed score per node, or `None` while not ready
    fn estimations(&self) -> Option<NodeEstimations>;

    /// General ranking plus per-task-type rankings where available
    fn task_specific_estimations(&self) -> Option<TaskSpecificEstimations> {
        self.estimations().map(|general| TaskSpecificEstimations {
            general,
            per_task: BTreeMap::new(),
        })
    }

    /// Whether the estimator hit an unrecoverable failure
    fn is_faulted(&self) -> bool {
        false
    }
}

/// Build the estimator selected by `config`
pub fn build_estimator(config: &TaremaConfig) -> Result<Box<dyn NodeSpeedEstimator>> {
    match config.estimator {
        EstimatorKind::Transitive => Ok(Box::new(
            TransitiveEstimator::new(config.expected_nodes)
                .with_task_threshold(config.task_specific_threshold()),
        )),
        EstimatorKind::Constant => Ok(Box::new(ConstantEstimator::new(
            config.constant_estimations.clone(),
            config.expected_nodes,
        ))),
        EstimatorKind::Process => {
            let command = config.process_command.as_deref().ok_or_else(|| {
                TaremaError::Config("process estimator requires `process_command`".to_string())
            })?;
            let estimator =
                ProcessEstimator::spawn(command, &config.process_args, config.expected_nodes)?;
            Ok(Box::new(estimator))
        }
    }
}
