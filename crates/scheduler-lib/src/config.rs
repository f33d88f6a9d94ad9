//! Engine configuration
//!
//! Every field has a default so a partial configuration (or none at all)
//! deserializes into a usable engine setup.

use crate::error::TaremaError;
use crate::models::Dimension;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Which node speed estimator backs online node labelling
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EstimatorKind {
    #[default]
    Transitive,
    Constant,
    Process,
}

/// Settings for silhouette-optimal k-means
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusteringConfig {
    /// Silhouette assigned to points alone in their cluster
    #[serde(default)]
    pub one_point_cluster_score: f64,

    /// Below this spread ((max - min) / |mean|) a weakly scored clustering
    /// collapses into one group
    #[serde(default = "default_min_relative_spread")]
    pub min_relative_spread: f64,

    /// Clusterings scoring at least this are kept whatever their spread
    #[serde(default = "default_confident_silhouette")]
    pub confident_silhouette: f64,

    /// Upper bound on Lloyd iterations per k
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
}

fn default_min_relative_spread() -> f64 {
    0.25
}

fn default_confident_silhouette() -> f64 {
    0.9
}

fn default_max_iterations() -> usize {
    100
}

impl Default for ClusteringConfig {
    fn default() -> Self {
        Self {
            one_point_cluster_score: 0.0,
            min_relative_spread: default_min_relative_spread(),
            confident_silhouette: default_confident_silhouette(),
            max_iterations: default_max_iterations(),
        }
    }
}

/// Transform applied to a task metric before percentile bucketing
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricTransform {
    #[default]
    Linear,
    /// `ln(1 + x)`, for heavy-tailed byte counts
    Log,
}

impl MetricTransform {
    pub fn apply(self, value: f64) -> f64 {
        match self {
            MetricTransform::Linear => value,
            MetricTransform::Log => value.max(0.0).ln_1p(),
        }
    }
}

/// Task labelling settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskLabelConfig {
    #[serde(default)]
    pub cpu: MetricTransform,
    #[serde(default)]
    pub mem: MetricTransform,
    #[serde(default = "default_log_transform")]
    pub read: MetricTransform,
    #[serde(default = "default_log_transform")]
    pub write: MetricTransform,

    /// Observations a task type needs before it is labelled
    #[serde(default = "default_min_observations")]
    pub min_observations: usize,
}

fn default_log_transform() -> MetricTransform {
    MetricTransform::Log
}

fn default_min_observations() -> usize {
    1
}

impl TaskLabelConfig {
    pub fn transform(&self, dimension: Dimension) -> MetricTransform {
        match dimension {
            Dimension::Cpu => self.cpu,
            Dimension::Mem => self.mem,
            Dimension::Read => self.read,
            Dimension::Write => self.write,
        }
    }
}

impl Default for TaskLabelConfig {
    fn default() -> Self {
        Self {
            cpu: MetricTransform::Linear,
            mem: MetricTransform::Linear,
            read: MetricTransform::Log,
            write: MetricTransform::Log,
            min_observations: default_min_observations(),
        }
    }
}

/// How a node's single "speed" scalar is derived for placement tie-breaks
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum SpeedDerivation {
    /// Sum of the node's label vector
    #[default]
    Sum,
    /// Raw estimator score; falls back to `Sum` in benchmark mode
    Estimation,
    /// A single label dimension
    Dimension(Dimension),
}

impl FromStr for SpeedDerivation {
    type Err = TaremaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value = s.trim().to_ascii_lowercase();
        match value.as_str() {
            "sum" => Ok(SpeedDerivation::Sum),
            "estimation" => Ok(SpeedDerivation::Estimation),
            other => {
                let dim = other.strip_prefix("dimension:").unwrap_or(other);
                Dimension::parse(dim)
                    .map(SpeedDerivation::Dimension)
                    .ok_or_else(|| TaremaError::Config(format!("unknown speed derivation `{s}`")))
            }
        }
    }
}

impl TryFrom<String> for SpeedDerivation {
    type Error = TaremaError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<SpeedDerivation> for String {
    fn from(value: SpeedDerivation) -> Self {
        value.to_string()
    }
}

impl fmt::Display for SpeedDerivation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SpeedDerivation::Sum => f.write_str("sum"),
            SpeedDerivation::Estimation => f.write_str("estimation"),
            SpeedDerivation::Dimension(d) => write!(f, "dimension:{d}"),
        }
    }
}

/// Full engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaremaConfig {
    /// Number of nodes an estimator must see before it reports
    #[serde(default = "default_expected_nodes")]
    pub expected_nodes: usize,

    #[serde(default)]
    pub estimator: EstimatorKind,

    /// Program for the `process` estimator
    #[serde(default)]
    pub process_command: Option<String>,

    #[serde(default)]
    pub process_args: Vec<String>,

    /// Fixed scores for the `constant` estimator
    #[serde(default)]
    pub constant_estimations: BTreeMap<String, f64>,

    /// JSON benchmark file; when set, nodes are labelled once from it
    #[serde(default)]
    pub benchmark_file: Option<PathBuf>,

    /// Per-node weight (e.g. allocatable CPU) when sizing label groups;
    /// empty counts every node the same, unlisted nodes weigh 1
    #[serde(default)]
    pub node_weights: BTreeMap<String, f64>,

    #[serde(default)]
    pub clustering: ClusteringConfig,

    /// Samples a task type needs for its own ranking (default 3 x expected nodes)
    #[serde(default)]
    pub task_specific_threshold: Option<usize>,

    #[serde(default)]
    pub speed_derivation: SpeedDerivation,

    #[serde(default)]
    pub task_labels: TaskLabelConfig,
}

fn default_expected_nodes() -> usize {
    1
}

impl Default for TaremaConfig {
    fn default() -> Self {
        Self {
            expected_nodes: default_expected_nodes(),
            estimator: EstimatorKind::default(),
            process_command: None,
            process_args: Vec::new(),
            constant_estimations: BTreeMap::new(),
            benchmark_file: None,
            node_weights: BTreeMap::new(),
            clustering: ClusteringConfig::default(),
            task_specific_threshold: None,
            speed_derivation: SpeedDerivation::default(),
            task_labels: TaskLabelConfig::default(),
        }
    }
}

impl TaremaConfig {
    pub fn task_specific_threshold(&self) -> usize {
        self.task_specific_threshold
            .unwrap_or(3 * self.expected_nodes)
    }
}
