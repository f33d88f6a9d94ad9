//! Node and task labelling

mod group_weights;
mod node;
mod task;

pub use group_weights::GroupWeights;
pub use node::{
    load_benchmarks, BenchmarkScores, LabellingMode, NodeLabeller, NodeLabels, NodeRelabel,
};
pub use task::{bucket, percentile_labels, TaskLabeller, TaskLabels};
