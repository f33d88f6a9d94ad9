//! Core data models for the placement engine

use crate::error::TraceError;
use crate::trace::{fields, TraceRecord};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Resource dimension a label refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dimension {
    Cpu,
    Mem,
    Read,
    Write,
}

impl Dimension {
    pub const ALL: [Dimension; 4] = [
        Dimension::Cpu,
        Dimension::Mem,
        Dimension::Read,
        Dimension::Write,
    ];

    pub fn index(self) -> usize {
        match self {
            Dimension::Cpu => 0,
            Dimension::Mem => 1,
            Dimension::Read => 2,
            Dimension::Write => 3,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Dimension::Cpu => "cpu",
            Dimension::Mem => "mem",
            Dimension::Read => "read",
            Dimension::Write => "write",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "cpu" => Some(Dimension::Cpu),
            "mem" | "memory" => Some(Dimension::Mem),
            "read" => Some(Dimension::Read),
            "write" => Some(Dimension::Write),
            _ => None,
        }
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-dimension label indices of a node or task type
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LabelVector {
    pub cpu: u32,
    pub mem: u32,
    pub read: u32,
    pub write: u32,
}

impl LabelVector {
    pub fn new(cpu: u32, mem: u32, read: u32, write: u32) -> Self {
        Self {
            cpu,
            mem,
            read,
            write,
        }
    }

    /// Same label in every dimension
    pub fn uniform(label: u32) -> Self {
        Self::new(label, label, label, label)
    }

    pub fn from_fn(mut f: impl FnMut(Dimension) -> u32) -> Self {
        Self::new(
            f(Dimension::Cpu),
            f(Dimension::Mem),
            f(Dimension::Read),
            f(Dimension::Write),
        )
    }

    pub fn get(&self, dimension: Dimension) -> u32 {
        match dimension {
            Dimension::Cpu => self.cpu,
            Dimension::Mem => self.mem,
            Dimension::Read => self.read,
            Dimension::Write => self.write,
        }
    }

    /// Sum of per-dimension absolute label differences
    pub fn distance(&self, other: &LabelVector) -> u32 {
        Dimension::ALL
            .iter()
            .map(|d| self.get(*d).abs_diff(other.get(*d)))
            .sum()
    }

    pub fn min(&self) -> u32 {
        self.cpu.min(self.mem).min(self.read).min(self.write)
    }

    pub fn sum(&self) -> u32 {
        self.cpu + self.mem + self.read + self.write
    }
}

impl fmt::Display for LabelVector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}-{}-{}", self.cpu, self.mem, self.read, self.write)
    }
}

/// One estimator sample: how long a task type took on a node for a given input size
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub node: String,
    pub task: String,
    /// Proxy for input size (characters read)
    pub input_size: f64,
    /// Target metric, runtime by default
    pub target: f64,
}

impl Observation {
    pub fn new(
        node: impl Into<String>,
        task: impl Into<String>,
        input_size: f64,
        target: f64,
    ) -> Self {
        Self {
            node: node.into(),
            task: task.into(),
            input_size,
            target,
        }
    }
}

/// Resource usage of one finished task instance, as used for task labelling
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceObservation {
    pub task_instance_id: String,
    pub node: String,
    pub task: String,
    pub cpu_percent: f64,
    pub rss_bytes: u64,
    pub read_bytes: u64,
    pub write_bytes: u64,
    pub rchar: u64,
    pub realtime_ms: u64,
}

impl ResourceObservation {
    /// Extract the tracked fields from a trace record
    ///
    /// Fails if any tracked field is missing or malformed; nothing is stored
    /// for a record that does not validate.
    pub fn from_trace(
        task_instance_id: impl Into<String>,
        node: impl Into<String>,
        task: impl Into<String>,
        trace: &TraceRecord,
    ) -> Result<Self, TraceError> {
        Ok(Self {
            task_instance_id: task_instance_id.into(),
            node: node.into(),
            task: task.into(),
            cpu_percent: trace.get_percentage(fields::CPU_PERCENT)?,
            rss_bytes: trace.get_memory(fields::RSS)?,
            read_bytes: trace.get_memory(fields::READ_BYTES)?,
            write_bytes: trace.get_memory(fields::WRITE_BYTES)?,
            rchar: trace.get_memory(fields::RCHAR)?,
            realtime_ms: trace.get_time(fields::REALTIME)?,
        })
    }

    /// Value of the metric labelled along `dimension`
    pub fn metric(&self, dimension: Dimension) -> f64 {
        match dimension {
            Dimension::Cpu => self.cpu_percent,
            Dimension::Mem => self.rss_bytes as f64,
            Dimension::Read => self.read_bytes as f64,
            Dimension::Write => self.write_bytes as f64,
        }
    }

    /// Narrow form consumed by node speed estimators
    pub fn to_observation(&self) -> Observation {
        Observation::new(
            self.node.clone(),
            self.task.clone(),
            self.rchar as f64,
            self.realtime_ms as f64,
        )
    }
}

/// CPU and memory amounts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resources {
    pub cpu_millis: u64,
    pub memory_bytes: u64,
}

impl Resources {
    pub fn new(cpu_millis: u64, memory_bytes: u64) -> Self {
        Self {
            cpu_millis,
            memory_bytes,
        }
    }

    pub fn fits(&self, request: &Resources) -> bool {
        self.cpu_millis >= request.cpu_millis && self.memory_bytes >= request.memory_bytes
    }

    pub fn saturating_sub(&self, other: &Resources) -> Resources {
        Resources {
            cpu_millis: self.cpu_millis.saturating_sub(other.cpu_millis),
            memory_bytes: self.memory_bytes.saturating_sub(other.memory_bytes),
        }
    }
}

/// A worker node as seen by the placement policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeState {
    pub name: String,
    /// Capacity currently free on the node
    pub available: Resources,
    /// Total allocatable capacity of the node
    pub allocatable: Resources,
}

impl NodeState {
    pub fn new(name: impl Into<String>, available: Resources, allocatable: Resources) -> Self {
        Self {
            name: name.into(),
            available,
            allocatable,
        }
    }
}

/// A task instance waiting for placement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingTask {
    pub id: String,
    /// Abstract task type this instance belongs to
    pub task: String,
    pub request: Resources,
    /// Inputs not yet produced by upstream tasks
    #[serde(default)]
    pub unresolved_inputs: u32,
}

impl PendingTask {
    pub fn new(id: impl Into<String>, task: impl Into<String>, request: Resources) -> Self {
        Self {
            id: id.into(),
            task: task.into(),
            request,
            unresolved_inputs: 0,
        }
    }

    pub fn with_unresolved_inputs(mut self, unresolved_inputs: u32) -> Self {
        self.unresolved_inputs = unresolved_inputs;
        self
    }
}

/// Notification that a task instance finished, with its trace
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskTermination {
    pub task_instance_id: String,
    pub node: String,
    pub task: String,
    pub trace: TraceRecord,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace::TraceValue;

    #[test]
    fn test_label_distance() {
        let a = LabelVector::new(0, 2, 1, 3);
        let b = LabelVector::new(1, 0, 1, 1);
        assert_eq!(a.distance(&b), 1 + 2 + 0 + 2);
        assert_eq!(a.distance(&a), 0);
        assert_eq!(a.min(), 0);
        assert_eq!(a.sum(), 6);
    }

    #[test]
    fn test_resources_fit_and_subtract() {
        let node = Resources::new(4000, 8 << 30);
        let request = Resources::new(2500, 1 << 30);
        assert!(node.fits(&request));
        let left = node.saturating_sub(&request);
        assert_eq!(left.cpu_millis, 1500);
        assert!(!left.fits(&request));
    }

    #[test]
    fn test_observation_from_trace() {
        let trace = TraceRecord::new()
            .with(fields::CPU_PERCENT, TraceValue::Percentage(99.0))
            .unwrap()
            .with(fields::RSS, TraceValue::Memory(100))
            .unwrap()
            .with(fields::READ_BYTES, TraceValue::Memory(200))
            .unwrap()
            .with(fields::WRITE_BYTES, TraceValue::Memory(300))
            .unwrap()
            .with(fields::RCHAR, TraceValue::Memory(400))
            .unwrap()
            .with(fields::REALTIME, TraceValue::Time(5000))
            .unwrap();

        let obs = ResourceObservation::from_trace("t-1", "node-a", "align", &trace).unwrap();
        assert_eq!(obs.metric(Dimension::Cpu), 99.0);
        assert_eq!(obs.metric(Dimension::Write), 300.0);

        let narrow = obs.to_observation();
        assert_eq!(narrow.input_size, 400.0);
        assert_eq!(narrow.target, 5000.0);
    }

    #[test]
    fn test_observation_from_incomplete_trace_fails() {
        let trace = TraceRecord::new()
            .with(fields::CPU_PERCENT, TraceValue::Percentage(99.0))
            .unwrap();
        assert!(ResourceObservation::from_trace("t-1", "node-a", "align", &trace).is_err());
    }

    #[test]
    fn test_dimension_parse() {
        assert_eq!(Dimension::parse("CPU"), Some(Dimension::Cpu));
        assert_eq!(Dimension::parse("memory"), Some(Dimension::Mem));
        assert_eq!(Dimension::parse("gpu"), None);
    }
}
