//! Cluster orchestrator seam
//!
//! The engine never talks to a cluster directly. It lists nodes and
//! unscheduled tasks and binds tasks through this trait.

use crate::error::{Result, TaremaError};
use crate::models::{NodeState, PendingTask, Resources};
use std::collections::BTreeMap;
use tokio::sync::RwLock;
use tracing::debug;

pub use async_trait::async_trait;

/// Trait for cluster orchestrator implementations
#[async_trait]
pub trait Orchestrator: Send + Sync {
    /// Nodes with their currently free and total capacity
    async fn list_nodes(&self) -> Result<Vec<NodeState>>;

    /// Tasks waiting for a node
    async fn list_unscheduled(&self) -> Result<Vec<PendingTask>>;

    /// Bind a pending task to a node
    async fn bind(&self, task_id: &str, node: &str) -> Result<()>;
}

#[derive(Debug, Default)]
struct ClusterState {
    nodes: BTreeMap<String, NodeState>,
    pending: Vec<PendingTask>,
    /// task id -> (node, reserved resources)
    bound: BTreeMap<String, (String, Resources)>,
}

/// Orchestrator kept entirely in memory
#[derive(Debug, Default)]
pub struct InMemoryCluster {
    state: RwLock<ClusterState>,
}

impl InMemoryCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node with all of its allocatable capacity free
    pub async fn add_node(&self, name: &str, allocatable: Resources) {
        let mut state = self.state.write().await;
        state
            .nodes
            .insert(name.to_string(), NodeState::new(name, allocatable, allocatable));
    }

    pub async fn submit(&self, task: PendingTask) {
        self.state.write().await.pending.push(task);
    }

    /// Node a task is bound to, if any
    pub async fn binding(&self, task_id: &str) -> Option<String> {
        let state = self.state.read().await;
        state.bound.get(task_id).map(|(node, _)| node.clone())
    }

    pub async fn bound_count(&self) -> usize {
        self.state.read().await.bound.len()
    }

    /// Finish a bound task and give its resources back to the node
    pub async fn release(&self, task_id: &str) -> Result<String> {
        let mut state = self.state.write().await;
        let (node, request) = state
            .bound
            .remove(task_id)
            .ok_or_else(|| TaremaError::Orchestrator(format!("task `{task_id}` is not bound")))?;
        if let Some(node_state) = state.nodes.get_mut(&node) {
            let available = &mut node_state.available;
            available.cpu_millis = (available.cpu_millis + request.cpu_millis)
                .min(node_state.allocatable.cpu_millis);
            available.memory_bytes = (available.memory_bytes + request.memory_bytes)
                .min(node_state.allocatable.memory_bytes);
        }
        Ok(node)
    }
}

#[async_trait]
impl Orchestrator for InMemoryCluster {
    async fn list_nodes(&self) -> Result<Vec<NodeState>> {
        Ok(self.state.read().await.nodes.values().cloned().collect())
    }

    async fn list_unscheduled(&self) -> Result<Vec<PendingTask>> {
        Ok(self.state.read().await.pending.clone())
    }

    async fn bind(&self, task_id: &str, node: &str) -> Result<()> {
        let mut state = self.state.write().await;
        let position = state
            .pending
            .iter()
            .position(|t| t.id == task_id)
            .ok_or_else(|| TaremaError::Orchestrator(format!("task `{task_id}` is not pending")))?;
        let request = state.pending[position].request;

        let node_state = state
            .nodes
            .get_mut(node)
            .ok_or_else(|| TaremaError::Orchestrator(format!("unknown node `{node}`")))?;
        if !node_state.available.fits(&request) {
            return Err(TaremaError::Orchestrator(format!(
                "node `{node}` has no room for task `{task_id}`"
            )));
        }
        node_state.available = node_state.available.saturating_sub(&request);

        state.pending.remove(position);
        state
            .bound
            .insert(task_id.to_string(), (node.to_string(), request));
        debug!(task_id = %task_id, node = %node, "Bound task");
        Ok(())
    }
}
