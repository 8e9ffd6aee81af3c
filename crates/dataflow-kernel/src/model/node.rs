//! A single computational step inside a dataflow, and its status lattice.

use crate::error::TransitionError;
use crate::ids::{DataflowId, NodeId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Pending,
    Running,
    /// A prototype, never itself executed; cloned by the Iterator.
    Template,
    Completed,
    Failed,
    Canceled,
}

impl NodeStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Canceled)
    }

    /// Legal transitions. `template` nodes never transition: they are
    /// cloned instead of dispatched.
    pub fn can_transition_to(self, next: NodeStatus) -> bool {
        use NodeStatus::*;
        matches!(
            (self, next),
            (Pending, Running)
                | (Pending, Canceled)
                | (Running, Completed)
                | (Running, Failed)
                | (Running, Canceled)
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub dataflow_id: DataflowId,
    /// Opaque type selecting a runtime, e.g. `"func"`, `"map_reduce"`.
    pub node_type: String,
    pub status: NodeStatus,
    /// Opaque per-type configuration (data_targets, error_targets, func_id, ...).
    pub config: Value,
    pub parent_node_id: Option<NodeId>,
    /// Root-first ordered ancestor path; consistent with `parent_node_id`.
    pub ancestor_path: Vec<NodeId>,
    pub metadata: HashMap<String, Value>,
}

impl Node {
    pub fn new(dataflow_id: DataflowId, node_type: impl Into<String>, config: Value) -> Self {
        Self {
            id: NodeId::new(),
            dataflow_id,
            node_type: node_type.into(),
            status: NodeStatus::Pending,
            config,
            parent_node_id: None,
            ancestor_path: Vec::new(),
            metadata: HashMap::new(),
        }
    }

    pub fn template(
        dataflow_id: DataflowId,
        node_type: impl Into<String>,
        config: Value,
        parent_node_id: NodeId,
        ancestor_path: Vec<NodeId>,
    ) -> Self {
        Self {
            id: NodeId::new(),
            dataflow_id,
            node_type: node_type.into(),
            status: NodeStatus::Template,
            config,
            parent_node_id: Some(parent_node_id),
            ancestor_path,
            metadata: HashMap::new(),
        }
    }

    pub fn transition(&mut self, next: NodeStatus) -> Result<(), TransitionError> {
        if !self.status.can_transition_to(next) {
            return Err(TransitionError::InvalidTransition {
                from: format!("{:?}", self.status),
                to: format!("{:?}", next),
            });
        }
        self.status = next;
        Ok(())
    }
}
