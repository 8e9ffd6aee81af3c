//! A declared destination for a node's output or error, fulfilled by the
//! data router.
//!
//! `Target` always carries an explicit `data_type`; `node_id`/`key` are optional
//! and their absence means "workflow-level", never "infer from the previous
//! target". Explicit target lists are authoritative.

use crate::ids::NodeId;
use crate::model::data::{ContentType, DataType};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Target {
    pub data_type: DataType,
    pub node_id: Option<NodeId>,
    pub key: Option<String>,
    pub content_type: Option<ContentType>,
}

impl Target {
    pub fn new(data_type: DataType) -> Self {
        Self {
            data_type,
            node_id: None,
            key: None,
            content_type: None,
        }
    }

    pub fn to_node(mut self, node_id: NodeId) -> Self {
        self.node_id = Some(node_id);
        self
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn with_content_type(mut self, content_type: ContentType) -> Self {
        self.content_type = Some(content_type);
        self
    }

    /// Rewrites `node_id` through `mapping` if it points at a prototype being
    /// cloned by the iterator; targets pointing outside the
    /// mapping are preserved verbatim.
    pub fn rewritten(&self, mapping: &std::collections::HashMap<NodeId, NodeId>) -> Self {
        let mut clone = self.clone();
        if let Some(old) = self.node_id {
            if let Some(&new) = mapping.get(&old) {
                clone.node_id = Some(new);
            }
        }
        clone
    }
}
