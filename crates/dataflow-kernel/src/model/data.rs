//! Typed data artifacts flowing between nodes.

use crate::ids::{DataId, DataflowId, NodeId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    WorkflowInput,
    WorkflowOutput,
    NodeInput,
    NodeOutput,
    NodeConfig,
}

impl DataType {
    pub fn requires_node_id(self) -> bool {
        matches!(self, Self::NodeInput | Self::NodeOutput)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContentType {
    Json,
    Text,
    /// Points at another data item by id; dereferenced at most one hop.
    Reference,
    Other(String),
}

impl ContentType {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Json => "application/json",
            Self::Text => "text/plain",
            Self::Reference => "dataflow/reference",
            Self::Other(s) => s.as_str(),
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "application/json" => Self::Json,
            "text/plain" => Self::Text,
            "dataflow/reference" => Self::Reference,
            other => Self::Other(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataItem {
    pub id: DataId,
    pub dataflow_id: DataflowId,
    pub data_type: DataType,
    pub node_id: Option<NodeId>,
    pub key: Option<String>,
    pub content: Value,
    pub content_type: ContentType,
    pub discriminator: Option<String>,
    pub metadata: HashMap<String, Value>,
}

impl DataItem {
    pub fn new(
        dataflow_id: DataflowId,
        data_type: DataType,
        content: Value,
        content_type: ContentType,
    ) -> Self {
        Self {
            id: DataId::new(),
            dataflow_id,
            data_type,
            node_id: None,
            key: None,
            content,
            content_type,
            discriminator: None,
            metadata: HashMap::new(),
        }
    }

    pub fn is_reference(&self) -> bool {
        matches!(self.content_type, ContentType::Reference)
    }

    /// The data id this item points at, if it is a reference. The payload is
    /// the referenced item's id encoded as a JSON string.
    pub fn reference_target(&self) -> Option<DataId> {
        if !self.is_reference() {
            return None;
        }
        self.content.as_str().and_then(|s| s.parse().ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_scoped_types_require_node_id() {
        assert!(DataType::NodeInput.requires_node_id());
        assert!(DataType::NodeOutput.requires_node_id());
        assert!(!DataType::WorkflowOutput.requires_node_id());
    }

    #[test]
    fn content_type_round_trips_unknown_values() {
        let ct = ContentType::from_str("application/x-custom");
        assert_eq!(ct.as_str(), "application/x-custom");
    }

    #[test]
    fn reference_target_parses_pointer() {
        let target = DataId::new();
        let item = DataItem::new(
            DataflowId::new(),
            DataType::NodeInput,
            serde_json::Value::String(target.to_string()),
            ContentType::Reference,
        );
        assert_eq!(item.reference_target(), Some(target));
    }
}
