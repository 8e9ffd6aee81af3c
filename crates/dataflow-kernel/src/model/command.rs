//! Append-only log entries describing intended mutations.
//!
//! Modeled as a tagged-union enum rather than a string-keyed `{type, payload}`
//! pair, so an unknown command type fails deserialization instead of reaching
//! a dispatch table. Every command carries a content-addressable [`CommandId`]
//! (uuid v7) so replay is idempotent.

use crate::ids::{CommandId, DataId, DataflowId, NodeId};
use crate::model::data::{ContentType, DataType};
use crate::model::node::NodeStatus;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CommandPayload {
    CreateNode {
        node_id: NodeId,
        node_type: String,
        parent_node_id: Option<NodeId>,
        status: NodeStatus,
        config: Value,
        metadata: HashMap<String, Value>,
        ancestor_path: Vec<NodeId>,
    },
    UpdateNodeStatus {
        node_id: NodeId,
        status: NodeStatus,
        reason: Option<String>,
    },
    CreateData {
        data_id: DataId,
        data_type: DataType,
        node_id: Option<NodeId>,
        key: Option<String>,
        content: Value,
        content_type: ContentType,
        discriminator: Option<String>,
        metadata: HashMap<String, Value>,
    },
    CompleteNode {
        node_id: NodeId,
        message: Option<String>,
    },
    FailNode {
        node_id: NodeId,
        error_code: String,
        error_message: String,
    },
}

/// One entry in a dataflow's append-only command log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Command {
    pub id: CommandId,
    pub dataflow_id: DataflowId,
    /// Monotone per dataflow; used as the CAS token in `append_commands`.
    pub sequence: u64,
    pub payload: CommandPayload,
    pub applied: bool,
}

impl Command {
    pub fn new(dataflow_id: DataflowId, sequence: u64, payload: CommandPayload) -> Self {
        Self {
            id: CommandId::new(),
            dataflow_id,
            sequence,
            payload,
            applied: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn commands_carry_a_content_addressable_id() {
        let dataflow_id = DataflowId::new();
        let c1 = Command::new(
            dataflow_id,
            0,
            CommandPayload::CompleteNode {
                node_id: NodeId::new(),
                message: None,
            },
        );
        let c2 = Command::new(
            dataflow_id,
            1,
            CommandPayload::CompleteNode {
                node_id: NodeId::new(),
                message: None,
            },
        );
        assert_ne!(c1.id, c2.id);
        assert!(!c1.applied);
    }

    #[test]
    fn create_node_payload_round_trips_through_json() {
        let payload = CommandPayload::CreateNode {
            node_id: NodeId::new(),
            node_type: "func".into(),
            parent_node_id: None,
            status: NodeStatus::Pending,
            config: json!({"func_id": "echo"}),
            metadata: HashMap::new(),
            ancestor_path: vec![],
        };
        let encoded = serde_json::to_string(&payload).unwrap();
        let decoded: CommandPayload = serde_json::from_str(&encoded).unwrap();
        match decoded {
            CommandPayload::CreateNode { node_type, .. } => assert_eq!(node_type, "func"),
            _ => panic!("wrong variant"),
        }
    }
}
