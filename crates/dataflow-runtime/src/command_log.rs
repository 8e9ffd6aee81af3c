//! Command log recovery and the shared append-with-retry write path.
//!
//! "Scan forward, rebuild view, resume": here the "view" is just the ready
//! queue and suspension table the scheduler needs, since the Store already
//! holds the rebuilt node/data rows (commands are applied to it eagerly, not
//! replayed into memory from scratch).

use dataflow_kernel::error::StoreError;
use dataflow_kernel::ids::{DataflowId, NodeId};
use dataflow_kernel::model::command::CommandPayload;
use dataflow_kernel::model::node::{Node, NodeStatus};
use dataflow_store::{AppliedBatch, DataFilter, NodeFilter, Store};
use std::collections::HashMap;

/// The state a scheduler needs to resume a dataflow it didn't start: which
/// nodes are immediately dispatchable, and which parents are still waiting
/// on a set of children. Both are inferred from persisted node state rather
/// than a persisted "yield" event (the command log records only the five
/// mutation kinds; suspension is not one of them).
#[derive(Debug, Default)]
pub struct RecoveredState {
    pub ready: Vec<NodeId>,
    pub suspensions: HashMap<NodeId, Vec<NodeId>>,
}

/// Rebuilds scheduler state for one non-terminal dataflow by scanning its
/// current persisted nodes.
pub async fn replay(store: &dyn Store, dataflow: DataflowId) -> Result<RecoveredState, StoreError> {
    let nodes = store.list_nodes(dataflow, NodeFilter::default()).await?;
    let by_id: HashMap<NodeId, &Node> = nodes.iter().map(|n| (n.id, n)).collect();

    let mut ready = Vec::new();
    let mut suspensions: HashMap<NodeId, Vec<NodeId>> = HashMap::new();

    for node in &nodes {
        if node.status == NodeStatus::Template {
            continue;
        }
        if node.status == NodeStatus::Pending {
            if has_satisfied_inputs(store, dataflow, node.id).await? {
                ready.push(node.id);
            }
            continue;
        }
        if node.status == NodeStatus::Running {
            let children: Vec<NodeId> = nodes
                .iter()
                .filter(|n| n.parent_node_id == Some(node.id) && n.status != NodeStatus::Template)
                .map(|n| n.id)
                .collect();
            let pending_children: Vec<NodeId> = children
                .into_iter()
                .filter(|id| by_id.get(id).map(|n| !n.status.is_terminal()).unwrap_or(false))
                .collect();
            if !pending_children.is_empty() {
                suspensions.insert(node.id, pending_children);
            }
        }
    }

    Ok(RecoveredState { ready, suspensions })
}

/// Appends a batch of commands, retrying on a sequence conflict. Several
/// worker tasks can race to write to the same dataflow (a node finishing
/// while another yields, or two map-reduce iterations landing back to back),
/// and a `Conflict` there just means another writer's batch landed first.
/// Re-reading the sequence and retrying always eventually succeeds, unlike
/// dropping the batch, which would silently lose a node's terminal status
/// and routed output.
pub(crate) async fn append_with_retry(
    store: &dyn Store,
    dataflow: DataflowId,
    commands: Vec<CommandPayload>,
) -> Result<AppliedBatch, StoreError> {
    loop {
        let seq = store.current_sequence(dataflow).await?;
        match store.append_commands(dataflow, seq, commands.clone()).await {
            Ok(batch) => return Ok(batch),
            Err(StoreError::Conflict { .. }) => continue,
            Err(e) => return Err(e),
        }
    }
}

/// A node is ready once its inputs are satisfied: every key listed in its
/// config's `required_input_keys` has a `node.input` item, or, when no keys
/// are declared, at least one `node.input` item exists.
pub(crate) async fn has_satisfied_inputs(store: &dyn Store, dataflow: DataflowId, node: NodeId) -> Result<bool, StoreError> {
    let inputs = store
        .list_data(
            dataflow,
            DataFilter {
                node_id: Some(node),
                data_type: Some(dataflow_kernel::model::data::DataType::NodeInput),
                key: None,
            },
        )
        .await?;

    let node_record = store.get_node(node).await?;
    let required: Vec<&str> = node_record
        .config
        .get("required_input_keys")
        .and_then(|v| v.as_array())
        .map(|arr| arr.iter().filter_map(|k| k.as_str()).collect())
        .unwrap_or_default();

    if required.is_empty() {
        return Ok(!inputs.is_empty());
    }
    Ok(required
        .iter()
        .all(|key| inputs.iter().any(|i| i.key.as_deref() == Some(key))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use dataflow_kernel::model::command::CommandPayload;
    use dataflow_kernel::model::dataflow::Dataflow;
    use dataflow_kernel::model::data::{ContentType, DataType};
    use dataflow_kernel::ids::DataId;
    use dataflow_store::InMemoryStore;
    use serde_json::json;

    #[tokio::test]
    async fn pending_node_with_input_is_ready_on_replay() {
        let store = InMemoryStore::new();
        let df = store.create_dataflow(Dataflow::new("alice")).await.unwrap();
        let node_id = NodeId::new();
        store
            .append_commands(
                df.id,
                0,
                vec![
                    CommandPayload::CreateNode {
                        node_id,
                        node_type: "func".into(),
                        parent_node_id: None,
                        status: NodeStatus::Pending,
                        config: json!({}),
                        metadata: Default::default(),
                        ancestor_path: vec![],
                    },
                    CommandPayload::CreateData {
                        data_id: DataId::new(),
                        data_type: DataType::NodeInput,
                        node_id: Some(node_id),
                        key: Some("default".to_string()),
                        content: json!({"v": 1}),
                        content_type: ContentType::Json,
                        discriminator: None,
                        metadata: Default::default(),
                    },
                ],
            )
            .await
            .unwrap();

        let recovered = replay(&store, df.id).await.unwrap();
        assert_eq!(recovered.ready, vec![node_id]);
        assert!(recovered.suspensions.is_empty());
    }

    #[tokio::test]
    async fn running_parent_with_pending_child_is_suspended_on_replay() {
        let store = InMemoryStore::new();
        let df = store.create_dataflow(Dataflow::new("alice")).await.unwrap();
        let parent = NodeId::new();
        let child = NodeId::new();
        store
            .append_commands(
                df.id,
                0,
                vec![
                    CommandPayload::CreateNode {
                        node_id: parent,
                        node_type: "map_reduce".into(),
                        parent_node_id: None,
                        status: NodeStatus::Pending,
                        config: json!({}),
                        metadata: Default::default(),
                        ancestor_path: vec![],
                    },
                    CommandPayload::UpdateNodeStatus {
                        node_id: parent,
                        status: NodeStatus::Running,
                        reason: None,
                    },
                    CommandPayload::CreateNode {
                        node_id: child,
                        node_type: "func".into(),
                        parent_node_id: Some(parent),
                        status: NodeStatus::Pending,
                        config: json!({}),
                        metadata: Default::default(),
                        ancestor_path: vec![parent],
                    },
                ],
            )
            .await
            .unwrap();

        let recovered = replay(&store, df.id).await.unwrap();
        assert_eq!(recovered.suspensions.get(&parent), Some(&vec![child]));
    }

    #[tokio::test]
    async fn declared_required_keys_must_all_be_present() {
        let store = InMemoryStore::new();
        let df = store.create_dataflow(Dataflow::new("alice")).await.unwrap();
        let node_id = NodeId::new();
        store
            .append_commands(
                df.id,
                0,
                vec![
                    CommandPayload::CreateNode {
                        node_id,
                        node_type: "func".into(),
                        parent_node_id: None,
                        status: NodeStatus::Pending,
                        config: json!({"required_input_keys": ["left", "right"]}),
                        metadata: Default::default(),
                        ancestor_path: vec![],
                    },
                    CommandPayload::CreateData {
                        data_id: DataId::new(),
                        data_type: DataType::NodeInput,
                        node_id: Some(node_id),
                        key: Some("left".to_string()),
                        content: json!(1),
                        content_type: ContentType::Json,
                        discriminator: None,
                        metadata: Default::default(),
                    },
                ],
            )
            .await
            .unwrap();

        assert!(!has_satisfied_inputs(&store, df.id, node_id).await.unwrap());

        store
            .append_commands(
                df.id,
                2,
                vec![CommandPayload::CreateData {
                    data_id: DataId::new(),
                    data_type: DataType::NodeInput,
                    node_id: Some(node_id),
                    key: Some("right".to_string()),
                    content: json!(2),
                    content_type: ContentType::Json,
                    discriminator: None,
                    metadata: Default::default(),
                }],
            )
            .await
            .unwrap();

        assert!(has_satisfied_inputs(&store, df.id, node_id).await.unwrap());
    }
}
