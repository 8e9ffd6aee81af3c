//! An in-memory [`Store`] implementation: `RwLock`-guarded registries plus a
//! per-dataflow monotone sequence counter backing the `append_commands` CAS.
//! This is the Store the scheduler, client, and test suites use; the `sqlite`
//! feature adds a durable alternative behind the same trait.

use crate::traits::{AppliedBatch, DataFilter, DataflowFilter, NodeFilter, Page, Store};
use async_trait::async_trait;
use dataflow_kernel::error::StoreError;
use dataflow_kernel::ids::{DataId, DataflowId, NodeId};
use dataflow_kernel::model::command::{Command, CommandPayload};
use dataflow_kernel::model::data::{ContentType, DataItem};
use dataflow_kernel::model::dataflow::{Dataflow, DataflowStatus};
use dataflow_kernel::model::node::Node;
use std::collections::HashMap;
use tokio::sync::RwLock;

#[derive(Default)]
pub struct InMemoryStore {
    dataflows: RwLock<HashMap<DataflowId, Dataflow>>,
    nodes: RwLock<HashMap<NodeId, Node>>,
    data: RwLock<HashMap<DataId, DataItem>>,
    commands: RwLock<HashMap<DataflowId, Vec<Command>>>,
    sequences: RwLock<HashMap<DataflowId, u64>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn apply_one(
        nodes: &mut HashMap<NodeId, Node>,
        data: &mut HashMap<DataId, DataItem>,
        dataflow_id: DataflowId,
        payload: &CommandPayload,
    ) -> Result<(Option<Node>, Option<DataItem>), StoreError> {
        match payload {
            CommandPayload::CreateNode {
                node_id,
                node_type,
                parent_node_id,
                status,
                config,
                metadata,
                ancestor_path,
            } => {
                let node = Node {
                    id: *node_id,
                    dataflow_id,
                    node_type: node_type.clone(),
                    status: *status,
                    config: config.clone(),
                    parent_node_id: *parent_node_id,
                    ancestor_path: ancestor_path.clone(),
                    metadata: metadata.clone(),
                };
                nodes.insert(*node_id, node.clone());
                Ok((Some(node), None))
            }
            CommandPayload::UpdateNodeStatus {
                node_id,
                status,
                reason,
            } => {
                let node = nodes
                    .get_mut(node_id)
                    .ok_or_else(|| StoreError::NotFound(node_id.to_string()))?;
                node.transition(*status)
                    .map_err(|e| StoreError::InvalidPayload(e.to_string()))?;
                if let Some(reason) = reason {
                    node.metadata
                        .insert("status_reason".to_string(), serde_json::json!(reason));
                }
                Ok((Some(node.clone()), None))
            }
            CommandPayload::CreateData {
                data_id,
                data_type,
                node_id,
                key,
                content,
                content_type,
                discriminator,
                metadata,
            } => {
                if data_type.requires_node_id() && node_id.is_none() {
                    return Err(StoreError::InvalidPayload(format!(
                        "{data_type:?} requires node_id"
                    )));
                }
                let item = DataItem {
                    id: *data_id,
                    dataflow_id,
                    data_type: *data_type,
                    node_id: *node_id,
                    key: key.clone(),
                    content: content.clone(),
                    content_type: content_type.clone(),
                    discriminator: discriminator.clone(),
                    metadata: metadata.clone(),
                };
                data.insert(*data_id, item.clone());
                Ok((None, Some(item)))
            }
            CommandPayload::CompleteNode { node_id, message } => {
                let node = nodes
                    .get_mut(node_id)
                    .ok_or_else(|| StoreError::NotFound(node_id.to_string()))?;
                node.transition(dataflow_kernel::model::node::NodeStatus::Completed)
                    .map_err(|e| StoreError::InvalidPayload(e.to_string()))?;
                if let Some(message) = message {
                    node.metadata
                        .insert("completion_message".to_string(), serde_json::json!(message));
                }
                Ok((Some(node.clone()), None))
            }
            CommandPayload::FailNode {
                node_id,
                error_code,
                error_message,
            } => {
                let node = nodes
                    .get_mut(node_id)
                    .ok_or_else(|| StoreError::NotFound(node_id.to_string()))?;
                node.transition(dataflow_kernel::model::node::NodeStatus::Failed)
                    .map_err(|e| StoreError::InvalidPayload(e.to_string()))?;
                node.metadata
                    .insert("error_code".to_string(), serde_json::json!(error_code));
                node.metadata
                    .insert("error_message".to_string(), serde_json::json!(error_message));
                Ok((Some(node.clone()), None))
            }
        }
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn create_dataflow(&self, dataflow: Dataflow) -> Result<Dataflow, StoreError> {
        let mut dataflows = self.dataflows.write().await;
        let mut sequences = self.sequences.write().await;
        sequences.insert(dataflow.id, 0);
        dataflows.insert(dataflow.id, dataflow.clone());
        Ok(dataflow)
    }

    async fn get_dataflow(&self, id: DataflowId) -> Result<Dataflow, StoreError> {
        self.dataflows
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    async fn list_dataflows(
        &self,
        filter: DataflowFilter,
        page: Page,
    ) -> Result<Vec<Dataflow>, StoreError> {
        let page = page.capped();
        let dataflows = self.dataflows.read().await;
        let mut matched: Vec<Dataflow> = dataflows
            .values()
            .filter(|d| filter.owner.as_deref().is_none_or(|o| o == d.owner))
            .filter(|d| filter.status.is_none_or(|s| s == d.status))
            .cloned()
            .collect();
        matched.sort_by_key(|d| d.created_at);
        Ok(matched.into_iter().skip(page.offset).take(page.limit).collect())
    }

    async fn update_dataflow_status(
        &self,
        id: DataflowId,
        status: DataflowStatus,
    ) -> Result<Dataflow, StoreError> {
        let mut dataflows = self.dataflows.write().await;
        let dataflow = dataflows
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        dataflow
            .transition(status)
            .map_err(|(from, to)| StoreError::InvalidPayload(format!("{from:?} -> {to:?}")))?;
        Ok(dataflow.clone())
    }

    async fn get_node(&self, id: NodeId) -> Result<Node, StoreError> {
        self.nodes
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    async fn list_nodes(
        &self,
        dataflow: DataflowId,
        filter: NodeFilter,
    ) -> Result<Vec<Node>, StoreError> {
        let nodes = self.nodes.read().await;
        Ok(nodes
            .values()
            .filter(|n| n.dataflow_id == dataflow)
            .filter(|n| {
                filter
                    .parent_node_id
                    .as_ref()
                    .is_none_or(|p| *p == n.parent_node_id)
            })
            .filter(|n| filter.status.is_none_or(|s| s == n.status))
            .filter(|n| filter.node_type.as_deref().is_none_or(|t| t == n.node_type))
            .cloned()
            .collect())
    }

    async fn get_data(&self, id: DataId, resolve_references: bool) -> Result<DataItem, StoreError> {
        let data = self.data.read().await;
        let item = data
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        if !resolve_references || !item.is_reference() {
            return Ok(item);
        }
        let target_id = item
            .reference_target()
            .ok_or_else(|| StoreError::InvalidPayload("unresolvable reference".to_string()))?;
        let target = data
            .get(&target_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(target_id.to_string()))?;
        if target.is_reference() {
            return Err(StoreError::InvalidPayload(
                "reference chain longer than one hop".to_string(),
            ));
        }
        Ok(DataItem {
            content: target.content,
            content_type: target.content_type,
            ..item
        })
    }

    async fn list_data(
        &self,
        dataflow: DataflowId,
        filter: DataFilter,
    ) -> Result<Vec<DataItem>, StoreError> {
        let data = self.data.read().await;
        Ok(data
            .values()
            .filter(|d| d.dataflow_id == dataflow)
            .filter(|d| filter.node_id.is_none_or(|n| Some(n) == d.node_id))
            .filter(|d| filter.data_type.is_none_or(|t| t == d.data_type))
            .filter(|d| filter.key.as_deref().is_none_or(|k| Some(k) == d.key.as_deref()))
            .cloned()
            .collect())
    }

    async fn append_commands(
        &self,
        dataflow: DataflowId,
        sequence_expected: u64,
        payloads: Vec<CommandPayload>,
    ) -> Result<AppliedBatch, StoreError> {
        let mut sequences = self.sequences.write().await;
        let current = *sequences.get(&dataflow).unwrap_or(&0);
        if current != sequence_expected {
            return Err(StoreError::Conflict {
                expected: sequence_expected,
                actual: current,
            });
        }

        let mut nodes = self.nodes.write().await;
        let mut data = self.data.write().await;
        let mut commands_log = self.commands.write().await;

        let mut batch = AppliedBatch::default();
        let mut seq = sequence_expected;
        for payload in payloads {
            let (node, item) = Self::apply_one(&mut nodes, &mut data, dataflow, &payload)?;
            let mut command = Command::new(dataflow, seq, payload);
            command.applied = true;
            batch.commands.push(command.clone());
            commands_log.entry(dataflow).or_default().push(command);
            if let Some(node) = node {
                batch.nodes.push(node);
            }
            if let Some(item) = item {
                batch.data.push(item);
            }
            seq += 1;
        }
        sequences.insert(dataflow, seq);
        Ok(batch)
    }

    async fn current_sequence(&self, dataflow: DataflowId) -> Result<u64, StoreError> {
        Ok(*self.sequences.read().await.get(&dataflow).unwrap_or(&0))
    }
}
