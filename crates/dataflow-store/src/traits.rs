//! The Store contract: read queries plus a single CAS'd write
//! primitive. Every mutation goes through `append_commands`, which takes the
//! caller's expected current sequence number and rejects the batch outright
//! on mismatch. It is the same compare-and-swap shape as a registry guarded by a
//! single `RwLock` writer, just expressed as an explicit precondition
//! instead of a lock held across the call.

use async_trait::async_trait;
use dataflow_kernel::error::StoreError;
use dataflow_kernel::ids::{DataId, DataflowId, NodeId};
use dataflow_kernel::model::command::{Command, CommandPayload};
use dataflow_kernel::model::data::DataType;
use dataflow_kernel::model::dataflow::{Dataflow, DataflowStatus};
use dataflow_kernel::model::node::NodeStatus;
use dataflow_kernel::model::{DataItem, Node};

/// Page 1..100, default 10.
#[derive(Debug, Clone, Copy)]
pub struct Page {
    pub limit: usize,
    pub offset: usize,
}

impl Default for Page {
    fn default() -> Self {
        Self {
            limit: 10,
            offset: 0,
        }
    }
}

impl Page {
    pub fn capped(self) -> Self {
        Self {
            limit: self.limit.clamp(1, 100),
            offset: self.offset,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct DataflowFilter {
    pub owner: Option<String>,
    pub status: Option<DataflowStatus>,
}

#[derive(Debug, Clone, Default)]
pub struct NodeFilter {
    pub parent_node_id: Option<Option<NodeId>>,
    pub status: Option<NodeStatus>,
    pub node_type: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct DataFilter {
    pub node_id: Option<NodeId>,
    pub data_type: Option<DataType>,
    pub key: Option<String>,
}

/// Result of one `append_commands` call: the persisted command records plus
/// whatever node/data rows those commands mutated or created, so callers
/// (the scheduler) can re-scan readiness without a second round trip.
#[derive(Debug, Clone, Default)]
pub struct AppliedBatch {
    pub commands: Vec<Command>,
    pub nodes: Vec<Node>,
    pub data: Vec<DataItem>,
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn create_dataflow(&self, dataflow: Dataflow) -> Result<Dataflow, StoreError>;

    async fn get_dataflow(&self, id: DataflowId) -> Result<Dataflow, StoreError>;

    async fn list_dataflows(
        &self,
        filter: DataflowFilter,
        page: Page,
    ) -> Result<Vec<Dataflow>, StoreError>;

    async fn update_dataflow_status(
        &self,
        id: DataflowId,
        status: DataflowStatus,
    ) -> Result<Dataflow, StoreError>;

    async fn get_node(&self, id: NodeId) -> Result<Node, StoreError>;

    async fn list_nodes(
        &self,
        dataflow: DataflowId,
        filter: NodeFilter,
    ) -> Result<Vec<Node>, StoreError>;

    /// `resolve_references`: transparently dereferences `dataflow/reference`
    /// items one hop deep; a chain longer than one hop is an error rather
    /// than being silently followed.
    async fn get_data(&self, id: DataId, resolve_references: bool) -> Result<DataItem, StoreError>;

    async fn list_data(
        &self,
        dataflow: DataflowId,
        filter: DataFilter,
    ) -> Result<Vec<DataItem>, StoreError>;

    /// CAS on the per-dataflow sequence counter: `sequence_expected`
    /// must equal the store's current counter for `dataflow` or the call
    /// fails with `StoreError::Conflict`. On success every payload is
    /// applied in one transaction and the counter advances by
    /// `payloads.len()`.
    async fn append_commands(
        &self,
        dataflow: DataflowId,
        sequence_expected: u64,
        payloads: Vec<CommandPayload>,
    ) -> Result<AppliedBatch, StoreError>;

    async fn current_sequence(&self, dataflow: DataflowId) -> Result<u64, StoreError>;
}
