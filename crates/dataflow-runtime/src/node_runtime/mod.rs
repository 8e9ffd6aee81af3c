//! Node runtimes: the per-type execution contract the scheduler dispatches
//! into.
//!
//! Suspension does not need a hand-rolled continuation object here. Rust's
//! `async`/`await` models it natively: [`NodeFacade::yield_for`] registers a
//! wait-set with the scheduler and suspends at the `.await` point until the
//! scheduler resolves it. No thread is blocked, and the "continuation" is
//! simply the runtime's own stack state past that await.

pub mod func;
pub mod map_reduce;

use async_trait::async_trait;
use dataflow_kernel::cancellation::NodeCancellation;
use dataflow_kernel::error::EngineError;
use dataflow_kernel::ids::{DataflowId, NodeId};
use dataflow_kernel::model::data::DataType;
use dataflow_kernel::model::node::Node;
use dataflow_store::{DataFilter, Store};
use error_stack::Report;
use std::sync::Arc;
use tokio::sync::oneshot;

/// What a node runtime hands back to the scheduler.
pub enum RunOutcome {
    Complete {
        result: serde_json::Value,
        message: Option<String>,
    },
    Fail {
        code: String,
        message: String,
    },
    Canceled,
}

/// A request to suspend the current node until every id in `wait_for`
/// reaches a terminal status.
pub struct YieldRequest {
    pub parent: NodeId,
    pub wait_for: Vec<NodeId>,
    pub resume: oneshot::Sender<Vec<Node>>,
}

/// The minimal façade a runtime is given: config/inputs access, output
/// creation is left to the Data Router (the runtime just returns a result),
/// `yield_for` to suspend on children, and the node's cancellation scope.
pub struct NodeFacade {
    pub node: Node,
    pub dataflow: DataflowId,
    store: Arc<dyn Store>,
    cancellation: NodeCancellation,
    yield_tx: tokio::sync::mpsc::UnboundedSender<YieldRequest>,
}

impl NodeFacade {
    pub fn new(
        node: Node,
        dataflow: DataflowId,
        store: Arc<dyn Store>,
        cancellation: NodeCancellation,
        yield_tx: tokio::sync::mpsc::UnboundedSender<YieldRequest>,
    ) -> Self {
        Self {
            node,
            dataflow,
            store,
            cancellation,
            yield_tx,
        }
    }

    pub fn config(&self) -> &serde_json::Value {
        &self.node.config
    }

    pub fn cancellation(&self) -> &NodeCancellation {
        &self.cancellation
    }

    pub fn store(&self) -> &dyn Store {
        self.store.as_ref()
    }

    /// Deterministic input selection: `default` if present, else the
    /// empty-key item, else the sole input if exactly one exists, else a
    /// merge of all keyed inputs into one object keyed by `key`.
    pub async fn select_input(&self) -> Result<serde_json::Value, Report<EngineError>> {
        let inputs = self
            .store
            .list_data(
                self.dataflow,
                DataFilter {
                    node_id: Some(self.node.id),
                    data_type: Some(DataType::NodeInput),
                    key: None,
                },
            )
            .await
            .map_err(|e| Report::new(EngineError::Store(e)))?;

        if let Some(item) = inputs.iter().find(|i| i.key.as_deref() == Some("default")) {
            return Ok(item.content.clone());
        }
        if let Some(item) = inputs.iter().find(|i| i.key.is_none()) {
            return Ok(item.content.clone());
        }
        if inputs.len() == 1 {
            return Ok(inputs[0].content.clone());
        }
        if inputs.is_empty() {
            return Err(Report::new(EngineError::Runtime(
                dataflow_kernel::error::RuntimeError::NoInputData,
            )));
        }
        let mut merged = serde_json::Map::new();
        for item in &inputs {
            if let Some(key) = &item.key {
                merged.insert(key.clone(), item.content.clone());
            }
        }
        Ok(serde_json::Value::Object(merged))
    }

    /// Suspends this node until every id in `wait_for` is terminal, then
    /// returns their final state.
    pub async fn yield_for(&self, wait_for: Vec<NodeId>) -> Vec<Node> {
        let (resume, rx) = oneshot::channel();
        let _ = self.yield_tx.send(YieldRequest {
            parent: self.node.id,
            wait_for,
            resume,
        });
        rx.await.unwrap_or_default()
    }
}

#[async_trait]
pub trait NodeRuntime: Send + Sync {
    async fn run(&self, facade: &NodeFacade) -> RunOutcome;
}
