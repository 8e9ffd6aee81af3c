//! The scheduler: the single writer per dataflow. Drives ready nodes to
//! completion, honors `yield` suspension, and applies external
//! cancel/terminate.
//!
//! One struct scoped to a single dataflow at a time: a node registry plus a
//! ready queue, a running set, and a suspension table, driven by an internal
//! mpsc channel that worker tasks send yield requests over rather than
//! mutating scheduler state directly.

use crate::command_log::{self, append_with_retry, has_satisfied_inputs};
use crate::node_runtime::{func::FuncRuntime, map_reduce::MapReduceRuntime, NodeFacade, NodeRuntime, RunOutcome, YieldRequest};
use crate::registry::FunctionRegistry;
use crate::router::{self, RouteOutcome};
use dataflow_kernel::cancellation::{DataflowCancellation, NodeCancellation};
use dataflow_kernel::error::{EngineError, EngineResult};
use dataflow_kernel::ids::{DataflowId, NodeId};
use dataflow_kernel::model::command::CommandPayload;
use dataflow_kernel::model::dataflow::DataflowStatus;
use dataflow_kernel::model::node::{Node, NodeStatus};
use dataflow_kernel::pipeline::PipelineFnRegistry;
use dataflow_store::{NodeFilter, Store};
use error_stack::Report;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinSet;
use tracing::{debug, info, instrument, warn};

struct Suspension {
    /// Still-outstanding ids; drained to empty as children complete.
    remaining: HashSet<NodeId>,
    /// The full set awaited, kept around so resolution can re-fetch every
    /// node in the batch, not just the one whose completion emptied
    /// `remaining`.
    all: HashSet<NodeId>,
    resume: oneshot::Sender<Vec<Node>>,
}

pub struct Scheduler {
    store: Arc<dyn Store>,
    function_registry: Arc<dyn FunctionRegistry>,
    pipeline_registry: Arc<dyn PipelineFnRegistry + Send + Sync>,
    concurrency_cap: usize,
}

impl Scheduler {
    pub fn new(
        store: Arc<dyn Store>,
        function_registry: Arc<dyn FunctionRegistry>,
        pipeline_registry: Arc<dyn PipelineFnRegistry + Send + Sync>,
        concurrency_cap: usize,
    ) -> Self {
        Self {
            store,
            function_registry,
            pipeline_registry,
            concurrency_cap,
        }
    }

    /// Runs a freshly-created dataflow: seeds the ready queue from its
    /// currently-pending nodes with satisfied inputs, then drives the loop
    /// until nothing is pending or running.
    #[instrument(skip(self, cancellation, terminate), fields(%dataflow))]
    pub async fn run(
        &self,
        dataflow: DataflowId,
        cancellation: DataflowCancellation,
        terminate: Arc<AtomicBool>,
    ) -> EngineResult<DataflowStatus> {
        self.store
            .update_dataflow_status(dataflow, DataflowStatus::Running)
            .await
            .map_err(|e| Report::new(EngineError::Store(e)))?;

        let pending = self
            .store
            .list_nodes(
                dataflow,
                NodeFilter {
                    status: Some(NodeStatus::Pending),
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| Report::new(EngineError::Store(e)))?;

        let mut ready = VecDeque::new();
        for node in pending {
            if has_satisfied_inputs(self.store.as_ref(), dataflow, node.id)
                .await
                .map_err(|e| Report::new(EngineError::Store(e)))?
            {
                ready.push_back(node.id);
            }
        }

        self.drive(dataflow, ready, cancellation, terminate).await
    }

    /// Resumes a dataflow whose owning process restarted. Suspended parents
    /// cannot be resumed mid-continuation across a process boundary (their
    /// awaiting future is gone with the old process), so they are
    /// re-dispatched from scratch; node functions are required to be
    /// idempotent, which makes re-running a parent's setup safe.
    #[instrument(skip(self, cancellation, terminate), fields(%dataflow))]
    pub async fn resume(
        &self,
        dataflow: DataflowId,
        cancellation: DataflowCancellation,
        terminate: Arc<AtomicBool>,
    ) -> EngineResult<DataflowStatus> {
        let recovered = command_log::replay(self.store.as_ref(), dataflow)
            .await
            .map_err(|e| Report::new(EngineError::Store(e)))?;

        let mut ready: VecDeque<NodeId> = recovered.ready.into();
        for parent in recovered.suspensions.into_keys() {
            ready.push_back(parent);
        }

        self.drive(dataflow, ready, cancellation, terminate).await
    }

    async fn drive(
        &self,
        dataflow: DataflowId,
        mut ready: VecDeque<NodeId>,
        cancellation: DataflowCancellation,
        terminate: Arc<AtomicBool>,
    ) -> EngineResult<DataflowStatus> {
        let mut running: JoinSet<NodeId> = JoinSet::new();
        let mut running_ids: HashSet<NodeId> = HashSet::new();
        let mut waiting: HashMap<NodeId, Suspension> = HashMap::new();
        let (yield_tx, mut yield_rx) = mpsc::unbounded_channel::<YieldRequest>();

        loop {
            if terminate.load(Ordering::SeqCst) {
                warn!(%dataflow, "terminating without draining workers");
                running.abort_all();
                self.store
                    .update_dataflow_status(dataflow, DataflowStatus::Terminated)
                    .await
                    .map_err(|e| Report::new(EngineError::Store(e)))?;
                return Ok(DataflowStatus::Terminated);
            }

            if cancellation.is_canceled() {
                self.cancel_pending(dataflow, &mut ready).await?;
                if running.is_empty() {
                    self.store
                        .update_dataflow_status(dataflow, DataflowStatus::Canceled)
                        .await
                        .map_err(|e| Report::new(EngineError::Store(e)))?;
                    return Ok(DataflowStatus::Canceled);
                }
            } else {
                while running.len() < self.concurrency_cap {
                    let Some(node_id) = ready.pop_front() else { break };
                    if running_ids.contains(&node_id) {
                        continue;
                    }
                    running_ids.insert(node_id);
                    debug!(%dataflow, node = %node_id, "dispatching node");
                    self.spawn_worker(dataflow, node_id, cancellation.node_token(), yield_tx.clone(), &mut running);
                }
            }

            if running.is_empty() && ready.is_empty() {
                break;
            }

            tokio::select! {
                Some(joined) = running.join_next(), if !running.is_empty() => {
                    let node_id = joined.map_err(|e| Report::new(EngineError::Store(
                        dataflow_kernel::error::StoreError::Backend(format!("worker task panicked: {e}")),
                    )))?;
                    running_ids.remove(&node_id);
                    self.handle_completion(dataflow, node_id, &mut ready, &mut waiting).await?;
                }
                Some(req) = yield_rx.recv() => {
                    debug!(%dataflow, parent = %req.parent, children = req.wait_for.len(), "node yielded, suspending until children settle");
                    for id in &req.wait_for {
                        if !running_ids.contains(id) {
                            ready.push_back(*id);
                        }
                    }
                    let wait_set: HashSet<NodeId> = req.wait_for.into_iter().collect();
                    waiting.insert(
                        req.parent,
                        Suspension {
                            remaining: wait_set.clone(),
                            all: wait_set,
                            resume: req.resume,
                        },
                    );
                }
                else => break,
            }
        }

        self.finalize_status(dataflow, cancellation.is_canceled()).await
    }

    fn spawn_worker(
        &self,
        dataflow: DataflowId,
        node_id: NodeId,
        node_cancel: NodeCancellation,
        yield_tx: mpsc::UnboundedSender<YieldRequest>,
        running: &mut JoinSet<NodeId>,
    ) {
        let store = self.store.clone();
        let function_registry = self.function_registry.clone();
        let pipeline_registry = self.pipeline_registry.clone();
        running.spawn(async move {
            let node = match store.get_node(node_id).await {
                Ok(n) => n,
                Err(e) => {
                    warn!(%dataflow, node = %node_id, error = %e, "dispatched node vanished before its worker started");
                    return node_id;
                }
            };

            if let Err(e) = append_with_retry(
                store.as_ref(),
                dataflow,
                vec![CommandPayload::UpdateNodeStatus {
                    node_id,
                    status: NodeStatus::Running,
                    reason: None,
                }],
            )
            .await
            {
                warn!(%dataflow, node = %node_id, error = %e, "could not mark node running");
                return node_id;
            }

            let runtime: Option<Arc<dyn NodeRuntime>> = match node.node_type.as_str() {
                "func" => Some(Arc::new(FuncRuntime::new(function_registry))),
                "map_reduce" => Some(Arc::new(MapReduceRuntime::new(pipeline_registry))),
                _ => None,
            };
            let Some(runtime) = runtime else {
                let outcome = RunOutcome::Fail {
                    code: "unknown_node_type".to_string(),
                    message: format!("no runtime registered for node type {}", node.node_type),
                };
                return finish(store, dataflow, node, outcome).await;
            };

            let facade = NodeFacade::new(node.clone(), dataflow, store.clone(), node_cancel.clone(), yield_tx);
            let outcome = tokio::select! {
                o = runtime.run(&facade) => o,
                _ = node_cancel.canceled() => RunOutcome::Canceled,
            };
            finish(store, dataflow, node, outcome).await
        });
    }

    async fn handle_completion(
        &self,
        dataflow: DataflowId,
        node_id: NodeId,
        ready: &mut VecDeque<NodeId>,
        waiting: &mut HashMap<NodeId, Suspension>,
    ) -> EngineResult<()> {
        let mut resolved = Vec::new();
        for (parent, suspension) in waiting.iter_mut() {
            suspension.remaining.remove(&node_id);
            if suspension.remaining.is_empty() {
                resolved.push(*parent);
            }
        }
        for parent in resolved {
            if let Some(suspension) = waiting.remove(&parent) {
                let mut terminal_nodes = Vec::new();
                for id in &suspension.all {
                    if let Ok(n) = self.store.get_node(*id).await {
                        terminal_nodes.push(n);
                    }
                }
                let _ = suspension.resume.send(terminal_nodes);
                if !ready.contains(&parent) {
                    ready.push_back(parent);
                }
            }
        }

        let pending = self
            .store
            .list_nodes(
                dataflow,
                NodeFilter {
                    status: Some(NodeStatus::Pending),
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| Report::new(EngineError::Store(e)))?;
        for node in pending {
            if ready.contains(&node.id) {
                continue;
            }
            if has_satisfied_inputs(self.store.as_ref(), dataflow, node.id)
                .await
                .map_err(|e| Report::new(EngineError::Store(e)))?
            {
                ready.push_back(node.id);
            }
        }
        Ok(())
    }

    async fn cancel_pending(&self, dataflow: DataflowId, ready: &mut VecDeque<NodeId>) -> EngineResult<()> {
        let pending = self
            .store
            .list_nodes(
                dataflow,
                NodeFilter {
                    status: Some(NodeStatus::Pending),
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| Report::new(EngineError::Store(e)))?;
        if pending.is_empty() {
            ready.clear();
            return Ok(());
        }
        let mut commands = Vec::with_capacity(pending.len());
        for node in &pending {
            commands.push(CommandPayload::UpdateNodeStatus {
                node_id: node.id,
                status: NodeStatus::Canceled,
                reason: Some("dataflow canceled".to_string()),
            });
        }
        append_with_retry(self.store.as_ref(), dataflow, commands)
            .await
            .map_err(|e| Report::new(EngineError::Store(e)))?;
        ready.clear();
        Ok(())
    }

    /// Final dataflow status once nothing is pending or running: `failed` if
    /// any root-level node failed, else `canceled` if a graceful cancel
    /// drained to completion, else `completed`.
    async fn finalize_status(&self, dataflow: DataflowId, was_canceled: bool) -> EngineResult<DataflowStatus> {
        let nodes = self
            .store
            .list_nodes(dataflow, NodeFilter::default())
            .await
            .map_err(|e| Report::new(EngineError::Store(e)))?;

        let any_root_failed = nodes
            .iter()
            .any(|n| n.parent_node_id.is_none() && n.status == NodeStatus::Failed);

        let final_status = if any_root_failed {
            DataflowStatus::Failed
        } else if was_canceled {
            DataflowStatus::Canceled
        } else {
            DataflowStatus::Completed
        };

        self.store
            .update_dataflow_status(dataflow, final_status)
            .await
            .map_err(|e| Report::new(EngineError::Store(e)))?;
        info!(%dataflow, status = ?final_status, "dataflow settled");
        Ok(final_status)
    }
}

/// Persists one worker's terminal outcome: routed artifacts plus the status
/// change, as a single command batch.
async fn finish(store: Arc<dyn Store>, dataflow: DataflowId, node: Node, outcome: RunOutcome) -> NodeId {
    let node_id = node.id;
    let commands_result = match outcome {
        RunOutcome::Complete { result, .. } => {
            router::route(store.as_ref(), &node, dataflow, RouteOutcome::Success(result)).await
        }
        RunOutcome::Fail { code, message } => {
            router::route(store.as_ref(), &node, dataflow, RouteOutcome::Failure { code, message }).await
        }
        RunOutcome::Canceled => Ok(vec![CommandPayload::UpdateNodeStatus {
            node_id,
            status: NodeStatus::Canceled,
            reason: Some("node canceled".to_string()),
        }]),
    };

    match commands_result {
        Ok(commands) => {
            if let Err(e) = append_with_retry(store.as_ref(), dataflow, commands).await {
                warn!(%dataflow, node = %node_id, error = %e, "could not persist node outcome");
            }
        }
        Err(e) => warn!(%dataflow, node = %node_id, error = %e, "routing node outcome failed"),
    }

    node_id
}
