//! Client façade: the synchronous-looking surface external callers (the
//! CLI, and in principle an HTTP layer) drive the engine through.
//!
//! Wraps an underlying concurrently-mutated registry of "dataflows currently
//! being driven by a scheduler task" behind a plain `async fn` the caller
//! awaits once.

use crate::command_log;
use crate::registry::FunctionRegistry;
use crate::scheduler::Scheduler;
use dataflow_kernel::cancellation::DataflowCancellation;
use dataflow_kernel::error::{EngineError, EngineResult};
use dataflow_kernel::ids::DataflowId;
use dataflow_kernel::model::command::CommandPayload;
use dataflow_kernel::model::dataflow::{Dataflow, DataflowStatus};
use dataflow_kernel::model::data::DataItem;
use dataflow_kernel::model::node::{Node, NodeStatus};
use dataflow_kernel::pipeline::PipelineFnRegistry;
use dataflow_store::{DataFilter, DataflowFilter, NodeFilter, Page, Store};
use error_stack::Report;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, RwLock};

/// What `create_workflow` needs beyond the initial command batch.
#[derive(Debug, Clone, Default)]
pub struct CreateOptions {
    pub owner: String,
    pub parent_dataflow_id: Option<DataflowId>,
}

/// `execute`'s result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecuteOutcome {
    pub success: bool,
    pub status: DataflowStatus,
    pub error: Option<String>,
}

/// `cancel`'s result: whether the dataflow settled before the timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    Canceled,
    TimedOut,
}

/// A dataflow plus its nodes, the `show` response shape. `data` is only
/// populated on the full variant.
#[derive(Debug, Clone)]
pub struct DataflowDetail {
    pub dataflow: Dataflow,
    pub nodes: Vec<Node>,
    pub data: Option<Vec<DataItem>>,
}

struct RunHandle {
    cancellation: DataflowCancellation,
    terminate: Arc<AtomicBool>,
    status_rx: watch::Receiver<Option<DataflowStatus>>,
}

fn outcome_for(status: DataflowStatus) -> ExecuteOutcome {
    ExecuteOutcome {
        success: status == DataflowStatus::Completed,
        status,
        error: (status != DataflowStatus::Completed)
            .then(|| format!("dataflow ended in status {status:?}")),
    }
}

pub struct Client {
    store: Arc<dyn Store>,
    scheduler: Arc<Scheduler>,
    running: Arc<RwLock<HashMap<DataflowId, RunHandle>>>,
}

impl Client {
    pub fn new(
        store: Arc<dyn Store>,
        function_registry: Arc<dyn FunctionRegistry>,
        pipeline_registry: Arc<dyn PipelineFnRegistry + Send + Sync>,
        concurrency_cap: usize,
    ) -> Self {
        let scheduler = Arc::new(Scheduler::new(
            store.clone(),
            function_registry,
            pipeline_registry,
            concurrency_cap,
        ));
        Self {
            store,
            scheduler,
            running: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Validates nothing beyond what `Store::append_commands` itself
    /// enforces (command application is the validation: a malformed batch
    /// fails the CAS or a downstream `Node::transition`).
    pub async fn create_workflow(&self, commands: Vec<CommandPayload>, opts: CreateOptions) -> EngineResult<DataflowId> {
        let mut dataflow = Dataflow::new(opts.owner);
        dataflow.parent_dataflow_id = opts.parent_dataflow_id;
        let created = self
            .store
            .create_dataflow(dataflow)
            .await
            .map_err(|e| Report::new(EngineError::Store(e)))?;

        self.store
            .append_commands(created.id, 0, commands)
            .await
            .map_err(|e| Report::new(EngineError::Store(e)))?;

        Ok(created.id)
    }

    /// Starts (or attaches to) the scheduler for `dataflow_id` and blocks
    /// until it reaches a terminal status.
    pub async fn execute(&self, dataflow_id: DataflowId) -> EngineResult<ExecuteOutcome> {
        let current = self
            .store
            .get_dataflow(dataflow_id)
            .await
            .map_err(|e| Report::new(EngineError::Store(e)))?;
        if current.status.is_terminal() {
            return Ok(outcome_for(current.status));
        }

        let mut status_rx = {
            let mut running = self.running.write().await;
            if let Some(handle) = running.get(&dataflow_id) {
                handle.status_rx.clone()
            } else {
                let cancellation = DataflowCancellation::new();
                let terminate = Arc::new(AtomicBool::new(false));
                let (status_tx, status_rx) = watch::channel(None);
                running.insert(
                    dataflow_id,
                    RunHandle {
                        cancellation: cancellation.clone(),
                        terminate: terminate.clone(),
                        status_rx: status_rx.clone(),
                    },
                );

                let scheduler = self.scheduler.clone();
                let running_table = self.running.clone();
                tokio::spawn(async move {
                    let outcome = scheduler.run(dataflow_id, cancellation, terminate).await;
                    let status = outcome.unwrap_or(DataflowStatus::Failed);
                    let _ = status_tx.send(Some(status));
                    running_table.write().await.remove(&dataflow_id);
                });

                status_rx
            }
        };

        match status_rx.wait_for(|s| s.is_some()).await {
            Ok(guard) => {
                let status = guard.expect("checked is_some above");
                Ok(outcome_for(status))
            }
            Err(_) => Ok(ExecuteOutcome {
                success: false,
                status: DataflowStatus::Failed,
                error: Some("scheduler task ended without reporting a final status".to_string()),
            }),
        }
    }

    /// Graceful cancel: returns once every non-terminal node is `canceled`,
    /// or once `timeout` elapses first (cancellation continues regardless).
    pub async fn cancel(&self, dataflow_id: DataflowId, timeout: Duration) -> EngineResult<CancelOutcome> {
        let cancellation = {
            let running = self.running.read().await;
            running.get(&dataflow_id).map(|h| h.cancellation.clone())
        };

        let Some(cancellation) = cancellation else {
            // No scheduler is driving this dataflow; settle its rows directly
            // so that a successful cancel always leaves every node terminal.
            let nodes = self
                .store
                .list_nodes(dataflow_id, NodeFilter::default())
                .await
                .map_err(|e| Report::new(EngineError::Store(e)))?;
            let pending: Vec<CommandPayload> = nodes
                .iter()
                .filter(|n| !n.status.is_terminal() && n.status != NodeStatus::Template)
                .map(|n| CommandPayload::UpdateNodeStatus {
                    node_id: n.id,
                    status: NodeStatus::Canceled,
                    reason: Some("dataflow canceled".to_string()),
                })
                .collect();
            if !pending.is_empty() {
                command_log::append_with_retry(self.store.as_ref(), dataflow_id, pending)
                    .await
                    .map_err(|e| Report::new(EngineError::Store(e)))?;
            }
            self.store
                .update_dataflow_status(dataflow_id, DataflowStatus::Canceled)
                .await
                .map_err(|e| Report::new(EngineError::Store(e)))?;
            return Ok(CancelOutcome::Canceled);
        };
        cancellation.cancel();

        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if !self.running.read().await.contains_key(&dataflow_id) {
                return Ok(CancelOutcome::Canceled);
            }
            if tokio::time::Instant::now() >= deadline {
                return Ok(CancelOutcome::TimedOut);
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    /// Hard terminate: immediate, does not wait for workers to drain.
    pub async fn terminate(&self, dataflow_id: DataflowId) -> EngineResult<()> {
        let terminate_flag = {
            let running = self.running.read().await;
            running.get(&dataflow_id).map(|h| h.terminate.clone())
        };
        match terminate_flag {
            Some(flag) => flag.store(true, Ordering::SeqCst),
            None => {
                self.store
                    .update_dataflow_status(dataflow_id, DataflowStatus::Terminated)
                    .await
                    .map_err(|e| Report::new(EngineError::Store(e)))?;
            }
        }
        Ok(())
    }

    pub async fn list(&self, filter: DataflowFilter, page: Page) -> EngineResult<Vec<Dataflow>> {
        self.store
            .list_dataflows(filter, page)
            .await
            .map_err(|e| Report::new(EngineError::Store(e)))
    }

    /// One dataflow and its nodes; `full` additionally includes every data
    /// item the dataflow owns.
    pub async fn show(&self, dataflow_id: DataflowId, full: bool) -> EngineResult<DataflowDetail> {
        let dataflow = self
            .store
            .get_dataflow(dataflow_id)
            .await
            .map_err(|e| Report::new(EngineError::Store(e)))?;
        let nodes = self
            .store
            .list_nodes(dataflow_id, NodeFilter::default())
            .await
            .map_err(|e| Report::new(EngineError::Store(e)))?;
        let data = if full {
            Some(
                self.store
                    .list_data(dataflow_id, DataFilter::default())
                    .await
                    .map_err(|e| Report::new(EngineError::Store(e)))?,
            )
        } else {
            None
        };
        Ok(DataflowDetail { dataflow, nodes, data })
    }
}
