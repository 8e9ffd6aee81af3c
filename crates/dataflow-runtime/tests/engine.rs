//! End-to-end runs through the scheduler and client: template expansion,
//! failure strategies, routing chains, and external cancellation.

use async_trait::async_trait;
use dataflow_kernel::cancellation::DataflowCancellation;
use dataflow_kernel::ids::{DataId, NodeId};
use dataflow_kernel::model::command::CommandPayload;
use dataflow_kernel::model::data::{ContentType, DataType};
use dataflow_kernel::model::dataflow::{Dataflow, DataflowStatus};
use dataflow_kernel::model::node::NodeStatus;
use dataflow_runtime::registry::{
    InMemoryFunctionRegistry, InMemoryPipelineFnRegistry, NodeFunction,
};
use dataflow_runtime::{Client, CreateOptions, Scheduler};
use dataflow_store::{DataFilter, InMemoryStore, NodeFilter, Store};
use serde_json::{json, Value};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Returns the item untouched, so template clones hand their seeded input
/// straight through as their output.
struct Pass;

#[async_trait]
impl NodeFunction for Pass {
    async fn call(
        &self,
        input: Value,
        _context: Option<Value>,
        _cancel: CancellationToken,
    ) -> Result<Value, String> {
        Ok(input)
    }
}

/// Succeeds when the item has `ok: true`, fails otherwise.
struct CheckOk;

#[async_trait]
impl NodeFunction for CheckOk {
    async fn call(
        &self,
        input: Value,
        _context: Option<Value>,
        _cancel: CancellationToken,
    ) -> Result<Value, String> {
        if input.get("ok").and_then(|v| v.as_bool()).unwrap_or(false) {
            Ok(input)
        } else {
            Err("item not ok".to_string())
        }
    }
}

fn function_registry() -> Arc<InMemoryFunctionRegistry> {
    Arc::new(
        InMemoryFunctionRegistry::with_builtins()
            .register("pass", Arc::new(Pass))
            .register("check_ok", Arc::new(CheckOk)),
    )
}

fn scheduler(store: Arc<InMemoryStore>) -> Scheduler {
    Scheduler::new(
        store,
        function_registry(),
        Arc::new(InMemoryPipelineFnRegistry::with_builtins()),
        4,
    )
}

fn create_node(
    node_id: NodeId,
    node_type: &str,
    status: NodeStatus,
    parent: Option<NodeId>,
    config: Value,
) -> CommandPayload {
    CommandPayload::CreateNode {
        node_id,
        node_type: node_type.to_string(),
        parent_node_id: parent,
        status,
        config,
        metadata: Default::default(),
        ancestor_path: parent.map(|p| vec![p]).unwrap_or_default(),
    }
}

fn seed_input(node_id: NodeId, content: Value) -> CommandPayload {
    CommandPayload::CreateData {
        data_id: DataId::new(),
        data_type: DataType::NodeInput,
        node_id: Some(node_id),
        key: Some("default".to_string()),
        content,
        content_type: ContentType::Json,
        discriminator: None,
        metadata: Default::default(),
    }
}

#[tokio::test]
async fn map_reduce_fail_fast_stops_after_the_failing_iteration() {
    let store = Arc::new(InMemoryStore::new());
    let df = store.create_dataflow(Dataflow::new("alice")).await.unwrap();
    let mr = NodeId::new();
    let template = NodeId::new();
    store
        .append_commands(
            df.id,
            0,
            vec![
                create_node(
                    mr,
                    "map_reduce",
                    NodeStatus::Pending,
                    None,
                    json!({
                        "source_array_key": "items",
                        "failure_strategy": "fail_fast",
                        "data_targets": [{"data_type": "workflow_output"}],
                    }),
                ),
                create_node(
                    template,
                    "func",
                    NodeStatus::Template,
                    Some(mr),
                    json!({"func_id": "check_ok"}),
                ),
                seed_input(mr, json!({"items": [{"ok": true}, {"ok": false}, {"ok": true}]})),
            ],
        )
        .await
        .unwrap();

    let status = scheduler(store.clone())
        .run(df.id, DataflowCancellation::new(), Arc::new(AtomicBool::new(false)))
        .await
        .unwrap();
    assert_eq!(status, DataflowStatus::Failed);

    let mr_node = store.get_node(mr).await.unwrap();
    assert_eq!(mr_node.status, NodeStatus::Failed);
    assert_eq!(
        mr_node.metadata.get("error_code").unwrap(),
        &json!("iteration_failed")
    );

    // batch_size 1: the first iteration completed, the second failed, and
    // the third was never materialized
    let clones: Vec<_> = store
        .list_nodes(df.id, NodeFilter { parent_node_id: Some(Some(mr)), ..Default::default() })
        .await
        .unwrap()
        .into_iter()
        .filter(|n| n.status != NodeStatus::Template)
        .collect();
    assert_eq!(clones.len(), 2);
    assert_eq!(
        clones.iter().filter(|n| n.status == NodeStatus::Completed).count(),
        1
    );
    assert_eq!(
        clones.iter().filter(|n| n.status == NodeStatus::Failed).count(),
        1
    );

    let outputs = store
        .list_data(
            df.id,
            DataFilter { data_type: Some(DataType::WorkflowOutput), ..Default::default() },
        )
        .await
        .unwrap();
    assert!(outputs.is_empty());
}

#[tokio::test]
async fn map_reduce_collect_errors_extracts_successes_and_sums_them() {
    let store = Arc::new(InMemoryStore::new());
    let df = store.create_dataflow(Dataflow::new("alice")).await.unwrap();
    let mr = NodeId::new();
    let template = NodeId::new();
    store
        .append_commands(
            df.id,
            0,
            vec![
                create_node(
                    mr,
                    "map_reduce",
                    NodeStatus::Pending,
                    None,
                    json!({
                        "source_array_key": "items",
                        "failure_strategy": "collect_errors",
                        "batch_size": 3,
                        "reduction_extract": "successes",
                        "reduction_steps": [
                            {"type": "map", "func_id": "extract", "context": "v"},
                            {"type": "aggregate", "func_id": "sum"},
                        ],
                        "data_targets": [{"data_type": "workflow_output"}],
                    }),
                ),
                create_node(
                    template,
                    "func",
                    NodeStatus::Template,
                    Some(mr),
                    json!({"func_id": "pass"}),
                ),
                seed_input(mr, json!({"items": [{"v": 1}, {"v": 2}, {"v": 3}]})),
            ],
        )
        .await
        .unwrap();

    let status = scheduler(store.clone())
        .run(df.id, DataflowCancellation::new(), Arc::new(AtomicBool::new(false)))
        .await
        .unwrap();
    assert_eq!(status, DataflowStatus::Completed);

    let outputs = store
        .list_data(
            df.id,
            DataFilter { data_type: Some(DataType::WorkflowOutput), ..Default::default() },
        )
        .await
        .unwrap();
    assert_eq!(outputs.len(), 1);
    assert_eq!(outputs[0].content, json!(6.0));

    // all three iterations ran to completion
    let completed_clones = store
        .list_nodes(
            df.id,
            NodeFilter {
                parent_node_id: Some(Some(mr)),
                status: Some(NodeStatus::Completed),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(completed_clones.len(), 3);
}

#[tokio::test]
async fn item_steps_filter_drops_without_failing_and_map_transforms() {
    let store = Arc::new(InMemoryStore::new());
    let pipeline_registry = Arc::new(InMemoryPipelineFnRegistry::with_builtins().register(
        "v_positive",
        |input: &Value, _ctx: Option<&Value>| {
            Ok(json!(input.get("v").and_then(|v| v.as_f64()).unwrap_or(0.0) > 0.0))
        },
    ));
    let sched = Scheduler::new(store.clone(), function_registry(), pipeline_registry, 4);

    let df = store.create_dataflow(Dataflow::new("alice")).await.unwrap();
    let mr = NodeId::new();
    let template = NodeId::new();
    store
        .append_commands(
            df.id,
            0,
            vec![
                create_node(
                    mr,
                    "map_reduce",
                    NodeStatus::Pending,
                    None,
                    json!({
                        "source_array_key": "items",
                        "batch_size": 3,
                        "item_steps": [
                            {"type": "filter", "func_id": "v_positive"},
                            {"type": "map", "func_id": "extract", "context": "v"},
                        ],
                        "reduction_extract": "successes",
                        "reduction_steps": [{"type": "aggregate", "func_id": "sum"}],
                        "data_targets": [{"data_type": "workflow_output"}],
                    }),
                ),
                create_node(
                    template,
                    "func",
                    NodeStatus::Template,
                    Some(mr),
                    json!({"func_id": "pass"}),
                ),
                seed_input(mr, json!({"items": [{"v": 1}, {"v": -2}, {"v": 3}]})),
            ],
        )
        .await
        .unwrap();

    let status = sched
        .run(df.id, DataflowCancellation::new(), Arc::new(AtomicBool::new(false)))
        .await
        .unwrap();
    // the filtered-out iteration is dropped, not failed, so the run completes
    assert_eq!(status, DataflowStatus::Completed);

    let outputs = store
        .list_data(
            df.id,
            DataFilter { data_type: Some(DataType::WorkflowOutput), ..Default::default() },
        )
        .await
        .unwrap();
    assert_eq!(outputs.len(), 1);
    assert_eq!(outputs[0].content, json!(4.0));
}

#[tokio::test]
async fn routed_output_makes_the_downstream_node_ready() {
    let store = Arc::new(InMemoryStore::new());
    let df = store.create_dataflow(Dataflow::new("alice")).await.unwrap();
    let upstream = NodeId::new();
    let downstream = NodeId::new();
    store
        .append_commands(
            df.id,
            0,
            vec![
                create_node(
                    upstream,
                    "func",
                    NodeStatus::Pending,
                    None,
                    json!({
                        "func_id": "pass",
                        "data_targets": [
                            {"data_type": "node_input", "node_id": downstream.to_string(), "key": "default"}
                        ],
                    }),
                ),
                create_node(
                    downstream,
                    "func",
                    NodeStatus::Pending,
                    None,
                    json!({
                        "func_id": "echo",
                        "data_targets": [{"data_type": "workflow_output"}],
                    }),
                ),
                seed_input(upstream, json!({"message": "chained"})),
            ],
        )
        .await
        .unwrap();

    let status = scheduler(store.clone())
        .run(df.id, DataflowCancellation::new(), Arc::new(AtomicBool::new(false)))
        .await
        .unwrap();
    assert_eq!(status, DataflowStatus::Completed);

    let outputs = store
        .list_data(
            df.id,
            DataFilter { data_type: Some(DataType::WorkflowOutput), ..Default::default() },
        )
        .await
        .unwrap();
    assert_eq!(outputs.len(), 1);
    assert_eq!(outputs[0].content, json!({"echoed": "chained"}));
}

#[tokio::test]
async fn external_cancel_leaves_every_node_terminal() {
    let store = Arc::new(InMemoryStore::new());
    let client = Arc::new(Client::new(
        store.clone(),
        function_registry(),
        Arc::new(InMemoryPipelineFnRegistry::with_builtins()),
        4,
    ));

    let node_id = NodeId::new();
    let dataflow_id = client
        .create_workflow(
            vec![
                create_node(
                    node_id,
                    "func",
                    NodeStatus::Pending,
                    None,
                    json!({
                        "func_id": "echo",
                        "data_targets": [{"data_type": "workflow_output"}],
                    }),
                ),
                seed_input(node_id, json!({"message": "hi", "delay_ms": 10_000})),
            ],
            CreateOptions { owner: "alice".into(), parent_dataflow_id: None },
        )
        .await
        .unwrap();

    let exec_client = client.clone();
    let exec = tokio::spawn(async move { exec_client.execute(dataflow_id).await });

    tokio::time::sleep(Duration::from_millis(100)).await;
    let outcome = client
        .cancel(dataflow_id, Duration::from_secs(5))
        .await
        .unwrap();
    assert_eq!(outcome, dataflow_runtime::CancelOutcome::Canceled);

    let execute_outcome = exec.await.unwrap().unwrap();
    assert!(!execute_outcome.success);
    assert_eq!(execute_outcome.status, DataflowStatus::Canceled);

    let detail = client.show(dataflow_id, false).await.unwrap();
    assert_eq!(detail.dataflow.status, DataflowStatus::Canceled);
    assert!(detail.nodes.iter().all(|n| n.status.is_terminal()));

    let outputs = store
        .list_data(
            dataflow_id,
            DataFilter { data_type: Some(DataType::WorkflowOutput), ..Default::default() },
        )
        .await
        .unwrap();
    assert!(outputs.is_empty());
}
