//! Clones a template graph into a fresh subgraph per input item, seeds the
//! root(s) with that item, and later collects outputs.
//!
//! A fluent clone-and-register builder, repurposed from "build one dataflow"
//! into "clone N fresh node subgraphs from one template graph".

use crate::template::TemplateGraph;
use dataflow_kernel::error::RuntimeError;
use dataflow_kernel::ids::{DataId, DataflowId, NodeId};
use dataflow_kernel::model::command::CommandPayload;
use dataflow_kernel::model::data::{ContentType, DataType};
use dataflow_kernel::model::node::{Node, NodeStatus};
use dataflow_kernel::model::target::Target;
use dataflow_store::{DataFilter, Store};
use serde_json::Value;
use std::collections::HashMap;

/// One cloned instance of a template graph, seeded with one input item.
#[derive(Debug, Clone)]
pub struct Iteration {
    pub index: usize,
    /// Every clone produced for this iteration (used by `collect_results`).
    pub node_ids: Vec<NodeId>,
    /// The clones that are template roots (what the map-reduce node `yield`s on).
    pub root_ids: Vec<NodeId>,
}

pub struct IterationPlan {
    pub commands: Vec<CommandPayload>,
    pub iteration: Iteration,
}

fn rewrite_targets(config: &Value, key: &str, mapping: &HashMap<NodeId, NodeId>) -> Option<Value> {
    let arr = config.get(key)?.as_array()?;
    let rewritten: Vec<Value> = arr
        .iter()
        .filter_map(|t| serde_json::from_value::<Target>(t.clone()).ok())
        .map(|t| t.rewritten(mapping))
        .filter_map(|t| serde_json::to_value(t).ok())
        .collect();
    Some(Value::Array(rewritten))
}

fn clone_config(config: &Value, mapping: &HashMap<NodeId, NodeId>) -> Value {
    let mut cloned = config.clone();
    if let Some(obj) = cloned.as_object_mut() {
        if let Some(rewritten) = rewrite_targets(config, "data_targets", mapping) {
            obj.insert("data_targets".to_string(), rewritten);
        }
        if let Some(rewritten) = rewrite_targets(config, "error_targets", mapping) {
            obj.insert("error_targets".to_string(), rewritten);
        }
    }
    cloned
}

/// Clones every prototype in `template` with a fresh identifier, rewrites
/// intra-template target references through the old->new mapping, stamps the
/// clones with iteration metadata, and seeds each root clone with `item`
/// under `input_key`.
pub fn create_iteration(
    parent: &Node,
    template: &TemplateGraph,
    item: &Value,
    iteration_index: usize,
    input_key: &str,
) -> IterationPlan {
    let mapping: HashMap<NodeId, NodeId> = template.nodes.keys().map(|id| (*id, NodeId::new())).collect();
    let mut commands = Vec::new();
    let mut ancestor_path = parent.ancestor_path.clone();
    ancestor_path.push(parent.id);

    for (old_id, prototype) in &template.nodes {
        let new_id = mapping[old_id];
        let config = clone_config(&prototype.config, &mapping);
        let mut metadata = prototype.metadata.clone();
        if let Some(title) = metadata.get("title").and_then(|v| v.as_str()).map(str::to_string) {
            metadata.insert(
                "title".to_string(),
                Value::String(format!("{title} (#{iteration_index})")),
            );
        }
        metadata.insert("iteration".to_string(), serde_json::json!(iteration_index));
        metadata.insert("template_source".to_string(), Value::String(old_id.to_string()));

        commands.push(CommandPayload::CreateNode {
            node_id: new_id,
            node_type: prototype.node_type.clone(),
            parent_node_id: Some(parent.id),
            status: NodeStatus::Pending,
            config,
            metadata,
            ancestor_path: ancestor_path.clone(),
        });
    }

    let root_ids: Vec<NodeId> = template.roots.iter().map(|id| mapping[id]).collect();
    for &root_id in &root_ids {
        commands.push(CommandPayload::CreateData {
            data_id: DataId::new(),
            data_type: DataType::NodeInput,
            node_id: Some(root_id),
            key: Some(input_key.to_string()),
            content: item.clone(),
            content_type: ContentType::Json,
            discriminator: None,
            metadata: Default::default(),
        });
    }

    let mut node_ids: Vec<NodeId> = mapping.values().copied().collect();
    node_ids.sort();

    IterationPlan {
        commands,
        iteration: Iteration {
            index: iteration_index,
            node_ids,
            root_ids,
        },
    }
}

/// `create_batch`: iterates a contiguous slice `[start, end)` of `items`.
pub fn create_batch(
    parent: &Node,
    template: &TemplateGraph,
    items: &[Value],
    start: usize,
    end: usize,
    input_key: &str,
) -> Vec<IterationPlan> {
    items[start..end]
        .iter()
        .enumerate()
        .map(|(offset, item)| create_iteration(parent, template, item, start + offset, input_key))
        .collect()
}

/// A single collected output, when an iteration produced more than one.
#[derive(Debug, Clone, serde::Serialize)]
pub struct CollectedItem {
    pub key: Option<String>,
    pub content: Value,
    pub node_id: NodeId,
    pub discriminator: Option<String>,
}

#[derive(Debug, Clone)]
pub enum CollectedResult {
    Single(Value),
    Multiple(Vec<CollectedItem>),
}

/// Queries all `node.output` items owned by any node in the iteration,
/// dereferencing references. A lone output collapses to its bare content;
/// several outputs are returned with their key/node/discriminator attached.
pub async fn collect_results(
    store: &dyn Store,
    dataflow: DataflowId,
    iteration: &Iteration,
) -> Result<CollectedResult, RuntimeError> {
    let mut items = Vec::new();
    for &node_id in &iteration.node_ids {
        let outputs = store
            .list_data(
                dataflow,
                DataFilter {
                    node_id: Some(node_id),
                    data_type: Some(DataType::NodeOutput),
                    key: None,
                },
            )
            .await
            .map_err(|e| RuntimeError::IterationFailed(e.to_string()))?;
        for output in outputs {
            let resolved = if output.is_reference() {
                store
                    .get_data(output.id, true)
                    .await
                    .map_err(|e| RuntimeError::IterationFailed(e.to_string()))?
            } else {
                output
            };
            items.push(CollectedItem {
                key: resolved.key.clone(),
                content: resolved.content.clone(),
                node_id,
                discriminator: resolved.discriminator.clone(),
            });
        }
    }

    if items.len() == 1 {
        Ok(CollectedResult::Single(items.remove(0).content))
    } else {
        Ok(CollectedResult::Multiple(items))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dataflow_kernel::ids::DataflowId;
    use serde_json::json;
    use std::collections::HashMap as StdHashMap;

    fn template_graph_single(proto_id: NodeId, dataflow: DataflowId, parent: NodeId) -> TemplateGraph {
        let node = Node {
            id: proto_id,
            dataflow_id: dataflow,
            node_type: "func".to_string(),
            status: NodeStatus::Template,
            config: json!({"func_id": "echo"}),
            parent_node_id: Some(parent),
            ancestor_path: vec![parent],
            metadata: {
                let mut m = StdHashMap::new();
                m.insert("title".to_string(), json!("step"));
                m
            },
        };
        let mut nodes = StdHashMap::new();
        nodes.insert(proto_id, node);
        TemplateGraph {
            nodes,
            edges: StdHashMap::from([(proto_id, Default::default())]),
            roots: vec![proto_id],
        }
    }

    #[test]
    fn create_iteration_seeds_root_with_input_and_titles_the_clone() {
        let dataflow = DataflowId::new();
        let parent_id = NodeId::new();
        let parent = Node::new(dataflow, "map_reduce", json!({}));
        let proto_id = NodeId::new();
        let graph = template_graph_single(proto_id, dataflow, parent_id);

        let plan = create_iteration(&parent, &graph, &json!({"v": 1}), 2, "default");
        assert_eq!(plan.iteration.index, 2);
        assert_eq!(plan.iteration.root_ids.len(), 1);

        let create_node = plan
            .commands
            .iter()
            .find(|c| matches!(c, CommandPayload::CreateNode { .. }))
            .unwrap();
        if let CommandPayload::CreateNode { metadata, .. } = create_node {
            assert_eq!(metadata.get("title").unwrap(), &json!("step (#2)"));
            assert_eq!(metadata.get("iteration").unwrap(), &json!(2));
        }

        let create_data = plan
            .commands
            .iter()
            .find(|c| matches!(c, CommandPayload::CreateData { .. }))
            .unwrap();
        if let CommandPayload::CreateData { content, key, .. } = create_data {
            assert_eq!(content, &json!({"v": 1}));
            assert_eq!(key.as_deref(), Some("default"));
        }
    }

    #[test]
    fn create_batch_assigns_contiguous_indices() {
        let dataflow = DataflowId::new();
        let parent_id = NodeId::new();
        let parent = Node::new(dataflow, "map_reduce", json!({}));
        let proto_id = NodeId::new();
        let graph = template_graph_single(proto_id, dataflow, parent_id);
        let items = vec![json!(1), json!(2), json!(3)];
        let plans = create_batch(&parent, &graph, &items, 0, 3, "default");
        let indices: Vec<usize> = plans.iter().map(|p| p.iteration.index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
    }
}
