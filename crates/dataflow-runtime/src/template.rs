//! The template graph: a DAG of node prototypes a map-reduce node clones
//! per input item.
//!
//! Graphs must validate before they run: cycle detection happens at
//! graph-build time via DFS-with-recursion-stack, against edges derived at
//! runtime from the parent's persisted template-child configs rather than a
//! fixed, statically-declared edge set.

use dataflow_kernel::error::StructuralError;
use dataflow_kernel::ids::NodeId;
use dataflow_kernel::model::node::{Node, NodeStatus};
use dataflow_kernel::model::target::Target;
use dataflow_store::{NodeFilter, Store};
use dataflow_kernel::ids::DataflowId;
use serde_json::Value;
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone)]
pub struct TemplateGraph {
    pub nodes: HashMap<NodeId, Node>,
    pub edges: HashMap<NodeId, HashSet<NodeId>>,
    pub roots: Vec<NodeId>,
}

fn parse_target_node_ids(config: &Value, key: &str) -> Vec<NodeId> {
    config
        .get(key)
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|t| serde_json::from_value::<Target>(t.clone()).ok())
                .filter_map(|t| t.node_id)
                .collect()
        })
        .unwrap_or_default()
}

impl TemplateGraph {
    /// Fetches `parent`'s `template` children and builds the prototype DAG.
    /// Empty template sets, graphs with no roots, and cyclic graphs are all
    /// rejected.
    pub async fn build_for_node(
        store: &dyn Store,
        dataflow: DataflowId,
        parent: NodeId,
    ) -> Result<Self, StructuralError> {
        let children = store
            .list_nodes(
                dataflow,
                NodeFilter {
                    parent_node_id: Some(Some(parent)),
                    status: Some(NodeStatus::Template),
                    node_type: None,
                },
            )
            .await
            .map_err(|e| StructuralError::TemplateDiscoveryFailed(e.to_string()))?;

        if children.is_empty() {
            return Err(StructuralError::NoTemplates);
        }

        let nodes: HashMap<NodeId, Node> = children.into_iter().map(|n| (n.id, n)).collect();
        let mut edges: HashMap<NodeId, HashSet<NodeId>> =
            nodes.keys().map(|id| (*id, HashSet::new())).collect();
        let mut incoming: HashMap<NodeId, usize> = nodes.keys().map(|id| (*id, 0)).collect();

        for (id, node) in &nodes {
            let mut targets = parse_target_node_ids(&node.config, "data_targets");
            targets.extend(parse_target_node_ids(&node.config, "error_targets"));
            for target in targets {
                if nodes.contains_key(&target) {
                    if edges.get_mut(id).unwrap().insert(target) {
                        *incoming.get_mut(&target).unwrap() += 1;
                    }
                }
            }
        }

        let mut roots: Vec<NodeId> = incoming
            .iter()
            .filter(|(_, count)| **count == 0)
            .map(|(id, _)| *id)
            .collect();
        roots.sort();

        if roots.is_empty() {
            return Err(StructuralError::TemplateDiscoveryFailed(
                "Circular dependency: no root prototype (every node has an incoming edge)"
                    .to_string(),
            ));
        }

        let graph = Self { nodes, edges, roots };
        graph.detect_cycle()?;
        Ok(graph)
    }

    fn detect_cycle(&self) -> Result<(), StructuralError> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Unvisited,
            InStack,
            Done,
        }

        let mut marks: HashMap<NodeId, Mark> =
            self.nodes.keys().map(|id| (*id, Mark::Unvisited)).collect();

        fn visit(
            id: NodeId,
            edges: &HashMap<NodeId, HashSet<NodeId>>,
            marks: &mut HashMap<NodeId, Mark>,
        ) -> Result<(), StructuralError> {
            match marks.get(&id).copied().unwrap_or(Mark::Unvisited) {
                Mark::Done => return Ok(()),
                Mark::InStack => {
                    return Err(StructuralError::TemplateDiscoveryFailed(format!(
                        "Circular dependency detected at node {id}"
                    )))
                }
                Mark::Unvisited => {}
            }
            marks.insert(id, Mark::InStack);
            if let Some(targets) = edges.get(&id) {
                for &next in targets {
                    visit(next, edges, marks)?;
                }
            }
            marks.insert(id, Mark::Done);
            Ok(())
        }

        for root in &self.roots {
            visit(*root, &self.edges, &mut marks)?;
        }
        // defensive: visit anything unreachable from a root too, in case of
        // disjoint cyclic components that still happen to have roots elsewhere
        for id in self.nodes.keys() {
            visit(*id, &self.edges, &mut marks)?;
        }
        Ok(())
    }
}
