//! The thin boundary toward the agent subsystem: an LLM conversation
//! runner shares this repository but never participates in dataflow
//! execution. This module exists only so the boundary is a typed, explicit
//! seam rather than an implicit "nothing calls it" absence. A host
//! application that does carry an agent subsystem implements
//! [`AgentBoundary`] and the dataflow engine never needs to know it exists.

/// Marker contract for an external collaborator that must never be invoked by
/// scheduler, router, or node-runtime code. The default implementation always
/// declines, so accidentally wiring dataflow execution through the agent
/// subsystem fails fast instead of silently coupling the two.
pub trait AgentBoundary: Send + Sync {
    fn is_agent_node(&self, node_type: &str) -> bool {
        let _ = node_type;
        false
    }
}

/// The boundary used when no host application supplies its own: dataflow
/// execution never defers to an agent subsystem.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoAgentBoundary;

impl AgentBoundary for NoAgentBoundary {}
