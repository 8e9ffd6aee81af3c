//! Shared types for the dataflow execution engine: persisted entity shapes,
//! the error taxonomy, identifiers, pipeline step evaluation, configuration,
//! and cooperative cancellation. No I/O lives here; `dataflow-store` and
//! `dataflow-runtime` build on top of these types.

pub mod agent_boundary;
pub mod cancellation;
pub mod config;
pub mod error;
pub mod ids;
pub mod model;
pub mod pipeline;

pub use error::{EngineError, EngineResult};
pub use ids::{CommandId, DataId, DataflowId, NodeId};
