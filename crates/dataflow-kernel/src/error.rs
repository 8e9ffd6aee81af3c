//! Error kind taxonomy for the dataflow engine.
//!
//! Each family below corresponds to one row of the error-kind table: configuration
//! problems caught before a node runs, structural problems in a template graph,
//! runtime failures inside a node's execution, control-flow signals that terminate
//! a node without failing the dataflow, and store/backend failures. They compose
//! into [`EngineError`], which is what callers actually see, usually wrapped in an
//! [`error_stack::Report`] so context can be attached as the error crosses
//! component boundaries.

use thiserror::Error;

/// Errors surfaced while validating a node's configuration, before it runs.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigurationError {
    #[error("missing_func_id: node config has no func_id")]
    MissingFuncId,
    #[error("missing_source_array_key: map_reduce config has no source_array_key")]
    MissingSourceArrayKey,
    #[error("invalid_batch_size: {0} (must be >= 1 and <= 1000)")]
    InvalidBatchSize(usize),
    #[error("invalid_failure_strategy: {0}")]
    InvalidFailureStrategy(String),
    #[error("invalid_pipeline_step: {0}")]
    InvalidPipelineStep(String),
    #[error("invalid_extractor: {0}")]
    InvalidExtractor(String),
    #[error("incompatible_pipeline_data: step {step} expected {expected}")]
    IncompatiblePipelineData { step: String, expected: String },
}

/// Errors surfaced while discovering or validating a template graph.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StructuralError {
    #[error("no_templates: parent node has no template children")]
    NoTemplates,
    #[error("template_discovery_failed: {0}")]
    TemplateDiscoveryFailed(String),
    #[error("invalid_input_structure: {0}")]
    InvalidInputStructure(String),
}

/// Errors surfaced while a node is actually executing.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RuntimeError {
    #[error("no_input_data: node has no usable input")]
    NoInputData,
    #[error("function_execution_failed: {0}")]
    FunctionExecutionFailed(String),
    #[error("iteration_failed: {0}")]
    IterationFailed(String),
    #[error("pipeline_failed: {0}")]
    PipelineFailed(String),
    #[error("item_pipeline_failed: {0}")]
    ItemPipelineFailed(String),
}

/// Control signals: these terminate a node with status `canceled`, not `failed`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ControlError {
    #[error("function_canceled")]
    FunctionCanceled,
    #[error("node_canceled")]
    NodeCanceled,
}

/// Store/backend-level failures. Retriable for `Conflict`/`Backend`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StoreError {
    #[error("not_found: {0}")]
    NotFound(String),
    #[error("conflict: expected sequence {expected}, got {actual}")]
    Conflict { expected: u64, actual: u64 },
    #[error("invalid_payload: {0}")]
    InvalidPayload(String),
    #[error("backend: {0}")]
    Backend(String),
}

/// State-machine transition rejected by [`crate::model::node::NodeStatus`] legality checks.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TransitionError {
    #[error("invalid_transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },
}

/// The crate-wide error type. Every fallible public function in this workspace
/// returns `Result<T, error_stack::Report<EngineError>>` (aliased as [`EngineResult`]).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum EngineError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    #[error(transparent)]
    Structural(#[from] StructuralError),
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
    #[error(transparent)]
    Control(#[from] ControlError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Transition(#[from] TransitionError),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("configuration load error: {0}")]
    ConfigLoad(String),
}

pub type EngineResult<T> = Result<T, error_stack::Report<EngineError>>;
