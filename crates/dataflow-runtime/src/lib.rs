//! Wires the Data Router, Template Graph, Iterator, per-type node runtimes,
//! Command Log recovery, Scheduler, and Client façade together into the
//! part of the engine that actually drives dataflows, on top of the types
//! and state machines in `dataflow-kernel` and the persistence contract in
//! `dataflow-store`.

pub mod client;
pub mod command_log;
pub mod iterator;
pub mod node_runtime;
pub mod registry;
pub mod router;
pub mod scheduler;
pub mod template;

pub use client::{CancelOutcome, Client, CreateOptions, DataflowDetail, ExecuteOutcome};
pub use scheduler::Scheduler;
