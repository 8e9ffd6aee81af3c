//! Persisted entity shapes.

pub mod command;
pub mod data;
pub mod dataflow;
pub mod node;
pub mod target;

pub use command::Command;
pub use data::{ContentType, DataItem, DataType};
pub use dataflow::{Dataflow, DataflowStatus};
pub use node::{Node, NodeStatus};
pub use target::Target;
