//! The durable repository contract plus an in-memory implementation. An
//! optional `sqlite` feature adds a durable backend over the same [`Store`]
//! trait.

pub mod error;
pub mod memory;
pub mod traits;

#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use error::StoreError;
pub use memory::InMemoryStore;
pub use traits::{AppliedBatch, DataFilter, DataflowFilter, NodeFilter, Page, Store};
