//! Store-level error kinds: the four kinds the Store
//! contract actually distinguishes. Defined once in `dataflow-kernel` so both
//! this crate and `dataflow-runtime` share the same type without a
//! dependency cycle; re-exported here under the name the Store trait's docs
//! use.

pub use dataflow_kernel::error::StoreError;
