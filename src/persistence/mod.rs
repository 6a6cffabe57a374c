//! # Persistence
//!
//! Key-value capability the queue-backed provider stores execution and schedule
//! records in, plus an in-process implementation.

pub mod memory;
pub mod store;

pub use memory::InMemoryKeyValueStore;
pub use store::{KeyValueStore, KeyValueStoreExt};
