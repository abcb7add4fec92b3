//! Arbor Storage - Persistence collaborators for observable models
//!
//! This crate provides the `DataStore` trait, an in-memory store, and the
//! save/reload bridge that drives a model's persistence hooks.

pub mod error;
pub mod memory;
pub mod persist;
pub mod traits;

pub use error::{StorageError, StorageResult};
pub use memory::MemoryStore;
pub use persist::{reload, save};
pub use traits::{DataStore, StoredRecord};
