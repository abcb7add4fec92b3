//! Data store trait definitions

use crate::error::StorageResult;
use arbor_core::{ModelId, Record};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A record as held by a store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRecord {
    pub id: ModelId,

    /// Field values as exposed by the model
    pub record: Record,

    /// Incremented on every save of the same model
    pub revision: u64,

    pub saved_at: DateTime<Utc>,
}

/// Trait for backing stores a model can be saved to and reloaded from
pub trait DataStore: Send + Sync {
    /// Store the record for a model, replacing any previous one
    fn put(&self, id: ModelId, record: Record) -> StorageResult<StoredRecord>;

    /// Get the stored record for a model
    fn get(&self, id: ModelId) -> StorageResult<Option<StoredRecord>>;

    /// Delete the record for a model. Returns false if there was none.
    fn delete(&self, id: ModelId) -> StorageResult<bool>;

    fn contains(&self, id: ModelId) -> StorageResult<bool> {
        Ok(self.get(id)?.is_some())
    }

    fn len(&self) -> StorageResult<usize>;

    fn is_empty(&self) -> StorageResult<bool> {
        Ok(self.len()? == 0)
    }
}
