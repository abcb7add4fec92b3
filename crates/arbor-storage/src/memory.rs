//! In-memory data store

use crate::error::{StorageError, StorageResult};
use crate::traits::{DataStore, StoredRecord};
use arbor_core::{ModelId, Record};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::RwLock;

/// In-memory data store
///
/// Useful for testing and for models whose lifetime matches the process.
pub struct MemoryStore {
    records: RwLock<HashMap<ModelId, StoredRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
        }
    }

    /// Dump every stored record as a JSON array
    pub fn export_json(&self) -> StorageResult<String> {
        let records = self
            .records
            .read()
            .map_err(|e| StorageError::Database(format!("Lock error: {}", e)))?;
        let mut all: Vec<&StoredRecord> = records.values().collect();
        all.sort_by_key(|r| r.id);
        Ok(serde_json::to_string(&all)?)
    }

    /// Build a store from the output of `export_json`
    pub fn import_json(json: &str) -> StorageResult<Self> {
        let all: Vec<StoredRecord> = serde_json::from_str(json)?;
        let records = all.into_iter().map(|r| (r.id, r)).collect();
        Ok(Self {
            records: RwLock::new(records),
        })
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl DataStore for MemoryStore {
    fn put(&self, id: ModelId, record: Record) -> StorageResult<StoredRecord> {
        let mut records = self
            .records
            .write()
            .map_err(|e| StorageError::Database(format!("Lock error: {}", e)))?;
        let revision = records.get(&id).map(|r| r.revision + 1).unwrap_or(1);
        let stored = StoredRecord {
            id,
            record,
            revision,
            saved_at: Utc::now(),
        };
        records.insert(id, stored.clone());
        Ok(stored)
    }

    fn get(&self, id: ModelId) -> StorageResult<Option<StoredRecord>> {
        let records = self
            .records
            .read()
            .map_err(|e| StorageError::Database(format!("Lock error: {}", e)))?;
        Ok(records.get(&id).cloned())
    }

    fn delete(&self, id: ModelId) -> StorageResult<bool> {
        let mut records = self
            .records
            .write()
            .map_err(|e| StorageError::Database(format!("Lock error: {}", e)))?;
        Ok(records.remove(&id).is_some())
    }

    fn len(&self) -> StorageResult<usize> {
        let records = self
            .records
            .read()
            .map_err(|e| StorageError::Database(format!("Lock error: {}", e)))?;
        Ok(records.len())
    }
}
