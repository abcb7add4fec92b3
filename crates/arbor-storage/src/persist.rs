//! Save/reload bridge between models and data stores

use crate::error::StorageResult;
use crate::traits::{DataStore, StoredRecord};
use arbor_core::{Model, Node};

/// Store the model's current field values under its id.
///
/// The model's changed-field set is cleared once the store accepts the record.
pub fn save<M: Model>(store: &dyn DataStore, model: &M) -> StorageResult<StoredRecord> {
    model.base().ensure_live()?;
    let record = model.save_record()?;
    let stored = store.put(model.id(), record)?;
    model.base().clear_changed();
    tracing::debug!(model = %model.id(), revision = stored.revision, "saved model");
    Ok(stored)
}

/// Overwrite the model from its stored record.
///
/// Returns false when the store holds nothing for the model; otherwise the
/// model raises a single changed event with no field name.
pub fn reload<M: Model>(store: &dyn DataStore, model: &M) -> StorageResult<bool> {
    let Some(stored) = store.get(model.id())? else {
        tracing::debug!(model = %model.id(), "nothing stored to reload");
        return Ok(false);
    };
    model.reload(&stored.record)?;
    tracing::debug!(model = %model.id(), revision = stored.revision, "reloaded model");
    Ok(true)
}
