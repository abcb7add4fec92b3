//! Change events and listener lists

use crate::field::FieldName;
use crate::model::ModelId;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Which side of a mutation an event reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Raised before the field is written; listeners still see the old value
    Changing,
    /// Raised after the write lock is released
    Changed,
}

/// A property notification raised by a model
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PropertyEvent {
    /// Model that raised the event
    pub source: ModelId,

    /// Field that is changing or changed; `None` means any field may be stale
    pub field: Option<FieldName>,

    pub phase: Phase,
}

impl PropertyEvent {
    pub fn changing(source: ModelId, field: Option<FieldName>) -> Self {
        Self {
            source,
            field,
            phase: Phase::Changing,
        }
    }

    pub fn changed(source: ModelId, field: Option<FieldName>) -> Self {
        Self {
            source,
            field,
            phase: Phase::Changed,
        }
    }

    /// True when the event names no field (bulk reload)
    pub fn is_bulk(&self) -> bool {
        self.field.is_none()
    }
}

/// Handle returned by `subscribe`, used to unsubscribe later
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

impl std::fmt::Display for ListenerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "listener-{}", self.0)
    }
}

type Callback<E> = Arc<dyn Fn(&E) + Send + Sync>;

struct ListenerTable<E> {
    next_id: u64,
    entries: Vec<(ListenerId, Callback<E>)>,
}

/// Ordered list of callbacks for one kind of event.
///
/// `emit` copies the current handles out of the table and releases the table
/// mutex before calling any of them, so callbacks may subscribe or
/// unsubscribe re-entrantly.
pub struct Listeners<E> {
    table: Mutex<ListenerTable<E>>,
}

impl<E> Listeners<E> {
    pub fn new() -> Self {
        Self {
            table: Mutex::new(ListenerTable {
                next_id: 0,
                entries: Vec::new(),
            }),
        }
    }

    /// Add a callback at the end of the list
    pub fn subscribe(&self, callback: impl Fn(&E) + Send + Sync + 'static) -> ListenerId {
        let mut table = self.table.lock();
        table.next_id += 1;
        let id = ListenerId(table.next_id);
        table.entries.push((id, Arc::new(callback)));
        id
    }

    /// Remove a callback. Returns false if the id is unknown.
    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        let mut table = self.table.lock();
        if let Some(pos) = table.entries.iter().position(|(entry, _)| *entry == id) {
            table.entries.remove(pos);
            true
        } else {
            false
        }
    }

    /// Invoke every callback in registration order
    pub fn emit(&self, event: &E) {
        let callbacks: Vec<Callback<E>> = {
            let table = self.table.lock();
            if table.entries.is_empty() {
                return;
            }
            table.entries.iter().map(|(_, cb)| Arc::clone(cb)).collect()
        };

        for cb in &callbacks {
            cb(event);
        }
    }

    pub fn len(&self) -> usize {
        self.table.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every callback
    pub fn clear(&self) {
        self.table.lock().entries.clear();
    }
}

impl<E> Default for Listeners<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> std::fmt::Debug for Listeners<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listeners")
            .field("len", &self.len())
            .finish()
    }
}
