//! Observable collections of child models

use crate::error::{Error, Result};
use crate::event::{ListenerId, Listeners};
use crate::model::{ModelId, Node};
use parking_lot::{ReentrantMutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use ulid::Ulid;

/// Identity of a collection instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CollectionId(pub Ulid);

impl CollectionId {
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for CollectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for CollectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Kind of membership change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollectionAction {
    Add,
    Remove,
    /// Bulk replacement: every prior member is reported removed and every
    /// surviving member is reported added
    Reset,
}

/// A batch of membership changes
#[derive(Clone)]
pub struct CollectionChange {
    pub source: CollectionId,
    pub action: CollectionAction,
    pub added: Vec<Arc<dyn Node>>,
    pub removed: Vec<Arc<dyn Node>>,
}

impl CollectionChange {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

impl std::fmt::Debug for CollectionChange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let ids = |nodes: &[Arc<dyn Node>]| nodes.iter().map(|n| n.id()).collect::<Vec<_>>();
        f.debug_struct("CollectionChange")
            .field("source", &self.source)
            .field("action", &self.action)
            .field("added", &ids(&self.added))
            .field("removed", &ids(&self.removed))
            .finish()
    }
}

/// Object-safe view of a collection a parent can observe
pub trait ChildCollection: Send + Sync + 'static {
    fn id(&self) -> CollectionId;

    /// Current members, in order
    fn members(&self) -> Vec<Arc<dyn Node>>;

    fn contains(&self, id: ModelId) -> bool;

    fn subscribe_changes(
        &self,
        callback: Box<dyn Fn(&CollectionChange) + Send + Sync>,
    ) -> ListenerId;

    fn unsubscribe_changes(&self, id: ListenerId) -> bool;
}

/// Ordered set of models, keyed by identity, that reports membership changes.
///
/// Change batches are raised after the item lock is released. Mutations and
/// their batches are sequenced so listeners observe them in mutation order.
pub struct ObservableCollection<M: Node> {
    id: CollectionId,
    items: RwLock<Vec<Arc<M>>>,
    sequencer: ReentrantMutex<()>,
    listeners: Listeners<CollectionChange>,
}

impl<M: Node> ObservableCollection<M> {
    pub fn new() -> Self {
        Self {
            id: CollectionId::new(),
            items: RwLock::new(Vec::new()),
            sequencer: ReentrantMutex::new(()),
            listeners: Listeners::new(),
        }
    }

    /// Build a collection, dropping repeated models
    pub fn from_items(items: impl IntoIterator<Item = Arc<M>>) -> Self {
        let collection = Self::new();
        {
            let mut slot = collection.items.write();
            for item in items {
                if !slot.iter().any(|existing| existing.id() == item.id()) {
                    slot.push(item);
                }
            }
        }
        collection
    }

    pub fn id(&self) -> CollectionId {
        self.id
    }

    /// Append a model. Returns false if it is already a member.
    pub fn push(&self, item: Arc<M>) -> bool {
        let _order = self.sequencer.lock();
        {
            let mut items = self.items.write();
            if items.iter().any(|existing| existing.id() == item.id()) {
                return false;
            }
            items.push(Arc::clone(&item));
        }
        self.emit(CollectionAction::Add, vec![erase(item)], Vec::new());
        true
    }

    pub fn insert(&self, index: usize, item: Arc<M>) -> Result<bool> {
        let _order = self.sequencer.lock();
        {
            let mut items = self.items.write();
            if index > items.len() {
                return Err(Error::InvalidArgument(format!(
                    "insert index {} out of bounds for collection of {}",
                    index,
                    items.len()
                )));
            }
            if items.iter().any(|existing| existing.id() == item.id()) {
                return Ok(false);
            }
            items.insert(index, Arc::clone(&item));
        }
        self.emit(CollectionAction::Add, vec![erase(item)], Vec::new());
        Ok(true)
    }

    /// Append several models as one batch. Returns how many were new.
    pub fn extend(&self, new_items: impl IntoIterator<Item = Arc<M>>) -> usize {
        let _order = self.sequencer.lock();
        let mut added = Vec::new();
        {
            let mut items = self.items.write();
            for item in new_items {
                if !items.iter().any(|existing| existing.id() == item.id()) {
                    items.push(Arc::clone(&item));
                    added.push(erase(item));
                }
            }
        }
        let count = added.len();
        self.emit(CollectionAction::Add, added, Vec::new());
        count
    }

    pub fn remove(&self, id: ModelId) -> Option<Arc<M>> {
        let _order = self.sequencer.lock();
        let removed = {
            let mut items = self.items.write();
            let pos = items.iter().position(|item| item.id() == id)?;
            items.remove(pos)
        };
        self.emit(CollectionAction::Remove, Vec::new(), vec![erase(Arc::clone(&removed))]);
        Some(removed)
    }

    pub fn remove_at(&self, index: usize) -> Option<Arc<M>> {
        let _order = self.sequencer.lock();
        let removed = {
            let mut items = self.items.write();
            if index >= items.len() {
                return None;
            }
            items.remove(index)
        };
        self.emit(CollectionAction::Remove, Vec::new(), vec![erase(Arc::clone(&removed))]);
        Some(removed)
    }

    /// Keep only the models matching `keep`. Returns how many were removed.
    pub fn retain(&self, mut keep: impl FnMut(&Arc<M>) -> bool) -> usize {
        let _order = self.sequencer.lock();
        // `keep` runs without the item lock so it may read this collection.
        let doomed: HashSet<ModelId> = self
            .items()
            .iter()
            .filter(|item| !keep(item))
            .map(|item| item.id())
            .collect();
        if doomed.is_empty() {
            return 0;
        }

        let mut removed = Vec::new();
        self.items.write().retain(|item| {
            if doomed.contains(&item.id()) {
                removed.push(erase(Arc::clone(item)));
                false
            } else {
                true
            }
        });
        let count = removed.len();
        self.emit(CollectionAction::Remove, Vec::new(), removed);
        count
    }

    /// Remove every model. Returns how many there were.
    pub fn clear(&self) -> usize {
        let _order = self.sequencer.lock();
        let previous = std::mem::take(&mut *self.items.write());
        let count = previous.len();
        self.emit(
            CollectionAction::Reset,
            Vec::new(),
            previous.into_iter().map(erase).collect(),
        );
        count
    }

    /// Replace the whole membership in one reset batch
    pub fn replace(&self, new_items: impl IntoIterator<Item = Arc<M>>) {
        let _order = self.sequencer.lock();
        let mut next: Vec<Arc<M>> = Vec::new();
        for item in new_items {
            if !next.iter().any(|existing| existing.id() == item.id()) {
                next.push(item);
            }
        }
        let added = next.iter().cloned().map(erase).collect();
        let previous = std::mem::replace(&mut *self.items.write(), next);
        self.emit(
            CollectionAction::Reset,
            added,
            previous.into_iter().map(erase).collect(),
        );
    }

    pub fn len(&self) -> usize {
        self.items.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.read().is_empty()
    }

    pub fn contains(&self, id: ModelId) -> bool {
        self.items.read().iter().any(|item| item.id() == id)
    }

    pub fn get(&self, index: usize) -> Option<Arc<M>> {
        self.items.read().get(index).cloned()
    }

    /// Snapshot of the current members
    pub fn items(&self) -> Vec<Arc<M>> {
        self.items.read().clone()
    }

    pub fn subscribe(
        &self,
        callback: impl Fn(&CollectionChange) + Send + Sync + 'static,
    ) -> ListenerId {
        self.listeners.subscribe(callback)
    }

    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        self.listeners.unsubscribe(id)
    }

    fn emit(
        &self,
        action: CollectionAction,
        added: Vec<Arc<dyn Node>>,
        removed: Vec<Arc<dyn Node>>,
    ) {
        let change = CollectionChange {
            source: self.id,
            action,
            added,
            removed,
        };
        if change.is_empty() {
            return;
        }
        tracing::trace!(collection = %self.id, ?change, "collection changed");
        self.listeners.emit(&change);
    }
}

impl<M: Node> Default for ObservableCollection<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M: Node> std::fmt::Debug for ObservableCollection<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObservableCollection")
            .field("id", &self.id)
            .field("len", &self.len())
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

impl<M: Node> ChildCollection for ObservableCollection<M> {
    fn id(&self) -> CollectionId {
        self.id
    }

    fn members(&self) -> Vec<Arc<dyn Node>> {
        self.items.read().iter().cloned().map(erase).collect()
    }

    fn contains(&self, id: ModelId) -> bool {
        ObservableCollection::contains(self, id)
    }

    fn subscribe_changes(
        &self,
        callback: Box<dyn Fn(&CollectionChange) + Send + Sync>,
    ) -> ListenerId {
        self.listeners.subscribe(callback)
    }

    fn unsubscribe_changes(&self, id: ListenerId) -> bool {
        self.listeners.unsubscribe(id)
    }
}

fn erase<M: Node>(item: Arc<M>) -> Arc<dyn Node> {
    item
}
