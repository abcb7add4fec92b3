//! Observable model base and the parent/child graph
//!
//! A concrete model is a struct that owns a [`ModelBase<S>`] and implements
//! [`Model`]. All fields live in the state struct `S` behind a single
//! reader/writer lock per instance; they are addressed through [`Field`]
//! handles.
//!
//! # Locking and notification order
//!
//! [`Model::set`] takes an upgradable read lock, compares, raises the
//! changing event while still holding only the upgradable lock, upgrades to
//! write, stores the value, and then releases the lock *entirely* before the
//! changed event fires. Listeners of the changing event may `get` fields of
//! the same instance but must not `set` them.
//!
//! Graph ledgers live behind their own mutex. It is held while the child's
//! parent links and listener tables change, so registration, unregistration
//! and collection batches apply in one order, but never while listener code
//! or a parent hook runs.

use crate::collection::{ChildCollection, CollectionChange, CollectionId};
use crate::error::{Capability, Error, Result};
use crate::event::{ListenerId, Listeners, Phase, PropertyEvent};
use crate::field::{Field, FieldName};
use crate::options::{ModelOptions, ParentPolicy};
use parking_lot::{
    Mutex, RwLock, RwLockReadGuard, RwLockUpgradableReadGuard, RwLockWriteGuard,
};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use ulid::Ulid;

/// Field values handed to and received from a persistence collaborator
pub type Record = serde_json::Map<String, serde_json::Value>;

/// Identity of a model instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ModelId(pub Ulid);

impl ModelId {
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for ModelId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ModelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Back-reference from a child to one of its parents
#[doc(hidden)]
#[derive(Clone)]
pub struct ParentLink {
    id: ModelId,
    node: Weak<dyn Node>,
}

impl ParentLink {
    fn is_alive(&self) -> bool {
        self.node.strong_count() > 0
    }
}

/// Object-safe view of any model.
///
/// Every [`Model`] is a `Node` through a blanket impl, which lets one parent
/// keep heterogeneous children in a single ledger.
pub trait Node: Send + Sync + 'static {
    fn id(&self) -> ModelId;

    /// Subscribe to this node's changing or changed events
    fn subscribe(
        &self,
        phase: Phase,
        callback: Box<dyn Fn(&PropertyEvent) + Send + Sync>,
    ) -> ListenerId;

    fn unsubscribe(&self, phase: Phase, id: ListenerId) -> bool;

    fn is_disposed(&self) -> bool;

    fn as_any(&self) -> &dyn Any;

    #[doc(hidden)]
    fn attach_parent(&self, link: ParentLink) -> Result<()>;

    #[doc(hidden)]
    fn detach_parent(&self, parent: ModelId) -> bool;

    /// Drop every route to `child` (called by a child being disposed)
    #[doc(hidden)]
    fn release_child(&self, child: ModelId) -> bool;
}

impl dyn Node {
    /// Downcast to the concrete model type
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }
}

impl std::fmt::Debug for dyn Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node").field("id", &self.id()).finish()
    }
}

/// How a child ended up in a parent's ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Route {
    Direct,
    Collection(CollectionId),
}

struct Forwarding {
    changing: ListenerId,
    changed: ListenerId,
}

impl Forwarding {
    fn cancel(&self, child: &dyn Node) {
        child.unsubscribe(Phase::Changing, self.changing);
        child.unsubscribe(Phase::Changed, self.changed);
    }
}

struct ChildEntry {
    node: Arc<dyn Node>,
    direct: bool,
    via: HashSet<CollectionId>,
    forwarding: Forwarding,
}

impl ChildEntry {
    fn new(node: Arc<dyn Node>, route: Route, forwarding: Forwarding) -> Self {
        let mut entry = Self {
            node,
            direct: false,
            via: HashSet::new(),
            forwarding,
        };
        entry.add_route(route);
        entry
    }

    fn add_route(&mut self, route: Route) -> bool {
        match route {
            Route::Direct => !std::mem::replace(&mut self.direct, true),
            Route::Collection(id) => self.via.insert(id),
        }
    }

    fn remove_route(&mut self, route: Route) -> bool {
        match route {
            Route::Direct => std::mem::replace(&mut self.direct, false),
            Route::Collection(id) => self.via.remove(&id),
        }
    }

    fn has_routes(&self) -> bool {
        self.direct || !self.via.is_empty()
    }

    fn release(self, parent: ModelId) {
        self.forwarding.cancel(&*self.node);
        self.node.detach_parent(parent);
    }
}

struct CollectionEntry {
    collection: Arc<dyn ChildCollection>,
    subscription: Option<ListenerId>,
}

#[derive(Default)]
struct Ledger {
    children: HashMap<ModelId, ChildEntry>,
    collections: HashMap<CollectionId, CollectionEntry>,
}

/// Restores the notification switch when dropped
pub struct NotifyGuard<'a> {
    flag: &'a AtomicBool,
    previous: bool,
}

impl Drop for NotifyGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(self.previous, Ordering::SeqCst);
    }
}

/// State and bookkeeping shared by every model
pub struct ModelBase<S> {
    id: ModelId,
    options: ModelOptions,
    state: RwLock<S>,
    notify_enabled: AtomicBool,
    disposed: AtomicBool,
    validity: Mutex<Option<bool>>,
    dirty: Mutex<BTreeSet<FieldName>>,
    changing: Listeners<PropertyEvent>,
    changed: Listeners<PropertyEvent>,
    ledger: Mutex<Ledger>,
    parents: Mutex<Vec<ParentLink>>,
}

impl<S> ModelBase<S> {
    pub fn new(state: S) -> Self {
        Self::with_options(state, ModelOptions::default())
    }

    pub fn with_options(state: S, options: ModelOptions) -> Self {
        Self::with_id(ModelId::new(), state, options)
    }

    /// Rebuild a model under a known identity, e.g. one read back from a store
    pub fn with_id(id: ModelId, state: S, options: ModelOptions) -> Self {
        Self {
            id,
            notify_enabled: AtomicBool::new(options.notify_enabled),
            options,
            state: RwLock::new(state),
            disposed: AtomicBool::new(false),
            validity: Mutex::new(None),
            dirty: Mutex::new(BTreeSet::new()),
            changing: Listeners::new(),
            changed: Listeners::new(),
            ledger: Mutex::new(Ledger::default()),
            parents: Mutex::new(Vec::new()),
        }
    }

    pub fn id(&self) -> ModelId {
        self.id
    }

    pub fn options(&self) -> &ModelOptions {
        &self.options
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    pub fn ensure_live(&self) -> Result<()> {
        if self.is_disposed() {
            Err(Error::Disposed(self.id))
        } else {
            Ok(())
        }
    }

    pub fn notify_enabled(&self) -> bool {
        self.notify_enabled.load(Ordering::SeqCst)
    }

    pub fn set_notify_enabled(&self, enabled: bool) {
        self.notify_enabled.store(enabled, Ordering::SeqCst);
    }

    /// Switch notifications off until the returned guard is dropped
    pub fn suppress_notifications(&self) -> NotifyGuard<'_> {
        let previous = self.notify_enabled.swap(false, Ordering::SeqCst);
        NotifyGuard {
            flag: &self.notify_enabled,
            previous,
        }
    }

    /// Raise the changing event if notifications are enabled
    pub fn raise_property_changing(&self, field: Option<FieldName>) {
        if self.notify_enabled() {
            self.changing
                .emit(&PropertyEvent::changing(self.id, field));
        }
    }

    /// Raise the changed event if notifications are enabled
    pub fn raise_property_changed(&self, field: Option<FieldName>) {
        if self.notify_enabled() {
            self.changed.emit(&PropertyEvent::changed(self.id, field));
        }
    }

    /// Run `f` against the whole state under one shared lock
    pub fn read<R>(&self, f: impl FnOnce(&S) -> R) -> Result<R> {
        self.ensure_live()?;
        let state = self.read_state()?;
        Ok(f(&state))
    }

    /// Write the state directly under the write lock, raising no events.
    ///
    /// Meant for persistence collaborators inside a suppressed reload.
    pub fn overwrite<R>(&self, f: impl FnOnce(&mut S) -> R) -> Result<R> {
        self.ensure_live()?;
        let mut state = self.write_state()?;
        Ok(f(&mut state))
    }

    /// Outcome of the last `revalidate` call, if any
    pub fn is_valid(&self) -> Option<bool> {
        *self.validity.lock()
    }

    /// Fields written through `set` since the last save or reload, by name
    pub fn changed_fields(&self) -> Vec<FieldName> {
        self.dirty.lock().iter().copied().collect()
    }

    pub fn is_dirty(&self) -> bool {
        !self.dirty.lock().is_empty()
    }

    /// Forget the changed-field set, e.g. once the values are persisted
    pub fn clear_changed(&self) {
        self.dirty.lock().clear();
    }

    fn listeners(&self, phase: Phase) -> &Listeners<PropertyEvent> {
        match phase {
            Phase::Changing => &self.changing,
            Phase::Changed => &self.changed,
        }
    }

    fn timed_out(&self) -> Error {
        let timeout = self.options.lock_timeout.unwrap_or_default();
        tracing::warn!(model = %self.id, ?timeout, "field lock acquisition timed out");
        Error::LockTimeout {
            model: self.id,
            timeout,
        }
    }

    // Recursive reads keep `get` usable from a changing listener on the
    // thread that holds the upgradable lock, even with a writer queued.
    fn read_state(&self) -> Result<RwLockReadGuard<'_, S>> {
        match self.options.lock_timeout {
            None => Ok(self.state.read_recursive()),
            Some(timeout) => self
                .state
                .try_read_recursive_for(timeout)
                .ok_or_else(|| self.timed_out()),
        }
    }

    fn upgradable_state(&self) -> Result<RwLockUpgradableReadGuard<'_, S>> {
        match self.options.lock_timeout {
            None => Ok(self.state.upgradable_read()),
            Some(timeout) => self
                .state
                .try_upgradable_read_for(timeout)
                .ok_or_else(|| self.timed_out()),
        }
    }

    fn upgrade<'a>(
        &'a self,
        guard: RwLockUpgradableReadGuard<'a, S>,
    ) -> Result<RwLockWriteGuard<'a, S>> {
        match self.options.lock_timeout {
            None => Ok(RwLockUpgradableReadGuard::upgrade(guard)),
            Some(timeout) => RwLockUpgradableReadGuard::try_upgrade_for(guard, timeout)
                .map_err(|_| self.timed_out()),
        }
    }

    fn write_state(&self) -> Result<RwLockWriteGuard<'_, S>> {
        match self.options.lock_timeout {
            None => Ok(self.state.write()),
            Some(timeout) => self
                .state
                .try_write_for(timeout)
                .ok_or_else(|| self.timed_out()),
        }
    }
}

impl<S> std::fmt::Debug for ModelBase<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let ledger = self.ledger.lock();
        f.debug_struct("ModelBase")
            .field("id", &self.id)
            .field("notify_enabled", &self.notify_enabled())
            .field("disposed", &self.is_disposed())
            .field("children", &ledger.children.len())
            .field("collections", &ledger.collections.len())
            .finish()
    }
}

/// A thread-safe, notifying, graph-aware data model.
///
/// Implementors own a [`ModelBase`] and may override the hooks. Everything
/// else is provided.
pub trait Model: Send + Sync + Sized + 'static {
    type State: Send + Sync;

    fn base(&self) -> &ModelBase<Self::State>;

    // ─────────────────────────────────────────────────────────────────────────
    // Overridable hooks
    // ─────────────────────────────────────────────────────────────────────────

    /// Called before a field is written. Returning false cancels the write.
    fn on_property_changing(&self, field: FieldName) -> bool {
        self.base().raise_property_changing(Some(field));
        true
    }

    /// Called after a field is written, with no lock held
    fn on_property_changed(&self, field: Option<FieldName>) {
        self.base().raise_property_changed(field);
    }

    fn on_child_property_changing(&self, _child: &Arc<dyn Node>, _field: Option<FieldName>) {}

    fn on_child_property_changed(&self, _child: &Arc<dyn Node>, _field: Option<FieldName>) {}

    fn validate(&self) -> Result<bool> {
        Err(Error::Unsupported(Capability::Validate))
    }

    /// Expose current field values to a persistence collaborator
    fn save_record(&self) -> Result<Record> {
        Err(Error::Unsupported(Capability::Save))
    }

    /// Overwrite fields from a stored record. Runs with notifications suppressed.
    fn load_record(&self, _record: &Record) -> Result<()> {
        Err(Error::Unsupported(Capability::Reload))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Field access
    // ─────────────────────────────────────────────────────────────────────────

    fn get<T: Clone>(&self, field: Field<Self::State, T>) -> Result<T> {
        self.base().read(|state| field.read(state).clone())
    }

    fn read<R>(&self, f: impl FnOnce(&Self::State) -> R) -> Result<R> {
        self.base().read(f)
    }

    /// Store `value` if it differs from the current one.
    ///
    /// Returns `Ok(true)` when the field changed, `Ok(false)` when the value
    /// was equal or the change was vetoed.
    fn set<T: PartialEq>(&self, field: Field<Self::State, T>, value: T) -> Result<bool> {
        let base = self.base();
        base.ensure_live()?;

        let guard = base.upgradable_state()?;
        if *field.read(&guard) == value {
            return Ok(false);
        }

        if !self.on_property_changing(field.name()) {
            tracing::trace!(model = %base.id, field = field.name(), "change vetoed");
            return Ok(false);
        }

        let mut state = base.upgrade(guard)?;
        *field.write(&mut state) = value;
        base.dirty.lock().insert(field.name());
        drop(state);

        tracing::trace!(model = %base.id, field = field.name(), "field changed");
        self.on_property_changed(Some(field.name()));
        Ok(true)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Notifications
    // ─────────────────────────────────────────────────────────────────────────

    fn subscribe_changing(
        &self,
        callback: impl Fn(&PropertyEvent) + Send + Sync + 'static,
    ) -> ListenerId {
        self.base().changing.subscribe(callback)
    }

    fn subscribe_changed(
        &self,
        callback: impl Fn(&PropertyEvent) + Send + Sync + 'static,
    ) -> ListenerId {
        self.base().changed.subscribe(callback)
    }

    fn notify_enabled(&self) -> bool {
        self.base().notify_enabled()
    }

    fn set_notify_enabled(&self, enabled: bool) {
        self.base().set_notify_enabled(enabled);
    }

    fn suppress_notifications(&self) -> NotifyGuard<'_> {
        self.base().suppress_notifications()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Persistence and validation
    // ─────────────────────────────────────────────────────────────────────────

    /// Load `record` with notifications suppressed, then raise one changed
    /// event with no field name.
    fn reload(&self, record: &Record) -> Result<()> {
        self.base().ensure_live()?;
        {
            let _quiet = self.suppress_notifications();
            self.load_record(record)?;
            self.base().clear_changed();
        }
        tracing::debug!(model = %self.base().id, "reloaded");
        self.on_property_changed(None);
        Ok(())
    }

    /// Run `validate` and remember the outcome
    fn revalidate(&self) -> Result<bool> {
        self.base().ensure_live()?;
        let valid = self.validate()?;
        *self.base().validity.lock() = Some(valid);
        Ok(valid)
    }

    fn is_valid(&self) -> Option<bool> {
        self.base().is_valid()
    }

    fn changed_fields(&self) -> Vec<FieldName> {
        self.base().changed_fields()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Graph registration
    // ─────────────────────────────────────────────────────────────────────────

    /// Observe `child` directly. Returns false if it already was.
    fn register_child(self: &Arc<Self>, child: Arc<dyn Node>) -> Result<bool> {
        self.base().ensure_live()?;
        if child.id() == self.base().id {
            return Err(Error::InvalidArgument(format!(
                "model {} cannot be its own child",
                child.id()
            )));
        }
        add_route(self, child, Route::Direct)
    }

    /// Stop observing `child` directly. Returns false if it was not registered directly.
    fn unregister_child(&self, child: ModelId) -> bool {
        remove_route(self.base(), child, Route::Direct)
    }

    /// Observe a collection and every model it holds now or later
    fn register_child_collection(
        self: &Arc<Self>,
        collection: Arc<dyn ChildCollection>,
    ) -> Result<bool> {
        let base = self.base();
        base.ensure_live()?;
        let collection_id = collection.id();

        {
            let mut ledger = base.ledger.lock();
            if ledger.collections.contains_key(&collection_id) {
                return Ok(false);
            }
            ledger.collections.insert(
                collection_id,
                CollectionEntry {
                    collection: Arc::clone(&collection),
                    subscription: None,
                },
            );
        }

        let parent = Arc::downgrade(self);
        let subscription = collection.subscribe_changes(Box::new(move |change: &CollectionChange| {
            if let Some(parent) = parent.upgrade() {
                apply_collection_change(&parent, collection_id, change);
            }
        }));

        let still_registered = {
            let mut ledger = base.ledger.lock();
            match ledger.collections.get_mut(&collection_id) {
                Some(entry) => {
                    entry.subscription = Some(subscription);
                    true
                }
                None => false,
            }
        };
        if !still_registered {
            collection.unsubscribe_changes(subscription);
            return Ok(true);
        }

        tracing::debug!(parent = %base.id, collection = %collection_id, "registered child collection");

        // Members removed since the snapshot are skipped by the ledger check.
        for member in collection.members() {
            if let Err(e) = add_route(self, member, Route::Collection(collection_id)) {
                tracing::warn!(parent = %base.id, collection = %collection_id, error = %e, "skipped collection member");
            }
        }
        Ok(true)
    }

    /// Stop observing a collection and release the members that arrived through it
    fn unregister_child_collection(&self, collection: CollectionId) -> bool {
        let base = self.base();
        let (entry, members) = {
            let mut ledger = base.ledger.lock();
            let Some(entry) = ledger.collections.remove(&collection) else {
                return false;
            };
            let members: Vec<ModelId> = ledger
                .children
                .iter()
                .filter(|(_, child)| child.via.contains(&collection))
                .map(|(id, _)| *id)
                .collect();
            (entry, members)
        };

        if let Some(subscription) = entry.subscription {
            entry.collection.unsubscribe_changes(subscription);
        }
        for member in members {
            remove_route(base, member, Route::Collection(collection));
        }

        tracing::debug!(parent = %base.id, collection = %collection, "unregistered child collection");
        true
    }

    /// True if `child` is observed through any route
    fn is_child(&self, child: ModelId) -> bool {
        self.base().ledger.lock().children.contains_key(&child)
    }

    fn children(&self) -> Vec<Arc<dyn Node>> {
        self.base()
            .ledger
            .lock()
            .children
            .values()
            .map(|entry| Arc::clone(&entry.node))
            .collect()
    }

    fn child_count(&self) -> usize {
        self.base().ledger.lock().children.len()
    }

    fn child_collection_count(&self) -> usize {
        self.base().ledger.lock().collections.len()
    }

    /// Ids of the live parents observing this model
    fn parents(&self) -> Vec<ModelId> {
        self.base()
            .parents
            .lock()
            .iter()
            .filter(|link| link.is_alive())
            .map(|link| link.id)
            .collect()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Lifecycle
    // ─────────────────────────────────────────────────────────────────────────

    /// Tear the model down. Returns false if it was already disposed.
    ///
    /// Unregisters from every parent, releases every child and collection,
    /// and drops all listeners. Later field access fails with `Error::Disposed`.
    fn dispose(&self) -> bool {
        let base = self.base();
        if base.disposed.swap(true, Ordering::SeqCst) {
            return false;
        }

        let ledger = std::mem::take(&mut *base.ledger.lock());
        for (_, entry) in ledger.collections {
            if let Some(subscription) = entry.subscription {
                entry.collection.unsubscribe_changes(subscription);
            }
        }
        for (_, entry) in ledger.children {
            entry.release(base.id);
        }

        let parents = std::mem::take(&mut *base.parents.lock());
        for link in parents {
            if let Some(parent) = link.node.upgrade() {
                parent.release_child(base.id);
            }
        }

        base.changing.clear();
        base.changed.clear();
        tracing::debug!(model = %base.id, "disposed");
        true
    }
}

impl<M: Model> Node for M {
    fn id(&self) -> ModelId {
        self.base().id
    }

    fn subscribe(
        &self,
        phase: Phase,
        callback: Box<dyn Fn(&PropertyEvent) + Send + Sync>,
    ) -> ListenerId {
        self.base().listeners(phase).subscribe(callback)
    }

    fn unsubscribe(&self, phase: Phase, id: ListenerId) -> bool {
        self.base().listeners(phase).unsubscribe(id)
    }

    fn is_disposed(&self) -> bool {
        self.base().is_disposed()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn attach_parent(&self, link: ParentLink) -> Result<()> {
        let base = self.base();
        base.ensure_live()?;

        let mut parents = base.parents.lock();
        parents.retain(ParentLink::is_alive);
        if parents.iter().any(|existing| existing.id == link.id) {
            return Ok(());
        }
        if base.options.parent_policy == ParentPolicy::Single {
            if let Some(existing) = parents.first() {
                tracing::warn!(child = %base.id, parent = %existing.id, rejected = %link.id, "child already has a parent");
                return Err(Error::AlreadyParented {
                    child: base.id,
                    parent: existing.id,
                });
            }
        }
        parents.push(link);
        Ok(())
    }

    fn detach_parent(&self, parent: ModelId) -> bool {
        let mut parents = self.base().parents.lock();
        let before = parents.len();
        parents.retain(|link| link.id != parent);
        parents.len() != before
    }

    fn release_child(&self, child: ModelId) -> bool {
        let base = self.base();
        let removed = base.ledger.lock().children.remove(&child);
        match removed {
            Some(entry) => {
                entry.forwarding.cancel(&*entry.node);
                tracing::debug!(parent = %base.id, %child, "released disposed child");
                true
            }
            None => false,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Ledger maintenance
// ─────────────────────────────────────────────────────────────────────────────

// Every ledger decision and the matching parent-link change on the child
// happen under the parent's ledger lock, so concurrent register/unregister
// calls and collection batches see one consistent order. The ledger is
// always taken before any lock belonging to the child or the collection.
fn add_route<M: Model>(parent: &Arc<M>, child: Arc<dyn Node>, route: Route) -> Result<bool> {
    let base = parent.base();
    let child_id = child.id();

    let mut ledger = base.ledger.lock();
    base.ensure_live()?;

    if let Route::Collection(collection) = route {
        // The collection may have been unregistered, or the member removed,
        // since the caller looked.
        let Some(entry) = ledger.collections.get(&collection) else {
            return Ok(false);
        };
        if !entry.collection.contains(child_id) {
            return Ok(false);
        }
    }

    if let Some(entry) = ledger.children.get_mut(&child_id) {
        return Ok(entry.add_route(route));
    }

    let link: Weak<M> = Arc::downgrade(parent);
    let link: Weak<dyn Node> = link;
    child.attach_parent(ParentLink {
        id: base.id,
        node: link,
    })?;
    let forwarding = forward_from(parent, &*child);
    ledger
        .children
        .insert(child_id, ChildEntry::new(child, route, forwarding));
    drop(ledger);

    tracing::debug!(parent = %base.id, child = %child_id, ?route, "registered child");
    Ok(true)
}

fn remove_route<S>(base: &ModelBase<S>, child: ModelId, route: Route) -> bool {
    let mut ledger = base.ledger.lock();
    let Some(entry) = ledger.children.get_mut(&child) else {
        return false;
    };
    if !entry.remove_route(route) {
        return false;
    }
    if !entry.has_routes() {
        if let Some(entry) = ledger.children.remove(&child) {
            entry.release(base.id);
        }
        drop(ledger);
        tracing::debug!(parent = %base.id, %child, ?route, "unregistered child");
    }
    true
}

fn forward_from<M: Model>(parent: &Arc<M>, child: &dyn Node) -> Forwarding {
    let weak = Arc::downgrade(parent);
    let changing = child.subscribe(
        Phase::Changing,
        Box::new(move |event: &PropertyEvent| {
            if let Some(parent) = weak.upgrade() {
                forward_child_event(&*parent, event);
            }
        }),
    );

    let weak = Arc::downgrade(parent);
    let changed = child.subscribe(
        Phase::Changed,
        Box::new(move |event: &PropertyEvent| {
            if let Some(parent) = weak.upgrade() {
                forward_child_event(&*parent, event);
            }
        }),
    );

    Forwarding { changing, changed }
}

fn forward_child_event<M: Model>(parent: &M, event: &PropertyEvent) {
    // Look the child up again so nothing is forwarded once unregistration
    // has removed it from the ledger.
    let child = parent
        .base()
        .ledger
        .lock()
        .children
        .get(&event.source)
        .map(|entry| Arc::clone(&entry.node));
    let Some(child) = child else {
        return;
    };

    tracing::trace!(parent = %parent.base().id, child = %event.source, field = ?event.field, phase = ?event.phase, "forwarding child event");
    match event.phase {
        Phase::Changing => parent.on_child_property_changing(&child, event.field),
        Phase::Changed => parent.on_child_property_changed(&child, event.field),
    }
}

fn apply_collection_change<M: Model>(
    parent: &Arc<M>,
    collection: CollectionId,
    change: &CollectionChange,
) {
    let base = parent.base();
    if !base.ledger.lock().collections.contains_key(&collection) {
        return;
    }

    // Removals first: a reset lists survivors in both batches.
    for removed in &change.removed {
        remove_route(base, removed.id(), Route::Collection(collection));
    }
    for added in &change.added {
        if let Err(e) = add_route(parent, Arc::clone(added), Route::Collection(collection)) {
            tracing::warn!(parent = %base.id, %collection, error = %e, "skipped collection member");
        }
    }
}
