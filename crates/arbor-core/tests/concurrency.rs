//! Cross-thread behaviour of models and collections

use arbor_core::model::ParentLink;
use arbor_core::{
    ChildCollection, CollectionChange, CollectionId, Field, FieldName, ListenerId, Model,
    ModelBase, ModelId, Node, ObservableCollection, Phase, PropertyEvent,
};
use std::any::Any;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Barrier, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

struct CounterState {
    count: u64,
}

const COUNT: Field<CounterState, u64> = Field::new("Count", |s| &s.count, |s| &mut s.count);

struct Counter {
    base: ModelBase<CounterState>,
}

impl Counter {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            base: ModelBase::new(CounterState { count: 0 }),
        })
    }
}

impl Model for Counter {
    type State = CounterState;

    fn base(&self) -> &ModelBase<CounterState> {
        &self.base
    }
}

struct Tally {
    base: ModelBase<()>,
    changed: AtomicUsize,
}

impl Model for Tally {
    type State = ();

    fn base(&self) -> &ModelBase<()> {
        &self.base
    }

    fn on_child_property_changed(&self, _child: &Arc<dyn Node>, _field: Option<FieldName>) {
        self.changed.fetch_add(1, Ordering::SeqCst);
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[test]
fn test_concurrent_sets_never_lose_events() {
    init_tracing();
    const THREADS: u64 = 8;
    const ROUNDS: usize = 1000;

    let model = Counter::new();
    let changed = Arc::new(AtomicUsize::new(0));
    let sink = Arc::clone(&changed);
    model.subscribe_changed(move |_| {
        sink.fetch_add(1, Ordering::SeqCst);
    });

    let handles: Vec<_> = (1..=THREADS)
        .map(|tid| {
            let model = Arc::clone(&model);
            thread::spawn(move || {
                let mut transitions = 0;
                for _ in 0..ROUNDS {
                    if model.set(COUNT, tid).unwrap() {
                        transitions += 1;
                    }
                }
                transitions
            })
        })
        .collect();

    let transitions: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();

    let last = model.get(COUNT).unwrap();
    assert!((1..=THREADS).contains(&last));
    assert!(transitions >= 1);
    assert_eq!(changed.load(Ordering::SeqCst), transitions);
}

#[test]
fn test_changing_and_changed_pair_per_transition() {
    let model = Counter::new();
    let events = Arc::new(Mutex::new(Vec::<PropertyEvent>::new()));
    let sink = Arc::clone(&events);
    model.subscribe_changing(move |e| sink.lock().unwrap().push(*e));
    let sink = Arc::clone(&events);
    model.subscribe_changed(move |e| sink.lock().unwrap().push(*e));

    let handles: Vec<_> = (0..4u64)
        .map(|tid| {
            let model = Arc::clone(&model);
            thread::spawn(move || {
                (0..250u64)
                    .filter(|i| model.set(COUNT, tid * 1000 + i).unwrap())
                    .count()
            })
        })
        .collect();
    let transitions: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();

    let events = events.lock().unwrap();
    let changing = events.iter().filter(|e| e.phase == arbor_core::Phase::Changing).count();
    let changed = events.len() - changing;
    assert_eq!(changing, transitions);
    assert_eq!(changed, transitions);
    assert!(events.iter().all(|e| e.field == Some("Count")));
}

#[test]
fn test_changed_listener_can_read_from_another_thread() {
    let model = Counter::new();
    let (tx, rx) = mpsc::channel();
    let tx = Mutex::new(tx);

    let weak = Arc::downgrade(&model);
    model.subscribe_changed(move |_| {
        let Some(model) = weak.upgrade() else {
            return;
        };
        // A reader on another thread must get through while the listener runs.
        let reader = thread::spawn(move || model.get(COUNT).unwrap());
        let value = reader.join().unwrap();
        let _ = tx.lock().unwrap().send(value);
    });

    let writer = {
        let model = Arc::clone(&model);
        thread::spawn(move || model.set(COUNT, 5).unwrap())
    };

    let observed = rx
        .recv_timeout(Duration::from_secs(5))
        .expect("changed listener deadlocked against a reader");
    assert_eq!(observed, 5);
    assert!(writer.join().unwrap());
}

#[test]
fn test_parallel_registration_and_forwarding() {
    let tally = Arc::new(Tally {
        base: ModelBase::new(()),
        changed: AtomicUsize::new(0),
    });
    let children: Vec<_> = (0..32).map(|_| Counter::new()).collect();

    // Every thread registers every child; only one registration per child wins.
    let handles: Vec<_> = (0..4)
        .map(|_| {
            let tally = Arc::clone(&tally);
            let children = children.clone();
            thread::spawn(move || {
                children
                    .iter()
                    .filter(|child| tally.register_child((*child).clone()).unwrap())
                    .count()
            })
        })
        .collect();
    let registered: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
    assert_eq!(registered, 32);

    for child in &children {
        child.set(COUNT, 1).unwrap();
    }

    assert_eq!(tally.child_count(), 32);
    assert_eq!(tally.changed.load(Ordering::SeqCst), 32);

    let ids: Vec<ModelId> = children.iter().map(|c| c.id()).collect();
    let handles: Vec<_> = ids
        .chunks(8)
        .map(|chunk| {
            let tally = Arc::clone(&tally);
            let chunk = chunk.to_vec();
            thread::spawn(move || chunk.into_iter().filter(|id| tally.unregister_child(*id)).count())
        })
        .collect();
    let removed: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();

    assert_eq!(removed, 32);
    assert_eq!(tally.child_count(), 0);
    for child in &children {
        child.set(COUNT, 2).unwrap();
    }
    assert_eq!(tally.changed.load(Ordering::SeqCst), 32);
}

#[test]
fn test_concurrent_collection_mutation() {
    let tally = Arc::new(Tally {
        base: ModelBase::new(()),
        changed: AtomicUsize::new(0),
    });
    let collection = Arc::new(ObservableCollection::<Counter>::new());
    tally.register_child_collection(collection.clone()).unwrap();

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let collection = Arc::clone(&collection);
            thread::spawn(move || {
                let mut kept = Vec::new();
                for i in 0..50 {
                    let child = Counter::new();
                    collection.push(child.clone());
                    if i % 2 == 0 {
                        collection.remove(child.id());
                    } else {
                        kept.push(child);
                    }
                }
                kept
            })
        })
        .collect();
    let kept: Vec<Arc<Counter>> = handles
        .into_iter()
        .flat_map(|h| h.join().unwrap())
        .collect();

    assert_eq!(collection.len(), kept.len());
    assert_eq!(tally.child_count(), kept.len());
    for child in &kept {
        assert!(tally.is_child(child.id()));
    }
}

/// Wraps a counter and runs a one-shot hook when a parent attaches to it
struct Hooked {
    inner: Arc<Counter>,
    on_attach: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl Hooked {
    fn new(on_attach: impl FnOnce() + Send + 'static) -> Arc<Self> {
        Arc::new(Self {
            inner: Counter::new(),
            on_attach: Mutex::new(Some(Box::new(on_attach))),
        })
    }
}

impl Node for Hooked {
    fn id(&self) -> ModelId {
        self.inner.id()
    }

    fn subscribe(
        &self,
        phase: Phase,
        callback: Box<dyn Fn(&PropertyEvent) + Send + Sync>,
    ) -> ListenerId {
        self.inner.subscribe(phase, callback)
    }

    fn unsubscribe(&self, phase: Phase, id: ListenerId) -> bool {
        self.inner.unsubscribe(phase, id)
    }

    fn is_disposed(&self) -> bool {
        Node::is_disposed(&*self.inner)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn attach_parent(&self, link: ParentLink) -> arbor_core::Result<()> {
        let hook = self.on_attach.lock().unwrap().take();
        if let Some(hook) = hook {
            hook();
        }
        self.inner.attach_parent(link)
    }

    fn detach_parent(&self, parent: ModelId) -> bool {
        self.inner.detach_parent(parent)
    }

    fn release_child(&self, child: ModelId) -> bool {
        self.inner.release_child(child)
    }
}

/// Collection that removes one member right after handing out its snapshot
struct ShrinkingCollection {
    inner: ObservableCollection<Counter>,
    drop_after_snapshot: Mutex<Option<ModelId>>,
}

impl ChildCollection for ShrinkingCollection {
    fn id(&self) -> CollectionId {
        self.inner.id()
    }

    fn members(&self) -> Vec<Arc<dyn Node>> {
        let snapshot = ChildCollection::members(&self.inner);
        let doomed = self.drop_after_snapshot.lock().unwrap().take();
        if let Some(id) = doomed {
            self.inner.remove(id);
        }
        snapshot
    }

    fn contains(&self, id: ModelId) -> bool {
        self.inner.contains(id)
    }

    fn subscribe_changes(
        &self,
        callback: Box<dyn Fn(&CollectionChange) + Send + Sync>,
    ) -> ListenerId {
        self.inner.subscribe(callback)
    }

    fn unsubscribe_changes(&self, id: ListenerId) -> bool {
        self.inner.unsubscribe(id)
    }
}

fn tally() -> Arc<Tally> {
    Arc::new(Tally {
        base: ModelBase::new(()),
        changed: AtomicUsize::new(0),
    })
}

#[test]
fn test_member_removed_during_collection_registration() {
    let tally = tally();
    let (kept, dropped) = (Counter::new(), Counter::new());
    let collection = Arc::new(ShrinkingCollection {
        inner: ObservableCollection::from_items(vec![kept.clone(), dropped.clone()]),
        drop_after_snapshot: Mutex::new(Some(dropped.id())),
    });

    assert!(tally.register_child_collection(collection.clone()).unwrap());

    assert!(!collection.inner.contains(dropped.id()));
    assert!(!tally.is_child(dropped.id()));
    assert!(dropped.parents().is_empty());
    assert!(tally.is_child(kept.id()));

    dropped.set(COUNT, 1).unwrap();
    assert_eq!(tally.changed.load(Ordering::SeqCst), 0);
}

#[test]
fn test_collection_unregistered_while_member_attaches() {
    init_tracing();
    let tally = tally();
    let collection = Arc::new(ObservableCollection::<Hooked>::new());
    let collection_id = collection.id();
    assert!(tally.register_child_collection(collection.clone()).unwrap());

    let unregistering: Arc<Mutex<Option<JoinHandle<bool>>>> = Arc::new(Mutex::new(None));
    let slot = Arc::clone(&unregistering);
    let owner = Arc::clone(&tally);
    let member = Hooked::new(move || {
        let handle = thread::spawn(move || owner.unregister_child_collection(collection_id));
        // Give the other thread every chance to finish first.
        thread::sleep(Duration::from_millis(50));
        *slot.lock().unwrap() = Some(handle);
    });

    collection.push(member.clone());
    let handle = unregistering.lock().unwrap().take().unwrap();
    assert!(handle.join().unwrap());

    assert_eq!(tally.child_collection_count(), 0);
    assert!(!tally.is_child(member.id()));
    assert!(member.inner.parents().is_empty());

    member.inner.set(COUNT, 1).unwrap();
    assert_eq!(tally.changed.load(Ordering::SeqCst), 0);
}

#[test]
fn test_register_racing_unregister_keeps_links_consistent() {
    for _ in 0..200 {
        let tally = tally();
        let child = Counter::new();
        tally.register_child(child.clone()).unwrap();

        let barrier = Arc::new(Barrier::new(2));
        let registrar = {
            let (tally, child, barrier) = (tally.clone(), child.clone(), barrier.clone());
            thread::spawn(move || {
                barrier.wait();
                tally.register_child(child).unwrap();
            })
        };
        let unregistrar = {
            let (tally, barrier, id) = (tally.clone(), barrier.clone(), child.id());
            thread::spawn(move || {
                barrier.wait();
                tally.unregister_child(id);
            })
        };
        registrar.join().unwrap();
        unregistrar.join().unwrap();

        let linked = child.parents().contains(&tally.id());
        assert_eq!(tally.is_child(child.id()), linked);
        if linked {
            assert!(second_parent_rejected(&child));
        }
    }
}

/// A second parent must be refused while the first still holds the child
fn second_parent_rejected(child: &Arc<Counter>) -> bool {
    matches!(
        tally().register_child(child.clone()),
        Err(arbor_core::Error::AlreadyParented { .. })
    )
}
