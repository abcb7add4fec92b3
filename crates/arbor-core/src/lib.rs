//! Arbor Core - Thread-safe observable models
//!
//! This crate provides the model base, field handles, change events and
//! child collections used to build observable parent/child model graphs.

pub mod collection;
pub mod error;
pub mod event;
pub mod field;
pub mod model;
pub mod options;

pub use collection::{
    ChildCollection, CollectionAction, CollectionChange, CollectionId, ObservableCollection,
};
pub use error::{Capability, Error, Result};
pub use event::{ListenerId, Listeners, Phase, PropertyEvent};
pub use field::{Field, FieldName};
pub use model::{Model, ModelBase, ModelId, Node, NotifyGuard, Record};
pub use options::{ModelOptions, ParentPolicy};
