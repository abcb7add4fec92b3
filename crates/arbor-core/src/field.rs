//! Explicit field identifiers
//!
//! Every lock-guarded field of a model is addressed through a [`Field`]
//! handle declared once next to the state struct:
//!
//! ```
//! use arbor_core::Field;
//!
//! struct CounterState {
//!     count: i64,
//! }
//!
//! const COUNT: Field<CounterState, i64> = Field::new("Count", |s| &s.count, |s| &mut s.count);
//! ```

use std::fmt;

/// Name carried by change events. Events with no name mean "any field may have changed".
pub type FieldName = &'static str;

/// Typed handle to one field of a state struct `S`
pub struct Field<S, T> {
    name: FieldName,
    get: fn(&S) -> &T,
    get_mut: fn(&mut S) -> &mut T,
}

impl<S, T> Field<S, T> {
    pub const fn new(name: FieldName, get: fn(&S) -> &T, get_mut: fn(&mut S) -> &mut T) -> Self {
        Self { name, get, get_mut }
    }

    pub fn name(&self) -> FieldName {
        self.name
    }

    pub(crate) fn read<'a>(&self, state: &'a S) -> &'a T {
        (self.get)(state)
    }

    pub(crate) fn write<'a>(&self, state: &'a mut S) -> &'a mut T {
        (self.get_mut)(state)
    }
}

// Manual impls: derives would demand `S: Clone` and `T: Clone`.
impl<S, T> Clone for Field<S, T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<S, T> Copy for Field<S, T> {}

impl<S, T> fmt::Debug for Field<S, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Field").field(&self.name).finish()
    }
}
