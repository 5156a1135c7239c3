//! Per-request scoped storage.
//!
//! Components do not share a string namespace. Each one creates its own
//! [`Slot`] once (usually at construction) and uses it as the key for its
//! per-request value. Two slots never compare equal, even for the same `T`,
//! so two instances of the same middleware cannot overwrite each other.
//!
//! ```rust
//! use strata::{Slot, Storage};
//!
//! let hits: Slot<u32> = Slot::new();
//! let mut storage = Storage::new();
//!
//! assert_eq!(storage.get(&hits), None);
//! storage.set(&hits, 3);
//! assert_eq!(storage.get(&hits), Some(&3));
//! ```

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_SLOT: AtomicU64 = AtomicU64::new(1);

/// Typed key into a [`Storage`].
///
/// The id is assigned from a process-wide counter at construction. The type
/// parameter fixes what the slot holds, so reads never need a caller-side
/// type assertion.
pub struct Slot<T> {
    id: u64,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Send + 'static> Slot<T> {
    pub fn new() -> Self {
        Self { id: NEXT_SLOT.fetch_add(1, Ordering::Relaxed), _marker: PhantomData }
    }
}

impl<T: Send + 'static> Default for Slot<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for Slot<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Slot<T> {}

impl<T> fmt::Debug for Slot<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Slot").field(&self.id).finish()
    }
}

/// Slot-keyed map of per-request values.
///
/// Not synchronised on its own; [`Context`](crate::Context) wraps it in a
/// mutex and only the request task mutates it.
#[derive(Default)]
pub struct Storage {
    values: HashMap<u64, Box<dyn Any + Send>>,
}

impl Storage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `value` under `slot`, returning the previous value if any.
    pub fn set<T: Send + 'static>(&mut self, slot: &Slot<T>, value: T) -> Option<T> {
        self.values
            .insert(slot.id, Box::new(value))
            .and_then(|old| old.downcast::<T>().ok())
            .map(|b| *b)
    }

    pub fn get<T: Send + 'static>(&self, slot: &Slot<T>) -> Option<&T> {
        self.values.get(&slot.id).and_then(|v| v.downcast_ref::<T>())
    }

    pub fn get_mut<T: Send + 'static>(&mut self, slot: &Slot<T>) -> Option<&mut T> {
        self.values.get_mut(&slot.id).and_then(|v| v.downcast_mut::<T>())
    }

    /// Returns the value under `slot`, creating it with `init` on first access.
    pub fn get_or_insert_with<T, F>(&mut self, slot: &Slot<T>, init: F) -> &mut T
    where
        T: Send + 'static,
        F: FnOnce() -> T,
    {
        let entry = self.values.entry(slot.id).or_insert_with(|| Box::new(init()));
        // The slot's type parameter fixes what was inserted under this id.
        match entry.downcast_mut::<T>() {
            Some(v) => v,
            None => unreachable!("slot {} holds a value of another type", slot.id),
        }
    }

    pub fn remove<T: Send + 'static>(&mut self, slot: &Slot<T>) -> Option<T> {
        self.values.remove(&slot.id).and_then(|v| v.downcast::<T>().ok()).map(|b| *b)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Drops every stored value.
    pub fn clear(&mut self) {
        self.values.clear();
    }
}

impl fmt::Debug for Storage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Storage").field("len", &self.values.len()).finish()
    }
}
