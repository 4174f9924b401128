//! Extension store
//!
//! Typed keys, a typed value map, and the append-only registry that plugins
//! contribute to while a runner is being built.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

/// Typed token identifying a slot in a [`TypedMap`] or [`ExtensionStore`]
pub struct Key<T> {
    name: &'static str,
    _marker: PhantomData<fn() -> T>,
}

/// Key of a builder extension point
pub type ExtensionKey<T> = Key<T>;
/// Key of per-node or per-context plugin state
pub type ScopeKey<T> = Key<T>;
/// Key of a node option
pub type OptionKey<T> = Key<T>;
/// Key of a named test parameter
pub type ParamKey<T> = Key<T>;
/// Key of a global value
pub type GlobalKey<T> = Key<T>;

impl<T> Key<T> {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            _marker: PhantomData,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl<T: 'static> Key<T> {
    pub fn id(&self) -> KeyId {
        KeyId {
            name: self.name,
            type_id: TypeId::of::<T>(),
        }
    }
}

impl<T> Clone for Key<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Key<T> {}

impl<T> fmt::Debug for Key<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Key({})", self.name)
    }
}

/// Identity of a key: its name together with its value type
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct KeyId {
    name: &'static str,
    type_id: TypeId,
}

type Value = Arc<dyn Any + Send + Sync>;

/// Map from typed keys to values of the key's type
#[derive(Clone, Default)]
pub struct TypedMap {
    values: HashMap<KeyId, Value>,
}

impl TypedMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert<T: Send + Sync + 'static>(&mut self, key: &Key<T>, value: T) {
        self.values.insert(key.id(), Arc::new(value));
    }

    pub fn get<T: 'static>(&self, key: &Key<T>) -> Option<&T> {
        self.values.get(&key.id()).and_then(|v| v.downcast_ref())
    }

    pub fn contains<T: 'static>(&self, key: &Key<T>) -> bool {
        self.values.contains_key(&key.id())
    }

    pub fn remove<T: 'static>(&mut self, key: &Key<T>) -> bool {
        self.values.remove(&key.id()).is_some()
    }

    /// Copy every entry of `other` into this map
    pub fn extend(&mut self, other: &TypedMap) {
        for (id, value) in &other.values {
            self.values.insert(*id, value.clone());
        }
    }

    /// Replace the value under `key` with an updated clone of it
    pub fn update<T, F>(&mut self, key: &Key<T>, update: F)
    where
        T: Clone + Default + Send + Sync + 'static,
        F: FnOnce(&mut T),
    {
        let mut value = self.get(key).cloned().unwrap_or_default();
        update(&mut value);
        self.insert(key, value);
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl fmt::Debug for TypedMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set()
            .entries(self.values.keys().map(|k| k.name))
            .finish()
    }
}

/// Append-only registry of plugin contributions.
///
/// Each key holds an ordered list; `freeze` consumes the store so nothing
/// can be added once a runner exists.
#[derive(Clone, Default)]
pub struct ExtensionStore {
    entries: HashMap<KeyId, Vec<Value>>,
}

impl ExtensionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add<T: Send + Sync + 'static>(&mut self, key: &ExtensionKey<T>, value: T) {
        self.entries
            .entry(key.id())
            .or_default()
            .push(Arc::new(value));
    }

    /// Contributed values in registration order; empty if none
    pub fn get<T: 'static>(&self, key: &ExtensionKey<T>) -> Vec<&T> {
        lookup(&self.entries, key)
    }

    /// Independent snapshot of the store
    pub fn copy(&self) -> Self {
        self.clone()
    }

    pub fn freeze(self) -> FrozenExtensions {
        FrozenExtensions {
            entries: self.entries,
        }
    }
}

/// Read-only view of a completed [`ExtensionStore`]
pub struct FrozenExtensions {
    entries: HashMap<KeyId, Vec<Value>>,
}

impl FrozenExtensions {
    pub fn get<T: 'static>(&self, key: &ExtensionKey<T>) -> Vec<&T> {
        lookup(&self.entries, key)
    }
}

fn lookup<'a, T: 'static>(entries: &'a HashMap<KeyId, Vec<Value>>, key: &Key<T>) -> Vec<&'a T> {
    entries
        .get(&key.id())
        .map(|values| values.iter().filter_map(|v| v.downcast_ref()).collect())
        .unwrap_or_default()
}
