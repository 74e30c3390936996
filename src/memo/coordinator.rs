//! Key to entry tables.

use std::collections::hash_map::{Entry as MapEntry, HashMap};
use std::hash::Hash;
use std::sync::Arc;

use thiserror::Error;

use super::entry::{Entry, Resolver};
use crate::sync::Mutex;

/// The coordinator no longer accepts requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
#[error("cache is closed")]
pub struct Closed;

/// What a caller of [`Coordinator::get_or_create`] is handed.
#[derive(Debug)]
pub enum Slot<V, E> {
    /// The key was new. The caller must run the computation and resolve the entry.
    Owner(Resolver<V, E>),
    /// Somebody else owns the computation; wait for it.
    Joiner(Arc<Entry<V, E>>),
}

impl<V, E> Slot<V, E> {
    pub fn is_owner(&self) -> bool {
        matches!(self, Slot::Owner(_))
    }
}

/// Serializes lookups and insertions of the key to entry table.
///
/// For every key, at most one call of `get_or_create` over the whole lifetime of the coordinator
/// returns [`Slot::Owner`]. Entries are never removed.
pub trait Coordinator<K, V, E>: Send + Sync {
    /// Returns the entry for `key`, creating it if it does not exist yet.
    fn get_or_create(&self, key: K) -> Result<Slot<V, E>, Closed>;

    /// Stops accepting requests. Entries already handed out still resolve. Calling it again has no
    /// effect.
    fn close(&self);

    /// Number of keys registered so far.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Looks up `key`, inserting a fresh entry when absent.
pub(super) fn get_or_insert<K: Eq + Hash, V, E>(
    entries: &mut HashMap<K, Arc<Entry<V, E>>>,
    key: K,
) -> Slot<V, E> {
    match entries.entry(key) {
        MapEntry::Occupied(entry) => Slot::Joiner(Arc::clone(entry.get())),
        MapEntry::Vacant(entry) => {
            let resolver = Entry::pending();
            entry.insert(Arc::clone(resolver.entry()));
            Slot::Owner(resolver)
        }
    }
}

struct Table<K, V, E> {
    entries: HashMap<K, Arc<Entry<V, E>>>,
    closed: bool,
}

/// Coordinator guarding the table with a mutex. The lock is held for the lookup only.
pub struct LockedTable<K, V, E> {
    inner: Mutex<Table<K, V, E>>,
}

impl<K, V, E> Default for LockedTable<K, V, E> {
    fn default() -> Self {
        Self::with_capacity(0)
    }
}

impl<K, V, E> LockedTable<K, V, E> {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Table {
                entries: HashMap::with_capacity(capacity),
                closed: false,
            }),
        }
    }
}

impl<K, V, E> Coordinator<K, V, E> for LockedTable<K, V, E>
where
    K: Eq + Hash + Send,
    V: Send + Sync,
    E: Send + Sync,
{
    fn get_or_create(&self, key: K) -> Result<Slot<V, E>, Closed> {
        let mut table = self.inner.lock().unwrap();
        if table.closed {
            return Err(Closed);
        }
        Ok(get_or_insert(&mut table.entries, key))
    }

    fn close(&self) {
        self.inner.lock().unwrap().closed = true;
    }

    fn len(&self) -> usize {
        self.inner.lock().unwrap().entries.len()
    }
}
