//! Thread-safe memoizing cache with request coalescing.

mod actor;
pub mod coordinator;
pub mod entry;

use std::fmt;
use std::hash::Hash;
use std::io;
use std::sync::Arc;
use std::thread;

use thiserror::Error;
use tracing::{debug, trace};

pub use self::actor::ActorTable;
pub use self::coordinator::{Closed, Coordinator, LockedTable, Slot};
pub use self::entry::{Entry, Resolver, WaitError};
use crate::cancel::{Cancellation, Interrupt};

/// Error returned by [`Cache`] operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error<E> {
    /// The compute function failed. The failure is memoized like a value.
    #[error(transparent)]
    Compute(E),
    /// The caller's cancellation fired before the outcome was available.
    #[error(transparent)]
    Interrupted(#[from] Interrupt),
    /// The cache was used after [`Cache::close`].
    #[error("cache is closed")]
    Closed,
    /// The computation of this key panicked, so it has no outcome.
    #[error("computation was abandoned")]
    Abandoned,
}

impl<E> From<Closed> for Error<E> {
    fn from(_: Closed) -> Self {
        Error::Closed
    }
}

impl<E> From<WaitError> for Error<E> {
    fn from(error: WaitError) -> Self {
        match error {
            WaitError::Abandoned => Error::Abandoned,
            WaitError::Interrupted(interrupt) => Error::Interrupted(interrupt),
        }
    }
}

/// Whether a caller ran the computation or waited for somebody else's.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Owner,
    Joiner,
}

/// How lookups of the key table are serialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Serialization {
    /// A mutex guards the table ([`LockedTable`]).
    #[default]
    Lock,
    /// A control thread owns the table and serves a request queue ([`ActorTable`]).
    Actor,
}

/// Cache construction parameters.
#[derive(Debug, Clone)]
pub struct Config {
    pub serialization: Serialization,
    /// Number of keys the table is preallocated for.
    pub capacity: usize,
    /// Name of the control thread under [`Serialization::Actor`].
    pub thread_name: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            serialization: Serialization::default(),
            capacity: 0,
            thread_name: "memo-coordinator".to_string(),
        }
    }
}

type Compute<K, V, E> = dyn Fn(&K) -> Result<V, E> + Send + Sync;

/// Cache that remembers the outcome of a compute function for each key.
pub struct Cache<K, V, E> {
    coordinator: Box<dyn Coordinator<K, V, E>>,
    compute: Arc<Compute<K, V, E>>,
}

impl<K, V, E> fmt::Debug for Cache<K, V, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cache")
            .field("len", &self.coordinator.len())
            .finish_non_exhaustive()
    }
}

impl<K, V, E> Cache<K, V, E>
where
    K: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    /// Memoizes `compute` behind a mutex-guarded table.
    pub fn new<F>(compute: F) -> Self
    where
        F: Fn(&K) -> Result<V, E> + Send + Sync + 'static,
    {
        Self::from_parts(Box::new(LockedTable::default()), compute)
    }

    /// Memoizes `compute` with the given configuration.
    ///
    /// Fails only if the control thread of [`Serialization::Actor`] cannot be spawned.
    pub fn with_config<F>(config: Config, compute: F) -> io::Result<Self>
    where
        F: Fn(&K) -> Result<V, E> + Send + Sync + 'static,
    {
        let coordinator: Box<dyn Coordinator<K, V, E>> = match config.serialization {
            Serialization::Lock => Box::new(LockedTable::with_capacity(config.capacity)),
            Serialization::Actor => {
                Box::new(ActorTable::spawn(config.thread_name, config.capacity)?)
            }
        };
        Ok(Self::from_parts(coordinator, compute))
    }

    /// Memoizes `compute` on top of a custom coordinator.
    pub fn from_parts<F>(coordinator: Box<dyn Coordinator<K, V, E>>, compute: F) -> Self
    where
        F: Fn(&K) -> Result<V, E> + Send + Sync + 'static,
    {
        Self {
            coordinator,
            compute: Arc::new(compute),
        }
    }

    /// Retrieves the outcome for `key`, computing it if this is the first request.
    ///
    /// An invocation should not block another invocation with a different key: if one thread calls
    /// `get(key1)` and another calls `get(key2)` (`key1≠key2`, neither seen before) concurrently,
    /// both computations run concurrently.
    ///
    /// On the other hand, the compute function runs only once per key, even for concurrent
    /// invocations of `get(key)`. Every other caller waits for that single run and receives a
    /// clone of its outcome. Failures are memoized as well and are never retried.
    pub fn get(&self, key: K) -> Result<V, Error<E>> {
        let (_, outcome) = self.lookup(key)?;
        outcome.map_err(Error::Compute)
    }

    /// Like [`get`](Self::get), but also reports whether this call ran the computation.
    ///
    /// The outer error is [`Error::Closed`] or [`Error::Abandoned`]; the outcome of the
    /// computation, failed or not, is in the inner result.
    pub fn lookup(&self, key: K) -> Result<(Role, Result<V, E>), Error<E>> {
        match self.acquire(&key)? {
            Slot::Owner(resolver) => {
                let entry = resolver.resolve((self.compute)(&key));
                let outcome = entry.wait()?.clone();
                Ok((Role::Owner, outcome))
            }
            Slot::Joiner(entry) => Ok((Role::Joiner, entry.wait()?.clone())),
        }
    }

    /// Computes the outcome for `key` only if no caller has requested it before.
    ///
    /// Never waits for another caller's computation: if `key` is already claimed, returns `None`
    /// at once, whether or not that computation has finished.
    pub fn claim(&self, key: K) -> Result<Option<Result<V, E>>, Error<E>> {
        match self.acquire(&key)? {
            Slot::Owner(resolver) => {
                let outcome = (self.compute)(&key);
                resolver.resolve(outcome.clone());
                Ok(Some(outcome))
            }
            Slot::Joiner(_) => Ok(None),
        }
    }

    /// Like [`get`](Self::get), but stops waiting once `cx` fires.
    ///
    /// If this call owns the computation, the computation runs on a separate worker thread which
    /// resolves the entry even when the caller has given up, so other waiters are unaffected.
    pub fn get_with(&self, key: K, cx: &Cancellation) -> Result<V, Error<E>> {
        cx.check()?;

        let entry = match self.acquire(&key)? {
            Slot::Owner(resolver) => {
                let entry = Arc::clone(resolver.entry());
                let compute = Arc::clone(&self.compute);
                thread::spawn(move || {
                    let outcome = compute(&key);
                    resolver.resolve(outcome);
                });
                entry
            }
            Slot::Joiner(entry) => entry,
        };

        entry.wait_with(cx)?.clone().map_err(Error::Compute)
    }

    /// Stops serving requests. Computations already running still complete.
    ///
    /// Call it once no further `get` is issued; afterwards every request fails with
    /// [`Error::Closed`].
    pub fn close(&self) {
        debug!(entries = self.coordinator.len(), "closing cache");
        self.coordinator.close();
    }

    /// Number of keys requested so far.
    pub fn len(&self) -> usize {
        self.coordinator.len()
    }

    pub fn is_empty(&self) -> bool {
        self.coordinator.is_empty()
    }

    fn acquire(&self, key: &K) -> Result<Slot<V, E>, Closed> {
        let slot = self.coordinator.get_or_create(key.clone())?;
        if slot.is_owner() {
            debug!(?key, "computing");
        } else {
            trace!(?key, "joining");
        }
        Ok(slot)
    }
}
