//! Per-key result slot.

use std::sync::{Arc, OnceLock};

use crossbeam_channel::{Receiver, Sender, TryRecvError};
use thiserror::Error;
use tracing::warn;

use crate::cancel::{Cancellation, Interrupt};

/// Why waiting on an [`Entry`] produced no outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum WaitError {
    /// The [`Resolver`] was dropped without resolving, e.g. because the computation panicked.
    #[error("entry was abandoned before it was resolved")]
    Abandoned,
    #[error(transparent)]
    Interrupted(#[from] Interrupt),
}

/// The single outcome of computing one key.
///
/// The outcome is written once, by the holder of the matching [`Resolver`], and only then is the
/// ready signal fired. The signal is a channel nobody ever sends on: its only sender lives in the
/// `Resolver`, and dropping it disconnects the channel for every current and future observer.
#[derive(Debug)]
pub struct Entry<V, E> {
    outcome: OnceLock<Result<V, E>>,
    ready: Receiver<()>,
}

/// Write handle of an [`Entry`]. Exactly one exists per entry and it cannot be cloned.
#[derive(Debug)]
pub struct Resolver<V, E> {
    entry: Arc<Entry<V, E>>,
    signal: Option<Sender<()>>,
}

impl<V, E> Entry<V, E> {
    /// Creates an unresolved entry, returning the handle that resolves it.
    pub fn pending() -> Resolver<V, E> {
        let (signal, ready) = crossbeam_channel::bounded(0);
        Resolver {
            entry: Arc::new(Self {
                outcome: OnceLock::new(),
                ready,
            }),
            signal: Some(signal),
        }
    }

    /// Returns `true` once the ready signal has fired.
    pub fn is_ready(&self) -> bool {
        matches!(self.ready.try_recv(), Err(TryRecvError::Disconnected))
    }

    /// Blocks until the entry is resolved and returns its outcome.
    pub fn wait(&self) -> Result<&Result<V, E>, WaitError> {
        // Only ever returns on disconnection.
        let _ = self.ready.recv();
        self.outcome.get().ok_or(WaitError::Abandoned)
    }

    /// Like [`wait`](Self::wait), but gives up when `cx` fires first.
    ///
    /// Giving up leaves the entry untouched; it still resolves for everybody else.
    pub fn wait_with(&self, cx: &Cancellation) -> Result<&Result<V, E>, WaitError> {
        if !self.is_ready() {
            let _ = cx.recv(&self.ready)?;
        }
        self.outcome.get().ok_or(WaitError::Abandoned)
    }
}

impl<V, E> Resolver<V, E> {
    pub fn entry(&self) -> &Arc<Entry<V, E>> {
        &self.entry
    }

    /// Stores `outcome` and then wakes every observer of the entry.
    pub fn resolve(mut self, outcome: Result<V, E>) -> Arc<Entry<V, E>> {
        if self.entry.outcome.set(outcome).is_err() {
            unreachable!("entry resolved twice");
        }
        drop(self.signal.take());
        Arc::clone(&self.entry)
    }
}

impl<V, E> Drop for Resolver<V, E> {
    fn drop(&mut self) {
        if self.signal.is_some() {
            warn!("entry abandoned before it was resolved");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::thread;
    use std::time::Duration;

    use super::*;

    #[test]
    fn resolve_then_wait() {
        let resolver = Entry::<u32, String>::pending();
        let entry = Arc::clone(resolver.entry());
        assert!(!entry.is_ready());

        resolver.resolve(Ok(42));
        assert!(entry.is_ready());
        assert_eq!(entry.wait(), Ok(&Ok(42)));
        // Repeated observation yields the same outcome.
        assert_eq!(entry.wait(), Ok(&Ok(42)));
    }

    #[test]
    fn waiters_see_the_same_outcome() {
        let resolver = Entry::<u32, String>::pending();
        let entry = Arc::clone(resolver.entry());

        thread::scope(|s| {
            let waiters = (0..8)
                .map(|_| s.spawn(|| entry.wait().cloned()))
                .collect::<Vec<_>>();

            thread::sleep(Duration::from_millis(20));
            resolver.resolve(Err("boom".to_string()));

            for waiter in waiters {
                assert_eq!(waiter.join().unwrap(), Ok(Err("boom".to_string())));
            }
        });
    }

    #[test]
    fn dropped_resolver_abandons() {
        let resolver = Entry::<u32, String>::pending();
        let entry = Arc::clone(resolver.entry());

        thread::scope(|s| {
            let waiter = s.spawn(|| entry.wait().cloned());
            drop(resolver);
            assert_eq!(waiter.join().unwrap(), Err(WaitError::Abandoned));
        });
        assert!(entry.is_ready());
    }

    #[test]
    fn cancelled_wait_leaves_entry_alone() {
        let resolver = Entry::<u32, String>::pending();
        let entry = Arc::clone(resolver.entry());

        let (canceller, cx) = Cancellation::new();
        canceller.cancel();
        assert_eq!(
            entry.wait_with(&cx),
            Err(WaitError::Interrupted(Interrupt::Cancelled))
        );

        resolver.resolve(Ok(1));
        assert_eq!(entry.wait(), Ok(&Ok(1)));
        // An already resolved entry wins over a fired cancellation.
        assert_eq!(entry.wait_with(&cx), Ok(&Ok(1)));
    }
}
