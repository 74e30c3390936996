//! First-success lookup across several replicas.

use std::sync::Arc;
use std::thread;

use thiserror::Error;
use tracing::{debug, trace};

use crate::cancel::{Cancellation, Interrupt};

/// Fetches the value of `key` from the replica at `address`.
pub trait Getter: Send + Sync + 'static {
    type Value: Send + 'static;
    type Error: Send + 'static;

    /// Implementations should give up once `cx` fires; the lookup may have been won by another
    /// replica already.
    fn get(&self, cx: &Cancellation, address: &str, key: &str) -> Result<Self::Value, Self::Error>;
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RaceError<E> {
    /// Every replica failed; this is the failure that arrived last.
    #[error("all replicas failed")]
    AllFailed(#[source] E),
    /// Every worker exited without reporting back.
    #[error("all replica workers exited without an answer")]
    Abandoned,
    #[error(transparent)]
    Interrupted(#[from] Interrupt),
}

/// Queries every address in parallel and returns the first successful answer.
///
/// Fails only once every address has failed, or when `cx` fires first; in the latter case the
/// error is always [`RaceError::Interrupted`], never a worker's echo of it. An empty address list
/// yields `Ok(None)`. Returning does not wait for the slower replicas: they keep running on their
/// own threads, observe a cancelled [`Cancellation`] and deposit their answer into a channel that
/// has room for all of them, so none of them can get stuck.
pub fn race<G, A>(
    cx: &Cancellation,
    getter: &Arc<G>,
    addresses: &[A],
    key: &str,
) -> Result<Option<G::Value>, RaceError<G::Error>>
where
    G: Getter,
    A: AsRef<str>,
{
    if addresses.is_empty() {
        return Ok(None);
    }

    // Dropped on return, which cancels the losers.
    let (_losers, worker_cx) = cx.child();
    let (sender, answers) = crossbeam_channel::bounded(addresses.len());

    for address in addresses {
        let address = address.as_ref().to_string();
        let key = key.to_string();
        let getter = Arc::clone(getter);
        let cx = worker_cx.clone();
        let sender = sender.clone();
        thread::spawn(move || {
            let answer = getter.get(&cx, &address, &key);
            trace!(%address, ok = answer.is_ok(), "replica answered");
            let _ = sender.try_send(answer);
        });
    }
    drop(sender);

    let mut failed = 0;
    let mut last_error = None;
    loop {
        match cx.recv(&answers)? {
            Ok(Ok(value)) => {
                debug!(key, failed, "replica lookup succeeded");
                return Ok(Some(value));
            }
            Ok(Err(error)) => {
                failed += 1;
                if failed == addresses.len() {
                    // Workers observe `cx` as well; once it fired, their failures only echo it.
                    cx.check()?;
                    return Err(RaceError::AllFailed(error));
                }
                last_error = Some(error);
            }
            // Some workers panicked before answering.
            Err(_) => {
                cx.check()?;
                return Err(match last_error {
                    Some(error) => RaceError::AllFailed(error),
                    None => RaceError::Abandoned,
                })
            }
        }
    }
}
