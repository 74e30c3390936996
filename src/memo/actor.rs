//! Coordinator running on its own control thread.

use std::collections::HashMap;
use std::hash::Hash;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender};
use tracing::{debug, warn};

use super::coordinator::{get_or_insert, Closed, Coordinator, Slot};

/// Asks the control thread for the slot of `key`.
struct Request<K, V, E> {
    key: K,
    /// Capacity 1, so replying never blocks the control thread.
    reply: Sender<Slot<V, E>>,
}

/// Coordinator whose table is owned by a single control thread.
///
/// Requests are processed one at a time in arrival order, so the thread alone decides who owns a
/// key. Closing drops the request queue's sender: requests already queued are still answered,
/// later ones fail with [`Closed`].
pub struct ActorTable<K, V, E> {
    requests: RwLock<Option<Sender<Request<K, V, E>>>>,
    control: Mutex<Option<JoinHandle<()>>>,
    registered: Arc<AtomicUsize>,
}

impl<K, V, E> ActorTable<K, V, E>
where
    K: Eq + Hash + Send + 'static,
    V: Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    /// Starts the control thread.
    pub fn spawn(name: impl Into<String>, capacity: usize) -> io::Result<Self> {
        let (sender, receiver) = crossbeam_channel::unbounded();
        let registered = Arc::new(AtomicUsize::new(0));

        let name = name.into();
        let counter = Arc::clone(&registered);
        let control = thread::Builder::new()
            .name(name.clone())
            .spawn(move || serve(&name, receiver, capacity, &counter))?;

        Ok(Self {
            requests: RwLock::new(Some(sender)),
            control: Mutex::new(Some(control)),
            registered,
        })
    }
}

fn serve<K: Eq + Hash, V, E>(
    name: &str,
    requests: Receiver<Request<K, V, E>>,
    capacity: usize,
    registered: &AtomicUsize,
) {
    debug!(coordinator = name, "coordinator started");
    let mut entries = HashMap::with_capacity(capacity);

    // Ends once every sender is gone and the queue is drained.
    for Request { key, reply } in requests {
        let slot = get_or_insert(&mut entries, key);
        if slot.is_owner() {
            registered.store(entries.len(), Ordering::Release);
        }
        // A caller that went away drops its slot; an owner slot then abandons its entry.
        let _ = reply.send(slot);
    }

    debug!(coordinator = name, entries = entries.len(), "coordinator stopped");
}

impl<K, V, E> Coordinator<K, V, E> for ActorTable<K, V, E>
where
    K: Send,
    V: Send + Sync,
    E: Send + Sync,
{
    fn get_or_create(&self, key: K) -> Result<Slot<V, E>, Closed> {
        let (reply, response) = crossbeam_channel::bounded(1);
        {
            let requests = self.requests.read().unwrap();
            let sender = requests.as_ref().ok_or(Closed)?;
            sender.send(Request { key, reply }).map_err(|_| Closed)?;
        }
        response.recv().map_err(|_| Closed)
    }

    fn close(&self) {
        drop(self.requests.write().unwrap().take());

        if let Some(control) = self.control.lock().unwrap().take() {
            if control.join().is_err() {
                warn!("coordinator thread panicked");
            }
        }
    }

    fn len(&self) -> usize {
        self.registered.load(Ordering::Acquire)
    }
}

impl<K, V, E> Drop for ActorTable<K, V, E> {
    fn drop(&mut self) {
        if let Ok(requests) = self.requests.get_mut() {
            requests.take();
        }
        if let Ok(Some(control)) = self.control.get_mut().map(Option::take) {
            let _ = control.join();
        }
    }
}
