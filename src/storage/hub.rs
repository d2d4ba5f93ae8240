use crate::store::lock;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// A write observed on a shared storage by another context.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StorageEvent {
    pub key: String,
    pub old_value: Option<String>,
    /// `None` when the key was removed.
    pub new_value: Option<String>,
}

/// Callback invoked with each [`StorageEvent`].
pub type Listener = Arc<dyn Fn(&StorageEvent) + Send + Sync>;

/// Handle returned by [`KeyValueStore::add_listener`](super::KeyValueStore::add_listener).
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct ListenerId(usize);

struct Registered {
    id: ListenerId,
    context: usize,
    listener: Listener,
}

/// Listener registry shared by every context of one storage.
#[derive(Default)]
pub(crate) struct ChangeHub {
    next_id: AtomicUsize,
    listeners: Mutex<Vec<Registered>>,
}

impl ChangeHub {
    /// Allocate an id for a new context.
    pub(crate) fn next_context(&self) -> usize {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    pub(crate) fn add(&self, context: usize, listener: Listener) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::SeqCst));
        lock(&self.listeners).push(Registered {
            id,
            context,
            listener,
        });
        id
    }

    pub(crate) fn remove(&self, id: ListenerId) {
        lock(&self.listeners).retain(|registered| registered.id != id);
    }

    /// Deliver `event` to listeners of every context except `origin`.
    pub(crate) fn broadcast(&self, origin: usize, event: &StorageEvent) {
        let listeners: Vec<Listener> = lock(&self.listeners)
            .iter()
            .filter(|registered| registered.context != origin)
            .map(|registered| Arc::clone(&registered.listener))
            .collect();
        tracing::trace!(key = %event.key, listeners = listeners.len(), "broadcasting storage event");
        for listener in listeners {
            listener(event);
        }
    }

    #[cfg(test)]
    pub(crate) fn listener_count(&self) -> usize {
        lock(&self.listeners).len()
    }
}
