use super::{ChangeHub, KeyValueStore, Listener, ListenerId, StorageEvent};
use crate::error::Result;
use crate::store::lock;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

#[derive(Default)]
struct Shared {
    data: Mutex<HashMap<String, String>>,
    hub: ChangeHub,
}

/// In-memory storage, shared by every context opened from it.
///
/// ```
/// use tincan_persist::storage::{KeyValueStore, MemoryStorage};
///
/// let tab_a = MemoryStorage::new();
/// let tab_b = tab_a.context();
///
/// tab_a.set("theme", "\"dark\"").unwrap();
/// assert_eq!(tab_b.get("theme").unwrap().as_deref(), Some("\"dark\""));
/// ```
#[derive(Clone)]
pub struct MemoryStorage {
    shared: Arc<Shared>,
    context: usize,
}

impl MemoryStorage {
    /// Create an empty storage and its first context.
    pub fn new() -> Self {
        let shared = Arc::new(Shared::default());
        let context = shared.hub.next_context();
        Self { shared, context }
    }

    /// Open another context onto the same data.
    pub fn context(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            context: self.shared.hub.next_context(),
        }
    }

    /// Number of stored keys.
    pub fn len(&self) -> usize {
        lock(&self.shared.data).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[cfg(test)]
    pub(crate) fn listener_count(&self) -> usize {
        self.shared.hub.listener_count()
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyValueStore for MemoryStorage {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(lock(&self.shared.data).get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let old_value = lock(&self.shared.data).insert(key.to_string(), value.to_string());
        if old_value.as_deref() != Some(value) {
            self.shared.hub.broadcast(
                self.context,
                &StorageEvent {
                    key: key.to_string(),
                    old_value,
                    new_value: Some(value.to_string()),
                },
            );
        }
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let old_value = lock(&self.shared.data).remove(key);
        if old_value.is_some() {
            self.shared.hub.broadcast(
                self.context,
                &StorageEvent {
                    key: key.to_string(),
                    old_value,
                    new_value: None,
                },
            );
        }
        Ok(())
    }

    fn add_listener(&self, listener: Listener) -> ListenerId {
        self.shared.hub.add(self.context, listener)
    }

    fn remove_listener(&self, id: ListenerId) {
        self.shared.hub.remove(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recorder(storage: &MemoryStorage) -> (ListenerId, Arc<Mutex<Vec<StorageEvent>>>) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let events_clone = events.clone();
        let id = storage.add_listener(Arc::new(move |event: &StorageEvent| {
            events_clone.lock().unwrap().push(event.clone());
        }));
        (id, events)
    }

    #[test]
    fn get_set_remove() {
        let storage = MemoryStorage::new();
        assert_eq!(storage.get("a").unwrap(), None);

        storage.set("a", "1").unwrap();
        assert_eq!(storage.get("a").unwrap().as_deref(), Some("1"));
        assert_eq!(storage.len(), 1);

        storage.remove("a").unwrap();
        assert_eq!(storage.get("a").unwrap(), None);
        assert!(storage.is_empty());

        // removing an absent key is fine
        storage.remove("a").unwrap();
    }

    #[test]
    fn writes_notify_other_contexts_only() {
        let tab_a = MemoryStorage::new();
        let tab_b = tab_a.context();
        let (_, seen_by_a) = recorder(&tab_a);
        let (_, seen_by_b) = recorder(&tab_b);

        tab_a.set("k", "1").unwrap();
        tab_a.remove("k").unwrap();

        assert!(seen_by_a.lock().unwrap().is_empty());
        assert_eq!(
            *seen_by_b.lock().unwrap(),
            vec![
                StorageEvent {
                    key: "k".to_string(),
                    old_value: None,
                    new_value: Some("1".to_string()),
                },
                StorageEvent {
                    key: "k".to_string(),
                    old_value: Some("1".to_string()),
                    new_value: None,
                },
            ]
        );
    }

    #[test]
    fn clone_shares_context() {
        let tab_a = MemoryStorage::new();
        let same_tab = tab_a.clone();
        let (_, seen) = recorder(&tab_a);

        same_tab.set("k", "1").unwrap();
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn unchanged_write_is_silent() {
        let tab_a = MemoryStorage::new();
        let tab_b = tab_a.context();
        let (id, seen) = recorder(&tab_b);

        tab_a.set("k", "1").unwrap();
        tab_a.set("k", "1").unwrap();
        assert_eq!(seen.lock().unwrap().len(), 1);

        tab_b.remove_listener(id);
        tab_a.set("k", "2").unwrap();
        assert_eq!(seen.lock().unwrap().len(), 1);
    }
}
