//! One persistent store per key.

use crate::error::{Error, Result};
use crate::persist::{PersistNotifier, PersistentStore};
use crate::storage::KeyValueStore;
use crate::store::lock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Type-erased view of a registered store.
trait Registered: Send + Sync {
    fn detach(&self) -> Result<()>;
    fn persist_current(&self) -> Result<()>;
    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

impl<T, S> Registered for PersistentStore<T, S>
where
    T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
    S: KeyValueStore + Clone + 'static,
{
    fn detach(&self) -> Result<()> {
        PersistentStore::detach(self)
    }

    fn persist_current(&self) -> Result<()> {
        PersistentStore::persist_current(self)
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

/// Hands out a shared [`PersistentStore`] per storage key.
///
/// The first request for a key decides its initial value and notifier;
/// later requests get the same instance and their arguments are ignored.
///
/// ```
/// use std::sync::Arc;
/// use tincan_persist::storage::MemoryStorage;
/// use tincan_persist::StoreRegistry;
///
/// let registry = StoreRegistry::new(MemoryStorage::new());
/// let a = registry.get_or_create("volume", 5u8, None).unwrap();
/// let b = registry.get_or_create("volume", 9u8, None).unwrap();
///
/// assert!(Arc::ptr_eq(&a, &b));
/// assert_eq!(b.get().unwrap(), 5);
/// ```
pub struct StoreRegistry<S> {
    storage: S,
    stores: Mutex<HashMap<String, Arc<dyn Registered>>>,
}

impl<S: KeyValueStore + Clone + 'static> StoreRegistry<S> {
    /// Create an empty registry whose stores live in `storage`.
    pub fn new(storage: S) -> Self {
        Self {
            storage,
            stores: Mutex::new(HashMap::new()),
        }
    }

    /// The storage new stores are created on.
    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// Return the store registered under `key`, creating it if needed.
    ///
    /// Fails with [`Error::TypeMismatch`] if `key` was registered with a
    /// different value type.
    pub fn get_or_create<T>(
        &self,
        key: &str,
        initial: T,
        notifier: Option<PersistNotifier<T>>,
    ) -> Result<Arc<PersistentStore<T, S>>>
    where
        T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
    {
        if let Some(existing) = self.lookup(key) {
            debug!(key, "registry hit");
            return Self::downcast(key, existing);
        }

        // Created outside the lock: construction writes to storage, which
        // may run listeners that call back into this registry.
        let created: Arc<dyn Registered> = Arc::new(PersistentStore::create(
            key,
            self.storage.clone(),
            initial,
            notifier,
        )?);
        let registered = self.register(key, created)?;
        Self::downcast(key, registered)
    }

    /// Insert `created` unless another caller registered `key` first.
    ///
    /// The loser has already written its starting value, so the winner's
    /// value is written back over it.
    fn register(&self, key: &str, created: Arc<dyn Registered>) -> Result<Arc<dyn Registered>> {
        let registered = Arc::clone(
            lock(&self.stores)
                .entry(key.to_string())
                .or_insert_with(|| Arc::clone(&created)),
        );
        if Arc::ptr_eq(&registered, &created) {
            debug!(key, "registered persistent store");
        } else {
            debug!(key, "lost registration race, restoring registered value");
            registered.persist_current()?;
        }
        Ok(registered)
    }

    /// Detach and forget the store under `key`. No-op if there is none.
    pub fn destroy(&self, key: &str) -> Result<()> {
        let Some(store) = self.lookup(key) else {
            return Ok(());
        };
        store.detach()?;
        lock(&self.stores).remove(key);
        debug!(key, "destroyed persistent store");
        Ok(())
    }

    pub fn contains(&self, key: &str) -> bool {
        lock(&self.stores).contains_key(key)
    }

    pub fn len(&self) -> usize {
        lock(&self.stores).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Registered keys, in no particular order.
    pub fn keys(&self) -> Vec<String> {
        lock(&self.stores).keys().cloned().collect()
    }

    fn lookup(&self, key: &str) -> Option<Arc<dyn Registered>> {
        lock(&self.stores).get(key).cloned()
    }

    fn downcast<T>(key: &str, store: Arc<dyn Registered>) -> Result<Arc<PersistentStore<T, S>>>
    where
        T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
    {
        store
            .into_any()
            .downcast::<PersistentStore<T, S>>()
            .map_err(|_| Error::TypeMismatch {
                key: key.to_string(),
            })
    }
}
