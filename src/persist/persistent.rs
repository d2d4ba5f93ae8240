use crate::error::{Error, Result};
use crate::storage::{KeyValueStore, Listener, StorageEvent};
use crate::store::{Setter, StartStopNotifier, Subscription, Teardown, Writable};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Stored text that counts as "no value".
const UNDEFINED: &str = "undefined";

/// Called with a [`StoreSetter`] when a persistent store gains its first
/// subscriber; the returned [`Teardown`] runs when the last one leaves.
pub type PersistNotifier<T> = Box<dyn Fn(StoreSetter<T>) -> Option<Teardown> + Send + Sync>;

type Persist<T> = Arc<dyn Fn(&T) -> Result<()> + Send + Sync>;

/// Write handle given to a [`PersistNotifier`].
///
/// Every value is written to storage before subscribers see it.
pub struct StoreSetter<T> {
    setter: Setter<T>,
    persist: Persist<T>,
}

impl<T: Clone> StoreSetter<T> {
    pub fn set(&self, value: T) -> Result<()> {
        (self.persist)(&value)?;
        self.setter.set(value);
        Ok(())
    }
}

impl<T> Clone for StoreSetter<T> {
    fn clone(&self) -> Self {
        Self {
            setter: self.setter.clone(),
            persist: Arc::clone(&self.persist),
        }
    }
}

fn decode<T: DeserializeOwned>(key: &str, raw: &str) -> Result<T> {
    serde_json::from_str(raw).map_err(|source| Error::Parse {
        key: key.to_string(),
        source,
    })
}

/// Decode a raw value where absence means JSON `null`.
fn decode_or_null<T: DeserializeOwned>(key: &str, raw: Option<&str>) -> Result<T> {
    match raw {
        Some(raw) => decode(key, raw),
        None => serde_json::from_value(serde_json::Value::Null).map_err(|source| Error::Parse {
            key: key.to_string(),
            source,
        }),
    }
}

fn persist<T: Serialize, S: KeyValueStore>(storage: &S, key: &str, value: &T) -> Result<()> {
    let raw = serde_json::to_string(value).map_err(|source| Error::Serialize {
        key: key.to_string(),
        source,
    })?;
    trace!(key, bytes = raw.len(), "persisting value");
    storage.set(key, &raw)
}

/// A [`Writable`] whose value is mirrored into a [`KeyValueStore`] as JSON.
///
/// Writes from other contexts of the same storage flow back into the store
/// while it has subscribers.
/// Dropping the store detaches its storage listener even if subscriptions
/// are still held; those subscriptions then receive nothing further.
///
/// ```
/// use tincan_persist::storage::MemoryStorage;
/// use tincan_persist::PersistentStore;
///
/// let storage = MemoryStorage::new();
/// let count = PersistentStore::create("count", storage.clone(), 0, None).unwrap();
/// count.update(|n| n + 1).unwrap();
///
/// // A second store on the same key starts from the persisted value.
/// let again = PersistentStore::create("count", storage, 100, None).unwrap();
/// assert_eq!(again.get().unwrap(), 1);
/// ```
pub struct PersistentStore<T, S> {
    key: String,
    storage: S,
    store: Writable<T>,
}

impl<T, S> PersistentStore<T, S>
where
    T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
    S: KeyValueStore + Clone + 'static,
{
    /// Create a store for `key`.
    ///
    /// An existing stored value wins over `initial`, unless it is empty or
    /// the text `undefined`. The starting value is written back to storage
    /// before this returns.
    pub fn create(
        key: impl Into<String>,
        storage: S,
        initial: T,
        notifier: Option<PersistNotifier<T>>,
    ) -> Result<Self> {
        let key = key.into();
        let existing = storage
            .get(&key)?
            .filter(|raw| !raw.is_empty() && raw != UNDEFINED);
        let restored = existing.is_some();
        let start = match existing {
            Some(raw) => decode(&key, &raw)?,
            None => initial,
        };
        persist(&storage, &key, &start)?;
        debug!(key = %key, restored, "created persistent store");

        let store = Writable::with_notifier(
            start,
            Self::start_stop(key.clone(), storage.clone(), notifier),
        );
        Ok(Self {
            key,
            storage,
            store,
        })
    }

    /// Build the notifier that links the in-memory store to storage events
    /// (and to the caller's notifier) while the store is observed.
    fn start_stop(
        key: String,
        storage: S,
        notifier: Option<PersistNotifier<T>>,
    ) -> StartStopNotifier<T> {
        Box::new(move |setter: Setter<T>| {
            let listener: Listener = {
                let key = key.clone();
                let setter = setter.clone();
                Arc::new(move |event: &StorageEvent| {
                    if event.key != key {
                        return;
                    }
                    let raw = event.new_value.as_deref().filter(|raw| !raw.is_empty());
                    match decode_or_null::<T>(&key, raw) {
                        Ok(value) => setter.set(value),
                        Err(err) => warn!(key = %key, error = %err, "ignoring unreadable storage event"),
                    }
                })
            };
            let listener_id = storage.add_listener(listener);
            debug!(key = %key, "attached storage listener");

            let user_teardown = notifier.as_ref().and_then(|notifier| {
                let persist_storage = storage.clone();
                let persist_key = key.clone();
                notifier(StoreSetter {
                    setter,
                    persist: Arc::new(move |value: &T| persist(&persist_storage, &persist_key, value)),
                })
            });

            let storage = storage.clone();
            let key = key.clone();
            Some(Box::new(move || {
                if let Some(teardown) = user_teardown {
                    teardown();
                }
                storage.remove_listener(listener_id);
                debug!(key = %key, "detached storage listener");
            }) as Teardown)
        })
    }

    /// The storage key this store is persisted under.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Persist `value`, then deliver it to subscribers.
    pub fn set(&self, value: T) -> Result<()> {
        persist(&self.storage, &self.key, &value)?;
        self.store.set(value);
        Ok(())
    }

    /// Apply `f` to the in-memory value, then persist and deliver the result.
    pub fn update<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&T) -> T,
    {
        let value = f(&self.store.get());
        self.set(value)
    }

    /// Read the value straight from storage.
    ///
    /// This can differ from what subscribers last saw when storage was
    /// written without a change notification, e.g. by another handle in
    /// the same context. An absent entry reads as JSON `null`.
    pub fn get(&self) -> Result<T> {
        let raw = self.storage.get(&self.key)?;
        decode_or_null(&self.key, raw.as_deref())
    }

    /// The in-memory value last delivered to subscribers.
    pub fn current(&self) -> T {
        self.store.get()
    }

    /// Write the in-memory value back to storage without notifying.
    pub(crate) fn persist_current(&self) -> Result<()> {
        persist(&self.storage, &self.key, &self.store.get())
    }

    /// Subscribe to value changes. See [`Writable::subscribe`].
    #[must_use = "dropping the subscription unsubscribes immediately"]
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        self.store.subscribe(callback)
    }

    /// Remove the persisted entry. The in-memory value is kept.
    pub fn detach(&self) -> Result<()> {
        debug!(key = %self.key, "detaching persistent store");
        self.storage.remove(&self.key)
    }
}
