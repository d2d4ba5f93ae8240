//! Key-value storage backends with change notifications.
//!
//! A backend handle belongs to one *context*. Writes made through a context
//! are announced to listeners registered through every other context that
//! shares the same storage, never to the writer itself. Cloning a handle
//! stays in the same context; [`MemoryStorage::context`] and
//! [`FileStorage::context`] open a new one.

mod file;
mod hub;
mod memory;

pub use file::FileStorage;
pub use hub::{Listener, ListenerId, StorageEvent};
pub use memory::MemoryStorage;

pub(crate) use hub::ChangeHub;

use crate::error::Result;

/// A string key-value store shared between contexts.
pub trait KeyValueStore: Send + Sync {
    /// Read the raw value under `key`, `None` when absent.
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Write `value` under `key`.
    fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Delete `key`. Absent keys are not an error.
    fn remove(&self, key: &str) -> Result<()>;

    /// Register a listener for writes made by other contexts.
    fn add_listener(&self, listener: Listener) -> ListenerId;

    /// Unregister a listener. Unknown ids are ignored.
    fn remove_listener(&self, id: ListenerId);
}
