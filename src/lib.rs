//! # Tincan Persist
//!
//! Reactive stores whose values live in a shared key-value storage.
//!
//! ## Stores (reactive containers)
//!
//! - `Writable<T>` - Value container with synchronous subscribers
//! - Start/stop notifiers that run while a store is observed
//!
//! ## Persistence
//!
//! - `PersistentStore<T, S>` - A `Writable<T>` mirrored into storage as JSON
//! - `StoreRegistry<S>` - One shared persistent store per key
//! - `storage` - The `KeyValueStore` trait with in-memory and file backends
//!
//! Every handle onto a storage belongs to a context. A write through one
//! context is announced to the others, and persistent stores observing the
//! same key pick the new value up.
//!
//! ```
//! use tincan_persist::storage::MemoryStorage;
//! use tincan_persist::StoreRegistry;
//!
//! let tab_a = MemoryStorage::new();
//! let tab_b = tab_a.context();
//!
//! let a = StoreRegistry::new(tab_a);
//! let b = StoreRegistry::new(tab_b);
//!
//! let theme_a = a.get_or_create("theme", "light".to_string(), None).unwrap();
//! let theme_b = b.get_or_create("theme", "light".to_string(), None).unwrap();
//! let _sub = theme_b.subscribe(|theme| println!("theme is now {theme}"));
//!
//! theme_a.set("dark".to_string()).unwrap();
//! assert_eq!(theme_b.current(), "dark");
//! ```

pub mod error;
pub mod persist;
pub mod registry;
pub mod storage;
pub mod store;

// Re-export main types for convenience
pub use error::{Error, Result};
pub use persist::{PersistNotifier, PersistentStore, StoreSetter};
pub use registry::StoreRegistry;
pub use storage::{FileStorage, KeyValueStore, MemoryStorage, StorageEvent};
pub use store::{Subscription, Writable};
