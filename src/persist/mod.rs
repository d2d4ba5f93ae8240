//! Stores whose values are persisted to a [`KeyValueStore`](crate::storage::KeyValueStore).
//!
//! Values are stored as plain JSON text under their key, with no envelope.

mod persistent;

pub use persistent::{PersistNotifier, PersistentStore, StoreSetter};
