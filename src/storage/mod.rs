//! Device-local key-value storage.
//!
//! The local queue and the baseline cache only need a synchronous byte store
//! with prefix enumeration. `InMemoryKvStore` backs tests and ephemeral
//! sessions; `FileKvStore` keeps one file per key and survives restarts.

#[cfg(feature = "file-store")]
mod file;
mod in_memory;

#[cfg(feature = "file-store")]
pub use file::FileKvStore;
pub use in_memory::InMemoryKvStore;

use crate::error::StorageError;

/// Synchronous key-value byte store, local to one device.
pub trait KvStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;

    /// Durably write `value` under `key`, replacing any previous value.
    fn set(&self, key: &str, value: &[u8]) -> Result<(), StorageError>;

    /// Remove `key`. Returns true if it existed.
    fn remove(&self, key: &str) -> Result<bool, StorageError>;

    /// All keys starting with `prefix`, in ascending order.
    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StorageError>;
}
