use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::KVError;

/// A single stored key/value pair, as returned by `KVStore::all_items`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Record {
    pub key: String,
    pub value: String,
}

impl Record {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// KVStore is the storage contract shared by every backend.
///
/// Values are opaque strings; callers serialize structured data themselves
/// (see `KVStoreExt` for JSON helpers). A missing key is never an error:
/// `get` returns `None` and `delete` is a no-op.
pub trait KVStore: Send + Sync {
    /// Get the value for a key. Returns None if the key does not exist.
    fn get(&self, key: &str) -> Result<Option<String>, KVError>;

    /// Create or overwrite the value for a key.
    /// Returns KVError::Validation for an empty key, before touching storage.
    fn set(&self, key: &str, value: &str) -> Result<(), KVError>;

    /// Delete a key. No-op if the key does not exist.
    fn delete(&self, key: &str) -> Result<(), KVError>;

    /// Remove every record. Safe to call on an empty store.
    fn clear(&self) -> Result<(), KVError>;

    /// List every stored key. Ordering is backend-defined.
    fn names(&self) -> Result<Vec<String>, KVError>;

    /// Return every record. Empty (not an error) when the store is empty.
    fn all_items(&self) -> Result<Vec<Record>, KVError>;
}

impl<T: KVStore + ?Sized> KVStore for Arc<T> {
    fn get(&self, key: &str) -> Result<Option<String>, KVError> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: &str) -> Result<(), KVError> {
        (**self).set(key, value)
    }

    fn delete(&self, key: &str) -> Result<(), KVError> {
        (**self).delete(key)
    }

    fn clear(&self) -> Result<(), KVError> {
        (**self).clear()
    }

    fn names(&self) -> Result<Vec<String>, KVError> {
        (**self).names()
    }

    fn all_items(&self) -> Result<Vec<Record>, KVError> {
        (**self).all_items()
    }
}

impl<T: KVStore + ?Sized> KVStore for Box<T> {
    fn get(&self, key: &str) -> Result<Option<String>, KVError> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: &str) -> Result<(), KVError> {
        (**self).set(key, value)
    }

    fn delete(&self, key: &str) -> Result<(), KVError> {
        (**self).delete(key)
    }

    fn clear(&self) -> Result<(), KVError> {
        (**self).clear()
    }

    fn names(&self) -> Result<Vec<String>, KVError> {
        (**self).names()
    }

    fn all_items(&self) -> Result<Vec<Record>, KVError> {
        (**self).all_items()
    }
}
