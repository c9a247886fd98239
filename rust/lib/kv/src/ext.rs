use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::KVError;
use crate::traits::KVStore;

/// Store a dynamically-typed value. Only JSON strings are accepted; `null`
/// and every other variant fail with `KVError::Validation` and leave the
/// store untouched.
pub fn set_json<S: KVStore + ?Sized>(store: &S, key: &str, value: &Value) -> Result<(), KVError> {
    match value {
        Value::String(s) => store.set(key, s),
        Value::Null => Err(KVError::Validation(format!(
            "value for key {:?} is absent",
            key
        ))),
        other => Err(KVError::Validation(format!(
            "value for key {:?} must be a string, got {}",
            key,
            kind(other)
        ))),
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Typed accessors that encode structured values as JSON text.
pub trait KVStoreExt: KVStore {
    fn get_as<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, KVError> {
        match self.get(key)? {
            Some(raw) => serde_json::from_str(&raw)
                .map(Some)
                .map_err(|e| KVError::Serialization(e.to_string())),
            None => Ok(None),
        }
    }

    fn set_as<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<(), KVError> {
        let raw = serde_json::to_string(value).map_err(|e| KVError::Serialization(e.to_string()))?;
        self.set(key, &raw)
    }
}

impl<S: KVStore + ?Sized> KVStoreExt for S {}
