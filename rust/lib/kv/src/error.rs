use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KVError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("remote table error: {0}")]
    Remote(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("config error: {0}")]
    Config(String),
}

/// Reject keys that no backend can store.
pub(crate) fn validate_key(key: &str) -> Result<(), KVError> {
    if key.is_empty() {
        return Err(KVError::Validation("key must not be empty".to_string()));
    }
    Ok(())
}
