//! Backend contract for the cache store.

use std::collections::HashMap;
use std::time::Duration;

use serde_json::Value;
use thiserror::Error;

/// Classified backend failure.
///
/// The store absorbs every variant fail-open; nothing here reaches callers
/// of [`super::CacheStore`].
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("cache backend unavailable: {0}")]
    Unavailable(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("cache entry encoding failed: {0}")]
    Encoding(#[from] serde_json::Error),
}

/// Key/value storage with TTL expiry.
///
/// Keys are already sanitized when they arrive here. Implementations are
/// shared across request-processing threads and must tolerate concurrent
/// use; last writer wins.
pub trait CacheBackend: Send + Sync {
    /// Fetch a live entry. Expired entries read as `None`.
    fn read(&self, key: &str) -> Result<Option<Value>, BackendError>;

    /// Store `value` for `ttl`.
    fn write(&self, key: &str, value: &Value, ttl: Duration) -> Result<(), BackendError>;

    /// Remove an entry, reporting whether one existed.
    fn remove(&self, key: &str) -> Result<bool, BackendError>;

    /// Whether a live entry exists.
    fn contains(&self, key: &str) -> Result<bool, BackendError>;

    /// Drop every entry.
    fn clear(&self) -> Result<(), BackendError>;

    /// Fetch several keys; absent and expired keys are left out of the map.
    fn read_many(&self, keys: &[String]) -> Result<HashMap<String, Value>, BackendError> {
        let mut found = HashMap::with_capacity(keys.len());
        for key in keys {
            if let Some(value) = self.read(key)? {
                found.insert(key.clone(), value);
            }
        }
        Ok(found)
    }

    /// Store several entries under one TTL. Any failure fails the whole
    /// batch.
    fn write_many(
        &self,
        entries: &HashMap<String, Value>,
        ttl: Duration,
    ) -> Result<(), BackendError> {
        for (key, value) in entries {
            self.write(key, value, ttl)?;
        }
        Ok(())
    }
}
