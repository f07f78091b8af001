//! Remote backend over a blocking redis connection.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use redis::{Commands, Connection};
use serde_json::Value;

use crate::util::lock::mutex_lock;

use super::backend::{BackendError, CacheBackend};

const SOURCE: &str = "cache::redis";

/// Primary backend: one blocking connection guarded by a mutex, TTL handling
/// delegated to the server.
///
/// There is no reconnect logic. Backend selection happens once at startup; a
/// connection that dies later surfaces as per-call errors the store absorbs
/// fail-open.
pub struct RedisBackend {
    connection: Mutex<Connection>,
}

impl RedisBackend {
    /// Connect and verify the server answers before accepting the backend.
    pub fn connect(url: &str) -> Result<Self, BackendError> {
        let client = redis::Client::open(url).map_err(unavailable)?;
        let mut connection = client.get_connection().map_err(unavailable)?;
        redis::cmd("PING")
            .query::<()>(&mut connection)
            .map_err(unavailable)?;
        Ok(Self {
            connection: Mutex::new(connection),
        })
    }
}

fn unavailable(err: redis::RedisError) -> BackendError {
    BackendError::Unavailable(err.to_string())
}

impl CacheBackend for RedisBackend {
    fn read(&self, key: &str) -> Result<Option<Value>, BackendError> {
        let mut connection = mutex_lock(&self.connection, SOURCE, "read");
        let raw: Option<String> = connection.get(key).map_err(unavailable)?;
        match raw {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    fn write(&self, key: &str, value: &Value, ttl: Duration) -> Result<(), BackendError> {
        let payload = serde_json::to_string(value)?;
        let mut connection = mutex_lock(&self.connection, SOURCE, "write");
        connection
            .set_ex::<_, _, ()>(key, payload, ttl.as_secs().max(1))
            .map_err(unavailable)
    }

    fn remove(&self, key: &str) -> Result<bool, BackendError> {
        let mut connection = mutex_lock(&self.connection, SOURCE, "remove");
        let removed: u32 = connection.del(key).map_err(unavailable)?;
        Ok(removed > 0)
    }

    fn contains(&self, key: &str) -> Result<bool, BackendError> {
        let mut connection = mutex_lock(&self.connection, SOURCE, "contains");
        connection.exists(key).map_err(unavailable)
    }

    fn clear(&self) -> Result<(), BackendError> {
        let mut connection = mutex_lock(&self.connection, SOURCE, "clear");
        redis::cmd("FLUSHDB")
            .query::<()>(&mut connection)
            .map_err(unavailable)
    }

    fn read_many(&self, keys: &[String]) -> Result<HashMap<String, Value>, BackendError> {
        if keys.is_empty() {
            return Ok(HashMap::new());
        }

        let mut connection = mutex_lock(&self.connection, SOURCE, "read_many");
        let raw: Vec<Option<String>> = connection.mget(keys).map_err(unavailable)?;

        let mut found = HashMap::with_capacity(keys.len());
        for (key, slot) in keys.iter().zip(raw) {
            if let Some(raw) = slot {
                found.insert(key.clone(), serde_json::from_str(&raw)?);
            }
        }
        Ok(found)
    }

    fn write_many(
        &self,
        entries: &HashMap<String, Value>,
        ttl: Duration,
    ) -> Result<(), BackendError> {
        if entries.is_empty() {
            return Ok(());
        }

        let seconds = ttl.as_secs().max(1);
        let mut pipe = redis::pipe();
        for (key, value) in entries {
            pipe.set_ex(key, serde_json::to_string(value)?, seconds)
                .ignore();
        }

        let mut connection = mutex_lock(&self.connection, SOURCE, "write_many");
        pipe.query::<()>(&mut connection).map_err(unavailable)
    }
}
