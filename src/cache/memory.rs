//! In-memory backend over a concurrent map.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde_json::Value;

use crate::util::clock::{Clock, unix_seconds};

use super::backend::{BackendError, CacheBackend};

struct Slot {
    expires_at: u64,
    value: Value,
}

/// Process-local backend for tests and single-instance embedders. Contents
/// vanish with the process.
pub struct MemoryBackend {
    slots: DashMap<String, Slot>,
    clock: Arc<dyn Clock>,
}

impl MemoryBackend {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            slots: DashMap::new(),
            clock,
        }
    }

    fn now(&self) -> u64 {
        unix_seconds(self.clock.now())
    }
}

impl CacheBackend for MemoryBackend {
    fn read(&self, key: &str) -> Result<Option<Value>, BackendError> {
        // Clone out before any removal; holding a map ref across `remove`
        // deadlocks on the shard lock.
        let hit = self
            .slots
            .get(key)
            .map(|slot| (slot.expires_at, slot.value.clone()));

        match hit {
            None => Ok(None),
            Some((expires_at, _)) if expires_at <= self.now() => {
                self.slots.remove(key);
                Ok(None)
            }
            Some((_, value)) => Ok(Some(value)),
        }
    }

    fn write(&self, key: &str, value: &Value, ttl: Duration) -> Result<(), BackendError> {
        let expires_at = self.now().saturating_add(ttl.as_secs().max(1));
        self.slots.insert(
            key.to_string(),
            Slot {
                expires_at,
                value: value.clone(),
            },
        );
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<bool, BackendError> {
        Ok(self.slots.remove(key).is_some())
    }

    fn contains(&self, key: &str) -> Result<bool, BackendError> {
        Ok(self.read(key)?.is_some())
    }

    fn clear(&self) -> Result<(), BackendError> {
        self.slots.clear();
        Ok(())
    }
}
