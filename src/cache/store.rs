//! Fail-open cache store over a pluggable backend.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::warn;

use super::backend::CacheBackend;
use super::key;

/// Uniform cache indirection for fragments, query results, image variant
/// sets, and performance reports.
///
/// Every operation sanitizes its key and absorbs backend failure: reads
/// degrade to misses, writes report `false`. Producers run on miss with no
/// cross-caller coordination — see the module docs for the stampede
/// trade-off.
pub struct CacheStore {
    backend: Arc<dyn CacheBackend>,
}

impl CacheStore {
    pub fn new(backend: Arc<dyn CacheBackend>) -> Self {
        Self { backend }
    }

    /// Fetch and decode a live entry.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let key = key::sanitize(key);
        match self.backend.read(&key) {
            Ok(Some(value)) => match serde_json::from_value(value) {
                Ok(decoded) => {
                    counter!("ossatura_cache_hit_total").increment(1);
                    Some(decoded)
                }
                Err(error) => {
                    counter!("ossatura_cache_error_total").increment(1);
                    warn!(key, %error, "cached value failed to decode, treating as miss");
                    None
                }
            },
            Ok(None) => {
                counter!("ossatura_cache_miss_total").increment(1);
                None
            }
            Err(error) => {
                counter!("ossatura_cache_error_total").increment(1);
                warn!(key, %error, "cache read failed, treating as miss");
                None
            }
        }
    }

    /// Fetch, or fall back to a plain value. The fallback is never stored.
    pub fn get_or_default<T: DeserializeOwned>(&self, key: &str, default: T) -> T {
        self.get(key).unwrap_or(default)
    }

    /// Fetch, or run `produce`, store its result for `ttl`, and return it.
    ///
    /// The computed value comes back even when the store-back fails.
    pub fn get_or_compute<T, F>(&self, key: &str, ttl: Duration, produce: F) -> T
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> T,
    {
        if let Some(value) = self.get(key) {
            return value;
        }
        let value = produce();
        self.set(key, &value, ttl);
        value
    }

    /// Store a value for `ttl`. Returns `false` on any failure.
    pub fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T, ttl: Duration) -> bool {
        let key = key::sanitize(key);
        let value = match serde_json::to_value(value) {
            Ok(value) => value,
            Err(error) => {
                warn!(key, %error, "value failed to encode for caching");
                return false;
            }
        };
        match self.backend.write(&key, &value, ttl) {
            Ok(()) => true,
            Err(error) => {
                counter!("ossatura_cache_error_total").increment(1);
                warn!(key, %error, "cache write failed");
                false
            }
        }
    }

    /// Remove an entry, reporting whether one existed.
    pub fn delete(&self, key: &str) -> bool {
        let key = key::sanitize(key);
        match self.backend.remove(&key) {
            Ok(existed) => existed,
            Err(error) => {
                counter!("ossatura_cache_error_total").increment(1);
                warn!(key, %error, "cache delete failed");
                false
            }
        }
    }

    /// Whether a live entry exists.
    pub fn contains(&self, key: &str) -> bool {
        let key = key::sanitize(key);
        match self.backend.contains(&key) {
            Ok(present) => present,
            Err(error) => {
                counter!("ossatura_cache_error_total").increment(1);
                warn!(key, %error, "cache lookup failed");
                false
            }
        }
    }

    /// Drop every entry.
    pub fn clear(&self) -> bool {
        match self.backend.clear() {
            Ok(()) => true,
            Err(error) => {
                counter!("ossatura_cache_error_total").increment(1);
                warn!(%error, "cache clear failed");
                false
            }
        }
    }

    /// Batch fetch. The result maps sanitized keys to hits; a backend
    /// failure empties the whole batch.
    pub fn get_multiple(&self, keys: &[&str]) -> HashMap<String, Value> {
        let sanitized: Vec<String> = keys.iter().map(|raw| key::sanitize(raw)).collect();
        match self.backend.read_many(&sanitized) {
            Ok(found) => found,
            Err(error) => {
                counter!("ossatura_cache_error_total").increment(1);
                warn!(%error, "batch cache read failed");
                HashMap::new()
            }
        }
    }

    /// Batch store under one TTL. Partial failure fails the whole batch,
    /// never a per-key result.
    pub fn set_multiple(&self, entries: &HashMap<String, Value>, ttl: Duration) -> bool {
        let sanitized: HashMap<String, Value> = entries
            .iter()
            .map(|(raw, value)| (key::sanitize(raw), value.clone()))
            .collect();
        match self.backend.write_many(&sanitized, ttl) {
            Ok(()) => true,
            Err(error) => {
                counter!("ossatura_cache_error_total").increment(1);
                warn!(%error, "batch cache write failed");
                false
            }
        }
    }

    /// Memoize a rendered fragment. `render` runs at most once per TTL
    /// window.
    pub fn cache_fragment<F>(&self, key: &str, ttl: Duration, render: F) -> String
    where
        F: FnOnce() -> String,
    {
        self.get_or_compute(key, ttl, render)
    }

    /// Memoize a query result keyed on the statement and its parameters.
    /// Query execution stays with the caller-supplied closure.
    pub fn cache_query<T, F>(&self, statement: &str, params: &[Value], ttl: Duration, run: F) -> T
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> T,
    {
        self.get_or_compute(&key::query_key(statement, params), ttl, run)
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::time::UNIX_EPOCH;

    use serde_json::json;

    use crate::cache::backend::BackendError;
    use crate::cache::memory::MemoryBackend;
    use crate::util::clock::ManualClock;

    use super::*;

    struct FailingBackend;

    impl CacheBackend for FailingBackend {
        fn read(&self, _key: &str) -> Result<Option<Value>, BackendError> {
            Err(BackendError::Unavailable("connection refused".to_string()))
        }

        fn write(&self, _key: &str, _value: &Value, _ttl: Duration) -> Result<(), BackendError> {
            Err(BackendError::Unavailable("connection refused".to_string()))
        }

        fn remove(&self, _key: &str) -> Result<bool, BackendError> {
            Err(BackendError::Unavailable("connection refused".to_string()))
        }

        fn contains(&self, _key: &str) -> Result<bool, BackendError> {
            Err(BackendError::Unavailable("connection refused".to_string()))
        }

        fn clear(&self) -> Result<(), BackendError> {
            Err(BackendError::Unavailable("connection refused".to_string()))
        }
    }

    fn store_with_clock() -> (CacheStore, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(UNIX_EPOCH + Duration::from_secs(1_000)));
        let store = CacheStore::new(Arc::new(MemoryBackend::new(clock.clone())));
        (store, clock)
    }

    fn failing_store() -> CacheStore {
        CacheStore::new(Arc::new(FailingBackend))
    }

    #[test]
    fn set_then_get_roundtrips() {
        let (store, _clock) = store_with_clock();

        assert!(store.set("user.pref", "dark", Duration::from_secs(60)));
        assert_eq!(store.get::<String>("user.pref"), Some("dark".to_string()));
    }

    #[test]
    fn get_or_default_does_not_store_the_fallback() {
        let (store, _clock) = store_with_clock();

        assert_eq!(
            store.get_or_default("user.pref", "light".to_string()),
            "light"
        );
        assert!(!store.contains("user.pref"));
    }

    #[test]
    fn get_or_compute_stores_and_reuses_the_result() {
        let (store, _clock) = store_with_clock();
        let calls = Cell::new(0u32);

        let first = store.get_or_compute("fragment", Duration::from_secs(60), || {
            calls.set(calls.get() + 1);
            "rendered".to_string()
        });
        assert_eq!(first, "rendered");

        let second = store.get_or_compute("fragment", Duration::from_secs(60), || {
            calls.set(calls.get() + 1);
            "rendered again".to_string()
        });
        assert_eq!(second, "rendered");
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn expired_entries_fall_back_to_the_default() {
        let (store, clock) = store_with_clock();

        assert!(store.set("user.pref", "dark", Duration::from_secs(60)));
        clock.advance(Duration::from_secs(61));

        assert_eq!(
            store.get_or_default("user.pref", "light".to_string()),
            "light"
        );
    }

    #[test]
    fn keys_are_sanitized_before_reaching_the_backend() {
        let (store, _clock) = store_with_clock();

        assert!(store.set("posts/list?page=2", "body", Duration::from_secs(60)));
        // Raw keys differing only in disallowed characters collide.
        assert_eq!(
            store.get::<String>("posts_list_page=2"),
            Some("body".to_string())
        );
    }

    #[test]
    fn fragment_producer_runs_once_within_ttl() {
        let (store, _clock) = store_with_clock();
        let renders = Cell::new(0u32);

        for _ in 0..2 {
            let html = store.cache_fragment("sidebar", Duration::from_secs(60), || {
                renders.set(renders.get() + 1);
                "<aside>recent posts</aside>".to_string()
            });
            assert_eq!(html, "<aside>recent posts</aside>");
        }
        assert_eq!(renders.get(), 1);
    }

    #[test]
    fn cache_query_keys_on_statement_and_params() {
        let (store, _clock) = store_with_clock();

        let rows: Vec<u32> = store.cache_query(
            "SELECT id FROM products WHERE tag = ?",
            &[json!("fastener")],
            Duration::from_secs(60),
            || vec![1, 2, 3],
        );
        assert_eq!(rows, vec![1, 2, 3]);

        // Different params execute independently.
        let other: Vec<u32> = store.cache_query(
            "SELECT id FROM products WHERE tag = ?",
            &[json!("bracket")],
            Duration::from_secs(60),
            || vec![9],
        );
        assert_eq!(other, vec![9]);

        // Same statement and params come from the cache.
        let cached: Vec<u32> = store.cache_query(
            "SELECT id FROM products WHERE tag = ?",
            &[json!("fastener")],
            Duration::from_secs(60),
            Vec::new,
        );
        assert_eq!(cached, vec![1, 2, 3]);
    }

    #[test]
    fn batch_operations_roundtrip() {
        let (store, _clock) = store_with_clock();

        let entries = HashMap::from([
            ("nav".to_string(), json!(["home", "products"])),
            ("footer".to_string(), json!("© 2026")),
        ]);
        assert!(store.set_multiple(&entries, Duration::from_secs(60)));

        let found = store.get_multiple(&["nav", "footer", "absent"]);
        assert_eq!(found.len(), 2);
        assert_eq!(found.get("nav"), Some(&json!(["home", "products"])));
        assert_eq!(found.get("footer"), Some(&json!("© 2026")));
    }

    #[test]
    fn reads_fail_open_when_the_backend_is_down() {
        let store = failing_store();

        assert_eq!(store.get::<String>("k"), None);
        assert_eq!(store.get_or_default("k", 7u32), 7);
        assert!(!store.contains("k"));
        assert!(store.get_multiple(&["a", "b"]).is_empty());
    }

    #[test]
    fn writes_report_failure_without_panicking() {
        let store = failing_store();

        assert!(!store.set("k", "v", Duration::from_secs(60)));
        assert!(!store.delete("k"));
        assert!(!store.clear());
        assert!(!store.set_multiple(
            &HashMap::from([("k".to_string(), json!(1))]),
            Duration::from_secs(60)
        ));
    }

    #[test]
    fn get_or_compute_still_returns_the_value_when_the_backend_is_down() {
        let store = failing_store();
        let calls = Cell::new(0u32);

        let value = store.get_or_compute("k", Duration::from_secs(60), || {
            calls.set(calls.get() + 1);
            42u32
        });
        assert_eq!(value, 42);
        assert_eq!(calls.get(), 1);

        // Nothing was stored, so the producer runs again.
        let again = store.get_or_compute("k", Duration::from_secs(60), || {
            calls.set(calls.get() + 1);
            42u32
        });
        assert_eq!(again, 42);
        assert_eq!(calls.get(), 2);
    }
}
