//! Runtime context: configuration, clock, memory probe, and the cache
//! backend, wired once at process entry.
//!
//! The context is an explicit value passed by reference to every component
//! constructor. Backend selection runs exactly once here; nothing downstream
//! re-evaluates it.

use std::sync::Arc;

use serde_json::Value;
use tracing::{info, warn};

use crate::cache::{CacheBackend, CacheStore, FsBackend, MemoryBackend, RedisBackend, key};
use crate::config::{BackendKind, LoadedConfig, Settings};
use crate::images::ImagePipeline;
use crate::perf::PerformanceRecorder;
use crate::util::clock::{Clock, SystemClock};
use crate::util::mem::{MemoryProbe, NullMemoryProbe, ProcessMemoryProbe};

/// Single point of truth for settings and shared runtime services.
pub struct RuntimeContext {
    settings: Settings,
    tree: Value,
    clock: Arc<dyn Clock>,
    probe: Arc<dyn MemoryProbe>,
    store: Arc<CacheStore>,
}

impl RuntimeContext {
    /// Wire the context with production seams: the system clock, a process
    /// memory probe, and the configured cache backend.
    ///
    /// Telemetry should already be installed so backend fallback warnings
    /// land somewhere visible.
    pub fn initialize(loaded: LoadedConfig) -> Self {
        let probe: Arc<dyn MemoryProbe> = match ProcessMemoryProbe::new() {
            Some(probe) => Arc::new(probe),
            None => Arc::new(NullMemoryProbe),
        };
        Self::with_seams(loaded, Arc::new(SystemClock), probe)
    }

    /// Same wiring with caller-supplied clock and memory probe.
    pub fn with_seams(
        loaded: LoadedConfig,
        clock: Arc<dyn Clock>,
        probe: Arc<dyn MemoryProbe>,
    ) -> Self {
        let backend = select_backend(&loaded.settings, clock.clone());
        Self {
            settings: loaded.settings,
            tree: loaded.tree,
            clock,
            probe,
            store: Arc::new(CacheStore::new(backend)),
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn store(&self) -> &Arc<CacheStore> {
        &self.store
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        self.clock.clone()
    }

    pub fn memory_probe(&self) -> Arc<dyn MemoryProbe> {
        self.probe.clone()
    }

    /// Resolve a dotted path against the merged configuration tree. Any
    /// absent segment resolves to `None`; no error is raised.
    pub fn value(&self, path: &str) -> Option<&Value> {
        let mut current = &self.tree;
        for segment in path.split('.') {
            current = current.as_object()?.get(segment)?;
        }
        Some(current)
    }

    /// Dotted-path lookup with a fallback for absent paths.
    pub fn value_or(&self, path: &str, default: Value) -> Value {
        self.value(path).cloned().unwrap_or(default)
    }

    /// Dotted-path lookup memoized in the cache under `config:<path>`.
    ///
    /// Absent paths are never stored, so a path that appears in a later
    /// deployment is picked up without waiting out a negative entry.
    pub fn cached_config(&self, path: &str) -> Option<Value> {
        let cache_key = key::config_key(path);
        if let Some(value) = self.store.get::<Value>(&cache_key) {
            return Some(value);
        }

        let value = self.value(path)?.clone();
        self.store
            .set(&cache_key, &value, self.settings.cache.config_ttl);
        Some(value)
    }

    /// Build the image pipeline over this context's store and clock.
    pub fn image_pipeline(&self) -> ImagePipeline {
        ImagePipeline::new(
            self.store.clone(),
            self.settings.images.clone(),
            self.clock.clone(),
        )
    }

    /// Start recording metrics for one inbound request.
    pub fn begin_request(&self, uri: impl Into<String>) -> PerformanceRecorder {
        PerformanceRecorder::begin(
            uri,
            self.settings.performance.clone(),
            self.clock.clone(),
            self.probe.clone(),
        )
    }
}

/// Pick the backend once. A primary that fails to come up degrades one step
/// (redis to filesystem, filesystem to memory) with a logged warning.
fn select_backend(settings: &Settings, clock: Arc<dyn Clock>) -> Arc<dyn CacheBackend> {
    match settings.cache.backend {
        BackendKind::Redis => match RedisBackend::connect(&settings.cache.redis_url) {
            Ok(backend) => {
                info!(url = %settings.cache.redis_url, "cache backend: redis");
                Arc::new(backend)
            }
            Err(error) => {
                warn!(
                    url = %settings.cache.redis_url,
                    %error,
                    "redis unavailable, falling back to the filesystem store"
                );
                filesystem_or_memory(settings, clock)
            }
        },
        BackendKind::Filesystem => filesystem_or_memory(settings, clock),
        BackendKind::Memory => {
            info!("cache backend: memory");
            Arc::new(MemoryBackend::new(clock))
        }
    }
}

fn filesystem_or_memory(settings: &Settings, clock: Arc<dyn Clock>) -> Arc<dyn CacheBackend> {
    match FsBackend::new(&settings.cache.directory, clock.clone()) {
        Ok(backend) => {
            info!(directory = %settings.cache.directory.display(), "cache backend: filesystem");
            Arc::new(backend)
        }
        Err(error) => {
            warn!(
                directory = %settings.cache.directory.display(),
                %error,
                "filesystem store unavailable, falling back to the in-memory store"
            );
            Arc::new(MemoryBackend::new(clock))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, UNIX_EPOCH};

    use serde_json::json;

    use crate::util::clock::ManualClock;
    use crate::util::mem::FixedMemoryProbe;

    use super::*;

    fn context_with_tree(tree: Value) -> RuntimeContext {
        let mut loaded = LoadedConfig::defaults();
        loaded.settings.cache.backend = BackendKind::Memory;
        loaded.tree = tree;

        RuntimeContext::with_seams(
            loaded,
            Arc::new(ManualClock::new(UNIX_EPOCH + Duration::from_secs(1_000))),
            Arc::new(FixedMemoryProbe::new(0)),
        )
    }

    #[test]
    fn value_resolves_dotted_paths() {
        let context = context_with_tree(json!({
            "app": { "name": "ossatura", "features": { "webp": true } }
        }));

        assert_eq!(context.value("app.name"), Some(&json!("ossatura")));
        assert_eq!(context.value("app.features.webp"), Some(&json!(true)));
        assert_eq!(context.value("app.missing"), None);
        assert_eq!(context.value("app.name.deeper"), None);
    }

    #[test]
    fn value_or_falls_back_for_absent_paths() {
        let context = context_with_tree(json!({ "app": { "name": "ossatura" } }));

        assert_eq!(
            context.value_or("app.name", json!("fallback")),
            json!("ossatura")
        );
        assert_eq!(
            context.value_or("app.absent", json!("fallback")),
            json!("fallback")
        );
    }

    #[test]
    fn cached_config_memoizes_present_paths() {
        let context = context_with_tree(json!({ "app": { "name": "ossatura" } }));

        assert_eq!(context.cached_config("app.name"), Some(json!("ossatura")));
        assert!(context.store().contains("config:app.name"));

        // Absent paths are not stored as negative entries.
        assert_eq!(context.cached_config("app.absent"), None);
        assert!(!context.store().contains("config:app.absent"));
    }

    #[test]
    fn unreachable_redis_falls_back_to_the_filesystem_store() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let mut loaded = LoadedConfig::defaults();
        loaded.settings.cache.backend = BackendKind::Redis;
        loaded.settings.cache.redis_url = "redis://127.0.0.1:1".to_string();
        loaded.settings.cache.directory = dir.path().join("cache");

        let context = RuntimeContext::with_seams(
            loaded,
            Arc::new(ManualClock::new(UNIX_EPOCH + Duration::from_secs(1_000))),
            Arc::new(FixedMemoryProbe::new(0)),
        );

        // The fallback store is live: writes land on disk.
        assert!(context.store().set("k", "v", Duration::from_secs(60)));
        assert_eq!(context.store().get::<String>("k"), Some("v".to_string()));
        assert!(dir.path().join("cache").is_dir());
    }
}
