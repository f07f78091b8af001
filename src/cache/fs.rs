//! Filesystem backend: one JSON document per key.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::util::clock::{Clock, unix_seconds};

use super::backend::{BackendError, CacheBackend};

#[derive(Debug, Serialize, Deserialize)]
struct StoredEntry {
    expires_at: u64,
    value: Value,
}

/// Durable local backend, and the startup fallback when the remote store is
/// unreachable.
///
/// Sanitized keys contain only `[A-Za-z0-9._-]`, so the key itself is a safe
/// file name; no traversal component survives sanitization. Writes are plain
/// `fs::write` with no rename dance — a reader racing a writer can observe a
/// torn document, which decodes as an error and reads as a miss.
pub struct FsBackend {
    root: PathBuf,
    clock: Arc<dyn Clock>,
}

impl FsBackend {
    /// Open the store rooted at `root`, creating the directory if needed.
    pub fn new(root: impl Into<PathBuf>, clock: Arc<dyn Clock>) -> Result<Self, std::io::Error> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root, clock })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.root.join(format!("{key}.json"))
    }

    fn now(&self) -> u64 {
        unix_seconds(self.clock.now())
    }
}

impl CacheBackend for FsBackend {
    fn read(&self, key: &str) -> Result<Option<Value>, BackendError> {
        let path = self.entry_path(key);
        let raw = match fs::read(&path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };

        let entry: StoredEntry = serde_json::from_slice(&raw)?;
        if entry.expires_at <= self.now() {
            // Lazy expiry: drop the stale document on the way out.
            if let Err(err) = fs::remove_file(&path) {
                debug!(key, error = %err, "failed to remove expired cache file");
            }
            return Ok(None);
        }

        Ok(Some(entry.value))
    }

    fn write(&self, key: &str, value: &Value, ttl: Duration) -> Result<(), BackendError> {
        let entry = StoredEntry {
            expires_at: self.now().saturating_add(ttl.as_secs().max(1)),
            value: value.clone(),
        };
        let encoded = serde_json::to_vec(&entry)?;
        fs::write(self.entry_path(key), encoded)?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<bool, BackendError> {
        match fs::remove_file(self.entry_path(key)) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    fn contains(&self, key: &str) -> Result<bool, BackendError> {
        Ok(self.read(key)?.is_some())
    }

    fn clear(&self) -> Result<(), BackendError> {
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                fs::remove_file(entry.path())?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::UNIX_EPOCH;

    use serde_json::json;
    use tempfile::TempDir;

    use crate::util::clock::ManualClock;

    use super::*;

    fn backend_in(dir: &TempDir) -> (FsBackend, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(UNIX_EPOCH + Duration::from_secs(1_000)));
        let backend = FsBackend::new(dir.path().join("cache"), clock.clone()).expect("open store");
        (backend, clock)
    }

    #[test]
    fn write_then_read_roundtrips() {
        let dir = TempDir::new().expect("tempdir");
        let (backend, _clock) = backend_in(&dir);

        backend
            .write("user.pref", &json!("dark"), Duration::from_secs(60))
            .expect("write");

        assert_eq!(backend.read("user.pref").expect("read"), Some(json!("dark")));
    }

    #[test]
    fn expired_entries_read_as_miss_and_are_removed() {
        let dir = TempDir::new().expect("tempdir");
        let (backend, clock) = backend_in(&dir);

        backend
            .write("user.pref", &json!("dark"), Duration::from_secs(60))
            .expect("write");
        clock.advance(Duration::from_secs(61));

        assert_eq!(backend.read("user.pref").expect("read"), None);
        assert!(!backend.entry_path("user.pref").exists());
    }

    #[test]
    fn remove_reports_presence() {
        let dir = TempDir::new().expect("tempdir");
        let (backend, _clock) = backend_in(&dir);

        backend
            .write("k", &json!(1), Duration::from_secs(60))
            .expect("write");

        assert!(backend.remove("k").expect("remove"));
        assert!(!backend.remove("k").expect("remove again"));
    }

    #[test]
    fn clear_empties_the_directory() {
        let dir = TempDir::new().expect("tempdir");
        let (backend, _clock) = backend_in(&dir);

        backend
            .write("a", &json!(1), Duration::from_secs(60))
            .expect("write");
        backend
            .write("b", &json!(2), Duration::from_secs(60))
            .expect("write");
        backend.clear().expect("clear");

        assert_eq!(backend.read("a").expect("read"), None);
        assert_eq!(backend.read("b").expect("read"), None);
    }

    #[test]
    fn torn_document_reads_as_error_not_panic() {
        let dir = TempDir::new().expect("tempdir");
        let (backend, _clock) = backend_in(&dir);

        fs::write(backend.entry_path("torn"), b"{\"expires_at\": 99").expect("write torn");

        assert!(backend.read("torn").is_err());
    }
}
