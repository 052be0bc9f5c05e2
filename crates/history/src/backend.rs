//! Storage backends for the history log.
//!
//! The log is persisted as one serialized blob under a single key. Backends
//! only need to read and overwrite that blob, which keeps the log testable
//! without a real storage medium.

use std::collections::HashMap;
use std::io;
use std::sync::Mutex;

/// Key-value storage holding serialized history blobs.
pub trait StorageBackend: Send + Sync {
    /// Read the blob stored under `key`. `Ok(None)` means nothing was stored yet.
    fn read(&self, key: &str) -> io::Result<Option<String>>;

    /// Replace the blob stored under `key`.
    fn write(&self, key: &str, value: &str) -> io::Result<()>;

    /// Human-readable location of `key`, for status output.
    fn location(&self, key: &str) -> String;
}

/// In-memory backend, mostly for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    entries: Mutex<HashMap<String, String>>,
    fail_writes: bool,
}

impl MemoryBackend {
    /// Create an empty backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a backend pre-populated with one entry.
    pub fn with_entry(key: impl Into<String>, value: impl Into<String>) -> Self {
        let backend = Self::new();
        backend.lock().insert(key.into(), value.into());
        backend
    }

    /// Create a backend whose writes always fail.
    pub fn failing() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            fail_writes: true,
        }
    }

    /// Current raw value stored under `key`.
    pub fn raw(&self, key: &str) -> Option<String> {
        self.lock().get(key).cloned()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl StorageBackend for MemoryBackend {
    fn read(&self, key: &str) -> io::Result<Option<String>> {
        Ok(self.raw(key))
    }

    fn write(&self, key: &str, value: &str) -> io::Result<()> {
        if self.fail_writes {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "memory backend is read-only",
            ));
        }
        self.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn location(&self, key: &str) -> String {
        format!("memory:{}", key)
    }
}
