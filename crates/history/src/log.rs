//! The append-only history log.
//!
//! Records are kept most-recent-first. The only mutation is
//! [`HistoryLog::append`], which prepends one record, publishes the new list
//! as a fresh immutable snapshot and then overwrites the stored blob.
//! Readers holding an older snapshot keep seeing a consistent list.

use crate::backend::StorageBackend;
use netgauge_core::ResultRecord;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, warn};

/// Errors raised while persisting the log.
#[derive(Debug, Error)]
pub enum HistoryError {
    /// Backend failure.
    #[error("History storage error: {0}")]
    Io(#[from] std::io::Error),

    /// The log could not be serialized.
    #[error("History serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for history operations.
pub type Result<T> = std::result::Result<T, HistoryError>;

/// Immutable view of the log at one point in time.
pub type Snapshot = Arc<Vec<ResultRecord>>;

/// Ordered, durable log of result records.
pub struct HistoryLog {
    backend: Arc<dyn StorageBackend>,
    key: String,
    records: watch::Sender<Snapshot>,
    writer: Mutex<()>,
}

impl std::fmt::Debug for HistoryLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HistoryLog")
            .field("key", &self.key)
            .field("len", &self.len())
            .finish_non_exhaustive()
    }
}

impl HistoryLog {
    /// Load the log stored under `key`.
    ///
    /// Unreadable or corrupt storage yields an empty log; it is never fatal.
    pub fn load(backend: Arc<dyn StorageBackend>, key: impl Into<String>) -> Self {
        let key = key.into();
        let records = match backend.read(&key) {
            Ok(Some(raw)) => match serde_json::from_str::<Vec<ResultRecord>>(&raw) {
                Ok(records) => {
                    debug!(key = %key, count = records.len(), "Loaded history");
                    records
                }
                Err(e) => {
                    warn!(key = %key, error = %e, "History is corrupt, starting empty");
                    Vec::new()
                }
            },
            Ok(None) => Vec::new(),
            Err(e) => {
                warn!(key = %key, error = %e, "History is unreadable, starting empty");
                Vec::new()
            }
        };

        let (records, _) = watch::channel(Arc::new(records));
        Self {
            backend,
            key,
            records,
            writer: Mutex::new(()),
        }
    }

    /// Current records, most recent first.
    pub fn snapshot(&self) -> Snapshot {
        self.records.borrow().clone()
    }

    /// Receiver notified after every append.
    pub fn subscribe(&self) -> watch::Receiver<Snapshot> {
        self.records.subscribe()
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.records.borrow().len()
    }

    /// Whether the log holds no records.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Human-readable storage location.
    pub fn location(&self) -> String {
        self.backend.location(&self.key)
    }

    /// Prepend `record` and persist the log.
    ///
    /// The in-memory log is updated even when persisting fails; the error is
    /// returned so the caller can report it. The backend write is blocking;
    /// async callers run this on a blocking thread.
    pub fn append(&self, record: ResultRecord) -> Result<()> {
        let _guard = self.writer.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        let current = self.snapshot();
        let mut next = Vec::with_capacity(current.len() + 1);
        next.push(record);
        next.extend(current.iter().cloned());
        let next = Arc::new(next);

        self.records.send_replace(next.clone());

        let serialized = serde_json::to_string(next.as_ref())?;
        self.backend.write(&self.key, &serialized)?;
        debug!(key = %self.key, count = next.len(), "Persisted history");
        Ok(())
    }
}
