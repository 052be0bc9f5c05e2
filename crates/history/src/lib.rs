//! History store for netgauge.
//!
//! Keeps a durable, most-recent-first log of every test run.
//!
//! # Quick Start
//!
//! ```no_run
//! use netgauge_history::{FileBackend, HistoryLog};
//! use std::sync::Arc;
//!
//! let log = HistoryLog::load(Arc::new(FileBackend::new(".netgauge")), "speedtest-history");
//! for record in log.snapshot().iter() {
//!     println!("{}: {:?} Mbps down", record.display_timestamp(), record.download_mbps);
//! }
//! ```
//!
//! # Modules
//!
//! - [`backend`] - The `StorageBackend` trait and an in-memory backend
//! - [`io`] - Filesystem backend
//! - [`log`] - The append-only `HistoryLog`
//! - [`markdown`] - Markdown rendering

#![warn(missing_docs, rust_2018_idioms)]
#![deny(unsafe_code)]

pub mod backend;
pub mod io;
pub mod log;
pub mod markdown;

pub use backend::{MemoryBackend, StorageBackend};
pub use io::FileBackend;
pub use log::{HistoryError, HistoryLog, Snapshot};

use netgauge_core::config::HistorySettings;
use std::sync::Arc;

/// Open the file-backed log described by `settings`.
pub fn open(settings: &HistorySettings) -> HistoryLog {
    HistoryLog::load(Arc::new(FileBackend::new(&settings.dir)), settings.key.clone())
}
