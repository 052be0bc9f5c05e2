//! Filesystem backend for the history log.
//!
//! Each key maps to `<dir>/<key>.json`. Writes go to a sibling temporary
//! file first and are renamed into place, so a crash mid-write leaves the
//! previous log intact.

use crate::backend::StorageBackend;
use std::fs;
use std::io;
use std::path::PathBuf;

/// File extension of stored blobs.
pub const EXTENSION: &str = "json";

/// Stores each key as a JSON file inside one directory.
#[derive(Debug, Clone)]
pub struct FileBackend {
    dir: PathBuf,
}

impl FileBackend {
    /// Create a backend rooted at `dir`. The directory is created on first write.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// File path holding `key`.
    pub fn path_for(&self, key: &str) -> PathBuf {
        let name = key.replace(['/', '\\'], "_");
        self.dir.join(format!("{}.{}", name, EXTENSION))
    }
}

impl StorageBackend for FileBackend {
    fn read(&self, key: &str) -> io::Result<Option<String>> {
        match fs::read_to_string(self.path_for(key)) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn write(&self, key: &str, value: &str) -> io::Result<()> {
        fs::create_dir_all(&self.dir)?;
        let path = self.path_for(key);
        let tmp = path.with_extension(format!("{}.tmp", EXTENSION));
        fs::write(&tmp, value)?;
        fs::rename(&tmp, &path)
    }

    fn location(&self, key: &str) -> String {
        self.path_for(key).display().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_for_sanitizes_key() {
        let backend = FileBackend::new("/tmp/netgauge");
        assert_eq!(backend.path_for("a/b"), PathBuf::from("/tmp/netgauge/a_b.json"));
    }
}
