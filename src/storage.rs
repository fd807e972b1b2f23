//! Storage backend trait and implementations
//!
//! The backend decides the wire format of profile files. Everything above it
//! only relies on round-trip behavior.

use crate::error::{Error, Result};
use serde::{Serialize, de::DeserializeOwned};
use std::io::Write;
use std::path::Path;

/// Trait for storage backend implementations
pub trait StorageBackend: Clone + Send + Sync {
    /// Serialize data to bytes
    fn serialize<T: Serialize>(&self, data: &T) -> Result<Vec<u8>>;

    /// Deserialize data from bytes
    fn deserialize<T: DeserializeOwned>(&self, content: &[u8]) -> Result<T>;
}

/// Replace `path` with `content` through a synced temporary sibling and a rename.
///
/// Readers observe either the previous file or the complete new one.
pub fn write_atomic(path: &Path, content: &[u8]) -> Result<()> {
    let parent = path.parent().ok_or_else(|| {
        Error::Config(format!(
            "Invalid path '{}': must have a parent directory",
            path.display()
        ))
    })?;
    std::fs::create_dir_all(parent).map_err(|e| Error::DirectoryCreate {
        path: parent.to_path_buf(),
        source: e,
    })?;

    let write_err = |e: std::io::Error| Error::FileWrite {
        path: path.to_path_buf(),
        source: e,
    };

    let mut temp = tempfile::NamedTempFile::new_in(parent).map_err(write_err)?;
    temp.write_all(content).map_err(write_err)?;
    temp.as_file().sync_all().map_err(write_err)?;
    temp.persist(path).map_err(|e| write_err(e.error))?;
    Ok(())
}

// =============================================================================
// JSON Storage Implementation
// =============================================================================

/// JSON storage backend (default)
#[derive(Clone, Debug)]
pub struct JsonStorage {
    /// Pretty print JSON output
    pretty: bool,
}

impl Default for JsonStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl JsonStorage {
    /// Create a new JSON storage backend with pretty printing enabled
    pub fn new() -> Self {
        Self { pretty: true }
    }

    /// Create a compact JSON storage (no pretty printing)
    pub fn compact() -> Self {
        Self { pretty: false }
    }
}

impl StorageBackend for JsonStorage {
    fn serialize<T: Serialize>(&self, data: &T) -> Result<Vec<u8>> {
        if self.pretty {
            serde_json::to_vec_pretty(data).map_err(Error::from)
        } else {
            serde_json::to_vec(data).map_err(Error::from)
        }
    }

    fn deserialize<T: DeserializeOwned>(&self, content: &[u8]) -> Result<T> {
        serde_json::from_slice(content).map_err(Error::from)
    }
}

// =============================================================================
// Tests
// =============================================================================
