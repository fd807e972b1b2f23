//! Error types for profman

use std::path::PathBuf;
use thiserror::Error;
use uuid::Uuid;

/// Result type alias for profman operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for profman
#[derive(Error, Debug)]
pub enum Error {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("Failed to read file '{path}': {source}")]
    FileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write file '{path}': {source}")]
    FileWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to create directory '{path}': {source}")]
    DirectoryCreate {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read directory '{path}': {source}")]
    DirectoryRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to delete file '{path}': {source}")]
    FileDelete {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // -------------------------------------------------------------------------
    // Serialization Errors
    // -------------------------------------------------------------------------
    #[error("Failed to serialize data: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Failed to parse settings: {0}")]
    Parse(String),

    #[error("Profile file '{path}' is corrupt: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    #[error("Profile format version {found} is newer than supported version {supported}")]
    UnsupportedVersion { found: u32, supported: u32 },

    // -------------------------------------------------------------------------
    // Profile Errors
    // -------------------------------------------------------------------------
    #[error("Profile '{0}' is in use by another holder")]
    ProfileInUse(PathBuf),

    #[error("Profile '{0}' not found")]
    ProfileNotFound(Uuid),

    #[error("Cannot remove active profile '{0}'")]
    CannotRemoveActiveProfile(Uuid),

    #[error("Invalid profile name: {0}")]
    InvalidProfileName(String),

    #[error("No profile could be selected or created: {0}")]
    NoProfileAvailable(String),

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to start background thread '{name}': {source}")]
    WorkerSpawn {
        name: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[cfg(feature = "watch")]
    #[error("Profile directory watch failed: {0}")]
    Watch(#[from] notify::Error),
}

impl Error {
    /// Check if this error means the profile file is held, here or elsewhere
    #[must_use]
    pub fn is_in_use(&self) -> bool {
        matches!(
            self,
            Error::ProfileInUse(_) | Error::CannotRemoveActiveProfile(_)
        )
    }

    /// Check if this is a "not found" type error
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::ProfileNotFound(_) => true,
            Error::FileRead { source, .. } | Error::FileDelete { source, .. } => {
                source.kind() == std::io::ErrorKind::NotFound
            }
            _ => false,
        }
    }

    /// Check if this error came from unreadable profile content
    #[must_use]
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            Error::Corrupt { .. } | Error::Parse(_) | Error::Serialize(_)
        )
    }
}
