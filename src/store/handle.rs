//! Exclusive handle on a profile file
//!
//! Ownership of a profile between processes rests entirely on the operating
//! system lock taken here. The lock belongs to the open file, so it is released
//! when the handle is dropped.

use crate::error::{Error, Result};
use log::trace;
use std::fs::{File, OpenOptions, TryLockError};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// An open, exclusively locked profile file
#[derive(Debug)]
pub struct ProfileHandle {
    file: File,
    location: PathBuf,
}

/// How [`ProfileHandle::acquire`] treats a missing file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum OpenMode {
    /// The file must already exist
    Existing,
    /// The file must not exist yet
    CreateNew,
}

impl ProfileHandle {
    /// Open `location` for reading and writing and take the exclusive lock.
    ///
    /// Fails with `Error::ProfileInUse` if another handle, in this process or
    /// another one, holds the lock.
    pub(crate) fn acquire(location: &Path, mode: OpenMode) -> Result<Self> {
        let mut options = OpenOptions::new();
        options.read(true).write(true);
        if mode == OpenMode::CreateNew {
            options.create_new(true);
        }
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }

        let file = options.open(location).map_err(|e| match mode {
            OpenMode::Existing => Error::FileRead {
                path: location.to_path_buf(),
                source: e,
            },
            OpenMode::CreateNew => Error::FileWrite {
                path: location.to_path_buf(),
                source: e,
            },
        })?;

        // A fresh file can only be held by a short-lived peek of it
        if mode == OpenMode::CreateNew {
            file.lock().map_err(|e| Error::FileWrite {
                path: location.to_path_buf(),
                source: e,
            })?;
            trace!("Created and locked {}", location.display());
            return Ok(Self {
                file,
                location: location.to_path_buf(),
            });
        }

        match file.try_lock() {
            Ok(()) => {}
            Err(TryLockError::WouldBlock) => {
                return Err(Error::ProfileInUse(location.to_path_buf()));
            }
            Err(TryLockError::Error(e)) => {
                return Err(Error::FileRead {
                    path: location.to_path_buf(),
                    source: e,
                });
            }
        }

        trace!("Acquired exclusive handle on {}", location.display());
        Ok(Self {
            file,
            location: location.to_path_buf(),
        })
    }

    /// Take ownership of an existing profile file without reading it
    ///
    /// # Errors
    ///
    /// Returns `Error::ProfileInUse` if the file is owned elsewhere, or a read
    /// error if it cannot be opened.
    pub fn lock(location: &Path) -> Result<Self> {
        Self::acquire(location, OpenMode::Existing)
    }

    /// Path this handle owns
    pub fn location(&self) -> &Path {
        &self.location
    }

    /// Read the whole current content through the handle
    pub(crate) fn read_all(&mut self) -> Result<Vec<u8>> {
        let read_err = |e| Error::FileRead {
            path: self.location.clone(),
            source: e,
        };
        self.file.seek(SeekFrom::Start(0)).map_err(read_err)?;
        let mut content = Vec::new();
        self.file.read_to_end(&mut content).map_err(read_err)?;
        Ok(content)
    }

    /// Truncate, write `content` and flush it to disk
    pub(crate) fn overwrite(&mut self, content: &[u8]) -> Result<()> {
        let write_err = |e| Error::FileWrite {
            path: self.location.clone(),
            source: e,
        };
        self.file.seek(SeekFrom::Start(0)).map_err(write_err)?;
        self.file.set_len(0).map_err(write_err)?;
        self.file.write_all(content).map_err(write_err)?;
        self.file.sync_all().map_err(write_err)
    }

    /// Release the lock and close the file
    pub fn release(self) {
        if let Err(e) = self.file.unlock() {
            trace!("Unlock of {} failed: {e}", self.location.display());
        }
        trace!("Released handle on {}", self.location.display());
    }
}
