//! Profile file persistence
//!
//! [`ProfileStore`] maps profile entities to one file each and owns the three
//! file protocols of the crate:
//!
//! - **Save**: backup-then-overwrite through an exclusive handle. The current
//!   on-disk content is copied to `<location>.bkp` before the primary is
//!   truncated and rewritten, so a crash mid-write leaves a good backup behind.
//! - **Peek**: a shared, read-only look at a file's identity that works while
//!   another handle owns the file.
//! - **Recovery**: unreadable content is replaced by the backup once, then
//!   read again. A second failure is reported to the caller.
//!
//! The primary file is never replaced by rename: the ownership lock lives on
//! the open file, and a rename would leave it on an orphaned inode.

mod handle;

pub use handle::ProfileHandle;
pub(crate) use handle::OpenMode;

use crate::error::{Error, Result};
use crate::profile::{
    PROFILE_EXTENSION, ProfileEntity, ProfileFile, ProfileFileRef, ProfileHeader, ProfileMeta,
    backup_location, check_format_version, id_from_path, profile_location,
};
use crate::storage::{JsonStorage, StorageBackend, write_atomic};
use log::{debug, info, warn};
use std::path::{Path, PathBuf};

/// A profile opened with exclusive ownership
#[derive(Debug)]
pub struct OpenProfile {
    pub entity: ProfileEntity,
    pub handle: ProfileHandle,
}

/// Reads and writes profile files in one directory
#[derive(Clone, Debug)]
pub struct ProfileStore<S: StorageBackend = JsonStorage> {
    dir: PathBuf,
    storage: S,
}

impl ProfileStore<JsonStorage> {
    /// Store using pretty-printed JSON files
    pub fn json(dir: impl Into<PathBuf>) -> Self {
        Self::new(dir, JsonStorage::new())
    }
}

impl<S: StorageBackend> ProfileStore<S> {
    pub fn new(dir: impl Into<PathBuf>, storage: S) -> Self {
        Self {
            dir: dir.into(),
            storage,
        }
    }

    /// Profile directory
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Location of the profile file for `id`
    pub fn location(&self, id: uuid::Uuid) -> PathBuf {
        profile_location(&self.dir, id)
    }

    /// All `<uuid>.profile` files in the profile directory
    ///
    /// # Errors
    ///
    /// Returns `Error::DirectoryRead` if the directory cannot be listed.
    pub fn list_files(&self) -> Result<Vec<PathBuf>> {
        let dir_err = |e| Error::DirectoryRead {
            path: self.dir.clone(),
            source: e,
        };

        let mut files = Vec::new();
        for entry in std::fs::read_dir(&self.dir).map_err(dir_err)? {
            let path = entry.map_err(dir_err)?.path();
            if path.is_file() && id_from_path(&path).is_some() {
                files.push(path);
            } else if path.extension().is_some_and(|ext| ext == PROFILE_EXTENSION) {
                debug!("Ignoring foreign profile file name {}", path.display());
            }
        }
        files.sort();
        Ok(files)
    }

    // =========================================================================
    // Encoding
    // =========================================================================

    fn encode(&self, entity: &ProfileEntity) -> Result<Vec<u8>> {
        self.storage.serialize(&ProfileFileRef::new(entity))
    }

    fn decode(&self, path: &Path, content: &[u8]) -> Result<ProfileEntity> {
        let file: ProfileFile = self
            .storage
            .deserialize(content)
            .map_err(|e| corrupt(path, &e))?;
        check_format_version(file.format_version)?;
        Ok(file.profile)
    }

    fn decode_meta(&self, path: &Path, content: &[u8]) -> Result<ProfileMeta> {
        let header: ProfileHeader = self
            .storage
            .deserialize(content)
            .map_err(|e| corrupt(path, &e))?;
        check_format_version(header.format_version)?;

        if id_from_path(path) != Some(header.id) {
            warn!(
                "Profile file {} carries id {}, which does not match its name",
                path.display(),
                header.id
            );
        }

        Ok(ProfileMeta {
            id: header.id,
            name: header.name,
            location: path.to_path_buf(),
            last_used: header.last_used,
            is_active: false,
        })
    }

    // =========================================================================
    // Save
    // =========================================================================

    /// Persist `entity` through an already-owned handle.
    ///
    /// Writing identical content is a no-op, so two saves of unchanged state
    /// in quick succession produce a single write. Returns whether the file
    /// was written.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization, the backup or the write fails. The
    /// in-memory entity is untouched either way.
    pub fn save(&self, entity: &ProfileEntity, handle: &mut ProfileHandle) -> Result<bool> {
        let content = self.encode(entity)?;
        let current = handle.read_all()?;

        if current == content {
            debug!("Profile {} unchanged, skipping write", entity.id());
            return Ok(false);
        }

        // A torn primary must not clobber the last good backup.
        if !current.is_empty() && self.decode_meta(handle.location(), &current).is_ok() {
            write_atomic(&backup_location(handle.location()), &current)?;
        }

        handle.overwrite(&content)?;
        debug!("Saved profile {} to {}", entity.id(), handle.location().display());
        Ok(true)
    }

    /// Write a profile that has no file yet, then release it.
    ///
    /// # Errors
    ///
    /// Fails if the location already exists or cannot be written.
    pub fn create(&self, entity: &ProfileEntity) -> Result<ProfileMeta> {
        crate::fsutil::ensure_private_dir(&self.dir)?;

        let location = self.location(entity.id());
        let mut handle = ProfileHandle::acquire(&location, OpenMode::CreateNew)?;
        if let Err(e) = self.save(entity, &mut handle) {
            handle.release();
            let _ = std::fs::remove_file(&location);
            return Err(e);
        }
        handle.release();

        info!("Created profile '{}' ({})", entity.name(), entity.id());
        Ok(entity.meta(location))
    }

    // =========================================================================
    // Peek
    // =========================================================================

    /// Read the identity of a profile without taking ownership.
    ///
    /// Unreadable content is restored from the backup and read once more when
    /// nobody owns the file. An owned file is left alone and its identity is
    /// read from the backup instead, since the owner may be mid-write.
    ///
    /// # Errors
    ///
    /// Returns the read error, `Error::Corrupt` if recovery was not possible,
    /// or `Error::ProfileInUse` if the file is unreadable, owned, and has no
    /// readable backup.
    pub fn peek(&self, path: &Path) -> Result<ProfileMeta> {
        let content = std::fs::read(path).map_err(|e| Error::FileRead {
            path: path.to_path_buf(),
            source: e,
        })?;

        match self.decode_meta(path, &content) {
            Ok(meta) => Ok(meta),
            Err(e) if e.is_corruption() => {
                warn!("Profile {} unreadable ({e}), trying backup", path.display());
                let mut handle = match ProfileHandle::acquire(path, OpenMode::Existing) {
                    Ok(handle) => handle,
                    Err(in_use) if in_use.is_in_use() => {
                        return self.peek_backup(path).ok_or(in_use);
                    }
                    Err(e) => return Err(e),
                };
                self.restore_backup(&mut handle, |content| {
                    self.decode_meta(path, content).map(|_| ())
                })?;
                let content = handle.read_all()?;
                handle.release();
                self.decode_meta(path, &content)
            }
            Err(e) => Err(e),
        }
    }

    /// Identity stored in the backup of `path`, without touching either file
    fn peek_backup(&self, path: &Path) -> Option<ProfileMeta> {
        let content = std::fs::read(backup_location(path)).ok()?;
        let meta = self.decode_meta(path, &content).ok()?;
        debug!("Read identity of owned profile {} from its backup", path.display());
        Some(meta)
    }

    // =========================================================================
    // Open / Load
    // =========================================================================

    /// Take ownership of a profile file and read it fully, without modifying it.
    ///
    /// # Errors
    ///
    /// Returns `Error::ProfileInUse` if another handle owns the file, or
    /// `Error::Corrupt` if neither the file nor its backup can be read.
    pub fn open(&self, path: &Path) -> Result<OpenProfile> {
        let mut handle = ProfileHandle::acquire(path, OpenMode::Existing)?;
        let content = handle.read_all()?;

        let entity = match self.decode(path, &content) {
            Ok(entity) => entity,
            Err(e) if e.is_corruption() => {
                warn!("Profile {} unreadable ({e}), trying backup", path.display());
                self.restore_backup(&mut handle, |content| {
                    self.decode(path, content).map(|_| ())
                })?;
                let content = handle.read_all()?;
                self.decode(path, &content)?
            }
            Err(e) => return Err(e),
        };

        Ok(OpenProfile { entity, handle })
    }

    /// Take ownership of a profile, mark it used now and persist that.
    ///
    /// # Errors
    ///
    /// As [`ProfileStore::open`], plus any save failure.
    pub fn load(&self, path: &Path) -> Result<OpenProfile> {
        let mut opened = self.open(path)?;
        opened.entity.touch();
        self.save(&opened.entity, &mut opened.handle)?;
        Ok(opened)
    }

    // =========================================================================
    // Delete
    // =========================================================================

    /// Delete a profile file and its backup.
    ///
    /// # Errors
    ///
    /// Returns `Error::ProfileInUse` while any handle owns the file.
    pub fn delete(&self, path: &Path) -> Result<()> {
        let handle = ProfileHandle::acquire(path, OpenMode::Existing)?;
        let result = std::fs::remove_file(path).map_err(|e| Error::FileDelete {
            path: path.to_path_buf(),
            source: e,
        });
        handle.release();
        result?;

        let backup = backup_location(path);
        match std::fs::remove_file(&backup) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Could not delete backup {}: {e}", backup.display()),
        }

        info!("Deleted profile file {}", path.display());
        Ok(())
    }

    // =========================================================================
    // Recovery
    // =========================================================================

    /// Copy the backup over the owned primary if the backup passes `check`
    fn restore_backup<F>(&self, handle: &mut ProfileHandle, check: F) -> Result<()>
    where
        F: Fn(&[u8]) -> Result<()>,
    {
        let location = handle.location().to_path_buf();
        let backup = backup_location(&location);

        let content = match std::fs::read(&backup) {
            Ok(content) => content,
            Err(e) => {
                warn!("No usable backup for {}: {e}", location.display());
                return Err(Error::Corrupt {
                    path: location,
                    reason: format!("backup unavailable: {e}"),
                });
            }
        };

        if let Err(e) = check(&content) {
            warn!("Backup {} is unreadable too: {e}", backup.display());
            return Err(Error::Corrupt {
                path: location,
                reason: format!("backup unreadable: {e}"),
            });
        }

        handle.overwrite(&content)?;
        info!("Restored {} from backup", location.display());
        Ok(())
    }
}

fn corrupt(path: &Path, err: &Error) -> Error {
    Error::Corrupt {
        path: path.to_path_buf(),
        reason: err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn store() -> (tempfile::TempDir, ProfileStore) {
        let dir = tempdir().unwrap();
        let store = ProfileStore::json(dir.path());
        (dir, store)
    }

    #[test]
    fn test_save_skips_identical_content() {
        let (_dir, store) = store();
        let entity = ProfileEntity::new("Rig");
        let meta = store.create(&entity).unwrap();

        let mut opened = store.open(&meta.location).unwrap();
        assert!(!store.save(&opened.entity, &mut opened.handle).unwrap());
        assert!(!backup_location(&meta.location).exists());
    }

    #[test]
    fn test_save_backs_up_previous_content() {
        let (_dir, store) = store();
        let entity = ProfileEntity::new("Rig");
        let meta = store.create(&entity).unwrap();
        let before = std::fs::read(&meta.location).unwrap();

        let mut opened = store.open(&meta.location).unwrap();
        opened.entity.settings_mut().set("camera.gain", 7).unwrap();
        store.save(&opened.entity, &mut opened.handle).unwrap();

        assert_eq!(std::fs::read(backup_location(&meta.location)).unwrap(), before);
    }

    #[test]
    fn test_torn_primary_keeps_old_backup() {
        let (_dir, store) = store();
        let entity = ProfileEntity::new("Rig");
        let meta = store.create(&entity).unwrap();
        let good = std::fs::read(&meta.location).unwrap();
        std::fs::write(backup_location(&meta.location), &good).unwrap();

        let mut handle = ProfileHandle::acquire(&meta.location, OpenMode::Existing).unwrap();
        handle.overwrite(b"{\"id\": ").unwrap();
        store.save(&entity, &mut handle).unwrap();

        assert_eq!(std::fs::read(backup_location(&meta.location)).unwrap(), good);
    }

    #[test]
    fn test_create_refuses_existing_location() {
        let (_dir, store) = store();
        let entity = ProfileEntity::new("Rig");
        store.create(&entity).unwrap();
        assert!(store.create(&entity).is_err());
    }

    #[test]
    fn test_list_files_ignores_backups_and_foreign_names() {
        let (dir, store) = store();
        let meta = store.create(&ProfileEntity::new("A")).unwrap();
        std::fs::write(backup_location(&meta.location), b"{}").unwrap();
        std::fs::write(dir.path().join("notes.profile"), b"{}").unwrap();
        std::fs::write(dir.path().join("other.txt"), b"").unwrap();

        assert_eq!(store.list_files().unwrap(), vec![meta.location]);
    }

    #[test]
    fn test_delete_refused_while_owned() {
        let (_dir, store) = store();
        let meta = store.create(&ProfileEntity::new("A")).unwrap();

        let opened = store.open(&meta.location).unwrap();
        assert!(store.delete(&meta.location).unwrap_err().is_in_use());
        drop(opened);

        store.delete(&meta.location).unwrap();
        assert!(!meta.location.exists());
    }
}
