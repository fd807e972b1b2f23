//! In-memory projection of the profile directory
//!
//! [`ProfileCatalog`] keeps one [`ProfileMeta`] per readable `*.profile` file.
//! It is rebuilt from disk at startup and afterwards kept current by
//! filesystem events (see [`watcher`]).
//!
//! The catalog guards its own entries for readers. Callers that need several
//! mutations to appear atomic (selection, clone, remove) serialize them with the
//! service's operation lock.

#[cfg(feature = "watch")]
pub mod watcher;

use crate::error::{Error, Result};
use crate::profile::{ProfileMeta, id_from_path};
use crate::storage::{JsonStorage, StorageBackend};
use crate::store::ProfileStore;
use log::{debug, info, warn};
use parking_lot::RwLock;
use std::path::Path;
use std::time::Duration;
use uuid::Uuid;

/// Retry schedule for reading a file that was just created by someone else
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeekRetry {
    /// Total number of peek attempts
    pub attempts: u32,
    /// Pause after the first failed attempt
    pub delay: Duration,
    /// Multiplier applied to the pause after each further failure
    pub backoff: u32,
}

impl Default for PeekRetry {
    fn default() -> Self {
        Self {
            attempts: 3,
            delay: Duration::from_millis(500),
            backoff: 1,
        }
    }
}

impl PeekRetry {
    /// Pause after failed attempt number `attempt` (0-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = self.backoff.max(1).saturating_pow(attempt);
        self.delay.saturating_mul(factor)
    }
}

/// Index of all profiles known to exist on disk
pub struct ProfileCatalog<S: StorageBackend = JsonStorage> {
    store: ProfileStore<S>,
    retry: PeekRetry,
    entries: RwLock<Vec<ProfileMeta>>,
}

impl<S: StorageBackend> ProfileCatalog<S> {
    pub fn new(store: ProfileStore<S>, retry: PeekRetry) -> Self {
        Self {
            store,
            retry,
            entries: RwLock::new(Vec::new()),
        }
    }

    pub fn store(&self) -> &ProfileStore<S> {
        &self.store
    }

    /// Re-read every profile file, replacing the current entries.
    ///
    /// Files that cannot be read even after backup recovery are left out.
    /// Returns the number of entries.
    ///
    /// # Errors
    ///
    /// Only fails if the directory exists but cannot be listed.
    pub fn rebuild(&self) -> Result<usize> {
        let files = match self.store.list_files() {
            Ok(files) => files,
            Err(Error::DirectoryRead { source, .. })
                if source.kind() == std::io::ErrorKind::NotFound =>
            {
                Vec::new()
            }
            Err(e) => return Err(e),
        };

        let mut fresh = Vec::with_capacity(files.len());
        for path in files {
            match self.store.peek(&path) {
                Ok(meta) => fresh.push(meta),
                Err(e) => warn!("Skipping profile {}: {e}", path.display()),
            }
        }

        let mut entries = self.entries.write();
        for meta in &mut fresh {
            meta.is_active = entries.iter().any(|m| m.id == meta.id && m.is_active);
        }
        // The active profile is owned here; its file being unreadable right
        // now does not make it go away.
        if let Some(active) = entries.iter().find(|m| m.is_active)
            && !fresh.iter().any(|m| m.id == active.id)
        {
            warn!(
                "Active profile '{}' could not be read from disk, keeping its entry",
                active.name
            );
            fresh.push(active.clone());
        }
        *entries = fresh;

        info!("Profile catalog rebuilt with {} entries", entries.len());
        Ok(entries.len())
    }

    /// Resolve a freshly created file to metadata.
    ///
    /// The writer may not have finished, so the file is peeked up to
    /// `retry.attempts` times. If it never becomes readable a placeholder entry
    /// is returned so the file stays visible and deletable. Returns `None` for
    /// paths that are not profile files.
    pub fn resolve_created(&self, path: &Path) -> Option<ProfileMeta> {
        let id = id_from_path(path)?;
        let attempts = self.retry.attempts.max(1);

        for attempt in 0..attempts {
            match self.store.peek(path) {
                Ok(meta) => return Some(meta),
                Err(e) if e.is_not_found() => {
                    debug!("Created profile {} vanished before it was read", path.display());
                    return None;
                }
                Err(e) => {
                    debug!(
                        "Peek of new profile {} failed (attempt {}/{attempts}): {e}",
                        path.display(),
                        attempt + 1
                    );
                    if attempt + 1 < attempts {
                        std::thread::sleep(self.retry.delay_for(attempt));
                    }
                }
            }
        }

        warn!(
            "Profile {} never became readable, listing it as a placeholder",
            path.display()
        );
        Some(ProfileMeta::placeholder(id, path.to_path_buf()))
    }

    /// Handle a create event; returns the inserted entry
    pub fn on_created(&self, path: &Path) -> Option<ProfileMeta> {
        let meta = self.resolve_created(path)?;
        self.upsert(meta.clone());
        Some(meta)
    }

    /// Handle a delete event; returns the removed entry
    pub fn on_deleted(&self, path: &Path) -> Option<ProfileMeta> {
        let id = id_from_path(path)?;
        self.remove(id)
    }

    /// Insert an entry, or replace the entry with the same id keeping its
    /// active flag
    pub fn upsert(&self, mut meta: ProfileMeta) {
        let mut entries = self.entries.write();
        match entries.iter_mut().find(|m| m.id == meta.id) {
            Some(existing) => {
                meta.is_active = existing.is_active;
                *existing = meta;
            }
            None => {
                meta.is_active = false;
                entries.push(meta);
            }
        }
    }

    /// Remove the entry with `id`
    pub fn remove(&self, id: Uuid) -> Option<ProfileMeta> {
        let mut entries = self.entries.write();
        let index = entries.iter().position(|m| m.id == id)?;
        Some(entries.remove(index))
    }

    /// Mark `id` as the only active entry, or clear the flag everywhere
    pub fn set_active(&self, id: Option<Uuid>) {
        for meta in self.entries.write().iter_mut() {
            meta.is_active = Some(meta.id) == id;
        }
    }

    pub fn get(&self, id: Uuid) -> Option<ProfileMeta> {
        self.entries.read().iter().find(|m| m.id == id).cloned()
    }

    pub fn contains(&self, id: Uuid) -> bool {
        self.entries.read().iter().any(|m| m.id == id)
    }

    /// The active entry, if any
    pub fn active(&self) -> Option<ProfileMeta> {
        self.entries.read().iter().find(|m| m.is_active).cloned()
    }

    /// Snapshot ordered by last use, most recent first
    pub fn list(&self) -> Vec<ProfileMeta> {
        let mut entries = self.entries.read().clone();
        entries.sort_by(|a, b| {
            b.last_used
                .cmp(&a.last_used)
                .then_with(|| a.name.cmp(&b.name))
        });
        entries
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// A name derived from `base` that no entry uses yet
    pub fn unique_copy_name(&self, base: &str) -> String {
        let entries = self.entries.read();
        let taken = |name: &str| entries.iter().any(|m| m.name == name);

        let first = format!("{base} Copy");
        if !taken(&first) {
            return first;
        }
        (2..)
            .map(|n| format!("{base} Copy ({n})"))
            .find(|name| !taken(name))
            .unwrap_or(first)
    }
}

impl<S: StorageBackend> std::fmt::Debug for ProfileCatalog<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProfileCatalog")
            .field("dir", &self.store.dir())
            .field("entries", &self.entries.read().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::ProfileEntity;
    use tempfile::tempdir;

    fn fast_retry() -> PeekRetry {
        PeekRetry {
            attempts: 3,
            delay: Duration::from_millis(10),
            backoff: 1,
        }
    }

    #[test]
    fn test_rebuild_skips_unrecoverable_files() {
        let dir = tempdir().unwrap();
        let store = ProfileStore::json(dir.path());
        let good = store.create(&ProfileEntity::new("Good")).unwrap();
        let bad = store.location(Uuid::new_v4());
        std::fs::write(&bad, b"garbage").unwrap();

        let catalog = ProfileCatalog::new(store, fast_retry());
        assert_eq!(catalog.rebuild().unwrap(), 1);
        assert_eq!(catalog.list()[0].id, good.id);
    }

    #[test]
    fn test_rebuild_missing_dir_is_empty() {
        let dir = tempdir().unwrap();
        let store = ProfileStore::json(dir.path().join("absent"));
        let catalog = ProfileCatalog::new(store, fast_retry());
        assert_eq!(catalog.rebuild().unwrap(), 0);
    }

    #[test]
    fn test_unreadable_created_file_becomes_placeholder() {
        let dir = tempdir().unwrap();
        let store = ProfileStore::json(dir.path());
        let path = store.location(Uuid::new_v4());
        std::fs::write(&path, b"").unwrap();

        let catalog = ProfileCatalog::new(store, fast_retry());
        let meta = catalog.on_created(&path).unwrap();
        assert!(meta.is_placeholder());
        assert!(catalog.contains(meta.id));

        assert!(catalog.on_deleted(&path).is_some());
        assert!(catalog.is_empty());
    }

    #[test]
    fn test_set_active_is_exclusive() {
        let dir = tempdir().unwrap();
        let store = ProfileStore::json(dir.path());
        let a = store.create(&ProfileEntity::new("A")).unwrap();
        let b = store.create(&ProfileEntity::new("B")).unwrap();

        let catalog = ProfileCatalog::new(store, fast_retry());
        catalog.rebuild().unwrap();

        catalog.set_active(Some(a.id));
        catalog.set_active(Some(b.id));
        let active: Vec<_> = catalog.list().into_iter().filter(|m| m.is_active).collect();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, b.id);
    }

    #[test]
    fn test_rebuild_keeps_active_entry_whose_file_is_unreadable() {
        let dir = tempdir().unwrap();
        let store = ProfileStore::json(dir.path());
        let active = store.create(&ProfileEntity::new("Active")).unwrap();
        store.create(&ProfileEntity::new("Other")).unwrap();

        let catalog = ProfileCatalog::new(store, fast_retry());
        catalog.rebuild().unwrap();
        catalog.set_active(Some(active.id));

        std::fs::write(&active.location, b"{\"id\": ").unwrap();
        assert_eq!(catalog.rebuild().unwrap(), 2);
        let kept = catalog.active().unwrap();
        assert_eq!(kept.id, active.id);
        assert_eq!(kept.name, "Active");
    }

    #[test]
    fn test_unique_copy_name() {
        let dir = tempdir().unwrap();
        let store = ProfileStore::json(dir.path());
        let catalog = ProfileCatalog::new(store.clone(), fast_retry());

        let rig = ProfileEntity::new("Rig");
        catalog.upsert(rig.meta(store.location(rig.id())));
        assert_eq!(catalog.unique_copy_name("Rig"), "Rig Copy");

        let copy = ProfileEntity::new("Rig Copy");
        catalog.upsert(copy.meta(store.location(copy.id())));
        assert_eq!(catalog.unique_copy_name("Rig"), "Rig Copy (2)");
    }

    #[test]
    fn test_backoff_delays() {
        let retry = PeekRetry {
            attempts: 4,
            delay: Duration::from_millis(100),
            backoff: 2,
        };
        assert_eq!(retry.delay_for(0), Duration::from_millis(100));
        assert_eq!(retry.delay_for(2), Duration::from_millis(400));
        assert_eq!(PeekRetry::default().delay_for(2), Duration::from_millis(500));
    }
}
