use crate::catalog::ProfileCatalog;
use crate::config::ServiceConfig;
use crate::error::{Error, Result};
use crate::events::EventManager;
use crate::fsutil::ensure_private_dir;
use crate::migration::{MigrationEngine, MigrationStrategy};
use crate::profile::{ProfileEntity, ProfileMeta};
use crate::service::scheduler::SaveScheduler;
use crate::storage::{JsonStorage, StorageBackend};
use crate::store::{ProfileHandle, ProfileStore};

use log::{debug, error, info, warn};
use parking_lot::{Mutex, RwLock};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

/// Lifecycle of the active profile slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ActiveState {
    /// No profile is active
    #[default]
    Unselected,
    /// A profile is being opened
    Loading,
    /// A profile is active and owns its file
    Active,
    /// The active profile is being saved and released
    Deactivating,
}

/// The loaded active profile together with the writer owning its file
#[derive(Debug)]
pub(crate) struct ActiveProfile {
    pub entity: ProfileEntity,
    pub writer: Arc<ProfileWriter>,
}

impl ActiveProfile {
    pub fn new(entity: ProfileEntity, handle: ProfileHandle) -> Self {
        Self {
            entity,
            writer: Arc::new(ProfileWriter::new(handle)),
        }
    }
}

#[derive(Debug)]
struct WriterState {
    /// `None` once the profile has been released
    handle: Option<ProfileHandle>,
    /// Sequence number of the newest snapshot written
    written: u64,
}

/// Serializes file writes of one active profile.
///
/// Writes work on snapshots taken under the `active` lock and run under this
/// lock only, so editing never waits for disk I/O. Snapshots are numbered; a
/// snapshot older than the last one written is dropped.
#[derive(Debug)]
pub(crate) struct ProfileWriter {
    state: Mutex<WriterState>,
}

impl ProfileWriter {
    fn new(handle: ProfileHandle) -> Self {
        Self {
            state: Mutex::new(WriterState {
                handle: Some(handle),
                written: 0,
            }),
        }
    }

    /// Write snapshot number `seq`; returns whether the file changed
    pub fn write<S: StorageBackend>(
        &self,
        store: &ProfileStore<S>,
        entity: &ProfileEntity,
        seq: u64,
    ) -> Result<bool> {
        let mut state = self.state.lock();
        if seq <= state.written {
            debug!("Dropping stale snapshot {seq} of profile {}", entity.id());
            return Ok(false);
        }
        let Some(handle) = state.handle.as_mut() else {
            debug!("Profile {} already released, not saving", entity.id());
            return Ok(false);
        };
        let written = store.save(entity, handle)?;
        state.written = seq;
        Ok(written)
    }

    /// Give up the file; later writes are ignored
    pub fn release(&self) {
        if let Some(handle) = self.state.lock().handle.take() {
            handle.release();
        }
    }
}

/// State shared between the service, its worker threads and listeners
pub(crate) struct ServiceInner<S: StorageBackend> {
    pub config: ServiceConfig<S>,
    pub catalog: ProfileCatalog<S>,
    pub events: Arc<EventManager>,

    /// Linearizes select, clone, remove, add and catalog mutation
    pub op_lock: Mutex<()>,

    /// The active profile; also serializes saves of it
    pub active: Mutex<Option<ActiveProfile>>,

    pub state: RwLock<ActiveState>,
    pub saves: SaveScheduler,

    /// Numbers snapshots of the active profile for its writer
    pub snapshots: AtomicU64,
}

impl<S: StorageBackend> ServiceInner<S> {
    pub fn store(&self) -> &ProfileStore<S> {
        self.catalog.store()
    }

    /// Next snapshot sequence number; take it while holding `active`
    pub fn next_snapshot(&self) -> u64 {
        self.snapshots.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Write the final state of a profile leaving the active slot, then
    /// release its file
    pub fn retire(&self, previous: ActiveProfile, reason: &str) {
        let seq = self.next_snapshot();
        if let Err(e) = previous.writer.write(self.store(), &previous.entity, seq) {
            error!(
                "Could not save profile '{}' {reason}: {e}",
                previous.entity.name()
            );
        }
        previous.writer.release();
    }

    pub fn set_state(&self, state: ActiveState) {
        let mut current = self.state.write();
        if *current != state {
            debug!("Active profile state {:?} -> {state:?}", *current);
            *current = state;
        }
    }

    /// Populate an empty profile directory from legacy data
    fn migrate_if_empty(&self) -> Result<()> {
        if !self.catalog.is_empty() {
            return Ok(());
        }

        match &self.config.migration {
            MigrationStrategy::None => {
                debug!("No profiles found and migration disabled");
            }
            MigrationStrategy::Custom(migrate) => {
                info!("No profiles found, running custom migration");
                if let Err(e) = migrate(self.store().dir()) {
                    warn!("Custom migration failed: {e}");
                }
                self.catalog.rebuild()?;
            }
            MigrationStrategy::Auto => {
                info!("No profiles found, looking for legacy settings");
                let report = MigrationEngine::new(
                    self.store(),
                    Some(&self.config.legacy_aggregate_file),
                    Some(&self.config.legacy_settings_file),
                    &self.config.legacy_keys,
                )
                .run();
                debug!(
                    "Migration from {:?}: {} profiles, {} skipped",
                    report.source,
                    report.migrated.len(),
                    report.skipped
                );
                for meta in report.migrated {
                    self.catalog.upsert(meta);
                }
            }
        }
        Ok(())
    }

    /// Save and release the active profile
    pub fn deactivate(&self) {
        let mut active = self.active.lock();
        let Some(previous) = active.take() else {
            return;
        };

        self.set_state(ActiveState::Deactivating);
        self.saves.take_pending();
        let name = previous.entity.name().to_string();
        self.retire(previous, "on release");
        self.catalog.set_active(None);
        self.set_state(ActiveState::Unselected);
        info!("Released profile '{name}'");
    }
}

/// Profile service: owns the catalog, the active profile and the save timer.
///
/// One instance per process (or per profile directory in tests). Construct it
/// at startup with [`ProfileService::open`] and hand out references; there is
/// no global state.
///
/// # Example
///
/// ```rust,no_run
/// use profman::{ProfileService, ServiceConfig};
///
/// let config = ServiceConfig::builder("observatory").build();
/// let service = ProfileService::open(config)?;
///
/// let active = service.active_meta().expect("startup selects a profile");
/// println!("Running with profile '{}'", active.name);
///
/// service.update_settings(|doc| doc.set("camera.gain", 120))?;
/// # Ok::<(), profman::Error>(())
/// ```
pub struct ProfileService<S: StorageBackend = JsonStorage> {
    pub(crate) inner: Arc<ServiceInner<S>>,

    #[cfg(feature = "watch")]
    pub(crate) watch: Option<crate::service::watch::WatchWorker>,
}

impl ProfileService<JsonStorage> {
    /// Open the service with a default configuration for `app_name`
    ///
    /// # Errors
    ///
    /// See [`ProfileService::open`].
    pub fn with_app_name(app_name: impl Into<String>) -> Result<Self> {
        Self::open(ServiceConfig::builder(app_name).build())
    }
}

impl<S: StorageBackend + 'static> ProfileService<S> {
    /// Start the service.
    ///
    /// Creates the profile directory, builds the catalog, migrates legacy data
    /// when no profile exists, and selects the most recently used profile that
    /// is not open elsewhere. A default profile is created when none can be
    /// selected.
    ///
    /// # Errors
    ///
    /// Returns `Error::NoProfileAvailable` if no profile could be selected or
    /// created, or an I/O error if the profile directory is unusable.
    pub fn open(config: ServiceConfig<S>) -> Result<Self> {
        ensure_private_dir(&config.profile_dir)?;

        let store = ProfileStore::new(config.profile_dir.clone(), config.storage.clone());
        let catalog = ProfileCatalog::new(store, config.peek_retry);
        catalog.rebuild()?;

        let saves = SaveScheduler::new(config.save_delay, config.schedule_lock_timeout);
        let inner = Arc::new(ServiceInner {
            config,
            catalog,
            events: Arc::new(EventManager::new()),
            op_lock: Mutex::new(()),
            active: Mutex::new(None),
            state: RwLock::new(ActiveState::Unselected),
            saves,
            snapshots: AtomicU64::new(0),
        });

        inner.migrate_if_empty()?;

        let weak = Arc::downgrade(&inner);
        inner
            .saves
            .start(move || {
                if let Some(inner) = weak.upgrade() {
                    inner.save_active_logged();
                }
            })
            .map_err(|source| Error::WorkerSpawn {
                name: "profman-save",
                source,
            })?;

        inner.select_initial()?;

        #[cfg(feature = "watch")]
        let watch = if inner.config.watch {
            match crate::service::watch::WatchWorker::start(&inner) {
                Ok(worker) => Some(worker),
                Err(e) => {
                    warn!("Profile directory will not be watched: {e}");
                    None
                }
            }
        } else {
            None
        };

        info!(
            "Profile service ready at {}",
            inner.config.profile_dir.display()
        );

        Ok(Self {
            inner,
            #[cfg(feature = "watch")]
            watch,
        })
    }
}

impl<S: StorageBackend> ProfileService<S> {
    /// Get the configuration
    pub fn config(&self) -> &ServiceConfig<S> {
        &self.inner.config
    }

    /// Directory holding the profile files
    pub fn profile_dir(&self) -> &Path {
        &self.inner.config.profile_dir
    }

    /// Get the event manager for registering change listeners
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// # use profman::{ProfileService, ProfileEvent, ServiceConfig};
    /// # let service = ProfileService::open(ServiceConfig::builder("observatory").build()).unwrap();
    /// service.events().watch("application.language", |_key, _old, new| {
    ///     println!("Language is now {new}");
    /// });
    ///
    /// service.events().on_profile_event(|event| {
    ///     if let ProfileEvent::ActiveProfileChanged { current, .. } = event {
    ///         println!("Switched to {current}");
    ///     }
    /// });
    /// ```
    pub fn events(&self) -> &Arc<EventManager> {
        &self.inner.events
    }

    /// Current lifecycle state of the active profile slot
    pub fn state(&self) -> ActiveState {
        *self.inner.state.read()
    }

    /// Id of the active profile
    pub fn active_id(&self) -> Option<Uuid> {
        self.inner.active.lock().as_ref().map(|a| a.entity.id())
    }

    /// Catalog entry of the active profile
    pub fn active_meta(&self) -> Option<ProfileMeta> {
        self.inner.catalog.active()
    }

    /// All known profiles, most recently used first
    pub fn profiles(&self) -> Vec<ProfileMeta> {
        self.inner.catalog.list()
    }

    /// Catalog entry for `id`
    pub fn profile(&self, id: Uuid) -> Option<ProfileMeta> {
        self.inner.catalog.get(id)
    }

    /// Re-read the profile directory.
    ///
    /// Only needed when the directory watch is disabled.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be listed.
    pub fn refresh(&self) -> Result<usize> {
        let count = {
            let _op = self.inner.op_lock.lock();
            let count = self.inner.catalog.rebuild()?;
            self.inner.catalog.set_active(self.active_id());
            count
        };
        self.inner
            .events
            .emit(&crate::events::ProfileEvent::CatalogChanged);
        Ok(count)
    }
}

impl<S: StorageBackend> Drop for ProfileService<S> {
    fn drop(&mut self) {
        #[cfg(feature = "watch")]
        if let Some(worker) = self.watch.take() {
            worker.stop();
        }

        if let Err(e) = self.flush() {
            error!("Final save failed: {e}");
        }
        self.inner.saves.stop();

        let _op = self.inner.op_lock.lock();
        self.inner.deactivate();
    }
}

impl<S: StorageBackend> std::fmt::Debug for ProfileService<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProfileService")
            .field("profile_dir", &self.inner.config.profile_dir)
            .field("state", &self.state())
            .field("active", &self.active_id())
            .field("profiles", &self.inner.catalog.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn writer_for(store: &ProfileStore, entity: &ProfileEntity) -> ProfileWriter {
        let meta = store.create(entity).unwrap();
        let opened = store.open(&meta.location).unwrap();
        ProfileWriter::new(opened.handle)
    }

    #[test]
    fn test_writer_drops_stale_snapshots() {
        let dir = tempdir().unwrap();
        let store = ProfileStore::json(dir.path());
        let mut entity = ProfileEntity::new("Rig");
        let writer = writer_for(&store, &entity);

        entity.settings_mut().set("camera.gain", 2).unwrap();
        let newer = entity.clone();
        entity.settings_mut().set("camera.gain", 1).unwrap();
        let older = entity.clone();

        assert!(writer.write(&store, &newer, 2).unwrap());
        assert!(!writer.write(&store, &older, 1).unwrap());

        let raw: serde_json::Value =
            serde_json::from_slice(&std::fs::read(store.location(entity.id())).unwrap()).unwrap();
        assert_eq!(raw["settings"]["camera"]["gain"], 2);
    }

    #[test]
    fn test_writer_ignores_writes_after_release() {
        let dir = tempdir().unwrap();
        let store = ProfileStore::json(dir.path());
        let mut entity = ProfileEntity::new("Rig");
        let writer = writer_for(&store, &entity);

        writer.release();
        entity.settings_mut().set("camera.gain", 9).unwrap();
        assert!(!writer.write(&store, &entity, 1).unwrap());

        // The file is free again
        store.open(&store.location(entity.id())).unwrap();
    }
}
