//! Profile operations: select, add, clone, remove, rename
//!
//! Every operation here holds the service's operation lock for its full
//! duration, so no two of them interleave. Notifications are emitted after all
//! locks are released.

use crate::error::{Error, Result};
use crate::events::ProfileEvent;
use crate::profile::{DEFAULT_PROFILE_NAME, ProfileEntity, ProfileMeta};
use crate::service::core::{ActiveProfile, ActiveState, ProfileService, ServiceInner};
use crate::storage::StorageBackend;

use log::{debug, info, warn};
use uuid::Uuid;

impl<S: StorageBackend> ServiceInner<S> {
    /// Pick the profile to run with at startup.
    ///
    /// Candidates are tried most recently used first; the first one whose file
    /// can be locked wins. If none can, a new default profile is created and
    /// selected.
    pub(crate) fn select_initial(&self) -> Result<()> {
        for candidate in self.catalog.list() {
            match self.select_profile(candidate.id) {
                Ok(()) => return Ok(()),
                Err(e) if e.is_in_use() => {
                    info!(
                        "Profile '{}' is open in another instance, trying next",
                        candidate.name
                    );
                }
                Err(e) => warn!("Cannot select profile '{}': {e}", candidate.name),
            }
        }

        info!("No selectable profile, creating a default profile");
        let meta = self
            .add_default_profile()
            .map_err(|e| Error::NoProfileAvailable(e.to_string()))?;
        self.select_profile(meta.id)
            .map_err(|e| Error::NoProfileAvailable(e.to_string()))
    }

    pub(crate) fn select_profile(&self, id: Uuid) -> Result<()> {
        let previous = {
            let _op = self.op_lock.lock();
            let meta = self.catalog.get(id).ok_or(Error::ProfileNotFound(id))?;

            let mut active = self.active.lock();
            if active.as_ref().is_some_and(|a| a.entity.id() == id) {
                debug!("Profile '{}' is already active", meta.name);
                return Ok(());
            }

            let state_before = *self.state.read();
            self.set_state(ActiveState::Loading);
            let opened = match self.store().load(&meta.location) {
                Ok(opened) => opened,
                Err(e) => {
                    self.set_state(state_before);
                    return Err(e);
                }
            };

            let previous = active.take().map(|previous| {
                self.set_state(ActiveState::Deactivating);
                self.saves.take_pending();
                let previous_id = previous.entity.id();
                self.retire(previous, "before switching");
                previous_id
            });

            self.catalog.upsert(opened.entity.meta(meta.location.clone()));
            self.catalog.set_active(Some(id));
            info!("Selected profile '{}' ({id})", opened.entity.name());

            *active = Some(ActiveProfile::new(opened.entity, opened.handle));
            self.set_state(ActiveState::Active);
            previous
        };

        self.events.emit(&ProfileEvent::ActiveProfileChanged {
            previous,
            current: id,
        });
        self.events.emit(&ProfileEvent::LocaleChanged);
        self.events.emit(&ProfileEvent::LocationChanged);
        Ok(())
    }

    pub(crate) fn add_default_profile(&self) -> Result<ProfileMeta> {
        let meta = {
            let _op = self.op_lock.lock();
            let meta = self.store().create(&ProfileEntity::new(DEFAULT_PROFILE_NAME))?;
            self.catalog.upsert(meta.clone());
            meta
        };

        self.events.emit(&ProfileEvent::Added { id: meta.id });
        Ok(meta)
    }

    pub(crate) fn clone_profile(&self, id: Uuid) -> Result<ProfileMeta> {
        let meta = {
            let _op = self.op_lock.lock();
            let source = self.catalog.get(id).ok_or(Error::ProfileNotFound(id))?;
            let name = self.catalog.unique_copy_name(&source.name);

            let from_active = self
                .active
                .lock()
                .as_ref()
                .filter(|a| a.entity.id() == id)
                .map(|a| a.entity.duplicate(name.as_str()));

            let copy = match from_active {
                Some(copy) => copy?,
                None => {
                    // Opened, not loaded: the source must not change
                    let opened = self.store().open(&source.location)?;
                    let copy = opened.entity.duplicate(name.as_str());
                    opened.handle.release();
                    copy?
                }
            };

            let meta = self.store().create(&copy)?;
            self.catalog.upsert(meta.clone());
            info!("Cloned profile '{}' as '{}'", source.name, meta.name);
            meta
        };

        self.events.emit(&ProfileEvent::Cloned {
            source: id,
            target: meta.id,
        });
        Ok(meta)
    }

    pub(crate) fn remove_profile(&self, id: Uuid) -> Result<()> {
        {
            let _op = self.op_lock.lock();
            let meta = self.catalog.get(id).ok_or(Error::ProfileNotFound(id))?;

            if self.active.lock().as_ref().is_some_and(|a| a.entity.id() == id) {
                return Err(Error::CannotRemoveActiveProfile(id));
            }

            self.store().delete(&meta.location)?;
            self.catalog.remove(id);
            info!("Removed profile '{}' ({id})", meta.name);
        }

        self.events.emit(&ProfileEvent::Removed { id });
        Ok(())
    }

    /// Apply `edit` to a profile and keep the catalog entry in step.
    ///
    /// The active profile is edited in memory and saved by the timer; any
    /// other profile is opened, edited, saved and released right away.
    fn edit_profile<F>(&self, id: Uuid, edit: F) -> Result<ProfileMeta>
    where
        F: FnOnce(&mut ProfileEntity) -> Result<()>,
    {
        let _op = self.op_lock.lock();
        let meta = self.catalog.get(id).ok_or(Error::ProfileNotFound(id))?;

        let mut active = self.active.lock();
        let updated = match active.as_mut().filter(|a| a.entity.id() == id) {
            Some(current) => {
                edit(&mut current.entity)?;
                self.saves.schedule();
                current.entity.meta(meta.location.clone())
            }
            None => {
                drop(active);
                let mut opened = self.store().open(&meta.location)?;
                edit(&mut opened.entity)?;
                self.store().save(&opened.entity, &mut opened.handle)?;
                let updated = opened.entity.meta(meta.location.clone());
                opened.handle.release();
                updated
            }
        };

        self.catalog.upsert(updated.clone());
        Ok(ProfileMeta {
            is_active: meta.is_active,
            ..updated
        })
    }

    pub(crate) fn rename_profile(&self, id: Uuid, name: &str) -> Result<ProfileMeta> {
        let meta = self.edit_profile(id, |entity| entity.set_name(name))?;
        self.events.emit(&ProfileEvent::Renamed {
            id,
            name: meta.name.clone(),
        });
        Ok(meta)
    }

    pub(crate) fn set_description(&self, id: Uuid, description: &str) -> Result<ProfileMeta> {
        self.edit_profile(id, |entity| {
            entity.set_description(description);
            Ok(())
        })
    }
}

impl<S: StorageBackend> ProfileService<S> {
    /// Make `id` the active profile.
    ///
    /// The previous profile is saved and its file released only after the new
    /// one has been locked, so a failure leaves the current state untouched.
    ///
    /// # Errors
    ///
    /// Returns `Error::ProfileInUse` if another holder owns the file,
    /// `Error::ProfileNotFound` for an unknown id, or a read error.
    pub fn select_profile(&self, id: Uuid) -> Result<()> {
        self.inner.select_profile(id)
    }

    /// Create and register a new profile with default settings
    ///
    /// # Errors
    ///
    /// Returns an error if the profile file cannot be written.
    pub fn add_default_profile(&self) -> Result<ProfileMeta> {
        self.inner.add_default_profile()
    }

    /// Copy a profile under a fresh id and a disambiguated name.
    ///
    /// The copy shares no state with the source, and the source is not
    /// modified. Cloning a profile that is open in another instance fails.
    ///
    /// # Errors
    ///
    /// Returns `Error::ProfileInUse` if the source is held elsewhere, or an
    /// I/O error if the copy cannot be written.
    pub fn clone_profile(&self, id: Uuid) -> Result<ProfileMeta> {
        self.inner.clone_profile(id)
    }

    /// Delete a profile's file and catalog entry.
    ///
    /// # Errors
    ///
    /// Fails with an error for which [`Error::is_in_use`] holds if the profile
    /// is active here or open elsewhere.
    pub fn remove_profile(&self, id: Uuid) -> Result<()> {
        self.inner.remove_profile(id)
    }

    /// Rename a profile
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidProfileName` for a blank name, or the errors of
    /// opening the profile when it is not the active one.
    pub fn rename_profile(&self, id: Uuid, name: &str) -> Result<ProfileMeta> {
        self.inner.rename_profile(id, name)
    }

    /// Replace a profile's description
    ///
    /// # Errors
    ///
    /// As [`ProfileService::rename_profile`].
    pub fn set_description(&self, id: Uuid, description: &str) -> Result<ProfileMeta> {
        self.inner.set_description(id, description)
    }
}
