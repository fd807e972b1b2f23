use crate::error::{Error, Result};
use crate::events::{ProfileEvent, SETTINGS_CHANGED};
use crate::service::core::{ProfileService, ServiceInner};
use crate::settings::{SettingChange, SettingsDocument, SettingsSection};
use crate::storage::StorageBackend;

use log::{error, trace};
use serde_json::Value;
use std::sync::Arc;

/// Whether a change of `key` affects the setting at `target`
fn touches(key: &str, target: &str) -> bool {
    key == target
        || target
            .strip_prefix(key)
            .is_some_and(|rest| rest.starts_with('.'))
}

fn section_of(key: &str) -> &str {
    key.split_once('.').map_or(key, |(section, _)| section)
}

fn no_active_profile() -> Error {
    Error::NoProfileAvailable("no profile is active".to_string())
}

impl<S: StorageBackend> ServiceInner<S> {
    /// Persist a snapshot of the active profile.
    ///
    /// The `active` lock is held only to copy the entity; encoding and file
    /// I/O run under the profile's writer lock.
    pub(crate) fn save_active(&self) -> Result<()> {
        let (snapshot, seq, writer) = {
            let active = self.active.lock();
            let Some(current) = active.as_ref() else {
                return Ok(());
            };
            (
                current.entity.clone(),
                self.next_snapshot(),
                Arc::clone(&current.writer),
            )
        };

        if writer.write(self.store(), &snapshot, seq)? {
            self.events.emit(&ProfileEvent::Saved { id: snapshot.id() });
        }
        Ok(())
    }

    /// Timer entry point; the in-memory state stays authoritative on failure
    pub(crate) fn save_active_logged(&self) {
        if let Err(e) = self.save_active() {
            error!("Saving the active profile failed: {e}");
        }
    }

    /// Forward recorded changes to listeners and restart the save timer
    pub(crate) fn dispatch_changes(&self, changes: &[SettingChange]) {
        let mut location = false;
        let mut locale = false;

        for change in changes {
            trace!("Setting {} changed", change.key);
            self.events.notify(&change.key, &change.old, &change.new);
            self.events.notify(SETTINGS_CHANGED, &change.old, &change.new);
            self.saves.schedule();

            location |= section_of(&change.key) == self.config.location_section;
            locale |= touches(&change.key, &self.config.locale_key);
        }

        if location {
            self.events.emit(&ProfileEvent::LocationChanged);
        }
        if locale {
            self.events.emit(&ProfileEvent::LocaleChanged);
        }
    }
}

impl<S: StorageBackend> ProfileService<S> {
    /// Edit the active profile's settings.
    ///
    /// Changes are announced to listeners once `f` returns, and the profile is
    /// saved after the configured quiet period.
    ///
    /// # Errors
    ///
    /// Returns the error of `f`. Changes `f` made before failing are kept.
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// # use profman::{ProfileService, ServiceConfig};
    /// # let service = ProfileService::open(ServiceConfig::builder("observatory").build())?;
    /// service.update_settings(|doc| {
    ///     doc.set("astrometry.latitude", 48.2)?;
    ///     doc.set("astrometry.longitude", 16.4)
    /// })?;
    /// # Ok::<(), profman::Error>(())
    /// ```
    pub fn update_settings<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&mut SettingsDocument) -> Result<R>,
    {
        let (result, changes) = {
            let mut active = self.inner.active.lock();
            let current = active.as_mut().ok_or_else(no_active_profile)?;
            let result = f(current.entity.settings_mut());
            (result, current.entity.settings_mut().take_changes())
        };

        self.inner.dispatch_changes(&changes);
        result
    }

    /// Read the active profile's settings without copying them
    ///
    /// The service is locked while `f` runs; do not call back into it.
    ///
    /// # Errors
    ///
    /// Returns `Error::NoProfileAvailable` if no profile is active.
    pub fn with_settings<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&SettingsDocument) -> R,
    {
        let active = self.inner.active.lock();
        let current = active.as_ref().ok_or_else(no_active_profile)?;
        Ok(f(current.entity.settings()))
    }

    /// Snapshot of the active profile's settings
    ///
    /// # Errors
    ///
    /// Returns `Error::NoProfileAvailable` if no profile is active.
    pub fn settings(&self) -> Result<SettingsDocument> {
        self.with_settings(SettingsDocument::clone)
    }

    /// Read one typed section of the active profile
    ///
    /// # Errors
    ///
    /// Returns `Error::Parse` if the stored section does not fit `T`.
    pub fn section<T: SettingsSection>(&self) -> Result<T> {
        self.with_settings(SettingsDocument::section::<T>)?
    }

    /// Replace one typed section of the active profile
    ///
    /// # Errors
    ///
    /// Returns an error if no profile is active or `value` cannot be serialized.
    pub fn set_section<T: SettingsSection>(&self, value: &T) -> Result<()> {
        self.update_settings(|doc| doc.set_section(value))
    }

    /// Read one value by `section.key` path
    ///
    /// # Errors
    ///
    /// Returns `Error::NoProfileAvailable` if no profile is active.
    pub fn get(&self, path: &str) -> Result<Option<Value>> {
        self.with_settings(|doc| doc.get(path).cloned())
    }

    /// Write one value by `section.key` path; returns whether it changed
    ///
    /// # Errors
    ///
    /// As [`SettingsDocument::set`].
    pub fn set(&self, path: &str, value: impl Into<Value>) -> Result<bool> {
        self.update_settings(|doc| doc.set(path, value))
    }

    /// Save the active profile now, bypassing the timer
    ///
    /// # Errors
    ///
    /// Returns the I/O error; the in-memory settings are kept.
    pub fn save(&self) -> Result<()> {
        self.inner.saves.take_pending();
        self.inner.save_active()
    }

    /// Restart the save timer
    ///
    /// Returns false if the restart was dropped because the timer stayed busy
    /// for longer than the configured bound.
    pub fn schedule_save(&self) -> bool {
        self.inner.saves.schedule()
    }

    /// Hold back automatic saves, e.g. while bulk-loading settings
    pub fn pause_save(&self) {
        self.inner.saves.pause();
    }

    /// Re-enable automatic saves
    ///
    /// A save that was due while paused is rescheduled.
    pub fn resume_save(&self) {
        self.inner.saves.resume();
    }

    /// Whether automatic saves are held back
    pub fn is_save_paused(&self) -> bool {
        self.inner.saves.is_paused()
    }

    /// Whether an automatic save is waiting
    pub fn has_pending_save(&self) -> bool {
        self.inner.saves.is_pending()
    }

    /// Perform a pending save immediately.
    ///
    /// Does nothing when no save is pending.
    ///
    /// # Errors
    ///
    /// Returns the I/O error of the save.
    pub fn flush(&self) -> Result<()> {
        if self.inner.saves.take_pending() {
            self.inner.save_active()
        } else {
            Ok(())
        }
    }
}
