//! Change notifications
//!
//! Two kinds of listeners are kept here:
//!
//! - **setting listeners** receive `(key, old, new)` for every recorded
//!   settings change of the active profile, plus the sentinel
//!   [`SETTINGS_CHANGED`] key once per change;
//! - **profile listeners** receive [`ProfileEvent`]s about the catalog and the
//!   active profile.
//!
//! Callbacks run on the thread that caused the change, after internal locks
//! are released, so listeners may call back into the service.

use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

/// Key raised after any nested settings change; drives the debounced save
pub const SETTINGS_CHANGED: &str = "Settings";

/// Type alias for a settings change callback
pub type ChangeCallback = Arc<dyn Fn(&str, &Value, &Value) + Send + Sync>;

/// Type alias for a profile event callback
pub type ProfileEventCallback = Arc<dyn Fn(&ProfileEvent) + Send + Sync>;

// =============================================================================
// Profile Event
// =============================================================================

/// Events emitted by the profile service
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProfileEvent {
    /// A different profile became active
    ActiveProfileChanged {
        /// Previously active profile, if any
        previous: Option<Uuid>,
        /// Newly active profile
        current: Uuid,
    },
    /// Geographic settings of the active profile changed, or the profile switched
    LocationChanged,
    /// Language settings of the active profile changed, or the profile switched
    LocaleChanged,
    /// A profile was created in this process
    Added { id: Uuid },
    /// A profile was deleted in this process
    Removed { id: Uuid },
    /// A profile was cloned
    Cloned { source: Uuid, target: Uuid },
    /// The active profile was renamed
    Renamed { id: Uuid, name: String },
    /// The active profile was written to disk
    Saved { id: Uuid },
    /// The catalog changed because of an external filesystem event
    CatalogChanged,
}

// =============================================================================
// Event Manager
// =============================================================================

/// Manages event listeners for settings and profile changes
pub struct EventManager {
    /// Called for every settings change
    global_listeners: RwLock<Vec<ChangeCallback>>,

    /// Called only for changes of one key
    key_listeners: RwLock<HashMap<String, Vec<ChangeCallback>>>,

    /// Called for profile events
    profile_listeners: RwLock<Vec<ProfileEventCallback>>,
}

impl EventManager {
    /// Create a new event manager
    #[must_use]
    pub fn new() -> Self {
        Self {
            global_listeners: RwLock::new(Vec::new()),
            key_listeners: RwLock::new(HashMap::new()),
            profile_listeners: RwLock::new(Vec::new()),
        }
    }

    /// Register a listener for all settings changes
    ///
    /// # Arguments
    /// * `callback` - Function receiving (`key`, `old_value`, `new_value`)
    pub fn on_change<F>(&self, callback: F)
    where
        F: Fn(&str, &Value, &Value) + Send + Sync + 'static,
    {
        self.global_listeners.write().push(Arc::new(callback));
    }

    /// Register a listener for one settings key (e.g. `"camera.gain"`)
    pub fn watch<F>(&self, key: &str, callback: F)
    where
        F: Fn(&str, &Value, &Value) + Send + Sync + 'static,
    {
        self.key_listeners
            .write()
            .entry(key.to_string())
            .or_default()
            .push(Arc::new(callback));
    }

    /// Remove all listeners for a specific key
    pub fn unwatch(&self, key: &str) {
        self.key_listeners.write().remove(key);
    }

    /// Register a listener for profile events
    pub fn on_profile_event<F>(&self, callback: F)
    where
        F: Fn(&ProfileEvent) + Send + Sync + 'static,
    {
        self.profile_listeners.write().push(Arc::new(callback));
    }

    /// Notify settings listeners about a change
    pub fn notify(&self, key: &str, old_value: &Value, new_value: &Value) {
        // Snapshot so callbacks can register listeners without deadlocking
        let global: Vec<ChangeCallback> = self.global_listeners.read().clone();
        for callback in &global {
            callback(key, old_value, new_value);
        }

        let keyed: Vec<ChangeCallback> = self
            .key_listeners
            .read()
            .get(key)
            .cloned()
            .unwrap_or_default();
        for callback in &keyed {
            callback(key, old_value, new_value);
        }
    }

    /// Notify profile listeners
    pub fn emit(&self, event: &ProfileEvent) {
        let listeners: Vec<ProfileEventCallback> = self.profile_listeners.read().clone();
        for callback in &listeners {
            callback(event);
        }
    }

}

impl Default for EventManager {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventManager")
            .field("global_listeners", &self.global_listeners.read().len())
            .field("key_listeners", &self.key_listeners.read().len())
            .field("profile_listeners", &self.profile_listeners.read().len())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
