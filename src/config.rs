//! Service configuration

use crate::catalog::PeekRetry;
use crate::fsutil::expand_home;
use crate::migration::{MigrationStrategy, sibling_of};
use crate::storage::{JsonStorage, StorageBackend};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// Quiet period after the last settings change before the profile is saved
pub const DEFAULT_SAVE_DELAY: Duration = Duration::from_millis(1000);

/// Longest wait for the scheduler lock when (re)starting the save timer
pub const DEFAULT_SCHEDULE_LOCK_TIMEOUT: Duration = Duration::from_millis(1000);

/// File name of the legacy all-profiles-in-one file
pub const LEGACY_AGGREGATE_FILE: &str = "profiles.settings";

/// File name of the legacy flat settings file
pub const LEGACY_SETTINGS_FILE: &str = "user.settings";

/// Configuration for [`ProfileService`](crate::ProfileService)
pub struct ServiceConfig<S: StorageBackend = JsonStorage> {
    /// Application name (used for the default profile directory)
    pub app_name: String,

    /// Directory holding one `<uuid>.profile` file per profile
    pub profile_dir: PathBuf,

    /// Storage backend implementation
    pub storage: S,

    /// Debounce quiet period for automatic saves
    pub save_delay: Duration,

    /// Bounded wait used when restarting the save timer
    pub schedule_lock_timeout: Duration,

    /// Retry schedule for files reported by the directory watch
    pub peek_retry: PeekRetry,

    /// Legacy aggregate file consumed by migration
    pub legacy_aggregate_file: PathBuf,

    /// Legacy flat settings file consumed by migration
    pub legacy_settings_file: PathBuf,

    /// Legacy flat key -> `section.key` mapping
    pub legacy_keys: HashMap<String, String>,

    /// How to migrate when no profile exists
    pub migration: MigrationStrategy,

    /// Section whose changes raise `LocationChanged`
    pub location_section: String,

    /// Setting path whose changes raise `LocaleChanged`
    pub locale_key: String,

    /// Keep the catalog in sync with the directory
    pub watch: bool,
}

impl ServiceConfig<JsonStorage> {
    /// Create a new builder for `ServiceConfig`
    ///
    /// # Example
    /// ```rust
    /// use profman::ServiceConfig;
    /// use std::time::Duration;
    ///
    /// let config = ServiceConfig::builder("observatory")
    ///     .profile_dir("~/.config/observatory/Profiles")
    ///     .save_delay(Duration::from_millis(500))
    ///     .build();
    /// assert_eq!(config.save_delay, Duration::from_millis(500));
    /// ```
    pub fn builder(app_name: impl Into<String>) -> ServiceConfigBuilder {
        ServiceConfigBuilder::new(app_name)
    }
}

impl<S: StorageBackend> std::fmt::Debug for ServiceConfig<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceConfig")
            .field("app_name", &self.app_name)
            .field("profile_dir", &self.profile_dir)
            .field("save_delay", &self.save_delay)
            .field("schedule_lock_timeout", &self.schedule_lock_timeout)
            .field("peek_retry", &self.peek_retry)
            .field("legacy_aggregate_file", &self.legacy_aggregate_file)
            .field("legacy_settings_file", &self.legacy_settings_file)
            .field("migration", &self.migration)
            .field("watch", &self.watch)
            .finish_non_exhaustive()
    }
}

/// Builder for creating `ServiceConfig` with a fluent API
pub struct ServiceConfigBuilder<S: StorageBackend = JsonStorage> {
    app_name: String,
    profile_dir: Option<PathBuf>,
    storage: S,
    save_delay: Duration,
    schedule_lock_timeout: Duration,
    peek_retry: PeekRetry,
    legacy_aggregate_file: Option<PathBuf>,
    legacy_settings_file: Option<PathBuf>,
    legacy_keys: HashMap<String, String>,
    migration: MigrationStrategy,
    location_section: String,
    locale_key: String,
    watch: bool,
}

impl ServiceConfigBuilder<JsonStorage> {
    /// Create a new builder with the required app name
    pub fn new(app_name: impl Into<String>) -> Self {
        Self {
            app_name: app_name.into(),
            profile_dir: None,
            storage: JsonStorage::new(),
            save_delay: DEFAULT_SAVE_DELAY,
            schedule_lock_timeout: DEFAULT_SCHEDULE_LOCK_TIMEOUT,
            peek_retry: PeekRetry::default(),
            legacy_aggregate_file: None,
            legacy_settings_file: None,
            legacy_keys: HashMap::new(),
            migration: MigrationStrategy::Auto,
            location_section: "astrometry".to_string(),
            locale_key: "application.language".to_string(),
            watch: cfg!(feature = "watch"),
        }
    }
}

impl<S: StorageBackend> ServiceConfigBuilder<S> {
    /// Set the profile directory
    ///
    /// Supports `~` expansion for home directory.
    pub fn profile_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.profile_dir = Some(expand_home(path.into()));
        self
    }

    /// Use a different storage backend
    pub fn storage<S2: StorageBackend>(self, storage: S2) -> ServiceConfigBuilder<S2> {
        ServiceConfigBuilder {
            app_name: self.app_name,
            profile_dir: self.profile_dir,
            storage,
            save_delay: self.save_delay,
            schedule_lock_timeout: self.schedule_lock_timeout,
            peek_retry: self.peek_retry,
            legacy_aggregate_file: self.legacy_aggregate_file,
            legacy_settings_file: self.legacy_settings_file,
            legacy_keys: self.legacy_keys,
            migration: self.migration,
            location_section: self.location_section,
            locale_key: self.locale_key,
            watch: self.watch,
        }
    }

    /// Debounce quiet period (default: 1000 ms)
    pub fn save_delay(mut self, delay: Duration) -> Self {
        self.save_delay = delay;
        self
    }

    /// Bounded wait when restarting the save timer (default: 1000 ms)
    pub fn schedule_lock_timeout(mut self, timeout: Duration) -> Self {
        self.schedule_lock_timeout = timeout;
        self
    }

    /// Retry schedule for newly created files (default: 3 × 500 ms)
    pub fn peek_retry(mut self, retry: PeekRetry) -> Self {
        self.peek_retry = retry;
        self
    }

    /// Legacy all-profiles file (default: `profiles.settings` next to the profile directory)
    pub fn legacy_aggregate_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.legacy_aggregate_file = Some(expand_home(path.into()));
        self
    }

    /// Legacy flat settings file (default: `user.settings` next to the profile directory)
    pub fn legacy_settings_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.legacy_settings_file = Some(expand_home(path.into()));
        self
    }

    /// Map a flat legacy key onto a `section.key` path
    ///
    /// # Example
    ///
    /// ```rust
    /// use profman::ServiceConfig;
    ///
    /// let config = ServiceConfig::builder("observatory")
    ///     .legacy_key("Latitude", "astrometry.latitude")
    ///     .build();
    /// assert_eq!(config.legacy_keys["Latitude"], "astrometry.latitude");
    /// ```
    pub fn legacy_key(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.legacy_keys.insert(from.into(), to.into());
        self
    }

    /// Migration strategy (default: [`MigrationStrategy::Auto`])
    pub fn migration(mut self, strategy: MigrationStrategy) -> Self {
        self.migration = strategy;
        self
    }

    /// Section whose changes raise `LocationChanged` (default: `astrometry`)
    pub fn location_section(mut self, section: impl Into<String>) -> Self {
        self.location_section = section.into();
        self
    }

    /// Setting whose changes raise `LocaleChanged` (default: `application.language`)
    pub fn locale_key(mut self, key: impl Into<String>) -> Self {
        self.locale_key = key.into();
        self
    }

    /// Enable or disable the directory watch
    pub fn watch(mut self, enabled: bool) -> Self {
        self.watch = enabled && cfg!(feature = "watch");
        self
    }

    /// Build the configuration
    pub fn build(self) -> ServiceConfig<S> {
        let profile_dir = self.profile_dir.unwrap_or_else(|| {
            dirs::config_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(&self.app_name)
                .join("Profiles")
        });
        let legacy_aggregate_file = self
            .legacy_aggregate_file
            .unwrap_or_else(|| sibling_of(&profile_dir, LEGACY_AGGREGATE_FILE));
        let legacy_settings_file = self
            .legacy_settings_file
            .unwrap_or_else(|| sibling_of(&profile_dir, LEGACY_SETTINGS_FILE));

        ServiceConfig {
            app_name: self.app_name,
            profile_dir,
            storage: self.storage,
            save_delay: self.save_delay,
            schedule_lock_timeout: self.schedule_lock_timeout,
            peek_retry: self.peek_retry,
            legacy_aggregate_file,
            legacy_settings_file,
            legacy_keys: self.legacy_keys,
            migration: self.migration,
            location_section: self.location_section,
            locale_key: self.locale_key,
            watch: self.watch,
        }
    }
}
