//! Legacy format migration
//!
//! Runs once at startup, only when the profile directory holds no readable
//! profile. The sources are tried in order:
//!
//! 1. an aggregate file holding every profile plus the id of the active one;
//! 2. a flat key/value settings file from before profiles existed;
//! 3. nothing: a single default profile is synthesized.
//!
//! Migration is best-effort. A legacy entry that cannot be parsed or written
//! is logged and skipped; nothing here aborts startup.
//!
//! # Legacy aggregate layout
//!
//! ```json
//! {
//!   "active_profile_id": "5b0c…",
//!   "profiles": [
//!     { "id": "5b0c…", "name": "Rig", "description": "", "last_used": "2021-03-01T20:00:00Z",
//!       "settings": { "camera": { "gain": 120 } } }
//!   ]
//! }
//! ```
//!
//! # Legacy flat layout
//!
//! A JSON object of `"key": value` pairs. Dotted keys (`"camera.gain"`) map to
//! `section.key` directly; other keys need an explicit mapping.

use crate::error::Result;
use crate::fsutil::retire_legacy_file;
use crate::profile::{DEFAULT_PROFILE_NAME, ProfileEntity, ProfileMeta};
use crate::settings::SettingsDocument;
use crate::storage::StorageBackend;
use crate::store::ProfileStore;
use log::{debug, error, info, warn};
use serde::Deserialize;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use time::OffsetDateTime;
use uuid::Uuid;

/// Type alias for custom migration closure receiving the profile directory
type MigrationFn = Arc<dyn Fn(&Path) -> Result<()> + Send + Sync>;

/// Migration strategy
#[derive(Clone, Default)]
pub enum MigrationStrategy {
    /// Built-in legacy detection and conversion
    #[default]
    Auto,
    /// Custom migration writing profile files into the given directory
    Custom(MigrationFn),
    /// Skip migration; startup falls back to a default profile
    None,
}

impl std::fmt::Debug for MigrationStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Auto => write!(f, "Auto"),
            Self::None => write!(f, "None"),
            Self::Custom(_) => write!(f, "Custom(<closure>)"),
        }
    }
}

/// Where migrated profiles came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationSource {
    Aggregate,
    FlatSettings,
    Default,
}

/// Outcome of a migration run
#[derive(Debug, Clone)]
pub struct MigrationReport {
    pub source: MigrationSource,
    pub migrated: Vec<ProfileMeta>,
    /// Legacy entries that were logged and left behind
    pub skipped: usize,
}

#[derive(Deserialize)]
struct LegacyProfile {
    id: Uuid,
    #[serde(default = "default_name")]
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default, with = "time::serde::rfc3339::option")]
    last_used: Option<OffsetDateTime>,
    #[serde(default)]
    settings: SettingsDocument,
}

fn default_name() -> String {
    DEFAULT_PROFILE_NAME.to_string()
}

/// Converts legacy configuration into one file per profile
pub struct MigrationEngine<'a, S: StorageBackend> {
    store: &'a ProfileStore<S>,
    aggregate_file: Option<&'a Path>,
    settings_file: Option<&'a Path>,
    key_map: &'a HashMap<String, String>,
}

impl<'a, S: StorageBackend> MigrationEngine<'a, S> {
    pub fn new(
        store: &'a ProfileStore<S>,
        aggregate_file: Option<&'a Path>,
        settings_file: Option<&'a Path>,
        key_map: &'a HashMap<String, String>,
    ) -> Self {
        Self {
            store,
            aggregate_file,
            settings_file,
            key_map,
        }
    }

    /// Run the first applicable migration
    pub fn run(&self) -> MigrationReport {
        if let Some(path) = self.aggregate_file.filter(|p| p.is_file()) {
            info!("Migrating legacy profile file {}", path.display());
            let report = self.migrate_aggregate(path);
            if !report.migrated.is_empty() {
                retire_legacy_file(path);
                return report;
            }
            warn!("Legacy profile file yielded no profiles");
        }

        if let Some(path) = self.settings_file.filter(|p| p.is_file()) {
            info!("Migrating legacy settings file {}", path.display());
            let report = self.migrate_flat(path);
            if !report.migrated.is_empty() {
                retire_legacy_file(path);
                return report;
            }
            warn!("Legacy settings file yielded no profile");
        }

        self.synthesize_default()
    }

    fn read_legacy(&self, path: &Path) -> Option<Value> {
        let content = match std::fs::read(path) {
            Ok(content) => content,
            Err(e) => {
                warn!("Cannot read legacy file {}: {e}", path.display());
                return None;
            }
        };
        match serde_json::from_slice(&content) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!("Cannot parse legacy file {}: {e}", path.display());
                None
            }
        }
    }

    fn migrate_aggregate(&self, path: &Path) -> MigrationReport {
        let mut report = MigrationReport {
            source: MigrationSource::Aggregate,
            migrated: Vec::new(),
            skipped: 0,
        };
        let Some(document) = self.read_legacy(path) else {
            return report;
        };

        let active_id = document
            .get("active_profile_id")
            .and_then(Value::as_str)
            .and_then(|s| Uuid::parse_str(s).ok());
        let entries = document
            .get("profiles")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let mut seen = HashSet::new();
        for (index, entry) in entries.into_iter().enumerate() {
            let legacy: LegacyProfile = match serde_json::from_value(entry) {
                Ok(legacy) => legacy,
                Err(e) => {
                    warn!("Skipping legacy profile #{index}: {e}");
                    report.skipped += 1;
                    continue;
                }
            };

            // Ids are assumed globally unique; a repeat is reported, not repaired.
            if !seen.insert(legacy.id) || self.store.location(legacy.id).exists() {
                warn!(
                    "Skipping legacy profile #{index} '{}': id {} already migrated",
                    legacy.name, legacy.id
                );
                report.skipped += 1;
                continue;
            }

            let mut entity = ProfileEntity::with_id(legacy.id, legacy.name, legacy.settings);
            entity.set_description(legacy.description);
            if Some(legacy.id) == active_id {
                entity.touch();
            } else if let Some(last_used) = legacy.last_used {
                entity.set_last_used(last_used);
            }
            entity.settings_mut().take_changes();

            match self.store.create(&entity) {
                Ok(meta) => {
                    debug!("Migrated legacy profile '{}' ({})", meta.name, meta.id);
                    report.migrated.push(meta);
                }
                Err(e) => {
                    warn!("Skipping legacy profile #{index}: {e}");
                    report.skipped += 1;
                }
            }
        }

        info!(
            "Migrated {} legacy profiles ({} skipped)",
            report.migrated.len(),
            report.skipped
        );
        report
    }

    fn migrate_flat(&self, path: &Path) -> MigrationReport {
        let mut report = MigrationReport {
            source: MigrationSource::FlatSettings,
            migrated: Vec::new(),
            skipped: 0,
        };
        let Some(Value::Object(values)) = self.read_legacy(path) else {
            warn!("Legacy settings file {} is not a key/value object", path.display());
            return report;
        };

        let mut entity = ProfileEntity::new(DEFAULT_PROFILE_NAME);
        for (key, value) in values {
            let target = match self.key_map.get(&key) {
                Some(mapped) => mapped.as_str(),
                None if key.contains('.') => key.as_str(),
                None => {
                    warn!("Skipping legacy setting '{key}': no section mapping");
                    report.skipped += 1;
                    continue;
                }
            };
            if let Err(e) = entity.settings_mut().set(target, value) {
                warn!("Skipping legacy setting '{key}': {e}");
                report.skipped += 1;
            }
        }
        entity.settings_mut().take_changes();

        match self.store.create(&entity) {
            Ok(meta) => report.migrated.push(meta),
            Err(e) => warn!("Could not write migrated settings profile: {e}"),
        }
        report
    }

    fn synthesize_default(&self) -> MigrationReport {
        let mut report = MigrationReport {
            source: MigrationSource::Default,
            migrated: Vec::new(),
            skipped: 0,
        };
        match self.store.create(&ProfileEntity::new(DEFAULT_PROFILE_NAME)) {
            Ok(meta) => report.migrated.push(meta),
            Err(e) => error!("Could not create default profile: {e}"),
        }
        report
    }
}

/// Default location of a legacy file next to the profile directory
pub(crate) fn sibling_of(profile_dir: &Path, file_name: &str) -> PathBuf {
    profile_dir
        .parent()
        .map_or_else(|| PathBuf::from(file_name), |parent| parent.join(file_name))
}
