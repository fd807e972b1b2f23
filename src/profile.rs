//! Profile identity, metadata and the loaded profile entity

use crate::error::{Error, Result};
use crate::settings::SettingsDocument;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use time::OffsetDateTime;
use uuid::Uuid;

/// Name given to freshly synthesized profiles
pub const DEFAULT_PROFILE_NAME: &str = "Default";

/// Name shown for catalog entries whose file could not be read
pub const PLACEHOLDER_NAME: &str = "UNKNOWN";

/// Extension of profile files
pub const PROFILE_EXTENSION: &str = "profile";

/// Suffix appended to a profile location for its backup
pub const BACKUP_SUFFIX: &str = ".bkp";

/// Current on-disk format version
pub const FORMAT_VERSION: u32 = 1;

/// Path of the profile file for `id` inside `dir`
pub fn profile_location(dir: &Path, id: Uuid) -> PathBuf {
    dir.join(format!("{id}.{PROFILE_EXTENSION}"))
}

/// Path of the backup sibling of a profile location
pub fn backup_location(location: &Path) -> PathBuf {
    let mut name = location.as_os_str().to_os_string();
    name.push(BACKUP_SUFFIX);
    PathBuf::from(name)
}

/// Parse the profile id out of a `<uuid>.profile` path
pub fn id_from_path(path: &Path) -> Option<Uuid> {
    if path.extension()? != PROFILE_EXTENSION {
        return None;
    }
    Uuid::parse_str(path.file_stem()?.to_str()?).ok()
}

/// Validate a display name
///
/// Names are free text but cannot be blank or contain control characters.
///
/// # Errors
///
/// Returns `Error::InvalidProfileName` if the name is rejected.
pub fn validate_profile_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(Error::InvalidProfileName(
            "Profile name cannot be empty".to_string(),
        ));
    }

    if name.chars().any(char::is_control) {
        return Err(Error::InvalidProfileName(format!(
            "{}: Profile name cannot contain control characters",
            name.escape_debug()
        )));
    }

    Ok(())
}

// =============================================================================
// Profile Meta
// =============================================================================

/// Lightweight catalog entry; holds no file handle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileMeta {
    pub id: Uuid,
    pub name: String,
    pub location: PathBuf,
    pub last_used: OffsetDateTime,
    /// True for at most one entry per running instance
    pub is_active: bool,
}

impl ProfileMeta {
    /// Entry for a file whose content never became readable
    pub fn placeholder(id: Uuid, location: PathBuf) -> Self {
        Self {
            id,
            name: PLACEHOLDER_NAME.to_string(),
            location,
            last_used: OffsetDateTime::UNIX_EPOCH,
            is_active: false,
        }
    }

    pub fn is_placeholder(&self) -> bool {
        self.name == PLACEHOLDER_NAME && self.last_used == OffsetDateTime::UNIX_EPOCH
    }
}

// =============================================================================
// Profile Entity
// =============================================================================

/// A fully loaded profile: identity, bookkeeping and the settings document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileEntity {
    id: Uuid,
    name: String,
    #[serde(default)]
    description: String,
    #[serde(with = "time::serde::rfc3339")]
    last_used: OffsetDateTime,
    #[serde(default)]
    settings: SettingsDocument,
}

impl ProfileEntity {
    /// Create a profile with default settings and a fresh id
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            description: String::new(),
            last_used: OffsetDateTime::now_utc(),
            settings: SettingsDocument::new(),
        }
    }

    /// Create a profile with a known id (legacy import)
    pub(crate) fn with_id(id: Uuid, name: impl Into<String>, settings: SettingsDocument) -> Self {
        Self {
            id,
            name: name.into(),
            description: String::new(),
            last_used: OffsetDateTime::UNIX_EPOCH,
            settings,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Rename the profile
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidProfileName` for a blank name.
    pub fn set_name(&mut self, name: impl Into<String>) -> Result<()> {
        let name = name.into();
        validate_profile_name(&name)?;
        self.name = name;
        Ok(())
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn set_description(&mut self, description: impl Into<String>) {
        self.description = description.into();
    }

    pub fn last_used(&self) -> OffsetDateTime {
        self.last_used
    }

    pub(crate) fn set_last_used(&mut self, at: OffsetDateTime) {
        self.last_used = at;
    }

    /// Mark the profile as used now
    pub fn touch(&mut self) {
        self.last_used = OffsetDateTime::now_utc();
    }

    pub fn settings(&self) -> &SettingsDocument {
        &self.settings
    }

    pub fn settings_mut(&mut self) -> &mut SettingsDocument {
        &mut self.settings
    }

    /// Catalog entry for this entity stored at `location`
    pub fn meta(&self, location: PathBuf) -> ProfileMeta {
        ProfileMeta {
            id: self.id,
            name: self.name.clone(),
            location,
            last_used: self.last_used,
            is_active: false,
        }
    }

    /// Independent copy under a new id and name.
    ///
    /// The copy goes through a full serialize/deserialize round trip so no
    /// state is shared with `self`. It has never been used.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is invalid or the round trip fails.
    pub fn duplicate(&self, name: impl Into<String>) -> Result<Self> {
        let value = serde_json::to_value(self)?;
        let mut copy: ProfileEntity = serde_json::from_value(value)?;
        copy.set_name(name)?;
        copy.id = Uuid::new_v4();
        copy.last_used = OffsetDateTime::UNIX_EPOCH;
        Ok(copy)
    }
}

// =============================================================================
// On-disk envelope
// =============================================================================

fn first_format_version() -> u32 {
    1
}

/// Serialized form of a profile file
#[derive(Serialize)]
pub(crate) struct ProfileFileRef<'a> {
    pub format_version: u32,
    #[serde(flatten)]
    pub profile: &'a ProfileEntity,
}

impl<'a> ProfileFileRef<'a> {
    pub fn new(profile: &'a ProfileEntity) -> Self {
        Self {
            format_version: FORMAT_VERSION,
            profile,
        }
    }
}

/// Deserialized form of a profile file
#[derive(Deserialize)]
pub(crate) struct ProfileFile {
    #[serde(default = "first_format_version")]
    pub format_version: u32,
    #[serde(flatten)]
    pub profile: ProfileEntity,
}

/// Just enough of a profile file to build a catalog entry
#[derive(Deserialize)]
pub(crate) struct ProfileHeader {
    #[serde(default = "first_format_version")]
    pub format_version: u32,
    pub id: Uuid,
    pub name: String,
    #[serde(with = "time::serde::rfc3339")]
    pub last_used: OffsetDateTime,
}

/// Refuse files written by a newer format
pub(crate) fn check_format_version(found: u32) -> Result<()> {
    if found > FORMAT_VERSION {
        return Err(Error::UnsupportedVersion {
            found,
            supported: FORMAT_VERSION,
        });
    }
    Ok(())
}
