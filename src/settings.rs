//! Settings document: the opaque, section-based payload of a profile
//!
//! A document is a map of section name to JSON value. The core never looks
//! inside sections; typed access goes through [`SettingsSection`], so new
//! section types need no registration.
//!
//! Every mutation that changes a value is recorded as a [`SettingChange`]. The
//! service drains these after each edit and turns them into change
//! notifications.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;
use std::collections::BTreeMap;

/// A named settings section with defaults.
///
/// # Example
///
/// ```
/// use profman::SettingsSection;
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Debug, Default, Serialize, Deserialize)]
/// #[serde(default)]
/// struct FocuserSettings {
///     step_size: u32,
///     backlash_in: u32,
/// }
///
/// impl SettingsSection for FocuserSettings {
///     const NAME: &'static str = "focuser";
/// }
/// ```
pub trait SettingsSection: Serialize + DeserializeOwned + Default {
    /// Key under which the section is stored in the document
    const NAME: &'static str;
}

/// One recorded value change, keyed by dotted path (`section.key` or `section`)
#[derive(Debug, Clone, PartialEq)]
pub struct SettingChange {
    pub key: String,
    pub old: Value,
    pub new: Value,
}

/// Aggregate of all settings sections of one profile
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SettingsDocument {
    sections: BTreeMap<String, Value>,

    #[serde(skip)]
    changes: Vec<SettingChange>,
}

impl PartialEq for SettingsDocument {
    fn eq(&self, other: &Self) -> bool {
        self.sections == other.sections
    }
}

impl SettingsDocument {
    /// Create an empty document; every section reads as its default
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored sections
    pub fn len(&self) -> usize {
        self.sections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }

    /// Names of all stored sections
    pub fn section_names(&self) -> impl Iterator<Item = &str> {
        self.sections.keys().map(String::as_str)
    }

    /// Read a typed section, falling back to its default when absent
    ///
    /// # Errors
    ///
    /// Returns `Error::Parse` if the stored value does not fit `T`.
    pub fn section<T: SettingsSection>(&self) -> Result<T> {
        match self.sections.get(T::NAME) {
            Some(value) => serde_json::from_value(value.clone())
                .map_err(|e| Error::Parse(format!("section '{}': {e}", T::NAME))),
            None => Ok(T::default()),
        }
    }

    /// Replace a typed section, recording one change per modified field
    ///
    /// # Errors
    ///
    /// Returns an error if `value` cannot be serialized.
    pub fn set_section<T: SettingsSection>(&mut self, value: &T) -> Result<()> {
        let new = serde_json::to_value(value)?;
        self.set_raw_section(T::NAME, new);
        Ok(())
    }

    /// Raw JSON of a section
    pub fn raw_section(&self, name: &str) -> Option<&Value> {
        self.sections.get(name)
    }

    /// Replace a section with a raw JSON value
    pub fn set_raw_section(&mut self, name: &str, new: Value) {
        let old = self.sections.get(name).cloned().unwrap_or(Value::Null);
        if old == new {
            return;
        }

        match (&old, &new) {
            (Value::Object(old_map), Value::Object(new_map)) => {
                let keys: std::collections::BTreeSet<&String> =
                    old_map.keys().chain(new_map.keys()).collect();
                for key in keys {
                    let before = old_map.get(key).cloned().unwrap_or(Value::Null);
                    let after = new_map.get(key).cloned().unwrap_or(Value::Null);
                    if before != after {
                        self.changes.push(SettingChange {
                            key: format!("{name}.{key}"),
                            old: before,
                            new: after,
                        });
                    }
                }
            }
            _ => self.changes.push(SettingChange {
                key: name.to_string(),
                old,
                new: new.clone(),
            }),
        }

        self.sections.insert(name.to_string(), new);
    }

    /// Remove a whole section, returning its previous value
    pub fn remove_section(&mut self, name: &str) -> Option<Value> {
        let old = self.sections.remove(name)?;
        self.changes.push(SettingChange {
            key: name.to_string(),
            old: old.clone(),
            new: Value::Null,
        });
        Some(old)
    }

    /// Read one value by `section.key` path
    pub fn get(&self, path: &str) -> Option<&Value> {
        let (section, key) = path.split_once('.')?;
        self.sections.get(section)?.get(key)
    }

    /// Write one value by `section.key` path.
    ///
    /// Returns `true` if the stored value changed.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` for a path without a section, and
    /// `Error::Parse` if the section exists but is not an object.
    pub fn set(&mut self, path: &str, value: impl Into<Value>) -> Result<bool> {
        let (section, key) = path
            .split_once('.')
            .filter(|(s, k)| !s.is_empty() && !k.is_empty())
            .ok_or_else(|| Error::Config(format!("'{path}' is not a section.key path")))?;
        let value = value.into();

        let entry = self
            .sections
            .entry(section.to_string())
            .or_insert_with(|| Value::Object(serde_json::Map::new()));
        let object = entry
            .as_object_mut()
            .ok_or_else(|| Error::Parse(format!("section '{section}' is not an object")))?;

        let old = object.get(key).cloned().unwrap_or(Value::Null);
        if old == value {
            return Ok(false);
        }
        object.insert(key.to_string(), value.clone());
        self.changes.push(SettingChange {
            key: path.to_string(),
            old,
            new: value,
        });
        Ok(true)
    }

    /// Drain the changes recorded since the last call
    pub fn take_changes(&mut self) -> Vec<SettingChange> {
        std::mem::take(&mut self.changes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    #[serde(default)]
    struct CameraSettings {
        gain: i32,
        offset: i32,
    }

    impl Default for CameraSettings {
        fn default() -> Self {
            Self {
                gain: 100,
                offset: 10,
            }
        }
    }

    impl SettingsSection for CameraSettings {
        const NAME: &'static str = "camera";
    }

    #[test]
    fn test_absent_section_reads_default() {
        let doc = SettingsDocument::new();
        assert_eq!(doc.section::<CameraSettings>().unwrap(), CameraSettings::default());
    }

    #[test]
    fn test_set_section_records_field_changes() {
        let mut doc = SettingsDocument::new();
        doc.set_section(&CameraSettings::default()).unwrap();
        doc.take_changes();

        doc.set_section(&CameraSettings {
            gain: 200,
            offset: 10,
        })
        .unwrap();

        let changes = doc.take_changes();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].key, "camera.gain");
        assert_eq!(changes[0].old, json!(100));
        assert_eq!(changes[0].new, json!(200));
    }

    #[test]
    fn test_unchanged_write_records_nothing() {
        let mut doc = SettingsDocument::new();
        assert!(doc.set("camera.gain", 5).unwrap());
        doc.take_changes();

        assert!(!doc.set("camera.gain", 5).unwrap());
        assert!(doc.take_changes().is_empty());
    }

    #[test]
    fn test_dotted_access() {
        let mut doc = SettingsDocument::new();
        doc.set("astrometry.latitude", 51.5).unwrap();
        assert_eq!(doc.get("astrometry.latitude"), Some(&json!(51.5)));
        assert_eq!(doc.get("astrometry.longitude"), None);
        assert!(doc.set("nodot", 1).is_err());
    }

    #[test]
    fn test_set_into_non_object_section_fails() {
        let mut doc = SettingsDocument::new();
        doc.set_raw_section("flat", json!(3));
        assert!(matches!(doc.set("flat.key", 1), Err(Error::Parse(_))));
    }

    #[test]
    fn test_equality_ignores_pending_changes() {
        let mut a = SettingsDocument::new();
        a.set("camera.gain", 1).unwrap();
        let mut b = a.clone();
        b.take_changes();
        assert_eq!(a, b);
    }

    #[test]
    fn test_serializes_as_plain_map() {
        let mut doc = SettingsDocument::new();
        doc.set("camera.gain", 1).unwrap();
        let value = serde_json::to_value(&doc).unwrap();
        assert_eq!(value, json!({"camera": {"gain": 1}}));
    }
}
