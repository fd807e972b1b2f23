//! Common test utilities for profman integration tests
//!
//! Provides shared settings sections, service fixtures, and helper functions.

#![allow(dead_code)]

use profman::{
    MigrationStrategy, PeekRetry, ProfileEntity, ProfileEvent, ProfileService, ProfileStore,
    ServiceConfig, SettingsSection,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tempfile::TempDir;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

// =============================================================================
// Test Settings Sections
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CameraSettings {
    pub gain: i32,
    pub offset: i32,
    pub cooling: bool,
}

impl Default for CameraSettings {
    fn default() -> Self {
        Self {
            gain: 100,
            offset: 10,
            cooling: false,
        }
    }
}

impl SettingsSection for CameraSettings {
    const NAME: &'static str = "camera";
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct AstrometrySettings {
    pub latitude: f64,
    pub longitude: f64,
    pub elevation: f64,
}

impl SettingsSection for AstrometrySettings {
    const NAME: &'static str = "astrometry";
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ApplicationSettings {
    pub language: String,
    pub log_level: String,
}

impl Default for ApplicationSettings {
    fn default() -> Self {
        Self {
            language: "en-GB".to_string(),
            log_level: "info".to_string(),
        }
    }
}

impl SettingsSection for ApplicationSettings {
    const NAME: &'static str = "application";
}

// =============================================================================
// Test Fixtures
// =============================================================================

/// Install a test logger once; output shows with `--nocapture`
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Peek retries short enough for tests
pub fn fast_retry() -> PeekRetry {
    PeekRetry {
        attempts: 3,
        delay: Duration::from_millis(50),
        backoff: 1,
    }
}

/// Temporary application directory with a `Profiles` subdirectory
pub struct TestFixture {
    pub temp_dir: TempDir,
}

impl TestFixture {
    pub fn new() -> Self {
        init_logging();
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        Self { temp_dir }
    }

    /// The application directory (parent of the profile directory)
    pub fn app_dir(&self) -> PathBuf {
        self.temp_dir.path().to_path_buf()
    }

    pub fn profile_dir(&self) -> PathBuf {
        self.temp_dir.path().join("Profiles")
    }

    pub fn store(&self) -> ProfileStore {
        ProfileStore::json(self.profile_dir())
    }

    /// Config with a short save delay and no directory watch
    pub fn config(&self) -> ServiceConfig {
        ServiceConfig::builder("profman-test")
            .profile_dir(self.profile_dir())
            .save_delay(Duration::from_millis(200))
            .peek_retry(fast_retry())
            .migration(MigrationStrategy::Auto)
            .watch(false)
            .build()
    }

    pub fn open(&self) -> ProfileService {
        ProfileService::open(self.config()).expect("Failed to open profile service")
    }

    /// Write a profile file directly, bypassing any service
    pub fn write_profile(&self, name: &str, last_used: OffsetDateTime) -> ProfileEntity {
        let entity = entity_used_at(name, last_used);
        self.store().create(&entity).expect("Failed to write profile");
        entity
    }
}

impl Default for TestFixture {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

/// A new profile entity whose last use was at `at`
pub fn entity_used_at(name: &str, at: OffsetDateTime) -> ProfileEntity {
    let mut value = serde_json::to_value(ProfileEntity::new(name)).unwrap();
    value["last_used"] = serde_json::Value::String(at.format(&Rfc3339).unwrap());
    serde_json::from_value(value).unwrap()
}

/// `minutes` minutes before now
pub fn minutes_ago(minutes: i64) -> OffsetDateTime {
    OffsetDateTime::now_utc() - time::Duration::minutes(minutes)
}

/// Record every profile event emitted by `service`
pub fn record_events(service: &ProfileService) -> Arc<Mutex<Vec<ProfileEvent>>> {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    service.events().on_profile_event(move |event| {
        sink.lock().unwrap().push(event.clone());
    });
    events
}

/// Count recorded events matching `predicate`
pub fn count_events<F>(events: &Arc<Mutex<Vec<ProfileEvent>>>, predicate: F) -> usize
where
    F: Fn(&ProfileEvent) -> bool,
{
    events.lock().unwrap().iter().filter(|e| predicate(e)).count()
}

/// Poll `condition` until it holds or `timeout` passes
pub fn wait_until<F>(timeout: Duration, condition: F) -> bool
where
    F: Fn() -> bool,
{
    let start = Instant::now();
    while start.elapsed() < timeout {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    condition()
}

/// Parse a profile file as raw JSON
pub fn read_profile_json(path: &Path) -> serde_json::Value {
    serde_json::from_slice(&std::fs::read(path).unwrap()).unwrap()
}
