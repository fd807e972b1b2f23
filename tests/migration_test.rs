//! Legacy migration integration tests
//!
//! Tests for first-run conversion of legacy configuration:
//! - Aggregate file with an active profile marker
//! - Per-entry failures and repeated ids
//! - Flat key/value settings
//! - Strategy selection

mod common;

use common::{AstrometrySettings, CameraSettings, TestFixture, minutes_ago};
use profman::{MigrationStrategy, ProfileService, ServiceConfig};
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use uuid::Uuid;

fn write_aggregate(fixture: &TestFixture, document: &serde_json::Value) -> std::path::PathBuf {
    let path = fixture.app_dir().join("profiles.settings");
    std::fs::write(&path, serde_json::to_vec_pretty(document).unwrap()).unwrap();
    path
}

fn legacy_profile(id: Uuid, name: &str, gain: i32, last_used: &str) -> serde_json::Value {
    json!({
        "id": id,
        "name": name,
        "description": format!("{name} rig"),
        "last_used": last_used,
        "settings": {
            "camera": { "gain": gain, "offset": 12 },
            "astrometry": { "latitude": 47.0, "longitude": 8.0 }
        }
    })
}

// =============================================================================
// Aggregate File
// =============================================================================

#[test]
fn test_aggregate_file_is_split_and_active_profile_selected() {
    let fixture = TestFixture::new();
    let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
    let legacy = write_aggregate(
        &fixture,
        &json!({
            "active_profile_id": b,
            "profiles": [
                legacy_profile(a, "Travel", 50, "2023-05-01T20:00:00Z"),
                legacy_profile(b, "Backyard", 139, "2021-01-01T20:00:00Z"),
                legacy_profile(c, "Remote", 300, "2024-02-01T20:00:00Z"),
            ]
        }),
    );

    let service = fixture.open();

    assert_eq!(service.profiles().len(), 3);
    assert_eq!(service.active_id(), Some(b));
    assert_eq!(service.section::<CameraSettings>().unwrap().gain, 139);
    assert_eq!(
        service.section::<AstrometrySettings>().unwrap().latitude,
        47.0
    );

    for id in [a, b, c] {
        assert!(fixture.store().location(id).exists());
    }
    assert!(!legacy.exists());
    assert!(fixture.app_dir().join("profiles.settings.migrated").exists());
}

#[test]
fn test_unparseable_entry_is_skipped() {
    let fixture = TestFixture::new();
    let good = Uuid::new_v4();
    write_aggregate(
        &fixture,
        &json!({
            "active_profile_id": good,
            "profiles": [
                { "name": "No id at all" },
                legacy_profile(good, "Good", 80, "2022-01-01T00:00:00Z"),
                { "id": "not-a-uuid", "name": "Bad id" },
            ]
        }),
    );

    let service = fixture.open();
    let profiles = service.profiles();
    assert_eq!(profiles.len(), 1);
    assert_eq!(profiles[0].id, good);
    assert_eq!(service.active_id(), Some(good));
}

#[test]
fn test_repeated_id_keeps_first_entry() {
    let fixture = TestFixture::new();
    let id = Uuid::new_v4();
    write_aggregate(
        &fixture,
        &json!({
            "profiles": [
                legacy_profile(id, "First", 10, "2022-01-01T00:00:00Z"),
                legacy_profile(id, "Second", 20, "2023-01-01T00:00:00Z"),
            ]
        }),
    );

    let service = fixture.open();
    let profiles = service.profiles();
    assert_eq!(profiles.len(), 1);
    assert_eq!(profiles[0].name, "First");
    assert_eq!(service.section::<CameraSettings>().unwrap().gain, 10);
}

#[test]
fn test_unreadable_aggregate_falls_through_to_default() {
    let fixture = TestFixture::new();
    let legacy = fixture.app_dir().join("profiles.settings");
    std::fs::write(&legacy, b"<xml>not json</xml>").unwrap();

    let service = fixture.open();
    let profiles = service.profiles();
    assert_eq!(profiles.len(), 1);
    assert_eq!(profiles[0].name, "Default");
    // Nothing was taken from it, so it is left in place
    assert!(legacy.exists());
}

// =============================================================================
// Flat Settings
// =============================================================================

#[test]
fn test_flat_settings_become_one_profile() {
    let fixture = TestFixture::new();
    let legacy = fixture.app_dir().join("user.settings");
    std::fs::write(
        &legacy,
        json!({
            "Latitude": 51.48,
            "Longitude": -0.0015,
            "camera.gain": 75,
            "ThemeColor": "red"
        })
        .to_string(),
    )
    .unwrap();

    let config = ServiceConfig::builder("profman-test")
        .profile_dir(fixture.profile_dir())
        .legacy_key("Latitude", "astrometry.latitude")
        .legacy_key("Longitude", "astrometry.longitude")
        .watch(false)
        .build();
    let service = ProfileService::open(config).unwrap();

    assert_eq!(service.profiles().len(), 1);
    let astrometry: AstrometrySettings = service.section().unwrap();
    assert_eq!(astrometry.latitude, 51.48);
    assert_eq!(astrometry.longitude, -0.0015);
    assert_eq!(service.get("camera.gain").unwrap(), Some(json!(75)));
    assert!(service.get("ThemeColor").unwrap().is_none());
    assert!(!legacy.exists());
}

#[test]
fn test_aggregate_wins_over_flat_settings() {
    let fixture = TestFixture::new();
    let id = Uuid::new_v4();
    write_aggregate(
        &fixture,
        &json!({ "profiles": [legacy_profile(id, "Rig", 1, "2022-01-01T00:00:00Z")] }),
    );
    let flat = fixture.app_dir().join("user.settings");
    std::fs::write(&flat, json!({"camera.gain": 2}).to_string()).unwrap();

    let service = fixture.open();
    assert_eq!(service.active_id(), Some(id));
    assert!(flat.exists());
}

// =============================================================================
// Strategy
// =============================================================================

#[test]
fn test_migration_skipped_when_profiles_exist() {
    let fixture = TestFixture::new();
    let existing = fixture.write_profile("Existing", minutes_ago(5));
    let legacy = write_aggregate(
        &fixture,
        &json!({ "profiles": [legacy_profile(Uuid::new_v4(), "Legacy", 1, "2022-01-01T00:00:00Z")] }),
    );

    let service = fixture.open();
    assert_eq!(service.profiles().len(), 1);
    assert_eq!(service.active_id(), Some(existing.id()));
    assert!(legacy.exists());
}

#[test]
fn test_custom_strategy_receives_profile_dir() {
    let fixture = TestFixture::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();

    let import = move |dir: &std::path::Path| -> profman::Result<()> {
        counter.fetch_add(1, Ordering::SeqCst);
        let store = profman::ProfileStore::json(dir);
        store.create(&profman::ProfileEntity::new("Imported"))?;
        Ok(())
    };

    let config = ServiceConfig::builder("profman-test")
        .profile_dir(fixture.profile_dir())
        .migration(MigrationStrategy::Custom(Arc::new(import)))
        .watch(false)
        .build();
    let service = ProfileService::open(config).unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(service.active_meta().unwrap().name, "Imported");
}

#[test]
fn test_no_migration_still_yields_default_profile() {
    let fixture = TestFixture::new();
    write_aggregate(
        &fixture,
        &json!({ "profiles": [legacy_profile(Uuid::new_v4(), "Legacy", 1, "2022-01-01T00:00:00Z")] }),
    );

    let config = ServiceConfig::builder("profman-test")
        .profile_dir(fixture.profile_dir())
        .migration(MigrationStrategy::None)
        .watch(false)
        .build();
    let service = ProfileService::open(config).unwrap();

    assert_eq!(service.profiles().len(), 1);
    assert_eq!(service.active_meta().unwrap().name, "Default");
}
