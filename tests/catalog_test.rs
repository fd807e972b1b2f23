//! Profile catalog integration tests
//!
//! Tests for the in-memory projection of the profile directory:
//! - Rebuilding from disk
//! - Convergence with external creates and deletes through the watch
//! - Placeholder entries for files that never become readable

mod common;

use common::{TestFixture, count_events, fast_retry, minutes_ago, record_events, wait_until};
use profman::{PeekRetry, ProfileCatalog, ProfileEntity, ProfileEvent, ServiceConfig};
use std::time::Duration;
use uuid::Uuid;

// =============================================================================
// Rebuild
// =============================================================================

#[test]
fn test_rebuild_orders_by_last_use() {
    let fixture = TestFixture::new();
    let a = fixture.write_profile("A", minutes_ago(10));
    let b = fixture.write_profile("B", minutes_ago(5));
    let c = fixture.write_profile("C", minutes_ago(1));

    let catalog = ProfileCatalog::new(fixture.store(), fast_retry());
    assert_eq!(catalog.rebuild().unwrap(), 3);

    let ids: Vec<Uuid> = catalog.list().iter().map(|m| m.id).collect();
    assert_eq!(ids, vec![c.id(), b.id(), a.id()]);
    assert!(catalog.list().iter().all(|m| !m.is_active));
}

#[test]
fn test_rebuild_omits_unrecoverable_files() {
    let fixture = TestFixture::new();
    let good = fixture.write_profile("Good", minutes_ago(1));
    let bad = fixture.write_profile("Bad", minutes_ago(2));
    std::fs::write(fixture.store().location(bad.id()), b"\x00\x01garbage").unwrap();

    let catalog = ProfileCatalog::new(fixture.store(), fast_retry());
    assert_eq!(catalog.rebuild().unwrap(), 1);
    assert!(catalog.contains(good.id()));
    assert!(!catalog.contains(bad.id()));
}

#[test]
fn test_refresh_picks_up_external_changes_without_watch() {
    let fixture = TestFixture::new();
    let service = fixture.open();
    let events = record_events(&service);
    assert_eq!(service.profiles().len(), 1);

    let external = fixture.write_profile("External", minutes_ago(30));
    assert!(service.profile(external.id()).is_none());

    assert_eq!(service.refresh().unwrap(), 2);
    assert!(service.profile(external.id()).is_some());
    // The active flag survives a rebuild
    assert_eq!(service.active_meta().unwrap().id, service.active_id().unwrap());
    assert_eq!(
        count_events(&events, |e| *e == ProfileEvent::CatalogChanged),
        1
    );
}

// Writing over a locked file needs advisory locks
#[cfg(unix)]
#[test]
fn test_refresh_keeps_active_profile_with_torn_file() {
    let fixture = TestFixture::new();
    let service = fixture.open();
    let active = service.active_meta().unwrap();

    service.set("camera.gain", 5).unwrap();
    service.flush().unwrap();
    assert!(profman::profile::backup_location(&active.location).exists());

    std::fs::write(&active.location, b"{\"id\": ").unwrap();
    assert_eq!(service.refresh().unwrap(), 1);

    let meta = service.active_meta().expect("active profile stays listed");
    assert_eq!(meta.id, active.id);
    assert_eq!(Some(meta.id), service.active_id());

    let renamed = service.rename_profile(active.id, "Still Here").unwrap();
    assert!(renamed.is_active);
}

// =============================================================================
// Directory Watch
// =============================================================================

#[cfg(feature = "watch")]
#[test]
fn test_catalog_follows_external_create_and_delete() {
    let fixture = TestFixture::new();
    let config = ServiceConfig::builder("profman-test")
        .profile_dir(fixture.profile_dir())
        .peek_retry(PeekRetry::default())
        .watch(true)
        .build();
    let service = profman::ProfileService::open(config).unwrap();
    let events = record_events(&service);

    // Another instance adds a profile
    let other = ProfileEntity::new("Observatory");
    fixture.store().create(&other).unwrap();

    assert!(
        wait_until(Duration::from_secs(5), || service.profile(other.id()).is_some()),
        "created profile never appeared"
    );
    assert_eq!(service.profile(other.id()).unwrap().name, "Observatory");
    assert!(count_events(&events, |e| *e == ProfileEvent::CatalogChanged) >= 1);

    // ...and deletes it again
    fixture.store().delete(&fixture.store().location(other.id())).unwrap();
    assert!(
        wait_until(Duration::from_secs(5), || service.profile(other.id()).is_none()),
        "deleted profile never disappeared"
    );
    assert!(service.active_id().is_some());
}

#[cfg(feature = "watch")]
#[test]
fn test_unreadable_new_file_is_listed_as_placeholder() {
    let fixture = TestFixture::new();
    let config = ServiceConfig::builder("profman-test")
        .profile_dir(fixture.profile_dir())
        .peek_retry(fast_retry())
        .watch(true)
        .build();
    let service = profman::ProfileService::open(config).unwrap();

    let id = Uuid::new_v4();
    let path = fixture.store().location(id);
    std::fs::write(&path, b"half a profi").unwrap();

    assert!(
        wait_until(Duration::from_secs(5), || service.profile(id).is_some()),
        "placeholder never appeared"
    );
    let meta = service.profile(id).unwrap();
    assert!(meta.is_placeholder());
    assert_eq!(meta.name, "UNKNOWN");

    // Placeholders stay deletable
    service.remove_profile(id).unwrap();
    assert!(!path.exists());
    assert!(service.profile(id).is_none());
}

#[cfg(feature = "watch")]
#[test]
fn test_own_operations_do_not_duplicate_entries() {
    let fixture = TestFixture::new();
    let config = ServiceConfig::builder("profman-test")
        .profile_dir(fixture.profile_dir())
        .peek_retry(fast_retry())
        .watch(true)
        .build();
    let service = profman::ProfileService::open(config).unwrap();

    let active = service.active_id().unwrap();
    let copy = service.clone_profile(active).unwrap();
    let added = service.add_default_profile().unwrap();

    std::thread::sleep(Duration::from_millis(800));
    let profiles = service.profiles();
    assert_eq!(profiles.len(), 3);
    assert!(profiles.iter().any(|m| m.id == copy.id));
    assert!(profiles.iter().any(|m| m.id == added.id));
    assert!(profiles.iter().all(|m| !m.is_placeholder()));
}
