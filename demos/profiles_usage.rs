//! Profiles Usage Example
//!
//! Walks through the life of a profile service: startup, editing typed
//! settings, cloning, switching and removing profiles.
//!
//! Run with: RUST_LOG=debug cargo run --example profiles_usage

use profman::{ProfileEvent, ProfileService, ServiceConfig, SettingsSection};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tempfile::tempdir;

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
struct Astrometry {
    latitude: f64,
    longitude: f64,
    elevation: f64,
}

impl SettingsSection for Astrometry {
    const NAME: &'static str = "astrometry";
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(default)]
struct Camera {
    gain: i32,
    offset: i32,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            gain: 100,
            offset: 10,
        }
    }
}

impl SettingsSection for Camera {
    const NAME: &'static str = "camera";
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let temp_dir = tempdir()?;
    println!("📁 Application directory: {}", temp_dir.path().display());

    let config = ServiceConfig::builder("observatory")
        .profile_dir(temp_dir.path().join("Profiles"))
        .save_delay(Duration::from_millis(250))
        .build();
    let service = ProfileService::open(config)?;

    service.events().on_profile_event(|event| match event {
        ProfileEvent::Saved { id } => println!("  💾 saved {id}"),
        other => println!("  🔔 {other:?}"),
    });
    service
        .events()
        .watch("camera.gain", |_key, old, new| println!("  🎚️ gain {old} -> {new}"));

    // --- Startup ---

    let home = service.active_meta().expect("a profile is always active");
    println!("\n✅ Active profile: {} ({})", home.name, home.id);

    // --- Editing ---

    println!("\n📝 Editing settings...");
    service.set_section(&Astrometry {
        latitude: 51.4769,
        longitude: -0.0005,
        elevation: 46.0,
    })?;
    service.set("camera.gain", 139)?;
    println!("📷 Camera: {:?}", service.section::<Camera>()?);

    // The debounced save lands once the burst of edits is over
    std::thread::sleep(Duration::from_millis(400));

    // --- Clone and Switch ---

    println!("\n📋 Cloning '{}'...", home.name);
    let copy = service.clone_profile(home.id)?;
    service.rename_profile(copy.id, "Remote Site")?;

    println!("🔄 Switching to 'Remote Site'...");
    service.select_profile(copy.id)?;
    service.set("astrometry.latitude", -24.6272)?;
    service.set("astrometry.longitude", -70.4042)?;
    println!("🌍 Location: {:?}", service.section::<Astrometry>()?);

    println!("\n📋 Profiles:");
    for meta in service.profiles() {
        let marker = if meta.is_active { "*" } else { " " };
        println!("  {marker} {} ({})", meta.name, meta.location.display());
    }

    // --- Remove ---

    println!("\n🗑️ Removing the active profile is refused:");
    if let Err(e) = service.remove_profile(copy.id) {
        println!("  {e}");
    }

    service.select_profile(home.id)?;
    service.remove_profile(copy.id)?;
    println!("📋 Remaining profiles: {}", service.profiles().len());

    // Pending edits are written when the service goes away
    drop(service);

    println!("\n✅ Demo complete!");
    println!("\n📂 Directory structure:");
    print_tree(temp_dir.path(), 0);

    Ok(())
}

fn print_tree(path: &std::path::Path, depth: usize) {
    let indent = "  ".repeat(depth);
    if let Ok(entries) = std::fs::read_dir(path) {
        for entry in entries.flatten() {
            let name = entry.file_name();
            let name_str = name.to_string_lossy();
            if entry.path().is_dir() {
                println!("{}{}/", indent, name_str);
                print_tree(&entry.path(), depth + 1);
            } else {
                println!("{}{}", indent, name_str);
            }
        }
    }
}
