//! # profman - Profile Manager
//!
//! Named, independently persisted configuration profiles for desktop
//! applications, with cross-instance exclusivity and debounced saving.
//!
//! ## Features
//!
//! - **One file per profile**: `<uuid>.profile` in a profile directory, with a
//!   `.bkp` sibling holding the last good content
//! - **Exclusive ownership**: the active profile's file is locked by the OS, so
//!   two running instances never share a profile
//! - **Startup selection**: the most recently used free profile is activated,
//!   or a default profile is created
//! - **Debounced saving**: bursts of setting changes produce a single write
//!   after a quiet period
//! - **Live catalog**: profiles created or deleted by other instances show up
//!   through a directory watch (feature `watch`)
//! - **Legacy migration**: older all-in-one and flat settings files are split
//!   into profile files on first run
//! - **Change events**: per-key listeners and profile-level events
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use profman::{ProfileService, ServiceConfig, SettingsSection};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Debug, Default, Serialize, Deserialize)]
//! #[serde(default)]
//! struct CameraSettings {
//!     gain: i32,
//!     offset: i32,
//! }
//!
//! impl SettingsSection for CameraSettings {
//!     const NAME: &'static str = "camera";
//! }
//!
//! let service = ProfileService::open(
//!     ServiceConfig::builder("observatory")
//!         .profile_dir("~/.config/observatory/Profiles")
//!         .build(),
//! )?;
//!
//! let mut camera: CameraSettings = service.section()?;
//! camera.gain = 120;
//! service.set_section(&camera)?;
//! # Ok::<(), profman::Error>(())
//! ```
//!
//! ## Switching profiles
//!
//! ```rust,no_run
//! # use profman::{ProfileService, ServiceConfig};
//! # let service = ProfileService::open(ServiceConfig::builder("observatory").build())?;
//! let current = service.active_id().expect("a profile is active");
//! let copy = service.clone_profile(current)?;
//! service.rename_profile(copy.id, "Winter rig")?;
//!
//! match service.select_profile(copy.id) {
//!     Ok(()) => println!("Now using '{}'", copy.name),
//!     Err(e) if e.is_in_use() => println!("Profile is open in another instance"),
//!     Err(e) => return Err(e),
//! }
//! # Ok::<(), profman::Error>(())
//! ```

mod error;
pub mod events;
pub mod fsutil;
pub mod migration;
mod service;
pub mod settings;
pub mod storage;
pub mod store;

// Grouped modules
pub mod catalog;
pub mod config;
pub mod profile;

// Re-exports from core
pub use catalog::{PeekRetry, ProfileCatalog};
pub use config::{ServiceConfig, ServiceConfigBuilder};
pub use error::{Error, Result};
pub use events::{EventManager, ProfileEvent};
pub use migration::{MigrationReport, MigrationSource, MigrationStrategy};
pub use profile::{ProfileEntity, ProfileMeta};
pub use service::{ActiveState, ProfileService};
pub use settings::{SettingChange, SettingsDocument, SettingsSection};
pub use storage::{JsonStorage, StorageBackend};
pub use store::{ProfileHandle, ProfileStore};
