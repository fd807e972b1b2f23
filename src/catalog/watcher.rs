//! Profile directory watcher.
//!
//! Translates filesystem notifications for `<uuid>.profile` files into
//! [`CatalogEvent`]s sent over a channel. Resolving them (with retries) is left
//! to the receiver so the notification thread is never blocked.

use crate::error::Result;
use crate::profile::id_from_path;
use notify::event::{ModifyKind, RenameMode};
use notify::{Config as NotifyConfig, Event, EventKind, PollWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::mpsc::Sender;
use std::time::Duration;

/// A change of the set of profile files
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CatalogEvent {
    Created(PathBuf),
    Deleted(PathBuf),
}

/// Keeps a filesystem watch on the profile directory alive
pub struct DirectoryWatcher {
    /// The file system watcher (kept alive to maintain watching).
    /// Some backends are not `Sync`.
    _watcher: Mutex<Box<dyn Watcher + Send>>,
    dir: PathBuf,
}

impl std::fmt::Debug for DirectoryWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectoryWatcher")
            .field("dir", &self.dir)
            .finish_non_exhaustive()
    }
}

/// Map one notification onto catalog events
fn classify(event: &Event) -> Vec<CatalogEvent> {
    let profile_paths = || event.paths.iter().filter(|p| id_from_path(p).is_some());

    match event.kind {
        EventKind::Create(_) | EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
            profile_paths().cloned().map(CatalogEvent::Created).collect()
        }
        EventKind::Remove(_) | EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
            profile_paths().cloned().map(CatalogEvent::Deleted).collect()
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            let mut out = Vec::new();
            if let Some(from) = event.paths.first().filter(|p| id_from_path(p).is_some()) {
                out.push(CatalogEvent::Deleted(from.clone()));
            }
            if let Some(to) = event.paths.get(1).filter(|p| id_from_path(p).is_some()) {
                out.push(CatalogEvent::Created(to.clone()));
            }
            out
        }
        // Backends that cannot tell rename direction apart
        EventKind::Modify(ModifyKind::Name(_)) => profile_paths()
            .map(|p| {
                if p.exists() {
                    CatalogEvent::Created(p.clone())
                } else {
                    CatalogEvent::Deleted(p.clone())
                }
            })
            .collect(),
        _ => Vec::new(),
    }
}

fn make_event_handler(
    tx: Sender<CatalogEvent>,
) -> impl Fn(std::result::Result<Event, notify::Error>) + Send + 'static {
    move |result: std::result::Result<Event, notify::Error>| match result {
        Ok(event) => {
            for catalog_event in classify(&event) {
                log::trace!("Profile directory event: {catalog_event:?}");
                if tx.send(catalog_event).is_err() {
                    // Receiver gone: the service is shutting down
                    return;
                }
            }
        }
        Err(e) => log::warn!("Profile directory watch error: {e}"),
    }
}

impl DirectoryWatcher {
    /// Start watching `dir`, sending events on `tx`.
    ///
    /// Uses the platform's native backend and falls back to polling every
    /// 500 ms where it is unavailable.
    ///
    /// # Errors
    ///
    /// Returns `Error::Watch` if neither backend can watch the directory.
    pub fn new(dir: &Path, tx: Sender<CatalogEvent>) -> Result<Self> {
        let mut watcher = Self::create_watcher(tx)?;
        watcher.watch(dir, RecursiveMode::NonRecursive)?;

        log::info!("Watching profile directory {}", dir.display());
        Ok(Self {
            _watcher: Mutex::new(watcher),
            dir: dir.to_path_buf(),
        })
    }

    fn create_watcher(tx: Sender<CatalogEvent>) -> Result<Box<dyn Watcher + Send>> {
        match notify::recommended_watcher(make_event_handler(tx.clone())) {
            Ok(w) => {
                log::debug!("Profile watcher: using native backend");
                Ok(Box::new(w))
            }
            Err(e) => {
                log::warn!(
                    "Profile watcher: native backend unavailable ({e}); falling back to polling"
                );
                let poll_watcher = PollWatcher::new(
                    make_event_handler(tx),
                    NotifyConfig::default().with_poll_interval(Duration::from_millis(500)),
                )?;
                Ok(Box::new(poll_watcher))
            }
        }
    }

    /// Directory being watched
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}
