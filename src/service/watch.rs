//! Background worker applying directory events to the catalog

use crate::catalog::watcher::{CatalogEvent, DirectoryWatcher};
use crate::error::{Error, Result};
use crate::events::ProfileEvent;
use crate::profile::id_from_path;
use crate::service::core::ServiceInner;
use crate::storage::StorageBackend;

use log::{debug, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;
use std::time::Duration;

/// How often the worker checks whether it should stop
const STOP_POLL: Duration = Duration::from_millis(200);

/// Owns the directory watch and the thread resolving its events
pub(crate) struct WatchWorker {
    watcher: DirectoryWatcher,
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl WatchWorker {
    pub fn start<S: StorageBackend + 'static>(inner: &Arc<ServiceInner<S>>) -> Result<Self> {
        let (tx, rx) = mpsc::channel();
        let watcher = DirectoryWatcher::new(&inner.config.profile_dir, tx)?;

        let running = Arc::new(AtomicBool::new(true));
        let weak = Arc::downgrade(inner);
        let flag = Arc::clone(&running);
        let thread = std::thread::Builder::new()
            .name("profman-watch".to_string())
            .spawn(move || run(&weak, &rx, &flag))
            .map_err(|source| Error::WorkerSpawn {
                name: "profman-watch",
                source,
            })?;

        Ok(Self {
            watcher,
            running,
            thread: Some(thread),
        })
    }

    /// Stop watching and wait for the worker to finish
    pub fn stop(mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread.take()
            && handle.join().is_err()
        {
            warn!("Profile watch thread panicked");
        }
        debug!("Stopped watching {}", self.watcher.dir().display());
    }
}

fn run<S: StorageBackend>(
    inner: &Weak<ServiceInner<S>>,
    rx: &Receiver<CatalogEvent>,
    running: &AtomicBool,
) {
    while running.load(Ordering::SeqCst) {
        let event = match rx.recv_timeout(STOP_POLL) {
            Ok(event) => event,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };
        let Some(inner) = inner.upgrade() else {
            break;
        };
        if apply(&inner, event) {
            inner.events.emit(&ProfileEvent::CatalogChanged);
        }
    }
}

/// Apply one event; returns whether the catalog changed
fn apply<S: StorageBackend>(inner: &ServiceInner<S>, event: CatalogEvent) -> bool {
    match event {
        CatalogEvent::Created(path) => {
            // Files written by this service are registered by the operation itself
            if id_from_path(&path).is_some_and(|id| inner.catalog.contains(id)) {
                return false;
            }

            // Peek retries sleep, so resolve before taking the operation lock
            let Some(meta) = inner.catalog.resolve_created(&path) else {
                return false;
            };

            let _op = inner.op_lock.lock();
            if inner.catalog.contains(meta.id) || !path.exists() {
                return false;
            }
            info!("Profile '{}' appeared on disk", meta.name);
            inner.catalog.upsert(meta);
            true
        }
        CatalogEvent::Deleted(path) => {
            let _op = inner.op_lock.lock();
            if path.exists() {
                return false;
            }
            if let Some(active) = inner.catalog.active().filter(|m| m.location == path) {
                warn!(
                    "File of the active profile '{}' was deleted externally; keeping it listed",
                    active.name
                );
                return false;
            }
            match inner.catalog.on_deleted(&path) {
                Some(meta) => {
                    info!("Profile '{}' disappeared from disk", meta.name);
                    true
                }
                None => false,
            }
        }
    }
}
