//! Debounced save timer
//!
//! A single-shot timer driven by one background thread. Every
//! [`SaveScheduler::schedule`] moves the deadline to `now + delay`; the save
//! callback runs once the deadline passes without another restart.

use log::{debug, trace, warn};
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
struct TimerState {
    deadline: Option<Instant>,
    paused: bool,
    /// A restart arrived while paused
    deferred: bool,
    running: bool,
}

#[derive(Debug)]
struct Shared {
    state: Mutex<TimerState>,
    wake: Condvar,
}

/// Single-shot, restartable save timer
pub(crate) struct SaveScheduler {
    shared: Arc<Shared>,
    delay: Duration,
    lock_timeout: Duration,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl SaveScheduler {
    /// Create a stopped scheduler
    pub fn new(delay: Duration, lock_timeout: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(TimerState::default()),
                wake: Condvar::new(),
            }),
            delay,
            lock_timeout,
            thread: Mutex::new(None),
        }
    }

    /// Start the timer thread; `on_fire` performs the save.
    ///
    /// # Errors
    ///
    /// Returns the spawn error if the thread cannot be created.
    pub fn start<F>(&self, on_fire: F) -> std::io::Result<()>
    where
        F: Fn() + Send + 'static,
    {
        {
            let mut state = self.shared.state.lock();
            if state.running {
                return Ok(());
            }
            state.running = true;
        }

        let shared = Arc::clone(&self.shared);
        let spawned = std::thread::Builder::new()
            .name("profman-save".to_string())
            .spawn(move || {
                while wait_for_deadline(&shared) {
                    trace!("Save timer fired");
                    on_fire();
                }
                debug!("Save timer stopped");
            });

        match spawned {
            Ok(handle) => {
                *self.thread.lock() = Some(handle);
                Ok(())
            }
            Err(e) => {
                self.shared.state.lock().running = false;
                Err(e)
            }
        }
    }

    /// Restart the quiet period.
    ///
    /// Waits at most `lock_timeout` for the timer lock. Returns false when the
    /// restart was dropped; the previous deadline then stays in effect.
    pub fn schedule(&self) -> bool {
        let Some(mut state) = self.shared.state.try_lock_for(self.lock_timeout) else {
            debug!(
                "Save timer busy for {:?}, dropping restart",
                self.lock_timeout
            );
            return false;
        };

        if state.paused {
            state.deferred = true;
            return true;
        }
        state.deadline = Some(Instant::now() + self.delay);
        self.shared.wake.notify_one();
        true
    }

    /// Suppress saves; a pending deadline is held back until [`resume`](Self::resume)
    pub fn pause(&self) {
        let mut state = self.shared.state.lock();
        if state.paused {
            return;
        }
        state.paused = true;
        if state.deadline.take().is_some() {
            state.deferred = true;
        }
        debug!("Automatic saves paused");
    }

    /// Re-enable saves; changes made while paused start a fresh quiet period
    pub fn resume(&self) {
        let mut state = self.shared.state.lock();
        if !state.paused {
            return;
        }
        state.paused = false;
        if std::mem::take(&mut state.deferred) {
            state.deadline = Some(Instant::now() + self.delay);
            self.shared.wake.notify_one();
        }
        debug!("Automatic saves resumed");
    }

    pub fn is_paused(&self) -> bool {
        self.shared.state.lock().paused
    }

    /// Whether a save is waiting (scheduled or held back by a pause)
    pub fn is_pending(&self) -> bool {
        let state = self.shared.state.lock();
        state.deadline.is_some() || state.deferred
    }

    /// Clear any pending save, returning whether there was one
    pub fn take_pending(&self) -> bool {
        let mut state = self.shared.state.lock();
        let pending = state.deadline.take().is_some();
        std::mem::take(&mut state.deferred) || pending
    }

    /// Stop the timer thread without firing a pending save
    pub fn stop(&self) {
        {
            let mut state = self.shared.state.lock();
            state.running = false;
            state.deadline = None;
            self.shared.wake.notify_all();
        }

        if let Some(handle) = self.thread.lock().take()
            && handle.join().is_err()
        {
            warn!("Save timer thread panicked");
        }
    }
}

/// Block until the deadline passes (true) or the scheduler stops (false)
fn wait_for_deadline(shared: &Shared) -> bool {
    let mut state = shared.state.lock();
    loop {
        if !state.running {
            return false;
        }
        match state.deadline {
            None => shared.wake.wait(&mut state),
            Some(deadline) if Instant::now() >= deadline => {
                state.deadline = None;
                return true;
            }
            Some(deadline) => {
                shared.wake.wait_until(&mut state, deadline);
            }
        }
    }
}

impl Drop for SaveScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for SaveScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SaveScheduler")
            .field("delay", &self.delay)
            .field("lock_timeout", &self.lock_timeout)
            .field("state", &*self.shared.state.lock())
            .finish()
    }
}
