//! Owns the current snapshot and replaces it on reload.
//!
//! State machine:
//!
//! ```text
//! Uninitialized ──reload──▶ Loading ──ok──▶ Ready ◀──┐
//!                              │                │     │ ok, or failed with a
//!                              └─fail─▶ Failed  └─reload┘ previous snapshot kept
//!                                         │
//!                                         └──reload──▶ Loading
//! ```
//!
//! Readers call [`ReloadCoordinator::current`], a lock-free load of the
//! published `Arc`. Reloads are serialised by a mutex: a request that
//! arrives while another is running waits for it and then does its own full
//! pass (queued, never coalesced), so it always sees files changed during
//! the earlier pass.

use crate::error::LoadFailure;
use crate::pipeline::SnapshotBuilder;
use crate::snapshot::{ConfigSnapshot, Generation, SnapshotRef};
use arc_swap::ArcSwapOption;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::mpsc::{Receiver, RecvTimeoutError, Sender, channel};
use std::time::Duration;
use thiserror::Error;

/// Lifecycle of the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReloadState {
    Uninitialized,
    Loading,
    /// A snapshot is published.
    Ready,
    /// The first load failed; no snapshot exists yet.
    Failed,
}

/// A reload did not publish a new snapshot.
#[derive(Debug, Error)]
pub enum ReloadError {
    /// No snapshot has ever been published.
    #[error("initial configuration load failed\n{0}")]
    Initial(LoadFailure),

    /// The previous snapshot stays active.
    #[error("configuration reload rejected, keeping generation {kept}\n{failure}")]
    Rejected {
        kept: Generation,
        failure: LoadFailure,
    },
}

impl ReloadError {
    pub fn failure(&self) -> &LoadFailure {
        match self {
            ReloadError::Initial(failure) | ReloadError::Rejected { failure, .. } => failure,
        }
    }
}

/// Stream of snapshots, one per successful reload after subscribing.
///
/// Ends once the coordinator is dropped.
#[derive(Debug)]
pub struct Subscription {
    rx: Receiver<SnapshotRef>,
}

impl Subscription {
    /// Block until the next snapshot, or `None` once the coordinator is gone.
    pub fn recv(&self) -> Option<SnapshotRef> {
        self.rx.recv().ok()
    }

    pub fn try_recv(&self) -> Option<SnapshotRef> {
        self.rx.try_recv().ok()
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Option<SnapshotRef> {
        self.rx.recv_timeout(timeout).ok()
    }
}

impl Iterator for Subscription {
    type Item = SnapshotRef;

    fn next(&mut self) -> Option<Self::Item> {
        self.recv()
    }
}

/// Holds the current [`ConfigSnapshot`] and publishes new ones.
pub struct ReloadCoordinator {
    builder: SnapshotBuilder,
    current: ArcSwapOption<ConfigSnapshot>,
    state: Mutex<ReloadState>,
    /// Held for the whole of a reload. Guards the last published generation.
    reload_lock: Mutex<Generation>,
    subscribers: Mutex<Vec<Sender<SnapshotRef>>>,
}

impl std::fmt::Debug for ReloadCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReloadCoordinator")
            .field("state", &self.state())
            .field("generation", &self.generation())
            .finish_non_exhaustive()
    }
}

impl ReloadCoordinator {
    /// A coordinator with nothing loaded yet.
    pub fn new(builder: SnapshotBuilder) -> Self {
        Self {
            builder,
            current: ArcSwapOption::empty(),
            state: Mutex::new(ReloadState::Uninitialized),
            reload_lock: Mutex::new(0),
            subscribers: Mutex::new(Vec::new()),
        }
    }

    /// Create a coordinator and perform the first load.
    pub fn start(builder: SnapshotBuilder) -> Result<Self, ReloadError> {
        let coordinator = Self::new(builder);
        coordinator.request_reload()?;
        Ok(coordinator)
    }

    /// The published snapshot; `None` until the first successful load.
    pub fn current(&self) -> Option<SnapshotRef> {
        self.current.load_full()
    }

    pub fn generation(&self) -> Option<Generation> {
        self.current.load_full().map(|s| s.generation())
    }

    pub fn state(&self) -> ReloadState {
        *self.state.lock()
    }

    pub fn builder(&self) -> &SnapshotBuilder {
        &self.builder
    }

    /// Receive every snapshot published from now on.
    pub fn subscribe(&self) -> Subscription {
        let (tx, rx) = channel();
        self.subscribers.lock().push(tx);
        Subscription { rx }
    }

    /// Run a full load cycle and publish the result.
    ///
    /// Blocks while another reload is in progress, then runs its own.
    pub fn request_reload(&self) -> Result<Generation, ReloadError> {
        let mut last = self.reload_lock.lock();
        *self.state.lock() = ReloadState::Loading;

        let next = *last + 1;
        log::debug!("Loading configuration generation {next}");
        match self.builder.build(next) {
            Ok(snapshot) => {
                let snapshot = Arc::new(snapshot);
                self.current.store(Some(Arc::clone(&snapshot)));
                *last = next;
                *self.state.lock() = ReloadState::Ready;
                log::info!(
                    "Configuration generation {next} loaded from {} source(s), theme '{}'",
                    snapshot.sources().len(),
                    snapshot.theme().name()
                );
                self.publish(&snapshot);
                Ok(next)
            }
            Err(failure) => match self.generation() {
                Some(kept) => {
                    *self.state.lock() = ReloadState::Ready;
                    log::warn!("Configuration reload rejected, keeping generation {kept}\n{failure}");
                    Err(ReloadError::Rejected { kept, failure })
                }
                None => {
                    *self.state.lock() = ReloadState::Failed;
                    log::error!("Initial configuration load failed\n{failure}");
                    Err(ReloadError::Initial(failure))
                }
            },
        }
    }

    fn publish(&self, snapshot: &SnapshotRef) {
        self.subscribers
            .lock()
            .retain(|tx| tx.send(Arc::clone(snapshot)).is_ok());
    }
}

/// Trailing-edge debounce: wait until `window` passes with no further
/// event, folding every event received meanwhile into `first`.
pub fn coalesce_events<T>(
    rx: &Receiver<T>,
    first: T,
    window: Duration,
    mut merge: impl FnMut(&mut T, T),
) -> T {
    let mut pending = first;
    loop {
        match rx.recv_timeout(window) {
            Ok(event) => {
                log::trace!("Debouncing config change");
                merge(&mut pending, event);
            }
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => {
                return pending;
            }
        }
    }
}

#[cfg(feature = "watcher")]
pub use watch::WatchHandle;

#[cfg(feature = "watcher")]
mod watch {
    use super::{ReloadCoordinator, coalesce_events};
    use crate::watcher::{ConfigReloadEvent, ConfigWatcher};
    use anyhow::{Context, Result};
    use parking_lot::Mutex;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::mpsc::{Receiver, RecvTimeoutError, sync_channel};
    use std::sync::{Arc, Weak};
    use std::thread::JoinHandle;
    use std::time::Duration;

    /// Pending events beyond this are dropped; a reload is already due.
    const QUEUE_CAPACITY: usize = 64;

    /// How often the worker checks for shutdown while idle.
    const STOP_POLL: Duration = Duration::from_millis(100);

    /// Live file watching. Stops the watcher and its worker thread on drop.
    pub struct WatchHandle {
        watcher: Option<Arc<Mutex<ConfigWatcher>>>,
        worker: Option<JoinHandle<()>>,
        stop: Arc<AtomicBool>,
    }

    impl std::fmt::Debug for WatchHandle {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("WatchHandle")
                .field("dirs", &self.dirs())
                .finish_non_exhaustive()
        }
    }

    impl WatchHandle {
        /// Directories being watched, including ones created since
        /// watching started.
        pub fn dirs(&self) -> Vec<PathBuf> {
            self.watcher
                .as_ref()
                .map(|w| w.lock().dirs().to_vec())
                .unwrap_or_default()
        }

        /// Requested directories that do not exist yet.
        pub fn pending(&self) -> Vec<PathBuf> {
            self.watcher
                .as_ref()
                .map(|w| w.lock().pending())
                .unwrap_or_default()
        }
    }

    impl Drop for WatchHandle {
        fn drop(&mut self) {
            self.stop.store(true, Ordering::Release);
            self.watcher.take();
            if let Some(worker) = self.worker.take() {
                if worker.join().is_err() {
                    log::error!("Config reload worker panicked");
                }
            }
        }
    }

    impl ReloadCoordinator {
        /// Watch the builder's source directories and reload on change,
        /// once per burst of events separated by less than `debounce`.
        ///
        /// The worker holds only a weak reference; it stops by itself once
        /// the coordinator is dropped.
        pub fn watch(self: &Arc<Self>, debounce: Duration) -> Result<WatchHandle> {
            let dirs = self.builder().watch_dirs();
            let (tx, rx) = sync_channel(QUEUE_CAPACITY);
            let watcher = Arc::new(Mutex::new(ConfigWatcher::new(&dirs, tx)?));

            let stop = Arc::new(AtomicBool::new(false));
            let coordinator = Arc::downgrade(self);
            let worker_stop = Arc::clone(&stop);
            let worker_watcher = Arc::clone(&watcher);
            let worker = std::thread::Builder::new()
                .name("lumen-config-reload".to_string())
                .spawn(move || run_worker(coordinator, worker_watcher, rx, debounce, worker_stop))
                .context("Failed to spawn config reload worker")?;

            Ok(WatchHandle {
                watcher: Some(watcher),
                worker: Some(worker),
                stop,
            })
        }
    }

    fn run_worker(
        coordinator: Weak<ReloadCoordinator>,
        watcher: Arc<Mutex<ConfigWatcher>>,
        rx: Receiver<ConfigReloadEvent>,
        debounce: Duration,
        stop: Arc<AtomicBool>,
    ) {
        while !stop.load(Ordering::Acquire) {
            let first = match rx.recv_timeout(STOP_POLL) {
                Ok(event) => event,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            };
            let changed = coalesce_events(&rx, first, debounce, |pending, event| {
                for path in event.paths {
                    if !pending.paths.contains(&path) {
                        pending.paths.push(path);
                    }
                }
            });
            if stop.load(Ordering::Acquire) {
                break;
            }
            let Some(coordinator) = coordinator.upgrade() else {
                break;
            };
            // Arm new directories before reloading so that files written
            // into them afterwards are seen.
            watcher.lock().rearm();
            log::info!(
                "Config change detected in {} file(s); reloading",
                changed.paths.len()
            );
            // Failures are logged by the coordinator
            let _ = coordinator.request_reload();
        }
        log::debug!("Config reload worker stopped");
    }
}
