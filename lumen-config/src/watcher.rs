//! Config directory watcher for automatic reload.
//!
//! Watches the config, drop-in and themes directories for changes to
//! `.yaml`/`.yml`/`.toml` files and pushes a [`ConfigReloadEvent`] per
//! relevant filesystem event into a bounded queue. Bursts are not collapsed
//! here; the consumer debounces (see [`crate::coordinator`]).
//!
//! A requested directory that does not exist yet is pending: its parent is
//! watched instead, its creation is reported like a file change, and
//! [`ConfigWatcher::rearm`] starts watching it.

use anyhow::{Context, Result};
use notify::{Config as NotifyConfig, Event, EventKind, PollWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::mpsc::{Receiver, SyncSender, TrySendError, sync_channel};
use std::time::Duration;

/// File extensions that can hold config or theme documents.
const WATCHED_EXTENSIONS: &[&str] = &["yaml", "yml", "toml"];

/// Poll interval of the fallback backend.
const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// A config or theme file changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigReloadEvent {
    /// Files the event was about.
    pub paths: Vec<PathBuf>,
}

/// Watches config directories and sends reload events.
pub struct ConfigWatcher {
    watcher: Box<dyn Watcher + Send>,
    dirs: Vec<PathBuf>,
    /// Requested directories that did not exist when last checked. Shared
    /// with the event handler.
    pending: Arc<Mutex<Vec<PathBuf>>>,
}

impl std::fmt::Debug for ConfigWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigWatcher")
            .field("dirs", &self.dirs)
            .field("pending", &*self.pending.lock())
            .finish_non_exhaustive()
    }
}

fn is_config_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| WATCHED_EXTENSIONS.iter().any(|w| ext.eq_ignore_ascii_case(w)))
}

/// Build the shared event-handler closure used by both watcher backends.
fn make_event_handler(
    tx: SyncSender<ConfigReloadEvent>,
    pending: Arc<Mutex<Vec<PathBuf>>>,
) -> impl Fn(std::result::Result<Event, notify::Error>) + Send + 'static {
    move |result: std::result::Result<Event, notify::Error>| {
        let event = match result {
            Ok(event) => event,
            Err(e) => {
                log::error!("Config watcher error: {}", e);
                return;
            }
        };

        // Create and remove cover atomic saves (write to temp, rename over)
        if !matches!(
            event.kind,
            EventKind::Modify(_) | EventKind::Create(_) | EventKind::Remove(_)
        ) {
            return;
        }

        let created = matches!(event.kind, EventKind::Create(_));
        let paths: Vec<PathBuf> = event
            .paths
            .into_iter()
            .filter(|p| is_config_file(p) || (created && pending.lock().contains(p)))
            .collect();
        if paths.is_empty() {
            return;
        }

        log::debug!("Config files changed: {:?}", paths);
        match tx.try_send(ConfigReloadEvent { paths }) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                log::trace!("Reload queue full; a reload is already pending");
            }
            Err(TrySendError::Disconnected(_)) => {
                log::debug!("Reload queue closed; dropping config change event");
            }
        }
    }
}

impl ConfigWatcher {
    /// Watch every directory in `dirs` that exists, sending events on `tx`.
    /// A missing directory is watched for creation through its parent.
    ///
    /// Attempts to use the platform's native watcher (`RecommendedWatcher`: inotify on
    /// Linux, kqueue on macOS, ReadDirectoryChanges on Windows). If the native backend
    /// fails to initialise (e.g. inside a container or on a network filesystem), falls
    /// back to a `PollWatcher`.
    ///
    /// # Errors
    /// Returns an error if neither a directory nor the parent of a missing one
    /// exists, or watching fails on both backends.
    pub fn new(dirs: &[PathBuf], tx: SyncSender<ConfigReloadEvent>) -> Result<Self> {
        let (existing, missing): (Vec<PathBuf>, Vec<PathBuf>) =
            dirs.iter().cloned().partition(|d| d.is_dir());
        let mut parents: Vec<PathBuf> = Vec::new();
        for dir in &missing {
            match dir.parent().filter(|p| p.is_dir()) {
                Some(parent) => {
                    if !existing.iter().any(|d| d == parent) && !parents.iter().any(|d| d == parent)
                    {
                        parents.push(parent.to_path_buf());
                    }
                }
                None => log::warn!(
                    "Config hot reload: {} and its parent do not exist; not watched",
                    dir.display()
                ),
            }
        }
        if existing.is_empty() && parents.is_empty() {
            anyhow::bail!(
                "None of the config directories exist: {}",
                dirs.iter()
                    .map(|d| d.display().to_string())
                    .collect::<Vec<_>>()
                    .join(", ")
            );
        }

        let pending = Arc::new(Mutex::new(missing));
        let mut watcher = Self::create_watcher(tx, &pending)?;
        for dir in &existing {
            watcher
                .watch(dir, RecursiveMode::NonRecursive)
                .with_context(|| format!("Failed to watch config directory: {}", dir.display()))?;
            log::info!("Config hot reload: watching {}", dir.display());
        }
        for parent in &parents {
            watcher
                .watch(parent, RecursiveMode::NonRecursive)
                .with_context(|| format!("Failed to watch directory: {}", parent.display()))?;
            log::debug!("Config hot reload: watching {} for new directories", parent.display());
        }
        for dir in pending.lock().iter() {
            log::info!("Config hot reload: waiting for {} to be created", dir.display());
        }

        Ok(Self {
            watcher,
            dirs: existing,
            pending,
        })
    }

    /// Start watching pending directories that exist now. Returns the ones
    /// newly watched.
    pub fn rearm(&mut self) -> Vec<PathBuf> {
        // The handler locks `pending`, so it is not held while the backend
        // is called.
        let candidates: Vec<PathBuf> = self
            .pending
            .lock()
            .iter()
            .filter(|d| d.is_dir())
            .cloned()
            .collect();
        let mut armed = Vec::new();
        for dir in candidates {
            match self.watcher.watch(&dir, RecursiveMode::NonRecursive) {
                Ok(()) => {
                    log::info!("Config hot reload: watching {}", dir.display());
                    self.dirs.push(dir.clone());
                    armed.push(dir);
                }
                Err(e) => log::warn!("Failed to watch config directory {}: {}", dir.display(), e),
            }
        }
        if !armed.is_empty() {
            self.pending.lock().retain(|d| !armed.contains(d));
        }
        armed
    }

    /// Create a watcher together with its own bounded event queue.
    pub fn with_queue(
        dirs: &[PathBuf],
        capacity: usize,
    ) -> Result<(Self, Receiver<ConfigReloadEvent>)> {
        let (tx, rx) = sync_channel(capacity);
        Ok((Self::new(dirs, tx)?, rx))
    }

    /// Directories actually being watched.
    pub fn dirs(&self) -> &[PathBuf] {
        &self.dirs
    }

    /// Requested directories that do not exist yet.
    pub fn pending(&self) -> Vec<PathBuf> {
        self.pending.lock().clone()
    }

    /// Try to create the best available watcher backend.
    fn create_watcher(
        tx: SyncSender<ConfigReloadEvent>,
        pending: &Arc<Mutex<Vec<PathBuf>>>,
    ) -> Result<Box<dyn Watcher + Send>> {
        let fallback_tx = tx.clone();
        match notify::recommended_watcher(make_event_handler(tx, Arc::clone(pending))) {
            Ok(w) => {
                log::debug!("Config watcher: using native (RecommendedWatcher) backend");
                Ok(Box::new(w))
            }
            Err(e) => {
                log::warn!(
                    "Config watcher: native backend unavailable ({}); falling back to PollWatcher",
                    e
                );
                let poll_watcher = PollWatcher::new(
                    make_event_handler(fallback_tx, Arc::clone(pending)),
                    NotifyConfig::default().with_poll_interval(POLL_INTERVAL),
                )
                .context("Failed to create fallback PollWatcher")?;
                Ok(Box::new(poll_watcher))
            }
        }
    }
}
