//! Per-repository lock registry with idle eviction.
//!
//! Each repository path maps to a [`RepositoryState`]: its reader/writer lock,
//! a git client rooted at the path, and the time it was last used. Entries
//! are created on first use and evicted by a periodic sweep once idle.

use crate::error::{LockError, Result};
use crate::git::GitClient;
use crate::lock::RepoRwLock;
use path_absolutize::Absolutize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Default idle time after which an entry may be evicted
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(300);

/// Default period of the idle sweep
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Configuration for the registry
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Git executable handed to every client
    pub git_binary: PathBuf,
    /// Entries idle longer than this are evicted by the sweep
    pub idle_timeout: Duration,
    /// How often the background sweep runs
    pub sweep_interval: Duration,
    /// Resolve symlinks and `..` before keying
    pub canonicalize_paths: bool,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            git_binary: PathBuf::from("git"),
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            canonicalize_paths: true,
        }
    }
}

/// Cached state of one repository
#[derive(Debug)]
pub struct RepositoryState {
    /// Lock serializing writers on this repository
    pub lock: RepoRwLock,
    /// Client rooted at the repository
    pub client: GitClient,
    /// Last time the entry was resolved or touched
    pub last_access: Instant,
}

/// Handles returned when an entry is resolved
#[derive(Debug, Clone)]
pub struct RepositoryHandle {
    /// Normalized registry key
    pub path: PathBuf,
    /// The repository's lock
    pub lock: RepoRwLock,
    /// Client rooted at the repository
    pub client: GitClient,
}

/// Keyed cache of repository locks
#[derive(Debug)]
pub struct RepositoryLockRegistry {
    entries: Mutex<HashMap<PathBuf, RepositoryState>>,
    config: RegistryConfig,
}

impl RepositoryLockRegistry {
    /// Create an empty registry
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            config,
        }
    }

    /// Registry configuration
    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<PathBuf, RepositoryState>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Normalize a caller-supplied path into a registry key.
    ///
    /// The path is made absolute and lexically cleaned. With canonicalization
    /// enabled, an existing path is resolved through the filesystem; a path
    /// that does not exist yet (a clone target) has its parent resolved.
    pub fn normalize_path(&self, path: &Path) -> Result<PathBuf> {
        if path.as_os_str().is_empty() {
            return Err(LockError::InvalidPath {
                path: path.to_path_buf(),
                reason: "path is empty".to_string(),
            }
            .into());
        }

        let absolute = path
            .absolutize()
            .map_err(|e| LockError::InvalidPath {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?
            .into_owned();

        if !self.config.canonicalize_paths {
            return Ok(absolute);
        }
        if let Ok(real) = std::fs::canonicalize(&absolute) {
            return Ok(real);
        }
        if let (Some(parent), Some(name)) = (absolute.parent(), absolute.file_name())
            && let Ok(real_parent) = std::fs::canonicalize(parent)
        {
            return Ok(real_parent.join(name));
        }
        Ok(absolute)
    }

    /// Resolve the entry for `path`, creating it on first use and refreshing
    /// its last-access time
    pub fn checkout(&self, path: &Path) -> Result<RepositoryHandle> {
        let key = self.normalize_path(path)?;
        let mut entries = self.entries();
        let state = entries.entry(key.clone()).or_insert_with(|| {
            log::debug!("registry: tracking {}", key.display());
            RepositoryState {
                lock: RepoRwLock::new(),
                client: GitClient::new(self.config.git_binary.clone(), key.clone()),
                last_access: Instant::now(),
            }
        });
        state.last_access = Instant::now();
        Ok(RepositoryHandle {
            path: key,
            lock: state.lock.clone(),
            client: state.client.clone(),
        })
    }

    /// Refresh the last-access time of an already-normalized key
    pub fn touch(&self, key: &Path) {
        if let Some(state) = self.entries().get_mut(key) {
            state.last_access = Instant::now();
        }
    }

    /// Number of tracked repositories
    pub fn len(&self) -> usize {
        self.entries().len()
    }

    /// True when no repository is tracked
    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    /// Whether `path` currently has an entry
    pub fn contains(&self, path: &Path) -> bool {
        match self.normalize_path(path) {
            Ok(key) => self.entries().contains_key(&key),
            Err(_) => false,
        }
    }

    /// Evict idle entries now. Returns the number evicted.
    pub fn sweep_idle(&self) -> usize {
        self.sweep_idle_at(Instant::now())
    }

    /// Evict entries idle at `now` for longer than the idle timeout.
    ///
    /// An entry is kept, whatever its timestamp, while its lock is held or
    /// queued on, or while a caller still holds a handle to it. A caller
    /// waiting on a foreign `index.lock` holds a handle before it queues;
    /// evicting then would hand the next caller a second lock for the path.
    pub fn sweep_idle_at(&self, now: Instant) -> usize {
        let timeout = self.config.idle_timeout;
        let mut entries = self.entries();
        let before = entries.len();
        entries.retain(|path, state| {
            let idle_for = now.saturating_duration_since(state.last_access);
            if idle_for <= timeout {
                return true;
            }
            // One handle is the registry's own.
            if !state.lock.is_idle() || state.lock.handle_count() > 1 {
                log::debug!(
                    "registry: {} idle for {}s but still in use, keeping",
                    path.display(),
                    idle_for.as_secs()
                );
                return true;
            }
            log::debug!("registry: evicting {}", path.display());
            false
        });
        before - entries.len()
    }

    /// Start the periodic idle sweep on the current tokio runtime.
    ///
    /// The task holds only a weak reference and ends on its own once the
    /// registry is dropped.
    pub fn start_sweeper(self: &Arc<Self>) -> SweeperHandle {
        let registry: Weak<Self> = Arc::downgrade(self);
        let token = CancellationToken::new();
        let stop = token.clone();
        let period = self.config.sweep_interval.max(Duration::from_millis(1));

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = stop.cancelled() => break,
                    _ = ticker.tick() => {
                        let Some(registry) = registry.upgrade() else {
                            break;
                        };
                        let evicted = registry.sweep_idle();
                        if evicted > 0 {
                            log::debug!("registry: sweep evicted {evicted} entries");
                        }
                    }
                }
            }
        });

        SweeperHandle {
            token,
            task: Some(task),
        }
    }
}

/// Running idle sweep. Dropping the handle stops the sweep.
#[derive(Debug)]
pub struct SweeperHandle {
    token: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl SweeperHandle {
    /// Stop the sweep and wait for its task to finish
    pub async fn stop(mut self) {
        self.token.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for SweeperHandle {
    fn drop(&mut self) {
        self.token.cancel();
    }
}
