//! Git operation manager: the single entry point for touching a repository.
//!
//! Reads run under the repository's shared lock with a client that disables
//! git's optional locks. Writes first wait for any foreign `index.lock` to
//! clear, then run under the exclusive lock. Locks are released on every exit
//! path, including errors and cancellation.

mod config;
mod options;
mod workflows;

pub use config::{DEFAULT_EXTERNAL_LOCK_TIMEOUT, ManagerConfig};
pub use options::{ReadOptions, WriteOptions};
pub use workflows::RepositoryStatus;

use crate::error::{LockError, OperationError, Result};
use crate::git::GitClient;
use crate::lock::{ExternalLockDetector, UnlockWait};
use crate::state::{RepositoryLockRegistry, SweeperHandle};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

/// Coordinates reads and writes across repositories
#[derive(Debug)]
pub struct GitOperationManager {
    /// Per-repository locks and clients
    registry: Arc<RepositoryLockRegistry>,
    /// Watches git's own index lock
    detector: ExternalLockDetector,
    /// Manager configuration
    config: ManagerConfig,
    /// Background idle sweep, when started
    sweeper: Mutex<Option<SweeperHandle>>,
}

impl GitOperationManager {
    /// Create a manager from configuration
    pub fn new(config: ManagerConfig) -> Result<Self> {
        config
            .validate()
            .map_err(|reason| anyhow::anyhow!("invalid manager configuration: {reason}"))?;

        let git_binary = match config.resolve_git_binary() {
            Ok(binary) => binary,
            Err(e) => {
                // Every git call will report the missing binary.
                log::warn!("{e}; falling back to `git`");
                PathBuf::from("git")
            }
        };
        let registry = Arc::new(RepositoryLockRegistry::new(
            config.registry_config(git_binary),
        ));
        let detector = ExternalLockDetector::new(config.lock_poll_interval, config.stale_lock_age);

        Ok(Self {
            registry,
            detector,
            config,
            sweeper: Mutex::new(None),
        })
    }

    /// Create a manager from `KODEGEN_GIT_*` environment variables
    pub fn from_env() -> Result<Self> {
        Self::new(ManagerConfig::from_env())
    }

    /// Manager configuration
    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// The repository registry
    pub fn registry(&self) -> &Arc<RepositoryLockRegistry> {
        &self.registry
    }

    /// The index lock detector
    pub fn detector(&self) -> &ExternalLockDetector {
        &self.detector
    }

    /// Start evicting idle repositories in the background.
    ///
    /// Must be called from within a tokio runtime. Calling it again while the
    /// sweep runs has no effect.
    pub fn start_idle_sweep(&self) {
        let mut sweeper = self
            .sweeper
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if sweeper.is_none() {
            log::debug!(
                "starting idle sweep every {}s",
                self.config.sweep_interval.as_secs()
            );
            *sweeper = Some(self.registry.start_sweeper());
        }
    }

    /// Stop the background sweep and wait for it to finish
    pub async fn stop_idle_sweep(&self) {
        let handle = self
            .sweeper
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(handle) = handle {
            handle.stop().await;
        }
    }

    /// Run `operation` under the repository's shared lock.
    ///
    /// The client passed to `operation` disables git's optional locks and is
    /// bound to the cancellation token of `options`.
    pub async fn execute_read<T, E, F, Fut>(
        &self,
        repo_path: impl AsRef<Path>,
        operation: F,
        options: ReadOptions,
    ) -> std::result::Result<T, E>
    where
        F: FnOnce(GitClient) -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: From<OperationError>,
    {
        let handle = self.registry.checkout(repo_path.as_ref())?;
        let guard = acquire(options.cancel.as_ref(), &handle.path, handle.lock.read()).await?;

        let client = handle
            .client
            .clone()
            .read_only()
            .with_cancellation(options.cancel.clone());
        let outcome = operation(client).await;

        drop(guard);
        self.registry.touch(&handle.path);
        outcome
    }

    /// Run `operation` under the repository's exclusive lock.
    ///
    /// Unless disabled in `options`, first waits for a foreign `index.lock`
    /// to clear; if it does not clear in time, fails with
    /// [`LockError::RepositoryLocked`] without taking the lock. If the
    /// operation fails after the token was cancelled, a leftover
    /// `index.lock` is removed before the lock is released.
    pub async fn execute_write<T, E, F, Fut>(
        &self,
        repo_path: impl AsRef<Path>,
        operation: F,
        options: WriteOptions,
    ) -> std::result::Result<T, E>
    where
        F: FnOnce(GitClient) -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: From<OperationError>,
    {
        self.write_with(repo_path.as_ref(), operation, options, |outcome| {
            outcome.is_err()
        })
        .await
    }

    /// [`execute_write`](Self::execute_write) with a caller-defined notion of
    /// failure, so saga failures (which are values) count as failures
    pub(crate) async fn write_with<T, E, F, Fut>(
        &self,
        repo_path: &Path,
        operation: F,
        options: WriteOptions,
        failed: impl FnOnce(&std::result::Result<T, E>) -> bool,
    ) -> std::result::Result<T, E>
    where
        F: FnOnce(GitClient) -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: From<OperationError>,
    {
        let handle = self.registry.checkout(repo_path)?;

        if options.wait_for_external_lock {
            let timeout = options.timeout.unwrap_or(self.config.external_lock_timeout);
            match self
                .detector
                .wait_for_unlock(&handle.path, timeout, options.cancel.as_ref())
                .await
            {
                UnlockWait::Unlocked => {}
                UnlockWait::TimedOut => {
                    return Err(OperationError::from(LockError::RepositoryLocked {
                        marker: ExternalLockDetector::lock_path(&handle.path),
                        path: handle.path,
                        waited: timeout,
                    })
                    .into());
                }
                UnlockWait::Cancelled => {
                    return Err(
                        OperationError::from(LockError::Aborted { path: handle.path }).into(),
                    );
                }
            }
        }

        let guard = acquire(options.cancel.as_ref(), &handle.path, handle.lock.write()).await?;
        log::debug!("write lock held on {}", handle.path.display());

        let client = handle
            .client
            .clone()
            .with_cancellation(options.cancel.clone());
        let outcome = operation(client).await;

        if options.is_cancelled() && failed(&outcome) {
            match self.detector.remove_lock(&handle.path).await {
                Ok(true) => log::warn!(
                    "removed index lock left by aborted operation in {}",
                    handle.path.display()
                ),
                Ok(false) => {}
                Err(e) => log::debug!("ignoring failed lock cleanup: {e}"),
            }
        }

        drop(guard);
        self.registry.touch(&handle.path);
        outcome
    }
}

/// Await a lock acquisition, giving up if `cancel` fires first
async fn acquire<G>(
    cancel: Option<&CancellationToken>,
    path: &Path,
    acquisition: impl Future<Output = G>,
) -> Result<G> {
    match cancel {
        Some(token) => tokio::select! {
            biased;
            _ = token.cancelled() => Err(LockError::Aborted { path: path.to_path_buf() }.into()),
            guard = acquisition => Ok(guard),
        },
        None => Ok(acquisition.await),
    }
}
