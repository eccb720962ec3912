//! Detection of git's own on-disk index lock.
//!
//! Git creates `<git-dir>/index.lock` while it mutates the index. Another
//! process (a foreign git client, an editor integration, or a crashed run of
//! ours) may leave it behind. It is never modeled in memory, only polled.
//!
//! Two mechanisms are kept separate:
//!
//! - [`ExternalLockDetector::wait_for_unlock`] waits for the marker to
//!   disappear and then lets the caller proceed. Ordinary writes use this.
//! - [`ExternalLockDetector::remove_stale_lock`] force-clears a marker only
//!   when it is older than the configured stale age. Destructive cleanup
//!   workflows use this before they start. A fresh marker is never removed.
//!
//! [`ExternalLockDetector::remove_lock`] removes unconditionally and is only
//! called after a caller's cancellation fired while we held the repository.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};
use tokio_util::sync::CancellationToken;

/// File name of git's index lock
pub const INDEX_LOCK_FILE: &str = "index.lock";

/// Default poll interval while waiting for the marker to clear
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Default age after which a marker is considered stale
pub const DEFAULT_STALE_AGE: Duration = Duration::from_secs(2);

/// Outcome of waiting for the index lock to clear
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnlockWait {
    /// Marker is absent (or never existed)
    Unlocked,
    /// Marker still present when the timeout elapsed
    TimedOut,
    /// Caller's cancellation fired before the marker cleared
    Cancelled,
}

impl UnlockWait {
    /// True when the caller may proceed
    pub fn is_unlocked(self) -> bool {
        matches!(self, UnlockWait::Unlocked)
    }
}

/// Polls for, ages and removes git's index lock
#[derive(Debug, Clone)]
pub struct ExternalLockDetector {
    poll_interval: Duration,
    stale_after: Duration,
}

impl Default for ExternalLockDetector {
    fn default() -> Self {
        Self::new(DEFAULT_POLL_INTERVAL, DEFAULT_STALE_AGE)
    }
}

impl ExternalLockDetector {
    /// Create a detector with explicit poll interval and stale age
    pub fn new(poll_interval: Duration, stale_after: Duration) -> Self {
        Self {
            // A zero interval would spin.
            poll_interval: poll_interval.max(Duration::from_millis(1)),
            stale_after,
        }
    }

    /// Poll interval used by [`wait_for_unlock`](Self::wait_for_unlock)
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Age after which a marker counts as stale
    pub fn stale_after(&self) -> Duration {
        self.stale_after
    }

    /// Location of the index lock for the repository rooted at `repo_path`.
    ///
    /// Linked worktrees have a `.git` file pointing at their git dir; that
    /// pointer is followed so the marker of the worktree's own index is used.
    pub fn lock_path(repo_path: &Path) -> PathBuf {
        git_dir(repo_path).join(INDEX_LOCK_FILE)
    }

    /// Whether the marker currently exists
    pub async fn is_locked(&self, repo_path: &Path) -> bool {
        tokio::fs::try_exists(Self::lock_path(repo_path))
            .await
            .unwrap_or(false)
    }

    /// Age of the marker, or `None` when it does not exist
    pub async fn lock_age(&self, repo_path: &Path) -> Option<Duration> {
        let metadata = tokio::fs::metadata(Self::lock_path(repo_path)).await.ok()?;
        let modified = metadata.modified().ok()?;
        Some(
            SystemTime::now()
                .duration_since(modified)
                .unwrap_or(Duration::ZERO),
        )
    }

    /// Wait until the marker is absent, the timeout elapses, or `cancel` fires
    pub async fn wait_for_unlock(
        &self,
        repo_path: &Path,
        timeout: Duration,
        cancel: Option<&CancellationToken>,
    ) -> UnlockWait {
        let marker = Self::lock_path(repo_path);
        let started = Instant::now();
        let mut logged = false;

        loop {
            if cancel.is_some_and(|c| c.is_cancelled()) {
                return UnlockWait::Cancelled;
            }
            if !tokio::fs::try_exists(&marker).await.unwrap_or(false) {
                if logged {
                    log::debug!(
                        "{} cleared after {}ms",
                        marker.display(),
                        started.elapsed().as_millis()
                    );
                }
                return UnlockWait::Unlocked;
            }
            let elapsed = started.elapsed();
            if elapsed >= timeout {
                log::warn!(
                    "{} still present after {}ms",
                    marker.display(),
                    elapsed.as_millis()
                );
                return UnlockWait::TimedOut;
            }
            if !logged {
                log::debug!("waiting for {} to clear", marker.display());
                logged = true;
            }

            let nap = self.poll_interval.min(timeout - elapsed);
            match cancel {
                Some(token) => {
                    tokio::select! {
                        _ = token.cancelled() => return UnlockWait::Cancelled,
                        _ = tokio::time::sleep(nap) => {}
                    }
                }
                None => tokio::time::sleep(nap).await,
            }
        }
    }

    /// Force-delete the marker. Returns whether a file was removed.
    ///
    /// Only for teardown after the caller's own operation was aborted.
    pub async fn remove_lock(&self, repo_path: &Path) -> std::io::Result<bool> {
        let marker = Self::lock_path(repo_path);
        match tokio::fs::remove_file(&marker).await {
            Ok(()) => {
                log::warn!("removed git lock {}", marker.display());
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Remove the marker only if it is older than the stale age.
    /// Returns whether a file was removed.
    pub async fn remove_stale_lock(&self, repo_path: &Path) -> std::io::Result<bool> {
        match self.lock_age(repo_path).await {
            Some(age) if age > self.stale_after => {
                log::warn!(
                    "index lock in {} is {}ms old, treating as stale",
                    repo_path.display(),
                    age.as_millis()
                );
                self.remove_lock(repo_path).await
            }
            Some(age) => {
                log::debug!(
                    "index lock in {} is fresh ({}ms), leaving it",
                    repo_path.display(),
                    age.as_millis()
                );
                Ok(false)
            }
            None => Ok(false),
        }
    }
}

/// Resolve the git dir of a work tree, following `gitdir:` pointer files.
fn git_dir(repo_path: &Path) -> PathBuf {
    let dot_git = repo_path.join(".git");
    if dot_git.is_file()
        && let Ok(contents) = std::fs::read_to_string(&dot_git)
        && let Some(target) = contents.trim().strip_prefix("gitdir:")
    {
        let target = Path::new(target.trim());
        return if target.is_absolute() {
            target.to_path_buf()
        } else {
            repo_path.join(target)
        };
    }
    dot_git
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn repo_with_git_dir() -> TempDir {
        let temp = TempDir::new().expect("create temp dir");
        std::fs::create_dir_all(temp.path().join(".git")).expect("create .git");
        temp
    }

    fn write_lock(repo: &Path) -> PathBuf {
        let marker = ExternalLockDetector::lock_path(repo);
        std::fs::write(&marker, b"").expect("write index.lock");
        marker
    }

    fn fast_detector() -> ExternalLockDetector {
        ExternalLockDetector::new(Duration::from_millis(10), Duration::from_secs(3600))
    }

    #[tokio::test]
    async fn absent_marker_unlocks_immediately() {
        let repo = repo_with_git_dir();
        let outcome = fast_detector()
            .wait_for_unlock(repo.path(), Duration::from_millis(10), None)
            .await;
        assert_eq!(outcome, UnlockWait::Unlocked);
    }

    #[tokio::test]
    async fn waits_until_marker_disappears() {
        let repo = repo_with_git_dir();
        let marker = write_lock(repo.path());

        let remover = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(60)).await;
            tokio::fs::remove_file(marker).await.expect("remove lock");
        });

        let outcome = fast_detector()
            .wait_for_unlock(repo.path(), Duration::from_secs(5), None)
            .await;
        remover.await.expect("join remover");
        assert!(outcome.is_unlocked());
    }

    #[tokio::test]
    async fn times_out_while_marker_persists() {
        let repo = repo_with_git_dir();
        write_lock(repo.path());

        let outcome = fast_detector()
            .wait_for_unlock(repo.path(), Duration::from_millis(50), None)
            .await;
        assert_eq!(outcome, UnlockWait::TimedOut);
        assert!(fast_detector().is_locked(repo.path()).await);
    }

    #[tokio::test]
    async fn cancellation_stops_the_wait() {
        let repo = repo_with_git_dir();
        write_lock(repo.path());
        let token = CancellationToken::new();

        let canceller = {
            let token = token.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(30)).await;
                token.cancel();
            })
        };

        let outcome = fast_detector()
            .wait_for_unlock(repo.path(), Duration::from_secs(10), Some(&token))
            .await;
        canceller.await.expect("join canceller");
        assert_eq!(outcome, UnlockWait::Cancelled);
    }

    #[tokio::test]
    async fn fresh_lock_is_never_force_cleared() {
        let repo = repo_with_git_dir();
        write_lock(repo.path());

        let removed = fast_detector()
            .remove_stale_lock(repo.path())
            .await
            .expect("check stale lock");
        assert!(!removed);
        assert!(fast_detector().is_locked(repo.path()).await);
    }

    #[tokio::test]
    async fn stale_lock_is_removed() {
        let repo = repo_with_git_dir();
        write_lock(repo.path());
        let detector = ExternalLockDetector::new(Duration::from_millis(10), Duration::from_millis(20));
        tokio::time::sleep(Duration::from_millis(60)).await;

        assert!(detector.remove_stale_lock(repo.path()).await.expect("remove"));
        assert!(!detector.is_locked(repo.path()).await);
    }

    #[tokio::test]
    async fn remove_lock_is_idempotent() {
        let repo = repo_with_git_dir();
        write_lock(repo.path());
        let detector = fast_detector();

        assert!(detector.remove_lock(repo.path()).await.expect("first removal"));
        assert!(!detector.remove_lock(repo.path()).await.expect("second removal"));
    }

    #[test]
    fn worktree_pointer_is_followed() {
        let temp = TempDir::new().expect("create temp dir");
        let worktree = temp.path().join("wt");
        let real_git_dir = temp.path().join("main/.git/worktrees/wt");
        std::fs::create_dir_all(&worktree).expect("create worktree");
        std::fs::create_dir_all(&real_git_dir).expect("create git dir");
        std::fs::write(
            worktree.join(".git"),
            format!("gitdir: {}\n", real_git_dir.display()),
        )
        .expect("write .git file");

        assert_eq!(
            ExternalLockDetector::lock_path(&worktree),
            real_git_dir.join(INDEX_LOCK_FILE)
        );
    }
}
