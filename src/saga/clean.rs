//! Discard local changes, keeping a backup stash.

use super::{Saga, SagaContext};
use crate::error::{LockError, Result};
use crate::git::GitOperations;
use crate::lock::ExternalLockDetector;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

const BACKUP_MESSAGE: &str = "kodegen: backup before clean";

/// Output of [`CleanWorkingTreeSaga`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanOutput {
    /// A stale index lock was removed before starting
    pub stale_lock_removed: bool,
    /// Local changes were saved to a backup stash
    pub backup_created: bool,
}

/// Resets the index, restores tracked files and removes untracked files.
///
/// A dirty tree is saved to a backup stash first. If any cleaning step fails
/// the backup is popped back, restoring the state before the run. A stale
/// `index.lock` is cleared before starting; a fresh one belongs to another
/// process and stops the run. Once the run has started on an unlocked index,
/// any lock left behind is removed when the run ends, whatever its outcome.
pub struct CleanWorkingTreeSaga<G> {
    git: G,
    detector: ExternalLockDetector,
    owns_index: AtomicBool,
}

impl<G: GitOperations> CleanWorkingTreeSaga<G> {
    /// Create the saga
    pub fn new(git: G, detector: ExternalLockDetector) -> Self {
        Self {
            git,
            detector,
            owns_index: AtomicBool::new(false),
        }
    }
}

/// Pops the backup stash at most once, however many steps share it
struct BackupRestore<'g, G> {
    git: &'g G,
    created: bool,
    restored: Arc<AtomicBool>,
}

impl<G> Clone for BackupRestore<'_, G> {
    fn clone(&self) -> Self {
        Self {
            git: self.git,
            created: self.created,
            restored: Arc::clone(&self.restored),
        }
    }
}

impl<G: GitOperations> BackupRestore<'_, G> {
    async fn restore(self) -> Result<()> {
        if !self.created || self.restored.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.git.stash_pop().await
    }
}

/// Remove a stale marker; a marker that is still present is held by
/// someone else
async fn clear_stale_lock(detector: &ExternalLockDetector, work_dir: &Path) -> Result<bool> {
    let removed = detector.remove_stale_lock(work_dir).await?;
    if detector.is_locked(work_dir).await {
        return Err(LockError::RepositoryLocked {
            path: work_dir.to_path_buf(),
            marker: ExternalLockDetector::lock_path(work_dir),
            waited: Duration::ZERO,
        }
        .into());
    }
    Ok(removed)
}

async fn backup_stash<G: GitOperations>(git: &G) -> Result<bool> {
    let before = git.stash_count().await?;
    git.stash_push(BACKUP_MESSAGE, true).await?;
    Ok(git.stash_count().await? > before)
}

impl<G: GitOperations> Saga for CleanWorkingTreeSaga<G> {
    type Input = ();
    type Output = CleanOutput;

    fn name(&self) -> &'static str {
        "clean-working-tree"
    }

    async fn execute<'s>(&'s self, _input: (), ctx: &mut SagaContext<'s>) -> Result<CleanOutput> {
        let git = &self.git;
        let work_dir = git.work_dir();
        self.owns_index.store(false, Ordering::SeqCst);

        let stale_lock_removed = ctx
            .read_only_step("remove-stale-lock", clear_stale_lock(&self.detector, work_dir))
            .await?;
        self.owns_index.store(true, Ordering::SeqCst);

        let clean = ctx.read_only_step("check-clean", git.is_clean()).await?;
        let restored = Arc::new(AtomicBool::new(false));

        let mut backup_created = false;
        if !clean {
            let shared = BackupRestore {
                git,
                created: false,
                restored: Arc::clone(&restored),
            };
            backup_created = ctx
                .step("backup-stash", backup_stash(git), move |created: bool| {
                    BackupRestore { created, ..shared }.restore()
                })
                .await?;
        }

        let shared = BackupRestore {
            git,
            created: backup_created,
            restored,
        };

        let restore = shared.clone();
        ctx.step("reset", git.reset_index(), move |()| restore.restore())
            .await?;
        let restore = shared.clone();
        ctx.step("restore", git.restore_worktree(), move |()| restore.restore())
            .await?;
        ctx.step("clean", git.clean_untracked(), move |()| shared.restore())
            .await?;

        Ok(CleanOutput {
            stale_lock_removed,
            backup_created,
        })
    }

    async fn finalize(&self) {
        if !self.owns_index.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Err(e) = self.detector.remove_lock(self.git.work_dir()).await {
            log::warn!(
                "could not remove index lock in {}: {}",
                self.git.work_dir().display(),
                e
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::git::fake::FakeGit;
    use tempfile::TempDir;

    fn repo() -> TempDir {
        let temp = TempDir::new().expect("create temp dir");
        std::fs::create_dir_all(temp.path().join(".git")).expect("create .git");
        temp
    }

    #[tokio::test]
    async fn dirty_tree_is_backed_up_and_cleaned() {
        let temp = repo();
        let git = FakeGit::new(temp.path());
        git.set_dirty();
        let saga = CleanWorkingTreeSaga::new(git, ExternalLockDetector::default());

        let result = saga.run(()).await;

        let output = result.data().expect("clean succeeds");
        assert!(output.backup_created);
        assert_eq!(saga.git.stashes(), 1);
        assert!(saga.git.clean());
        let calls = saga.git.calls();
        let pos = |c: &str| calls.iter().position(|x| x == c).expect(c);
        assert!(pos("reset") < pos("restore .") && pos("restore .") < pos("clean -fd"));
    }

    #[tokio::test]
    async fn failing_step_pops_backup_exactly_once() {
        let temp = repo();
        let git = FakeGit::new(temp.path());
        git.set_dirty().fail("clean_untracked", "error: permission denied");
        let saga = CleanWorkingTreeSaga::new(git, ExternalLockDetector::default());

        let result = saga.run(()).await;

        assert_eq!(result.failed_step(), Some("clean"));
        assert_eq!(saga.git.stashes(), 0);
        assert!(!saga.git.clean());
        let pops = saga.git.calls().iter().filter(|c| *c == "stash pop").count();
        assert_eq!(pops, 1);
        let failure = result.failure().expect("failure");
        assert_eq!(failure.rollback.steps(), vec!["restore", "reset", "backup-stash"]);
        assert!(failure.rollback.is_clean());
    }

    #[tokio::test]
    async fn clean_tree_makes_no_backup() {
        let temp = repo();
        let saga = CleanWorkingTreeSaga::new(FakeGit::new(temp.path()), ExternalLockDetector::default());

        let output = saga.run(()).await.into_result().expect("clean succeeds");

        assert!(!output.backup_created);
        assert!(!saga.git.calls().iter().any(|c| c.starts_with("stash")));
    }

    #[tokio::test]
    async fn stale_lock_is_cleared_and_crash_lock_removed_on_failure() {
        let temp = repo();
        let marker = ExternalLockDetector::lock_path(temp.path());
        std::fs::write(&marker, b"").expect("write lock");
        let detector = ExternalLockDetector::new(Duration::from_millis(10), Duration::from_millis(20));
        tokio::time::sleep(Duration::from_millis(60)).await;

        let git = FakeGit::new(temp.path());
        git.fail("reset_index", "fatal: index file corrupt").crash_leaves_lock();
        let saga = CleanWorkingTreeSaga::new(git, detector);

        let result = saga.run(()).await;

        assert_eq!(result.failed_step(), Some("reset"));
        // The lock written by the failed reset is gone after finalize.
        assert!(!marker.exists());
    }

    #[tokio::test]
    async fn fresh_foreign_lock_is_left_alone() {
        let temp = repo();
        let marker = ExternalLockDetector::lock_path(temp.path());
        std::fs::write(&marker, b"").expect("write lock");
        let detector = ExternalLockDetector::new(Duration::from_millis(10), Duration::from_secs(60));
        let git = FakeGit::new(temp.path());
        git.set_dirty();
        let saga = CleanWorkingTreeSaga::new(git, detector);

        let result = saga.run(()).await;

        assert_eq!(result.failed_step(), Some("remove-stale-lock"));
        assert!(result.failure().is_some_and(|f| f.error.contains("locked")));
        assert!(marker.exists());
        assert!(saga.git.calls().iter().all(|c| !c.starts_with("reset") && !c.starts_with("stash")));
        assert!(!saga.git.clean());
    }
}
