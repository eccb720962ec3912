//! Concrete workflows run under the manager's locks.

use super::{GitOperationManager, ReadOptions, WriteOptions};
use crate::error::{OperationError, Result};
use crate::git::{CloneRequest, GitClient, GitOperations, HeadRef, ProgressFn};
use crate::saga::{
    BranchOutput, BranchRequest, CleanOutput, CleanWorkingTreeSaga, CloneOutput, CloneSaga,
    CreateBranchSaga, CreateOrSwitchBranchSaga, PullOutput, PullRequest, PullSaga, ResetOutput,
    ResetToDefaultBranchSaga, ResetToDefaultRequest, Saga, SagaResult, SwitchBranchSaga,
};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Snapshot of a repository taken under the shared lock
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RepositoryStatus {
    /// Normalized repository path
    pub path: PathBuf,
    /// What `HEAD` points at
    pub head: HeadRef,
    /// Commit at `HEAD`
    pub sha: String,
    /// Whether the working tree has no changes
    pub clean: bool,
    /// Entries in the stash list
    pub stash_count: usize,
    /// Whether git's `index.lock` is present
    pub index_locked: bool,
}

impl GitOperationManager {
    /// Run a saga built from the write client under the exclusive lock
    async fn run_write_saga<S, B>(
        &self,
        repo_path: &Path,
        build: B,
        input: S::Input,
        options: WriteOptions,
    ) -> Result<SagaResult<S::Output>>
    where
        S: Saga,
        B: FnOnce(GitClient) -> S,
    {
        self.write_with(
            repo_path,
            |client| async move {
                let saga = build(client);
                Ok::<_, OperationError>(saga.run(input).await)
            },
            options,
            |outcome| outcome.as_ref().map_or(true, |result| !result.is_success()),
        )
        .await
    }

    /// Clone `request.url` into `request.target`, locking the target path
    pub async fn clone_repository(
        &self,
        mut request: CloneRequest,
        progress: Option<Arc<ProgressFn>>,
        options: WriteOptions,
    ) -> Result<SagaResult<CloneOutput>> {
        request.target = self.registry.normalize_path(&request.target)?;
        let target = request.target.clone();
        self.run_write_saga(
            &target,
            |client| {
                let saga = CloneSaga::new(client);
                match progress {
                    Some(progress) => saga.with_progress(progress),
                    None => saga,
                }
            },
            request,
            options,
        )
        .await
    }

    /// Pull into the repository, protecting local changes
    pub async fn pull(
        &self,
        repo_path: impl AsRef<Path>,
        request: PullRequest,
        options: WriteOptions,
    ) -> Result<SagaResult<PullOutput>> {
        self.run_write_saga(repo_path.as_ref(), PullSaga::new, request, options)
            .await
    }

    /// Create and check out a new branch
    pub async fn create_branch(
        &self,
        repo_path: impl AsRef<Path>,
        request: BranchRequest,
        options: WriteOptions,
    ) -> Result<SagaResult<BranchOutput>> {
        self.run_write_saga(repo_path.as_ref(), CreateBranchSaga::new, request, options)
            .await
    }

    /// Check out an existing branch
    pub async fn switch_branch(
        &self,
        repo_path: impl AsRef<Path>,
        request: BranchRequest,
        options: WriteOptions,
    ) -> Result<SagaResult<BranchOutput>> {
        self.run_write_saga(repo_path.as_ref(), SwitchBranchSaga::new, request, options)
            .await
    }

    /// Check out a branch, creating it if needed
    pub async fn create_or_switch_branch(
        &self,
        repo_path: impl AsRef<Path>,
        request: BranchRequest,
        options: WriteOptions,
    ) -> Result<SagaResult<BranchOutput>> {
        self.run_write_saga(
            repo_path.as_ref(),
            CreateOrSwitchBranchSaga::new,
            request,
            options,
        )
        .await
    }

    /// Return to the remote's default branch and match it
    pub async fn reset_to_default_branch(
        &self,
        repo_path: impl AsRef<Path>,
        request: ResetToDefaultRequest,
        options: WriteOptions,
    ) -> Result<SagaResult<ResetOutput>> {
        self.run_write_saga(
            repo_path.as_ref(),
            ResetToDefaultBranchSaga::new,
            request,
            options,
        )
        .await
    }

    /// Discard local changes, keeping a backup stash.
    ///
    /// A stale `index.lock` is removed first, unless this process is working
    /// on the repository. A fresh one is waited on like any other write.
    pub async fn clean_working_tree(
        &self,
        repo_path: impl AsRef<Path>,
        options: WriteOptions,
    ) -> Result<SagaResult<CleanOutput>> {
        let path = self.registry.normalize_path(repo_path.as_ref())?;
        let idle = self.registry.checkout(&path)?.lock.is_idle();
        let removed = if idle {
            self.detector.remove_stale_lock(&path).await?
        } else {
            false
        };

        let detector = self.detector.clone();
        let result = self
            .run_write_saga(
                &path,
                |client| CleanWorkingTreeSaga::new(client, detector),
                (),
                options,
            )
            .await?;
        Ok(result.map(|mut output| {
            output.stale_lock_removed |= removed;
            output
        }))
    }

    /// Read the repository's head, cleanliness and stash depth
    pub async fn inspect(
        &self,
        repo_path: impl AsRef<Path>,
        options: ReadOptions,
    ) -> Result<RepositoryStatus> {
        let detector = &self.detector;
        self.execute_read(
            repo_path,
            |client| async move {
                Ok::<_, OperationError>(RepositoryStatus {
                    head: client.current_head().await?,
                    sha: client.head_sha().await?,
                    clean: client.is_clean().await?,
                    stash_count: client.stash_count().await?,
                    index_locked: detector.is_locked(client.work_dir()).await,
                    path: client.work_dir().to_path_buf(),
                })
            },
            options,
        )
        .await
    }
}
