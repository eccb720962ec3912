//! Clone a repository into a new directory.

use super::{Saga, SagaContext};
use crate::error::{GitError, Result};
use crate::git::{CloneRequest, GitOperations, ProgressFn, redact_url};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Output of a successful clone
#[derive(Debug, Clone, Serialize)]
pub struct CloneOutput {
    /// Directory the repository was cloned into
    pub path: PathBuf,
    /// Source URL with credentials removed
    pub url: String,
    /// Branch requested for checkout, if any
    pub branch: Option<String>,
}

/// Clones `url` into `target`; on failure the target is left as it was found.
///
/// Steps: `reserve-target` (refuse a non-empty target, remember whether the
/// directory existed), `clone`, `verify`.
pub struct CloneSaga<G> {
    git: G,
    progress: Option<Arc<ProgressFn>>,
}

impl<G: GitOperations> CloneSaga<G> {
    /// Create the saga
    pub fn new(git: G) -> Self {
        Self {
            git,
            progress: None,
        }
    }

    /// Receive progress updates while cloning
    pub fn with_progress(mut self, progress: Arc<ProgressFn>) -> Self {
        self.progress = Some(progress);
        self
    }
}

/// Reject targets git would refuse anyway, before anything is written
async fn reserve_target(target: &Path) -> Result<bool> {
    match tokio::fs::metadata(target).await {
        Ok(meta) if !meta.is_dir() => Err(GitError::InvalidTarget {
            path: target.to_path_buf(),
            reason: "exists and is not a directory".to_string(),
        }
        .into()),
        Ok(_) => {
            let mut entries = tokio::fs::read_dir(target).await?;
            if entries.next_entry().await?.is_some() {
                return Err(GitError::InvalidTarget {
                    path: target.to_path_buf(),
                    reason: "directory is not empty".to_string(),
                }
                .into());
            }
            Ok(true)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Remove whatever now lives at `target`, recreating the empty directory
/// if one was there before
async fn release_target(target: &Path, existed: bool) -> Result<()> {
    match tokio::fs::remove_dir_all(target).await {
        Ok(()) => log::warn!("removed {}", target.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }
    if existed {
        tokio::fs::create_dir_all(target).await?;
    }
    Ok(())
}

async fn verify_checkout(target: &Path) -> Result<()> {
    if tokio::fs::try_exists(target.join(".git")).await? {
        Ok(())
    } else {
        Err(GitError::NotRepository {
            path: target.to_path_buf(),
        }
        .into())
    }
}

impl<G: GitOperations> Saga for CloneSaga<G> {
    type Input = CloneRequest;
    type Output = CloneOutput;

    fn name(&self) -> &'static str {
        "clone"
    }

    async fn execute<'s>(
        &'s self,
        request: CloneRequest,
        ctx: &mut SagaContext<'s>,
    ) -> Result<CloneOutput> {
        let target = request.target.clone();

        let reserved = target.clone();
        ctx.step(
            "reserve-target",
            reserve_target(&target),
            move |existed: bool| async move { release_target(&reserved, existed).await },
        )
        .await?;

        let cloned = target.clone();
        ctx.step(
            "clone",
            self.git.clone_repo(&request, self.progress.as_deref()),
            move |()| async move { release_target(&cloned, false).await },
        )
        .await?;

        ctx.read_only_step("verify", verify_checkout(&target)).await?;

        Ok(CloneOutput {
            path: target,
            url: redact_url(&request.url),
            branch: request.branch,
        })
    }
}
