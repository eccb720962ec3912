//! Branch workflows: create, switch, create-or-switch and reset to default.
//!
//! Each workflow records where `HEAD` was before touching anything; its
//! compensation checks that head out again and force-deletes any branch the
//! workflow created.

use super::{Saga, SagaContext};
use crate::error::{GitError, Result};
use crate::git::{GitOperations, HeadRef};
use serde::Serialize;

/// Parameters of the create / switch workflows
#[derive(Debug, Clone)]
pub struct BranchRequest {
    /// Branch to create or switch to
    pub name: String,
    /// Commit the new branch starts from; `HEAD` when `None`
    pub start_point: Option<String>,
}

impl BranchRequest {
    /// Target `name`, starting new branches from `HEAD`
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            start_point: None,
        }
    }

    /// Start a newly created branch from `start_point`
    pub fn start_point(mut self, start_point: impl Into<String>) -> Self {
        self.start_point = Some(start_point.into());
        self
    }
}

/// Output of the create / switch workflows
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BranchOutput {
    /// Branch checked out after the run
    pub branch_name: String,
    /// Whether the branch was created by this run
    pub created: bool,
    /// What `HEAD` pointed at before the run
    pub previous: HeadRef,
}

/// Check `previous` out again, then drop `created` if this run made it.
/// Delete errors are swallowed: the branch may already be gone.
async fn restore_head<G: GitOperations>(
    git: &G,
    previous: &HeadRef,
    created: Option<&str>,
) -> Result<()> {
    git.checkout(previous.checkout_target()).await?;
    if let Some(branch) = created
        && let Err(e) = git.delete_branch(branch, true).await
    {
        log::debug!("could not delete {branch} during rollback: {e}");
    }
    Ok(())
}

/// Create a new branch and check it out
pub struct CreateBranchSaga<G> {
    git: G,
}

impl<G: GitOperations> CreateBranchSaga<G> {
    /// Create the saga
    pub fn new(git: G) -> Self {
        Self { git }
    }
}

impl<G: GitOperations> Saga for CreateBranchSaga<G> {
    type Input = BranchRequest;
    type Output = BranchOutput;

    fn name(&self) -> &'static str {
        "create-branch"
    }

    async fn execute<'s>(
        &'s self,
        request: BranchRequest,
        ctx: &mut SagaContext<'s>,
    ) -> Result<BranchOutput> {
        let git = &self.git;
        let previous = ctx.read_only_step("record-head", git.current_head()).await?;
        create_step(ctx, git, &request, &previous).await?;
        Ok(BranchOutput {
            branch_name: request.name,
            created: true,
            previous,
        })
    }
}

/// Check out an existing branch
pub struct SwitchBranchSaga<G> {
    git: G,
}

impl<G: GitOperations> SwitchBranchSaga<G> {
    /// Create the saga
    pub fn new(git: G) -> Self {
        Self { git }
    }
}

impl<G: GitOperations> Saga for SwitchBranchSaga<G> {
    type Input = BranchRequest;
    type Output = BranchOutput;

    fn name(&self) -> &'static str {
        "switch-branch"
    }

    async fn execute<'s>(
        &'s self,
        request: BranchRequest,
        ctx: &mut SagaContext<'s>,
    ) -> Result<BranchOutput> {
        let git = &self.git;
        let previous = ctx.read_only_step("record-head", git.current_head()).await?;
        switch_step(ctx, git, &request.name, &previous).await?;
        Ok(BranchOutput {
            branch_name: request.name,
            created: false,
            previous,
        })
    }
}

/// Switch to a branch, creating it first when it does not exist
pub struct CreateOrSwitchBranchSaga<G> {
    git: G,
}

impl<G: GitOperations> CreateOrSwitchBranchSaga<G> {
    /// Create the saga
    pub fn new(git: G) -> Self {
        Self { git }
    }
}

impl<G: GitOperations> Saga for CreateOrSwitchBranchSaga<G> {
    type Input = BranchRequest;
    type Output = BranchOutput;

    fn name(&self) -> &'static str {
        "create-or-switch-branch"
    }

    async fn execute<'s>(
        &'s self,
        request: BranchRequest,
        ctx: &mut SagaContext<'s>,
    ) -> Result<BranchOutput> {
        let git = &self.git;
        let previous = ctx.read_only_step("record-head", git.current_head()).await?;
        let exists = ctx
            .read_only_step("branch-exists", git.branch_exists(&request.name))
            .await?;

        if exists {
            switch_step(ctx, git, &request.name, &previous).await?;
        } else {
            create_step(ctx, git, &request, &previous).await?;
        }

        Ok(BranchOutput {
            branch_name: request.name,
            created: !exists,
            previous,
        })
    }
}

async fn create_step<'s, G: GitOperations>(
    ctx: &mut SagaContext<'s>,
    git: &'s G,
    request: &BranchRequest,
    previous: &HeadRef,
) -> Result<()> {
    let previous = previous.clone();
    let created = request.name.clone();
    ctx.step(
        "create-branch",
        git.create_branch(&request.name, request.start_point.as_deref()),
        move |()| async move { restore_head(git, &previous, Some(&created)).await },
    )
    .await
}

async fn switch_step<'s, G: GitOperations>(
    ctx: &mut SagaContext<'s>,
    git: &'s G,
    name: &str,
    previous: &HeadRef,
) -> Result<()> {
    let previous = previous.clone();
    ctx.step(
        "switch-branch",
        git.checkout(name),
        move |()| async move { restore_head(git, &previous, None).await },
    )
    .await
}

/// Parameters of [`ResetToDefaultBranchSaga`]
#[derive(Debug, Clone)]
pub struct ResetToDefaultRequest {
    /// Remote whose default branch is the target
    pub remote: String,
}

impl Default for ResetToDefaultRequest {
    fn default() -> Self {
        Self {
            remote: "origin".to_string(),
        }
    }
}

/// Output of [`ResetToDefaultBranchSaga`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResetOutput {
    /// Default branch now checked out
    pub branch_name: String,
    /// What `HEAD` pointed at before the run
    pub previous: HeadRef,
    /// Tip of the local default branch before the reset
    pub previous_sha: String,
    /// Tip after the reset (equal to the remote's)
    pub new_sha: String,
}

/// Return to the remote's default branch and match it exactly.
///
/// Refuses a dirty working tree. Fetches, checks out the default branch and
/// hard-resets it to `<remote>/<default>`.
pub struct ResetToDefaultBranchSaga<G> {
    git: G,
}

impl<G: GitOperations> ResetToDefaultBranchSaga<G> {
    /// Create the saga
    pub fn new(git: G) -> Self {
        Self { git }
    }
}

async fn require_clean<G: GitOperations>(git: &G) -> Result<()> {
    if git.is_clean().await? {
        Ok(())
    } else {
        Err(GitError::DirtyWorkingTree.into())
    }
}

/// Reset to `rev`, returning the sha `HEAD` had before
async fn reset_returning_previous<G: GitOperations>(git: &G, rev: &str) -> Result<String> {
    let before = git.head_sha().await?;
    git.reset_hard(rev).await?;
    Ok(before)
}

impl<G: GitOperations> Saga for ResetToDefaultBranchSaga<G> {
    type Input = ResetToDefaultRequest;
    type Output = ResetOutput;

    fn name(&self) -> &'static str {
        "reset-to-default-branch"
    }

    async fn execute<'s>(
        &'s self,
        request: ResetToDefaultRequest,
        ctx: &mut SagaContext<'s>,
    ) -> Result<ResetOutput> {
        let git = &self.git;
        let previous = ctx.read_only_step("record-head", git.current_head()).await?;
        ctx.read_only_step("check-clean", require_clean(git)).await?;
        // Fetch only moves remote-tracking refs.
        ctx.read_only_step("fetch", git.fetch(&request.remote)).await?;
        let default = ctx
            .read_only_step("default-branch", git.default_branch(&request.remote))
            .await?;

        let back_to = previous.clone();
        ctx.step(
            "checkout-default",
            git.checkout(&default),
            move |()| async move { restore_head(git, &back_to, None).await },
        )
        .await?;

        let upstream = format!("{}/{}", request.remote, default);
        let previous_sha = ctx
            .step(
                "reset-to-remote",
                reset_returning_previous(git, &upstream),
                move |sha: String| async move { git.reset_hard(&sha).await },
            )
            .await?;

        let new_sha = ctx.read_only_step("record-new-head", git.head_sha()).await?;

        Ok(ResetOutput {
            branch_name: default,
            previous,
            previous_sha,
            new_sha,
        })
    }
}
