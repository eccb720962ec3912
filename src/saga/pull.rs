//! Pull with local changes protected by a stash.

use super::{Saga, SagaContext};
use crate::error::Result;
use crate::git::GitOperations;
use serde::Serialize;

const STASH_MESSAGE: &str = "kodegen: changes saved before pull";

/// Parameters of a pull
#[derive(Debug, Clone)]
pub struct PullRequest {
    /// Remote to pull from
    pub remote: String,
    /// Branch to pull; the upstream of the current branch when `None`
    pub branch: Option<String>,
}

impl PullRequest {
    /// Pull the current branch's upstream from `remote`
    pub fn new(remote: impl Into<String>) -> Self {
        Self {
            remote: remote.into(),
            branch: None,
        }
    }

    /// Pull a specific branch
    pub fn branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = Some(branch.into());
        self
    }
}

impl Default for PullRequest {
    fn default() -> Self {
        Self::new("origin")
    }
}

/// Output of a successful pull
#[derive(Debug, Clone, Serialize)]
pub struct PullOutput {
    /// `HEAD` before the pull
    pub previous_head: String,
    /// `HEAD` after the pull
    pub new_head: String,
    /// Whether local changes were stashed and re-applied
    pub stashed: bool,
    /// Whether the pull changed nothing
    pub up_to_date: bool,
}

/// Pulls a remote branch without losing local changes.
///
/// A dirty tree is stashed first and popped back after the pull. If the pull
/// fails, `HEAD` is hard-reset to where it was and the stash is re-applied,
/// so neither commits nor uncommitted edits are lost.
pub struct PullSaga<G> {
    git: G,
}

impl<G: GitOperations> PullSaga<G> {
    /// Create the saga
    pub fn new(git: G) -> Self {
        Self { git }
    }
}

impl<G: GitOperations> Saga for PullSaga<G> {
    type Input = PullRequest;
    type Output = PullOutput;

    fn name(&self) -> &'static str {
        "pull"
    }

    async fn execute<'s>(
        &'s self,
        request: PullRequest,
        ctx: &mut SagaContext<'s>,
    ) -> Result<PullOutput> {
        let git = &self.git;

        let original_head = ctx.read_only_step("record-head", git.head_sha()).await?;
        let clean = ctx.read_only_step("check-clean", git.is_clean()).await?;

        let mut stashed = false;
        if !clean {
            let before = ctx.read_only_step("count-stashes", git.stash_count()).await?;
            // `git stash push` exits 0 without creating an entry when there
            // is nothing to save, so creation is decided by the list length.
            stashed = ctx
                .step(
                    "stash",
                    stash_and_check(git, before),
                    move |created: bool| async move {
                        if created {
                            git.stash_pop().await
                        } else {
                            Ok(())
                        }
                    },
                )
                .await?;
        }

        let reset_to = original_head.clone();
        ctx.step(
            "pull",
            pull_or_reset(git, &request, &original_head),
            move |()| async move { git.reset_hard(&reset_to).await },
        )
        .await?;

        let new_head = ctx.read_only_step("record-new-head", git.head_sha()).await?;

        if stashed {
            // Normal completion, not a compensation. If the pop conflicts the
            // pull is rolled back and the stash re-applied on the old head.
            ctx.read_only_step("restore-stash", git.stash_pop()).await?;
        }

        Ok(PullOutput {
            up_to_date: new_head == original_head,
            previous_head: original_head,
            new_head,
            stashed,
        })
    }
}

async fn stash_and_check<G: GitOperations>(git: &G, before: usize) -> Result<bool> {
    git.stash_push(STASH_MESSAGE, true).await?;
    let after = git.stash_count().await?;
    Ok(after > before)
}

/// Pull; on failure return `HEAD` to `original_head` before reporting the
/// error, since a failed merge can leave the index half-written.
async fn pull_or_reset<G: GitOperations>(
    git: &G,
    request: &PullRequest,
    original_head: &str,
) -> Result<()> {
    match git.pull(&request.remote, request.branch.as_deref()).await {
        Ok(()) => Ok(()),
        Err(err) => {
            if let Err(reset_err) = git.reset_hard(original_head).await {
                log::error!("reset to {original_head} after failed pull: {reset_err}");
            }
            Err(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::git::fake::FakeGit;

    #[tokio::test]
    async fn clean_tree_pulls_without_stashing() {
        let git = FakeGit::new("/repo");
        let saga = PullSaga::new(git);

        let result = saga.run(PullRequest::new("origin")).await;

        let output = result.data().expect("pull succeeds");
        assert!(!output.stashed);
        assert!(!output.up_to_date);
        assert_eq!(output.previous_head, "a".repeat(40));
        assert_eq!(output.new_head, "b".repeat(40));
        assert!(!saga.git.calls().iter().any(|c| c.starts_with("stash push")));
    }

    #[tokio::test]
    async fn dirty_tree_is_stashed_and_restored() {
        let git = FakeGit::new("/repo");
        git.set_dirty();
        let saga = PullSaga::new(git);

        let result = saga.run(PullRequest::new("origin").branch("main")).await;

        assert!(result.data().expect("pull succeeds").stashed);
        assert_eq!(saga.git.stashes(), 0);
        assert!(!saga.git.clean(), "local edit is back in the tree");
        assert!(saga.git.calls().contains(&"pull origin main".to_string()));
    }

    #[tokio::test]
    async fn failed_pull_restores_head_and_local_edits() {
        let git = FakeGit::new("/repo");
        git.set_dirty().fail("pull", "fatal: unable to access remote");
        let original = git.sha();
        let saga = PullSaga::new(git);

        let result = saga.run(PullRequest::new("origin")).await;

        assert_eq!(result.failed_step(), Some("pull"));
        assert_eq!(saga.git.sha(), original);
        assert_eq!(saga.git.stashes(), 0);
        assert!(!saga.git.clean());
        let failure = result.failure().expect("failure details");
        assert_eq!(failure.rollback.steps(), vec!["stash"]);
        assert!(failure.error.contains("unable to access remote"));
    }

    #[tokio::test]
    async fn no_op_stash_is_not_popped() {
        let git = FakeGit::new("/repo");
        git.set_dirty()
            .stash_is_noop()
            .fail("pull", "fatal: unable to access remote");
        let saga = PullSaga::new(git);

        let result = saga.run(PullRequest::new("origin")).await;

        assert_eq!(result.failed_step(), Some("pull"));
        assert!(!saga.git.calls().iter().any(|c| c == "stash pop"));
    }

    #[tokio::test]
    async fn conflicting_pop_rolls_back_the_pull() {
        let git = FakeGit::new("/repo");
        git.set_dirty().fail("stash_pop", "CONFLICT (content)");
        let original = git.sha();
        let saga = PullSaga::new(git);

        let result = saga.run(PullRequest::new("origin")).await;

        assert_eq!(result.failed_step(), Some("restore-stash"));
        assert_eq!(saga.git.sha(), original);
        let failure = result.failure().expect("failure details");
        assert_eq!(failure.rollback.steps(), vec!["pull", "stash"]);
        // The stash compensation hits the same injected pop failure.
        assert_eq!(failure.rollback.failures().count(), 1);
    }
}
