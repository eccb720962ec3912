//! Pull command implementation.

use super::helpers::{EXIT_FAILURE, Session, report_saga, short_sha};
use crate::cli::{Command, RuntimeConfig};
use crate::error::Result;
use crate::saga::PullRequest;

/// Execute pull command
pub(super) async fn execute_pull(
    command: &Command,
    config: &RuntimeConfig,
    session: &Session,
) -> Result<i32> {
    let Command::Pull { repo, remote, branch } = command else {
        return Ok(EXIT_FAILURE);
    };

    let mut request = PullRequest::new(remote.clone());
    if let Some(branch) = branch {
        request = request.branch(branch.clone());
    }

    let _ = config.output().progress(&format!("Pulling {} into {}", remote, repo.display()));
    let result = session
        .manager
        .pull(repo, request, session.write_options())
        .await?;

    report_saga(config, "pull", &result, |out| {
        let output = config.output();
        if out.up_to_date {
            let _ = output.success("Already up to date");
        } else {
            let _ = output.success(&format!(
                "Updated {} → {}",
                short_sha(&out.previous_head),
                short_sha(&out.new_head)
            ));
        }
        if out.stashed {
            let _ = output.indent("local changes were stashed and re-applied");
        }
    })
}
