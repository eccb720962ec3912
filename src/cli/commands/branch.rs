//! Branch and reset-default command implementations.

use super::helpers::{EXIT_FAILURE, Session, report_saga, short_sha};
use crate::cli::{BranchMode, Command, RuntimeConfig, branch_mode};
use crate::error::Result;
use crate::saga::{BranchOutput, BranchRequest, ResetToDefaultRequest};

/// Execute branch command
pub(super) async fn execute_branch(
    command: &Command,
    config: &RuntimeConfig,
    session: &Session,
) -> Result<i32> {
    let Command::Branch { repo, name, create, switch, from, .. } = command else {
        return Ok(EXIT_FAILURE);
    };

    let mut request = BranchRequest::new(name.clone());
    if let Some(from) = from {
        request = request.start_point(from.clone());
    }

    let options = session.write_options();
    let manager = &session.manager;
    let result = match branch_mode(*create, *switch) {
        BranchMode::Create => manager.create_branch(repo, request, options).await?,
        BranchMode::Switch => manager.switch_branch(repo, request, options).await?,
        BranchMode::Ensure => manager.create_or_switch_branch(repo, request, options).await?,
    };

    report_saga(config, "branch", &result, |out: &BranchOutput| {
        let verb = if out.created { "Created and switched to" } else { "Switched to" };
        let _ = config.output().success(&format!("{verb} branch '{}'", out.branch_name));
        let _ = config.output().verbose(&format!("previous head: {}", out.previous));
    })
}

/// Execute reset-default command
pub(super) async fn execute_reset_default(
    command: &Command,
    config: &RuntimeConfig,
    session: &Session,
) -> Result<i32> {
    let Command::ResetDefault { repo, remote } = command else {
        return Ok(EXIT_FAILURE);
    };

    let request = ResetToDefaultRequest {
        remote: remote.clone(),
    };
    let _ = config
        .output()
        .progress(&format!("Resetting {} to the default branch of {}", repo.display(), remote));
    let result = session
        .manager
        .reset_to_default_branch(repo, request, session.write_options())
        .await?;

    report_saga(config, "reset-default", &result, |out| {
        let _ = config.output().success(&format!(
            "On '{}' at {}/{} ({})",
            out.branch_name,
            remote,
            out.branch_name,
            short_sha(&out.new_sha)
        ));
        let _ = config.output().verbose(&format!(
            "previously {} at {}",
            out.previous,
            short_sha(&out.previous_sha)
        ));
    })
}
