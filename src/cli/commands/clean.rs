//! Clean command implementation.

use super::helpers::{EXIT_FAILURE, Session, report_saga};
use crate::cli::{Command, RuntimeConfig};
use crate::error::Result;

/// Execute clean command
pub(super) async fn execute_clean(
    command: &Command,
    config: &RuntimeConfig,
    session: &Session,
) -> Result<i32> {
    let Command::Clean { repo } = command else {
        return Ok(EXIT_FAILURE);
    };

    let _ = config.output().progress(&format!("Cleaning {}", repo.display()));
    let result = session
        .manager
        .clean_working_tree(repo, session.write_options())
        .await?;

    report_saga(config, "clean", &result, |out| {
        let output = config.output();
        let _ = output.success("Working tree is clean");
        if out.backup_created {
            let _ = output.indent("previous changes saved in the stash (git stash list)");
        }
        if out.stale_lock_removed {
            let _ = output.warn("Removed a stale index.lock");
        }
    })
}
