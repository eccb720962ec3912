//! Status command implementation.

use super::helpers::{EXIT_FAILURE, EXIT_OK, Session, short_sha};
use crate::cli::{Command, RuntimeConfig};
use crate::error::Result;

/// Execute status command
pub(super) async fn execute_status(
    command: &Command,
    config: &RuntimeConfig,
    session: &Session,
) -> Result<i32> {
    let Command::Status { repo } = command else {
        return Ok(EXIT_FAILURE);
    };

    let status = session
        .manager
        .inspect(repo, session.read_options())
        .await?;

    if config.is_json() {
        config.output().json(&status)?;
        return Ok(EXIT_OK);
    }

    let output = config.output();
    let _ = output.section(&status.path.display().to_string());
    let _ = output.indent(&format!("head:    {}", status.head));
    let _ = output.indent(&format!("commit:  {}", short_sha(&status.sha)));
    let _ = output.indent(&format!("stashes: {}", status.stash_count));
    if status.clean {
        let _ = output.success("Working tree clean");
    } else {
        let _ = output.warn("Working tree has uncommitted changes");
    }
    if status.index_locked {
        let _ = output.warn("index.lock present: another git process may be running");
    }

    Ok(EXIT_OK)
}
