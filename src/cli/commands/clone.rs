//! Clone command implementation.

use super::helpers::{EXIT_FAILURE, Session, report_saga};
use crate::cli::{Command, RuntimeConfig};
use crate::error::Result;
use crate::git::{CloneProgress, CloneRequest, ProgressFn};
use std::sync::{Arc, Mutex};

/// Execute clone command
pub(super) async fn execute_clone(
    command: &Command,
    config: &RuntimeConfig,
    session: &Session,
) -> Result<i32> {
    let Command::Clone { url, path, branch, depth } = command else {
        return Ok(EXIT_FAILURE);
    };

    let mut request = CloneRequest::new(url.clone(), path.clone());
    if let Some(branch) = branch {
        request = request.branch(branch.clone());
    }
    if let Some(depth) = depth {
        request = request.depth(*depth);
    }

    let _ = config.output().progress(&format!("Cloning into {}", path.display()));
    let progress = (!config.output().is_quiet()).then(|| progress_printer(config));

    let result = session
        .manager
        .clone_repository(request, progress, session.write_options())
        .await?;

    report_saga(config, "clone", &result, |out| {
        let _ = config.output().success(&format!(
            "Cloned {} into {}",
            out.url,
            out.path.display()
        ));
        if let Some(branch) = &out.branch {
            let _ = config.output().indent(&format!("branch: {branch}"));
        }
    })
}

/// Print a line whenever git enters a new phase or finishes one
fn progress_printer(config: &RuntimeConfig) -> Arc<ProgressFn> {
    let output = config.output().clone();
    let last_stage: Mutex<Option<String>> = Mutex::new(None);

    Arc::new(move |update: &CloneProgress| {
        let Ok(mut last) = last_stage.lock() else {
            return;
        };
        let new_stage = last.as_deref() != Some(update.stage.as_str());
        if new_stage || update.percent == 100 {
            let _ = output.verbose(&format!("{} {}%", update.stage, update.percent));
            *last = Some(update.stage.clone());
        }
    })
}
