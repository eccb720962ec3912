//! Command execution functions coordinating the git workflows.
//!
//! Each subcommand runs one manager workflow. Ctrl-C cancels the in-flight
//! operation, which then rolls back like any other failure.

// Submodules
mod branch;
mod clean;
mod clone;
mod helpers;
mod pull;
mod status;

use crate::cli::{Args, Command, RuntimeConfig};
use crate::error::{OperationError, Result};
use helpers::{EXIT_FAILURE, EXIT_LOCKED, Session};
use serde_json::json;
use tokio_util::sync::CancellationToken;

// Import command executors
use branch::{execute_branch, execute_reset_default};
use clean::execute_clean;
use clone::execute_clone;
use pull::execute_pull;
use status::execute_status;

/// Execute the main command based on parsed arguments
pub async fn execute_command(args: Args) -> Result<i32> {
    let config = RuntimeConfig::from(&args);

    if let Err(invalid) = args.validate() {
        let error = OperationError::from(invalid);
        return Ok(report_error(&config, args.command.name(), &error));
    }

    let cancel = CancellationToken::new();
    let interrupt = tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                log::warn!("interrupted, cancelling the running operation");
                cancel.cancel();
            }
        }
    });

    let result = match Session::open(args.lock_timeout(), cancel) {
        Ok(session) => {
            session.manager.start_idle_sweep();
            let result = dispatch(&args.command, &config, &session).await;
            session.manager.stop_idle_sweep().await;
            result
        }
        Err(e) => Err(e),
    };
    interrupt.abort();

    match result {
        Ok(exit_code) => Ok(exit_code),
        Err(e) => Ok(report_error(&config, args.command.name(), &e)),
    }
}

async fn dispatch(command: &Command, config: &RuntimeConfig, session: &Session) -> Result<i32> {
    match command {
        Command::Clone { .. } => execute_clone(command, config, session).await,
        Command::Pull { .. } => execute_pull(command, config, session).await,
        Command::Branch { .. } => execute_branch(command, config, session).await,
        Command::ResetDefault { .. } => execute_reset_default(command, config, session).await,
        Command::Clean { .. } => execute_clean(command, config, session).await,
        Command::Status { .. } => execute_status(command, config, session).await,
    }
}

/// Print an error that kept the workflow from running and pick the exit code
fn report_error(config: &RuntimeConfig, command: &str, error: &OperationError) -> i32 {
    let exit_code = if error.is_lock_contention() {
        EXIT_LOCKED
    } else {
        EXIT_FAILURE
    };

    if config.is_json() {
        let body = json!({
            "success": false,
            "error": error.to_string(),
            "lockContention": error.is_lock_contention(),
            "recoverable": error.is_recoverable(),
        });
        if config.output().json(&body).is_ok() {
            return exit_code;
        }
    }

    config.error_println(&format!("Command '{}' failed: {}", command, error));

    // Show recovery suggestions if available
    let suggestions = error.recovery_suggestions();
    if !suggestions.is_empty() && !config.output().is_quiet() {
        let _ = config.output().println("\n💡 Recovery suggestions:");
        for suggestion in suggestions {
            let _ = config.output().indent(&format!("• {}", suggestion));
        }
    }

    exit_code
}
