//! Command line interface for kodegen_git_saga.
//!
//! A thin layer over [`GitOperationManager`](crate::GitOperationManager):
//! argument parsing, colored or JSON output, and exit codes.

mod args;
pub mod commands;
mod output;

pub use args::{Args, BranchMode, Command, RuntimeConfig, branch_mode};
pub use commands::execute_command;
pub use output::OutputManager;

use crate::error::{CliError, Result};

/// Main CLI entry point
pub async fn run() -> Result<i32> {
    let args = Args::parse_args();
    execute_command(args).await
}

/// Validate arguments without executing (for testing)
pub fn validate_args(args: &Args) -> std::result::Result<(), CliError> {
    args.validate()
}
