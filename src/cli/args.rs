//! Command line argument parsing and validation.
//!
//! Every subcommand maps onto one manager workflow; global flags pick the
//! output format and how long writes wait for a foreign `index.lock`.

use crate::error::CliError;
use clap::{ArgGroup, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

/// Transactional git operations with automatic rollback
#[derive(Parser, Debug)]
#[command(
    name = "kodegen_git_saga",
    version,
    about = "Transactional git operations with automatic rollback",
    long_about = "Run git workflows as compensating sagas under per-repository locks.

A failed step undoes every earlier step, and concurrent invocations against the
same repository wait for each other and for git's own index.lock.

Usage:
  kodegen_git_saga clone https://github.com/cyrup-ai/kodegen ./kodegen
  kodegen_git_saga pull ./kodegen --remote origin
  kodegen_git_saga branch ./kodegen feature/login --ensure
  kodegen_git_saga status ./kodegen --json"
)]
pub struct Args {
    /// Command to execute
    #[command(subcommand)]
    pub command: Command,

    /// Print results as JSON instead of colored text
    #[arg(long, global = true)]
    pub json: bool,

    /// How long a write waits for a foreign index.lock (milliseconds)
    #[arg(long, global = true, value_name = "MS")]
    pub lock_timeout_ms: Option<u64>,

    /// Show step-by-step detail
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    pub verbose: bool,

    /// Only print errors
    #[arg(short, long, global = true)]
    pub quiet: bool,
}

/// Available workflows
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Clone a repository into a new directory
    Clone {
        /// Remote URL or local path to clone from
        url: String,

        /// Directory to clone into (must be absent or empty)
        path: PathBuf,

        /// Branch to check out instead of the remote default
        #[arg(long, short)]
        branch: Option<String>,

        /// Create a shallow clone with this many commits
        #[arg(long)]
        depth: Option<u32>,
    },

    /// Pull from a remote, stashing local changes around the merge
    Pull {
        /// Repository path
        repo: PathBuf,

        /// Remote to pull from
        #[arg(long, default_value = "origin")]
        remote: String,

        /// Remote branch to merge (defaults to the upstream)
        #[arg(long)]
        branch: Option<String>,
    },

    /// Create or check out a branch
    #[command(group(ArgGroup::new("mode").args(["create", "switch", "ensure"])))]
    Branch {
        /// Repository path
        repo: PathBuf,

        /// Branch name
        name: String,

        /// Create the branch; fails if it exists
        #[arg(long)]
        create: bool,

        /// Check out an existing branch
        #[arg(long)]
        switch: bool,

        /// Check out the branch, creating it when missing (default)
        #[arg(long)]
        ensure: bool,

        /// Start point for a newly created branch
        #[arg(long, value_name = "REV")]
        from: Option<String>,
    },

    /// Check out the remote's default branch and hard-reset it to the remote
    ResetDefault {
        /// Repository path
        repo: PathBuf,

        /// Remote whose default branch to use
        #[arg(long, default_value = "origin")]
        remote: String,
    },

    /// Discard all local changes, keeping a backup stash
    Clean {
        /// Repository path
        repo: PathBuf,
    },

    /// Show head, cleanliness and lock state of a repository
    Status {
        /// Repository path
        repo: PathBuf,
    },
}

/// How the branch command treats an existing or missing branch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BranchMode {
    /// Create only
    Create,
    /// Switch only
    Switch,
    /// Switch, creating when missing
    Ensure,
}

impl Args {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Validate arguments for consistency
    pub fn validate(&self) -> Result<(), CliError> {
        self.check().map_err(|reason| CliError::InvalidArguments { reason })
    }

    fn check(&self) -> Result<(), String> {
        match &self.command {
            Command::Clone { url, path, depth, branch } => {
                if url.trim().is_empty() {
                    return Err("Clone URL must not be empty".to_string());
                }
                if path.as_os_str().is_empty() {
                    return Err("Clone target must not be empty".to_string());
                }
                if *depth == Some(0) {
                    return Err("--depth must be at least 1".to_string());
                }
                if let Some(branch) = branch {
                    validate_ref_name(branch)?;
                }
            }
            Command::Pull { remote, branch, .. } => {
                validate_ref_name(remote)?;
                if let Some(branch) = branch {
                    validate_ref_name(branch)?;
                }
            }
            Command::Branch { name, from, .. } => {
                validate_ref_name(name)?;
                if let Some(from) = from {
                    validate_ref_name(from)?;
                }
            }
            Command::ResetDefault { remote, .. } => validate_ref_name(remote)?,
            Command::Clean { .. } | Command::Status { .. } => {}
        }

        Ok(())
    }

    /// Write wait override, if given
    pub fn lock_timeout(&self) -> Option<Duration> {
        self.lock_timeout_ms.map(Duration::from_millis)
    }
}

impl Command {
    /// Subcommand name for messages
    pub fn name(&self) -> &'static str {
        match self {
            Command::Clone { .. } => "clone",
            Command::Pull { .. } => "pull",
            Command::Branch { .. } => "branch",
            Command::ResetDefault { .. } => "reset-default",
            Command::Clean { .. } => "clean",
            Command::Status { .. } => "status",
        }
    }
}

/// Resolve the branch flags, defaulting to [`BranchMode::Ensure`]
pub fn branch_mode(create: bool, switch: bool) -> BranchMode {
    if create {
        BranchMode::Create
    } else if switch {
        BranchMode::Switch
    } else {
        BranchMode::Ensure
    }
}

/// Reject names git would read as an option or that are plainly malformed
fn validate_ref_name(name: &str) -> Result<(), String> {
    if name.trim().is_empty() {
        return Err("Branch and remote names must not be empty".to_string());
    }
    if name.starts_with('-') {
        return Err(format!("'{name}' must not start with '-'"));
    }
    if name.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(format!("'{name}' must not contain whitespace"));
    }
    Ok(())
}

/// Configuration derived from command line arguments
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    output: super::OutputManager,
    json: bool,
}

impl RuntimeConfig {
    /// Get a reference to the output manager
    pub fn output(&self) -> &super::OutputManager {
        &self.output
    }

    /// Whether results are rendered as JSON
    pub fn is_json(&self) -> bool {
        self.json
    }

    /// Print error message (always shown)
    pub fn error_println(&self, message: &str) {
        self.output.error(message);
    }
}

impl From<&Args> for RuntimeConfig {
    fn from(args: &Args) -> Self {
        // JSON owns stdout, so colored chatter is suppressed
        Self {
            output: super::OutputManager::new(args.verbose, args.quiet || args.json),
            json: args.json,
        }
    }
}
