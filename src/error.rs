//! Error types for transactional git operations.
//!
//! This module defines all error types with actionable error messages and recovery suggestions.
//! Saga step failures are not errors at this level: they are reported as
//! [`SagaResult::Failure`](crate::saga::SagaResult) values. The types here cover
//! lock contention, subprocess failures and programmer errors.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for git operation layer calls
pub type Result<T> = std::result::Result<T, OperationError>;

/// Main error type for the git operation layer
#[derive(Error, Debug)]
pub enum OperationError {
    /// Git subprocess errors
    #[error("Git error: {0}")]
    Git(#[from] GitError),

    /// Repository lock errors
    #[error("Lock error: {0}")]
    Lock(#[from] LockError),

    /// CLI argument errors
    #[error("CLI error: {0}")]
    Cli(#[from] CliError),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic errors from anyhow
    #[error("{0}")]
    Anyhow(#[from] anyhow::Error),
}

/// Errors raised by the git subprocess boundary
#[derive(Error, Debug)]
pub enum GitError {
    /// No git executable could be located
    #[error("git executable not found: {reason}")]
    NotFound {
        /// Reason for the error
        reason: String,
    },

    /// The git process could not be started
    #[error("Failed to spawn `{command}`: {source}")]
    SpawnFailed {
        /// Command line that failed to start
        command: String,
        /// Underlying IO error
        #[source]
        source: std::io::Error,
    },

    /// Git exited with a non-zero status
    #[error("`{command}` failed with exit code {code:?}: {stderr}")]
    CommandFailed {
        /// Command line that failed
        command: String,
        /// Exit code, if the process exited normally
        code: Option<i32>,
        /// Trimmed stderr of the process
        stderr: String,
    },

    /// The command was cancelled and the subprocess killed
    #[error("`{command}` was aborted")]
    Aborted {
        /// Command line that was aborted
        command: String,
    },

    /// Not a git repository
    #[error("Not a git repository: {path}")]
    NotRepository {
        /// Path that was expected to be a repository
        path: PathBuf,
    },

    /// Working tree has uncommitted changes
    #[error("Working tree has uncommitted changes. Commit or stash them first.")]
    DirtyWorkingTree,

    /// Remote default branch could not be determined
    #[error("Could not determine the default branch of remote '{remote}'")]
    DefaultBranchUnknown {
        /// Remote name
        remote: String,
    },

    /// Clone target is unusable
    #[error("Invalid clone target {path}: {reason}")]
    InvalidTarget {
        /// Target path
        path: PathBuf,
        /// Reason for the error
        reason: String,
    },
}

/// Repository locking errors
#[derive(Error, Debug)]
pub enum LockError {
    /// The on-disk git lock did not clear in time
    #[error("Repository is locked: {} (waited {}ms for {})", path.display(), waited.as_millis(), marker.display())]
    RepositoryLocked {
        /// Repository path
        path: PathBuf,
        /// Lock marker that stayed present
        marker: PathBuf,
        /// How long we waited
        waited: Duration,
    },

    /// Cancelled while waiting for a lock
    #[error("Lock wait aborted for {}", path.display())]
    Aborted {
        /// Repository path
        path: PathBuf,
    },

    /// Repository path could not be resolved
    #[error("Invalid repository path {}: {reason}", path.display())]
    InvalidPath {
        /// Path as supplied by the caller
        path: PathBuf,
        /// Reason for the error
        reason: String,
    },
}

/// CLI-specific errors
#[derive(Error, Debug)]
pub enum CliError {
    /// Invalid command line arguments
    #[error("Invalid arguments: {reason}")]
    InvalidArguments {
        /// Reason for the error
        reason: String,
    },
}

impl OperationError {
    /// Get actionable recovery suggestions for this error
    pub fn recovery_suggestions(&self) -> Vec<String> {
        match self {
            OperationError::Lock(LockError::RepositoryLocked { marker, .. }) => vec![
                "Wait for the other git process to finish, then retry".to_string(),
                format!(
                    "If no git process is running, remove the stale lock: rm {}",
                    marker.display()
                ),
                "Increase the wait with --lock-timeout-ms".to_string(),
            ],
            OperationError::Git(GitError::DirtyWorkingTree) => vec![
                "Commit pending changes: git add . && git commit -m 'message'".to_string(),
                "Stash changes temporarily: git stash".to_string(),
            ],
            OperationError::Git(GitError::NotFound { .. }) => vec![
                "Install git and make sure it is on PATH".to_string(),
                "Or point KODEGEN_GIT_BINARY at the git executable".to_string(),
            ],
            OperationError::Git(GitError::NotRepository { .. }) => {
                vec!["Run the command from inside a git repository".to_string()]
            }
            OperationError::Cli(CliError::InvalidArguments { .. }) => {
                vec!["Run with --help to see the accepted arguments".to_string()]
            }
            _ => vec!["Check the error message above for specific details".to_string()],
        }
    }

    /// Check if this error is recoverable (safe to retry without changes)
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            OperationError::Git(GitError::NotFound { .. })
                | OperationError::Git(GitError::NotRepository { .. })
                | OperationError::Lock(LockError::InvalidPath { .. })
                | OperationError::Cli(_)
        )
    }

    /// Whether this error reports external lock contention
    pub fn is_lock_contention(&self) -> bool {
        matches!(self, OperationError::Lock(LockError::RepositoryLocked { .. }))
    }
}
