//! Shared plumbing for command executors.

use crate::cli::RuntimeConfig;
use crate::error::Result;
use crate::git::{GitOperationManager, ManagerConfig, ReadOptions, WriteOptions};
use crate::saga::SagaResult;
use serde::Serialize;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Exit code for a successful command
pub const EXIT_OK: i32 = 0;
/// Exit code for a failed saga or any other error
pub const EXIT_FAILURE: i32 = 1;
/// Exit code when a foreign `index.lock` did not clear in time
pub const EXIT_LOCKED: i32 = 2;

/// Manager plus the cancellation token wired to Ctrl-C
pub struct Session {
    /// Manager running every workflow of this invocation
    pub manager: GitOperationManager,
    /// Fired on Ctrl-C
    pub cancel: CancellationToken,
}

impl Session {
    /// Build a manager from the environment, applying `--lock-timeout-ms`
    pub fn open(lock_timeout: Option<Duration>, cancel: CancellationToken) -> Result<Self> {
        let mut config = ManagerConfig::from_env();
        if let Some(timeout) = lock_timeout {
            config.external_lock_timeout = timeout;
            if !timeout.is_zero() && config.lock_poll_interval > timeout {
                config.lock_poll_interval = timeout;
            }
            config = config.with_idle_margin();
        }

        let manager = GitOperationManager::new(config)?;
        Ok(Self { manager, cancel })
    }

    pub fn read_options(&self) -> ReadOptions {
        ReadOptions::new().cancel(self.cancel.clone())
    }

    pub fn write_options(&self) -> WriteOptions {
        WriteOptions::new().cancel(self.cancel.clone())
    }
}

/// Render a saga result and pick the exit code.
///
/// `describe` prints the human-readable summary of a successful run.
pub fn report_saga<T: Serialize>(
    config: &RuntimeConfig,
    command: &str,
    result: &SagaResult<T>,
    describe: impl FnOnce(&T),
) -> Result<i32> {
    if config.is_json() {
        config.output().json(result)?;
        return Ok(if result.is_success() { EXIT_OK } else { EXIT_FAILURE });
    }

    match result {
        SagaResult::Success { data } => {
            describe(data);
            Ok(EXIT_OK)
        }
        SagaResult::Failure(failure) => {
            config.error_println(&format!(
                "{} failed at step '{}': {}",
                command, failure.failed_step, failure.error
            ));
            let output = config.output();
            let _ = output.section("Rollback");
            let _ = output.rollback_report(&failure.rollback);
            if failure.rollback.is_clean() {
                let _ = output.info("Repository restored to its previous state");
            } else {
                let _ = output.warn("Some changes could not be undone; inspect the repository");
            }
            Ok(EXIT_FAILURE)
        }
    }
}

/// First 12 characters of a commit id
pub fn short_sha(sha: &str) -> &str {
    &sha[..sha.len().min(12)]
}
