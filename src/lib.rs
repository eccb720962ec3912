//! # kodegen_git_saga
//!
//! Transactional git operations for agents and tools that share working
//! copies.
//!
//! Every workflow that mutates a repository runs as a saga: an ordered list
//! of steps, each paired with a compensation. When a step fails, the
//! compensations of the completed steps run in reverse order and the caller
//! receives a [`SagaResult::Failure`] naming the failed step.
//!
//! ## Features
//!
//! - **Per-repository locking**: reads share, writes exclude, waiters are
//!   served in arrival order
//! - **Cooperation with git**: writes wait for a foreign `index.lock` to clear
//!   and fail with a lock-contention error if it does not
//! - **Compensating workflows**: clone, pull, branch create/switch, reset to
//!   the default branch, and working tree cleanup
//! - **Cancellation**: a token aborts lock waits and the running git process,
//!   after which the saga rolls back
//! - **Idle eviction**: repository state not touched for a while is dropped
//!
//! ## Usage
//!
//! ```no_run
//! use kodegen_git_saga::{GitOperationManager, ManagerConfig, PullRequest, WriteOptions};
//!
//! # async fn demo() -> kodegen_git_saga::Result<()> {
//! let manager = GitOperationManager::new(ManagerConfig::default())?;
//! let result = manager
//!     .pull("/work/repo", PullRequest::new("origin"), WriteOptions::new())
//!     .await?;
//! if let Some(failure) = result.failure() {
//!     eprintln!("pull failed at {}: {}", failure.failed_step, failure.error);
//! }
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

// Core modules
pub mod cli;
pub mod error;
pub mod git;
pub mod lock;
pub mod saga;
pub mod state;

// Re-export main types for public API
pub use error::{CliError, GitError, LockError, OperationError, Result};
pub use git::{
    CloneProgress, CloneRequest, GitClient, GitOperationManager, GitOperations, HeadRef,
    ManagerConfig, ReadOptions, RepositoryStatus, WriteOptions,
};
pub use lock::{ExternalLockDetector, RepoRwLock};
pub use saga::{
    BranchRequest, CleanWorkingTreeSaga, CloneSaga, CreateBranchSaga, CreateOrSwitchBranchSaga,
    PullRequest, PullSaga, ResetToDefaultBranchSaga, ResetToDefaultRequest, RollbackReport, Saga,
    SagaContext, SagaFailure, SagaResult, SwitchBranchSaga,
};
pub use state::RepositoryLockRegistry;
