//! Git subprocess access and the operation manager.
//!
//! Every git call goes through [`GitClient`] (or any other [`GitOperations`]
//! implementation), and every workflow touching a repository goes through
//! [`GitOperationManager`], which owns the per-repository locking.

mod client;
#[cfg(test)]
pub(crate) mod fake;
mod manager;
mod operations;
mod progress;

pub use client::{GIT_BINARY_ENV, GitClient, GitOutput, locate_git};
pub use manager::{
    DEFAULT_EXTERNAL_LOCK_TIMEOUT, GitOperationManager, ManagerConfig, ReadOptions,
    RepositoryStatus, WriteOptions,
};
pub use operations::{CloneRequest, GitOperations, HeadRef, ProgressFn, redact_url};
pub use progress::CloneProgress;
