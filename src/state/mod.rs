//! Per-repository state shared by all operations in the process.
//!
//! The registry is an explicit value owned by the operation manager, so
//! tests can build isolated instances and the idle sweep has a clear owner.

mod registry;

pub use registry::{
    DEFAULT_IDLE_TIMEOUT, DEFAULT_SWEEP_INTERVAL, RegistryConfig, RepositoryHandle,
    RepositoryLockRegistry, RepositoryState, SweeperHandle,
};
