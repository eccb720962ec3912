//! Repository locking primitives.
//!
//! In-process exclusion is provided by [`RepoRwLock`]; exclusion against other
//! processes is observed through git's own index lock by
//! [`ExternalLockDetector`].

mod external;
mod rw;

pub use external::{
    DEFAULT_POLL_INTERVAL, DEFAULT_STALE_AGE, ExternalLockDetector, INDEX_LOCK_FILE, UnlockWait,
};
pub use rw::{AccessKind, LockSnapshot, RepoReadGuard, RepoRwLock, RepoWriteGuard};
