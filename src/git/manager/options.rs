//! Per-call options for reads and writes.

use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Options of [`execute_read`](super::GitOperationManager::execute_read)
#[derive(Debug, Clone, Default)]
pub struct ReadOptions {
    /// Cancels the lock wait and any git subprocess of the operation
    pub cancel: Option<CancellationToken>,
}

impl ReadOptions {
    /// Default options
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a cancellation token
    pub fn cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }
}

/// Options of [`execute_write`](super::GitOperationManager::execute_write)
#[derive(Debug, Clone)]
pub struct WriteOptions {
    /// Cancels the lock waits and any git subprocess of the operation
    pub cancel: Option<CancellationToken>,
    /// Wait for a foreign `index.lock`; the manager default when `None`
    pub timeout: Option<Duration>,
    /// Whether to wait for a foreign `index.lock` before taking the lock
    pub wait_for_external_lock: bool,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self {
            cancel: None,
            timeout: None,
            wait_for_external_lock: true,
        }
    }
}

impl WriteOptions {
    /// Default options
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a cancellation token
    pub fn cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Override how long to wait for a foreign `index.lock`
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Choose whether to wait for a foreign `index.lock`
    pub fn wait_for_external_lock(mut self, wait: bool) -> Self {
        self.wait_for_external_lock = wait;
        self
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|c| c.is_cancelled())
    }
}
