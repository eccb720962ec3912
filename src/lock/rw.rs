//! Fair async reader/writer lock for a single repository.
//!
//! Admission is strictly FIFO across a mixed queue of reader and writer
//! requests. A queued writer blocks every reader that arrives after it, so a
//! steady stream of reads cannot starve a pending write. When the lock frees
//! up, either the single writer at the head of the queue is woken, or the
//! whole run of consecutive readers at the head is woken together.
//!
//! State transitions happen under a short synchronous mutex that is never
//! held across an `.await`. Waiters are parked on oneshot channels.
//!
//! Release is tied to guard drop, so a lock is released on every exit path of
//! the holder, including panics and cancellation.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::oneshot;

/// Kind of access requested from the lock
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessKind {
    /// Shared access
    Read,
    /// Exclusive access
    Write,
}

#[derive(Debug)]
struct Waiter {
    id: u64,
    kind: AccessKind,
    wake: oneshot::Sender<()>,
}

#[derive(Debug, Default)]
struct LockState {
    readers: usize,
    writer: bool,
    queue: VecDeque<Waiter>,
    next_id: u64,
}

impl LockState {
    fn can_admit_now(&self, kind: AccessKind) -> bool {
        if !self.queue.is_empty() || self.writer {
            return false;
        }
        match kind {
            AccessKind::Read => true,
            AccessKind::Write => self.readers == 0,
        }
    }

    fn admit(&mut self, kind: AccessKind) {
        match kind {
            AccessKind::Read => self.readers += 1,
            AccessKind::Write => self.writer = true,
        }
    }

    /// Wake queued waiters that can now be admitted.
    ///
    /// A failed send means the waiter future was dropped between our grant and
    /// its own cleanup; its drop handler sees it is no longer queued and
    /// releases the grant, so the grant is kept here.
    fn dispatch(&mut self) {
        while let Some(front) = self.queue.front() {
            let admissible = match front.kind {
                AccessKind::Read => !self.writer,
                AccessKind::Write => !self.writer && self.readers == 0,
            };
            if !admissible {
                break;
            }
            let Some(waiter) = self.queue.pop_front() else {
                break;
            };
            self.admit(waiter.kind);
            let _ = waiter.wake.send(());
            log::trace!("rw lock: granted queued {:?} waiter {}", waiter.kind, waiter.id);
            if waiter.kind == AccessKind::Write {
                break;
            }
        }
    }

    fn release(&mut self, kind: AccessKind) {
        match kind {
            AccessKind::Read => {
                self.readers = self.readers.saturating_sub(1);
                if self.readers == 0 {
                    self.dispatch();
                }
            }
            AccessKind::Write => {
                self.writer = false;
                self.dispatch();
            }
        }
    }
}

/// Snapshot of the lock's counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockSnapshot {
    /// Number of readers holding the lock
    pub active_readers: usize,
    /// Whether a writer holds the lock
    pub writer_active: bool,
    /// Number of queued acquisition requests
    pub queued: usize,
}

impl LockSnapshot {
    /// True when nobody holds or waits for the lock
    pub fn is_idle(&self) -> bool {
        self.active_readers == 0 && !self.writer_active && self.queued == 0
    }
}

/// Async reader/writer lock with FIFO fairness.
///
/// Cloning yields another handle to the same lock.
#[derive(Debug, Clone, Default)]
pub struct RepoRwLock {
    state: Arc<Mutex<LockState>>,
}

impl RepoRwLock {
    /// Create an unlocked lock
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, LockState> {
        // State is only mutated by short non-panicking sections.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Acquire shared access, waiting behind any active or queued writer
    pub async fn read(&self) -> RepoReadGuard {
        self.acquire(AccessKind::Read).await;
        RepoReadGuard { lock: self.clone() }
    }

    /// Acquire exclusive access, waiting for active readers and writers
    pub async fn write(&self) -> RepoWriteGuard {
        self.acquire(AccessKind::Write).await;
        RepoWriteGuard { lock: self.clone() }
    }

    /// Try to acquire shared access without waiting
    pub fn try_read(&self) -> Option<RepoReadGuard> {
        let mut state = self.state();
        if state.can_admit_now(AccessKind::Read) {
            state.admit(AccessKind::Read);
            Some(RepoReadGuard { lock: self.clone() })
        } else {
            None
        }
    }

    /// Try to acquire exclusive access without waiting
    pub fn try_write(&self) -> Option<RepoWriteGuard> {
        let mut state = self.state();
        if state.can_admit_now(AccessKind::Write) {
            state.admit(AccessKind::Write);
            Some(RepoWriteGuard { lock: self.clone() })
        } else {
            None
        }
    }

    /// Current counters
    pub fn snapshot(&self) -> LockSnapshot {
        let state = self.state();
        LockSnapshot {
            active_readers: state.readers,
            writer_active: state.writer,
            queued: state.queue.len(),
        }
    }

    /// True when nobody holds or waits for the lock
    pub fn is_idle(&self) -> bool {
        self.snapshot().is_idle()
    }

    /// Number of live handles to this lock, guards included
    pub fn handle_count(&self) -> usize {
        Arc::strong_count(&self.state)
    }

    async fn acquire(&self, kind: AccessKind) {
        let (id, wake) = {
            let mut state = self.state();
            if state.can_admit_now(kind) {
                state.admit(kind);
                return;
            }
            let id = state.next_id;
            state.next_id = state.next_id.wrapping_add(1);
            let (tx, rx) = oneshot::channel();
            state.queue.push_back(Waiter { id, kind, wake: tx });
            log::debug!(
                "rw lock: queued {:?} waiter {} (readers={}, writer={}, queued={})",
                kind,
                id,
                state.readers,
                state.writer,
                state.queue.len()
            );
            (id, rx)
        };

        let mut pending = PendingAcquire {
            lock: self,
            id,
            kind,
            armed: true,
        };
        // The sender lives in the queue until we are granted, and a dropped
        // future is handled by `PendingAcquire::drop`.
        let _ = wake.await;
        pending.armed = false;
    }

    fn release(&self, kind: AccessKind) {
        self.state().release(kind);
    }
}

/// Cleans up after an acquisition future dropped while queued.
struct PendingAcquire<'a> {
    lock: &'a RepoRwLock,
    id: u64,
    kind: AccessKind,
    armed: bool,
}

impl Drop for PendingAcquire<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut state = self.lock.state();
        if let Some(pos) = state.queue.iter().position(|w| w.id == self.id) {
            state.queue.remove(pos);
            log::debug!("rw lock: {:?} waiter {} cancelled while queued", self.kind, self.id);
            // A cancelled writer at the head may have been blocking readers.
            state.dispatch();
        } else {
            // Granted after the future stopped polling: hand it back.
            state.release(self.kind);
        }
    }
}

/// Shared access to a repository; released on drop
#[derive(Debug)]
pub struct RepoReadGuard {
    lock: RepoRwLock,
}

impl Drop for RepoReadGuard {
    fn drop(&mut self) {
        self.lock.release(AccessKind::Read);
    }
}

/// Exclusive access to a repository; released on drop
#[derive(Debug)]
pub struct RepoWriteGuard {
    lock: RepoRwLock,
}

impl Drop for RepoWriteGuard {
    fn drop(&mut self) {
        self.lock.release(AccessKind::Write);
    }
}
