//! FIFO job queue and result table behind one coarse lock.
//!
//! Producers on any thread append jobs; the single worker pops them in
//! submission order. The same lock guards the [`ResultTable`], so a caller
//! holding it sees a table the worker is not writing to.
//!
//! The lock is reentrant: a caller that took it through [`lock`] or
//! [`lock_raw`] may still call [`enqueue`] and the other accessors from the
//! same thread, which is how "push several jobs as one atomic region" works
//! across the C ABI.
//!
//! [`lock`]: CommandQueue::lock
//! [`lock_raw`]: CommandQueue::lock_raw
//! [`enqueue`]: CommandQueue::enqueue

use std::cell::RefCell;
use std::collections::VecDeque;

use parking_lot::{ReentrantMutex, ReentrantMutexGuard};

use super::job::Job;
use super::results::{ResultSlot, ResultTable};

#[derive(Default)]
struct QueueState {
    jobs: VecDeque<Job>,
    results: Option<ResultTable>,
    /// Holds taken through `lock_raw` and not yet released.
    raw_depth: usize,
    enqueued: u64,
}

/// Unbounded FIFO of [`Job`]s plus the registered [`ResultTable`].
pub struct CommandQueue {
    state: ReentrantMutex<RefCell<QueueState>>,
}

/// Scoped hold on the queue lock. The worker cannot pop or publish while it
/// is alive.
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct QueueLock<'a> {
    _guard: ReentrantMutexGuard<'a, RefCell<QueueState>>,
}

impl Default for CommandQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CommandQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandQueue")
            .field("pending", &self.len())
            .field("enqueued", &self.enqueued_total())
            .finish()
    }
}

impl CommandQueue {
    /// An empty queue with no result table.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: ReentrantMutex::new(RefCell::new(QueueState::default())),
        }
    }

    /// Append a job.
    pub fn enqueue(&self, job: Job) {
        let guard = self.state.lock();
        let mut state = guard.borrow_mut();
        state.jobs.push_back(job);
        state.enqueued += 1;
    }

    /// Remove the oldest job.
    pub fn pop(&self) -> Option<Job> {
        self.state.lock().borrow_mut().jobs.pop_front()
    }

    /// Jobs waiting to run.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().borrow().jobs.len()
    }

    /// Whether no job is waiting.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Jobs ever enqueued.
    #[must_use]
    pub fn enqueued_total(&self) -> u64 {
        self.state.lock().borrow().enqueued
    }

    /// Install the result table, returning the previous one.
    pub fn register_results(&self, table: ResultTable) -> Option<ResultTable> {
        log::info!(
            "Gears:: result table registered ({} slots)",
            table.capacity()
        );
        self.state.lock().borrow_mut().results.replace(table)
    }

    /// Remove the result table.
    pub fn unregister_results(&self) -> Option<ResultTable> {
        self.state.lock().borrow_mut().results.take()
    }

    /// Publish into the first empty slot. Returns the slot index, or `None`
    /// when no table is registered or every slot is occupied.
    pub fn publish(&self, result: ResultSlot) -> Option<usize> {
        let guard = self.state.lock();
        let mut state = guard.borrow_mut();
        let Some(table) = state.results.as_mut() else {
            log::warn!(
                "Gears:: no result table registered, dropping texture {} \
                 for id {}",
                result.texture_handle,
                result.id
            );
            return None;
        };
        let index = table.publish(result);
        if index.is_none() {
            log::warn!(
                "Gears:: result table full ({} slots), dropping texture {} \
                 for id {}",
                table.capacity(),
                result.texture_handle,
                result.id
            );
        }
        index
    }

    /// Run `f` against the result table under the lock. `f` must not call
    /// back into this queue.
    pub fn with_results<R>(
        &self,
        f: impl FnOnce(&mut ResultTable) -> R,
    ) -> Option<R> {
        let guard = self.state.lock();
        let mut state = guard.borrow_mut();
        state.results.as_mut().map(f)
    }

    /// Hold the lock until the returned guard drops.
    pub fn lock(&self) -> QueueLock<'_> {
        QueueLock {
            _guard: self.state.lock(),
        }
    }

    /// Take the lock without a guard; release with
    /// [`unlock_raw`](Self::unlock_raw) on the same thread.
    pub fn lock_raw(&self) {
        let guard = self.state.lock();
        guard.borrow_mut().raw_depth += 1;
        std::mem::forget(guard);
    }

    /// Release one hold taken by [`lock_raw`](Self::lock_raw) on this
    /// thread. Returns `false` (and leaves the lock alone) if this thread
    /// holds no raw lock.
    pub fn unlock_raw(&self) -> bool {
        if !self.state.is_owned_by_current_thread() {
            log::warn!("Gears:: unlock without a matching lock on this thread");
            return false;
        }
        {
            let guard = self.state.lock();
            let mut state = guard.borrow_mut();
            if state.raw_depth == 0 {
                log::warn!(
                    "Gears:: unlock without a matching lock on this thread"
                );
                return false;
            }
            state.raw_depth -= 1;
        }
        // SAFETY: this thread owns the lock and still has one forgotten
        // guard from `lock_raw` outstanding, counted by `raw_depth`.
        unsafe { self.state.force_unlock() };
        true
    }
}
