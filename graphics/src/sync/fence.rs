//! CPU-side view of a GPU fence.

use std::sync::atomic::{AtomicU64, Ordering};

use kiln_core::FenceValue;

use crate::backend::{Backend, BackendError, RawFence};
use crate::types::QueueType;

/// Status of a fence value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FenceStatus {
    /// The GPU has not reached the value yet.
    Pending,
    /// Every command submitted before the value has finished.
    Completed,
}

/// A monotone GPU fence with a cached completed value.
///
/// `next_value` is the value the next signal will use; it is always greater
/// than any completed value. The completed value is cached so that repeated
/// checks within a frame do not reach the backend.
#[derive(Debug)]
pub struct Fence {
    raw: RawFence,
    next_value: FenceValue,
    completed: AtomicU64,
}

impl Fence {
    /// Create a fence whose first signal will be `1`.
    pub fn new(backend: &dyn Backend) -> Result<Self, BackendError> {
        let raw = backend.create_fence(0)?;
        Ok(Self {
            raw,
            next_value: 1,
            completed: AtomicU64::new(0),
        })
    }

    pub fn raw(&self) -> RawFence {
        self.raw
    }

    /// Value the next signal will use.
    pub fn next_value(&self) -> FenceValue {
        self.next_value
    }

    /// Last value handed to a signal, zero if none.
    pub fn last_signaled(&self) -> FenceValue {
        self.next_value - 1
    }

    /// Cached completed value.
    pub fn completed(&self) -> FenceValue {
        self.completed.load(Ordering::Acquire)
    }

    /// Refresh the cached completed value from the backend.
    pub fn poll(&self, backend: &dyn Backend) -> Result<FenceValue, BackendError> {
        let value = backend.fence_completed_value(self.raw)?;
        Ok(self.observe(value))
    }

    /// Check `value` against the cache, polling only when the cache is behind.
    pub fn status(&self, backend: &dyn Backend, value: FenceValue) -> Result<FenceStatus, BackendError> {
        if value <= self.completed() || value <= self.poll(backend)? {
            Ok(FenceStatus::Completed)
        } else {
            Ok(FenceStatus::Pending)
        }
    }

    /// Signal the next value on `queue` and return it.
    pub fn signal(&mut self, backend: &dyn Backend, queue: QueueType) -> Result<FenceValue, BackendError> {
        let value = self.next_value;
        backend.queue_signal(queue, self.raw, value)?;
        self.next_value += 1;
        Ok(value)
    }

    /// Block until the GPU reaches `value`.
    pub fn wait(&self, backend: &dyn Backend, value: FenceValue) -> Result<(), BackendError> {
        if value <= self.completed() {
            return Ok(());
        }
        backend.wait_fence(self.raw, value)?;
        self.observe(value);
        Ok(())
    }

    fn observe(&self, value: FenceValue) -> FenceValue {
        self.completed.fetch_max(value, Ordering::AcqRel).max(value)
    }
}
