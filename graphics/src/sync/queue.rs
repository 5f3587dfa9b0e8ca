//! Command queues and sync points.

use kiln_core::FenceValue;

use super::fence::{Fence, FenceStatus};
use crate::backend::{Backend, BackendError, RawFence};
use crate::command::CommandList;
use crate::types::QueueType;

/// A point on a queue's timeline.
///
/// Returned by every submission; completion means all work submitted to
/// `queue` up to and including that submission has finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(C)]
pub struct SyncPoint {
    pub queue: QueueType,
    pub value: FenceValue,
}

impl SyncPoint {
    pub fn new(queue: QueueType, value: FenceValue) -> Self {
        Self { queue, value }
    }
}

/// One GPU queue with its own fence.
#[derive(Debug)]
pub struct CommandQueue {
    queue_type: QueueType,
    fence: Fence,
    submissions: u64,
}

impl CommandQueue {
    pub fn new(backend: &dyn Backend, queue_type: QueueType) -> Result<Self, BackendError> {
        Ok(Self {
            queue_type,
            fence: Fence::new(backend)?,
            submissions: 0,
        })
    }

    pub fn queue_type(&self) -> QueueType {
        self.queue_type
    }

    pub fn fence(&self) -> &Fence {
        &self.fence
    }

    pub fn raw_fence(&self) -> RawFence {
        self.fence.raw()
    }

    /// Last value signaled on this queue.
    pub fn last_submitted(&self) -> FenceValue {
        self.fence.last_signaled()
    }

    pub fn submissions(&self) -> u64 {
        self.submissions
    }

    /// Execute `list` after the given cross-queue waits, then signal.
    pub fn submit(
        &mut self,
        backend: &dyn Backend,
        list: &CommandList,
        waits: &[(RawFence, FenceValue)],
    ) -> Result<FenceValue, BackendError> {
        for &(fence, value) in waits {
            backend.queue_wait(self.queue_type, fence, value)?;
        }
        backend.execute(self.queue_type, list)?;
        self.submissions += 1;
        self.signal_and_get_next(backend)
    }

    /// Signal the queue fence without submitting work.
    pub fn signal_and_get_next(&mut self, backend: &dyn Backend) -> Result<FenceValue, BackendError> {
        self.fence.signal(backend, self.queue_type)
    }

    /// Make this queue wait on the GPU for another fence.
    pub fn wait_on_gpu(&self, backend: &dyn Backend, fence: RawFence, value: FenceValue) -> Result<(), BackendError> {
        if value == 0 {
            return Ok(());
        }
        backend.queue_wait(self.queue_type, fence, value)
    }

    /// Refresh and return the completed value.
    pub fn poll_completed(&self, backend: &dyn Backend) -> Result<FenceValue, BackendError> {
        self.fence.poll(backend)
    }

    pub fn is_complete(&self, backend: &dyn Backend, value: FenceValue) -> Result<bool, BackendError> {
        Ok(self.fence.status(backend, value)? == FenceStatus::Completed)
    }

    /// Block until `value` completes.
    pub fn wait_for(&self, backend: &dyn Backend, value: FenceValue) -> Result<(), BackendError> {
        self.fence.wait(backend, value)
    }

    /// Block until everything submitted so far completes.
    pub fn wait_idle(&self, backend: &dyn Backend) -> Result<(), BackendError> {
        self.fence.wait(backend, self.last_submitted())
    }
}
