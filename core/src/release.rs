//! Fence values and fence-ordered release queues.
//!
//! A fence value is a monotonically increasing 64-bit counter. The GPU
//! signals a value once every command submitted before it has finished, so
//! "value `v` completed" implies every smaller value completed too.
//!
//! [`ReleaseQueue`] holds objects that may still be referenced by in-flight
//! GPU work. Objects are pushed together with the fence value that guards
//! them and popped from the front once that value has completed.
//!
//! ```text
//!  push(3, a) push(3, b) push(4, c) push(6, d)
//!  ┌──────┬──────┬──────┬──────┐
//!  │ 3: a │ 3: b │ 4: c │ 6: d │   drain(4) -> a, b, c
//!  └──────┴──────┴──────┴──────┘
//! ```

use std::collections::VecDeque;

/// A GPU fence value.
pub type FenceValue = u64;

#[derive(Debug)]
struct ReleaseEntry<T> {
    fence: FenceValue,
    object: T,
}

/// A queue of objects waiting for a fence value to complete.
///
/// Entries must be pushed in non-decreasing fence order; the queue relies on
/// this to stop draining at the first entry that is still pending.
#[derive(Debug)]
pub struct ReleaseQueue<T> {
    entries: VecDeque<ReleaseEntry<T>>,
}

impl<T> Default for ReleaseQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> ReleaseQueue<T> {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self {
            entries: VecDeque::new(),
        }
    }

    /// Enqueue `object`, guarded by `fence`.
    ///
    /// # Panics
    ///
    /// Panics if `fence` is smaller than the fence of the last queued entry.
    pub fn push(&mut self, fence: FenceValue, object: T) {
        if let Some(back) = self.entries.back()
            && fence < back.fence
        {
            crate::contract_violation!(
                "release queue fence went backwards ({} after {})",
                fence,
                back.fence
            );
        }
        self.entries.push_back(ReleaseEntry { fence, object });
    }

    /// Pop every entry whose fence is `<= completed`, front to back.
    ///
    /// The returned iterator stops at the first pending entry. Entries not
    /// consumed by the caller remain in the queue.
    pub fn drain(&mut self, completed: FenceValue) -> ReleaseDrain<'_, T> {
        ReleaseDrain {
            queue: self,
            completed,
        }
    }

    /// Pop every entry regardless of its fence.
    ///
    /// Only valid after the GPU has gone idle.
    pub fn drain_all(&mut self) -> impl Iterator<Item = (FenceValue, T)> + '_ {
        self.entries.drain(..).map(|e| (e.fence, e.object))
    }

    /// Fence of the oldest pending entry.
    pub fn front_fence(&self) -> Option<FenceValue> {
        self.entries.front().map(|e| e.fence)
    }

    /// Fence of the newest pending entry.
    pub fn back_fence(&self) -> Option<FenceValue> {
        self.entries.back().map(|e| e.fence)
    }

    /// Number of pending entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate pending entries from oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = (FenceValue, &T)> {
        self.entries.iter().map(|e| (e.fence, &e.object))
    }
}

/// Iterator returned by [`ReleaseQueue::drain`].
#[derive(Debug)]
pub struct ReleaseDrain<'a, T> {
    queue: &'a mut ReleaseQueue<T>,
    completed: FenceValue,
}

impl<T> Iterator for ReleaseDrain<'_, T> {
    type Item = (FenceValue, T);

    fn next(&mut self) -> Option<Self::Item> {
        match self.queue.entries.front() {
            Some(front) if front.fence <= self.completed => self
                .queue
                .entries
                .pop_front()
                .map(|e| (e.fence, e.object)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drain_pops_only_completed() {
        let mut queue = ReleaseQueue::new();
        queue.push(1, "a");
        queue.push(2, "b");
        queue.push(2, "c");
        queue.push(5, "d");

        let popped: Vec<_> = queue.drain(2).collect();
        assert_eq!(popped, vec![(1, "a"), (2, "b"), (2, "c")]);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.front_fence(), Some(5));
    }

    #[test]
    fn test_drain_never_returns_future_fence() {
        let mut queue = ReleaseQueue::new();
        for fence in [1u64, 1, 3, 4, 4, 7, 9] {
            queue.push(fence, fence);
        }
        for completed in 0..10 {
            for (fence, _) in queue.drain(completed) {
                assert!(fence <= completed);
            }
            if let Some(front) = queue.front_fence() {
                assert!(front > completed);
            }
        }
        assert!(queue.is_empty());
    }

    #[test]
    fn test_partial_drain_keeps_remaining() {
        let mut queue = ReleaseQueue::new();
        queue.push(1, 10);
        queue.push(1, 20);

        let first = queue.drain(1).next();
        assert_eq!(first, Some((1, 10)));
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_drain_all() {
        let mut queue = ReleaseQueue::new();
        queue.push(100, 'x');
        queue.push(200, 'y');
        assert_eq!(queue.drain(0).count(), 0);
        assert_eq!(queue.drain_all().count(), 2);
        assert!(queue.is_empty());
    }

    #[test]
    #[should_panic(expected = "fence went backwards")]
    fn test_push_out_of_order_panics() {
        let mut queue = ReleaseQueue::new();
        queue.push(4, ());
        queue.push(3, ());
    }
}
