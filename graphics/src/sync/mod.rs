//! GPU synchronization: fences, queues and deferred release.
//!
//! - [`Fence`] - monotone fence with a cached completed value
//! - [`CommandQueue`] - one GPU queue and its fence
//! - [`SyncPoint`] - a queue/value pair returned by submissions
//! - [`DeferredReleaser`] - destroys GPU objects once their fence completes

mod deferred;
mod fence;
mod queue;

pub use deferred::{DeferredReleaser, GpuObject, ReleaseSink};
pub use fence::{Fence, FenceStatus};
pub use queue::{CommandQueue, SyncPoint};
