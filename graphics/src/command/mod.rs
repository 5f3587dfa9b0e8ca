//! Command recording.
//!
//! - [`CommandList`] - flat list of [`Command`] values for one queue
//! - [`CommandContext`] - recorder with barrier batching and state tracking
//! - [`ResourceBarrier`] - transition, UAV and aliasing barriers

mod barrier;
mod commands;
mod context;

pub use barrier::{BarrierSplit, ResourceBarrier};
pub use commands::{Command, CommandList, IndexBufferView, IndexFormat, VertexBufferView};
pub use context::CommandContext;
