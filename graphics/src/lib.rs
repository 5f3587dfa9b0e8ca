//! # Kiln Graphics
//!
//! GPU resource and command orchestration for a D3D12-style renderer.
//!
//! ## Overview
//!
//! This crate provides:
//! - [`Device`] - owner of queues, allocators and caches, with the frame loop
//! - [`RenderGraph`] - declarative passes compiled to ordered, barriered work
//! - [`Backend`] - trait for the native API, with [`DummyBackend`] for tests
//! - [`descriptors`] - offline descriptor pages and shader-visible heaps
//! - [`memory`] - per-frame and persistent buffer sub-allocation
//! - [`command`] - recorded command lists and contexts
//!
//! GPU objects are uniquely owned. Dropping one never destroys it directly:
//! the raw handle is retired against the frame fence and destroyed once the
//! GPU has passed it.
//!
//! ## Example
//!
//! ```
//! use kiln_graphics::{Device, DeviceConfig, QueueType};
//!
//! let mut device = Device::dummy(DeviceConfig::default()).unwrap();
//! device.begin_frame();
//! let mut ctx = device.request_context(QueueType::Compute).unwrap();
//! ctx.dispatch(8, 8, 1);
//! let done = device.submit(ctx).unwrap();
//! device.end_frame();
//! device.wait_for_sync_point(done).unwrap();
//! ```

pub mod backend;
pub mod command;
pub mod descriptors;
pub mod device;
pub mod error;
#[cfg(feature = "ffi")]
pub mod ffi;
pub mod graph;
pub mod memory;
pub mod pipeline;
pub mod resources;
pub mod sync;
pub mod types;

// Re-export main types for convenience
pub use backend::{Backend, BackendError};
#[cfg(feature = "dummy")]
pub use backend::DummyBackend;
pub use command::{Command, CommandContext, CommandList};
pub use device::{Device, DeviceConfig, DeviceStats};
pub use error::GraphicsError;
pub use graph::{ExecutionReport, GraphError, PassContext, PassDesc, PassError, PassKind, RenderGraph};
pub use resources::Resource;
pub use sync::SyncPoint;
pub use types::{
    BufferDesc, BufferUsage, DescriptorHeapType, HeapKind, QueueType, ResourceState, TextureDesc, TextureFlags,
    TextureFormat,
};

/// Graphics library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
