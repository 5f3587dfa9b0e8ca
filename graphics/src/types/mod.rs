//! Common types and descriptors for graphics resources.
//!
//! This module contains format enums, usage flags, resource states and
//! descriptor structs used throughout the graphics system.

mod buffer;
mod common;
mod resource;
mod state;
mod texture;

pub use buffer::{BufferDesc, BufferFlags, BufferUsage};
pub use common::{ClearValue, DescriptorHeapType, HeapKind, QueueType, ScissorRect, Viewport};
pub use resource::{ResourceCreateInfo, ResourceDesc};
pub use state::ResourceState;
pub use texture::{TextureDesc, TextureDimension, TextureFlags, TextureFormat};
