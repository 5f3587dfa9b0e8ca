//! GPU resources.
//!
//! - [`Resource`] - uniquely owned buffer or texture with tracked state
//! - [`ResourceFactory`] - creates resources and descriptor heaps
//! - [`ResourcePool`] - reuse cache for transient render textures

mod factory;
pub mod pool;
mod resource;

pub use factory::ResourceFactory;
pub use pool::{PoolStats, PooledResource, ResourcePool};
pub use resource::Resource;
