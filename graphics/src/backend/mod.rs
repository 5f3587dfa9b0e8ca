//! GPU backend abstraction layer.
//!
//! Everything above this module talks to the GPU through the [`Backend`]
//! trait: resource and descriptor-heap creation, descriptor writes and
//! copies, fences, queue submission and pipeline-state creation. Objects are
//! identified by plain integer handles; ownership and deferred destruction
//! live one level up, in [`crate::sync::DeferredReleaser`].
//!
//! # Available Backends
//!
//! - `dummy` (default): in-process simulation of a D3D12 device, used by the
//!   tests, benchmarks and the C ABI
//!
//! A native D3D12 backend implements the same trait outside this crate.

#[cfg(feature = "dummy")]
pub mod dummy;
mod error;

use std::fmt;

pub use error::BackendError;

#[cfg(feature = "dummy")]
pub use dummy::DummyBackend;

use crate::command::CommandList;
use crate::pipeline::PipelineStateDesc;
use crate::types::{DescriptorHeapType, QueueType, ResourceCreateInfo};

macro_rules! raw_handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        #[repr(transparent)]
        pub struct $name(pub u64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}#{}", stringify!($name), self.0)
            }
        }
    };
}

raw_handle!(
    /// Backend handle of a buffer or texture.
    RawResource
);
raw_handle!(
    /// Backend handle of a descriptor heap.
    RawDescriptorHeap
);
raw_handle!(
    /// Backend handle of a fence.
    RawFence
);
raw_handle!(
    /// Backend handle of a compiled pipeline state object.
    RawPipeline
);

/// Addresses of a freshly created descriptor heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorHeapInfo {
    pub raw: RawDescriptorHeap,
    /// CPU address of slot 0.
    pub cpu_base: u64,
    /// GPU address of slot 0, for shader-visible heaps.
    pub gpu_base: Option<u64>,
    /// Distance in bytes between two slots.
    pub increment_size: u32,
}

/// Filtering used by a sampler descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FilterMode {
    #[default]
    Point,
    Linear,
    Anisotropic,
}

/// Texture addressing used by a sampler descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AddressMode {
    Wrap,
    Mirror,
    #[default]
    Clamp,
    Border,
}

/// Sampler parameters written into a sampler descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SamplerDesc {
    pub filter: FilterMode,
    pub address: AddressMode,
    pub max_anisotropy: u8,
    /// Comparison sampler for shadow maps.
    pub comparison: bool,
}

impl Default for SamplerDesc {
    fn default() -> Self {
        Self {
            filter: FilterMode::Point,
            address: AddressMode::Clamp,
            max_anisotropy: 1,
            comparison: false,
        }
    }
}

impl SamplerDesc {
    pub fn linear() -> Self {
        Self {
            filter: FilterMode::Linear,
            ..Self::default()
        }
    }

    pub fn with_address(mut self, address: AddressMode) -> Self {
        self.address = address;
        self
    }
}

/// What a descriptor slot points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DescriptorSource {
    /// Constant-buffer view over a buffer range.
    ConstantBuffer { gpu_address: u64, size: u32 },
    ShaderResource(RawResource),
    UnorderedAccess(RawResource),
    RenderTarget(RawResource),
    DepthStencil { resource: RawResource, read_only: bool },
    Sampler(SamplerDesc),
    /// A null descriptor of the heap's type.
    Null,
}

/// A GPU API implementation.
///
/// Implementations are shared between threads behind an `Arc`; every
/// method takes `&self`.
pub trait Backend: Send + Sync + fmt::Debug {
    /// Human readable backend name.
    fn name(&self) -> &'static str;

    // Resources
    fn create_resource(&self, info: &ResourceCreateInfo) -> Result<RawResource, BackendError>;
    fn destroy_resource(&self, resource: RawResource);
    /// GPU virtual address of a buffer; zero for textures.
    fn gpu_address(&self, resource: RawResource) -> u64;
    /// Copy `data` into a CPU-visible buffer at `offset`.
    fn write_buffer(&self, resource: RawResource, offset: u64, data: &[u8]) -> Result<(), BackendError>;

    // Descriptors
    fn create_descriptor_heap(
        &self,
        heap_type: DescriptorHeapType,
        capacity: u32,
        shader_visible: bool,
    ) -> Result<DescriptorHeapInfo, BackendError>;
    fn destroy_descriptor_heap(&self, heap: RawDescriptorHeap);
    fn write_descriptor(&self, heap: RawDescriptorHeap, index: u32, source: &DescriptorSource);
    /// Copy `sources` into consecutive slots of `dst` starting at `dst_index`.
    fn copy_descriptors(
        &self,
        dst: RawDescriptorHeap,
        dst_index: u32,
        sources: &[(RawDescriptorHeap, u32)],
    );

    // Synchronization
    fn create_fence(&self, initial_value: u64) -> Result<RawFence, BackendError>;
    fn destroy_fence(&self, fence: RawFence);
    /// Last value the GPU signaled on `fence`.
    fn fence_completed_value(&self, fence: RawFence) -> Result<u64, BackendError>;
    /// Block the calling thread until `fence` reaches `value`.
    fn wait_fence(&self, fence: RawFence, value: u64) -> Result<(), BackendError>;
    fn queue_signal(&self, queue: QueueType, fence: RawFence, value: u64) -> Result<(), BackendError>;
    /// Make `queue` wait on the GPU until `fence` reaches `value`.
    fn queue_wait(&self, queue: QueueType, fence: RawFence, value: u64) -> Result<(), BackendError>;
    fn execute(&self, queue: QueueType, list: &CommandList) -> Result<(), BackendError>;

    // Pipelines
    fn create_pipeline_state(&self, desc: &PipelineStateDesc) -> Result<RawPipeline, BackendError>;
    fn destroy_pipeline_state(&self, pipeline: RawPipeline);

    /// Diagnostic text gathered after a device removal, if any.
    fn crash_report(&self) -> Option<String> {
        None
    }
}
