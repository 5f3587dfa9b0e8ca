//! Creation of owned GPU objects.

use std::sync::Arc;

use crate::backend::Backend;
use crate::descriptors::DescriptorHeap;
use crate::error::GraphicsError;
use crate::sync::ReleaseSink;
use crate::types::{
    BufferDesc, DescriptorHeapType, HeapKind, ResourceCreateInfo, ResourceState, TextureDesc,
};

use super::Resource;

/// Creates resources and descriptor heaps wired to one release sink.
///
/// Cheap to clone; sub-allocators keep their own copy.
#[derive(Debug, Clone)]
pub struct ResourceFactory {
    backend: Arc<dyn Backend>,
    sink: ReleaseSink,
}

impl ResourceFactory {
    pub fn new(backend: Arc<dyn Backend>, sink: ReleaseSink) -> Self {
        Self { backend, sink }
    }

    pub fn backend(&self) -> &dyn Backend {
        self.backend.as_ref()
    }

    pub fn backend_arc(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    pub fn sink(&self) -> &ReleaseSink {
        &self.sink
    }

    pub fn create_resource(&self, info: &ResourceCreateInfo) -> Result<Resource, GraphicsError> {
        let raw = self.backend.create_resource(info)?;
        let gpu_address = self.backend.gpu_address(raw);
        Ok(Resource::new(
            raw,
            info.desc.clone(),
            info.heap,
            gpu_address,
            info.initial_state,
            self.sink.clone(),
        ))
    }

    /// Create a texture in GPU-local memory, starting in `COMMON`.
    pub fn create_texture(&self, desc: &TextureDesc) -> Result<Resource, GraphicsError> {
        self.create_resource(&ResourceCreateInfo::new(
            desc.clone(),
            HeapKind::Default,
            ResourceState::COMMON,
        ))
    }

    /// Create a buffer; upload buffers start (and stay) in `GENERIC_READ`.
    pub fn create_buffer(&self, desc: &BufferDesc, heap: HeapKind) -> Result<Resource, GraphicsError> {
        let initial_state = match heap {
            HeapKind::Upload => ResourceState::GENERIC_READ,
            HeapKind::Readback => ResourceState::COPY_DEST,
            HeapKind::Default => ResourceState::COMMON,
        };
        self.create_resource(&ResourceCreateInfo::new(desc.clone(), heap, initial_state))
    }

    pub fn create_descriptor_heap(
        &self,
        heap_type: DescriptorHeapType,
        capacity: u32,
        shader_visible: bool,
    ) -> Result<DescriptorHeap, GraphicsError> {
        let info = self
            .backend
            .create_descriptor_heap(heap_type, capacity, shader_visible)?;
        Ok(DescriptorHeap::new(
            info,
            heap_type,
            capacity,
            shader_visible,
            self.sink.clone(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::DummyBackend;
    use crate::types::{BufferUsage, TextureFlags, TextureFormat};

    #[test]
    fn test_create_and_drop() {
        let backend = Arc::new(DummyBackend::new());
        let factory = ResourceFactory::new(backend.clone(), ReleaseSink::new());

        let buffer = factory
            .create_buffer(&BufferDesc::bytes(4096, BufferUsage::CONSTANT), HeapKind::Upload)
            .unwrap();
        assert_ne!(buffer.gpu_address(), 0);
        assert_eq!(buffer.state(), ResourceState::GENERIC_READ);

        let texture = factory
            .create_texture(&TextureDesc::new_2d(
                64,
                64,
                TextureFormat::Rgba8Unorm,
                TextureFlags::RENDER_TARGET,
            ))
            .unwrap();
        assert_eq!(texture.gpu_address(), 0);

        drop(buffer);
        drop(texture);
        assert_eq!(factory.sink().len(), 2);
        assert_eq!(backend.live_resource_count(), 2);
    }

    #[test]
    fn test_creation_failure_propagates() {
        let factory = ResourceFactory::new(Arc::new(DummyBackend::new()), ReleaseSink::new());
        let err = factory
            .create_buffer(&BufferDesc::bytes(0, BufferUsage::CONSTANT), HeapKind::Upload)
            .unwrap_err();
        assert!(matches!(err, GraphicsError::Backend(_)));
    }
}
