//! Uniquely owned GPU resource.

use std::sync::atomic::{AtomicU32, Ordering};

use crate::backend::RawResource;
use crate::sync::{GpuObject, ReleaseSink};
use crate::types::{HeapKind, ResourceDesc, ResourceState};

/// A GPU buffer or texture.
///
/// A `Resource` is owned by exactly one place at a time (a pool, a buffer
/// page list, a render-graph entry, the application). Dropping it does not
/// destroy the GPU object: the raw handle goes to the device's release sink
/// and is destroyed once the frame that last could have used it completes.
///
/// The tracked [`ResourceState`] is the state after the most recently
/// *recorded* transition, which may be ahead of the GPU.
pub struct Resource {
    raw: RawResource,
    desc: ResourceDesc,
    heap: HeapKind,
    gpu_address: u64,
    state: AtomicU32,
    sink: ReleaseSink,
}

impl Resource {
    pub(crate) fn new(
        raw: RawResource,
        desc: ResourceDesc,
        heap: HeapKind,
        gpu_address: u64,
        initial_state: ResourceState,
        sink: ReleaseSink,
    ) -> Self {
        Self {
            raw,
            desc,
            heap,
            gpu_address,
            state: AtomicU32::new(initial_state.bits()),
            sink,
        }
    }

    pub fn raw(&self) -> RawResource {
        self.raw
    }

    pub fn desc(&self) -> &ResourceDesc {
        &self.desc
    }

    pub fn heap(&self) -> HeapKind {
        self.heap
    }

    /// GPU virtual address for buffers, zero for textures.
    pub fn gpu_address(&self) -> u64 {
        self.gpu_address
    }

    pub fn label(&self) -> Option<&str> {
        self.desc.label()
    }

    /// State after the last recorded transition.
    pub fn state(&self) -> ResourceState {
        ResourceState::from_bits_retain(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn set_state(&self, state: ResourceState) {
        self.state.store(state.bits(), Ordering::Release);
    }
}

impl Drop for Resource {
    fn drop(&mut self) {
        self.sink.push(GpuObject::Resource(self.raw));
    }
}

impl std::fmt::Debug for Resource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resource")
            .field("raw", &self.raw)
            .field("label", &self.desc.label())
            .field("heap", &self.heap)
            .field("state", &self.state())
            .finish()
    }
}

// Resources are dropped from worker threads and read by pass callbacks.
static_assertions::assert_impl_all!(Resource: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BufferDesc, BufferUsage};

    fn resource(sink: &ReleaseSink) -> Resource {
        Resource::new(
            RawResource(42),
            BufferDesc::bytes(1024, BufferUsage::VERTEX).with_label("vb").into(),
            HeapKind::Default,
            0x1000,
            ResourceState::COMMON,
            sink.clone(),
        )
    }

    #[test]
    fn test_drop_goes_to_sink() {
        let sink = ReleaseSink::new();
        let res = resource(&sink);
        assert!(sink.is_empty());
        drop(res);
        assert_eq!(sink.take(), vec![GpuObject::Resource(RawResource(42))]);
    }

    #[test]
    fn test_state_tracking_and_debug() {
        let sink = ReleaseSink::new();
        let res = resource(&sink);
        res.set_state(ResourceState::VERTEX_AND_CONSTANT_BUFFER);
        assert_eq!(res.state(), ResourceState::VERTEX_AND_CONSTANT_BUFFER);
        let debug = format!("{res:?}");
        assert!(debug.contains("vb"));
        assert_eq!(res.label(), Some("vb"));
    }
}
