//! Descriptor heaps and handles.

use crate::backend::{DescriptorHeapInfo, RawDescriptorHeap};
use crate::sync::{GpuObject, ReleaseSink};
use crate::types::DescriptorHeapType;

/// CPU address of a descriptor slot.
///
/// `version` changes every time the slot is re-pointed at different
/// contents, so caches keyed on handles see rebinding as a new key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(C)]
pub struct CpuDescriptorHandle {
    pub heap: RawDescriptorHeap,
    pub index: u32,
    pub version: u32,
    pub ptr: u64,
}

/// GPU address of a descriptor slot in a shader-visible heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(C)]
pub struct GpuDescriptorHandle {
    pub heap: RawDescriptorHeap,
    pub index: u32,
    pub ptr: u64,
}

/// A descriptor heap owned by an allocator.
pub struct DescriptorHeap {
    info: DescriptorHeapInfo,
    heap_type: DescriptorHeapType,
    capacity: u32,
    shader_visible: bool,
    sink: ReleaseSink,
}

impl DescriptorHeap {
    pub(crate) fn new(
        info: DescriptorHeapInfo,
        heap_type: DescriptorHeapType,
        capacity: u32,
        shader_visible: bool,
        sink: ReleaseSink,
    ) -> Self {
        Self {
            info,
            heap_type,
            capacity,
            shader_visible,
            sink,
        }
    }

    pub fn raw(&self) -> RawDescriptorHeap {
        self.info.raw
    }

    pub fn heap_type(&self) -> DescriptorHeapType {
        self.heap_type
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn is_shader_visible(&self) -> bool {
        self.shader_visible
    }

    pub fn increment_size(&self) -> u32 {
        self.info.increment_size
    }

    /// CPU handle of slot `index`: `cpu_base + index * increment_size`.
    pub fn cpu_handle(&self, index: u32) -> CpuDescriptorHandle {
        if index >= self.capacity {
            kiln_core::contract_violation!(
                "descriptor index {} out of range for {:?} heap of {}",
                index,
                self.heap_type,
                self.capacity
            );
        }
        CpuDescriptorHandle {
            heap: self.info.raw,
            index,
            version: 0,
            ptr: self.info.cpu_base + index as u64 * self.info.increment_size as u64,
        }
    }

    /// GPU handle of slot `index`.
    ///
    /// # Panics
    ///
    /// Panics if the heap is not shader visible or `index` is out of range.
    pub fn gpu_handle(&self, index: u32) -> GpuDescriptorHandle {
        let Some(gpu_base) = self.info.gpu_base.filter(|_| index < self.capacity) else {
            kiln_core::contract_violation!(
                "no GPU handle for slot {} of {:?} heap {}",
                index,
                self.heap_type,
                self.info.raw
            );
        };
        GpuDescriptorHandle {
            heap: self.info.raw,
            index,
            ptr: gpu_base + index as u64 * self.info.increment_size as u64,
        }
    }
}

impl Drop for DescriptorHeap {
    fn drop(&mut self) {
        self.sink.push(GpuObject::DescriptorHeap(self.info.raw));
    }
}

impl std::fmt::Debug for DescriptorHeap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DescriptorHeap")
            .field("raw", &self.info.raw)
            .field("type", &self.heap_type)
            .field("capacity", &self.capacity)
            .field("shader_visible", &self.shader_visible)
            .finish()
    }
}
