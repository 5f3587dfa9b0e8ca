//! Buffer types and descriptors.

use bitflags::bitflags;

bitflags! {
    /// How a buffer is bound.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct BufferUsage: u32 {
        /// Buffer can be used as a vertex buffer.
        const VERTEX = 1 << 0;
        /// Buffer can be used as an index buffer.
        const INDEX = 1 << 1;
        /// Buffer can be bound as a constant buffer.
        const CONSTANT = 1 << 2;
        /// Buffer can be read through a shader-resource view.
        const SHADER_RESOURCE = 1 << 3;
        /// Buffer can be written through an unordered-access view.
        const UNORDERED_ACCESS = 1 << 4;
        /// Buffer holds indirect arguments.
        const INDIRECT = 1 << 5;
        /// Buffer can be copied from.
        const COPY_SRC = 1 << 6;
        /// Buffer can be copied to.
        const COPY_DST = 1 << 7;
    }
}

bitflags! {
    /// Creation flags for buffers.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct BufferFlags: u32 {
        /// Views are created as raw (byte-address) buffers.
        const RAW = 1 << 0;
        /// Views are created as structured buffers using the stride.
        const STRUCTURED = 1 << 1;
        /// The buffer carries a hidden UAV counter.
        const COUNTER = 1 << 2;
    }
}

/// Descriptor for creating a buffer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct BufferDesc {
    /// Debug label for the buffer.
    pub label: Option<String>,
    /// Element stride in bytes.
    pub stride: u32,
    /// Number of elements.
    pub count: u32,
    pub usages: BufferUsage,
    pub flags: BufferFlags,
}

impl BufferDesc {
    /// Create a new buffer descriptor of `count` elements of `stride` bytes.
    pub fn new(stride: u32, count: u32, usages: BufferUsage) -> Self {
        Self {
            label: None,
            stride,
            count,
            usages,
            flags: BufferFlags::empty(),
        }
    }

    /// Create a byte buffer of `size` bytes.
    pub fn bytes(size: u32, usages: BufferUsage) -> Self {
        Self::new(1, size, usages)
    }

    /// Set the debug label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Set the creation flags.
    pub fn with_flags(mut self, flags: BufferFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Size in bytes.
    pub fn size(&self) -> u64 {
        self.stride as u64 * self.count as u64
    }

    /// Whether a buffer created from `self` can stand in for `request`.
    pub fn is_compatible_with(&self, request: &BufferDesc) -> bool {
        self.usages == request.usages
            && self.flags == request.flags
            && self.stride == request.stride
            && self.count >= request.count
    }
}
