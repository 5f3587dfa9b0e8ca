//! Resource states tracked for barriers.
//!
//! Read states combine: a texture can be `DEPTH_READ | PIXEL_SHADER_RESOURCE`
//! at the same time. A transition to `after` is redundant when `after` is a
//! subset of the tracked state.

use bitflags::bitflags;

bitflags! {
    /// Access state of a GPU resource.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ResourceState: u32 {
        const COMMON = 1 << 0;
        const VERTEX_AND_CONSTANT_BUFFER = 1 << 1;
        const INDEX_BUFFER = 1 << 2;
        const RENDER_TARGET = 1 << 3;
        const UNORDERED_ACCESS = 1 << 4;
        const DEPTH_WRITE = 1 << 5;
        const DEPTH_READ = 1 << 6;
        const NON_PIXEL_SHADER_RESOURCE = 1 << 7;
        const PIXEL_SHADER_RESOURCE = 1 << 8;
        const INDIRECT_ARGUMENT = 1 << 9;
        const COPY_DEST = 1 << 10;
        const COPY_SOURCE = 1 << 11;
        const PRESENT = 1 << 12;
        const GENERIC_READ = 1 << 13;

        /// Readable from any shader stage.
        const SHADER_RESOURCE = Self::NON_PIXEL_SHADER_RESOURCE.bits()
            | Self::PIXEL_SHADER_RESOURCE.bits();
    }
}

impl ResourceState {
    const WRITE_STATES: Self = Self::RENDER_TARGET
        .union(Self::UNORDERED_ACCESS)
        .union(Self::DEPTH_WRITE)
        .union(Self::COPY_DEST);

    /// Returns true if the state allows GPU writes.
    pub fn is_write(self) -> bool {
        self.intersects(Self::WRITE_STATES)
    }

    /// Returns true if `self` already covers `after`.
    pub fn covers(self, after: ResourceState) -> bool {
        self.contains(after)
    }

    /// Whether the compute queue may transition into or out of this state.
    pub fn is_compute_legal(self) -> bool {
        !self.intersects(
            Self::RENDER_TARGET
                | Self::DEPTH_WRITE
                | Self::DEPTH_READ
                | Self::PIXEL_SHADER_RESOURCE
                | Self::PRESENT
                | Self::INDEX_BUFFER,
        )
    }
}

impl Default for ResourceState {
    fn default() -> Self {
        Self::COMMON
    }
}
