use crate::backend::RawResource;

/// A sub-range of a page buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(C)]
pub struct BufferSlice {
    /// The page buffer holding the range.
    pub resource: RawResource,
    /// GPU virtual address of the first byte of the range.
    pub gpu_address: u64,
    /// Byte offset of the range inside the page.
    pub offset: u64,
    pub size: u64,
}

impl BufferSlice {
    pub fn end(&self) -> u64 {
        self.offset + self.size
    }
}
