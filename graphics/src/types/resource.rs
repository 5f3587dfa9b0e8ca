//! Resource descriptors covering buffers and textures.

use super::{BufferDesc, HeapKind, ResourceState, TextureDesc};

/// Descriptor for any GPU resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ResourceDesc {
    Buffer(BufferDesc),
    Texture(TextureDesc),
}

impl ResourceDesc {
    pub fn label(&self) -> Option<&str> {
        match self {
            Self::Buffer(desc) => desc.label.as_deref(),
            Self::Texture(desc) => desc.label.as_deref(),
        }
    }

    pub fn as_texture(&self) -> Option<&TextureDesc> {
        match self {
            Self::Texture(desc) => Some(desc),
            Self::Buffer(_) => None,
        }
    }

    pub fn as_buffer(&self) -> Option<&BufferDesc> {
        match self {
            Self::Buffer(desc) => Some(desc),
            Self::Texture(_) => None,
        }
    }

    pub fn is_texture(&self) -> bool {
        matches!(self, Self::Texture(_))
    }

    /// Pool reuse rule: exact kind, format and flags, extents at least as large.
    pub fn is_compatible_with(&self, request: &ResourceDesc) -> bool {
        match (self, request) {
            (Self::Buffer(have), Self::Buffer(want)) => have.is_compatible_with(want),
            (Self::Texture(have), Self::Texture(want)) => have.is_compatible_with(want),
            _ => false,
        }
    }

    /// Approximate memory footprint in bytes.
    pub fn byte_size(&self) -> u64 {
        match self {
            Self::Buffer(desc) => desc.size(),
            Self::Texture(desc) => desc.byte_size(),
        }
    }
}

impl From<BufferDesc> for ResourceDesc {
    fn from(desc: BufferDesc) -> Self {
        Self::Buffer(desc)
    }
}

impl From<TextureDesc> for ResourceDesc {
    fn from(desc: TextureDesc) -> Self {
        Self::Texture(desc)
    }
}

/// Everything a backend needs to create a resource.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceCreateInfo {
    pub desc: ResourceDesc,
    pub heap: HeapKind,
    pub initial_state: ResourceState,
}

impl ResourceCreateInfo {
    pub fn new(desc: impl Into<ResourceDesc>, heap: HeapKind, initial_state: ResourceState) -> Self {
        Self {
            desc: desc.into(),
            heap,
            initial_state,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BufferUsage, TextureFlags, TextureFormat};

    #[test]
    fn test_kind_mismatch_is_incompatible() {
        let texture: ResourceDesc =
            TextureDesc::new_2d(4, 4, TextureFormat::R8Unorm, TextureFlags::empty()).into();
        let buffer: ResourceDesc = BufferDesc::bytes(16, BufferUsage::COPY_DST).into();
        assert!(!texture.is_compatible_with(&buffer));
        assert!(!buffer.is_compatible_with(&texture));
        assert!(texture.is_compatible_with(&texture));
        assert_eq!(buffer.byte_size(), 16);
    }
}
