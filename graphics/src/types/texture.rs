//! Texture types and descriptors.

use bitflags::bitflags;

/// Texture format enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[non_exhaustive]
pub enum TextureFormat {
    // 8-bit formats
    /// 8-bit red channel, unsigned normalized.
    R8Unorm,
    /// 8-bit red channel, unsigned integer.
    R8Uint,

    // 16-bit formats
    /// 16-bit red channel, float.
    R16Float,
    /// 8-bit RG channels, unsigned normalized.
    Rg8Unorm,

    // 32-bit formats
    /// 32-bit red channel, float.
    R32Float,
    /// 32-bit red channel, unsigned integer.
    R32Uint,
    /// 16-bit RG channels, float.
    Rg16Float,
    /// 8-bit RGBA channels, unsigned normalized.
    #[default]
    Rgba8Unorm,
    /// 8-bit RGBA channels, sRGB.
    Rgba8UnormSrgb,
    /// 8-bit BGRA channels, unsigned normalized.
    Bgra8Unorm,
    /// Packed 10-bit RGB with 2-bit alpha.
    Rgb10a2Unorm,
    /// Packed 11/11/10-bit float RGB.
    Rg11b10Float,

    // 64-bit formats
    /// 16-bit RGBA channels, float.
    Rgba16Float,
    /// 32-bit RG channels, float.
    Rg32Float,

    // 128-bit formats
    /// 32-bit RGBA channels, float.
    Rgba32Float,

    // Depth/stencil formats
    /// 16-bit depth.
    Depth16Unorm,
    /// 24-bit depth with 8-bit stencil.
    Depth24UnormStencil8,
    /// 32-bit depth, float.
    Depth32Float,
    /// 32-bit depth float with 8-bit stencil.
    Depth32FloatStencil8,
}

impl TextureFormat {
    /// Returns true if this is a depth or stencil format.
    pub fn is_depth_stencil(&self) -> bool {
        matches!(
            self,
            Self::Depth16Unorm
                | Self::Depth24UnormStencil8
                | Self::Depth32Float
                | Self::Depth32FloatStencil8
        )
    }

    /// Returns true if this format has a stencil component.
    pub fn has_stencil(&self) -> bool {
        matches!(self, Self::Depth24UnormStencil8 | Self::Depth32FloatStencil8)
    }

    /// Returns the size in bytes per pixel.
    pub fn block_size(&self) -> u32 {
        match self {
            Self::R8Unorm | Self::R8Uint => 1,
            Self::R16Float | Self::Rg8Unorm | Self::Depth16Unorm => 2,
            Self::R32Float
            | Self::R32Uint
            | Self::Rg16Float
            | Self::Rgba8Unorm
            | Self::Rgba8UnormSrgb
            | Self::Bgra8Unorm
            | Self::Rgb10a2Unorm
            | Self::Rg11b10Float
            | Self::Depth24UnormStencil8
            | Self::Depth32Float => 4,
            Self::Rgba16Float | Self::Rg32Float | Self::Depth32FloatStencil8 => 8,
            Self::Rgba32Float => 16,
        }
    }
}

/// Dimensionality of a texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TextureDimension {
    #[default]
    D2,
    D3,
    Cube,
}

bitflags! {
    /// Creation flags for textures.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct TextureFlags: u32 {
        /// Texture can be bound as a render target.
        const RENDER_TARGET = 1 << 0;
        /// Texture can be bound as a depth-stencil target.
        const DEPTH_STENCIL = 1 << 1;
        /// Texture can be written through an unordered-access view.
        const UNORDERED_ACCESS = 1 << 2;
        /// Texture is never sampled.
        const DENY_SHADER_RESOURCE = 1 << 3;
    }
}

/// Descriptor for creating a texture.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TextureDesc {
    /// Debug label for the texture.
    pub label: Option<String>,
    pub dimension: TextureDimension,
    pub format: TextureFormat,
    pub width: u32,
    pub height: u32,
    /// Depth for 3D textures, array layers otherwise (6 per cube).
    pub depth_or_array_layers: u32,
    pub mip_levels: u32,
    pub sample_count: u32,
    pub flags: TextureFlags,
}

impl TextureDesc {
    /// Create a new 2D texture descriptor.
    pub fn new_2d(width: u32, height: u32, format: TextureFormat, flags: TextureFlags) -> Self {
        Self {
            label: None,
            dimension: TextureDimension::D2,
            format,
            width,
            height,
            depth_or_array_layers: 1,
            mip_levels: 1,
            sample_count: 1,
            flags,
        }
    }

    /// Create a new 3D texture descriptor.
    pub fn new_3d(
        width: u32,
        height: u32,
        depth: u32,
        format: TextureFormat,
        flags: TextureFlags,
    ) -> Self {
        Self {
            dimension: TextureDimension::D3,
            depth_or_array_layers: depth,
            ..Self::new_2d(width, height, format, flags)
        }
    }

    /// Create a new cube texture descriptor.
    pub fn new_cube(size: u32, format: TextureFormat, flags: TextureFlags) -> Self {
        Self {
            dimension: TextureDimension::Cube,
            depth_or_array_layers: 6,
            ..Self::new_2d(size, size, format, flags)
        }
    }

    /// Set the debug label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Set the mip level count.
    pub fn with_mip_levels(mut self, count: u32) -> Self {
        self.mip_levels = count;
        self
    }

    /// Set the sample count for multisampling.
    pub fn with_sample_count(mut self, count: u32) -> Self {
        self.sample_count = count;
        self
    }

    /// Whether a texture created from `self` can stand in for `request`.
    ///
    /// Dimension, format, sample count and flags must match exactly; every
    /// extent and the mip count must be at least as large as requested.
    pub fn is_compatible_with(&self, request: &TextureDesc) -> bool {
        self.dimension == request.dimension
            && self.format == request.format
            && self.sample_count == request.sample_count
            && self.flags == request.flags
            && self.width >= request.width
            && self.height >= request.height
            && self.depth_or_array_layers >= request.depth_or_array_layers
            && self.mip_levels >= request.mip_levels
    }

    /// Approximate size of the top mip in bytes.
    pub fn byte_size(&self) -> u64 {
        self.width as u64
            * self.height as u64
            * self.depth_or_array_layers as u64
            * self.format.block_size() as u64
            * self.sample_count as u64
    }
}

impl Default for TextureDesc {
    fn default() -> Self {
        Self::new_2d(1, 1, TextureFormat::default(), TextureFlags::empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compatibility_rules() {
        let pooled = TextureDesc::new_2d(1920, 1080, TextureFormat::Rgba16Float, TextureFlags::RENDER_TARGET);
        let smaller = TextureDesc::new_2d(1280, 720, TextureFormat::Rgba16Float, TextureFlags::RENDER_TARGET);
        assert!(pooled.is_compatible_with(&smaller));
        assert!(!smaller.is_compatible_with(&pooled));

        let other_format = TextureDesc { format: TextureFormat::Rgba8Unorm, ..smaller.clone() };
        assert!(!pooled.is_compatible_with(&other_format));

        let other_flags = TextureDesc { flags: TextureFlags::UNORDERED_ACCESS, ..smaller.clone() };
        assert!(!pooled.is_compatible_with(&other_flags));

        let more_mips = smaller.clone().with_mip_levels(4);
        assert!(!pooled.is_compatible_with(&more_mips));

        let msaa = smaller.with_sample_count(4);
        assert!(!pooled.is_compatible_with(&msaa));
    }

    #[test]
    fn test_label_ignored_for_compatibility() {
        let a = TextureDesc::new_2d(64, 64, TextureFormat::R32Float, TextureFlags::empty()).with_label("a");
        let b = a.clone().with_label("b");
        assert!(a.is_compatible_with(&b));
    }

    #[test]
    fn test_cube_and_3d() {
        let cube = TextureDesc::new_cube(256, TextureFormat::Rgba8Unorm, TextureFlags::empty());
        assert_eq!(cube.depth_or_array_layers, 6);
        let volume = TextureDesc::new_3d(32, 32, 32, TextureFormat::R16Float, TextureFlags::UNORDERED_ACCESS);
        assert!(!cube.is_compatible_with(&volume));
        assert_eq!(volume.byte_size(), 32 * 32 * 32 * 2);
    }

    #[test]
    fn test_depth_format_helpers() {
        assert!(TextureFormat::Depth32Float.is_depth_stencil());
        assert!(!TextureFormat::Depth32Float.has_stencil());
        assert!(TextureFormat::Depth24UnormStencil8.has_stencil());
        assert!(!TextureFormat::Rgba8Unorm.is_depth_stencil());
    }
}
