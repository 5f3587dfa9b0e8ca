//! Common types shared across the graphics system.

// ============================================================================
// Queues and heaps
// ============================================================================

/// GPU command queue types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u32)]
pub enum QueueType {
    Graphics = 0,
    Compute = 1,
    Copy = 2,
}

impl QueueType {
    pub const ALL: [QueueType; 3] = [Self::Graphics, Self::Compute, Self::Copy];

    pub fn index(self) -> usize {
        self as usize
    }

    /// Whether the queue accepts draw and render-target commands.
    pub fn supports_graphics(self) -> bool {
        matches!(self, Self::Graphics)
    }

    /// Whether the queue accepts dispatches.
    pub fn supports_compute(self) -> bool {
        matches!(self, Self::Graphics | Self::Compute)
    }
}

/// Memory heap a resource lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum HeapKind {
    /// GPU-local memory.
    #[default]
    Default,
    /// CPU-writable, GPU-readable memory.
    Upload,
    /// GPU-writable, CPU-readable memory.
    Readback,
}

/// Descriptor heap types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u32)]
pub enum DescriptorHeapType {
    /// Constant-buffer, shader-resource and unordered-access views.
    CbvSrvUav = 0,
    Sampler = 1,
    /// Render-target views.
    Rtv = 2,
    /// Depth-stencil views.
    Dsv = 3,
}

impl DescriptorHeapType {
    pub const ALL: [DescriptorHeapType; 4] = [Self::CbvSrvUav, Self::Sampler, Self::Rtv, Self::Dsv];

    pub fn index(self) -> usize {
        self as usize
    }

    /// Whether heaps of this type can be bound to shaders.
    pub fn can_be_shader_visible(self) -> bool {
        matches!(self, Self::CbvSrvUav | Self::Sampler)
    }
}

// ============================================================================
// Viewport
// ============================================================================

/// Viewport configuration for rendering.
///
/// Depth range is `[0, 1]` with the origin at the top-left corner.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub min_depth: f32,
    pub max_depth: f32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self::new(0.0, 0.0, 0.0, 0.0)
    }
}

impl Viewport {
    /// Create a new viewport with standard `[0, 1]` depth range.
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
            min_depth: 0.0,
            max_depth: 1.0,
        }
    }

    /// Create a viewport from dimensions with origin at (0, 0).
    pub fn from_dimensions(width: u32, height: u32) -> Self {
        Self::new(0.0, 0.0, width as f32, height as f32)
    }

    /// Set the depth range.
    pub fn with_depth_range(mut self, min_depth: f32, max_depth: f32) -> Self {
        self.min_depth = min_depth;
        self.max_depth = max_depth;
        self
    }
}

// ============================================================================
// Scissor Rectangle
// ============================================================================

/// Scissor rectangle for clipping rendering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ScissorRect {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl ScissorRect {
    /// Create a scissor rectangle from dimensions with origin at (0, 0).
    pub fn from_dimensions(width: u32, height: u32) -> Self {
        Self {
            left: 0,
            top: 0,
            right: width as i32,
            bottom: height as i32,
        }
    }
}

/// Clear values for color and depth targets.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum ClearValue {
    #[default]
    None,
    Color([f32; 4]),
    DepthStencil { depth: f32, stencil: u8 },
}

impl ClearValue {
    /// Create a color clear value.
    pub fn color(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self::Color([r, g, b, a])
    }

    /// Create a depth clear value with zero stencil.
    pub fn depth(value: f32) -> Self {
        Self::DepthStencil {
            depth: value,
            stencil: 0,
        }
    }
}
