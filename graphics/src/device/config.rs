//! Device configuration.

use crate::error::GraphicsError;
use crate::resources::pool::DEFAULT_STALE_LIMIT;

const MIB: u64 = 1024 * 1024;

/// Sizes and limits used when creating a [`Device`](super::Device).
///
/// ```
/// use kiln_graphics::DeviceConfig;
///
/// let config = DeviceConfig::default()
///     .with_label("editor viewport")
///     .with_view_heap_size(4096)
///     .with_pool_stale_limit(8);
/// assert_eq!(config.sampler_heap_size, 2048);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceConfig {
    pub label: Option<String>,
    /// Slots in each shader-visible CBV/SRV/UAV heap.
    pub view_heap_size: u32,
    /// Slots in each shader-visible sampler heap.
    pub sampler_heap_size: u32,
    /// Slots per offline descriptor page.
    pub offline_page_size: u32,
    /// Bytes per page of the per-frame upload allocator.
    pub upload_page_size: u64,
    /// Bytes per page of the persistent constant-buffer allocator. Power of two.
    pub constant_page_size: u32,
    /// Bytes per page of the render-graph transient buffer allocator.
    pub transient_page_size: u64,
    /// Near misses after which a pooled resource is evicted.
    pub pool_stale_limit: u32,
    /// Frames the CPU may record ahead of the GPU.
    pub max_frames_in_flight: u32,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            label: None,
            view_heap_size: 16 * 1024,
            sampler_heap_size: 2048,
            offline_page_size: 256,
            upload_page_size: 16 * MIB,
            constant_page_size: (16 * MIB) as u32,
            transient_page_size: 16 * MIB,
            pool_stale_limit: DEFAULT_STALE_LIMIT,
            max_frames_in_flight: 3,
        }
    }
}

impl DeviceConfig {
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_view_heap_size(mut self, slots: u32) -> Self {
        self.view_heap_size = slots;
        self
    }

    pub fn with_sampler_heap_size(mut self, slots: u32) -> Self {
        self.sampler_heap_size = slots;
        self
    }

    pub fn with_offline_page_size(mut self, slots: u32) -> Self {
        self.offline_page_size = slots;
        self
    }

    pub fn with_upload_page_size(mut self, bytes: u64) -> Self {
        self.upload_page_size = bytes;
        self
    }

    pub fn with_constant_page_size(mut self, bytes: u32) -> Self {
        self.constant_page_size = bytes;
        self
    }

    pub fn with_transient_page_size(mut self, bytes: u64) -> Self {
        self.transient_page_size = bytes;
        self
    }

    pub fn with_pool_stale_limit(mut self, limit: u32) -> Self {
        self.pool_stale_limit = limit;
        self
    }

    pub fn with_max_frames_in_flight(mut self, frames: u32) -> Self {
        self.max_frames_in_flight = frames;
        self
    }

    /// Check sizes before any GPU object is created.
    pub fn validate(&self) -> Result<(), GraphicsError> {
        let invalid = |what: &str| Err(GraphicsError::InvalidParameter(what.to_owned()));
        if self.view_heap_size == 0 || self.sampler_heap_size == 0 || self.offline_page_size == 0 {
            return invalid("descriptor heap sizes must be non-zero");
        }
        if self.upload_page_size == 0 || self.transient_page_size == 0 {
            return invalid("buffer page sizes must be non-zero");
        }
        if !self.constant_page_size.is_power_of_two() || self.constant_page_size < 256 {
            return invalid("constant page size must be a power of two of at least 256 bytes");
        }
        if self.max_frames_in_flight == 0 {
            return invalid("max_frames_in_flight must be at least 1");
        }
        Ok(())
    }
}
