//! Shared setup for the integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use kiln_graphics::backend::{DescriptorSource, RawResource};
use kiln_graphics::descriptors::CpuDescriptorHandle;
use kiln_graphics::{
    Device, DeviceConfig, DescriptorHeapType, DummyBackend, TextureDesc, TextureFlags, TextureFormat,
};

pub const MIB: u64 = 1024 * 1024;

/// A device over a dummy backend the test can inspect.
pub struct TestContext {
    pub backend: Arc<DummyBackend>,
    pub device: Device,
}

impl TestContext {
    pub fn new() -> Self {
        Self::with_config(DeviceConfig::default())
    }

    pub fn with_config(config: DeviceConfig) -> Self {
        Self::build(DummyBackend::new(), config)
    }

    /// Fences only complete when the test says so.
    pub fn manual(config: DeviceConfig) -> Self {
        Self::build(DummyBackend::manual(), config)
    }

    fn build(backend: DummyBackend, config: DeviceConfig) -> Self {
        init_logging();
        let backend = Arc::new(backend);
        let device = Device::new(backend.clone(), config.with_label("integration")).expect("dummy device");
        Self { backend, device }
    }

    /// Offline view descriptors pointing at made-up resources.
    pub fn staged_views(&mut self, count: u32) -> Vec<CpuDescriptorHandle> {
        (0..count)
            .map(|i| {
                self.device
                    .create_descriptor(
                        DescriptorHeapType::CbvSrvUav,
                        &DescriptorSource::ShaderResource(RawResource(1000 + i as u64)),
                    )
                    .expect("offline descriptor")
            })
            .collect()
    }
}

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn color_target(size: u32) -> TextureDesc {
    TextureDesc::new_2d(size, size, TextureFormat::Rgba8Unorm, TextureFlags::RENDER_TARGET)
}

pub fn depth_target(size: u32) -> TextureDesc {
    TextureDesc::new_2d(size, size, TextureFormat::Depth32Float, TextureFlags::DEPTH_STENCIL)
}
