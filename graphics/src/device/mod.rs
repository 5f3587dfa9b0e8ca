//! The device: owner of queues, allocators, caches and deferred release.
//!
//! # Frame structure
//!
//! ```text
//! begin_frame ─▶ poll fences ─▶ drain retire queues
//!      │
//!      ▼
//! request_context ─▶ record ─▶ submit ─▶ SyncPoint      (any number)
//!      │
//!      ▼
//! end_frame ─▶ retire frame pages ─▶ graphics waits on compute/copy
//!          ─▶ signal frame fence
//! ```
//!
//! Everything released during a frame is tagged with the frame fence value
//! that `end_frame` will signal, so completion of that value means no list
//! recorded in the frame can still reference it.
//!
//! # Device removal
//!
//! When a fence poll or submission reports device removal the device is
//! marked crashed and the backend's crash report is logged. From then on
//! `request_context` returns `None`, `end_frame` does nothing and `submit`
//! fails with [`GraphicsError::DeviceRemoved`]. Whether to terminate is up to
//! the application.

mod config;

use std::sync::Arc;

use kiln_core::FenceValue;

pub use config::DeviceConfig;

use crate::backend::{Backend, BackendError, DescriptorSource};
use crate::command::CommandContext;
use crate::descriptors::{
    CpuDescriptorHandle, GpuDescriptorHandle, OfflineDescriptorAllocator, OnlineHeaps, OnlineViewRing, Rollover,
    SamplerCache, SamplerCacheStats,
};
use crate::error::GraphicsError;
use crate::memory::{BufferSlice, BuddyBufferAllocator, LinearBufferAllocator, PersistentSlice};
use crate::pipeline::{CachedPipeline, PipelineCache, PipelineStateDesc};
use crate::resources::{PoolStats, Resource, ResourceFactory, ResourcePool};
use crate::sync::{CommandQueue, DeferredReleaser, Fence, GpuObject, SyncPoint};
use crate::types::{BufferDesc, BufferUsage, DescriptorHeapType, HeapKind, QueueType, ResourceDesc, TextureDesc};

/// Placement alignment of constant-buffer views.
pub const CONSTANT_BUFFER_ALIGNMENT: u64 = 256;

/// Point-in-time counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeviceStats {
    pub frame_index: u64,
    pub completed_frame: FenceValue,
    pub pending_releases: usize,
    pub destroyed_objects: u64,
    pub pool: PoolStats,
    pub pooled_resources: usize,
    pub pipelines: usize,
    pub view_heap_generation: u64,
    pub sampler_heap_generation: u64,
    pub sampler_cache: SamplerCacheStats,
}

/// Destroys everything released by the other fields as they drop.
///
/// Must stay the last field of [`Device`].
#[derive(Debug)]
struct Teardown {
    backend: Arc<dyn Backend>,
    releaser: DeferredReleaser,
}

impl Drop for Teardown {
    fn drop(&mut self) {
        let destroyed = self.releaser.flush_all(self.backend.as_ref());
        log::debug!("device teardown: destroyed {destroyed} GPU objects");
    }
}

#[derive(Debug)]
pub struct Device {
    config: DeviceConfig,
    factory: ResourceFactory,
    queues: [CommandQueue; 3],
    frame_fence: Fence,
    offline: [OfflineDescriptorAllocator; 4],
    views: Rollover<OnlineViewRing>,
    samplers: Rollover<SamplerCache>,
    null_view: CpuDescriptorHandle,
    null_sampler: CpuDescriptorHandle,
    upload: LinearBufferAllocator,
    transient: LinearBufferAllocator,
    constants: BuddyBufferAllocator,
    pool: ResourcePool,
    pipelines: PipelineCache,
    free_contexts: [Vec<CommandContext>; 3],
    frame_index: u64,
    in_frame: bool,
    crashed: bool,
    crash_report: Option<String>,
    teardown: Teardown,
}

static_assertions::assert_impl_all!(Device: Send);

impl Device {
    pub fn new(backend: Arc<dyn Backend>, config: DeviceConfig) -> Result<Self, GraphicsError> {
        config.validate()?;
        let releaser = DeferredReleaser::new();
        let factory = ResourceFactory::new(backend.clone(), releaser.sink().clone());
        let b = backend.as_ref();

        let queues = [
            CommandQueue::new(b, QueueType::Graphics)?,
            CommandQueue::new(b, QueueType::Compute)?,
            CommandQueue::new(b, QueueType::Copy)?,
        ];
        let frame_fence = Fence::new(b)?;

        let mut offline = DescriptorHeapType::ALL
            .map(|ty| OfflineDescriptorAllocator::new(factory.clone(), ty, config.offline_page_size));
        let null_view = offline[DescriptorHeapType::CbvSrvUav.index()].allocate_with(&DescriptorSource::Null)?;
        let null_sampler = offline[DescriptorHeapType::Sampler.index()].allocate_with(&DescriptorSource::Null)?;

        let views = Rollover::new(factory.clone(), DescriptorHeapType::CbvSrvUav, config.view_heap_size)?;
        let samplers = Rollover::new(factory.clone(), DescriptorHeapType::Sampler, config.sampler_heap_size)?;

        let upload = LinearBufferAllocator::new(
            factory.clone(),
            HeapKind::Upload,
            BufferUsage::CONSTANT | BufferUsage::VERTEX | BufferUsage::INDEX | BufferUsage::COPY_SRC,
            config.upload_page_size,
            "upload pages",
        );
        let transient = LinearBufferAllocator::new(
            factory.clone(),
            HeapKind::Default,
            BufferUsage::SHADER_RESOURCE | BufferUsage::UNORDERED_ACCESS | BufferUsage::COPY_DST,
            config.transient_page_size,
            "transient pages",
        );
        let constants = BuddyBufferAllocator::new(
            factory.clone(),
            HeapKind::Upload,
            BufferUsage::CONSTANT,
            config.constant_page_size,
            "constant pages",
        );

        log::debug!(
            "created device {} on {} backend",
            config.label.as_deref().unwrap_or("<unnamed>"),
            backend.name()
        );

        Ok(Self {
            pool: ResourcePool::new(config.pool_stale_limit),
            pipelines: PipelineCache::new(releaser.sink().clone()),
            config,
            factory,
            queues,
            frame_fence,
            offline,
            views,
            samplers,
            null_view,
            null_sampler,
            upload,
            transient,
            constants,
            free_contexts: Default::default(),
            frame_index: 0,
            in_frame: false,
            crashed: false,
            crash_report: None,
            teardown: Teardown { backend, releaser },
        })
    }

    /// A device over the in-process dummy backend.
    #[cfg(feature = "dummy")]
    pub fn dummy(config: DeviceConfig) -> Result<Self, GraphicsError> {
        Self::new(Arc::new(crate::backend::DummyBackend::new()), config)
    }

    pub fn backend(&self) -> &dyn Backend {
        self.teardown.backend.as_ref()
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    pub fn factory(&self) -> &ResourceFactory {
        &self.factory
    }

    pub fn queue(&self, queue: QueueType) -> &CommandQueue {
        &self.queues[queue.index()]
    }

    pub fn is_crashed(&self) -> bool {
        self.crashed
    }

    pub fn crash_report(&self) -> Option<&str> {
        self.crash_report.as_deref()
    }

    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    pub fn is_in_frame(&self) -> bool {
        self.in_frame
    }

    /// Frame fence value that the current frame's `end_frame` will signal.
    pub fn current_frame_fence(&self) -> FenceValue {
        self.frame_fence.next_value()
    }

    /// Last frame fence value known to be complete.
    pub fn completed_frame_fence(&self) -> FenceValue {
        self.frame_fence.completed()
    }

    // ------------------------------------------------------------------
    // Frame lifecycle
    // ------------------------------------------------------------------

    pub fn begin_frame(&mut self) {
        if self.crashed {
            return;
        }
        if self.in_frame {
            kiln_core::contract_violation!("begin_frame called twice without end_frame");
        }

        match self.throttle().and_then(|()| self.poll_fences()) {
            Ok(completed) => self.drain(completed),
            Err(err) => {
                self.handle_error(err);
                if self.crashed {
                    return;
                }
                // Nothing is drained; retire queues catch up next frame.
                log::warn!("frame {} begins without polling fences", self.frame_index + 1);
            }
        }

        self.frame_index += 1;
        self.in_frame = true;
        log::debug!(
            "begin frame {} (frame fence {} completed {})",
            self.frame_index,
            self.frame_fence.next_value(),
            self.frame_fence.completed()
        );
    }

    pub fn end_frame(&mut self) {
        if self.crashed {
            return;
        }
        if !self.in_frame {
            kiln_core::contract_violation!("end_frame called without begin_frame");
        }
        self.in_frame = false;

        let fence = self.frame_fence.next_value();
        let collected = self.teardown.releaser.collect(fence);
        self.upload.end_frame(fence);
        self.transient.end_frame(fence);

        if let Err(err) = self.signal_frame_fence() {
            self.handle_error(err);
            return;
        }
        log::debug!("end frame {} (fence {fence}, {collected} objects released)", self.frame_index);
    }

    /// Block while too many frames are in flight.
    fn throttle(&mut self) -> Result<(), BackendError> {
        let signaled = self.frame_fence.last_signaled();
        let limit = self.config.max_frames_in_flight as u64;
        if signaled >= limit {
            let oldest = signaled - limit + 1;
            if self.frame_fence.completed() < oldest {
                log::trace!("waiting for frame fence {oldest}");
                self.frame_fence.wait(self.teardown.backend.as_ref(), oldest)?;
            }
        }
        Ok(())
    }

    fn signal_frame_fence(&mut self) -> Result<FenceValue, BackendError> {
        let backend = self.teardown.backend.as_ref();
        let graphics = &self.queues[QueueType::Graphics.index()];
        for queue in [QueueType::Compute, QueueType::Copy] {
            let other = &self.queues[queue.index()];
            graphics.wait_on_gpu(backend, other.raw_fence(), other.last_submitted())?;
        }
        self.frame_fence.signal(backend, QueueType::Graphics)
    }

    /// Refresh every fence; returns the completed frame fence value.
    fn poll_fences(&mut self) -> Result<FenceValue, BackendError> {
        let backend = self.teardown.backend.as_ref();
        self.queues
            .iter()
            .try_for_each(|q| q.poll_completed(backend).map(drop))?;
        self.frame_fence.poll(backend)
    }

    fn drain(&mut self, completed: FenceValue) {
        let destroyed = self
            .teardown
            .releaser
            .drain(completed, self.teardown.backend.as_ref());
        for offline in &mut self.offline {
            offline.drain(completed);
        }
        self.views.drain(completed);
        self.samplers.drain(completed);
        self.upload.drain(completed);
        self.transient.drain(completed);
        self.constants.drain(completed);
        if destroyed > 0 {
            log::trace!("drained {destroyed} objects at frame fence {completed}");
        }
    }

    /// Record a backend failure; device removal marks the device crashed.
    fn handle_error(&mut self, err: BackendError) -> GraphicsError {
        let err = GraphicsError::from(err);
        if err.is_device_removed() && !self.crashed {
            self.crashed = true;
            self.in_frame = false;
            self.crash_report = self.teardown.backend.crash_report();
            log::error!(
                "GPU device removed at frame {}: {}",
                self.frame_index,
                self.crash_report.as_deref().unwrap_or("no crash report available")
            );
        } else if !err.is_device_removed() {
            log::error!("backend error: {err}");
        }
        err
    }

    // ------------------------------------------------------------------
    // Command submission
    // ------------------------------------------------------------------

    /// An open context for `queue`, or `None` once the device has crashed.
    pub fn request_context(&mut self, queue: QueueType) -> Option<CommandContext> {
        self.request_labeled_context(queue, None)
    }

    pub fn request_labeled_context(&mut self, queue: QueueType, label: Option<String>) -> Option<CommandContext> {
        if self.crashed {
            return None;
        }
        let mut ctx = self.free_contexts[queue.index()]
            .pop()
            .unwrap_or_else(|| CommandContext::new(queue));
        ctx.reset(label);
        Some(ctx)
    }

    /// Close and submit `ctx`, then recycle it.
    pub fn submit(&mut self, mut ctx: CommandContext) -> Result<SyncPoint, GraphicsError> {
        if self.crashed {
            self.recycle(ctx);
            return Err(GraphicsError::DeviceRemoved);
        }
        ctx.close();
        let queue = ctx.queue_type();
        let waits: Vec<_> = ctx
            .waits()
            .iter()
            .map(|sp| (self.queues[sp.queue.index()].raw_fence(), sp.value))
            .collect();
        let backend = self.teardown.backend.as_ref();
        let result = self.queues[queue.index()].submit(backend, ctx.list(), &waits);
        self.recycle(ctx);
        match result {
            Ok(value) => Ok(SyncPoint::new(queue, value)),
            Err(err) => Err(self.handle_error(err)),
        }
    }

    /// Return an unsubmitted context to the free list.
    pub fn discard(&mut self, ctx: CommandContext) {
        self.recycle(ctx);
    }

    fn recycle(&mut self, ctx: CommandContext) {
        self.free_contexts[ctx.queue_type().index()].push(ctx);
    }

    pub fn is_complete(&mut self, sync_point: SyncPoint) -> Result<bool, GraphicsError> {
        let backend = self.teardown.backend.as_ref();
        match self.queues[sync_point.queue.index()].is_complete(backend, sync_point.value) {
            Ok(done) => Ok(done),
            Err(err) => Err(self.handle_error(err)),
        }
    }

    pub fn wait_for_sync_point(&mut self, sync_point: SyncPoint) -> Result<(), GraphicsError> {
        let backend = self.teardown.backend.as_ref();
        match self.queues[sync_point.queue.index()].wait_for(backend, sync_point.value) {
            Ok(()) => Ok(()),
            Err(err) => Err(self.handle_error(err)),
        }
    }

    /// Block until every queue and the frame fence are idle.
    pub fn wait_for_gpu_idle(&mut self) -> Result<(), GraphicsError> {
        let backend = self.teardown.backend.as_ref();
        let waited = self
            .queues
            .iter()
            .try_for_each(|q| q.wait_idle(backend))
            .and_then(|()| self.frame_fence.wait(backend, self.frame_fence.last_signaled()));
        match waited {
            Ok(()) => Ok(()),
            Err(err) => Err(self.handle_error(err)),
        }
    }

    // ------------------------------------------------------------------
    // Resources
    // ------------------------------------------------------------------

    pub fn create_texture(&self, desc: &TextureDesc) -> Result<Resource, GraphicsError> {
        self.factory.create_texture(desc)
    }

    pub fn create_buffer(&self, desc: &BufferDesc, heap: HeapKind) -> Result<Resource, GraphicsError> {
        self.factory.create_buffer(desc, heap)
    }

    pub fn pool(&self) -> &ResourcePool {
        &self.pool
    }

    /// Rent a resource from the reuse pool.
    pub fn rent(&mut self, desc: &ResourceDesc) -> Result<Resource, GraphicsError> {
        self.pool.rent(desc, &self.factory)
    }

    pub fn give_back(&mut self, resource: Resource) {
        self.pool.give_back(resource);
    }

    // ------------------------------------------------------------------
    // Descriptors
    // ------------------------------------------------------------------

    /// An offline descriptor pointing at `source`.
    pub fn create_descriptor(
        &mut self,
        heap_type: DescriptorHeapType,
        source: &DescriptorSource,
    ) -> Result<CpuDescriptorHandle, GraphicsError> {
        self.offline[heap_type.index()].allocate_with(source)
    }

    /// Re-point an offline descriptor; bumps its version.
    pub fn write_descriptor(
        &mut self,
        heap_type: DescriptorHeapType,
        handle: &mut CpuDescriptorHandle,
        source: &DescriptorSource,
    ) {
        self.offline[heap_type.index()].write(handle, source);
    }

    /// Release an offline descriptor at the end of the current frame.
    pub fn release_descriptor(&mut self, heap_type: DescriptorHeapType, handle: CpuDescriptorHandle) {
        let fence = self.frame_fence.next_value();
        self.offline[heap_type.index()].release(handle, fence);
    }

    pub fn offline_allocator(&self, heap_type: DescriptorHeapType) -> &OfflineDescriptorAllocator {
        &self.offline[heap_type.index()]
    }

    /// Copy view descriptor blocks into the shader-visible view heap.
    pub fn allocate_online_views(
        &mut self,
        blocks: &[&[CpuDescriptorHandle]],
    ) -> Result<Vec<GpuDescriptorHandle>, GraphicsError> {
        let fence = self.frame_fence.next_value();
        let completed = self.frame_fence.completed();
        self.views.allocate_many(fence, completed, blocks)
    }

    /// Copy sampler blocks into the sampler cache.
    pub fn allocate_online_samplers(
        &mut self,
        blocks: &[&[CpuDescriptorHandle]],
    ) -> Result<Vec<GpuDescriptorHandle>, GraphicsError> {
        let fence = self.frame_fence.next_value();
        let completed = self.frame_fence.completed();
        self.samplers.allocate_many(fence, completed, blocks)
    }

    pub fn view_heaps(&self) -> &Rollover<OnlineViewRing> {
        &self.views
    }

    pub fn sampler_heaps(&self) -> &Rollover<SamplerCache> {
        &self.samplers
    }

    /// Copy the context's staged descriptor tables into the online heaps
    /// and record the bindings.
    pub fn commit_descriptor_tables(&mut self, ctx: &mut CommandContext) -> Result<(), GraphicsError> {
        if !ctx.has_dirty_tables() {
            return Ok(());
        }
        let mut heaps = OnlineHeaps {
            views: &mut self.views,
            samplers: &mut self.samplers,
            null_view: self.null_view,
            null_sampler: self.null_sampler,
            fence: self.frame_fence.next_value(),
            completed: self.frame_fence.completed(),
        };
        ctx.commit_tables(&mut heaps)
    }

    // ------------------------------------------------------------------
    // Buffer sub-allocation
    // ------------------------------------------------------------------

    /// Upload-heap memory valid until the end of the current frame.
    pub fn allocate_upload(&mut self, size: u64, align: u64) -> Result<BufferSlice, GraphicsError> {
        self.upload.allocate(size, align)
    }

    /// Copy `data` into a fresh upload slice.
    pub fn upload_bytes(&mut self, data: &[u8], align: u64) -> Result<BufferSlice, GraphicsError> {
        let slice = self.upload.allocate(data.len() as u64, align)?;
        self.teardown
            .backend
            .write_buffer(slice.resource, slice.offset, data)?;
        Ok(slice)
    }

    /// Write typed constants into a one-frame upload slice.
    pub fn upload_constants<T: bytemuck::Pod>(&mut self, value: &T) -> Result<BufferSlice, GraphicsError> {
        self.upload_bytes(bytemuck::bytes_of(value), CONSTANT_BUFFER_ALIGNMENT)
    }

    /// Default-heap scratch memory valid until the end of the current frame.
    pub fn allocate_transient(&mut self, size: u64, align: u64) -> Result<BufferSlice, GraphicsError> {
        self.transient.allocate(size, align)
    }

    /// A constant buffer that persists across frames until released.
    pub fn allocate_constant_buffer(&mut self, size: u32) -> Result<PersistentSlice, GraphicsError> {
        self.constants.allocate(size, CONSTANT_BUFFER_ALIGNMENT as u32)
    }

    pub fn write_constant_buffer<T: bytemuck::Pod>(
        &self,
        slice: &PersistentSlice,
        value: &T,
    ) -> Result<(), GraphicsError> {
        let bytes = bytemuck::bytes_of(value);
        if bytes.len() as u64 > slice.slice.size {
            return Err(GraphicsError::InvalidParameter(format!(
                "{} bytes do not fit a {}-byte constant buffer",
                bytes.len(),
                slice.slice.size
            )));
        }
        self.teardown
            .backend
            .write_buffer(slice.slice.resource, slice.slice.offset, bytes)?;
        Ok(())
    }

    /// Release a constant buffer once the current frame completes.
    pub fn release_constant_buffer(&mut self, slice: PersistentSlice) {
        let fence = self.frame_fence.next_value();
        self.constants.release(slice, fence);
    }

    // ------------------------------------------------------------------
    // Pipelines & stats
    // ------------------------------------------------------------------

    pub fn get_or_create_pipeline(&mut self, desc: &PipelineStateDesc) -> Result<CachedPipeline, GraphicsError> {
        self.pipelines
            .get_or_create(self.teardown.backend.as_ref(), desc)
    }

    pub fn stats(&self) -> DeviceStats {
        DeviceStats {
            frame_index: self.frame_index,
            completed_frame: self.frame_fence.completed(),
            pending_releases: self.teardown.releaser.pending_count(),
            destroyed_objects: self.teardown.releaser.destroyed_count(),
            pool: self.pool.stats(),
            pooled_resources: self.pool.free_count(),
            pipelines: self.pipelines.len(),
            view_heap_generation: self.views.generation(),
            sampler_heap_generation: self.samplers.generation(),
            sampler_cache: self.samplers.current().stats(),
        }
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        if !self.crashed
            && let Err(err) = self.wait_for_gpu_idle()
        {
            log::error!("device teardown: wait for idle failed: {err}");
        }
        let releaser = &mut self.teardown.releaser;
        for queue in &self.queues {
            releaser.defer(0, GpuObject::Fence(queue.raw_fence()));
        }
        releaser.defer(0, GpuObject::Fence(self.frame_fence.raw()));
        self.pool.clear();
        self.upload.clear();
        self.transient.clear();
        self.constants.clear();
        self.views.drain_all();
        self.samplers.drain_all();
        self.free_contexts.iter_mut().for_each(Vec::clear);
        // Remaining heaps and pipelines are released by their owners' Drop;
        // `teardown` drops last and destroys them all.
    }
}
