//! Command contexts: state-tracking recorders over a [`CommandList`].

use super::barrier::{BarrierSplit, ResourceBarrier};
use super::commands::{Command, CommandList, IndexBufferView, VertexBufferView};
use crate::backend::{RawPipeline, RawResource};
use crate::descriptors::{CpuDescriptorHandle, DescriptorTableCache, OnlineHeaps};
use crate::error::GraphicsError;
use crate::pipeline::{BindPoint, RootSignatureDesc};
use crate::resources::Resource;
use crate::sync::SyncPoint;
use crate::types::{QueueType, ResourceState, ScissorRect, Viewport};

/// Records commands for one queue.
///
/// Barriers are batched: transitions are queued and flushed as a single
/// `ResourceBarrier` command right before the next draw, dispatch, clear or
/// copy, or when the context is closed.
///
/// Lifecycle: open → record → close → submit → recycle. Contexts are handed
/// out by [`Device::request_context`] and given back by
/// [`Device::submit`].
///
/// [`Device::request_context`]: crate::Device::request_context
/// [`Device::submit`]: crate::Device::submit
#[derive(Debug)]
pub struct CommandContext {
    queue: QueueType,
    list: CommandList,
    pending: Vec<ResourceBarrier>,
    waits: Vec<SyncPoint>,
    tables: DescriptorTableCache,
    closed: bool,
    event_depth: u32,
}

impl CommandContext {
    pub fn new(queue: QueueType) -> Self {
        Self {
            queue,
            list: CommandList::new(queue),
            pending: Vec::new(),
            waits: Vec::new(),
            tables: DescriptorTableCache::new(),
            closed: false,
            event_depth: 0,
        }
    }

    /// Reopen a recycled context.
    pub(crate) fn reset(&mut self, label: Option<String>) {
        self.list.clear();
        self.list.set_label(label);
        self.pending.clear();
        self.waits.clear();
        self.tables = DescriptorTableCache::new();
        self.closed = false;
        self.event_depth = 0;
    }

    pub fn queue_type(&self) -> QueueType {
        self.queue
    }

    pub fn list(&self) -> &CommandList {
        &self.list
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn pending_barrier_count(&self) -> usize {
        self.pending.len()
    }

    /// Cross-queue waits applied when the context is submitted.
    pub fn waits(&self) -> &[SyncPoint] {
        &self.waits
    }

    fn record(&mut self, command: Command) {
        if self.closed {
            kiln_core::contract_violation!("recording {:?} into a closed context", command);
        }
        if command.is_graphics_only() && !self.queue.supports_graphics() {
            kiln_core::contract_violation!(
                "{:?} recorded on a {:?} context",
                command,
                self.queue
            );
        }
        self.list.push(command);
    }

    fn check_state_legal(&self, state: ResourceState) {
        if self.queue != QueueType::Graphics && !state.is_compute_legal() {
            kiln_core::contract_violation!(
                "{:?} queue cannot transition to or from {:?}",
                self.queue,
                state
            );
        }
    }

    // ------------------------------------------------------------------
    // Barriers
    // ------------------------------------------------------------------

    /// Queue a transition of `resource` to `after`.
    ///
    /// No-op if the tracked state already covers `after`. Returns true if a
    /// barrier was queued.
    pub fn transition_resource(&mut self, resource: &Resource, after: ResourceState) -> bool {
        let before = resource.state();
        if before.covers(after) {
            return false;
        }
        self.check_state_legal(before | after);
        self.pending
            .push(ResourceBarrier::transition(resource.raw(), before, after));
        resource.set_state(after);
        true
    }

    /// Start a split transition. The tracked state moves to `after` at once;
    /// the matching [`end_split_transition`](Self::end_split_transition)
    /// must be recorded before the resource is used in that state.
    pub fn begin_split_transition(&mut self, resource: &Resource, after: ResourceState) -> Option<ResourceState> {
        let before = resource.state();
        if before.covers(after) {
            return None;
        }
        self.check_state_legal(before | after);
        self.pending.push(ResourceBarrier::Transition {
            resource: resource.raw(),
            before,
            after,
            split: BarrierSplit::BeginOnly,
        });
        resource.set_state(after);
        Some(before)
    }

    pub fn end_split_transition(&mut self, resource: RawResource, before: ResourceState, after: ResourceState) {
        self.check_state_legal(before | after);
        self.pending.push(ResourceBarrier::Transition {
            resource,
            before,
            after,
            split: BarrierSplit::EndOnly,
        });
    }

    /// Order UAV accesses to `resource` (or to every UAV when `None`).
    pub fn uav_barrier(&mut self, resource: Option<RawResource>) {
        self.pending.push(ResourceBarrier::Uav { resource });
    }

    pub fn aliasing_barrier(&mut self, before: Option<RawResource>, after: Option<RawResource>) {
        self.pending
            .push(ResourceBarrier::Aliasing { before, after });
    }

    /// Emit all queued barriers as one command.
    pub fn flush_barriers(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        let batch = std::mem::take(&mut self.pending);
        self.record(Command::ResourceBarrier(batch));
    }

    /// Make this context's submission wait on the GPU for `sync_point`.
    ///
    /// Waits on the context's own queue are implied by submission order and
    /// are not recorded.
    pub fn wait_on_gpu(&mut self, sync_point: SyncPoint) {
        if sync_point.queue == self.queue {
            return;
        }
        match self.waits.iter_mut().find(|w| w.queue == sync_point.queue) {
            Some(existing) => existing.value = existing.value.max(sync_point.value),
            None => self.waits.push(sync_point),
        }
    }

    // ------------------------------------------------------------------
    // Bindings
    // ------------------------------------------------------------------

    pub fn set_pipeline_state(&mut self, pipeline: RawPipeline) {
        self.record(Command::SetPipelineState(pipeline));
    }

    /// Bind a root signature and adopt its descriptor-table layout.
    pub fn set_root_signature(&mut self, layout: &RootSignatureDesc, bind_point: BindPoint) {
        if bind_point == BindPoint::Compute && !self.queue.supports_compute() {
            kiln_core::contract_violation!("compute root signature on a {:?} context", self.queue);
        }
        self.record(Command::SetRootSignature {
            bind_point,
            signature: layout.fingerprint(),
        });
        self.tables.reset(layout, bind_point);
    }

    /// Stage offline descriptors into a descriptor table of the bound root
    /// signature. They reach the GPU on the next table commit.
    pub fn set_descriptor_table(&mut self, root_index: u32, offset: u32, handles: &[CpuDescriptorHandle]) {
        self.tables.stage(root_index, offset, handles);
    }

    pub fn has_dirty_tables(&self) -> bool {
        self.tables.is_dirty()
    }

    /// Copy staged tables into the online heaps and record the bindings.
    pub(crate) fn commit_tables(&mut self, heaps: &mut OnlineHeaps<'_>) -> Result<(), GraphicsError> {
        for command in self.tables.commit(heaps)? {
            self.record(command);
        }
        Ok(())
    }

    pub fn set_root_constant_buffer(&mut self, root_index: u32, gpu_address: u64) {
        let bind_point = self.tables.bind_point();
        self.record(Command::SetRootConstantBufferView {
            bind_point,
            root_index,
            gpu_address,
        });
    }

    pub fn set_root_constants(&mut self, root_index: u32, offset: u32, values: &[u32]) {
        let bind_point = self.tables.bind_point();
        self.record(Command::SetRoot32BitConstants {
            bind_point,
            root_index,
            offset,
            values: values.to_vec(),
        });
    }

    pub fn set_render_targets(&mut self, colors: &[CpuDescriptorHandle], depth: Option<CpuDescriptorHandle>) {
        self.record(Command::SetRenderTargets {
            colors: colors.to_vec(),
            depth,
        });
    }

    pub fn set_viewport(&mut self, viewport: Viewport) {
        self.record(Command::SetViewport(viewport));
    }

    pub fn set_scissor_rect(&mut self, rect: ScissorRect) {
        self.record(Command::SetScissorRect(rect));
    }

    pub fn set_vertex_buffers(&mut self, start_slot: u32, views: &[VertexBufferView]) {
        self.record(Command::SetVertexBuffers {
            start_slot,
            views: views.to_vec(),
        });
    }

    pub fn set_index_buffer(&mut self, view: IndexBufferView) {
        self.record(Command::SetIndexBuffer(view));
    }

    // ------------------------------------------------------------------
    // Work
    // ------------------------------------------------------------------

    pub fn clear_color(&mut self, target: CpuDescriptorHandle, color: [f32; 4]) {
        self.flush_barriers();
        self.record(Command::ClearColorTarget { target, color });
    }

    pub fn clear_depth_stencil(&mut self, target: CpuDescriptorHandle, depth: f32, stencil: u8) {
        self.flush_barriers();
        self.record(Command::ClearDepthStencil {
            target,
            depth,
            stencil,
        });
    }

    pub fn draw(&mut self, vertex_count: u32, instance_count: u32, start_vertex: u32, start_instance: u32) {
        self.flush_barriers();
        self.record(Command::Draw {
            vertex_count,
            instance_count,
            start_vertex,
            start_instance,
        });
    }

    pub fn draw_indexed(
        &mut self,
        index_count: u32,
        instance_count: u32,
        start_index: u32,
        base_vertex: i32,
        start_instance: u32,
    ) {
        self.flush_barriers();
        self.record(Command::DrawIndexed {
            index_count,
            instance_count,
            start_index,
            base_vertex,
            start_instance,
        });
    }

    pub fn dispatch(&mut self, x: u32, y: u32, z: u32) {
        if !self.queue.supports_compute() {
            kiln_core::contract_violation!("dispatch recorded on a {:?} context", self.queue);
        }
        self.flush_barriers();
        self.record(Command::Dispatch { x, y, z });
    }

    pub fn copy_buffer_region(&mut self, dst: RawResource, dst_offset: u64, src: RawResource, src_offset: u64, size: u64) {
        self.flush_barriers();
        self.record(Command::CopyBufferRegion {
            dst,
            dst_offset,
            src,
            src_offset,
            size,
        });
    }

    pub fn copy_resource(&mut self, dst: &Resource, src: &Resource) {
        self.transition_resource(dst, ResourceState::COPY_DEST);
        self.transition_resource(src, ResourceState::COPY_SOURCE);
        self.flush_barriers();
        self.record(Command::CopyResource {
            dst: dst.raw(),
            src: src.raw(),
        });
    }

    // ------------------------------------------------------------------
    // Markers
    // ------------------------------------------------------------------

    pub fn begin_event(&mut self, name: &str) {
        self.event_depth += 1;
        self.record(Command::BeginEvent(name.to_owned()));
    }

    pub fn end_event(&mut self) {
        if self.event_depth == 0 {
            kiln_core::contract_violation!("end_event without a matching begin_event");
        }
        self.event_depth -= 1;
        self.record(Command::EndEvent);
    }

    pub fn set_marker(&mut self, name: &str) {
        self.record(Command::SetMarker(name.to_owned()));
    }

    /// Flush barriers and stop recording.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        if self.event_depth != 0 {
            kiln_core::contract_violation!("closing a context with {} open events", self.event_depth);
        }
        self.flush_barriers();
        self.closed = true;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::backend::DummyBackend;
    use crate::resources::ResourceFactory;
    use crate::sync::ReleaseSink;
    use crate::types::{TextureDesc, TextureFlags, TextureFormat};

    fn texture() -> Resource {
        let factory = ResourceFactory::new(Arc::new(DummyBackend::new()), ReleaseSink::new());
        factory
            .create_texture(&TextureDesc::new_2d(
                64,
                64,
                TextureFormat::Rgba8Unorm,
                TextureFlags::RENDER_TARGET,
            ))
            .unwrap()
    }

    #[test]
    fn test_redundant_transition_is_skipped() {
        let tex = texture();
        let mut ctx = CommandContext::new(QueueType::Graphics);

        assert!(ctx.transition_resource(&tex, ResourceState::RENDER_TARGET));
        assert!(!ctx.transition_resource(&tex, ResourceState::RENDER_TARGET));
        assert_eq!(ctx.pending_barrier_count(), 1);
        assert_eq!(tex.state(), ResourceState::RENDER_TARGET);
    }

    #[test]
    fn test_subset_of_read_state_is_covered() {
        let tex = texture();
        let mut ctx = CommandContext::new(QueueType::Graphics);
        ctx.transition_resource(&tex, ResourceState::SHADER_RESOURCE);
        assert!(!ctx.transition_resource(&tex, ResourceState::PIXEL_SHADER_RESOURCE));
    }

    #[test]
    fn test_draw_flushes_barriers_as_one_batch() {
        let a = texture();
        let b = texture();
        let mut ctx = CommandContext::new(QueueType::Graphics);
        ctx.transition_resource(&a, ResourceState::RENDER_TARGET);
        ctx.transition_resource(&b, ResourceState::PIXEL_SHADER_RESOURCE);
        ctx.draw(3, 1, 0, 0);

        let commands = ctx.list().commands();
        assert_eq!(commands.len(), 2);
        match &commands[0] {
            Command::ResourceBarrier(batch) => assert_eq!(batch.len(), 2),
            other => panic!("expected barriers, got {other:?}"),
        }
        assert_eq!(ctx.pending_barrier_count(), 0);
    }

    #[test]
    fn test_split_transition_pair() {
        let tex = texture();
        let mut ctx = CommandContext::new(QueueType::Graphics);
        let before = ctx
            .begin_split_transition(&tex, ResourceState::PIXEL_SHADER_RESOURCE)
            .unwrap();
        ctx.end_split_transition(tex.raw(), before, ResourceState::PIXEL_SHADER_RESOURCE);
        ctx.flush_barriers();

        let Command::ResourceBarrier(batch) = &ctx.list().commands()[0] else {
            panic!("expected a barrier batch");
        };
        assert_eq!(batch[0].split(), BarrierSplit::BeginOnly);
        assert_eq!(batch[1].split(), BarrierSplit::EndOnly);
    }

    #[test]
    fn test_waits_keep_highest_value_per_queue() {
        let mut ctx = CommandContext::new(QueueType::Graphics);
        ctx.wait_on_gpu(SyncPoint::new(QueueType::Compute, 3));
        ctx.wait_on_gpu(SyncPoint::new(QueueType::Compute, 5));
        ctx.wait_on_gpu(SyncPoint::new(QueueType::Compute, 4));
        ctx.wait_on_gpu(SyncPoint::new(QueueType::Graphics, 9));
        assert_eq!(ctx.waits(), &[SyncPoint::new(QueueType::Compute, 5)]);
    }

    #[test]
    fn test_close_flushes_and_reset_reopens() {
        let tex = texture();
        let mut ctx = CommandContext::new(QueueType::Graphics);
        ctx.transition_resource(&tex, ResourceState::COPY_SOURCE);
        ctx.close();
        assert!(ctx.is_closed());
        assert_eq!(ctx.list().len(), 1);

        ctx.reset(Some("again".into()));
        assert!(!ctx.is_closed());
        assert!(ctx.list().is_empty());
        assert_eq!(ctx.list().label(), Some("again"));
    }

    #[test]
    #[should_panic(expected = "recorded on a Compute context")]
    fn test_draw_on_compute_context_panics() {
        let mut ctx = CommandContext::new(QueueType::Compute);
        ctx.draw(3, 1, 0, 0);
    }

    #[test]
    #[should_panic(expected = "cannot transition")]
    fn test_render_target_transition_on_compute_panics() {
        let tex = texture();
        let mut ctx = CommandContext::new(QueueType::Compute);
        ctx.transition_resource(&tex, ResourceState::RENDER_TARGET);
    }

    #[test]
    #[should_panic(expected = "closed context")]
    fn test_record_after_close_panics() {
        let mut ctx = CommandContext::new(QueueType::Copy);
        ctx.close();
        ctx.set_marker("late");
    }
}
