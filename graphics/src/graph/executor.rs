//! Executing a compiled graph on a device.
//!
//! Passes run in sorted order. Graphics, compute and blit passes share one
//! graphics-queue context; async compute passes record into a compute-queue
//! context. Whenever a pass depends on work recorded for the other queue,
//! that queue's context is submitted and the dependent context waits on the
//! resulting sync point.

use std::collections::HashMap;

use crate::backend::DescriptorSource;
use crate::command::{BarrierSplit, CommandContext};
use crate::descriptors::CpuDescriptorHandle;
use crate::device::Device;
use crate::error::GraphicsError;
use crate::memory::BufferSlice;
use crate::resources::Resource;
use crate::sync::SyncPoint;
use crate::types::{DescriptorHeapType, QueueType, ResourceState};

use super::barrier::PlannedBarrier;
use super::compiler::CompiledGraph;
use super::pass::{PassKind, PassNode, PassState};
use super::registry::{BufferHandle, ResourceId, ResourceKind, ResourceRegistry, TextureHandle};
use super::{GraphError, PassError, PassId};

/// Outcome of one executed graph.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionReport {
    /// Names of executed passes in order.
    pub executed: Vec<String>,
    /// Names of culled passes.
    pub culled: Vec<String>,
    /// Every submission made while executing.
    pub submissions: Vec<SyncPoint>,
    /// Async passes that were still running at their deadline.
    pub deadline_misses: Vec<String>,
}

/// What an execute callback sees: its context, the device and the graph's
/// bound resources.
pub struct PassContext<'a, 'g> {
    name: &'a str,
    kind: PassKind,
    device: &'a mut Device,
    context: &'a mut CommandContext,
    registry: &'a ResourceRegistry<'g>,
    views: &'a mut Vec<(DescriptorHeapType, CpuDescriptorHandle)>,
}

impl<'a, 'g> PassContext<'a, 'g> {
    pub fn name(&self) -> &str {
        self.name
    }

    pub fn kind(&self) -> PassKind {
        self.kind
    }

    pub fn context(&mut self) -> &mut CommandContext {
        self.context
    }

    pub fn device(&mut self) -> &mut Device {
        self.device
    }

    pub fn texture(&self, texture: TextureHandle) -> Result<&Resource, PassError> {
        self.registry
            .get(texture.id())
            .resource()
            .ok_or_else(|| PassError::MissingResource(self.registry.name(texture.id()).to_owned()))
    }

    pub fn buffer(&self, buffer: BufferHandle) -> Result<BufferSlice, PassError> {
        self.registry
            .get(buffer.id())
            .buffer_slice()
            .ok_or_else(|| PassError::MissingResource(self.registry.name(buffer.id()).to_owned()))
    }

    /// A render-target view released when the pass ends.
    pub fn render_target_view(&mut self, texture: TextureHandle) -> Result<CpuDescriptorHandle, PassError> {
        let raw = self.texture(texture)?.raw();
        self.view(DescriptorHeapType::Rtv, DescriptorSource::RenderTarget(raw))
    }

    pub fn depth_stencil_view(&mut self, texture: TextureHandle, read_only: bool) -> Result<CpuDescriptorHandle, PassError> {
        let raw = self.texture(texture)?.raw();
        self.view(
            DescriptorHeapType::Dsv,
            DescriptorSource::DepthStencil {
                resource: raw,
                read_only,
            },
        )
    }

    pub fn shader_resource_view(&mut self, texture: TextureHandle) -> Result<CpuDescriptorHandle, PassError> {
        let raw = self.texture(texture)?.raw();
        self.view(DescriptorHeapType::CbvSrvUav, DescriptorSource::ShaderResource(raw))
    }

    pub fn unordered_access_view(&mut self, texture: TextureHandle) -> Result<CpuDescriptorHandle, PassError> {
        let raw = self.texture(texture)?.raw();
        self.view(DescriptorHeapType::CbvSrvUav, DescriptorSource::UnorderedAccess(raw))
    }

    fn view(&mut self, heap_type: DescriptorHeapType, source: DescriptorSource) -> Result<CpuDescriptorHandle, PassError> {
        let handle = self.device.create_descriptor(heap_type, &source)?;
        self.views.push((heap_type, handle));
        Ok(handle)
    }

    /// Copy staged descriptor tables to the online heaps.
    pub fn commit_descriptor_tables(&mut self) -> Result<(), PassError> {
        self.device.commit_descriptor_tables(self.context)?;
        Ok(())
    }

    pub fn draw(&mut self, vertex_count: u32, instance_count: u32) -> Result<(), PassError> {
        self.commit_descriptor_tables()?;
        self.context.draw(vertex_count, instance_count, 0, 0);
        Ok(())
    }

    pub fn draw_indexed(
        &mut self,
        index_count: u32,
        instance_count: u32,
        start_index: u32,
        base_vertex: i32,
        start_instance: u32,
    ) -> Result<(), PassError> {
        self.commit_descriptor_tables()?;
        self.context
            .draw_indexed(index_count, instance_count, start_index, base_vertex, start_instance);
        Ok(())
    }

    pub fn dispatch(&mut self, x: u32, y: u32, z: u32) -> Result<(), PassError> {
        self.commit_descriptor_tables()?;
        self.context.dispatch(x, y, z);
        Ok(())
    }
}

struct Executor<'d> {
    device: &'d mut Device,
    contexts: [Option<CommandContext>; 3],
    recorded: [Vec<PassId>; 3],
    pass_sync: Vec<Option<SyncPoint>>,
    report: ExecutionReport,
}

impl Executor<'_> {
    fn take_context(&mut self, queue: QueueType) -> Result<CommandContext, GraphError> {
        if let Some(ctx) = self.contexts[queue.index()].take() {
            return Ok(ctx);
        }
        self.device
            .request_context(queue)
            .ok_or(GraphError::Graphics(GraphicsError::DeviceRemoved))
    }

    fn put_context(&mut self, ctx: CommandContext) {
        let queue = ctx.queue_type();
        self.contexts[queue.index()] = Some(ctx);
    }

    /// Submit the open context of `queue`, if any.
    fn submit(&mut self, queue: QueueType) -> Result<Option<SyncPoint>, GraphError> {
        let Some(ctx) = self.contexts[queue.index()].take() else {
            return Ok(None);
        };
        let sync_point = self.device.submit(ctx)?;
        for pass in self.recorded[queue.index()].drain(..) {
            self.pass_sync[pass.index()] = Some(sync_point);
        }
        self.report.submissions.push(sync_point);
        log::trace!("graph: submitted {:?} work up to {}", queue, sync_point.value);
        Ok(Some(sync_point))
    }

    /// Sync point covering `pass`, submitting its context if still open.
    fn sync_point_of(&mut self, pass: PassId, queue: QueueType) -> Result<Option<SyncPoint>, GraphError> {
        if let Some(sync_point) = self.pass_sync[pass.index()] {
            return Ok(Some(sync_point));
        }
        if self.recorded[queue.index()].contains(&pass) {
            return self.submit(queue);
        }
        Ok(None)
    }

    /// Submit every open context, compute first.
    fn finish(&mut self) -> Result<(), GraphError> {
        let mut result = Ok(());
        for queue in [QueueType::Compute, QueueType::Graphics, QueueType::Copy] {
            if let Err(err) = self.submit(queue) {
                result = result.and(Err(err));
            }
        }
        result
    }
}

fn apply_barriers(
    ctx: &mut CommandContext,
    barriers: &[PlannedBarrier],
    registry: &ResourceRegistry<'_>,
    open_splits: &mut HashMap<ResourceId, (ResourceState, ResourceState)>,
) {
    for barrier in barriers {
        let entry = registry.get(barrier.resource());
        match *barrier {
            PlannedBarrier::Transition {
                resource,
                after,
                split,
            } => {
                let Some(bound) = entry.resource() else {
                    continue;
                };
                match split {
                    BarrierSplit::None => {
                        ctx.transition_resource(bound, after);
                    }
                    BarrierSplit::BeginOnly => {
                        if let Some(before) = ctx.begin_split_transition(bound, after) {
                            open_splits.insert(resource, (before, after));
                        }
                    }
                    BarrierSplit::EndOnly => {
                        if let Some((before, after)) = open_splits.remove(&resource) {
                            ctx.end_split_transition(bound.raw(), before, after);
                        }
                    }
                }
            }
            PlannedBarrier::Uav { .. } => {
                let raw = entry
                    .resource()
                    .map(Resource::raw)
                    .or_else(|| entry.buffer_slice().map(|s| s.resource));
                ctx.uav_barrier(raw);
            }
        }
    }
}

/// Run every live pass of a compiled graph.
pub(crate) fn run<'g>(
    passes: &mut [PassNode<'g>],
    registry: &mut ResourceRegistry<'g>,
    states: &mut [PassState],
    compiled: &CompiledGraph,
    device: &mut Device,
) -> Result<ExecutionReport, GraphError> {
    let order = compiled.order();
    let mut starts: Vec<Vec<ResourceId>> = vec![Vec::new(); order.len()];
    let mut ends: Vec<Vec<ResourceId>> = vec![Vec::new(); order.len()];
    let mut held = vec![false; registry.len()];
    for (id, entry) in registry.iter() {
        if entry.kind() == ResourceKind::External {
            continue;
        }
        if let Some(lifetime) = entry.lifetime() {
            starts[lifetime.min].push(id);
            ends[lifetime.max].push(id);
        }
    }
    for &pass in order {
        let node = &passes[pass.index()];
        if node.desc.kind.is_async() {
            for id in node.touched() {
                held[id.index()] = true;
            }
        }
    }

    let mut exec = Executor {
        device,
        contexts: Default::default(),
        recorded: Default::default(),
        pass_sync: vec![None; passes.len()],
        report: ExecutionReport {
            culled: compiled
                .culled()
                .iter()
                .map(|p| passes[p.index()].desc.name.clone())
                .collect(),
            ..Default::default()
        },
    };

    let mut open_splits = HashMap::new();
    let mut views = Vec::new();
    let mut failure: Option<(String, PassError)> = None;
    let mut fatal: Option<GraphError> = None;

    for (position, &pass) in order.iter().enumerate() {
        let step = run_pass(
            &mut exec,
            passes,
            registry,
            compiled,
            position,
            pass,
            &starts[position],
            &mut open_splits,
            &mut views,
        );
        for (heap_type, handle) in views.drain(..) {
            exec.device.release_descriptor(heap_type, handle);
        }
        match step {
            Ok(Ok(())) => {
                states[pass.index()] = PassState::Finished;
                exec.report
                    .executed
                    .push(passes[pass.index()].desc.name.clone());
            }
            Ok(Err(err)) => {
                let name = passes[pass.index()].desc.name.clone();
                log::error!("render graph pass '{name}' failed: {err}");
                states[pass.index()] = PassState::Ready;
                failure = Some((name, err));
            }
            Err(err) => {
                log::error!("render graph aborted at '{}': {err}", passes[pass.index()].desc.name);
                fatal = Some(err);
            }
        }
        if failure.is_some() || fatal.is_some() {
            let skipped = order.len() - position - 1;
            if skipped > 0 {
                log::warn!("skipping {skipped} remaining render graph passes");
            }
            break;
        }
        for &id in &ends[position] {
            if !held[id.index()] {
                registry.release_resource(id, exec.device);
            }
        }
    }

    if failure.is_none() && fatal.is_none() {
        let finals = finish_external(&mut exec, passes, registry, compiled, &mut open_splits);
        if let Err(err) = finals {
            fatal = Some(err);
        }
    }

    let submitted = exec.finish();
    registry.release_all(exec.device);

    if let Some(err) = fatal {
        return Err(err);
    }
    submitted?;
    if let Some((pass, source)) = failure {
        return Err(GraphError::PassFailed { pass, source });
    }
    Ok(exec.report)
}

/// Execute one pass. The outer error aborts the graph; the inner one is the
/// pass callback's own failure.
#[allow(clippy::too_many_arguments)]
fn run_pass<'g>(
    exec: &mut Executor<'_>,
    passes: &mut [PassNode<'g>],
    registry: &mut ResourceRegistry<'g>,
    compiled: &CompiledGraph,
    position: usize,
    pass: PassId,
    starts: &[ResourceId],
    open_splits: &mut HashMap<ResourceId, (ResourceState, ResourceState)>,
    views: &mut Vec<(DescriptorHeapType, CpuDescriptorHandle)>,
) -> Result<Result<(), PassError>, GraphError> {
    for &id in starts {
        registry.request_resource(id, exec.device)?;
    }

    let kind = passes[pass.index()].desc.kind;
    let queue = kind.queue();
    let barriers = compiled.barriers_at(position);

    let mut waits = Vec::new();
    for &dependency in compiled.dependencies(pass) {
        let dependency_queue = passes[dependency.index()].desc.kind.queue();
        if dependency_queue != queue
            && let Some(sync_point) = exec.sync_point_of(dependency, dependency_queue)?
        {
            waits.push(sync_point);
        }
    }

    for &(async_pass, _) in compiled.deadlines().iter().filter(|(_, d)| *d == pass) {
        let Some(sync_point) = exec.sync_point_of(async_pass, QueueType::Compute)? else {
            continue;
        };
        if !exec.device.is_complete(sync_point)? {
            let name = &passes[async_pass.index()].desc.name;
            log::warn!(
                "async pass '{}' missed its deadline '{}'; waiting on the CPU",
                name,
                passes[pass.index()].desc.name
            );
            exec.report.deadline_misses.push(name.clone());
            exec.device.wait_for_sync_point(sync_point)?;
        }
    }

    if !barriers.hoisted.is_empty() {
        let mut graphics = exec.take_context(QueueType::Graphics)?;
        apply_barriers(&mut graphics, &barriers.hoisted, registry, open_splits);
        let recorded = graphics.pending_barrier_count() > 0;
        graphics.flush_barriers();
        exec.put_context(graphics);
        if recorded && let Some(sync_point) = exec.submit(QueueType::Graphics)? {
            waits.push(sync_point);
        }
    }

    let mut ctx = exec.take_context(queue)?;
    for sync_point in waits {
        ctx.wait_on_gpu(sync_point);
    }
    apply_barriers(&mut ctx, &barriers.before, registry, open_splits);
    ctx.flush_barriers();

    let node = &mut passes[pass.index()];
    let name = node.desc.name.as_str();
    ctx.begin_event(name);
    exec.recorded[queue.index()].push(pass);

    let result = match node.execute.take() {
        Some(execute) => {
            let mut pass_ctx = PassContext {
                name,
                kind,
                device: exec.device,
                context: &mut ctx,
                registry,
                views,
            };
            execute(&mut pass_ctx)
        }
        None => Ok(()),
    };

    ctx.end_event();
    apply_barriers(&mut ctx, &barriers.after, registry, open_splits);
    ctx.flush_barriers();
    exec.put_context(ctx);
    Ok(result)
}

fn finish_external(
    exec: &mut Executor<'_>,
    passes: &[PassNode<'_>],
    registry: &ResourceRegistry<'_>,
    compiled: &CompiledGraph,
    open_splits: &mut HashMap<ResourceId, (ResourceState, ResourceState)>,
) -> Result<(), GraphError> {
    if compiled.final_barriers().is_empty() {
        return Ok(());
    }
    let mut waits = Vec::new();
    for barrier in compiled.final_barriers() {
        let last_user = registry
            .get(barrier.resource())
            .lifetime()
            .map(|l| compiled.order()[l.max]);
        if let Some(pass) = last_user
            && passes[pass.index()].desc.kind.is_async()
            && let Some(sync_point) = exec.sync_point_of(pass, QueueType::Compute)?
        {
            waits.push(sync_point);
        }
    }
    let mut ctx = exec.take_context(QueueType::Graphics)?;
    for sync_point in waits {
        ctx.wait_on_gpu(sync_point);
    }
    apply_barriers(&mut ctx, compiled.final_barriers(), registry, open_splits);
    ctx.flush_barriers();
    exec.put_context(ctx);
    Ok(())
}
