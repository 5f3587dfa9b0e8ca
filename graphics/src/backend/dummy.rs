//! Dummy GPU backend for testing and development.
//!
//! This backend doesn't touch a GPU. It keeps a bookkeeping model of a D3D12
//! device instead: resources and heaps are ids, descriptor slots remember
//! what was written into them, upload buffers keep their bytes, fences keep a
//! signaled and a completed value, and every executed command list is
//! recorded so tests can inspect what would have reached the GPU.
//!
//! Two completion modes are supported:
//!
//! - *auto-complete* (default): a queue signal completes immediately, like a
//!   GPU that is never behind the CPU
//! - *manual*: signals stay pending until [`DummyBackend::complete_all`] or
//!   [`DummyBackend::complete_fence`] is called, or a CPU wait forces them
//!
//! [`DummyBackend::simulate_device_removed`] makes every later fence poll,
//! wait and submission fail with [`BackendError::DeviceRemoved`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use super::{
    Backend, BackendError, DescriptorHeapInfo, DescriptorSource, RawDescriptorHeap, RawFence,
    RawPipeline, RawResource,
};
use crate::command::{Command, CommandList};
use crate::pipeline::{PipelineFingerprint, PipelineStateDesc};
use crate::types::{DescriptorHeapType, QueueType, ResourceCreateInfo, ResourceDesc};

const GPU_ADDRESS_BASE: u64 = 0x0001_0000_0000;
const GPU_ADDRESS_ALIGNMENT: u64 = 64 * 1024;
const CPU_HEAP_STRIDE: u64 = 0x0100_0000;

/// A command list as seen by the dummy GPU.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutedList {
    pub queue: QueueType,
    pub label: Option<String>,
    pub commands: Vec<Command>,
}

/// Object counters kept by the dummy backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DummyStats {
    pub resources_created: u64,
    pub resources_destroyed: u64,
    pub heaps_created: u64,
    pub heaps_destroyed: u64,
    pub pipelines_created: u64,
    pub lists_executed: u64,
    pub descriptor_copies: u64,
}

#[derive(Debug)]
struct DummyResource {
    info: ResourceCreateInfo,
    gpu_address: u64,
    data: Vec<u8>,
}

#[derive(Debug)]
struct DummyHeap {
    heap_type: DescriptorHeapType,
    slots: Vec<DescriptorSource>,
}

#[derive(Debug, Default)]
struct DummyFence {
    signaled: u64,
    completed: u64,
}

#[derive(Debug, Default)]
struct DummyState {
    resources: HashMap<u64, DummyResource>,
    heaps: HashMap<u64, DummyHeap>,
    fences: HashMap<u64, DummyFence>,
    pipelines: HashMap<u64, PipelineFingerprint>,
    executed: Vec<ExecutedList>,
    queue_waits: Vec<(QueueType, RawFence, u64)>,
    next_gpu_address: u64,
    manual: bool,
    removed: Option<String>,
    fence_faults: u32,
    stats: DummyStats,
}

/// Dummy GPU backend.
#[derive(Debug)]
pub struct DummyBackend {
    state: Mutex<DummyState>,
    next_id: AtomicU64,
}

impl Default for DummyBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl DummyBackend {
    /// Create a new dummy backend in auto-complete mode.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(DummyState {
                next_gpu_address: GPU_ADDRESS_BASE,
                ..Default::default()
            }),
            next_id: AtomicU64::new(1),
        }
    }

    /// Create a dummy backend whose fences only advance when told to.
    pub fn manual() -> Self {
        let backend = Self::new();
        backend.set_manual_completion(true);
        backend
    }

    pub fn set_manual_completion(&self, manual: bool) {
        self.state.lock().manual = manual;
    }

    /// Let the GPU catch up with every signal queued so far.
    pub fn complete_all(&self) {
        let mut state = self.state.lock();
        for fence in state.fences.values_mut() {
            fence.completed = fence.signaled;
        }
    }

    /// Complete `fence` up to `value` (bounded by what was signaled).
    pub fn complete_fence(&self, fence: RawFence, value: u64) {
        if let Some(fence) = self.state.lock().fences.get_mut(&fence.0) {
            fence.completed = fence.completed.max(value.min(fence.signaled));
        }
    }

    /// Make every later fence query and submission report device removal.
    pub fn simulate_device_removed(&self) {
        log::trace!("DummyBackend: simulating device removal");
        self.state.lock().removed = Some("DXGI_ERROR_DEVICE_HUNG (simulated)".to_owned());
    }

    /// Make the next `count` fence queries or waits fail with
    /// [`BackendError::OutOfMemory`] without removing the device.
    pub fn inject_fence_faults(&self, count: u32) {
        self.state.lock().fence_faults = count;
    }

    pub fn is_removed(&self) -> bool {
        self.state.lock().removed.is_some()
    }

    /// Every command list executed so far, oldest first.
    pub fn executed(&self) -> Vec<ExecutedList> {
        self.state.lock().executed.clone()
    }

    /// Drain the executed command lists.
    pub fn take_executed(&self) -> Vec<ExecutedList> {
        std::mem::take(&mut self.state.lock().executed)
    }

    /// All queue-side waits recorded so far.
    pub fn queue_waits(&self) -> Vec<(QueueType, RawFence, u64)> {
        self.state.lock().queue_waits.clone()
    }

    /// Contents of a descriptor slot.
    pub fn descriptor(&self, heap: RawDescriptorHeap, index: u32) -> Option<DescriptorSource> {
        let state = self.state.lock();
        state
            .heaps
            .get(&heap.0)
            .and_then(|h| h.slots.get(index as usize).copied())
    }

    /// Bytes previously written into a buffer.
    pub fn buffer_contents(&self, resource: RawResource, offset: u64, len: usize) -> Vec<u8> {
        let state = self.state.lock();
        let Some(res) = state.resources.get(&resource.0) else {
            return Vec::new();
        };
        let start = (offset as usize).min(res.data.len());
        let end = (start + len).min(res.data.len());
        res.data[start..end].to_vec()
    }

    /// Descriptor of a live resource.
    pub fn resource_desc(&self, resource: RawResource) -> Option<ResourceDesc> {
        self.state
            .lock()
            .resources
            .get(&resource.0)
            .map(|r| r.info.desc.clone())
    }

    pub fn is_resource_alive(&self, resource: RawResource) -> bool {
        self.state.lock().resources.contains_key(&resource.0)
    }

    pub fn live_resource_count(&self) -> usize {
        self.state.lock().resources.len()
    }

    pub fn live_heap_count(&self) -> usize {
        self.state.lock().heaps.len()
    }

    pub fn stats(&self) -> DummyStats {
        self.state.lock().stats
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn take_fence_fault(state: &mut DummyState) -> Result<(), BackendError> {
        if state.fence_faults == 0 {
            return Ok(());
        }
        state.fence_faults -= 1;
        log::trace!("DummyBackend: injected fence fault");
        Err(BackendError::OutOfMemory)
    }

    fn check_removed(state: &DummyState) -> Result<(), BackendError> {
        match &state.removed {
            Some(reason) => Err(BackendError::DeviceRemoved {
                reason: reason.clone(),
            }),
            None => Ok(()),
        }
    }
}

impl Backend for DummyBackend {
    fn name(&self) -> &'static str {
        "Dummy"
    }

    fn create_resource(&self, info: &ResourceCreateInfo) -> Result<RawResource, BackendError> {
        let id = self.next_id();
        let mut state = self.state.lock();
        Self::check_removed(&state)?;

        let gpu_address = match &info.desc {
            ResourceDesc::Buffer(desc) => {
                if desc.size() == 0 {
                    return Err(BackendError::CreationFailed(
                        "zero-sized buffer".to_owned(),
                    ));
                }
                let address = state.next_gpu_address;
                state.next_gpu_address += kiln_core::alloc::align_up(desc.size(), GPU_ADDRESS_ALIGNMENT);
                address
            }
            ResourceDesc::Texture(desc) => {
                if desc.width == 0 || desc.height == 0 {
                    return Err(BackendError::CreationFailed(
                        "zero-sized texture".to_owned(),
                    ));
                }
                0
            }
        };

        log::trace!(
            "DummyBackend: creating resource {} {:?} ({} bytes)",
            id,
            info.desc.label(),
            info.desc.byte_size()
        );
        state.resources.insert(
            id,
            DummyResource {
                info: info.clone(),
                gpu_address,
                data: Vec::new(),
            },
        );
        state.stats.resources_created += 1;
        Ok(RawResource(id))
    }

    fn destroy_resource(&self, resource: RawResource) {
        let mut state = self.state.lock();
        if state.resources.remove(&resource.0).is_some() {
            log::trace!("DummyBackend: destroying resource {}", resource.0);
            state.stats.resources_destroyed += 1;
        } else {
            log::warn!("DummyBackend: destroying unknown resource {}", resource.0);
        }
    }

    fn gpu_address(&self, resource: RawResource) -> u64 {
        self.state
            .lock()
            .resources
            .get(&resource.0)
            .map_or(0, |r| r.gpu_address)
    }

    fn write_buffer(&self, resource: RawResource, offset: u64, data: &[u8]) -> Result<(), BackendError> {
        let mut state = self.state.lock();
        let res = state
            .resources
            .get_mut(&resource.0)
            .ok_or(BackendError::InvalidHandle {
                kind: "resource",
                id: resource.0,
            })?;
        let end = offset as usize + data.len();
        if res.data.len() < end {
            res.data.resize(end, 0);
        }
        res.data[offset as usize..end].copy_from_slice(data);
        Ok(())
    }

    fn create_descriptor_heap(
        &self,
        heap_type: DescriptorHeapType,
        capacity: u32,
        shader_visible: bool,
    ) -> Result<DescriptorHeapInfo, BackendError> {
        if shader_visible && !heap_type.can_be_shader_visible() {
            return Err(BackendError::Unsupported(format!(
                "{heap_type:?} heaps cannot be shader visible"
            )));
        }
        let id = self.next_id();
        let mut state = self.state.lock();
        Self::check_removed(&state)?;

        log::trace!("DummyBackend: creating {heap_type:?} heap {id} ({capacity} slots)");
        state.heaps.insert(
            id,
            DummyHeap {
                heap_type,
                slots: vec![DescriptorSource::Null; capacity as usize],
            },
        );
        state.stats.heaps_created += 1;
        let cpu_base = id * CPU_HEAP_STRIDE;
        Ok(DescriptorHeapInfo {
            raw: RawDescriptorHeap(id),
            cpu_base,
            gpu_base: shader_visible.then_some(cpu_base | (1 << 48)),
            increment_size: match heap_type {
                DescriptorHeapType::CbvSrvUav | DescriptorHeapType::Sampler => 32,
                DescriptorHeapType::Rtv => 32,
                DescriptorHeapType::Dsv => 8,
            },
        })
    }

    fn destroy_descriptor_heap(&self, heap: RawDescriptorHeap) {
        let mut state = self.state.lock();
        if state.heaps.remove(&heap.0).is_some() {
            log::trace!("DummyBackend: destroying heap {}", heap.0);
            state.stats.heaps_destroyed += 1;
        }
    }

    fn write_descriptor(&self, heap: RawDescriptorHeap, index: u32, source: &DescriptorSource) {
        let mut state = self.state.lock();
        match state.heaps.get_mut(&heap.0) {
            Some(h) => match h.slots.get_mut(index as usize) {
                Some(slot) => *slot = *source,
                None => log::warn!(
                    "DummyBackend: descriptor index {index} out of range for {:?} heap {}",
                    h.heap_type,
                    heap.0
                ),
            },
            None => log::warn!("DummyBackend: write into unknown heap {}", heap.0),
        }
    }

    fn copy_descriptors(
        &self,
        dst: RawDescriptorHeap,
        dst_index: u32,
        sources: &[(RawDescriptorHeap, u32)],
    ) {
        let mut state = self.state.lock();
        let values: Vec<DescriptorSource> = sources
            .iter()
            .map(|(heap, index)| {
                state
                    .heaps
                    .get(&heap.0)
                    .and_then(|h| h.slots.get(*index as usize).copied())
                    .unwrap_or(DescriptorSource::Null)
            })
            .collect();
        let Some(target) = state.heaps.get_mut(&dst.0) else {
            log::warn!("DummyBackend: copy into unknown heap {}", dst.0);
            return;
        };
        for (offset, value) in values.into_iter().enumerate() {
            if let Some(slot) = target.slots.get_mut(dst_index as usize + offset) {
                *slot = value;
            }
        }
        state.stats.descriptor_copies += sources.len() as u64;
    }

    fn create_fence(&self, initial_value: u64) -> Result<RawFence, BackendError> {
        let id = self.next_id();
        let mut state = self.state.lock();
        Self::check_removed(&state)?;
        state.fences.insert(
            id,
            DummyFence {
                signaled: initial_value,
                completed: initial_value,
            },
        );
        Ok(RawFence(id))
    }

    fn destroy_fence(&self, fence: RawFence) {
        self.state.lock().fences.remove(&fence.0);
    }

    fn fence_completed_value(&self, fence: RawFence) -> Result<u64, BackendError> {
        let mut state = self.state.lock();
        Self::check_removed(&state)?;
        Self::take_fence_fault(&mut state)?;
        state
            .fences
            .get(&fence.0)
            .map(|f| f.completed)
            .ok_or(BackendError::InvalidHandle {
                kind: "fence",
                id: fence.0,
            })
    }

    fn wait_fence(&self, fence: RawFence, value: u64) -> Result<(), BackendError> {
        let mut state = self.state.lock();
        Self::check_removed(&state)?;
        Self::take_fence_fault(&mut state)?;
        let f = state.fences.get_mut(&fence.0).ok_or(BackendError::InvalidHandle {
            kind: "fence",
            id: fence.0,
        })?;
        if f.completed >= value {
            return Ok(());
        }
        if f.signaled < value {
            return Err(BackendError::WaitNeverSignaled {
                fence: fence.0,
                value,
            });
        }
        // The simulated GPU finishes the awaited work while the CPU blocks.
        f.completed = value;
        Ok(())
    }

    fn queue_signal(&self, queue: QueueType, fence: RawFence, value: u64) -> Result<(), BackendError> {
        let mut state = self.state.lock();
        Self::check_removed(&state)?;
        let manual = state.manual;
        let f = state.fences.get_mut(&fence.0).ok_or(BackendError::InvalidHandle {
            kind: "fence",
            id: fence.0,
        })?;
        f.signaled = f.signaled.max(value);
        if !manual {
            f.completed = f.signaled;
        }
        log::trace!("DummyBackend: {queue:?} queue signals fence {} = {value}", fence.0);
        Ok(())
    }

    fn queue_wait(&self, queue: QueueType, fence: RawFence, value: u64) -> Result<(), BackendError> {
        let mut state = self.state.lock();
        Self::check_removed(&state)?;
        state.queue_waits.push((queue, fence, value));
        Ok(())
    }

    fn execute(&self, queue: QueueType, list: &CommandList) -> Result<(), BackendError> {
        let mut state = self.state.lock();
        Self::check_removed(&state)?;
        log::trace!(
            "DummyBackend: executing {} commands on {queue:?} queue",
            list.len()
        );
        state.executed.push(ExecutedList {
            queue,
            label: list.label().map(str::to_owned),
            commands: list.commands().to_vec(),
        });
        state.stats.lists_executed += 1;
        Ok(())
    }

    fn create_pipeline_state(&self, desc: &PipelineStateDesc) -> Result<RawPipeline, BackendError> {
        if desc.program.bytecode.is_empty() {
            return Err(BackendError::CreationFailed("empty shader program".to_owned()));
        }
        let id = self.next_id();
        let mut state = self.state.lock();
        Self::check_removed(&state)?;
        state.pipelines.insert(id, desc.fingerprint());
        state.stats.pipelines_created += 1;
        Ok(RawPipeline(id))
    }

    fn destroy_pipeline_state(&self, pipeline: RawPipeline) {
        self.state.lock().pipelines.remove(&pipeline.0);
    }

    fn crash_report(&self) -> Option<String> {
        let state = self.state.lock();
        state.removed.as_ref().map(|reason| {
            format!(
                "{reason}; {} command lists executed, last on {:?} queue",
                state.stats.lists_executed,
                state.executed.last().map(|l| l.queue)
            )
        })
    }
}

/// Convenience for tests: find commands of one kind across executed lists.
pub fn commands_matching<'a>(
    lists: &'a [ExecutedList],
    predicate: impl Fn(&Command) -> bool + 'a,
) -> impl Iterator<Item = &'a Command> + 'a {
    lists
        .iter()
        .flat_map(|l| l.commands.iter())
        .filter(move |c| predicate(*c))
}
