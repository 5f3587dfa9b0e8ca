//! Descriptor tables staged per command context.
//!
//! A root signature declares which root parameters are descriptor tables.
//! Callers stage CPU handles into those tables between draws; `commit`
//! copies every dirty table into the online heaps in one batch per heap type
//! and produces the commands that bind them.
//!
//! A command list can only reference tables in the heaps currently bound
//! with `SetDescriptorHeaps`. When an online heap rolls over, every table of
//! that type is copied again into the new heap and the heaps are rebound.

use kiln_core::FenceValue;

use super::heap::{CpuDescriptorHandle, GpuDescriptorHandle};
use super::ring::OnlineViewRing;
use super::rollover::{OnlineDescriptorAllocator, Rollover};
use super::sampler_cache::SamplerCache;
use crate::backend::RawDescriptorHeap;
use crate::command::Command;
use crate::error::GraphicsError;
use crate::pipeline::{BindPoint, RootParameter, RootSignatureDesc};
use crate::types::DescriptorHeapType;

/// The online allocators and fence values a commit runs against.
pub struct OnlineHeaps<'a> {
    pub views: &'a mut Rollover<OnlineViewRing>,
    pub samplers: &'a mut Rollover<SamplerCache>,
    /// Staged in place of slots the caller left empty.
    pub null_view: CpuDescriptorHandle,
    pub null_sampler: CpuDescriptorHandle,
    pub fence: FenceValue,
    pub completed: FenceValue,
}

#[derive(Debug, Clone)]
struct StagedTable {
    root_index: u32,
    heap_type: DescriptorHeapType,
    handles: Vec<Option<CpuDescriptorHandle>>,
    dirty: bool,
}

#[derive(Debug, Default)]
pub struct DescriptorTableCache {
    bind_point: BindPoint,
    tables: Vec<StagedTable>,
    bound_views: Option<RawDescriptorHeap>,
    bound_samplers: Option<RawDescriptorHeap>,
}

impl DescriptorTableCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind_point(&self) -> BindPoint {
        self.bind_point
    }

    /// Adopt the tables of a new root signature. Staged handles are dropped;
    /// the heaps bound on the command list stay bound.
    pub fn reset(&mut self, layout: &RootSignatureDesc, bind_point: BindPoint) {
        self.bind_point = bind_point;
        self.tables.clear();
        for (root_index, parameter) in layout.parameters.iter().enumerate() {
            if let RootParameter::DescriptorTable { heap_type, len } = *parameter {
                if !heap_type.can_be_shader_visible() {
                    kiln_core::contract_violation!(
                        "root parameter {root_index} is a {heap_type:?} table; only view and sampler tables are allowed"
                    );
                }
                self.tables.push(StagedTable {
                    root_index: root_index as u32,
                    heap_type,
                    handles: vec![None; len as usize],
                    dirty: len > 0,
                });
            }
        }
    }

    /// Stage `handles` into the table at `root_index`, starting at `offset`.
    pub fn stage(&mut self, root_index: u32, offset: u32, handles: &[CpuDescriptorHandle]) {
        let Some(table) = self.tables.iter_mut().find(|t| t.root_index == root_index) else {
            kiln_core::contract_violation!("root parameter {root_index} is not a descriptor table");
        };
        let end = offset as usize + handles.len();
        if end > table.handles.len() {
            kiln_core::contract_violation!(
                "{} descriptors at offset {offset} overflow table {root_index} of {}",
                handles.len(),
                table.handles.len()
            );
        }
        for (slot, handle) in table.handles[offset as usize..end].iter_mut().zip(handles) {
            if *slot != Some(*handle) {
                *slot = Some(*handle);
                table.dirty = true;
            }
        }
    }

    pub fn is_dirty(&self) -> bool {
        self.tables.iter().any(|t| t.dirty)
    }

    pub fn bound_heaps(&self) -> (Option<RawDescriptorHeap>, Option<RawDescriptorHeap>) {
        (self.bound_views, self.bound_samplers)
    }

    /// Copy dirty tables into the online heaps and return the bind commands.
    pub fn commit(&mut self, heaps: &mut OnlineHeaps<'_>) -> Result<Vec<Command>, GraphicsError> {
        let mut bound = Vec::new();
        let views_changed = commit_kind(
            &mut self.tables,
            DescriptorHeapType::CbvSrvUav,
            heaps.views,
            &mut self.bound_views,
            heaps.null_view,
            heaps.fence,
            heaps.completed,
            &mut bound,
        )?;
        let samplers_changed = commit_kind(
            &mut self.tables,
            DescriptorHeapType::Sampler,
            heaps.samplers,
            &mut self.bound_samplers,
            heaps.null_sampler,
            heaps.fence,
            heaps.completed,
            &mut bound,
        )?;

        let mut commands = Vec::with_capacity(bound.len() + 1);
        if views_changed || samplers_changed {
            commands.push(Command::SetDescriptorHeaps {
                views: self.bound_views,
                samplers: self.bound_samplers,
            });
        }
        bound.sort_by_key(|(root_index, _)| *root_index);
        commands.extend(bound.into_iter().map(|(root_index, base)| {
            Command::SetRootDescriptorTable {
                bind_point: self.bind_point,
                root_index,
                base,
            }
        }));
        Ok(commands)
    }
}

/// Commit the tables of one heap type. Returns true if the bound heap changed.
#[allow(clippy::too_many_arguments)]
fn commit_kind<A: OnlineDescriptorAllocator>(
    tables: &mut [StagedTable],
    heap_type: DescriptorHeapType,
    rollover: &mut Rollover<A>,
    bound: &mut Option<RawDescriptorHeap>,
    null: CpuDescriptorHandle,
    fence: FenceValue,
    completed: FenceValue,
    out: &mut Vec<(u32, GpuDescriptorHandle)>,
) -> Result<bool, GraphicsError> {
    let of_kind: Vec<usize> = tables
        .iter()
        .enumerate()
        .filter(|(_, t)| t.heap_type == heap_type && !t.handles.is_empty())
        .map(|(i, _)| i)
        .collect();
    let dirty: Vec<usize> = of_kind
        .iter()
        .copied()
        .filter(|&i| tables[i].dirty)
        .collect();
    if dirty.is_empty() {
        return Ok(false);
    }

    let stale = *bound != Some(rollover.heap_raw());
    let mut selected = if stale { of_kind.clone() } else { dirty };
    let mut handles = allocate(tables, &selected, rollover, null, fence, completed)?;

    // A rollover during this batch moved it to a new heap; the clean tables
    // still live in the old one.
    if *bound != Some(rollover.heap_raw()) && selected.len() != of_kind.len() {
        selected = of_kind;
        handles = allocate(tables, &selected, rollover, null, fence, completed)?;
    }

    for (&i, handle) in selected.iter().zip(handles) {
        tables[i].dirty = false;
        out.push((tables[i].root_index, handle));
    }
    let heap = rollover.heap_raw();
    let changed = *bound != Some(heap);
    *bound = Some(heap);
    Ok(changed)
}

fn allocate<A: OnlineDescriptorAllocator>(
    tables: &[StagedTable],
    selected: &[usize],
    rollover: &mut Rollover<A>,
    null: CpuDescriptorHandle,
    fence: FenceValue,
    completed: FenceValue,
) -> Result<Vec<GpuDescriptorHandle>, GraphicsError> {
    let blocks: Vec<Vec<CpuDescriptorHandle>> = selected
        .iter()
        .map(|&i| {
            tables[i]
                .handles
                .iter()
                .map(|h| h.unwrap_or(null))
                .collect()
        })
        .collect();
    let refs: Vec<&[CpuDescriptorHandle]> = blocks.iter().map(Vec::as_slice).collect();
    rollover.allocate_many(fence, completed, &refs)
}
