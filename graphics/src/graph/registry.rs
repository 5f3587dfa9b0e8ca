//! Graph resource bookkeeping.
//!
//! Resources are declared by name during setup and referenced by
//! [`ResourceId`] afterwards. Each entry remembers which passes produce it
//! and, after compilation, the span of sorted positions in which it is
//! alive. At execution the registry materializes entries at the start of
//! their lifetime and hands them back at the end.

use kiln_core::intern::{Interner, Symbol};

use crate::device::Device;
use crate::error::GraphicsError;
use crate::memory::BufferSlice;
use crate::resources::Resource;
use crate::types::{BufferDesc, ResourceDesc, ResourceState, TextureDesc};

use super::PassId;

/// Placement alignment of temporary buffers.
pub const TEMP_BUFFER_ALIGNMENT: u64 = 256;

/// Index of a resource inside one graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId(pub(crate) u32);

impl ResourceId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// A texture declared in or imported into a graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureHandle(pub(crate) ResourceId);

/// A buffer declared in or imported into a graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferHandle(pub(crate) ResourceId);

impl TextureHandle {
    pub fn id(self) -> ResourceId {
        self.0
    }
}

impl BufferHandle {
    pub fn id(self) -> ResourceId {
        self.0
    }
}

/// How a graph resource is backed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    /// Sub-allocated from the frame's transient buffer pages.
    Temp,
    /// Rented from the device pool for the span of its lifetime.
    Pooled,
    /// Owned outside the graph.
    External,
}

/// Inclusive span of sorted pass positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lifetime {
    pub min: usize,
    pub max: usize,
}

impl Lifetime {
    pub fn contains(&self, position: usize) -> bool {
        (self.min..=self.max).contains(&position)
    }
}

#[derive(Debug)]
pub(crate) enum Backing<'g> {
    Unbound,
    Pooled(Resource),
    Temp(BufferSlice),
    External(&'g Resource),
}

#[derive(Debug)]
pub struct GraphResource<'g> {
    name: Symbol,
    kind: ResourceKind,
    desc: ResourceDesc,
    producers: Vec<PassId>,
    lifetime: Option<Lifetime>,
    final_state: Option<ResourceState>,
    pub(crate) backing: Backing<'g>,
}

impl GraphResource<'_> {
    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    pub fn desc(&self) -> &ResourceDesc {
        &self.desc
    }

    pub fn producers(&self) -> &[PassId] {
        &self.producers
    }

    pub fn lifetime(&self) -> Option<Lifetime> {
        self.lifetime
    }

    /// State an external resource is left in after the graph.
    pub fn final_state(&self) -> Option<ResourceState> {
        self.final_state
    }

    pub fn is_depth(&self) -> bool {
        self.desc
            .as_texture()
            .is_some_and(|t| t.format.is_depth_stencil())
    }

    pub fn is_materialized(&self) -> bool {
        !matches!(self.backing, Backing::Unbound)
    }

    /// The backing resource, if it is a whole resource.
    pub fn resource(&self) -> Option<&Resource> {
        match &self.backing {
            Backing::Pooled(resource) => Some(resource),
            Backing::External(resource) => Some(resource),
            Backing::Temp(_) | Backing::Unbound => None,
        }
    }

    /// The bound range for buffers.
    pub fn buffer_slice(&self) -> Option<BufferSlice> {
        if let Backing::Temp(slice) = &self.backing {
            return Some(*slice);
        }
        let resource = self.resource().filter(|r| !r.desc().is_texture())?;
        Some(BufferSlice {
            resource: resource.raw(),
            gpu_address: resource.gpu_address(),
            offset: 0,
            size: resource.desc().byte_size(),
        })
    }
}

/// Every resource of one graph, in declaration order.
#[derive(Debug, Default)]
pub struct ResourceRegistry<'g> {
    names: Interner,
    entries: Vec<GraphResource<'g>>,
}

impl<'g> ResourceRegistry<'g> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, id: ResourceId) -> &GraphResource<'g> {
        match self.entries.get(id.index()) {
            Some(entry) => entry,
            None => kiln_core::contract_violation!("unknown graph resource {:?}", id),
        }
    }

    fn get_mut(&mut self, id: ResourceId) -> &mut GraphResource<'g> {
        match self.entries.get_mut(id.index()) {
            Some(entry) => entry,
            None => kiln_core::contract_violation!("unknown graph resource {:?}", id),
        }
    }

    pub fn name(&self, id: ResourceId) -> &str {
        self.names.resolve(self.get(id).name)
    }

    /// Look a resource up by the name it was declared with.
    pub fn find(&self, name: &str) -> Option<ResourceId> {
        let symbol = self.names.get(name)?;
        self.entries
            .iter()
            .position(|e| e.name == symbol)
            .map(|i| ResourceId(i as u32))
    }

    pub fn iter(&self) -> impl Iterator<Item = (ResourceId, &GraphResource<'g>)> {
        self.entries
            .iter()
            .enumerate()
            .map(|(i, e)| (ResourceId(i as u32), e))
    }

    fn insert(
        &mut self,
        name: &str,
        kind: ResourceKind,
        desc: ResourceDesc,
        final_state: Option<ResourceState>,
        backing: Backing<'g>,
    ) -> ResourceId {
        if self.names.get(name).is_some() {
            kiln_core::contract_violation!("graph resource '{}' declared twice", name);
        }
        let id = ResourceId(self.entries.len() as u32);
        self.entries.push(GraphResource {
            name: self.names.intern(name),
            kind,
            desc,
            producers: Vec::new(),
            lifetime: None,
            final_state,
            backing,
        });
        id
    }

    /// Declare a texture rented from the pool while it is alive.
    pub fn create_texture(&mut self, name: &str, desc: TextureDesc) -> TextureHandle {
        TextureHandle(self.insert(name, ResourceKind::Pooled, desc.into(), None, Backing::Unbound))
    }

    /// Declare a buffer sub-allocated from transient pages.
    pub fn create_buffer(&mut self, name: &str, desc: BufferDesc) -> BufferHandle {
        BufferHandle(self.insert(name, ResourceKind::Temp, desc.into(), None, Backing::Unbound))
    }

    pub fn import_texture(
        &mut self,
        name: &str,
        resource: &'g Resource,
        final_state: Option<ResourceState>,
    ) -> TextureHandle {
        if !resource.desc().is_texture() {
            kiln_core::contract_violation!("imported '{}' as a texture but it is a buffer", name);
        }
        TextureHandle(self.insert(
            name,
            ResourceKind::External,
            resource.desc().clone(),
            final_state,
            Backing::External(resource),
        ))
    }

    pub fn import_buffer(
        &mut self,
        name: &str,
        resource: &'g Resource,
        final_state: Option<ResourceState>,
    ) -> BufferHandle {
        if resource.desc().is_texture() {
            kiln_core::contract_violation!("imported '{}' as a buffer but it is a texture", name);
        }
        BufferHandle(self.insert(
            name,
            ResourceKind::External,
            resource.desc().clone(),
            final_state,
            Backing::External(resource),
        ))
    }

    /// Record `pass` as a producer of `id`. Producers stay sorted.
    pub fn add_producer(&mut self, id: ResourceId, pass: PassId) {
        let producers = &mut self.get_mut(id).producers;
        if let Err(at) = producers.binary_search(&pass) {
            producers.insert(at, pass);
        }
    }

    /// Greatest producer strictly before `pass`.
    pub fn last_producer_before(&self, id: ResourceId, pass: PassId) -> Option<PassId> {
        let producers = &self.get(id).producers;
        let at = producers.partition_point(|&p| p < pass);
        at.checked_sub(1).map(|i| producers[i])
    }

    /// Extend the lifetime of `id` to cover `position`.
    pub fn set_alive(&mut self, id: ResourceId, position: usize) {
        let entry = self.get_mut(id);
        entry.lifetime = Some(match entry.lifetime {
            Some(l) => Lifetime {
                min: l.min.min(position),
                max: l.max.max(position),
            },
            None => Lifetime {
                min: position,
                max: position,
            },
        });
    }

    pub(crate) fn reset_lifetimes(&mut self) {
        for entry in &mut self.entries {
            entry.lifetime = None;
        }
    }

    /// Bind backing memory to `id`. External resources are always bound.
    pub fn request_resource(&mut self, id: ResourceId, device: &mut Device) -> Result<(), GraphicsError> {
        let entry = self.get_mut(id);
        if entry.is_materialized() {
            return Ok(());
        }
        entry.backing = match (entry.kind, &entry.desc) {
            (ResourceKind::Pooled, desc) => Backing::Pooled(device.rent(desc)?),
            (ResourceKind::Temp, desc) => {
                Backing::Temp(device.allocate_transient(desc.byte_size(), TEMP_BUFFER_ALIGNMENT)?)
            }
            (ResourceKind::External, _) => return Ok(()),
        };
        log::trace!("graph: materialized {:?} ({:?})", id, entry.kind);
        Ok(())
    }

    /// Return the backing memory of `id`.
    ///
    /// Pooled resources go back to the pool; temporary slices are reclaimed
    /// with their page at the end of the frame.
    pub fn release_resource(&mut self, id: ResourceId, device: &mut Device) {
        let entry = self.get_mut(id);
        if entry.kind == ResourceKind::External {
            return;
        }
        match std::mem::replace(&mut entry.backing, Backing::Unbound) {
            Backing::Pooled(resource) => device.give_back(resource),
            Backing::Temp(_) | Backing::Unbound | Backing::External(_) => {}
        }
    }

    /// Release everything still bound.
    pub fn release_all(&mut self, device: &mut Device) {
        for index in 0..self.entries.len() {
            self.release_resource(ResourceId(index as u32), device);
        }
    }
}
