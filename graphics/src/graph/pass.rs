//! Pass declarations and the setup-time builder.

use std::fmt;

use crate::resources::Resource;
use crate::types::{BufferDesc, QueueType, ResourceState, TextureDesc};

use super::PassId;
use super::executor::PassContext;
use super::registry::{BufferHandle, ResourceId, ResourceRegistry, TextureHandle};
use super::PassError;

/// What a pass does, which decides its queue and required states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PassKind {
    Graphics,
    Compute,
    /// Compute work on the parallel compute queue.
    AsyncCompute,
    /// Copies.
    Blit,
}

impl PassKind {
    /// Queue the pass is recorded on.
    pub fn queue(self) -> QueueType {
        match self {
            Self::Graphics | Self::Compute | Self::Blit => QueueType::Graphics,
            Self::AsyncCompute => QueueType::Compute,
        }
    }

    pub fn is_async(self) -> bool {
        matches!(self, Self::AsyncCompute)
    }
}

/// Name and kind of a pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassDesc {
    pub name: String,
    pub kind: PassKind,
}

impl PassDesc {
    pub fn new(name: impl Into<String>, kind: PassKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }

    pub fn graphics(name: impl Into<String>) -> Self {
        Self::new(name, PassKind::Graphics)
    }

    pub fn compute(name: impl Into<String>) -> Self {
        Self::new(name, PassKind::Compute)
    }

    pub fn async_compute(name: impl Into<String>) -> Self {
        Self::new(name, PassKind::AsyncCompute)
    }

    pub fn blit(name: impl Into<String>) -> Self {
        Self::new(name, PassKind::Blit)
    }
}

/// Lifecycle of a pass.
///
/// ```text
/// Registered ─setup─▶ Described ─culled─▶ Dead
///                              └─live──▶ Scheduled ─barriers─▶ Ready ─execute─▶ Finished
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PassState {
    Registered,
    Described,
    Dead,
    Scheduled,
    Ready,
    Finished,
}

/// How a pass touches a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessUsage {
    Read,
    Write,
    ReadWrite,
    ColorTarget,
    DepthWrite,
    DepthRead,
}

impl AccessUsage {
    pub fn is_read(self) -> bool {
        matches!(self, Self::Read | Self::ReadWrite | Self::DepthRead)
    }

    pub fn is_write(self) -> bool {
        matches!(
            self,
            Self::Write | Self::ReadWrite | Self::ColorTarget | Self::DepthWrite
        )
    }
}

/// Depth attachment mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DepthAccess {
    Write,
    ReadOnly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Access {
    pub resource: ResourceId,
    pub usage: AccessUsage,
}

pub(crate) type ExecuteFn<'g> = Box<dyn FnOnce(&mut PassContext<'_, 'g>) -> Result<(), PassError> + 'g>;

pub(crate) struct PassNode<'g> {
    pub(crate) desc: PassDesc,
    pub(crate) accesses: Vec<Access>,
    pub(crate) allow_culling: bool,
    pub(crate) deadline: Option<String>,
    pub(crate) execute: Option<ExecuteFn<'g>>,
}

impl fmt::Debug for PassNode<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PassNode")
            .field("desc", &self.desc)
            .field("accesses", &self.accesses)
            .field("allow_culling", &self.allow_culling)
            .field("deadline", &self.deadline)
            .finish_non_exhaustive()
    }
}

impl<'g> PassNode<'g> {
    pub(crate) fn new(desc: PassDesc) -> Self {
        Self {
            desc,
            accesses: Vec::new(),
            allow_culling: true,
            deadline: None,
            execute: None,
        }
    }

    pub(crate) fn reads(&self) -> impl Iterator<Item = ResourceId> + '_ {
        self.accesses
            .iter()
            .filter(|a| a.usage.is_read())
            .map(|a| a.resource)
    }

    pub(crate) fn writes(&self) -> impl Iterator<Item = ResourceId> + '_ {
        self.accesses
            .iter()
            .filter(|a| a.usage.is_write())
            .map(|a| a.resource)
    }

    pub(crate) fn touched(&self) -> impl Iterator<Item = ResourceId> + '_ {
        let mut seen: Vec<ResourceId> = Vec::with_capacity(self.accesses.len());
        self.accesses.iter().filter_map(move |a| {
            if seen.contains(&a.resource) {
                None
            } else {
                seen.push(a.resource);
                Some(a.resource)
            }
        })
    }

    pub(crate) fn usages_of(&self, id: ResourceId) -> impl Iterator<Item = AccessUsage> + '_ {
        self.accesses
            .iter()
            .filter(move |a| a.resource == id)
            .map(|a| a.usage)
    }
}

/// Declares the resources a pass uses. Handed to the setup callback.
pub struct PassBuilder<'a, 'g> {
    pub(crate) pass: PassId,
    pub(crate) node: &'a mut PassNode<'g>,
    pub(crate) registry: &'a mut ResourceRegistry<'g>,
}

impl<'g> PassBuilder<'_, 'g> {
    pub fn pass(&self) -> PassId {
        self.pass
    }

    pub fn kind(&self) -> PassKind {
        self.node.desc.kind
    }

    pub fn create_texture(&mut self, name: &str, desc: TextureDesc) -> TextureHandle {
        self.registry.create_texture(name, desc)
    }

    pub fn create_buffer(&mut self, name: &str, desc: BufferDesc) -> BufferHandle {
        self.registry.create_buffer(name, desc)
    }

    pub fn import_texture(
        &mut self,
        name: &str,
        resource: &'g Resource,
        final_state: Option<ResourceState>,
    ) -> TextureHandle {
        self.registry.import_texture(name, resource, final_state)
    }

    pub fn import_buffer(
        &mut self,
        name: &str,
        resource: &'g Resource,
        final_state: Option<ResourceState>,
    ) -> BufferHandle {
        self.registry.import_buffer(name, resource, final_state)
    }

    pub fn read_texture(&mut self, texture: TextureHandle) -> TextureHandle {
        self.access(texture.0, AccessUsage::Read);
        texture
    }

    pub fn write_texture(&mut self, texture: TextureHandle) -> TextureHandle {
        self.access(texture.0, AccessUsage::Write);
        texture
    }

    pub fn read_write_texture(&mut self, texture: TextureHandle) -> TextureHandle {
        self.access(texture.0, AccessUsage::ReadWrite);
        texture
    }

    pub fn read_buffer(&mut self, buffer: BufferHandle) -> BufferHandle {
        self.access(buffer.0, AccessUsage::Read);
        buffer
    }

    pub fn write_buffer(&mut self, buffer: BufferHandle) -> BufferHandle {
        self.access(buffer.0, AccessUsage::Write);
        buffer
    }

    pub fn read_write_buffer(&mut self, buffer: BufferHandle) -> BufferHandle {
        self.access(buffer.0, AccessUsage::ReadWrite);
        buffer
    }

    /// Bind `texture` as a color render target.
    pub fn color_target(&mut self, texture: TextureHandle) -> TextureHandle {
        self.require_graphics("color target");
        self.access(texture.0, AccessUsage::ColorTarget);
        texture
    }

    pub fn depth_target(&mut self, texture: TextureHandle, mode: DepthAccess) -> TextureHandle {
        self.require_graphics("depth target");
        if !self.registry.get(texture.0).is_depth() {
            kiln_core::contract_violation!(
                "'{}' bound as depth target but has no depth format",
                self.registry.name(texture.0)
            );
        }
        let usage = match mode {
            DepthAccess::Write => AccessUsage::DepthWrite,
            DepthAccess::ReadOnly => AccessUsage::DepthRead,
        };
        self.access(texture.0, usage);
        texture
    }

    /// Whether the pass may be dropped when nothing consumes its output.
    pub fn allow_culling(&mut self, allow: bool) -> &mut Self {
        self.node.allow_culling = allow;
        self
    }

    /// Name the graphics pass by which this async pass must have finished.
    pub fn deadline(&mut self, pass_name: &str) -> &mut Self {
        if !self.node.desc.kind.is_async() {
            kiln_core::contract_violation!(
                "deadline set on '{}', which is not an async compute pass",
                self.node.desc.name
            );
        }
        self.node.deadline = Some(pass_name.to_owned());
        self
    }

    fn require_graphics(&self, what: &str) {
        if self.node.desc.kind != PassKind::Graphics {
            kiln_core::contract_violation!(
                "{} declared on {:?} pass '{}'",
                what,
                self.node.desc.kind,
                self.node.desc.name
            );
        }
    }

    fn access(&mut self, id: ResourceId, usage: AccessUsage) {
        for existing in self.node.usages_of(id) {
            if existing == usage {
                return;
            }
            let mixed = (existing.is_write() || usage.is_write())
                && !(existing == AccessUsage::ReadWrite || usage == AccessUsage::ReadWrite);
            let two_writes = existing.is_write() && usage.is_write();
            if mixed || two_writes {
                kiln_core::contract_violation!(
                    "pass '{}' uses '{}' as both {:?} and {:?}; declare read_write instead",
                    self.node.desc.name,
                    self.registry.name(id),
                    existing,
                    usage
                );
            }
        }
        if usage.is_write() {
            self.registry.add_producer(id, self.pass);
        }
        self.node.accesses.push(Access { resource: id, usage });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{TextureFlags, TextureFormat};

    fn builder<'a, 'g>(node: &'a mut PassNode<'g>, registry: &'a mut ResourceRegistry<'g>) -> PassBuilder<'a, 'g> {
        PassBuilder {
            pass: PassId(0),
            node,
            registry,
        }
    }

    #[test]
    fn test_queue_mapping() {
        assert_eq!(PassKind::Graphics.queue(), QueueType::Graphics);
        assert_eq!(PassKind::Compute.queue(), QueueType::Graphics);
        assert_eq!(PassKind::Blit.queue(), QueueType::Graphics);
        assert_eq!(PassKind::AsyncCompute.queue(), QueueType::Compute);
    }

    #[test]
    fn test_writes_register_producer() {
        let mut registry = ResourceRegistry::new();
        let mut node = PassNode::new(PassDesc::graphics("p"));
        let mut b = builder(&mut node, &mut registry);
        let t = b.create_texture(
            "t",
            TextureDesc::new_2d(4, 4, TextureFormat::Rgba8Unorm, TextureFlags::RENDER_TARGET),
        );
        b.color_target(t);
        assert_eq!(registry.get(t.id()).producers(), &[PassId(0)]);
        assert_eq!(node.writes().collect::<Vec<_>>(), vec![t.id()]);
        assert_eq!(node.reads().count(), 0);
    }

    #[test]
    fn test_depth_read_and_sample_combine() {
        let mut registry = ResourceRegistry::new();
        let mut node = PassNode::new(PassDesc::graphics("p"));
        let mut b = builder(&mut node, &mut registry);
        let depth = b.create_texture(
            "depth",
            TextureDesc::new_2d(4, 4, TextureFormat::Depth32Float, TextureFlags::DEPTH_STENCIL),
        );
        b.depth_target(depth, DepthAccess::ReadOnly);
        b.read_texture(depth);
        assert_eq!(node.usages_of(depth.id()).count(), 2);
        assert_eq!(node.touched().count(), 1);
    }

    #[test]
    #[should_panic(expected = "declare read_write")]
    fn test_read_and_write_without_rmw_panics() {
        let mut registry = ResourceRegistry::new();
        let mut node = PassNode::new(PassDesc::compute("p"));
        let mut b = builder(&mut node, &mut registry);
        let t = b.create_texture(
            "t",
            TextureDesc::new_2d(4, 4, TextureFormat::Rgba8Unorm, TextureFlags::UNORDERED_ACCESS),
        );
        b.read_texture(t);
        b.write_texture(t);
    }

    #[test]
    fn test_read_write_is_allowed() {
        let mut registry = ResourceRegistry::new();
        let mut node = PassNode::new(PassDesc::compute("p"));
        let mut b = builder(&mut node, &mut registry);
        let t = b.create_texture(
            "t",
            TextureDesc::new_2d(4, 4, TextureFormat::Rgba8Unorm, TextureFlags::UNORDERED_ACCESS),
        );
        b.read_write_texture(t);
        b.read_texture(t);
        assert_eq!(node.reads().count(), 2);
        assert_eq!(node.writes().count(), 1);
    }

    #[test]
    #[should_panic(expected = "not an async compute pass")]
    fn test_deadline_requires_async() {
        let mut registry = ResourceRegistry::new();
        let mut node = PassNode::new(PassDesc::graphics("p"));
        builder(&mut node, &mut registry).deadline("later");
    }
}
