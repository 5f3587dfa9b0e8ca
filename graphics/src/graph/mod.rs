//! Render graph: declare passes, compile, execute.
//!
//! A [`RenderGraph`] lives for one frame. Passes are added with a setup
//! callback, which declares what the pass reads and writes through a
//! [`PassBuilder`], and an execute callback, which records commands through
//! a [`PassContext`]. Compilation derives the pass order, drops passes whose
//! output is never consumed, computes resource lifetimes and plans barriers.
//! Execution binds transient resources from the device's pool and transient
//! pages, records every pass and submits.
//!
//! # Example
//!
//! ```no_run
//! use kiln_graphics::graph::{PassDesc, RenderGraph};
//! use kiln_graphics::types::{ResourceState, TextureDesc, TextureFlags, TextureFormat};
//! # fn frame(device: &mut kiln_graphics::Device, back_buffer: &kiln_graphics::resources::Resource)
//! #     -> Result<(), kiln_graphics::graph::GraphError> {
//! let mut graph = RenderGraph::new();
//! let color = graph.import_texture("back buffer", back_buffer, Some(ResourceState::PRESENT));
//!
//! graph.add_pass(
//!     PassDesc::graphics("clear"),
//!     |builder| builder.color_target(color),
//!     |&color, pass| {
//!         let rtv = pass.render_target_view(color)?;
//!         pass.context().clear_color(rtv, [0.0, 0.0, 0.0, 1.0]);
//!         Ok(())
//!     },
//! );
//! graph.compile_and_execute(device)?;
//! # Ok(())
//! # }
//! ```

mod barrier;
mod compiler;
mod executor;
mod pass;
mod registry;

pub use barrier::{PassBarriers, PlannedBarrier, SPLIT_DISTANCE, required_state};
pub use compiler::CompiledGraph;
pub use executor::{ExecutionReport, PassContext};
pub use pass::{Access, AccessUsage, DepthAccess, PassBuilder, PassDesc, PassKind, PassState};
pub use registry::{
    BufferHandle, GraphResource, Lifetime, ResourceId, ResourceKind, ResourceRegistry, TEMP_BUFFER_ALIGNMENT,
    TextureHandle,
};

use crate::device::Device;
use crate::error::GraphicsError;
use crate::resources::Resource;
use crate::types::{BufferDesc, ResourceState, TextureDesc};

use pass::PassNode;

/// Handle to a pass in the render graph.
///
/// Only valid within the `RenderGraph` that created it. Ordering follows
/// registration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PassId(pub(crate) u32);

impl PassId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Failure reported by an execute callback.
#[derive(Debug, thiserror::Error)]
pub enum PassError {
    #[error(transparent)]
    Graphics(#[from] GraphicsError),

    #[error("resource '{0}' is not bound")]
    MissingResource(String),

    #[error("{0}")]
    Message(String),
}

impl PassError {
    pub fn msg(message: impl Into<String>) -> Self {
        Self::Message(message.into())
    }
}

/// Errors from compiling or executing a graph.
#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    /// The declared dependencies form a cycle.
    #[error("render graph contains a cyclic dependency")]
    CyclicDependency,

    /// An execute callback failed; later passes were skipped.
    #[error("render graph pass '{pass}' failed: {source}")]
    PassFailed {
        pass: String,
        #[source]
        source: PassError,
    },

    #[error(transparent)]
    Graphics(#[from] GraphicsError),
}

impl PartialEq for GraphError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::CyclicDependency, Self::CyclicDependency) => true,
            (Self::PassFailed { pass: a, .. }, Self::PassFailed { pass: b, .. }) => a == b,
            (Self::Graphics(a), Self::Graphics(b)) => a == b,
            _ => false,
        }
    }
}

/// The passes and resources of one frame.
#[derive(Debug, Default)]
pub struct RenderGraph<'g> {
    registry: ResourceRegistry<'g>,
    passes: Vec<PassNode<'g>>,
    /// Explicit `(dependent, dependency)` edges.
    dependencies: Vec<(PassId, PassId)>,
    states: Vec<PassState>,
    compiled: Option<CompiledGraph>,
}

impl<'g> RenderGraph<'g> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a pass. `setup` runs immediately; its result is handed to
    /// `execute` when the graph runs.
    pub fn add_pass<D: 'g>(
        &mut self,
        desc: PassDesc,
        setup: impl FnOnce(&mut PassBuilder<'_, 'g>) -> D,
        execute: impl FnOnce(&D, &mut PassContext<'_, 'g>) -> Result<(), PassError> + 'g,
    ) -> PassId {
        let id = PassId(self.passes.len() as u32);
        self.compiled = None;
        self.states.push(PassState::Registered);

        let mut node = PassNode::new(desc);
        let data = setup(&mut PassBuilder {
            pass: id,
            node: &mut node,
            registry: &mut self.registry,
        });
        node.execute = Some(Box::new(move |ctx: &mut PassContext<'_, 'g>| execute(&data, ctx)));
        log::trace!("graph: added pass '{}' as {:?}", node.desc.name, id);

        self.passes.push(node);
        self.states[id.index()] = PassState::Described;
        id
    }

    /// Order `dependent` after `dependency` regardless of resources.
    pub fn add_dependency(&mut self, dependent: PassId, dependency: PassId) {
        if dependent.index() >= self.passes.len() || dependency.index() >= self.passes.len() {
            kiln_core::contract_violation!("dependency between unknown passes {:?} -> {:?}", dependency, dependent);
        }
        if dependent == dependency {
            kiln_core::contract_violation!("pass {:?} cannot depend on itself", dependent);
        }
        self.compiled = None;
        self.dependencies.push((dependent, dependency));
    }

    pub fn create_texture(&mut self, name: &str, desc: TextureDesc) -> TextureHandle {
        self.registry.create_texture(name, desc)
    }

    pub fn create_buffer(&mut self, name: &str, desc: BufferDesc) -> BufferHandle {
        self.registry.create_buffer(name, desc)
    }

    /// Use an externally owned texture, left in `final_state` afterwards.
    /// Passes writing it are never culled.
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

    pub fn registry(&self) -> &ResourceRegistry<'g> {
        &self.registry
    }

    pub fn pass_count(&self) -> usize {
        self.passes.len()
    }

    pub fn pass_name(&self, pass: PassId) -> &str {
        &self.passes[pass.index()].desc.name
    }

    pub fn pass_kind(&self, pass: PassId) -> PassKind {
        self.passes[pass.index()].desc.kind
    }

    pub fn find_pass(&self, name: &str) -> Option<PassId> {
        self.passes
            .iter()
            .position(|p| p.desc.name == name)
            .map(|i| PassId(i as u32))
    }

    pub fn pass_state(&self, pass: PassId) -> PassState {
        self.states[pass.index()]
    }

    /// Build edges, cull, sort, compute lifetimes and plan barriers.
    pub fn compile(&mut self) -> Result<&CompiledGraph, GraphError> {
        let compiled = compiler::compile(&self.passes, &mut self.registry, &self.dependencies)?;
        for (index, state) in self.states.iter_mut().enumerate() {
            *state = if compiled.is_live(PassId(index as u32)) {
                PassState::Scheduled
            } else {
                PassState::Dead
            };
        }
        Ok(self.compiled.insert(compiled))
    }

    pub fn compiled(&self) -> Option<&CompiledGraph> {
        self.compiled.as_ref()
    }

    /// Compile if needed, then record and submit every live pass.
    pub fn compile_and_execute(&mut self, device: &mut Device) -> Result<ExecutionReport, GraphError> {
        if self.compiled.is_none() {
            self.compile()?;
        }
        let Some(compiled) = self.compiled.take() else {
            return Err(GraphError::CyclicDependency);
        };
        let result = executor::run(
            &mut self.passes,
            &mut self.registry,
            &mut self.states,
            &compiled,
            device,
        );
        self.compiled = Some(compiled);
        result
    }
}
