//! Barrier planning over the sorted pass order.
//!
//! The plan is computed from declared accesses only. At execution each
//! planned transition is applied against the resource's tracked state, so a
//! plan entry whose state is already reached records nothing.

use crate::command::BarrierSplit;
use crate::types::{QueueType, ResourceState};

use super::PassId;
use super::pass::{AccessUsage, PassKind, PassNode};
use super::registry::{ResourceId, ResourceKind, ResourceRegistry};

/// Minimum distance between two accesses for a transition to be split.
pub const SPLIT_DISTANCE: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlannedBarrier {
    Transition {
        resource: ResourceId,
        after: ResourceState,
        split: BarrierSplit,
    },
    Uav {
        resource: ResourceId,
    },
}

impl PlannedBarrier {
    pub fn resource(&self) -> ResourceId {
        match *self {
            Self::Transition { resource, .. } | Self::Uav { resource } => resource,
        }
    }
}

/// Barriers around one sorted pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassBarriers {
    /// Recorded on the pass's own context before it runs.
    pub before: Vec<PlannedBarrier>,
    /// Recorded on the graphics queue ahead of an async compute pass;
    /// the compute queue cannot leave graphics-only states.
    pub hoisted: Vec<PlannedBarrier>,
    /// Recorded on the pass's context after it runs.
    pub after: Vec<PlannedBarrier>,
}

impl PassBarriers {
    pub fn is_empty(&self) -> bool {
        self.before.is_empty() && self.hoisted.is_empty() && self.after.is_empty()
    }

    /// Target state of the transition of `resource` recorded before the
    /// pass (on either queue), if any.
    pub fn transition_to(&self, resource: ResourceId) -> Option<ResourceState> {
        self.before
            .iter()
            .chain(&self.hoisted)
            .find_map(|b| match *b {
                PlannedBarrier::Transition {
                    resource: r, after, ..
                } if r == resource => Some(after),
                _ => None,
            })
    }
}

/// State a resource must be in for one access.
pub fn required_state(kind: PassKind, usage: AccessUsage, depth: bool) -> ResourceState {
    match usage {
        AccessUsage::ColorTarget => ResourceState::RENDER_TARGET,
        AccessUsage::DepthWrite => ResourceState::DEPTH_WRITE,
        AccessUsage::DepthRead => ResourceState::DEPTH_READ,
        AccessUsage::Read => match kind {
            PassKind::Blit => ResourceState::COPY_SOURCE,
            PassKind::AsyncCompute => ResourceState::NON_PIXEL_SHADER_RESOURCE,
            PassKind::Compute if depth => ResourceState::DEPTH_READ | ResourceState::NON_PIXEL_SHADER_RESOURCE,
            PassKind::Compute => ResourceState::NON_PIXEL_SHADER_RESOURCE,
            PassKind::Graphics if depth => ResourceState::DEPTH_READ | ResourceState::SHADER_RESOURCE,
            PassKind::Graphics => ResourceState::SHADER_RESOURCE,
        },
        AccessUsage::Write | AccessUsage::ReadWrite => match kind {
            PassKind::Blit => ResourceState::COPY_DEST,
            _ => ResourceState::UNORDERED_ACCESS,
        },
    }
}

#[derive(Debug, Clone, Copy)]
struct LastAccess {
    position: usize,
    state: ResourceState,
    queue: QueueType,
    uav_write: bool,
}

/// Barrier plan: one entry per sorted position plus the final transitions
/// of external resources.
pub(crate) fn plan(
    passes: &[PassNode<'_>],
    order: &[PassId],
    registry: &ResourceRegistry<'_>,
) -> (Vec<PassBarriers>, Vec<PlannedBarrier>) {
    let mut plan = vec![PassBarriers::default(); order.len()];
    let mut last: Vec<Option<LastAccess>> = vec![None; registry.len()];

    for (position, &pass) in order.iter().enumerate() {
        let node = &passes[pass.index()];
        let kind = node.desc.kind;
        let queue = kind.queue();

        for id in node.touched() {
            let entry = registry.get(id);
            let uav_write = node
                .usages_of(id)
                .any(|u| matches!(u, AccessUsage::Write | AccessUsage::ReadWrite))
                && kind != PassKind::Blit;

            if entry.kind() == ResourceKind::Temp {
                // Buffers promote implicitly; only UAV hazards need a barrier.
                if uav_write {
                    plan[position].after.push(PlannedBarrier::Uav { resource: id });
                }
                continue;
            }

            let depth = entry.is_depth();
            let required = node
                .usages_of(id)
                .map(|u| required_state(kind, u, depth))
                .fold(ResourceState::empty(), |acc, s| acc | s);

            match last[id.index()] {
                Some(prev) if prev.state.covers(required) => {
                    if prev.uav_write && required == ResourceState::UNORDERED_ACCESS {
                        plan[position].before.push(PlannedBarrier::Uav { resource: id });
                    }
                }
                Some(prev)
                    if position - prev.position >= SPLIT_DISTANCE
                        && prev.queue == queue
                        && !depth
                        && !kind.is_async() =>
                {
                    plan[prev.position].after.push(PlannedBarrier::Transition {
                        resource: id,
                        after: required,
                        split: BarrierSplit::BeginOnly,
                    });
                    plan[position].before.push(PlannedBarrier::Transition {
                        resource: id,
                        after: required,
                        split: BarrierSplit::EndOnly,
                    });
                }
                _ => {
                    let barrier = PlannedBarrier::Transition {
                        resource: id,
                        after: required,
                        split: BarrierSplit::None,
                    };
                    if kind.is_async() {
                        plan[position].hoisted.push(barrier);
                    } else {
                        plan[position].before.push(barrier);
                    }
                }
            }

            last[id.index()] = Some(LastAccess {
                position,
                state: required,
                queue,
                uav_write,
            });
        }
    }

    let finals = registry
        .iter()
        .filter(|(_, e)| e.kind() == ResourceKind::External)
        .filter_map(|(id, e)| {
            let after = e.final_state()?;
            let reached = last[id.index()].is_some_and(|l| l.state.covers(after));
            (!reached).then_some(PlannedBarrier::Transition {
                resource: id,
                after,
                split: BarrierSplit::None,
            })
        })
        .collect();

    (plan, finals)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::pass::{PassBuilder, PassDesc};
    use crate::types::{TextureDesc, TextureFlags, TextureFormat};

    fn color() -> TextureDesc {
        TextureDesc::new_2d(16, 16, TextureFormat::Rgba8Unorm, TextureFlags::RENDER_TARGET)
    }

    fn setup<'g>(
        passes: &mut Vec<PassNode<'g>>,
        registry: &mut ResourceRegistry<'g>,
        desc: PassDesc,
        f: impl FnOnce(&mut PassBuilder<'_, 'g>),
    ) {
        let mut node = PassNode::new(desc);
        let mut builder = PassBuilder {
            pass: PassId(passes.len() as u32),
            node: &mut node,
            registry,
        };
        f(&mut builder);
        passes.push(node);
    }

    #[test]
    fn test_required_states() {
        assert_eq!(
            required_state(PassKind::Graphics, AccessUsage::Read, true),
            ResourceState::DEPTH_READ | ResourceState::SHADER_RESOURCE
        );
        assert_eq!(
            required_state(PassKind::AsyncCompute, AccessUsage::Read, false),
            ResourceState::NON_PIXEL_SHADER_RESOURCE
        );
        assert_eq!(
            required_state(PassKind::Blit, AccessUsage::Write, false),
            ResourceState::COPY_DEST
        );
        assert_eq!(
            required_state(PassKind::Compute, AccessUsage::ReadWrite, false),
            ResourceState::UNORDERED_ACCESS
        );
    }

    #[test]
    fn test_adjacent_transition_is_not_split() {
        let mut registry = ResourceRegistry::new();
        let mut passes = Vec::new();
        let x = registry.create_texture("x", color());
        setup(&mut passes, &mut registry, PassDesc::graphics("a"), |b| {
            b.color_target(x);
        });
        setup(&mut passes, &mut registry, PassDesc::graphics("b"), |b| {
            b.read_texture(x);
        });

        let (plan, _) = plan(&passes, &[PassId(0), PassId(1)], &registry);
        assert_eq!(plan[0].transition_to(x.id()), Some(ResourceState::RENDER_TARGET));
        assert_eq!(
            plan[1].before,
            vec![PlannedBarrier::Transition {
                resource: x.id(),
                after: ResourceState::SHADER_RESOURCE,
                split: BarrierSplit::None,
            }]
        );
    }

    #[test]
    fn test_distant_transition_is_split() {
        let mut registry = ResourceRegistry::new();
        let mut passes = Vec::new();
        let x = registry.create_texture("x", color());
        let y = registry.create_texture("y", color());
        setup(&mut passes, &mut registry, PassDesc::graphics("a"), |b| {
            b.color_target(x);
        });
        setup(&mut passes, &mut registry, PassDesc::graphics("mid"), |b| {
            b.color_target(y);
        });
        setup(&mut passes, &mut registry, PassDesc::graphics("c"), |b| {
            b.read_texture(x);
        });

        let (plan, _) = plan(&passes, &[PassId(0), PassId(1), PassId(2)], &registry);
        assert!(plan[0].after.contains(&PlannedBarrier::Transition {
            resource: x.id(),
            after: ResourceState::SHADER_RESOURCE,
            split: BarrierSplit::BeginOnly,
        }));
        assert!(plan[2].before.contains(&PlannedBarrier::Transition {
            resource: x.id(),
            after: ResourceState::SHADER_RESOURCE,
            split: BarrierSplit::EndOnly,
        }));
    }

    #[test]
    fn test_depth_is_never_split() {
        let mut registry = ResourceRegistry::new();
        let mut passes = Vec::new();
        let depth = registry.create_texture(
            "depth",
            TextureDesc::new_2d(16, 16, TextureFormat::Depth32Float, TextureFlags::DEPTH_STENCIL),
        );
        let y = registry.create_texture("y", color());
        setup(&mut passes, &mut registry, PassDesc::graphics("a"), |b| {
            b.depth_target(depth, crate::graph::DepthAccess::Write);
        });
        setup(&mut passes, &mut registry, PassDesc::graphics("mid"), |b| {
            b.color_target(y);
        });
        setup(&mut passes, &mut registry, PassDesc::graphics("c"), |b| {
            b.read_texture(depth);
        });

        let (plan, _) = plan(&passes, &[PassId(0), PassId(1), PassId(2)], &registry);
        assert!(plan[0].after.is_empty());
        assert_eq!(
            plan[2].transition_to(depth.id()),
            Some(ResourceState::DEPTH_READ | ResourceState::SHADER_RESOURCE)
        );
    }

    #[test]
    fn test_async_transitions_are_hoisted() {
        let mut registry = ResourceRegistry::new();
        let mut passes = Vec::new();
        let x = registry.create_texture("x", color());
        setup(&mut passes, &mut registry, PassDesc::graphics("draw"), |b| {
            b.color_target(x);
        });
        setup(&mut passes, &mut registry, PassDesc::async_compute("blur"), |b| {
            b.read_texture(x);
        });

        let (plan, _) = plan(&passes, &[PassId(0), PassId(1)], &registry);
        assert!(plan[1].before.is_empty());
        assert_eq!(
            plan[1].hoisted,
            vec![PlannedBarrier::Transition {
                resource: x.id(),
                after: ResourceState::NON_PIXEL_SHADER_RESOURCE,
                split: BarrierSplit::None,
            }]
        );
    }

    #[test]
    fn test_temp_buffers_get_uav_barriers_only() {
        use crate::types::{BufferDesc, BufferUsage};

        let mut registry = ResourceRegistry::new();
        let mut passes = Vec::new();
        let buf = registry.create_buffer("buf", BufferDesc::bytes(256, BufferUsage::UNORDERED_ACCESS));
        setup(&mut passes, &mut registry, PassDesc::compute("fill"), |b| {
            b.write_buffer(buf);
        });
        setup(&mut passes, &mut registry, PassDesc::compute("use"), |b| {
            b.read_buffer(buf);
        });

        let (plan, _) = plan(&passes, &[PassId(0), PassId(1)], &registry);
        assert_eq!(plan[0].after, vec![PlannedBarrier::Uav { resource: buf.id() }]);
        assert!(plan[0].before.is_empty());
        assert!(plan[1].is_empty());
    }
}
