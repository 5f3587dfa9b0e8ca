//! Render graph compilation.
//!
//! Compilation turns the declared passes into an execution plan:
//!
//! 1. **Edges** - read-after-write, write-after-write and write-after-read
//!    hazards between passes, plus explicit dependencies
//! 2. **Culling** - passes whose output reaches nothing are dropped
//! 3. **Topological sort** - stable, ties broken by registration order
//! 4. **Lifetimes** - first and last sorted position of every resource
//! 5. **Barriers** - see [`barrier`](super::barrier)

use std::cmp::Reverse;
use std::collections::{BinaryHeap, VecDeque};

use super::barrier::{self, PassBarriers, PlannedBarrier};
use super::pass::PassNode;
use super::registry::{ResourceKind, ResourceRegistry};
use super::{GraphError, PassId};

/// A compiled render graph ready for execution.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct CompiledGraph {
    order: Vec<PassId>,
    positions: Vec<Option<usize>>,
    dependencies: Vec<Vec<PassId>>,
    culled: Vec<PassId>,
    barriers: Vec<PassBarriers>,
    final_barriers: Vec<PlannedBarrier>,
    deadlines: Vec<(PassId, PassId)>,
}

impl CompiledGraph {
    /// Live passes in execution order.
    pub fn order(&self) -> &[PassId] {
        &self.order
    }

    pub fn pass_count(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Sorted position of `pass`, `None` if it was culled.
    pub fn position(&self, pass: PassId) -> Option<usize> {
        self.positions.get(pass.index()).copied().flatten()
    }

    pub fn is_live(&self, pass: PassId) -> bool {
        self.position(pass).is_some()
    }

    /// Passes dropped by culling, in registration order.
    pub fn culled(&self) -> &[PassId] {
        &self.culled
    }

    /// Passes `pass` must run after.
    pub fn dependencies(&self, pass: PassId) -> &[PassId] {
        self.dependencies
            .get(pass.index())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Planned barriers around `pass`.
    pub fn barriers(&self, pass: PassId) -> Option<&PassBarriers> {
        self.position(pass).map(|p| &self.barriers[p])
    }

    pub(crate) fn barriers_at(&self, position: usize) -> &PassBarriers {
        &self.barriers[position]
    }

    /// Transitions of external resources to their final states.
    pub fn final_barriers(&self) -> &[PlannedBarrier] {
        &self.final_barriers
    }

    /// `(async pass, deadline pass)` pairs between live passes.
    pub fn deadlines(&self) -> &[(PassId, PassId)] {
        &self.deadlines
    }
}

/// Hazard and explicit edges as `(dependent, dependency)` pairs.
pub(crate) fn build_edges(
    passes: &[PassNode<'_>],
    registry: &ResourceRegistry<'_>,
    explicit: &[(PassId, PassId)],
) -> Vec<(PassId, PassId)> {
    let mut readers: Vec<Vec<PassId>> = vec![Vec::new(); registry.len()];
    for (index, node) in passes.iter().enumerate() {
        for id in node.reads() {
            let list = &mut readers[id.index()];
            if list.last() != Some(&PassId(index as u32)) {
                list.push(PassId(index as u32));
            }
        }
    }

    let mut edges = Vec::new();
    for (index, node) in passes.iter().enumerate() {
        let pass = PassId(index as u32);

        for id in node.reads() {
            if let Some(producer) = registry.last_producer_before(id, pass) {
                edges.push((pass, producer));
            }
        }

        for id in node.writes() {
            let previous = registry.last_producer_before(id, pass);
            if let Some(producer) = previous {
                edges.push((pass, producer));
            }
            // Readers since the previous producer must finish first.
            edges.extend(
                readers[id.index()]
                    .iter()
                    .filter(|&&r| r < pass && previous.is_none_or(|p| r > p))
                    .map(|&r| (pass, r)),
            );
        }
    }

    edges.extend_from_slice(explicit);
    edges.sort_unstable();
    edges.dedup();
    edges
}

/// Mark live passes by walking dependencies back from the roots.
pub(crate) fn cull(passes: &[PassNode<'_>], registry: &ResourceRegistry<'_>, edges: &[(PassId, PassId)]) -> Vec<bool> {
    let mut live = vec![false; passes.len()];
    let mut queue: VecDeque<PassId> = passes
        .iter()
        .enumerate()
        .filter(|(_, node)| {
            !node.allow_culling
                || node
                    .writes()
                    .any(|id| registry.get(id).kind() == ResourceKind::External)
        })
        .map(|(i, _)| PassId(i as u32))
        .collect();
    for pass in &queue {
        live[pass.index()] = true;
    }

    while let Some(pass) = queue.pop_front() {
        for &(dependent, dependency) in edges {
            if dependent == pass && !live[dependency.index()] {
                live[dependency.index()] = true;
                queue.push_back(dependency);
            }
        }
    }
    live
}

/// Kahn's algorithm over live passes with a min-heap for stable ties.
pub(crate) fn sort(live: &[bool], edges: &[(PassId, PassId)]) -> Result<Vec<PassId>, GraphError> {
    let mut in_degree = vec![0u32; live.len()];
    for &(dependent, dependency) in edges {
        if live[dependent.index()] && live[dependency.index()] {
            in_degree[dependent.index()] += 1;
        }
    }

    let mut ready: BinaryHeap<Reverse<PassId>> = (0..live.len())
        .filter(|&i| live[i] && in_degree[i] == 0)
        .map(|i| Reverse(PassId(i as u32)))
        .collect();

    let mut order = Vec::with_capacity(live.iter().filter(|&&l| l).count());
    while let Some(Reverse(pass)) = ready.pop() {
        order.push(pass);
        for &(dependent, dependency) in edges {
            if dependency == pass && live[dependent.index()] {
                in_degree[dependent.index()] -= 1;
                if in_degree[dependent.index()] == 0 {
                    ready.push(Reverse(dependent));
                }
            }
        }
    }

    if order.len() != live.iter().filter(|&&l| l).count() {
        return Err(GraphError::CyclicDependency);
    }
    Ok(order)
}

/// Compile the graph. Lifetimes are written back into `registry`.
pub(crate) fn compile(
    passes: &[PassNode<'_>],
    registry: &mut ResourceRegistry<'_>,
    explicit: &[(PassId, PassId)],
) -> Result<CompiledGraph, GraphError> {
    let edges = build_edges(passes, registry, explicit);
    let live = cull(passes, registry, &edges);
    let order = sort(&live, &edges)?;

    let mut positions = vec![None; passes.len()];
    for (position, pass) in order.iter().enumerate() {
        positions[pass.index()] = Some(position);
    }

    let mut dependencies = vec![Vec::new(); passes.len()];
    for &(dependent, dependency) in &edges {
        if live[dependent.index()] {
            dependencies[dependent.index()].push(dependency);
        }
    }

    registry.reset_lifetimes();
    for (position, pass) in order.iter().enumerate() {
        for id in passes[pass.index()].touched() {
            registry.set_alive(id, position);
        }
    }

    let deadlines = resolve_deadlines(passes, &positions);
    let (barriers, final_barriers) = barrier::plan(passes, &order, registry);

    let culled: Vec<PassId> = (0..passes.len())
        .filter(|&i| !live[i])
        .map(|i| PassId(i as u32))
        .collect();
    log::debug!(
        "compiled render graph: {} live passes, {} culled, {} edges",
        order.len(),
        culled.len(),
        edges.len()
    );

    Ok(CompiledGraph {
        order,
        positions,
        dependencies,
        culled,
        barriers,
        final_barriers,
        deadlines,
    })
}

fn resolve_deadlines(passes: &[PassNode<'_>], positions: &[Option<usize>]) -> Vec<(PassId, PassId)> {
    let mut deadlines = Vec::new();
    for (index, node) in passes.iter().enumerate() {
        let Some(name) = &node.deadline else {
            continue;
        };
        let Some(target) = passes.iter().position(|p| &p.desc.name == name) else {
            kiln_core::contract_violation!(
                "async pass '{}' names unknown deadline pass '{}'",
                node.desc.name,
                name
            );
        };
        if !passes[target].desc.kind.queue().supports_graphics() {
            kiln_core::contract_violation!(
                "deadline '{}' of '{}' is not a graphics queue pass",
                name,
                node.desc.name
            );
        }
        match (positions[index], positions[target]) {
            (Some(own), Some(at)) if at > own => deadlines.push((PassId(index as u32), PassId(target as u32))),
            (Some(_), Some(_)) => log::warn!(
                "deadline '{}' of async pass '{}' is scheduled before it; ignored",
                name,
                node.desc.name
            ),
            _ => {}
        }
    }
    deadlines
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::pass::{PassBuilder, PassDesc};
    use crate::types::{TextureDesc, TextureFlags, TextureFormat};

    fn color() -> TextureDesc {
        TextureDesc::new_2d(16, 16, TextureFormat::Rgba8Unorm, TextureFlags::RENDER_TARGET)
    }

    struct Fixture<'g> {
        passes: Vec<PassNode<'g>>,
        registry: ResourceRegistry<'g>,
        explicit: Vec<(PassId, PassId)>,
    }

    impl<'g> Fixture<'g> {
        fn new() -> Self {
            Self {
                passes: Vec::new(),
                registry: ResourceRegistry::new(),
                explicit: Vec::new(),
            }
        }

        fn pass(&mut self, desc: PassDesc, f: impl FnOnce(&mut PassBuilder<'_, 'g>)) -> PassId {
            let id = PassId(self.passes.len() as u32);
            let mut node = PassNode::new(desc);
            f(&mut PassBuilder {
                pass: id,
                node: &mut node,
                registry: &mut self.registry,
            });
            self.passes.push(node);
            id
        }

        fn compile(&mut self) -> Result<CompiledGraph, GraphError> {
            compile(&self.passes, &mut self.registry, &self.explicit)
        }
    }

    #[test]
    fn test_compile_empty_graph() {
        let mut f = Fixture::new();
        let compiled = f.compile().unwrap();
        assert!(compiled.is_empty());
        assert_eq!(compiled.pass_count(), 0);
    }

    #[test]
    fn test_compile_linear_chain() {
        let mut f = Fixture::new();
        let x = f.registry.create_texture("x", color());
        let y = f.registry.create_texture("y", color());
        let a = f.pass(PassDesc::graphics("A"), |b| {
            b.color_target(x);
        });
        let b = f.pass(PassDesc::graphics("B"), |b| {
            b.read_texture(x);
            b.color_target(y);
        });
        let c = f.pass(PassDesc::graphics("C"), |b| {
            b.read_texture(y);
            b.allow_culling(false);
        });

        let compiled = f.compile().unwrap();
        assert_eq!(compiled.order(), &[a, b, c]);
        assert_eq!(compiled.dependencies(b), &[a]);
        assert_eq!(compiled.dependencies(c), &[b]);
    }

    #[test]
    fn test_unconsumed_chain_is_culled() {
        let mut f = Fixture::new();
        let x = f.registry.create_texture("x", color());
        let y = f.registry.create_texture("y", color());
        let a = f.pass(PassDesc::graphics("A"), |b| {
            b.color_target(x);
        });
        let b = f.pass(PassDesc::graphics("B"), |b| {
            b.read_texture(x);
            b.color_target(y);
        });

        let compiled = f.compile().unwrap();
        assert!(compiled.is_empty());
        assert_eq!(compiled.culled(), &[a, b]);
        assert_eq!(f.registry.get(x.id()).lifetime(), None);
    }

    #[test]
    fn test_write_after_read_orders_writer_after_reader() {
        let mut f = Fixture::new();
        let x = f.registry.create_texture("x", color());
        let a = f.pass(PassDesc::graphics("A"), |b| {
            b.color_target(x);
        });
        let r = f.pass(PassDesc::graphics("read"), |b| {
            b.read_texture(x);
            b.allow_culling(false);
        });
        let w = f.pass(PassDesc::compute("overwrite"), |b| {
            b.write_texture(x);
            b.allow_culling(false);
        });

        let compiled = f.compile().unwrap();
        assert!(compiled.dependencies(w).contains(&r));
        assert!(compiled.dependencies(w).contains(&a));
        assert_eq!(compiled.order(), &[a, r, w]);
    }

    #[test]
    fn test_read_modify_write_has_no_self_edge() {
        let mut f = Fixture::new();
        let x = f.registry.create_texture("x", color());
        let a = f.pass(PassDesc::compute("init"), |b| {
            b.write_texture(x);
        });
        let rmw = f.pass(PassDesc::compute("accumulate"), |b| {
            b.read_write_texture(x);
            b.allow_culling(false);
        });

        let compiled = f.compile().unwrap();
        assert_eq!(compiled.dependencies(rmw), &[a]);
        assert_eq!(compiled.order(), &[a, rmw]);
    }

    #[test]
    fn test_ties_follow_registration_order() {
        let mut f = Fixture::new();
        let passes: Vec<_> = (0..5)
            .map(|i| {
                f.pass(PassDesc::graphics(format!("p{i}")), |b| {
                    b.allow_culling(false);
                })
            })
            .collect();
        let compiled = f.compile().unwrap();
        assert_eq!(compiled.order(), passes.as_slice());
    }

    #[test]
    fn test_compile_cycle_two_nodes() {
        let mut f = Fixture::new();
        let a = f.pass(PassDesc::graphics("A"), |b| {
            b.allow_culling(false);
        });
        let b = f.pass(PassDesc::graphics("B"), |b| {
            b.allow_culling(false);
        });
        f.explicit.push((b, a));
        f.explicit.push((a, b));
        assert_eq!(f.compile(), Err(GraphError::CyclicDependency));
    }

    #[test]
    fn test_explicit_dependency_keeps_pass_alive() {
        let mut f = Fixture::new();
        let setup = f.pass(PassDesc::compute("setup"), |_| {});
        let main = f.pass(PassDesc::graphics("main"), |b| {
            b.allow_culling(false);
        });
        f.explicit.push((main, setup));
        let compiled = f.compile().unwrap();
        assert_eq!(compiled.order(), &[setup, main]);
    }

    #[test]
    fn test_lifetime_spans_reader_and_later_writer() {
        let mut f = Fixture::new();
        let x = f.registry.create_texture("x", color());
        let y = f.registry.create_texture("y", color());
        f.pass(PassDesc::graphics("P0"), |b| {
            b.color_target(x);
        });
        f.pass(PassDesc::graphics("P1"), |b| {
            b.color_target(y);
            b.allow_culling(false);
        });
        f.pass(PassDesc::graphics("P2"), |b| {
            b.read_texture(x);
            b.allow_culling(false);
        });
        f.pass(PassDesc::graphics("P3"), |b| {
            b.read_texture(y);
            b.allow_culling(false);
        });
        f.pass(PassDesc::compute("P4"), |_| {});
        f.pass(PassDesc::compute("P5"), |b| {
            b.write_texture(x);
            b.allow_culling(false);
        });

        let compiled = f.compile().unwrap();
        let lifetime = f.registry.get(x.id()).lifetime().unwrap();
        let p2 = compiled.position(PassId(2)).unwrap();
        let p5 = compiled.position(PassId(5)).unwrap();
        assert!(lifetime.min <= p2 && lifetime.max >= p5);
        assert!(!compiled.is_live(PassId(4)));
    }
}
