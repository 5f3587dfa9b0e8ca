//! Render graph integration tests.
//!
//! Graphs are compiled and executed on a dummy device; assertions look at the
//! compiled plan, the tracked resource states and the command lists the
//! dummy backend received.

mod common;

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use rstest::rstest;

use common::{TestContext, color_target, depth_target};
use kiln_graphics::backend::RawResource;
use kiln_graphics::backend::dummy::commands_matching;
use kiln_graphics::command::{BarrierSplit, ResourceBarrier};
use kiln_graphics::graph::{DepthAccess, Lifetime, PassDesc, PassKind, RenderGraph, TextureHandle};
use kiln_graphics::{Command, QueueType, Resource, ResourceState, TextureDesc, TextureFlags, TextureFormat};

type Seen = Rc<RefCell<HashMap<&'static str, RawResource>>>;

fn record(seen: &Seen, name: &'static str, resource: &Resource) {
    seen.borrow_mut().insert(name, resource.raw());
}

fn transitions<'a>(
    lists: &'a [kiln_graphics::backend::dummy::ExecutedList],
) -> impl Iterator<Item = ResourceBarrier> + 'a {
    commands_matching(lists, |c| matches!(c, Command::ResourceBarrier(_))).flat_map(|c| match c {
        Command::ResourceBarrier(batch) => batch.clone(),
        _ => Vec::new(),
    })
}

// ============================================================================
// Culling and ordering
// ============================================================================

#[test]
fn test_unconsumed_chain_is_culled() {
    let mut ctx = TestContext::new();
    ctx.device.begin_frame();

    let mut graph = RenderGraph::new();
    let x = graph.create_texture("x", color_target(64));
    let y = graph.create_texture("y", color_target(64));
    graph.add_pass(PassDesc::graphics("a"), |b| b.color_target(x), |_, _| Ok(()));
    graph.add_pass(
        PassDesc::graphics("b"),
        |b| {
            b.read_texture(x);
            b.color_target(y)
        },
        |_, _| Ok(()),
    );

    let compiled = graph.compile().unwrap();
    assert!(compiled.is_empty());
    assert_eq!(compiled.culled().len(), 2);

    let report = graph.compile_and_execute(&mut ctx.device).unwrap();
    assert!(report.executed.is_empty());
    assert_eq!(report.culled, vec!["a".to_owned(), "b".to_owned()]);
    assert!(report.submissions.is_empty());
    assert!(ctx.backend.executed().is_empty());
    ctx.device.end_frame();
}

#[test]
fn test_chain_runs_in_order_with_srv_transitions() {
    let mut ctx = TestContext::new();
    ctx.device.begin_frame();

    let mut graph = RenderGraph::new();
    let x = graph.create_texture("x", color_target(64));
    let y = graph.create_texture("y", color_target(64));
    let a = graph.add_pass(PassDesc::graphics("a"), |b| b.color_target(x), |_, _| Ok(()));
    let b = graph.add_pass(
        PassDesc::graphics("b"),
        |b| {
            b.read_texture(x);
            b.color_target(y)
        },
        |_, _| Ok(()),
    );
    let c = graph.add_pass(
        PassDesc::graphics("c"),
        |b| {
            b.read_texture(y);
            b.allow_culling(false);
        },
        |_, _| Ok(()),
    );

    let compiled = graph.compile().unwrap();
    assert_eq!(compiled.order(), &[a, b, c]);
    assert_eq!(
        compiled.barriers(b).unwrap().transition_to(x.id()),
        Some(ResourceState::SHADER_RESOURCE)
    );
    assert_eq!(
        compiled.barriers(c).unwrap().transition_to(y.id()),
        Some(ResourceState::SHADER_RESOURCE)
    );

    let report = graph.compile_and_execute(&mut ctx.device).unwrap();
    assert_eq!(report.executed, vec!["a", "b", "c"]);
    ctx.device.end_frame();

    let lists = ctx.backend.executed();
    let events: Vec<_> = commands_matching(&lists, |c| matches!(c, Command::BeginEvent(_)))
        .filter_map(|c| match c {
            Command::BeginEvent(name) => Some(name.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(events, vec!["a", "b", "c"]);
}

#[test]
fn test_explicit_dependency_reorders_independent_passes() {
    let mut ctx = TestContext::new();
    ctx.device.begin_frame();

    let mut graph = RenderGraph::new();
    let first = graph.add_pass(PassDesc::compute("first"), |b| b.allow_culling(false).pass(), |_, _| Ok(()));
    let second = graph.add_pass(PassDesc::compute("second"), |b| b.allow_culling(false).pass(), |_, _| Ok(()));
    graph.add_dependency(first, second);

    assert_eq!(graph.compile().unwrap().order(), &[second, first]);
    ctx.device.end_frame();
}

// ============================================================================
// Lifetimes and pooling
// ============================================================================

#[test]
fn test_live_span_is_never_shared() {
    let mut ctx = TestContext::new();
    ctx.device.begin_frame();
    let seen: Seen = Rc::default();

    let mut graph = RenderGraph::new();
    let s = graph.create_texture("s", color_target(128));
    let r = graph.create_texture("r", color_target(128));
    let q = graph.create_texture("q", color_target(128));

    let mut add = |name: &'static str, handle: TextureHandle, write: bool| {
        let seen = seen.clone();
        graph.add_pass(
            PassDesc::graphics(name),
            |b| {
                if write {
                    b.color_target(handle);
                } else {
                    b.read_texture(handle);
                }
                b.allow_culling(false);
            },
            move |_, pass| {
                record(&seen, name, pass.texture(handle)?);
                Ok(())
            },
        )
    };
    add("s-write", s, true);
    add("s-read", s, false);
    add("r-read", r, false);
    add("q-write", q, true);
    add("q-read", q, false);
    add("r-write", r, true);

    graph.compile().unwrap();
    assert_eq!(graph.registry().get(r.id()).lifetime(), Some(Lifetime { min: 2, max: 5 }));
    assert_eq!(graph.registry().get(q.id()).lifetime(), Some(Lifetime { min: 3, max: 4 }));
    graph.compile_and_execute(&mut ctx.device).unwrap();
    ctx.device.end_frame();

    let seen = seen.borrow();
    assert_eq!(seen["r-read"], seen["r-write"]);
    assert_ne!(seen["q-write"], seen["r-read"]);
    // `s` was returned before `r` was first needed.
    assert_eq!(seen["s-read"], seen["r-read"]);
}

#[rstest]
#[case::color(TextureFormat::Rgba8Unorm)]
#[case::float(TextureFormat::R32Float)]
fn test_pooled_texture_returned_after_graph(#[case] format: TextureFormat) {
    let mut ctx = TestContext::new();
    ctx.device.begin_frame();
    {
        let mut graph = RenderGraph::new();
        let t = graph.create_texture("t", TextureDesc::new_2d(32, 32, format, TextureFlags::RENDER_TARGET));
        graph.add_pass(
            PassDesc::graphics("draw"),
            |b| {
                b.color_target(t);
                b.allow_culling(false);
            },
            |_, _| Ok(()),
        );
        graph.compile_and_execute(&mut ctx.device).unwrap();
    }
    assert_eq!(ctx.device.pool().free_count(), 1);
    assert_eq!(ctx.device.stats().pool.misses, 1);
    ctx.device.end_frame();
}

// ============================================================================
// Deferred lighting
// ============================================================================

const GBUFFER: [&str; 4] = ["G0", "G1", "G2", "G3"];

/// Shadow, GBuffer and Lit passes into an imported back buffer. Returns the
/// pooled textures Lit saw, in declaration order.
fn deferred_frame(ctx: &mut TestContext, back_buffer: &Resource) -> Vec<RawResource> {
    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink = seen.clone();

    let mut graph = RenderGraph::new();
    let sm = graph.create_texture(
        "SM",
        TextureDesc::new_2d(256, 256, TextureFormat::R32Float, TextureFlags::RENDER_TARGET),
    );
    let gbuffer: Vec<_> = GBUFFER
        .iter()
        .map(|name| graph.create_texture(name, color_target(128)))
        .collect();
    let depth = graph.create_texture("Depth", depth_target(128));
    let color = graph.import_texture("Color", back_buffer, Some(ResourceState::PRESENT));

    graph.add_pass(PassDesc::graphics("Shadow"), |b| b.color_target(sm), |_, _| Ok(()));
    let targets = gbuffer.clone();
    graph.add_pass(
        PassDesc::graphics("GBuffer"),
        move |b| {
            for &g in &targets {
                b.color_target(g);
            }
            b.depth_target(depth, DepthAccess::Write);
        },
        |_, _| Ok(()),
    );
    let inputs: Vec<_> = std::iter::once(sm).chain(gbuffer).chain(std::iter::once(depth)).collect();
    let lit = graph.add_pass(
        PassDesc::graphics("Lit"),
        |b| {
            for &input in &inputs {
                b.read_texture(input);
            }
            b.color_target(color);
            inputs
        },
        move |inputs, pass| {
            for &input in inputs {
                sink.borrow_mut().push(pass.texture(input)?.raw());
            }
            pass.draw(3, 1)
        },
    );

    graph.compile().unwrap();
    let compiled = graph.compiled().unwrap();
    let names: Vec<_> = compiled.order().iter().map(|&p| graph.pass_name(p)).collect();
    assert_eq!(names, vec!["Shadow", "GBuffer", "Lit"]);
    assert!(compiled.culled().is_empty());

    let lit_barriers = compiled.barriers(lit).unwrap();
    assert_eq!(lit_barriers.transition_to(sm.id()), Some(ResourceState::SHADER_RESOURCE));
    for name in GBUFFER {
        let g = graph.registry().find(name).unwrap();
        assert_eq!(lit_barriers.transition_to(g), Some(ResourceState::SHADER_RESOURCE));
    }
    assert_eq!(
        lit_barriers.transition_to(depth.id()),
        Some(ResourceState::DEPTH_READ | ResourceState::SHADER_RESOURCE)
    );

    graph.compile_and_execute(&mut ctx.device).unwrap();
    seen.take()
}

#[test]
fn test_deferred_lighting_barriers() {
    let mut ctx = TestContext::new();
    let back_buffer = ctx
        .device
        .create_texture(&TextureDesc::new_2d(128, 128, TextureFormat::Bgra8Unorm, TextureFlags::RENDER_TARGET))
        .unwrap();

    ctx.device.begin_frame();
    let seen = deferred_frame(&mut ctx, &back_buffer);
    ctx.device.end_frame();
    assert_eq!(seen.len(), 6);
    assert_eq!(back_buffer.state(), ResourceState::PRESENT);

    let lists = ctx.backend.executed();
    let barriers: Vec<_> = transitions(&lists).collect();

    // Shadow map read two passes later: split transition.
    let shadow_map = seen[0];
    let halves: Vec<_> = barriers
        .iter()
        .filter(|b| b.resource() == Some(shadow_map) && b.after_state() == Some(ResourceState::SHADER_RESOURCE))
        .map(ResourceBarrier::split)
        .collect();
    assert_eq!(halves, vec![BarrierSplit::BeginOnly, BarrierSplit::EndOnly]);

    let depth = seen[5];
    assert!(barriers.iter().any(|b| matches!(*b,
        ResourceBarrier::Transition { resource, before, after, split: BarrierSplit::None }
            if resource == depth
                && before == ResourceState::DEPTH_WRITE
                && after == (ResourceState::DEPTH_READ | ResourceState::SHADER_RESOURCE))));

    let draws = commands_matching(&lists, |c| matches!(c, Command::Draw { .. })).count();
    assert_eq!(draws, 1);
}

#[test]
fn test_identical_frames_reuse_pooled_textures() {
    let mut ctx = TestContext::new();
    let back_buffer = ctx
        .device
        .create_texture(&TextureDesc::new_2d(128, 128, TextureFormat::Bgra8Unorm, TextureFlags::RENDER_TARGET))
        .unwrap();

    ctx.device.begin_frame();
    let mut first = deferred_frame(&mut ctx, &back_buffer);
    ctx.device.end_frame();
    let misses = ctx.device.stats().pool.misses;
    assert_eq!(misses, 6);

    ctx.device.begin_frame();
    let mut second = deferred_frame(&mut ctx, &back_buffer);
    ctx.device.end_frame();

    first.sort();
    second.sort();
    assert_eq!(first, second);

    let stats = ctx.device.stats();
    assert_eq!(stats.pool.misses, misses);
    assert_eq!(stats.pool.hits, 6);
    assert_eq!(stats.pooled_resources, 6);
    assert_eq!(ctx.device.pool().max_stale_count(), 0);
}

// ============================================================================
// Async compute
// ============================================================================

#[test]
fn test_async_compute_synchronizes_both_queues() {
    let mut ctx = TestContext::new();
    ctx.device.begin_frame();

    let mut graph = RenderGraph::new();
    let scene = graph.create_texture("scene", color_target(64));
    let blurred = graph.create_texture(
        "blurred",
        TextureDesc::new_2d(64, 64, TextureFormat::Rgba8Unorm, TextureFlags::UNORDERED_ACCESS),
    );
    graph.add_pass(PassDesc::graphics("prepare"), |b| b.color_target(scene), |_, _| Ok(()));
    let blur = graph.add_pass(
        PassDesc::async_compute("blur"),
        |b| {
            b.read_texture(scene);
            b.write_texture(blurred);
        },
        |_, pass| pass.dispatch(8, 8, 1),
    );
    graph.add_pass(
        PassDesc::graphics("compose"),
        |b| {
            b.read_texture(blurred);
            b.allow_culling(false);
        },
        |_, pass| pass.draw(3, 1),
    );
    assert_eq!(graph.pass_kind(blur), PassKind::AsyncCompute);

    let report = graph.compile_and_execute(&mut ctx.device).unwrap();
    assert_eq!(report.executed.len(), 3);
    assert!(report.submissions.iter().any(|s| s.queue == QueueType::Compute));

    let graphics_fence = ctx.device.queue(QueueType::Graphics).raw_fence();
    let compute_fence = ctx.device.queue(QueueType::Compute).raw_fence();
    let waits = ctx.backend.queue_waits();
    assert!(waits
        .iter()
        .any(|&(q, f, _)| q == QueueType::Compute && f == graphics_fence));
    assert!(waits
        .iter()
        .any(|&(q, f, _)| q == QueueType::Graphics && f == compute_fence));

    let lists = ctx.backend.executed();
    let compute_dispatches = lists
        .iter()
        .filter(|l| l.queue == QueueType::Compute)
        .flat_map(|l| &l.commands)
        .filter(|c| matches!(c, Command::Dispatch { .. }))
        .count();
    assert_eq!(compute_dispatches, 1);
    ctx.device.end_frame();
}
