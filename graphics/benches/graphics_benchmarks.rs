use criterion::{Criterion, black_box, criterion_group, criterion_main};

use kiln_graphics::backend::{DescriptorSource, RawResource, SamplerDesc};
use kiln_graphics::graph::{DepthAccess, PassDesc, RenderGraph};
use kiln_graphics::{DescriptorHeapType, Device, DeviceConfig, TextureDesc, TextureFlags, TextureFormat};

fn color(size: u32) -> TextureDesc {
    TextureDesc::new_2d(size, size, TextureFormat::Rgba8Unorm, TextureFlags::RENDER_TARGET)
}

fn deferred_graph() -> RenderGraph<'static> {
    let mut graph = RenderGraph::new();
    let shadow = graph.create_texture("shadow", color(1024));
    let gbuffer: Vec<_> = (0..4).map(|i| graph.create_texture(&format!("g{i}"), color(512))).collect();
    let depth = graph.create_texture(
        "depth",
        TextureDesc::new_2d(512, 512, TextureFormat::Depth32Float, TextureFlags::DEPTH_STENCIL),
    );
    let lit = graph.create_texture("lit", color(512));

    graph.add_pass(PassDesc::graphics("shadow"), |b| b.color_target(shadow), |_, _| Ok(()));
    let targets = gbuffer.clone();
    graph.add_pass(
        PassDesc::graphics("gbuffer"),
        move |b| {
            for &g in &targets {
                b.color_target(g);
            }
            b.depth_target(depth, DepthAccess::Write);
        },
        |_, _| Ok(()),
    );
    graph.add_pass(
        PassDesc::graphics("lighting"),
        move |b| {
            b.read_texture(shadow);
            for &g in &gbuffer {
                b.read_texture(g);
            }
            b.read_texture(depth);
            b.color_target(lit);
            b.allow_culling(false);
        },
        |_, _| Ok(()),
    );
    graph
}

fn chain_graph(len: usize) -> RenderGraph<'static> {
    let mut graph = RenderGraph::new();
    let mut prev = graph.create_texture("pass_0", color(256));
    graph.add_pass(PassDesc::graphics("pass_0"), |b| b.color_target(prev), |_, _| Ok(()));
    for i in 1..len {
        let name = format!("pass_{i}");
        let next = graph.create_texture(&name, color(256));
        graph.add_pass(
            PassDesc::graphics(name),
            |b| {
                b.read_texture(prev);
                b.color_target(next);
                b.allow_culling(i + 1 < len);
            },
            |_, _| Ok(()),
        );
        prev = next;
    }
    graph
}

// ---------------------------------------------------------------------------
// Render graph compilation
// ---------------------------------------------------------------------------

fn bench_graph_compile_deferred(c: &mut Criterion) {
    c.bench_function("render_graph_compile_deferred", |b| {
        b.iter_with_setup(deferred_graph, |mut graph| {
            black_box(graph.compile().unwrap().pass_count());
        });
    });
}

fn bench_graph_compile_chain(c: &mut Criterion) {
    c.bench_function("render_graph_compile_32_passes_chain", |b| {
        b.iter_with_setup(
            || chain_graph(32),
            |mut graph| {
                black_box(graph.compile().unwrap().pass_count());
            },
        );
    });
}

fn bench_graph_execute_deferred(c: &mut Criterion) {
    let mut device = Device::dummy(DeviceConfig::default()).unwrap();
    c.bench_function("render_graph_execute_deferred_frame", |b| {
        b.iter(|| {
            device.begin_frame();
            let mut graph = deferred_graph();
            black_box(graph.compile_and_execute(&mut device).unwrap());
            device.end_frame();
        });
    });
}

// ---------------------------------------------------------------------------
// Online descriptors
// ---------------------------------------------------------------------------

fn bench_view_ring_frame(c: &mut Criterion) {
    let mut device = Device::dummy(DeviceConfig::default()).unwrap();
    let table: Vec<_> = (0..8)
        .map(|i| {
            device
                .create_descriptor(DescriptorHeapType::CbvSrvUav, &DescriptorSource::ShaderResource(RawResource(i)))
                .unwrap()
        })
        .collect();

    c.bench_function("view_ring_256_tables_per_frame", |b| {
        b.iter(|| {
            device.begin_frame();
            for _ in 0..256 {
                black_box(device.allocate_online_views(&[&table]).unwrap());
            }
            device.end_frame();
        });
    });
}

fn bench_sampler_cache_hits(c: &mut Criterion) {
    let mut device = Device::dummy(DeviceConfig::default()).unwrap();
    let samplers: Vec<_> = [SamplerDesc::default(), SamplerDesc::linear()]
        .iter()
        .map(|desc| {
            device
                .create_descriptor(DescriptorHeapType::Sampler, &DescriptorSource::Sampler(*desc))
                .unwrap()
        })
        .collect();

    device.begin_frame();
    c.bench_function("sampler_cache_cached_block", |b| {
        b.iter(|| black_box(device.allocate_online_samplers(&[&samplers]).unwrap()));
    });
    device.end_frame();
}

criterion_group!(
    benches,
    bench_graph_compile_deferred,
    bench_graph_compile_chain,
    bench_graph_execute_deferred,
    bench_view_ring_frame,
    bench_sampler_cache_hits,
);
criterion_main!(benches);
