//! Benchmark for sphere mesh generation and shader composition.
//!
//! Run with: cargo bench --package particle_lod_rendering --bench geometry_benchmark

#![allow(missing_docs)]

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use particle_lod_core::layout::BATCH_SIZE;
use particle_lod_core::PipelineMode;
use particle_lod_rendering::{LodShaders, ShaderDefines, SphereGeometry, SphereMesh, SphereVariant};

fn bench_meshes(c: &mut Criterion) {
    let mut group = c.benchmark_group("sphere_mesh");

    group.bench_function("subdivide_2", |b| {
        b.iter(|| black_box(SphereMesh::subdivided(black_box(2))));
    });

    let tess = SphereMesh::tessellated();
    group.bench_function("batch_tessellated", |b| {
        b.iter(|| black_box(tess.batched_indices(black_box(BATCH_SIZE))));
    });

    group.bench_function("geometry_new", |b| {
        b.iter(|| black_box(SphereGeometry::new()));
    });

    group.finish();
}

fn bench_compose(c: &mut Criterion) {
    let defines = ShaderDefines::from_mode(&PipelineMode::default());

    c.bench_function("compose_program_set", |b| {
        b.iter(|| {
            black_box(LodShaders::classify(&defines));
            black_box(LodShaders::commands(&defines));
            black_box(LodShaders::sphere(&defines, SphereVariant::Basic));
            black_box(LodShaders::sphere(&defines, SphereVariant::Tessellated));
            black_box(LodShaders::points(&defines));
        });
    });
}

criterion_group!(benches, bench_meshes, bench_compose);
criterion_main!(benches);
