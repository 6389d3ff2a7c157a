use bevy::prelude::*;
use criterion::{criterion_group, criterion_main, Criterion};
use metaball_areas::{
    BorderMode, ComputeBackend, Emitter, EmitterId, FragmentBackend, KernelBackend,
    MetaballAreaSettings, MetaballAreas, TexSize,
};

fn renderer<B: KernelBackend>(backend: B, mode: BorderMode) -> MetaballAreas<B> {
    let settings = MetaballAreaSettings::default()
        .with_compute_resolution(TexSize::S128)
        .with_render_resolution(TexSize::S128)
        .with_border_mode(mode);
    let mut r = MetaballAreas::with_settings(backend, &settings).expect("configure");
    for i in 0..32u64 {
        let a = i as f32 * 0.7;
        r.emitters_mut().add(
            EmitterId(i),
            Emitter::new(Vec3::new(a.cos() * 3.0, a.sin() * 3.0, 0.0), 0.6, (i % 3) as u32),
        );
    }
    r
}

fn bench_frame(c: &mut Criterion) {
    let mut flat = renderer(ComputeBackend::new(), BorderMode::NoBorders);
    c.bench_function("frame_128_no_borders", |b| {
        b.iter(|| flat.render_frame(Mat4::IDENTITY).expect("frame"));
    });
    let mut split = renderer(ComputeBackend::new(), BorderMode::SplitAreas);
    c.bench_function("frame_128_split_areas", |b| {
        b.iter(|| split.render_frame(Mat4::IDENTITY).expect("frame"));
    });
    let mut fragment = renderer(FragmentBackend::new(), BorderMode::SplitAreas);
    c.bench_function("frame_128_split_areas_fragment", |b| {
        b.iter(|| fragment.render_frame(Mat4::IDENTITY).expect("frame"));
    });
}

criterion_group!(benches, bench_frame);
criterion_main!(benches);
