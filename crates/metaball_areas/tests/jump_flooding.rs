//! A single seed must reach every texel after `log2(N)` jump flooding passes.

use bevy::prelude::*;
use metaball_areas::backend::{thread_groups, Dispatch, Kernel, ShaderGlobals, Slot};
use metaball_areas::{
    run_frame, BorderMode, BufferShape, ComputeBackend, FrameParams, KernelBackend,
    MetaballAreaSettings, PackedEmitter, ResourceManager, TexSize,
};

/// Field-space center of texel `t` on an `n` grid.
fn texel_center(t: u32, n: u32) -> f32 {
    1.0 - 2.0 * ((t as f32 + 0.5) * (1.0 / n as f32))
}

fn assert_single_seed_converges(n: u32) {
    let mut backend = ComputeBackend::new();
    let mut manager = ResourceManager::new();
    let shape = BufferShape {
        compute_size: n,
        render_size: n,
        area_count: 2,
        max_emitters: 4,
    };
    manager.ensure(&mut backend, shape).expect("allocate");
    let settings = MetaballAreaSettings::default()
        .with_border_mode(BorderMode::SplitAreas)
        .with_smooth(0.0)
        .with_colors(vec![LinearRgba::RED, LinearRgba::BLUE])
        .sanitized();
    manager.upload_colors(&mut backend, &settings.colors).expect("colors");
    manager
        .upload_gradient(&mut backend, &settings.border_opacity)
        .expect("gradient");

    // a disc smaller than one texel around a texel center seeds exactly that texel
    let seed = UVec2::new(n / 5, n - 3);
    let emitter = PackedEmitter {
        position: [texel_center(seed.x, n), texel_center(seed.y, n), 0.0],
        radius: 0.5 / n as f32,
        area: 0,
    };
    let resources = manager.require_mut().expect("resources");
    let report = run_frame(
        &mut backend,
        resources,
        &FrameParams {
            settings: &settings,
            emitters: &[emitter],
        },
    )
    .expect("frame");
    assert_eq!(report.jump_flood_iterations, n.ilog2());
    assert_eq!(report.area_swaps, n.ilog2() + 1);

    let groups = thread_groups(n);
    let data = Dispatch::new(Kernel::RenderData, [groups, groups, 1])
        .bind(Slot::AreaRead, *resources.areas.current())
        .bind(Slot::Result, resources.result);
    backend
        .dispatch(&ShaderGlobals::new(n, 2), &data)
        .expect("render data");
    let frame = backend.read_texture(resources.result).expect("readback");

    let seed_texel = seed;
    let seed = seed.as_vec2();
    for y in 0..n {
        for x in 0..n {
            let [id, signed, _, _] = frame.pixels()[(y * n + x) as usize];
            assert_eq!(id, 0.0, "texel ({x}, {y}) of {n} has no seed");
            if UVec2::new(x, y) == seed_texel {
                assert!(signed <= 0.0, "seed texel of {n} is outside: {signed}");
                continue;
            }
            // outside the disc the signed channel holds the distance to the seed
            let expected = Vec2::new(x as f32, y as f32).distance(seed) * 2.0 / n as f32;
            let expected = expected.min(4.0);
            assert!(
                (signed - expected).abs() <= 1e-5,
                "texel ({x}, {y}) of {n}: seed distance {signed}, expected {expected}"
            );
        }
    }
}

#[test]
fn converges_32() {
    assert_single_seed_converges(32);
}

#[test]
fn converges_64() {
    assert_single_seed_converges(64);
}

#[test]
fn converges_128() {
    assert_single_seed_converges(128);
}

#[test]
fn converges_256() {
    assert_single_seed_converges(256);
}

#[test]
fn converges_512() {
    assert_single_seed_converges(512);
}

#[test]
#[ignore = "slow on the software backend"]
fn converges_1024() {
    assert_single_seed_converges(1024);
}

#[test]
#[ignore = "slow on the software backend"]
fn converges_2048() {
    assert_single_seed_converges(2048);
}

#[test]
#[ignore = "slow on the software backend"]
fn converges_4096() {
    assert_single_seed_converges(4096);
}

#[test]
fn no_borders_skips_jump_flooding() {
    let mut backend = ComputeBackend::new();
    let mut manager = ResourceManager::new();
    let settings = MetaballAreaSettings::default()
        .with_border_mode(BorderMode::NoBorders)
        .with_compute_resolution(TexSize::S32)
        .with_render_resolution(TexSize::S32)
        .sanitized();
    manager
        .ensure(&mut backend, BufferShape::from_settings(&settings))
        .expect("allocate");
    let report = run_frame(
        &mut backend,
        manager.require_mut().expect("resources"),
        &FrameParams {
            settings: &settings,
            emitters: &[],
        },
    )
    .expect("frame");
    assert_eq!(report.jump_flood_iterations, 0);
    assert_eq!(report.area_swaps, 1);
    assert_eq!(report.dispatches, 4);
}
