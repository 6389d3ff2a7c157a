//! The workgroup and full-screen backends must composite identical frames.

use bevy::prelude::*;
use metaball_areas::{
    BorderMode, ComputeBackend, Emitter, EmitterId, FragmentBackend, KernelBackend,
    MetaballAreaSettings, MetaballAreas, PresentedFrame, TexSize,
};

fn scene<B: KernelBackend>(backend: B, settings: &MetaballAreaSettings) -> PresentedFrame {
    let mut renderer = MetaballAreas::with_settings(backend, settings).expect("configure");
    let positions = [
        (Vec3::new(-2.0, 1.0, 0.0), 0.8, 0),
        (Vec3::new(-1.2, 1.4, 0.0), 0.6, 0),
        (Vec3::new(1.5, -0.5, 0.0), 1.1, 1),
        (Vec3::new(0.3, -2.5, 0.0), 0.7, 2),
        (Vec3::new(3.9, 3.9, 0.0), 0.5, 1),
    ];
    for (i, (p, r, area)) in positions.into_iter().enumerate() {
        renderer
            .emitters_mut()
            .add(EmitterId(i as u64), Emitter::new(p, r, area));
    }
    renderer.render_frame(Mat4::IDENTITY).expect("frame");
    renderer.read_current().expect("readback")
}

fn assert_parity(settings: &MetaballAreaSettings) {
    let compute = scene(ComputeBackend::new(), settings);
    let fragment = scene(FragmentBackend::new(), settings);
    assert_eq!(compute.width(), fragment.width());
    assert!(compute == fragment, "backends disagree for {settings:?}");
}

#[test]
fn identical_for_every_border_mode() {
    for mode in [BorderMode::NoBorders, BorderMode::GroupAllAreas, BorderMode::SplitAreas] {
        assert_parity(
            &MetaballAreaSettings::default()
                .with_compute_resolution(TexSize::S64)
                .with_render_resolution(TexSize::S64)
                .with_border_mode(mode),
        );
    }
}

#[test]
fn identical_when_upscaling() {
    assert_parity(
        &MetaballAreaSettings::default()
            .with_compute_resolution(TexSize::S32)
            .with_render_resolution(TexSize::S128)
            .with_border_mode(BorderMode::SplitAreas),
    );
}

#[test]
fn identical_with_smoothing() {
    assert_parity(
        &MetaballAreaSettings::default()
            .with_compute_resolution(TexSize::S64)
            .with_render_resolution(TexSize::S64)
            .with_smooth(60.0),
    );
}
