//! Emitters of one area blend through the smooth minimum; different areas never do.

use bevy::prelude::*;
use metaball_areas::{
    BorderMode, ComputeBackend, Emitter, EmitterId, MetaballAreaSettings, MetaballAreas, TexSize,
};

/// Color halfway between two discs whose edges are 0.08 field units apart.
fn midpoint(smooth: f32, areas: (u32, u32)) -> LinearRgba {
    let settings = MetaballAreaSettings::default()
        .with_compute_resolution(TexSize::S128)
        .with_render_resolution(TexSize::S128)
        .with_smooth(smooth)
        .with_border_mode(BorderMode::NoBorders)
        .with_colors(vec![LinearRgba::RED, LinearRgba::GREEN, LinearRgba::BLUE]);
    let mut renderer =
        MetaballAreas::with_settings(ComputeBackend::new(), &settings).expect("configure");
    let set = renderer.emitters_mut();
    set.add(EmitterId(1), Emitter::new(Vec3::new(-1.2, 0.0, 0.0), 1.0, areas.0));
    set.add(EmitterId(2), Emitter::new(Vec3::new(1.2, 0.0, 0.0), 1.0, areas.1));
    renderer.render_frame(Mat4::IDENTITY).expect("frame");
    renderer
        .read_current()
        .expect("readback")
        .sample_field(Vec2::ZERO)
}

#[test]
fn hard_union_keeps_gap() {
    assert_eq!(midpoint(0.0, (0, 0)), LinearRgba::BLUE);
}

#[test]
fn smoothing_bridges_same_area() {
    assert_eq!(midpoint(25.0, (0, 0)), LinearRgba::RED);
}

#[test]
fn smoothing_never_bridges_different_areas() {
    assert_eq!(midpoint(25.0, (0, 1)), LinearRgba::BLUE);
}
