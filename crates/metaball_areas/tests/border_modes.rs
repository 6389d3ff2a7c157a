//! Border policies are a render-time switch over the same field.

use bevy::prelude::*;
use metaball_areas::{
    BorderMode, ComputeBackend, Emitter, EmitterId, MetaballAreaSettings, MetaballAreas,
    OpacityCurve, PresentedFrame, TexSize,
};

fn settings(mode: BorderMode) -> MetaballAreaSettings {
    MetaballAreaSettings::default()
        .with_compute_resolution(TexSize::S128)
        .with_render_resolution(TexSize::S128)
        .with_range(10.0)
        .with_smooth(0.0)
        .with_border_mode(mode)
        .with_border_range(0.2)
        .with_border_opacity(OpacityCurve::constant(1.0))
        .with_colors(vec![LinearRgba::RED, LinearRgba::GREEN, LinearRgba::BLUE])
}

/// Two discs of radius 0.2 (field units) at field x = -0.5 (area 0) and x = 0.5 (area 1).
fn render(settings: &MetaballAreaSettings) -> PresentedFrame {
    let mut renderer =
        MetaballAreas::with_settings(ComputeBackend::new(), settings).expect("configure");
    let set = renderer.emitters_mut();
    set.add(EmitterId(1), Emitter::new(Vec3::new(-2.5, 0.0, 0.0), 1.0, 0));
    set.add(EmitterId(2), Emitter::new(Vec3::new(2.5, 0.0, 0.0), 1.0, 1));
    renderer.render_frame(Mat4::IDENTITY).expect("frame");
    renderer.read_current().expect("readback")
}

const INSIDE_A: Vec2 = Vec2::new(-0.5, 0.0);
const BORDER_A: Vec2 = Vec2::new(-0.24, 0.0);
const BORDER_B: Vec2 = Vec2::new(0.24, 0.0);
const FAR: Vec2 = Vec2::new(0.0, 0.9);

#[test]
fn no_borders_is_flat() {
    let frame = render(&settings(BorderMode::NoBorders));
    assert_eq!(frame.sample_field(INSIDE_A), LinearRgba::RED);
    assert_eq!(frame.sample_field(BORDER_A), LinearRgba::BLUE);
    assert_eq!(frame.sample_field(BORDER_B), LinearRgba::BLUE);
    assert_eq!(frame.sample_field(FAR), LinearRgba::BLUE);
}

#[test]
fn no_borders_ignores_border_parameters() {
    let thin = render(
        &settings(BorderMode::NoBorders)
            .with_border_range(0.1)
            .with_border_opacity(OpacityCurve::linear(0.2, 0.9)),
    );
    let wide = render(&settings(BorderMode::NoBorders).with_border_range(5.0));
    assert_eq!(thin, wide);
    let owners = [LinearRgba::RED, LinearRgba::GREEN, LinearRgba::BLUE];
    assert!(thin
        .pixels()
        .iter()
        .all(|p| owners.iter().any(|c| c.to_f32_array() == *p)));
}

#[test]
fn group_all_areas_uses_shared_border_color() {
    let frame = render(&settings(BorderMode::GroupAllAreas));
    assert_eq!(frame.sample_field(INSIDE_A), LinearRgba::RED);
    assert_eq!(frame.sample_field(BORDER_A), LinearRgba::WHITE);
    assert_eq!(frame.sample_field(BORDER_B), LinearRgba::WHITE);
    assert_eq!(frame.sample_field(FAR), LinearRgba::BLUE);
}

#[test]
fn split_areas_uses_the_nearest_area_color() {
    let frame = render(&settings(BorderMode::SplitAreas));
    assert_eq!(frame.sample_field(BORDER_A), LinearRgba::RED);
    assert_eq!(frame.sample_field(BORDER_B), LinearRgba::GREEN);
    assert_eq!(frame.sample_field(FAR), LinearRgba::BLUE);
}

#[test]
fn border_fades_with_the_opacity_curve() {
    let frame = render(
        &settings(BorderMode::GroupAllAreas)
            .with_border_range(1.0)
            .with_border_opacity(OpacityCurve::linear(1.0, 0.0)),
    );
    let near = frame.sample_field(Vec2::new(-0.28, 0.0));
    let far = frame.sample_field(Vec2::new(-0.5, 0.6));
    // white over blue: red and green channels carry the opacity
    assert!(near.red > far.red, "{near:?} vs {far:?}");
    assert!(far.red > 0.0 && far.red < 1.0);
    assert_eq!(near.blue, 1.0);
}

#[test]
fn background_area_is_configurable() {
    let frame = render(&settings(BorderMode::NoBorders).with_background_area(Some(1)));
    assert_eq!(frame.sample_field(FAR), LinearRgba::GREEN);
}

/// Two overlapping discs of radius 0.3 (field units) centred at field x = -0.2
/// (area 0) and x = 0.2 (area 1); they meet along field x = 0.
fn contact(settings: &MetaballAreaSettings) -> PresentedFrame {
    let mut renderer =
        MetaballAreas::with_settings(ComputeBackend::new(), settings).expect("configure");
    let set = renderer.emitters_mut();
    set.add(EmitterId(1), Emitter::new(Vec3::new(-1.0, 0.0, 0.0), 1.5, 0));
    set.add(EmitterId(2), Emitter::new(Vec3::new(1.0, 0.0, 0.0), 1.5, 1));
    renderer.render_frame(Mat4::IDENTITY).expect("frame");
    renderer.read_current().expect("readback")
}

const LINE_A: Vec2 = Vec2::new(-0.01, 0.0);
const LINE_B: Vec2 = Vec2::new(0.01, 0.0);
const DEEP_A: Vec2 = Vec2::new(-0.15, 0.0);
const DEEP_B: Vec2 = Vec2::new(0.15, 0.0);

#[test]
fn no_borders_steps_between_touching_areas() {
    let frame = contact(&settings(BorderMode::NoBorders));
    assert_eq!(frame.sample_field(LINE_A), LinearRgba::RED);
    assert_eq!(frame.sample_field(LINE_B), LinearRgba::GREEN);
}

#[test]
fn group_all_areas_draws_the_border_color_where_areas_meet() {
    let frame = contact(&settings(BorderMode::GroupAllAreas).with_border_range(0.1));
    assert_eq!(frame.sample_field(LINE_A), LinearRgba::WHITE);
    assert_eq!(frame.sample_field(LINE_B), LinearRgba::WHITE);
    // past the band each area keeps its own color
    assert_eq!(frame.sample_field(DEEP_A), LinearRgba::RED);
    assert_eq!(frame.sample_field(DEEP_B), LinearRgba::GREEN);
}

#[test]
fn split_areas_blends_the_touching_pair() {
    let frame = contact(&settings(BorderMode::SplitAreas).with_border_range(0.1));
    let pair = LinearRgba::new(0.5, 0.5, 0.0, 1.0);
    assert_eq!(frame.sample_field(LINE_A), pair);
    assert_eq!(frame.sample_field(LINE_B), pair);
    assert_eq!(frame.sample_field(DEEP_A), LinearRgba::RED);
    assert_eq!(frame.sample_field(DEEP_B), LinearRgba::GREEN);
}

#[test]
fn background_area_emitters_leave_the_frame_untouched() {
    let settings = settings(BorderMode::GroupAllAreas);
    let mut renderer =
        MetaballAreas::with_settings(ComputeBackend::new(), &settings).expect("configure");
    renderer
        .emitters_mut()
        .add(EmitterId(1), Emitter::new(Vec3::new(-2.5, 0.0, 0.0), 1.0, 0));
    renderer.render_frame(Mat4::IDENTITY).expect("frame");
    let without = renderer.read_current().expect("readback");

    // area 2 is the background of a three-color palette
    renderer
        .emitters_mut()
        .add(EmitterId(2), Emitter::new(Vec3::new(2.5, 0.0, 0.0), 1.0, 2));
    let stats = renderer.render_frame(Mat4::IDENTITY).expect("frame");
    assert_eq!(stats.snapshot.packed, 1);
    assert_eq!(stats.snapshot.invalid_area, 1);
    assert_eq!(stats.snapshot.newly_invalid, 1);
    let with = renderer.read_current().expect("readback");
    assert_eq!(with, without);
    assert_eq!(with.sample_field(BORDER_A), LinearRgba::WHITE);
    assert_eq!(with.sample_field(Vec2::new(0.5, 0.0)), LinearRgba::BLUE);
}
