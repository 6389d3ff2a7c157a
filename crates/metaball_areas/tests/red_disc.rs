//! Single emitter at the field origin, hard edge, flat colors.

use bevy::prelude::*;
use metaball_areas::{
    BorderMode, ComputeBackend, Emitter, EmitterId, MetaballAreaSettings, MetaballAreas, TexSize,
};

fn disc_settings() -> MetaballAreaSettings {
    MetaballAreaSettings::default()
        .with_compute_resolution(TexSize::S512)
        .with_render_resolution(TexSize::S512)
        .with_range(10.0)
        .with_smooth(0.0)
        .with_border_mode(BorderMode::NoBorders)
        .with_colors(vec![LinearRgba::RED, LinearRgba::BLUE])
}

#[test]
fn filled_red_disc_on_blue() {
    let mut renderer =
        MetaballAreas::with_settings(ComputeBackend::new(), &disc_settings()).expect("configure");
    // 0.5 world units of a 10 unit range = 10% of the field half-extent
    renderer
        .emitters_mut()
        .add(EmitterId(1), Emitter::new(Vec3::ZERO, 0.5, 0));
    let stats = renderer.render_frame(Mat4::IDENTITY).expect("frame");
    assert_eq!(stats.snapshot.packed, 1);
    assert_eq!(stats.report.jump_flood_iterations, 0);

    let frame = renderer.read_current().expect("readback");
    assert_eq!((frame.width(), frame.height()), (512, 512));

    // expected radius in texels: 10% of 256
    let radius = 25.6f32;
    let center = Vec2::splat(256.0);
    let mut red = 0usize;
    for y in 0..512 {
        for x in 0..512 {
            let px = frame.pixel(x, y);
            let d = (Vec2::new(x as f32 + 0.5, y as f32 + 0.5) - center).length();
            if px == LinearRgba::RED {
                red += 1;
                assert!(d <= radius + 1.0, "red texel ({x}, {y}) at distance {d}");
            } else {
                assert_eq!(px, LinearRgba::BLUE, "texel ({x}, {y})");
                assert!(d >= radius - 1.0, "blue texel ({x}, {y}) at distance {d}");
            }
        }
    }
    let expected = std::f32::consts::PI * radius * radius;
    let ratio = red as f32 / expected;
    assert!((0.95..1.05).contains(&ratio), "disc area {red} vs {expected}");
}

#[test]
fn origin_texel_takes_the_emitter_area_color() {
    let palette = vec![
        LinearRgba::RED,
        LinearRgba::GREEN,
        LinearRgba::rgb(1.0, 1.0, 0.0),
        LinearRgba::BLUE,
    ];
    for area in 0..3u32 {
        let settings = disc_settings()
            .with_compute_resolution(TexSize::S64)
            .with_render_resolution(TexSize::S64)
            .with_colors(palette.clone());
        let mut renderer =
            MetaballAreas::with_settings(ComputeBackend::new(), &settings).expect("configure");
        renderer
            .emitters_mut()
            .add(EmitterId(7), Emitter::new(Vec3::ZERO, 0.5, area));
        renderer.render_frame(Mat4::IDENTITY).expect("frame");
        let frame = renderer.read_current().expect("readback");
        assert_eq!(frame.sample_field(Vec2::ZERO), palette[area as usize]);
        assert_eq!(frame.pixel(0, 0), LinearRgba::BLUE);
    }
}

#[test]
fn empty_field_is_background() {
    let settings = disc_settings()
        .with_compute_resolution(TexSize::S32)
        .with_render_resolution(TexSize::S32);
    let mut renderer =
        MetaballAreas::with_settings(ComputeBackend::new(), &settings).expect("configure");
    renderer.render_frame(Mat4::IDENTITY).expect("frame");
    let frame = renderer.read_current().expect("readback");
    assert!(frame
        .pixels()
        .iter()
        .all(|p| *p == LinearRgba::BLUE.to_f32_array()));
}
