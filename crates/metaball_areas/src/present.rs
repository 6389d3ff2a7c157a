//! Presentation of the composited texture.
//!
//! The pipeline output stays backend-owned; presentation reads it back into a
//! [`PresentedFrame`] and, inside Bevy, copies it into an `Image` asset shown by
//! an optional sprite.

use crate::backend::TextureHandle;
use crate::resources::FrameResources;
use bevy::color::{ColorToPacked, LinearRgba, Srgba};
use bevy::image::Image;
use bevy::render::render_asset::RenderAssetUsages;
use bevy::render::render_resource::{Extent3d, TextureDimension, TextureFormat};

/// The texture to show this frame: the upscaled target when upscaling is on,
/// otherwise the compute-resolution result.
pub fn current_texture(resources: &FrameResources) -> TextureHandle {
    resources.upscaled.unwrap_or(resources.result)
}

/// CPU copy of a presented texture. Row 0 is the bottom of the field.
#[derive(Debug, Clone, PartialEq)]
pub struct PresentedFrame {
    width: u32,
    height: u32,
    pixels: Vec<[f32; 4]>,
}

impl PresentedFrame {
    pub(crate) fn new(width: u32, height: u32, pixels: Vec<[f32; 4]>) -> Self {
        debug_assert_eq!(pixels.len(), width as usize * height as usize);
        Self {
            width,
            height,
            pixels,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixels(&self) -> &[[f32; 4]] {
        &self.pixels
    }

    /// Panics when `(x, y)` is outside the frame.
    pub fn pixel(&self, x: u32, y: u32) -> LinearRgba {
        assert!(x < self.width && y < self.height, "pixel ({x}, {y}) out of bounds");
        let [r, g, b, a] = self.pixels[(y * self.width + x) as usize];
        LinearRgba::new(r, g, b, a)
    }

    /// Pixel closest to normalized field coordinates (`-1..1` on both axes,
    /// `+y` up, matching world orientation).
    pub fn sample_field(&self, field: bevy::math::Vec2) -> LinearRgba {
        let to_px =
            |v: f32, n: u32| (((v + 1.0) * 0.5 * n as f32) as i64).clamp(0, n as i64 - 1) as u32;
        self.pixel(to_px(field.x, self.width), to_px(field.y, self.height))
    }

    /// sRGB-encoded 8-bit RGBA with rows top-down, as image files and
    /// display textures expect.
    pub fn to_rgba8(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.pixels.len() * 4);
        for row in self.pixels.chunks_exact(self.width.max(1) as usize).rev() {
            for [r, g, b, a] in row {
                out.extend(Srgba::from(LinearRgba::new(*r, *g, *b, *a)).to_u8_array());
            }
        }
        out
    }

    pub fn to_image(&self) -> Image {
        Image::new(
            Extent3d {
                width: self.width,
                height: self.height,
                depth_or_array_layers: 1,
            },
            TextureDimension::D2,
            self.to_rgba8(),
            TextureFormat::Rgba8UnormSrgb,
            RenderAssetUsages::default(),
        )
    }

    /// Copies into an existing image, replacing it when the size changed.
    pub fn write_into(&self, image: &mut Image) {
        let size = image.texture_descriptor.size;
        let same_shape = size.width == self.width
            && size.height == self.height
            && image.texture_descriptor.format == TextureFormat::Rgba8UnormSrgb;
        match (&mut image.data, same_shape) {
            (Some(data), true) => *data = self.to_rgba8(),
            _ => *image = self.to_image(),
        }
    }
}
