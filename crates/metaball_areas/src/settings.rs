use crate::curve::OpacityCurve;
use crate::error::ConfigError;
use bevy::prelude::*;
use serde::{Deserialize, Serialize};
use std::{fs, path::Path};

/// Power-of-two texture sizes supported by the field computation.
///
/// The discriminant is the exponent, which is also the jump flooding iteration count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum TexSize {
    S32 = 5,
    S64 = 6,
    S128 = 7,
    S256 = 8,
    S512 = 9,
    S1024 = 10,
    S2048 = 11,
    S4096 = 12,
}

impl TexSize {
    pub const ALL: [TexSize; 8] = [
        TexSize::S32,
        TexSize::S64,
        TexSize::S128,
        TexSize::S256,
        TexSize::S512,
        TexSize::S1024,
        TexSize::S2048,
        TexSize::S4096,
    ];

    pub const fn exponent(self) -> u32 {
        self as u32
    }

    pub const fn pixels(self) -> u32 {
        1 << self.exponent()
    }

    /// Exact match only; non power-of-two sizes are rejected.
    pub fn from_pixels(pixels: u32) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.pixels() == pixels)
    }
}

impl TryFrom<u32> for TexSize {
    type Error = String;

    fn try_from(pixels: u32) -> Result<Self, Self::Error> {
        Self::from_pixels(pixels).ok_or_else(|| {
            format!("unsupported texture size {pixels}; expected a power of two in 32..=4096")
        })
    }
}

impl From<TexSize> for u32 {
    fn from(size: TexSize) -> Self {
        size.pixels()
    }
}

/// How borders are drawn, both against the background and where two areas meet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BorderMode {
    /// Flat area colors; jump flooding is skipped.
    NoBorders,
    /// One shared border color around every blob and along every area/area contact.
    GroupAllAreas,
    /// Border takes the identity of the area meeting the background; where two
    /// areas touch, the band blends the pair's colors.
    #[default]
    SplitAreas,
}

impl BorderMode {
    pub fn as_index(self) -> u32 {
        self as u32
    }

    pub fn needs_jump_flooding(self) -> bool {
        self != BorderMode::NoBorders
    }
}

pub const BORDER_RANGE_MIN: f32 = 0.1;
pub const BORDER_RANGE_MAX: f32 = 5.0;

/// Public settings controlling the compositing pipeline.
///
/// Scalar parameters are read every frame; the buffer-shape parameters
/// (`compute_resolution`, `render_resolution`, `max_emitter_count`, `colors.len()`)
/// take effect through the renderer's `configure` call, which the plugin issues
/// whenever this resource changes.
#[derive(Resource, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetaballAreaSettings {
    /// Size of the buffers in which all computations are performed.
    pub compute_resolution: TexSize,
    /// Size of the final texture. Raised to `compute_resolution` when smaller.
    pub render_resolution: TexSize,
    /// Emitters beyond this count are ignored.
    pub max_emitter_count: u32,
    /// World-space extent mapped onto the field; emitters outside are not drawn.
    pub range: f32,
    /// Smooth-min blend width in hundredths of the field half-extent. 0 = hard union.
    pub smooth: f32,
    pub border_mode: BorderMode,
    /// Opacity over the normalized distance to the border.
    pub border_opacity: OpacityCurve,
    /// Border thickness in normalized field units (the field spans -1..1).
    pub border_range: f32,
    /// Shared border color for [`BorderMode::GroupAllAreas`].
    pub border_color: LinearRgba,
    /// Palette entry used for texels outside every blob. `None` = last color.
    pub background_area: Option<u32>,
    /// One color per area id.
    pub colors: Vec<LinearRgba>,
    /// Spawn a sprite presenting the result (requires the `present` feature).
    pub present_via_sprite: bool,
}

impl Default for MetaballAreaSettings {
    fn default() -> Self {
        Self {
            compute_resolution: TexSize::S512,
            render_resolution: TexSize::S512,
            max_emitter_count: 64,
            range: 10.0,
            smooth: 25.0,
            border_mode: BorderMode::SplitAreas,
            border_opacity: OpacityCurve::default(),
            border_range: 0.3,
            border_color: LinearRgba::WHITE,
            background_area: None,
            colors: vec![
                LinearRgba::rgb(0.9, 0.2, 0.2),
                LinearRgba::rgb(0.2, 0.7, 0.3),
                LinearRgba::rgb(0.2, 0.4, 0.9),
                LinearRgba::rgb(0.05, 0.05, 0.08),
            ],
            present_via_sprite: false,
        }
    }
}

impl MetaballAreaSettings {
    pub fn with_compute_resolution(mut self, size: TexSize) -> Self {
        self.compute_resolution = size;
        self
    }
    pub fn with_render_resolution(mut self, size: TexSize) -> Self {
        self.render_resolution = size;
        self
    }
    pub fn with_max_emitters(mut self, count: u32) -> Self {
        self.max_emitter_count = count;
        self
    }
    pub fn with_range(mut self, range: f32) -> Self {
        self.range = range;
        self
    }
    pub fn with_smooth(mut self, smooth: f32) -> Self {
        self.smooth = smooth;
        self
    }
    pub fn with_border_mode(mut self, mode: BorderMode) -> Self {
        self.border_mode = mode;
        self
    }
    pub fn with_border_range(mut self, range: f32) -> Self {
        self.border_range = range;
        self
    }
    pub fn with_border_opacity(mut self, curve: OpacityCurve) -> Self {
        self.border_opacity = curve;
        self
    }
    pub fn with_colors(mut self, colors: Vec<LinearRgba>) -> Self {
        self.colors = colors;
        self
    }
    pub fn with_background_area(mut self, area: Option<u32>) -> Self {
        self.background_area = area;
        self
    }
    /// Enable/disable the built-in presentation sprite (requires `present` crate feature).
    pub fn with_presentation(mut self, enabled: bool) -> Self {
        self.present_via_sprite = enabled;
        self
    }

    pub fn compute_size(&self) -> u32 {
        self.compute_resolution.pixels()
    }

    pub fn render_size(&self) -> u32 {
        self.render_resolution.max(self.compute_resolution).pixels()
    }

    pub fn area_count(&self) -> u32 {
        self.colors.len() as u32
    }

    pub fn uses_upscale(&self) -> bool {
        self.render_resolution > self.compute_resolution
    }

    /// Resolved background palette index.
    pub fn background_index(&self) -> u32 {
        let last = self.area_count().saturating_sub(1);
        self.background_area.map_or(last, |a| a.min(last))
    }

    /// Copy with every out-of-range value corrected at the configuration boundary.
    pub fn sanitized(&self) -> Self {
        let mut s = self.clone();
        if s.render_resolution < s.compute_resolution {
            s.render_resolution = s.compute_resolution;
        }
        s.max_emitter_count = s.max_emitter_count.max(1);
        if !(s.range.is_finite() && s.range > 0.0) {
            s.range = 1.0;
        }
        if !(s.smooth.is_finite() && s.smooth >= 0.0) {
            s.smooth = 0.0;
        }
        s.border_range = if s.border_range.is_finite() {
            s.border_range.clamp(BORDER_RANGE_MIN, BORDER_RANGE_MAX)
        } else {
            BORDER_RANGE_MIN
        };
        if s.colors.is_empty() {
            s.colors.push(LinearRgba::BLACK);
        }
        if let Some(area) = s.background_area {
            if area >= s.area_count() {
                s.background_area = None;
            }
        }
        s
    }

    /// Produce validation warnings (non-fatal) for values `sanitized` would change
    /// or that are likely mistakes.
    pub fn validate(&self) -> Vec<String> {
        let mut w = Vec::new();
        if self.render_resolution < self.compute_resolution {
            w.push(format!(
                "render_resolution {} smaller than compute_resolution {}; raised to match",
                self.render_resolution.pixels(),
                self.compute_resolution.pixels()
            ));
        }
        if self.max_emitter_count == 0 {
            w.push("max_emitter_count is 0; raised to 1".into());
        }
        if !(self.range.is_finite() && self.range > 0.0) {
            w.push(format!("range {} must be > 0", self.range));
        }
        if !(self.smooth.is_finite() && self.smooth >= 0.0) {
            w.push(format!("smooth {} must be >= 0", self.smooth));
        }
        if !(BORDER_RANGE_MIN..=BORDER_RANGE_MAX).contains(&self.border_range) {
            w.push(format!(
                "border_range {} outside {BORDER_RANGE_MIN}..{BORDER_RANGE_MAX}; clamped",
                self.border_range
            ));
        }
        if self.colors.is_empty() {
            w.push("colors is empty; a single black area is used".into());
        }
        if let Some(area) = self.background_area {
            if area >= self.area_count() {
                w.push(format!(
                    "background_area {area} outside palette of {} colors; using last color",
                    self.colors.len()
                ));
            }
        }
        let texels = self.compute_size() as u64 * self.compute_size() as u64;
        if texels * self.colors.len().max(1) as u64 > 64 * 1024 * 1024 {
            w.push(format!(
                "distance field of {} areas at {}px is very large; expect high memory use",
                self.colors.len(),
                self.compute_size()
            ));
        }
        w
    }

    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let txt = fs::read_to_string(path)?;
        Ok(ron::from_str(&txt)?)
    }

    /// Loads `path`, falling back to defaults. The error (if any) is returned for logging.
    pub fn load_or_default(path: impl AsRef<Path>) -> (Self, Option<String>) {
        match Self::load_from_file(path.as_ref()) {
            Ok(cfg) => (cfg, None),
            Err(e) => (
                Self::default(),
                Some(format!("{}: {e}", path.as_ref().display())),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn tex_size_exponents() {
        assert_eq!(TexSize::S32.pixels(), 32);
        assert_eq!(TexSize::S4096.pixels(), 4096);
        assert_eq!(TexSize::S512.exponent(), 9);
        assert_eq!(TexSize::from_pixels(1024), Some(TexSize::S1024));
        assert_eq!(TexSize::from_pixels(1000), None);
    }

    #[test]
    fn render_resolution_is_raised_never_lowered() {
        for compute in TexSize::ALL {
            for render in TexSize::ALL {
                let s = MetaballAreaSettings::default()
                    .with_compute_resolution(compute)
                    .with_render_resolution(render)
                    .sanitized();
                assert!(s.render_resolution >= s.compute_resolution);
                assert_eq!(s.render_resolution, render.max(compute));
                assert_eq!(s.uses_upscale(), render > compute);
            }
        }
    }

    #[test]
    fn sanitize_clamps_scalars() {
        let s = MetaballAreaSettings {
            max_emitter_count: 0,
            range: -4.0,
            smooth: f32::NAN,
            border_range: 12.0,
            colors: Vec::new(),
            background_area: Some(9),
            ..default()
        }
        .sanitized();
        assert_eq!(s.max_emitter_count, 1);
        assert_eq!(s.range, 1.0);
        assert_eq!(s.smooth, 0.0);
        assert_eq!(s.border_range, BORDER_RANGE_MAX);
        assert_eq!(s.colors.len(), 1);
        assert_eq!(s.background_area, None);
    }

    #[test]
    fn background_defaults_to_last_color() {
        let s = MetaballAreaSettings::default();
        assert_eq!(s.background_index(), 3);
        assert_eq!(s.with_background_area(Some(1)).background_index(), 1);
    }

    #[test]
    fn defaults_validate_clean() {
        assert!(MetaballAreaSettings::default().validate().is_empty());
    }

    #[test]
    fn validate_reports_problems() {
        let bad = MetaballAreaSettings::default()
            .with_compute_resolution(TexSize::S1024)
            .with_render_resolution(TexSize::S256)
            .with_border_range(0.0)
            .with_range(0.0)
            .with_colors(Vec::new());
        let warnings = bad.validate();
        let joined = warnings.join(" | ");
        assert!(joined.contains("render_resolution"), "{joined}");
        assert!(joined.contains("border_range"), "{joined}");
        assert!(joined.contains("range 0"), "{joined}");
        assert!(joined.contains("colors is empty"), "{joined}");
    }

    #[test]
    fn loads_partial_ron() {
        let mut f = tempfile::NamedTempFile::new().expect("temp file");
        write!(
            f,
            r#"(
                compute_resolution: 256,
                render_resolution: 1024,
                border_mode: GroupAllAreas,
                smooth: 0.0,
                colors: [
                    (red: 1.0, green: 0.0, blue: 0.0, alpha: 1.0),
                    (red: 0.0, green: 0.0, blue: 1.0, alpha: 1.0),
                ],
            )"#
        )
        .expect("write");
        let cfg = MetaballAreaSettings::load_from_file(f.path()).expect("parse settings");
        assert_eq!(cfg.compute_resolution, TexSize::S256);
        assert_eq!(cfg.render_size(), 1024);
        assert_eq!(cfg.border_mode, BorderMode::GroupAllAreas);
        assert_eq!(cfg.area_count(), 2);
        assert_eq!(cfg.max_emitter_count, 64);
    }

    #[test]
    fn load_or_default_missing_file() {
        let (cfg, err) = MetaballAreaSettings::load_or_default("definitely/missing/areas.ron");
        assert_eq!(cfg, MetaballAreaSettings::default());
        assert!(err.is_some());
    }
}
