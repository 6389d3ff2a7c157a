//! Border gradient lookup table baked from an [`OpacityCurve`].

use crate::curve::OpacityCurve;

/// Sample count of the border lookup texture.
pub const BORDER_GRADIENT_RESOLUTION: u32 = 512;

/// 1-D R8 lookup of border opacity indexed by normalized distance to the border.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BorderGradientLut {
    texels: Vec<u8>,
}

impl BorderGradientLut {
    /// Samples `curve` at `i / (resolution - 1)` for every texel.
    pub fn build(curve: &OpacityCurve, resolution: u32) -> Self {
        let resolution = resolution.max(2) as usize;
        let denom = (resolution - 1) as f32;
        let texels = (0..resolution)
            .map(|i| quantize(curve.evaluate(i as f32 / denom)))
            .collect();
        Self { texels }
    }

    pub fn resolution(&self) -> u32 {
        self.texels.len() as u32
    }

    pub fn texels(&self) -> &[u8] {
        &self.texels
    }
}

/// Linear lookup into raw LUT texels, `t` clamped to `[0, 1]`.
pub(crate) fn sample_luminance(texels: &[u8], t: f32) -> f32 {
    match texels.len() {
        0 => 1.0,
        1 => texels[0] as f32 / 255.0,
        len => {
            let pos = t.clamp(0.0, 1.0) * (len - 1) as f32;
            let i0 = pos.floor() as usize;
            let i1 = (i0 + 1).min(len - 1);
            let f = pos - i0 as f32;
            let a = texels[i0] as f32 / 255.0;
            let b = texels[i1] as f32 / 255.0;
            a + (b - a) * f
        }
    }
}

fn quantize(v: f32) -> u8 {
    (v.clamp(0.0, 1.0) * 255.0).round() as u8
}

/// Keeps the last built LUT and rebuilds only when its inputs change.
#[derive(Debug, Default)]
pub struct BorderGradientCache {
    source: Option<(OpacityCurve, u32)>,
    lut: Option<BorderGradientLut>,
}

impl BorderGradientCache {
    /// Returns the LUT for `curve` and whether it had to be rebuilt.
    pub fn get_or_build(
        &mut self,
        curve: &OpacityCurve,
        resolution: u32,
    ) -> (&BorderGradientLut, bool) {
        let stale = self
            .source
            .as_ref()
            .is_none_or(|(c, r)| c != curve || *r != resolution);
        if stale {
            self.source = Some((curve.clone(), resolution));
            self.lut = None;
        }
        let lut = self
            .lut
            .get_or_insert_with(|| BorderGradientLut::build(curve, resolution));
        (lut, stale)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::curve::CurveKey;

    #[test]
    fn endpoints_match_curve() {
        let curve = OpacityCurve::linear(1.0, 0.0);
        let lut = BorderGradientLut::build(&curve, BORDER_GRADIENT_RESOLUTION);
        assert_eq!(lut.resolution(), 512);
        assert_eq!(lut.texels()[0], 255);
        assert_eq!(lut.texels()[511], 0);
        assert!((sample_luminance(lut.texels(), 0.5) - 0.5).abs() < 0.01);
        assert_eq!(sample_luminance(lut.texels(), -3.0), 1.0);
    }

    #[test]
    fn build_is_deterministic() {
        let curve = OpacityCurve::from_keys(vec![
            CurveKey::new(0.0, 0.0),
            CurveKey::new(0.3, 1.0),
            CurveKey::new(1.0, 0.0),
        ]);
        assert_eq!(BorderGradientLut::build(&curve, 64), BorderGradientLut::build(&curve, 64));
    }

    #[test]
    fn degenerate_resolution_is_raised() {
        let lut = BorderGradientLut::build(&OpacityCurve::constant(0.5), 1);
        assert_eq!(lut.resolution(), 2);
        assert_eq!(lut.texels(), &[128, 128]);
    }

    #[test]
    fn cache_rebuilds_only_on_change() {
        let mut cache = BorderGradientCache::default();
        let curve = OpacityCurve::default();
        assert!(cache.get_or_build(&curve, 512).1);
        assert!(!cache.get_or_build(&curve, 512).1);
        assert!(cache.get_or_build(&curve, 256).1);
        assert!(cache.get_or_build(&OpacityCurve::constant(1.0), 256).1);
    }
}
