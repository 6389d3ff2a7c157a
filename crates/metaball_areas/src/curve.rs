use bevy::math::curve::{Curve, UnevenSampleAutoCurve};
use serde::{Deserialize, Serialize};

/// One control point of an [`OpacityCurve`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CurveKey {
    pub time: f32,
    pub value: f32,
}

impl CurveKey {
    pub const fn new(time: f32, value: f32) -> Self {
        Self { time, value }
    }
}

/// Piecewise linear falloff curve used to shape border opacity.
///
/// Keys are kept sorted by time. Evaluation clamps to the first / last key
/// outside their range; an empty curve is fully opaque everywhere. Keys with
/// a repeated time keep the first value.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "Vec<CurveKey>", into = "Vec<CurveKey>")]
pub struct OpacityCurve {
    keys: Vec<CurveKey>,
    sampled: Sampled,
}

#[derive(Debug, Clone)]
enum Sampled {
    Opaque,
    Constant(f32),
    Keyed(UnevenSampleAutoCurve<f32>),
}

impl PartialEq for OpacityCurve {
    fn eq(&self, other: &Self) -> bool {
        self.keys == other.keys
    }
}

impl Default for OpacityCurve {
    fn default() -> Self {
        Self::linear(1.0, 0.0)
    }
}

impl From<Vec<CurveKey>> for OpacityCurve {
    fn from(keys: Vec<CurveKey>) -> Self {
        Self::from_keys(keys)
    }
}

impl From<OpacityCurve> for Vec<CurveKey> {
    fn from(curve: OpacityCurve) -> Self {
        curve.keys
    }
}

impl OpacityCurve {
    pub fn from_keys(mut keys: Vec<CurveKey>) -> Self {
        keys.retain(|k| k.time.is_finite() && k.value.is_finite());
        keys.sort_by(|a, b| a.time.total_cmp(&b.time));
        keys.dedup_by(|later, earlier| later.time == earlier.time);
        let sampled = match keys.as_slice() {
            [] => Sampled::Opaque,
            [only] => Sampled::Constant(only.value),
            _ => UnevenSampleAutoCurve::new(keys.iter().map(|k| (k.time, k.value)))
                .map_or(Sampled::Opaque, Sampled::Keyed),
        };
        Self { keys, sampled }
    }

    /// Straight ramp from `start` at t=0 to `end` at t=1.
    pub fn linear(start: f32, end: f32) -> Self {
        Self::from_keys(vec![CurveKey::new(0.0, start), CurveKey::new(1.0, end)])
    }

    pub fn constant(value: f32) -> Self {
        Self::from_keys(vec![CurveKey::new(0.0, value)])
    }

    pub fn keys(&self) -> &[CurveKey] {
        &self.keys
    }

    pub fn evaluate(&self, t: f32) -> f32 {
        match &self.sampled {
            Sampled::Opaque => 1.0,
            Sampled::Constant(value) => *value,
            Sampled::Keyed(curve) => curve.sample_clamped(t),
        }
    }
}
