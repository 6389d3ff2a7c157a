//! Live set of area emitters and the per-frame packing into field space.

use crate::settings::MetaballAreaSettings;
use bevy::log::warn;
use bevy::math::{Mat4, Vec3};
use static_assertions::const_assert_eq;
use std::collections::{BTreeMap, BTreeSet};

/// Opaque emitter identity. The Bevy plugin uses `Entity::to_bits()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EmitterId(pub u64);

/// A positioned, radius-scaled, area-tagged point primitive (world space).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Emitter {
    pub position: Vec3,
    pub radius: f32,
    pub local_scale: f32,
    pub area: u32,
}

impl Emitter {
    pub fn new(position: Vec3, radius: f32, area: u32) -> Self {
        Self {
            position,
            radius,
            local_scale: 1.0,
            area,
        }
    }

    pub fn with_scale(mut self, local_scale: f32) -> Self {
        self.local_scale = local_scale;
        self
    }
}

/// GPU-visible emitter layout (matches the `_Emitters` kernel binding).
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct PackedEmitter {
    /// Field-space position; the kernels use `xy`.
    pub position: [f32; 3],
    /// Radius in normalized field units.
    pub radius: f32,
    pub area: i32,
}

const_assert_eq!(std::mem::size_of::<PackedEmitter>(), 20);

/// Inputs of one packing pass.
#[derive(Debug, Clone, Copy)]
pub struct SnapshotParams {
    /// World to field-local transform supplied by the scene.
    pub world_to_field: Mat4,
    /// World-space extent of the field.
    pub range: f32,
    pub max_count: u32,
    pub area_count: u32,
    /// Palette index reserved for the background. Emitters tagged with it are skipped.
    pub background: u32,
}

impl SnapshotParams {
    /// Parameters for sanitized `settings` seen through `world_to_field`.
    pub fn new(settings: &MetaballAreaSettings, world_to_field: Mat4) -> Self {
        Self {
            world_to_field,
            range: settings.range,
            max_count: settings.max_emitter_count,
            area_count: settings.area_count(),
            background: settings.background_index(),
        }
    }

    fn accepts_area(&self, area: u32) -> bool {
        area < self.area_count && area != self.background
    }
}

/// Outcome counts of one packing pass; only used for diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SnapshotStats {
    pub packed: u32,
    /// Valid emitters dropped because `max_count` was reached.
    pub truncated: u32,
    /// Emitters whose disc lies entirely outside the field.
    pub out_of_field: u32,
    /// Emitters tagged with an area outside the palette or with the background area.
    pub invalid_area: u32,
    /// Invalid emitters reported for the first time by this pass.
    pub newly_invalid: u32,
}

/// Unordered set of emitters. Iteration follows id order so packing is stable.
#[derive(Debug, Default, Clone)]
pub struct EmitterSet {
    members: BTreeMap<EmitterId, Emitter>,
    // Invalid emitters already warned about; cleared once they become valid or leave.
    reported: BTreeSet<EmitterId>,
}

impl EmitterSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or refreshes `id`. Returns true when it was not a member yet.
    pub fn add(&mut self, id: EmitterId, emitter: Emitter) -> bool {
        self.members.insert(id, emitter).is_none()
    }

    pub fn remove(&mut self, id: EmitterId) -> bool {
        self.reported.remove(&id);
        self.members.remove(&id).is_some()
    }

    pub fn contains(&self, id: EmitterId) -> bool {
        self.members.contains_key(&id)
    }

    pub fn get(&self, id: EmitterId) -> Option<&Emitter> {
        self.members.get(&id)
    }

    pub fn get_mut(&mut self, id: EmitterId) -> Option<&mut Emitter> {
        self.members.get_mut(&id)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn clear(&mut self) {
        self.members.clear();
        self.reported.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = (EmitterId, &Emitter)> {
        self.members.iter().map(|(id, e)| (*id, e))
    }

    /// Packs members into `out` (cleared first) in field space.
    ///
    /// `position' = -world_to_field(position) / (range / 2)`,
    /// `radius' = radius * local_scale / (range / 2)`.
    ///
    /// Emitters with an unusable area are skipped every frame but warned about
    /// only once, until they are fixed or removed.
    pub fn snapshot(
        &mut self,
        params: &SnapshotParams,
        out: &mut Vec<PackedEmitter>,
    ) -> SnapshotStats {
        out.clear();
        let mut stats = SnapshotStats::default();
        let half_range = params.range * 0.5;
        if half_range <= 0.0 {
            stats.out_of_field = self.members.len() as u32;
            return stats;
        }
        for (id, e) in self.members.iter() {
            if !params.accepts_area(e.area) {
                stats.invalid_area += 1;
                if self.reported.insert(*id) {
                    stats.newly_invalid += 1;
                    let reason = if e.area == params.background {
                        "the background"
                    } else {
                        "out of palette"
                    };
                    warn!(
                        target: "metaball_areas",
                        "emitter {:?} skipped: area {} is {} (palette={})",
                        id,
                        e.area,
                        reason,
                        params.area_count
                    );
                }
                continue;
            }
            self.reported.remove(id);
            let p = -params.world_to_field.transform_point3(e.position) / half_range;
            let r = e.radius * e.local_scale / half_range;
            if p.x.abs() - r.abs() > 1.0 || p.y.abs() - r.abs() > 1.0 {
                stats.out_of_field += 1;
                continue;
            }
            if out.len() as u32 >= params.max_count {
                stats.truncated += 1;
                continue;
            }
            out.push(PackedEmitter {
                position: p.to_array(),
                radius: r,
                area: e.area as i32,
            });
        }
        stats.packed = out.len() as u32;
        stats
    }
}
