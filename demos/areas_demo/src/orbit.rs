use bevy::prelude::*;
use metaball_areas::{AreaEmitter, Emitter, EmitterId, EmitterSet, MetaballAreaSettings};
use rand::prelude::*;

/// Circular path an emitter follows around the field center.
#[derive(Component, Debug, Clone, Copy)]
pub struct Orbit {
    pub radius: f32,
    /// Radians per second; negative orbits clockwise.
    pub speed: f32,
    pub phase: f32,
}

impl Orbit {
    pub fn position(&self, t: f32) -> Vec3 {
        let a = self.phase + self.speed * t;
        Vec3::new(a.cos() * self.radius, a.sin() * self.radius, 0.0)
    }
}

/// One randomly placed blob: its orbit, radius and area.
#[derive(Debug, Clone, Copy)]
pub struct Blob {
    pub orbit: Orbit,
    pub radius: f32,
    pub area: u32,
}

/// Generates `count` blobs spread over the field of `settings`. Blobs cycle
/// through every area except the background one.
pub fn random_blobs(
    settings: &MetaballAreaSettings,
    count: usize,
    seed: Option<u64>,
) -> Vec<Blob> {
    let mut rng = match seed {
        Some(s) => StdRng::seed_from_u64(s),
        None => StdRng::from_entropy(),
    };
    let half = settings.range * 0.5;
    let background = settings.background_index();
    let mut areas: Vec<u32> = (0..settings.area_count())
        .filter(|a| *a != background)
        .collect();
    if areas.is_empty() {
        areas.push(0);
    }
    (0..count)
        .map(|i| {
            let radius = rng.gen_range(0.06..0.14) * settings.range;
            Blob {
                orbit: Orbit {
                    radius: rng.gen_range(0.0..(half - radius).max(0.1)),
                    speed: rng.gen_range(0.2..0.8) * if rng.gen_bool(0.5) { 1.0 } else { -1.0 },
                    phase: rng.gen_range(0.0..std::f32::consts::TAU),
                },
                radius,
                area: areas[i % areas.len()],
            }
        })
        .collect()
}

/// Moves `set` to time `t` (headless path).
pub fn place(set: &mut EmitterSet, blobs: &[Blob], t: f32) {
    for (i, blob) in blobs.iter().enumerate() {
        set.add(
            EmitterId(i as u64),
            Emitter::new(blob.orbit.position(t), blob.radius, blob.area),
        );
    }
}

#[derive(Resource, Clone)]
pub struct DemoBlobs(pub Vec<Blob>);

pub struct OrbitPlugin;

impl Plugin for OrbitPlugin {
    fn build(&self, app: &mut App) {
        app.add_systems(Startup, spawn_blobs)
            .add_systems(Update, move_blobs);
    }
}

fn spawn_blobs(mut commands: Commands, blobs: Res<DemoBlobs>) {
    for blob in &blobs.0 {
        commands.spawn((
            AreaEmitter::new(blob.area, blob.radius),
            Transform::from_translation(blob.orbit.position(0.0)),
            blob.orbit,
        ));
    }
    info!("Spawned {} area emitters", blobs.0.len());
}

fn move_blobs(time: Res<Time>, mut q: Query<(&mut Transform, &Orbit)>) {
    let t = time.elapsed_secs();
    for (mut tr, orbit) in q.iter_mut() {
        tr.translation = orbit.position(t);
    }
}
