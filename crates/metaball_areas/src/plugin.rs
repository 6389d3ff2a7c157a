use crate::backend::{ComputeBackend, DynBackend, FragmentBackend};
use crate::diagnostics::AreaDiagnosticsPlugin;
use crate::emitters::{Emitter, EmitterId, EmitterSet};
use crate::error::PipelineError;
use crate::gpu::GpuAreasPlugin;
use crate::present::PresentedFrame;
use crate::renderer::{FrameStats, MetaballAreas};
use crate::settings::MetaballAreaSettings;
use bevy::prelude::*;

/// Marks an entity as a blob of `area`, placed at its `GlobalTransform`.
#[derive(Component, Debug, Clone, Copy, PartialEq)]
#[require(Transform)]
pub struct AreaEmitter {
    pub area: u32,
    /// World-space radius, multiplied by the entity's x scale.
    pub radius: f32,
}

impl AreaEmitter {
    pub fn new(area: u32, radius: f32) -> Self {
        Self { area, radius }
    }
}

/// Entity whose transform defines the field frame; without one the field is
/// centered on the world origin.
#[derive(Component, Debug, Default, Clone, Copy)]
pub struct AreaFieldAnchor;

/// Which backend the plugin drives.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AreaBackend {
    #[default]
    Compute,
    Fragment,
    /// WGSL compute passes in the render graph. Needs the render plugins.
    Gpu,
}

impl AreaBackend {
    /// CPU backend instance, or `None` for [`AreaBackend::Gpu`] which lives in
    /// the render world.
    pub fn software(self) -> Option<DynBackend> {
        match self {
            AreaBackend::Compute => Some(Box::new(ComputeBackend::new())),
            AreaBackend::Fragment => Some(Box::new(FragmentBackend::new())),
            AreaBackend::Gpu => None,
        }
    }
}

#[derive(Resource, Deref, DerefMut)]
pub struct AreaRenderer(pub MetaballAreas<DynBackend>);

/// Image asset the composited result is copied into every frame.
#[derive(Resource, Clone, Debug)]
pub struct AreaTexture(pub Handle<Image>);

/// Stats of the most recent frame (`None` until one rendered).
#[derive(Resource, Debug, Default, Clone, Copy)]
pub struct AreaFrameStats(pub Option<FrameStats>);

/// Resource holding the emitter set that entity changes are mirrored into.
pub(crate) trait EmitterSink: Resource {
    fn emitters_mut(&mut self) -> &mut EmitterSet;
}

impl EmitterSink for AreaRenderer {
    fn emitters_mut(&mut self) -> &mut EmitterSet {
        self.0.emitters_mut()
    }
}

#[cfg(feature = "present")]
#[derive(Component)]
struct AreaPresentSprite;

pub struct MetaballAreasPlugin {
    pub settings: MetaballAreaSettings,
    pub backend: AreaBackend,
}

impl Default for MetaballAreasPlugin {
    fn default() -> Self {
        Self {
            settings: MetaballAreaSettings::default(),
            backend: AreaBackend::default(),
        }
    }
}

impl MetaballAreasPlugin {
    pub fn with(settings: MetaballAreaSettings) -> Self {
        Self {
            settings,
            ..default()
        }
    }

    pub fn with_backend(mut self, backend: AreaBackend) -> Self {
        self.backend = backend;
        self
    }
}

impl Plugin for MetaballAreasPlugin {
    fn build(&self, app: &mut App) {
        app.insert_resource(self.settings.clone())
            .init_resource::<AreaFrameStats>()
            .add_plugins(AreaDiagnosticsPlugin);
        #[cfg(feature = "present")]
        app.add_systems(PostUpdate, resize_present_sprite);

        let Some(backend) = self.backend.software() else {
            app.add_plugins(GpuAreasPlugin);
            return;
        };
        // emitters are read after propagation so they never lag their transforms
        app.insert_resource(AreaRenderer(MetaballAreas::new(backend)))
            .add_systems(Startup, setup_area_texture)
            .add_systems(
                PostUpdate,
                (
                    sync_emitters::<AreaRenderer>,
                    apply_settings,
                    render_areas,
                    present_areas,
                )
                    .chain()
                    .after(TransformSystem::TransformPropagate),
            );
    }
}

fn setup_area_texture(
    mut commands: Commands,
    images: Option<ResMut<Assets<Image>>>,
    settings: Res<MetaballAreaSettings>,
) {
    let Some(mut images) = images else {
        debug!(target: "metaball_areas", "no image assets; presentation disabled");
        return;
    };
    let size = settings.sanitized().render_size();
    let blank = PresentedFrame::new(size, size, vec![[0.0; 4]; (size * size) as usize]);
    let handle = images.add(blank.to_image());
    spawn_present_sprite(&mut commands, &settings, &handle);
    commands.insert_resource(AreaTexture(handle));
}

/// Shows `image` over the field when the settings ask for it.
pub(crate) fn spawn_present_sprite(
    commands: &mut Commands,
    settings: &MetaballAreaSettings,
    image: &Handle<Image>,
) {
    #[cfg(feature = "present")]
    if settings.present_via_sprite {
        commands.spawn((
            Sprite {
                image: image.clone(),
                custom_size: Some(Vec2::splat(settings.range)),
                ..default()
            },
            AreaPresentSprite,
        ));
    }
    #[cfg(not(feature = "present"))]
    let _ = (commands, settings, image);
}

pub(crate) fn sync_emitters<S: EmitterSink>(
    mut sink: ResMut<S>,
    changed: Query<
        (Entity, &AreaEmitter, &GlobalTransform),
        Or<(Changed<AreaEmitter>, Changed<GlobalTransform>)>,
    >,
    mut removed: RemovedComponents<AreaEmitter>,
) {
    let set = sink.emitters_mut();
    for entity in removed.read() {
        set.remove(EmitterId(entity.to_bits()));
    }
    for (entity, emitter, gt) in changed.iter() {
        let scale = gt.compute_transform().scale.x;
        set.add(
            EmitterId(entity.to_bits()),
            Emitter::new(gt.translation(), emitter.radius, emitter.area).with_scale(scale),
        );
    }
}

/// World to field transform of the anchor, identity without one.
pub(crate) fn field_transform(anchor: &Query<&GlobalTransform, With<AreaFieldAnchor>>) -> Mat4 {
    anchor
        .single()
        .map(|gt| gt.compute_matrix().inverse())
        .unwrap_or(Mat4::IDENTITY)
}

fn apply_settings(settings: Res<MetaballAreaSettings>, mut renderer: ResMut<AreaRenderer>) {
    if !settings.is_changed() {
        return;
    }
    // failures are logged by `configure`; frames stay refused until the next change
    if let Ok(warnings) = renderer.configure(&settings) {
        if warnings.is_empty() {
            info!(
                target: "metaball_areas",
                "configured: compute {}px render {}px, {} areas, {:?}",
                settings.compute_size(),
                settings.render_size(),
                settings.area_count(),
                settings.border_mode
            );
        }
    }
}

fn render_areas(
    mut renderer: ResMut<AreaRenderer>,
    anchor: Query<&GlobalTransform, With<AreaFieldAnchor>>,
    mut stats: ResMut<AreaFrameStats>,
    mut last_error: Local<Option<PipelineError>>,
) {
    if !renderer.is_ready() {
        stats.0 = None;
        return;
    }
    match renderer.render_frame(field_transform(&anchor)) {
        Ok(frame) => {
            stats.0 = Some(frame);
            *last_error = None;
        }
        Err(e) => {
            if last_error.as_ref() != Some(&e) {
                error!(target: "metaball_areas", "frame dropped: {e}");
                *last_error = Some(e);
            }
            stats.0 = None;
        }
    }
}

fn present_areas(
    renderer: Res<AreaRenderer>,
    stats: Res<AreaFrameStats>,
    texture: Option<Res<AreaTexture>>,
    images: Option<ResMut<Assets<Image>>>,
) {
    let (Some(texture), Some(mut images), Some(_)) = (texture, images, stats.0) else {
        return;
    };
    let Ok(frame) = renderer.read_current() else {
        return;
    };
    if let Some(image) = images.get_mut(&texture.0) {
        frame.write_into(image);
    }
}

#[cfg(feature = "present")]
fn resize_present_sprite(
    settings: Res<MetaballAreaSettings>,
    mut sprites: Query<&mut Sprite, With<AreaPresentSprite>>,
) {
    if !settings.is_changed() {
        return;
    }
    for mut sprite in sprites.iter_mut() {
        sprite.custom_size = Some(Vec2::splat(settings.range));
    }
}
