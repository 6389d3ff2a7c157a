//! Render-world integration of [`GpuBackend`](crate::backend::GpuBackend).
//!
//! The main world mirrors emitter entities, packs them into field space and
//! hands the packed frame to the render world through [`GpuAreaFrame`]. The
//! render world owns the renderer, records the kernel dispatches during
//! `Prepare` and encodes them from the [`AreaPassLabel`] graph node, followed
//! by a copy into the [`AreaTexture`] storage image.

mod pipeline;

use crate::emitters::{EmitterSet, PackedEmitter, SnapshotParams};
use crate::pipeline::FrameReport;
use crate::plugin::{
    field_transform, spawn_present_sprite, sync_emitters, AreaFieldAnchor, AreaFrameStats,
    AreaTexture, EmitterSink,
};
use crate::renderer::FrameStats;
use crate::settings::MetaballAreaSettings;
use bevy::prelude::*;
use bevy::render::{
    extract_resource::{ExtractResource, ExtractResourcePlugin},
    render_asset::RenderAssetUsages,
    render_graph::RenderGraph,
    render_resource::{Extent3d, TextureDimension, TextureFormat, TextureUsages},
    Render, RenderApp, RenderSet,
};
use std::sync::{Arc, Mutex, PoisonError};

pub use pipeline::AreaPassLabel;
use pipeline::{queue_area_pipelines, run_area_frame, AreaComputeNode, AreaShader, GpuAreaState};

/// Emitters driven by the GPU backend.
#[derive(Resource, Debug, Default, Deref, DerefMut)]
pub struct GpuAreaEmitters(pub EmitterSet);

impl EmitterSink for GpuAreaEmitters {
    fn emitters_mut(&mut self) -> &mut EmitterSet {
        &mut self.0
    }
}

/// One packed frame, extracted into the render world every frame.
#[derive(Resource, Clone, Debug, Default, ExtractResource)]
pub struct GpuAreaFrame {
    /// Sanitized settings the frame is rendered with.
    pub settings: MetaballAreaSettings,
    /// Bumped whenever `settings` change; the render world reconfigures on a new value.
    pub revision: u64,
    pub packed: Vec<PackedEmitter>,
    pub target: Option<Handle<Image>>,
}

/// Report of the last frame rendered in the render world.
#[derive(Resource, Clone, Default)]
pub(crate) struct GpuFrameReport(Arc<Mutex<Option<FrameReport>>>);

impl GpuFrameReport {
    pub(crate) fn store(&self, report: Option<FrameReport>) {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner) = report;
    }

    fn latest(&self) -> Option<FrameReport> {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Drives [`MetaballAreas`](crate::MetaballAreas) over the render device. Added
/// by [`MetaballAreasPlugin`](crate::MetaballAreasPlugin) for
/// [`AreaBackend::Gpu`](crate::AreaBackend::Gpu).
pub struct GpuAreasPlugin;

impl Plugin for GpuAreasPlugin {
    fn build(&self, app: &mut App) {
        let report = GpuFrameReport::default();
        app.init_resource::<GpuAreaEmitters>()
            .init_resource::<GpuAreaFrame>()
            .insert_resource(report.clone())
            .add_plugins(ExtractResourcePlugin::<GpuAreaFrame>::default())
            .add_systems(Startup, setup_gpu_target)
            .add_systems(
                PostUpdate,
                (sync_emitters::<GpuAreaEmitters>, pack_gpu_frame, resize_gpu_target)
                    .chain()
                    .after(TransformSystem::TransformPropagate),
            );

        let shader = match app.world_mut().get_resource_mut::<Assets<Shader>>() {
            Some(mut shaders) => crate::embedded_shaders::add_area_shader(&mut shaders),
            None => {
                warn!(target: "metaball_areas", "no shader assets; GPU areas will not render");
                return;
            }
        };
        let Some(render_app) = app.get_sub_app_mut(RenderApp) else {
            warn!(target: "metaball_areas", "no render app; GPU areas will not render");
            return;
        };
        render_app
            .insert_resource(AreaShader(shader))
            .insert_resource(report)
            .init_resource::<GpuAreaState>()
            .add_systems(
                Render,
                (queue_area_pipelines, run_area_frame)
                    .chain()
                    .in_set(RenderSet::Prepare),
            );

        let mut graph = render_app.world_mut().resource_mut::<RenderGraph>();
        graph.add_node(AreaPassLabel, AreaComputeNode::default());
        if graph
            .try_add_node_edge(AreaPassLabel, bevy::render::graph::CameraDriverLabel)
            .is_err()
        {
            debug!(target: "metaball_areas", "no camera driver node; area pass runs unordered");
        }
    }
}

/// Storage image the render world presents into. Sampled as linear color.
fn storage_target(size: u32) -> Image {
    let mut image = Image::new_fill(
        Extent3d {
            width: size,
            height: size,
            depth_or_array_layers: 1,
        },
        TextureDimension::D2,
        &[0u8; 4],
        TextureFormat::Rgba8Unorm,
        RenderAssetUsages::default(),
    );
    image.texture_descriptor.usage =
        TextureUsages::STORAGE_BINDING | TextureUsages::TEXTURE_BINDING | TextureUsages::COPY_DST;
    image
}

fn setup_gpu_target(
    mut commands: Commands,
    images: Option<ResMut<Assets<Image>>>,
    settings: Res<MetaballAreaSettings>,
) {
    let Some(mut images) = images else {
        debug!(target: "metaball_areas", "no image assets; presentation disabled");
        return;
    };
    let size = settings.sanitized().render_size();
    let handle = images.add(storage_target(size));
    spawn_present_sprite(&mut commands, &settings, &handle);
    commands.insert_resource(AreaTexture(handle));
    info!(target: "metaball_areas", "created GPU area target {}x{}", size, size);
}

fn pack_gpu_frame(
    settings: Res<MetaballAreaSettings>,
    mut emitters: ResMut<GpuAreaEmitters>,
    anchor: Query<&GlobalTransform, With<AreaFieldAnchor>>,
    texture: Option<Res<AreaTexture>>,
    report: Res<GpuFrameReport>,
    mut frame: ResMut<GpuAreaFrame>,
    mut stats: ResMut<AreaFrameStats>,
) {
    let frame = &mut *frame;
    if settings.is_changed() {
        for w in settings.validate() {
            warn!(target: "metaball_areas", "settings: {w}");
        }
        frame.settings = settings.sanitized();
        frame.revision += 1;
    }
    let params = SnapshotParams::new(&frame.settings, field_transform(&anchor));
    let snapshot = emitters.snapshot(&params, &mut frame.packed);
    frame.target = texture.map(|t| t.0.clone());
    // the render world reports one frame behind
    stats.0 = report.latest().map(|report| FrameStats { snapshot, report });
}

fn resize_gpu_target(
    settings: Res<MetaballAreaSettings>,
    texture: Option<Res<AreaTexture>>,
    images: Option<ResMut<Assets<Image>>>,
) {
    let (Some(texture), Some(mut images)) = (texture, images) else {
        return;
    };
    if !settings.is_changed() {
        return;
    }
    let size = settings.sanitized().render_size();
    let Some(image) = images.get_mut(&texture.0) else {
        return;
    };
    let current = image.texture_descriptor.size;
    if (current.width, current.height) != (size, size) {
        image.resize(Extent3d {
            width: size,
            height: size,
            depth_or_array_layers: 1,
        });
        debug!(target: "metaball_areas", "GPU area target resized to {}px", size);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::{AreaBackend, AreaEmitter, MetaballAreasPlugin};
    use crate::settings::TexSize;
    use bevy::asset::AssetPlugin;

    fn app() -> App {
        let mut app = App::new();
        app.add_plugins((MinimalPlugins, AssetPlugin::default()));
        app.init_asset::<Image>();
        app.add_plugins(
            MetaballAreasPlugin::with(
                MetaballAreaSettings::default()
                    .with_compute_resolution(TexSize::S32)
                    .with_render_resolution(TexSize::S64),
            )
            .with_backend(AreaBackend::Gpu),
        );
        app
    }

    fn spawn_emitter(app: &mut App, x: f32, area: u32) -> Entity {
        app.world_mut()
            .spawn((
                AreaEmitter::new(area, 1.0),
                Transform::from_xyz(x, 0.0, 0.0),
                GlobalTransform::from_xyz(x, 0.0, 0.0),
            ))
            .id()
    }

    #[test]
    fn packs_emitters_for_the_render_world() {
        let mut app = app();
        spawn_emitter(&mut app, 0.0, 0);
        spawn_emitter(&mut app, 1.0, 1);
        spawn_emitter(&mut app, 40.0, 1);
        app.update();

        let frame = app.world().resource::<GpuAreaFrame>();
        assert_eq!(frame.revision, 1);
        assert_eq!(frame.packed.len(), 2);
        assert_eq!(frame.packed[0].area, 0);
        assert!(frame.target.is_some());
        // nothing rendered without a render world
        assert!(app.world().resource::<AreaFrameStats>().0.is_none());
    }

    #[test]
    fn settings_changes_bump_the_revision() {
        let mut app = app();
        app.update();
        app.update();
        assert_eq!(app.world().resource::<GpuAreaFrame>().revision, 1);

        app.world_mut()
            .resource_mut::<MetaballAreaSettings>()
            .render_resolution = TexSize::S128;
        app.update();
        let frame = app.world().resource::<GpuAreaFrame>();
        assert_eq!(frame.revision, 2);
        assert_eq!(frame.settings.render_size(), 128);
    }

    #[test]
    fn target_is_a_storage_image_that_follows_the_render_size() {
        let mut app = app();
        app.update();
        let handle = app.world().resource::<AreaTexture>().0.clone();
        let image = app.world().resource::<Assets<Image>>().get(&handle).cloned();
        let image = image.expect("target image");
        assert_eq!(image.texture_descriptor.format, TextureFormat::Rgba8Unorm);
        assert!(image
            .texture_descriptor
            .usage
            .contains(TextureUsages::STORAGE_BINDING));
        assert_eq!(image.texture_descriptor.size.width, 64);

        app.world_mut()
            .resource_mut::<MetaballAreaSettings>()
            .render_resolution = TexSize::S128;
        app.update();
        let images = app.world().resource::<Assets<Image>>();
        let size = images.get(&handle).expect("target image").texture_descriptor.size;
        assert_eq!((size.width, size.height), (128, 128));
    }

    #[test]
    fn render_reports_reach_the_frame_stats() {
        let mut app = app();
        spawn_emitter(&mut app, 0.0, 0);
        let report = FrameReport {
            emitters: 1,
            dispatches: 4,
            ..FrameReport::default()
        };
        app.world().resource::<GpuFrameReport>().store(Some(report));
        app.update();
        let stats = app.world().resource::<AreaFrameStats>().0.expect("stats");
        assert_eq!(stats.snapshot.packed, 1);
        assert_eq!(stats.report, report);
    }
}
