use super::{GpuAreaFrame, GpuFrameReport};
use crate::backend::gpu::{kernel_layout_entries, present_layout_entries, PRESENT_ENTRY_POINT};
use crate::backend::{GpuBackend, GpuKernels, Kernel, KernelPipeline};
use crate::error::{PipelineError, Result};
use crate::pipeline::FrameReport;
use crate::renderer::MetaballAreas;
use bevy::prelude::*;
use bevy::render::{
    render_asset::RenderAssets,
    render_graph::{self, RenderLabel},
    render_resource::{
        BindGroupLayout, BindGroupLayoutEntry, CachedComputePipelineId, CachedPipelineState,
        ComputePipelineDescriptor, PipelineCache,
    },
    renderer::{RenderContext, RenderDevice, RenderQueue},
    texture::GpuImage,
};
use std::borrow::Cow;

#[derive(Debug, Hash, PartialEq, Eq, Clone, RenderLabel)]
pub struct AreaPassLabel;

#[derive(Resource)]
pub(super) struct AreaShader(pub Handle<Shader>);

struct QueuedEntry {
    name: &'static str,
    layout: BindGroupLayout,
    id: CachedComputePipelineId,
}

/// Queued compute pipelines, in [`Kernel::ALL`] order plus the present copy.
#[derive(Resource)]
pub(super) struct AreaPipelines {
    kernels: Vec<QueuedEntry>,
    present: QueuedEntry,
}

impl AreaPipelines {
    fn queue(device: &RenderDevice, cache: &PipelineCache, shader: &Handle<Shader>) -> Self {
        let queue_entry = |name: &'static str, entries: Vec<BindGroupLayoutEntry>| {
            let layout = device.create_bind_group_layout(Some(name), &entries);
            let id = cache.queue_compute_pipeline(ComputePipelineDescriptor {
                label: Some(Cow::Borrowed(name)),
                layout: vec![layout.clone()],
                push_constant_ranges: vec![],
                shader: shader.clone(),
                shader_defs: vec![],
                entry_point: Cow::Borrowed(name),
                zero_initialize_workgroup_memory: false,
            });
            QueuedEntry { name, layout, id }
        };
        let kernels = Kernel::ALL
            .iter()
            .map(|k| queue_entry(k.entry_point(), kernel_layout_entries(*k)))
            .collect();
        let present = queue_entry(PRESENT_ENTRY_POINT, present_layout_entries());
        Self { kernels, present }
    }

    fn entries(&self) -> impl Iterator<Item = &QueuedEntry> {
        self.kernels.iter().chain(std::iter::once(&self.present))
    }

    /// First entry point that failed to compile.
    fn failure(&self, cache: &PipelineCache) -> Option<String> {
        self.entries().find_map(|e| match cache.get_compute_pipeline_state(e.id) {
            CachedPipelineState::Err(err) => Some(format!("{}: {err}", e.name)),
            _ => None,
        })
    }

    /// Every compiled pipeline, once all of them are ready.
    fn resolve(&self, cache: &PipelineCache) -> Option<GpuKernels> {
        let compiled = |e: &QueuedEntry| {
            cache.get_compute_pipeline(e.id).map(|pipeline| KernelPipeline {
                layout: e.layout.clone(),
                pipeline: pipeline.clone(),
            })
        };
        let kernels = self.kernels.iter().map(compiled).collect::<Option<Vec<_>>>()?;
        GpuKernels::new(kernels, compiled(&self.present)?)
    }
}

/// Render-world renderer. Created once every pipeline compiled.
#[derive(Resource, Default)]
pub(super) struct GpuAreaState {
    renderer: Option<MetaballAreas<GpuBackend>>,
    configured: Option<u64>,
    failed: bool,
    last_error: Option<PipelineError>,
}

impl GpuAreaState {
    fn backend(&self) -> Option<&GpuBackend> {
        self.renderer.as_ref().map(MetaballAreas::backend)
    }

    /// Records this frame's dispatches and the copy into the target image.
    fn render(
        &mut self,
        frame: &GpuAreaFrame,
        images: &RenderAssets<GpuImage>,
    ) -> Result<Option<FrameReport>> {
        let Some(renderer) = self.renderer.as_mut() else {
            return Ok(None);
        };
        if self.configured != Some(frame.revision) {
            // a failed configuration is not retried until the settings change again
            self.configured = Some(frame.revision);
            renderer.configure(&frame.settings)?;
            info!(
                target: "metaball_areas",
                "GPU configured: compute {}px render {}px, {} areas",
                frame.settings.compute_size(),
                frame.settings.render_size(),
                frame.settings.area_count()
            );
        }
        let report = renderer.render_packed(&frame.packed)?;
        let target = frame.target.as_ref().and_then(|t| images.get(t));
        if let (Some(target), Some(source)) = (target, renderer.current_texture()) {
            let size = UVec2::new(target.size.width, target.size.height);
            renderer.backend().present(source, &target.texture_view, size)?;
        }
        Ok(Some(report))
    }
}

pub(super) fn queue_area_pipelines(
    mut commands: Commands,
    device: Res<RenderDevice>,
    cache: Res<PipelineCache>,
    shader: Res<AreaShader>,
    pipelines: Option<Res<AreaPipelines>>,
) {
    if pipelines.is_some() {
        return;
    }
    commands.insert_resource(AreaPipelines::queue(&device, &cache, &shader.0));
    debug!(target: "metaball_areas", "queued {} compute pipelines", Kernel::ALL.len() + 1);
}

#[allow(clippy::too_many_arguments)]
pub(super) fn run_area_frame(
    frame: Option<Res<GpuAreaFrame>>,
    pipelines: Option<Res<AreaPipelines>>,
    cache: Res<PipelineCache>,
    device: Res<RenderDevice>,
    queue: Res<RenderQueue>,
    images: Res<RenderAssets<GpuImage>>,
    report: Res<GpuFrameReport>,
    mut state: ResMut<GpuAreaState>,
) {
    let (Some(frame), Some(pipelines)) = (frame, pipelines) else {
        return;
    };
    if state.failed {
        return;
    }
    if state.renderer.is_none() {
        if let Some(reason) = pipelines.failure(&cache) {
            error!(target: "metaball_areas", "GPU pipeline failed to compile: {reason}");
            state.failed = true;
            return;
        }
        let Some(kernels) = pipelines.resolve(&cache) else {
            return;
        };
        let backend = GpuBackend::new(device.clone(), queue.clone(), kernels);
        state.renderer = Some(MetaballAreas::new(backend));
        info!(target: "metaball_areas", "GPU area pipelines ready");
    }
    match state.render(&frame, &images) {
        Ok(rendered) => {
            report.store(rendered);
            state.last_error = None;
        }
        Err(e) => {
            if state.last_error.as_ref() != Some(&e) {
                error!(target: "metaball_areas", "GPU frame dropped: {e}");
                state.last_error = Some(e);
            }
            report.store(None);
        }
    }
}

#[derive(Default)]
pub(super) struct AreaComputeNode {
    state: NodeState,
}

#[derive(Default)]
enum NodeState {
    #[default]
    Loading,
    Ready,
}

impl render_graph::Node for AreaComputeNode {
    fn update(&mut self, world: &mut World) {
        if matches!(self.state, NodeState::Loading)
            && world
                .get_resource::<GpuAreaState>()
                .is_some_and(|s| s.renderer.is_some())
        {
            self.state = NodeState::Ready;
        }
    }

    fn run(
        &self,
        _ctx: &mut render_graph::RenderGraphContext,
        render_context: &mut RenderContext,
        world: &World,
    ) -> std::result::Result<(), render_graph::NodeRunError> {
        if !matches!(self.state, NodeState::Ready) {
            return Ok(());
        }
        let Some(backend) = world.get_resource::<GpuAreaState>().and_then(GpuAreaState::backend)
        else {
            return Ok(());
        };
        let encoded = backend.encode(render_context.command_encoder());
        trace!(target: "metaball_areas", "encoded {} area dispatches", encoded);
        Ok(())
    }
}
