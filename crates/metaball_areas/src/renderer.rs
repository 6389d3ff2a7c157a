//! Engine-independent facade tying emitters, resources and the frame schedule together.

use crate::backend::{KernelBackend, TextureHandle};
use crate::emitters::{EmitterSet, PackedEmitter, SnapshotParams, SnapshotStats};
use crate::error::{PipelineError, Result};
use crate::pipeline::{run_frame, FrameParams, FrameReport};
use crate::present::{current_texture, PresentedFrame};
use crate::resources::{BufferShape, EnsureOutcome, ResourceManager};
use crate::settings::MetaballAreaSettings;
use bevy::log::{error, warn};
use bevy::math::Mat4;

/// Result of one rendered frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameStats {
    pub snapshot: SnapshotStats,
    pub report: FrameReport,
}

/// Metaball area compositor over a [`KernelBackend`].
///
/// Call [`configure`](Self::configure) before the first frame and whenever the
/// settings change. After an allocation failure every frame is refused until a
/// later `configure` succeeds.
pub struct MetaballAreas<B: KernelBackend> {
    backend: B,
    settings: MetaballAreaSettings,
    emitters: EmitterSet,
    resources: ResourceManager,
    packed: Vec<PackedEmitter>,
    last_stats: Option<FrameStats>,
}

impl<B: KernelBackend> MetaballAreas<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            settings: MetaballAreaSettings::default().sanitized(),
            emitters: EmitterSet::new(),
            resources: ResourceManager::new(),
            packed: Vec::new(),
            last_stats: None,
        }
    }

    /// Convenience for `new` + `configure`.
    pub fn with_settings(backend: B, settings: &MetaballAreaSettings) -> Result<Self> {
        let mut renderer = Self::new(backend);
        renderer.configure(settings)?;
        Ok(renderer)
    }

    /// Applies `settings`, (re)allocating resources when their shape changed and
    /// re-uploading palette and border lookup. Returns validation warnings.
    pub fn configure(&mut self, settings: &MetaballAreaSettings) -> Result<Vec<String>> {
        let warnings = settings.validate();
        for w in &warnings {
            warn!(target: "metaball_areas", "settings: {w}");
        }
        self.settings = settings.sanitized();
        let shape = BufferShape::from_settings(&self.settings);
        match self.resources.ensure(&mut self.backend, shape) {
            Ok(EnsureOutcome::Allocated | EnsureOutcome::Reused) => {}
            Err(e) => {
                error!(target: "metaball_areas", "configuration rejected: {e}");
                self.last_stats = None;
                return Err(e);
            }
        }
        self.resources.upload_colors(&mut self.backend, &self.settings.colors)?;
        self.resources
            .upload_gradient(&mut self.backend, &self.settings.border_opacity)?;
        Ok(warnings)
    }

    pub fn settings(&self) -> &MetaballAreaSettings {
        &self.settings
    }

    pub fn emitters(&self) -> &EmitterSet {
        &self.emitters
    }

    pub fn emitters_mut(&mut self) -> &mut EmitterSet {
        &mut self.emitters
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn is_ready(&self) -> bool {
        self.resources.is_allocated()
    }

    /// Packs the emitters relative to `world_to_field` and runs the frame.
    pub fn render_frame(&mut self, world_to_field: Mat4) -> Result<FrameStats> {
        let resources = self.resources.require_mut()?;
        let params = SnapshotParams::new(&self.settings, world_to_field);
        let snapshot = self.emitters.snapshot(&params, &mut self.packed);
        let report = run_frame(
            &mut self.backend,
            resources,
            &FrameParams {
                settings: &self.settings,
                emitters: &self.packed,
            },
        )?;
        let stats = FrameStats { snapshot, report };
        self.last_stats = Some(stats);
        Ok(stats)
    }

    /// Runs a frame over emitters that were already packed into field space,
    /// e.g. by [`EmitterSet::snapshot`] in another world.
    pub fn render_packed(&mut self, packed: &[PackedEmitter]) -> Result<FrameReport> {
        let resources = self.resources.require_mut()?;
        run_frame(
            &mut self.backend,
            resources,
            &FrameParams {
                settings: &self.settings,
                emitters: packed,
            },
        )
    }

    /// Texture the last frame was composited into.
    pub fn current_texture(&self) -> Option<TextureHandle> {
        self.resources.resources().map(current_texture)
    }

    pub fn read_current(&self) -> Result<PresentedFrame> {
        let texture = self
            .current_texture()
            .ok_or(PipelineError::ResourcesUnavailable)?;
        self.backend.read_texture(texture)
    }

    pub fn last_stats(&self) -> Option<&FrameStats> {
        self.last_stats.as_ref()
    }

    /// Releases all backend resources. Rendering resumes after `configure`.
    pub fn release(&mut self) {
        self.resources.release(&mut self.backend);
        self.last_stats = None;
    }
}

impl<B: KernelBackend> Drop for MetaballAreas<B> {
    fn drop(&mut self) {
        self.resources.release(&mut self.backend);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{ComputeBackend, SoftwareDevice};
    use crate::emitters::{Emitter, EmitterId};
    use crate::settings::TexSize;
    use bevy::math::{Vec2, Vec3};

    fn small() -> MetaballAreaSettings {
        MetaballAreaSettings::default().with_compute_resolution(TexSize::S32)
    }

    #[test]
    fn refuses_frames_before_configure() {
        let mut r = MetaballAreas::new(ComputeBackend::new());
        assert_eq!(r.render_frame(Mat4::IDENTITY), Err(PipelineError::ResourcesUnavailable));
        assert!(r.read_current().is_err());
    }

    #[test]
    fn renders_after_configure() {
        let mut r = MetaballAreas::with_settings(ComputeBackend::new(), &small()).unwrap();
        r.emitters_mut()
            .add(EmitterId(1), Emitter::new(Vec3::ZERO, 1.0, 0));
        let stats = r.render_frame(Mat4::IDENTITY).unwrap();
        assert_eq!(stats.snapshot.packed, 1);
        assert_eq!(stats.report.jump_flood_iterations, 5);
        let frame = r.read_current().unwrap();
        assert_eq!((frame.width(), frame.height()), (32, 32));
    }

    #[test]
    fn allocation_failure_refuses_until_reconfigured() {
        let device = SoftwareDevice::with_memory_budget(512 * 1024);
        let backend = ComputeBackend::with_device(device);
        let mut r = MetaballAreas::with_settings(backend, &small()).unwrap();
        let huge = small().with_compute_resolution(TexSize::S512);
        assert!(r.configure(&huge).unwrap_err().is_configuration_fatal());
        assert!(!r.is_ready());
        assert_eq!(r.render_frame(Mat4::IDENTITY), Err(PipelineError::ResourcesUnavailable));
        r.configure(&small()).unwrap();
        assert!(r.render_frame(Mat4::IDENTITY).is_ok());
    }

    #[test]
    fn renders_pre_packed_emitters() {
        let mut r = MetaballAreas::with_settings(ComputeBackend::new(), &small()).unwrap();
        let packed = [PackedEmitter {
            position: [0.0, 0.0, 0.0],
            radius: 0.2,
            area: 1,
        }];
        let report = r.render_packed(&packed).unwrap();
        assert_eq!(report.jump_flood_iterations, 5);
        let frame = r.read_current().unwrap();
        assert_eq!(frame.sample_field(Vec2::ZERO), r.settings().colors[1]);
    }

    #[test]
    fn release_and_drop_free_everything() {
        let mut r = MetaballAreas::with_settings(ComputeBackend::new(), &small()).unwrap();
        r.release();
        r.release();
        assert_eq!(r.backend().device().live_resources(), 0);
        assert!(r.current_texture().is_none());
    }
}
