//! Backend buffer/texture lifecycle.

use crate::backend::{
    Binding, BufferDesc, BufferHandle, BufferKind, KernelBackend, TextureDesc, TextureFormat,
    TextureHandle,
};
use crate::curve::OpacityCurve;
use crate::error::{PipelineError, Result};
use crate::gradient::{BorderGradientCache, BORDER_GRADIENT_RESOLUTION};
use crate::pingpong::PingPong;
use crate::settings::MetaballAreaSettings;
use bevy::color::LinearRgba;
use bevy::log::{debug, info};

/// Every parameter that determines resource sizes. Any change reallocates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferShape {
    pub compute_size: u32,
    pub render_size: u32,
    pub area_count: u32,
    pub max_emitters: u32,
}

impl BufferShape {
    pub fn from_settings(settings: &MetaballAreaSettings) -> Self {
        Self {
            compute_size: settings.compute_size(),
            render_size: settings.render_size(),
            area_count: settings.area_count().max(1),
            max_emitters: settings.max_emitter_count.max(1),
        }
    }

    pub fn uses_upscale(&self) -> bool {
        self.render_size > self.compute_size
    }

    pub fn cells(&self) -> usize {
        self.compute_size as usize * self.compute_size as usize
    }
}

/// Handles of one complete allocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameResources {
    pub shape: BufferShape,
    /// Compute-resolution output (or upscale input).
    pub result: TextureHandle,
    /// Render-resolution output, only when upscaling.
    pub upscaled: Option<TextureHandle>,
    pub emitters: BufferHandle,
    pub areas: PingPong<BufferHandle>,
    pub distance_fields: BufferHandle,
    pub colors: BufferHandle,
    pub border_gradient: TextureHandle,
}

impl FrameResources {
    fn bindings(&self) -> impl Iterator<Item = Binding> + '_ {
        [
            Binding::Texture(self.result),
            Binding::Buffer(self.emitters),
            Binding::Buffer(self.distance_fields),
            Binding::Buffer(self.colors),
            Binding::Texture(self.border_gradient),
        ]
        .into_iter()
        .chain(self.upscaled.map(Binding::Texture))
        .chain(self.areas.iter().copied().map(Binding::Buffer))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnsureOutcome {
    Reused,
    Allocated,
}

/// Owns the current [`FrameResources`] and keeps them matched to the settings.
#[derive(Debug, Default)]
pub struct ResourceManager {
    current: Option<FrameResources>,
    gradient: BorderGradientCache,
    gradient_stale: bool,
}

impl ResourceManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_allocated(&self) -> bool {
        self.current.is_some()
    }

    pub fn resources(&self) -> Option<&FrameResources> {
        self.current.as_ref()
    }

    /// Allocated resources, or [`PipelineError::ResourcesUnavailable`].
    pub fn require_mut(&mut self) -> Result<&mut FrameResources> {
        self.current.as_mut().ok_or(PipelineError::ResourcesUnavailable)
    }

    /// Allocates, or reallocates when `shape` differs from the current one.
    ///
    /// On failure everything created so far is released and the manager is
    /// left empty.
    pub fn ensure<B: KernelBackend>(
        &mut self,
        backend: &mut B,
        shape: BufferShape,
    ) -> Result<EnsureOutcome> {
        if self.current.as_ref().is_some_and(|r| r.shape == shape) {
            return Ok(EnsureOutcome::Reused);
        }
        self.release(backend);
        let mut created = Vec::new();
        match allocate(backend, shape, &mut created) {
            Ok(resources) => {
                info!(
                    target: "metaball_areas",
                    "allocated {} resources on `{}`: compute {}px render {}px, {} areas, \
                     {} emitters",
                    created.len(),
                    backend.name(),
                    shape.compute_size,
                    shape.render_size,
                    shape.area_count,
                    shape.max_emitters
                );
                self.current = Some(resources);
                self.gradient_stale = true;
                Ok(EnsureOutcome::Allocated)
            }
            Err(e) => {
                for binding in created {
                    release_binding(backend, binding);
                }
                Err(e)
            }
        }
    }

    /// Releases every resource. Safe to call repeatedly.
    pub fn release<B: KernelBackend>(&mut self, backend: &mut B) {
        if let Some(resources) = self.current.take() {
            debug!(
                target: "metaball_areas",
                "releasing pipeline resources ({:?})",
                resources.shape
            );
            for binding in resources.bindings() {
                release_binding(backend, binding);
            }
        }
    }

    pub fn upload_colors<B: KernelBackend>(
        &mut self,
        backend: &mut B,
        colors: &[LinearRgba],
    ) -> Result<()> {
        let resources = self.require_mut()?;
        let expected = resources.shape.area_count as usize;
        if colors.len() != expected {
            return Err(PipelineError::SizeMismatch {
                label: "_AreaColors",
                expected,
                found: colors.len(),
            });
        }
        backend.write_colors(resources.colors, colors)
    }

    /// Uploads the border lookup when the curve changed or the texture is new.
    /// Returns whether an upload happened.
    pub fn upload_gradient<B: KernelBackend>(
        &mut self,
        backend: &mut B,
        curve: &OpacityCurve,
    ) -> Result<bool> {
        let Some(resources) = self.current.as_ref() else {
            return Err(PipelineError::ResourcesUnavailable);
        };
        let (lut, rebuilt) = self.gradient.get_or_build(curve, BORDER_GRADIENT_RESOLUTION);
        if !(rebuilt || self.gradient_stale) {
            return Ok(false);
        }
        backend.write_texture(resources.border_gradient, lut.texels())?;
        self.gradient_stale = false;
        Ok(true)
    }
}

fn release_binding<B: KernelBackend>(backend: &mut B, binding: Binding) {
    match binding {
        Binding::Buffer(h) => backend.release_buffer(h),
        Binding::Texture(h) => backend.release_texture(h),
    }
}

fn track<H: Copy + Into<Binding>>(created: &mut Vec<Binding>, handle: H) -> H {
    created.push(handle.into());
    handle
}

fn allocate<B: KernelBackend>(
    backend: &mut B,
    shape: BufferShape,
    created: &mut Vec<Binding>,
) -> Result<FrameResources> {
    let n = shape.compute_size;
    let texture = |label: &'static str, size: u32, format: TextureFormat| TextureDesc {
        label,
        width: size,
        height: if format == TextureFormat::R8Unorm { 1 } else { size },
        format,
    };
    let buffer = |label: &'static str, kind: BufferKind, len: usize| BufferDesc {
        label,
        kind,
        len,
    };

    let desc = texture("result", n, TextureFormat::Rgba32Float);
    let result = track(created, backend.create_texture(&desc)?);
    let upscaled = if shape.uses_upscale() {
        let desc = texture("upscaled result", shape.render_size, TextureFormat::Rgba32Float);
        Some(track(created, backend.create_texture(&desc)?))
    } else {
        None
    };
    let desc = buffer("emitters", BufferKind::Emitters, shape.max_emitters as usize);
    let emitters = track(created, backend.create_buffer(&desc)?);
    let desc = buffer("areas A", BufferKind::AreaCells, shape.cells());
    let areas_a = track(created, backend.create_buffer(&desc)?);
    let desc = buffer("areas B", BufferKind::AreaCells, shape.cells());
    let areas_b = track(created, backend.create_buffer(&desc)?);
    let fields_len = shape
        .cells()
        .checked_mul(shape.area_count as usize)
        .ok_or_else(|| PipelineError::ResourceAllocation {
            label: "distance fields",
            reason: "size overflow".into(),
        })?;
    let desc = buffer("distance fields", BufferKind::DistanceField, fields_len);
    let distance_fields = track(created, backend.create_buffer(&desc)?);
    let desc = buffer("area colors", BufferKind::Colors, shape.area_count as usize);
    let colors = track(created, backend.create_buffer(&desc)?);
    let desc = texture("border gradient", BORDER_GRADIENT_RESOLUTION, TextureFormat::R8Unorm);
    let border_gradient = track(created, backend.create_texture(&desc)?);
    Ok(FrameResources {
        shape,
        result,
        upscaled,
        emitters,
        areas: PingPong::new(areas_a, areas_b),
        distance_fields,
        colors,
        border_gradient,
    })
}
