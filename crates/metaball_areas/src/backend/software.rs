//! CPU resource store shared by the software backends.

use super::kernels::{self, Inputs, Output, TexView};
use super::{
    AreaCell, BufferDesc, BufferHandle, BufferKind, Dispatch, Kernel, ShaderGlobals, Slot,
    TextureDesc, TextureFormat, TextureHandle,
};
use crate::emitters::PackedEmitter;
use crate::error::{PipelineError, Result};
use crate::present::PresentedFrame;
use bevy::color::LinearRgba;
use bevy::log::trace;

#[derive(Debug)]
enum Texels {
    Rgba(Vec<[f32; 4]>),
    R8(Vec<u8>),
}

#[derive(Debug)]
struct SoftTexture {
    width: u32,
    height: u32,
    texels: Texels,
}

#[derive(Debug)]
enum Resource {
    Emitters(Vec<PackedEmitter>),
    Distances(Vec<f32>),
    Areas(Vec<AreaCell>),
    Colors(Vec<LinearRgba>),
    Texture(SoftTexture),
}

impl Resource {
    fn byte_size(&self) -> usize {
        match self {
            Resource::Emitters(v) => v.len() * BufferKind::Emitters.stride(),
            Resource::Distances(v) => v.len() * BufferKind::DistanceField.stride(),
            Resource::Areas(v) => v.len() * BufferKind::AreaCells.stride(),
            Resource::Colors(v) => v.len() * BufferKind::Colors.stride(),
            Resource::Texture(t) => match &t.texels {
                Texels::Rgba(v) => v.len() * TextureFormat::Rgba32Float.bytes_per_texel(),
                Texels::R8(v) => v.len(),
            },
        }
    }
}

/// Handle-addressed buffers and textures with an optional memory budget.
///
/// Handles are never reused, so a released handle stays stale for the
/// lifetime of the device.
#[derive(Debug, Default)]
pub struct SoftwareDevice {
    resources: Vec<Option<Resource>>,
    bytes_in_use: usize,
    memory_budget: Option<usize>,
}

impl SoftwareDevice {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocations that would push usage above `bytes` fail with
    /// [`PipelineError::ResourceAllocation`].
    pub fn with_memory_budget(bytes: usize) -> Self {
        Self {
            memory_budget: Some(bytes),
            ..Self::default()
        }
    }

    pub fn bytes_in_use(&self) -> usize {
        self.bytes_in_use
    }

    pub fn live_resources(&self) -> usize {
        self.resources.iter().filter(|r| r.is_some()).count()
    }

    fn reserve<T: Clone>(
        &self,
        label: &'static str,
        len: usize,
        stride: usize,
        fill: T,
    ) -> Result<Vec<T>> {
        let fail = |reason: String| PipelineError::ResourceAllocation { label, reason };
        let bytes = len
            .checked_mul(stride)
            .ok_or_else(|| fail(format!("{len} elements overflow the address space")))?;
        if let Some(budget) = self.memory_budget {
            if self.bytes_in_use + bytes > budget {
                return Err(fail(format!(
                    "{bytes} bytes requested, {} of {budget} in use",
                    self.bytes_in_use
                )));
            }
        }
        let mut v = Vec::new();
        v.try_reserve_exact(len).map_err(|e| fail(e.to_string()))?;
        v.resize(len, fill);
        Ok(v)
    }

    fn insert(&mut self, resource: Resource) -> u32 {
        self.bytes_in_use += resource.byte_size();
        self.resources.push(Some(resource));
        (self.resources.len() - 1) as u32
    }

    pub(crate) fn create_buffer(&mut self, desc: &BufferDesc) -> Result<BufferHandle> {
        let stride = desc.kind.stride();
        let resource = match desc.kind {
            BufferKind::Emitters => {
                let fill = PackedEmitter::default();
                Resource::Emitters(self.reserve(desc.label, desc.len, stride, fill)?)
            }
            BufferKind::DistanceField => {
                Resource::Distances(self.reserve(desc.label, desc.len, stride, f32::INFINITY)?)
            }
            BufferKind::AreaCells => {
                Resource::Areas(self.reserve(desc.label, desc.len, stride, AreaCell::default())?)
            }
            BufferKind::Colors => {
                Resource::Colors(self.reserve(desc.label, desc.len, stride, LinearRgba::NONE)?)
            }
        };
        let id = self.insert(resource);
        trace!(
            target: "metaball_areas",
            "buffer {} `{}` ({} x {:?})",
            id,
            desc.label,
            desc.len,
            desc.kind
        );
        Ok(BufferHandle(id))
    }

    pub(crate) fn create_texture(&mut self, desc: &TextureDesc) -> Result<TextureHandle> {
        let len = desc.width as usize * desc.height as usize;
        let stride = desc.format.bytes_per_texel();
        let texels = match desc.format {
            TextureFormat::Rgba32Float => {
                Texels::Rgba(self.reserve(desc.label, len, stride, [0.0; 4])?)
            }
            TextureFormat::R8Unorm => Texels::R8(self.reserve(desc.label, len, stride, 0u8)?),
        };
        let id = self.insert(Resource::Texture(SoftTexture {
            width: desc.width,
            height: desc.height,
            texels,
        }));
        trace!(
            target: "metaball_areas",
            "texture {} `{}` ({}x{} {:?})",
            id,
            desc.label,
            desc.width,
            desc.height,
            desc.format
        );
        Ok(TextureHandle(id))
    }

    pub(crate) fn release(&mut self, id: u32) {
        if let Some(resource) = self.resources.get_mut(id as usize).and_then(Option::take) {
            self.bytes_in_use -= resource.byte_size();
        }
    }

    fn get_mut(&mut self, id: u32) -> Result<&mut Resource> {
        self.resources
            .get_mut(id as usize)
            .and_then(Option::as_mut)
            .ok_or(PipelineError::StaleHandle { id })
    }

    fn get(&self, id: u32) -> Result<&Resource> {
        self.resources
            .get(id as usize)
            .and_then(Option::as_ref)
            .ok_or(PipelineError::StaleHandle { id })
    }

    pub(crate) fn write_emitters(
        &mut self,
        handle: BufferHandle,
        data: &[PackedEmitter],
    ) -> Result<()> {
        match self.get_mut(handle.0)? {
            Resource::Emitters(dst) => copy_prefix("_Emitters", dst, data),
            _ => Err(PipelineError::SizeMismatch {
                label: "_Emitters",
                expected: 0,
                found: data.len(),
            }),
        }
    }

    pub(crate) fn write_colors(
        &mut self,
        handle: BufferHandle,
        colors: &[LinearRgba],
    ) -> Result<()> {
        match self.get_mut(handle.0)? {
            Resource::Colors(dst) => copy_prefix("_AreaColors", dst, colors),
            _ => Err(PipelineError::SizeMismatch {
                label: "_AreaColors",
                expected: 0,
                found: colors.len(),
            }),
        }
    }

    pub(crate) fn write_texture(&mut self, handle: TextureHandle, bytes: &[u8]) -> Result<()> {
        let Resource::Texture(tex) = self.get_mut(handle.0)? else {
            return Err(PipelineError::StaleHandle { id: handle.0 });
        };
        match &mut tex.texels {
            Texels::R8(dst) => {
                if dst.len() != bytes.len() {
                    return Err(PipelineError::SizeMismatch {
                        label: "texture upload",
                        expected: dst.len(),
                        found: bytes.len(),
                    });
                }
                dst.copy_from_slice(bytes);
            }
            Texels::Rgba(dst) => {
                let texel = TextureFormat::Rgba32Float.bytes_per_texel();
                if dst.len() * texel != bytes.len() {
                    return Err(PipelineError::SizeMismatch {
                        label: "texture upload",
                        expected: dst.len() * texel,
                        found: bytes.len(),
                    });
                }
                for (d, chunk) in dst.iter_mut().zip(bytes.chunks_exact(texel)) {
                    *d = bytemuck::pod_read_unaligned(chunk);
                }
            }
        }
        Ok(())
    }

    pub(crate) fn read_texture(&self, handle: TextureHandle) -> Result<PresentedFrame> {
        let Resource::Texture(tex) = self.get(handle.0)? else {
            return Err(PipelineError::StaleHandle { id: handle.0 });
        };
        let pixels = match &tex.texels {
            Texels::Rgba(v) => v.clone(),
            Texels::R8(v) => v
                .iter()
                .map(|b| {
                    let l = *b as f32 / 255.0;
                    [l, l, l, 1.0]
                })
                .collect(),
        };
        Ok(PresentedFrame::new(tex.width, tex.height, pixels))
    }

    /// Resolves the bindings of `dispatch` and hands them to `run`.
    ///
    /// The written resource is moved out of the store for the duration of the
    /// call, so reads and the write can never alias.
    pub(crate) fn execute<F>(
        &mut self,
        globals: &ShaderGlobals,
        dispatch: &Dispatch,
        run: F,
    ) -> Result<()>
    where
        F: FnOnce(&Inputs<'_>, &mut Output<'_>),
    {
        let output = dispatch.validate()?;
        let id = output.id();
        let mut target = self
            .resources
            .get_mut(id as usize)
            .and_then(Option::take)
            .ok_or(PipelineError::StaleHandle { id })?;
        let result = self.run_with(globals, dispatch, &mut target, run);
        self.resources[id as usize] = Some(target);
        result
    }

    fn run_with<F>(
        &self,
        globals: &ShaderGlobals,
        dispatch: &Dispatch,
        target: &mut Resource,
        run: F,
    ) -> Result<()>
    where
        F: FnOnce(&Inputs<'_>, &mut Output<'_>),
    {
        let kernel = dispatch.kernel;
        let inputs = self.resolve_inputs(globals, dispatch)?;
        let mut out = match target {
            Resource::Distances(v) => Output::Distances(v.as_mut_slice()),
            Resource::Areas(v) => Output::Areas(v.as_mut_slice()),
            Resource::Texture(SoftTexture {
                width,
                height,
                texels: Texels::Rgba(v),
            }) => Output::Texture {
                width: *width,
                height: *height,
                texels: v.as_mut_slice(),
            },
            _ => {
                let slot = kernel.output_slot();
                return Err(mismatch(kernel, slot, "a writable buffer or RGBA texture"));
            }
        };
        kernels::check(kernel, &inputs, &out)?;
        run(&inputs, &mut out);
        Ok(())
    }

    fn bound(&self, dispatch: &Dispatch, slot: Slot) -> Result<Option<&Resource>> {
        match dispatch.binding(slot) {
            Some(b) => self.get(b.id()).map(Some),
            None => Ok(None),
        }
    }

    fn resolve_inputs<'a>(
        &'a self,
        globals: &'a ShaderGlobals,
        dispatch: &Dispatch,
    ) -> Result<Inputs<'a>> {
        let kernel = dispatch.kernel;
        let out_slot = kernel.output_slot();
        let mut inputs = Inputs {
            globals,
            emitters: &[],
            distances: &[],
            areas: &[],
            colors: &[],
            gradient: &[],
            render_data: None,
        };
        for slot in kernel.required_slots().iter().copied().filter(|s| *s != out_slot) {
            let Some(resource) = self.bound(dispatch, slot)? else {
                continue;
            };
            match (slot, resource) {
                (Slot::Emitters, Resource::Emitters(v)) => inputs.emitters = v.as_slice(),
                (Slot::DistanceFields, Resource::Distances(v)) => inputs.distances = v.as_slice(),
                (Slot::AreaRead, Resource::Areas(v)) => inputs.areas = v.as_slice(),
                (Slot::AreaColors, Resource::Colors(v)) => inputs.colors = v.as_slice(),
                (
                    Slot::BorderGradient,
                    Resource::Texture(SoftTexture {
                        texels: Texels::R8(v),
                        ..
                    }),
                ) => inputs.gradient = v.as_slice(),
                (
                    Slot::RenderData,
                    Resource::Texture(SoftTexture {
                        width,
                        height,
                        texels: Texels::Rgba(v),
                    }),
                ) => {
                    inputs.render_data = Some(TexView {
                        width: *width,
                        height: *height,
                        texels: v.as_slice(),
                    })
                }
                (slot, _) => return Err(mismatch(kernel, slot, expected_kind(slot))),
            }
        }
        Ok(inputs)
    }
}

fn expected_kind(slot: Slot) -> &'static str {
    match slot {
        Slot::Emitters => "an emitter buffer",
        Slot::DistanceFields => "a distance field buffer",
        Slot::AreaRead | Slot::AreaWrite => "an area buffer",
        Slot::AreaColors => "a color buffer",
        Slot::BorderGradient => "an R8 texture",
        Slot::Result | Slot::RenderData | Slot::Target => "an RGBA float texture",
    }
}

fn mismatch(kernel: Kernel, slot: Slot, expected: &'static str) -> PipelineError {
    PipelineError::BindingMismatch {
        kernel: kernel.entry_point(),
        slot: slot.name(),
        expected,
    }
}

fn copy_prefix<T: Copy>(label: &'static str, dst: &mut [T], src: &[T]) -> Result<()> {
    if src.len() > dst.len() {
        return Err(PipelineError::SizeMismatch {
            label,
            expected: dst.len(),
            found: src.len(),
        });
    }
    dst[..src.len()].copy_from_slice(src);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buffer(kind: BufferKind, len: usize) -> BufferDesc {
        BufferDesc {
            label: "test",
            kind,
            len,
        }
    }

    #[test]
    fn budget_rejects_oversized_allocation() {
        let mut device = SoftwareDevice::with_memory_budget(1024);
        assert!(device.create_buffer(&buffer(BufferKind::DistanceField, 200)).is_ok());
        let err = device
            .create_buffer(&buffer(BufferKind::DistanceField, 200))
            .unwrap_err();
        assert!(matches!(err, PipelineError::ResourceAllocation { .. }), "{err}");
        assert_eq!(device.bytes_in_use(), 800);
    }

    #[test]
    fn release_is_idempotent_and_handles_go_stale() {
        let mut device = SoftwareDevice::new();
        let h = device.create_buffer(&buffer(BufferKind::Colors, 4)).unwrap();
        device.release(h.id());
        device.release(h.id());
        assert_eq!(device.bytes_in_use(), 0);
        assert_eq!(device.live_resources(), 0);
        assert_eq!(
            device.write_colors(h, &[LinearRgba::RED]),
            Err(PipelineError::StaleHandle { id: h.id() })
        );
        let next = device.create_buffer(&buffer(BufferKind::Colors, 4)).unwrap();
        assert_ne!(next, h);
    }

    #[test]
    fn uploads_must_fit() {
        let mut device = SoftwareDevice::new();
        let h = device.create_buffer(&buffer(BufferKind::Colors, 1)).unwrap();
        assert!(device.write_colors(h, &[LinearRgba::RED, LinearRgba::BLUE]).is_err());
        let tex = device
            .create_texture(&TextureDesc {
                label: "lut",
                width: 4,
                height: 1,
                format: TextureFormat::R8Unorm,
            })
            .unwrap();
        assert!(device.write_texture(tex, &[0, 85, 170, 255]).is_ok());
        let frame = device.read_texture(tex).unwrap();
        assert_eq!(frame.pixel(3, 0), LinearRgba::WHITE);
        assert!(device.write_texture(tex, &[0, 1]).is_err());
    }

    #[test]
    fn wrong_resource_kind_is_a_binding_mismatch() {
        let mut device = SoftwareDevice::new();
        let colors = device.create_buffer(&buffer(BufferKind::Colors, 16)).unwrap();
        let dispatch = Dispatch::new(Kernel::Clear, [1, 1, 1]).bind(Slot::DistanceFields, colors);
        let err = device
            .execute(&ShaderGlobals::new(2, 4), &dispatch, |_, _| {})
            .unwrap_err();
        assert!(matches!(err, PipelineError::BindingMismatch { .. }), "{err}");
        // the target is restored after a failed dispatch
        assert!(device.write_colors(colors, &[LinearRgba::RED]).is_ok());
    }
}
