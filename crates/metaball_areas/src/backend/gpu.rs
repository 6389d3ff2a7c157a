//! Kernel backend on the render device.
//!
//! Every [`Kernel`] is a compute entry point of `metaball_areas.wgsl` with its
//! own bind group layout. Binding 0 is the per-dispatch [`GpuGlobals`] uniform,
//! addressed with a dynamic offset; every other binding is fixed per [`Slot`].
//! Dispatches are recorded as they are issued and encoded later, either into
//! the render graph's command encoder or by [`GpuBackend::submit`].

use super::{
    thread_groups, BufferDesc, BufferHandle, BufferKind, Dispatch, Kernel, KernelBackend,
    ShaderGlobals, Slot, TextureDesc, TextureFormat, TextureHandle,
};
use crate::emitters::PackedEmitter;
use crate::error::{PipelineError, Result};
use crate::present::PresentedFrame;
use bevy::color::{ColorToComponents, LinearRgba};
use bevy::log::trace;
use bevy::math::UVec2;
use bevy::render::render_resource::{
    BindGroup, BindGroupEntry, BindGroupLayout, BindGroupLayoutEntry, BindingResource,
    BindingType, Buffer, BufferBinding, BufferBindingType, BufferDescriptor, BufferSize,
    BufferUsages, CommandEncoder, CommandEncoderDescriptor, ComputePassDescriptor,
    ComputePipeline, Extent3d, Maintain, MapMode, Origin3d, ShaderStages, StorageTextureAccess,
    TexelCopyBufferInfo, TexelCopyBufferLayout, TexelCopyTextureInfo, Texture, TextureAspect,
    TextureDescriptor, TextureDimension, TextureFormat as GpuTextureFormat, TextureSampleType,
    TextureUsages, TextureView, TextureViewDescriptor, TextureViewDimension,
};
use bevy::render::renderer::{RenderDevice, RenderQueue};
use static_assertions::const_assert_eq;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Entry point copying the composited result into the presented image.
pub const PRESENT_ENTRY_POINT: &str = "Present";

const GLOBALS_BINDING: u32 = 0;
const PRESENT_SOURCE_BINDING: u32 = 8;
const PRESENT_TARGET_BINDING: u32 = 10;

/// Globals slots per submission; a frame issues well under this many dispatches.
const GLOBALS_SLOTS: u64 = 64;

/// [`ShaderGlobals`] as laid out in the shader's uniform block.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct GpuGlobals {
    pub map_size: u32,
    pub area_count: u32,
    pub emitter_count: u32,
    pub jump_step: u32,
    pub inv_map_size: [f32; 2],
    pub smoothing: f32,
    pub border_power: f32,
    pub border_mode: u32,
    pub background_area: u32,
    _pad: [u32; 2],
    pub border_color: [f32; 4],
}

const_assert_eq!(std::mem::size_of::<GpuGlobals>(), 64);

impl From<&ShaderGlobals> for GpuGlobals {
    fn from(g: &ShaderGlobals) -> Self {
        Self {
            map_size: g.map_size,
            area_count: g.area_count,
            emitter_count: g.emitter_count,
            jump_step: g.jump_flooding_step_size,
            inv_map_size: g.inv_map_size.to_array(),
            smoothing: g.smoothing,
            border_power: g.border_power,
            border_mode: g.border_mode.as_index(),
            background_area: g.background_area,
            _pad: [0; 2],
            border_color: g.border_color.to_f32_array(),
        }
    }
}

/// Shader binding index of `slot`.
pub const fn slot_binding(slot: Slot) -> u32 {
    match slot {
        Slot::Emitters => 1,
        Slot::DistanceFields => 2,
        Slot::AreaRead => 3,
        Slot::AreaWrite => 4,
        Slot::AreaColors => 5,
        Slot::Result => 6,
        Slot::BorderGradient => 7,
        Slot::RenderData => 8,
        Slot::Target => 9,
    }
}

fn storage_buffer(read_only: bool) -> BindingType {
    BindingType::Buffer {
        ty: BufferBindingType::Storage { read_only },
        has_dynamic_offset: false,
        min_binding_size: None,
    }
}

fn storage_texture(format: GpuTextureFormat) -> BindingType {
    BindingType::StorageTexture {
        access: StorageTextureAccess::WriteOnly,
        format,
        view_dimension: TextureViewDimension::D2,
    }
}

fn sampled_texture() -> BindingType {
    BindingType::Texture {
        sample_type: TextureSampleType::Float { filterable: false },
        view_dimension: TextureViewDimension::D2,
        multisampled: false,
    }
}

fn slot_binding_type(slot: Slot) -> BindingType {
    match slot {
        Slot::Emitters | Slot::AreaRead | Slot::AreaColors => storage_buffer(true),
        Slot::DistanceFields | Slot::AreaWrite => storage_buffer(false),
        Slot::Result | Slot::Target => storage_texture(GpuTextureFormat::Rgba32Float),
        Slot::BorderGradient | Slot::RenderData => sampled_texture(),
    }
}

fn layout_entry(binding: u32, ty: BindingType) -> BindGroupLayoutEntry {
    BindGroupLayoutEntry {
        binding,
        visibility: ShaderStages::COMPUTE,
        ty,
        count: None,
    }
}

/// Bind group layout of `kernel`: the globals plus its required slots.
pub fn kernel_layout_entries(kernel: Kernel) -> Vec<BindGroupLayoutEntry> {
    let globals = layout_entry(
        GLOBALS_BINDING,
        BindingType::Buffer {
            ty: BufferBindingType::Uniform,
            has_dynamic_offset: true,
            min_binding_size: BufferSize::new(std::mem::size_of::<GpuGlobals>() as u64),
        },
    );
    std::iter::once(globals)
        .chain(
            kernel
                .required_slots()
                .iter()
                .map(|slot| layout_entry(slot_binding(*slot), slot_binding_type(*slot))),
        )
        .collect()
}

pub fn present_layout_entries() -> Vec<BindGroupLayoutEntry> {
    vec![
        layout_entry(PRESENT_SOURCE_BINDING, sampled_texture()),
        layout_entry(
            PRESENT_TARGET_BINDING,
            storage_texture(GpuTextureFormat::Rgba8Unorm),
        ),
    ]
}

/// A compiled entry point with its bind group layout.
#[derive(Clone)]
pub struct KernelPipeline {
    pub layout: BindGroupLayout,
    pub pipeline: ComputePipeline,
}

/// Every compiled entry point of the compositing program.
#[derive(Clone)]
pub struct GpuKernels {
    kernels: Vec<KernelPipeline>,
    present: KernelPipeline,
}

impl GpuKernels {
    /// `kernels` must be in [`Kernel::ALL`] order.
    pub fn new(kernels: Vec<KernelPipeline>, present: KernelPipeline) -> Option<Self> {
        (kernels.len() == Kernel::ALL.len()).then_some(Self { kernels, present })
    }

    fn kernel(&self, kernel: Kernel) -> &KernelPipeline {
        &self.kernels[kernel.index()]
    }
}

enum GpuResource {
    Buffer {
        buffer: Buffer,
        kind: BufferKind,
        len: usize,
    },
    Texture {
        texture: Texture,
        view: TextureView,
        desc: TextureDesc,
    },
}

struct RecordedDispatch {
    pipeline: ComputePipeline,
    bind_group: BindGroup,
    globals_offset: Option<u32>,
    groups: [u32; 3],
}

#[derive(Default)]
struct Pending {
    dispatches: Vec<RecordedDispatch>,
    globals_used: u64,
}

/// [`KernelBackend`] recording WGSL compute dispatches on the render device.
pub struct GpuBackend {
    device: RenderDevice,
    queue: RenderQueue,
    kernels: GpuKernels,
    resources: Vec<Option<GpuResource>>,
    globals: Buffer,
    globals_stride: u64,
    pending: Mutex<Pending>,
}

impl GpuBackend {
    pub fn new(device: RenderDevice, queue: RenderQueue, kernels: GpuKernels) -> Self {
        let align = device.limits().min_uniform_buffer_offset_alignment as u64;
        let globals_stride =
            (std::mem::size_of::<GpuGlobals>() as u64).next_multiple_of(align.max(1));
        let globals = device.create_buffer(&BufferDescriptor {
            label: Some("metaball_areas.globals"),
            size: globals_stride * GLOBALS_SLOTS,
            usage: BufferUsages::UNIFORM | BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        Self {
            device,
            queue,
            kernels,
            resources: Vec::new(),
            globals,
            globals_stride,
            pending: Mutex::new(Pending::default()),
        }
    }

    fn lock_pending(&self) -> MutexGuard<'_, Pending> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Dispatches recorded since the last encode.
    pub fn pending_dispatches(&self) -> usize {
        self.lock_pending().dispatches.len()
    }

    /// Encodes every recorded dispatch into one compute pass, in issue order.
    pub fn encode(&self, encoder: &mut CommandEncoder) -> usize {
        let recorded = {
            let mut pending = self.lock_pending();
            pending.globals_used = 0;
            std::mem::take(&mut pending.dispatches)
        };
        if recorded.is_empty() {
            return 0;
        }
        let mut pass = encoder.begin_compute_pass(&ComputePassDescriptor {
            label: Some("metaball_areas"),
            timestamp_writes: None,
        });
        for dispatch in &recorded {
            pass.set_pipeline(&dispatch.pipeline);
            match dispatch.globals_offset {
                Some(offset) => pass.set_bind_group(0, &dispatch.bind_group, &[offset]),
                None => pass.set_bind_group(0, &dispatch.bind_group, &[]),
            }
            let [x, y, z] = dispatch.groups;
            pass.dispatch_workgroups(x, y, z);
        }
        recorded.len()
    }

    /// Submits the recorded dispatches on the render queue.
    pub fn submit(&self) {
        let mut encoder = self
            .device
            .create_command_encoder(&CommandEncoderDescriptor {
                label: Some("metaball_areas.submit"),
            });
        if self.encode(&mut encoder) > 0 {
            self.queue.submit([encoder.finish()]);
        }
    }

    /// Records a copy of `source` into an `Rgba8Unorm` storage view of `size`,
    /// with row 0 at the top.
    pub fn present(&self, source: TextureHandle, target: &TextureView, size: UVec2) -> Result<()> {
        let Some(GpuResource::Texture { view, .. }) = self.resource(source.id()) else {
            return Err(PipelineError::StaleHandle { id: source.id() });
        };
        let present = &self.kernels.present;
        let bind_group = self.device.create_bind_group(
            Some(PRESENT_ENTRY_POINT),
            &present.layout,
            &[
                BindGroupEntry {
                    binding: PRESENT_SOURCE_BINDING,
                    resource: BindingResource::TextureView(view),
                },
                BindGroupEntry {
                    binding: PRESENT_TARGET_BINDING,
                    resource: BindingResource::TextureView(target),
                },
            ],
        );
        let recorded = RecordedDispatch {
            pipeline: present.pipeline.clone(),
            bind_group,
            globals_offset: None,
            groups: [thread_groups(size.x), thread_groups(size.y), 1],
        };
        self.lock_pending().dispatches.push(recorded);
        Ok(())
    }

    fn resource(&self, id: u32) -> Option<&GpuResource> {
        self.resources.get(id as usize).and_then(Option::as_ref)
    }

    fn insert(&mut self, resource: GpuResource) -> u32 {
        self.resources.push(Some(resource));
        (self.resources.len() - 1) as u32
    }

    fn release(&mut self, id: u32) {
        if let Some(slot) = self.resources.get_mut(id as usize) {
            *slot = None;
        }
    }

    fn buffer(&self, handle: BufferHandle, expected: BufferKind) -> Result<(&Buffer, usize)> {
        match self.resource(handle.id()) {
            Some(GpuResource::Buffer { buffer, kind, len }) if *kind == expected => {
                Ok((buffer, *len))
            }
            Some(_) => Err(PipelineError::SizeMismatch {
                label: "buffer upload",
                expected: 0,
                found: 0,
            }),
            None => Err(PipelineError::StaleHandle { id: handle.id() }),
        }
    }

    /// Writes the next globals slot, submitting first when every slot is taken.
    fn push_globals(&mut self, globals: &ShaderGlobals) -> u32 {
        if self.lock_pending().globals_used == GLOBALS_SLOTS {
            self.submit();
        }
        let pending = self.pending.get_mut().unwrap_or_else(PoisonError::into_inner);
        let offset = pending.globals_used * self.globals_stride;
        pending.globals_used += 1;
        let data = GpuGlobals::from(globals);
        self.queue
            .write_buffer(&self.globals, offset, bytemuck::bytes_of(&data));
        offset as u32
    }

    fn binding_resource(&self, kernel: Kernel, slot: Slot, id: u32) -> Result<BindingResource<'_>> {
        let resource = self
            .resource(id)
            .ok_or(PipelineError::StaleHandle { id })?;
        let mismatch = |expected| PipelineError::BindingMismatch {
            kernel: kernel.entry_point(),
            slot: slot.name(),
            expected,
        };
        match (slot, resource) {
            (Slot::Emitters, GpuResource::Buffer { buffer, kind: BufferKind::Emitters, .. })
            | (
                Slot::DistanceFields,
                GpuResource::Buffer { buffer, kind: BufferKind::DistanceField, .. },
            )
            | (
                Slot::AreaRead | Slot::AreaWrite,
                GpuResource::Buffer { buffer, kind: BufferKind::AreaCells, .. },
            )
            | (Slot::AreaColors, GpuResource::Buffer { buffer, kind: BufferKind::Colors, .. }) => {
                Ok(buffer.as_entire_binding())
            }
            (
                Slot::Result | Slot::RenderData | Slot::Target,
                GpuResource::Texture { view, desc, .. },
            ) if desc.format == TextureFormat::Rgba32Float => {
                Ok(BindingResource::TextureView(view))
            }
            (Slot::BorderGradient, GpuResource::Texture { view, desc, .. })
                if desc.format == TextureFormat::R8Unorm =>
            {
                Ok(BindingResource::TextureView(view))
            }
            (Slot::BorderGradient, _) => Err(mismatch("an R8 texture")),
            (Slot::Result | Slot::RenderData | Slot::Target, _) => {
                Err(mismatch("an RGBA float texture"))
            }
            _ => Err(mismatch("a buffer of the slot's kind")),
        }
    }
}

fn allocation_error(label: &'static str, reason: String) -> PipelineError {
    PipelineError::ResourceAllocation { label, reason }
}

impl KernelBackend for GpuBackend {
    fn name(&self) -> &'static str {
        "gpu"
    }

    fn create_buffer(&mut self, desc: &BufferDesc) -> Result<BufferHandle> {
        let size = desc
            .len
            .checked_mul(desc.kind.stride())
            .ok_or_else(|| allocation_error(desc.label, "size overflows".into()))?
            as u64;
        let limits = self.device.limits();
        let max = (limits.max_storage_buffer_binding_size as u64).min(limits.max_buffer_size);
        if size > max {
            return Err(allocation_error(
                desc.label,
                format!("{size} bytes exceed the device limit of {max}"),
            ));
        }
        let buffer = self.device.create_buffer(&BufferDescriptor {
            label: Some(desc.label),
            size: size.max(desc.kind.stride() as u64),
            usage: BufferUsages::STORAGE | BufferUsages::COPY_DST | BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });
        let id = self.insert(GpuResource::Buffer {
            buffer,
            kind: desc.kind,
            len: desc.len,
        });
        trace!(target: "metaball_areas", "gpu buffer {} `{}` ({} bytes)", id, desc.label, size);
        Ok(BufferHandle::from_raw(id))
    }

    fn create_texture(&mut self, desc: &TextureDesc) -> Result<TextureHandle> {
        let max = self.device.limits().max_texture_dimension_2d;
        if desc.width == 0 || desc.height == 0 || desc.width > max || desc.height > max {
            return Err(allocation_error(
                desc.label,
                format!("{}x{} outside 1..={max}", desc.width, desc.height),
            ));
        }
        let (format, usage) = match desc.format {
            TextureFormat::Rgba32Float => (
                GpuTextureFormat::Rgba32Float,
                TextureUsages::STORAGE_BINDING | TextureUsages::TEXTURE_BINDING,
            ),
            TextureFormat::R8Unorm => (GpuTextureFormat::R8Unorm, TextureUsages::TEXTURE_BINDING),
        };
        let texture = self.device.create_texture(&TextureDescriptor {
            label: Some(desc.label),
            size: extent(desc),
            mip_level_count: 1,
            sample_count: 1,
            dimension: TextureDimension::D2,
            format,
            usage: usage | TextureUsages::COPY_DST | TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let view = texture.create_view(&TextureViewDescriptor::default());
        let id = self.insert(GpuResource::Texture {
            texture,
            view,
            desc: *desc,
        });
        trace!(
            target: "metaball_areas",
            "gpu texture {} `{}` ({}x{} {:?})",
            id,
            desc.label,
            desc.width,
            desc.height,
            desc.format
        );
        Ok(TextureHandle::from_raw(id))
    }

    fn release_buffer(&mut self, handle: BufferHandle) {
        self.release(handle.id());
    }

    fn release_texture(&mut self, handle: TextureHandle) {
        self.release(handle.id());
    }

    fn write_emitters(&mut self, handle: BufferHandle, emitters: &[PackedEmitter]) -> Result<()> {
        let (buffer, len) = self.buffer(handle, BufferKind::Emitters)?;
        if emitters.len() > len {
            return Err(PipelineError::SizeMismatch {
                label: "_Emitters",
                expected: len,
                found: emitters.len(),
            });
        }
        if !emitters.is_empty() {
            self.queue
                .write_buffer(buffer, 0, bytemuck::cast_slice(emitters));
        }
        Ok(())
    }

    fn write_colors(&mut self, handle: BufferHandle, colors: &[LinearRgba]) -> Result<()> {
        let (buffer, len) = self.buffer(handle, BufferKind::Colors)?;
        if colors.len() > len {
            return Err(PipelineError::SizeMismatch {
                label: "_AreaColors",
                expected: len,
                found: colors.len(),
            });
        }
        let data: Vec<[f32; 4]> = colors.iter().map(|c| c.to_f32_array()).collect();
        if !data.is_empty() {
            self.queue.write_buffer(buffer, 0, bytemuck::cast_slice(&data));
        }
        Ok(())
    }

    fn write_texture(&mut self, handle: TextureHandle, texels: &[u8]) -> Result<()> {
        let Some(GpuResource::Texture { texture, desc, .. }) = self.resource(handle.id()) else {
            return Err(PipelineError::StaleHandle { id: handle.id() });
        };
        let row = desc.width as usize * desc.format.bytes_per_texel();
        let expected = row * desc.height as usize;
        if texels.len() != expected {
            return Err(PipelineError::SizeMismatch {
                label: "texture upload",
                expected,
                found: texels.len(),
            });
        }
        self.queue.write_texture(
            TexelCopyTextureInfo {
                texture,
                mip_level: 0,
                origin: Origin3d::ZERO,
                aspect: TextureAspect::All,
            },
            texels,
            TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(row as u32),
                rows_per_image: Some(desc.height),
            },
            extent(desc),
        );
        Ok(())
    }

    fn dispatch(&mut self, globals: &ShaderGlobals, dispatch: &Dispatch) -> Result<()> {
        dispatch.validate()?;
        let kernel = dispatch.kernel;
        let offset = self.push_globals(globals);
        let mut entries = Vec::with_capacity(kernel.required_slots().len() + 1);
        entries.push(BindGroupEntry {
            binding: GLOBALS_BINDING,
            resource: BindingResource::Buffer(BufferBinding {
                buffer: &self.globals,
                offset: 0,
                size: BufferSize::new(std::mem::size_of::<GpuGlobals>() as u64),
            }),
        });
        for slot in kernel.required_slots() {
            let binding = dispatch
                .binding(*slot)
                .ok_or(PipelineError::MissingBinding {
                    kernel: kernel.entry_point(),
                    slot: slot.name(),
                })?;
            entries.push(BindGroupEntry {
                binding: slot_binding(*slot),
                resource: self.binding_resource(kernel, *slot, binding.id())?,
            });
        }
        let compiled = self.kernels.kernel(kernel);
        let bind_group =
            self.device
                .create_bind_group(Some(kernel.entry_point()), &compiled.layout, &entries);
        // the shader runs 8x8x1 groups, so layered kernels fold z into the count
        let [gx, gy, gz] = dispatch.groups;
        let [_, _, wz] = kernel.workgroup_size();
        let recorded = RecordedDispatch {
            pipeline: compiled.pipeline.clone(),
            bind_group,
            globals_offset: Some(offset),
            groups: [gx, gy, gz * wz],
        };
        self.lock_pending().dispatches.push(recorded);
        Ok(())
    }

    fn read_texture(&self, handle: TextureHandle) -> Result<PresentedFrame> {
        let Some(GpuResource::Texture { texture, desc, .. }) = self.resource(handle.id()) else {
            return Err(PipelineError::StaleHandle { id: handle.id() });
        };
        let readback = |reason: String| PipelineError::Readback { reason };
        let texel = desc.format.bytes_per_texel();
        let row = desc.width as usize * texel;
        let padded = RenderDevice::align_copy_bytes_per_row(row);
        let staging = self.device.create_buffer(&BufferDescriptor {
            label: Some("metaball_areas.readback"),
            size: (padded * desc.height as usize) as u64,
            usage: BufferUsages::MAP_READ | BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let mut encoder = self
            .device
            .create_command_encoder(&CommandEncoderDescriptor {
                label: Some("metaball_areas.readback"),
            });
        self.encode(&mut encoder);
        encoder.copy_texture_to_buffer(
            TexelCopyTextureInfo {
                texture,
                mip_level: 0,
                origin: Origin3d::ZERO,
                aspect: TextureAspect::All,
            },
            TexelCopyBufferInfo {
                buffer: &staging,
                layout: TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(padded as u32),
                    rows_per_image: Some(desc.height),
                },
            },
            extent(desc),
        );
        self.queue.submit([encoder.finish()]);

        let slice = staging.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        let _ = self.device.poll(Maintain::Wait);
        rx.recv()
            .map_err(|e| readback(e.to_string()))?
            .map_err(|e| readback(e.to_string()))?;

        let mut pixels = Vec::with_capacity(desc.width as usize * desc.height as usize);
        {
            let bytes = slice.get_mapped_range();
            for line in bytes.chunks_exact(padded) {
                let line = &line[..row];
                match desc.format {
                    TextureFormat::Rgba32Float => pixels.extend(
                        line.chunks_exact(texel)
                            .map(bytemuck::pod_read_unaligned::<[f32; 4]>),
                    ),
                    TextureFormat::R8Unorm => pixels.extend(line.iter().map(|b| {
                        let l = *b as f32 / 255.0;
                        [l, l, l, 1.0]
                    })),
                }
            }
        }
        staging.unmap();
        Ok(PresentedFrame::new(desc.width, desc.height, pixels))
    }
}

fn extent(desc: &TextureDesc) -> Extent3d {
    Extent3d {
        width: desc.width,
        height: desc.height,
        depth_or_array_layers: 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::BorderMode;
    use std::collections::BTreeSet;

    const SHADER: &str = crate::embedded_shaders::METABALL_AREAS_WGSL;

    fn bindings(entries: &[BindGroupLayoutEntry]) -> BTreeSet<u32> {
        entries.iter().map(|e| e.binding).collect()
    }

    #[test]
    fn globals_match_the_uniform_block() {
        let mut g = ShaderGlobals::new(128, 4);
        g.border_mode = BorderMode::SplitAreas;
        g.jump_flooding_step_size = 16;
        let gpu = GpuGlobals::from(&g);
        assert_eq!(gpu.border_mode, 2);
        assert_eq!(gpu.background_area, 3);
        assert_eq!(gpu.jump_step, 16);
        assert_eq!(gpu.inv_map_size, [1.0 / 128.0; 2]);
        let bytes = bytemuck::bytes_of(&gpu);
        // border color starts on a 16 byte boundary
        assert_eq!(&bytes[48..52], &1.0f32.to_ne_bytes());
    }

    #[test]
    fn layouts_bind_globals_and_required_slots() {
        for kernel in Kernel::ALL {
            let entries = kernel_layout_entries(kernel);
            assert_eq!(entries.len(), kernel.required_slots().len() + 1);
            assert_eq!(bindings(&entries).len(), entries.len(), "{kernel:?}");
            let BindingType::Buffer {
                ty: BufferBindingType::Uniform,
                has_dynamic_offset: true,
                ..
            } = entries[0].ty
            else {
                panic!("{kernel:?} must bind globals first");
            };
        }
        let flood = kernel_layout_entries(Kernel::JumpFlooding);
        let read = flood.iter().find(|e| e.binding == slot_binding(Slot::AreaRead));
        assert!(matches!(
            read.map(|e| e.ty),
            Some(BindingType::Buffer {
                ty: BufferBindingType::Storage { read_only: true },
                ..
            })
        ));
    }

    #[test]
    fn shader_entry_points_match_layouts() {
        let module = naga::front::wgsl::parse_str(SHADER).expect("shader parses");
        let info = naga::valid::Validator::new(
            naga::valid::ValidationFlags::all(),
            naga::valid::Capabilities::default(),
        )
        .validate(&module)
        .expect("shader validates");

        let names: BTreeSet<&str> = module.entry_points.iter().map(|e| e.name.as_str()).collect();
        for kernel in Kernel::ALL {
            assert!(names.contains(kernel.entry_point()), "missing {kernel:?}");
        }
        assert!(names.contains(PRESENT_ENTRY_POINT));

        for (index, entry) in module.entry_points.iter().enumerate() {
            assert_eq!(entry.workgroup_size, [8, 8, 1], "{}", entry.name);
            let layout = match Kernel::find(&entry.name) {
                Some(kernel) => kernel_layout_entries(kernel),
                None => present_layout_entries(),
            };
            let used: BTreeSet<u32> = module
                .global_variables
                .iter()
                .filter(|(handle, _)| !info.get_entry_point(index)[*handle].is_empty())
                .filter_map(|(_, var)| var.binding.as_ref().map(|b| b.binding))
                .collect();
            assert!(
                used.is_subset(&bindings(&layout)),
                "{} uses {used:?} outside its layout",
                entry.name
            );
        }
    }
}
