//! Kernel capability interface.
//!
//! The compositing pipeline only talks to a [`KernelBackend`]: it creates
//! buffers/textures, uploads per-frame data, sets [`ShaderGlobals`] and issues
//! [`Dispatch`]es by kernel name with named slot bindings. Kernel bodies are the
//! backend's business. [`GpuBackend`] records every kernel as a WGSL compute
//! dispatch on the render device. Two software backends share one resource
//! store and serve as the reference implementation: [`ComputeBackend`]
//! (workgroup dispatch) and [`FragmentBackend`] (one invocation per output
//! texel, like full-screen blits).

mod compute;
mod fragment;
pub mod gpu;
pub(crate) mod kernels;
mod software;

pub use compute::ComputeBackend;
pub use fragment::FragmentBackend;
pub use gpu::{GpuBackend, GpuGlobals, GpuKernels, KernelPipeline};
pub use software::SoftwareDevice;

use crate::emitters::PackedEmitter;
use crate::error::{PipelineError, Result};
use crate::present::PresentedFrame;
use crate::settings::BorderMode;
use bevy::color::LinearRgba;
use bevy::math::Vec2;
use smallvec::SmallVec;
use static_assertions::const_assert_eq;

/// Threads per workgroup along each spatial axis.
pub const WORKGROUP_SIZE: u32 = 8;

/// Thread-group count covering `size` invocations.
pub fn thread_groups(size: u32) -> u32 {
    size.div_ceil(WORKGROUP_SIZE)
}

/// Coordinates stored by texels that have not been reached by any seed.
pub const NO_SEED: [f32; 2] = [-1.0e6, -1.0e6];

/// Per-texel nearest-area record (`_AreasRead` / `_AreasWrite` element).
///
/// Two seeds are flooded side by side: the nearest texel owned by any area,
/// and the nearest texel where two areas meet.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct AreaCell {
    /// Winning field distance from the flatten stage (negative inside a blob).
    pub distance: f32,
    /// Texel position of the nearest seed.
    pub coords: [f32; 2],
    /// Owning area, -1 when unowned.
    pub id: i32,
    /// Texel position of the nearest area/area contact.
    pub edge_coords: [f32; 2],
    /// Area owning the contact texel, -1 when no contact was reached.
    pub edge_owner: i32,
    /// The other area meeting `edge_owner` there.
    pub edge_id: i32,
}

const_assert_eq!(std::mem::size_of::<AreaCell>(), 32);

impl Default for AreaCell {
    fn default() -> Self {
        Self {
            distance: f32::INFINITY,
            coords: NO_SEED,
            id: -1,
            edge_coords: NO_SEED,
            edge_owner: -1,
            edge_id: -1,
        }
    }
}

impl AreaCell {
    pub fn has_seed(&self) -> bool {
        self.id >= 0
    }

    pub fn has_contact(&self) -> bool {
        self.edge_owner >= 0 && self.edge_id >= 0
    }
}

/// Named entry points of the compositing program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kernel {
    Clear,
    AssignAreas,
    Flatten,
    JumpFlooding,
    Render,
    RenderData,
    Upscale,
}

impl Kernel {
    pub const ALL: [Kernel; 7] = [
        Kernel::Clear,
        Kernel::AssignAreas,
        Kernel::Flatten,
        Kernel::JumpFlooding,
        Kernel::Render,
        Kernel::RenderData,
        Kernel::Upscale,
    ];

    pub fn entry_point(self) -> &'static str {
        match self {
            Kernel::Clear => "Clear",
            Kernel::AssignAreas => "AssignAreas",
            Kernel::Flatten => "Flatten",
            Kernel::JumpFlooding => "JumpFlooding",
            Kernel::Render => "Render",
            Kernel::RenderData => "RenderData",
            Kernel::Upscale => "Upscale",
        }
    }

    /// Position in [`Kernel::ALL`].
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn find(name: &str) -> Option<Kernel> {
        Self::ALL.into_iter().find(|k| k.entry_point() == name)
    }

    /// Threads per group; the clear also spans areas along z.
    pub fn workgroup_size(self) -> [u32; 3] {
        match self {
            Kernel::Clear => [WORKGROUP_SIZE, WORKGROUP_SIZE, WORKGROUP_SIZE],
            _ => [WORKGROUP_SIZE, WORKGROUP_SIZE, 1],
        }
    }

    pub fn required_slots(self) -> &'static [Slot] {
        match self {
            Kernel::Clear => &[Slot::DistanceFields],
            Kernel::AssignAreas => &[Slot::Emitters, Slot::DistanceFields],
            Kernel::Flatten => &[Slot::DistanceFields, Slot::AreaWrite],
            Kernel::JumpFlooding => &[Slot::AreaRead, Slot::AreaWrite],
            Kernel::Render => &[
                Slot::AreaRead,
                Slot::AreaColors,
                Slot::BorderGradient,
                Slot::Result,
            ],
            Kernel::RenderData => &[Slot::AreaRead, Slot::Result],
            Kernel::Upscale => &[
                Slot::RenderData,
                Slot::AreaColors,
                Slot::BorderGradient,
                Slot::Target,
            ],
        }
    }

    /// The single slot each kernel writes.
    pub fn output_slot(self) -> Slot {
        match self {
            Kernel::Clear | Kernel::AssignAreas => Slot::DistanceFields,
            Kernel::Flatten | Kernel::JumpFlooding => Slot::AreaWrite,
            Kernel::Render | Kernel::RenderData => Slot::Result,
            Kernel::Upscale => Slot::Target,
        }
    }
}

/// Named buffer / texture parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Slot {
    Emitters,
    DistanceFields,
    AreaRead,
    AreaWrite,
    AreaColors,
    Result,
    BorderGradient,
    RenderData,
    Target,
}

impl Slot {
    pub fn name(self) -> &'static str {
        match self {
            Slot::Emitters => "_Emitters",
            Slot::DistanceFields => "_DistanceFields",
            Slot::AreaRead => "_AreasRead",
            Slot::AreaWrite => "_AreasWrite",
            Slot::AreaColors => "_AreaColors",
            Slot::Result => "_Result",
            Slot::BorderGradient => "_BorderGradient",
            Slot::RenderData => "_RenderData",
            Slot::Target => "_Target",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferHandle(u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureHandle(u32);

impl BufferHandle {
    pub const fn from_raw(id: u32) -> Self {
        Self(id)
    }
    pub const fn id(self) -> u32 {
        self.0
    }
}

impl TextureHandle {
    pub const fn from_raw(id: u32) -> Self {
        Self(id)
    }
    pub const fn id(self) -> u32 {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Binding {
    Buffer(BufferHandle),
    Texture(TextureHandle),
}

impl From<BufferHandle> for Binding {
    fn from(h: BufferHandle) -> Self {
        Binding::Buffer(h)
    }
}

impl From<TextureHandle> for Binding {
    fn from(h: TextureHandle) -> Self {
        Binding::Texture(h)
    }
}

impl Binding {
    pub fn id(self) -> u32 {
        match self {
            Binding::Buffer(h) => h.id(),
            Binding::Texture(h) => h.id(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferKind {
    Emitters,
    DistanceField,
    AreaCells,
    Colors,
}

impl BufferKind {
    pub fn stride(self) -> usize {
        match self {
            BufferKind::Emitters => std::mem::size_of::<PackedEmitter>(),
            BufferKind::DistanceField => std::mem::size_of::<f32>(),
            BufferKind::AreaCells => std::mem::size_of::<AreaCell>(),
            BufferKind::Colors => std::mem::size_of::<f32>() * 4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferDesc {
    pub label: &'static str,
    pub kind: BufferKind,
    pub len: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextureFormat {
    Rgba32Float,
    R8Unorm,
}

impl TextureFormat {
    pub fn bytes_per_texel(self) -> usize {
        match self {
            TextureFormat::Rgba32Float => 16,
            TextureFormat::R8Unorm => 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureDesc {
    pub label: &'static str,
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
}

/// Scalar parameters set before each dispatch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShaderGlobals {
    /// `_MapSize`
    pub map_size: u32,
    /// `_InvMapSize`
    pub inv_map_size: Vec2,
    /// `_AreaCount`
    pub area_count: u32,
    /// `_EmitterCount`
    pub emitter_count: u32,
    /// `_Smoothing`
    pub smoothing: f32,
    /// `_BorderPower`
    pub border_power: f32,
    /// `_BorderMode`
    pub border_mode: BorderMode,
    /// `_JumpFloodingStepSize`
    pub jump_flooding_step_size: u32,
    /// `_BackgroundArea`
    pub background_area: u32,
    /// `_BorderColor`
    pub border_color: LinearRgba,
}

impl ShaderGlobals {
    pub fn new(map_size: u32, area_count: u32) -> Self {
        Self {
            map_size,
            inv_map_size: Vec2::splat(1.0 / map_size.max(1) as f32),
            area_count,
            emitter_count: 0,
            smoothing: 0.0,
            border_power: 1.0,
            border_mode: BorderMode::NoBorders,
            jump_flooding_step_size: 0,
            background_area: area_count.saturating_sub(1),
            border_color: LinearRgba::WHITE,
        }
    }
}

/// One kernel launch: entry point, group counts and slot bindings.
#[derive(Debug, Clone, PartialEq)]
pub struct Dispatch {
    pub kernel: Kernel,
    pub groups: [u32; 3],
    bindings: SmallVec<[(Slot, Binding); 6]>,
}

impl Dispatch {
    pub fn new(kernel: Kernel, groups: [u32; 3]) -> Self {
        Self {
            kernel,
            groups,
            bindings: SmallVec::new(),
        }
    }

    /// Binds (or rebinds) `slot`.
    pub fn bind(mut self, slot: Slot, binding: impl Into<Binding>) -> Self {
        let binding = binding.into();
        match self.bindings.iter_mut().find(|(s, _)| *s == slot) {
            Some(entry) => entry.1 = binding,
            None => self.bindings.push((slot, binding)),
        }
        self
    }

    pub fn binding(&self, slot: Slot) -> Option<Binding> {
        self.bindings
            .iter()
            .find(|(s, _)| *s == slot)
            .map(|(_, b)| *b)
    }

    pub fn bindings(&self) -> impl Iterator<Item = (Slot, Binding)> + '_ {
        self.bindings.iter().copied()
    }

    /// Checks the binding contract shared by every backend: all required slots
    /// present, and no input bound to the written resource.
    pub fn validate(&self) -> Result<Binding> {
        let kernel = self.kernel.entry_point();
        for slot in self.kernel.required_slots() {
            if self.binding(*slot).is_none() {
                return Err(PipelineError::MissingBinding {
                    kernel,
                    slot: slot.name(),
                });
            }
        }
        let out_slot = self.kernel.output_slot();
        let output = self
            .binding(out_slot)
            .ok_or(PipelineError::MissingBinding {
                kernel,
                slot: out_slot.name(),
            })?;
        for (slot, binding) in self.bindings() {
            if slot == out_slot || binding != output {
                continue;
            }
            return Err(if slot == Slot::AreaRead {
                PipelineError::AliasedAreaBuffers { kernel }
            } else {
                PipelineError::BindingMismatch {
                    kernel,
                    slot: slot.name(),
                    expected: "a resource distinct from the kernel output",
                }
            });
        }
        Ok(output)
    }
}

/// Capability interface between the pipeline and whatever executes the kernels.
pub trait KernelBackend {
    fn name(&self) -> &'static str;

    fn create_buffer(&mut self, desc: &BufferDesc) -> Result<BufferHandle>;
    fn create_texture(&mut self, desc: &TextureDesc) -> Result<TextureHandle>;
    /// Releasing an unknown handle is a no-op.
    fn release_buffer(&mut self, handle: BufferHandle);
    fn release_texture(&mut self, handle: TextureHandle);

    fn write_emitters(&mut self, handle: BufferHandle, emitters: &[PackedEmitter]) -> Result<()>;
    fn write_colors(&mut self, handle: BufferHandle, colors: &[LinearRgba]) -> Result<()>;
    /// Raw texel upload (R8 textures take one byte per texel).
    fn write_texture(&mut self, handle: TextureHandle, texels: &[u8]) -> Result<()>;

    /// Fire-and-forget launch. Ordering between dispatches follows issue order.
    fn dispatch(&mut self, globals: &ShaderGlobals, dispatch: &Dispatch) -> Result<()>;

    /// Readback of an RGBA texture for presentation and export.
    fn read_texture(&self, handle: TextureHandle) -> Result<PresentedFrame>;
}

/// Type-erased backend, used where the backend is picked at runtime.
pub type DynBackend = Box<dyn KernelBackend + Send + Sync>;

impl<B: KernelBackend + ?Sized> KernelBackend for Box<B> {
    fn name(&self) -> &'static str {
        (**self).name()
    }
    fn create_buffer(&mut self, desc: &BufferDesc) -> Result<BufferHandle> {
        (**self).create_buffer(desc)
    }
    fn create_texture(&mut self, desc: &TextureDesc) -> Result<TextureHandle> {
        (**self).create_texture(desc)
    }
    fn release_buffer(&mut self, handle: BufferHandle) {
        (**self).release_buffer(handle)
    }
    fn release_texture(&mut self, handle: TextureHandle) {
        (**self).release_texture(handle)
    }
    fn write_emitters(&mut self, handle: BufferHandle, emitters: &[PackedEmitter]) -> Result<()> {
        (**self).write_emitters(handle, emitters)
    }
    fn write_colors(&mut self, handle: BufferHandle, colors: &[LinearRgba]) -> Result<()> {
        (**self).write_colors(handle, colors)
    }
    fn write_texture(&mut self, handle: TextureHandle, texels: &[u8]) -> Result<()> {
        (**self).write_texture(handle, texels)
    }
    fn dispatch(&mut self, globals: &ShaderGlobals, dispatch: &Dispatch) -> Result<()> {
        (**self).dispatch(globals, dispatch)
    }
    fn read_texture(&self, handle: TextureHandle) -> Result<PresentedFrame> {
        (**self).read_texture(handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn groups_round_up() {
        assert_eq!(thread_groups(512), 64);
        assert_eq!(thread_groups(4), 1);
        assert_eq!(thread_groups(9), 2);
    }

    #[test]
    fn kernel_names_round_trip() {
        for k in Kernel::ALL {
            assert_eq!(Kernel::find(k.entry_point()), Some(k));
            assert_eq!(Kernel::ALL[k.index()], k);
            assert!(k.required_slots().contains(&k.output_slot()));
        }
        assert_eq!(Kernel::find("AsignAreas"), None);
    }

    #[test]
    fn fresh_cells_carry_no_seeds() {
        let cell = AreaCell::default();
        assert!(!cell.has_seed());
        assert!(!cell.has_contact());
        assert_eq!(cell.edge_coords, NO_SEED);
    }

    #[test]
    fn validate_reports_missing_slot() {
        let d = Dispatch::new(Kernel::JumpFlooding, [1, 1, 1])
            .bind(Slot::AreaWrite, BufferHandle::from_raw(2));
        assert_eq!(
            d.validate(),
            Err(PipelineError::MissingBinding {
                kernel: "JumpFlooding",
                slot: "_AreasRead"
            })
        );
    }

    #[test]
    fn validate_rejects_aliased_areas() {
        let h = BufferHandle::from_raw(4);
        let d = Dispatch::new(Kernel::JumpFlooding, [1, 1, 1])
            .bind(Slot::AreaRead, h)
            .bind(Slot::AreaWrite, h);
        assert_eq!(
            d.validate(),
            Err(PipelineError::AliasedAreaBuffers {
                kernel: "JumpFlooding"
            })
        );
    }

    #[test]
    fn rebinding_replaces_slot() {
        let d = Dispatch::new(Kernel::Clear, [1, 1, 1])
            .bind(Slot::DistanceFields, BufferHandle::from_raw(1))
            .bind(Slot::DistanceFields, BufferHandle::from_raw(7));
        assert_eq!(d.bindings().count(), 1);
        assert_eq!(d.validate(), Ok(Binding::Buffer(BufferHandle::from_raw(7))));
    }
}
