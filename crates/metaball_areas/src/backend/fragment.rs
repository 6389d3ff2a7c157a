use super::kernels;
use super::{
    BufferDesc, BufferHandle, Dispatch, Kernel, KernelBackend, ShaderGlobals, SoftwareDevice,
    TextureDesc, TextureHandle, WORKGROUP_SIZE,
};
use crate::emitters::PackedEmitter;
use crate::error::{PipelineError, Result};
use crate::present::PresentedFrame;
use bevy::color::LinearRgba;
use rayon::prelude::*;

/// Full-screen pass backend.
///
/// Ignores group counts and runs one invocation per element of the written
/// resource, like a blit into a render target. The per-area clear becomes one
/// pass per area layer. Bands of rows are shaded in parallel. A backend may be
/// built with only a subset of passes to model a material missing an entry
/// point.
#[derive(Debug)]
pub struct FragmentBackend {
    device: SoftwareDevice,
    passes: Vec<Kernel>,
}

impl Default for FragmentBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl FragmentBackend {
    pub fn new() -> Self {
        Self::with_device(SoftwareDevice::new())
    }

    pub fn with_device(device: SoftwareDevice) -> Self {
        Self {
            device,
            passes: Kernel::ALL.to_vec(),
        }
    }

    pub fn with_passes(mut self, passes: &[Kernel]) -> Self {
        self.passes = passes.to_vec();
        self
    }

    pub fn device(&self) -> &SoftwareDevice {
        &self.device
    }
}

impl KernelBackend for FragmentBackend {
    fn name(&self) -> &'static str {
        "fragment"
    }

    fn create_buffer(&mut self, desc: &BufferDesc) -> Result<BufferHandle> {
        self.device.create_buffer(desc)
    }

    fn create_texture(&mut self, desc: &TextureDesc) -> Result<TextureHandle> {
        self.device.create_texture(desc)
    }

    fn release_buffer(&mut self, handle: BufferHandle) {
        self.device.release(handle.id());
    }

    fn release_texture(&mut self, handle: TextureHandle) {
        self.device.release(handle.id());
    }

    fn write_emitters(&mut self, handle: BufferHandle, emitters: &[PackedEmitter]) -> Result<()> {
        self.device.write_emitters(handle, emitters)
    }

    fn write_colors(&mut self, handle: BufferHandle, colors: &[LinearRgba]) -> Result<()> {
        self.device.write_colors(handle, colors)
    }

    fn write_texture(&mut self, handle: TextureHandle, texels: &[u8]) -> Result<()> {
        self.device.write_texture(handle, texels)
    }

    fn dispatch(&mut self, globals: &ShaderGlobals, dispatch: &Dispatch) -> Result<()> {
        let kernel = dispatch.kernel;
        if !self.passes.contains(&kernel) {
            return Err(PipelineError::UnsupportedKernel {
                kernel: kernel.entry_point(),
                backend: self.name(),
            });
        }
        self.device.execute(globals, dispatch, |inputs, out| {
            let [w, _, layers] = out.extent(kernel, inputs.globals);
            out.bands(inputs.globals, WORKGROUP_SIZE)
                .into_par_iter()
                .for_each(|mut band| {
                    for z in 0..layers {
                        for y in band.span() {
                            for x in 0..w {
                                kernels::invoke(kernel, inputs, &mut band, x, y, z);
                            }
                        }
                    }
                });
        })
    }

    fn read_texture(&self, handle: TextureHandle) -> Result<PresentedFrame> {
        self.device.read_texture(handle)
    }
}
