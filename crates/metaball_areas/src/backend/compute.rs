use super::kernels;
use super::{
    BufferDesc, BufferHandle, Dispatch, KernelBackend, ShaderGlobals, SoftwareDevice,
    TextureDesc, TextureHandle,
};
use crate::emitters::PackedEmitter;
use crate::error::Result;
use crate::present::PresentedFrame;
use bevy::color::LinearRgba;
use rayon::prelude::*;

/// Workgroup-dispatch backend.
///
/// Launches `groups * workgroup_size` invocations per axis exactly as requested;
/// kernels discard invocations outside their domain. Each row of workgroups
/// runs as one task on the rayon pool.
#[derive(Debug, Default)]
pub struct ComputeBackend {
    device: SoftwareDevice,
    invocations: u64,
}

impl ComputeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_device(device: SoftwareDevice) -> Self {
        Self {
            device,
            invocations: 0,
        }
    }

    pub fn device(&self) -> &SoftwareDevice {
        &self.device
    }

    /// Total invocations launched so far, including discarded ones.
    pub fn invocations(&self) -> u64 {
        self.invocations
    }
}

impl KernelBackend for ComputeBackend {
    fn name(&self) -> &'static str {
        "compute"
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
        let [gx, gy, gz] = dispatch.groups;
        let [wx, wy, wz] = kernel.workgroup_size();
        let (nx, ny, nz) = (gx * wx, gy * wy, gz * wz);
        self.device.execute(globals, dispatch, |inputs, out| {
            // invocations within a dispatch are independent, so the global id
            // space is walked directly instead of group by group
            out.bands(inputs.globals, wy)
                .into_par_iter()
                .for_each(|mut band| {
                    let span = band.span();
                    for z in 0..nz {
                        for y in span.start..span.end.min(ny) {
                            for x in 0..nx {
                                kernels::invoke(kernel, inputs, &mut band, x, y, z);
                            }
                        }
                    }
                });
        })?;
        self.invocations += nx as u64 * ny as u64 * nz as u64;
        Ok(())
    }

    fn read_texture(&self, handle: TextureHandle) -> Result<PresentedFrame> {
        self.device.read_texture(handle)
    }
}
