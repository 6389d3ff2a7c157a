//! Per-frame kernel schedule.
//!
//! Clear -> AssignAreas -> Flatten -> JumpFlooding* -> (Render | RenderData -> Upscale).
//! Area buffers alternate between read and write after every area-writing
//! stage; the render stages read whichever buffer was written last.

use crate::backend::{
    thread_groups, Dispatch, Kernel, KernelBackend, ShaderGlobals, Slot, TextureHandle,
};
use crate::emitters::PackedEmitter;
use crate::error::Result;
use crate::resources::FrameResources;
use crate::settings::MetaballAreaSettings;
use bevy::log::trace;

/// Per-frame inputs. `settings` is expected to be sanitized.
#[derive(Debug, Clone, Copy)]
pub struct FrameParams<'a> {
    pub settings: &'a MetaballAreaSettings,
    pub emitters: &'a [PackedEmitter],
}

/// What one frame did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameReport {
    /// Emitters uploaded for this frame.
    pub emitters: u32,
    pub dispatches: u32,
    /// Flips of the area double buffer (flatten + each jump flood pass).
    pub area_swaps: u32,
    pub jump_flood_iterations: u32,
    /// The texture that holds the final image.
    pub output: Option<TextureHandle>,
    pub upscaled: bool,
}

/// Step sizes of one jump flooding run over an `n`-texel square, largest first:
/// `n/2, n/4, ..., 1`. Empty for `n < 2`.
pub fn jump_flood_steps(n: u32) -> impl Iterator<Item = u32> {
    let k = if n < 2 { 0 } else { n.ilog2() };
    (0..k).map(move |j| 1 << (k - j - 1))
}

fn globals_for(
    settings: &MetaballAreaSettings,
    map_size: u32,
    area_count: u32,
    emitter_count: u32,
) -> ShaderGlobals {
    ShaderGlobals {
        emitter_count,
        smoothing: settings.smooth,
        border_power: settings.border_range,
        border_mode: settings.border_mode,
        background_area: settings.background_index(),
        border_color: settings.border_color,
        ..ShaderGlobals::new(map_size, area_count)
    }
}

/// Issues every dispatch of one frame on `backend`.
pub fn run_frame<B: KernelBackend>(
    backend: &mut B,
    resources: &mut FrameResources,
    params: &FrameParams,
) -> Result<FrameReport> {
    let shape = resources.shape;
    let n = shape.compute_size;
    let groups = thread_groups(n);
    let emitters = &params.emitters[..params.emitters.len().min(shape.max_emitters as usize)];
    backend.write_emitters(resources.emitters, emitters)?;

    let mut report = FrameReport {
        emitters: emitters.len() as u32,
        ..FrameReport::default()
    };
    let mut globals = globals_for(params.settings, n, shape.area_count, report.emitters);
    let mut issue = |backend: &mut B, globals: &ShaderGlobals, dispatch: Dispatch| -> Result<()> {
        trace!(
            target: "metaball_areas",
            "dispatch {} {:?}",
            dispatch.kernel.entry_point(),
            dispatch.groups
        );
        backend.dispatch(globals, &dispatch)?;
        report.dispatches += 1;
        Ok(())
    };

    resources.areas.reset();
    issue(
        backend,
        &globals,
        Dispatch::new(Kernel::Clear, [groups, groups, thread_groups(shape.area_count)])
            .bind(Slot::DistanceFields, resources.distance_fields),
    )?;
    issue(
        backend,
        &globals,
        Dispatch::new(Kernel::AssignAreas, [groups, groups, 1])
            .bind(Slot::Emitters, resources.emitters)
            .bind(Slot::DistanceFields, resources.distance_fields),
    )?;

    let (read, write) = resources.areas.read_write();
    issue(
        backend,
        &globals,
        Dispatch::new(Kernel::Flatten, [groups, groups, 1])
            .bind(Slot::DistanceFields, resources.distance_fields)
            .bind(Slot::AreaRead, read)
            .bind(Slot::AreaWrite, write),
    )?;
    resources.areas.swap();
    let mut swaps = 1;
    let mut iterations = 0;

    if params.settings.border_mode.needs_jump_flooding() {
        for step in jump_flood_steps(n) {
            globals.jump_flooding_step_size = step;
            let (read, write) = resources.areas.read_write();
            issue(
                backend,
                &globals,
                Dispatch::new(Kernel::JumpFlooding, [groups, groups, 1])
                    .bind(Slot::AreaRead, read)
                    .bind(Slot::AreaWrite, write),
            )?;
            resources.areas.swap();
            swaps += 1;
            iterations += 1;
        }
    }

    let latest = *resources.areas.current();
    let output = match resources.upscaled {
        Some(target) => {
            issue(
                backend,
                &globals,
                Dispatch::new(Kernel::RenderData, [groups, groups, 1])
                    .bind(Slot::AreaRead, latest)
                    .bind(Slot::Result, resources.result),
            )?;
            let up = thread_groups(shape.render_size);
            issue(
                backend,
                &globals,
                Dispatch::new(Kernel::Upscale, [up, up, 1])
                    .bind(Slot::RenderData, resources.result)
                    .bind(Slot::AreaColors, resources.colors)
                    .bind(Slot::BorderGradient, resources.border_gradient)
                    .bind(Slot::Target, target),
            )?;
            target
        }
        None => {
            issue(
                backend,
                &globals,
                Dispatch::new(Kernel::Render, [groups, groups, 1])
                    .bind(Slot::AreaRead, latest)
                    .bind(Slot::AreaColors, resources.colors)
                    .bind(Slot::BorderGradient, resources.border_gradient)
                    .bind(Slot::Result, resources.result),
            )?;
            resources.result
        }
    };

    report.area_swaps = swaps;
    report.jump_flood_iterations = iterations;
    report.output = Some(output);
    report.upscaled = resources.upscaled.is_some();
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_sizes_halve_down_to_one() {
        let steps: Vec<u32> = jump_flood_steps(512).collect();
        assert_eq!(steps, vec![256, 128, 64, 32, 16, 8, 4, 2, 1]);
        assert_eq!(jump_flood_steps(32).count(), 5);
        assert_eq!(jump_flood_steps(4096).count(), 12);
        assert_eq!(jump_flood_steps(1).count(), 0);
    }
}
