use crate::backend::KernelBackend;
use crate::gpu::GpuAreaEmitters;
use crate::plugin::{AreaFrameStats, AreaRenderer};
use crate::settings::MetaballAreaSettings;
use bevy::prelude::*;

/// User-tunable diagnostics configuration.
#[derive(Resource, Debug, Clone)]
pub struct AreaDiagnosticsConfig {
    pub enabled: bool,
    /// How many frames between periodic logs.
    pub log_every_n_frames: u32,
    /// Log per-frame packing counts (truncation, culling, invalid areas).
    pub log_emitters: bool,
    /// Log the kernel schedule summary (dispatches, swaps, jump flood passes).
    pub log_schedule: bool,
    /// Stop all periodic logging after this frame (inclusive). 0 = unlimited.
    pub max_frames_logging: u64,
}

impl Default for AreaDiagnosticsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            log_every_n_frames: 120,
            log_emitters: true,
            log_schedule: true,
            max_frames_logging: 600,
        }
    }
}

#[derive(Resource, Default)]
struct FrameCounter(u64);

pub struct AreaDiagnosticsPlugin;

impl Plugin for AreaDiagnosticsPlugin {
    fn build(&self, app: &mut App) {
        app.init_resource::<AreaDiagnosticsConfig>()
            .init_resource::<FrameCounter>()
            .add_systems(PostStartup, startup_summary)
            .add_systems(Last, (increment_frame_counter, periodic_diagnostics).chain());
    }
}

fn increment_frame_counter(mut fc: ResMut<FrameCounter>) {
    fc.0 += 1;
}

fn startup_summary(
    config: Res<AreaDiagnosticsConfig>,
    settings: Option<Res<MetaballAreaSettings>>,
) {
    if !config.enabled {
        return;
    }
    let Some(settings) = settings else {
        warn!(
            target: "metaball_areas::diag",
            "Startup: MetaballAreaSettings not found (plugin order?)"
        );
        return;
    };
    info!(
        target: "metaball_areas::diag",
        "Startup: compute={}px render={}px areas={} background={} max_emitters={} range={} \
         smooth={} border={:?} border_range={}",
        settings.compute_size(),
        settings.render_size(),
        settings.area_count(),
        settings.background_index(),
        settings.max_emitter_count,
        settings.range,
        settings.smooth,
        settings.border_mode,
        settings.border_range
    );
    if settings.uses_upscale() {
        info!(
            target: "metaball_areas::diag",
            "Startup: upscaling {}px -> {}px",
            settings.compute_size(),
            settings.render_size()
        );
    }
}

fn should_log(cfg: &AreaDiagnosticsConfig, frame: u64) -> bool {
    if !cfg.enabled || (cfg.max_frames_logging > 0 && frame > cfg.max_frames_logging) {
        return false;
    }
    frame == 1 || (cfg.log_every_n_frames > 0 && frame % cfg.log_every_n_frames as u64 == 0)
}

fn periodic_diagnostics(
    config: Res<AreaDiagnosticsConfig>,
    fc: Res<FrameCounter>,
    stats: Option<Res<AreaFrameStats>>,
    renderer: Option<Res<AreaRenderer>>,
    gpu: Option<Res<GpuAreaEmitters>>,
) {
    let cfg = &*config;
    if !should_log(cfg, fc.0) {
        return;
    }
    let Some(stats) = stats else {
        return;
    };
    let (emitters, backend, ready) = match (&renderer, &gpu) {
        (Some(r), _) => (r.emitters().len(), r.backend().name(), r.is_ready()),
        (None, Some(g)) => (g.len(), "gpu", stats.0.is_some()),
        (None, None) => return,
    };
    let Some(frame) = stats.0 else {
        warn!(
            target: "metaball_areas::diag",
            "Frame {}: no frame rendered (backend={} ready={})",
            fc.0,
            backend,
            ready
        );
        return;
    };
    if cfg.log_emitters {
        let s = frame.snapshot;
        info!(
            target: "metaball_areas::diag",
            "Frame {}: emitters={} packed={} truncated={} out_of_field={} invalid_area={}",
            fc.0,
            emitters,
            s.packed,
            s.truncated,
            s.out_of_field,
            s.invalid_area
        );
    }
    if cfg.log_schedule {
        let r = frame.report;
        info!(
            target: "metaball_areas::diag",
            "  Schedule: dispatches={} area_swaps={} jump_flood={} upscaled={} backend={}",
            r.dispatches,
            r.area_swaps,
            r.jump_flood_iterations,
            r.upscaled,
            backend
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn logs_first_frame_then_periodically() {
        let cfg = AreaDiagnosticsConfig {
            log_every_n_frames: 10,
            max_frames_logging: 25,
            ..default()
        };
        let logged: Vec<u64> = (1..=40).filter(|f| should_log(&cfg, *f)).collect();
        assert_eq!(logged, vec![1, 10, 20]);
    }

    #[test]
    fn disabled_never_logs() {
        let cfg = AreaDiagnosticsConfig {
            enabled: false,
            ..default()
        };
        assert!(!(1..500).any(|f| should_log(&cfg, f)));
    }
}
