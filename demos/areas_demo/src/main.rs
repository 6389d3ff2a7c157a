use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use bevy::prelude::*;
use bevy::render::camera::ScalingMode;
use clap::{Parser, ValueEnum};
use metaball_areas::{
    AreaBackend, AreaDiagnosticsConfig, BorderMode, MetaballAreaSettings, MetaballAreas,
    MetaballAreasPlugin, TexSize,
};

mod orbit;
use orbit::{place, random_blobs, DemoBlobs, OrbitPlugin};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum BackendArg {
    Compute,
    Fragment,
    /// WGSL compute passes; windowed runs only.
    Gpu,
}

impl From<BackendArg> for AreaBackend {
    fn from(arg: BackendArg) -> Self {
        match arg {
            BackendArg::Compute => AreaBackend::Compute,
            BackendArg::Fragment => AreaBackend::Fragment,
            BackendArg::Gpu => AreaBackend::Gpu,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum BorderArg {
    None,
    Group,
    Split,
}

#[derive(Parser, Debug)]
#[command(about = "Orbiting metaball areas; opens a window or writes a PNG snapshot", version)]
struct Args {
    /// RON settings file (defaults are used when absent or unreadable).
    #[arg(long)]
    config: Option<PathBuf>,
    /// Compute resolution in pixels (power of two, 32..=4096).
    #[arg(long)]
    compute: Option<u32>,
    /// Render resolution in pixels; larger than `--compute` enables upscaling.
    #[arg(long)]
    render: Option<u32>,
    #[arg(long, value_enum)]
    border: Option<BorderArg>,
    #[arg(long, value_enum, default_value = "compute")]
    backend: BackendArg,
    #[arg(long, default_value_t = 12)]
    emitters: usize,
    /// RNG seed for emitter placement.
    #[arg(long)]
    seed: Option<u64>,
    /// Render headless and write the final frame to this PNG.
    #[arg(long)]
    snapshot: Option<PathBuf>,
    /// Frames simulated before the snapshot (1/60 s each).
    #[arg(long, default_value_t = 1)]
    frames: u32,
}

fn tex_size(px: u32, flag: &str) -> Result<TexSize> {
    match TexSize::from_pixels(px) {
        Some(size) => Ok(size),
        None => bail!("--{flag} {px} is not a supported resolution (power of two, 32..=4096)"),
    }
}

fn build_settings(args: &Args) -> Result<MetaballAreaSettings> {
    let mut settings = match &args.config {
        Some(path) => {
            let (settings, err) = MetaballAreaSettings::load_or_default(path);
            if let Some(err) = err {
                eprintln!("config not loaded, using defaults: {err}");
            }
            settings
        }
        None => MetaballAreaSettings::default(),
    };
    if let Some(px) = args.compute {
        settings.compute_resolution = tex_size(px, "compute")?;
    }
    if let Some(px) = args.render {
        settings.render_resolution = tex_size(px, "render")?;
    }
    if let Some(border) = args.border {
        settings.border_mode = match border {
            BorderArg::None => BorderMode::NoBorders,
            BorderArg::Group => BorderMode::GroupAllAreas,
            BorderArg::Split => BorderMode::SplitAreas,
        };
    }
    Ok(settings)
}

fn snapshot(args: &Args, settings: &MetaballAreaSettings, out: &PathBuf) -> Result<()> {
    let Some(backend) = AreaBackend::from(args.backend).software() else {
        bail!("--snapshot renders headless; pick --backend compute or fragment");
    };
    let mut renderer =
        MetaballAreas::with_settings(backend, settings).context("configure renderer")?;
    let blobs = random_blobs(settings, args.emitters, args.seed);
    for frame in 0..args.frames.max(1) {
        place(renderer.emitters_mut(), &blobs, frame as f32 / 60.0);
        renderer.render_frame(Mat4::IDENTITY).context("render frame")?;
    }
    let frame = renderer.read_current()?;
    let img = image::RgbaImage::from_raw(frame.width(), frame.height(), frame.to_rgba8())
        .context("frame buffer size")?;
    img.save(out).with_context(|| format!("write {}", out.display()))?;
    println!(
        "Wrote {}x{} snapshot to {} ({:?})",
        frame.width(),
        frame.height(),
        out.display(),
        renderer.last_stats().map(|s| s.report)
    );
    Ok(())
}

fn spawn_camera(mut commands: Commands, settings: Res<MetaballAreaSettings>) {
    commands.spawn((
        Camera2d,
        Projection::from(OrthographicProjection {
            scaling_mode: ScalingMode::FixedVertical {
                viewport_height: settings.range,
            },
            ..OrthographicProjection::default_2d()
        }),
        Name::new("AreasDemoCamera"),
    ));
}

fn main() -> Result<()> {
    let args = Args::parse();
    let settings = build_settings(&args)?;
    if let Some(out) = &args.snapshot {
        return snapshot(&args, &settings, out);
    }
    let backend = AreaBackend::from(args.backend);
    let blobs = random_blobs(&settings, args.emitters, args.seed);
    App::new()
        .insert_resource(ClearColor(Color::BLACK))
        .add_plugins(DefaultPlugins)
        .insert_resource(AreaDiagnosticsConfig {
            log_every_n_frames: 300,
            ..default()
        })
        .add_plugins(
            MetaballAreasPlugin::with(settings.with_presentation(true)).with_backend(backend),
        )
        .insert_resource(DemoBlobs(blobs))
        .add_plugins(OrbitPlugin)
        .add_systems(Startup, spawn_camera)
        .run();
    Ok(())
}
