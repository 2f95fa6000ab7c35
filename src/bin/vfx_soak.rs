use anyhow::{Context, Result};
use glam::{UVec2, Vec3};
use kestrel_vfx::camera3d::Camera3D;
use kestrel_vfx::renderer::headless::HeadlessContext;
use kestrel_vfx::vfx::{ParticleSpace, VfxDiagnostics, VfxSystem};
use kestrel_vfx::{VfxConfig, VfxSystem2D, VfxSystem3D};
use serde::Serialize;
use std::env;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Dimension {
    Two,
    Three,
}

struct Args {
    config: PathBuf,
    frames: u32,
    dt: f32,
    dimension: Dimension,
}

#[derive(Serialize)]
struct SoakReport {
    dimension: &'static str,
    frames: u32,
    dt: f32,
    presets_loaded: usize,
    draws_last_frame: usize,
    diagnostics: VfxDiagnostics,
}

fn usage() {
    eprintln!(
        "\
Usage: vfx_soak [--config <path>] [--frames <count>] [--dt <seconds>] [--dimension 2d|3d]

Defaults:
  --config config/vfx.json (built-in defaults when missing)
  --frames 600
  --dt 0.016667
  --dimension 2d
"
    );
}

fn parse_args() -> Result<Args> {
    let mut config = PathBuf::from("config/vfx.json");
    let mut frames = 600;
    let mut dt = 1.0 / 60.0;
    let mut dimension = Dimension::Two;
    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => {
                let value = args.next().context("--config requires a path")?;
                config = PathBuf::from(value);
            }
            "--frames" => {
                let value = args.next().context("--frames requires a value")?;
                frames = value.parse().context("invalid --frames")?;
            }
            "--dt" => {
                let value = args.next().context("--dt requires a value")?;
                dt = value.parse().context("invalid --dt")?;
            }
            "--dimension" => {
                let value = args.next().context("--dimension requires 2d or 3d")?;
                dimension = match value.as_str() {
                    "2d" => Dimension::Two,
                    "3d" => Dimension::Three,
                    other => return Err(anyhow::anyhow!("unknown dimension '{other}'")),
                };
            }
            "--help" | "-h" => {
                usage();
                std::process::exit(0);
            }
            other => {
                return Err(anyhow::anyhow!("unknown argument '{other}'"));
            }
        }
    }
    Ok(Args { config, frames, dt, dimension })
}

fn main() {
    env_logger::init();
    if let Err(err) = run_soak() {
        eprintln!("[vfx_soak] {err:?}");
        std::process::exit(1);
    }
}

fn run_soak() -> Result<()> {
    let args = parse_args()?;
    let config = VfxConfig::load_or_default(&args.config);
    let mut ctx = HeadlessContext::new();
    let window = ctx.create_window(UVec2::new(1280, 720));
    ctx.set_window_delta_time(window, args.dt);

    let report = match args.dimension {
        Dimension::Two => {
            let mut system = VfxSystem2D::new(config.system_2d.params())?;
            let presets_loaded = spawn_presets(&mut ctx, &mut system, &config);
            for _ in 0..args.frames {
                ctx.clear_draw_log();
                system.tick_window(&ctx, window)?;
                system.render(&mut ctx, window)?;
                system.draw(&mut ctx, window)?;
            }
            let report = build_report("2d", &args, presets_loaded, &ctx, &system);
            system.destroy(&mut ctx);
            report
        }
        Dimension::Three => {
            let camera = ctx.create_camera(Camera3D::new(
                Vec3::new(0.0, 2.0, 6.0),
                Vec3::ZERO,
                60f32.to_radians(),
                0.1,
                100.0,
            ));
            let mut system = VfxSystem3D::new(config.system_3d.params())?;
            let presets_loaded = spawn_presets(&mut ctx, &mut system, &config);
            for _ in 0..args.frames {
                ctx.clear_draw_log();
                system.tick_window(&ctx, window)?;
                system.render(&mut ctx, window, camera)?;
                system.draw(&mut ctx, window)?;
            }
            let report = build_report("3d", &args, presets_loaded, &ctx, &system);
            system.destroy(&mut ctx);
            report
        }
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn spawn_presets<S: ParticleSpace>(ctx: &mut HeadlessContext, system: &mut VfxSystem<S>, config: &VfxConfig) -> usize {
    let mut loaded = 0;
    for (name, preset) in &config.emitters {
        match system.add_emitter_from_preset(ctx, preset) {
            Ok(handle) => {
                log::info!("[vfx_soak] preset '{name}' -> emitter {handle}");
                loaded += 1;
            }
            Err(err) => log::warn!("[vfx_soak] skipping preset '{name}': {err}"),
        }
    }
    loaded
}

fn build_report<S: ParticleSpace>(
    dimension: &'static str,
    args: &Args,
    presets_loaded: usize,
    ctx: &HeadlessContext,
    system: &VfxSystem<S>,
) -> SoakReport {
    SoakReport {
        dimension,
        frames: args.frames,
        dt: args.dt,
        presets_loaded,
        draws_last_frame: ctx.draws().len(),
        diagnostics: system.diagnostics(),
    }
}

