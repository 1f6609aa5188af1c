// Headless testbed: flies a viewpoint over the terrain, drops edits along the
// way, and teleports once. Runs on the first wgpu adapter, or on the CPU
// backend with `--soft` (or when no adapter is available).

use std::time::Instant;

use anyhow::Context;
use glam::{Vec2, Vec3};

use clipterrain::profiler::{settings_from_args, FrameProf};
use clipterrain::{SoftGpu, Terrain, TerrainConfig, TerrainGpu, WgpuGpu};

struct Args {
    soft: bool,
    frames: u64,
}

fn parse_args() -> Args {
    let mut args = Args { soft: false, frames: 600 };
    let mut it = std::env::args().skip(1);
    while let Some(a) = it.next() {
        if a == "--soft" {
            args.soft = true;
        } else if a == "--frames" {
            if let Some(n) = it.next().and_then(|v| v.parse().ok()) {
                args.frames = n;
            }
        }
    }
    args
}

fn request_adapter() -> Option<wgpu::Adapter> {
    let instance = wgpu::Instance::new(wgpu::InstanceDescriptor::default());
    pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
        power_preference: wgpu::PowerPreference::HighPerformance,
        compatible_surface: None,
        force_fallback_adapter: false,
    }))
}

/// Viewpoint at frame `f`: a slow eastward drift with a sideways sway.
fn flight_path(f: u64, texel: f32) -> Vec3 {
    let t = f as f32;
    Vec3::new(t * 3.3 * texel, 0.0, (t * 0.05).sin() * 40.0 * texel)
}

fn run<G: TerrainGpu>(gpu: G, frames: u64, prof: &mut FrameProf) -> anyhow::Result<()> {
    let cfg = TerrainConfig::default();
    let texel = cfg.texel_size;

    let mut terrain = Terrain::new(cfg, gpu).context("terrain config")?;
    terrain.init().context("terrain init")?;
    terrain.build().context("terrain build")?;

    let teleport_at = frames / 2;
    for f in 0..frames {
        let t_frame = Instant::now();

        let mut viewpoint = flight_path(f, texel);
        if f >= teleport_at {
            viewpoint += Vec3::new(5_000.0 * texel, 0.0, -3_000.0 * texel);
        }

        let t0 = prof.start();
        let idle = terrain.poll_uploads();
        prof.poll(FrameProf::end_ms(t0));

        if idle && f % 45 == 20 && terrain.pending_dirty().is_none() {
            let t0 = prof.start();
            let at = Vec2::new(viewpoint.x, viewpoint.z) + Vec2::new(1.5, -0.75);
            terrain.raise_area_rounded(at, 0.6, if f % 90 == 20 { 0.8 } else { -0.5 });
            prof.edit(FrameProf::end_ms(t0));
        }

        let t0 = prof.start();
        let stats = terrain.update_clipmap_textures(viewpoint)?;
        prof.update(FrameProf::end_ms(t0), stats);

        let t0 = prof.start();
        terrain.bind_params()?;
        prof.bind(FrameProf::end_ms(t0));

        prof.end_frame(t_frame.elapsed().as_secs_f64() * 1000.0);
    }

    log::info!(
        "done: {} frames, offset {}, {} tiles cached",
        frames,
        terrain.offset(),
        terrain.heights().tile_count()
    );
    Ok(())
}

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let args = parse_args();
    let (prof_enabled, print_every) = settings_from_args(std::env::args().skip(1));
    let mut prof = FrameProf::new(prof_enabled, print_every);

    let adapter = if args.soft { None } else { request_adapter() };
    match adapter {
        Some(adapter) => {
            let gpu = pollster::block_on(WgpuGpu::new(&adapter)).context("wgpu device")?;
            run(gpu, args.frames, &mut prof)
        }
        None => {
            log::warn!("running on the CPU backend");
            run(SoftGpu::new(), args.frames, &mut prof)
        }
    }
}
