//! # Particle LOD Driver
//!
//! Headless frames through the LOD pipeline. Every frame runs on the host
//! executor; when a GPU is found it also runs on the device, and the
//! command blocks read back from the GPU are compared with the host's.
//!
//! ```bash
//! # Default configuration, GPU if available
//! ./particle_lod
//!
//! # Custom configuration, per-frame stats
//! RUST_LOG=info ./particle_lod --config lod.toml --frames 60
//!
//! # Resize halfway through
//! ./particle_lod --frames 8 --resize 200000
//! ```

mod args;

use std::process::ExitCode;

use particle_lod_core::{CpuLodPipeline, FrameReport, LodConfig, LodStats, SceneCamera, SceneData};
use particle_lod_rendering::{FrameOutcome, GpuContext, GpuFrame, GpuLodPipeline};

use crate::args::{Args, USAGE};

/// Alignment the host executor pads job blocks to without a device.
const HOST_ALIGNMENT: u32 = 256;

#[derive(Debug, Default)]
struct RunSummary {
    frames: u32,
    gpu_frames: u32,
    skipped: u32,
    mismatches: u32,
    last: LodStats,
}

fn main() -> ExitCode {
    env_logger::init();

    let args = match Args::parse(std::env::args().skip(1)) {
        Ok(args) => args,
        Err(error) => {
            eprintln!("error: {error}\n\n{USAGE}");
            return ExitCode::FAILURE;
        }
    };
    if args.help {
        print!("{USAGE}");
        return ExitCode::SUCCESS;
    }

    match run(&args) {
        Ok(summary) => {
            print_summary(&summary);
            ExitCode::SUCCESS
        }
        Err(error) => {
            eprintln!("   ✗ FATAL: {error}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> Result<RunSummary, Box<dyn std::error::Error>> {
    let config = match &args.config {
        Some(path) => LodConfig::load(path)?,
        None => LodConfig::default(),
    };
    print_banner(&config);

    let mut gpu = if args.cpu_only {
        None
    } else {
        start_gpu(&config)
    };
    let alignment = gpu
        .as_ref()
        .map_or(HOST_ALIGNMENT, |pipeline| pipeline.context().caps.alignment);
    let mut host = CpuLodPipeline::new(config, alignment)?;
    println!(
        "   ✓ Host executor: {} jobs of {} particles",
        host.plan().job_count(),
        host.plan().job_size()
    );
    println!();

    let mut summary = RunSummary::default();
    for frame in 0..args.frames {
        if let Some((at, particles)) = args.resize_frame() {
            if frame == at {
                let next = LodConfig {
                    particle_count: particles,
                    ..host.config().clone()
                };
                let change = host.apply_config(next.clone())?;
                if let Some(pipeline) = gpu.as_mut() {
                    pipeline.apply_config(next)?;
                }
                tracing::info!(frame, particles, ?change, "resized particle set");
            }
        }

        let scene = {
            let config = host.config();
            let camera = SceneCamera::from_config(&config.camera, config.viewport, frame);
            SceneData::new(&camera, config.viewport, &config.thresholds)
        };

        let report = host.render_frame(&scene);
        log_frame("host", frame, &report.stats);
        summary.frames += 1;
        summary.last = report.stats;

        let Some(pipeline) = gpu.as_mut() else {
            continue;
        };
        let gpu_frame = pipeline.render_frame(&scene, true)?;
        match gpu_frame.outcome {
            FrameOutcome::Rendered => {
                log_frame("gpu", frame, &gpu_frame.stats);
                summary.gpu_frames += 1;
                if !blocks_match(&report, &gpu_frame) {
                    summary.mismatches += 1;
                }
            }
            FrameOutcome::Skipped(reason) => {
                tracing::warn!(frame, ?reason, "GPU frame skipped");
                summary.skipped += 1;
            }
        }
    }

    Ok(summary)
}

fn start_gpu(config: &LodConfig) -> Option<GpuLodPipeline> {
    let context = match GpuContext::new() {
        Ok(context) => context,
        Err(error) => {
            tracing::warn!(%error, "continuing on the host executor only");
            println!("   ✗ GPU: {error}");
            return None;
        }
    };
    println!(
        "   ✓ GPU: {} ({:?})",
        context.adapter_info.name, context.adapter_info.backend
    );

    match GpuLodPipeline::new(context, config.clone()) {
        Ok(pipeline) => {
            if !pipeline.programs().is_valid() {
                println!("   ✗ GPU programs failed validation, frames will be skipped");
            }
            Some(pipeline)
        }
        Err(error) => {
            tracing::warn!(%error, "GPU pipeline setup failed");
            None
        }
    }
}

/// Compares every job's command block; logs the first difference.
fn blocks_match(host: &FrameReport, gpu: &GpuFrame) -> bool {
    if host.jobs.len() != gpu.blocks.len() {
        tracing::warn!(
            host = host.jobs.len(),
            gpu = gpu.blocks.len(),
            "job count differs"
        );
        return false;
    }
    for (report, block) in host.jobs.iter().zip(&gpu.blocks) {
        if report.block != *block {
            tracing::warn!(
                job = report.job.index,
                host = ?report.block.counters,
                gpu = ?block.counters,
                "GPU command block differs from host"
            );
            return false;
        }
    }
    true
}

fn log_frame(source: &str, frame: u32, stats: &LodStats) {
    tracing::info!(
        source,
        frame,
        jobs = stats.jobs,
        far = stats.far,
        medium = stats.medium,
        near = stats.near,
        draw_calls = stats.draw_calls,
        updates_skipped = stats.updates_skipped,
        ms = stats.frame_time_ms,
        fps = stats.frames_per_second(),
        "frame"
    );
}

fn print_banner(config: &LodConfig) {
    println!("═══════════════════════════════════════════════════════════════════");
    println!("                       PARTICLE LOD v{}", env!("CARGO_PKG_VERSION"));
    println!("═══════════════════════════════════════════════════════════════════");
    println!();
    println!("  Particles:  {}", config.particle_count);
    println!("  Jobs:       {}", config.effective_job_count());
    println!("  LOD:        {}", if config.mode.lod { "on" } else { "off" });
    println!("  Strategy:   {:?}", config.mode.strategy);
    println!("  Data flow:  {:?}", config.mode.data_flow);
    println!("  Format:     {:?}", config.mode.particle_format);
    println!();
}

fn print_summary(summary: &RunSummary) {
    let [far, medium, near] = summary.last.tier_fractions();
    println!();
    println!("═══════════════════════════════════════════════════════════════════");
    println!(
        "  Frames:      {} host, {} GPU, {} skipped",
        summary.frames, summary.gpu_frames, summary.skipped
    );
    println!(
        "  Last frame:  far {:.1}%  medium {:.1}%  near {:.1}%",
        far * 100.0,
        medium * 100.0,
        near * 100.0
    );
    println!(
        "  Draw calls:  {}  ({:.1} ms, {:.0} fps on the host)",
        summary.last.draw_calls,
        summary.last.frame_time_ms,
        summary.last.frames_per_second()
    );
    if summary.gpu_frames > 0 {
        if summary.mismatches == 0 {
            println!("  GPU check:   ✓ command blocks match the host executor");
        } else {
            println!("  GPU check:   ✗ {} frames differ", summary.mismatches);
        }
    }
    println!("═══════════════════════════════════════════════════════════════════");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_config_parses() {
        let config = LodConfig::from_toml_str(include_str!("../lod.toml")).unwrap();
        assert_eq!(config.particle_count, 1_048_575);
        assert_eq!(config.effective_job_count(), 4);
        assert!(config.mode.lod);
    }
}
