//! # Host Executor
//!
//! Runs a [`FrameSchedule`] on the CPU with the same buffers the GPU uses:
//! a byte-addressed command buffer holding one [`DrawIndirects`] block per
//! job, three shared tier buffers filled through atomic appends, and draws
//! that read their arguments back out of the command buffer at the
//! scheduled byte offsets.
//!
//! The executor is the reference the GPU counters are checked against.

use std::sync::atomic::{fence, Ordering};
use std::time::Instant;

use bytemuck::Pod;

use crate::classify::{Classifier, LodBuffers, LodCamera, Tier, TierCounters};
use crate::commands::{synthesize, IndirectCommand, SphereBatching};
use crate::config::{ConfigChange, DataFlow, LodConfig};
use crate::error::LodResult;
use crate::jobs::{check_texel_limit, Job, JobPlan, TexelLimitWarning};
use crate::layout::{DrawArrays, DrawCounters, DrawElements, DrawIndirects, SceneData};
use crate::schedule::{DirectDraw, DrawPass, FrameSchedule, IndirectDraw, Stage, SubDraw};
use crate::stats::LodStats;
use crate::store::ParticleStore;

/// Tier a draw pass renders.
#[must_use]
pub const fn pass_tier(pass: DrawPass) -> Tier {
    match pass {
        DrawPass::Tessellated => Tier::Near,
        DrawPass::Mesh => Tier::Medium,
        DrawPass::Points => Tier::Far,
    }
}

/// Byte-addressed command buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandMemory {
    bytes: Vec<u8>,
}

impl CommandMemory {
    /// Zeroed command buffer for a plan.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn new(plan: &JobPlan) -> Self {
        Self {
            bytes: vec![0; plan.command_buffer_bytes() as usize],
        }
    }

    /// Reads a record at a byte offset.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn read<T: Pod>(&self, offset: u64) -> T {
        let start = offset as usize;
        bytemuck::pod_read_unaligned(&self.bytes[start..start + std::mem::size_of::<T>()])
    }

    /// Writes a record at a byte offset.
    #[allow(clippy::cast_possible_truncation)]
    pub fn write<T: Pod>(&mut self, offset: u64, value: &T) {
        let start = offset as usize;
        self.bytes[start..start + std::mem::size_of::<T>()]
            .copy_from_slice(bytemuck::bytes_of(value));
    }

    /// Raw bytes, laid out exactly like the GPU buffer.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

/// One job's outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobReport {
    /// The job.
    pub job: Job,
    /// Its command block after the frame.
    pub block: DrawIndirects,
    /// Spheres its draws covered, per tier.
    pub drawn: DrawCounters,
}

/// One frame's outcome.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameReport {
    /// Per-job results, empty when LOD is disabled.
    pub jobs: Vec<JobReport>,
    /// Spheres drawn by the non-LOD path, per tier of the pass used.
    pub fallback_drawn: DrawCounters,
    /// Drawn items that did not name a particle of the current set.
    pub stale_items: u64,
    /// Aggregated statistics.
    pub stats: LodStats,
}

impl FrameReport {
    /// Counters summed over all jobs.
    #[must_use]
    pub fn totals(&self) -> DrawCounters {
        self.jobs.iter().fold(DrawCounters::default(), |acc, report| DrawCounters {
            far: acc.far + report.block.counters.far,
            medium: acc.medium + report.block.counters.medium,
            near: acc.near + report.block.counters.near,
            _pad: 0,
        })
    }
}

/// CPU rendition of the whole LOD pipeline.
#[derive(Debug)]
pub struct CpuLodPipeline {
    config: LodConfig,
    alignment: u32,
    batching: SphereBatching,
    store: ParticleStore,
    plan: JobPlan,
    buffers: LodBuffers,
    commands: CommandMemory,
    generation: u64,
}

impl CpuLodPipeline {
    /// Builds particles and buffers for `config`.
    ///
    /// `alignment` plays the role of the device's minimum buffer offset
    /// alignment.
    ///
    /// # Errors
    ///
    /// Returns an error for an invalid configuration or alignment.
    pub fn new(config: LodConfig, alignment: u32) -> LodResult<Self> {
        config.validate()?;
        let store = ParticleStore::generate(
            config.particle_count,
            config.seed,
            config.mode.particle_format,
        )?;
        let plan = Self::plan_for(&config, alignment)?;
        let buffers = LodBuffers::new(plan.job_size(), config.mode.item_words());
        let commands = CommandMemory::new(&plan);
        Ok(Self {
            config,
            alignment,
            batching: SphereBatching::default(),
            store,
            plan,
            buffers,
            commands,
            generation: 0,
        })
    }

    fn plan_for(config: &LodConfig, alignment: u32) -> LodResult<JobPlan> {
        JobPlan::new(
            config.particle_count,
            config.effective_job_count(),
            config.mode.item_stride(),
            alignment,
        )
    }

    /// Switches to a new configuration, rebuilding what it invalidates.
    ///
    /// # Errors
    ///
    /// Returns an error if the new configuration is invalid; the current
    /// state is kept in that case.
    pub fn apply_config(&mut self, next: LodConfig) -> LodResult<ConfigChange> {
        next.validate()?;
        let change = ConfigChange::between(&self.config, &next);

        let plan = if change.lod_buffers {
            Some(Self::plan_for(&next, self.alignment)?)
        } else {
            None
        };
        let store = if change.particles {
            Some(ParticleStore::generate(
                next.particle_count,
                next.seed,
                next.mode.particle_format,
            )?)
        } else {
            None
        };

        if let Some(store) = store {
            self.store = store;
        }
        if let Some(plan) = plan {
            self.buffers = LodBuffers::new(plan.job_size(), next.mode.item_words());
            self.commands = CommandMemory::new(&plan);
            self.plan = plan;
            self.generation += 1;
            tracing::info!(
                particles = next.particle_count,
                jobs = self.plan.job_count(),
                job_size = self.plan.job_size(),
                generation = self.generation,
                "rebuilt LOD buffers"
            );
        }
        self.config = next;
        Ok(change)
    }

    /// Current configuration.
    #[must_use]
    pub fn config(&self) -> &LodConfig {
        &self.config
    }

    /// Current job plan.
    #[must_use]
    pub fn plan(&self) -> &JobPlan {
        &self.plan
    }

    /// Current particle set.
    #[must_use]
    pub fn store(&self) -> &ParticleStore {
        &self.store
    }

    /// Tier buffers.
    #[must_use]
    pub fn buffers(&self) -> &LodBuffers {
        &self.buffers
    }

    /// Command buffer.
    #[must_use]
    pub fn commands(&self) -> &CommandMemory {
        &self.commands
    }

    /// Times buffers were reallocated.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Compares buffer texel counts against a device maximum.
    #[must_use]
    pub fn texel_warnings(&self, max_texels: u64) -> Vec<TexelLimitWarning> {
        let item_texels = u64::from(self.config.mode.item_stride()).div_ceil(16);
        let lod_texels = u64::from(self.plan.job_size()) * item_texels;
        [
            check_texel_limit("particles", self.store.texel_count(), max_texels),
            check_texel_limit("lod", lod_texels, max_texels),
        ]
        .into_iter()
        .flatten()
        .collect()
    }

    /// The schedule the next frame runs.
    #[must_use]
    pub fn schedule(&self) -> FrameSchedule {
        FrameSchedule::build(&self.plan, &self.config.mode, self.config.pause, &self.batching)
    }

    /// Runs one frame.
    #[allow(clippy::cast_possible_truncation)]
    pub fn render_frame(&mut self, scene: &SceneData) -> FrameReport {
        let start = Instant::now();
        let camera = LodCamera::from_scene(scene);
        let schedule = self.schedule();

        let mut drawn: Vec<DrawCounters> = vec![DrawCounters::default(); self.plan.job_count() as usize];
        let mut fallback_drawn = DrawCounters::default();
        let mut stale_items = 0;

        for stage in schedule.stages() {
            match stage {
                Stage::ResetCounters(job) => {
                    self.commands.write(self.plan.command_offset(job), &DrawCounters::default());
                }
                Stage::Classify(job) => self.classify(job, &camera),
                Stage::Barrier(job, barrier) => {
                    fence(Ordering::SeqCst);
                    tracing::trace!(job = job.index, ?barrier, "barrier");
                }
                Stage::Synthesize(job) => {
                    let offset = self.plan.command_offset(job);
                    let counters: DrawCounters = self.commands.read(offset);
                    self.commands.write(offset, &synthesize(counters, &self.batching));
                }
                Stage::Draw(draw) => {
                    let (units, stale) = self.draw_indirect(draw);
                    add_units(&mut drawn[draw.job.index as usize], pass_tier(draw.pass), units);
                    stale_items += stale;
                }
                Stage::DirectDraw(draw) => {
                    add_units(&mut fallback_drawn, pass_tier(draw.pass), self.direct_units(draw));
                }
            }
        }

        let mut stats = LodStats {
            draw_calls: schedule.draw_calls() as u32,
            updates_skipped: schedule.updates_skipped(),
            ..LodStats::default()
        };
        let jobs: Vec<JobReport> = if self.config.mode.lod {
            self.plan
                .jobs()
                .map(|job| {
                    let block: DrawIndirects = self.commands.read(self.plan.command_offset(&job));
                    stats.add_job(&block.counters);
                    JobReport {
                        job,
                        block,
                        drawn: drawn[job.index as usize],
                    }
                })
                .collect()
        } else {
            stats.add_job(&fallback_drawn);
            Vec::new()
        };
        stats.frame_time_ms = start.elapsed().as_secs_f32() * 1000.0;

        if stale_items > 0 {
            tracing::warn!(stale_items, "draws read items outside the particle set");
        }

        FrameReport {
            jobs,
            fallback_drawn,
            stale_items,
            stats,
        }
    }

    /// Classification with the counters living in the job's command block.
    fn classify(&mut self, job: &Job, camera: &LodCamera) {
        let offset = self.plan.command_offset(job);
        let stored: DrawCounters = self.commands.read(offset);
        let counters = TierCounters::from_counters(&stored);
        Classifier::new(&self.store, camera, self.config.mode).run(job, &counters, &self.buffers);
        self.commands.write(offset, &counters.snapshot());
    }

    /// Reads a draw's arguments and walks the slots it covers.
    ///
    /// Returns the spheres drawn and how many of them were stale.
    fn draw_indirect(&self, draw: &IndirectDraw) -> (u32, u64) {
        let batch = self.batching.batch_size;
        let indices_per_unit = match draw.pass {
            DrawPass::Tessellated => self.batching.tess_indices,
            DrawPass::Mesh => self.batching.basic_indices,
            DrawPass::Points => 1,
        };
        let units = if draw.command.is_indexed() {
            let args: DrawElements = self.commands.read(draw.indirect_offset);
            args.count / indices_per_unit * args.instance_count
        } else {
            let args: DrawArrays = self.commands.read(draw.indirect_offset);
            args.count * args.instance_count
        };

        let first_slot = match draw.sub_draw {
            SubDraw::Full => 0,
            SubDraw::Rest => {
                let full_command = match draw.pass {
                    DrawPass::Tessellated => IndirectCommand::NearFull,
                    _ => IndirectCommand::MediumFull,
                };
                let full: DrawElements = self
                    .commands
                    .read(self.plan.indirect_offset(&draw.job, full_command));
                full.instance_count * batch
            }
        };

        let buffer = self.buffers.tier(pass_tier(draw.pass));
        if first_slot + units > buffer.capacity() {
            tracing::warn!(
                job = draw.job.index,
                pass = ?draw.pass,
                end = first_slot + units,
                capacity = buffer.capacity(),
                "draw past tier buffer capacity"
            );
        }

        let stale = match self.config.mode.data_flow {
            DataFlow::Indices => (first_slot..first_slot + units)
                .filter(|&slot| {
                    buffer
                        .first_word(slot)
                        .map_or(true, |index| index >= self.store.len())
                })
                .count() as u64,
            DataFlow::Payload => 0,
        };
        (units, stale)
    }

    fn direct_units(&self, draw: &DirectDraw) -> u32 {
        let indices_per_unit = match draw.pass {
            DrawPass::Tessellated => self.batching.tess_indices,
            _ => self.batching.basic_indices,
        };
        draw.index_count / indices_per_unit * draw.instance_count
    }
}

fn add_units(counters: &mut DrawCounters, tier: Tier, units: u32) {
    match tier {
        Tier::Far => counters.far += units,
        Tier::Medium => counters.medium += units,
        Tier::Near => counters.near += units,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ClassifyStrategy, PipelineMode};
    use crate::error::LodError;
    use crate::scene::SceneCamera;

    fn scene_for(config: &LodConfig) -> SceneData {
        let camera = SceneCamera::from_config(&config.camera, config.viewport, 0);
        SceneData::new(&camera, config.viewport, &config.thresholds)
    }

    fn small_config(particles: u32, jobs: u32) -> LodConfig {
        LodConfig {
            particle_count: particles,
            job_count: jobs,
            ..LodConfig::default()
        }
    }

    #[test]
    fn test_draws_cover_classified_particles() {
        let config = small_config(10_000, 3);
        let scene = scene_for(&config);
        let mut pipeline = CpuLodPipeline::new(config, 256).unwrap();
        let report = pipeline.render_frame(&scene);

        assert_eq!(report.totals().total(), 10_000);
        for job in &report.jobs {
            assert_eq!(job.block.counters.total(), job.job.count);
            assert_eq!(job.drawn, DrawCounters { _pad: 0, ..job.block.counters });
        }
        assert_eq!(report.stale_items, 0);
        assert_eq!(report.stats.total(), 10_000);
        assert_eq!(report.stats.draw_calls, 5 * pipeline.plan().job_count());
    }

    #[test]
    fn test_counters_reset_every_frame() {
        let config = small_config(4_000, 1);
        let scene = scene_for(&config);
        let mut pipeline = CpuLodPipeline::new(config, 256).unwrap();
        let first = pipeline.render_frame(&scene);
        let second = pipeline.render_frame(&scene);
        assert_eq!(first.totals(), second.totals());
        assert_eq!(second.totals().total(), 4_000);
    }

    #[test]
    fn test_paused_single_job_keeps_previous_commands() {
        let config = small_config(4_000, 1);
        let scene = scene_for(&config);
        let mut pipeline = CpuLodPipeline::new(config.clone(), 256).unwrap();
        let live = pipeline.render_frame(&scene);

        let paused = LodConfig {
            pause: true,
            ..config.clone()
        };
        assert!(pipeline.apply_config(paused).unwrap().is_empty());

        // A camera that would classify everything differently.
        let moved = LodConfig {
            thresholds: crate::config::LodThresholds {
                far_pixels: 1e6,
                near_pixels: 2e6,
                ..config.thresholds
            },
            ..config
        };
        let frozen = pipeline.render_frame(&scene_for(&moved));
        assert!(frozen.stats.updates_skipped);
        assert_eq!(frozen.jobs[0].block, live.jobs[0].block);
        assert_eq!(frozen.stats.draw_calls, 5);
    }

    #[test]
    fn test_paused_multi_job_still_classifies() {
        let config = LodConfig {
            pause: true,
            ..small_config(4_000, 4)
        };
        let scene = scene_for(&config);
        let mut pipeline = CpuLodPipeline::new(config, 4).unwrap();
        let report = pipeline.render_frame(&scene);
        assert!(!report.stats.updates_skipped);
        assert_eq!(report.totals().total(), 4_000);
    }

    #[test]
    fn test_fallback_draws_every_particle() {
        let mut config = small_config(5_000, 2);
        config.mode = PipelineMode {
            lod: false,
            ..PipelineMode::default()
        };
        let scene = scene_for(&config);
        let mut pipeline = CpuLodPipeline::new(config, 256).unwrap();
        let report = pipeline.render_frame(&scene);
        assert!(report.jobs.is_empty());
        assert_eq!(report.fallback_drawn.medium, 5_000);
        assert_eq!(report.stats.draw_calls, 2);
        assert_eq!(report.stats.total(), 5_000);
    }

    #[test]
    fn test_command_memory_matches_block_layout() {
        let plan = JobPlan::new(2048, 2, 4, 256).unwrap();
        let mut memory = CommandMemory::new(&plan);
        let job = plan.job(1).unwrap();
        let block = synthesize(
            DrawCounters {
                far: 3,
                medium: 1500,
                near: 2,
                _pad: 0,
            },
            &SphereBatching::default(),
        );
        memory.write(plan.command_offset(&job), &block);
        let rest: DrawElements = memory.read(plan.indirect_offset(&job, IndirectCommand::MediumRest));
        assert_eq!(rest, block.medium_rest);
        let far: DrawArrays = memory.read(plan.indirect_offset(&job, IndirectCommand::FarArray));
        assert_eq!(far.count, 3);
        assert_eq!(memory.as_bytes().len(), 512);
        assert!(memory.as_bytes()[..256].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_vertex_stream_frame_matches_compute() {
        let config = small_config(6_000, 2);
        let scene = scene_for(&config);
        let mut compute = CpuLodPipeline::new(config.clone(), 256).unwrap();
        let mut vertex_config = config;
        vertex_config.mode.strategy = ClassifyStrategy::VertexStream;
        let mut vertex = CpuLodPipeline::new(vertex_config, 256).unwrap();
        let a = compute.render_frame(&scene);
        let b = vertex.render_frame(&scene);
        for (x, y) in a.jobs.iter().zip(&b.jobs) {
            assert_eq!(x.block, y.block);
        }
    }

    #[test]
    fn test_texel_warnings() {
        let pipeline = CpuLodPipeline::new(small_config(1_000, 1), 256).unwrap();
        assert!(pipeline.texel_warnings(1 << 20).is_empty());
        let warnings = pipeline.texel_warnings(100);
        assert_eq!(warnings.len(), 2);
        assert_eq!(warnings[0].texels, 2_000);
    }

    #[test]
    fn test_rejected_config_keeps_state() {
        let config = small_config(2_000, 2);
        let mut pipeline = CpuLodPipeline::new(config.clone(), 256).unwrap();
        let plan = *pipeline.plan();
        let first = pipeline.store().texels().to_vec();

        pipeline.alignment = 3;
        let resized = LodConfig {
            seed: config.seed + 1,
            ..small_config(3_000, 4)
        };
        assert!(matches!(
            pipeline.apply_config(resized),
            Err(LodError::InvalidAlignment(3))
        ));

        assert_eq!(pipeline.store().len(), 2_000);
        assert_eq!(pipeline.store().texels(), first.as_slice());
        assert_eq!(*pipeline.plan(), plan);
        assert_eq!(pipeline.config(), &config);
        assert_eq!(pipeline.generation(), 0);
        assert_eq!(pipeline.buffers().capacity(), plan.job_size());
    }
}
