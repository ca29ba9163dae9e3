//! # GPU LOD Pipeline
//!
//! Encodes one frame from the same [`FrameSchedule`] the host executor
//! walks. Per job the encoder emits:
//!
//! ```text
//! compute/stream pass   classify         (job params + counters at dynamic offsets)
//! ── pass boundary ──    barrier 1
//! compute/stream pass   synthesize       (one invocation)
//! ── pass boundary ──    barrier 2
//! render pass           tess x2, mesh x2, points x1 (indirect)
//! ```
//!
//! Counter resets are queued with `write_buffer` ahead of the frame's
//! command buffer. The host never waits between stages; the only wait is
//! the optional counter readback after submission.

use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use particle_lod_core::layout::DrawIndirects;
use particle_lod_core::schedule::{DirectDraw, DrawPass, IndirectDraw, SubDraw};
use particle_lod_core::{
    check_texel_limit, ConfigChange, FrameSchedule, Job, JobPlan, LodConfig, LodStats,
    ParticleStore, SceneData, SphereBatching, Stage, TexelLimitWarning, Tier,
};

use crate::context::GpuContext;
use crate::error::{RenderError, RenderResult};
use crate::geometry::SphereGeometry;
use crate::programs::{LodLayouts, PointsProgram, ProgramSet, StageProgram};
use crate::resources::GpuLodResources;

/// Largest workgroup count of one dispatch dimension.
const MAX_DISPATCH: u32 = 65_535;
const CLASSIFY_WORKGROUP: u32 = 256;

const BACKGROUND: wgpu::Color = wgpu::Color {
    r: 0.1,
    g: 0.13,
    b: 0.15,
    a: 1.0,
};

/// Workgroups covering `count` invocations, folded into two dimensions.
#[must_use]
pub fn dispatch_size(count: u32) -> (u32, u32) {
    let groups = count.div_ceil(CLASSIFY_WORKGROUP).max(1);
    let x = groups.min(MAX_DISPATCH);
    (x, groups.div_ceil(x))
}

/// Why a frame issued no work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The current program set failed validation.
    ProgramsInvalid,
    /// The classification strategy needs a feature the device lacks.
    StrategyUnsupported,
}

/// Result of one GPU frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    /// Work was submitted.
    Rendered,
    /// Nothing was submitted.
    Skipped(SkipReason),
}

/// One submitted (or skipped) frame.
#[derive(Debug, Clone)]
pub struct GpuFrame {
    /// Whether the frame ran.
    pub outcome: FrameOutcome,
    /// Command blocks read back after the frame, one per job.
    pub blocks: Vec<DrawIndirects>,
    /// Frame statistics; tier counts only with readback.
    pub stats: LodStats,
}

impl GpuFrame {
    fn skipped(reason: SkipReason) -> Self {
        Self {
            outcome: FrameOutcome::Skipped(reason),
            blocks: Vec::new(),
            stats: LodStats::default(),
        }
    }
}

/// Particles, buffers and programs on one device.
pub struct GpuLodPipeline {
    context: GpuContext,
    layouts: LodLayouts,
    geometry: SphereGeometry,
    batching: SphereBatching,
    config: LodConfig,
    store: ParticleStore,
    plan: JobPlan,
    programs: ProgramSet,
    resources: GpuLodResources,
    generation: u64,
}

impl GpuLodPipeline {
    /// Builds everything `config` needs on `context`'s device.
    ///
    /// # Errors
    ///
    /// Returns an error for an invalid configuration.
    pub fn new(context: GpuContext, config: LodConfig) -> RenderResult<Self> {
        config.validate()?;
        let layouts = LodLayouts::new(&context.device, &context.caps);
        let geometry = SphereGeometry::new();
        let store =
            ParticleStore::generate(config.particle_count, config.seed, config.mode.particle_format)?;
        let plan = Self::plan_for(&config, context.caps.alignment)?;
        let programs = ProgramSet::new(
            &context.device,
            &context.caps,
            &layouts,
            config.mode,
            config.wireframe,
        );
        let resources = GpuLodResources::new(
            &context.device,
            &layouts,
            &geometry,
            &store,
            &plan,
            config.mode,
            config.viewport,
        );

        let pipeline = Self {
            context,
            layouts,
            geometry,
            batching: SphereBatching::default(),
            config,
            store,
            plan,
            programs,
            resources,
            generation: 0,
        };
        pipeline.texel_warnings();
        Ok(pipeline)
    }

    fn plan_for(config: &LodConfig, alignment: u32) -> RenderResult<JobPlan> {
        Ok(JobPlan::new(
            config.particle_count,
            config.effective_job_count(),
            config.mode.item_stride(),
            alignment,
        )?)
    }

    /// Switches to a new configuration, rebuilding what it invalidates.
    ///
    /// Programs also depend on the strategy, the item fetch and the
    /// wireframe switch, and bindings on the whole mode.
    ///
    /// # Errors
    ///
    /// Returns an error if the new configuration is invalid; the current
    /// state is kept in that case.
    pub fn apply_config(&mut self, next: LodConfig) -> RenderResult<ConfigChange> {
        next.validate()?;
        let change = ConfigChange::between(&self.config, &next);
        let mode_changed = self.config.mode != next.mode;

        let plan = if change.lod_buffers {
            Self::plan_for(&next, self.context.caps.alignment)?
        } else {
            self.plan
        };
        if change.particles {
            self.store =
                ParticleStore::generate(next.particle_count, next.seed, next.mode.particle_format)?;
        }
        self.plan = plan;

        if change.lod_buffers || mode_changed || self.config.viewport != next.viewport {
            self.resources = GpuLodResources::new(
                &self.context.device,
                &self.layouts,
                &self.geometry,
                &self.store,
                &self.plan,
                next.mode,
                next.viewport,
            );
            self.generation += 1;
            tracing::info!(
                particles = next.particle_count,
                jobs = self.plan.job_count(),
                generation = self.generation,
                "rebuilt GPU LOD resources"
            );
        }
        if change.programs || mode_changed || self.config.wireframe != next.wireframe {
            self.programs = ProgramSet::new(
                &self.context.device,
                &self.context.caps,
                &self.layouts,
                next.mode,
                next.wireframe,
            );
        }

        self.config = next;
        self.texel_warnings();
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

    /// Current program set.
    #[must_use]
    pub fn programs(&self) -> &ProgramSet {
        &self.programs
    }

    /// Device context.
    #[must_use]
    pub fn context(&self) -> &GpuContext {
        &self.context
    }

    /// Resource rebuilds so far.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Compares particle and LOD buffer texel counts with the device limit.
    pub fn texel_warnings(&self) -> Vec<TexelLimitWarning> {
        let max_texels = self.context.caps.max_texels();
        let item_texels = u64::from(self.config.mode.item_stride()).div_ceil(16);
        [
            check_texel_limit("particles", self.store.texel_count(), max_texels),
            check_texel_limit("lod", u64::from(self.plan.job_size()) * item_texels, max_texels),
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

    /// Encodes and submits one frame.
    ///
    /// With `readback` the command blocks are copied out and mapped after
    /// submission, which waits for the GPU.
    ///
    /// # Errors
    ///
    /// Returns an error if the readback buffer cannot be mapped.
    #[allow(clippy::cast_possible_truncation)]
    pub fn render_frame(&mut self, scene: &SceneData, readback: bool) -> RenderResult<GpuFrame> {
        let start = Instant::now();

        if let Err(error) = self.programs.ensure_valid() {
            tracing::warn!(%error, "skipping frame");
            return Ok(GpuFrame::skipped(SkipReason::ProgramsInvalid));
        }

        let schedule = self.schedule();
        let stages = schedule.stages();
        let updates = stages.iter().any(|stage| matches!(stage, Stage::Classify(_)));
        let stage_programs = match (&self.programs.classify, &self.programs.commands) {
            (Some(classify), Some(commands)) => Some((classify, commands)),
            _ => None,
        };
        if updates && stage_programs.is_none() {
            tracing::warn!(strategy = ?self.config.mode.strategy, "skipping frame");
            return Ok(GpuFrame::skipped(SkipReason::StrategyUnsupported));
        }

        let queue = &self.context.queue;
        self.resources.write_scene(queue, scene);
        self.resources.reset_counters(
            queue,
            stages.iter().filter_map(|stage| match stage {
                Stage::ResetCounters(job) => Some(job),
                _ => None,
            }),
        );

        let mut encoder =
            self.context
                .device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("LOD Frame"),
                });

        let mut clear = true;
        let mut i = 0;
        while i < stages.len() {
            match &stages[i] {
                Stage::ResetCounters(_) => {}
                Stage::Classify(job) => {
                    if let Some((classify, _)) = stage_programs {
                        self.encode_classify(&mut encoder, classify, job);
                    }
                }
                Stage::Barrier(job, barrier) => {
                    tracing::trace!(job = job.index, ?barrier, "pass boundary");
                }
                Stage::Synthesize(job) => {
                    if let Some((_, commands)) = stage_programs {
                        self.encode_synthesize(&mut encoder, commands, job);
                    }
                }
                Stage::Draw(_) | Stage::DirectDraw(_) => {
                    let end = stages[i..]
                        .iter()
                        .position(|stage| !matches!(stage, Stage::Draw(_) | Stage::DirectDraw(_)))
                        .map_or(stages.len(), |n| i + n);
                    self.encode_draws(&mut encoder, &stages[i..end], clear);
                    clear = false;
                    i = end;
                    continue;
                }
            }
            i += 1;
        }

        if readback {
            encoder.copy_buffer_to_buffer(
                &self.resources.commands,
                0,
                &self.resources.readback,
                0,
                self.plan.command_buffer_bytes(),
            );
        }
        self.context.queue.submit(std::iter::once(encoder.finish()));

        let blocks = if readback && self.config.mode.lod {
            self.read_blocks()?
        } else {
            Vec::new()
        };

        let mut stats = LodStats {
            draw_calls: schedule.draw_calls() as u32,
            updates_skipped: schedule.updates_skipped(),
            ..LodStats::default()
        };
        for block in &blocks {
            stats.add_job(&block.counters);
        }
        if blocks.is_empty() && self.config.mode.lod {
            stats.jobs = self.plan.job_count();
        }
        stats.frame_time_ms = start.elapsed().as_secs_f32() * 1000.0;
        tracing::debug!(
            jobs = self.plan.job_count(),
            draw_calls = stats.draw_calls,
            updates_skipped = stats.updates_skipped,
            "submitted GPU frame"
        );

        Ok(GpuFrame {
            outcome: FrameOutcome::Rendered,
            blocks,
            stats,
        })
    }

    fn stream_pass<'a>(
        encoder: &'a mut wgpu::CommandEncoder,
        view: &'a wgpu::TextureView,
        label: &str,
    ) -> wgpu::RenderPass<'a> {
        encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some(label),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Load,
                    store: wgpu::StoreOp::Discard,
                },
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
        })
    }

    #[allow(clippy::cast_possible_truncation)]
    fn encode_classify(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        program: &StageProgram,
        job: &Job,
    ) {
        let r = &self.resources;
        let offsets = [
            self.plan.params_offset(job) as u32,
            self.plan.command_offset(job) as u32,
        ];
        match program {
            StageProgram::Compute(pipeline) => {
                let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                    label: Some("LOD Classify"),
                    timestamp_writes: None,
                });
                pass.set_pipeline(pipeline);
                pass.set_bind_group(0, &r.classify_scene, &[]);
                pass.set_bind_group(1, &r.classify_job, &offsets);
                pass.set_bind_group(2, &r.classify_lod, &[]);
                let (x, y) = dispatch_size(job.count);
                pass.dispatch_workgroups(x, y, 1);
            }
            StageProgram::VertexStream(pipeline) => {
                let mut pass = Self::stream_pass(encoder, &r.stream_view, "LOD Classify Stream");
                pass.set_pipeline(pipeline);
                pass.set_bind_group(0, &r.classify_scene, &[]);
                pass.set_bind_group(1, &r.classify_job, &offsets);
                pass.set_bind_group(2, &r.classify_lod, &[]);
                pass.draw(0..job.count, 0..1);
            }
        }
    }

    #[allow(clippy::cast_possible_truncation)]
    fn encode_synthesize(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        program: &StageProgram,
        job: &Job,
    ) {
        let r = &self.resources;
        let offsets = [self.plan.command_offset(job) as u32];
        match program {
            StageProgram::Compute(pipeline) => {
                let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                    label: Some("LOD Commands"),
                    timestamp_writes: None,
                });
                pass.set_pipeline(pipeline);
                pass.set_bind_group(0, &r.commands_job, &offsets);
                pass.dispatch_workgroups(1, 1, 1);
            }
            StageProgram::VertexStream(pipeline) => {
                let mut pass = Self::stream_pass(encoder, &r.stream_view, "LOD Commands Stream");
                pass.set_pipeline(pipeline);
                pass.set_bind_group(0, &r.commands_job, &offsets);
                pass.draw(0..1, 0..1);
            }
        }
    }

    fn encode_draws(&self, encoder: &mut wgpu::CommandEncoder, draws: &[Stage], clear: bool) {
        let r = &self.resources;
        let (color_load, depth_load) = if clear {
            (wgpu::LoadOp::Clear(BACKGROUND), wgpu::LoadOp::Clear(1.0))
        } else {
            (wgpu::LoadOp::Load, wgpu::LoadOp::Load)
        };
        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("LOD Draw"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: &r.color_view,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: color_load,
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                view: &r.depth_view,
                depth_ops: Some(wgpu::Operations {
                    load: depth_load,
                    store: wgpu::StoreOp::Store,
                }),
                stencil_ops: None,
            }),
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        pass.set_bind_group(0, &r.draw_scene, &[]);

        for stage in draws {
            match stage {
                Stage::Draw(draw) => self.encode_indirect(&mut pass, draw),
                Stage::DirectDraw(draw) => self.encode_direct(&mut pass, draw),
                _ => {}
            }
        }
    }

    #[allow(clippy::cast_possible_truncation)]
    fn encode_indirect<'a>(&'a self, pass: &mut wgpu::RenderPass<'a>, draw: &IndirectDraw) {
        let r = &self.resources;
        let job_offsets = [
            self.plan.command_offset(&draw.job) as u32,
            r.toggle_offset(draw.sub_draw == SubDraw::Rest),
        ];

        match draw.pass {
            DrawPass::Tessellated | DrawPass::Mesh => {
                let (pipeline, mesh, tier) = if draw.pass == DrawPass::Tessellated {
                    (&self.programs.sphere_tessellated, &r.tess_mesh, Tier::Near)
                } else {
                    (&self.programs.sphere_basic, &r.basic_mesh, Tier::Medium)
                };
                pass.set_pipeline(pipeline);
                pass.set_bind_group(1, &r.draw_job, &job_offsets);
                pass.set_bind_group(2, &r.tier_items[tier.index()], &[]);
                pass.set_index_buffer(mesh.indices.slice(..), wgpu::IndexFormat::Uint32);
                pass.draw_indexed_indirect(&r.commands, draw.indirect_offset);
            }
            DrawPass::Points => match &self.programs.points {
                PointsProgram::Storage(pipeline) => {
                    pass.set_pipeline(pipeline);
                    pass.set_bind_group(1, &r.draw_job, &job_offsets);
                    pass.set_bind_group(2, &r.tier_items[Tier::Far.index()], &[]);
                    pass.draw_indirect(&r.commands, draw.indirect_offset);
                }
                PointsProgram::VertexAttribute(pipeline) => {
                    let far = &r.lod[Tier::Far.index()];
                    pass.set_pipeline(pipeline);
                    if draw.command.is_indexed() {
                        pass.set_vertex_buffer(0, r.particles.slice(..));
                        pass.set_index_buffer(far.slice(..), wgpu::IndexFormat::Uint32);
                        pass.draw_indexed_indirect(&r.commands, draw.indirect_offset);
                    } else {
                        pass.set_vertex_buffer(0, far.slice(..));
                        pass.draw_indirect(&r.commands, draw.indirect_offset);
                    }
                }
            },
        }
    }

    fn encode_direct<'a>(&'a self, pass: &mut wgpu::RenderPass<'a>, draw: &DirectDraw) {
        let r = &self.resources;
        let (pipeline, mesh) = match draw.pass {
            DrawPass::Tessellated => (&self.programs.sphere_tessellated, &r.tess_mesh),
            DrawPass::Mesh | DrawPass::Points => (&self.programs.sphere_basic, &r.basic_mesh),
        };
        let items = match draw.sub_draw {
            SubDraw::Full => &r.fallback.full,
            SubDraw::Rest => &r.fallback.rest,
        };
        pass.set_pipeline(pipeline);
        pass.set_bind_group(1, &r.draw_job, &[0, r.toggle_offset(false)]);
        pass.set_bind_group(2, items, &[]);
        pass.set_index_buffer(mesh.indices.slice(..), wgpu::IndexFormat::Uint32);
        pass.draw_indexed(0..draw.index_count, 0, 0..draw.instance_count);
    }

    /// Maps the readback copy and decodes one command block per job.
    #[allow(clippy::cast_possible_truncation)]
    fn read_blocks(&self) -> RenderResult<Vec<DrawIndirects>> {
        let buffer = &self.resources.readback;
        let slice = buffer.slice(..);
        let status: Arc<Mutex<Option<Result<(), wgpu::BufferAsyncError>>>> = Arc::default();
        let callback = Arc::clone(&status);
        slice.map_async(wgpu::MapMode::Read, move |result| {
            *callback.lock() = Some(result);
        });
        if !self.context.device.poll(wgpu::Maintain::Wait).is_queue_empty() {
            tracing::warn!("device reported queued work after the readback wait");
        }

        let mapped = status.lock().take();
        match mapped {
            Some(Ok(())) => {}
            Some(Err(error)) => return Err(RenderError::BufferMap(error)),
            None => return Err(RenderError::BufferMap(wgpu::BufferAsyncError)),
        }

        let blocks = {
            let data = slice.get_mapped_range();
            self.plan
                .jobs()
                .map(|job| {
                    let at = self.plan.command_offset(&job) as usize;
                    bytemuck::pod_read_unaligned(&data[at..at + DrawIndirects::SIZE])
                })
                .collect()
        };
        buffer.unmap();
        Ok(blocks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dispatch_covers_job() {
        assert_eq!(dispatch_size(1), (1, 1));
        assert_eq!(dispatch_size(256), (1, 1));
        assert_eq!(dispatch_size(257), (2, 1));
        assert_eq!(dispatch_size(1_048_575), (4096, 1));

        let (x, y) = dispatch_size(u32::MAX);
        assert!(x <= MAX_DISPATCH && y <= MAX_DISPATCH);
        assert!(u64::from(x) * u64::from(y) * 256 >= u64::from(u32::MAX));
    }

    #[test]
    fn test_skipped_frame_is_empty() {
        let frame = GpuFrame::skipped(SkipReason::StrategyUnsupported);
        assert_eq!(frame.outcome, FrameOutcome::Skipped(SkipReason::StrategyUnsupported));
        assert!(frame.blocks.is_empty());
        assert_eq!(frame.stats.total(), 0);
    }
}
