//! # Frame Schedule
//!
//! The ordered list of stages one frame executes. Both the GPU encoder and
//! the host executor walk the same schedule, so the ordering rules live in
//! one place:
//!
//! ```text
//! per job:  Idle → Classify → Barrier1 → Synthesize → Barrier2
//!                → DrawTess → DrawMesh → DrawPoints → Idle
//! ```
//!
//! Jobs run strictly one after another because they share the LOD buffers.
//! With a single job and updates paused, the Classify..Barrier2 segment is
//! skipped and the draws reuse the previous frame's buffers.

use crate::commands::{BatchSplit, IndirectCommand, SphereBatching};
use crate::config::{DataFlow, FallbackPipeline, ItemFetch, PipelineMode};
use crate::jobs::{Job, JobPlan};

/// Position of one job in the per-frame state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobPhase {
    /// Not started, or finished.
    Idle,
    /// Counters reset and particles appended to tier buffers.
    Classify,
    /// Classification writes become visible to the synthesizer.
    Barrier1,
    /// Counters turned into indirect records.
    Synthesize,
    /// Records and buffers become visible to indirect draws.
    Barrier2,
    /// NEAR tier.
    DrawTess,
    /// MEDIUM tier.
    DrawMesh,
    /// FAR tier.
    DrawPoints,
}

impl JobPhase {
    /// Next phase. With `skip_update` the job goes straight from idle to drawing.
    #[must_use]
    pub const fn next(self, skip_update: bool) -> Self {
        match self {
            Self::Idle if skip_update => Self::DrawTess,
            Self::Idle => Self::Classify,
            Self::Classify => Self::Barrier1,
            Self::Barrier1 => Self::Synthesize,
            Self::Synthesize => Self::Barrier2,
            Self::Barrier2 => Self::DrawTess,
            Self::DrawTess => Self::DrawMesh,
            Self::DrawMesh => Self::DrawPoints,
            Self::DrawPoints => Self::Idle,
        }
    }
}

/// The two mandatory memory barriers of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Barrier {
    /// Tier buffers and counters written by classification.
    ClassifyToSynthesize,
    /// Indirect records written by synthesis.
    SynthesizeToDraw,
}

/// Draw pipeline of a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DrawPass {
    /// Tessellated sphere mesh.
    Tessellated,
    /// Basic sphere mesh.
    Mesh,
    /// Single points.
    Points,
}

/// Which half of a full/remainder pair a draw is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubDraw {
    /// Whole batches, one instance per batch.
    Full,
    /// Trailing partial batch, addressed past the full batches.
    Rest,
}

/// One indirect draw of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndirectDraw {
    /// Owning job.
    pub job: Job,
    /// Pipeline.
    pub pass: DrawPass,
    /// Record supplying the arguments.
    pub command: IndirectCommand,
    /// Full or remainder addressing.
    pub sub_draw: SubDraw,
    /// Byte offset of the record in the command buffer.
    pub indirect_offset: u64,
}

/// One direct draw of the non-LOD path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirectDraw {
    /// Pipeline.
    pub pass: DrawPass,
    /// Full batches or remainder.
    pub sub_draw: SubDraw,
    /// Indices per instance.
    pub index_count: u32,
    /// Instances.
    pub instance_count: u32,
    /// First particle the draw covers.
    pub first_item: u32,
    /// Particles the draw covers.
    pub items: u32,
    /// Byte offset the item source is rebound at.
    pub item_byte_offset: u64,
}

/// One step of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Zero the job's counters.
    ResetCounters(Job),
    /// Classify the job's particles.
    Classify(Job),
    /// Make earlier writes visible to later reads.
    Barrier(Job, Barrier),
    /// Write the job's indirect records.
    Synthesize(Job),
    /// Indirect draw.
    Draw(IndirectDraw),
    /// Direct draw (LOD disabled).
    DirectDraw(DirectDraw),
}

/// Record the points pass draws from.
///
/// Only indexed items fetched through the vertex stage use the indexed
/// record, with the tier buffer as the index buffer.
#[must_use]
pub const fn points_command(mode: &PipelineMode) -> IndirectCommand {
    match (mode.data_flow, mode.item_fetch) {
        (DataFlow::Indices, ItemFetch::VertexAttribute) => IndirectCommand::FarIndexed,
        _ => IndirectCommand::FarArray,
    }
}

/// All stages of one frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameSchedule {
    stages: Vec<Stage>,
    updates_skipped: bool,
}

impl FrameSchedule {
    /// Builds the schedule for a frame.
    #[must_use]
    pub fn build(
        plan: &JobPlan,
        mode: &PipelineMode,
        paused: bool,
        batching: &SphereBatching,
    ) -> Self {
        if !mode.lod {
            return Self::fallback(plan, mode, batching);
        }

        let updates_skipped = paused && plan.job_count() == 1;
        if paused && !updates_skipped {
            tracing::debug!(jobs = plan.job_count(), "pause ignored with multiple jobs");
        }

        let mut stages = Vec::with_capacity(plan.job_count() as usize * 12);
        for job in plan.jobs() {
            let mut phase = JobPhase::Idle.next(updates_skipped);
            while phase != JobPhase::Idle {
                Self::emit(&mut stages, plan, mode, job, phase);
                phase = phase.next(updates_skipped);
            }
        }

        Self {
            stages,
            updates_skipped,
        }
    }

    fn emit(stages: &mut Vec<Stage>, plan: &JobPlan, mode: &PipelineMode, job: Job, phase: JobPhase) {
        let draw = |pass, command, sub_draw| {
            Stage::Draw(IndirectDraw {
                job,
                pass,
                command,
                sub_draw,
                indirect_offset: plan.indirect_offset(&job, command),
            })
        };
        match phase {
            JobPhase::Idle => {}
            JobPhase::Classify => {
                stages.push(Stage::ResetCounters(job));
                stages.push(Stage::Classify(job));
            }
            JobPhase::Barrier1 => stages.push(Stage::Barrier(job, Barrier::ClassifyToSynthesize)),
            JobPhase::Synthesize => stages.push(Stage::Synthesize(job)),
            JobPhase::Barrier2 => stages.push(Stage::Barrier(job, Barrier::SynthesizeToDraw)),
            JobPhase::DrawTess => {
                stages.push(draw(DrawPass::Tessellated, IndirectCommand::NearFull, SubDraw::Full));
                stages.push(draw(DrawPass::Tessellated, IndirectCommand::NearRest, SubDraw::Rest));
            }
            JobPhase::DrawMesh => {
                stages.push(draw(DrawPass::Mesh, IndirectCommand::MediumFull, SubDraw::Full));
                stages.push(draw(DrawPass::Mesh, IndirectCommand::MediumRest, SubDraw::Rest));
            }
            JobPhase::DrawPoints => {
                stages.push(draw(DrawPass::Points, points_command(mode), SubDraw::Full));
            }
        }
    }

    /// Every particle with the fallback mesh: whole batches, then the remainder
    /// with the item source rebound past them.
    fn fallback(plan: &JobPlan, mode: &PipelineMode, batching: &SphereBatching) -> Self {
        let (pass, indices_per_unit) = match mode.fallback {
            FallbackPipeline::Mesh => (DrawPass::Mesh, batching.basic_indices),
            FallbackPipeline::Tessellated => (DrawPass::Tessellated, batching.tess_indices),
        };
        let batch = batching.batch_size;
        let split = BatchSplit::new(plan.particle_count(), batch);
        let item_stride = u64::from(mode.item_stride());

        let mut stages = Vec::with_capacity(2);
        if split.full > 0 {
            stages.push(Stage::DirectDraw(DirectDraw {
                pass,
                sub_draw: SubDraw::Full,
                index_count: batch * indices_per_unit,
                instance_count: split.full,
                first_item: 0,
                items: split.full * batch,
                item_byte_offset: 0,
            }));
        }
        if split.rest > 0 {
            let first_item = split.full * batch;
            stages.push(Stage::DirectDraw(DirectDraw {
                pass,
                sub_draw: SubDraw::Rest,
                index_count: split.rest * indices_per_unit,
                instance_count: 1,
                first_item,
                items: split.rest,
                item_byte_offset: u64::from(first_item) * item_stride,
            }));
        }

        Self {
            stages,
            updates_skipped: false,
        }
    }

    /// Stages in execution order.
    #[must_use]
    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// Whether classification and synthesis were skipped (paused, single job).
    #[must_use]
    pub fn updates_skipped(&self) -> bool {
        self.updates_skipped
    }

    /// Draw calls the frame issues.
    #[must_use]
    pub fn draw_calls(&self) -> usize {
        self.stages
            .iter()
            .filter(|stage| matches!(stage, Stage::Draw(_) | Stage::DirectDraw(_)))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan(particles: u32, jobs: u32) -> JobPlan {
        JobPlan::new(particles, jobs, 4, 4).unwrap()
    }

    fn kinds(stages: &[Stage]) -> Vec<&'static str> {
        stages
            .iter()
            .map(|stage| match stage {
                Stage::ResetCounters(_) => "reset",
                Stage::Classify(_) => "classify",
                Stage::Barrier(_, Barrier::ClassifyToSynthesize) => "barrier1",
                Stage::Synthesize(_) => "synthesize",
                Stage::Barrier(_, Barrier::SynthesizeToDraw) => "barrier2",
                Stage::Draw(draw) => match draw.pass {
                    DrawPass::Tessellated => "tess",
                    DrawPass::Mesh => "mesh",
                    DrawPass::Points => "points",
                },
                Stage::DirectDraw(_) => "direct",
            })
            .collect()
    }

    #[test]
    fn test_state_machine_cycle() {
        let mut phase = JobPhase::Idle;
        let mut seen = Vec::new();
        loop {
            phase = phase.next(false);
            if phase == JobPhase::Idle {
                break;
            }
            seen.push(phase);
        }
        assert_eq!(seen.len(), 7);
        assert_eq!(seen[0], JobPhase::Classify);
        assert_eq!(seen[6], JobPhase::DrawPoints);
        assert_eq!(JobPhase::Idle.next(true), JobPhase::DrawTess);
    }

    #[test]
    fn test_single_job_order() {
        let schedule = FrameSchedule::build(
            &plan(100, 1),
            &PipelineMode::default(),
            false,
            &SphereBatching::default(),
        );
        assert_eq!(
            kinds(schedule.stages()),
            vec![
                "reset", "classify", "barrier1", "synthesize", "barrier2", "tess", "tess", "mesh",
                "mesh", "points"
            ]
        );
        assert_eq!(schedule.draw_calls(), 5);
        assert!(!schedule.updates_skipped());
    }

    #[test]
    fn test_jobs_run_in_sequence_with_their_offsets() {
        let plan = plan(10, 5);
        let schedule =
            FrameSchedule::build(&plan, &PipelineMode::default(), false, &SphereBatching::default());
        let mut last_job = 0;
        for stage in schedule.stages() {
            let job = match stage {
                Stage::ResetCounters(job)
                | Stage::Classify(job)
                | Stage::Barrier(job, _)
                | Stage::Synthesize(job) => *job,
                Stage::Draw(draw) => {
                    assert_eq!(
                        draw.indirect_offset,
                        plan.command_offset(&draw.job) + draw.command.byte_offset()
                    );
                    draw.job
                }
                Stage::DirectDraw(_) => unreachable!(),
            };
            assert!(job.index >= last_job);
            last_job = job.index;
        }
        assert_eq!(schedule.stages().len(), 5 * 10);
    }

    #[test]
    fn test_pause_only_freezes_single_job() {
        let batching = SphereBatching::default();
        let mode = PipelineMode::default();

        let single = FrameSchedule::build(&plan(100, 1), &mode, true, &batching);
        assert!(single.updates_skipped());
        assert_eq!(kinds(single.stages()), vec!["tess", "tess", "mesh", "mesh", "points"]);

        let multi = FrameSchedule::build(&plan(100, 4), &mode, true, &batching);
        assert!(!multi.updates_skipped());
        assert_eq!(
            multi.stages().iter().filter(|s| matches!(s, Stage::Classify(_))).count(),
            4
        );
    }

    #[test]
    fn test_points_record_per_mode() {
        let mut mode = PipelineMode::default();
        assert_eq!(points_command(&mode), IndirectCommand::FarArray);
        mode.item_fetch = ItemFetch::VertexAttribute;
        assert_eq!(points_command(&mode), IndirectCommand::FarIndexed);
        mode.data_flow = DataFlow::Payload;
        assert_eq!(points_command(&mode), IndirectCommand::FarArray);
    }

    #[test]
    fn test_fallback_batches() {
        let batching = SphereBatching::default();
        let mode = PipelineMode {
            lod: false,
            ..PipelineMode::default()
        };
        let schedule = FrameSchedule::build(&plan(2500, 3), &mode, false, &batching);
        let draws: Vec<DirectDraw> = schedule
            .stages()
            .iter()
            .filter_map(|stage| match stage {
                Stage::DirectDraw(draw) => Some(*draw),
                _ => None,
            })
            .collect();
        assert_eq!(draws.len(), 2);
        assert_eq!(draws[0].instance_count, 2);
        assert_eq!(draws[0].index_count, 1024 * 60);
        assert_eq!(draws[1].index_count, 452 * 60);
        assert_eq!(draws[1].first_item, 2048);
        assert_eq!(draws[1].item_byte_offset, 2048 * 4);
        assert_eq!(draws[0].items + draws[1].items, 2500);

        let tess = PipelineMode {
            fallback: FallbackPipeline::Tessellated,
            data_flow: DataFlow::Payload,
            ..mode
        };
        let schedule = FrameSchedule::build(&plan(1024, 1), &tess, false, &batching);
        assert_eq!(schedule.draw_calls(), 1);
        match schedule.stages()[0] {
            Stage::DirectDraw(draw) => {
                assert_eq!(draw.pass, DrawPass::Tessellated);
                assert_eq!(draw.index_count, 1024 * 960);
            }
            other => panic!("unexpected stage {other:?}"),
        }

        let small = FrameSchedule::build(&plan(10, 1), &tess, false, &batching);
        match small.stages() {
            [Stage::DirectDraw(draw)] => {
                assert_eq!(draw.sub_draw, SubDraw::Rest);
                assert_eq!(draw.item_byte_offset, 0);
            }
            other => panic!("unexpected stages {other:?}"),
        }
    }
}
