//! # Particle LOD Core
//!
//! GPU-driven level of detail for large sphere populations. Each particle's
//! on-screen footprint picks one of three draw paths, and both the decision
//! and the draw arguments are produced on the GPU:
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌────────────┐        ┌─────────────┐        ┌────────────┐
//! │ ParticleStore│ → │  JobPlan     │ → │ Classifier │ → B1 → │ Synthesizer │ → B2 → │ Draw passes│
//! │ (texels)     │   │ (job ranges) │   │ (appends)  │        │ (6 records) │        │ tess/mesh/ │
//! └──────────────┘   └──────────────┘   └────────────┘        └─────────────┘        │ points     │
//!                                                                                    └────────────┘
//! ```
//!
//! This crate holds everything that does not need a device: the shared
//! record layouts, particle generation, job partitioning, classification,
//! command synthesis, the per-job frame schedule, and a host executor that
//! runs the schedule on the CPU for verification.

pub mod classify;
pub mod commands;
pub mod config;
pub mod emulate;
pub mod error;
pub mod jobs;
pub mod layout;
pub mod scene;
pub mod schedule;
pub mod stats;
pub mod store;

pub use classify::{tier_for_size, Classifier, LodBuffers, LodCamera, Tier, TierCounters};
pub use commands::{synthesize, BatchSplit, IndirectCommand, SphereBatching};
pub use config::{
    CameraConfig, ClassifyStrategy, ConfigChange, DataFlow, FallbackPipeline, ItemFetch,
    LodConfig, LodThresholds, ParticleFormat, PipelineMode,
};
pub use emulate::{CpuLodPipeline, FrameReport, JobReport};
pub use error::{LodError, LodResult};
pub use jobs::{align_up, check_texel_limit, Job, JobPlan, TexelLimitWarning};
pub use layout::{
    DrawArrays, DrawCounters, DrawElements, DrawIndirects, DrawToggle, JobParams, Particle,
    SceneData,
};
pub use scene::SceneCamera;
pub use schedule::{FrameSchedule, JobPhase, Stage};
pub use stats::LodStats;
pub use store::ParticleStore;
