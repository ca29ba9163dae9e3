//! # Particle LOD Rendering
//!
//! wgpu backend for the particle LOD pipeline. The host plans jobs and
//! encodes passes; the GPU classifies, writes its own draw arguments and
//! draws:
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                       PER JOB                                 │
//! ├───────────────────────────────────────────────────────────────┤
//! │  reset counters → classify (compute | vertex stream)          │
//! │       ↓                                                       │
//! │  synthesize 6 indirect records (one invocation)               │
//! │       ↓                                                       │
//! │  near spheres (x2) → medium spheres (x2) → far points         │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! With LOD disabled every particle goes through one direct instanced
//! sphere pass instead.

pub mod context;
pub mod error;
pub mod geometry;
pub mod programs;
pub mod renderer;
pub mod resources;
pub mod shaders;

pub use context::{DeviceCaps, GpuContext};
pub use error::{RenderError, RenderResult};
pub use geometry::{SphereGeometry, SphereMesh};
pub use programs::{LodLayouts, PointsProgram, ProgramSet, StageProgram};
pub use renderer::{dispatch_size, FrameOutcome, GpuFrame, GpuLodPipeline, SkipReason};
pub use resources::GpuLodResources;
pub use shaders::{LodShaders, ShaderDefines, SphereVariant};
