//! # LOD Error Types
//!
//! All errors that can occur while planning or emulating LOD frames.

use thiserror::Error;

/// Errors that can occur in the LOD pipeline.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LodError {
    /// A particle set must contain at least one particle.
    #[error("invalid particle count: {0}")]
    InvalidParticleCount(u64),

    /// Item stride of zero bytes.
    #[error("item stride must be non-zero")]
    ZeroItemStride,

    /// Offset alignment that is zero or not a power of two.
    #[error("invalid offset alignment: {0}")]
    InvalidAlignment(u32),

    /// Job index outside the current plan.
    #[error("job {job} out of range: plan has {jobs} jobs")]
    JobOutOfRange {
        /// Requested job.
        job: u32,
        /// Jobs in the plan.
        jobs: u32,
    },

    /// Invalid configuration file or value.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Result type for LOD operations.
pub type LodResult<T> = Result<T, LodError>;
