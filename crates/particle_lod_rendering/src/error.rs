//! # Rendering Error Types

use particle_lod_core::LodError;
use thiserror::Error;

/// Errors that can occur while driving the GPU.
#[derive(Error, Debug)]
pub enum RenderError {
    /// No adapter matched the request.
    #[error("no suitable GPU adapter found")]
    NoAdapter,

    /// The adapter refused the device request.
    #[error("device request failed: {0}")]
    RequestDevice(#[from] wgpu::RequestDeviceError),

    /// A program failed to compile or validate.
    #[error("program validation failed: {0}")]
    ProgramValidation(String),

    /// Counter readback could not map its staging buffer.
    #[error("buffer map failed: {0}")]
    BufferMap(#[from] wgpu::BufferAsyncError),

    /// Planning or configuration error from the core.
    #[error(transparent)]
    Lod(#[from] LodError),
}

/// Result type for rendering operations.
pub type RenderResult<T> = Result<T, RenderError>;
