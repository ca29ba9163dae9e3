//! # GPU Context
//!
//! Headless adapter and device setup. The LOD pipeline never presents, so
//! no surface is requested; the adapter is picked for performance and the
//! optional features the pipeline can use are enabled when present.

use crate::error::{RenderError, RenderResult};
use particle_lod_core::layout::TEXEL_BYTES;

/// Features the pipeline uses when the adapter offers them.
pub const OPTIONAL_FEATURES: wgpu::Features =
    wgpu::Features::VERTEX_WRITABLE_STORAGE.union(wgpu::Features::POLYGON_MODE_LINE);

/// Device limits and capabilities the LOD pipeline plans against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceCaps {
    /// Buffer offset alignment for dynamic uniform and storage bindings.
    pub alignment: u32,
    /// Largest storage binding in bytes.
    pub max_storage_binding: u64,
    /// Largest buffer in bytes.
    pub max_buffer_size: u64,
    /// Vertex programs may write storage buffers.
    pub vertex_writable_storage: bool,
    /// Line polygon mode is available.
    pub wireframe: bool,
}

impl DeviceCaps {
    /// Reads capabilities from a device's limits and enabled features.
    #[must_use]
    pub fn new(limits: &wgpu::Limits, features: wgpu::Features) -> Self {
        Self {
            alignment: limits
                .min_uniform_buffer_offset_alignment
                .max(limits.min_storage_buffer_offset_alignment),
            max_storage_binding: u64::from(limits.max_storage_buffer_binding_size),
            max_buffer_size: limits.max_buffer_size,
            vertex_writable_storage: features.contains(wgpu::Features::VERTEX_WRITABLE_STORAGE),
            wireframe: features.contains(wgpu::Features::POLYGON_MODE_LINE),
        }
    }

    /// Largest texel count one storage binding can address.
    #[must_use]
    pub const fn max_texels(&self) -> u64 {
        self.max_storage_binding / TEXEL_BYTES as u64
    }
}

/// An adapter, device and queue.
pub struct GpuContext {
    /// Logical device.
    pub device: wgpu::Device,
    /// Submission queue.
    pub queue: wgpu::Queue,
    /// Adapter description.
    pub adapter_info: wgpu::AdapterInfo,
    /// Limits and features the pipeline plans against.
    pub caps: DeviceCaps,
}

impl GpuContext {
    /// Requests a high-performance adapter and a device with raised
    /// storage limits.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::NoAdapter`] without a usable adapter, or the
    /// device request error.
    pub fn new() -> RenderResult<Self> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::PRIMARY,
            ..Default::default()
        });

        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: None,
            force_fallback_adapter: false,
        }))
        .ok_or(RenderError::NoAdapter)?;

        let adapter_info = adapter.get_info();
        let supported = adapter.limits();

        // Particle sets of a million full records need far more than the
        // 128 MiB default storage binding.
        let limits = wgpu::Limits {
            max_storage_buffer_binding_size: supported.max_storage_buffer_binding_size,
            max_buffer_size: supported.max_buffer_size,
            ..wgpu::Limits::default()
        };
        let features = adapter.features() & OPTIONAL_FEATURES;

        let (device, queue) = pollster::block_on(adapter.request_device(
            &wgpu::DeviceDescriptor {
                label: Some("Particle LOD"),
                required_features: features,
                required_limits: limits.clone(),
            },
            None,
        ))?;

        let caps = DeviceCaps::new(&limits, features);
        tracing::info!(
            adapter = %adapter_info.name,
            backend = ?adapter_info.backend,
            alignment = caps.alignment,
            max_storage_binding = caps.max_storage_binding,
            vertex_writable_storage = caps.vertex_writable_storage,
            wireframe = caps.wireframe,
            "GPU device ready"
        );

        Ok(Self {
            device,
            queue,
            adapter_info,
            caps,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_caps_take_larger_alignment() {
        let limits = wgpu::Limits {
            min_uniform_buffer_offset_alignment: 256,
            min_storage_buffer_offset_alignment: 32,
            ..wgpu::Limits::default()
        };
        let caps = DeviceCaps::new(&limits, wgpu::Features::empty());
        assert_eq!(caps.alignment, 256);
        assert!(!caps.vertex_writable_storage);
        assert!(!caps.wireframe);
    }

    #[test]
    fn test_max_texels_from_binding_size() {
        let limits = wgpu::Limits {
            max_storage_buffer_binding_size: 1 << 30,
            ..wgpu::Limits::default()
        };
        let caps = DeviceCaps::new(&limits, OPTIONAL_FEATURES);
        assert_eq!(caps.max_texels(), (1 << 30) / 16);
        assert!(caps.vertex_writable_storage && caps.wireframe);
    }
}
