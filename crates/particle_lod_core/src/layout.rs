//! GPU-shared record layouts.
//!
//! Every record here is read or written by both the host and the GPU
//! programs, so all of them are `#[repr(C)]`, `Pod`, and carry explicit
//! padding fields. Sizes and field offsets are pinned by the tests below.
//!
//! ```text
//! DrawIndirects (192 bytes, one block per job, stride align_up(192, 256))
//! ┌────────────┬────────────┬─────────────┬─────────────┬─────────────┬─────────────┬─────────────┐
//! │ counters   │ far_array  │ far_indexed │ medium_full │ medium_rest │ near_full   │ near_rest   │
//! │ 0..16      │ 16..32     │ 32..64      │ 64..96      │ 96..128     │ 128..160    │ 160..192    │
//! └────────────┴────────────┴─────────────┴─────────────┴─────────────┴─────────────┴─────────────┘
//! ```

use bytemuck::{Pod, Zeroable};

/// Number of sphere units drawn by one full-batch instance.
pub const BATCH_SIZE: u32 = 1024;

/// Vertices of the basic (icosahedron) sphere mesh.
pub const BASIC_VERTICES: u32 = 12;
/// Triangles of the basic sphere mesh.
pub const BASIC_PRIMS: u32 = 20;
/// Indices of the basic sphere mesh.
pub const BASIC_INDICES: u32 = BASIC_PRIMS * 3;

/// Subdivision levels applied to the icosahedron for the near tier.
pub const TESS_SUBDIVISIONS: u32 = 2;
/// Vertices of the tessellated sphere mesh (10 * 4^n + 2).
pub const TESS_VERTICES: u32 = 10 * 4u32.pow(TESS_SUBDIVISIONS) + 2;
/// Triangles of the tessellated sphere mesh (20 * 4^n).
pub const TESS_PRIMS: u32 = BASIC_PRIMS * 4u32.pow(TESS_SUBDIVISIONS);
/// Indices of the tessellated sphere mesh.
pub const TESS_INDICES: u32 = TESS_PRIMS * 3;

/// Size of one RGBA32F texel in bytes.
pub const TEXEL_BYTES: u32 = 16;

/// Non-indexed indirect draw arguments.
///
/// Matches the layout `wgpu::RenderPass::draw_indirect` consumes.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct DrawArrays {
    /// Vertices per instance.
    pub count: u32,
    /// Instances to draw.
    pub instance_count: u32,
    /// First vertex.
    pub first: u32,
    /// First instance.
    pub first_instance: u32,
}

impl DrawArrays {
    /// Size in bytes.
    pub const SIZE: usize = 16;

    /// Creates arguments drawing `count` vertices once.
    #[must_use]
    pub const fn single(count: u32) -> Self {
        Self {
            count,
            instance_count: 1,
            first: 0,
            first_instance: 0,
        }
    }
}

/// Indexed indirect draw arguments, padded to 32 bytes.
///
/// The first 20 bytes match `wgpu::RenderPass::draw_indexed_indirect`.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct DrawElements {
    /// Indices per instance.
    pub count: u32,
    /// Instances to draw.
    pub instance_count: u32,
    /// First index.
    pub first_index: u32,
    /// Value added to every index.
    pub base_vertex: i32,
    /// First instance.
    pub first_instance: u32,
    /// Padding to 32 bytes.
    pub _pad: [u32; 3],
}

impl DrawElements {
    /// Size in bytes.
    pub const SIZE: usize = 32;

    /// Creates arguments drawing `count` indices `instance_count` times.
    #[must_use]
    pub const fn new(count: u32, instance_count: u32) -> Self {
        Self {
            count,
            instance_count,
            first_index: 0,
            base_vertex: 0,
            first_instance: 0,
            _pad: [0; 3],
        }
    }

    /// Number of index-buffer elements this draw touches across all instances.
    #[must_use]
    pub const fn total_indices(&self) -> u64 {
        self.count as u64 * self.instance_count as u64
    }
}

/// Per-job tier counters, incremented atomically during classification.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct DrawCounters {
    /// Particles classified FAR.
    pub far: u32,
    /// Particles classified MEDIUM.
    pub medium: u32,
    /// Particles classified NEAR.
    pub near: u32,
    /// Padding.
    pub _pad: u32,
}

impl DrawCounters {
    /// Size in bytes.
    pub const SIZE: usize = 16;

    /// Sum over all tiers.
    #[must_use]
    pub const fn total(&self) -> u32 {
        self.far + self.medium + self.near
    }
}

/// One job's command block: counters followed by six indirect draw records.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct DrawIndirects {
    /// Tier counters.
    pub counters: DrawCounters,
    /// FAR tier as a non-indexed point draw.
    pub far_array: DrawArrays,
    /// FAR tier as an indexed point draw.
    pub far_indexed: DrawElements,
    /// MEDIUM tier, whole batches.
    pub medium_full: DrawElements,
    /// MEDIUM tier, trailing partial batch.
    pub medium_rest: DrawElements,
    /// NEAR tier, whole batches.
    pub near_full: DrawElements,
    /// NEAR tier, trailing partial batch.
    pub near_rest: DrawElements,
}

impl DrawIndirects {
    /// Size in bytes.
    pub const SIZE: usize = 192;

    /// Byte offset of `counters`.
    pub const COUNTERS_OFFSET: u64 = 0;
    /// Byte offset of `far_array`.
    pub const FAR_ARRAY_OFFSET: u64 = 16;
    /// Byte offset of `far_indexed`.
    pub const FAR_INDEXED_OFFSET: u64 = 32;
    /// Byte offset of `medium_full`.
    pub const MEDIUM_FULL_OFFSET: u64 = 64;
    /// Byte offset of `medium_rest`.
    pub const MEDIUM_REST_OFFSET: u64 = 96;
    /// Byte offset of `near_full`.
    pub const NEAR_FULL_OFFSET: u64 = 128;
    /// Byte offset of `near_rest`.
    pub const NEAR_REST_OFFSET: u64 = 160;
}

/// Full particle: two RGBA32F texels.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct Particle {
    /// Center in `xyz`, size factor in `w`.
    pub pos_size: [f32; 4],
    /// Linear RGBA color.
    pub color: [f32; 4],
}

impl Particle {
    /// Size in bytes.
    pub const SIZE: usize = 32;
}

/// Compact particle: one texel, RGBA8 color packed into the `w` bits.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct CompactParticle {
    /// Center in `xyz`, packed color bits in `w`.
    pub pos_color: [f32; 4],
}

impl CompactParticle {
    /// Size in bytes.
    pub const SIZE: usize = 16;

    /// Packs a full particle, dropping its size factor.
    #[must_use]
    pub fn from_particle(particle: &Particle) -> Self {
        let [x, y, z, _] = particle.pos_size;
        Self {
            pos_color: [x, y, z, f32::from_bits(pack_unorm4x8(particle.color))],
        }
    }

    /// Returns the packed RGBA8 color.
    #[must_use]
    pub fn packed_color(&self) -> u32 {
        self.pos_color[3].to_bits()
    }
}

/// Packs four `[0, 1]` channels into RGBA8, red in the low byte.
///
/// Same bit order as WGSL `pack4x8unorm`.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn pack_unorm4x8(color: [f32; 4]) -> u32 {
    color
        .iter()
        .enumerate()
        .fold(0u32, |packed, (channel, value)| {
            let byte = (value.clamp(0.0, 1.0) * 255.0).round() as u32;
            packed | (byte << (channel * 8))
        })
}

/// Per-frame scene uniform block (std140 compatible, 320 bytes).
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct SceneData {
    /// Projection * view, column-major.
    pub view_proj: [[f32; 4]; 4],
    /// World to view.
    pub view: [[f32; 4]; 4],
    /// Inverse transpose of `view`, for normals.
    pub view_it: [[f32; 4]; 4],
    /// Viewport in pixels.
    pub viewport: [u32; 2],
    /// Pixels covered by one world unit at unit clip-space `w`.
    pub view_pixel_size: [f32; 2],
    /// Normalized frustum planes: left, right, bottom, top, near, far.
    pub frustum: [[f32; 4]; 6],
    /// At or below this footprint a particle is FAR.
    pub far_pixels: f32,
    /// At or above this footprint a particle is NEAR.
    pub near_pixels: f32,
    /// Footprint at which the near mesh is fully refined.
    pub tess_pixels: f32,
    /// Global radius scale.
    pub particle_size: f32,
}

impl SceneData {
    /// Size in bytes.
    pub const SIZE: usize = 320;
}

/// Per-job uniform: the job's range in the particle set.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct JobParams {
    /// First particle of the job.
    pub offset: u32,
    /// Particles in the job.
    pub count: u32,
    /// Padding to 16 bytes.
    pub _pad: [u32; 2],
}

impl JobParams {
    /// Size in bytes.
    pub const SIZE: usize = 16;

    /// Creates params for a range.
    #[must_use]
    pub const fn new(offset: u32, count: u32) -> Self {
        Self {
            offset,
            count,
            _pad: [0; 2],
        }
    }
}

/// Selects full-batch (0) or remainder (1) addressing in the draw programs.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct DrawToggle {
    /// Non-zero for the remainder sub-draw.
    pub use_cmd_offset: u32,
    /// Padding to 16 bytes.
    pub _pad: [u32; 3],
}

impl DrawToggle {
    /// Size in bytes.
    pub const SIZE: usize = 16;

    /// Toggle for the full-batch sub-draw.
    pub const FULL: Self = Self {
        use_cmd_offset: 0,
        _pad: [0; 3],
    };

    /// Toggle for the remainder sub-draw.
    pub const REST: Self = Self {
        use_cmd_offset: 1,
        _pad: [0; 3],
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem::{offset_of, size_of};

    #[test]
    fn test_record_sizes() {
        assert_eq!(size_of::<DrawArrays>(), DrawArrays::SIZE);
        assert_eq!(size_of::<DrawElements>(), DrawElements::SIZE);
        assert_eq!(size_of::<DrawCounters>(), DrawCounters::SIZE);
        assert_eq!(size_of::<DrawIndirects>(), DrawIndirects::SIZE);
        assert_eq!(size_of::<Particle>(), Particle::SIZE);
        assert_eq!(size_of::<CompactParticle>(), CompactParticle::SIZE);
        assert_eq!(size_of::<SceneData>(), SceneData::SIZE);
        assert_eq!(size_of::<JobParams>(), JobParams::SIZE);
        assert_eq!(size_of::<DrawToggle>(), DrawToggle::SIZE);
    }

    #[test]
    fn test_command_block_offsets() {
        assert_eq!(offset_of!(DrawIndirects, counters) as u64, DrawIndirects::COUNTERS_OFFSET);
        assert_eq!(offset_of!(DrawIndirects, far_array) as u64, DrawIndirects::FAR_ARRAY_OFFSET);
        assert_eq!(offset_of!(DrawIndirects, far_indexed) as u64, DrawIndirects::FAR_INDEXED_OFFSET);
        assert_eq!(offset_of!(DrawIndirects, medium_full) as u64, DrawIndirects::MEDIUM_FULL_OFFSET);
        assert_eq!(offset_of!(DrawIndirects, medium_rest) as u64, DrawIndirects::MEDIUM_REST_OFFSET);
        assert_eq!(offset_of!(DrawIndirects, near_full) as u64, DrawIndirects::NEAR_FULL_OFFSET);
        assert_eq!(offset_of!(DrawIndirects, near_rest) as u64, DrawIndirects::NEAR_REST_OFFSET);
    }

    #[test]
    fn test_indexed_args_prefix_matches_wgpu() {
        // wgpu reads five u32 words; the padding must come after them.
        assert_eq!(offset_of!(DrawElements, base_vertex), 12);
        assert_eq!(offset_of!(DrawElements, first_instance), 16);
        assert_eq!(offset_of!(DrawElements, _pad), 20);
    }

    #[test]
    fn test_scene_data_std140_offsets() {
        assert_eq!(offset_of!(SceneData, view), 64);
        assert_eq!(offset_of!(SceneData, view_it), 128);
        assert_eq!(offset_of!(SceneData, viewport), 192);
        assert_eq!(offset_of!(SceneData, view_pixel_size), 200);
        assert_eq!(offset_of!(SceneData, frustum), 208);
        assert_eq!(offset_of!(SceneData, far_pixels), 304);
        assert_eq!(offset_of!(SceneData, particle_size), 316);
    }

    #[test]
    fn test_mesh_constants() {
        assert_eq!(BASIC_INDICES, 60);
        assert_eq!(TESS_VERTICES, 162);
        assert_eq!(TESS_PRIMS, 320);
        assert_eq!(TESS_INDICES, 960);
    }

    #[test]
    fn test_pack_unorm4x8_channel_order() {
        assert_eq!(pack_unorm4x8([1.0, 0.0, 0.0, 0.0]), 0x0000_00FF);
        assert_eq!(pack_unorm4x8([0.0, 0.0, 0.0, 1.0]), 0xFF00_0000);
        assert_eq!(pack_unorm4x8([2.0, -1.0, 0.0, 0.0]), 0x0000_00FF);
    }

    #[test]
    fn test_compact_particle_keeps_position_and_color() {
        let particle = Particle {
            pos_size: [1.0, 2.0, 3.0, 0.5],
            color: [1.0, 0.0, 1.0, 1.0],
        };
        let compact = CompactParticle::from_particle(&particle);
        assert_eq!(&compact.pos_color[..3], &[1.0, 2.0, 3.0]);
        assert_eq!(compact.packed_color(), 0xFFFF_00FF);
    }
}
