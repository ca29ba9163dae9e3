//! # Command Synthesizer
//!
//! Turns one job's three tier counters into the six indirect draw records
//! of its command block. Pure arithmetic: the same function backs the host
//! executor, and the GPU program performs the identical computation.

use crate::layout::{
    DrawArrays, DrawCounters, DrawElements, DrawIndirects, BASIC_INDICES, BATCH_SIZE,
    TESS_INDICES,
};

/// One indirect record of a command block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndirectCommand {
    /// FAR tier, non-indexed points.
    FarArray,
    /// FAR tier, indexed points.
    FarIndexed,
    /// MEDIUM tier, whole batches.
    MediumFull,
    /// MEDIUM tier, trailing partial batch.
    MediumRest,
    /// NEAR tier, whole batches.
    NearFull,
    /// NEAR tier, trailing partial batch.
    NearRest,
}

impl IndirectCommand {
    /// Every record, in block order.
    pub const ALL: [Self; 6] = [
        Self::FarArray,
        Self::FarIndexed,
        Self::MediumFull,
        Self::MediumRest,
        Self::NearFull,
        Self::NearRest,
    ];

    /// Byte offset inside a command block.
    #[must_use]
    pub const fn byte_offset(self) -> u64 {
        match self {
            Self::FarArray => DrawIndirects::FAR_ARRAY_OFFSET,
            Self::FarIndexed => DrawIndirects::FAR_INDEXED_OFFSET,
            Self::MediumFull => DrawIndirects::MEDIUM_FULL_OFFSET,
            Self::MediumRest => DrawIndirects::MEDIUM_REST_OFFSET,
            Self::NearFull => DrawIndirects::NEAR_FULL_OFFSET,
            Self::NearRest => DrawIndirects::NEAR_REST_OFFSET,
        }
    }

    /// Whether the record is consumed by an indexed draw.
    #[must_use]
    pub const fn is_indexed(self) -> bool {
        !matches!(self, Self::FarArray)
    }
}

/// Geometry batching shared by the synthesizer and the sphere meshes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SphereBatching {
    /// Sphere units per full batch.
    pub batch_size: u32,
    /// Indices per basic (MEDIUM) sphere.
    pub basic_indices: u32,
    /// Indices per tessellated (NEAR) sphere.
    pub tess_indices: u32,
}

impl Default for SphereBatching {
    fn default() -> Self {
        Self {
            batch_size: BATCH_SIZE,
            basic_indices: BASIC_INDICES,
            tess_indices: TESS_INDICES,
        }
    }
}

/// Count split into whole batches plus a remainder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchSplit {
    /// Whole batches.
    pub full: u32,
    /// Units in the trailing partial batch.
    pub rest: u32,
}

impl BatchSplit {
    /// Splits `count` units into batches of `batch_size`.
    #[must_use]
    pub const fn new(count: u32, batch_size: u32) -> Self {
        Self {
            full: count / batch_size,
            rest: count % batch_size,
        }
    }

    /// Units covered, `full * batch_size + rest`.
    #[must_use]
    pub const fn units(&self, batch_size: u32) -> u32 {
        self.full * batch_size + self.rest
    }

    /// Full-batch draw: one instance per batch.
    #[must_use]
    pub const fn full_draw(&self, batch_size: u32, indices_per_unit: u32) -> DrawElements {
        DrawElements::new(batch_size * indices_per_unit, self.full)
    }

    /// Remainder draw: a single instance covering `rest` units.
    #[must_use]
    pub const fn rest_draw(&self, indices_per_unit: u32) -> DrawElements {
        DrawElements::new(self.rest * indices_per_unit, 1)
    }
}

/// Builds a job's command block from its counters.
#[must_use]
pub fn synthesize(counters: DrawCounters, batching: &SphereBatching) -> DrawIndirects {
    let batch = batching.batch_size;
    let medium = BatchSplit::new(counters.medium, batch);
    let near = BatchSplit::new(counters.near, batch);
    DrawIndirects {
        counters,
        far_array: DrawArrays::single(counters.far),
        far_indexed: DrawElements::new(counters.far, 1),
        medium_full: medium.full_draw(batch, batching.basic_indices),
        medium_rest: medium.rest_draw(batching.basic_indices),
        near_full: near.full_draw(batch, batching.tess_indices),
        near_rest: near.rest_draw(batching.tess_indices),
    }
}

/// Spheres a full/remainder record pair draws.
#[must_use]
pub fn drawn_units(
    full: &DrawElements,
    rest: &DrawElements,
    indices_per_unit: u32,
    batch_size: u32,
) -> u32 {
    let indices_per_unit = indices_per_unit.max(1);
    let full_units = full.count / indices_per_unit / batch_size.max(1) * batch_size;
    full_units * full.instance_count + rest.count / indices_per_unit * rest.instance_count
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counters(far: u32, medium: u32, near: u32) -> DrawCounters {
        DrawCounters {
            far,
            medium,
            near,
            _pad: 0,
        }
    }

    #[test]
    fn test_split_covers_every_count() {
        for count in (0..5000).chain([1 << 20, (1 << 20) - 1, u32::MAX / 960]) {
            let split = BatchSplit::new(count, BATCH_SIZE);
            assert_eq!(split.units(BATCH_SIZE), count);
            assert!(split.rest < BATCH_SIZE);
        }
    }

    #[test]
    fn test_zero_counts_emit_empty_draws() {
        let block = synthesize(counters(0, 0, 0), &SphereBatching::default());
        assert_eq!(block.far_array.count, 0);
        assert_eq!(block.medium_full.instance_count, 0);
        assert_eq!(block.medium_rest.count, 0);
        assert_eq!(block.near_full.instance_count, 0);
        assert_eq!(block.near_rest.count, 0);
        assert_eq!(block.medium_full.total_indices(), 0);
        assert_eq!(block.near_rest.total_indices(), 0);
    }

    #[test]
    fn test_full_and_rest_records() {
        let block = synthesize(counters(7, 2500, 1024), &SphereBatching::default());
        assert_eq!(block.counters, counters(7, 2500, 1024));
        assert_eq!(block.far_array, DrawArrays::single(7));
        assert_eq!(block.far_indexed, DrawElements::new(7, 1));

        assert_eq!(block.medium_full, DrawElements::new(1024 * 60, 2));
        assert_eq!(block.medium_rest, DrawElements::new(452 * 60, 1));

        assert_eq!(block.near_full, DrawElements::new(1024 * 960, 1));
        assert_eq!(block.near_rest, DrawElements::new(0, 1));
    }

    #[test]
    fn test_drawn_units_match_counters() {
        let batching = SphereBatching::default();
        for (medium, near) in [(0, 0), (1, 1023), (1024, 2048), (3000, 77)] {
            let block = synthesize(counters(0, medium, near), &batching);
            assert_eq!(
                drawn_units(&block.medium_full, &block.medium_rest, BASIC_INDICES, BATCH_SIZE),
                medium
            );
            assert_eq!(
                drawn_units(&block.near_full, &block.near_rest, TESS_INDICES, BATCH_SIZE),
                near
            );
        }
    }

    #[test]
    fn test_command_offsets_follow_block_order() {
        let offsets: Vec<u64> = IndirectCommand::ALL.iter().map(|c| c.byte_offset()).collect();
        assert_eq!(offsets, vec![16, 32, 64, 96, 128, 160]);
        assert!(!IndirectCommand::FarArray.is_indexed());
        assert!(IndirectCommand::NearRest.is_indexed());
    }
}
