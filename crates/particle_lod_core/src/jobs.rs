//! # Job Partitioner
//!
//! Splits the particle set into jobs so the three LOD buffers only need one
//! job's worth of capacity. All jobs share those buffers; each job owns one
//! command block in the command buffer.
//!
//! ```text
//! particles   [ job 0 ........ | job 1 ........ | job 2 ... ]
//!                 job_size          job_size        rest
//! commands    [ block 0 | pad ][ block 1 | pad ][ block 2 | pad ]
//!               <- job_byte_stride ->
//! ```

use crate::commands::IndirectCommand;
use crate::error::{LodError, LodResult};
use crate::layout::{DrawIndirects, JobParams};

/// Rounds `value` up to a multiple of `alignment`.
#[must_use]
pub const fn align_up(value: u64, alignment: u64) -> u64 {
    value.div_ceil(alignment) * alignment
}

/// A contiguous range of particles processed together.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Job {
    /// Position in the plan.
    pub index: u32,
    /// First particle.
    pub offset: u32,
    /// Particles in the job, never zero.
    pub count: u32,
}

impl Job {
    /// One past the last particle.
    #[must_use]
    pub const fn end(&self) -> u32 {
        self.offset + self.count
    }

    /// Uniform block for this job.
    #[must_use]
    pub const fn params(&self) -> JobParams {
        JobParams::new(self.offset, self.count)
    }
}

/// Job layout for one particle count, job count and item stride.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobPlan {
    particle_count: u32,
    job_size: u32,
    jobs: u32,
    item_stride: u32,
    alignment: u32,
    lod_buffer_bytes: u64,
    job_byte_stride: u64,
}

impl JobPlan {
    /// Plans jobs for `particle_count` items of `item_stride` bytes.
    ///
    /// `job_count` is clamped to `[1, particle_count]`. The nominal job size
    /// is the even split rounded up to `alignment` bytes, so the resulting
    /// number of jobs can differ from the request.
    ///
    /// # Errors
    ///
    /// Returns an error for an empty particle set, a zero stride, or an
    /// alignment that is not a power of two.
    #[allow(clippy::cast_possible_truncation)]
    pub fn new(
        particle_count: u32,
        job_count: u32,
        item_stride: u32,
        alignment: u32,
    ) -> LodResult<Self> {
        if particle_count == 0 {
            return Err(LodError::InvalidParticleCount(0));
        }
        if item_stride == 0 {
            return Err(LodError::ZeroItemStride);
        }
        if !alignment.is_power_of_two() {
            return Err(LodError::InvalidAlignment(alignment));
        }

        let job_count = job_count.clamp(1, particle_count);
        let stride = u64::from(item_stride);
        let align = u64::from(alignment);

        let lod_buffer_bytes = align_up(stride * u64::from(particle_count / job_count), align);
        let job_size = (lod_buffer_bytes / stride) as u32;
        let jobs = particle_count.div_ceil(job_size);
        let job_byte_stride = align_up(DrawIndirects::SIZE as u64, align);

        Ok(Self {
            particle_count,
            job_size,
            jobs,
            item_stride,
            alignment,
            lod_buffer_bytes,
            job_byte_stride,
        })
    }

    /// Total particles covered.
    #[must_use]
    pub const fn particle_count(&self) -> u32 {
        self.particle_count
    }

    /// Nominal job size, which is also each LOD buffer's item capacity.
    #[must_use]
    pub const fn job_size(&self) -> u32 {
        self.job_size
    }

    /// Number of jobs.
    #[must_use]
    pub const fn job_count(&self) -> u32 {
        self.jobs
    }

    /// Bytes per LOD buffer item.
    #[must_use]
    pub const fn item_stride(&self) -> u32 {
        self.item_stride
    }

    /// Offset alignment the plan was built for.
    #[must_use]
    pub const fn alignment(&self) -> u32 {
        self.alignment
    }

    /// Bytes of each of the three LOD buffers.
    #[must_use]
    pub const fn lod_buffer_bytes(&self) -> u64 {
        self.lod_buffer_bytes
    }

    /// Distance between consecutive command blocks.
    #[must_use]
    pub const fn job_byte_stride(&self) -> u64 {
        self.job_byte_stride
    }

    /// Bytes of the command buffer.
    #[must_use]
    pub const fn command_buffer_bytes(&self) -> u64 {
        self.job_byte_stride * self.jobs as u64
    }

    /// Distance between consecutive per-job uniform slots.
    #[must_use]
    pub const fn params_stride(&self) -> u64 {
        align_up(JobParams::SIZE as u64, self.alignment as u64)
    }

    /// Bytes of the per-job uniform buffer.
    #[must_use]
    pub const fn params_buffer_bytes(&self) -> u64 {
        self.params_stride() * self.jobs as u64
    }

    /// Returns job `index`.
    ///
    /// # Errors
    ///
    /// Returns [`LodError::JobOutOfRange`] past the last job.
    pub fn job(&self, index: u32) -> LodResult<Job> {
        if index >= self.jobs {
            return Err(LodError::JobOutOfRange {
                job: index,
                jobs: self.jobs,
            });
        }
        let offset = index * self.job_size;
        let count = if index + 1 == self.jobs {
            self.particle_count - offset
        } else {
            self.job_size
        };
        Ok(Job {
            index,
            offset,
            count,
        })
    }

    /// All jobs in order.
    pub fn jobs(&self) -> impl Iterator<Item = Job> + '_ {
        (0..self.jobs).filter_map(move |index| self.job(index).ok())
    }

    /// Byte offset of a job's command block.
    #[must_use]
    pub const fn command_offset(&self, job: &Job) -> u64 {
        job.index as u64 * self.job_byte_stride
    }

    /// Byte offset of one indirect record inside the command buffer.
    #[must_use]
    pub const fn indirect_offset(&self, job: &Job, command: IndirectCommand) -> u64 {
        self.command_offset(job) + command.byte_offset()
    }

    /// Byte offset of a job's uniform slot.
    #[must_use]
    pub const fn params_offset(&self, job: &Job) -> u64 {
        job.index as u64 * self.params_stride()
    }
}

/// A buffer whose texel count exceeds what the device can address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TexelLimitWarning {
    /// Which buffer.
    pub buffer: &'static str,
    /// Requested texels.
    pub texels: u64,
    /// Device maximum.
    pub max_texels: u64,
}

/// Compares a texel count against the device maximum.
///
/// Exceeding the limit is not an error: the warning is logged and returned
/// and execution continues with whatever the device does.
pub fn check_texel_limit(
    buffer: &'static str,
    texels: u64,
    max_texels: u64,
) -> Option<TexelLimitWarning> {
    if texels <= max_texels {
        return None;
    }
    tracing::warn!(buffer, texels, max_texels, "buffer size too big for texel access");
    Some(TexelLimitWarning {
        buffer,
        texels,
        max_texels,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_tiles(plan: &JobPlan) {
        let jobs: Vec<Job> = plan.jobs().collect();
        assert_eq!(jobs.len() as u32, plan.job_count());
        let mut next = 0;
        for (i, job) in jobs.iter().enumerate() {
            assert_eq!(job.offset, next);
            assert!(job.count > 0);
            assert!(job.count <= plan.job_size());
            if i + 1 < jobs.len() {
                assert_eq!(job.count, plan.job_size());
            }
            next = job.end();
        }
        assert_eq!(next, plan.particle_count());
    }

    #[test]
    fn test_single_job_rounds_capacity_up() {
        let plan = JobPlan::new(1000, 1, 4, 256).unwrap();
        assert_eq!(plan.lod_buffer_bytes(), 4096);
        assert_eq!(plan.job_size(), 1024);
        assert_eq!(plan.job_count(), 1);
        assert_eq!(plan.job(0).unwrap().count, 1000);
        assert_eq!(plan.job_byte_stride(), 256);
    }

    #[test]
    fn test_aligned_split_can_change_job_count() {
        // Five particles of four bytes fit one 256-byte aligned job.
        let plan = JobPlan::new(5, 5, 4, 256).unwrap();
        assert_eq!(plan.job_count(), 1);

        let plan = JobPlan::new(5, 5, 4, 4).unwrap();
        assert_eq!(plan.job_count(), 5);
        assert!(plan.jobs().all(|job| job.count == 1));
    }

    #[test]
    fn test_only_last_job_is_partial() {
        let plan = JobPlan::new(1_000_003, 4, 32, 256).unwrap();
        assert_eq!(plan.job_size(), 250_000);
        assert_eq!(plan.job_count(), 5);
        assert_eq!(plan.job(4).unwrap().count, 3);
        assert_tiles(&plan);
    }

    #[test]
    fn test_tiles_for_all_small_inputs() {
        for alignment in [4, 16, 256] {
            for stride in [4, 16, 32] {
                for count in 1..=70 {
                    for jobs in 0..=count + 2 {
                        let plan = JobPlan::new(count, jobs, stride, alignment).unwrap();
                        assert_tiles(&plan);
                        assert!(
                            u64::from(plan.job_size()) * u64::from(stride)
                                <= plan.lod_buffer_bytes()
                        );
                    }
                }
            }
        }
    }

    #[test]
    fn test_job_count_clamped() {
        let plan = JobPlan::new(3, 0, 4, 4).unwrap();
        assert_eq!(plan.job_count(), 1);
        let plan = JobPlan::new(3, 100, 4, 4).unwrap();
        assert_eq!(plan.job_count(), 3);
    }

    #[test]
    fn test_invalid_inputs() {
        assert_eq!(JobPlan::new(0, 1, 4, 256), Err(LodError::InvalidParticleCount(0)));
        assert_eq!(JobPlan::new(10, 1, 0, 256), Err(LodError::ZeroItemStride));
        assert_eq!(JobPlan::new(10, 1, 4, 0), Err(LodError::InvalidAlignment(0)));
        assert_eq!(JobPlan::new(10, 1, 4, 48), Err(LodError::InvalidAlignment(48)));
        let plan = JobPlan::new(10, 2, 4, 4).unwrap();
        assert_eq!(plan.job(2), Err(LodError::JobOutOfRange { job: 2, jobs: 2 }));
    }

    #[test]
    fn test_command_offsets() {
        let plan = JobPlan::new(4096, 4, 4, 256).unwrap();
        let job = plan.job(2).unwrap();
        assert_eq!(plan.command_offset(&job), 512);
        assert_eq!(plan.indirect_offset(&job, IndirectCommand::MediumRest), 512 + 96);
        assert_eq!(plan.params_offset(&job), 512);
        assert_eq!(plan.command_buffer_bytes(), 1024);
        assert_eq!(plan.params_buffer_bytes(), 1024);

        let packed = JobPlan::new(4096, 4, 4, 4).unwrap();
        assert_eq!(packed.job_byte_stride(), 192);
        assert_eq!(packed.params_stride(), 16);
    }

    #[test]
    fn test_texel_limit_is_a_warning() {
        assert_eq!(check_texel_limit("particles", 10, 10), None);
        let warning = check_texel_limit("particles", 11, 10).unwrap();
        assert_eq!(warning.texels, 11);
        assert_eq!(warning.max_texels, 10);
    }
}
