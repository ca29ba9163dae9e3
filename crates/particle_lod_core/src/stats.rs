//! LOD statistics.

use crate::layout::DrawCounters;

/// Statistics from one LOD frame.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LodStats {
    /// Jobs in the frame.
    pub jobs: u32,
    /// Particles drawn as points.
    pub far: u64,
    /// Particles drawn with the basic mesh.
    pub medium: u64,
    /// Particles drawn with the tessellated mesh.
    pub near: u64,
    /// Draw calls issued.
    pub draw_calls: u32,
    /// Classification was frozen this frame.
    pub updates_skipped: bool,
    /// Frame time in milliseconds.
    pub frame_time_ms: f32,
}

impl LodStats {
    /// Adds one job's counters.
    pub fn add_job(&mut self, counters: &DrawCounters) {
        self.jobs += 1;
        self.far += u64::from(counters.far);
        self.medium += u64::from(counters.medium);
        self.near += u64::from(counters.near);
    }

    /// Particles over all tiers.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.far + self.medium + self.near
    }

    /// Share of particles per tier, `[far, medium, near]`.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn tier_fractions(&self) -> [f32; 3] {
        let total = self.total();
        if total == 0 {
            return [0.0; 3];
        }
        [self.far, self.medium, self.near].map(|count| (count as f64 / total as f64) as f32)
    }

    /// Frame rate the host-side frame time allows, zero before a frame
    /// has been timed.
    #[must_use]
    pub fn frames_per_second(&self) -> f32 {
        if self.frame_time_ms <= 0.0 {
            return 0.0;
        }
        1000.0 / self.frame_time_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accumulates_jobs() {
        let mut stats = LodStats::default();
        stats.add_job(&DrawCounters {
            far: 1,
            medium: 2,
            near: 3,
            _pad: 0,
        });
        stats.add_job(&DrawCounters {
            far: 4,
            medium: 0,
            near: 0,
            _pad: 0,
        });
        assert_eq!(stats.jobs, 2);
        assert_eq!(stats.total(), 10);
        let [far, medium, near] = stats.tier_fractions();
        assert!((far - 0.5).abs() < 1e-6);
        assert!((medium - 0.2).abs() < 1e-6);
        assert!((near - 0.3).abs() < 1e-6);
    }

    #[test]
    fn test_empty_stats() {
        let stats = LodStats::default();
        assert_eq!(stats.tier_fractions(), [0.0; 3]);
        assert!(stats.frames_per_second().abs() < f32::EPSILON);
    }

    #[test]
    fn test_frame_rate_from_frame_time() {
        let stats = LodStats {
            frame_time_ms: 4.0,
            ..LodStats::default()
        };
        assert!((stats.frames_per_second() - 250.0).abs() < 1e-3);
    }
}
