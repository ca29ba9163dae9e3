//! # LOD Configuration
//!
//! Loaded once at startup from TOML. Every field has a default, so an empty
//! document is a valid configuration.
//!
//! ```toml
//! particle_count = 1048575
//! job_count = 4
//!
//! [mode]
//! strategy = "vertex_stream"
//! data_flow = "payload"
//!
//! [thresholds]
//! near_pixels = 12.0
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{LodError, LodResult};
use crate::layout::{CompactParticle, Particle, TEXEL_BYTES};

/// Default particle count (2^20 - 1).
pub const DEFAULT_PARTICLE_COUNT: u32 = 0xF_FFFF;

/// Default generation seed.
pub const DEFAULT_SEED: u64 = 47_345_356;

/// How the classifier visits particles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassifyStrategy {
    /// Compute dispatch in workgroups of 256 invocations.
    #[default]
    Compute,
    /// One inert point vertex per particle, rasterization discarded.
    VertexStream,
}

/// What the classifier appends to the LOD buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataFlow {
    /// One `u32` particle index per item.
    #[default]
    Indices,
    /// The particle's texels, copied word by word.
    Payload,
}

/// Particle record layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParticleFormat {
    /// Position, size and RGBA32F color in two texels.
    #[default]
    Full,
    /// Position and packed RGBA8 color in one texel.
    Compact,
}

impl ParticleFormat {
    /// Texels per particle.
    #[must_use]
    pub const fn texels(self) -> u32 {
        match self {
            Self::Full => 2,
            Self::Compact => 1,
        }
    }

    /// Bytes per particle.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn particle_bytes(self) -> u32 {
        match self {
            Self::Full => Particle::SIZE as u32,
            Self::Compact => CompactParticle::SIZE as u32,
        }
    }
}

/// How the draw programs receive the point tier's items.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemFetch {
    /// Vertex stage reads items from a read-only storage buffer.
    #[default]
    Storage,
    /// Items arrive through the vertex input stage.
    VertexAttribute,
}

/// Sphere pipeline used when LOD is disabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackPipeline {
    /// Basic mesh for every particle.
    #[default]
    Mesh,
    /// Tessellated mesh for every particle.
    Tessellated,
}

/// Every mode switch of the pipeline, passed as one value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineMode {
    /// Classify and draw per tier; otherwise draw every particle with the fallback.
    pub lod: bool,
    /// Classifier strategy.
    pub strategy: ClassifyStrategy,
    /// Index or payload appends.
    pub data_flow: DataFlow,
    /// Particle record layout.
    pub particle_format: ParticleFormat,
    /// Point tier item fetch.
    pub item_fetch: ItemFetch,
    /// Pipeline for the non-LOD path.
    pub fallback: FallbackPipeline,
}

impl Default for PipelineMode {
    fn default() -> Self {
        Self {
            lod: true,
            strategy: ClassifyStrategy::default(),
            data_flow: DataFlow::default(),
            particle_format: ParticleFormat::default(),
            item_fetch: ItemFetch::default(),
            fallback: FallbackPipeline::default(),
        }
    }
}

impl PipelineMode {
    /// Bytes per LOD buffer item.
    #[must_use]
    pub const fn item_stride(&self) -> u32 {
        match self.data_flow {
            DataFlow::Indices => 4,
            DataFlow::Payload => self.particle_format.particle_bytes(),
        }
    }

    /// `u32` words per LOD buffer item.
    #[must_use]
    pub const fn item_words(&self) -> u32 {
        self.item_stride() / 4
    }

    /// Whether items are particle indices.
    #[must_use]
    pub const fn uses_indices(&self) -> bool {
        matches!(self.data_flow, DataFlow::Indices)
    }

    /// Texels per particle.
    #[must_use]
    pub const fn texels_per_particle(&self) -> u32 {
        self.particle_format.texels()
    }

    /// Bytes of one particle texel row.
    #[must_use]
    pub const fn texel_bytes(&self) -> u32 {
        TEXEL_BYTES
    }
}

/// Screen-space tier thresholds and the global radius scale.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LodThresholds {
    /// Footprint at or above which a particle is NEAR.
    pub near_pixels: f32,
    /// Footprint at or below which a particle is FAR.
    pub far_pixels: f32,
    /// Footprint at which the near mesh is fully refined.
    pub tess_pixels: f32,
    /// Global radius scale.
    pub particle_size: f32,
}

impl Default for LodThresholds {
    fn default() -> Self {
        Self {
            near_pixels: 10.0,
            far_pixels: 1.5,
            tess_pixels: 10.0,
            particle_size: 1.0,
        }
    }
}

/// Camera placement and projection.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    /// Eye position.
    pub eye: [f32; 3],
    /// Look-at target.
    pub target: [f32; 3],
    /// Vertical field of view in degrees.
    pub fov_degrees: f32,
    /// Near clip plane.
    pub near_plane: f32,
    /// Far clip plane.
    pub far_plane: f32,
    /// Orbit step around the target per frame, in degrees.
    pub orbit_degrees_per_frame: f32,
}

impl Default for CameraConfig {
    fn default() -> Self {
        let scene_dimension = 256.0 * 0.3;
        Self {
            eye: [0.9 * scene_dimension, 0.9 * scene_dimension, scene_dimension],
            target: [0.0; 3],
            fov_degrees: 60.0,
            near_plane: 0.1,
            far_plane: 1000.0,
            orbit_degrees_per_frame: 0.0,
        }
    }
}

/// Complete LOD configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LodConfig {
    /// Particles to generate.
    pub particle_count: u32,
    /// Requested jobs, clamped to `[1, particle_count]`.
    pub job_count: u32,
    /// Generation seed.
    pub seed: u64,
    /// Freeze classification (single-job plans only).
    pub pause: bool,
    /// Draw sphere meshes as lines when the device allows it.
    pub wireframe: bool,
    /// Render target size in pixels.
    pub viewport: [u32; 2],
    /// Mode switches.
    pub mode: PipelineMode,
    /// Tier thresholds.
    pub thresholds: LodThresholds,
    /// Camera.
    pub camera: CameraConfig,
}

impl Default for LodConfig {
    fn default() -> Self {
        Self {
            particle_count: DEFAULT_PARTICLE_COUNT,
            job_count: 1,
            seed: DEFAULT_SEED,
            pause: false,
            wireframe: false,
            viewport: [1024, 768],
            mode: PipelineMode::default(),
            thresholds: LodThresholds::default(),
            camera: CameraConfig::default(),
        }
    }
}

impl LodConfig {
    /// Parses a TOML document and validates it.
    ///
    /// # Errors
    ///
    /// Returns [`LodError::InvalidConfig`] on malformed TOML or invalid values.
    pub fn from_toml_str(source: &str) -> LodResult<Self> {
        let config: Self = toml::from_str(source)
            .map_err(|e| LodError::InvalidConfig(format!("failed to parse: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads and parses a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`LodError::InvalidConfig`] when the file cannot be read or parsed.
    pub fn load(path: impl AsRef<Path>) -> LodResult<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|e| {
            LodError::InvalidConfig(format!("failed to read {}: {e}", path.display()))
        })?;
        let config = Self::from_toml_str(&source)?;
        tracing::info!(
            path = %path.display(),
            particles = config.particle_count,
            jobs = config.job_count,
            "loaded LOD configuration"
        );
        Ok(config)
    }

    /// Serializes to TOML.
    ///
    /// # Errors
    ///
    /// Returns [`LodError::InvalidConfig`] if serialization fails.
    pub fn to_toml_string(&self) -> LodResult<String> {
        toml::to_string_pretty(self)
            .map_err(|e| LodError::InvalidConfig(format!("failed to serialize: {e}")))
    }

    /// Checks values that cannot be clamped.
    ///
    /// # Errors
    ///
    /// Returns [`LodError::InvalidParticleCount`] for an empty set and
    /// [`LodError::InvalidConfig`] for non-positive thresholds or viewport.
    pub fn validate(&self) -> LodResult<()> {
        if self.particle_count == 0 {
            return Err(LodError::InvalidParticleCount(0));
        }
        let t = &self.thresholds;
        if !(t.far_pixels > 0.0 && t.near_pixels > 0.0 && t.tess_pixels > 0.0) {
            return Err(LodError::InvalidConfig(format!(
                "pixel thresholds must be positive: near {} far {} tess {}",
                t.near_pixels, t.far_pixels, t.tess_pixels
            )));
        }
        if !(t.particle_size > 0.0) {
            return Err(LodError::InvalidConfig(format!(
                "particle size must be positive: {}",
                t.particle_size
            )));
        }
        if self.viewport[0] == 0 || self.viewport[1] == 0 {
            return Err(LodError::InvalidConfig(format!(
                "viewport must be non-empty: {}x{}",
                self.viewport[0], self.viewport[1]
            )));
        }
        Ok(())
    }

    /// Job count clamped to `[1, particle_count]`.
    #[must_use]
    pub fn effective_job_count(&self) -> u32 {
        self.job_count.clamp(1, self.particle_count.max(1))
    }
}

/// Work a configuration change requires before the next frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConfigChange {
    /// Regenerate the particle set.
    pub particles: bool,
    /// Reallocate LOD and command buffers.
    pub lod_buffers: bool,
    /// Rebuild GPU programs (their defines changed).
    pub programs: bool,
}

impl ConfigChange {
    /// Compares the configuration of the previous frame with the next one.
    #[must_use]
    pub fn between(previous: &LodConfig, next: &LodConfig) -> Self {
        let particles = previous.particle_count != next.particle_count
            || previous.seed != next.seed
            || previous.mode.particle_format != next.mode.particle_format;
        let programs = previous.mode.data_flow != next.mode.data_flow
            || previous.mode.particle_format != next.mode.particle_format;
        let lod_buffers = particles
            || previous.effective_job_count() != next.effective_job_count()
            || previous.mode.data_flow != next.mode.data_flow;
        Self {
            particles,
            lod_buffers,
            programs,
        }
    }

    /// Whether nothing needs rebuilding.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        !(self.particles || self.lod_buffers || self.programs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = LodConfig::from_toml_str("").unwrap();
        assert_eq!(config, LodConfig::default());
        assert_eq!(config.particle_count, 1_048_575);
        assert_eq!(config.job_count, 1);
        assert!(config.mode.lod);
        assert_eq!(config.mode.strategy, ClassifyStrategy::Compute);
        assert_eq!(config.mode.data_flow, DataFlow::Indices);
        assert!((config.camera.fov_degrees - 60.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_parse_modes() {
        let source = r#"
            particle_count = 5000
            job_count = 3

            [mode]
            lod = false
            strategy = "vertex_stream"
            data_flow = "payload"
            particle_format = "compact"
            item_fetch = "vertex_attribute"
            fallback = "tessellated"

            [thresholds]
            near_pixels = 20.0
        "#;
        let config = LodConfig::from_toml_str(source).unwrap();
        assert_eq!(config.particle_count, 5000);
        assert!(!config.mode.lod);
        assert_eq!(config.mode.strategy, ClassifyStrategy::VertexStream);
        assert_eq!(config.mode.data_flow, DataFlow::Payload);
        assert_eq!(config.mode.particle_format, ParticleFormat::Compact);
        assert_eq!(config.mode.item_fetch, ItemFetch::VertexAttribute);
        assert_eq!(config.mode.fallback, FallbackPipeline::Tessellated);
        assert!((config.thresholds.near_pixels - 20.0).abs() < f32::EPSILON);
        assert!((config.thresholds.far_pixels - 1.5).abs() < f32::EPSILON);
    }

    #[test]
    fn test_toml_roundtrip() {
        let mut config = LodConfig::default();
        config.job_count = 7;
        config.mode.data_flow = DataFlow::Payload;
        let text = config.to_toml_string().unwrap();
        assert_eq!(LodConfig::from_toml_str(&text).unwrap(), config);
    }

    #[test]
    fn test_rejects_invalid_values() {
        assert_eq!(
            LodConfig::from_toml_str("particle_count = 0"),
            Err(LodError::InvalidParticleCount(0))
        );
        assert!(matches!(
            LodConfig::from_toml_str("[thresholds]\nfar_pixels = 0.0"),
            Err(LodError::InvalidConfig(_))
        ));
        assert!(matches!(
            LodConfig::from_toml_str("particle_count = \"many\""),
            Err(LodError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_job_count_clamped() {
        let mut config = LodConfig {
            particle_count: 5,
            job_count: 0,
            ..LodConfig::default()
        };
        assert_eq!(config.effective_job_count(), 1);
        config.job_count = 9;
        assert_eq!(config.effective_job_count(), 5);
    }

    #[test]
    fn test_item_stride_per_mode() {
        let mut mode = PipelineMode::default();
        assert_eq!(mode.item_stride(), 4);
        assert_eq!(mode.item_words(), 1);
        mode.data_flow = DataFlow::Payload;
        assert_eq!(mode.item_stride(), 32);
        mode.particle_format = ParticleFormat::Compact;
        assert_eq!(mode.item_stride(), 16);
        assert_eq!(mode.item_words(), 4);
    }

    #[test]
    fn test_change_detection() {
        let base = LodConfig::default();
        assert!(ConfigChange::between(&base, &base).is_empty());

        let resized = LodConfig {
            particle_count: 200_000,
            ..base.clone()
        };
        let change = ConfigChange::between(&base, &resized);
        assert!(change.particles && change.lod_buffers && !change.programs);

        let more_jobs = LodConfig {
            job_count: 4,
            ..base.clone()
        };
        let change = ConfigChange::between(&base, &more_jobs);
        assert!(!change.particles && change.lod_buffers && !change.programs);

        let mut payload = base.clone();
        payload.mode.data_flow = DataFlow::Payload;
        let change = ConfigChange::between(&base, &payload);
        assert!(!change.particles && change.lod_buffers && change.programs);

        let mut thresholds = base.clone();
        thresholds.thresholds.near_pixels = 3.0;
        assert!(ConfigChange::between(&base, &thresholds).is_empty());
    }
}
