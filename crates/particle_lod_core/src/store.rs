//! # Particle Store
//!
//! Generates the particle set on a jittered grid and keeps it in the texel
//! layout the GPU programs read: two RGBA32F texels per full particle, one
//! per compact particle. The set is immutable; a resize builds a new store.

use glam::Vec3;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::config::ParticleFormat;
use crate::error::{LodError, LodResult};
use crate::layout::{CompactParticle, Particle};

/// A particle as the classifier sees it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sphere {
    /// World-space center.
    pub center: Vec3,
    /// World-space radius, already scaled by the global particle size.
    pub radius: f32,
}

impl Sphere {
    /// Decodes a particle from its texels.
    ///
    /// Full particles scale their own size factor by `particle_size`;
    /// compact particles have no size factor and use `particle_size` alone.
    #[must_use]
    pub fn from_texels(texels: &[[f32; 4]], format: ParticleFormat, particle_size: f32) -> Self {
        let [x, y, z, w] = texels[0];
        let radius = match format {
            ParticleFormat::Full => w * particle_size,
            ParticleFormat::Compact => particle_size,
        };
        Self {
            center: Vec3::new(x, y, z),
            radius,
        }
    }
}

/// Generates `count` full particles on a jittered grid.
///
/// The grid is `cube x cube/4 x cube` cells, stretched 4x vertically and
/// scaled to span roughly 128 units. Deterministic for a given seed.
#[must_use]
pub fn generate_particles(count: u32, seed: u64) -> Vec<Particle> {
    let mut cube: u32 = 1;
    while u64::from(cube) * u64::from(cube) * u64::from(cube / 4) < u64::from(count) {
        cube += 1;
    }
    let scale = 128.0 / cube as f32;
    let half = Vec3::new(cube as f32, (cube / 4) as f32, cube as f32) * 0.5;
    let mut rng = ChaCha8Rng::seed_from_u64(seed);

    (0..count)
        .map(|i| {
            let x = i % cube;
            let z = (i / cube) % cube;
            let y = i / (cube * cube);

            let jitter = rng.gen::<f32>();
            let mut pos = (Vec3::new(0.0, jitter, 0.0) - 0.5) * 0.1;
            pos += Vec3::new(x as f32, y as f32, z as f32);
            pos -= half;
            pos *= Vec3::new(1.0, 4.0, 1.0);
            let size = (1.0 + rng.gen::<f32>()) * 0.25;

            let color = [rng.gen::<f32>(), rng.gen::<f32>(), rng.gen::<f32>(), 1.0];
            Particle {
                pos_size: (pos.extend(size) * scale).to_array(),
                color,
            }
        })
        .collect()
}

/// The particle set in GPU texel layout plus its index permutation.
#[derive(Debug, Clone, PartialEq)]
pub struct ParticleStore {
    format: ParticleFormat,
    texels: Vec<[f32; 4]>,
    indices: Vec<u32>,
}

impl ParticleStore {
    /// Generates a store of `count` particles.
    ///
    /// # Errors
    ///
    /// Returns [`LodError::InvalidParticleCount`] when `count` is zero.
    pub fn generate(count: u32, seed: u64, format: ParticleFormat) -> LodResult<Self> {
        if count == 0 {
            return Err(LodError::InvalidParticleCount(0));
        }
        let particles = generate_particles(count, seed);
        let texels = match format {
            ParticleFormat::Full => bytemuck::cast_slice::<Particle, [f32; 4]>(&particles).to_vec(),
            ParticleFormat::Compact => particles
                .iter()
                .map(|p| CompactParticle::from_particle(p).pos_color)
                .collect(),
        };
        tracing::debug!(count, seed, ?format, "generated particle set");
        Ok(Self {
            format,
            texels,
            indices: (0..count).collect(),
        })
    }

    /// Particle count.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn len(&self) -> u32 {
        self.indices.len() as u32
    }

    /// Always false for a generated store.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// Record layout.
    #[must_use]
    pub fn format(&self) -> ParticleFormat {
        self.format
    }

    /// All texels, particle-major.
    #[must_use]
    pub fn texels(&self) -> &[[f32; 4]] {
        &self.texels
    }

    /// Texels of one particle.
    #[must_use]
    pub fn particle_texels(&self, index: u32) -> &[[f32; 4]] {
        let per = self.format.texels() as usize;
        let start = index as usize * per;
        &self.texels[start..start + per]
    }

    /// Decoded sphere of one particle.
    #[must_use]
    pub fn sphere(&self, index: u32, particle_size: f32) -> Sphere {
        Sphere::from_texels(self.particle_texels(index), self.format, particle_size)
    }

    /// Index permutation.
    #[must_use]
    pub fn indices(&self) -> &[u32] {
        &self.indices
    }

    /// Texels as bytes for upload.
    #[must_use]
    pub fn texel_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.texels)
    }

    /// Indices as bytes for upload.
    #[must_use]
    pub fn index_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.indices)
    }

    /// Texel count, compared against device limits.
    #[must_use]
    pub fn texel_count(&self) -> u64 {
        self.texels.len() as u64
    }
}
