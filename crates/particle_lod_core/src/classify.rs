//! # LOD Classifier
//!
//! Buckets every particle of a job into FAR, MEDIUM or NEAR by its
//! on-screen footprint and appends it to that tier's buffer.
//!
//! The append is the GPU pattern: an atomic fetch-and-increment on the tier
//! counter hands out a slot, and only that invocation writes the slot. Slot
//! order depends on scheduling; counts do not.
//!
//! Both strategies run the same per-particle invocation:
//! - `Compute` visits workgroups of [`WORKGROUP_SIZE`] in parallel
//! - `VertexStream` visits particles as one ordered vertex stream

use std::sync::atomic::{AtomicU32, Ordering};

use glam::{Mat4, Vec2};
use rayon::prelude::*;

use crate::config::{ClassifyStrategy, DataFlow, PipelineMode};
use crate::jobs::Job;
use crate::layout::{DrawCounters, SceneData};
use crate::store::{ParticleStore, Sphere};

/// Invocations per compute workgroup.
pub const WORKGROUP_SIZE: u32 = 256;

/// LOD tier of a particle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Tier {
    /// Drawn as a point.
    Far = 0,
    /// Drawn with the basic mesh.
    Medium = 1,
    /// Drawn with the tessellated mesh.
    Near = 2,
}

impl Tier {
    /// All tiers, in counter order.
    pub const ALL: [Self; 3] = [Self::Far, Self::Medium, Self::Near];

    /// Counter and buffer index.
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }
}

/// Tier for a footprint in pixels.
///
/// The far check runs first: a footprint equal to `far_pixels` is FAR, one
/// equal to `near_pixels` is NEAR.
#[must_use]
pub fn tier_for_size(size: f32, far_pixels: f32, near_pixels: f32) -> Tier {
    if size <= far_pixels {
        Tier::Far
    } else if size >= near_pixels {
        Tier::Near
    } else {
        Tier::Medium
    }
}

/// The parts of [`SceneData`] classification reads.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LodCamera {
    view_proj: Mat4,
    view_pixel_size: Vec2,
    far_pixels: f32,
    near_pixels: f32,
    particle_size: f32,
}

impl LodCamera {
    /// Extracts classification inputs from a scene block.
    #[must_use]
    pub fn from_scene(scene: &SceneData) -> Self {
        Self {
            view_proj: Mat4::from_cols_array_2d(&scene.view_proj),
            view_pixel_size: Vec2::from(scene.view_pixel_size),
            far_pixels: scene.far_pixels,
            near_pixels: scene.near_pixels,
            particle_size: scene.particle_size,
        }
    }

    /// Global radius scale.
    #[must_use]
    pub fn particle_size(&self) -> f32 {
        self.particle_size
    }

    /// Footprint in pixels, or `None` at or behind the eye plane.
    #[must_use]
    pub fn apparent_size(&self, sphere: &Sphere) -> Option<f32> {
        let h = self.view_proj * sphere.center.extend(1.0);
        if h.w <= 0.0 {
            return None;
        }
        let pixels = 2.0 * sphere.radius * self.view_pixel_size / h.w;
        Some(pixels.max_element())
    }

    /// Tier of a sphere. Spheres behind the eye are FAR.
    #[must_use]
    pub fn classify(&self, sphere: &Sphere) -> Tier {
        self.apparent_size(sphere).map_or(Tier::Far, |size| {
            tier_for_size(size, self.far_pixels, self.near_pixels)
        })
    }
}

/// Per-job tier counters.
#[derive(Debug, Default)]
pub struct TierCounters {
    counts: [AtomicU32; 3],
}

impl TierCounters {
    /// Zeroed counters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Counters starting from stored values.
    #[must_use]
    pub fn from_counters(counters: &DrawCounters) -> Self {
        Self {
            counts: [
                AtomicU32::new(counters.far),
                AtomicU32::new(counters.medium),
                AtomicU32::new(counters.near),
            ],
        }
    }

    /// Claims the next slot of `tier`.
    pub fn append(&self, tier: Tier) -> u32 {
        self.counts[tier.index()].fetch_add(1, Ordering::Relaxed)
    }

    /// Zeroes all counters.
    pub fn reset(&self) {
        for count in &self.counts {
            count.store(0, Ordering::Relaxed);
        }
    }

    /// Current values as a counter record.
    #[must_use]
    pub fn snapshot(&self) -> DrawCounters {
        DrawCounters {
            far: self.counts[Tier::Far.index()].load(Ordering::Acquire),
            medium: self.counts[Tier::Medium.index()].load(Ordering::Acquire),
            near: self.counts[Tier::Near.index()].load(Ordering::Acquire),
            _pad: 0,
        }
    }
}

/// Preallocated append storage of one tier, in `u32` words.
#[derive(Debug)]
pub struct AppendBuffer {
    words: Box<[AtomicU32]>,
    item_words: u32,
}

impl AppendBuffer {
    /// Storage for `capacity` items of `item_words` words.
    #[must_use]
    pub fn new(capacity: u32, item_words: u32) -> Self {
        let len = capacity as usize * item_words as usize;
        Self {
            words: (0..len).map(|_| AtomicU32::new(0)).collect(),
            item_words,
        }
    }

    /// Item capacity.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn capacity(&self) -> u32 {
        (self.words.len() / self.item_words.max(1) as usize) as u32
    }

    /// Words per item.
    #[must_use]
    pub fn item_words(&self) -> u32 {
        self.item_words
    }

    /// Writes the item at `slot`.
    ///
    /// Slots past capacity are a partitioning bug; they are dropped in
    /// release builds.
    pub fn write(&self, slot: u32, item: &[u32]) {
        let base = slot as usize * self.item_words as usize;
        debug_assert!(base + item.len() <= self.words.len(), "slot {slot} past capacity");
        for (word, value) in self.words.iter().skip(base).zip(item) {
            word.store(*value, Ordering::Relaxed);
        }
    }

    /// First word of the item at `slot`: the particle index in index mode.
    #[must_use]
    pub fn first_word(&self, slot: u32) -> Option<u32> {
        self.words
            .get(slot as usize * self.item_words as usize)
            .map(|word| word.load(Ordering::Relaxed))
    }

    /// Reads the item at `slot`.
    #[must_use]
    pub fn read(&self, slot: u32) -> Vec<u32> {
        let base = slot as usize * self.item_words as usize;
        self.words
            .iter()
            .skip(base)
            .take(self.item_words as usize)
            .map(|word| word.load(Ordering::Relaxed))
            .collect()
    }
}

/// The three tier buffers shared by all jobs.
#[derive(Debug)]
pub struct LodBuffers {
    tiers: [AppendBuffer; 3],
}

impl LodBuffers {
    /// Buffers for `capacity` items each.
    #[must_use]
    pub fn new(capacity: u32, item_words: u32) -> Self {
        Self {
            tiers: [
                AppendBuffer::new(capacity, item_words),
                AppendBuffer::new(capacity, item_words),
                AppendBuffer::new(capacity, item_words),
            ],
        }
    }

    /// Buffer of one tier.
    #[must_use]
    pub fn tier(&self, tier: Tier) -> &AppendBuffer {
        &self.tiers[tier.index()]
    }

    /// Item capacity of each buffer.
    #[must_use]
    pub fn capacity(&self) -> u32 {
        self.tiers[0].capacity()
    }
}

/// Everything one classification pass reads.
#[derive(Debug, Clone, Copy)]
pub struct Classifier<'a> {
    store: &'a ParticleStore,
    camera: &'a LodCamera,
    mode: PipelineMode,
}

impl<'a> Classifier<'a> {
    /// Creates a classifier over a particle store.
    #[must_use]
    pub fn new(store: &'a ParticleStore, camera: &'a LodCamera, mode: PipelineMode) -> Self {
        Self {
            store,
            camera,
            mode,
        }
    }

    /// Classifies every particle of `job` into `buffers`, counting into `counters`.
    ///
    /// Counters are not reset here.
    pub fn run(&self, job: &Job, counters: &TierCounters, buffers: &LodBuffers) {
        match self.mode.strategy {
            ClassifyStrategy::Compute => {
                let groups = job.count.div_ceil(WORKGROUP_SIZE);
                (0..groups).into_par_iter().for_each(|group| {
                    for local in group * WORKGROUP_SIZE..(group + 1) * WORKGROUP_SIZE {
                        if local < job.count {
                            self.invoke(job, local, counters, buffers);
                        }
                    }
                });
            }
            ClassifyStrategy::VertexStream => {
                for vertex in 0..job.count {
                    self.invoke(job, vertex, counters, buffers);
                }
            }
        }
    }

    /// One invocation: classify particle `local` of `job` and append it.
    fn invoke(&self, job: &Job, local: u32, counters: &TierCounters, buffers: &LodBuffers) {
        let global = job.offset + local;
        let particle = match self.mode.data_flow {
            DataFlow::Indices => self.store.indices()[global as usize],
            DataFlow::Payload => global,
        };
        let sphere = self.store.sphere(particle, self.camera.particle_size());
        let tier = self.camera.classify(&sphere);
        let slot = counters.append(tier);
        let buffer = buffers.tier(tier);
        match self.mode.data_flow {
            DataFlow::Indices => buffer.write(slot, &[particle]),
            DataFlow::Payload => {
                let words: Vec<u32> = self
                    .store
                    .particle_texels(particle)
                    .iter()
                    .flatten()
                    .map(|value| value.to_bits())
                    .collect();
                buffer.write(slot, &words);
            }
        }
    }
}
