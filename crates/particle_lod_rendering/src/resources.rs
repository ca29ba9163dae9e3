//! # GPU Resources
//!
//! Buffers, render targets and bind groups for one particle set and one job
//! plan. Everything here is rebuilt as a whole when the particle set or the
//! plan changes, so a frame never mixes buffers of two generations.

use bytemuck::Zeroable;
use particle_lod_core::layout::{
    DrawCounters, DrawIndirects, DrawToggle, JobParams, SceneData, BATCH_SIZE,
};
use particle_lod_core::{
    align_up, BatchSplit, DataFlow, FallbackPipeline, Job, JobPlan, ParticleStore, PipelineMode,
    Tier,
};
use wgpu::util::DeviceExt;

use crate::geometry::SphereGeometry;
use crate::programs::{LodLayouts, COLOR_FORMAT, DEPTH_FORMAT, STREAM_TARGET_FORMAT};

/// Smallest size given to buffers whose contents may be empty.
const MIN_BUFFER_BYTES: u64 = 16;

fn storage_buffer(
    device: &wgpu::Device,
    label: &str,
    size: u64,
    usage: wgpu::BufferUsages,
) -> wgpu::Buffer {
    device.create_buffer(&wgpu::BufferDescriptor {
        label: Some(label),
        size: size.max(MIN_BUFFER_BYTES),
        usage,
        mapped_at_creation: false,
    })
}

fn render_target(
    device: &wgpu::Device,
    label: &str,
    size: [u32; 2],
    format: wgpu::TextureFormat,
    usage: wgpu::TextureUsages,
) -> wgpu::Texture {
    device.create_texture(&wgpu::TextureDescriptor {
        label: Some(label),
        size: wgpu::Extent3d {
            width: size[0].max(1),
            height: size[1].max(1),
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format,
        usage,
        view_formats: &[],
    })
}

/// Binding of a whole buffer or of its tail from `offset`.
fn binding(buffer: &wgpu::Buffer, offset: u64, size: Option<u64>) -> wgpu::BindingResource<'_> {
    wgpu::BindingResource::Buffer(wgpu::BufferBinding {
        buffer,
        offset,
        size: size.and_then(wgpu::BufferSize::new),
    })
}

/// Vertex and index buffers of one sphere mesh.
pub struct MeshBuffers {
    /// One unit's vertices, bound as storage.
    pub vertices: wgpu::Buffer,
    /// Batched indices.
    pub indices: wgpu::Buffer,
}

impl MeshBuffers {
    fn new(device: &wgpu::Device, label: &str, vertices: &[[f32; 4]], indices: &[u32]) -> Self {
        Self {
            vertices: device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(&format!("{label} Vertices")),
                contents: bytemuck::cast_slice(vertices),
                usage: wgpu::BufferUsages::STORAGE,
            }),
            indices: device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(&format!("{label} Batch Indices")),
                contents: bytemuck::cast_slice(indices),
                usage: wgpu::BufferUsages::INDEX,
            }),
        }
    }
}

/// Bind groups of the non-LOD path.
pub struct FallbackBindings {
    /// Items from the first particle.
    pub full: wgpu::BindGroup,
    /// Items from the first particle after the full batches.
    pub rest: wgpu::BindGroup,
}

/// All device memory of one generation.
pub struct GpuLodResources {
    plan: JobPlan,
    mode: PipelineMode,
    toggle_stride: u64,

    /// Scene uniform block.
    pub scene: wgpu::Buffer,
    /// Particle texels; also a vertex buffer for attribute point fetch.
    pub particles: wgpu::Buffer,
    /// Particle index permutation.
    pub particle_indices: wgpu::Buffer,
    /// FAR, MEDIUM and NEAR append buffers.
    pub lod: [wgpu::Buffer; 3],
    /// Per-job command blocks: counters and indirect records.
    pub commands: wgpu::Buffer,
    /// Per-job range uniforms.
    pub params: wgpu::Buffer,
    /// Full and remainder toggle slots.
    pub toggles: wgpu::Buffer,
    /// Mapped copy of `commands` for counter readback.
    pub readback: wgpu::Buffer,
    /// MEDIUM tier mesh.
    pub basic_mesh: MeshBuffers,
    /// NEAR tier mesh.
    pub tess_mesh: MeshBuffers,

    /// Color target.
    pub color: wgpu::Texture,
    /// View of `color`.
    pub color_view: wgpu::TextureView,
    /// Depth target view.
    pub depth_view: wgpu::TextureView,
    /// 1x1 target of the vertex-stream passes.
    pub stream_view: wgpu::TextureView,

    /// Classify group 0.
    pub classify_scene: wgpu::BindGroup,
    /// Classify group 1, offsets per job.
    pub classify_job: wgpu::BindGroup,
    /// Classify group 2.
    pub classify_lod: wgpu::BindGroup,
    /// Commands group 0, offset per job.
    pub commands_job: wgpu::BindGroup,
    /// Draw group 0.
    pub draw_scene: wgpu::BindGroup,
    /// Draw group 1, offsets per job and sub-draw.
    pub draw_job: wgpu::BindGroup,
    /// Draw group 2 per tier.
    pub tier_items: [wgpu::BindGroup; 3],
    /// Draw group 2 of the non-LOD path.
    pub fallback: FallbackBindings,
}

impl GpuLodResources {
    /// Uploads `store` and allocates buffers for `plan`.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn new(
        device: &wgpu::Device,
        layouts: &LodLayouts,
        geometry: &SphereGeometry,
        store: &ParticleStore,
        plan: &JobPlan,
        mode: PipelineMode,
        viewport: [u32; 2],
    ) -> Self {
        let alignment = u64::from(plan.alignment());
        let toggle_stride = align_up(DrawToggle::SIZE as u64, alignment);

        let scene = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("LOD Scene"),
            size: SceneData::SIZE as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let particles = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("LOD Particles"),
            contents: store.texel_bytes(),
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::VERTEX,
        });
        let particle_indices = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("LOD Particle Indices"),
            contents: store.index_bytes(),
            usage: wgpu::BufferUsages::STORAGE,
        });

        let lod_usage =
            wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::INDEX | wgpu::BufferUsages::VERTEX;
        let lod_bytes = plan.lod_buffer_bytes();
        let lod = [
            storage_buffer(device, "LOD Points", lod_bytes, lod_usage),
            storage_buffer(device, "LOD Basic", lod_bytes, lod_usage),
            storage_buffer(device, "LOD Tess", lod_bytes, lod_usage),
        ];

        let commands = storage_buffer(
            device,
            "LOD Commands",
            plan.command_buffer_bytes(),
            wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::INDIRECT
                | wgpu::BufferUsages::UNIFORM
                | wgpu::BufferUsages::COPY_DST
                | wgpu::BufferUsages::COPY_SRC,
        );
        let readback = storage_buffer(
            device,
            "LOD Commands Readback",
            plan.command_buffer_bytes(),
            wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
        );

        let mut params_bytes = vec![0u8; plan.params_buffer_bytes() as usize];
        for job in plan.jobs() {
            let at = plan.params_offset(&job) as usize;
            params_bytes[at..at + JobParams::SIZE]
                .copy_from_slice(bytemuck::bytes_of(&job.params()));
        }
        let params = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("LOD Job Params"),
            contents: &params_bytes,
            usage: wgpu::BufferUsages::UNIFORM,
        });

        let mut toggle_bytes = vec![0u8; (toggle_stride * 2) as usize];
        toggle_bytes[..DrawToggle::SIZE].copy_from_slice(bytemuck::bytes_of(&DrawToggle::FULL));
        let rest_at = toggle_stride as usize;
        toggle_bytes[rest_at..rest_at + DrawToggle::SIZE]
            .copy_from_slice(bytemuck::bytes_of(&DrawToggle::REST));
        let toggles = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("LOD Draw Toggles"),
            contents: &toggle_bytes,
            usage: wgpu::BufferUsages::UNIFORM,
        });

        let basic_mesh = MeshBuffers::new(
            device,
            "LOD Basic Mesh",
            &geometry.basic.vertices,
            &geometry.basic_batch,
        );
        let tess_mesh = MeshBuffers::new(
            device,
            "LOD Tess Mesh",
            &geometry.tessellated.vertices,
            &geometry.tessellated_batch,
        );

        let color = render_target(
            device,
            "LOD Color",
            viewport,
            COLOR_FORMAT,
            wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
        );
        let color_view = color.create_view(&wgpu::TextureViewDescriptor::default());
        let depth_view = render_target(
            device,
            "LOD Depth",
            viewport,
            DEPTH_FORMAT,
            wgpu::TextureUsages::RENDER_ATTACHMENT,
        )
        .create_view(&wgpu::TextureViewDescriptor::default());
        let stream_view = render_target(
            device,
            "LOD Stream Target",
            [1, 1],
            STREAM_TARGET_FORMAT,
            wgpu::TextureUsages::RENDER_ATTACHMENT,
        )
        .create_view(&wgpu::TextureViewDescriptor::default());

        let classify_scene = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("LOD Classify Scene"),
            layout: &layouts.classify_scene,
            entries: &[
                wgpu::BindGroupEntry { binding: 0, resource: scene.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 1, resource: particles.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 2, resource: particle_indices.as_entire_binding() },
            ],
        });
        let classify_job = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("LOD Classify Job"),
            layout: &layouts.classify_job,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: binding(&params, 0, Some(JobParams::SIZE as u64)),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: binding(&commands, DrawIndirects::COUNTERS_OFFSET, Some(16)),
                },
            ],
        });
        let classify_lod = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("LOD Classify Buffers"),
            layout: &layouts.classify_lod,
            entries: &[
                wgpu::BindGroupEntry { binding: 0, resource: lod[0].as_entire_binding() },
                wgpu::BindGroupEntry { binding: 1, resource: lod[1].as_entire_binding() },
                wgpu::BindGroupEntry { binding: 2, resource: lod[2].as_entire_binding() },
            ],
        });
        let commands_job = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("LOD Commands Job"),
            layout: &layouts.commands,
            entries: &[wgpu::BindGroupEntry {
                binding: 2,
                resource: binding(&commands, 0, Some(DrawIndirects::SIZE as u64)),
            }],
        });
        let draw_scene = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("LOD Draw Scene"),
            layout: &layouts.draw_scene,
            entries: &[
                wgpu::BindGroupEntry { binding: 0, resource: scene.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 1, resource: particles.as_entire_binding() },
            ],
        });
        let draw_job = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("LOD Draw Job"),
            layout: &layouts.draw_job,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: binding(&commands, 0, Some(DrawIndirects::SIZE as u64)),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: binding(&toggles, 0, Some(DrawToggle::SIZE as u64)),
                },
            ],
        });

        let items = |label: &str, source: &wgpu::Buffer, offset: u64, mesh: &MeshBuffers| {
            device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some(label),
                layout: &layouts.draw_items,
                entries: &[
                    wgpu::BindGroupEntry { binding: 0, resource: binding(source, offset, None) },
                    wgpu::BindGroupEntry { binding: 1, resource: mesh.vertices.as_entire_binding() },
                ],
            })
        };
        let tier_items = [
            items("LOD Far Items", &lod[Tier::Far.index()], 0, &basic_mesh),
            items("LOD Medium Items", &lod[Tier::Medium.index()], 0, &basic_mesh),
            items("LOD Near Items", &lod[Tier::Near.index()], 0, &tess_mesh),
        ];

        let fallback_source = match mode.data_flow {
            DataFlow::Indices => &particle_indices,
            DataFlow::Payload => &particles,
        };
        let fallback_mesh = match mode.fallback {
            FallbackPipeline::Mesh => &basic_mesh,
            FallbackPipeline::Tessellated => &tess_mesh,
        };
        // Without a remainder the rest binding is never drawn; keep it in range.
        let split = BatchSplit::new(plan.particle_count(), BATCH_SIZE);
        let rest_offset = if split.rest > 0 {
            u64::from(split.full * BATCH_SIZE) * u64::from(mode.item_stride())
        } else {
            0
        };
        let fallback = FallbackBindings {
            full: items("LOD Fallback Items", fallback_source, 0, fallback_mesh),
            rest: items("LOD Fallback Rest Items", fallback_source, rest_offset, fallback_mesh),
        };

        tracing::info!(
            particles = store.len(),
            jobs = plan.job_count(),
            lod_buffer_bytes = lod_bytes,
            command_bytes = plan.command_buffer_bytes(),
            "allocated GPU LOD resources"
        );

        Self {
            plan: *plan,
            mode,
            toggle_stride,
            scene,
            particles,
            particle_indices,
            lod,
            commands,
            params,
            toggles,
            readback,
            basic_mesh,
            tess_mesh,
            color,
            color_view,
            depth_view,
            stream_view,
            classify_scene,
            classify_job,
            classify_lod,
            commands_job,
            draw_scene,
            draw_job,
            tier_items,
            fallback,
        }
    }

    /// Plan the buffers were sized for.
    #[must_use]
    pub fn plan(&self) -> &JobPlan {
        &self.plan
    }

    /// Mode the bindings were built for.
    #[must_use]
    pub fn mode(&self) -> &PipelineMode {
        &self.mode
    }

    /// Dynamic offset of a toggle slot.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn toggle_offset(&self, rest: bool) -> u32 {
        if rest {
            self.toggle_stride as u32
        } else {
            0
        }
    }

    /// Uploads the frame's scene block.
    pub fn write_scene(&self, queue: &wgpu::Queue, scene: &SceneData) {
        queue.write_buffer(&self.scene, 0, bytemuck::bytes_of(scene));
    }

    /// Queues a counter reset for every job.
    ///
    /// Each job owns its counter region, so resetting all of them before
    /// the frame's submission equals resetting each right before its
    /// classification.
    pub fn reset_counters<'a>(&self, queue: &wgpu::Queue, jobs: impl Iterator<Item = &'a Job>) {
        let zero = DrawCounters::zeroed();
        for job in jobs {
            queue.write_buffer(
                &self.commands,
                self.plan.command_offset(job) + DrawIndirects::COUNTERS_OFFSET,
                bytemuck::bytes_of(&zero),
            );
        }
    }
}
