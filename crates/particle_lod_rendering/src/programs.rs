//! # LOD Programs
//!
//! Bind group layouts and pipelines for one [`PipelineMode`].
//!
//! ```text
//! classify   g0: scene, particles, particle_indices
//!            g1: job params (dynamic), counters (dynamic, inside cmds)
//!            g2: lod_points, lod_basic, lod_tess
//! commands   g0: cmds (dynamic)
//! draws      g0: scene, particles
//!            g1: cmds (dynamic), toggle (dynamic)
//!            g2: lod_items, unit_vertices
//! ```
//!
//! The whole set is created inside a validation error scope. A set that
//! fails validation is kept but marked invalid, and frames are skipped
//! until a valid set replaces it.

use std::num::NonZeroU64;

use particle_lod_core::layout::{DrawCounters, DrawIndirects, DrawToggle, JobParams, SceneData};
use particle_lod_core::{ClassifyStrategy, ItemFetch, ParticleFormat, PipelineMode};

use crate::context::DeviceCaps;
use crate::error::{RenderError, RenderResult};
use crate::shaders::{LodShaders, ShaderDefines, SphereVariant};

/// Color target format of the draw passes.
pub const COLOR_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;
/// Depth format of the draw passes.
pub const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;
/// Target of the vertex-stream passes; never written.
pub const STREAM_TARGET_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::R8Unorm;

const fn min_size(bytes: usize) -> Option<NonZeroU64> {
    NonZeroU64::new(bytes as u64)
}

fn buffer_entry(
    binding: u32,
    visibility: wgpu::ShaderStages,
    ty: wgpu::BufferBindingType,
    has_dynamic_offset: bool,
    min_binding_size: Option<NonZeroU64>,
) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility,
        ty: wgpu::BindingType::Buffer {
            ty,
            has_dynamic_offset,
            min_binding_size,
        },
        count: None,
    }
}

const UNIFORM: wgpu::BufferBindingType = wgpu::BufferBindingType::Uniform;
const STORAGE_READ: wgpu::BufferBindingType =
    wgpu::BufferBindingType::Storage { read_only: true };
const STORAGE_WRITE: wgpu::BufferBindingType =
    wgpu::BufferBindingType::Storage { read_only: false };

/// Bind group layouts shared by all program sets of a device.
pub struct LodLayouts {
    /// Classify group 0.
    pub classify_scene: wgpu::BindGroupLayout,
    /// Classify group 1.
    pub classify_job: wgpu::BindGroupLayout,
    /// Classify group 2.
    pub classify_lod: wgpu::BindGroupLayout,
    /// Commands group 0.
    pub commands: wgpu::BindGroupLayout,
    /// Draw group 0.
    pub draw_scene: wgpu::BindGroupLayout,
    /// Draw group 1.
    pub draw_job: wgpu::BindGroupLayout,
    /// Draw group 2.
    pub draw_items: wgpu::BindGroupLayout,
}

impl LodLayouts {
    /// Creates the layouts. Writable bindings are visible to the vertex
    /// stage only when the device allows vertex storage writes.
    #[must_use]
    pub fn new(device: &wgpu::Device, caps: &DeviceCaps) -> Self {
        let writers = if caps.vertex_writable_storage {
            wgpu::ShaderStages::COMPUTE | wgpu::ShaderStages::VERTEX
        } else {
            wgpu::ShaderStages::COMPUTE
        };
        let readers = wgpu::ShaderStages::COMPUTE | wgpu::ShaderStages::VERTEX;
        let vertex = wgpu::ShaderStages::VERTEX;

        let classify_scene = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("LOD Classify Scene Layout"),
            entries: &[
                buffer_entry(0, readers, UNIFORM, false, min_size(SceneData::SIZE)),
                buffer_entry(1, readers, STORAGE_READ, false, None),
                buffer_entry(2, readers, STORAGE_READ, false, None),
            ],
        });
        let classify_job = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("LOD Classify Job Layout"),
            entries: &[
                buffer_entry(0, readers, UNIFORM, true, min_size(JobParams::SIZE)),
                buffer_entry(1, writers, STORAGE_WRITE, true, min_size(DrawCounters::SIZE)),
            ],
        });
        let classify_lod = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("LOD Classify Buffers Layout"),
            entries: &[
                buffer_entry(0, writers, STORAGE_WRITE, false, None),
                buffer_entry(1, writers, STORAGE_WRITE, false, None),
                buffer_entry(2, writers, STORAGE_WRITE, false, None),
            ],
        });
        let commands = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("LOD Commands Layout"),
            entries: &[buffer_entry(
                2,
                writers,
                STORAGE_WRITE,
                true,
                min_size(DrawIndirects::SIZE),
            )],
        });
        let draw_scene = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("LOD Draw Scene Layout"),
            entries: &[
                buffer_entry(0, vertex, UNIFORM, false, min_size(SceneData::SIZE)),
                buffer_entry(1, vertex, STORAGE_READ, false, None),
            ],
        });
        let draw_job = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("LOD Draw Job Layout"),
            entries: &[
                buffer_entry(0, vertex, UNIFORM, true, min_size(DrawIndirects::SIZE)),
                buffer_entry(1, vertex, UNIFORM, true, min_size(DrawToggle::SIZE)),
            ],
        });
        let draw_items = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("LOD Draw Items Layout"),
            entries: &[
                buffer_entry(0, vertex, STORAGE_READ, false, None),
                buffer_entry(1, vertex, STORAGE_READ, false, None),
            ],
        });

        Self {
            classify_scene,
            classify_job,
            classify_lod,
            commands,
            draw_scene,
            draw_job,
            draw_items,
        }
    }
}

/// A stage that runs either as a compute dispatch or as a vertex stream.
pub enum StageProgram {
    /// Compute pipeline.
    Compute(wgpu::ComputePipeline),
    /// Point-list render pipeline with rasterization discarded.
    VertexStream(wgpu::RenderPipeline),
}

/// How the points pass fetches its items.
pub enum PointsProgram {
    /// Vertex index into the LOD buffer bound as storage.
    Storage(wgpu::RenderPipeline),
    /// Items through the vertex input stage.
    VertexAttribute(wgpu::RenderPipeline),
}

/// Every pipeline one frame needs.
pub struct ProgramSet {
    mode: PipelineMode,
    wireframe: bool,
    /// Classification; absent when the strategy needs a missing feature.
    pub classify: Option<StageProgram>,
    /// Command synthesis; absent alongside `classify`.
    pub commands: Option<StageProgram>,
    /// MEDIUM tier and mesh fallback.
    pub sphere_basic: wgpu::RenderPipeline,
    /// NEAR tier and tessellated fallback.
    pub sphere_tessellated: wgpu::RenderPipeline,
    /// FAR tier.
    pub points: PointsProgram,
    validation_error: Option<String>,
}

impl ProgramSet {
    /// Compiles every program for `mode` under a validation error scope.
    #[must_use]
    pub fn new(
        device: &wgpu::Device,
        caps: &DeviceCaps,
        layouts: &LodLayouts,
        mode: PipelineMode,
        wireframe: bool,
    ) -> Self {
        let defines = ShaderDefines::from_mode(&mode);
        let wireframe = if wireframe && !caps.wireframe {
            tracing::warn!("wireframe requested but POLYGON_MODE_LINE is unavailable");
            false
        } else {
            wireframe
        };

        device.push_error_scope(wgpu::ErrorFilter::Validation);

        let stream_supported = caps.vertex_writable_storage;
        let (classify, commands) = match mode.strategy {
            ClassifyStrategy::VertexStream if !stream_supported => {
                tracing::warn!("vertex-stream classification needs VERTEX_WRITABLE_STORAGE");
                (None, None)
            }
            strategy => (
                Some(Self::classify_program(device, layouts, &defines, strategy)),
                Some(Self::commands_program(device, layouts, &defines, strategy)),
            ),
        };

        let sphere_basic =
            Self::sphere_program(device, layouts, &defines, SphereVariant::Basic, wireframe);
        let sphere_tessellated =
            Self::sphere_program(device, layouts, &defines, SphereVariant::Tessellated, wireframe);
        let points = Self::points_program(device, layouts, &defines, &mode);

        let validation_error =
            pollster::block_on(device.pop_error_scope()).map(|error| error.to_string());
        match &validation_error {
            Some(error) => tracing::warn!(%error, ?mode, "LOD programs failed validation"),
            None => tracing::info!(?mode, wireframe, "LOD programs built"),
        }

        Self {
            mode,
            wireframe,
            classify,
            commands,
            sphere_basic,
            sphere_tessellated,
            points,
            validation_error,
        }
    }

    /// Whether every program compiled and validated.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.validation_error.is_none()
    }

    /// Fails with the validation message of an invalid set.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::ProgramValidation`] if creation failed.
    pub fn ensure_valid(&self) -> RenderResult<()> {
        match &self.validation_error {
            Some(error) => Err(RenderError::ProgramValidation(error.clone())),
            None => Ok(()),
        }
    }

    /// Validation message of an invalid set.
    #[must_use]
    pub fn validation_error(&self) -> Option<&str> {
        self.validation_error.as_deref()
    }

    /// Mode the set was built for.
    #[must_use]
    pub fn mode(&self) -> &PipelineMode {
        &self.mode
    }

    /// Whether the sphere passes draw lines.
    #[must_use]
    pub fn wireframe(&self) -> bool {
        self.wireframe
    }

    fn module(device: &wgpu::Device, label: &str, source: String) -> wgpu::ShaderModule {
        device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(label),
            source: wgpu::ShaderSource::Wgsl(source.into()),
        })
    }

    fn stream_pipeline(
        device: &wgpu::Device,
        label: &str,
        layout: &wgpu::PipelineLayout,
        module: &wgpu::ShaderModule,
        entry_point: &str,
    ) -> wgpu::RenderPipeline {
        device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some(label),
            layout: Some(layout),
            vertex: wgpu::VertexState {
                module,
                entry_point,
                buffers: &[],
            },
            fragment: Some(wgpu::FragmentState {
                module,
                entry_point: "fs_discard",
                targets: &[Some(wgpu::ColorTargetState {
                    format: STREAM_TARGET_FORMAT,
                    blend: None,
                    write_mask: wgpu::ColorWrites::empty(),
                })],
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::PointList,
                ..Default::default()
            },
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
        })
    }

    fn classify_program(
        device: &wgpu::Device,
        layouts: &LodLayouts,
        defines: &ShaderDefines,
        strategy: ClassifyStrategy,
    ) -> StageProgram {
        let module = Self::module(device, "LOD Classify", LodShaders::classify(defines));
        let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("LOD Classify Pipeline Layout"),
            bind_group_layouts: &[
                &layouts.classify_scene,
                &layouts.classify_job,
                &layouts.classify_lod,
            ],
            push_constant_ranges: &[],
        });
        match strategy {
            ClassifyStrategy::Compute => {
                StageProgram::Compute(device.create_compute_pipeline(
                    &wgpu::ComputePipelineDescriptor {
                        label: Some("LOD Classify Compute"),
                        layout: Some(&layout),
                        module: &module,
                        entry_point: "classify_main",
                    },
                ))
            }
            ClassifyStrategy::VertexStream => StageProgram::VertexStream(Self::stream_pipeline(
                device,
                "LOD Classify Stream",
                &layout,
                &module,
                "classify_vertex",
            )),
        }
    }

    fn commands_program(
        device: &wgpu::Device,
        layouts: &LodLayouts,
        defines: &ShaderDefines,
        strategy: ClassifyStrategy,
    ) -> StageProgram {
        let module = Self::module(device, "LOD Commands", LodShaders::commands(defines));
        let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("LOD Commands Pipeline Layout"),
            bind_group_layouts: &[&layouts.commands],
            push_constant_ranges: &[],
        });
        match strategy {
            ClassifyStrategy::Compute => {
                StageProgram::Compute(device.create_compute_pipeline(
                    &wgpu::ComputePipelineDescriptor {
                        label: Some("LOD Commands Compute"),
                        layout: Some(&layout),
                        module: &module,
                        entry_point: "synthesize_main",
                    },
                ))
            }
            ClassifyStrategy::VertexStream => StageProgram::VertexStream(Self::stream_pipeline(
                device,
                "LOD Commands Stream",
                &layout,
                &module,
                "synthesize_vertex",
            )),
        }
    }

    fn draw_target() -> [Option<wgpu::ColorTargetState>; 1] {
        [Some(wgpu::ColorTargetState {
            format: COLOR_FORMAT,
            blend: Some(wgpu::BlendState::REPLACE),
            write_mask: wgpu::ColorWrites::ALL,
        })]
    }

    fn depth_state() -> wgpu::DepthStencilState {
        wgpu::DepthStencilState {
            format: DEPTH_FORMAT,
            depth_write_enabled: true,
            depth_compare: wgpu::CompareFunction::LessEqual,
            stencil: wgpu::StencilState::default(),
            bias: wgpu::DepthBiasState::default(),
        }
    }

    fn sphere_program(
        device: &wgpu::Device,
        layouts: &LodLayouts,
        defines: &ShaderDefines,
        variant: SphereVariant,
        wireframe: bool,
    ) -> wgpu::RenderPipeline {
        let (label, layout_label) = match variant {
            SphereVariant::Basic => ("LOD Sphere Mesh", "LOD Sphere Mesh Layout"),
            SphereVariant::Tessellated => ("LOD Sphere Tess", "LOD Sphere Tess Layout"),
        };
        let module = Self::module(device, label, LodShaders::sphere(defines, variant));
        let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some(layout_label),
            bind_group_layouts: &[&layouts.draw_scene, &layouts.draw_job, &layouts.draw_items],
            push_constant_ranges: &[],
        });
        let targets = Self::draw_target();

        device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some(label),
            layout: Some(&layout),
            vertex: wgpu::VertexState {
                module: &module,
                entry_point: "vs_sphere",
                buffers: &[],
            },
            fragment: Some(wgpu::FragmentState {
                module: &module,
                entry_point: "fs_sphere",
                targets: &targets,
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                front_face: wgpu::FrontFace::Ccw,
                cull_mode: Some(wgpu::Face::Back),
                polygon_mode: if wireframe {
                    wgpu::PolygonMode::Line
                } else {
                    wgpu::PolygonMode::Fill
                },
                ..Default::default()
            },
            depth_stencil: Some(Self::depth_state()),
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
        })
    }

    fn points_program(
        device: &wgpu::Device,
        layouts: &LodLayouts,
        defines: &ShaderDefines,
        mode: &PipelineMode,
    ) -> PointsProgram {
        let module = Self::module(device, "LOD Points", LodShaders::points(defines));
        let targets = Self::draw_target();
        let primitive = wgpu::PrimitiveState {
            topology: wgpu::PrimitiveTopology::PointList,
            ..Default::default()
        };

        match mode.item_fetch {
            ItemFetch::Storage => {
                let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                    label: Some("LOD Points Storage Layout"),
                    bind_group_layouts: &[
                        &layouts.draw_scene,
                        &layouts.draw_job,
                        &layouts.draw_items,
                    ],
                    push_constant_ranges: &[],
                });
                PointsProgram::Storage(device.create_render_pipeline(
                    &wgpu::RenderPipelineDescriptor {
                        label: Some("LOD Points Storage"),
                        layout: Some(&layout),
                        vertex: wgpu::VertexState {
                            module: &module,
                            entry_point: "vs_points_storage",
                            buffers: &[],
                        },
                        fragment: Some(wgpu::FragmentState {
                            module: &module,
                            entry_point: "fs_points",
                            targets: &targets,
                        }),
                        primitive,
                        depth_stencil: Some(Self::depth_state()),
                        multisample: wgpu::MultisampleState::default(),
                        multiview: None,
                    },
                ))
            }
            ItemFetch::VertexAttribute => {
                // Payload items and particle records share the texel layout,
                // so one vertex layout serves both data flows.
                let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                    label: Some("LOD Points Attribute Layout"),
                    bind_group_layouts: &[&layouts.draw_scene],
                    push_constant_ranges: &[],
                });
                let (entry_point, attributes): (&str, &[wgpu::VertexAttribute]) =
                    match mode.particle_format {
                        ParticleFormat::Full => ("vs_points_full", &FULL_ATTRIBUTES),
                        ParticleFormat::Compact => ("vs_points_compact", &COMPACT_ATTRIBUTES),
                    };
                let buffers = [wgpu::VertexBufferLayout {
                    array_stride: u64::from(mode.particle_format.particle_bytes()),
                    step_mode: wgpu::VertexStepMode::Vertex,
                    attributes,
                }];
                PointsProgram::VertexAttribute(device.create_render_pipeline(
                    &wgpu::RenderPipelineDescriptor {
                        label: Some("LOD Points Attribute"),
                        layout: Some(&layout),
                        vertex: wgpu::VertexState {
                            module: &module,
                            entry_point,
                            buffers: &buffers,
                        },
                        fragment: Some(wgpu::FragmentState {
                            module: &module,
                            entry_point: "fs_points",
                            targets: &targets,
                        }),
                        primitive,
                        depth_stencil: Some(Self::depth_state()),
                        multisample: wgpu::MultisampleState::default(),
                        multiview: None,
                    },
                ))
            }
        }
    }
}

const FULL_ATTRIBUTES: [wgpu::VertexAttribute; 2] =
    wgpu::vertex_attr_array![0 => Float32x4, 1 => Float32x4];
const COMPACT_ATTRIBUTES: [wgpu::VertexAttribute; 1] = wgpu::vertex_attr_array![0 => Float32x4];
