//! # LOD Shaders
//!
//! WGSL sources for the GPU side of the pipeline:
//! 1. Classify - per particle, picks a tier and appends to its buffer
//! 2. Commands - turns one job's counters into indirect draw records
//! 3. Sphere - draws MEDIUM (basic) and NEAR (tessellated) batches
//! 4. Points - draws the FAR tier, from storage or from vertex input
//!
//! Every module is composed as `defines + common + body`. The define header
//! is generated from the pipeline mode, so changing the data flow or the
//! particle format means composing and compiling a new set.
//!
//! ```text
//! const USE_INDICES: bool = true;
//! const TEXELS_PER_PARTICLE: u32 = 2u;
//! const ITEM_WORDS: u32 = 1u;
//! const BATCH_SIZE: u32 = 1024u;
//! ...
//! ```

use particle_lod_core::layout::{
    BASIC_INDICES, BASIC_VERTICES, BATCH_SIZE, TESS_INDICES, TESS_VERTICES,
};
use particle_lod_core::PipelineMode;

/// Compile-time constants prepended to every module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ShaderDefines {
    /// LOD buffers carry particle indices rather than particle texels.
    pub use_indices: bool,
    /// Texels per particle record.
    pub texels_per_particle: u32,
    /// `u32` words per LOD buffer item.
    pub item_words: u32,
    /// Units per full batch.
    pub batch_size: u32,
}

impl ShaderDefines {
    /// Defines for a pipeline mode.
    #[must_use]
    pub const fn from_mode(mode: &PipelineMode) -> Self {
        Self {
            use_indices: mode.uses_indices(),
            texels_per_particle: mode.texels_per_particle(),
            item_words: mode.item_words(),
            batch_size: BATCH_SIZE,
        }
    }

    /// The WGSL header.
    #[must_use]
    pub fn header(&self) -> String {
        format!(
            "const USE_INDICES: bool = {};\n\
             const TEXELS_PER_PARTICLE: u32 = {}u;\n\
             const ITEM_WORDS: u32 = {}u;\n\
             const BATCH_SIZE: u32 = {}u;\n\
             const BASIC_VERTICES: u32 = {BASIC_VERTICES}u;\n\
             const BASIC_INDICES: u32 = {BASIC_INDICES}u;\n\
             const TESS_VERTICES: u32 = {TESS_VERTICES}u;\n\
             const TESS_INDICES: u32 = {TESS_INDICES}u;\n",
            self.use_indices, self.texels_per_particle, self.item_words, self.batch_size,
        )
    }
}

/// Which sphere mesh a sphere module draws.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SphereVariant {
    /// Icosahedron, MEDIUM tier.
    Basic,
    /// Subdivided icosahedron refined toward the sphere, NEAR tier.
    Tessellated,
}

/// Composed WGSL modules.
pub struct LodShaders;

impl LodShaders {
    /// Classification module (`classify_main`, `classify_vertex`, `fs_discard`).
    #[must_use]
    pub fn classify(defines: &ShaderDefines) -> String {
        Self::compose(defines, &[CLASSIFY_WGSL])
    }

    /// Command synthesis module (`synthesize_main`, `synthesize_vertex`, `fs_discard`).
    #[must_use]
    pub fn commands(defines: &ShaderDefines) -> String {
        Self::compose(defines, &[COMMANDS_WGSL])
    }

    /// Sphere draw module (`vs_sphere`, `fs_sphere`).
    #[must_use]
    pub fn sphere(defines: &ShaderDefines, variant: SphereVariant) -> String {
        let unit = match variant {
            SphereVariant::Basic => {
                "const TESSELLATED: bool = false;\n\
                 const VERTICES_PER_UNIT: u32 = BASIC_VERTICES;\n"
            }
            SphereVariant::Tessellated => {
                "const TESSELLATED: bool = true;\n\
                 const VERTICES_PER_UNIT: u32 = TESS_VERTICES;\n"
            }
        };
        Self::compose(defines, &[unit, DRAW_COMMON_WGSL, SPHERE_WGSL])
    }

    /// Point draw module (`vs_points_storage`, `vs_points_compact`,
    /// `vs_points_full`, `fs_points`).
    #[must_use]
    pub fn points(defines: &ShaderDefines) -> String {
        Self::compose(defines, &[DRAW_COMMON_WGSL, POINTS_WGSL])
    }

    fn compose(defines: &ShaderDefines, parts: &[&str]) -> String {
        let mut source = defines.header();
        source.push_str(COMMON_WGSL);
        for part in parts {
            source.push_str(part);
        }
        source
    }
}

// ============================================================================
// COMMON - scene block, particle decoding, screen-space size
// ============================================================================

const COMMON_WGSL: &str = r#"
struct SceneData {
    view_proj: mat4x4<f32>,
    view: mat4x4<f32>,
    view_it: mat4x4<f32>,
    viewport: vec2<u32>,
    view_pixel_size: vec2<f32>,
    frustum: array<vec4<f32>, 6>,
    far_pixels: f32,
    near_pixels: f32,
    tess_pixels: f32,
    particle_size: f32,
}

struct DrawArrays {
    count: u32,
    instance_count: u32,
    first: u32,
    first_instance: u32,
}

struct DrawElements {
    count: u32,
    instance_count: u32,
    first_index: u32,
    base_vertex: i32,
    first_instance: u32,
    _pad0: u32,
    _pad1: u32,
    _pad2: u32,
}

struct DrawCounters {
    far: u32,
    medium: u32,
    near: u32,
    _pad: u32,
}

struct DrawIndirects {
    counters: DrawCounters,
    far_array: DrawArrays,
    far_indexed: DrawElements,
    medium_full: DrawElements,
    medium_rest: DrawElements,
    near_full: DrawElements,
    near_rest: DrawElements,
}

struct ParticleData {
    center: vec3<f32>,
    radius: f32,
    color: vec4<f32>,
}

@group(0) @binding(0) var<uniform> scene: SceneData;
@group(0) @binding(1) var<storage, read> particles: array<vec4<f32>>;

fn decode_particle(t0: vec4<f32>, t1: vec4<f32>) -> ParticleData {
    var p: ParticleData;
    p.center = t0.xyz;
    if TEXELS_PER_PARTICLE == 1u {
        p.radius = scene.particle_size;
        p.color = unpack4x8unorm(bitcast<u32>(t0.w));
    } else {
        p.radius = t0.w * scene.particle_size;
        p.color = t1;
    }
    return p;
}

fn load_particle(index: u32) -> ParticleData {
    let base = index * TEXELS_PER_PARTICLE;
    let t0 = particles[base];
    var t1 = t0;
    if TEXELS_PER_PARTICLE > 1u {
        t1 = particles[base + 1u];
    }
    return decode_particle(t0, t1);
}

// Largest screen extent in pixels; 0 behind the eye.
fn apparent_size(p: ParticleData) -> f32 {
    let h = scene.view_proj * vec4<f32>(p.center, 1.0);
    if h.w <= 0.0 {
        return 0.0;
    }
    let px = 2.0 * p.radius * scene.view_pixel_size / h.w;
    return max(px.x, px.y);
}
"#;

// ============================================================================
// CLASSIFY - one invocation (or one inert vertex) per particle of the job
// ============================================================================

const CLASSIFY_WGSL: &str = r#"
struct JobParams {
    offset: u32,
    count: u32,
    _pad0: u32,
    _pad1: u32,
}

struct LodCounters {
    far: atomic<u32>,
    medium: atomic<u32>,
    near: atomic<u32>,
    _pad: u32,
}

const TIER_FAR: u32 = 0u;
const TIER_MEDIUM: u32 = 1u;
const TIER_NEAR: u32 = 2u;
const WORKGROUP_SIZE: u32 = 256u;

@group(0) @binding(2) var<storage, read> particle_indices: array<u32>;

@group(1) @binding(0) var<uniform> job: JobParams;
@group(1) @binding(1) var<storage, read_write> counters: LodCounters;

@group(2) @binding(0) var<storage, read_write> lod_points: array<u32>;
@group(2) @binding(1) var<storage, read_write> lod_basic: array<u32>;
@group(2) @binding(2) var<storage, read_write> lod_tess: array<u32>;

// FAR is checked first: equality with far_pixels is FAR, with near_pixels NEAR.
fn classify_tier(size: f32) -> u32 {
    if size <= scene.far_pixels {
        return TIER_FAR;
    }
    if size >= scene.near_pixels {
        return TIER_NEAR;
    }
    return TIER_MEDIUM;
}

fn append_slot(tier: u32) -> u32 {
    var slot = 0u;
    switch tier {
        case 0u: {
            slot = atomicAdd(&counters.far, 1u);
        }
        case 1u: {
            slot = atomicAdd(&counters.medium, 1u);
        }
        default: {
            slot = atomicAdd(&counters.near, 1u);
        }
    }
    return slot;
}

fn write_word(tier: u32, word: u32, value: u32) {
    switch tier {
        case 0u: {
            lod_points[word] = value;
        }
        case 1u: {
            lod_basic[word] = value;
        }
        default: {
            lod_tess[word] = value;
        }
    }
}

fn classify_particle(local_id: u32) {
    if local_id >= job.count {
        return;
    }
    var source = job.offset + local_id;
    if USE_INDICES {
        source = particle_indices[source];
    }

    let particle = load_particle(source);
    let tier = classify_tier(apparent_size(particle));
    let slot = append_slot(tier);

    if USE_INDICES {
        write_word(tier, slot, source);
    } else {
        let base = source * TEXELS_PER_PARTICLE;
        for (var t = 0u; t < TEXELS_PER_PARTICLE; t = t + 1u) {
            let texel = bitcast<vec4<u32>>(particles[base + t]);
            let word = slot * ITEM_WORDS + t * 4u;
            write_word(tier, word, texel.x);
            write_word(tier, word + 1u, texel.y);
            write_word(tier, word + 2u, texel.z);
            write_word(tier, word + 3u, texel.w);
        }
    }
}

@compute @workgroup_size(256)
fn classify_main(
    @builtin(global_invocation_id) gid: vec3<u32>,
    @builtin(num_workgroups) groups: vec3<u32>
) {
    classify_particle(gid.x + gid.y * groups.x * WORKGROUP_SIZE);
}

// Vertex-stream variant: the point is placed outside the clip volume.
@vertex
fn classify_vertex(@builtin(vertex_index) vid: u32) -> @builtin(position) vec4<f32> {
    classify_particle(vid);
    return vec4<f32>(2.0, 2.0, 2.0, 1.0);
}

@fragment
fn fs_discard() -> @location(0) vec4<f32> {
    return vec4<f32>(0.0);
}
"#;

// ============================================================================
// COMMANDS - single invocation per job
// ============================================================================

const COMMANDS_WGSL: &str = r#"
@group(0) @binding(2) var<storage, read_write> cmds: DrawIndirects;

fn elements(count: u32, instances: u32) -> DrawElements {
    return DrawElements(count, instances, 0u, 0i, 0u, 0u, 0u, 0u);
}

fn synthesize() {
    let c = cmds.counters;
    cmds.far_array = DrawArrays(c.far, 1u, 0u, 0u);
    cmds.far_indexed = elements(c.far, 1u);
    cmds.medium_full = elements(BATCH_SIZE * BASIC_INDICES, c.medium / BATCH_SIZE);
    cmds.medium_rest = elements((c.medium % BATCH_SIZE) * BASIC_INDICES, 1u);
    cmds.near_full = elements(BATCH_SIZE * TESS_INDICES, c.near / BATCH_SIZE);
    cmds.near_rest = elements((c.near % BATCH_SIZE) * TESS_INDICES, 1u);
}

@compute @workgroup_size(1)
fn synthesize_main() {
    synthesize();
}

@vertex
fn synthesize_vertex() -> @builtin(position) vec4<f32> {
    synthesize();
    return vec4<f32>(2.0, 2.0, 2.0, 1.0);
}

@fragment
fn fs_discard() -> @location(0) vec4<f32> {
    return vec4<f32>(0.0);
}
"#;

// ============================================================================
// DRAW COMMON - job block, sub-draw toggle, item fetch
// ============================================================================

const DRAW_COMMON_WGSL: &str = r#"
struct DrawToggle {
    use_cmd_offset: u32,
    _pad0: u32,
    _pad1: u32,
    _pad2: u32,
}

@group(1) @binding(0) var<uniform> cmds: DrawIndirects;
@group(1) @binding(1) var<uniform> toggle: DrawToggle;

@group(2) @binding(0) var<storage, read> lod_items: array<u32>;
@group(2) @binding(1) var<storage, read> unit_vertices: array<vec4<f32>>;

fn item_texel(word: u32) -> vec4<f32> {
    return bitcast<vec4<f32>>(vec4<u32>(
        lod_items[word],
        lod_items[word + 1u],
        lod_items[word + 2u],
        lod_items[word + 3u]
    ));
}

fn fetch_item(slot: u32) -> ParticleData {
    if USE_INDICES {
        return load_particle(lod_items[slot]);
    }
    let base = slot * ITEM_WORDS;
    let t0 = item_texel(base);
    var t1 = t0;
    if TEXELS_PER_PARTICLE > 1u {
        t1 = item_texel(base + 4u);
    }
    return decode_particle(t0, t1);
}
"#;

// ============================================================================
// SPHERE - batched icosahedron draws
// ============================================================================

const SPHERE_WGSL: &str = r#"
struct SphereOutput {
    @builtin(position) clip: vec4<f32>,
    @location(0) color: vec4<f32>,
    @location(1) normal: vec3<f32>,
}

fn full_instances() -> u32 {
    if TESSELLATED {
        return cmds.near_full.instance_count;
    }
    return cmds.medium_full.instance_count;
}

// Full batches address by instance; the remainder starts past them.
fn item_slot(vid: u32, iid: u32) -> u32 {
    let unit_index = vid / VERTICES_PER_UNIT;
    if toggle.use_cmd_offset != 0u {
        return full_instances() * BATCH_SIZE + unit_index;
    }
    return iid * BATCH_SIZE + unit_index;
}

@vertex
fn vs_sphere(
    @builtin(vertex_index) vid: u32,
    @builtin(instance_index) iid: u32
) -> SphereOutput {
    let particle = fetch_item(item_slot(vid, iid));
    let corner = unit_vertices[vid % VERTICES_PER_UNIT].xyz;
    let dir = normalize(corner);

    var shape = corner;
    if TESSELLATED {
        let refine = clamp(apparent_size(particle) / max(scene.tess_pixels, 1.0), 0.0, 1.0);
        shape = mix(corner, dir, refine);
    }

    let world = particle.center + shape * particle.radius;
    var out: SphereOutput;
    out.clip = scene.view_proj * vec4<f32>(world, 1.0);
    out.color = particle.color;
    out.normal = (scene.view_it * vec4<f32>(dir, 0.0)).xyz;
    return out;
}

@fragment
fn fs_sphere(input: SphereOutput) -> @location(0) vec4<f32> {
    let n = normalize(input.normal);
    let light = max(dot(n, normalize(vec3<f32>(0.3, 0.5, 1.0))), 0.0) * 0.8 + 0.2;
    return vec4<f32>(input.color.rgb * light, input.color.a);
}
"#;

// ============================================================================
// POINTS - FAR tier, one point per particle
// ============================================================================

const POINTS_WGSL: &str = r#"
struct PointOutput {
    @builtin(position) clip: vec4<f32>,
    @location(0) color: vec4<f32>,
}

fn point_output(p: ParticleData) -> PointOutput {
    var out: PointOutput;
    out.clip = scene.view_proj * vec4<f32>(p.center, 1.0);
    out.color = p.color;
    return out;
}

@vertex
fn vs_points_storage(@builtin(vertex_index) vid: u32) -> PointOutput {
    return point_output(fetch_item(vid));
}

@vertex
fn vs_points_compact(@location(0) t0: vec4<f32>) -> PointOutput {
    return point_output(decode_particle(t0, t0));
}

@vertex
fn vs_points_full(@location(0) t0: vec4<f32>, @location(1) t1: vec4<f32>) -> PointOutput {
    return point_output(decode_particle(t0, t1));
}

@fragment
fn fs_points(input: PointOutput) -> @location(0) vec4<f32> {
    return input.color;
}
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use particle_lod_core::{DataFlow, ParticleFormat};

    #[test]
    fn test_header_follows_mode() {
        let mut mode = PipelineMode::default();
        let header = ShaderDefines::from_mode(&mode).header();
        assert!(header.contains("const USE_INDICES: bool = true;"));
        assert!(header.contains("const TEXELS_PER_PARTICLE: u32 = 2u;"));
        assert!(header.contains("const ITEM_WORDS: u32 = 1u;"));
        assert!(header.contains("const BATCH_SIZE: u32 = 1024u;"));

        mode.data_flow = DataFlow::Payload;
        mode.particle_format = ParticleFormat::Compact;
        let header = ShaderDefines::from_mode(&mode).header();
        assert!(header.contains("const USE_INDICES: bool = false;"));
        assert!(header.contains("const TEXELS_PER_PARTICLE: u32 = 1u;"));
        assert!(header.contains("const ITEM_WORDS: u32 = 4u;"));
    }

    #[test]
    fn test_header_has_one_const_per_line() {
        let header = ShaderDefines::from_mode(&PipelineMode::default()).header();
        let lines: Vec<&str> = header.lines().collect();
        assert_eq!(lines.len(), 8);
        assert!(lines.iter().all(|line| line.starts_with("const ") && line.ends_with(';')));
        assert!(header.ends_with(";\n"));
        assert!(lines.contains(&format!("const TESS_INDICES: u32 = {TESS_INDICES}u;").as_str()));
    }

    #[test]
    fn test_sphere_variants_pick_unit_size() {
        let defines = ShaderDefines::from_mode(&PipelineMode::default());
        let basic = LodShaders::sphere(&defines, SphereVariant::Basic);
        let tess = LodShaders::sphere(&defines, SphereVariant::Tessellated);
        assert!(basic.contains("const VERTICES_PER_UNIT: u32 = BASIC_VERTICES;"));
        assert!(tess.contains("const TESSELLATED: bool = true;"));
        assert!(tess.contains("fn vs_sphere"));
    }

    #[test]
    fn test_modules_start_with_defines() {
        let defines = ShaderDefines::from_mode(&PipelineMode::default());
        for source in [
            LodShaders::classify(&defines),
            LodShaders::commands(&defines),
            LodShaders::points(&defines),
        ] {
            assert!(source.starts_with("const USE_INDICES"));
            assert!(source.contains("struct SceneData"));
        }
    }
}
