//! Parses and validates every composed WGSL module with naga, for every
//! data flow and particle format. Runs without a GPU.

use naga::valid::{Capabilities, ValidationFlags, Validator};
use particle_lod_core::{DataFlow, ParticleFormat, PipelineMode};
use particle_lod_rendering::{LodShaders, ShaderDefines, SphereVariant};

fn all_defines() -> Vec<ShaderDefines> {
    let mut out = Vec::new();
    for data_flow in [DataFlow::Indices, DataFlow::Payload] {
        for particle_format in [ParticleFormat::Full, ParticleFormat::Compact] {
            let mode = PipelineMode {
                data_flow,
                particle_format,
                ..PipelineMode::default()
            };
            out.push(ShaderDefines::from_mode(&mode));
        }
    }
    out
}

fn validate(label: &str, source: &str) -> naga::Module {
    let module = match naga::front::wgsl::parse_str(source) {
        Ok(module) => module,
        Err(error) => panic!("{label}: {}", error.emit_to_string(source)),
    };
    if let Err(error) =
        Validator::new(ValidationFlags::all(), Capabilities::all()).validate(&module)
    {
        panic!("{label}: {error:?}");
    }
    module
}

fn entry_points(module: &naga::Module) -> Vec<&str> {
    module.entry_points.iter().map(|ep| ep.name.as_str()).collect()
}

#[test]
fn test_classify_modules_validate() {
    for defines in all_defines() {
        let module = validate(&format!("classify {defines:?}"), &LodShaders::classify(&defines));
        let names = entry_points(&module);
        for expected in ["classify_main", "classify_vertex", "fs_discard"] {
            assert!(names.contains(&expected), "missing {expected}");
        }
    }
}

#[test]
fn test_classify_workgroup_matches_host() {
    let defines = all_defines()[0];
    let module = validate("classify", &LodShaders::classify(&defines));
    let main = module
        .entry_points
        .iter()
        .find(|ep| ep.name == "classify_main")
        .unwrap();
    assert_eq!(main.workgroup_size, [particle_lod_core::classify::WORKGROUP_SIZE, 1, 1]);
}

#[test]
fn test_commands_modules_validate() {
    for defines in all_defines() {
        let module = validate(&format!("commands {defines:?}"), &LodShaders::commands(&defines));
        let names = entry_points(&module);
        assert!(names.contains(&"synthesize_main"));
        assert!(names.contains(&"synthesize_vertex"));
    }
}

#[test]
fn test_sphere_modules_validate() {
    for defines in all_defines() {
        for variant in [SphereVariant::Basic, SphereVariant::Tessellated] {
            let module = validate(
                &format!("sphere {variant:?} {defines:?}"),
                &LodShaders::sphere(&defines, variant),
            );
            assert_eq!(entry_points(&module), ["vs_sphere", "fs_sphere"]);
        }
    }
}

#[test]
fn test_points_modules_validate() {
    for defines in all_defines() {
        let module = validate(&format!("points {defines:?}"), &LodShaders::points(&defines));
        let names = entry_points(&module);
        for expected in ["vs_points_storage", "vs_points_compact", "vs_points_full", "fs_points"] {
            assert!(names.contains(&expected), "missing {expected}");
        }
    }
}

#[test]
fn test_shared_records_match_host_layout() {
    use particle_lod_core::layout::{DrawIndirects, SceneData};

    let defines = all_defines()[0];
    let module = validate("commands", &LodShaders::commands(&defines));
    let mut layouter = naga::proc::Layouter::default();
    layouter.update(module.to_ctx()).unwrap();

    let find = |name: &str| {
        module
            .types
            .iter()
            .find(|(_, ty)| ty.name.as_deref() == Some(name))
            .unwrap()
    };
    let size_of = |name: &str| layouter[find(name).0].size as usize;
    assert_eq!(size_of("DrawIndirects"), DrawIndirects::SIZE);
    assert_eq!(size_of("SceneData"), SceneData::SIZE);
    assert_eq!(size_of("DrawElements"), 32);

    let naga::TypeInner::Struct { members, .. } = &find("DrawIndirects").1.inner else {
        panic!("DrawIndirects is not a struct");
    };
    let offset_of = |name: &str| {
        u64::from(members.iter().find(|m| m.name.as_deref() == Some(name)).unwrap().offset)
    };
    assert_eq!(offset_of("counters"), DrawIndirects::COUNTERS_OFFSET);
    assert_eq!(offset_of("far_array"), DrawIndirects::FAR_ARRAY_OFFSET);
    assert_eq!(offset_of("far_indexed"), DrawIndirects::FAR_INDEXED_OFFSET);
    assert_eq!(offset_of("medium_full"), DrawIndirects::MEDIUM_FULL_OFFSET);
    assert_eq!(offset_of("medium_rest"), DrawIndirects::MEDIUM_REST_OFFSET);
    assert_eq!(offset_of("near_full"), DrawIndirects::NEAR_FULL_OFFSET);
    assert_eq!(offset_of("near_rest"), DrawIndirects::NEAR_REST_OFFSET);
}
