//! # Sphere Geometry
//!
//! The two sphere meshes the draw passes instance:
//!
//! - **Basic**: a unit icosahedron (12 vertices, 20 triangles) for the
//!   MEDIUM tier.
//! - **Tessellated**: the same icosahedron with every face split into four,
//!   twice. New vertices stay on the flat faces; the vertex program pushes
//!   them out to the sphere as the particle grows on screen.
//!
//! Both are drawn in batches: the index buffer repeats the mesh
//! [`BATCH_SIZE`] times, each copy offset by the unit's vertex count, so the
//! vertex program recovers the unit from `vertex_index / vertices`.

use std::collections::HashMap;

use glam::Vec3;
use particle_lod_core::layout::{
    BASIC_INDICES, BASIC_VERTICES, BATCH_SIZE, TESS_INDICES, TESS_SUBDIVISIONS, TESS_VERTICES,
};

const ICOSAHEDRON_VERTICES: [[f32; 3]; 12] = [
    [0.000, 0.000, 1.000],
    [0.894, 0.000, 0.447],
    [0.276, 0.851, 0.447],
    [-0.724, 0.526, 0.447],
    [-0.724, -0.526, 0.447],
    [0.276, -0.851, 0.447],
    [0.724, 0.526, -0.447],
    [-0.276, 0.851, -0.447],
    [-0.894, 0.000, -0.447],
    [-0.276, -0.851, -0.447],
    [0.724, -0.526, -0.447],
    [0.000, 0.000, -1.000],
];

// Counter-clockwise seen from outside.
const ICOSAHEDRON_FACES: [[u32; 3]; 20] = [
    [0, 1, 2],
    [0, 2, 3],
    [0, 3, 4],
    [0, 4, 5],
    [0, 5, 1],
    [7, 6, 11],
    [8, 7, 11],
    [9, 8, 11],
    [10, 9, 11],
    [6, 10, 11],
    [6, 2, 1],
    [7, 3, 2],
    [8, 4, 3],
    [9, 5, 4],
    [10, 1, 5],
    [6, 7, 2],
    [7, 8, 3],
    [8, 9, 4],
    [9, 10, 5],
    [10, 6, 1],
];

/// One sphere unit: vertices (`w = 1`) and triangle indices.
#[derive(Debug, Clone, PartialEq)]
pub struct SphereMesh {
    /// Vertex positions, padded to `vec4` for storage binding.
    pub vertices: Vec<[f32; 4]>,
    /// Triangle list indices.
    pub indices: Vec<u32>,
}

impl SphereMesh {
    /// Unit icosahedron.
    #[must_use]
    pub fn icosahedron() -> Self {
        Self {
            vertices: ICOSAHEDRON_VERTICES
                .iter()
                .map(|&v| Vec3::from(v).normalize().extend(1.0).to_array())
                .collect(),
            indices: ICOSAHEDRON_FACES.iter().flatten().copied().collect(),
        }
    }

    /// Icosahedron with `levels` rounds of four-way face splits.
    ///
    /// Edge midpoints are shared between neighbouring faces and are not
    /// projected onto the sphere.
    #[must_use]
    pub fn subdivided(levels: u32) -> Self {
        let mut mesh = Self::icosahedron();
        for _ in 0..levels {
            mesh = mesh.split_faces();
        }
        mesh
    }

    /// Mesh for the MEDIUM tier.
    #[must_use]
    pub fn basic() -> Self {
        Self::icosahedron()
    }

    /// Mesh for the NEAR tier.
    #[must_use]
    pub fn tessellated() -> Self {
        Self::subdivided(TESS_SUBDIVISIONS)
    }

    #[allow(clippy::cast_possible_truncation)]
    fn split_faces(&self) -> Self {
        let mut vertices = self.vertices.clone();
        let mut midpoints: HashMap<(u32, u32), u32> = HashMap::new();
        let mut indices = Vec::with_capacity(self.indices.len() * 4);

        let mut midpoint = |a: u32, b: u32, vertices: &mut Vec<[f32; 4]>| -> u32 {
            let key = (a.min(b), a.max(b));
            *midpoints.entry(key).or_insert_with(|| {
                let pa = Vec3::from_slice(&vertices[a as usize]);
                let pb = Vec3::from_slice(&vertices[b as usize]);
                vertices.push(((pa + pb) * 0.5).extend(1.0).to_array());
                (vertices.len() - 1) as u32
            })
        };

        for tri in self.indices.chunks_exact(3) {
            let (a, b, c) = (tri[0], tri[1], tri[2]);
            let ab = midpoint(a, b, &mut vertices);
            let bc = midpoint(b, c, &mut vertices);
            let ca = midpoint(c, a, &mut vertices);
            indices.extend_from_slice(&[a, ab, ca, ab, b, bc, ca, bc, c, ab, bc, ca]);
        }

        Self { vertices, indices }
    }

    /// Vertex count.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn vertex_count(&self) -> u32 {
        self.vertices.len() as u32
    }

    /// Index count.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn index_count(&self) -> u32 {
        self.indices.len() as u32
    }

    /// Index buffer for `batch` units, unit `u` offset by `u * vertices`.
    #[must_use]
    pub fn batched_indices(&self, batch: u32) -> Vec<u32> {
        let stride = self.vertex_count();
        (0..batch)
            .flat_map(|unit| self.indices.iter().map(move |&i| unit * stride + i))
            .collect()
    }
}

/// Both meshes with their batched index buffers.
#[derive(Debug, Clone)]
pub struct SphereGeometry {
    /// MEDIUM tier mesh.
    pub basic: SphereMesh,
    /// NEAR tier mesh.
    pub tessellated: SphereMesh,
    /// Batched basic indices.
    pub basic_batch: Vec<u32>,
    /// Batched tessellated indices.
    pub tessellated_batch: Vec<u32>,
}

impl SphereGeometry {
    /// Builds both meshes batched [`BATCH_SIZE`] times.
    #[must_use]
    pub fn new() -> Self {
        let basic = SphereMesh::basic();
        let tessellated = SphereMesh::tessellated();
        debug_assert_eq!(basic.vertex_count(), BASIC_VERTICES);
        debug_assert_eq!(basic.index_count(), BASIC_INDICES);
        debug_assert_eq!(tessellated.vertex_count(), TESS_VERTICES);
        debug_assert_eq!(tessellated.index_count(), TESS_INDICES);

        Self {
            basic_batch: basic.batched_indices(BATCH_SIZE),
            tessellated_batch: tessellated.batched_indices(BATCH_SIZE),
            basic,
            tessellated,
        }
    }
}

impl Default for SphereGeometry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_icosahedron_counts() {
        let mesh = SphereMesh::icosahedron();
        assert_eq!(mesh.vertex_count(), BASIC_VERTICES);
        assert_eq!(mesh.index_count(), BASIC_INDICES);
        for v in &mesh.vertices {
            assert!((Vec3::from_slice(v).length() - 1.0).abs() < 1e-5);
        }
    }

    #[test]
    fn test_subdivision_counts() {
        let mesh = SphereMesh::tessellated();
        assert_eq!(mesh.vertex_count(), TESS_VERTICES);
        assert_eq!(mesh.index_count(), TESS_INDICES);
        assert_eq!(SphereMesh::subdivided(1).vertex_count(), 42);
    }

    #[test]
    fn test_subdivided_vertices_inside_unit_sphere() {
        let mesh = SphereMesh::tessellated();
        for v in &mesh.vertices {
            let len = Vec3::from_slice(v).length();
            assert!(len > 0.75 && len <= 1.0 + 1e-5, "vertex length {len}");
        }
    }

    #[test]
    fn test_faces_wind_outward() {
        for mesh in [SphereMesh::basic(), SphereMesh::tessellated()] {
            for tri in mesh.indices.chunks_exact(3) {
                let [a, b, c] = [tri[0], tri[1], tri[2]]
                    .map(|i| Vec3::from_slice(&mesh.vertices[i as usize]));
                let normal = (b - a).cross(c - a);
                assert!(normal.dot(a + b + c) > 0.0);
            }
        }
    }

    #[test]
    fn test_batched_indices_offset_units() {
        let mesh = SphereMesh::basic();
        let batch = mesh.batched_indices(3);
        assert_eq!(batch.len(), 3 * 60);
        assert_eq!(batch[60], mesh.indices[0] + 12);
        assert_eq!(batch[179] / 12, 2);
        assert!(batch.iter().all(|&i| i < 36));
    }
}
