//! Scene uniform construction.
//!
//! Builds the per-frame [`SceneData`] block from a camera, the viewport and
//! the tier thresholds. Projections use the 0..1 clip depth range.

use glam::{Mat4, Vec3, Vec4};

use crate::config::{CameraConfig, LodThresholds};
use crate::layout::SceneData;

/// View and projection for one frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SceneCamera {
    /// World to view.
    pub view: Mat4,
    /// View to clip.
    pub projection: Mat4,
    /// Far clip plane distance.
    pub far_plane: f32,
}

impl SceneCamera {
    /// Right-handed look-at camera with a perspective projection.
    #[must_use]
    pub fn look_at(
        eye: Vec3,
        target: Vec3,
        fov_degrees: f32,
        viewport: [u32; 2],
        near_plane: f32,
        far_plane: f32,
    ) -> Self {
        let aspect = viewport[0] as f32 / viewport[1].max(1) as f32;
        Self {
            view: Mat4::look_at_rh(eye, target, Vec3::Y),
            projection: Mat4::perspective_rh(
                fov_degrees.to_radians(),
                aspect,
                near_plane,
                far_plane,
            ),
            far_plane,
        }
    }

    /// Camera for `frame`, orbiting the target around the Y axis.
    #[must_use]
    pub fn from_config(camera: &CameraConfig, viewport: [u32; 2], frame: u32) -> Self {
        let target = Vec3::from(camera.target);
        let angle = (camera.orbit_degrees_per_frame * frame as f32).to_radians();
        let offset = glam::Quat::from_rotation_y(angle) * (Vec3::from(camera.eye) - target);
        Self::look_at(
            target + offset,
            target,
            camera.fov_degrees,
            viewport,
            camera.near_plane,
            camera.far_plane,
        )
    }

    /// Projection * view.
    #[must_use]
    pub fn view_proj(&self) -> Mat4 {
        self.projection * self.view
    }
}

impl SceneData {
    /// Builds the scene block for one frame.
    #[must_use]
    pub fn new(camera: &SceneCamera, viewport: [u32; 2], thresholds: &LodThresholds) -> Self {
        let view_proj = camera.view_proj();
        let view_pixel_size = view_pixel_size(&camera.projection, viewport, camera.far_plane);
        Self {
            view_proj: view_proj.to_cols_array_2d(),
            view: camera.view.to_cols_array_2d(),
            view_it: camera.view.inverse().transpose().to_cols_array_2d(),
            viewport,
            view_pixel_size,
            frustum: extract_frustum_planes(&view_proj.to_cols_array_2d()),
            far_pixels: thresholds.far_pixels,
            near_pixels: thresholds.near_pixels,
            tess_pixels: thresholds.tess_pixels,
            particle_size: thresholds.particle_size,
        }
    }
}

/// Pixels covered by one world unit at unit clip-space `w`.
///
/// Projects a point at the far plane and scales its NDC extent back by the
/// far distance, so `2 * radius * result / clip.w` is a footprint in pixels.
#[must_use]
pub fn view_pixel_size(projection: &Mat4, viewport: [u32; 2], far_plane: f32) -> [f32; 2] {
    let h = *projection * Vec4::new(1.0, 1.0, -far_plane, 1.0);
    let ndc = (h.truncate().truncate() / h.w).abs();
    let size = ndc * glam::Vec2::new(viewport[0] as f32, viewport[1] as f32) * far_plane * 0.5;
    size.to_array()
}

/// Extracts normalized frustum planes from a column-major view-projection.
///
/// Planes point inward: left, right, bottom, top, near, far.
#[must_use]
pub fn extract_frustum_planes(m: &[[f32; 4]; 4]) -> [[f32; 4]; 6] {
    let row = |r: usize| [m[0][r], m[1][r], m[2][r], m[3][r]];
    let (r0, r1, r2, r3) = (row(0), row(1), row(2), row(3));
    let add = |a: [f32; 4], b: [f32; 4]| [a[0] + b[0], a[1] + b[1], a[2] + b[2], a[3] + b[3]];
    let sub = |a: [f32; 4], b: [f32; 4]| [a[0] - b[0], a[1] - b[1], a[2] - b[2], a[3] - b[3]];

    // Clip depth is 0..w, so the near plane is the z row alone.
    let mut planes = [
        add(r3, r0),
        sub(r3, r0),
        add(r3, r1),
        sub(r3, r1),
        r2,
        sub(r3, r2),
    ];

    for plane in &mut planes {
        let len = (plane[0] * plane[0] + plane[1] * plane[1] + plane[2] * plane[2]).sqrt();
        if len > 0.0 {
            for value in plane.iter_mut() {
                *value /= len;
            }
        }
    }

    planes
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plane_distance(plane: [f32; 4], point: Vec3) -> f32 {
        plane[0] * point.x + plane[1] * point.y + plane[2] * point.z + plane[3]
    }

    #[test]
    fn test_view_pixel_size_matches_half_viewport() {
        // With a 90 degree fov the NDC extent of one unit at w = 1 is the
        // half-viewport on both axes.
        let camera = SceneCamera::look_at(Vec3::Z, Vec3::ZERO, 90.0, [800, 600], 0.1, 1000.0);
        let size = view_pixel_size(&camera.projection, [800, 600], camera.far_plane);
        assert!((size[0] - 300.0).abs() < 1e-2, "{size:?}");
        assert!((size[1] - 300.0).abs() < 1e-2, "{size:?}");
    }

    #[test]
    fn test_frustum_planes_normalized_and_contain_target() {
        let camera = SceneCamera::look_at(
            Vec3::new(10.0, 5.0, 20.0),
            Vec3::ZERO,
            60.0,
            [1024, 768],
            0.1,
            1000.0,
        );
        let planes = extract_frustum_planes(&camera.view_proj().to_cols_array_2d());
        for plane in planes {
            let len = Vec3::new(plane[0], plane[1], plane[2]).length();
            assert!((len - 1.0).abs() < 1e-4);
            assert!(plane_distance(plane, Vec3::ZERO) > 0.0);
        }
        // Behind the eye is outside the near plane.
        assert!(plane_distance(planes[4], Vec3::new(20.0, 10.0, 40.0)) < 0.0);
    }

    #[test]
    fn test_scene_data_carries_thresholds() {
        let thresholds = LodThresholds {
            near_pixels: 12.0,
            far_pixels: 2.0,
            tess_pixels: 30.0,
            particle_size: 0.5,
        };
        let camera = SceneCamera::from_config(&CameraConfig::default(), [1024, 768], 0);
        let scene = SceneData::new(&camera, [1024, 768], &thresholds);
        assert_eq!(scene.viewport, [1024, 768]);
        assert!((scene.near_pixels - 12.0).abs() < f32::EPSILON);
        assert!((scene.far_pixels - 2.0).abs() < f32::EPSILON);
        assert!((scene.tess_pixels - 30.0).abs() < f32::EPSILON);
        assert!((scene.particle_size - 0.5).abs() < f32::EPSILON);
        assert_eq!(scene.view_proj, camera.view_proj().to_cols_array_2d());
    }

    #[test]
    fn test_orbit_keeps_distance() {
        let config = CameraConfig {
            orbit_degrees_per_frame: 45.0,
            ..CameraConfig::default()
        };
        let first = SceneCamera::from_config(&config, [640, 480], 0);
        let later = SceneCamera::from_config(&config, [640, 480], 3);
        let eye = |camera: &SceneCamera| camera.view.inverse().w_axis.truncate();
        assert!((eye(&first).length() - eye(&later).length()).abs() < 1e-3);
        assert!(eye(&first).distance(eye(&later)) > 1.0);
    }
}
