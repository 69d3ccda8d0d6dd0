use glam::{Mat4, Vec3, Vec4};

use crate::handles::{ResourceId, ShaderId};

/// Six view-frustum planes in `ax + by + cz + d >= 0` form, normals pointing inward.
#[derive(Clone, Copy, Debug)]
pub struct Frustum {
    pub planes: [Vec4; 6],
}

impl Frustum {
    /// Gribb-Hartmann extraction from a combined view-projection matrix
    /// (0..1 depth range).
    pub fn from_view_proj(view_proj: Mat4) -> Self {
        let r0 = view_proj.row(0);
        let r1 = view_proj.row(1);
        let r2 = view_proj.row(2);
        let r3 = view_proj.row(3);
        let mut planes = [r3 + r0, r3 - r0, r3 + r1, r3 - r1, r2, r3 - r2];
        for plane in &mut planes {
            let len = plane.truncate().length();
            if len > f32::EPSILON {
                *plane /= len;
            }
        }
        Self { planes }
    }

    pub fn contains_sphere(&self, center: Vec3, radius: f32) -> bool {
        self.planes
            .iter()
            .all(|plane| plane.truncate().dot(center) + plane.w >= -radius)
    }
}

/// One queued render viewpoint, consumed within the frame it was enqueued.
#[derive(Clone, Debug)]
pub struct RenderCamera {
    pub name: String,
    pub view: Mat4,
    pub projection: Mat4,
    pub near: f32,
    pub far: f32,
    pub frustum: Frustum,
    pub target: Option<ResourceId>,
    pub forced_shader: Option<ShaderId>,
}

impl RenderCamera {
    /// The frustum is derived here, at enqueue time, so later light/geometry
    /// culling sees exactly the matrices the caller handed in.
    pub fn new(view: Mat4, projection: Mat4, near: f32, far: f32) -> Self {
        let far = far.max(near + 1e-4);
        Self {
            name: String::new(),
            view,
            projection,
            near,
            far,
            frustum: Frustum::from_view_proj(projection * view),
            target: None,
            forced_shader: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_target(mut self, target: ResourceId) -> Self {
        self.target = Some(target);
        self
    }

    pub fn with_forced_shader(mut self, shader: ShaderId) -> Self {
        self.forced_shader = Some(shader);
        self
    }

    /// Diagonal projection scales, the tangent denominators used by the
    /// cluster clip-region math.
    pub fn projection_scale(&self) -> (f32, f32) {
        (self.projection.col(0).x, self.projection.col(1).y)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_camera() -> RenderCamera {
        let view = Mat4::look_at_rh(Vec3::new(0.0, 0.0, 5.0), Vec3::ZERO, Vec3::Y);
        let proj = Mat4::perspective_rh(60.0_f32.to_radians(), 16.0 / 9.0, 0.1, 100.0);
        RenderCamera::new(view, proj, 0.1, 100.0)
    }

    #[test]
    fn frustum_accepts_sphere_in_front() {
        let camera = test_camera();
        assert!(camera.frustum.contains_sphere(Vec3::ZERO, 1.0));
    }

    #[test]
    fn frustum_rejects_sphere_far_to_the_side() {
        let camera = test_camera();
        assert!(!camera.frustum.contains_sphere(Vec3::new(1000.0, 0.0, 0.0), 1.0));
        assert!(!camera.frustum.contains_sphere(Vec3::new(0.0, 0.0, 200.0), 1.0));
    }

    #[test]
    fn far_clip_is_clamped_past_near() {
        let camera = RenderCamera::new(Mat4::IDENTITY, Mat4::IDENTITY, 1.0, 0.5);
        assert!(camera.far > camera.near);
    }

    #[test]
    fn projection_scale_matches_matrix_diagonal() {
        let camera = test_camera();
        let (sx, sy) = camera.projection_scale();
        assert!(sx > 0.0 && sy > 0.0);
        assert!((sy / sx - 16.0 / 9.0).abs() < 1e-4);
    }
}
