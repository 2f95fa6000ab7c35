use glam::{Mat4, UVec2, Vec2, Vec3};

const DEFAULT_UP: Vec3 = Vec3::Y;

/// Perspective camera used by the 3D VFX renderer.
#[derive(Debug, Clone, PartialEq)]
pub struct Camera3D {
    pub position: Vec3,
    pub target: Vec3,
    pub up: Vec3,
    pub fov_y_radians: f32,
    pub near: f32,
    pub far: f32,
}

impl Camera3D {
    pub fn new(position: Vec3, target: Vec3, fov_y_radians: f32, near: f32, far: f32) -> Self {
        Self { position, target, up: DEFAULT_UP, fov_y_radians, near, far }
    }

    pub fn view_matrix(&self) -> Mat4 {
        Mat4::look_at_rh(self.position, self.target, self.up)
    }

    pub fn projection_matrix(&self, aspect: f32) -> Mat4 {
        Mat4::perspective_rh_gl(self.fov_y_radians, aspect.max(0.0001), self.near, self.far)
    }

    pub fn view_projection(&self, viewport: UVec2) -> Mat4 {
        self.view_projection_for(viewport.as_vec2())
    }

    /// [`Camera3D::view_projection`] for a fractional render size, as framebuffers report it.
    pub fn view_projection_for(&self, size: Vec2) -> Mat4 {
        let aspect = if size.y > 0.0 { size.x / size.y } else { 1.0 };
        self.projection_matrix(aspect) * self.view_matrix()
    }

    /// World-space right and up axes of the view, used to expand billboards.
    pub fn billboard_axes(&self) -> (Vec3, Vec3) {
        let view = self.view_matrix();
        let right = Vec3::new(view.x_axis.x, view.y_axis.x, view.z_axis.x);
        let up = Vec3::new(view.x_axis.y, view.y_axis.y, view.z_axis.y);
        (right, up)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn camera3d_view_projection_is_finite() {
        let camera = Camera3D::new(Vec3::new(0.0, 1.0, 5.0), Vec3::ZERO, 60.0_f32.to_radians(), 0.1, 1000.0);
        let vp = camera.view_projection(UVec2::new(1280, 720));
        assert!(!vp.to_cols_array().iter().any(|v| v.is_nan() || v.is_infinite()));
        let zero_height = camera.view_projection_for(Vec2::new(640.0, 0.0));
        assert!(zero_height.is_finite());
    }

    #[test]
    fn pixel_and_fractional_sizes_project_alike() {
        let camera = Camera3D::new(Vec3::new(2.0, 3.0, 6.0), Vec3::ZERO, 50.0_f32.to_radians(), 0.1, 100.0);
        let from_pixels = camera.view_projection(UVec2::new(400, 300));
        assert_eq!(from_pixels, camera.view_projection_for(Vec2::new(400.0, 300.0)));
        assert_eq!(camera.view_projection(UVec2::new(400, 0)), camera.view_projection_for(Vec2::new(400.0, 0.0)));
    }

    #[test]
    fn billboard_axes_face_the_camera() {
        let camera = Camera3D::new(Vec3::new(0.0, 0.0, 5.0), Vec3::ZERO, 45.0_f32.to_radians(), 0.1, 100.0);
        let (right, up) = camera.billboard_axes();
        assert!((right - Vec3::X).length() < 1e-5, "right = {right}");
        assert!((up - Vec3::Y).length() < 1e-5, "up = {up}");
        let forward = (camera.target - camera.position).normalize();
        assert!(right.dot(forward).abs() < 1e-5);
    }
}
