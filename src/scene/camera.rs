//! Free camera producing view and projection matrices.

use glam::{Mat4, Vec3};

/// A stationary look-at camera.
#[derive(Debug, Clone, Copy)]
pub struct Camera {
    pub eye: Vec3,
    pub target: Vec3,
    pub up: Vec3,
    /// Vertical field of view in radians.
    pub fov_y: f32,
    pub z_near: f32,
    pub z_far: f32,
}

impl Camera {
    pub fn view(&self) -> Mat4 {
        Mat4::look_at_rh(self.eye, self.target, self.up)
    }

    /// Projection with [0, 1] depth, as wgpu clip space expects.
    pub fn projection(&self, aspect: f32) -> Mat4 {
        Mat4::perspective_rh(self.fov_y, aspect, self.z_near, self.z_far)
    }

    pub fn view_projection(&self, aspect: f32) -> Mat4 {
        self.projection(aspect) * self.view()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec4;

    #[test]
    fn stage_origin_projects_inside_clip_space() {
        let camera = Camera {
            eye: Vec3::new(0.0, 5.0, -10.0),
            target: Vec3::ZERO,
            up: Vec3::Y,
            fov_y: 0.8,
            z_near: 0.1,
            z_far: 100.0,
        };
        let clip = camera.view_projection(16.0 / 9.0) * Vec4::new(0.0, 0.0, 0.0, 1.0);
        assert!(clip.w > 0.0, "origin is behind the camera");
        let ndc = clip / clip.w;
        assert!(ndc.x.abs() <= 1.0 && ndc.y.abs() <= 1.0, "{ndc:?}");
        assert!(ndc.z > 0.0 && ndc.z < 1.0, "{ndc:?}");
    }

    #[test]
    fn looking_at_the_target_centers_it() {
        let camera = Camera {
            eye: Vec3::new(0.0, 5.0, -10.0),
            target: Vec3::ZERO,
            up: Vec3::Y,
            fov_y: 0.8,
            z_near: 0.1,
            z_far: 100.0,
        };
        let clip = camera.view_projection(1.0) * Vec4::new(0.0, 0.0, 0.0, 1.0);
        let ndc = clip / clip.w;
        assert!(ndc.x.abs() < 1e-5 && ndc.y.abs() < 1e-5, "{ndc:?}");
    }
}
