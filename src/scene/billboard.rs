//! Billboard planes: placement, world size and orientation toward the eye.

use glam::{Mat4, Vec3};

/// A camera-facing plane in the stage.
#[derive(Debug, Clone, Copy)]
pub struct Billboard {
    pub position: Vec3,
    pub width: f32,
    pub height: f32,
}

impl Billboard {
    pub fn new(position: Vec3, width: f32, height: f32) -> Self {
        Self {
            position,
            width,
            height,
        }
    }

    /// Model matrix that orients the unit plane toward `eye` and scales it
    /// to world size.
    ///
    /// The basis keeps the plane upright relative to world Y. When the eye
    /// sits on the plane's vertical axis (no horizontal direction to face)
    /// the orientation falls back to a fixed basis so the matrix stays
    /// finite.
    pub fn model_matrix(&self, eye: Vec3) -> Mat4 {
        let to_eye = eye - self.position;
        let z_axis = if to_eye.length_squared() > 1e-8 {
            to_eye.normalize()
        } else {
            Vec3::NEG_Z
        };
        let x_axis = {
            let x = Vec3::Y.cross(z_axis);
            if x.length_squared() > 1e-8 {
                x.normalize()
            } else {
                Vec3::X
            }
        };
        let y_axis = z_axis.cross(x_axis);
        Mat4::from_cols(
            (x_axis * self.width).extend(0.0),
            (y_axis * self.height).extend(0.0),
            z_axis.extend(0.0),
            self.position.extend(1.0),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec4;

    const EPS: f32 = 1e-5;

    #[test]
    fn plane_faces_the_eye() {
        let billboard = Billboard::new(Vec3::ZERO, 8.0, 4.5);
        let eye = Vec3::new(3.0, 5.0, -10.0);
        let m = billboard.model_matrix(eye);
        let normal = m.col(2).truncate();
        let to_eye = (eye - billboard.position).normalize();
        assert!((normal.dot(to_eye) - 1.0).abs() < EPS);
    }

    #[test]
    fn plane_scales_to_world_size() {
        let billboard = Billboard::new(Vec3::new(0.0, 0.0, 1.0), 10.0, 6.5);
        let m = billboard.model_matrix(Vec3::new(0.0, 5.0, -10.0));
        let left = m * Vec4::new(-0.5, 0.0, 0.0, 1.0);
        let right = m * Vec4::new(0.5, 0.0, 0.0, 1.0);
        let top = m * Vec4::new(0.0, 0.5, 0.0, 1.0);
        let bottom = m * Vec4::new(0.0, -0.5, 0.0, 1.0);
        assert!(((right - left).truncate().length() - 10.0).abs() < 1e-4);
        assert!(((top - bottom).truncate().length() - 6.5).abs() < 1e-4);
    }

    #[test]
    fn plane_stays_upright() {
        let billboard = Billboard::new(Vec3::ZERO, 8.0, 4.5);
        let m = billboard.model_matrix(Vec3::new(2.0, 5.0, -10.0));
        let y_axis = m.col(1).truncate().normalize();
        assert!(y_axis.y > 0.0, "plane is upside down: {y_axis:?}");
        // The basis is orthogonal.
        let x_axis = m.col(0).truncate();
        let z_axis = m.col(2).truncate();
        assert!(x_axis.dot(z_axis).abs() < EPS);
        assert!(y_axis.dot(z_axis).abs() < EPS);
    }

    #[test]
    fn degenerate_eye_positions_stay_finite() {
        let billboard = Billboard::new(Vec3::ZERO, 8.0, 4.5);
        for eye in [Vec3::ZERO, Vec3::new(0.0, 7.0, 0.0), Vec3::new(0.0, -7.0, 0.0)] {
            let m = billboard.model_matrix(eye);
            assert!(
                m.to_cols_array().iter().all(|v| v.is_finite()),
                "non-finite matrix for eye {eye:?}"
            );
        }
    }
}
