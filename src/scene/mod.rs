//! Stage layout: the camera and the two billboard planes.

mod billboard;
mod camera;

pub use billboard::Billboard;
pub use camera::Camera;

use glam::Vec3;

/// The fixed stage composition.
///
/// A panorama backdrop sits one unit behind the keyed video screen; the
/// camera looks down at both from above and in front. Sizes and positions
/// are part of the look and are not configurable.
pub struct Stage {
    pub camera: Camera,
    pub backdrop: Billboard,
    pub screen: Billboard,
}

impl Stage {
    pub fn new() -> Self {
        Self {
            camera: Camera {
                eye: Vec3::new(0.0, 5.0, -10.0),
                target: Vec3::ZERO,
                up: Vec3::Y,
                fov_y: 0.8,
                z_near: 0.1,
                z_far: 100.0,
            },
            backdrop: Billboard::new(Vec3::new(0.0, 0.0, 1.0), 10.0, 6.5),
            screen: Billboard::new(Vec3::ZERO, 8.0, 4.5),
        }
    }
}

impl Default for Stage {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backdrop_sits_behind_the_screen() {
        let stage = Stage::new();
        // The camera is on the negative z side; larger z is farther away.
        assert!(stage.camera.eye.z < stage.screen.position.z);
        assert!(stage.screen.position.z < stage.backdrop.position.z);
    }

    #[test]
    fn backdrop_overfills_the_screen() {
        let stage = Stage::new();
        assert!(stage.backdrop.width > stage.screen.width);
        assert!(stage.backdrop.height > stage.screen.height);
    }
}
