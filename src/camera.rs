//! Camera: a world transform paired with a projection.
//!
//! The camera exposes exactly what the pipelines consume: its world matrix
//! (where the camera sits in the scene) and a projection matrix. The view
//! matrix handed to draw dispatch is always the inverted world matrix,
//! computed on demand — there is no cached inverse to go stale.

use glam::{Mat4, Vec3};

/// A camera described by its world matrix and projection.
///
/// How the world matrix gets updated (orbit controls, animation, a scene
/// node) is up to the caller; the engine only reads it.
#[derive(Clone, Copy, Debug)]
pub struct Camera {
    /// The camera's placement in world space.
    pub world: Mat4,
    /// Projection matrix (perspective or orthographic).
    pub projection: Mat4,
}

impl Camera {
    /// Creates a camera from an explicit world matrix and projection.
    pub fn new(world: Mat4, projection: Mat4) -> Self {
        Self { world, projection }
    }

    /// Creates a camera standing at `eye`, looking at `target`.
    pub fn looking_at(eye: Vec3, target: Vec3, up: Vec3, projection: Mat4) -> Self {
        Self {
            // look_at builds a view matrix; the world matrix is its inverse
            world: Mat4::look_at_rh(eye, target, up).inverse(),
            projection,
        }
    }

    /// A standard right-handed perspective projection.
    pub fn perspective(fov_y_radians: f32, aspect: f32, near: f32, far: f32) -> Mat4 {
        Mat4::perspective_rh(fov_y_radians, aspect, near, far)
    }

    /// A right-handed orthographic projection, `half_extent` units from
    /// center to edge vertically.
    pub fn orthographic(half_extent: f32, aspect: f32, near: f32, far: f32) -> Mat4 {
        Mat4::orthographic_rh(
            -half_extent * aspect,
            half_extent * aspect,
            -half_extent,
            half_extent,
            near,
            far,
        )
    }

    /// The view matrix: the inverted world matrix.
    pub fn view_matrix(&self) -> Mat4 {
        self.world.inverse()
    }

    /// The camera position in world space.
    pub fn position(&self) -> Vec3 {
        self.world.w_axis.truncate()
    }
}

impl Default for Camera {
    fn default() -> Self {
        Self::looking_at(
            Vec3::new(0.0, 2.0, 8.0),
            Vec3::ZERO,
            Vec3::Y,
            Self::perspective(std::f32::consts::FRAC_PI_3, 16.0 / 9.0, 0.1, 100.0),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn view_is_world_inverse() {
        let cam = Camera::looking_at(
            Vec3::new(3.0, 4.0, 5.0),
            Vec3::ZERO,
            Vec3::Y,
            Camera::perspective(1.0, 1.5, 0.1, 100.0),
        );
        let round_trip = cam.world * cam.view_matrix();
        assert!(round_trip.abs_diff_eq(Mat4::IDENTITY, 1e-5));
    }

    #[test]
    fn position_matches_eye() {
        let eye = Vec3::new(1.0, 2.0, 3.0);
        let cam = Camera::looking_at(eye, Vec3::ZERO, Vec3::Y, Mat4::IDENTITY);
        assert!(cam.position().abs_diff_eq(eye, 1e-5));
    }
}
