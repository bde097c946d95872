//! Camera and instance transform math
//!
//! The camera transform is translate-then-rotate-XYZ and the view matrix is
//! its inverse; instance transforms are rotate-XYZ-then-translate. The
//! projection flips the Y axis relative to the raw perspective formula to
//! match the target coordinate convention.

use nalgebra::{Matrix4, Perspective3, Rotation3, Vector3};

use crate::render::vulkan::uniform::UboViewProjection;

const FIELD_OF_VIEW_DEG: f32 = 45.0;
const NEAR_PLANE: f32 = 0.1;
const FAR_PLANE: f32 = 10.0;

/// Position plus XYZ Euler rotation in degrees; the transform unit for both
/// the camera and per-frame instances
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform3 {
    /// Translation component
    pub position: Vector3<f32>,
    /// Rotation around the X, Y, and Z axes, in degrees, applied in that
    /// order
    pub rotation: Vector3<f32>,
}

impl Transform3 {
    /// Transform from position and rotation vectors
    pub fn new(position: Vector3<f32>, rotation: Vector3<f32>) -> Self {
        Self { position, rotation }
    }
}

impl Default for Transform3 {
    fn default() -> Self {
        Self {
            position: Vector3::zeros(),
            rotation: Vector3::zeros(),
        }
    }
}

fn rotation_xyz(rotation_deg: &Vector3<f32>) -> Matrix4<f32> {
    let x = Rotation3::from_axis_angle(&Vector3::x_axis(), rotation_deg.x.to_radians());
    let y = Rotation3::from_axis_angle(&Vector3::y_axis(), rotation_deg.y.to_radians());
    let z = Rotation3::from_axis_angle(&Vector3::z_axis(), rotation_deg.z.to_radians());
    x.to_homogeneous() * y.to_homogeneous() * z.to_homogeneous()
}

/// View matrix: inverse of the camera's translate-then-rotate-XYZ transform
pub fn view_matrix(camera: &Transform3) -> Matrix4<f32> {
    let camera_world = Matrix4::new_translation(&camera.position) * rotation_xyz(&camera.rotation);
    camera_world
        .try_inverse()
        .unwrap_or_else(Matrix4::identity)
}

/// Perspective projection with the Y axis flipped
pub fn projection_matrix(width: u32, height: u32) -> Matrix4<f32> {
    let aspect = width as f32 / height.max(1) as f32;
    let mut projection =
        Perspective3::new(aspect, FIELD_OF_VIEW_DEG.to_radians(), NEAR_PLANE, FAR_PLANE)
            .to_homogeneous();
    projection[(1, 1)] *= -1.0;
    projection
}

/// Per-instance model matrix: rotate-XYZ, then translate
pub fn model_matrix(instance: &Transform3) -> Matrix4<f32> {
    rotation_xyz(&instance.rotation) * Matrix4::new_translation(&instance.position)
}

/// The per-frame view/projection uniform contents for a camera and surface
/// size
pub fn view_projection(camera: &Transform3, width: u32, height: u32) -> UboViewProjection {
    UboViewProjection {
        view: view_matrix(camera).into(),
        proj: projection_matrix(width, height).into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn identity_camera_gives_identity_view() {
        let view = view_matrix(&Transform3::default());
        assert_relative_eq!(view, Matrix4::identity(), epsilon = 1e-6);
    }

    #[test]
    fn view_inverts_the_camera_translation() {
        let camera = Transform3::new(Vector3::new(1.0, 2.0, 3.0), Vector3::zeros());
        let view = view_matrix(&camera);

        assert_relative_eq!(view[(0, 3)], -1.0, epsilon = 1e-6);
        assert_relative_eq!(view[(1, 3)], -2.0, epsilon = 1e-6);
        assert_relative_eq!(view[(2, 3)], -3.0, epsilon = 1e-6);
    }

    #[test]
    fn projection_y_axis_is_negated_against_the_raw_formula() {
        let projection = projection_matrix(800, 600);
        let raw = 1.0 / (FIELD_OF_VIEW_DEG.to_radians() / 2.0).tan();

        assert_relative_eq!(projection[(1, 1)], -raw, epsilon = 1e-5);
        // The X scale keeps its sign and carries the aspect ratio.
        assert_relative_eq!(projection[(0, 0)], raw / (800.0 / 600.0), epsilon = 1e-5);
    }

    #[test]
    fn instance_matrix_rotates_before_translating() {
        // 90° around Z applied to a unit-X translation lands on +Y; the
        // opposite order would leave it on +X.
        let instance = Transform3::new(Vector3::new(1.0, 0.0, 0.0), Vector3::new(0.0, 0.0, 90.0));
        let model = model_matrix(&instance);

        assert_relative_eq!(model[(0, 3)], 0.0, epsilon = 1e-6);
        assert_relative_eq!(model[(1, 3)], 1.0, epsilon = 1e-6);
        assert_relative_eq!(model[(2, 3)], 0.0, epsilon = 1e-6);
    }

    #[test]
    fn rotation_order_is_x_then_y_then_z() {
        let by_parts = rotation_xyz(&Vector3::new(30.0, 45.0, 60.0));
        let expected =
            Rotation3::from_axis_angle(&Vector3::x_axis(), 30.0_f32.to_radians()).to_homogeneous()
                * Rotation3::from_axis_angle(&Vector3::y_axis(), 45.0_f32.to_radians())
                    .to_homogeneous()
                * Rotation3::from_axis_angle(&Vector3::z_axis(), 60.0_f32.to_radians())
                    .to_homogeneous();
        assert_relative_eq!(by_parts, expected, epsilon = 1e-6);
    }

    #[test]
    fn view_projection_fills_both_matrices() {
        let ubo = view_projection(&Transform3::default(), 640, 480);
        assert_relative_eq!(ubo.view[0][0], 1.0, epsilon = 1e-6);
        assert!(ubo.proj[1][1] < 0.0);
    }
}
