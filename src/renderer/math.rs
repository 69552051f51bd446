//! Transform helpers for the left-handed, row-vector convention the shaders use
//!
//! Every matrix is a `glam::Mat4`. Composition is written as column-vector products,
//! but `Mat4::to_cols_array_2d` produces exactly the row-major bytes a row-vector
//! pipeline expects, so the constant buffers can be copied straight across.
//! Element `eRC` of the row-vector matrix is `col(R)[C]` here.

use glam::{Mat4, Vec3, Vec4};

/// Cosine threshold below which the X rotation is treated as gimbal locked
pub const GIMBAL_LOCK_THRESHOLD: f32 = 0.001;

/// Default near clip for light and camera projections
pub const DEFAULT_NEAR_CLIP: f32 = 0.1;

/// Default far clip for light projections
pub const DEFAULT_FAR_CLIP: f32 = 10_000.0;

/// Position, Euler rotation (radians) and per-axis scale of a placed object
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Decomposed {
    pub position: Vec3,
    pub rotation: Vec3,
    pub scale: Vec3,
}

/// Build a world matrix in the fixed order scale, rotate Z, rotate X, rotate Y, translate.
///
/// The order is not commutative and must not change: models authored against it
/// would visibly rotate about the wrong axes.
#[must_use]
pub fn compose_world_matrix(position: Vec3, rotation: Vec3, scale: Vec3) -> Mat4 {
    Mat4::from_translation(position)
        * Mat4::from_rotation_y(rotation.y)
        * Mat4::from_rotation_x(rotation.x)
        * Mat4::from_rotation_z(rotation.z)
        * Mat4::from_scale(scale)
}

/// Split an affine matrix back into position, Euler rotation and scale.
///
/// When the cosine of the X rotation falls to [`GIMBAL_LOCK_THRESHOLD`] or below the
/// Z rotation is forced to zero and Y is recovered from the first row instead.
#[must_use]
pub fn decompose_world_matrix(matrix: &Mat4) -> Decomposed {
    let row0 = matrix.x_axis;
    let row1 = matrix.y_axis;
    let row2 = matrix.z_axis;

    let scale_x = row0.truncate().length();
    let scale_y = row1.truncate().length();
    let scale_z = row2.truncate().length();

    let inv_scale_x = 1.0 / scale_x;
    let inv_scale_y = 1.0 / scale_y;
    let inv_scale_z = 1.0 / scale_z;

    let sin_x = -row2.y * inv_scale_z;
    let cos_x = (1.0 - sin_x * sin_x).max(0.0).sqrt();

    let (sin_y, cos_y, sin_z, cos_z) = if cos_x.abs() > GIMBAL_LOCK_THRESHOLD {
        let inv_cos_x = 1.0 / cos_x;
        (
            row2.x * inv_cos_x * inv_scale_z,
            row2.z * inv_cos_x * inv_scale_z,
            row0.y * inv_cos_x * inv_scale_x,
            row1.y * inv_cos_x * inv_scale_y,
        )
    } else {
        (-row0.z * inv_scale_x, row0.x * inv_scale_x, 0.0, 1.0)
    };

    Decomposed {
        position: matrix.w_axis.truncate(),
        rotation: Vec3::new(
            sin_x.atan2(cos_x),
            sin_y.atan2(cos_y),
            sin_z.atan2(cos_z),
        ),
        scale: Vec3::new(scale_x, scale_y, scale_z),
    }
}

/// Orthonormal basis facing from `position` towards `target`, translated to `position`.
///
/// X is world-up crossed with forward, Y is forward crossed with X. Scale is not applied.
#[must_use]
pub fn look_at_matrix(position: Vec3, target: Vec3) -> Mat4 {
    let forward = (target - position).normalize();
    let right = Vec3::Y.cross(forward).normalize();
    let up = forward.cross(right).normalize();

    Mat4::from_cols(
        right.extend(0.0),
        up.extend(0.0),
        forward.extend(0.0),
        position.extend(1.0),
    )
}

/// Left-handed perspective projection parameterised by horizontal field of view.
///
/// Depth maps to `[0, 1]`, with `w` taken from view-space Z.
#[must_use]
pub fn perspective_fov_x(aspect_ratio: f32, fov_x: f32, near: f32, far: f32) -> Mat4 {
    let tan_half = (fov_x * 0.5).tan();
    let scale_x = 1.0 / tan_half;
    let scale_y = aspect_ratio / tan_half;
    let scale_za = far / (far - near);
    let scale_zb = -near * scale_za;

    Mat4::from_cols(
        Vec4::new(scale_x, 0.0, 0.0, 0.0),
        Vec4::new(0.0, scale_y, 0.0, 0.0),
        Vec4::new(0.0, 0.0, scale_za, 1.0),
        Vec4::new(0.0, 0.0, scale_zb, 0.0),
    )
}

/// Inverse of an affine transform, used to turn a world matrix into a view matrix
#[must_use]
pub fn inverse_affine(matrix: &Mat4) -> Mat4 {
    matrix.inverse()
}

/// Local Z axis of a world matrix (the facing direction)
#[must_use]
pub fn facing(matrix: &Mat4) -> Vec3 {
    matrix.z_axis.truncate().normalize_or_zero()
}

/// Convert a matrix to the array layout stored in constant buffers
#[must_use]
pub fn to_gpu(matrix: &Mat4) -> [[f32; 4]; 4] {
    matrix.to_cols_array_2d()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::{FRAC_PI_2, FRAC_PI_4};

    fn assert_mat_close(a: &Mat4, b: &Mat4, tolerance: f32) {
        let a = a.to_cols_array();
        let b = b.to_cols_array();
        for (i, (x, y)) in a.iter().zip(b.iter()).enumerate() {
            assert!(
                (x - y).abs() <= tolerance,
                "element {i} differs: {x} vs {y}"
            );
        }
    }

    #[test]
    fn test_compose_is_deterministic() {
        let p = Vec3::new(1.5, -2.0, 7.25);
        let r = Vec3::new(0.3, 1.1, -0.6);
        let s = Vec3::new(2.0, 0.5, 1.25);

        let a = compose_world_matrix(p, r, s);
        let b = compose_world_matrix(p, r, s);
        assert_eq!(a.to_cols_array().map(f32::to_bits), b.to_cols_array().map(f32::to_bits));
    }

    #[test]
    fn test_y_rotation_maps_z_to_x() {
        let world = compose_world_matrix(Vec3::ZERO, Vec3::new(0.0, FRAC_PI_2, 0.0), Vec3::ONE);
        let mapped = world.transform_vector3(Vec3::Z);
        assert!((mapped - Vec3::X).length() < 1e-5, "got {mapped}");
    }

    #[test]
    fn test_composition_order_scale_z_x_y_translate() {
        let p = Vec3::new(3.0, 4.0, 5.0);
        let r = Vec3::new(0.4, -0.7, 1.2);
        let s = Vec3::new(2.0, 3.0, 4.0);

        let world = compose_world_matrix(p, r, s);

        // Apply the steps one at a time to a sample point
        let mut v = Vec3::new(1.0, -2.0, 0.5) * s;
        v = Mat4::from_rotation_z(r.z).transform_point3(v);
        v = Mat4::from_rotation_x(r.x).transform_point3(v);
        v = Mat4::from_rotation_y(r.y).transform_point3(v);
        v += p;

        let direct = world.transform_point3(Vec3::new(1.0, -2.0, 0.5));
        assert!((direct - v).length() < 1e-4);
    }

    #[test]
    fn test_translation_lands_in_fourth_row() {
        let world = compose_world_matrix(Vec3::new(4.5, 22.0, -1.0), Vec3::ZERO, Vec3::ONE);
        let rows = to_gpu(&world);
        assert_eq!(rows[3], [4.5, 22.0, -1.0, 1.0]);
    }

    #[test]
    fn test_decompose_round_trip() {
        let p = Vec3::new(-12.0, 3.5, 40.0);
        let r = Vec3::new(0.35, -2.1, 0.8);
        let s = Vec3::new(1.5, 2.0, 0.75);
        let world = compose_world_matrix(p, r, s);

        let d = decompose_world_matrix(&world);
        let rebuilt = compose_world_matrix(d.position, d.rotation, d.scale);

        assert_mat_close(&world, &rebuilt, 1e-4);
        assert!((d.scale - s).length() < 1e-4);
        assert!((d.position - p).length() < 1e-5);
    }

    #[test]
    fn test_gimbal_lock_forces_zero_z() {
        let r = Vec3::new(FRAC_PI_2, FRAC_PI_4, 0.5);
        let world = compose_world_matrix(Vec3::new(1.0, 2.0, 3.0), r, Vec3::ONE);

        let d = decompose_world_matrix(&world);
        assert_eq!(d.rotation.z, 0.0);

        // With Z folded away the remaining angles still reproduce the matrix
        let rebuilt = compose_world_matrix(d.position, d.rotation, d.scale);
        assert_mat_close(&world, &rebuilt, 2e-3);
    }

    #[test]
    fn test_look_at_basis_is_orthonormal() {
        let m = look_at_matrix(Vec3::new(0.0, 0.0, -10.0), Vec3::new(5.0, 2.0, 3.0));
        let x = m.x_axis.truncate();
        let y = m.y_axis.truncate();
        let z = m.z_axis.truncate();

        assert!((x.length() - 1.0).abs() < 1e-5);
        assert!((y.length() - 1.0).abs() < 1e-5);
        assert!((z.length() - 1.0).abs() < 1e-5);
        assert!(x.dot(y).abs() < 1e-5);
        assert!(y.dot(z).abs() < 1e-5);
        assert!(x.dot(z).abs() < 1e-5);
        assert_eq!(m.w_axis, Vec4::new(0.0, 0.0, -10.0, 1.0));
    }

    #[test]
    fn test_projection_depth_range() {
        let proj = perspective_fov_x(1.0, FRAC_PI_2, 0.1, 100.0);

        let near = proj * Vec4::new(0.0, 0.0, 0.1, 1.0);
        let far = proj * Vec4::new(0.0, 0.0, 100.0, 1.0);
        assert!((near.z / near.w).abs() < 1e-5);
        assert!((far.z / far.w - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_view_is_inverse_of_world() {
        let world = compose_world_matrix(Vec3::new(4.0, 9.0, 1.0), Vec3::new(0.2, 0.4, 0.0), Vec3::ONE);
        let view = inverse_affine(&world);
        assert_mat_close(&(view * world), &Mat4::IDENTITY, 1e-5);
    }
}
