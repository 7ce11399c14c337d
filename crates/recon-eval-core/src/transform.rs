//! Homogeneous 4x4 similarity transforms.
//!
//! All functions here are pure. Poses are composed as
//! `translation · (Rz · Ry · Rx)`, i.e. extrinsic XYZ Euler angles.

use crate::{Mat3, Mat4, Pt3, Real, Vec3};
use thiserror::Error;

/// Tolerance used when checking the homogeneous bottom row.
const AFFINE_TOL: Real = 1e-9;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum TransformError {
    #[error("non-affine transform: bottom row is {0:?}, expected [0, 0, 0, 1]")]
    NonAffine([Real; 4]),
    #[error("degenerate transform: column {0} of the linear block has zero length")]
    ZeroScale(usize),
    #[error("transform is not invertible")]
    Singular,
}

/// Location, orthonormal rotation and per-axis scale of a similarity transform.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Decomposition {
    pub location: Vec3,
    pub rotation: Mat3,
    pub scale: Vec3,
}

/// Rotation about the X axis by `angle` radians.
pub fn rotation_x(angle: Real) -> Mat4 {
    let (s, c) = angle.sin_cos();
    Mat4::new(
        1.0, 0.0, 0.0, 0.0, //
        0.0, c, -s, 0.0, //
        0.0, s, c, 0.0, //
        0.0, 0.0, 0.0, 1.0,
    )
}

/// Rotation about the Y axis by `angle` radians.
pub fn rotation_y(angle: Real) -> Mat4 {
    let (s, c) = angle.sin_cos();
    Mat4::new(
        c, 0.0, s, 0.0, //
        0.0, 1.0, 0.0, 0.0, //
        -s, 0.0, c, 0.0, //
        0.0, 0.0, 0.0, 1.0,
    )
}

/// Rotation about the Z axis by `angle` radians.
pub fn rotation_z(angle: Real) -> Mat4 {
    let (s, c) = angle.sin_cos();
    Mat4::new(
        c, -s, 0.0, 0.0, //
        s, c, 0.0, 0.0, //
        0.0, 0.0, 1.0, 0.0, //
        0.0, 0.0, 0.0, 1.0,
    )
}

/// Pure translation.
pub fn translation(offset: &Vec3) -> Mat4 {
    Mat4::new_translation(offset)
}

/// Uniform scale about the origin.
pub fn scale_transform(scale: Real) -> Mat4 {
    let mut t = Mat4::identity();
    for i in 0..3 {
        t[(i, i)] = scale;
    }
    t
}

/// `Rz(ez) · Ry(ey) · Rx(ex)` as a 3x3 rotation.
pub fn euler_rotation(euler: &Vec3) -> Mat3 {
    let r = rotation_z(euler.z) * rotation_y(euler.y) * rotation_x(euler.x);
    r.fixed_view::<3, 3>(0, 0).into_owned()
}

/// Pose transform `translation(location) · Rz · Ry · Rx`.
pub fn compose_pose(location: &Vec3, euler: &Vec3) -> Mat4 {
    translation(location) * rotation_z(euler.z) * rotation_y(euler.y) * rotation_x(euler.x)
}

/// Assemble `[rotation | location]` into a 4x4 transform.
pub fn from_rotation_location(rotation: &Mat3, location: &Vec3) -> Mat4 {
    let mut t = Mat4::identity();
    t.fixed_view_mut::<3, 3>(0, 0).copy_from(rotation);
    t.fixed_view_mut::<3, 1>(0, 3).copy_from(location);
    t
}

/// Check the homogeneous bottom row.
pub fn ensure_affine(t: &Mat4) -> Result<(), TransformError> {
    let row = [t[(3, 0)], t[(3, 1)], t[(3, 2)], t[(3, 3)]];
    let expected = [0.0, 0.0, 0.0, 1.0];
    if row
        .iter()
        .zip(expected.iter())
        .any(|(a, b)| (a - b).abs() > AFFINE_TOL)
    {
        return Err(TransformError::NonAffine(row));
    }
    Ok(())
}

/// Split a similarity transform into location, rotation and per-axis scale.
///
/// Scale is the column norm of the linear block; dividing it out yields the
/// rotation.
pub fn decompose(t: &Mat4) -> Result<Decomposition, TransformError> {
    ensure_affine(t)?;
    let linear = t.fixed_view::<3, 3>(0, 0).into_owned();
    let mut rotation = linear;
    let mut scale = Vec3::zeros();
    for c in 0..3 {
        let norm = linear.column(c).norm();
        if norm <= Real::EPSILON {
            return Err(TransformError::ZeroScale(c));
        }
        scale[c] = norm;
        rotation.set_column(c, &(linear.column(c) / norm));
    }
    Ok(Decomposition {
        location: translation_part(t),
        rotation,
        scale,
    })
}

/// Translation column of a transform.
pub fn translation_part(t: &Mat4) -> Vec3 {
    t.fixed_view::<3, 1>(0, 3).into_owned()
}

/// General inverse of a 4x4 transform.
pub fn invert(t: &Mat4) -> Result<Mat4, TransformError> {
    t.try_inverse().ok_or(TransformError::Singular)
}

/// Apply a homogeneous transform to a point.
pub fn transform_point(t: &Mat4, p: &Pt3) -> Pt3 {
    t.transform_point(p)
}

/// Extrinsic XYZ Euler angles of a rotation, inverse of [`euler_rotation`].
///
/// At gimbal lock (`|ey| = 90°`) the X angle is set to zero.
pub fn rotation_to_euler(r: &Mat3) -> Vec3 {
    let sy = (r[(0, 0)] * r[(0, 0)] + r[(1, 0)] * r[(1, 0)]).sqrt();
    if sy > 1e-9 {
        Vec3::new(
            r[(2, 1)].atan2(r[(2, 2)]),
            (-r[(2, 0)]).atan2(sy),
            r[(1, 0)].atan2(r[(0, 0)]),
        )
    } else {
        Vec3::new(
            0.0,
            (-r[(2, 0)]).atan2(sy),
            (-r[(0, 1)]).atan2(r[(1, 1)]),
        )
    }
}

/// Rotation angle (radians, in `[0, π]`) of a rotation matrix.
pub fn rotation_angle(r: &Mat3) -> Real {
    let c = ((r.trace() - 1.0) * 0.5).clamp(-1.0, 1.0);
    c.acos()
}
