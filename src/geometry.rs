//! Planar pose geometry.
//!
//! Single home for the yaw ⇄ rotation-matrix convention and the
//! world ⇄ agent transforms. Rotations are about the z axis,
//! counter-clockwise positive; 2D transforms are 3×3 homogeneous.

use nalgebra::{Matrix3, Vector3};
use std::f64::consts::PI;

/// 3×3 rotation about z by `yaw` radians.
pub fn yaw_as_rotation33(yaw: f64) -> Matrix3<f64> {
    let (s, c) = yaw.sin_cos();
    Matrix3::new(
        c, -s, 0.0, //
        s, c, 0.0, //
        0.0, 0.0, 1.0,
    )
}

/// Yaw (rotation about z) of a 3×3 rotation matrix.
///
/// A zero matrix maps to 0.
pub fn rotation33_as_yaw(rotation: &Matrix3<f64>) -> f64 {
    rotation[(1, 0)].atan2(rotation[(0, 0)])
}

/// Wrap an angle to `(-π, π]`.
pub fn normalize_angle(angle: f64) -> f64 {
    let wrapped = (angle + PI).rem_euclid(2.0 * PI) - PI;
    if wrapped <= -PI {
        wrapped + 2.0 * PI
    } else {
        wrapped
    }
}

/// Homogeneous transform taking agent-frame points to world frame.
pub fn world_from_agent(centroid: [f64; 2], yaw: f64) -> Matrix3<f64> {
    let (s, c) = yaw.sin_cos();
    Matrix3::new(
        c, -s, centroid[0], //
        s, c, centroid[1], //
        0.0, 0.0, 1.0,
    )
}

/// Inverse of [`world_from_agent`], computed in closed form.
pub fn agent_from_world(centroid: [f64; 2], yaw: f64) -> Matrix3<f64> {
    let (s, c) = yaw.sin_cos();
    Matrix3::new(
        c, s, -(c * centroid[0] + s * centroid[1]), //
        -s, c, s * centroid[0] - c * centroid[1], //
        0.0, 0.0, 1.0,
    )
}

/// Apply a homogeneous 2D transform to one point.
pub fn transform_point(transform: &Matrix3<f64>, point: [f64; 2]) -> [f64; 2] {
    let p = transform * Vector3::new(point[0], point[1], 1.0);
    [p.x, p.y]
}

/// Euclidean distance between two planar points.
pub fn planar_distance(a: [f64; 2], b: [f64; 2]) -> f64 {
    (a[0] - b[0]).hypot(a[1] - b[1])
}
