// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Small fixed-size linear algebra.
//!
//! Everything here works on stack-allocated `nalgebra` types of size at most 4x4.
//! Determinants, inverses and the eigen decomposition used by the pose solver
//! are written out explicitly (cofactor expansion, closed-form roots)
//! so that no call allocates and no call iterates to convergence.

use nalgebra::{
    Matrix3, Matrix3x4, Matrix4, Quaternion, Rotation3, UnitQuaternion, Vector2, Vector3, Vector4,
};

/// 2D vector.
pub type Vec2 = Vector2<f64>;
/// 3D vector.
pub type Vec3 = Vector3<f64>;
/// 4D vector.
pub type Vec4 = Vector4<f64>;
/// 3x3 matrix.
pub type Mat3 = Matrix3<f64>;
/// 4x4 matrix.
pub type Mat4 = Matrix4<f64>;
/// 3x4 matrix, used for camera matrices.
pub type Mat3x4 = Matrix3x4<f64>;

/// Determinant of the 2x2 matrix with columns `a` and `b`.
#[inline]
pub fn det2(a: &Vec2, b: &Vec2) -> f64 {
    a.x * b.y - a.y * b.x
}

/// Determinant of a 3x3 matrix by cofactor expansion along the first row.
#[inline]
pub fn det3(m: &Mat3) -> f64 {
    m.m11 * (m.m22 * m.m33 - m.m23 * m.m32) - m.m12 * (m.m21 * m.m33 - m.m23 * m.m31)
        + m.m13 * (m.m21 * m.m32 - m.m22 * m.m31)
}

/// Inverse of a 3x3 matrix through its adjugate.
///
/// Returns `None` when the determinant is not finite
/// or when its magnitude does not exceed `epsilon`.
pub fn inverse3(m: &Mat3, epsilon: f64) -> Option<Mat3> {
    let det = det3(m);
    if !det.is_finite() || det.abs() <= epsilon {
        return None;
    }
    let inv_det = 1.0 / det;
    #[rustfmt::skip]
    let adjugate = Mat3::new(
        m.m22 * m.m33 - m.m23 * m.m32, m.m13 * m.m32 - m.m12 * m.m33, m.m12 * m.m23 - m.m13 * m.m22,
        m.m23 * m.m31 - m.m21 * m.m33, m.m11 * m.m33 - m.m13 * m.m31, m.m13 * m.m21 - m.m11 * m.m23,
        m.m21 * m.m32 - m.m22 * m.m31, m.m12 * m.m31 - m.m11 * m.m32, m.m11 * m.m22 - m.m12 * m.m21,
    );
    Some(adjugate * inv_det)
}

/// The 3x3 matrix left after removing `row` and `col` from `m`.
fn minor(m: &Mat4, row: usize, col: usize) -> Mat3 {
    let mut out = Mat3::zeros();
    let mut r = 0;
    for i in (0..4).filter(|&i| i != row) {
        let mut c = 0;
        for j in (0..4).filter(|&j| j != col) {
            out[(r, c)] = m[(i, j)];
            c += 1;
        }
        r += 1;
    }
    out
}

/// Signed cofactor `C_ij` of a 4x4 matrix.
#[inline]
fn cofactor(m: &Mat4, row: usize, col: usize) -> f64 {
    let sign = if (row + col) % 2 == 0 { 1.0 } else { -1.0 };
    sign * det3(&minor(m, row, col))
}

/// Determinant of a 4x4 matrix by cofactor expansion along the first row.
pub fn det4(m: &Mat4) -> f64 {
    (0..4).map(|j| m[(0, j)] * cofactor(m, 0, j)).sum()
}

/// Largest eigenvalue and its unit eigenvector for a symmetric, traceless 4x4
/// matrix whose characteristic polynomial has no linear term.
///
/// Such a matrix has characteristic polynomial $\lambda^4 + c_2 \lambda^2 + c_0$
/// with $c_2 = -\frac{1}{2} \operatorname{tr}(N^2)$ and $c_0 = \det N$,
/// so the eigenvalues are roots of a quadratic in $\lambda^2$.
/// The eigenvector is read off the adjugate of $N - \lambda I$,
/// which has rank one when $\lambda$ is a simple eigenvalue.
///
/// Returns `None` when the top eigenvalue is not simple.
pub fn top_eigenpair_biquadratic(n: &Mat4) -> Option<(f64, Vec4)> {
    let c2 = -0.5 * (n * n).trace();
    let c0 = det4(n);
    let discriminant = (c2 * c2 - 4.0 * c0).max(0.0);
    let mu = 0.5 * (-c2 + discriminant.sqrt());
    if !mu.is_finite() {
        return None;
    }
    let lambda = mu.max(0.0).sqrt();

    let shifted = n - Mat4::identity() * lambda;
    let mut best = Vec4::zeros();
    let mut best_norm = 0.0;
    for row in 0..4 {
        let candidate = Vec4::new(
            cofactor(&shifted, row, 0),
            cofactor(&shifted, row, 1),
            cofactor(&shifted, row, 2),
            cofactor(&shifted, row, 3),
        );
        let norm = candidate.norm_squared();
        if norm > best_norm {
            best_norm = norm;
            best = candidate;
        }
    }

    let scale = n.amax().max(f64::MIN_POSITIVE);
    if !(best_norm.sqrt() > 1e-12 * scale.powi(3)) {
        return None;
    }
    Some((lambda, best / best_norm.sqrt()))
}

/// Rotation matrix of the quaternion `q = (w, x, y, z)`, which needs not be normalized.
pub fn rotation_from_quaternion(q: &Vec4) -> Option<Mat3> {
    let norm = q.norm();
    if !(norm > f64::EPSILON) {
        return None;
    }
    let q = q / norm;
    let (w, x, y, z) = (q[0], q[1], q[2], q[3]);
    #[rustfmt::skip]
    let r = Mat3::new(
        1.0 - 2.0 * (y * y + z * z), 2.0 * (x * y - w * z),       2.0 * (x * z + w * y),
        2.0 * (x * y + w * z),       1.0 - 2.0 * (x * x + z * z), 2.0 * (y * z - w * x),
        2.0 * (x * z - w * y),       2.0 * (y * z + w * x),       1.0 - 2.0 * (x * x + y * y),
    );
    Some(r)
}

/// Unit quaternion of a rotation matrix.
pub fn quaternion_from_rotation(r: &Mat3) -> UnitQuaternion<f64> {
    UnitQuaternion::from_rotation_matrix(&Rotation3::from_matrix_unchecked(*r))
}

/// Rotation matrix of a unit quaternion.
pub fn rotation_from_unit_quaternion(q: &UnitQuaternion<f64>) -> Mat3 {
    q.to_rotation_matrix().into_inner()
}

/// Normalized quaternion from its raw `(i, j, k, w)` coordinates.
pub fn unit_quaternion(coords: Vec4) -> UnitQuaternion<f64> {
    UnitQuaternion::from_quaternion(Quaternion::from(coords))
}

/// Assemble a proper rotation from its first two columns.
///
/// The third column is $\pm (r_1 \times r_2)$ with the sign giving $\det R = +1$.
pub fn rotation_from_columns(r1: &Vec3, r2: &Vec3) -> Mat3 {
    let r3 = r1.cross(r2);
    let mut r = Mat3::from_columns(&[*r1, *r2, r3]);
    if det3(&r) < 0.0 {
        r.set_column(2, &(-r3));
    }
    r
}

/// Solve the 8x8 system stored as an augmented `[A | b]` matrix
/// with Gauss-Jordan elimination and partial pivoting.
///
/// Returns `None` when a pivot falls below `epsilon`.
pub fn solve8(a: &mut [[f64; 9]; 8], epsilon: f64) -> Option<[f64; 8]> {
    for col in 0..8 {
        let mut pivot_row = col;
        let mut pivot_abs = a[col][col].abs();
        for (row, line) in a.iter().enumerate().skip(col + 1) {
            if line[col].abs() > pivot_abs {
                pivot_abs = line[col].abs();
                pivot_row = row;
            }
        }
        if !(pivot_abs > epsilon) {
            return None;
        }
        a.swap(col, pivot_row);
        let pivot = a[col][col];
        for value in a[col][col..].iter_mut() {
            *value /= pivot;
        }
        let pivot_line = a[col];
        for (row, line) in a.iter_mut().enumerate() {
            if row == col {
                continue;
            }
            let factor = line[col];
            if factor != 0.0 {
                for j in col..9 {
                    line[j] -= factor * pivot_line[j];
                }
            }
        }
    }
    let mut x = [0.0; 8];
    for (xi, line) in x.iter_mut().zip(a.iter()) {
        *xi = line[8];
    }
    Some(x)
}

/// Stack a rotation and a translation into the 3x4 matrix `[R | t]`.
pub fn hstack(r: &Mat3, t: &Vec3) -> Mat3x4 {
    let mut m = Mat3x4::zeros();
    m.fixed_view_mut::<3, 3>(0, 0).copy_from(r);
    m.set_column(3, t);
    m
}

// Tests #######################################################################
