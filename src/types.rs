// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Data model shared by the solvers and the tracking lifecycle.

use std::ops::Mul;

use nalgebra::{Isometry3, Translation3, UnitQuaternion};

use crate::error::PoseError;
use crate::linalg::{self, Mat3, Mat3x4, Mat4, Vec3};

/// A 2D coordinate, in pixels unless stated otherwise.
pub type Point2 = nalgebra::Point2<f64>;

/// One candidate match between a reference image and an observed frame.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Correspondence {
    /// Position in the reference image.
    pub reference: Point2,
    /// Position in the observed frame.
    pub observed: Point2,
    /// Match quality, lower is better
    /// (typically the ratio of best to second-best descriptor distance).
    pub quality: f64,
}

impl Correspondence {
    /// Build a correspondence from raw coordinates.
    pub fn new(reference: [f64; 2], observed: [f64; 2], quality: f64) -> Self {
        Self {
            reference: Point2::from(reference),
            observed: Point2::from(observed),
            quality,
        }
    }

    /// Whether both points and the quality are finite.
    pub fn is_finite(&self) -> bool {
        self.quality.is_finite()
            && self.reference.coords.iter().all(|v| v.is_finite())
            && self.observed.coords.iter().all(|v| v.is_finite())
    }
}

/// Pinhole camera intrinsics.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Intrinsics {
    /// Horizontal focal length, in pixels.
    pub fx: f64,
    /// Vertical focal length, in pixels.
    pub fy: f64,
    /// Principal point abscissa.
    pub u0: f64,
    /// Principal point ordinate.
    pub v0: f64,
}

impl Intrinsics {
    /// Checked constructor.
    pub fn new(fx: f64, fy: f64, u0: f64, v0: f64) -> Result<Self, PoseError> {
        let intrinsics = Self { fx, fy, u0, v0 };
        if intrinsics.is_valid() {
            Ok(intrinsics)
        } else {
            Err(PoseError::InvalidIntrinsics { fx, fy })
        }
    }

    /// Focal lengths strictly positive and all parameters finite.
    pub fn is_valid(&self) -> bool {
        self.fx > 0.0
            && self.fy > 0.0
            && self.fx.is_finite()
            && self.fy.is_finite()
            && self.u0.is_finite()
            && self.v0.is_finite()
    }

    /// The calibration matrix `K`.
    #[rustfmt::skip]
    pub fn matrix(&self) -> Mat3 {
        Mat3::new(
            self.fx, 0.0,     self.u0,
            0.0,     self.fy, self.v0,
            0.0,     0.0,     1.0,
        )
    }

    /// The inverse calibration matrix `K^-1`.
    #[rustfmt::skip]
    pub fn inverse_matrix(&self) -> Mat3 {
        Mat3::new(
            1.0 / self.fx, 0.0,           -self.u0 / self.fx,
            0.0,           1.0 / self.fy, -self.v0 / self.fy,
            0.0,           0.0,           1.0,
        )
    }

    /// `K^-1 (x, y, 1)`: the point on the normalized image plane `z = 1`.
    #[inline]
    pub fn unproject(&self, p: &Point2) -> Vec3 {
        Vec3::new((p.x - self.u0) / self.fx, (p.y - self.v0) / self.fy, 1.0)
    }

    /// Pixel coordinates of a point in camera coordinates,
    /// `None` if it is not strictly in front of the camera.
    #[inline]
    pub fn project(&self, p: &Vec3) -> Option<Point2> {
        if !(p.z > 0.0) {
            return None;
        }
        Some(Point2::new(
            self.fx * p.x / p.z + self.u0,
            self.fy * p.y / p.z + self.v0,
        ))
    }
}

/// A rigid transformation: rotation followed by translation.
///
/// A pose with all components NaN is the "invalid pose" sentinel
/// returned by the solvers when a computation degenerates.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct RigidPose {
    /// Proper orthonormal rotation matrix.
    pub rotation: Mat3,
    /// Translation.
    pub translation: Vec3,
}

impl Default for RigidPose {
    fn default() -> Self {
        Self::identity()
    }
}

impl RigidPose {
    /// Identity transformation.
    pub fn identity() -> Self {
        Self {
            rotation: Mat3::identity(),
            translation: Vec3::zeros(),
        }
    }

    /// The invalid pose sentinel, all NaN.
    pub fn invalid() -> Self {
        Self {
            rotation: Mat3::from_element(f64::NAN),
            translation: Vec3::from_element(f64::NAN),
        }
    }

    /// Build a pose from a unit quaternion and a translation.
    pub fn from_parts(rotation: &UnitQuaternion<f64>, translation: Vec3) -> Self {
        Self {
            rotation: linalg::rotation_from_unit_quaternion(rotation),
            translation,
        }
    }

    /// Whether every component is finite.
    pub fn is_valid(&self) -> bool {
        self.rotation.iter().all(|v| v.is_finite())
            && self.translation.iter().all(|v| v.is_finite())
    }

    /// Rotation as a unit quaternion.
    pub fn quaternion(&self) -> UnitQuaternion<f64> {
        linalg::quaternion_from_rotation(&self.rotation)
    }

    /// Apply the transformation to a point.
    #[inline]
    pub fn transform(&self, p: &Vec3) -> Vec3 {
        self.rotation * p + self.translation
    }

    /// The 3x4 matrix `[R | t]`.
    pub fn matrix(&self) -> Mat3x4 {
        linalg::hstack(&self.rotation, &self.translation)
    }

    /// The homogeneous 4x4 matrix of the transformation.
    pub fn homogeneous(&self) -> Mat4 {
        let mut m = Mat4::identity();
        m.fixed_view_mut::<3, 4>(0, 0).copy_from(&self.matrix());
        m
    }

    /// Convert to the nalgebra isometry type.
    pub fn to_isometry(&self) -> Isometry3<f64> {
        Isometry3::from_parts(Translation3::from(self.translation), self.quaternion())
    }
}

/// A planar projective map, defined up to scale.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Homography(pub Mat3);

impl Default for Homography {
    fn default() -> Self {
        Self::identity()
    }
}

impl Mul for Homography {
    type Output = Homography;

    /// `(a * b)` applies `b` first, then `a`.
    fn mul(self, rhs: Homography) -> Homography {
        Homography(self.0 * rhs.0)
    }
}

impl Homography {
    /// Identity map.
    pub fn identity() -> Self {
        Self(Mat3::identity())
    }

    /// The underlying matrix.
    pub fn matrix(&self) -> &Mat3 {
        &self.0
    }

    /// Determinant of the underlying matrix.
    pub fn determinant(&self) -> f64 {
        linalg::det3(&self.0)
    }

    /// Whether the map is usable: finite entries and `|det| > epsilon`.
    pub fn is_valid(&self, epsilon: f64) -> bool {
        let det = self.determinant();
        det.is_finite() && det.abs() > epsilon
    }

    /// Scale the matrix so that its bottom-right entry is one, when possible.
    pub fn normalized(&self) -> Self {
        let scale = self.0.m33;
        if scale.abs() > f64::EPSILON {
            Self(self.0 / scale)
        } else {
            *self
        }
    }

    /// Inverse map, `None` if singular.
    pub fn inverse(&self) -> Option<Self> {
        // The singularity threshold is relative to the magnitude of the entries.
        let scale = self.0.amax();
        linalg::inverse3(&self.0, 1e-12 * scale * scale * scale).map(Self)
    }

    /// Map a point, `None` if it goes to infinity.
    #[inline]
    pub fn apply(&self, p: &Point2) -> Option<Point2> {
        let h = &self.0;
        let w = h.m31 * p.x + h.m32 * p.y + h.m33;
        if !(w.abs() > 1e-12) {
            return None;
        }
        let x = (h.m11 * p.x + h.m12 * p.y + h.m13) / w;
        let y = (h.m21 * p.x + h.m22 * p.y + h.m23) / w;
        if x.is_finite() && y.is_finite() {
            Some(Point2::new(x, y))
        } else {
            None
        }
    }

    /// Whether the last row is `(0, 0, 1)` up to scale.
    pub fn is_affine(&self) -> bool {
        let h = self.normalized().0;
        h.m31.abs() < 1e-12 && h.m32.abs() < 1e-12
    }
}

// Tests #######################################################################

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn intrinsics_inverse() {
        let k = Intrinsics::new(800.0, 780.0, 320.0, 240.0).unwrap();
        let product = k.matrix() * k.inverse_matrix();
        assert_relative_eq!(product, Mat3::identity(), epsilon = 1e-12);
        let p = Point2::new(100.0, 400.0);
        let back = k.project(&(k.unproject(&p) * 3.0)).unwrap();
        assert_relative_eq!(back, p, epsilon = 1e-9);
    }

    #[test]
    fn intrinsics_rejects_non_positive_focal() {
        assert!(Intrinsics::new(0.0, 1.0, 0.0, 0.0).is_err());
        assert!(Intrinsics::new(1.0, f64::NAN, 0.0, 0.0).is_err());
    }

    #[test]
    fn invalid_pose_sentinel() {
        assert!(!RigidPose::invalid().is_valid());
        assert!(RigidPose::identity().is_valid());
    }

    #[test]
    fn homography_inverse_and_compose() {
        let h = Homography(Mat3::new(1.2, 0.1, 30.0, -0.05, 0.9, 12.0, 1e-4, 2e-4, 1.0));
        let inv = h.inverse().unwrap();
        let p = Point2::new(42.0, -17.0);
        let q = h.apply(&p).unwrap();
        assert_relative_eq!(inv.apply(&q).unwrap(), p, epsilon = 1e-9);
        assert_relative_eq!((inv * h).normalized().0, Mat3::identity(), epsilon = 1e-12);
        assert!(!h.is_affine());
    }

    #[test]
    fn singular_homography_is_invalid() {
        let h = Homography(Mat3::new(1.0, 2.0, 3.0, 2.0, 4.0, 6.0, 0.0, 0.0, 1.0));
        assert!(!h.is_valid(1e-6));
        assert!(h.inverse().is_none());
    }
}
