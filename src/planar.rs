// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Closed-form pose of a planar target.
//!
//! Reference points are pixels of a frontal view of the target taken by the same camera,
//! with the target at a fixed virtual depth $z_0$. Unprojecting them gives 3D points
//! $\bm{u_i}$ on the plane $Z = z_0$. Observed pixels give unit lines of sight
//! $\bm{v_i}$. The solver looks for the rigid transformation satisfying
//! $$
//! s_i \ \bm{v_i} = \bm{R \ u_i} + \bm{t}
//! $$
//! where $s_i > 0$ is the distance from the camera to the transformed point.
//!
//! 1. Coplanarity gives, for a pivot $\bm{u_0}$ and a triple $i, j, k$,
//!    $\bm{u_k} - \bm{u_0} = a (\bm{u_i} - \bm{u_0}) + b (\bm{u_j} - \bm{u_0})$.
//!    Rigid transformations preserve $(a, b)$, which yields a 3x3 linear system
//!    in the depth ratios $s_i / s_0$, $s_j / s_0$, $s_k / s_0$.
//! 2. The rotation maximizing $\sum \langle \bar{\bm{v}}_i, \bm{R} \bar{\bm{u}}_i \rangle$
//!    over centered point sets is the top eigenvector of a symmetric 4x4 matrix.
//!    Since the reference points are coplanar, its characteristic polynomial is
//!    biquadratic and the eigenpair has a closed form.
//! 3. The absolute depth $s_0$ comes from the known distance between the pivot and
//!    its farthest neighbor, then $\bm{t} = s_0 \bar{\bm{v}} - \bm{R} \bar{\bm{u}}$.
//!
//! **Scale.** The virtual depth $z_0$ is a guess tied to the assumed size of the target
//! relative to the sensor, not a measurement. Translations are therefore expressed in
//! units where the frontal target sits at depth $z_0$, and are not metric.

pub mod consensus;

use crate::error::PoseError;
use crate::linalg::{self, Mat3, Mat4, Vec2, Vec3};
use crate::types::{Correspondence, Homography, Intrinsics, Point2, RigidPose};

/// Minimal number of correspondences for a pose.
pub const MIN_CORRESPONDENCES: usize = 4;

/// Relative threshold on the 2x2 determinant detecting collinear reference triples.
const COLLINEAR_EPSILON: f64 = 1e-9;

/// Relative threshold on the 3x3 determinant of the depth ratio system.
const RATIO_SYSTEM_EPSILON: f64 = 1e-12;

/// Reusable scratch buffers of the solver.
///
/// Keep one per solver user and pass it to every call:
/// buffers only grow, so steady-state solves do not allocate.
#[derive(Debug, Clone, Default)]
pub struct SolverWorkspace {
    points: Vec<Vec3>,
    rays: Vec<Vec3>,
    ratios: Vec<f64>,
}

impl SolverWorkspace {
    /// Workspace sized for `n` correspondences.
    pub fn with_capacity(n: usize) -> Self {
        Self {
            points: Vec::with_capacity(n),
            rays: Vec::with_capacity(n),
            ratios: Vec::with_capacity(n),
        }
    }

    fn clear(&mut self) {
        self.points.clear();
        self.rays.clear();
        self.ratios.clear();
    }
}

/// Planar pose solver for a given camera.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct PlanarPoseSolver {
    intrinsics: Intrinsics,
    depth: f64,
}

impl PlanarPoseSolver {
    /// Solver for the given intrinsics and virtual target depth $z_0$.
    pub fn new(intrinsics: Intrinsics, depth: f64) -> Result<Self, PoseError> {
        if !intrinsics.is_valid() {
            return Err(PoseError::InvalidIntrinsics {
                fx: intrinsics.fx,
                fy: intrinsics.fy,
            });
        }
        if !(depth > 0.0 && depth.is_finite()) {
            return Err(PoseError::InvalidDepth(depth));
        }
        Ok(Self { intrinsics, depth })
    }

    /// Camera intrinsics.
    pub fn intrinsics(&self) -> &Intrinsics {
        &self.intrinsics
    }

    /// Virtual depth of the frontal target.
    pub fn depth(&self) -> f64 {
        self.depth
    }

    /// 3D point of a reference pixel: $z_0 K^{-1} (x, y, 1)$.
    #[inline]
    pub fn unproject_reference(&self, p: &Point2) -> Vec3 {
        self.intrinsics.unproject(p) * self.depth
    }

    /// Unit line of sight of an observed pixel.
    #[inline]
    pub fn unproject_observed(&self, p: &Point2) -> Vec3 {
        self.intrinsics.unproject(p).normalize()
    }

    /// Homography from reference pixels to observed pixels induced by a pose:
    /// $H = K (z_0 R K^{-1} + t e_3^T)$.
    pub fn homography(&self, pose: &RigidPose) -> Homography {
        let mut m = pose.rotation * self.intrinsics.inverse_matrix() * self.depth;
        let mut last = m.column(2).into_owned();
        last += pose.translation;
        m.set_column(2, &last);
        Homography(self.intrinsics.matrix() * m).normalized()
    }

    /// Pose from `n >= 4` correspondences.
    ///
    /// Degenerate configurations give [`RigidPose::invalid`],
    /// too few correspondences are an error.
    pub fn solve(
        &self,
        correspondences: &[Correspondence],
        workspace: &mut SolverWorkspace,
    ) -> Result<RigidPose, PoseError> {
        if correspondences.len() < MIN_CORRESPONDENCES {
            return Err(PoseError::NotEnoughCorrespondences {
                required: MIN_CORRESPONDENCES,
                actual: correspondences.len(),
            });
        }
        Ok(self.solve_iter(correspondences.iter(), workspace))
    }

    /// Pose from the correspondences at `indices`, no length check beyond the minimum.
    pub(crate) fn solve_sample(
        &self,
        data: &[Correspondence],
        indices: &[usize],
        workspace: &mut SolverWorkspace,
    ) -> RigidPose {
        if indices.len() < MIN_CORRESPONDENCES {
            return RigidPose::invalid();
        }
        self.solve_iter(indices.iter().map(|&i| &data[i]), workspace)
    }

    fn solve_iter<'a, I>(&self, correspondences: I, workspace: &mut SolverWorkspace) -> RigidPose
    where
        I: Iterator<Item = &'a Correspondence>,
    {
        workspace.clear();
        for c in correspondences {
            workspace.points.push(self.unproject_reference(&c.reference));
            workspace.rays.push(self.unproject_observed(&c.observed));
        }
        estimate(&workspace.points, &workspace.rays, &mut workspace.ratios)
            .unwrap_or_else(RigidPose::invalid)
    }
}

/// Full closed-form estimation, `None` on any degeneracy.
fn estimate(points: &[Vec3], rays: &[Vec3], ratios: &mut Vec<f64>) -> Option<RigidPose> {
    relative_depths(points, rays, ratios)?;
    let (rotation, reference_centroid, observed_centroid) = rotation(points, rays, ratios)?;
    let scale = pivot_depth(points, rays, ratios)?;
    let translation = observed_centroid * scale - rotation * reference_centroid;
    let pose = RigidPose {
        rotation,
        translation,
    };
    pose.is_valid().then_some(pose)
}

/// Fill `ratios` with $s_i / s_0$, processing consecutive triples after the pivot.
///
/// When the point count after the pivot is not a multiple of three,
/// the last triple overlaps the previous one.
pub fn relative_depths(points: &[Vec3], rays: &[Vec3], ratios: &mut Vec<f64>) -> Option<()> {
    let n = points.len();
    if n < MIN_CORRESPONDENCES || rays.len() != n {
        return None;
    }
    ratios.clear();
    ratios.resize(n, f64::NAN);
    ratios[0] = 1.0;

    let mut start = 1;
    while start < n {
        let first = start.min(n - 3);
        let triple = [first, first + 1, first + 2];
        let [ri, rj, rk] = triple_ratios(points, rays, triple)?;
        ratios[triple[0]] = ri;
        ratios[triple[1]] = rj;
        ratios[triple[2]] = rk;
        start += 3;
    }
    Some(())
}

/// Depth ratios of one triple relative to the pivot at index 0.
///
/// Writing $\bm{u_k} - \bm{u_0} = a (\bm{u_i} - \bm{u_0}) + b (\bm{u_j} - \bm{u_0})$
/// and $r_m = s_m / s_0$, the transformed points satisfy
/// $$
/// r_k \bm{v_k} - a \ r_i \bm{v_i} - b \ r_j \bm{v_j} = (1 - a - b) \ \bm{v_0}.
/// $$
pub fn triple_ratios(points: &[Vec3], rays: &[Vec3], [i, j, k]: [usize; 3]) -> Option<[f64; 3]> {
    let pivot = points[0];
    let ei: Vec2 = (points[i] - pivot).xy();
    let ej: Vec2 = (points[j] - pivot).xy();
    let ek: Vec2 = (points[k] - pivot).xy();

    // Collinear with the pivot.
    let det = linalg::det2(&ei, &ej);
    if !(det.abs() > COLLINEAR_EPSILON * ei.norm() * ej.norm()) {
        return None;
    }
    let a = linalg::det2(&ek, &ej) / det;
    let b = linalg::det2(&ei, &ek) / det;

    let system = Mat3::from_columns(&[rays[k], rays[i] * -a, rays[j] * -b]);
    let epsilon = RATIO_SYSTEM_EPSILON * a.abs().max(1.0) * b.abs().max(1.0);
    if !(linalg::det3(&system).abs() > epsilon) {
        return None;
    }
    let inverse = linalg::inverse3(&system, epsilon)?;
    let solution = inverse * (rays[0] * (1.0 - a - b));
    let (rk, ri, rj) = (solution.x, solution.y, solution.z);

    // Points must stay in front of the camera.
    if [ri, rj, rk].iter().all(|r| r.is_finite() && *r > 0.0) {
        Some([ri, rj, rk])
    } else {
        None
    }
}

/// Optimal rotation between the centered reference points and the centered
/// lines of sight scaled by their depth ratios.
///
/// Returns the rotation and both centroids,
/// the observed one being expressed in units of $s_0$.
fn rotation(points: &[Vec3], rays: &[Vec3], ratios: &[f64]) -> Option<(Mat3, Vec3, Vec3)> {
    let n = points.len() as f64;
    let reference_centroid = points.iter().sum::<Vec3>() / n;
    let observed_centroid = rays
        .iter()
        .zip(ratios)
        .map(|(v, r)| v * *r)
        .sum::<Vec3>()
        / n;

    // Reference points share the same z, so only six of the nine correlations survive.
    let (mut xx, mut xy, mut xz, mut yx, mut yy, mut yz) = (0.0, 0.0, 0.0, 0.0, 0.0, 0.0);
    for ((p, v), r) in points.iter().zip(rays).zip(ratios) {
        let u = p - reference_centroid;
        let w = v * *r - observed_centroid;
        xx += u.x * w.x;
        xy += u.x * w.y;
        xz += u.x * w.z;
        yx += u.y * w.x;
        yy += u.y * w.y;
        yz += u.y * w.z;
    }

    #[rustfmt::skip]
    let m = Mat4::new(
        xx + yy, yz,      -xz,     xy - yx,
        yz,      xx - yy, xy + yx, xz,
        -xz,     xy + yx, yy - xx, yz,
        xy - yx, xz,      yz,      -xx - yy,
    );
    let (_, q) = linalg::top_eigenpair_biquadratic(&m)?;
    let full = linalg::rotation_from_quaternion(&q)?;
    let r1: Vec3 = full.column(0).into_owned();
    let r2: Vec3 = full.column(1).into_owned();
    let rotation = linalg::rotation_from_columns(&r1, &r2);
    Some((rotation, reference_centroid, observed_centroid))
}

/// Absolute distance $s_0$ from the camera to the transformed pivot.
fn pivot_depth(points: &[Vec3], rays: &[Vec3], ratios: &[f64]) -> Option<f64> {
    let pivot = points[0];
    let (far, reference_distance) = points
        .iter()
        .enumerate()
        .skip(1)
        .map(|(i, p)| (i, (p - pivot).norm()))
        .max_by(|a, b| a.1.total_cmp(&b.1))
        .unwrap_or((0, 0.0));
    let observed_distance = (rays[far] * ratios[far] - rays[0]).norm();
    let scale = reference_distance / observed_distance;
    if scale.is_finite() && scale > 0.0 {
        Some(scale)
    } else {
        None
    }
}

// Tests #######################################################################
