// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Frame to frame motion models: full perspective and affine.

use crate::consensus::Estimator;
use crate::linalg::{self, Mat3};
use crate::types::{Correspondence, Homography, Point2};

/// Smallest pivot accepted by the homography system.
const PIVOT_EPSILON: f64 = 1e-10;

/// Exact homography through four point pairs, `None` if three of them are collinear.
pub fn homography_from_four(src: &[Point2; 4], dst: &[Point2; 4]) -> Option<Homography> {
    let mut a = [[0.0; 9]; 8];
    for (i, (p, q)) in src.iter().zip(dst.iter()).enumerate() {
        let (x, y, u, v) = (p.x, p.y, q.x, q.y);
        a[2 * i] = [x, y, 1.0, 0.0, 0.0, 0.0, -u * x, -u * y, u];
        a[2 * i + 1] = [0.0, 0.0, 0.0, x, y, 1.0, -v * x, -v * y, v];
    }
    let h = linalg::solve8(&mut a, PIVOT_EPSILON)?;
    #[rustfmt::skip]
    let m = Mat3::new(
        h[0], h[1], h[2],
        h[3], h[4], h[5],
        h[6], h[7], 1.0,
    );
    let homography = Homography(m);
    homography.is_valid(f64::EPSILON).then_some(homography)
}

/// Exact affine map through three point pairs, `None` if they are collinear.
pub fn affine_from_three(src: &[Point2; 3], dst: &[Point2; 3]) -> Option<Homography> {
    #[rustfmt::skip]
    let points = Mat3::new(
        src[0].x, src[0].y, 1.0,
        src[1].x, src[1].y, 1.0,
        src[2].x, src[2].y, 1.0,
    );
    let scale = points.amax().max(1.0);
    let inverse = linalg::inverse3(&points, 1e-9 * scale * scale)?;
    let row_x = inverse * nalgebra::Vector3::new(dst[0].x, dst[1].x, dst[2].x);
    let row_y = inverse * nalgebra::Vector3::new(dst[0].y, dst[1].y, dst[2].y);
    #[rustfmt::skip]
    let m = Mat3::new(
        row_x[0], row_x[1], row_x[2],
        row_y[0], row_y[1], row_y[2],
        0.0,      0.0,      1.0,
    );
    Some(Homography(m))
}

/// Full perspective motion from four point pairs.
#[derive(Debug, Default, Clone, Copy)]
pub struct HomographyEstimator;

impl Estimator for HomographyEstimator {
    type Model = Homography;
    const MIN_SAMPLES: usize = 4;

    fn fit(&mut self, data: &[Correspondence], sample: &[usize]) -> Option<Homography> {
        let src = [0, 1, 2, 3].map(|i| data[sample[i]].reference);
        let dst = [0, 1, 2, 3].map(|i| data[sample[i]].observed);
        homography_from_four(&src, &dst)
    }

    fn homography(&self, model: &Homography) -> Option<Homography> {
        Some(*model)
    }
}

/// Affine motion from three point pairs.
#[derive(Debug, Default, Clone, Copy)]
pub struct AffineEstimator;

impl Estimator for AffineEstimator {
    type Model = Homography;
    const MIN_SAMPLES: usize = 3;

    fn fit(&mut self, data: &[Correspondence], sample: &[usize]) -> Option<Homography> {
        let src = [0, 1, 2].map(|i| data[sample[i]].reference);
        let dst = [0, 1, 2].map(|i| data[sample[i]].observed);
        affine_from_three(&src, &dst)
    }

    fn homography(&self, model: &Homography) -> Option<Homography> {
        Some(*model)
    }
}

/// Constant velocity extrapolation of a running homography.
///
/// Remembers the last frame to frame motion and replays it on demand,
/// which lets frames be skipped while a pose is still published.
#[derive(Debug, Clone, Default)]
pub struct MotionModel {
    velocity: Option<Homography>,
}

impl MotionModel {
    /// Record the motion measured between the two last frames.
    pub fn update(&mut self, motion: Homography) {
        self.velocity = Some(motion);
    }

    /// Last recorded motion.
    pub fn velocity(&self) -> Option<&Homography> {
        self.velocity.as_ref()
    }

    /// Predict the next running homography, `None` before the first measurement.
    pub fn predict(&self, current: &Homography) -> Option<Homography> {
        self.velocity.map(|v| (v * *current).normalized())
    }

    /// Forget the recorded motion.
    pub fn reset(&mut self) {
        self.velocity = None;
    }
}

// Tests #######################################################################
