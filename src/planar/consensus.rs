// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Robust planar pose.

use crate::consensus::{Estimator, Ransac};
use crate::error::PoseError;
use crate::planar::{PlanarPoseSolver, SolverWorkspace, MIN_CORRESPONDENCES};
use crate::types::{Correspondence, Homography, RigidPose};

/// This implements the [`Estimator`] trait for the planar pose solver.
///
/// Each hypothesis is solved from a minimal sample of four correspondences,
/// then scored through the homography the candidate pose induces.
pub struct PoseEstimator<'s> {
    solver: &'s PlanarPoseSolver,
    workspace: SolverWorkspace,
}

impl<'s> PoseEstimator<'s> {
    /// Estimator borrowing a solver.
    pub fn new(solver: &'s PlanarPoseSolver) -> Self {
        Self {
            solver,
            workspace: SolverWorkspace::with_capacity(MIN_CORRESPONDENCES),
        }
    }
}

impl Estimator for PoseEstimator<'_> {
    type Model = RigidPose;
    const MIN_SAMPLES: usize = MIN_CORRESPONDENCES;

    fn fit(&mut self, data: &[Correspondence], sample: &[usize]) -> Option<RigidPose> {
        let pose = self.solver.solve_sample(data, sample, &mut self.workspace);
        pose.is_valid().then_some(pose)
    }

    fn homography(&self, model: &RigidPose) -> Option<Homography> {
        Some(self.solver.homography(model))
    }
}

/// Robust pose with its consensus.
#[derive(Debug, Clone)]
pub struct PoseEstimate {
    /// Best pose, [`RigidPose::invalid`] if no hypothesis could be scored.
    pub pose: RigidPose,
    /// Homography induced by the best pose, from reference to observed pixels.
    pub homography: Option<Homography>,
    /// Inlier mask over the input correspondences.
    pub inliers: Vec<bool>,
    /// Number of inliers.
    pub inlier_count: usize,
    /// Truncated quadratic cost of the best pose.
    pub error: f64,
}

impl PlanarPoseSolver {
    /// Robust pose from noisy correspondences with outliers.
    pub fn solve_ransac(
        &self,
        correspondences: &[Correspondence],
        ransac: &mut Ransac,
    ) -> Result<PoseEstimate, PoseError> {
        let mut estimator = PoseEstimator::new(self);
        let consensus = ransac.run(&mut estimator, correspondences)?;
        Ok(PoseEstimate {
            pose: consensus.model.unwrap_or_else(RigidPose::invalid),
            homography: consensus.homography,
            inliers: ransac.inliers().to_vec(),
            inlier_count: consensus.inliers,
            error: consensus.error,
        })
    }
}
