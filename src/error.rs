// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Error types.
//!
//! Numerical failures (singular intermediates, degenerate samples) are not errors:
//! they surface as [`RigidPose::invalid`](crate::RigidPose::invalid)
//! or as a discarded RANSAC hypothesis.

use thiserror::Error;

/// Malformed input handed to a solver. These are caller bugs.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PoseError {
    /// Fewer correspondences than the estimator needs.
    #[error("need at least {required} point correspondences, got {actual}")]
    NotEnoughCorrespondences {
        /// Minimal number of correspondences.
        required: usize,
        /// Number of correspondences provided.
        actual: usize,
    },

    /// Focal lengths must be strictly positive and all parameters finite.
    #[error("invalid intrinsics: fx = {fx}, fy = {fy}")]
    InvalidIntrinsics {
        /// Horizontal focal length.
        fx: f64,
        /// Vertical focal length.
        fy: f64,
    },

    /// The virtual target depth must be strictly positive and finite.
    #[error("invalid target depth {0}")]
    InvalidDepth(f64),

    /// A screen with an empty or non-finite size.
    #[error("invalid screen size {width}x{height}")]
    InvalidScreen {
        /// Width in pixels.
        width: f64,
        /// Height in pixels.
        height: f64,
    },

    /// The camera field of view must lie strictly between 0 and 180 degrees.
    #[error("invalid field of view {0} degrees")]
    InvalidFov(f64),

    /// A reference image with an empty or non-finite size.
    #[error("reference image {id} has invalid size {width}x{height}")]
    InvalidReference {
        /// Identifier of the reference image.
        id: usize,
        /// Width in pixels.
        width: f64,
        /// Height in pixels.
        height: f64,
    },
}

/// A frame that could not be tracked.
///
/// The tracking lifecycle absorbs these for a few consecutive frames
/// before declaring the target lost.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TrackingError {
    /// Not enough good matches survived the ratio test.
    #[error("not enough matches: {found} < {required}")]
    InsufficientMatches {
        /// Matches that passed the ratio test.
        found: usize,
        /// Minimum required.
        required: usize,
    },

    /// The best motion model did not gather enough inliers.
    #[error("not enough inliers: {found} < {required}")]
    InsufficientInliers {
        /// Inliers of the best hypothesis.
        found: usize,
        /// Minimum required.
        required: usize,
    },

    /// A homography with a vanishing or non-finite determinant.
    #[error("singular homography (det = {0:e})")]
    SingularHomography(f64),

    /// The pose solver or the pose filter produced a non-finite pose.
    #[error("pose is not finite")]
    InvalidPose,

    /// Malformed input reached a solver or the camera.
    #[error(transparent)]
    Invalid(#[from] PoseError),
}
