// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! States, transitions and reports of the tracking lifecycle.

use std::fmt;

use crate::error::PoseError;
use crate::linalg::{Mat3, Mat3x4};
use crate::types::{Correspondence, Homography, Point2, RigidPose};

/// Identifier of a reference image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ReferenceId(pub usize);

impl fmt::Display for ReferenceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A known planar reference image.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reference {
    /// Identifier reported in events.
    pub id: ReferenceId,
    /// Width in pixels.
    pub width: f64,
    /// Height in pixels.
    pub height: f64,
}

impl Reference {
    /// Checked constructor.
    pub fn new(id: usize, width: f64, height: f64) -> Result<Self, PoseError> {
        let valid = width > 0.0 && height > 0.0 && width.is_finite() && height.is_finite();
        if !valid {
            return Err(PoseError::InvalidReference { id, width, height });
        }
        Ok(Self {
            id: ReferenceId(id),
            width,
            height,
        })
    }

    /// Map from reference pixels to the virtual target square.
    ///
    /// The longest side spans $[-1, 1]$, the image is centered and $y$ points up.
    #[rustfmt::skip]
    pub fn normalization(&self) -> Homography {
        let s = 2.0 / self.width.max(self.height);
        Homography(Mat3::new(
            s,   0.0, -0.5 * self.width * s,
            0.0, -s,  0.5 * self.height * s,
            0.0, 0.0, 1.0,
        ))
    }

    /// A reference pixel in the virtual target square.
    pub fn normalize(&self, p: &Point2) -> Point2 {
        let s = 2.0 / self.width.max(self.height);
        Point2::new((p.x - 0.5 * self.width) * s, (0.5 * self.height - p.y) * s)
    }
}

/// Keypoints of the tracked target in the last processed frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    /// Tracked reference image.
    pub reference: ReferenceId,
    /// Screen positions matched in the last frame.
    pub keypoints: Vec<Point2>,
    /// Affine motion accumulated since the target was found,
    /// keeping the rectified search area aligned with the target.
    pub window: Homography,
    /// Virtual homography of the last frame.
    pub homography: Homography,
}

/// External feature detection and matching.
///
/// Implementations return candidate matches with their quality
/// (lower is better, typically a descriptor distance ratio).
/// The tracker applies its own ratio threshold.
pub trait FeaturePipeline {
    /// A video frame.
    type Frame;

    /// Matches between a reference image (`reference` side, reference pixels)
    /// and the frame (`observed` side, screen pixels).
    fn match_reference(
        &mut self,
        frame: &Self::Frame,
        reference: &Reference,
    ) -> Vec<Correspondence>;

    /// Matches between the template keypoints (`reference` side)
    /// and the frame (`observed` side), both in screen pixels.
    fn match_template(&mut self, frame: &Self::Frame, template: &Template) -> Vec<Correspondence>;
}

/// Lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TrackerState {
    /// Looking for any reference image.
    #[default]
    Scanning,
    /// Confirming a candidate over consecutive frames.
    Acquiring,
    /// Tracking a target.
    Tracking,
    /// Still logically tracking, with the last few frames failed.
    ///
    /// Reported while failures are absorbed, up to the loss tolerance. The last good pose
    /// is republished and no event is emitted. A good frame returns to `Tracking`.
    Lost,
}

/// Notification emitted on lifecycle edges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackerEvent {
    /// A target was confirmed and is now tracked.
    TargetFound(ReferenceId),
    /// The tracked target was lost beyond tolerance.
    TargetLost(ReferenceId),
}

/// Payload of a lifecycle edge.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// Start or restart the confirmation of a candidate.
    ToAcquiring {
        /// Candidate reference image.
        reference: ReferenceId,
        /// Virtual homography of the confirming frame.
        homography: Homography,
        /// Inlier keypoints of the confirming frame.
        template: Vec<Point2>,
        /// Number of inliers.
        inliers: usize,
    },
    /// The candidate is confirmed.
    ToTracking {
        /// Confirmed reference image.
        reference: ReferenceId,
        /// Best virtual homography seen while confirming.
        homography: Homography,
        /// Keypoints of the frame the homography was estimated on.
        template: Vec<Point2>,
    },
    /// Back to searching, after a lost target or a failed confirmation.
    ToScanning {
        /// The target that was being tracked, if any.
        lost: Option<ReferenceId>,
    },
}

/// What the tracker publishes for one frame.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameReport {
    /// State after the frame.
    pub state: TrackerState,
    /// Tracked or candidate reference image.
    pub reference: Option<ReferenceId>,
    /// Smoothed target pose, in solver units.
    pub pose: Option<RigidPose>,
    /// Camera matrix from virtual space to screen pixels.
    pub matrix: Option<Mat3x4>,
    /// Event emitted on this frame.
    pub event: Option<TrackerEvent>,
}

impl FrameReport {
    /// Nothing to publish.
    pub fn idle(state: TrackerState, reference: Option<ReferenceId>) -> Self {
        Self {
            state,
            reference,
            pose: None,
            matrix: None,
            event: None,
        }
    }

    /// Whether a pose is published.
    pub fn has_pose(&self) -> bool {
        self.pose.is_some()
    }
}

// Tests #######################################################################

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn normalization_centers_reference() {
        let r = Reference::new(0, 400.0, 200.0).unwrap();
        let corners = [
            (Point2::new(0.0, 0.0), Point2::new(-1.0, 0.5)),
            (Point2::new(400.0, 200.0), Point2::new(1.0, -0.5)),
            (Point2::new(200.0, 100.0), Point2::new(0.0, 0.0)),
        ];
        let h = r.normalization();
        for (p, expected) in corners {
            assert_relative_eq!(r.normalize(&p), expected, epsilon = 1e-12);
            assert_relative_eq!(h.apply(&p).unwrap(), expected, epsilon = 1e-12);
        }
        assert!(Reference::new(1, 0.0, 10.0).is_err());
    }
}
