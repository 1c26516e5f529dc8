// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Tracker configuration.
//!
//! All settings deserialize from partial documents: missing fields take their default.

use serde::{Deserialize, Serialize};

use crate::consensus::RansacSettings;
use crate::filter::FilterSettings;

/// User selected operating mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PowerMode {
    /// Full smoothing, frame skipping allowed.
    #[default]
    Default,
    /// Short filter windows and no frame skipping: lower latency and cost.
    LowPower,
}

/// Target search settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanningSettings {
    /// Matches with a quality above this ratio are discarded.
    pub match_ratio: f64,
    /// Minimum good matches for a reference image to be considered.
    pub min_matches: usize,
    /// Minimum RANSAC inliers for a frame to confirm a candidate.
    pub min_inliers: usize,
    /// Consecutive confirming frames before tracking starts.
    pub confirmation_frames: usize,
}

impl Default for ScanningSettings {
    fn default() -> Self {
        Self {
            match_ratio: 0.7,
            min_matches: 8,
            min_inliers: 8,
            confirmation_frames: 3,
        }
    }
}

/// Continuous tracking settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingSettings {
    /// Matches with a quality above this ratio are discarded.
    pub match_ratio: f64,
    /// Minimum good matches per frame.
    pub min_matches: usize,
    /// Minimum inliers of the perspective motion model.
    pub min_inliers: usize,
    /// Consecutive failing frames absorbed before the target is declared lost.
    pub lost_tolerance: usize,
    /// Run matching every other frame and extrapolate in between.
    pub turbo: bool,
}

impl Default for TrackingSettings {
    fn default() -> Self {
        Self {
            match_ratio: 0.8,
            min_matches: 8,
            min_inliers: 6,
            lost_tolerance: 5,
            turbo: false,
        }
    }
}

/// Camera guess settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraSettings {
    /// Guessed horizontal field of view, in degrees.
    pub fov_degrees: f64,
    /// Size of the frontal target relative to the smallest screen dimension.
    pub target_fill: f64,
    /// Determinant below which a homography is rejected.
    pub homography_epsilon: f64,
}

impl Default for CameraSettings {
    fn default() -> Self {
        Self {
            fov_degrees: 60.0,
            target_fill: 1.0,
            homography_epsilon: 1e-6,
        }
    }
}

/// Complete tracker configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerSettings {
    /// Target search.
    pub scanning: ScanningSettings,
    /// Continuous tracking.
    pub tracking: TrackingSettings,
    /// Robust fitting.
    pub ransac: RansacSettings,
    /// Camera guess.
    pub camera: CameraSettings,
    /// Operating mode.
    pub power_mode: PowerMode,
}

impl TrackerSettings {
    /// Pose filter windows for the current power mode.
    pub fn filter(&self) -> FilterSettings {
        FilterSettings::for_power_mode(self.power_mode)
    }

    /// Whether frames may be skipped while tracking.
    pub fn turbo_enabled(&self) -> bool {
        self.tracking.turbo && self.power_mode != PowerMode::LowPower
    }
}

// Tests #######################################################################
