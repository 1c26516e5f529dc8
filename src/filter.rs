// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Temporal smoothing of the solver output.

use std::collections::VecDeque;

use nalgebra::UnitQuaternion;
use serde::{Deserialize, Serialize};

use crate::config::PowerMode;
use crate::error::TrackingError;
use crate::linalg::{self, Vec3, Vec4};
use crate::types::RigidPose;

/// Sliding window sizes of the pose filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterSettings {
    /// Number of rotation samples averaged.
    pub rotation_window: usize,
    /// Number of translation samples averaged.
    pub translation_window: usize,
}

impl Default for FilterSettings {
    fn default() -> Self {
        Self::for_power_mode(PowerMode::Default)
    }
}

impl FilterSettings {
    /// Smaller windows in low power mode: less smoothing, less latency.
    pub fn for_power_mode(mode: PowerMode) -> Self {
        match mode {
            PowerMode::Default => Self {
                rotation_window: 12,
                translation_window: 5,
            },
            PowerMode::LowPower => Self {
                rotation_window: 6,
                translation_window: 3,
            },
        }
    }
}

/// Sliding window average of recent poses.
///
/// The most recent sample sits at the front of each window.
#[derive(Debug, Clone)]
pub struct PoseFilter {
    settings: FilterSettings,
    rotations: VecDeque<UnitQuaternion<f64>>,
    translations: VecDeque<Vec3>,
}

impl Default for PoseFilter {
    fn default() -> Self {
        Self::new(FilterSettings::default())
    }
}

impl PoseFilter {
    /// Empty filter. Windows are clamped to at least one sample.
    pub fn new(settings: FilterSettings) -> Self {
        let settings = FilterSettings {
            rotation_window: settings.rotation_window.max(1),
            translation_window: settings.translation_window.max(1),
        };
        Self {
            settings,
            rotations: VecDeque::with_capacity(settings.rotation_window),
            translations: VecDeque::with_capacity(settings.translation_window),
        }
    }

    /// Current window sizes.
    pub fn settings(&self) -> &FilterSettings {
        &self.settings
    }

    /// Change window sizes. Clears the filter.
    pub fn configure(&mut self, settings: FilterSettings) {
        *self = Self::new(settings);
    }

    /// Whether no sample was fed since the last reset.
    pub fn is_empty(&self) -> bool {
        self.rotations.is_empty()
    }

    /// Forget all samples.
    pub fn reset(&mut self) {
        self.rotations.clear();
        self.translations.clear();
    }

    /// Push a pose sample. Non-finite samples are rejected and leave the filter unchanged.
    pub fn feed(&mut self, sample: &RigidPose) -> Result<(), TrackingError> {
        if !sample.is_valid() {
            return Err(TrackingError::InvalidPose);
        }
        self.feed_parts(sample.quaternion(), sample.translation)
    }

    /// Push a sample given as a quaternion and a translation.
    pub fn feed_parts(
        &mut self,
        rotation: UnitQuaternion<f64>,
        translation: Vec3,
    ) -> Result<(), TrackingError> {
        let finite = rotation.coords.iter().all(|v| v.is_finite())
            && translation.iter().all(|v| v.is_finite());
        if !finite {
            return Err(TrackingError::InvalidPose);
        }

        // The first sample fills the windows, so there is no bias toward the identity.
        if self.is_empty() {
            let (r, t) = (self.settings.rotation_window, self.settings.translation_window);
            self.rotations.extend(std::iter::repeat(rotation).take(r));
            self.translations.extend(std::iter::repeat(translation).take(t));
            return Ok(());
        }

        if self.rotations.len() == self.settings.rotation_window {
            self.rotations.pop_back();
        }
        self.rotations.push_front(rotation);
        if self.translations.len() == self.settings.translation_window {
            self.translations.pop_back();
        }
        self.translations.push_front(translation);
        Ok(())
    }

    /// The smoothed pose, identity if the filter is empty.
    pub fn run(&self) -> RigidPose {
        if self.is_empty() {
            return RigidPose::identity();
        }
        RigidPose::from_parts(&self.average_rotation(), self.average_translation())
    }

    /// Weighted average favoring recent samples:
    /// the $i$-th most recent of $N$ weighs $(N - i) / (N (N + 1) / 2)$.
    fn average_translation(&self) -> Vec3 {
        let n = self.translations.len();
        let total = (n * (n + 1) / 2) as f64;
        self.translations
            .iter()
            .enumerate()
            .map(|(i, t)| t * ((n - i) as f64 / total))
            .sum()
    }

    /// Quaternion average, all samples moved to the `w >= 0` hemisphere first.
    fn average_rotation(&self) -> UnitQuaternion<f64> {
        let sum: Vec4 = self
            .rotations
            .iter()
            .map(|q| if q.w < 0.0 { -q.coords } else { q.coords })
            .sum();
        if sum.norm() > f64::EPSILON {
            linalg::unit_quaternion(sum)
        } else {
            self.rotations[0]
        }
    }
}

// Tests #######################################################################
