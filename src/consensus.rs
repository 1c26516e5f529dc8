// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Minimal RANSAC driver.
//!
//! Every model handled here induces a planar map from reference to observed points,
//! so hypotheses are all scored the same way: by the bidirectional reprojection error
//! of that map. A point is an inlier only if both its forward error
//! (reference to observed) and its backward error (observed to reference, through the
//! inverse map) are below the threshold. Among all hypotheses, the one with the lowest
//! truncated quadratic cost is kept.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::PoseError;
use crate::types::{Correspondence, Homography};

/// Model estimator plugged into the [`Ransac`] driver.
pub trait Estimator {
    /// The estimated model.
    type Model: Clone;

    /// Size of a minimal sample.
    const MIN_SAMPLES: usize;

    /// Fit a model on the correspondences at `sample` indices.
    ///
    /// Return `None` if the sample is degenerate or the fit fails numerically.
    fn fit(&mut self, data: &[Correspondence], sample: &[usize]) -> Option<Self::Model>;

    /// The planar map from reference to observed points induced by a model.
    fn homography(&self, model: &Self::Model) -> Option<Homography>;
}

/// RANSAC settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RansacSettings {
    /// Number of hypotheses.
    pub hypotheses: usize,
    /// Inlier threshold on the reprojection error, in pixels.
    pub threshold: f64,
    /// Stop as soon as a hypothesis reaches this inlier ratio.
    pub early_exit_ratio: Option<f64>,
    /// Seed of the sampling generator.
    pub seed: u64,
}

impl Default for RansacSettings {
    fn default() -> Self {
        Self {
            hypotheses: 100,
            threshold: 3.0,
            early_exit_ratio: Some(0.95),
            seed: 0x5eed,
        }
    }
}

/// Outcome of a RANSAC run.
#[derive(Debug, Clone)]
pub struct Consensus<M> {
    /// Best model, `None` if no hypothesis could be scored.
    pub model: Option<M>,
    /// Map induced by the best model.
    pub homography: Option<Homography>,
    /// Number of inliers of the best model.
    pub inliers: usize,
    /// Truncated quadratic cost of the best model.
    pub error: f64,
    /// Number of hypotheses drawn.
    pub hypotheses: usize,
}

impl<M> Consensus<M> {
    fn empty() -> Self {
        Self {
            model: None,
            homography: None,
            inliers: 0,
            error: f64::INFINITY,
            hypotheses: 0,
        }
    }

    /// Ratio of inliers over the number of correspondences.
    pub fn inlier_ratio(&self, total: usize) -> f64 {
        if total == 0 {
            0.0
        } else {
            self.inliers as f64 / total as f64
        }
    }
}

/// RANSAC driver owning its random generator and scratch buffers.
///
/// Buffers grow to the largest correspondence set seen and are reused afterwards,
/// so steady-state runs do not allocate.
pub struct Ransac {
    settings: RansacSettings,
    rng: StdRng,
    order: Vec<usize>,
    mask: Vec<bool>,
    best_mask: Vec<bool>,
}

impl Ransac {
    /// New driver, seeded from the settings.
    pub fn new(settings: RansacSettings) -> Self {
        Self {
            rng: StdRng::seed_from_u64(settings.seed),
            settings,
            order: Vec::new(),
            mask: Vec::new(),
            best_mask: Vec::new(),
        }
    }

    /// Current settings.
    pub fn settings(&self) -> &RansacSettings {
        &self.settings
    }

    /// Inlier mask of the best hypothesis of the last run.
    pub fn inliers(&self) -> &[bool] {
        &self.best_mask
    }

    /// Run RANSAC over `data` with the given estimator.
    ///
    /// Fails only when `data` is smaller than a minimal sample.
    /// Degenerate samples and unscorable hypotheses are skipped.
    pub fn run<E: Estimator>(
        &mut self,
        estimator: &mut E,
        data: &[Correspondence],
    ) -> Result<Consensus<E::Model>, PoseError> {
        let n = data.len();
        if n < E::MIN_SAMPLES {
            return Err(PoseError::NotEnoughCorrespondences {
                required: E::MIN_SAMPLES,
                actual: n,
            });
        }

        self.order.clear();
        self.order.extend(0..n);
        self.mask.clear();
        self.mask.resize(n, false);
        self.best_mask.clear();
        self.best_mask.resize(n, false);

        let threshold = self.settings.threshold;
        let mut best = Consensus::empty();
        for iteration in 0..self.settings.hypotheses {
            best.hypotheses = iteration + 1;
            self.order.shuffle(&mut self.rng);
            let sample = &self.order[..E::MIN_SAMPLES];

            let Some(model) = estimator.fit(data, sample) else {
                continue;
            };
            let Some(homography) = estimator.homography(&model) else {
                continue;
            };
            let scored = score(&homography, data, threshold, &mut self.mask);
            let Some((inliers, error)) = scored else {
                continue;
            };

            if error < best.error {
                best.model = Some(model);
                best.homography = Some(homography);
                best.inliers = inliers;
                best.error = error;
                self.best_mask.copy_from_slice(&self.mask);

                let ratio = inliers as f64 / n as f64;
                if self.settings.early_exit_ratio.map_or(false, |r| ratio >= r) {
                    break;
                }
            }
        }

        debug!(
            "ransac: {} / {} inliers after {} hypotheses (cost {:.3})",
            best.inliers, n, best.hypotheses, best.error
        );
        Ok(best)
    }
}

/// Score a map against all correspondences.
///
/// Returns the inlier count and the truncated quadratic cost,
/// or `None` if the map cannot be inverted.
pub fn score(
    homography: &Homography,
    data: &[Correspondence],
    threshold: f64,
    mask: &mut [bool],
) -> Option<(usize, f64)> {
    let inverse = homography.inverse()?;
    let threshold_sqr = threshold * threshold;
    let mut inliers = 0;
    let mut cost = 0.0;
    for (c, is_inlier) in data.iter().zip(mask.iter_mut()) {
        let forward = homography
            .apply(&c.reference)
            .map_or(f64::INFINITY, |p| (p - c.observed).norm_squared());
        let backward = inverse
            .apply(&c.observed)
            .map_or(f64::INFINITY, |p| (p - c.reference).norm_squared());
        *is_inlier = forward <= threshold_sqr && backward <= threshold_sqr;
        if *is_inlier {
            inliers += 1;
            cost += 0.5 * (forward + backward);
        } else {
            cost += threshold_sqr;
        }
    }
    if cost.is_finite() {
        Some((inliers, cost))
    } else {
        None
    }
}

// Tests #######################################################################

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linalg::Mat3;

    /// Estimator returning a fixed map, whatever the sample.
    struct Fixed(Homography);

    impl Estimator for Fixed {
        type Model = ();
        const MIN_SAMPLES: usize = 2;
        fn fit(&mut self, _data: &[Correspondence], _sample: &[usize]) -> Option<()> {
            Some(())
        }
        fn homography(&self, _model: &()) -> Option<Homography> {
            Some(self.0)
        }
    }

    fn translated(dx: f64) -> Vec<Correspondence> {
        (0..6)
            .map(|i| {
                let x = i as f64 * 10.0;
                Correspondence::new([x, 2.0 * x], [x + dx, 2.0 * x], 0.5)
            })
            .collect()
    }

    #[test]
    fn too_few_correspondences_is_an_error() {
        let mut ransac = Ransac::new(RansacSettings::default());
        let err = ransac
            .run(&mut Fixed(Homography::identity()), &translated(0.0)[..1])
            .unwrap_err();
        assert_eq!(
            err,
            PoseError::NotEnoughCorrespondences {
                required: 2,
                actual: 1
            }
        );
    }

    #[test]
    fn score_requires_both_directions() {
        let data = vec![Correspondence::new([10.0, 0.0], [1.5, 0.0], 0.5)];
        let mut mask = vec![true];

        // Forward error is 0.5 px but the contraction blows the backward error up to 5 px.
        let contraction = Homography(Mat3::new(0.1, 0.0, 0.0, 0.0, 0.1, 0.0, 0.0, 0.0, 1.0));
        let (inliers, cost) = score(&contraction, &data, 1.0, &mut mask).unwrap();
        assert_eq!(inliers, 0);
        assert!(!mask[0]);
        assert_eq!(cost, 1.0);

        let exact = Homography(Mat3::new(0.15, 0.0, 0.0, 0.0, 0.15, 0.0, 0.0, 0.0, 1.0));
        let (inliers, _) = score(&exact, &data, 1.0, &mut mask).unwrap();
        assert_eq!(inliers, 1);
        assert!(mask[0]);
    }

    #[test]
    fn exact_map_gives_full_mask() {
        let data = translated(5.0);
        let shift = Homography(Mat3::new(1.0, 0.0, 5.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0));
        let mut ransac = Ransac::new(RansacSettings::default());
        let consensus = ransac.run(&mut Fixed(shift), &data).unwrap();
        assert_eq!(consensus.inliers, data.len());
        assert_eq!(consensus.hypotheses, 1);
        assert!(ransac.inliers().iter().all(|&b| b));
    }
}
