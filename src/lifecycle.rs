// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Frame by frame tracking lifecycle.
//!
//! ```text
//!            enough inliers                 confirmation_frames reached
//! Scanning ----------------> Acquiring --------------------------------> Tracking
//!    ^                          |                                          |  ^
//!    |      failed frame        |                            failed frame  |  | good frame
//!    +--------------------------+                                          v  |
//!    |                                      more than lost_tolerance       Lost
//!    +---------------------------------------------------------------------+
//! ```
//!
//! Frames are processed one at a time through `&mut self`,
//! so the camera and filter state of one frame is settled before the next one starts.

pub mod state;

use tracing::{debug, info, warn};

use crate::camera::{CameraModel, ScreenSize};
use crate::config::{PowerMode, TrackerSettings};
use crate::consensus::{Estimator, Ransac};
use crate::error::{PoseError, TrackingError};
use crate::linalg::Mat3x4;
use crate::motion::{AffineEstimator, HomographyEstimator, MotionModel};
use crate::planar::MIN_CORRESPONDENCES;
use crate::types::{Correspondence, Homography, Point2, RigidPose};

use state::{
    FeaturePipeline, FrameReport, Reference, ReferenceId, Template, TrackerEvent, TrackerState,
    Transition,
};

/// Best frame of a candidate.
#[derive(Debug, Clone)]
struct Confirmation {
    homography: Homography,
    template: Vec<Point2>,
    inliers: usize,
}

/// A reference image seen on consecutive frames.
#[derive(Debug, Clone)]
struct Candidate {
    reference: ReferenceId,
    confirmations: usize,
    best: Confirmation,
}

impl Candidate {
    /// Count one more confirming frame, keeping it if it is not worse than the best one.
    fn confirm(&mut self, confirmation: Confirmation) {
        self.confirmations += 1;
        if confirmation.inliers >= self.best.inliers {
            self.best = confirmation;
        }
    }
}

/// A tracked target.
#[derive(Debug, Clone)]
struct Track {
    template: Template,
    motion: MotionModel,
    lost_frames: usize,
    frames: u64,
    pose: RigidPose,
    matrix: Mat3x4,
}

#[derive(Debug, Clone, Default)]
enum Session {
    #[default]
    Scanning,
    Acquiring(Candidate),
    Tracking(Track),
}

/// The tracking lifecycle of one session.
pub struct Tracker<P> {
    pipeline: P,
    references: Vec<Reference>,
    settings: TrackerSettings,
    camera: CameraModel,
    ransac: Ransac,
    session: Session,
}

impl<P: FeaturePipeline> Tracker<P> {
    /// New session, scanning for the given references.
    pub fn new(
        pipeline: P,
        references: Vec<Reference>,
        screen: ScreenSize,
        settings: TrackerSettings,
    ) -> Result<Self, PoseError> {
        let camera = CameraModel::new(screen, settings.camera, settings.filter())?;
        Ok(Self {
            pipeline,
            references,
            ransac: Ransac::new(settings.ransac),
            settings,
            camera,
            session: Session::Scanning,
        })
    }

    /// Current phase.
    pub fn state(&self) -> TrackerState {
        match &self.session {
            Session::Scanning => TrackerState::Scanning,
            Session::Acquiring(_) => TrackerState::Acquiring,
            Session::Tracking(t) if t.lost_frames > 0 => TrackerState::Lost,
            Session::Tracking(_) => TrackerState::Tracking,
        }
    }

    /// Camera state.
    pub fn camera(&self) -> &CameraModel {
        &self.camera
    }

    /// Settings in use.
    pub fn settings(&self) -> &TrackerSettings {
        &self.settings
    }

    /// Known reference images.
    pub fn references(&self) -> &[Reference] {
        &self.references
    }

    /// The feature pipeline.
    pub fn pipeline(&self) -> &P {
        &self.pipeline
    }

    /// The feature pipeline, mutably.
    pub fn pipeline_mut(&mut self) -> &mut P {
        &mut self.pipeline
    }

    /// Template of the tracked target.
    pub fn template(&self) -> Option<&Template> {
        match &self.session {
            Session::Tracking(t) => Some(&t.template),
            _ => None,
        }
    }

    /// Switch the operating mode. Resizes and clears the pose filter.
    pub fn set_power_mode(&mut self, mode: PowerMode) {
        self.settings.power_mode = mode;
        self.camera.configure_filter(self.settings.filter());
        debug!("tracker: power mode set to {:?}", mode);
    }

    /// Tear the session down between two frames.
    ///
    /// Returns the loss event of the tracked target, if any.
    pub fn end_session(&mut self) -> Option<TrackerEvent> {
        let lost = match &self.session {
            Session::Tracking(t) => Some(t.template.reference),
            _ => None,
        };
        let screen = self.camera.screen();
        self.apply(Transition::ToScanning { lost }, screen)
    }

    /// Process one frame.
    ///
    /// Tracking failures never surface here: they are absorbed by the lifecycle.
    /// Only an invalid screen size is an error.
    pub fn process_frame(
        &mut self,
        frame: &P::Frame,
        screen: ScreenSize,
    ) -> Result<FrameReport, PoseError> {
        if screen != self.camera.screen() {
            info!(
                "tracker: screen size changed to {}x{}",
                screen.width, screen.height
            );
            self.camera.init(screen)?;
        }

        let event = match std::mem::take(&mut self.session) {
            Session::Tracking(track) => self.track(frame, screen, track),
            other => {
                self.session = other;
                self.scan(frame, screen)
            }
        };
        Ok(self.report(event))
    }

    fn report(&self, event: Option<TrackerEvent>) -> FrameReport {
        let state = self.state();
        let report = match &self.session {
            Session::Scanning => FrameReport::idle(state, None),
            Session::Acquiring(c) => FrameReport::idle(state, Some(c.reference)),
            Session::Tracking(t) => FrameReport {
                state,
                reference: Some(t.template.reference),
                pose: Some(t.pose),
                matrix: Some(t.matrix),
                event: None,
            },
        };
        FrameReport { event, ..report }
    }

    /// Follow a lifecycle edge.
    fn apply(&mut self, transition: Transition, screen: ScreenSize) -> Option<TrackerEvent> {
        match transition {
            Transition::ToAcquiring {
                reference,
                homography,
                template,
                inliers,
            } => {
                debug!("tracker: acquiring {} ({} inliers)", reference, inliers);
                self.session = Session::Acquiring(Candidate {
                    reference,
                    confirmations: 1,
                    best: Confirmation {
                        homography,
                        template,
                        inliers,
                    },
                });
                None
            }
            Transition::ToTracking {
                reference,
                homography,
                template,
            } => {
                self.camera.reset();
                if let Err(err) = self.camera.update(&homography, screen) {
                    warn!("tracker: could not seed the pose of {}: {}", reference, err);
                    self.session = Session::Scanning;
                    return None;
                }
                info!("tracker: target {} found", reference);
                self.session = Session::Tracking(Track {
                    template: Template {
                        reference,
                        keypoints: template,
                        window: Homography::identity(),
                        homography,
                    },
                    motion: MotionModel::default(),
                    lost_frames: 0,
                    frames: 0,
                    pose: *self.camera.extrinsics(),
                    matrix: *self.camera.matrix(),
                });
                Some(TrackerEvent::TargetFound(reference))
            }
            Transition::ToScanning { lost } => {
                self.camera.reset();
                self.session = Session::Scanning;
                lost.map(|reference| {
                    info!("tracker: target {} lost", reference);
                    TrackerEvent::TargetLost(reference)
                })
            }
        }
    }

    /// Scanning and acquiring: look for the most visible reference
    /// and confirm it over consecutive frames.
    fn scan(&mut self, frame: &P::Frame, screen: ScreenSize) -> Option<TrackerEvent> {
        let (reference, confirmation) = match self.detect(frame) {
            Ok(detected) => detected,
            Err(err) => {
                debug!("tracker: scanning frame rejected: {}", err);
                if matches!(self.session, Session::Acquiring(_)) {
                    return self.apply(Transition::ToScanning { lost: None }, screen);
                }
                return None;
            }
        };

        match std::mem::take(&mut self.session) {
            Session::Acquiring(mut candidate) if candidate.reference == reference => {
                candidate.confirm(confirmation);
                self.session = Session::Acquiring(candidate);
            }
            _ => {
                let transition = Transition::ToAcquiring {
                    reference,
                    homography: confirmation.homography,
                    template: confirmation.template,
                    inliers: confirmation.inliers,
                };
                self.apply(transition, screen);
            }
        }

        let needed = self.settings.scanning.confirmation_frames.max(1);
        match std::mem::take(&mut self.session) {
            Session::Acquiring(candidate) if candidate.confirmations >= needed => {
                let transition = Transition::ToTracking {
                    reference: candidate.reference,
                    homography: candidate.best.homography,
                    template: candidate.best.template,
                };
                self.apply(transition, screen)
            }
            other => {
                self.session = other;
                None
            }
        }
    }

    /// Match every reference, keep the one with the most good matches,
    /// and fit its pose robustly.
    fn detect(&mut self, frame: &P::Frame) -> Result<(ReferenceId, Confirmation), TrackingError> {
        let settings = self.settings.scanning;
        let mut best: Option<(Reference, Vec<Correspondence>)> = None;
        for reference in &self.references {
            let matches = good_matches(
                self.pipeline.match_reference(frame, reference),
                settings.match_ratio,
            );
            if best.as_ref().map_or(true, |(_, m)| matches.len() > m.len()) {
                best = Some((*reference, matches));
            }
        }

        let required = settings.min_matches.max(MIN_CORRESPONDENCES);
        let (reference, mut matches) = match best {
            Some((reference, matches)) if matches.len() >= required => (reference, matches),
            other => {
                return Err(TrackingError::InsufficientMatches {
                    found: other.map_or(0, |(_, m)| m.len()),
                    required,
                })
            }
        };

        // Reference pixels to the frontal view, where the pose solver expects them.
        let frontal = self.camera.frontal_homography();
        let to_frontal = frontal * reference.normalization();
        for c in matches.iter_mut() {
            c.reference = to_frontal
                .apply(&c.reference)
                .ok_or(TrackingError::SingularHomography(to_frontal.determinant()))?;
        }

        let estimate = self
            .camera
            .solver()
            .solve_ransac(&matches, &mut self.ransac)?;
        let required = settings.min_inliers.max(MIN_CORRESPONDENCES);
        if estimate.inlier_count < required || !estimate.pose.is_valid() {
            return Err(TrackingError::InsufficientInliers {
                found: estimate.inlier_count,
                required,
            });
        }
        let pose_homography = estimate.homography.ok_or(TrackingError::InvalidPose)?;

        let template = matches
            .iter()
            .zip(&estimate.inliers)
            .filter(|(_, &inlier)| inlier)
            .map(|(c, _)| c.observed)
            .collect();
        debug!(
            "tracker: {} seen with {} / {} inliers",
            reference.id,
            estimate.inlier_count,
            matches.len()
        );
        Ok((
            reference.id,
            Confirmation {
                homography: (pose_homography * frontal).normalized(),
                template,
                inliers: estimate.inlier_count,
            },
        ))
    }

    /// Tracking: follow the target, absorbing up to `lost_tolerance` failing frames.
    fn track(
        &mut self,
        frame: &P::Frame,
        screen: ScreenSize,
        mut track: Track,
    ) -> Option<TrackerEvent> {
        track.frames += 1;
        let skip = self.settings.turbo_enabled()
            && track.lost_frames == 0
            && track.frames % 2 == 0
            && track.motion.velocity().is_some();
        let outcome = if skip {
            self.extrapolate(&mut track, screen)
        } else {
            self.follow(frame, &mut track, screen)
        };

        match outcome {
            Ok(()) => {
                if track.lost_frames > 0 {
                    debug!("tracker: recovered after {} frames", track.lost_frames);
                }
                track.lost_frames = 0;
                track.pose = *self.camera.extrinsics();
                track.matrix = *self.camera.matrix();
                self.session = Session::Tracking(track);
                None
            }
            Err(err) => {
                track.lost_frames += 1;
                debug!(
                    "tracker: tracking frame rejected ({} in a row): {}",
                    track.lost_frames, err
                );
                if track.lost_frames > self.settings.tracking.lost_tolerance {
                    let lost = Some(track.template.reference);
                    self.apply(Transition::ToScanning { lost }, screen)
                } else {
                    self.session = Session::Tracking(track);
                    None
                }
            }
        }
    }

    /// Match the template, fit the frame to frame motion and update the camera.
    fn follow(
        &mut self,
        frame: &P::Frame,
        track: &mut Track,
        screen: ScreenSize,
    ) -> Result<(), TrackingError> {
        let settings = self.settings.tracking;
        let matches = good_matches(
            self.pipeline.match_template(frame, &track.template),
            settings.match_ratio,
        );
        let required = settings.min_matches.max(HomographyEstimator::MIN_SAMPLES);
        if matches.len() < required {
            return Err(TrackingError::InsufficientMatches {
                found: matches.len(),
                required,
            });
        }

        let affine = self.ransac.run(&mut AffineEstimator, &matches)?;
        let perspective = self.ransac.run(&mut HomographyEstimator, &matches)?;
        let required = settings.min_inliers.max(HomographyEstimator::MIN_SAMPLES);
        let motion = match perspective.model {
            Some(motion) if perspective.inliers >= required => motion,
            _ => {
                return Err(TrackingError::InsufficientInliers {
                    found: perspective.inliers,
                    required,
                })
            }
        };

        let homography = (motion * track.template.homography).normalized();
        self.camera.update(&homography, screen)?;

        let template = &mut track.template;
        template.keypoints.clear();
        template.keypoints.extend(
            matches
                .iter()
                .zip(self.ransac.inliers())
                .filter(|(_, &inlier)| inlier)
                .map(|(c, _)| c.observed),
        );
        template.homography = homography;
        if let Some(window) = affine.model {
            template.window = (window * template.window).normalized();
        }
        track.motion.update(motion);
        Ok(())
    }

    /// Skipped frame: replay the last motion instead of matching.
    fn extrapolate(&mut self, track: &mut Track, screen: ScreenSize) -> Result<(), TrackingError> {
        let velocity = *track.motion.velocity().ok_or(TrackingError::InvalidPose)?;
        let homography = (velocity * track.template.homography).normalized();
        self.camera.update(&homography, screen)?;
        for p in track.template.keypoints.iter_mut() {
            if let Some(q) = velocity.apply(p) {
                *p = q;
            }
        }
        track.template.homography = homography;
        Ok(())
    }
}

/// Keep finite matches whose quality passes the ratio test.
fn good_matches(mut matches: Vec<Correspondence>, ratio: f64) -> Vec<Correspondence> {
    matches.retain(|c| c.is_finite() && c.quality <= ratio);
    matches
}

// Tests #######################################################################
