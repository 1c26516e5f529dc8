#![warn(missing_docs)]

//! This package estimates and tracks the pose of known planar targets in a video stream,
//! the core of an image-based augmented reality tracker.
//!
//! Given 2D point correspondences between a frontal view of a planar target and an
//! observed frame, it recovers the rigid pose of the target relative to the camera.
//! This is the planar case of the ["Perspective-n-Point" (PnP)][pnp] problem.
//! On top of the solver, the package provides:
//!
//!  - a RANSAC driver scoring hypotheses by their bidirectional reprojection error,
//!  - a temporal pose filter (quaternion and weighted translation averages),
//!  - a camera model composing intrinsics and extrinsics into renderable matrices,
//!  - a tracking lifecycle deciding, frame after frame, whether a target is being
//!    searched for, confirmed, tracked, or briefly lost.
//!
//! Feature detection and matching are left to the caller,
//! through the [`FeaturePipeline`] trait.
//!
//! Translations are expressed in units where the frontal target lies at a fixed virtual
//! depth, derived from a guessed field of view. They are consistent from frame to frame
//! but are not metric.
//!
//! [pnp]: https://en.wikipedia.org/wiki/Perspective-n-Point

pub mod camera;
pub mod config;
pub mod consensus;
pub mod error;
pub mod filter;
pub mod lifecycle;
pub mod linalg;
pub mod motion;
pub mod planar;
pub mod types;

pub use camera::{CameraModel, ScreenSize};
pub use config::{PowerMode, TrackerSettings};
pub use consensus::{Estimator, Ransac, RansacSettings};
pub use error::{PoseError, TrackingError};
pub use filter::{FilterSettings, PoseFilter};
pub use lifecycle::state::{
    FeaturePipeline, FrameReport, Reference, ReferenceId, Template, TrackerEvent, TrackerState,
    Transition,
};
pub use lifecycle::Tracker;
pub use planar::{PlanarPoseSolver, SolverWorkspace};
pub use types::{Correspondence, Homography, Intrinsics, Point2, RigidPose};
