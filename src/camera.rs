// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Runtime camera state.
//!
//! Renderers work in a virtual space where the tracked target is the square
//! $[-1, 1]^2$ of the plane $z = 0$, with $y$ pointing up and $z$ pointing out of
//! the target toward the viewer. The camera matrix maps that space to screen pixels:
//! $$
//! P = K \ [R \mid t] \ C
//! $$
//! where $C$ scales the virtual space to the solver units and flips it by 180 degrees
//! around the x axis, so that virtual "up" is screen "up" while camera $y$ points down.
//!
//! A virtual homography is the map from the virtual target square to screen pixels.
//! The frontal view, the target centered and filling the smallest screen dimension,
//! is [`CameraModel::frontal_homography`].

use tracing::{debug, warn};

use crate::config::CameraSettings;
use crate::error::{PoseError, TrackingError};
use crate::filter::{FilterSettings, PoseFilter};
use crate::linalg::{Mat3, Mat3x4, Mat4, Vec3};
use crate::planar::{PlanarPoseSolver, SolverWorkspace};
use crate::types::{Correspondence, Homography, Intrinsics, Point2, RigidPose};

/// Corners of the virtual target square.
const CORNERS: [[f64; 2]; 4] = [[-1.0, -1.0], [1.0, -1.0], [1.0, 1.0], [-1.0, 1.0]];

/// Screen size in pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScreenSize {
    /// Width.
    pub width: f64,
    /// Height.
    pub height: f64,
}

impl ScreenSize {
    /// New screen size.
    pub fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }

    /// Both dimensions strictly positive and finite.
    pub fn is_valid(&self) -> bool {
        self.width > 0.0 && self.height > 0.0 && self.width.is_finite() && self.height.is_finite()
    }
}

/// Camera geometry guessed from the screen, plus the tracked extrinsics.
#[derive(Debug, Clone)]
pub struct CameraModel {
    settings: CameraSettings,
    screen: ScreenSize,
    solver: PlanarPoseSolver,
    half_size: f64,
    extrinsics: RigidPose,
    matrix: Mat3x4,
    filter: PoseFilter,
    workspace: SolverWorkspace,
}

impl CameraModel {
    /// Camera for the given screen, with identity extrinsics.
    pub fn new(
        screen: ScreenSize,
        settings: CameraSettings,
        filter: FilterSettings,
    ) -> Result<Self, PoseError> {
        let (solver, half_size) = guess(&screen, &settings)?;
        let mut camera = Self {
            settings,
            screen,
            solver,
            half_size,
            extrinsics: RigidPose::identity(),
            matrix: Mat3x4::zeros(),
            filter: PoseFilter::new(filter),
            workspace: SolverWorkspace::with_capacity(CORNERS.len()),
        };
        camera.recompose();
        Ok(camera)
    }

    /// Guess the intrinsics for a new screen and reset the extrinsics to identity.
    pub fn init(&mut self, screen: ScreenSize) -> Result<(), PoseError> {
        let (solver, half_size) = guess(&screen, &self.settings)?;
        self.screen = screen;
        self.solver = solver;
        self.half_size = half_size;
        self.reset();
        Ok(())
    }

    /// Identity extrinsics and empty pose filter.
    pub fn reset(&mut self) {
        self.extrinsics = RigidPose::identity();
        self.filter.reset();
        self.recompose();
    }

    /// Change the pose filter windows. Clears the filter.
    pub fn configure_filter(&mut self, settings: FilterSettings) {
        self.filter.configure(settings);
    }

    /// Recover the pose from a virtual homography and recompose the camera matrix.
    ///
    /// A singular homography or a degenerate pose is rejected with a warning,
    /// and leaves the whole camera state untouched: [`matrix`](Self::matrix) still
    /// holds the last good camera matrix. A screen size change resets the camera first.
    pub fn update(
        &mut self,
        homography: &Homography,
        screen: ScreenSize,
    ) -> Result<&Mat3x4, TrackingError> {
        let det = homography.determinant();
        if !homography.is_valid(self.settings.homography_epsilon) {
            warn!("camera: rejected singular homography (det = {:e})", det);
            return Err(TrackingError::SingularHomography(det));
        }

        if screen != self.screen {
            debug!(
                "camera: screen changed to {}x{}, resetting",
                screen.width, screen.height
            );
            self.init(screen)?;
        }

        let mut correspondences = [Correspondence::new([0.0; 2], [0.0; 2], 0.0); 4];
        for (c, corner) in correspondences.iter_mut().zip(CORNERS) {
            let corner = Point2::from(corner);
            let observed = homography
                .apply(&corner)
                .ok_or(TrackingError::SingularHomography(det))?;
            c.reference = self.to_frontal(&corner);
            c.observed = observed;
        }

        let pose = self.solver.solve(&correspondences, &mut self.workspace)?;
        if !pose.is_valid() {
            warn!("camera: degenerate pose from homography");
            return Err(TrackingError::InvalidPose);
        }

        self.filter.feed(&pose)?;
        self.extrinsics = self.filter.run();
        self.recompose();
        Ok(&self.matrix)
    }

    fn recompose(&mut self) {
        self.matrix =
            self.solver.intrinsics().matrix() * self.extrinsics.matrix() * self.denormalization();
    }

    fn to_frontal(&self, p: &Point2) -> Point2 {
        let k = self.solver.intrinsics();
        Point2::new(k.u0 + self.half_size * p.x, k.v0 - self.half_size * p.y)
    }

    /// The 3x4 camera matrix, from virtual space to screen pixels.
    pub fn matrix(&self) -> &Mat3x4 {
        &self.matrix
    }

    /// Guessed intrinsics.
    pub fn intrinsics(&self) -> &Intrinsics {
        self.solver.intrinsics()
    }

    /// Smoothed pose of the target relative to the camera, in solver units.
    pub fn extrinsics(&self) -> &RigidPose {
        &self.extrinsics
    }

    /// Current screen.
    pub fn screen(&self) -> ScreenSize {
        self.screen
    }

    /// Solver bound to the current intrinsics.
    pub fn solver(&self) -> &PlanarPoseSolver {
        &self.solver
    }

    /// Virtual depth $z_0$ of the frontal target.
    pub fn target_depth(&self) -> f64 {
        self.solver.depth()
    }

    /// Horizontal field of view, in radians.
    pub fn fov_x(&self) -> f64 {
        2.0 * (0.5 * self.screen.width / self.intrinsics().fx).atan()
    }

    /// Vertical field of view, in radians.
    pub fn fov_y(&self) -> f64 {
        2.0 * (0.5 * self.screen.height / self.intrinsics().fy).atan()
    }

    /// Principal point, in pixels.
    pub fn principal_point(&self) -> Point2 {
        let k = self.intrinsics();
        Point2::new(k.u0, k.v0)
    }

    /// Screen width over height.
    pub fn aspect_ratio(&self) -> f64 {
        self.screen.width / self.screen.height
    }

    /// Map from the virtual target square to its frontal view in screen pixels.
    #[rustfmt::skip]
    pub fn frontal_homography(&self) -> Homography {
        let k = self.intrinsics();
        let s = self.half_size;
        Homography(Mat3::new(
            s,   0.0,  k.u0,
            0.0, -s,   k.v0,
            0.0, 0.0,  1.0,
        ))
    }

    /// The denormalization matrix $C$, from virtual space to solver units.
    #[rustfmt::skip]
    pub fn denormalization(&self) -> Mat4 {
        let k = self.intrinsics();
        let z0 = self.solver.depth();
        let sx = z0 * self.half_size / k.fx;
        let sy = z0 * self.half_size / k.fy;
        Mat4::new(
            sx,  0.0, 0.0, 0.0,
            0.0, -sy, 0.0, 0.0,
            0.0, 0.0, -sx, z0,
            0.0, 0.0, 0.0, 1.0,
        )
    }

    /// Screen pixel of a virtual point, `None` behind the camera.
    pub fn project(&self, p: &Vec3) -> Option<Point2> {
        let x = self.matrix * p.push(1.0);
        if !(x.z > 0.0) {
            return None;
        }
        Some(Point2::new(x.x / x.z, x.y / x.z))
    }

    /// OpenGL model-view matrix: virtual space to eye space, looking down $-z$.
    pub fn model_view_matrix(&self) -> Mat4 {
        let flip = Mat4::from_diagonal(&nalgebra::Vector4::new(1.0, -1.0, -1.0, 1.0));
        flip * self.extrinsics.homogeneous() * self.denormalization()
    }

    /// OpenGL projection matrix matching the intrinsics,
    /// with clipping planes in solver units.
    #[rustfmt::skip]
    pub fn projection_matrix(&self, near: f64, far: f64) -> Mat4 {
        let k = self.intrinsics();
        let (w, h) = (self.screen.width, self.screen.height);
        Mat4::new(
            2.0 * k.fx / w, 0.0,            1.0 - 2.0 * k.u0 / w,         0.0,
            0.0,            2.0 * k.fy / h, 2.0 * k.v0 / h - 1.0,         0.0,
            0.0,            0.0,            -(far + near) / (far - near), -2.0 * far * near / (far - near),
            0.0,            0.0,            -1.0,                         0.0,
        )
    }
}

/// Intrinsics from the field of view, principal point at the screen center,
/// and the virtual depth at which the frontal target has the requested size.
fn guess(
    screen: &ScreenSize,
    settings: &CameraSettings,
) -> Result<(PlanarPoseSolver, f64), PoseError> {
    if !screen.is_valid() {
        return Err(PoseError::InvalidScreen {
            width: screen.width,
            height: screen.height,
        });
    }
    let fov = settings.fov_degrees;
    if !(fov > 0.0 && fov < 180.0) {
        return Err(PoseError::InvalidFov(fov));
    }
    let focal = 0.5 * screen.width / (0.5 * fov.to_radians()).tan();
    let intrinsics = Intrinsics::new(focal, focal, 0.5 * screen.width, 0.5 * screen.height)?;
    let half_size = 0.5 * screen.width.min(screen.height) * settings.target_fill;
    let solver = PlanarPoseSolver::new(intrinsics, focal / half_size)?;
    Ok((solver, half_size))
}

// Tests #######################################################################

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linalg::Vec4;
    use approx::assert_relative_eq;
    use nalgebra::UnitQuaternion;

    fn screen() -> ScreenSize {
        ScreenSize::new(640.0, 480.0)
    }

    fn camera_on(screen: ScreenSize) -> CameraModel {
        CameraModel::new(screen, CameraSettings::default(), FilterSettings::default()).unwrap()
    }

    fn camera() -> CameraModel {
        camera_on(screen())
    }

    /// Virtual homography of the target seen under a given pose.
    fn seen(camera: &CameraModel, pose: &RigidPose) -> Homography {
        camera.solver().homography(pose) * camera.frontal_homography()
    }

    #[test]
    fn guessed_geometry() {
        let camera = camera();
        assert_relative_eq!(camera.fov_x(), 60f64.to_radians(), epsilon = 1e-12);
        assert!(camera.fov_y() < camera.fov_x());
        assert_relative_eq!(camera.principal_point(), Point2::new(320.0, 240.0));
        assert_relative_eq!(camera.aspect_ratio(), 4.0 / 3.0);
        assert_relative_eq!(camera.target_depth(), camera.intrinsics().fx / 240.0);
        assert!(CameraModel::new(
            ScreenSize::new(0.0, 480.0),
            CameraSettings::default(),
            FilterSettings::default()
        )
        .is_err());
    }

    #[test]
    fn frontal_view_gives_identity() {
        let mut camera = camera();
        let h = camera.frontal_homography();
        camera.update(&h, screen()).unwrap();
        let pose = camera.extrinsics();
        assert_relative_eq!(pose.rotation, Mat3::identity(), epsilon = 1e-9);
        assert_relative_eq!(pose.translation, Vec3::zeros(), epsilon = 1e-9);
    }

    #[test]
    fn matrix_projects_like_homography() {
        let mut camera = camera();
        let pose = RigidPose::from_parts(
            &UnitQuaternion::from_euler_angles(0.2, -0.1, 0.3),
            Vec3::new(0.1, 0.05, 0.5),
        );
        let h = seen(&camera, &pose);
        camera.update(&h, screen()).unwrap();
        assert_relative_eq!(camera.extrinsics().rotation, pose.rotation, epsilon = 1e-8);
        for corner in CORNERS.iter().chain(&[[0.3, -0.4]]) {
            let p = Point2::from(*corner);
            let projected = camera.project(&Vec3::new(p.x, p.y, 0.0)).unwrap();
            assert_relative_eq!(projected, h.apply(&p).unwrap(), epsilon = 1e-6);
        }
    }

    #[test]
    fn singular_homography_leaves_state_untouched() {
        let mut camera = camera();
        let pose = RigidPose::from_parts(
            &UnitQuaternion::from_euler_angles(0.1, 0.1, 0.0),
            Vec3::new(0.0, 0.0, 0.3),
        );
        camera.update(&seen(&camera, &pose), screen()).unwrap();
        let extrinsics = *camera.extrinsics();
        let matrix = *camera.matrix();

        let singular = Homography(Mat3::new(1.0, 2.0, 3.0, 2.0, 4.0, 6.0, 0.0, 0.0, 1.0));
        let err = camera.update(&singular, screen()).unwrap_err();
        assert!(matches!(err, TrackingError::SingularHomography(_)));
        assert_eq!(*camera.extrinsics(), extrinsics);
        assert_eq!(*camera.matrix(), matrix);
    }

    #[test]
    fn screen_change_resets() {
        let mut camera = camera();
        let pose = RigidPose::from_parts(
            &UnitQuaternion::from_euler_angles(0.0, 0.2, 0.0),
            Vec3::new(0.0, 0.0, 0.2),
        );
        camera.update(&seen(&camera, &pose), screen()).unwrap();
        let other = ScreenSize::new(480.0, 640.0);
        camera.init(other).unwrap();
        assert_eq!(*camera.extrinsics(), RigidPose::identity());
        assert_relative_eq!(camera.principal_point(), Point2::new(240.0, 320.0));
    }

    #[test]
    fn update_on_a_new_screen_restarts_from_scratch() {
        let mut camera = camera();
        let before = RigidPose::from_parts(
            &UnitQuaternion::from_euler_angles(0.3, -0.2, 0.1),
            Vec3::new(0.1, -0.1, 0.4),
        );
        camera.update(&seen(&camera, &before), screen()).unwrap();

        let portrait = ScreenSize::new(480.0, 640.0);
        let after = RigidPose::from_parts(
            &UnitQuaternion::from_euler_angles(-0.1, 0.15, 0.0),
            Vec3::new(0.0, 0.05, 0.2),
        );
        let h = seen(&camera_on(portrait), &after);
        camera.update(&h, portrait).unwrap();

        assert_eq!(camera.screen(), portrait);
        assert_relative_eq!(camera.principal_point(), Point2::new(240.0, 320.0));
        // Nothing left of the landscape samples in the filter.
        let pose = camera.extrinsics();
        assert_relative_eq!(pose.rotation, after.rotation, epsilon = 1e-8);
        assert_relative_eq!(pose.translation, after.translation, epsilon = 1e-8);
    }

    #[test]
    fn opengl_matrices_agree_with_pixels() {
        let mut camera = camera();
        let pose = RigidPose::from_parts(
            &UnitQuaternion::from_euler_angles(-0.15, 0.25, 0.1),
            Vec3::new(-0.1, 0.1, 0.4),
        );
        camera.update(&seen(&camera, &pose), screen()).unwrap();
        let clip = camera.projection_matrix(0.1, 100.0) * camera.model_view_matrix();
        let p = Vec3::new(0.5, -0.25, 0.3);
        let c = clip * Vec4::new(p.x, p.y, p.z, 1.0);
        let (ndc_x, ndc_y) = (c.x / c.w, c.y / c.w);
        let pixel = camera.project(&p).unwrap();
        assert_relative_eq!(ndc_x, 2.0 * pixel.x / 640.0 - 1.0, epsilon = 1e-9);
        assert_relative_eq!(ndc_y, 1.0 - 2.0 * pixel.y / 480.0, epsilon = 1e-9);
    }
}
