use approx::assert_relative_eq;
use nalgebra::UnitQuaternion;
use planar_tracker::linalg::{Mat3, Vec3};
use planar_tracker::*;

/// One reference image visible through a virtual homography, or nothing.
type Frame = Option<(usize, Homography)>;

/// Feature pipeline returning exact matches of a fixed keypoint set.
struct Scripted {
    keypoints: Vec<Point2>,
}

impl Scripted {
    fn new() -> Self {
        let keypoints = (0..30)
            .map(|i| {
                let (x, y) = ((i * 89) % 380, (i * 53) % 280);
                Point2::new(10.0 + x as f64, 8.0 + y as f64)
            })
            .collect();
        Self { keypoints }
    }
}

impl FeaturePipeline for Scripted {
    type Frame = Frame;

    fn match_reference(&mut self, frame: &Frame, reference: &Reference) -> Vec<Correspondence> {
        match frame {
            Some((id, h)) if ReferenceId(*id) == reference.id => self
                .keypoints
                .iter()
                .filter_map(|p| {
                    let q = h.apply(&reference.normalize(p))?;
                    Some(Correspondence::new([p.x, p.y], [q.x, q.y], 0.25))
                })
                .collect(),
            _ => Vec::new(),
        }
    }

    fn match_template(&mut self, frame: &Frame, template: &Template) -> Vec<Correspondence> {
        let Some((id, h)) = frame else {
            return Vec::new();
        };
        let Some(back) = template.homography.inverse() else {
            return Vec::new();
        };
        if ReferenceId(*id) != template.reference {
            return Vec::new();
        }
        template
            .keypoints
            .iter()
            .filter_map(|k| {
                let q = h.apply(&back.apply(k)?)?;
                Some(Correspondence::new([k.x, k.y], [q.x, q.y], 0.25))
            })
            .collect()
    }
}

fn screen() -> ScreenSize {
    ScreenSize::new(640.0, 480.0)
}

fn references() -> Vec<Reference> {
    vec![
        Reference::new(0, 400.0, 300.0).unwrap(),
        Reference::new(1, 300.0, 400.0).unwrap(),
    ]
}

fn tracker(settings: TrackerSettings) -> Tracker<Scripted> {
    Tracker::new(Scripted::new(), references(), screen(), settings).unwrap()
}

/// A slowly moving pose, `t` being the frame index.
fn pose_at(t: usize) -> RigidPose {
    let a = 0.1 + 0.01 * t as f64;
    RigidPose::from_parts(
        &UnitQuaternion::from_euler_angles(a, -0.5 * a, 0.3 * a),
        Vec3::new(0.02 * a, -0.03, 0.5),
    )
}

/// Virtual homography of the target at frame `t`, rendered for `screen`.
fn view_on(screen: ScreenSize, t: usize) -> Homography {
    let settings = TrackerSettings::default().camera;
    let camera = CameraModel::new(screen, settings, FilterSettings::default()).unwrap();
    camera.solver().homography(&pose_at(t)) * camera.frontal_homography()
}

/// Reference `id` seen at frame `t`.
fn visible(id: usize, t: usize) -> Frame {
    Some((id, view_on(screen(), t)))
}

/// Run frames until tracking starts, return the number of frames it took.
fn acquire(tracker: &mut Tracker<Scripted>, id: usize) -> usize {
    for t in 0..10 {
        let report = tracker.process_frame(&visible(id, t), screen()).unwrap();
        if report.state == TrackerState::Tracking {
            let found = TrackerEvent::TargetFound(ReferenceId(id));
            assert_eq!(report.event, Some(found));
            return t + 1;
        }
        assert_eq!(report.state, TrackerState::Acquiring);
        assert_eq!(report.event, None);
    }
    panic!("target never acquired");
}

#[test]
fn tracking_starts_exactly_at_confirmation_count() {
    for frames in 1..=4 {
        let mut settings = TrackerSettings::default();
        settings.scanning.confirmation_frames = frames;
        let mut tracker = tracker(settings);
        assert_eq!(acquire(&mut tracker, 1), frames);
        assert_eq!(tracker.template().unwrap().reference, ReferenceId(1));
    }
}

#[test]
fn switching_candidates_restarts_confirmation() {
    let mut tracker = tracker(TrackerSettings::default());
    for t in 0..6 {
        let report = tracker.process_frame(&visible(t % 2, t), screen()).unwrap();
        assert_eq!(report.state, TrackerState::Acquiring);
        assert_eq!(report.reference, Some(ReferenceId(t % 2)));
    }
}

#[test]
fn failed_confirmation_returns_to_scanning() {
    let mut tracker = tracker(TrackerSettings::default());
    tracker.process_frame(&visible(0, 0), screen()).unwrap();
    tracker.process_frame(&visible(0, 1), screen()).unwrap();
    let report = tracker.process_frame(&None, screen()).unwrap();
    assert_eq!(report.state, TrackerState::Scanning);
    assert_eq!(report.event, None);
    assert_eq!(acquire(&mut tracker, 0), 3);
}

#[test]
fn brief_occlusion_is_absorbed() {
    let mut tracker = tracker(TrackerSettings::default());
    acquire(&mut tracker, 0);
    let good = tracker.process_frame(&visible(0, 5), screen()).unwrap();
    assert_eq!(good.state, TrackerState::Tracking);

    let tolerance = tracker.settings().tracking.lost_tolerance;
    for _ in 0..tolerance {
        let report = tracker.process_frame(&None, screen()).unwrap();
        assert_eq!(report.state, TrackerState::Lost);
        assert_eq!(report.event, None);
        assert_eq!(report.pose, good.pose);
        assert_eq!(report.matrix, good.matrix);
    }

    let report = tracker.process_frame(&visible(0, 6), screen()).unwrap();
    assert_eq!(report.state, TrackerState::Tracking);
    assert_eq!(report.event, None);
}

#[test]
fn loss_beyond_tolerance_returns_to_scanning() {
    let mut tracker = tracker(TrackerSettings::default());
    acquire(&mut tracker, 1);
    tracker.process_frame(&visible(1, 4), screen()).unwrap();
    assert!(tracker.camera().extrinsics() != &RigidPose::identity());

    let tolerance = tracker.settings().tracking.lost_tolerance;
    for _ in 0..tolerance {
        let report = tracker.process_frame(&None, screen()).unwrap();
        assert_eq!(report.state, TrackerState::Lost);
    }
    let report = tracker.process_frame(&None, screen()).unwrap();
    assert_eq!(report.state, TrackerState::Scanning);
    assert_eq!(report.event, Some(TrackerEvent::TargetLost(ReferenceId(1))));
    assert!(!report.has_pose());
    assert_eq!(*tracker.camera().extrinsics(), RigidPose::identity());
    assert!(tracker.template().is_none());
}

#[test]
fn published_pose_follows_the_target() {
    let mut tracker = tracker(TrackerSettings::default());
    acquire(&mut tracker, 0);
    let frame = visible(0, 8);
    for _ in 0..15 {
        tracker.process_frame(&frame, screen()).unwrap();
    }
    // A still target: the filter windows are full of the same pose.
    let (_, h) = frame.unwrap();
    let camera = tracker.camera();
    for corner in [[-1.0, -1.0], [1.0, 1.0], [0.5, -0.2]] {
        let p = Point2::from(corner);
        let projected = camera.project(&Vec3::new(p.x, p.y, 0.0)).unwrap();
        assert_relative_eq!(projected, h.apply(&p).unwrap(), epsilon = 1e-4);
    }
}

#[test]
fn screen_rotation_keeps_tracking() {
    let mut tracker = tracker(TrackerSettings::default());
    acquire(&mut tracker, 0);
    for t in 3..6 {
        let report = tracker.process_frame(&visible(0, t), screen()).unwrap();
        assert_eq!(report.state, TrackerState::Tracking);
    }

    // Same physical motion, now rendered on a portrait screen.
    let portrait = ScreenSize::new(480.0, 640.0);
    let frame = Some((0, view_on(portrait, 6)));
    let report = tracker.process_frame(&frame, portrait).unwrap();
    assert_eq!(report.state, TrackerState::Tracking);
    assert_eq!(report.event, None);
    assert_eq!(tracker.camera().screen(), portrait);
    let center = tracker.camera().principal_point();
    assert_relative_eq!(center, Point2::new(240.0, 320.0));

    // The filter restarted: the pose is the one of this frame alone.
    let (found, expected) = (report.pose.unwrap(), pose_at(6));
    assert_relative_eq!(found.rotation, expected.rotation, epsilon = 1e-6);
    assert_relative_eq!(found.translation, expected.translation, epsilon = 1e-6);
}

#[test]
fn search_window_accumulates_affine_motion() {
    let mut settings = TrackerSettings::default();
    settings.scanning.confirmation_frames = 1;
    let mut tracker = tracker(settings);
    let mut h = view_on(screen(), 0);
    let report = tracker.process_frame(&Some((0, h)), screen()).unwrap();
    assert_eq!(report.state, TrackerState::Tracking);
    assert_eq!(tracker.template().unwrap().window, Homography::identity());

    // The image drifts, turns and shears a little on every frame.
    #[rustfmt::skip]
    let step = Homography(Mat3::new(
        1.01,   0.02,  3.0,
        -0.015, 0.995, -2.0,
        0.0,    0.0,   1.0,
    ));
    let mut expected = Homography::identity();
    for _ in 0..4 {
        h = step * h;
        expected = step * expected;
        let report = tracker.process_frame(&Some((0, h)), screen()).unwrap();
        assert_eq!(report.state, TrackerState::Tracking);
    }

    let window = tracker.template().unwrap().window;
    assert!(window.is_affine());
    assert_relative_eq!(*window.matrix(), *expected.matrix(), epsilon = 1e-6);
}

#[test]
fn invalid_screen_is_an_error() {
    let mut tracker = tracker(TrackerSettings::default());
    let err = tracker
        .process_frame(&None, ScreenSize::new(0.0, 480.0))
        .unwrap_err();
    assert!(matches!(err, PoseError::InvalidScreen { .. }));
}
