use approx::assert_relative_eq;
use nalgebra::UnitQuaternion;
use planar_tracker::linalg::Vec3;
use planar_tracker::*;

const EPSILON_APPROX: f64 = 1e-6;

fn solver() -> PlanarPoseSolver {
    let k = Intrinsics::new(800.0, 800.0, 320.0, 240.0).unwrap();
    PlanarPoseSolver::new(k, 2.0).unwrap()
}

fn observe(
    solver: &PlanarPoseSolver,
    pose: &RigidPose,
    reference: &[[f64; 2]],
) -> Vec<Correspondence> {
    reference
        .iter()
        .map(|&p| {
            let x = pose.transform(&solver.unproject_reference(&Point2::from(p)));
            let o = solver.intrinsics().project(&x).unwrap();
            Correspondence::new(p, [o.x, o.y], 0.5)
        })
        .collect()
}

fn truth() -> RigidPose {
    RigidPose::from_parts(
        &UnitQuaternion::from_euler_angles(0.15, -0.2, 0.35),
        Vec3::new(0.2, -0.1, 0.6),
    )
}

#[test]
fn noise_free_marks_every_point_inlier() {
    let solver = solver();
    let reference = [
        [180.0, 120.0],
        [470.0, 140.0],
        [450.0, 360.0],
        [200.0, 340.0],
        [320.0, 250.0],
        [260.0, 190.0],
        [400.0, 300.0],
        [230.0, 280.0],
    ];
    let data = observe(&solver, &truth(), &reference);
    let mut ransac = Ransac::new(RansacSettings::default());
    let estimate = solver.solve_ransac(&data, &mut ransac).unwrap();

    assert_eq!(estimate.inlier_count, data.len());
    assert!(estimate.inliers.iter().all(|&inlier| inlier));
    let (found, expected) = (estimate.pose, truth());
    assert_relative_eq!(found.rotation, expected.rotation, epsilon = EPSILON_APPROX);
    assert_relative_eq!(
        found.translation,
        expected.translation,
        epsilon = EPSILON_APPROX
    );
}

#[test]
fn fabricated_matches_are_rejected() {
    let solver = solver();
    let reference = [
        [180.0, 120.0],
        [470.0, 140.0],
        [450.0, 360.0],
        [200.0, 340.0],
    ];
    let mut data = observe(&solver, &truth(), &reference);

    // Two matches pointing to unrelated places of the frame.
    data.push(Correspondence::new([320.0, 250.0], [90.0, 410.0], 0.6));
    data.push(Correspondence::new([260.0, 190.0], [560.0, 60.0], 0.6));

    let mut ransac = Ransac::new(RansacSettings {
        hypotheses: 500,
        ..RansacSettings::default()
    });
    let estimate = solver.solve_ransac(&data, &mut ransac).unwrap();

    assert_eq!(estimate.inliers, vec![true, true, true, true, false, false]);
    assert_eq!(estimate.inlier_count, 4);
    let (found, expected) = (estimate.pose, truth());
    assert_relative_eq!(found.rotation, expected.rotation, epsilon = EPSILON_APPROX);
}

#[test]
fn unscorable_data_gives_invalid_pose() {
    let solver = solver();
    // Every reference point on one line: every hypothesis degenerates.
    let reference = [
        [100.0, 100.0],
        [200.0, 100.0],
        [300.0, 100.0],
        [400.0, 100.0],
        [500.0, 100.0],
    ];
    let data = observe(&solver, &RigidPose::identity(), &reference);
    let mut ransac = Ransac::new(RansacSettings::default());
    let estimate = solver.solve_ransac(&data, &mut ransac).unwrap();

    assert!(!estimate.pose.is_valid());
    assert!(estimate.homography.is_none());
    assert_eq!(estimate.inlier_count, 0);
}

#[test]
fn too_few_correspondences_is_an_error() {
    let solver = solver();
    let reference = [[180.0, 120.0], [470.0, 140.0], [450.0, 360.0]];
    let data = observe(&solver, &truth(), &reference);
    let mut ransac = Ransac::new(RansacSettings::default());
    assert!(matches!(
        solver.solve_ransac(&data, &mut ransac),
        Err(PoseError::NotEnoughCorrespondences {
            required: 4,
            actual: 3
        })
    ));
}
