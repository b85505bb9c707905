use approx::assert_relative_eq;
use fiducial_pnp::{CameraModel, RawPose, SolveMethod};
use fiducial_tracking::{
    compose, square_marker_points, AnchorMode, AxisInversion, Correspondences, FilterMode,
    LossPolicy, PoseTracker, SkipReason, TrackOutcome, TrackerConfig, Transform,
};
use glam::{DVec2, DVec3, Mat4, Quat, Vec3};

const MARKER: f64 = 0.1;

fn camera() -> CameraModel {
    CameraModel::derive_default(640, 480).unwrap()
}

fn observe(camera: &CameraModel, raw: &RawPose) -> Correspondences {
    let object = square_marker_points(MARKER);
    let mut corners = [DVec2::ZERO; 4];
    for (c, p) in corners.iter_mut().zip(object.iter()) {
        *c = camera.project(raw.transform_point(*p)).unwrap();
    }
    Correspondences::square_marker(MARKER, corners)
}

fn config(filter: FilterMode) -> TrackerConfig {
    TrackerConfig {
        filter,
        ..TrackerConfig::default()
    }
}

#[test]
fn square_at_principal_point_is_in_front_and_unrotated() {
    let cam = camera();
    let mut tracker: PoseTracker<(), Mat4> =
        PoseTracker::new(cam.clone(), config(FilterMode::Disabled)).unwrap();
    tracker.register((), Mat4::IDENTITY);

    let object = vec![
        DVec3::new(-1.0, 1.0, 0.0),
        DVec3::new(1.0, 1.0, 0.0),
        DVec3::new(1.0, -1.0, 0.0),
        DVec3::new(-1.0, -1.0, 0.0),
    ];
    let (cx, cy, d) = (320.0, 240.0, 80.0);
    let image = vec![
        DVec2::new(cx - d, cy + d),
        DVec2::new(cx + d, cy + d),
        DVec2::new(cx + d, cy - d),
        DVec2::new(cx - d, cy - d),
    ];

    let report = tracker.process_frame(Mat4::IDENTITY, [((), Correspondences::new(object, image))]);
    let update = report.outcomes[0].1.update().expect("square should be tracked");

    assert_eq!(update.method, SolveMethod::Robust);
    assert!(update.pose.position.z > 0.0);
    assert_relative_eq!(update.pose.position.z, 8.0, epsilon = 1e-4);
    assert!(update.pose.rotation.angle_between(Quat::IDENTITY) < 1e-3);
    assert!(tracker.is_in_view(&()));
    assert_eq!(*tracker.target(&()).unwrap(), update.world);
}

#[test]
fn second_frame_uses_iterative_seed() {
    let cam = camera();
    let mut tracker: PoseTracker<u32, Mat4> =
        PoseTracker::new(cam.clone(), config(FilterMode::Disabled)).unwrap();
    tracker.register(1, Mat4::IDENTITY);

    let a = RawPose::new(DVec3::new(0.1, -0.05, 0.02), DVec3::new(0.05, 0.02, 0.8));
    let b = RawPose::new(DVec3::new(0.12, -0.04, 0.02), DVec3::new(0.06, 0.02, 0.81));

    let r1 = tracker.process_frame(Mat4::IDENTITY, [(1, observe(&cam, &a))]);
    let r2 = tracker.process_frame(Mat4::IDENTITY, [(1, observe(&cam, &b))]);

    assert_eq!(r1.outcomes[0].1.update().unwrap().method, SolveMethod::Robust);
    let u2 = r2.outcomes[0].1.update().unwrap();
    assert_eq!(u2.method, SolveMethod::Iterative);
    assert_relative_eq!(u2.pose.position.x, 0.06, epsilon = 1e-4);
    assert_relative_eq!(u2.pose.position.y, -0.02, epsilon = 1e-4);
    assert_relative_eq!(u2.pose.position.z, 0.81, epsilon = 1e-4);
}

#[test]
fn three_correspondences_are_invalid() {
    let mut tracker: PoseTracker<u32, Mat4> =
        PoseTracker::new(camera(), TrackerConfig::default()).unwrap();
    tracker.register(1, Mat4::IDENTITY);

    let corr = Correspondences::new(
        square_marker_points(MARKER)[..3].to_vec(),
        vec![DVec2::new(300.0, 200.0); 3],
    );
    let report = tracker.process_frame(Mat4::IDENTITY, [(1, corr)]);
    assert!(matches!(
        report.outcomes[0].1,
        TrackOutcome::Skipped(SkipReason::InvalidConfiguration(_))
    ));
    assert_eq!(*tracker.target(&1).unwrap(), Mat4::IDENTITY);
}

#[test]
fn targets_converge_independently() {
    let cam = camera();
    let mode = FilterMode::Exponential {
        position: 0.6,
        rotation: 0.6,
    };
    let pose_a = RawPose::new(DVec3::new(0.0, 0.1, 0.0), DVec3::new(-0.1, 0.0, 0.7));
    let pose_b = RawPose::new(DVec3::new(0.2, 0.0, 0.1), DVec3::new(0.15, 0.05, 1.2));

    let mut both: PoseTracker<&str, Mat4> = PoseTracker::new(cam.clone(), config(mode)).unwrap();
    both.register("a", Mat4::IDENTITY);
    both.register("b", Mat4::IDENTITY);
    let mut only_a: PoseTracker<&str, Mat4> = PoseTracker::new(cam.clone(), config(mode)).unwrap();
    only_a.register("a", Mat4::IDENTITY);

    let start_a = RawPose::new(pose_a.rvec, pose_a.tvec + DVec3::new(0.05, 0.0, 0.1));
    both.process_frame(Mat4::IDENTITY, [("a", observe(&cam, &start_a))]);
    only_a.process_frame(Mat4::IDENTITY, [("a", observe(&cam, &start_a))]);

    for i in 0..40 {
        // b follows its own drifting stream, interleaved with a.
        let jitter = RawPose::new(pose_b.rvec, pose_b.tvec + DVec3::new(0.0, 0.0, 0.01 * (i % 3) as f64));
        both.process_frame(Mat4::IDENTITY, [("b", observe(&cam, &jitter))]);

        let ra = both.process_frame(Mat4::IDENTITY, [("a", observe(&cam, &pose_a))]);
        let rb = only_a.process_frame(Mat4::IDENTITY, [("a", observe(&cam, &pose_a))]);
        assert_eq!(ra.outcomes[0].1, rb.outcomes[0].1);
    }

    let a = both.registry().get(&"a").unwrap().filter().previous().copied().unwrap();
    assert_relative_eq!(a.position.x, -0.1, epsilon = 1e-4);
    assert_relative_eq!(a.position.z, 0.7, epsilon = 1e-4);

    let b = both.registry().get(&"b").unwrap().filter().previous().copied().unwrap();
    assert_relative_eq!(b.position.x, 0.15, epsilon = 1e-3);
    assert!(b.position.z > 1.19 && b.position.z < 1.23);
}

#[test]
fn anchor_modes_round_trip() {
    let cam = camera();
    let raw = RawPose::new(DVec3::new(0.1, 0.3, -0.2), DVec3::new(0.02, -0.03, 0.9));
    let camera_world = Mat4::from_rotation_translation(Quat::from_rotation_y(0.5), Vec3::new(1.0, 1.5, -2.0));

    let mut object_tracker: PoseTracker<u8, Mat4> = PoseTracker::new(
        cam.clone(),
        TrackerConfig {
            axis_inversion: AxisInversion {
                x: false,
                y: false,
                z: true,
            },
            ..config(FilterMode::Disabled)
        },
    )
    .unwrap();
    object_tracker.register(0, Mat4::IDENTITY);
    let report = object_tracker.process_frame(camera_world, [(0, observe(&cam, &raw))]);
    let update = report.outcomes[0].1.update().unwrap();

    let camera_back = compose(
        &update.pose,
        AxisInversion {
            x: false,
            y: false,
            z: true,
        },
        AnchorMode::RelativeToCameraTarget,
        Mat4::IDENTITY,
        update.world,
    );
    assert!(camera_back.abs_diff_eq(camera_world, 1e-4));
}

#[test]
fn hide_policy_hides_and_restores() {
    let cam = camera();
    let mut tracker: PoseTracker<u32, Transform> = PoseTracker::new(
        cam.clone(),
        TrackerConfig {
            loss_policy: LossPolicy::Hide { after_frames: 2 },
            ..TrackerConfig::default()
        },
    )
    .unwrap();
    tracker.register(5, Transform::default());
    let raw = RawPose::new(DVec3::ZERO, DVec3::new(0.0, 0.0, 0.5));

    tracker.process_frame(Mat4::IDENTITY, [(5, observe(&cam, &raw))]);
    let placed = *tracker.target(&5).unwrap();
    assert!(placed.visible);

    let r = tracker.process_frame(Mat4::IDENTITY, Vec::new());
    assert!(r.lost.is_empty());
    let r = tracker.process_frame(Mat4::IDENTITY, Vec::new());
    assert_eq!(r.lost, vec![5]);

    let hidden = tracker.target(&5).unwrap();
    assert!(!hidden.visible);
    assert_eq!(hidden.translation, placed.translation);
    assert!(tracker.registry().get(&5).unwrap().seed().is_none());

    // Stays hidden without being reported again.
    let r = tracker.process_frame(Mat4::IDENTITY, Vec::new());
    assert!(r.lost.is_empty());

    let r = tracker.process_frame(Mat4::IDENTITY, [(5, observe(&cam, &raw))]);
    assert_eq!(r.outcomes[0].1.update().unwrap().method, SolveMethod::Robust);
    assert!(tracker.target(&5).unwrap().visible);
}

#[test]
fn retain_policy_leaves_absent_targets() {
    let cam = camera();
    let mut tracker: PoseTracker<u32, Transform> =
        PoseTracker::new(cam.clone(), TrackerConfig::default()).unwrap();
    tracker.register(5, Transform::default());
    let raw = RawPose::new(DVec3::ZERO, DVec3::new(0.0, 0.0, 0.5));
    tracker.process_frame(Mat4::IDENTITY, [(5, observe(&cam, &raw))]);
    let placed = *tracker.target(&5).unwrap();

    for _ in 0..10 {
        let r = tracker.process_frame(Mat4::IDENTITY, Vec::new());
        assert!(r.lost.is_empty());
    }
    assert_eq!(*tracker.target(&5).unwrap(), placed);
    assert!(tracker.registry().get(&5).unwrap().seed().is_some());
}

#[test]
fn auto_register_creates_targets() {
    let cam = camera();
    let mut tracker: PoseTracker<u32, Mat4> = PoseTracker::new(
        cam.clone(),
        TrackerConfig {
            auto_register: true,
            ..TrackerConfig::default()
        },
    )
    .unwrap();
    let raw = RawPose::new(DVec3::ZERO, DVec3::new(0.0, 0.0, 0.5));
    let report = tracker.process_frame(Mat4::IDENTITY, [(42, observe(&cam, &raw))]);
    assert!(report.outcomes[0].1.update().is_some());
    assert!(tracker.registry().contains(&42));
}

#[test]
fn reset_and_reinitialize_restart_cold() {
    let cam = camera();
    let mut tracker: PoseTracker<u32, Mat4> =
        PoseTracker::new(cam.clone(), TrackerConfig::default()).unwrap();
    tracker.register(1, Mat4::IDENTITY);
    let raw = RawPose::new(DVec3::ZERO, DVec3::new(0.0, 0.0, 0.5));

    tracker.process_frame(Mat4::IDENTITY, [(1, observe(&cam, &raw))]);
    assert!(tracker.reset(&1));
    assert!(!tracker.reset(&2));
    let r = tracker.process_frame(Mat4::IDENTITY, [(1, observe(&cam, &raw))]);
    assert_eq!(r.outcomes[0].1.update().unwrap().method, SolveMethod::Robust);

    let half = cam.downscaled(2).unwrap();
    tracker.reinitialize(half.clone()).unwrap();
    let entity = tracker.registry().get(&1).unwrap();
    assert!(!entity.filter().has_previous());
    assert!(!tracker.is_in_view(&1));

    let r = tracker.process_frame(Mat4::IDENTITY, [(1, observe(&half, &raw))]);
    let update = r.outcomes[0].1.update().unwrap();
    assert_relative_eq!(update.pose.position.z, 0.5, epsilon = 1e-4);
}

#[test]
fn left_handed_points_mirror_the_solve() {
    let cam = camera();
    let raw = RawPose::new(DVec3::new(0.0, 0.0, 0.3), DVec3::new(0.0, 0.0, 0.6));
    let corr = observe(&cam, &raw);

    let mut tracker: PoseTracker<u32, Mat4> = PoseTracker::new(
        cam.clone(),
        TrackerConfig {
            left_handed_object_points: true,
            ..config(FilterMode::Disabled)
        },
    )
    .unwrap();
    tracker.register(1, Mat4::IDENTITY);
    let report = tracker.process_frame(Mat4::IDENTITY, [(1, corr)]);
    let update = report.outcomes[0].1.update().unwrap();

    // Mirrored model points: same distance, rotation no longer the in-plane one.
    assert_relative_eq!(update.pose.position.z, 0.6, epsilon = 1e-4);
    let in_plane = Quat::from_rotation_z(-0.3);
    assert!(update.pose.rotation.angle_between(in_plane) > 0.1);
}
