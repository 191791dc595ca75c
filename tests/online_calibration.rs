//! Engine-level scenarios: ids, residual sanity, gauge, concurrency and
//! end-to-end convergence.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use approx::assert_relative_eq;
use nalgebra::{DVector, Isometry3, Point3, Translation3, UnitQuaternion, Vector2, Vector3};
use online_calib::camera::{CameraModel, Intrinsics, PinholeModel, Resolution};
use online_calib::{CalibrationError, Calibrator, CalibratorConfig};

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn unit_pinhole() -> PinholeModel {
    PinholeModel::new(&DVector::from_vec(vec![1.0, 1.0, 0.0, 0.0])).unwrap()
}

fn config() -> CalibratorConfig {
    CalibratorConfig {
        thread_count: 2,
        idle_interval_ms: 1,
        ..CalibratorConfig::default()
    }
}

fn landmarks() -> Vec<Vector3<f64>> {
    let mut points = Vec::new();
    for (i, x) in [-0.6, -0.2, 0.2, 0.6].into_iter().enumerate() {
        for (j, y) in [-0.4, 0.0, 0.4].into_iter().enumerate() {
            let z = if (i + j) % 2 == 0 { 1.5 } else { 3.0 };
            points.push(Vector3::new(x, y, z));
        }
    }
    points
}

fn project(
    model: &PinholeModel,
    t_ck: &Isometry3<f64>,
    t_kw: &Isometry3<f64>,
    landmark: &Vector3<f64>,
) -> Vector2<f64> {
    let point = t_ck * t_kw * Point3::from(*landmark);
    model.project(&point.coords).unwrap()
}

/// Polls `condition` until it holds or `timeout` expires.
fn wait_for(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    condition()
}

#[test]
fn test_ids_are_sequential() {
    init_logger();
    let calibrator = Calibrator::<PinholeModel>::new(config()).unwrap();

    for expected in 0..5 {
        assert_eq!(calibrator.add_frame(Isometry3::identity()).unwrap(), expected);
    }
    for expected in 0..3 {
        assert_eq!(
            calibrator.add_camera(unit_pinhole(), Isometry3::identity()).unwrap(),
            expected
        );
    }
    assert_eq!(calibrator.num_frames(), 5);
    assert_eq!(calibrator.num_cameras(), 3);
    assert!(calibrator.frame(5).is_none());
    assert!(calibrator.camera(3).is_none());

    calibrator.clear().unwrap();
    assert_eq!(calibrator.num_frames(), 0);
    assert_eq!(calibrator.add_frame(Isometry3::identity()).unwrap(), 0);
}

#[test]
fn test_trivial_pose_residual() {
    init_logger();
    let calibrator = Calibrator::with_defaults().unwrap();
    let camera = calibrator.add_camera(unit_pinhole(), Isometry3::identity()).unwrap();
    let frame = calibrator.add_frame(Isometry3::identity()).unwrap();

    let landmark = Vector3::new(0.3, -0.7, 1.0);
    let pixel = Vector2::new(0.1, 0.2);
    calibrator.add_observation(frame, camera, landmark, pixel).unwrap();

    let residual = calibrator.evaluate_residual(0).unwrap();
    assert_relative_eq!(residual, landmark.xy() - pixel, epsilon = 1e-12);

    let observation = calibrator.observation(0).unwrap();
    assert_eq!(observation.frame, frame);
    assert_eq!(observation.camera, camera);
    assert_eq!(observation.landmark, landmark);
    assert_eq!(observation.pixel, pixel);
}

#[test]
fn test_landmark_is_a_world_point() {
    init_logger();
    let calibrator = Calibrator::with_defaults().unwrap();
    let camera = calibrator.add_camera(unit_pinhole(), Isometry3::identity()).unwrap();
    // World origin sits one unit in front of the keyframe
    let frame = calibrator
        .add_frame(Isometry3::from_parts(
            Translation3::new(0.0, 0.0, 1.0),
            UnitQuaternion::identity(),
        ))
        .unwrap();

    let landmark = Vector3::new(0.2, 0.1, 1.0);
    calibrator
        .add_observation(frame, camera, landmark, Vector2::zeros())
        .unwrap();

    // Read as a camera-frame point the residual would be (0.2, 0.1)
    let residual = calibrator.evaluate_residual(0).unwrap();
    assert_relative_eq!(residual, Vector2::new(0.1, 0.05), epsilon = 1e-12);
}

#[test]
fn test_exact_observation_has_zero_residual() {
    init_logger();
    let calibrator = Calibrator::with_defaults().unwrap();
    let model = PinholeModel::new(&DVector::from_vec(vec![420.0, 410.0, 320.0, 240.0])).unwrap();
    let t_ck = Isometry3::from_parts(
        Translation3::new(0.1, 0.0, -0.02),
        UnitQuaternion::from_euler_angles(0.0, 0.02, 0.01),
    );
    let t_kw = Isometry3::from_parts(
        Translation3::new(-0.2, 0.1, 0.3),
        UnitQuaternion::from_euler_angles(0.05, -0.1, 0.2),
    );
    let camera = calibrator.add_camera(model.clone(), t_ck).unwrap();
    let frame = calibrator.add_frame(t_kw).unwrap();

    let landmark = Vector3::new(0.3, -0.2, 2.5);
    let pixel = project(&model, &t_ck, &t_kw, &landmark);
    calibrator.add_observation(frame, camera, landmark, pixel).unwrap();

    assert_relative_eq!(calibrator.evaluate_residual(0).unwrap(), Vector2::zeros(), epsilon = 1e-9);
}

#[test]
fn test_usage_errors() {
    init_logger();
    let calibrator = Calibrator::<PinholeModel>::new(config()).unwrap();
    calibrator.add_camera(unit_pinhole(), Isometry3::identity()).unwrap();
    calibrator.add_frame(Isometry3::identity()).unwrap();

    assert!(matches!(
        calibrator.add_observation(1, 0, Vector3::z(), Vector2::zeros()),
        Err(CalibrationError::InvalidArgument(_))
    ));
    assert!(matches!(
        calibrator.add_observation(0, 4, Vector3::z(), Vector2::zeros()),
        Err(CalibrationError::InvalidArgument(_))
    ));
    assert_eq!(calibrator.num_observations(), 0);

    let invalid = PinholeModel {
        intrinsics: Intrinsics {
            fx: -1.0,
            fy: 1.0,
            cx: 0.0,
            cy: 0.0,
        },
        resolution: Resolution::default(),
    };
    assert!(matches!(
        calibrator.add_camera(invalid, Isometry3::identity()),
        Err(CalibrationError::Camera(_))
    ));
    assert_eq!(calibrator.num_cameras(), 1);

    // Stopping an idle engine is a no-op
    calibrator.stop();
    assert!(!calibrator.is_running());

    calibrator.start().unwrap();
    assert!(calibrator.is_running());
    // A second start only warns
    calibrator.start().unwrap();
    assert!(calibrator.is_running());
    assert!(matches!(calibrator.clear(), Err(CalibrationError::InvalidState(_))));

    calibrator.stop();
    assert!(!calibrator.is_running());
    calibrator.clear().unwrap();

    let invalid_config = CalibratorConfig {
        max_iterations: 0,
        ..CalibratorConfig::default()
    };
    assert!(matches!(
        Calibrator::<PinholeModel>::new(invalid_config),
        Err(CalibrationError::Config(_))
    ));
}

#[test]
fn test_solve_without_residuals_changes_nothing() {
    init_logger();
    let calibrator = Calibrator::<PinholeModel>::new(config()).unwrap();
    let t_ck = Isometry3::from_parts(Translation3::new(0.1, 0.2, 0.3), UnitQuaternion::identity());
    let t_kw = Isometry3::from_parts(
        Translation3::new(1.0, 0.0, 0.0),
        UnitQuaternion::from_euler_angles(0.1, 0.0, 0.0),
    );
    calibrator.add_camera(unit_pinhole(), t_ck).unwrap();
    calibrator.add_camera(unit_pinhole(), t_ck).unwrap();
    calibrator.add_frame(t_kw).unwrap();

    for _ in 0..2 {
        assert!(calibrator.solve_once().unwrap().is_none());
    }
    assert_eq!(calibrator.cycles(), 0);
    assert!(calibrator.last_summary().is_none());
    assert_eq!(calibrator.frame(0).unwrap().t_kw, t_kw);
    assert_eq!(calibrator.camera(1).unwrap().t_ck, t_ck);
    assert_eq!(calibrator.camera(1).unwrap().camera, unit_pinhole());
}

#[test]
fn test_reference_camera_extrinsic_is_fixed() {
    init_logger();
    let calibrator = Calibrator::<PinholeModel>::new(config()).unwrap();
    let model = PinholeModel::new(&DVector::from_vec(vec![300.0, 300.0, 320.0, 240.0])).unwrap();

    let t_c0k = Isometry3::from_parts(
        Translation3::new(0.05, -0.02, 0.01),
        UnitQuaternion::from_euler_angles(0.01, 0.02, -0.03),
    );
    let t_c1k_true = Isometry3::from_parts(
        Translation3::new(-0.1, 0.0, 0.0),
        UnitQuaternion::from_euler_angles(0.0, 0.05, 0.0),
    );
    let t_c1k_init = Isometry3::from_parts(
        Translation3::new(-0.08, 0.01, 0.0),
        UnitQuaternion::from_euler_angles(0.0, 0.03, 0.01),
    );
    calibrator.add_camera(model.clone(), t_c0k).unwrap();
    calibrator.add_camera(model.clone(), t_c1k_init).unwrap();

    for index in 0..3 {
        let t_kw = Isometry3::from_parts(
            Translation3::new(0.1 * index as f64, 0.0, 0.0),
            UnitQuaternion::from_euler_angles(0.0, 0.05 * index as f64, 0.0),
        );
        let frame = calibrator.add_frame(t_kw).unwrap();
        for landmark in landmarks() {
            // Camera 0 is observed with a small bias so its pose would move if free
            let biased = project(&model, &t_c0k, &t_kw, &landmark) + Vector2::new(0.5, -0.3);
            calibrator.add_observation(frame, 0, landmark, biased).unwrap();
            let pixel = project(&model, &t_c1k_true, &t_kw, &landmark);
            calibrator.add_observation(frame, 1, landmark, pixel).unwrap();
        }
    }

    for _ in 0..3 {
        let summary = calibrator.solve_once().unwrap().unwrap();
        assert_eq!(summary.num_residual_blocks, calibrator.num_observations());
    }
    assert_eq!(calibrator.cycles(), 3);
    assert_eq!(calibrator.camera(0).unwrap().t_ck, t_c0k);
    assert_ne!(calibrator.camera(1).unwrap().t_ck, t_c1k_init);
}

#[test]
fn test_end_to_end_convergence() {
    init_logger();
    // One iteration per cycle, so every cycle has room to improve
    let calibrator = Calibrator::<PinholeModel>::new(CalibratorConfig {
        max_iterations: 1,
        ..config()
    })
    .unwrap();
    let truth = unit_pinhole();
    calibrator
        .add_camera(
            PinholeModel::new(&DVector::from_vec(vec![1.03, 0.98, 0.01, -0.01])).unwrap(),
            Isometry3::identity(),
        )
        .unwrap();

    let t_kw_true = [
        Isometry3::identity(),
        Isometry3::from_parts(
            Translation3::new(0.05, 0.0, 0.0),
            UnitQuaternion::from_euler_angles(0.0, 0.1, 0.02),
        ),
    ];
    let f0 = calibrator.add_frame(Isometry3::identity()).unwrap();
    let f1 = calibrator.add_frame(Isometry3::identity()).unwrap();

    // Grow the observation set between cycles
    for chunk in landmarks().chunks(4) {
        for landmark in chunk {
            for (frame, t_kw) in [f0, f1].into_iter().zip(t_kw_true.iter()) {
                let pixel = project(&truth, &Isometry3::identity(), t_kw, landmark);
                calibrator.add_observation(frame, 0, *landmark, pixel).unwrap();
            }
        }
        let summary = calibrator.solve_once().unwrap().unwrap();
        assert_eq!(summary.num_residual_blocks, calibrator.num_observations());
        assert_eq!(summary.iterations, 1);
        assert!(summary.final_cost < summary.initial_cost);
    }

    // Each cycle starts where the previous one stopped
    let mut previous_cost: Option<f64> = None;
    for _ in 0..3 {
        let summary = calibrator.solve_once().unwrap().unwrap();
        assert!(summary.final_cost < summary.initial_cost);
        if let Some(previous) = previous_cost {
            assert_relative_eq!(summary.initial_cost, previous, epsilon = 1e-12, max_relative = 1e-6);
        }
        previous_cost = Some(summary.final_cost);
    }

    calibrator.start().unwrap();
    let settled = wait_for(Duration::from_secs(20), || {
        calibrator
            .last_summary()
            .is_some_and(|summary| summary.mse() < 1e-12)
    });
    calibrator.stop();
    assert!(settled, "last summary: {:?}", calibrator.last_summary());

    let camera = calibrator.camera(0).unwrap();
    assert_relative_eq!(camera.camera.params(), truth.params(), epsilon = 1e-4);
    assert_eq!(camera.t_ck, Isometry3::identity());
    assert_relative_eq!(calibrator.frame(f1).unwrap().t_kw, t_kw_true[1], epsilon = 1e-4);
    for index in 0..calibrator.num_observations() {
        assert_relative_eq!(
            calibrator.evaluate_residual(index).unwrap(),
            Vector2::zeros(),
            epsilon = 1e-5
        );
    }
}

#[test]
fn test_concurrent_producers_while_running() {
    init_logger();
    let calibrator = Arc::new(Calibrator::<PinholeModel>::new(config()).unwrap());
    let model = PinholeModel::new(&DVector::from_vec(vec![300.0, 300.0, 320.0, 240.0])).unwrap();
    calibrator.add_camera(model.clone(), Isometry3::identity()).unwrap();

    const PRODUCERS: usize = 4;
    const FRAMES_PER_PRODUCER: usize = 3;
    let points = landmarks();

    calibrator.start().unwrap();
    let handles: Vec<_> = (0..PRODUCERS)
        .map(|producer| {
            let calibrator = Arc::clone(&calibrator);
            let model = model.clone();
            let points = points.clone();
            thread::spawn(move || {
                for step in 0..FRAMES_PER_PRODUCER {
                    let t_kw = Isometry3::from_parts(
                        Translation3::new(0.02 * producer as f64, 0.01 * step as f64, 0.0),
                        UnitQuaternion::identity(),
                    );
                    let frame = calibrator.add_frame(t_kw).unwrap();
                    for landmark in &points {
                        let pixel = project(&model, &Isometry3::identity(), &t_kw, landmark);
                        calibrator.add_observation(frame, 0, *landmark, pixel).unwrap();
                    }
                    thread::sleep(Duration::from_millis(1));
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let expected = PRODUCERS * FRAMES_PER_PRODUCER * points.len();
    assert_eq!(calibrator.num_observations(), expected);

    let covered = wait_for(Duration::from_secs(20), || {
        calibrator
            .last_summary()
            .is_some_and(|summary| summary.num_residual_blocks == expected)
    });
    calibrator.stop();
    assert!(covered, "no cycle covered all {expected} observations");

    assert!(!calibrator.is_running());
    assert_eq!(calibrator.num_frames(), PRODUCERS * FRAMES_PER_PRODUCER);
    assert_eq!(calibrator.num_cameras(), 1);
    assert!(calibrator.cycles() > 0);
    for index in 0..expected {
        let observation = calibrator.observation(index).unwrap();
        assert!(observation.frame < calibrator.num_frames());
        assert!(calibrator.evaluate_residual(index).unwrap().norm() < 1e-6);
    }
}

#[test]
fn test_report_and_rig_export() {
    init_logger();
    let calibrator = Calibrator::<PinholeModel>::new(config()).unwrap();
    let t_ck = Isometry3::from_parts(Translation3::new(-0.1, 0.0, 0.0), UnitQuaternion::identity());
    calibrator.add_camera(unit_pinhole(), Isometry3::identity()).unwrap();
    calibrator.add_camera(unit_pinhole(), t_ck).unwrap();
    let frame = calibrator.add_frame(Isometry3::identity()).unwrap();
    for landmark in landmarks() {
        let pixel = project(&unit_pinhole(), &Isometry3::identity(), &Isometry3::identity(), &landmark);
        calibrator.add_observation(frame, 0, landmark, pixel).unwrap();
    }
    calibrator.solve_once().unwrap();

    let report = calibrator.report();
    assert_eq!(report.num_frames, 1);
    assert_eq!(report.num_observations, landmarks().len());
    assert_eq!(report.cycles, 1);
    assert_eq!(report.cameras.len(), 2);
    assert_relative_eq!(report.cameras[1].extrinsic[0][3], -0.1);
    assert!(report.last_summary.is_some());

    let json: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();
    assert_eq!(json["cameras"][1]["model"], "pinhole");
    assert_eq!(json["num_observations"], landmarks().len());

    let rig = calibrator.to_rig();
    assert_eq!(rig.len(), 2);
    assert_relative_eq!(rig.pose(1).unwrap().translation.vector.x, 0.1, epsilon = 1e-12);
}

#[test]
fn test_solver_failure_keeps_loop_running() {
    init_logger();
    let calibrator = Calibrator::<PinholeModel>::new(config()).unwrap();
    calibrator.add_camera(unit_pinhole(), Isometry3::identity()).unwrap();
    let frame = calibrator.add_frame(Isometry3::identity()).unwrap();
    // A landmark on the camera plane has no finite projection
    calibrator
        .add_observation(frame, 0, Vector3::new(0.1, 0.0, 0.0), Vector2::new(0.0, 0.0))
        .unwrap();

    assert!(matches!(
        calibrator.solve_once(),
        Err(CalibrationError::Solver(_))
    ));
    assert_eq!(calibrator.cycles(), 0);
    assert!(calibrator.last_summary().is_none());

    calibrator.start().unwrap();
    let failing = wait_for(Duration::from_secs(10), || calibrator.failed_cycles() >= 3);
    assert!(calibrator.is_running());
    calibrator.stop();
    assert!(failing, "failed cycles: {}", calibrator.failed_cycles());
    assert_eq!(calibrator.cycles(), 0);
    assert_eq!(calibrator.frame(frame).unwrap().t_kw, Isometry3::identity());
}
