//! Online Rig Calibration Demo
//!
//! Simulates a two-camera rig that moves through a field of landmarks. A
//! producer thread feeds keyframes and observations into the calibrator while
//! its background loop refines the intrinsics of both cameras, the extrinsic
//! pose of the second camera and every keyframe pose.
//!
//! The ground-truth cameras are the Kannala-Brandt model loaded from YAML. The
//! calibrator starts from perturbed intrinsics and a perturbed extrinsic.
//!
//! Usage:
//! ```bash
//! cargo run --example online_calibration -- \
//!   --model-path samples/kannala_brandt.yaml \
//!   --config-path samples/calibrator.yaml \
//!   --frames 15
//! ```

use clap::Parser;
use flexi_logger::{colored_detailed_format, detailed_format, Duplicate, FileSpec, Logger};
use log::{info, warn};
use nalgebra::{DVector, Isometry3, Point3, Translation3, UnitQuaternion, Vector2, Vector3};
use online_calib::camera::{CameraModel, KannalaBrandtModel};
use online_calib::geometry;
use online_calib::{Calibrator, CalibratorConfig};
use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};

/// Online multi-camera calibration on synthetic data
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Ground-truth camera model (Kannala-Brandt YAML)
    #[arg(short = 'm', long, default_value = "samples/kannala_brandt.yaml")]
    model_path: PathBuf,

    /// Calibrator configuration YAML, defaults are used when omitted
    #[arg(short = 'c', long)]
    config_path: Option<PathBuf>,

    /// Number of keyframes to simulate
    #[arg(short = 'f', long, default_value_t = 15)]
    frames: usize,

    /// Approximate number of landmarks observed per keyframe
    #[arg(short = 'n', long, default_value_t = 80)]
    points: usize,

    /// Delay between keyframes in milliseconds
    #[arg(short = 'd', long, default_value_t = 20)]
    delay_ms: u64,

    /// Write the final calibration report as JSON
    #[arg(short = 'o', long)]
    output_path: Option<PathBuf>,
}

struct SimulatedFrame {
    t_kw: Isometry3<f64>,
    observations: Vec<(usize, Vector3<f64>, Vector2<f64>)>,
}

/// Keyframe poses along a gentle arc.
fn trajectory(index: usize) -> Isometry3<f64> {
    let s = index as f64;
    Isometry3::from_parts(
        Translation3::new(0.05 * s, -0.02 * s, 0.03 * (0.5 * s).sin()),
        UnitQuaternion::from_euler_angles(0.02 * (0.3 * s).sin(), 0.03 * s, -0.01 * s),
    )
}

fn perturb(
    model: &KannalaBrandtModel,
    scale: f64,
) -> Result<KannalaBrandtModel, Box<dyn std::error::Error>> {
    let params = model.params();
    let perturbed = DVector::from_fn(params.len(), |i, _| {
        if i < 4 {
            params[i] * (1.0 + scale)
        } else {
            params[i] * (1.0 - scale)
        }
    });
    let mut result = model.clone();
    result.set_params(&perturbed)?;
    Ok(result)
}

/// Landmarks are created by back-projecting a pixel grid of camera 0 to
/// varying depths and observed by every camera that sees them.
fn simulate_frame(
    index: usize,
    model: &KannalaBrandtModel,
    cameras: &[Isometry3<f64>],
    points: usize,
) -> SimulatedFrame {
    let t_kw = trajectory(index);
    let resolution = model.get_resolution();
    let pixels = geometry::sample_points(resolution.width as f64, resolution.height as f64, points);

    let t_wc0 = (cameras[0] * t_kw).inverse();
    let mut observations = Vec::new();
    for (i, pixel) in pixels.iter().enumerate() {
        let Ok(ray) = model.unproject(&pixel.coords) else {
            continue;
        };
        if ray.z <= 0.1 {
            continue;
        }
        let depth = 2.0 + 0.5 * ((i + index) % 5) as f64;
        let landmark = t_wc0 * Point3::from(ray * depth / ray.z);

        for (camera, t_ck) in cameras.iter().enumerate() {
            let point_c = t_ck * t_kw * landmark;
            if let Ok(observed) = model.project(&point_c.coords) {
                if resolution.contains(&observed) {
                    observations.push((camera, landmark.coords, observed));
                }
            }
        }
    }

    SimulatedFrame { t_kw, observations }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    Logger::try_with_str("info")?
        .log_to_file(
            FileSpec::default()
                .directory("logs")
                .suppress_timestamp()
                .suffix("log"),
        )
        .duplicate_to_stdout(Duplicate::All)
        .format_for_files(detailed_format)
        .format_for_stdout(colored_detailed_format)
        .set_palette("196;208;76;39;178".to_string())
        .start()?;

    let cli = Cli::parse();

    let model = KannalaBrandtModel::load_from_yaml(&cli.model_path.to_string_lossy())?;
    info!("Loaded ground-truth model from {:?}", cli.model_path);
    info!("Ground-truth intrinsics: {:?}", model.params().as_slice());

    let config = match &cli.config_path {
        Some(path) => CalibratorConfig::load_from_yaml(&path.to_string_lossy())?,
        None => CalibratorConfig::default(),
    };
    info!("Calibrator configuration: {config:?}");

    // Keyframe-to-camera poses of the rig
    let true_extrinsics = [
        Isometry3::identity(),
        Isometry3::from_parts(
            Translation3::new(-0.12, 0.0, 0.0),
            UnitQuaternion::from_euler_angles(0.0, 0.05, 0.0),
        ),
    ];
    let initial_extrinsics = [
        true_extrinsics[0],
        Isometry3::from_parts(
            Translation3::new(-0.1, 0.01, 0.005),
            UnitQuaternion::from_euler_angles(0.01, 0.03, -0.01),
        ),
    ];

    let calibrator = Calibrator::new(config)?;
    for t_ck in initial_extrinsics {
        let camera = calibrator.add_camera(perturb(&model, 0.02)?, t_ck)?;
        info!("Added camera {camera}");
    }

    calibrator.start()?;
    let start = Instant::now();

    thread::scope(|scope| -> Result<(), online_calib::CalibrationError> {
        let producer = scope.spawn(|| -> Result<(), online_calib::CalibrationError> {
            for index in 0..cli.frames {
                let simulated = simulate_frame(index, &model, &true_extrinsics, cli.points);
                let frame = calibrator.add_frame(simulated.t_kw)?;
                for (camera, landmark, pixel) in simulated.observations {
                    calibrator.add_observation(frame, camera, landmark, pixel)?;
                }
                thread::sleep(Duration::from_millis(cli.delay_ms));
            }
            Ok(())
        });
        match producer.join() {
            Ok(result) => result,
            Err(_) => {
                warn!("Producer thread panicked");
                Ok(())
            }
        }
    })?;

    let observations = calibrator.num_observations();
    info!(
        "Producer finished: {} frames, {} observations",
        calibrator.num_frames(),
        observations
    );

    // Let the loop finish a cycle that covers every observation
    let deadline = Instant::now() + Duration::from_secs(30);
    while Instant::now() < deadline {
        let covered = calibrator
            .last_summary()
            .is_some_and(|summary| summary.num_residual_blocks == observations);
        if covered {
            break;
        }
        thread::sleep(Duration::from_millis(10));
    }
    let settle = calibrator.cycles();
    while Instant::now() < deadline && calibrator.cycles() < settle + 2 {
        thread::sleep(Duration::from_millis(10));
    }
    calibrator.stop();
    info!("Calibration ran for {:.2} s", start.elapsed().as_secs_f64());

    let report = calibrator.report();
    println!("{report}");

    let truth = model.params();
    for camera in &report.cameras {
        let max_error = camera
            .intrinsics
            .iter()
            .zip(truth.iter())
            .map(|(estimated, expected)| (estimated - expected).abs())
            .fold(0.0, f64::max);
        info!("Camera {}: max intrinsic error {max_error:.3e}", camera.index);
    }
    if let Some(camera) = calibrator.camera(1) {
        let error = true_extrinsics[1].inverse() * camera.t_ck;
        info!(
            "Camera 1 extrinsic error: translation {:.3e} m, rotation {:.3e} rad",
            error.translation.vector.norm(),
            error.rotation.angle()
        );
    }

    if let Some(path) = &cli.output_path {
        std::fs::write(path, report.to_json()?)?;
        info!("Report written to {path:?}");
    }

    Ok(())
}
