//! Online calibration engine.
//!
//! A [`Calibrator`] owns the calibration data (rig keyframes, cameras and
//! reprojection residuals) behind a single mutex. Producer threads append data
//! while an optional background worker repeatedly
//!
//! 1. snapshots the data under the lock into a fresh [`CalibrationProblem`],
//! 2. solves it outside the lock on the solver thread pool,
//! 3. writes the optimized values back under the lock.
//!
//! Camera 0's extrinsic pose is held constant to fix the gauge. Landmarks are
//! never optimized.
//!
//! ```no_run
//! use nalgebra::{DVector, Isometry3, Vector2, Vector3};
//! use online_calib::calibrator::{Calibrator, CalibratorConfig};
//! use online_calib::camera::PinholeModel;
//!
//! let calibrator = Calibrator::new(CalibratorConfig::default()).unwrap();
//! let model = PinholeModel::new(&DVector::from_vec(vec![1.0, 1.0, 0.0, 0.0])).unwrap();
//! let camera = calibrator.add_camera(model, Isometry3::identity()).unwrap();
//! let frame = calibrator.add_frame(Isometry3::identity()).unwrap();
//! calibrator
//!     .add_observation(frame, camera, Vector3::new(0.1, 0.2, 1.0), Vector2::new(0.1, 0.2))
//!     .unwrap();
//!
//! calibrator.start().unwrap();
//! // ... keep adding data from other threads ...
//! calibrator.stop();
//! ```

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use log::{debug, error, info, warn};
use nalgebra::{Isometry3, Vector2, Vector3};
use rayon::{ThreadPool, ThreadPoolBuilder};
use serde::{Deserialize, Serialize};

use crate::camera::rig::SharedCamera;
use crate::camera::{Projection, Rig};
use crate::geometry::{isometry_to_params, params_to_isometry, PoseManifold};
use crate::optimization::problem::panic_payload_to_string;
use crate::optimization::{CalibrationProblem, ParameterValues, ReprojectionCost, SolveSummary};

pub mod config;
pub mod error;

pub use config::CalibratorConfig;
pub use error::{CalibrationError, CalibrationResult};

/// A rig pose at one instant.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// World to keyframe.
    pub t_kw: Isometry3<f64>,
}

/// A camera model together with its mounting pose on the rig.
#[derive(Debug, Clone, PartialEq)]
pub struct CameraAndPose<M> {
    pub camera: M,
    /// Keyframe to camera.
    pub t_ck: Isometry3<f64>,
}

/// One 2D-3D correspondence as it was added.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub frame: usize,
    pub camera: usize,
    /// Fixed landmark in world coordinates.
    pub landmark: Vector3<f64>,
    pub pixel: Vector2<f64>,
}

struct Residual<M> {
    frame: usize,
    camera: usize,
    cost: ReprojectionCost<M>,
}

struct CalibrationState<M> {
    frames: Vec<Frame>,
    cameras: Vec<CameraAndPose<M>>,
    residuals: Vec<Residual<M>>,
    /// Bumped by `clear`, so a solve started before it never writes back.
    generation: u64,
}

impl<M> Default for CalibrationState<M> {
    fn default() -> Self {
        Self {
            frames: Vec::new(),
            cameras: Vec::new(),
            residuals: Vec::new(),
            generation: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockRef {
    Frame(usize),
    CameraExtrinsic(usize),
    CameraIntrinsics(usize),
}

fn frame_block(index: usize) -> String {
    format!("frame_{index}")
}

fn extrinsic_block(index: usize) -> String {
    format!("camera_extrinsic_{index}")
}

fn intrinsics_block(index: usize) -> String {
    format!("camera_intrinsics_{index}")
}

/// Which parameter blocks of a built problem map back to which state entries.
struct Snapshot {
    generation: u64,
    blocks: Vec<(String, BlockRef)>,
}

struct Shared<M> {
    state: Mutex<CalibrationState<M>>,
    config: CalibratorConfig,
    pool: ThreadPool,
    should_run: AtomicBool,
    cycles: AtomicUsize,
    failed_cycles: AtomicUsize,
    last_summary: Mutex<Option<SolveSummary>>,
}

impl<M> Shared<M>
where
    M: Projection + Clone + Send + Sync + 'static,
{
    fn lock_state(&self) -> MutexGuard<'_, CalibrationState<M>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn build_problem(
        &self,
        state: &CalibrationState<M>,
    ) -> CalibrationResult<(CalibrationProblem, Snapshot)> {
        let mut problem = CalibrationProblem::new();
        let mut blocks = Vec::with_capacity(state.frames.len() + 2 * state.cameras.len());

        for (index, frame) in state.frames.iter().enumerate() {
            let name = frame_block(index);
            problem.add_parameter_block(
                &name,
                isometry_to_params(&frame.t_kw),
                Some(Arc::new(PoseManifold)),
            )?;
            blocks.push((name, BlockRef::Frame(index)));
        }

        for (index, camera) in state.cameras.iter().enumerate() {
            let extrinsic = extrinsic_block(index);
            problem.add_parameter_block(
                &extrinsic,
                isometry_to_params(&camera.t_ck),
                Some(Arc::new(PoseManifold)),
            )?;
            if index == 0 {
                problem.set_parameter_block_constant(&extrinsic)?;
            } else {
                blocks.push((extrinsic, BlockRef::CameraExtrinsic(index)));
            }

            let intrinsics = intrinsics_block(index);
            problem.add_parameter_block(&intrinsics, camera.camera.params(), None)?;
            blocks.push((intrinsics, BlockRef::CameraIntrinsics(index)));
        }

        for residual in &state.residuals {
            let frame = frame_block(residual.frame);
            let extrinsic = extrinsic_block(residual.camera);
            let intrinsics = intrinsics_block(residual.camera);
            problem.add_residual_block(
                residual.cost.clone(),
                self.config.loss,
                &[frame.as_str(), extrinsic.as_str(), intrinsics.as_str()],
            )?;
        }

        Ok((
            problem,
            Snapshot {
                generation: state.generation,
                blocks,
            },
        ))
    }

    fn write_back(&self, snapshot: &Snapshot, values: &ParameterValues) {
        let mut state = self.lock_state();
        if state.generation != snapshot.generation {
            debug!("Calibration data was cleared during the solve, discarding results");
            return;
        }

        for (name, block) in &snapshot.blocks {
            let Some(value) = values.get(name) else {
                continue;
            };
            match *block {
                BlockRef::Frame(index) => {
                    if let (Some(frame), Some(pose)) =
                        (state.frames.get_mut(index), params_to_isometry(value.as_view()))
                    {
                        frame.t_kw = pose;
                    }
                }
                BlockRef::CameraExtrinsic(index) => {
                    if let (Some(camera), Some(pose)) =
                        (state.cameras.get_mut(index), params_to_isometry(value.as_view()))
                    {
                        camera.t_ck = pose;
                    }
                }
                BlockRef::CameraIntrinsics(index) => {
                    if let Some(camera) = state.cameras.get_mut(index) {
                        if let Err(err) = camera.camera.set_params(value) {
                            warn!("Keeping previous intrinsics of camera {index}: {err}");
                        }
                    }
                }
            }
        }
    }

    fn solve_once(&self) -> CalibrationResult<Option<SolveSummary>> {
        let (problem, snapshot) = {
            let state = self.lock_state();
            if state.residuals.is_empty() {
                return Ok(None);
            }
            self.build_problem(&state)?
        };

        let report_every_iteration = self.config.report_every_iteration;
        let outcome = problem.solve(
            &self.config.solver_options(),
            &self.pool,
            |report, values| {
                debug!(
                    "Iteration {}: cost {:.6e}, objective {:.6e} (decrease {:.3e})",
                    report.iteration, report.cost, report.objective, report.objective_decrease
                );
                if report_every_iteration {
                    self.write_back(&snapshot, values);
                }
            },
        )?;

        if !report_every_iteration {
            self.write_back(&snapshot, &outcome.values);
        }

        let summary = outcome.summary;
        *self
            .last_summary
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(summary.clone());
        self.cycles.fetch_add(1, Ordering::AcqRel);
        Ok(Some(summary))
    }

    fn run_loop(&self) {
        info!("Calibration loop started");
        while self.should_run.load(Ordering::Acquire) {
            let cycle = panic::catch_unwind(AssertUnwindSafe(|| self.solve_once()));
            match cycle {
                Ok(Ok(Some(summary))) => {
                    let (frames, observations) = {
                        let state = self.lock_state();
                        (state.frames.len(), state.residuals.len())
                    };
                    info!("{}", summary.brief_report());
                    info!(
                        "Frames: {frames}, observations: {observations}, mse: {:.6e}",
                        summary.mse()
                    );
                }
                Ok(Ok(None)) => thread::sleep(self.config.idle_interval()),
                Ok(Err(err)) => {
                    self.failed_cycles.fetch_add(1, Ordering::AcqRel);
                    error!("Calibration cycle failed: {err}");
                }
                Err(payload) => {
                    self.failed_cycles.fetch_add(1, Ordering::AcqRel);
                    error!(
                        "Calibration cycle panicked: {}",
                        panic_payload_to_string(payload.as_ref())
                    );
                }
            }
        }
        info!("Calibration loop stopped");
    }
}

/// Concurrent online calibration of a multi-camera rig.
pub struct Calibrator<M>
where
    M: Projection + Clone + Send + Sync + 'static,
{
    shared: Arc<Shared<M>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl<M> Calibrator<M>
where
    M: Projection + Clone + Send + Sync + 'static,
{
    pub fn new(config: CalibratorConfig) -> CalibrationResult<Self> {
        config.validate()?;
        let pool = ThreadPoolBuilder::new()
            .num_threads(config.thread_count)
            .thread_name(|index| format!("calibration-solver-{index}"))
            .build()?;

        Ok(Self {
            shared: Arc::new(Shared {
                state: Mutex::new(CalibrationState::default()),
                config,
                pool,
                should_run: AtomicBool::new(false),
                cycles: AtomicUsize::new(0),
                failed_cycles: AtomicUsize::new(0),
                last_summary: Mutex::new(None),
            }),
            worker: Mutex::new(None),
        })
    }

    /// Engine with [`CalibratorConfig::default`].
    pub fn with_defaults() -> CalibrationResult<Self> {
        Self::new(CalibratorConfig::default())
    }

    pub fn config(&self) -> &CalibratorConfig {
        &self.shared.config
    }

    fn lock_worker(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.worker.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Adds a camera with keyframe-to-camera pose `t_ck` and returns its id.
    ///
    /// The first camera added becomes the gauge reference: its extrinsic pose
    /// is never optimized.
    pub fn add_camera(&self, camera: M, t_ck: Isometry3<f64>) -> CalibrationResult<usize> {
        camera.validate_params()?;
        let mut state = self.shared.lock_state();
        state.cameras.push(CameraAndPose { camera, t_ck });
        let id = state.cameras.len() - 1;
        debug!("Added camera {id}");
        Ok(id)
    }

    /// Adds a rig keyframe with world-to-keyframe pose `t_kw` and returns its id.
    pub fn add_frame(&self, t_kw: Isometry3<f64>) -> CalibrationResult<usize> {
        let mut state = self.shared.lock_state();
        state.frames.push(Frame { t_kw });
        Ok(state.frames.len() - 1)
    }

    /// Adds a reprojection residual for `landmark` (world coordinates) seen at
    /// `pixel` by camera `camera` in frame `frame`.
    ///
    /// Safe to call while the background loop is running.
    pub fn add_observation(
        &self,
        frame: usize,
        camera: usize,
        landmark: Vector3<f64>,
        pixel: Vector2<f64>,
    ) -> CalibrationResult<()> {
        let mut state = self.shared.lock_state();
        if frame >= state.frames.len() {
            return Err(CalibrationError::InvalidArgument(format!(
                "frame {frame} does not exist ({} frames)",
                state.frames.len()
            )));
        }
        if camera >= state.cameras.len() {
            return Err(CalibrationError::InvalidArgument(format!(
                "camera {camera} does not exist ({} cameras)",
                state.cameras.len()
            )));
        }
        state.residuals.push(Residual {
            frame,
            camera,
            cost: ReprojectionCost::new(landmark, pixel),
        });
        Ok(())
    }

    pub fn num_frames(&self) -> usize {
        self.shared.lock_state().frames.len()
    }

    pub fn num_cameras(&self) -> usize {
        self.shared.lock_state().cameras.len()
    }

    pub fn num_observations(&self) -> usize {
        self.shared.lock_state().residuals.len()
    }

    pub fn frame(&self, index: usize) -> Option<Frame> {
        self.shared.lock_state().frames.get(index).cloned()
    }

    pub fn camera(&self, index: usize) -> Option<CameraAndPose<M>> {
        self.shared.lock_state().cameras.get(index).cloned()
    }

    pub fn observation(&self, index: usize) -> Option<Observation> {
        self.shared
            .lock_state()
            .residuals
            .get(index)
            .map(|residual| Observation {
                frame: residual.frame,
                camera: residual.camera,
                landmark: *residual.cost.landmark(),
                pixel: *residual.cost.pixel(),
            })
    }

    /// Current residual of observation `index`, predicted minus observed pixel.
    pub fn evaluate_residual(&self, index: usize) -> Option<Vector2<f64>> {
        let state = self.shared.lock_state();
        let residual = state.residuals.get(index)?;
        let frame = state.frames.get(residual.frame)?;
        let camera = state.cameras.get(residual.camera)?;
        Some(
            residual
                .cost
                .evaluate(&frame.t_kw, &camera.t_ck, &camera.camera.params()),
        )
    }

    /// Removes all frames, cameras and observations. Ids restart at 0.
    pub fn clear(&self) -> CalibrationResult<()> {
        let worker = self.lock_worker();
        if worker.is_some() {
            return Err(CalibrationError::InvalidState(
                "cannot clear calibration data while the calibrator is running".to_string(),
            ));
        }

        let mut state = self.shared.lock_state();
        state.frames.clear();
        state.cameras.clear();
        state.residuals.clear();
        state.generation += 1;
        *self
            .shared
            .last_summary
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = None;
        info!("Calibration data cleared");
        Ok(())
    }

    /// Starts the background optimization loop.
    ///
    /// Starting an already running calibrator only logs a warning.
    pub fn start(&self) -> CalibrationResult<()> {
        let mut worker = self.lock_worker();
        if worker.is_some() {
            warn!("Calibrator is already running");
            return Ok(());
        }

        self.shared.should_run.store(true, Ordering::Release);
        let shared = Arc::clone(&self.shared);
        let handle = thread::Builder::new()
            .name("online-calibration".to_string())
            .spawn(move || shared.run_loop())
            .map_err(|err| {
                self.shared.should_run.store(false, Ordering::Release);
                CalibrationError::Io(format!("failed to spawn calibration thread: {err}"))
            })?;
        *worker = Some(handle);
        Ok(())
    }

    /// Signals the loop to exit and waits for the current cycle to finish.
    /// Does nothing if the calibrator is not running.
    pub fn stop(&self) {
        let mut worker = self.lock_worker();
        let Some(handle) = worker.take() else {
            return;
        };
        self.shared.should_run.store(false, Ordering::Release);
        if handle.join().is_err() {
            error!("Calibration thread terminated with a panic");
        }
    }

    pub fn is_running(&self) -> bool {
        self.lock_worker().is_some()
    }

    /// Runs one build, solve and write-back cycle on the calling thread.
    ///
    /// Returns `Ok(None)` when there are no observations to optimize.
    pub fn solve_once(&self) -> CalibrationResult<Option<SolveSummary>> {
        self.shared.solve_once()
    }

    /// Number of completed optimization cycles.
    pub fn cycles(&self) -> usize {
        self.shared.cycles.load(Ordering::Acquire)
    }

    /// Number of background cycles that ended in an error or a panic.
    pub fn failed_cycles(&self) -> usize {
        self.shared.failed_cycles.load(Ordering::Acquire)
    }

    pub fn last_summary(&self) -> Option<SolveSummary> {
        self.shared
            .last_summary
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Current cameras as a [`Rig`] with camera-to-keyframe poses.
    pub fn to_rig(&self) -> Rig {
        let state = self.shared.lock_state();
        let mut rig = Rig::new();
        for camera in &state.cameras {
            let shared: SharedCamera = Arc::new(camera.camera.clone());
            rig.add_camera(shared, camera.t_ck.inverse());
        }
        rig
    }

    pub fn report(&self) -> CalibrationReport {
        let state = self.shared.lock_state();
        let cameras = state
            .cameras
            .iter()
            .enumerate()
            .map(|(index, camera)| {
                let homogeneous = camera.t_ck.to_homogeneous();
                let mut extrinsic = [[0.0; 4]; 3];
                for (row, values) in extrinsic.iter_mut().enumerate() {
                    for (col, value) in values.iter_mut().enumerate() {
                        *value = homogeneous[(row, col)];
                    }
                }
                CameraReport {
                    index,
                    model: camera.camera.model_name().to_string(),
                    intrinsics: camera.camera.params().iter().copied().collect(),
                    extrinsic,
                }
            })
            .collect();

        CalibrationReport {
            num_frames: state.frames.len(),
            num_observations: state.residuals.len(),
            cycles: self.cycles(),
            last_summary: self.last_summary(),
            cameras,
        }
    }
}

impl<M> Drop for Calibrator<M>
where
    M: Projection + Clone + Send + Sync + 'static,
{
    fn drop(&mut self) {
        self.stop();
        info!("{}", self.report());
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraReport {
    pub index: usize,
    pub model: String,
    pub intrinsics: Vec<f64>,
    /// Keyframe-to-camera pose as a row-major 3x4 `[R | t]` matrix.
    pub extrinsic: [[f64; 4]; 3],
}

/// Snapshot of the calibration result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationReport {
    pub num_frames: usize,
    pub num_observations: usize,
    pub cycles: usize,
    pub last_summary: Option<SolveSummary>,
    pub cameras: Vec<CameraReport>,
}

impl CalibrationReport {
    pub fn to_json(&self) -> CalibrationResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

impl fmt::Display for CalibrationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Calibration: {} frames, {} observations, {} cycles",
            self.num_frames, self.num_observations, self.cycles
        )?;
        for camera in &self.cameras {
            writeln!(f, "Camera {} ({})", camera.index, camera.model)?;
            writeln!(f, "  intrinsics: {:?}", camera.intrinsics)?;
            writeln!(f, "  extrinsic:")?;
            for row in &camera.extrinsic {
                writeln!(
                    f,
                    "    [{:>12.6} {:>12.6} {:>12.6} {:>12.6}]",
                    row[0], row[1], row[2], row[3]
                )?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::PinholeModel;
    use approx::assert_relative_eq;
    use nalgebra::{DVector, Translation3, UnitQuaternion};

    fn unit_pinhole() -> PinholeModel {
        PinholeModel::new(&DVector::from_vec(vec![1.0, 1.0, 0.0, 0.0])).unwrap()
    }

    fn calibrator() -> Calibrator<PinholeModel> {
        Calibrator::new(CalibratorConfig {
            thread_count: 1,
            ..CalibratorConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn test_block_names() {
        assert_eq!(frame_block(3), "frame_3");
        assert_eq!(extrinsic_block(0), "camera_extrinsic_0");
        assert_eq!(intrinsics_block(12), "camera_intrinsics_12");
    }

    #[test]
    fn test_build_problem_registers_all_blocks() {
        let calibrator = calibrator();
        calibrator.add_camera(unit_pinhole(), Isometry3::identity()).unwrap();
        calibrator.add_camera(unit_pinhole(), Isometry3::identity()).unwrap();
        calibrator.add_frame(Isometry3::identity()).unwrap();
        calibrator.add_frame(Isometry3::identity()).unwrap();
        calibrator
            .add_observation(1, 1, Vector3::new(0.0, 0.0, 2.0), Vector2::new(0.0, 0.0))
            .unwrap();

        let state = calibrator.shared.lock_state();
        let (problem, snapshot) = calibrator.shared.build_problem(&state).unwrap();
        assert_eq!(problem.num_parameter_blocks(), 2 + 2 * 2);
        assert_eq!(problem.num_residual_blocks(), 1);
        assert_eq!(problem.num_residuals(), 2);
        // camera 0's extrinsic never maps back
        assert!(!snapshot
            .blocks
            .iter()
            .any(|(_, block)| *block == BlockRef::CameraExtrinsic(0)));
        assert!(snapshot
            .blocks
            .iter()
            .any(|(name, block)| name == "camera_extrinsic_1" && *block == BlockRef::CameraExtrinsic(1)));
    }

    #[test]
    fn test_write_back_skips_invalid_intrinsics_and_stale_generation() {
        let calibrator = calibrator();
        calibrator.add_camera(unit_pinhole(), Isometry3::identity()).unwrap();
        calibrator.add_frame(Isometry3::identity()).unwrap();

        let moved = Isometry3::from_parts(
            Translation3::new(0.5, 0.0, 0.0),
            UnitQuaternion::identity(),
        );
        let snapshot = Snapshot {
            generation: 0,
            blocks: vec![
                ("frame_0".to_string(), BlockRef::Frame(0)),
                ("camera_intrinsics_0".to_string(), BlockRef::CameraIntrinsics(0)),
            ],
        };
        let mut values = ParameterValues::new();
        values.insert("frame_0".to_string(), isometry_to_params(&moved));
        values.insert(
            "camera_intrinsics_0".to_string(),
            DVector::from_vec(vec![-1.0, 1.0, 0.0, 0.0]),
        );

        calibrator.shared.write_back(&snapshot, &values);
        assert_relative_eq!(calibrator.frame(0).unwrap().t_kw, moved, epsilon = 1e-12);
        assert_eq!(calibrator.camera(0).unwrap().camera, unit_pinhole());

        calibrator.clear().unwrap();
        calibrator.add_camera(unit_pinhole(), Isometry3::identity()).unwrap();
        calibrator.add_frame(Isometry3::identity()).unwrap();
        calibrator.shared.write_back(&snapshot, &values);
        assert_eq!(calibrator.frame(0).unwrap().t_kw, Isometry3::identity());
    }

    #[test]
    fn test_report_json() {
        let calibrator = calibrator();
        calibrator
            .add_camera(
                unit_pinhole(),
                Isometry3::from_parts(Translation3::new(0.1, 0.2, 0.3), UnitQuaternion::identity()),
            )
            .unwrap();

        let report = calibrator.report();
        assert_eq!(report.cameras.len(), 1);
        assert_eq!(report.cameras[0].model, "pinhole");
        assert_eq!(report.cameras[0].intrinsics, vec![1.0, 1.0, 0.0, 0.0]);
        assert_eq!(report.cameras[0].extrinsic[2][3], 0.3);
        assert_eq!(report.cameras[0].extrinsic[0][0], 1.0);

        let json = report.to_json().unwrap();
        let parsed: CalibrationReport = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, report);
        assert!(report.to_string().contains("Camera 0 (pinhole)"));
    }

    #[test]
    fn test_to_rig_inverts_extrinsics() {
        let calibrator = calibrator();
        let t_ck = Isometry3::from_parts(
            Translation3::new(0.1, 0.0, 0.0),
            UnitQuaternion::from_euler_angles(0.0, 0.1, 0.0),
        );
        calibrator.add_camera(unit_pinhole(), t_ck).unwrap();

        let rig = calibrator.to_rig();
        assert_eq!(rig.len(), 1);
        assert_relative_eq!(*rig.pose(0).unwrap(), t_ck.inverse(), epsilon = 1e-12);
    }
}
