//! Online Calibration Library
//!
//! Concurrent online calibration of multi-camera rigs. Producer threads feed
//! rig keyframes, cameras and 2D-3D landmark observations into a
//! [`Calibrator`] while a background loop keeps refining the camera
//! intrinsics, the camera-to-rig extrinsics and the keyframe poses by
//! minimizing the reprojection error.
//!
//! Supported camera models:
//! - Pinhole camera model
//! - Kannala-Brandt camera model
//! - Double Sphere camera model
//!
//! Optimization runs on the tiny-solver Levenberg-Marquardt optimizer with
//! automatic differentiation of the reprojection residual.

pub mod calibrator;
pub mod camera;
pub mod geometry;
pub mod optimization;

// Re-export commonly used types
pub use calibrator::{
    CalibrationError, CalibrationReport, CalibrationResult, Calibrator, CalibratorConfig,
    CameraAndPose, CameraReport, Frame, Observation,
};

pub use camera::{
    CameraModel, CameraModelError, DoubleSphereModel, Intrinsics, KannalaBrandtModel,
    PinholeModel, Projection, Resolution, Rig,
};

pub use geometry::PoseManifold;

pub use optimization::{
    CalibrationProblem, ReprojectionCost, RobustLoss, SolveSummary, SolverOptions,
    TerminationReason,
};
