//! The `optimization` module connects the calibration data to `tiny_solver`.
//!
//! * [`reprojection`] defines the residual of a single landmark observation,
//!   generic over the camera model and the scalar type so the solver can
//!   differentiate it automatically.
//! * [`problem`] assembles named parameter blocks and residual blocks into a
//!   least-squares problem, runs Levenberg-Marquardt on a dedicated thread
//!   pool and summarizes the result.

pub mod problem;
pub mod reprojection;

pub use problem::{
    CalibrationProblem, IterationReport, ParameterValues, RobustLoss, SharedManifold,
    SolveOutcome, SolveSummary, SolverOptions, TerminationReason,
};
pub use reprojection::{ReprojectionCost, REPROJECTION_RESIDUAL_SIZE};
