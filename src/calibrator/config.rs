//! Runtime configuration of the calibration engine.
//!
//! The configuration can be built in code or loaded from YAML:
//!
//! ```yaml
//! max_iterations: 100
//! thread_count: 4
//! report_every_iteration: true
//! loss:
//!   type: huber
//!   scale: 2.0
//! ```
//!
//! Missing keys fall back to [`CalibratorConfig::default`].

use std::fs;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::calibrator::error::{CalibrationError, CalibrationResult};
use crate::optimization::{RobustLoss, SolverOptions};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibratorConfig {
    /// Upper bound on solver iterations per optimization cycle.
    pub max_iterations: usize,
    /// Worker threads of the solver pool.
    pub thread_count: usize,
    /// Write optimized values back after every solver iteration instead of
    /// only at the end of a cycle.
    pub report_every_iteration: bool,
    pub min_abs_decrease: f64,
    pub min_rel_decrease: f64,
    pub min_error: f64,
    /// Sleep between cycles while there is nothing to optimize.
    pub idle_interval_ms: u64,
    pub loss: RobustLoss,
}

impl Default for CalibratorConfig {
    fn default() -> Self {
        Self {
            max_iterations: 100,
            thread_count: 4,
            report_every_iteration: true,
            min_abs_decrease: 1e-12,
            min_rel_decrease: 1e-10,
            min_error: 1e-16,
            idle_interval_ms: 10,
            loss: RobustLoss::None,
        }
    }
}

impl CalibratorConfig {
    pub fn validate(&self) -> CalibrationResult<()> {
        if self.max_iterations == 0 {
            return Err(CalibrationError::Config(
                "max_iterations must be at least 1".to_string(),
            ));
        }
        if self.thread_count == 0 {
            return Err(CalibrationError::Config(
                "thread_count must be at least 1".to_string(),
            ));
        }
        for (name, value) in [
            ("min_abs_decrease", self.min_abs_decrease),
            ("min_rel_decrease", self.min_rel_decrease),
            ("min_error", self.min_error),
        ] {
            if !(value.is_finite() && value >= 0.0) {
                return Err(CalibrationError::Config(format!(
                    "{name} must be finite and non-negative, got {value}"
                )));
            }
        }
        self.loss.validate()
    }

    pub fn idle_interval(&self) -> Duration {
        Duration::from_millis(self.idle_interval_ms)
    }

    pub fn solver_options(&self) -> SolverOptions {
        SolverOptions {
            max_iterations: self.max_iterations,
            min_abs_decrease: self.min_abs_decrease,
            min_rel_decrease: self.min_rel_decrease,
            min_error: self.min_error,
        }
    }

    pub fn load_from_yaml(path: &str) -> CalibrationResult<Self> {
        let contents = fs::read_to_string(path)?;
        let config: CalibratorConfig = serde_yaml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save_to_yaml(&self, path: &str) -> CalibrationResult<()> {
        fs::write(path, serde_yaml::to_string(self)?)?;
        Ok(())
    }
}
