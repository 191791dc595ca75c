//! Glue between the calibration engine and `tiny_solver`.
//!
//! [`CalibrationProblem`] collects named parameter blocks and residual blocks,
//! hands the referenced part of it to the Levenberg-Marquardt optimizer one
//! iteration at a time and reports what happened in a [`SolveSummary`].

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, warn};
use nalgebra::DVector;
use rayon::prelude::*;
use rayon::ThreadPool;
use serde::{Deserialize, Serialize};
use tiny_solver::factors::{Factor, FactorImpl};
use tiny_solver::loss_functions::{CauchyLoss, HuberLoss, Loss};
use tiny_solver::manifold::Manifold;
use tiny_solver::optimizer::{Optimizer, OptimizerOptions};
use tiny_solver::LevenbergMarquardtOptimizer;

use crate::calibrator::error::{CalibrationError, CalibrationResult};

pub type SharedManifold = Arc<dyn Manifold + Send + Sync>;
pub type ParameterValues = HashMap<String, DVector<f64>>;

type ResidualEvaluator = Box<dyn Fn(&[DVector<f64>]) -> DVector<f64> + Send + Sync>;

// Damping bounds handed to `LevenbergMarquardtOptimizer::new`, tiny-solver's defaults.
const MIN_DIAGONAL: f64 = 1e-6;
const MAX_DIAGONAL: f64 = 1e32;
const INITIAL_TRUST_REGION_RADIUS: f64 = 1e4;
/// A rejected step shrinks the radius by this factor and is retried.
const TRUST_REGION_SHRINK: f64 = 4.0;
/// An accepted step grows the radius by this factor.
const TRUST_REGION_GROWTH: f64 = 3.0;
const MIN_TRUST_REGION_RADIUS: f64 = 1e-16;
const MAX_TRUST_REGION_RADIUS: f64 = 1e16;

/// Robust loss applied on top of every residual block.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RobustLoss {
    #[default]
    None,
    Huber {
        scale: f64,
    },
    Cauchy {
        scale: f64,
    },
}

impl RobustLoss {
    pub fn validate(&self) -> CalibrationResult<()> {
        match self {
            RobustLoss::None => Ok(()),
            RobustLoss::Huber { scale } | RobustLoss::Cauchy { scale } => {
                if scale.is_finite() && *scale > 0.0 {
                    Ok(())
                } else {
                    Err(CalibrationError::Config(format!(
                        "robust loss scale must be positive, got {scale}"
                    )))
                }
            }
        }
    }

    /// `rho(s)` for a squared residual norm `s`, the quantity the solver minimizes.
    pub fn evaluate(&self, squared_norm: f64) -> f64 {
        match self.to_loss() {
            Some(loss) => loss.evaluate(squared_norm)[0],
            None => squared_norm,
        }
    }

    pub fn to_loss(self) -> Option<Box<dyn Loss + Send>> {
        match self {
            RobustLoss::None => None,
            RobustLoss::Huber { scale } => Some(Box::new(HuberLoss::new(scale))),
            RobustLoss::Cauchy { scale } => Some(Box::new(CauchyLoss::new(scale))),
        }
    }
}

/// Stopping criteria for one optimization cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct SolverOptions {
    pub max_iterations: usize,
    pub min_abs_decrease: f64,
    pub min_rel_decrease: f64,
    pub min_error: f64,
}

impl Default for SolverOptions {
    fn default() -> Self {
        Self {
            max_iterations: 100,
            min_abs_decrease: 1e-12,
            min_rel_decrease: 1e-10,
            min_error: 1e-16,
        }
    }
}

impl SolverOptions {
    /// Options for a single Levenberg-Marquardt step.
    fn step_options(&self) -> OptimizerOptions {
        OptimizerOptions {
            max_iteration: 1,
            verbosity_level: 0,
            min_abs_error_decrease_threshold: self.min_abs_decrease,
            min_rel_error_decrease_threshold: self.min_rel_decrease,
            min_error_threshold: self.min_error,
            ..OptimizerOptions::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TerminationReason {
    /// Nothing to optimize, the values are returned untouched.
    NoResiduals,
    MaxIterations,
    AbsoluteDecrease,
    RelativeDecrease,
    MinError,
    /// The last step did not reduce the cost and was discarded.
    NoImprovement,
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            TerminationReason::NoResiduals => "no residuals",
            TerminationReason::MaxIterations => "maximum iterations reached",
            TerminationReason::AbsoluteDecrease => "absolute cost decrease below threshold",
            TerminationReason::RelativeDecrease => "relative cost decrease below threshold",
            TerminationReason::MinError => "cost below threshold",
            TerminationReason::NoImprovement => "no further improvement",
        };
        f.write_str(text)
    }
}

/// State after one accepted solver iteration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IterationReport {
    pub iteration: usize,
    /// `0.5 * sum ||r||^2`, without the robust loss.
    pub cost: f64,
    /// `0.5 * sum rho(||r||^2)`, the value the solver minimizes.
    pub objective: f64,
    pub objective_decrease: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolveSummary {
    /// `0.5 * sum ||r||^2` before the first iteration.
    pub initial_cost: f64,
    pub final_cost: f64,
    /// Scalar residual rows.
    pub num_residuals: usize,
    pub num_residual_blocks: usize,
    /// Parameter blocks referenced by at least one residual.
    pub num_parameter_blocks: usize,
    /// Robust objective before and after, equal to the costs without a loss.
    pub initial_objective: f64,
    pub final_objective: f64,
    pub iterations: usize,
    pub termination: TerminationReason,
    pub duration: Duration,
}

impl SolveSummary {
    /// Mean of the squared residual rows' halves, `final_cost / num_residuals`.
    pub fn mse(&self) -> f64 {
        if self.num_residuals == 0 {
            0.0
        } else {
            self.final_cost / self.num_residuals as f64
        }
    }

    pub fn brief_report(&self) -> String {
        format!(
            "Levenberg-Marquardt: {} after {} iterations, cost {:.6e} -> {:.6e}, \
             objective {:.6e} -> {:.6e}, {} residual blocks, {} parameter blocks, {:.3} ms",
            self.termination,
            self.iterations,
            self.initial_cost,
            self.final_cost,
            self.initial_objective,
            self.final_objective,
            self.num_residual_blocks,
            self.num_parameter_blocks,
            self.duration.as_secs_f64() * 1e3
        )
    }
}

pub struct SolveOutcome {
    /// Values of every parameter block, optimized or not.
    pub values: ParameterValues,
    pub summary: SolveSummary,
}

struct ParameterBlock {
    value: DVector<f64>,
    manifold: Option<SharedManifold>,
    constant: bool,
}

struct ResidualBlock {
    evaluate: ResidualEvaluator,
    loss: RobustLoss,
    parameter_names: Vec<String>,
}

/// A least-squares problem over named parameter blocks.
pub struct CalibrationProblem {
    problem: tiny_solver::Problem,
    parameter_blocks: HashMap<String, ParameterBlock>,
    residual_blocks: Vec<ResidualBlock>,
    num_residuals: usize,
}

impl Default for CalibrationProblem {
    fn default() -> Self {
        Self::new()
    }
}

impl CalibrationProblem {
    pub fn new() -> Self {
        Self {
            problem: tiny_solver::Problem::new(),
            parameter_blocks: HashMap::new(),
            residual_blocks: Vec::new(),
            num_residuals: 0,
        }
    }

    /// Registers a parameter block under `name` with its initial value.
    pub fn add_parameter_block(
        &mut self,
        name: &str,
        value: DVector<f64>,
        manifold: Option<SharedManifold>,
    ) -> CalibrationResult<()> {
        if self.parameter_blocks.contains_key(name) {
            return Err(CalibrationError::InvalidArgument(format!(
                "parameter block '{name}' already exists"
            )));
        }
        self.parameter_blocks.insert(
            name.to_string(),
            ParameterBlock {
                value,
                manifold,
                constant: false,
            },
        );
        Ok(())
    }

    /// Keeps every coordinate of the block at its initial value.
    pub fn set_parameter_block_constant(&mut self, name: &str) -> CalibrationResult<()> {
        let block = self.parameter_blocks.get_mut(name).ok_or_else(|| {
            CalibrationError::InvalidArgument(format!("unknown parameter block '{name}'"))
        })?;
        block.constant = true;
        Ok(())
    }

    /// Adds a residual block connecting the named parameter blocks, in order.
    pub fn add_residual_block<F>(
        &mut self,
        factor: F,
        loss: RobustLoss,
        parameter_names: &[&str],
    ) -> CalibrationResult<()>
    where
        F: Factor<f64> + FactorImpl + Clone + Send + Sync + 'static,
    {
        let initial = parameter_names
            .iter()
            .map(|name| {
                self.parameter_blocks
                    .get(*name)
                    .map(|block| block.value.clone())
                    .ok_or_else(|| {
                        CalibrationError::InvalidArgument(format!(
                            "residual refers to unknown parameter block '{name}'"
                        ))
                    })
            })
            .collect::<CalibrationResult<Vec<_>>>()?;

        loss.validate()?;
        let dimension = <F as Factor<f64>>::residual_func(&factor, &initial).len();
        if dimension == 0 {
            return Err(CalibrationError::InvalidArgument(
                "residual block has no rows".to_string(),
            ));
        }

        self.problem.add_residual_block(
            dimension,
            parameter_names,
            Box::new(factor.clone()),
            loss.to_loss(),
        );
        self.residual_blocks.push(ResidualBlock {
            evaluate: Box::new(move |params: &[DVector<f64>]| {
                <F as Factor<f64>>::residual_func(&factor, params)
            }),
            loss,
            parameter_names: parameter_names.iter().map(|name| name.to_string()).collect(),
        });
        self.num_residuals += dimension;
        Ok(())
    }

    pub fn num_residuals(&self) -> usize {
        self.num_residuals
    }

    pub fn num_residual_blocks(&self) -> usize {
        self.residual_blocks.len()
    }

    pub fn num_parameter_blocks(&self) -> usize {
        self.parameter_blocks.len()
    }

    pub fn parameter_value(&self, name: &str) -> Option<&DVector<f64>> {
        self.parameter_blocks.get(name).map(|block| &block.value)
    }

    pub fn initial_values(&self) -> ParameterValues {
        self.parameter_blocks
            .iter()
            .map(|(name, block)| (name.clone(), block.value.clone()))
            .collect()
    }

    /// `0.5 * sum ||r||^2` at the given values.
    pub fn cost(&self, values: &ParameterValues) -> f64 {
        evaluate_costs(&self.residual_blocks, values).cost
    }

    /// `0.5 * sum rho(||r||^2)` at the given values.
    pub fn objective(&self, values: &ParameterValues) -> f64 {
        evaluate_costs(&self.residual_blocks, values).objective
    }

    /// Runs one optimization cycle on `pool`.
    ///
    /// `on_iteration` is called after every accepted iteration with the values
    /// of the referenced parameter blocks.
    pub fn solve<F>(
        self,
        options: &SolverOptions,
        pool: &ThreadPool,
        on_iteration: F,
    ) -> CalibrationResult<SolveOutcome>
    where
        F: FnMut(&IterationReport, &ParameterValues) + Send,
    {
        pool.install(move || self.run(options, on_iteration))
    }

    fn run<F>(mut self, options: &SolverOptions, mut on_iteration: F) -> CalibrationResult<SolveOutcome>
    where
        F: FnMut(&IterationReport, &ParameterValues),
    {
        let start = Instant::now();
        let mut values = self.initial_values();

        let referenced: HashSet<String> = self
            .residual_blocks
            .iter()
            .flat_map(|block| block.parameter_names.iter().cloned())
            .collect();

        let initial = evaluate_costs(&self.residual_blocks, &values);
        let mut summary = SolveSummary {
            initial_cost: initial.cost,
            final_cost: initial.cost,
            num_residuals: self.num_residuals,
            num_residual_blocks: self.residual_blocks.len(),
            num_parameter_blocks: referenced.len(),
            initial_objective: initial.objective,
            final_objective: initial.objective,
            iterations: 0,
            termination: TerminationReason::NoResiduals,
            duration: Duration::ZERO,
        };

        if self.residual_blocks.is_empty() {
            summary.duration = start.elapsed();
            return Ok(SolveOutcome { values, summary });
        }
        if !initial.objective.is_finite() {
            return Err(CalibrationError::Solver(format!(
                "initial cost is not finite ({})",
                initial.objective
            )));
        }

        for name in &referenced {
            if let Some(block) = self.parameter_blocks.get(name) {
                if block.constant {
                    for index in 0..block.value.len() {
                        self.problem.fix_variable(name, index);
                    }
                } else if let Some(manifold) = &block.manifold {
                    self.problem.set_variable_manifold(name, manifold.clone());
                }
            }
        }

        let mut active: ParameterValues = referenced
            .iter()
            .filter_map(|name| values.get(name).map(|value| (name.clone(), value.clone())))
            .collect();

        let mut current = initial;
        let mut radius = INITIAL_TRUST_REGION_RADIUS;
        let mut termination = TerminationReason::MaxIterations;
        let mut iterations = 0;

        while iterations < options.max_iterations {
            if current.objective <= options.min_error {
                termination = TerminationReason::MinError;
                break;
            }

            let Some((next, costs)) = self.step(&active, current.objective, &mut radius, options)?
            else {
                debug!(
                    "Iteration {}: no step lowers the objective {:.6e}",
                    iterations + 1,
                    current.objective
                );
                termination = TerminationReason::NoImprovement;
                break;
            };
            iterations += 1;

            let decrease = current.objective - costs.objective;
            let relative_decrease = decrease / current.objective;
            active = next;
            current = costs;

            debug!(
                "Iteration {iterations}: objective {:.6e}, decrease {decrease:.3e}, radius {radius:.1e}",
                current.objective
            );
            on_iteration(
                &IterationReport {
                    iteration: iterations,
                    cost: current.cost,
                    objective: current.objective,
                    objective_decrease: decrease,
                },
                &active,
            );

            if decrease < options.min_abs_decrease {
                termination = TerminationReason::AbsoluteDecrease;
                break;
            }
            if relative_decrease < options.min_rel_decrease {
                termination = TerminationReason::RelativeDecrease;
                break;
            }
        }

        if termination == TerminationReason::MaxIterations && iterations == 0 {
            warn!("Solver called with max_iterations = 0");
        }

        values.extend(active);
        summary.final_cost = current.cost;
        summary.final_objective = current.objective;
        summary.iterations = iterations;
        summary.termination = termination;
        summary.duration = start.elapsed();
        Ok(SolveOutcome { values, summary })
    }

    /// One Levenberg-Marquardt iteration that lowers `objective`.
    ///
    /// A rejected step is retried with a smaller trust region. The radius of
    /// the accepted step is grown and carried into the next iteration.
    /// Returns `None` once the radius falls below its lower bound.
    fn step(
        &self,
        active: &ParameterValues,
        objective: f64,
        radius: &mut f64,
        options: &SolverOptions,
    ) -> CalibrationResult<Option<(ParameterValues, Costs)>> {
        while *radius >= MIN_TRUST_REGION_RADIUS {
            let optimizer = LevenbergMarquardtOptimizer::new(MIN_DIAGONAL, MAX_DIAGONAL, *radius);
            let attempt = panic::catch_unwind(AssertUnwindSafe(|| {
                optimizer.optimize(&self.problem, active, Some(options.step_options()))
            }));
            let candidate = match attempt {
                Ok(Some(candidate)) => candidate,
                Ok(None) => {
                    return Err(CalibrationError::Solver(
                        "Levenberg-Marquardt step failed to solve the normal equations"
                            .to_string(),
                    ))
                }
                Err(payload) => {
                    return Err(CalibrationError::Solver(format!(
                        "solver panicked during optimization: {}",
                        panic_payload_to_string(payload.as_ref())
                    )))
                }
            };

            let mut next = active.clone();
            next.extend(candidate);
            let costs = evaluate_costs(&self.residual_blocks, &next);
            if costs.objective.is_finite() && costs.objective < objective {
                *radius = (*radius * TRUST_REGION_GROWTH).min(MAX_TRUST_REGION_RADIUS);
                return Ok(Some((next, costs)));
            }

            *radius /= TRUST_REGION_SHRINK;
            debug!(
                "Step rejected (objective {:.6e}), retrying with radius {:.1e}",
                costs.objective, *radius
            );
        }
        Ok(None)
    }
}

pub(crate) fn panic_payload_to_string(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&'static str>() {
        return (*msg).to_string();
    }
    if let Some(msg) = payload.downcast_ref::<String>() {
        return msg.clone();
    }
    "unknown panic payload".to_string()
}

#[derive(Debug, Clone, Copy)]
struct Costs {
    cost: f64,
    objective: f64,
}

fn evaluate_costs(residual_blocks: &[ResidualBlock], values: &ParameterValues) -> Costs {
    residual_blocks
        .par_iter()
        .map(|block| {
            let params = block
                .parameter_names
                .iter()
                .filter_map(|name| values.get(name).cloned())
                .collect::<Vec<_>>();
            if params.len() != block.parameter_names.len() {
                return Costs {
                    cost: f64::INFINITY,
                    objective: f64::INFINITY,
                };
            }
            let squared_norm = (block.evaluate)(&params).norm_squared();
            Costs {
                cost: 0.5 * squared_norm,
                objective: 0.5 * block.loss.evaluate(squared_norm),
            }
        })
        .reduce(
            || Costs {
                cost: 0.0,
                objective: 0.0,
            },
            |a, b| Costs {
                cost: a.cost + b.cost,
                objective: a.objective + b.objective,
            },
        )
}
