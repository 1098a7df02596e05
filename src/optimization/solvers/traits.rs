use crate::core::StopReason;
use thiserror::Error;

#[derive(Clone, Debug)]
pub struct SolverResult {
    pub stop_reason: StopReason,
    /// `0.5 * ||r||^2` at `params`.
    pub cost: f64,
    pub initial_cost: f64,
    pub iterations: u32,
    pub params: Vec<f64>,
    /// Residual evaluations, Jacobian probes included.
    pub cost_evals: usize,
    pub jacobian_evals: usize,
    /// Infinity norm of the projected gradient at `params`.
    pub optimality: f64,
}

impl SolverResult {
    pub fn message(&self) -> &'static str {
        self.stop_reason.message()
    }
}

/// Progress of one accepted step.
#[derive(Clone, Debug)]
pub struct IterationProgress<'a> {
    pub iteration: u32,
    pub params: &'a [f64],
    pub residual_norm: f64,
    pub initial_norm: f64,
    pub cost_evals: usize,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SolverError {
    /// Cancellation observed before a residual evaluation.
    #[error("optimization cancelled")]
    Cancelled,

    /// Unrecoverable failure; the run cannot continue.
    #[error("{0}")]
    Fatal(String),
}

/// Callback interface for optimization progress
pub trait OptimizationCallback {
    /// Called once per accepted step, in increasing iteration order
    fn on_iteration(&mut self, progress: &IterationProgress<'_>) -> Result<(), SolverError>;

    /// Checked between iterations
    fn should_stop(&self) -> bool {
        false
    }
}

/// Bounded nonlinear least-squares problem: minimize `0.5 * ||r(x)||^2`
pub trait Problem {
    /// Residual vector for given parameters (runs a simulation)
    fn residuals(&self, params: &[f64]) -> Result<Vec<f64>, SolverError>;

    /// Number of parameters
    fn num_params(&self) -> usize;

    /// Length of every residual vector
    fn num_residuals(&self) -> usize;

    /// Initial parameter values, inside the bounds
    fn initial_params(&self) -> &[f64];

    /// Parameter bounds (min, max) for each parameter
    fn bounds(&self) -> &[(f64, f64)];
}

/// Solver interface - takes problem and callback
pub trait Solver {
    fn name(&self) -> &str;

    fn solve(
        &mut self,
        problem: &dyn Problem,
        callback: &mut dyn OptimizationCallback,
    ) -> Result<SolverResult, SolverError>;
}
