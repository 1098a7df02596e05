//! Fit analog-circuit component values so a simulated waveform matches a target curve.
//!
//! A [`Workspace`] holds the uploaded netlist. A run selects tunable parameters, an
//! analysis and a target, then searches the bounded parameter box with a trust-region
//! least-squares solver, one external simulation per candidate.

pub mod controller;
pub mod core;
pub mod optimization;
pub mod simulation;

pub use crate::controller::{
    DefaultBounds, ExecutionController, ParameterSelection, RunConfig, RunEvent, RunHandle,
    RunMetrics, RunResult, RunState, Workspace,
};
pub use crate::core::*;
pub use crate::optimization::{
    CircuitProblem, JacobianScheme, ObjectiveFunction, Problem, Solver, SolverResult,
    TrustRegionOptimizer, evaluate,
};
pub use crate::simulation::{NetlistDocument, Simulate, SimulatorConfig, Waveform, XyceRunner};
