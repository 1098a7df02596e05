pub mod callback;
pub mod objective;
pub mod problem;
pub mod solvers;

pub use callback::CircuitOptimizationCallback;
pub use objective::{Evaluation, ObjectiveFunction, evaluate};
pub use problem::{Candidate, CircuitProblem, FAILURE_PENALTY};
pub use solvers::{
    IterationProgress, JacobianScheme, OptimizationCallback, Problem, Solver, SolverError,
    SolverResult, TrustRegionOptimizer,
};
