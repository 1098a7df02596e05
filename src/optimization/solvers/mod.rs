mod trust_region;
pub mod traits;

pub use traits::{
    IterationProgress, OptimizationCallback, Problem, Solver, SolverError, SolverResult,
};
pub use trust_region::{JacobianScheme, TrustRegionOptimizer};
