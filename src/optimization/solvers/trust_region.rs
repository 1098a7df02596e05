use super::traits::{
    IterationProgress, OptimizationCallback, Problem, Solver, SolverError, SolverResult,
};
use crate::core::{StopReason, Tolerances};
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

/// Finite-difference scheme for the Jacobian.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum JacobianScheme {
    /// One-sided differences, `n` evaluations per Jacobian.
    #[serde(rename = "2-point")]
    TwoPoint,
    /// Central differences (one-sided second order at bounds), `2n` evaluations.
    #[default]
    #[serde(rename = "3-point")]
    ThreePoint,
}

impl JacobianScheme {
    fn relative_step(&self) -> f64 {
        match self {
            Self::TwoPoint => f64::EPSILON.sqrt(),
            Self::ThreePoint => f64::EPSILON.cbrt(),
        }
    }
}

/// Bounded Levenberg-Marquardt with an active set.
///
/// Variables sitting on a bound whose gradient points outward are frozen for the
/// step; every trial point and every finite-difference probe stays inside the box.
pub struct TrustRegionOptimizer {
    max_iter: u32,
    tolerances: Tolerances,
    scheme: JacobianScheme,
    initial_damping: f64,
    max_rejections: u32,
}

/// Iterate state shared by the outer and inner loops.
struct State {
    x: Vec<f64>,
    f: DVector<f64>,
    cost: f64,
    iterations: u32,
    cost_evals: usize,
    jacobian_evals: usize,
    optimality: f64,
}

impl State {
    fn finish(self, stop_reason: StopReason, initial_cost: f64) -> SolverResult {
        SolverResult {
            stop_reason,
            cost: self.cost,
            initial_cost,
            iterations: self.iterations,
            params: self.x,
            cost_evals: self.cost_evals,
            jacobian_evals: self.jacobian_evals,
            optimality: self.optimality,
        }
    }
}

impl TrustRegionOptimizer {
    pub fn new(max_iter: u32, tolerances: Tolerances) -> Self {
        Self {
            max_iter,
            tolerances,
            scheme: JacobianScheme::default(),
            initial_damping: 1e-3,
            max_rejections: 30,
        }
    }

    pub fn with_jacobian(mut self, scheme: JacobianScheme) -> Self {
        self.scheme = scheme;
        self
    }

    /// Initial damping relative to the largest diagonal entry of `J^T J`.
    pub fn with_initial_damping(mut self, tau: f64) -> Self {
        self.initial_damping = tau;
        self
    }

    #[inline]
    fn clamp_params(&self, params: &mut [f64], bounds: &[(f64, f64)]) {
        for (i, &(min, max)) in bounds.iter().enumerate() {
            params[i] = params[i].clamp(min, max);
        }
    }

    /// Finite-difference Jacobian at `x`, never probing outside `bounds`.
    fn jacobian(
        &self,
        problem: &dyn Problem,
        x: &[f64],
        f0: &DVector<f64>,
        bounds: &[(f64, f64)],
        cost_evals: &mut usize,
    ) -> Result<DMatrix<f64>, SolverError> {
        let (m, n) = (f0.len(), x.len());
        let mut jac = DMatrix::zeros(m, n);

        let mut eval = |j: usize, value: f64| -> Result<(DVector<f64>, f64), SolverError> {
            let mut probe = x.to_vec();
            probe[j] = value;
            *cost_evals += 1;
            Ok((DVector::from_vec(problem.residuals(&probe)?), value - x[j]))
        };

        for j in 0..n {
            let (lo, hi) = bounds[j];
            let range = hi - lo;
            if range <= 0.0 {
                continue;
            }
            let scale = if x[j] != 0.0 { x[j].abs() } else { 1.0 };
            let h = (self.scheme.relative_step() * scale).min(range / 2.0);
            let fits = |v: f64| v >= lo && v <= hi;

            let column = match self.scheme {
                JacobianScheme::ThreePoint if fits(x[j] - h) && fits(x[j] + h) => {
                    let (fp, hp) = eval(j, x[j] + h)?;
                    let (fm, hm) = eval(j, x[j] - h)?;
                    (fp - fm) / (hp - hm)
                }
                JacobianScheme::ThreePoint if fits(x[j] + 2.0 * h) => {
                    let (f1, h1) = eval(j, x[j] + h)?;
                    let (f2, _) = eval(j, x[j] + 2.0 * h)?;
                    (f1 * 4.0 - f0 * 3.0 - f2) / (2.0 * h1)
                }
                JacobianScheme::ThreePoint if fits(x[j] - 2.0 * h) => {
                    let (f1, h1) = eval(j, x[j] - h)?;
                    let (f2, _) = eval(j, x[j] - 2.0 * h)?;
                    (f1 * 4.0 - f0 * 3.0 - f2) / (2.0 * h1)
                }
                _ => {
                    let target = if fits(x[j] + h) { x[j] + h } else { x[j] - h };
                    let (f1, h1) = eval(j, target)?;
                    (f1 - f0) / h1
                }
            };
            jac.set_column(j, &column);
        }

        Ok(jac)
    }

    /// Variables held fixed this iteration: degenerate bounds, or on a bound with the
    /// descent direction `-g` pointing out of the box.
    fn pinned(&self, x: &[f64], g: &DVector<f64>, bounds: &[(f64, f64)]) -> Vec<bool> {
        bounds
            .iter()
            .enumerate()
            .map(|(i, &(lo, hi))| lo >= hi || (x[i] <= lo && g[i] > 0.0) || (x[i] >= hi && g[i] < 0.0))
            .collect()
    }

    /// Solve `(A + mu * D) h = -g` over the free variables; `D` is the scaled diagonal of `A`.
    fn damped_step(
        &self,
        a: &DMatrix<f64>,
        g: &DVector<f64>,
        pinned: &[bool],
        mu: f64,
    ) -> Option<DVector<f64>> {
        let free: Vec<usize> = (0..pinned.len()).filter(|&i| !pinned[i]).collect();
        let k = free.len();
        let mut step = DVector::zeros(pinned.len());
        if k == 0 {
            return Some(step);
        }

        let max_diag = free.iter().map(|&i| a[(i, i)]).fold(0.0, f64::max);
        let floor = if max_diag > 0.0 { max_diag * 1e-12 } else { 1.0 };

        let mut lhs = DMatrix::zeros(k, k);
        let mut rhs = DVector::zeros(k);
        for (r, &i) in free.iter().enumerate() {
            for (c, &j) in free.iter().enumerate() {
                lhs[(r, c)] = a[(i, j)];
            }
            lhs[(r, r)] += mu * a[(i, i)].max(floor);
            rhs[r] = -g[i];
        }

        let solution = lhs.cholesky()?.solve(&rhs);
        if solution.iter().any(|v| !v.is_finite()) {
            return None;
        }
        for (r, &i) in free.iter().enumerate() {
            step[i] = solution[r];
        }
        Some(step)
    }
}

impl Solver for TrustRegionOptimizer {
    fn name(&self) -> &str {
        "trust-region-lm"
    }

    fn solve(
        &mut self,
        problem: &dyn Problem,
        callback: &mut dyn OptimizationCallback,
    ) -> Result<SolverResult, SolverError> {
        let bounds = problem.bounds();
        let Tolerances { xtol, gtol, ftol } = self.tolerances;

        let mut x = problem.initial_params().to_vec();
        self.clamp_params(&mut x, bounds);

        let f = DVector::from_vec(problem.residuals(&x)?);
        let cost = 0.5 * f.norm_squared();
        let initial_cost = cost;
        let initial_norm = f.norm();
        let mut state = State {
            x,
            f,
            cost,
            iterations: 0,
            cost_evals: 1,
            jacobian_evals: 0,
            optimality: f64::INFINITY,
        };

        let mut mu: Option<f64> = None;
        let mut nu = 2.0;

        loop {
            if callback.should_stop() {
                return Ok(state.finish(StopReason::Cancelled, initial_cost));
            }

            let jac = self.jacobian(problem, &state.x, &state.f, bounds, &mut state.cost_evals)?;
            state.jacobian_evals += 1;

            let g = jac.transpose() * &state.f;
            let pinned = self.pinned(&state.x, &g, bounds);
            state.optimality = g
                .iter()
                .zip(&pinned)
                .map(|(gi, &p)| if p { 0.0 } else { gi.abs() })
                .fold(0.0, f64::max);

            if state.optimality <= gtol || state.cost == 0.0 {
                return Ok(state.finish(StopReason::GradientTolerance, initial_cost));
            }
            if state.iterations >= self.max_iter {
                return Ok(state.finish(StopReason::IterationLimit, initial_cost));
            }

            let a = jac.transpose() * &jac;
            let mut damping = *mu.get_or_insert_with(|| {
                let max_diag = a.diagonal().iter().cloned().fold(0.0, f64::max);
                self.initial_damping * if max_diag > 0.0 { max_diag } else { 1.0 }
            });
            let mut rejections = 0;

            loop {
                let Some(step) = self.damped_step(&a, &g, &pinned, damping) else {
                    damping *= nu;
                    nu *= 2.0;
                    rejections += 1;
                    if rejections >= self.max_rejections {
                        return Ok(state.finish(StopReason::StepTolerance, initial_cost));
                    }
                    continue;
                };

                let mut x_new: Vec<f64> = state.x.iter().zip(step.iter()).map(|(x, h)| x + h).collect();
                self.clamp_params(&mut x_new, bounds);
                let s = DVector::from_iterator(
                    x_new.len(),
                    x_new.iter().zip(&state.x).map(|(a, b)| a - b),
                );

                let x_norm = state.x.iter().map(|v| v * v).sum::<f64>().sqrt();
                if s.norm() <= xtol * (xtol + x_norm) {
                    return Ok(state.finish(StopReason::StepTolerance, initial_cost));
                }

                let f_new = DVector::from_vec(problem.residuals(&x_new)?);
                state.cost_evals += 1;
                let cost_new = 0.5 * f_new.norm_squared();

                let predicted = -(g.dot(&s) + 0.5 * s.dot(&(&a * &s)));
                let actual = state.cost - cost_new;
                let rho = if predicted > 0.0 { actual / predicted } else { -1.0 };

                if rho > 0.0 && actual > 0.0 {
                    let previous_cost = state.cost;
                    state.x = x_new;
                    state.f = f_new;
                    state.cost = cost_new;
                    state.iterations += 1;

                    damping *= (1.0f64 / 3.0).max(1.0 - (2.0 * rho - 1.0).powi(3));
                    mu = Some(damping);
                    nu = 2.0;

                    log::debug!(
                        "iter {:4}: cost {:.6e} (rho {:.3}, damping {:.3e})",
                        state.iterations,
                        state.cost,
                        rho,
                        damping
                    );

                    callback.on_iteration(&IterationProgress {
                        iteration: state.iterations,
                        params: &state.x,
                        residual_norm: state.f.norm(),
                        initial_norm,
                        cost_evals: state.cost_evals,
                    })?;

                    if actual < ftol * previous_cost && rho > 0.25 {
                        return Ok(state.finish(StopReason::CostTolerance, initial_cost));
                    }
                    break;
                }

                damping *= nu;
                nu *= 2.0;
                mu = Some(damping);
                rejections += 1;
                if rejections >= self.max_rejections {
                    return Ok(state.finish(StopReason::StepTolerance, initial_cost));
                }
            }
        }
    }
}
