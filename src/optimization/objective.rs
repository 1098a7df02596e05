use crate::core::{
    AcResponse, AnalysisConfig, Constraint, ConstraintViolation, NoiseUnits, Probe,
    SimulationError, TargetCurve,
};
use crate::simulation::Waveform;

/// Substitute for residual entries that come out NaN or infinite.
pub const NON_FINITE_PENALTY: f64 = 1e6;

/// Residuals for one simulated candidate.
#[derive(Clone, Debug, PartialEq)]
pub struct Evaluation {
    /// Curve-fit residuals on the target grid, followed by one entry per constraint.
    pub residuals: Vec<f64>,
    /// Sum of squared constraint entries.
    pub penalty: f64,
    pub violations: Vec<ConstraintViolation>,
}

impl Evaluation {
    pub fn norm(&self) -> f64 {
        self.residuals.iter().map(|r| r * r).sum::<f64>().sqrt()
    }
}

/// Everything fixed for the length of a run.
#[derive(Clone, Debug)]
pub struct ObjectiveFunction {
    pub target: TargetCurve,
    pub analysis: AnalysisConfig,
    pub constraints: Vec<Constraint>,
}

impl ObjectiveFunction {
    pub fn new(target: TargetCurve, analysis: AnalysisConfig, constraints: Vec<Constraint>) -> Self {
        Self {
            target,
            analysis,
            constraints,
        }
    }

    /// Constraints that take part in this analysis.
    pub fn active_constraints(&self) -> &[Constraint] {
        if self.analysis.supports_constraints() {
            &self.constraints
        } else {
            &[]
        }
    }

    /// Length of every residual vector this objective produces.
    pub fn num_residuals(&self) -> usize {
        self.target.len() + self.active_constraints().len()
    }

    pub fn evaluate(&self, sim: &Waveform) -> Result<Evaluation, SimulationError> {
        evaluate(sim, &self.target, &self.analysis, self.active_constraints())
    }
}

/// Compare a simulated waveform with the target on the target's x grid and append
/// one penalty entry per constraint.
pub fn evaluate(
    sim: &Waveform,
    target: &TargetCurve,
    config: &AnalysisConfig,
    constraints: &[Constraint],
) -> Result<Evaluation, SimulationError> {
    let (_, trace) = sim
        .primary()
        .ok_or_else(|| SimulationError::OutputParseFailure("waveform has no signals".into()))?;
    if sim.is_empty() {
        return Err(SimulationError::OutputParseFailure(
            "waveform has no samples".into(),
        ));
    }

    let log_x = config.log_x();
    let mut residuals: Vec<f64> = match config {
        AnalysisConfig::Transient(_) => resample(sim.x(), trace, target.x(), log_x)
            .iter()
            .zip(target.y())
            .map(|(s, t)| s - t)
            .collect(),
        AnalysisConfig::Ac(s) => match s.response {
            AcResponse::MagnitudeDb => resample(sim.x(), trace, target.x(), log_x)
                .iter()
                .zip(target.y())
                .map(|(s, t)| s - t)
                .collect(),
            AcResponse::Phase => resample(sim.x(), &unwrap_phase(trace), target.x(), log_x)
                .iter()
                .zip(target.y())
                .map(|(s, t)| wrap_phase(s - t))
                .collect(),
        },
        AnalysisConfig::Noise(s) => {
            let sim_db: Vec<f64> = trace.iter().map(|&v| to_db(v)).collect();
            let target_db = match s.units {
                NoiseUnits::Db => target.y().to_vec(),
                NoiseUnits::Linear => target.map_y(to_db),
            };
            resample(sim.x(), &sim_db, target.x(), log_x)
                .iter()
                .zip(&target_db)
                .map(|(s, t)| s - t)
                .collect()
        }
    };

    let mut violations = Vec::with_capacity(constraints.len());
    let mut penalty = 0.0;
    for constraint in constraints {
        let violation = check_constraint(sim, constraint)?;
        let entry = finite_or_penalty(constraint.weight * violation.rms);
        penalty += entry * entry;
        residuals.push(entry);
        violations.push(violation);
    }

    for r in residuals.iter_mut() {
        *r = finite_or_penalty(*r);
    }

    Ok(Evaluation {
        residuals,
        penalty,
        violations,
    })
}

/// RMS and worst violation over every simulated sample inside the constraint's window.
fn check_constraint(
    sim: &Waveform,
    constraint: &Constraint,
) -> Result<ConstraintViolation, SimulationError> {
    let name = Probe::parse(&constraint.quantity)
        .map(|p| p.to_string())
        .unwrap_or_else(|_| constraint.quantity.clone());
    let values = sim.signal(&name).ok_or_else(|| {
        SimulationError::OutputParseFailure(format!("constraint quantity '{}' not in output", name))
    })?;

    let (mut sum_sq, mut worst, mut count) = (0.0, 0.0f64, 0usize);
    for (&x, &y) in sim.x().iter().zip(values) {
        if !constraint.applies_at(x) {
            continue;
        }
        let v = if y.is_finite() {
            constraint.violation(y)
        } else {
            NON_FINITE_PENALTY
        };
        sum_sq += v * v;
        worst = worst.max(v);
        count += 1;
    }

    let rms = if count > 0 {
        (sum_sq / count as f64).sqrt()
    } else {
        0.0
    };
    Ok(ConstraintViolation {
        quantity: name,
        rms,
        worst,
    })
}

/// Interpolate `(xs, ys)` at each `grid` point. Exact matches return the sample
/// itself; points outside the sampled range hold the nearest end value. With
/// `log_x` the interpolation weight is taken on `ln(x)`.
pub fn resample(xs: &[f64], ys: &[f64], grid: &[f64], log_x: bool) -> Vec<f64> {
    let n = xs.len().min(ys.len());
    if n == 0 {
        return vec![f64::NAN; grid.len()];
    }
    let (xs, ys) = (&xs[..n], &ys[..n]);
    let log_x = log_x && xs[0] > 0.0 && grid.iter().all(|&g| g > 0.0);
    let axis = |x: f64| if log_x { x.ln() } else { x };

    grid.iter()
        .map(|&g| {
            let idx = xs.partition_point(|&x| x < g);
            if idx < n && xs[idx] == g {
                return ys[idx];
            }
            if idx == 0 {
                return ys[0];
            }
            if idx == n {
                return ys[n - 1];
            }
            let (x0, x1) = (axis(xs[idx - 1]), axis(xs[idx]));
            let t = (axis(g) - x0) / (x1 - x0);
            ys[idx - 1] + t * (ys[idx] - ys[idx - 1])
        })
        .collect()
}

/// Fold a phase difference in degrees into (-180, 180].
pub fn wrap_phase(degrees: f64) -> f64 {
    let r = degrees.rem_euclid(360.0);
    if r > 180.0 { r - 360.0 } else { r }
}

/// Remove 360° jumps between consecutive samples.
pub fn unwrap_phase(degrees: &[f64]) -> Vec<f64> {
    let mut out = Vec::with_capacity(degrees.len());
    let mut offset = 0.0;
    for (i, &d) in degrees.iter().enumerate() {
        if i > 0 {
            let delta = d - degrees[i - 1];
            if delta.is_finite() {
                offset -= 360.0 * (delta / 360.0).round();
            }
        }
        out.push(d + offset);
    }
    out
}

fn to_db(linear: f64) -> f64 {
    20.0 * linear.log10()
}

#[inline]
fn finite_or_penalty(value: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        NON_FINITE_PENALTY
    }
}
