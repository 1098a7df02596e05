use super::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::time::SystemTime;

// ===== PARAMETERS =====

/// What a tunable parameter controls.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ParameterKind {
    Resistance,
    Capacitance,
    Inductance,
    /// A `.PARAM` scalar.
    Scalar,
}

impl ParameterKind {
    /// Classify a component by its SPICE reference prefix.
    pub fn from_component(reference: &str) -> Option<Self> {
        match reference.chars().next()?.to_ascii_uppercase() {
            'R' => Some(Self::Resistance),
            'C' => Some(Self::Capacitance),
            'L' => Some(Self::Inductance),
            _ => None,
        }
    }

    pub fn unit(&self) -> &'static str {
        match self {
            Self::Resistance => "Ω",
            Self::Capacitance => "F",
            Self::Inductance => "H",
            Self::Scalar => "",
        }
    }

    pub fn is_passive(&self) -> bool {
        !matches!(self, Self::Scalar)
    }
}

/// Closed interval `[lower, upper]`; either side may be infinite.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub lower: f64,
    pub upper: f64,
}

impl Bounds {
    pub fn new(lower: f64, upper: f64) -> Result<Self, ConfigError> {
        if lower.is_nan() || upper.is_nan() || lower > upper {
            return Err(ConfigError::InvertedBounds {
                name: String::new(),
                lower,
                upper,
            });
        }
        Ok(Self { lower, upper })
    }

    /// Explicitly unbounded on both sides.
    pub fn unbounded() -> Self {
        Self {
            lower: f64::NEG_INFINITY,
            upper: f64::INFINITY,
        }
    }

    /// Passive component values cannot go negative.
    pub fn non_negative() -> Self {
        Self {
            lower: 0.0,
            upper: f64::INFINITY,
        }
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.lower && value <= self.upper
    }

    pub fn clamp(&self, value: f64) -> f64 {
        value.clamp(self.lower, self.upper)
    }

    pub fn is_unbounded(&self) -> bool {
        self.lower == f64::NEG_INFINITY && self.upper == f64::INFINITY
    }

    /// Intersect with another interval, failing if the result is empty.
    pub fn tighten(&self, lower: f64, upper: f64) -> Result<Self, ConfigError> {
        Self::new(self.lower.max(lower), self.upper.min(upper))
    }
}

/// A tunable quantity in a netlist.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ParameterSpec {
    /// Component reference (`R1`) or `.PARAM` name (`RLOAD`).
    pub name: String,
    pub kind: ParameterKind,
    pub value: f64,
    pub bounds: Bounds,
}

impl ParameterSpec {
    pub fn new(name: impl Into<String>, kind: ParameterKind, value: f64) -> Self {
        let bounds = if kind.is_passive() {
            Bounds::non_negative()
        } else {
            Bounds::unbounded()
        };
        Self {
            name: name.into(),
            kind,
            value,
            bounds,
        }
    }

    pub fn unit(&self) -> &'static str {
        self.kind.unit()
    }

    pub fn with_bounds(mut self, lower: f64, upper: f64) -> Result<Self, ConfigError> {
        self.bounds = Bounds::new(lower, upper).map_err(|_| ConfigError::InvertedBounds {
            name: self.name.clone(),
            lower,
            upper,
        })?;
        Ok(self)
    }

    /// Decade window around the current value: `[value / 10, value * 10]`.
    pub fn default_bounds(&self) -> Bounds {
        let (a, b) = (self.value / 10.0, self.value * 10.0);
        Bounds {
            lower: a.min(b),
            upper: a.max(b),
        }
    }

    pub fn clamp(&mut self) {
        self.value = self.bounds.clamp(self.value);
    }

    pub fn is_within_bounds(&self) -> bool {
        self.bounds.contains(self.value)
    }
}

// ===== TARGET CURVE =====

/// Desired response as ordered `(x, y)` samples.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<(f64, f64)>", into = "Vec<(f64, f64)>")]
pub struct TargetCurve {
    x: Vec<f64>,
    y: Vec<f64>,
}

impl TargetCurve {
    /// Build a curve; `x` must be finite and strictly increasing with at least two points.
    pub fn new(points: Vec<(f64, f64)>) -> Result<Self, ConfigError> {
        if points.len() < 2 {
            return Err(ConfigError::InvalidTarget(format!(
                "at least two points required, got {}",
                points.len()
            )));
        }
        for (i, &(x, y)) in points.iter().enumerate() {
            if !x.is_finite() || !y.is_finite() {
                return Err(ConfigError::InvalidTarget(format!(
                    "point {} ({}, {}) is not finite",
                    i, x, y
                )));
            }
        }
        if let Some(i) = points.windows(2).position(|w| w[1].0 <= w[0].0) {
            return Err(ConfigError::InvalidTarget(format!(
                "x values must be strictly increasing (x[{}] = {} >= x[{}] = {})",
                i,
                points[i].0,
                i + 1,
                points[i + 1].0
            )));
        }
        let (x, y) = points.into_iter().unzip();
        Ok(Self { x, y })
    }

    /// Parse an uploaded two-column table (comma, semicolon, tab or space separated).
    /// Lines that do not hold two numbers, such as headers, are skipped.
    pub fn parse_table(text: &str) -> Result<Self, ConfigError> {
        let points = text
            .trim_start_matches('\u{feff}')
            .lines()
            .filter_map(|line| {
                let mut fields = line
                    .split(|c: char| c == ',' || c == ';' || c.is_whitespace())
                    .filter(|f| !f.is_empty());
                let x = fields.next()?.parse::<f64>().ok()?;
                let y = fields.next()?.parse::<f64>().ok()?;
                Some((x, y))
            })
            .collect();
        Self::new(points)
    }

    pub fn x(&self) -> &[f64] {
        &self.x
    }

    pub fn y(&self) -> &[f64] {
        &self.y
    }

    pub fn len(&self) -> usize {
        self.x.len()
    }

    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }

    pub fn x_range(&self) -> (f64, f64) {
        (self.x[0], self.x[self.x.len() - 1])
    }

    /// Same x grid, `y` mapped through `f`.
    pub fn map_y(&self, f: impl Fn(f64) -> f64) -> Vec<f64> {
        self.y.iter().map(|&y| f(y)).collect()
    }
}

impl TryFrom<Vec<(f64, f64)>> for TargetCurve {
    type Error = ConfigError;

    fn try_from(points: Vec<(f64, f64)>) -> Result<Self, Self::Error> {
        Self::new(points)
    }
}

impl From<TargetCurve> for Vec<(f64, f64)> {
    fn from(curve: TargetCurve) -> Self {
        curve.x.into_iter().zip(curve.y).collect()
    }
}

// ===== OUTPUT CONSTRAINTS =====

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RelationshipType {
    #[serde(rename = "<=")]
    LessThanOrEqual,
    #[serde(rename = ">=")]
    GreaterThanOrEqual,
    #[serde(rename = "=")]
    Equals,
}

/// Bound on a simulator quantity (e.g. `V(3) <= 4.1`) across the swept domain.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Constraint {
    /// Simulator output expression, e.g. `V(3)` or `I(R2)`.
    pub quantity: String,
    pub relationship: RelationshipType,
    pub value: f64,
    /// Optional restriction of the checked x range.
    #[serde(default)]
    pub x_min: Option<f64>,
    #[serde(default)]
    pub x_max: Option<f64>,
    #[serde(default = "default_constraint_weight")]
    pub weight: f64,
}

fn default_constraint_weight() -> f64 {
    1.0
}

impl Constraint {
    pub fn new(quantity: impl Into<String>, relationship: RelationshipType, value: f64) -> Self {
        Self {
            quantity: quantity.into(),
            relationship,
            value,
            x_min: None,
            x_max: None,
            weight: default_constraint_weight(),
        }
    }

    pub fn within(mut self, x_min: Option<f64>, x_max: Option<f64>) -> Self {
        self.x_min = x_min;
        self.x_max = x_max;
        self
    }

    /// One-sided violation of a single sample; zero when satisfied.
    pub fn violation(&self, achieved: f64) -> f64 {
        match self.relationship {
            RelationshipType::LessThanOrEqual => (achieved - self.value).max(0.0),
            RelationshipType::GreaterThanOrEqual => (self.value - achieved).max(0.0),
            RelationshipType::Equals => (achieved - self.value).abs(),
        }
    }

    pub fn applies_at(&self, x: f64) -> bool {
        self.x_min.is_none_or(|lo| x >= lo) && self.x_max.is_none_or(|hi| x <= hi)
    }
}

// ===== OPTIMIZER SETTINGS =====

/// Least-squares termination tolerances (relative, scipy `least_squares` semantics).
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Tolerances {
    pub xtol: f64,
    pub gtol: f64,
    pub ftol: f64,
}

impl Default for Tolerances {
    fn default() -> Self {
        Self {
            xtol: 1e-12,
            gtol: 1e-12,
            ftol: 1e-12,
        }
    }
}

impl Tolerances {
    pub fn new(xtol: f64, gtol: f64, ftol: f64) -> Result<Self, ConfigError> {
        let tolerances = Self { xtol, gtol, ftol };
        tolerances.validate()?;
        Ok(tolerances)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, value) in [("xtol", self.xtol), ("gtol", self.gtol), ("ftol", self.ftol)] {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigError::Negative { field, value });
            }
        }
        Ok(())
    }
}

// ===== RUN OUTPUT =====

/// Why the optimizer stopped.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopReason {
    /// Projected gradient fell below `gtol`.
    GradientTolerance,
    /// Relative cost reduction fell below `ftol`.
    CostTolerance,
    /// Relative step size fell below `xtol`.
    StepTolerance,
    IterationLimit,
    Cancelled,
}

impl StopReason {
    pub fn is_converged(&self) -> bool {
        matches!(
            self,
            Self::GradientTolerance | Self::CostTolerance | Self::StepTolerance
        )
    }

    pub fn message(&self) -> &'static str {
        match self {
            Self::GradientTolerance => "`gtol` termination condition is satisfied",
            Self::CostTolerance => "`ftol` termination condition is satisfied",
            Self::StepTolerance => "`xtol` termination condition is satisfied",
            Self::IterationLimit => "maximum number of iterations reached",
            Self::Cancelled => "aborted by user",
        }
    }
}

/// Constraint status at one evaluated candidate.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConstraintViolation {
    pub quantity: String,
    /// Root-mean-square violation over the checked samples.
    pub rms: f64,
    /// Largest single-sample violation.
    pub worst: f64,
}

/// One completed optimizer iteration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IterationRecord {
    pub iteration: u32,
    /// Parameter vector, in the run's parameter order.
    pub parameters: Vec<(String, f64)>,
    pub residual_norm: f64,
    /// `100 * (initial - current) / initial` residual norm.
    pub improvement_percent: f64,
    pub evaluations: usize,
    pub timestamp: SystemTime,
    pub violations: Vec<ConstraintViolation>,
}

impl IterationRecord {
    pub fn parameter(&self, name: &str) -> Option<f64> {
        self.parameters
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| *v)
    }
}

/// Percent reduction of `current` relative to `initial`.
pub fn improvement_percent(initial: f64, current: f64) -> f64 {
    if initial > 0.0 && initial.is_finite() {
        100.0 * (initial - current) / initial
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_requires_strictly_increasing_x() {
        assert!(TargetCurve::new(vec![(0.0, 1.0), (1.0, 2.0)]).is_ok());
        assert!(TargetCurve::new(vec![(0.0, 1.0)]).is_err());
        assert!(TargetCurve::new(vec![(0.0, 1.0), (0.0, 2.0)]).is_err());
        assert!(TargetCurve::new(vec![(1.0, 1.0), (0.5, 2.0)]).is_err());
        assert!(TargetCurve::new(vec![(0.0, f64::NAN), (1.0, 2.0)]).is_err());
    }

    #[test]
    fn parses_uploaded_tables_with_headers() {
        let curve = TargetCurve::parse_table("time,V(2)\n0, 2.5\n1e-3,2.5\n2e-3 2.5\n").unwrap();
        assert_eq!(curve.x(), &[0.0, 1e-3, 2e-3]);
        assert_eq!(curve.y(), &[2.5, 2.5, 2.5]);
    }

    #[test]
    fn bounds_reject_inverted_ranges() {
        assert!(Bounds::new(1.0, 0.0).is_err());
        assert!(Bounds::new(f64::NAN, 1.0).is_err());
        let b = Bounds::new(1.0, 1e5).unwrap();
        assert!(b.contains(1.0) && b.contains(1e5) && !b.contains(0.5));
        assert!(b.tighten(10.0, 20.0).is_ok());
        assert!(b.tighten(2e5, 3e5).is_err());
    }

    #[test]
    fn passive_parameters_default_to_non_negative() {
        let r = ParameterSpec::new("R1", ParameterKind::Resistance, 1e3);
        assert_eq!(r.bounds, Bounds::non_negative());
        assert_eq!(r.default_bounds(), Bounds { lower: 100.0, upper: 1e4 });
        let p = ParameterSpec::new("GAIN", ParameterKind::Scalar, 2.0);
        assert!(p.bounds.is_unbounded());
    }

    #[test]
    fn constraint_violation_is_one_sided() {
        let le = Constraint::new("V(2)", RelationshipType::LessThanOrEqual, 4.1);
        assert_eq!(le.violation(4.0), 0.0);
        assert!((le.violation(4.6) - 0.5).abs() < 1e-12);
        let ge = Constraint::new("V(2)", RelationshipType::GreaterThanOrEqual, 1.0);
        assert_eq!(ge.violation(2.0), 0.0);
        assert_eq!(ge.violation(0.25), 0.75);
    }

    #[test]
    fn tolerances_must_be_non_negative() {
        assert!(Tolerances::new(1e-14, 1e-14, 1e-14).is_ok());
        assert!(Tolerances::new(-1.0, 0.0, 0.0).is_err());
        assert!(Tolerances::new(0.0, f64::INFINITY, 0.0).is_err());
    }
}
