use super::error::ConfigError;
use super::types::TargetCurve;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Simulator output expression: a node voltage or a device current.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Probe {
    Voltage {
        node: String,
        reference: Option<String>,
    },
    Current {
        device: String,
    },
}

impl Probe {
    /// Parse `V(2)`, `V(out,ref)` or `I(R1)`. Case-insensitive; stored upper-case.
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let invalid = || ConfigError::InvalidProbe(text.to_string());
        let compact: String = text.chars().filter(|c| !c.is_whitespace()).collect();
        let upper = compact.to_ascii_uppercase();

        let (head, rest) = upper.split_at(upper.find('(').ok_or_else(invalid)?);
        let inner = rest
            .strip_prefix('(')
            .and_then(|r| r.strip_suffix(')'))
            .ok_or_else(invalid)?;
        if inner.is_empty() || inner.contains(['(', ')']) {
            return Err(invalid());
        }

        match head {
            "V" => {
                let mut nodes = inner.split(',');
                let node = nodes.next().filter(|n| !n.is_empty()).ok_or_else(invalid)?;
                let reference = match nodes.next() {
                    Some(r) if !r.is_empty() => Some(r.to_string()),
                    Some(_) => return Err(invalid()),
                    None => None,
                };
                if nodes.next().is_some() {
                    return Err(invalid());
                }
                Ok(Self::Voltage {
                    node: node.to_string(),
                    reference,
                })
            }
            "I" if !inner.contains(',') => Ok(Self::Current {
                device: inner.to_string(),
            }),
            _ => Err(invalid()),
        }
    }

    /// Print expressions for the real and imaginary parts in a small-signal sweep.
    pub fn complex_parts(&self) -> (String, String) {
        let args = self.arguments();
        match self {
            Self::Voltage { .. } => (format!("VR({})", args), format!("VI({})", args)),
            Self::Current { .. } => (format!("IR({})", args), format!("II({})", args)),
        }
    }

    fn arguments(&self) -> String {
        match self {
            Self::Voltage {
                node,
                reference: Some(r),
            } => format!("{},{}", node, r),
            Self::Voltage { node, .. } => node.clone(),
            Self::Current { device } => device.clone(),
        }
    }
}

impl fmt::Display for Probe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Voltage { .. } => write!(f, "V({})", self.arguments()),
            Self::Current { .. } => write!(f, "I({})", self.arguments()),
        }
    }
}

impl TryFrom<String> for Probe {
    type Error = ConfigError;

    fn try_from(text: String) -> Result<Self, Self::Error> {
        Self::parse(&text)
    }
}

impl From<Probe> for String {
    fn from(probe: Probe) -> Self {
        probe.to_string()
    }
}

// ===== ANALYSIS SETTINGS =====

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SweepType {
    Dec,
    Lin,
    Oct,
}

impl SweepType {
    pub fn keyword(&self) -> &'static str {
        match self {
            Self::Dec => "DEC",
            Self::Lin => "LIN",
            Self::Oct => "OCT",
        }
    }

    pub fn is_logarithmic(&self) -> bool {
        !matches!(self, Self::Lin)
    }
}

/// Frequency sweep shared by AC and noise analyses.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FrequencySweep {
    pub sweep: SweepType,
    /// Points per decade/octave, or total points for a linear sweep.
    pub points: u32,
    pub start: f64,
    pub stop: f64,
}

impl FrequencySweep {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.start.is_finite() || self.start <= 0.0 {
            return Err(ConfigError::NotPositive {
                field: "start frequency",
                value: self.start,
            });
        }
        if !self.stop.is_finite() || self.stop <= self.start {
            return Err(ConfigError::EmptyRange {
                field: "frequency sweep",
                start: self.start,
                stop: self.stop,
            });
        }
        if self.points == 0 {
            return Err(ConfigError::NoSweepPoints);
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TransientSettings {
    pub output: Probe,
    pub stop: f64,
    pub step: f64,
    #[serde(default)]
    pub start: f64,
    #[serde(default)]
    pub max_step: Option<f64>,
    #[serde(default)]
    pub use_initial_conditions: bool,
}

impl TransientSettings {
    /// Cover the target's time span with a hundredth of the span as the print step.
    pub fn spanning(target: &TargetCurve, output: Probe) -> Self {
        let (start, stop) = target.x_range();
        Self {
            output,
            stop,
            step: (stop - start) / 100.0,
            start,
            max_step: None,
            use_initial_conditions: false,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.start.is_finite() || self.start < 0.0 {
            return Err(ConfigError::Negative {
                field: "start time",
                value: self.start,
            });
        }
        if !self.stop.is_finite() || self.stop <= self.start {
            return Err(ConfigError::EmptyRange {
                field: "transient time",
                start: self.start,
                stop: self.stop,
            });
        }
        if !self.step.is_finite() || self.step <= 0.0 {
            return Err(ConfigError::NotPositive {
                field: "time step",
                value: self.step,
            });
        }
        if let Some(max_step) = self.max_step {
            if !max_step.is_finite() || max_step <= 0.0 {
                return Err(ConfigError::NotPositive {
                    field: "max time step",
                    value: max_step,
                });
            }
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AcResponse {
    /// `20 * log10(|H|)`
    MagnitudeDb,
    /// Degrees.
    Phase,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AcSettings {
    pub output: Probe,
    #[serde(flatten)]
    pub sweep: FrequencySweep,
    pub response: AcResponse,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoiseQuantity {
    OutputReferred,
    InputReferred,
}

impl NoiseQuantity {
    /// Result column name.
    pub fn column(&self) -> &'static str {
        match self {
            Self::OutputReferred => "ONOISE",
            Self::InputReferred => "INOISE",
        }
    }
}

/// Units the noise target curve is expressed in.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoiseUnits {
    /// V/√Hz (or A/√Hz input-referred).
    #[default]
    Linear,
    /// `20 * log10` of the linear density.
    Db,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NoiseSettings {
    pub output_node: String,
    #[serde(default)]
    pub reference_node: Option<String>,
    pub input_source: String,
    pub quantity: NoiseQuantity,
    #[serde(flatten)]
    pub sweep: FrequencySweep,
    #[serde(default)]
    pub units: NoiseUnits,
}

impl NoiseSettings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.output_node.trim().is_empty() {
            return Err(ConfigError::InvalidProbe(self.output_node.clone()));
        }
        if self.input_source.trim().is_empty() {
            return Err(ConfigError::UnknownSource(self.input_source.clone()));
        }
        self.sweep.validate()
    }

    pub fn output_probe(&self) -> Probe {
        Probe::Voltage {
            node: self.output_node.trim().to_ascii_uppercase(),
            reference: self
                .reference_node
                .as_ref()
                .map(|r| r.trim().to_ascii_uppercase()),
        }
    }
}

/// Analysis mode with its own settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum AnalysisConfig {
    Transient(TransientSettings),
    Ac(AcSettings),
    Noise(NoiseSettings),
}

impl AnalysisConfig {
    /// Check the settings as a unit before any simulation runs.
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self {
            Self::Transient(s) => s.validate(),
            Self::Ac(s) => s.sweep.validate(),
            Self::Noise(s) => s.validate(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Transient(_) => "transient",
            Self::Ac(_) => "ac",
            Self::Noise(_) => "noise",
        }
    }

    /// Independent variable column in the result file.
    pub fn x_column(&self) -> &'static str {
        match self {
            Self::Transient(_) => "TIME",
            Self::Ac(_) | Self::Noise(_) => "FREQ",
        }
    }

    /// Whether resampling happens on a log-frequency axis.
    pub fn log_x(&self) -> bool {
        match self {
            Self::Transient(_) => false,
            Self::Ac(s) => s.sweep.sweep.is_logarithmic(),
            Self::Noise(s) => s.sweep.sweep.is_logarithmic(),
        }
    }

    /// Node and current constraints do not apply to noise sweeps.
    pub fn supports_constraints(&self) -> bool {
        !matches!(self, Self::Noise(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sweep(start: f64, stop: f64, points: u32) -> FrequencySweep {
        FrequencySweep {
            sweep: SweepType::Dec,
            points,
            start,
            stop,
        }
    }

    #[test]
    fn parses_probes() {
        assert_eq!(
            Probe::parse("v(out)").unwrap(),
            Probe::Voltage {
                node: "OUT".into(),
                reference: None
            }
        );
        assert_eq!(Probe::parse("V(2, 3)").unwrap().to_string(), "V(2,3)");
        assert_eq!(Probe::parse("i(R1)").unwrap().to_string(), "I(R1)");
        assert!(Probe::parse("V()").is_err());
        assert!(Probe::parse("X(2)").is_err());
        assert!(Probe::parse("V(2").is_err());
        assert!(Probe::parse("I(R1,R2)").is_err());
    }

    #[test]
    fn complex_parts_follow_probe_kind() {
        let v = Probe::parse("V(2,3)").unwrap();
        assert_eq!(v.complex_parts(), ("VR(2,3)".into(), "VI(2,3)".into()));
        let i = Probe::parse("I(L1)").unwrap();
        assert_eq!(i.complex_parts(), ("IR(L1)".into(), "II(L1)".into()));
    }

    #[test]
    fn rejects_inverted_frequency_range() {
        let config = AnalysisConfig::Ac(AcSettings {
            output: Probe::parse("V(2)").unwrap(),
            sweep: sweep(1e3, 10.0, 10),
            response: AcResponse::MagnitudeDb,
        });
        assert!(matches!(
            config.validate(),
            Err(ConfigError::EmptyRange { .. })
        ));
        assert!(sweep(0.0, 1e3, 10).validate().is_err());
        assert_eq!(sweep(1.0, 1e3, 0).validate(), Err(ConfigError::NoSweepPoints));
    }

    #[test]
    fn rejects_transient_stop_before_start() {
        let mut settings = TransientSettings {
            output: Probe::parse("V(2)").unwrap(),
            stop: 1e-3,
            step: 1e-5,
            start: 2e-3,
            max_step: None,
            use_initial_conditions: false,
        };
        assert!(settings.validate().is_err());
        settings.start = 0.0;
        assert!(settings.validate().is_ok());
        settings.max_step = Some(0.0);
        assert!(settings.validate().is_err());
    }

    #[test]
    fn transient_settings_span_the_target() {
        let target = TargetCurve::new(vec![(1e-3, 0.0), (2e-3, 1.0), (3e-3, 1.0)]).unwrap();
        let settings = TransientSettings::spanning(&target, Probe::parse("V(2)").unwrap());
        assert_eq!(settings.start, 1e-3);
        assert_eq!(settings.stop, 3e-3);
        assert!((settings.step - 2e-5).abs() < 1e-18);
    }

    #[test]
    fn deserializes_tagged_config() {
        let json = r#"{"mode":"noise","output_node":"out","input_source":"V1",
            "quantity":"output_referred","sweep":"DEC","points":10,"start":1,"stop":1e6}"#;
        let config: AnalysisConfig = serde_json::from_str(json).unwrap();
        assert!(config.validate().is_ok());
        assert!(config.log_x());
        assert!(!config.supports_constraints());
    }
}
