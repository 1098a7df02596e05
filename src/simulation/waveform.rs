use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Simulator output: one independent variable and one or more named signal columns.
///
/// Built once per simulation and read-only afterwards.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Waveform {
    x_name: String,
    x: Vec<f64>,
    signals: IndexMap<String, Vec<f64>>,
}

impl Waveform {
    /// Every signal must have one value per `x` sample.
    pub fn new(
        x_name: impl Into<String>,
        x: Vec<f64>,
        signals: IndexMap<String, Vec<f64>>,
    ) -> Result<Self, String> {
        if let Some((name, values)) = signals.iter().find(|(_, v)| v.len() != x.len()) {
            return Err(format!(
                "signal '{}' has {} samples, expected {}",
                name,
                values.len(),
                x.len()
            ));
        }
        Ok(Self {
            x_name: x_name.into(),
            x,
            signals,
        })
    }

    /// Single-signal waveform.
    pub fn single(
        x_name: impl Into<String>,
        x: Vec<f64>,
        name: impl Into<String>,
        y: Vec<f64>,
    ) -> Result<Self, String> {
        let mut signals = IndexMap::new();
        signals.insert(name.into(), y);
        Self::new(x_name, x, signals)
    }

    pub fn x_name(&self) -> &str {
        &self.x_name
    }

    pub fn x(&self) -> &[f64] {
        &self.x
    }

    pub fn len(&self) -> usize {
        self.x.len()
    }

    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }

    /// The fitted trace: the first column.
    pub fn primary(&self) -> Option<(&str, &[f64])> {
        self.signals
            .get_index(0)
            .map(|(name, values)| (name.as_str(), values.as_slice()))
    }

    /// Look a column up by name, ignoring case and whitespace.
    pub fn signal(&self, name: &str) -> Option<&[f64]> {
        let wanted: String = name.chars().filter(|c| !c.is_whitespace()).collect();
        self.signals
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(&wanted))
            .map(|(_, v)| v.as_slice())
    }

    pub fn signal_names(&self) -> impl Iterator<Item = &str> {
        self.signals.keys().map(String::as_str)
    }
}
