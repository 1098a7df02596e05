//! External simulator invocation.

use super::directive::render_deck;
use super::netlist::NetlistDocument;
use super::prn::{column, parse_prn};
use super::waveform::Waveform;
use crate::core::{AcResponse, AnalysisConfig, Probe, SimulationError};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tempfile::TempDir;

/// Runs one simulation of a document under an analysis.
///
/// `probes` lists extra quantities (for output constraints) returned as additional
/// columns after the fitted trace.
pub trait Simulate: Send + Sync {
    fn run(
        &self,
        doc: &NetlistDocument,
        analysis: &AnalysisConfig,
        probes: &[Probe],
    ) -> Result<Waveform, SimulationError>;
}

impl<F> Simulate for F
where
    F: Fn(&NetlistDocument, &AnalysisConfig, &[Probe]) -> Result<Waveform, SimulationError>
        + Send
        + Sync,
{
    fn run(
        &self,
        doc: &NetlistDocument,
        analysis: &AnalysisConfig,
        probes: &[Probe],
    ) -> Result<Waveform, SimulationError> {
        self(doc, analysis, probes)
    }
}

/// Configuration for the simulator subprocess.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatorConfig {
    /// Executable name (looked up on `PATH`) or path.
    pub executable: String,
    /// Arguments placed before the deck file name.
    pub args: Vec<String>,
    /// Hard limit for one invocation, in seconds.
    pub timeout_secs: u64,
    /// Parent directory for per-run working files (system temp dir when unset).
    pub work_dir: Option<PathBuf>,
    /// Leave decks, logs and result files behind for inspection.
    pub keep_files: bool,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            executable: "Xyce".to_string(),
            args: vec!["-delim".to_string(), "COMMA".to_string()],
            timeout_secs: 120,
            work_dir: None,
            keep_files: false,
        }
    }
}

/// Messages the simulator prints when it gives up on a solution.
const CONVERGENCE_MARKERS: &[&str] = &[
    "dc operating point failed",
    "time step too small",
    "timestep too small",
    "failed to converge",
    "convergence failure",
    "newton solver failed",
    "transient failure",
];

/// [`Simulate`] implementation that shells out to Xyce.
pub struct XyceRunner {
    config: SimulatorConfig,
    dir: TempDir,
    sequence: AtomicU64,
}

impl XyceRunner {
    pub fn new(config: SimulatorConfig) -> std::io::Result<Self> {
        let dir = match &config.work_dir {
            Some(parent) => {
                std::fs::create_dir_all(parent)?;
                tempfile::Builder::new().prefix("spicefit").tempdir_in(parent)?
            }
            None => tempfile::Builder::new().prefix("spicefit").tempdir()?,
        };
        Ok(Self {
            config,
            dir,
            sequence: AtomicU64::new(0),
        })
    }

    pub fn config(&self) -> &SimulatorConfig {
        &self.config
    }

    pub fn work_dir(&self) -> &Path {
        self.dir.path()
    }

    /// Check if the simulator can be launched.
    pub fn is_available(&self) -> bool {
        Command::new(&self.config.executable)
            .arg("-v")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }

    fn execute(&self, stem: &str, deck: &str) -> Result<(ExitStatus, String), SimulationError> {
        let dir = self.dir.path();
        let deck_name = format!("{stem}.cir");
        let launch = |e: std::io::Error| {
            SimulationError::LaunchFailure(format!("failed to launch '{}': {}", self.config.executable, e))
        };

        std::fs::write(dir.join(&deck_name), deck).map_err(launch)?;
        let stdout = File::create(dir.join(format!("{stem}.out"))).map_err(launch)?;
        let stderr = File::create(dir.join(format!("{stem}.err"))).map_err(launch)?;

        let child = Command::new(&self.config.executable)
            .args(&self.config.args)
            .arg(&deck_name)
            .current_dir(dir)
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(stderr)
            .spawn()
            .map_err(launch)?;

        let timeout = Duration::from_secs(self.config.timeout_secs);
        let status = wait_with_timeout(child, timeout).map_err(launch)?;

        let mut log = std::fs::read_to_string(dir.join(format!("{stem}.out"))).unwrap_or_default();
        log.push_str(&std::fs::read_to_string(dir.join(format!("{stem}.err"))).unwrap_or_default());

        match status {
            Some(status) => Ok((status, log)),
            None => Err(SimulationError::ConvergenceFailure(format!(
                "simulation did not finish within {}s",
                self.config.timeout_secs
            ))),
        }
    }

    fn cleanup(&self, stem: &str) {
        if self.config.keep_files {
            return;
        }
        for ext in ["cir", "out", "err", "prn"] {
            let _ = std::fs::remove_file(self.dir.path().join(format!("{stem}.{ext}")));
        }
    }
}

impl Simulate for XyceRunner {
    fn run(
        &self,
        doc: &NetlistDocument,
        analysis: &AnalysisConfig,
        probes: &[Probe],
    ) -> Result<Waveform, SimulationError> {
        let stem = format!("run{}", self.sequence.fetch_add(1, Ordering::Relaxed));
        let output_name = format!("{stem}.prn");
        let output_path = self.dir.path().join(&output_name);
        let deck = render_deck(doc, analysis, probes, &output_name);

        log::debug!(
            "{} {} analysis in {}",
            self.config.executable,
            analysis.name(),
            self.dir.path().display()
        );

        let result = self
            .execute(&stem, &deck)
            .and_then(|(status, log)| classify(status, &log, &output_path))
            .and_then(|text| build_waveform(&text, analysis, probes));
        self.cleanup(&stem);

        if let Err(e) = &result {
            log::warn!("{}", e);
        }
        result
    }
}

/// Decide between success and the failure taxonomy from exit status, log text and
/// whether a result file appeared. Returns the result file contents on success.
///
/// Convergence messages only count when the run did not also exit cleanly with output.
fn classify(status: ExitStatus, log: &str, output: &Path) -> Result<String, SimulationError> {
    let contents = std::fs::read_to_string(output).ok();
    if status.success() {
        if let Some(text) = contents {
            return Ok(text);
        }
    }

    let lower = log.to_ascii_lowercase();
    if let Some(marker) = CONVERGENCE_MARKERS.iter().find(|m| lower.contains(*m)) {
        return Err(SimulationError::ConvergenceFailure(format!(
            "simulator reported '{}'",
            marker
        )));
    }
    if status.success() {
        return Err(SimulationError::OutputParseFailure(format!(
            "result file {} was not written",
            output.display()
        )));
    }
    Err(match contents {
        None => SimulationError::LaunchFailure(format!(
            "simulator exited with {} before producing output{}",
            status,
            log_tail(log)
        )),
        Some(_) => SimulationError::ConvergenceFailure(format!(
            "simulator exited with {} after producing partial output{}",
            status,
            log_tail(log)
        )),
    })
}

fn log_tail(log: &str) -> String {
    let lines: Vec<&str> = log.lines().filter(|l| !l.trim().is_empty()).collect();
    match lines.len() {
        0 => String::new(),
        n => format!(": {}", lines[n.saturating_sub(3)..].join(" | ")),
    }
}

/// Turn result columns into the mode-specific waveform.
pub fn build_waveform(
    text: &str,
    analysis: &AnalysisConfig,
    probes: &[Probe],
) -> Result<Waveform, SimulationError> {
    let table = parse_prn(text)?;
    let missing = |name: &str| {
        SimulationError::OutputParseFailure(format!(
            "result file has no '{}' column (columns: {})",
            name,
            table.keys().cloned().collect::<Vec<_>>().join(", ")
        ))
    };
    let x_name = analysis.x_column();
    let x = column(&table, x_name).ok_or_else(|| missing(x_name))?.to_vec();

    let mut signals: IndexMap<String, Vec<f64>> = IndexMap::new();
    match analysis {
        AnalysisConfig::Transient(s) => {
            for probe in std::iter::once(&s.output).chain(probes) {
                let name = probe.to_string();
                let values = column(&table, &name).ok_or_else(|| missing(&name))?;
                signals.entry(name).or_insert_with(|| values.to_vec());
            }
        }
        AnalysisConfig::Ac(s) => {
            for probe in std::iter::once(&s.output).chain(probes) {
                let (re_name, im_name) = probe.complex_parts();
                let re = column(&table, &re_name).ok_or_else(|| missing(&re_name))?;
                let im = column(&table, &im_name).ok_or_else(|| missing(&im_name))?;
                let values = re
                    .iter()
                    .zip(im)
                    .map(|(&re, &im)| match s.response {
                        AcResponse::MagnitudeDb => 20.0 * re.hypot(im).log10(),
                        AcResponse::Phase => im.atan2(re).to_degrees(),
                    })
                    .collect();
                signals.entry(probe.to_string()).or_insert(values);
            }
        }
        AnalysisConfig::Noise(s) => {
            let name = s.quantity.column();
            let values = column(&table, name).ok_or_else(|| missing(name))?;
            signals.insert(name.to_string(), values.to_vec());
        }
    }

    Waveform::new(x_name, x, signals).map_err(SimulationError::OutputParseFailure)
}

/// Wait for a child process with timeout. `Ok(None)` means the process was killed.
fn wait_with_timeout(
    mut child: std::process::Child,
    timeout: Duration,
) -> std::io::Result<Option<ExitStatus>> {
    let start = Instant::now();
    let poll_interval = Duration::from_millis(20);

    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        if start.elapsed() > timeout {
            let _ = child.kill();
            let _ = child.wait();
            return Ok(None);
        }
        std::thread::sleep(poll_interval);
    }
}
