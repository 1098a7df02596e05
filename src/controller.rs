//! Run configuration, background execution and the workspace that owns them.
//!
//! A run is validated synchronously in [`ExecutionController::start`]; everything after that
//! happens on a dedicated worker thread that reports through an ordered event channel. The
//! final [`RunEvent::Finished`] is always the last event of a run.

use crate::core::{
    AnalysisConfig, Bounds, ConfigError, Constraint, Error, IterationRecord, NoiseUnits,
    ParameterKind, ParameterRelation, ParameterSpec, Probe, RelationSet, Result,
    SimulationFailureKind, StopReason, TargetCurve, Tolerances,
};
use crate::optimization::problem::DEFAULT_LAUNCH_FAILURE_BUDGET;
use crate::optimization::{
    CircuitOptimizationCallback, CircuitProblem, JacobianScheme, ObjectiveFunction, Solver,
    SolverError, TrustRegionOptimizer,
};
use crate::simulation::{NetlistDocument, Simulate, SimulatorConfig, Waveform, XyceRunner};
use crossbeam::channel::{Receiver, Sender, unbounded};
use serde::{Deserialize, Serialize};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;

// ===== RUN CONFIGURATION =====

/// A parameter chosen for tuning, with optional explicit bounds.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ParameterSelection {
    pub name: String,
    #[serde(default)]
    pub lower: Option<f64>,
    #[serde(default)]
    pub upper: Option<f64>,
}

impl ParameterSelection {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            lower: None,
            upper: None,
        }
    }

    pub fn bounded(name: impl Into<String>, lower: f64, upper: f64) -> Self {
        Self {
            name: name.into(),
            lower: Some(lower),
            upper: Some(upper),
        }
    }
}

/// Per-class switches for the `[value / 10, value * 10]` default bounds.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DefaultBounds {
    pub resistors: bool,
    pub capacitors: bool,
    pub inductors: bool,
}

impl DefaultBounds {
    pub fn all() -> Self {
        Self {
            resistors: true,
            capacitors: true,
            inductors: true,
        }
    }

    fn applies_to(&self, kind: ParameterKind) -> bool {
        match kind {
            ParameterKind::Resistance => self.resistors,
            ParameterKind::Capacitance => self.capacitors,
            ParameterKind::Inductance => self.inductors,
            ParameterKind::Scalar => false,
        }
    }
}

fn default_max_iterations() -> u32 {
    100
}

fn default_launch_failure_budget() -> u32 {
    DEFAULT_LAUNCH_FAILURE_BUDGET
}

/// Everything a run needs besides the netlist. Immutable once the run starts.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    pub parameters: Vec<ParameterSelection>,
    #[serde(default)]
    pub default_bounds: DefaultBounds,
    pub analysis: AnalysisConfig,
    pub target: TargetCurve,
    #[serde(default)]
    pub constraints: Vec<Constraint>,
    #[serde(default)]
    pub relations: Vec<ParameterRelation>,
    #[serde(default)]
    pub tolerances: Tolerances,
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    #[serde(default)]
    pub jacobian: JacobianScheme,
    /// Consecutive launch failures tolerated before the run fails.
    #[serde(default = "default_launch_failure_budget")]
    pub launch_failure_budget: u32,
    #[serde(default)]
    pub simulator: SimulatorConfig,
}

impl RunConfig {
    pub fn new(
        parameters: Vec<ParameterSelection>,
        analysis: AnalysisConfig,
        target: TargetCurve,
    ) -> Self {
        Self {
            parameters,
            default_bounds: DefaultBounds::default(),
            analysis,
            target,
            constraints: Vec::new(),
            relations: Vec::new(),
            tolerances: Tolerances::default(),
            max_iterations: default_max_iterations(),
            jacobian: JacobianScheme::default(),
            launch_failure_budget: default_launch_failure_budget(),
            simulator: SimulatorConfig::default(),
        }
    }

    pub fn from_json(text: &str) -> std::result::Result<Self, ConfigError> {
        serde_json::from_str(text).map_err(|e| ConfigError::Json(e.to_string()))
    }

    pub fn to_json(&self) -> std::result::Result<String, ConfigError> {
        serde_json::to_string_pretty(self).map_err(|e| ConfigError::Json(e.to_string()))
    }

    pub fn with_constraints(mut self, constraints: Vec<Constraint>) -> Self {
        self.constraints = constraints;
        self
    }

    pub fn with_relations(mut self, relations: Vec<ParameterRelation>) -> Self {
        self.relations = relations;
        self
    }

    pub fn with_tolerances(mut self, tolerances: Tolerances) -> Self {
        self.tolerances = tolerances;
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: u32) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_default_bounds(mut self, default_bounds: DefaultBounds) -> Self {
        self.default_bounds = default_bounds;
        self
    }

    /// Check the configuration against `doc` and fix every run input.
    pub fn resolve(&self, doc: &NetlistDocument) -> std::result::Result<ResolvedRun, ConfigError> {
        self.analysis.validate()?;
        self.tolerances.validate()?;
        self.check_target()?;
        if self.parameters.is_empty() {
            return Err(ConfigError::NoParameters);
        }

        let mut names: Vec<String> = Vec::with_capacity(self.parameters.len());
        let mut values = Vec::with_capacity(self.parameters.len());
        let mut bounds = Vec::with_capacity(self.parameters.len());
        for selection in &self.parameters {
            let spec = doc
                .parameter(&selection.name)
                .ok_or_else(|| ConfigError::UnknownParameter(selection.name.clone()))?;
            if names.iter().any(|n| n.eq_ignore_ascii_case(&spec.name)) {
                continue;
            }
            bounds.push(self.bounds_for(spec, selection)?);
            names.push(spec.name.clone());
            values.push(spec.value);
        }

        let relations = RelationSet::new(&self.relations, &names)?;
        relations.tighten_bounds(&names, &values, &mut bounds)?;
        let mut start = values.clone();
        relations
            .apply_ties(&mut start)
            .map_err(ConfigError::InvalidRelation)?;
        for (i, name) in names.iter().enumerate() {
            if !bounds[i].contains(start[i]) {
                return Err(ConfigError::OutOfBounds {
                    name: name.clone(),
                    value: start[i],
                    lower: bounds[i].lower,
                    upper: bounds[i].upper,
                });
            }
        }

        self.check_probes(doc)?;

        let constraints = if self.analysis.supports_constraints() {
            self.constraints.clone()
        } else {
            if !self.constraints.is_empty() {
                log::warn!(
                    "ignoring {} output constraint(s) in {} analysis",
                    self.constraints.len(),
                    self.analysis.name()
                );
            }
            Vec::new()
        };

        Ok(ResolvedRun {
            names,
            values,
            bounds,
            relations,
            objective: ObjectiveFunction::new(self.target.clone(), self.analysis.clone(), constraints),
            tolerances: self.tolerances,
            max_iterations: self.max_iterations,
            jacobian: self.jacobian,
            launch_failure_budget: self.launch_failure_budget,
        })
    }

    fn bounds_for(
        &self,
        spec: &ParameterSpec,
        selection: &ParameterSelection,
    ) -> std::result::Result<Bounds, ConfigError> {
        let base = if self.default_bounds.applies_to(spec.kind) {
            spec.default_bounds()
        } else {
            spec.bounds
        };
        let lower = selection.lower.unwrap_or(base.lower);
        let upper = selection.upper.unwrap_or(base.upper);
        Bounds::new(lower, upper).map_err(|_| ConfigError::InvertedBounds {
            name: spec.name.clone(),
            lower,
            upper,
        })
    }

    /// Linear noise densities are compared in decibels, so they must be positive.
    fn check_target(&self) -> std::result::Result<(), ConfigError> {
        if let AnalysisConfig::Noise(s) = &self.analysis {
            if s.units == NoiseUnits::Linear {
                if let Some((x, y)) = self
                    .target
                    .x()
                    .iter()
                    .zip(self.target.y())
                    .find(|(_, y)| **y <= 0.0)
                {
                    return Err(ConfigError::InvalidTarget(format!(
                        "noise density at {} Hz must be positive, got {}",
                        x, y
                    )));
                }
            }
        }
        Ok(())
    }

    /// Output probes and noise sources must exist in the netlist.
    fn check_probes(&self, doc: &NetlistDocument) -> std::result::Result<(), ConfigError> {
        let check_node = |node: &str| {
            if node == "0" || node.contains(':') || doc.has_node(node) {
                Ok(())
            } else {
                Err(ConfigError::InvalidProbe(format!("node '{}' not in netlist", node)))
            }
        };
        let check = |probe: &Probe| match probe {
            Probe::Voltage { node, reference } => {
                check_node(node)?;
                reference.as_deref().map_or(Ok(()), |r| check_node(r))
            }
            Probe::Current { .. } => Ok(()),
        };

        match &self.analysis {
            AnalysisConfig::Transient(s) => check(&s.output)?,
            AnalysisConfig::Ac(s) => check(&s.output)?,
            AnalysisConfig::Noise(s) => {
                check(&s.output_probe())?;
                if !doc.has_source(&s.input_source) {
                    return Err(ConfigError::UnknownSource(s.input_source.clone()));
                }
            }
        }

        if self.analysis.supports_constraints() {
            for constraint in &self.constraints {
                check(&Probe::parse(&constraint.quantity)?)?;
            }
        }
        Ok(())
    }
}

/// Validated run inputs, every parameter list in the same order.
#[derive(Clone, Debug)]
pub struct ResolvedRun {
    pub names: Vec<String>,
    pub values: Vec<f64>,
    pub bounds: Vec<Bounds>,
    pub relations: RelationSet,
    pub objective: ObjectiveFunction,
    pub tolerances: Tolerances,
    pub max_iterations: u32,
    pub jacobian: JacobianScheme,
    pub launch_failure_budget: u32,
}

// ===== RUN STATE AND EVENTS =====

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum RunState {
    Idle,
    Running,
    Converged(StopReason),
    IterationLimitReached,
    Aborted,
    Failed(String),
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Idle | Self::Running)
    }
}

/// Counters collected over a run.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RunMetrics {
    pub simulation_runs: usize,
    pub jacobian_evals: usize,
    pub iterations: u32,
    pub initial_cost: Option<f64>,
    pub final_cost: Option<f64>,
    /// Infinity norm of the projected gradient at the final point.
    pub optimality: Option<f64>,
    pub message: String,
}

/// Outcome of a run: terminal state plus the best candidate found.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    pub state: RunState,
    /// Every run parameter (tied ones included) at the best simulated candidate, or the
    /// initial values when no candidate simulated successfully.
    pub best_parameters: Vec<(String, f64)>,
    pub best_norm: Option<f64>,
    pub optimized_netlist: String,
    pub waveform: Option<Waveform>,
    pub metrics: RunMetrics,
}

impl RunResult {
    pub fn parameter(&self, name: &str) -> Option<f64> {
        self.best_parameters
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| *v)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum RunEvent {
    Log(String),
    Iteration(IterationRecord),
    SimulationFailed {
        kind: SimulationFailureKind,
        consecutive: u32,
        message: String,
    },
    Finished(RunResult),
}

// ===== EXECUTION =====

/// Handle to a started run.
pub struct RunHandle {
    cancel: Arc<AtomicBool>,
    state: Arc<Mutex<RunState>>,
    done: Arc<AtomicBool>,
    events: Receiver<RunEvent>,
}

impl RunHandle {
    /// Request cooperative cancellation. Only a running run accepts it.
    pub fn abort(&self) -> Result<()> {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if *state != RunState::Running {
            return Err(Error::NotRunning);
        }
        self.cancel.store(true, Ordering::SeqCst);
        log::info!("abort requested");
        Ok(())
    }

    pub fn is_done(&self) -> bool {
        self.done.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> RunState {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Ordered event stream; [`RunEvent::Finished`] is the last event.
    pub fn events(&self) -> &Receiver<RunEvent> {
        &self.events
    }

    /// Block until the run finishes, discarding intermediate events.
    pub fn wait(&self) -> Option<RunResult> {
        self.events.iter().find_map(|event| match event {
            RunEvent::Finished(result) => Some(result),
            _ => None,
        })
    }
}

/// Starts runs on a worker thread, at most one at a time.
#[derive(Debug, Default)]
pub struct ExecutionController {
    busy: Arc<AtomicBool>,
}

impl ExecutionController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    pub fn start(
        &self,
        document: Arc<NetlistDocument>,
        config: &RunConfig,
        simulator: Arc<dyn Simulate>,
    ) -> Result<RunHandle> {
        if self
            .busy
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(Error::RunActive);
        }

        let resolved = match config.resolve(&document) {
            Ok(resolved) => resolved,
            Err(e) => {
                self.busy.store(false, Ordering::SeqCst);
                return Err(e.into());
            }
        };

        let (tx, rx) = unbounded();
        let cancel = Arc::new(AtomicBool::new(false));
        let state = Arc::new(Mutex::new(RunState::Running));
        let done = Arc::new(AtomicBool::new(false));

        let worker = Worker {
            document,
            simulator,
            resolved,
            cancel: cancel.clone(),
            events: tx,
        };
        let (busy, worker_state, worker_done) = (self.busy.clone(), state.clone(), done.clone());

        let spawned = thread::Builder::new()
            .name("spicefit-run".into())
            .spawn(move || {
                let events = worker.events.clone();
                let result = catch_unwind(AssertUnwindSafe(|| worker.run())).unwrap_or_else(|_| {
                    RunResult {
                        state: RunState::Failed("optimization worker panicked".into()),
                        best_parameters: Vec::new(),
                        best_norm: None,
                        optimized_netlist: String::new(),
                        waveform: None,
                        metrics: RunMetrics::default(),
                    }
                });
                log::info!("run finished: {:?}", result.state);

                *worker_state.lock().unwrap_or_else(PoisonError::into_inner) = result.state.clone();
                worker_done.store(true, Ordering::SeqCst);
                busy.store(false, Ordering::SeqCst);
                let _ = events.send(RunEvent::Finished(result));
            });

        if let Err(e) = spawned {
            self.busy.store(false, Ordering::SeqCst);
            return Err(e.into());
        }

        Ok(RunHandle {
            cancel,
            state,
            done,
            events: rx,
        })
    }
}

const NO_SUCCESSFUL_SIMULATION: &str = "no candidate simulated successfully";

/// State moved onto the worker thread.
struct Worker {
    document: Arc<NetlistDocument>,
    simulator: Arc<dyn Simulate>,
    resolved: ResolvedRun,
    cancel: Arc<AtomicBool>,
    events: Sender<RunEvent>,
}

impl Worker {
    fn log(&self, line: String) {
        log::info!("{}", line);
        let _ = self.events.send(RunEvent::Log(line));
    }

    fn run(self) -> RunResult {
        let run = &self.resolved;
        self.log(format!(
            "starting {} fit of {} parameter(s) against {} target points",
            run.objective.analysis.name(),
            run.names.len(),
            run.objective.target.len()
        ));

        let failures = self.events.clone();
        let problem = CircuitProblem::new(
            self.document.clone(),
            self.simulator.clone(),
            run.objective.clone(),
            run.names.clone(),
            run.values.clone(),
            &run.bounds,
            run.relations.clone(),
        )
        .with_cancel_flag(self.cancel.clone())
        .with_launch_failure_budget(run.launch_failure_budget)
        .with_failure_hook(move |error, consecutive| {
            let _ = failures.send(RunEvent::SimulationFailed {
                kind: error.kind(),
                consecutive,
                message: error.to_string(),
            });
        });

        let iterations = self.events.clone();
        let mut callback = CircuitOptimizationCallback::new(&problem, self.cancel.clone())
            .with_sink(move |record| {
                let _ = iterations.send(RunEvent::Iteration(record.clone()));
            });

        let mut solver = TrustRegionOptimizer::new(run.max_iterations, run.tolerances)
            .with_jacobian(run.jacobian);
        log::debug!("solver: {}", solver.name());
        let outcome = solver.solve(&problem, &mut callback);
        let history = callback.into_history();

        let mut metrics = RunMetrics {
            simulation_runs: problem.simulation_runs(),
            iterations: history.len() as u32,
            ..RunMetrics::default()
        };
        let state = match outcome {
            Ok(result) => {
                metrics.jacobian_evals = result.jacobian_evals;
                metrics.iterations = result.iterations;
                metrics.initial_cost = Some(result.initial_cost);
                metrics.final_cost = Some(result.cost);
                metrics.optimality = Some(result.optimality);
                metrics.message = result.message().to_string();
                match result.stop_reason {
                    StopReason::Cancelled => RunState::Aborted,
                    StopReason::IterationLimit => RunState::IterationLimitReached,
                    reason => RunState::Converged(reason),
                }
            }
            Err(SolverError::Cancelled) => {
                metrics.message = StopReason::Cancelled.message().to_string();
                RunState::Aborted
            }
            Err(SolverError::Fatal(message)) => {
                metrics.message = message.clone();
                RunState::Failed(message)
            }
        };

        let best = problem.best();
        let state = match state {
            RunState::Converged(_) | RunState::IterationLimitReached if best.is_none() => {
                metrics.message = NO_SUCCESSFUL_SIMULATION.to_string();
                RunState::Failed(NO_SUCCESSFUL_SIMULATION.to_string())
            }
            state => state,
        };
        let best_parameters = best
            .as_ref()
            .and_then(|c| problem.vector_for(&c.params).ok())
            .unwrap_or_else(|| run.names.iter().cloned().zip(run.values.iter().copied()).collect());
        let optimized_netlist = self
            .document
            .apply(&best_parameters)
            .map(|doc| doc.text())
            .unwrap_or_else(|_| self.document.text());

        self.log(format!(
            "{} after {} iteration(s), {} simulation(s): {}",
            match &state {
                RunState::Converged(_) => "converged",
                RunState::IterationLimitReached => "stopped at the iteration limit",
                RunState::Aborted => "aborted",
                _ => "failed",
            },
            metrics.iterations,
            metrics.simulation_runs,
            metrics.message
        ));

        RunResult {
            state,
            best_parameters,
            best_norm: best.as_ref().map(|c| c.evaluation.norm()),
            optimized_netlist,
            waveform: best.map(|c| c.waveform),
            metrics,
        }
    }
}

// ===== WORKSPACE =====

/// Caller-owned context: the current netlist and the controller that runs against it.
#[derive(Debug, Default)]
pub struct Workspace {
    document: Option<Arc<NetlistDocument>>,
    controller: ExecutionController,
}

impl Workspace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the current netlist. Runs in flight keep the document they started with;
    /// on a parse error the previous document stays.
    pub fn upload(&mut self, text: &str) -> Result<Arc<NetlistDocument>> {
        let document = Arc::new(NetlistDocument::parse(text)?);
        self.document = Some(document.clone());
        Ok(document)
    }

    pub fn upload_bytes(&mut self, bytes: &[u8]) -> Result<Arc<NetlistDocument>> {
        let document = Arc::new(NetlistDocument::parse_bytes(bytes)?);
        self.document = Some(document.clone());
        Ok(document)
    }

    pub fn document(&self) -> Option<&Arc<NetlistDocument>> {
        self.document.as_ref()
    }

    pub fn tunable_parameters(&self) -> Result<Vec<ParameterSpec>> {
        Ok(self.document.as_ref().ok_or(Error::NoNetlist)?.tunable_parameters())
    }

    pub fn is_busy(&self) -> bool {
        self.controller.is_busy()
    }

    /// Start a run against the external simulator configured in `config`.
    pub fn start(&self, config: &RunConfig) -> Result<RunHandle> {
        let runner = XyceRunner::new(config.simulator.clone())?;
        self.start_with(config, Arc::new(runner))
    }

    pub fn start_with(&self, config: &RunConfig, simulator: Arc<dyn Simulate>) -> Result<RunHandle> {
        let document = self.document.clone().ok_or(Error::NoNetlist)?;
        self.controller.start(document, config, simulator)
    }
}
