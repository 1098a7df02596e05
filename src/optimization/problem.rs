use super::objective::{Evaluation, ObjectiveFunction};
use super::solvers::traits::{Problem, SolverError};
use crate::core::{Bounds, Probe, RelationSet, SimulationError, SimulationFailureKind};
use crate::simulation::{NetlistDocument, Simulate, Waveform};
use std::cell::{Cell, RefCell};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Residual value substituted for every entry when a candidate cannot be simulated.
pub const FAILURE_PENALTY: f64 = 1e6;

/// Consecutive launch failures tolerated before the run gives up.
pub const DEFAULT_LAUNCH_FAILURE_BUDGET: u32 = 3;

/// Called on every failed simulation with the consecutive failure count.
pub type FailureHook<'a> = Box<dyn Fn(&SimulationError, u32) + 'a>;

/// A successfully simulated candidate.
#[derive(Clone, Debug)]
pub struct Candidate {
    /// Free parameter vector, as seen by the solver.
    pub params: Vec<f64>,
    pub evaluation: Evaluation,
    pub waveform: Waveform,
}

/// Circuit problem: netlist substitution, simulation and comparison per residual call.
///
/// The solver sees only the free parameters. Tied parameters are recomputed from their
/// expressions on every call and written to the netlist together with the free ones.
pub struct CircuitProblem<'a> {
    document: Arc<NetlistDocument>,
    simulator: Arc<dyn Simulate>,
    objective: ObjectiveFunction,
    probes: Vec<Probe>,

    names: Vec<String>,
    values: Vec<f64>,
    relations: RelationSet,
    free: Vec<usize>,
    initial: Vec<f64>,
    bounds: Vec<(f64, f64)>,
    tie_bounds: Vec<(usize, Bounds)>,

    cancel: Arc<AtomicBool>,
    launch_failure_budget: u32,
    failure_hook: Option<FailureHook<'a>>,

    consecutive_failures: Cell<u32>,
    consecutive_launch_failures: Cell<u32>,
    simulation_runs: Cell<usize>,
    last: RefCell<Option<Candidate>>,
    best: RefCell<Option<Candidate>>,
}

impl<'a> CircuitProblem<'a> {
    /// `names`, `values` and `bounds` cover every parameter of the run, tied ones included.
    pub fn new(
        document: Arc<NetlistDocument>,
        simulator: Arc<dyn Simulate>,
        objective: ObjectiveFunction,
        names: Vec<String>,
        values: Vec<f64>,
        bounds: &[Bounds],
        relations: RelationSet,
    ) -> Self {
        let free: Vec<usize> = (0..names.len()).filter(|&i| !relations.is_tied(i)).collect();
        let initial = free.iter().map(|&i| values[i]).collect();
        let tie_bounds = relations.tied().map(|i| (i, bounds[i])).collect();
        let bounds = free
            .iter()
            .map(|&i| (bounds[i].lower, bounds[i].upper))
            .collect();
        let probes = objective
            .active_constraints()
            .iter()
            .filter_map(|c| Probe::parse(&c.quantity).ok())
            .collect();

        Self {
            document,
            simulator,
            objective,
            probes,
            names,
            values,
            relations,
            free,
            initial,
            bounds,
            tie_bounds,
            cancel: Arc::new(AtomicBool::new(false)),
            launch_failure_budget: DEFAULT_LAUNCH_FAILURE_BUDGET,
            failure_hook: None,
            consecutive_failures: Cell::new(0),
            consecutive_launch_failures: Cell::new(0),
            simulation_runs: Cell::new(0),
            last: RefCell::new(None),
            best: RefCell::new(None),
        }
    }

    pub fn with_cancel_flag(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_launch_failure_budget(mut self, budget: u32) -> Self {
        self.launch_failure_budget = budget;
        self
    }

    pub fn with_failure_hook(mut self, hook: impl Fn(&SimulationError, u32) + 'a) -> Self {
        self.failure_hook = Some(Box::new(hook));
        self
    }

    /// Names of the free parameters, in solver order.
    pub fn free_names(&self) -> Vec<String> {
        self.free.iter().map(|&i| self.names[i].clone()).collect()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn objective(&self) -> &ObjectiveFunction {
        &self.objective
    }

    pub fn simulation_runs(&self) -> usize {
        self.simulation_runs.get()
    }

    /// Full parameter vector (free and tied) for a free vector.
    pub fn vector_for(&self, params: &[f64]) -> Result<Vec<(String, f64)>, String> {
        let mut values = self.values.clone();
        for (&i, &v) in self.free.iter().zip(params) {
            values[i] = v;
        }
        self.relations.apply_ties(&mut values)?;
        Ok(self.names.iter().cloned().zip(values).collect())
    }

    /// Most recent successful candidate, if its free vector equals `params`.
    pub fn candidate_at(&self, params: &[f64]) -> Option<Candidate> {
        self.last
            .borrow()
            .as_ref()
            .filter(|c| c.params == params)
            .cloned()
    }

    /// Lowest-norm candidate simulated so far.
    pub fn best(&self) -> Option<Candidate> {
        self.best.borrow().clone()
    }

    /// First tied parameter whose computed value leaves its bounds at `params`.
    pub fn tie_out_of_bounds(&self, params: &[f64]) -> Option<(String, f64)> {
        let vector = self.vector_for(params).ok()?;
        self.tie_bounds
            .iter()
            .find(|(i, bounds)| !bounds.contains(vector[*i].1))
            .map(|(i, _)| vector[*i].clone())
    }

    /// Simulate and compare one free vector.
    pub fn simulate(&self, params: &[f64]) -> Result<Candidate, SimulationError> {
        let vector = self
            .vector_for(params)
            .map_err(|e| SimulationError::ConvergenceFailure(format!("parameter relation: {}", e)))?;
        let modified = self
            .document
            .apply(&vector)
            .map_err(|e| SimulationError::ConvergenceFailure(e.to_string()))?;

        self.simulation_runs.set(self.simulation_runs.get() + 1);
        let waveform = self
            .simulator
            .run(&modified, &self.objective.analysis, &self.probes)?;
        let evaluation = self.objective.evaluate(&waveform)?;

        Ok(Candidate {
            params: params.to_vec(),
            evaluation,
            waveform,
        })
    }

    fn record_failure(&self, error: &SimulationError) -> Result<(), SolverError> {
        let consecutive = self.consecutive_failures.get() + 1;
        self.consecutive_failures.set(consecutive);
        log::debug!("simulation failure {} in a row: {}", consecutive, error);
        if let Some(hook) = &self.failure_hook {
            hook(error, consecutive);
        }

        if error.kind() == SimulationFailureKind::Launch {
            let launches = self.consecutive_launch_failures.get() + 1;
            self.consecutive_launch_failures.set(launches);
            if launches > self.launch_failure_budget {
                return Err(SolverError::Fatal(format!(
                    "simulator failed to launch {} times in a row: {}",
                    launches, error
                )));
            }
        } else {
            self.consecutive_launch_failures.set(0);
        }
        Ok(())
    }
}

impl Problem for CircuitProblem<'_> {
    fn residuals(&self, params: &[f64]) -> Result<Vec<f64>, SolverError> {
        if self.cancel.load(Ordering::SeqCst) {
            return Err(SolverError::Cancelled);
        }
        if let Some((name, value)) = self.tie_out_of_bounds(params) {
            log::debug!("tied parameter {} = {} is outside its bounds, not simulated", name, value);
            return Ok(vec![FAILURE_PENALTY; self.num_residuals()]);
        }

        match self.simulate(params) {
            Ok(candidate) => {
                self.consecutive_failures.set(0);
                self.consecutive_launch_failures.set(0);
                let residuals = candidate.evaluation.residuals.clone();
                let norm = candidate.evaluation.norm();
                let mut best = self.best.borrow_mut();
                if best.as_ref().is_none_or(|b| norm < b.evaluation.norm()) {
                    *best = Some(candidate.clone());
                }
                *self.last.borrow_mut() = Some(candidate);
                Ok(residuals)
            }
            Err(error) => {
                self.record_failure(&error)?;
                Ok(vec![FAILURE_PENALTY; self.num_residuals()])
            }
        }
    }

    fn num_params(&self) -> usize {
        self.free.len()
    }

    fn num_residuals(&self) -> usize {
        self.objective.num_residuals()
    }

    fn initial_params(&self) -> &[f64] {
        &self.initial
    }

    fn bounds(&self) -> &[(f64, f64)] {
        &self.bounds
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{
        AnalysisConfig, ParameterRelation, Probe, RelationshipType, TargetCurve,
        TransientSettings,
    };
    use std::sync::Mutex;

    const DIVIDER: &str = "divider\nV1 1 0 DC 5\nR1 1 2 1k\nR2 2 0 3k\n.END\n";

    fn divider_problem<'a>(
        simulator: Arc<dyn Simulate>,
        relations: &[ParameterRelation],
    ) -> CircuitProblem<'a> {
        let doc = Arc::new(NetlistDocument::parse(DIVIDER).unwrap());
        let target = TargetCurve::new(vec![(0.0, 2.5), (1e-3, 2.5)]).unwrap();
        let analysis = AnalysisConfig::Transient(TransientSettings::spanning(
            &target,
            Probe::parse("V(2)").unwrap(),
        ));
        let names = vec!["R1".to_string(), "R2".to_string()];
        let relations = RelationSet::new(relations, &names).unwrap();
        CircuitProblem::new(
            doc,
            simulator,
            ObjectiveFunction::new(target, analysis, Vec::new()),
            names,
            vec![1e3, 3e3],
            &[Bounds::new(1.0, 1e5).unwrap(); 2],
            relations,
        )
    }

    fn divider_sim() -> Arc<dyn Simulate> {
        Arc::new(
            |doc: &NetlistDocument, _: &AnalysisConfig, _: &[Probe]| -> Result<Waveform, SimulationError> {
                let (r1, r2) = (doc.value("R1").unwrap(), doc.value("R2").unwrap());
                let v = 5.0 * r2 / (r1 + r2);
                Waveform::single("TIME", vec![0.0, 1e-3], "V(2)", vec![v, v])
                    .map_err(SimulationError::OutputParseFailure)
            },
        )
    }

    #[test]
    fn residuals_follow_the_netlist() {
        let problem = divider_problem(divider_sim(), &[]);
        assert_eq!(problem.num_params(), 2);
        assert_eq!(problem.num_residuals(), 2);
        let r = problem.residuals(&[1e3, 3e3]).unwrap();
        assert!((r[0] - 1.25).abs() < 1e-12);
        let r = problem.residuals(&[2e3, 2e3]).unwrap();
        assert!(r.iter().all(|v| v.abs() < 1e-12));
        assert_eq!(problem.simulation_runs(), 2);
        assert!(problem.candidate_at(&[2e3, 2e3]).is_some());
        assert!(problem.candidate_at(&[1e3, 3e3]).is_none());
        assert_eq!(problem.best().unwrap().params, vec![2e3, 2e3]);
    }

    #[test]
    fn tied_parameters_leave_the_free_vector() {
        let tie = ParameterRelation::new("R2", RelationshipType::Equals, "R1");
        let problem = divider_problem(divider_sim(), &[tie]);
        assert_eq!(problem.num_params(), 1);
        assert_eq!(problem.free_names(), vec!["R1".to_string()]);
        let vector = problem.vector_for(&[750.0]).unwrap();
        assert_eq!(vector, vec![("R1".into(), 750.0), ("R2".into(), 750.0)]);
        let r = problem.residuals(&[750.0]).unwrap();
        assert!(r.iter().all(|v| v.abs() < 1e-12));
    }

    #[test]
    fn tied_values_outside_their_bounds_are_never_simulated() {
        let doc = Arc::new(NetlistDocument::parse(DIVIDER).unwrap());
        let target = TargetCurve::new(vec![(0.0, 2.5), (1e-3, 2.5)]).unwrap();
        let analysis = AnalysisConfig::Transient(TransientSettings::spanning(
            &target,
            Probe::parse("V(2)").unwrap(),
        ));
        let names = vec!["R1".to_string(), "R2".to_string()];
        let tie = ParameterRelation::new("R2", RelationshipType::Equals, "10000 - R1");
        let relations = RelationSet::new(&[tie], &names).unwrap();
        let failures = Mutex::new(0);
        let problem = CircuitProblem::new(
            doc,
            divider_sim(),
            ObjectiveFunction::new(target, analysis, Vec::new()),
            names,
            vec![8e3, 3e3],
            &[Bounds::new(1.0, 1e5).unwrap(), Bounds::new(1.0, 4e3).unwrap()],
            relations,
        )
        .with_failure_hook(|_, _| *failures.lock().unwrap() += 1);

        assert_eq!(problem.tie_out_of_bounds(&[8e3]), None);
        problem.residuals(&[8e3]).unwrap();
        assert_eq!(problem.simulation_runs(), 1);

        assert_eq!(problem.tie_out_of_bounds(&[1e3]), Some(("R2".to_string(), 9e3)));
        assert_eq!(problem.residuals(&[1e3]).unwrap(), vec![FAILURE_PENALTY; 2]);
        assert_eq!(problem.simulation_runs(), 1);
        assert_eq!(problem.best().unwrap().params, vec![8e3]);
        drop(problem);
        assert_eq!(failures.into_inner().unwrap(), 0);
    }

    #[test]
    fn failures_become_penalties_until_the_launch_budget_runs_out() {
        let sim: Arc<dyn Simulate> = Arc::new(
            |_: &NetlistDocument, _: &AnalysisConfig, _: &[Probe]| -> Result<Waveform, SimulationError> {
                Err(SimulationError::LaunchFailure("no such file".into()))
            },
        );
        let counts = Mutex::new(Vec::new());
        let problem = divider_problem(sim, &[])
            .with_launch_failure_budget(2)
            .with_failure_hook(|_, n| counts.lock().unwrap().push(n));

        assert_eq!(problem.residuals(&[1e3, 3e3]).unwrap(), vec![FAILURE_PENALTY; 2]);
        assert_eq!(problem.residuals(&[1e3, 3e3]).unwrap(), vec![FAILURE_PENALTY; 2]);
        assert!(matches!(
            problem.residuals(&[1e3, 3e3]),
            Err(SolverError::Fatal(_))
        ));
        drop(problem);
        assert_eq!(counts.into_inner().unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn cancellation_is_checked_before_simulating() {
        let cancel = Arc::new(AtomicBool::new(true));
        let problem = divider_problem(divider_sim(), &[]).with_cancel_flag(cancel);
        assert_eq!(problem.residuals(&[1e3, 3e3]), Err(SolverError::Cancelled));
        assert_eq!(problem.simulation_runs(), 0);
    }
}
