use super::problem::CircuitProblem;
use super::solvers::traits::{IterationProgress, OptimizationCallback, SolverError};
use crate::core::{IterationRecord, improvement_percent};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::SystemTime;

/// Receives each iteration record as soon as it is built.
pub type IterationSink<'a> = Box<dyn FnMut(&IterationRecord) + 'a>;

/// Tracks circuit optimization progress and relays cancellation to the solver.
pub struct CircuitOptimizationCallback<'a> {
    problem: &'a CircuitProblem<'a>,
    cancel: Arc<AtomicBool>,
    history: Vec<IterationRecord>,
    sink: Option<IterationSink<'a>>,
}

impl<'a> CircuitOptimizationCallback<'a> {
    pub fn new(problem: &'a CircuitProblem<'a>, cancel: Arc<AtomicBool>) -> Self {
        Self {
            problem,
            cancel,
            history: Vec::new(),
            sink: None,
        }
    }

    pub fn with_sink(mut self, sink: impl FnMut(&IterationRecord) + 'a) -> Self {
        self.sink = Some(Box::new(sink));
        self
    }

    /// Get iteration history
    pub fn history(&self) -> &[IterationRecord] {
        &self.history
    }

    pub fn into_history(self) -> Vec<IterationRecord> {
        self.history
    }

    fn record(&self, progress: &IterationProgress<'_>) -> Result<IterationRecord, SolverError> {
        let parameters = self
            .problem
            .vector_for(progress.params)
            .map_err(SolverError::Fatal)?;
        let violations = self
            .problem
            .candidate_at(progress.params)
            .map(|c| c.evaluation.violations)
            .unwrap_or_default();

        Ok(IterationRecord {
            iteration: progress.iteration,
            parameters,
            residual_norm: progress.residual_norm,
            improvement_percent: improvement_percent(progress.initial_norm, progress.residual_norm),
            evaluations: self.problem.simulation_runs(),
            timestamp: SystemTime::now(),
            violations,
        })
    }
}

impl OptimizationCallback for CircuitOptimizationCallback<'_> {
    fn on_iteration(&mut self, progress: &IterationProgress<'_>) -> Result<(), SolverError> {
        let record = self.record(progress)?;
        log::debug!(
            "iteration {}: residual norm {:.6e} ({:+.2}%)",
            record.iteration,
            record.residual_norm,
            record.improvement_percent
        );

        if let Some(sink) = self.sink.as_mut() {
            sink(&record);
        }
        self.history.push(record);
        Ok(())
    }

    fn should_stop(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{
        AnalysisConfig, Bounds, Probe, RelationSet, SimulationError, TargetCurve,
        TransientSettings,
    };
    use crate::optimization::objective::ObjectiveFunction;
    use crate::simulation::{NetlistDocument, Simulate, Waveform};

    #[test]
    fn builds_records_from_progress() {
        let doc = Arc::new(NetlistDocument::parse("t\nV1 1 0 5\nR1 1 2 1k\nR2 2 0 1k\n").unwrap());
        let target = TargetCurve::new(vec![(0.0, 1.0), (1.0, 1.0)]).unwrap();
        let analysis = AnalysisConfig::Transient(TransientSettings::spanning(
            &target,
            Probe::parse("V(2)").unwrap(),
        ));
        let sim: Arc<dyn Simulate> = Arc::new(
            |_: &NetlistDocument, _: &AnalysisConfig, _: &[Probe]| -> Result<Waveform, SimulationError> {
                Waveform::single("TIME", vec![0.0, 1.0], "V(2)", vec![2.0, 2.0])
                    .map_err(SimulationError::OutputParseFailure)
            },
        );
        let names = vec!["R1".to_string(), "R2".to_string()];
        let problem = CircuitProblem::new(
            doc,
            sim,
            ObjectiveFunction::new(target, analysis, Vec::new()),
            names.clone(),
            vec![1e3, 1e3],
            &[Bounds::new(1.0, 1e4).unwrap(); 2],
            RelationSet::new(&[], &names).unwrap(),
        );

        let cancel = Arc::new(AtomicBool::new(false));
        let mut seen = Vec::new();
        let mut callback =
            CircuitOptimizationCallback::new(&problem, cancel.clone()).with_sink(|r| seen.push(r.iteration));
        callback
            .on_iteration(&IterationProgress {
                iteration: 1,
                params: &[2e3, 1e3],
                residual_norm: 0.5,
                initial_norm: 2.0,
                cost_evals: 3,
            })
            .unwrap();
        assert!(!callback.should_stop());
        cancel.store(true, Ordering::SeqCst);
        assert!(callback.should_stop());

        let history = callback.into_history();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].parameter("r1"), Some(2e3));
        assert_eq!(history[0].improvement_percent, 75.0);
        assert_eq!(seen, vec![1]);
    }
}
