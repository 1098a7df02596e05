//! Full runs through the subprocess runner, with a shell script standing in for Xyce.
#![cfg(unix)]

use approx::assert_relative_eq;
use spicefit::{
    AcResponse, AcSettings, AnalysisConfig, FrequencySweep, ParameterSelection, Probe, RunConfig,
    RunEvent, RunState, SimulatorConfig, SweepType, TargetCurve, TransientSettings, Workspace,
};
use std::path::Path;

const DIVIDER: &str = "\
* resistive divider
V1 1 0 DC 5
R1 1 2 1k
R2 2 0 3k
.control
run
.endc
.END
";

/// Computes the divider output from the generated deck and writes it as a Xyce result file.
const DIVIDER_SCRIPT: &str = r#"deck="$1"
out="${deck%.cir}.prn"
awk 'toupper($1)=="R1"{r1=$4} toupper($1)=="R2"{r2=$4}
     END{v=5*r2/(r1+r2); printf "Index,TIME,V(2)\n0,0,%.17g\n1,0.0005,%.17g\n2,0.001,%.17g\nEnd of Xyce(TM) Simulation\n", v, v, v}' "$deck" > "$out"
"#;

fn script(dir: &Path, body: &str) -> SimulatorConfig {
    let path = dir.join("fake-xyce.sh");
    std::fs::write(&path, body).unwrap();
    SimulatorConfig {
        executable: "sh".into(),
        args: vec![path.to_string_lossy().into_owned()],
        timeout_secs: 10,
        ..SimulatorConfig::default()
    }
}

#[test]
fn divider_fit_through_the_subprocess_runner() {
    let bin = tempfile::tempdir().unwrap();
    let mut workspace = Workspace::new();
    workspace.upload(DIVIDER).unwrap();

    let target = TargetCurve::parse_table("time,v\n0,2.5\n5e-4,2.5\n1e-3,2.5\n").unwrap();
    let analysis = AnalysisConfig::Transient(TransientSettings::spanning(
        &target,
        Probe::parse("V(2)").unwrap(),
    ));
    let mut config = RunConfig::new(
        vec![
            ParameterSelection::bounded("R1", 1.0, 1e5),
            ParameterSelection::bounded("R2", 1.0, 1e5),
        ],
        analysis,
        target,
    );
    config.simulator = script(bin.path(), DIVIDER_SCRIPT);

    let handle = workspace.start(&config).unwrap();
    let events: Vec<RunEvent> = handle.events().iter().collect();
    let Some(RunEvent::Finished(result)) = events.last() else {
        panic!("run did not finish cleanly: {:?}", events.last());
    };

    assert!(matches!(result.state, RunState::Converged(_)), "{:?}", result.state);
    assert!(
        !events
            .iter()
            .any(|e| matches!(e, RunEvent::SimulationFailed { .. }))
    );
    let (r1, r2) = (result.parameter("R1").unwrap(), result.parameter("R2").unwrap());
    assert_relative_eq!(r1 / r2, 1.0, max_relative = 1e-6);
    assert!(result.metrics.simulation_runs > 0);
    assert!(result.optimized_netlist.contains(".control"));
}

#[test]
fn missing_simulator_fails_the_run() {
    let mut workspace = Workspace::new();
    workspace.upload(DIVIDER).unwrap();

    let target = TargetCurve::new(vec![(10.0, -3.0), (1e3, -20.0)]).unwrap();
    let analysis = AnalysisConfig::Ac(AcSettings {
        output: Probe::parse("V(2)").unwrap(),
        sweep: FrequencySweep {
            sweep: SweepType::Dec,
            points: 10,
            start: 10.0,
            stop: 1e3,
        },
        response: AcResponse::MagnitudeDb,
    });
    let mut config = RunConfig::new(vec![ParameterSelection::new("R1")], analysis, target);
    config.simulator = SimulatorConfig {
        executable: "spicefit-no-such-simulator".into(),
        ..SimulatorConfig::default()
    };

    let handle = workspace.start(&config).unwrap();
    let result = handle.wait().unwrap();
    assert!(matches!(result.state, RunState::Failed(_)));
    assert!(result.waveform.is_none());
}
