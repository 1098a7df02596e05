//! Simulation deck generation: the netlist with its own analysis and output
//! statements replaced by ones derived from an [`AnalysisConfig`].

use super::netlist::NetlistDocument;
use super::values::format_directive_number;
use crate::core::{AnalysisConfig, Probe};

/// Statements that would conflict with the generated analysis.
const REPLACED: &[&str] = &[
    ".TRAN", ".AC", ".NOISE", ".DC", ".OP", ".PRINT", ".PROBE", ".MEASURE", ".MEAS", ".STEP",
    ".END",
];

/// Render the deck the simulator will run. Results are printed to `output_file`.
pub fn render_deck(
    doc: &NetlistDocument,
    analysis: &AnalysisConfig,
    probes: &[Probe],
    output_file: &str,
) -> String {
    let mut deck = String::new();
    let mut in_control = false;
    let mut skipping = false;

    for (idx, line) in doc.lines().iter().enumerate() {
        let trimmed = line.trim();
        if idx > 0 {
            let keyword = trimmed
                .split_whitespace()
                .next()
                .unwrap_or_default()
                .to_ascii_uppercase();
            if in_control {
                in_control = keyword != ".ENDC";
                continue;
            }
            if keyword == ".CONTROL" {
                in_control = true;
                continue;
            }
            if keyword == ".END" {
                break;
            }
            if trimmed.starts_with('+') {
                if skipping {
                    continue;
                }
            } else if !trimmed.is_empty() && !trimmed.starts_with('*') {
                skipping = REPLACED.contains(&keyword.as_str());
                if skipping {
                    continue;
                }
            }
        }
        deck.push_str(line.trim_end_matches('\r'));
        deck.push('\n');
    }

    for statement in analysis_statements(analysis, probes, output_file) {
        deck.push_str(&statement);
        deck.push('\n');
    }
    deck.push_str(".END\n");
    deck
}

/// Analysis directive followed by its `.PRINT` statement.
pub fn analysis_statements(
    analysis: &AnalysisConfig,
    probes: &[Probe],
    output_file: &str,
) -> Vec<String> {
    let n = format_directive_number;
    match analysis {
        AnalysisConfig::Transient(s) => {
            let mut tran = format!(".TRAN {} {} {}", n(s.step), n(s.stop), n(s.start));
            if let Some(max_step) = s.max_step {
                tran.push_str(&format!(" {}", n(max_step)));
            }
            if s.use_initial_conditions {
                tran.push_str(" UIC");
            }
            let columns: Vec<String> = unique(std::iter::once(&s.output).chain(probes))
                .map(|p| p.to_string())
                .collect();
            vec![tran, print_statement("TRAN", output_file, &columns)]
        }
        AnalysisConfig::Ac(s) => {
            let ac = format!(
                ".AC {} {} {} {}",
                s.sweep.sweep.keyword(),
                s.sweep.points,
                n(s.sweep.start),
                n(s.sweep.stop)
            );
            let columns: Vec<String> = unique(std::iter::once(&s.output).chain(probes))
                .flat_map(|p| {
                    let (re, im) = p.complex_parts();
                    [re, im]
                })
                .collect();
            vec![ac, print_statement("AC", output_file, &columns)]
        }
        AnalysisConfig::Noise(s) => {
            let noise = format!(
                ".NOISE {} {} {} {} {} {}",
                s.output_probe(),
                s.input_source.trim(),
                s.sweep.sweep.keyword(),
                s.sweep.points,
                n(s.sweep.start),
                n(s.sweep.stop)
            );
            let columns = vec!["ONOISE".to_string(), "INOISE".to_string()];
            vec![noise, print_statement("NOISE", output_file, &columns)]
        }
    }
}

fn print_statement(kind: &str, output_file: &str, columns: &[String]) -> String {
    format!(".PRINT {} FILE={} {}", kind, output_file, columns.join(" "))
}

fn unique<'a>(probes: impl Iterator<Item = &'a Probe>) -> impl Iterator<Item = &'a Probe> {
    let mut seen: Vec<&Probe> = Vec::new();
    probes.filter(move |p| {
        if seen.contains(p) {
            false
        } else {
            seen.push(p);
            true
        }
    })
}
