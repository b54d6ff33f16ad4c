//! Session summary and exit codes.

use std::collections::BTreeMap;

use canary_core::Status;

use crate::graph::CaseGraph;

/// Exit code when every case succeeded.
pub const EXIT_OK: i32 = 0;
/// Exit code when at least one case reached a non-success terminal status.
pub const EXIT_FAILURES: i32 = 30;

/// The session exit code: 0 when every case passed (or xfailed, or was
/// masked as a skip), 30 otherwise.
pub fn exit_code(graph: &CaseGraph) -> i32 {
    let any_bad = graph.cases.iter().any(|case| {
        case.terminal_status()
            .is_some_and(|s| !s.is_success() && s != Status::Skip)
    });
    if any_bad {
        EXIT_FAILURES
    } else {
        EXIT_OK
    }
}

/// Human-readable end-of-session summary.
pub fn summary(graph: &CaseGraph) -> String {
    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
    for case in &graph.cases {
        let key = match case.terminal_status() {
            Some(status) => status.to_string(),
            None => "pending".to_string(),
        };
        *counts.entry(key).or_default() += 1;
    }

    let mut out = String::new();
    out.push_str("==================== summary ====================\n");
    for case in &graph.cases {
        let status = case
            .terminal_status()
            .map(|s| s.to_string())
            .unwrap_or_else(|| "pending".to_string());
        let duration = match (case.state.started, case.state.finished) {
            (Some(a), Some(b)) => {
                format!(" ({:.2}s)", (b - a).num_milliseconds() as f64 / 1000.0)
            }
            _ => String::new(),
        };
        out.push_str(&format!("{status:>8}  {}{duration}\n", case.name));
        if let Some(reason) = &case.state.reason {
            out.push_str(&format!("          {reason}\n"));
        }
    }
    out.push_str("-------------------------------------------------\n");
    let total: usize = counts.values().sum();
    let line: Vec<String> = counts
        .iter()
        .map(|(status, n)| format!("{n} {status}"))
        .collect();
    out.push_str(&format!("{total} cases: {}\n", line.join(", ")));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::Generator;
    use crate::graph::{freeze, FreezeOptions};

    fn graph_with_statuses(statuses: &[Status]) -> CaseGraph {
        let gens: Vec<Generator> = statuses
            .iter()
            .enumerate()
            .map(|(i, _)| Generator::new(format!("t{i}"), vec!["./run".into()]))
            .collect();
        let mut graph = freeze(&gens, &FreezeOptions::default()).unwrap();
        for (case, &status) in graph.cases.iter_mut().zip(statuses) {
            case.state.status = Some(status);
        }
        graph
    }

    #[test]
    fn all_pass_exits_zero() {
        let graph = graph_with_statuses(&[Status::Pass, Status::XFail, Status::Skip]);
        assert_eq!(exit_code(&graph), EXIT_OK);
    }

    #[test]
    fn any_failure_exits_thirty() {
        for bad in [Status::Fail, Status::Diff, Status::Timeout, Status::XPass, Status::NotRun]
        {
            let graph = graph_with_statuses(&[Status::Pass, bad]);
            assert_eq!(exit_code(&graph), EXIT_FAILURES, "{bad}");
        }
    }

    #[test]
    fn summary_counts_statuses() {
        let graph = graph_with_statuses(&[Status::Pass, Status::Pass, Status::Fail]);
        let text = summary(&graph);
        assert!(text.contains("3 cases: 1 fail, 2 pass"));
    }
}
