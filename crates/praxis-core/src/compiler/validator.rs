//! Static analysis for compiled flows -- catch graph defects before
//! execution is allowed to start.
//!
//! The validator never fails: it reports an ordered list of findings and
//! the caller decides which severities are fatal. Load-time callers treat
//! any `Error` finding as fatal; `Warning` findings are surfaced but do not
//! block execution.

use std::collections::{HashMap, HashSet};

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::Dfs;
use praxis_types::flow::FlowDefinition;

// ---------------------------------------------------------------------------
// Findings
// ---------------------------------------------------------------------------

/// How serious a finding is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
}

/// One static-analysis finding.
#[derive(Debug, Clone)]
pub struct Finding {
    pub severity: Severity,
    pub message: String,
    /// The step the finding is about, when there is one.
    pub step: Option<String>,
}

impl Finding {
    fn error(message: impl Into<String>, step: Option<&str>) -> Self {
        Self {
            severity: Severity::Error,
            message: message.into(),
            step: step.map(String::from),
        }
    }

    fn warning(message: impl Into<String>, step: Option<&str>) -> Self {
        Self {
            severity: Severity::Warning,
            message: message.into(),
            step: step.map(String::from),
        }
    }
}

impl std::fmt::Display for Finding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let level = match self.severity {
            Severity::Error => "ERROR",
            Severity::Warning => "WARNING",
        };
        match &self.step {
            Some(step) => write!(f, "{level}: [{step}] {}", self.message),
            None => write!(f, "{level}: {}", self.message),
        }
    }
}

/// Whether any finding is fatal at load time.
pub fn has_errors(findings: &[Finding]) -> bool {
    findings.iter().any(|f| f.severity == Severity::Error)
}

/// Render findings as a report, errors first.
pub fn format_findings(findings: &[Finding]) -> String {
    let errors: Vec<&Finding> = findings
        .iter()
        .filter(|f| f.severity == Severity::Error)
        .collect();
    let warnings: Vec<&Finding> = findings
        .iter()
        .filter(|f| f.severity == Severity::Warning)
        .collect();

    let mut lines = Vec::new();
    if !errors.is_empty() {
        lines.push(format!("  {} error(s):", errors.len()));
        for f in errors {
            lines.push(format!("    ✗ {f}"));
        }
    }
    if !warnings.is_empty() {
        lines.push(format!("  {} warning(s):", warnings.len()));
        for f in warnings {
            lines.push(format!("    ⚠ {f}"));
        }
    }
    lines.join("\n")
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Run all static checks on a compiled flow.
pub fn validate_flow(flow: &FlowDefinition) -> Vec<Finding> {
    let mut findings = Vec::new();

    if flow.is_empty() {
        findings.push(Finding::error("flow has no steps", None));
        return findings;
    }
    let Some(entry) = flow.entry().filter(|e| flow.contains(e)) else {
        findings.push(Finding::error("flow has no valid entry point", None));
        return findings;
    };

    check_targets(flow, &mut findings);
    check_reachability(flow, entry, &mut findings);
    check_dead_ends(flow, &mut findings);
    check_loops(flow, &mut findings);

    findings
}

/// Every transition target must name a declared step.
fn check_targets(flow: &FlowDefinition, findings: &mut Vec<Finding>) {
    for id in &flow.order {
        for t in &flow.steps[id].transitions {
            if !flow.contains(&t.target) {
                findings.push(Finding::error(
                    format!("transition target not found: '{}'", t.target),
                    Some(id.as_str()),
                ));
            }
        }
    }
}

/// All steps should be reachable from the entry point.
fn check_reachability(flow: &FlowDefinition, entry: &str, findings: &mut Vec<Finding>) {
    let mut graph = DiGraph::<&str, ()>::new();
    let mut indices: HashMap<&str, NodeIndex> = HashMap::new();
    for id in &flow.order {
        indices.insert(id, graph.add_node(id));
    }
    for id in &flow.order {
        for t in &flow.steps[id].transitions {
            if let Some(&to) = indices.get(t.target.as_str()) {
                graph.add_edge(indices[id.as_str()], to, ());
            }
        }
    }

    let mut reached: HashSet<&str> = HashSet::new();
    let mut dfs = Dfs::new(&graph, indices[entry]);
    while let Some(node) = dfs.next(&graph) {
        reached.insert(graph[node]);
    }

    for id in &flow.order {
        if !reached.contains(id.as_str()) {
            findings.push(Finding::warning(
                "step is unreachable from the entry point",
                Some(id.as_str()),
            ));
        }
    }
}

/// Non-terminate steps with no outgoing transitions are dead ends.
fn check_dead_ends(flow: &FlowDefinition, findings: &mut Vec<Finding>) {
    for id in &flow.order {
        let step = &flow.steps[id];
        if step.config.terminate {
            continue;
        }
        if step.transitions.is_empty() {
            findings.push(Finding::warning(
                "step has no outgoing transitions (dead end)",
                Some(id.as_str()),
            ));
        }
    }
}

/// Loop headers need a body edge and an exit edge.
fn check_loops(flow: &FlowDefinition, findings: &mut Vec<Finding>) {
    for id in &flow.order {
        let step = &flow.steps[id];
        if step.config.iterate.is_none() {
            continue;
        }
        if step.transitions.is_empty() {
            findings.push(Finding::error("loop has no transitions", Some(id.as_str())));
        } else if step.transitions.len() < 2 {
            findings.push(Finding::error("loop has no exit edge (empty loop)", Some(id.as_str())));
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
