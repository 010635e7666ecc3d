//! Mermaid flowchart rendering for compiled flows.
//!
//! Load-time tooling prints this so the operator can eyeball the compiled
//! graph before starting a run. Shape vocabulary: diamonds for auto steps,
//! stadiums for loop headers, parallelograms for wait gates, double circles
//! for terminate steps, rectangles for plain tasks.

use std::collections::HashMap;

use praxis_types::flow::FlowDefinition;

/// Longest condition text shown on an edge label.
const EDGE_LABEL_LIMIT: usize = 30;

fn node_id(counter: usize, name: &str) -> String {
    let clean: String = name
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    let mut collapsed = String::with_capacity(clean.len());
    for c in clean.chars() {
        if c == '_' && collapsed.ends_with('_') {
            continue;
        }
        collapsed.push(c);
    }
    let trimmed = collapsed.trim_matches('_');
    format!("n{counter}_{trimmed}")
}

fn edge_label(condition: &str) -> String {
    condition.chars().take(EDGE_LABEL_LIMIT).collect()
}

/// Render a flow as a Mermaid `graph TD` flowchart.
pub fn render_mermaid(flow: &FlowDefinition) -> String {
    let mut ids: HashMap<&str, String> = HashMap::new();
    let mut nodes = Vec::new();
    let mut edges = Vec::new();

    for (counter, name) in flow.order.iter().enumerate() {
        let step = &flow.steps[name.as_str()];
        let sid = node_id(counter + 1, name);
        ids.insert(name, sid.clone());
        let label = name.replace('"', "'");

        let node = if step.config.auto {
            format!("    {sid}{{{{{label}}}}}")
        } else if step.config.iterate.is_some() {
            format!("    {sid}@{{ shape: stadium, label: \"{label}\" }}")
        } else if step.config.wait {
            format!("    {sid}[/\"{label}\"/]")
        } else if step.config.terminate {
            format!("    {sid}((\"{label}\"))")
        } else {
            format!("    {sid}[\"{label}\"]")
        };
        nodes.push(node);
    }

    for name in &flow.order {
        let step = &flow.steps[name.as_str()];
        let src = &ids[name.as_str()];
        for (i, t) in step.transitions.iter().enumerate() {
            let Some(dst) = ids.get(t.target.as_str()) else {
                continue;
            };
            let edge = match &t.condition {
                Some(condition) => {
                    format!("    {src} -->|\"{}\"| {dst}", edge_label(condition))
                }
                None if step.config.auto && i > 0 => format!("    {src} -.-> {dst}"),
                None if step.config.iterate.is_some() && i > 0 => {
                    format!("    {src} -.->|exit| {dst}")
                }
                None => format!("    {src} --> {dst}"),
            };
            edges.push(edge);
        }
    }

    let mut lines = vec!["graph TD".to_string()];
    lines.extend(nodes);
    lines.extend(edges);
    lines.join("\n")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
