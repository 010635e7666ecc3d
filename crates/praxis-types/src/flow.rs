//! Flow definition types for Praxis.
//!
//! Defines the canonical intermediate representation for workflow graphs:
//! the compiler lowers declarative YAML (in either accepted keyword
//! vocabulary) into a `FlowDefinition`, which is the single source of truth
//! for a flow's shape. The executor and the static validator both operate
//! on this IR and never on raw YAML.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Flow definition (canonical IR)
// ---------------------------------------------------------------------------

/// The compiled flow graph.
///
/// Step identifiers are unique; `order` preserves declaration order and
/// `order[0]` is the flow's entry point.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowDefinition {
    /// Human-readable flow name.
    pub name: String,
    /// Optional longer description.
    #[serde(default)]
    pub description: String,
    /// Step identifiers in declaration order (entry first).
    pub order: Vec<String>,
    /// Step definitions keyed by identifier.
    pub steps: HashMap<String, StepDefinition>,
}

impl FlowDefinition {
    /// The entry step id (first declared step), if the flow has any steps.
    pub fn entry(&self) -> Option<&str> {
        self.order.first().map(String::as_str)
    }

    /// Look up a step by id.
    pub fn step(&self, id: &str) -> Option<&StepDefinition> {
        self.steps.get(id)
    }

    /// Whether `id` names a step in this flow.
    pub fn contains(&self, id: &str) -> bool {
        self.steps.contains_key(id)
    }

    /// Number of steps in the flow.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Whether the flow has no steps.
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Step definition
// ---------------------------------------------------------------------------

/// A single node in the flow graph: opaque instructions for the cognitive
/// side plus an ordered transition list and engine-facing config flags.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepDefinition {
    /// Unique step identifier (also its display name).
    pub id: String,
    /// Outgoing edges in priority order.
    #[serde(default)]
    pub transitions: Vec<Transition>,
    /// Engine-facing behavior flags.
    #[serde(default)]
    pub config: StepConfig,
}

/// A conditioned edge to another step.
///
/// `condition == None` marks the unconditional default edge. Order within a
/// step's transition list is an explicit priority order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transition {
    /// Target step id.
    pub target: String,
    /// Raw condition text; `None` means default/unconditional.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
}

impl Transition {
    /// An unconditional edge to `target`.
    pub fn to(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            condition: None,
        }
    }

    /// A conditioned edge to `target`.
    pub fn when(condition: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            condition: Some(condition.into()),
        }
    }
}

/// Behavior flags attached to a step by the compiler.
///
/// Flags used by the engine:
/// - `wait` — suspend for approval on entry
/// - `terminate` — terminal step; ends the flow (optional `reason`)
/// - `iterate` — loop header; the expression yields the collection
/// - `auto` — advance without submitted output (assert/branch/jump sugar)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StepConfig {
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub wait: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub auto: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub terminate: bool,
    /// Termination reason, surfaced when the flow ends here.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Collection expression for loop headers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iterate: Option<String>,
    /// Loop header this step was flattened out of, for nested children.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    /// Unrecognized definition keys, forwarded opaquely.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub extra: HashMap<String, serde_json::Value>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
