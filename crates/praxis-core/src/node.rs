//! Registered step behavior: the capability lookup for externally supplied
//! step contracts.
//!
//! The engine consumes a fixed interface per step -- instructions for the
//! cognitive collaborator, an output schema, a deterministic check, and an
//! edit policy. How implementations are loaded or sandboxed is the host's
//! concern; the engine depends only on `StepBehavior`.
//!
//! `@name` eval-node conditions resolve through the same registry, in a
//! single flat namespace shared by step behaviors and named checks.

use std::collections::HashMap;
use std::sync::Arc;

use praxis_types::policy::EditPolicy;
use praxis_types::schema::OutputSchema;
use serde_json::{Map, Value};

// ---------------------------------------------------------------------------
// Behavior contract
// ---------------------------------------------------------------------------

/// Result of a deterministic output check. A failure carries a
/// human-readable reason surfaced to the external driver for correction;
/// both outcomes count as deterministic judgments, never cognitive ones.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckOutcome {
    Pass,
    Fail(String),
}

impl CheckOutcome {
    pub fn passed(&self) -> bool {
        matches!(self, Self::Pass)
    }
}

/// Externally supplied behavior for one step.
pub trait StepBehavior: Send + Sync {
    /// Instructions shown to the cognitive collaborator on this step.
    fn instructions(&self) -> Option<&str> {
        None
    }

    /// Expected shape of the step's submitted output.
    fn schema(&self) -> Option<&OutputSchema> {
        None
    }

    /// Edit policy in force while this step is current.
    fn edit_policy(&self) -> Option<&EditPolicy> {
        None
    }

    /// Deterministic validation over submitted/accumulated output.
    fn check(&self, _data: &Map<String, Value>) -> CheckOutcome {
        CheckOutcome::Pass
    }
}

// ---------------------------------------------------------------------------
// Closure-backed behavior
// ---------------------------------------------------------------------------

type CheckFn = dyn Fn(&Map<String, Value>) -> CheckOutcome + Send + Sync;

/// Builder-style `StepBehavior` so hosts can register behaviors without
/// defining new types.
#[derive(Default)]
pub struct BehaviorSpec {
    instructions: Option<String>,
    schema: Option<OutputSchema>,
    edit_policy: Option<EditPolicy>,
    check: Option<Box<CheckFn>>,
}

impl BehaviorSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_instructions(mut self, text: impl Into<String>) -> Self {
        self.instructions = Some(text.into());
        self
    }

    pub fn with_schema(mut self, schema: OutputSchema) -> Self {
        self.schema = Some(schema);
        self
    }

    pub fn with_edit_policy(mut self, policy: EditPolicy) -> Self {
        self.edit_policy = Some(policy);
        self
    }

    pub fn with_check(
        mut self,
        check: impl Fn(&Map<String, Value>) -> CheckOutcome + Send + Sync + 'static,
    ) -> Self {
        self.check = Some(Box::new(check));
        self
    }
}

impl StepBehavior for BehaviorSpec {
    fn instructions(&self) -> Option<&str> {
        self.instructions.as_deref()
    }

    fn schema(&self) -> Option<&OutputSchema> {
        self.schema.as_ref()
    }

    fn edit_policy(&self) -> Option<&EditPolicy> {
        self.edit_policy.as_ref()
    }

    fn check(&self, data: &Map<String, Value>) -> CheckOutcome {
        match &self.check {
            Some(check) => check(data),
            None => CheckOutcome::Pass,
        }
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Flat name -> behavior lookup. Keys are step ids for per-step contracts
/// and bare names for `@name` checks.
#[derive(Default, Clone)]
pub struct BehaviorRegistry {
    behaviors: HashMap<String, Arc<dyn StepBehavior>>,
}

impl BehaviorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a behavior under `name`, replacing any previous entry.
    pub fn register(&mut self, name: impl Into<String>, behavior: impl StepBehavior + 'static) {
        self.behaviors.insert(name.into(), Arc::new(behavior));
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn StepBehavior>> {
        self.behaviors.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.behaviors.contains_key(name)
    }

    /// Run the named check against `data`; `None` when no such behavior is
    /// registered (the caller decides whether that is an error).
    pub fn run_check(&self, name: &str, data: &Map<String, Value>) -> Option<CheckOutcome> {
        self.behaviors.get(name).map(|b| b.check(data))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
