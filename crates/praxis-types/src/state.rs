//! Workflow runtime state, history, and checkpoint types.
//!
//! `WorkflowState` is the durable record of a flow execution: current step,
//! status, accumulated output data, loop counters, and any pending decision.
//! Suspension is pure persisted data — an engine restarted mid-judgment
//! lands back in the suspended state with nothing held in memory.
//!
//! `HistoryEntry` is the append-only audit trail. Each entry carries enough
//! payload that folding the full history over an empty state reproduces the
//! exact final `WorkflowState` (crash-recovery replay).

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Lifecycle status of a workflow execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    /// No state has been created yet (`start` has not run).
    NotStarted,
    /// The engine accepts submissions and resolves transitions.
    Running,
    /// Resolution is suspended on an external decision.
    AwaitingJudgment,
    /// Explicitly stopped; all data preserved, `resume` re-enters.
    Stopped,
    /// A terminate step was reached; only `goto` can leave this state.
    Terminated,
}

impl WorkflowStatus {
    /// Stable string form, matching the serde representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotStarted => "not_started",
            Self::Running => "running",
            Self::AwaitingJudgment => "awaiting_judgment",
            Self::Stopped => "stopped",
            Self::Terminated => "terminated",
        }
    }
}

// ---------------------------------------------------------------------------
// Pending decisions
// ---------------------------------------------------------------------------

/// A cognitive transition offered to the external collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JudgmentCandidate {
    /// Step the flow moves to if this condition is judged true.
    pub target: String,
    /// The condition text, shown as the decision prompt.
    pub condition: String,
}

/// Why the engine is suspended in `AwaitingJudgment`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PendingDecision {
    /// A wait-gated step; resolved by `approve` or `reject`.
    Approval,
    /// Cognitive transition conditions; resolved by naming a target step.
    Judgment { candidates: Vec<JudgmentCandidate> },
}

// ---------------------------------------------------------------------------
// Loop counters
// ---------------------------------------------------------------------------

/// Progress through an `iterate` collection: zero-based index of the
/// current pass and the total number of items.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoopCounter {
    pub index: usize,
    pub total: usize,
}

// ---------------------------------------------------------------------------
// Workflow state
// ---------------------------------------------------------------------------

/// The durable record of a flow execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowState {
    /// Name of the flow being executed.
    pub flow: String,
    /// Current step id.
    pub current_step: String,
    /// Lifecycle status.
    pub status: WorkflowStatus,
    /// Accumulated output data: submitted output keyed by step id, plus any
    /// top-level seed keys provided at start. Keys are unique; insertion
    /// order carries no meaning.
    pub data: serde_json::Map<String, Value>,
    /// Live loop counters keyed by the iterate dimension name.
    #[serde(default)]
    pub loops: HashMap<String, LoopCounter>,
    /// Outstanding decision, if suspended.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending: Option<PendingDecision>,
    /// When `start` created this state.
    pub started_at: DateTime<Utc>,
}

impl WorkflowState {
    /// Fresh state positioned at `entry` with optional seed data.
    pub fn new(
        flow: impl Into<String>,
        entry: impl Into<String>,
        seed: serde_json::Map<String, Value>,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            flow: flow.into(),
            current_step: entry.into(),
            status: WorkflowStatus::Running,
            data: seed,
            loops: HashMap::new(),
            pending: None,
            started_at,
        }
    }
}

// ---------------------------------------------------------------------------
// History
// ---------------------------------------------------------------------------

/// What an operation did, recorded in the audit trail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Start,
    Submit,
    Transition,
    AwaitJudgment,
    Judgment,
    Approve,
    Reject,
    Goto,
    Back,
    Skip,
    Retry,
    Stop,
    Resume,
    Terminate,
    LoopEnter,
    LoopAdvance,
    LoopExit,
    Restore,
}

impl ActionKind {
    /// Stable string form, matching the serde representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Submit => "submit",
            Self::Transition => "transition",
            Self::AwaitJudgment => "await_judgment",
            Self::Judgment => "judgment",
            Self::Approve => "approve",
            Self::Reject => "reject",
            Self::Goto => "goto",
            Self::Back => "back",
            Self::Skip => "skip",
            Self::Retry => "retry",
            Self::Stop => "stop",
            Self::Resume => "resume",
            Self::Terminate => "terminate",
            Self::LoopEnter => "loop_enter",
            Self::LoopAdvance => "loop_advance",
            Self::LoopExit => "loop_exit",
            Self::Restore => "restore",
        }
    }
}

/// One append-only audit record. `step` is the step the flow is on after
/// the action took effect; `payload` carries whatever the action needs for
/// deterministic replay (submitted data, loop counters, pending decisions,
/// restored snapshots).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Monotonic sequence number assigned by the store (0 until persisted).
    #[serde(default)]
    pub seq: i64,
    /// Flow name.
    pub flow: String,
    /// Step the flow is on after this action.
    pub step: String,
    /// What happened.
    pub action: ActionKind,
    /// Replay payload, action-specific.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    /// When the action was recorded.
    pub recorded_at: DateTime<Utc>,
}

impl HistoryEntry {
    /// A new unsequenced entry stamped `recorded_at`.
    pub fn new(
        flow: impl Into<String>,
        step: impl Into<String>,
        action: ActionKind,
        payload: Option<Value>,
        recorded_at: DateTime<Utc>,
    ) -> Self {
        Self {
            seq: 0,
            flow: flow.into(),
            step: step.into(),
            action,
            payload,
            recorded_at,
        }
    }
}

// ---------------------------------------------------------------------------
// Checkpoints
// ---------------------------------------------------------------------------

/// A named, immutable snapshot of `WorkflowState`.
///
/// Creating a checkpoint does not mutate live state; restoring one replaces
/// live state wholesale and is itself recorded as a history entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    /// UUIDv7 assigned on creation.
    pub id: Uuid,
    /// Unique checkpoint name (re-saving a name replaces the snapshot).
    pub name: String,
    /// The captured state.
    pub state: WorkflowState,
    /// When the snapshot was taken.
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
