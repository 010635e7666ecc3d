//! The transition resolver: Praxis's state machine core.
//!
//! `FlowEngine` owns a compiled flow, the behavior registry, and a state
//! repository. Every operation loads the persisted state, mutates it, and
//! persists the result atomically with the history entry describing it.
//!
//! Transition resolution runs three ordered passes over the current step's
//! transitions, stopping at the first match:
//!
//! 1. deterministic conditions (`Expression` / `EvalNode`), in declared order
//! 2. cognitive conditions -- if any exist, resolution suspends as
//!    `awaiting_judgment` until an external decision names a target
//! 3. the unconditional default transition
//!
//! Pass 2 is the one suspension point in the protocol. Suspension is pure
//! persisted status, so it survives process restarts of arbitrary length.
//!
//! All mutating operations serialize through one `tokio::sync::Mutex`:
//! the expected caller is single-threaded, but the single-writer discipline
//! makes the engine safe to expose as a service (a stray duplicate
//! submission cannot apply two conflicting transitions).

use chrono::{DateTime, Utc};
use praxis_types::error::RepositoryError;
use praxis_types::flow::{FlowDefinition, StepDefinition};
use praxis_types::policy::{EditPolicy, PolicyDecision};
use praxis_types::state::{
    ActionKind, Checkpoint, HistoryEntry, JudgmentCandidate, LoopCounter, PendingDecision,
    WorkflowState, WorkflowStatus,
};
use serde::Serialize;
use serde_json::{json, Map, Value};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::classify::{classify, ConditionKind};
use super::expression::{expression_context, ConditionEvaluator, EvaluationError};
use super::policy::evaluate_edit;
use crate::node::{BehaviorRegistry, CheckOutcome};
use crate::repository::state::StateRepository;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors returned by engine operations. All are typed results -- nothing
/// in the engine crashes the process; the caller decides presentation.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("flow '{0}' has no steps")]
    EmptyFlow(String),

    #[error("a workflow is already active at step '{0}'; reset it before starting again")]
    AlreadyStarted(String),

    #[error("no active workflow; start one first")]
    NotStarted,

    #[error("workflow is stopped; resume it before continuing")]
    Stopped,

    #[error("workflow has terminated; use goto to revisit a step")]
    Terminated,

    #[error("step '{step}' is waiting for approval; approve or reject it")]
    ApprovalPending { step: String },

    #[error("step '{step}' is awaiting judgment; resolve it by naming a target step")]
    JudgmentPending { step: String },

    #[error("step '{step}' is not waiting for approval")]
    NoApprovalPending { step: String },

    #[error("no judgment is pending at step '{step}'")]
    NoJudgmentPending { step: String },

    #[error("cannot resume: workflow is {status}")]
    NotStopped { status: &'static str },

    #[error("step '{0}' is not part of the flow definition")]
    UnknownStep(String),

    #[error("target step '{target}' not found; known steps: {known}")]
    InvalidTarget { target: String, known: String },

    #[error("no transition matched from step '{step}' and there is no default path")]
    NoTransitionMatched { step: String },

    #[error("cannot go back; no previous step in history")]
    NoPreviousStep,

    #[error("output rejected by step '{step}': {problems}")]
    SchemaViolation { step: String, problems: String },

    #[error("output rejected by step '{step}': {reason}")]
    CheckFailure { step: String, reason: String },

    #[error("checkpoint '{0}' not found")]
    UnknownCheckpoint(String),

    #[error(transparent)]
    Evaluation(#[from] EvaluationError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

// ---------------------------------------------------------------------------
// Operation results
// ---------------------------------------------------------------------------

/// Outcome of a state-mutating operation.
#[derive(Debug, Clone)]
pub struct Advance {
    /// The step the flow is on after the operation.
    pub step: String,
    /// Status after the operation.
    pub status: WorkflowStatus,
    /// Human-readable outcome line.
    pub message: String,
    /// Outstanding decision, if the operation suspended.
    pub pending: Option<PendingDecision>,
}

/// Snapshot returned by `status`.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub flow: String,
    pub current_step: String,
    /// Loop frames plus the current step, e.g. `features[2/5] > red`.
    pub display_path: String,
    pub status: WorkflowStatus,
    pub total_steps: usize,
    pub elapsed: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pending: Option<PendingDecision>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decision_hint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub edit_policy: Option<EditPolicy>,
    pub allowed_actions: Vec<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_action: Option<HistoryEntry>,
    pub data: Map<String, Value>,
}

enum Resolution {
    Move(String),
    Suspend(Vec<JudgmentCandidate>),
    NoMatch,
}

enum LoopOutcome {
    Continue(String),
    Finished(Advance),
}

// ---------------------------------------------------------------------------
// FlowEngine
// ---------------------------------------------------------------------------

/// The state machine core, generic over the storage backend.
pub struct FlowEngine<R: StateRepository> {
    flow: FlowDefinition,
    behaviors: BehaviorRegistry,
    evaluator: ConditionEvaluator,
    repo: R,
    write_lock: Mutex<()>,
}

impl<R: StateRepository> FlowEngine<R> {
    /// Create an engine for a compiled (and validated) flow.
    pub fn new(flow: FlowDefinition, behaviors: BehaviorRegistry, repo: R) -> Self {
        Self {
            flow,
            behaviors,
            evaluator: ConditionEvaluator::new(),
            repo,
            write_lock: Mutex::new(()),
        }
    }

    /// The compiled flow this engine executes.
    pub fn flow(&self) -> &FlowDefinition {
        &self.flow
    }

    /// Direct access to the underlying repository.
    pub fn repo(&self) -> &R {
        &self.repo
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Start the flow at its entry step with optional seed data.
    pub async fn start(
        &self,
        initial: Option<Map<String, Value>>,
    ) -> Result<Advance, EngineError> {
        let _guard = self.write_lock.lock().await;

        if let Some(existing) = self.repo.load().await? {
            return Err(EngineError::AlreadyStarted(existing.current_step));
        }
        let entry = self
            .flow
            .entry()
            .ok_or_else(|| EngineError::EmptyFlow(self.flow.name.clone()))?
            .to_string();

        let seed = initial.unwrap_or_default();
        let now = Utc::now();
        let mut state = WorkflowState::new(&self.flow.name, &entry, seed.clone(), now);
        let entry_record = HistoryEntry::new(
            &self.flow.name,
            &entry,
            ActionKind::Start,
            Some(Value::Object(seed)),
            now,
        );
        self.repo.persist(&state, &entry_record).await?;
        tracing::info!(flow = self.flow.name.as_str(), step = entry.as_str(), "flow started");

        let step = self
            .flow
            .step(&entry)
            .ok_or_else(|| EngineError::UnknownStep(entry.clone()))?;

        if step.config.terminate {
            return self.advance_to(&mut state, entry).await;
        }
        if step.config.wait {
            return self.suspend_approval(&mut state).await;
        }
        if self.should_auto_advance(step) {
            return self.resolve_and_move(&mut state, &entry).await;
        }

        Ok(Advance {
            step: entry.clone(),
            status: WorkflowStatus::Running,
            message: format!("Flow \"{}\" started, current step: {entry}", self.flow.name),
            pending: None,
        })
    }

    /// Stop the flow, preserving all data and any pending decision.
    pub async fn stop(&self) -> Result<Advance, EngineError> {
        let _guard = self.write_lock.lock().await;
        let mut state = self.require_state().await?;
        match state.status {
            WorkflowStatus::Terminated => return Err(EngineError::Terminated),
            WorkflowStatus::Stopped => return Err(EngineError::Stopped),
            _ => {}
        }
        state.status = WorkflowStatus::Stopped;
        self.record(&state, ActionKind::Stop, None).await?;
        tracing::info!(step = state.current_step.as_str(), "flow stopped");
        Ok(Advance {
            step: state.current_step.clone(),
            status: WorkflowStatus::Stopped,
            message: format!("Workflow stopped at: {}", state.current_step),
            pending: state.pending.clone(),
        })
    }

    /// Resume a stopped flow, re-arming any pending decision.
    pub async fn resume(&self) -> Result<Advance, EngineError> {
        let _guard = self.write_lock.lock().await;
        let mut state = self.require_state().await?;
        if state.status != WorkflowStatus::Stopped {
            return Err(EngineError::NotStopped {
                status: state.status.as_str(),
            });
        }
        state.status = if state.pending.is_some() {
            WorkflowStatus::AwaitingJudgment
        } else {
            WorkflowStatus::Running
        };
        self.record(&state, ActionKind::Resume, None).await?;
        Ok(Advance {
            step: state.current_step.clone(),
            status: state.status,
            message: format!("Resumed at: {}", state.current_step),
            pending: state.pending.clone(),
        })
    }

    /// Destroy state and history. The one destructive operation; callers
    /// must treat it as separately authorized.
    pub async fn reset(&self) -> Result<(), EngineError> {
        let _guard = self.write_lock.lock().await;
        self.repo.reset().await?;
        tracing::info!(flow = self.flow.name.as_str(), "workflow state reset");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    /// Current position, status, pending decision, and behavior contract.
    pub async fn status(&self) -> Result<StatusReport, EngineError> {
        let Some(state) = self.repo.load().await? else {
            return Ok(StatusReport {
                flow: self.flow.name.clone(),
                current_step: String::new(),
                display_path: String::new(),
                status: WorkflowStatus::NotStarted,
                total_steps: self.flow.len(),
                elapsed: String::new(),
                pending: None,
                decision_hint: None,
                instructions: None,
                edit_policy: None,
                allowed_actions: vec!["start"],
                last_action: None,
                data: Map::new(),
            });
        };

        let behavior = self.behaviors.get(&state.current_step);
        let decision_hint = match &state.pending {
            Some(PendingDecision::Judgment { candidates }) => Some(judgment_hint(candidates)),
            Some(PendingDecision::Approval) => {
                Some("This step is waiting for approval; approve to continue or reject to send it back.".to_string())
            }
            None => None,
        };

        let mut allowed: Vec<&'static str> = vec!["submit", "skip"];
        match &state.pending {
            Some(PendingDecision::Approval) => allowed.extend(["approve", "reject"]),
            Some(PendingDecision::Judgment { .. }) => allowed.push("resolve_judgment"),
            None => {}
        }
        allowed.extend(["back", "goto", "retry"]);

        let last_action = self.repo.history(1).await?.into_iter().next();

        Ok(StatusReport {
            flow: self.flow.name.clone(),
            display_path: display_path(&state),
            current_step: state.current_step.clone(),
            status: state.status,
            total_steps: self.flow.len(),
            elapsed: format_elapsed(state.started_at, Utc::now()),
            pending: state.pending.clone(),
            decision_hint,
            instructions: behavior.and_then(|b| b.instructions().map(String::from)),
            edit_policy: behavior.and_then(|b| b.edit_policy().cloned()),
            allowed_actions: allowed,
            last_action,
            data: state.data,
        })
    }

    /// One value from the accumulated data mapping.
    pub async fn context(&self, key: &str) -> Result<Option<Value>, EngineError> {
        let state = self.require_state().await?;
        Ok(state.data.get(key).cloned())
    }

    /// The whole accumulated data mapping (empty before `start`).
    pub async fn data(&self) -> Result<Map<String, Value>, EngineError> {
        Ok(self
            .repo
            .load()
            .await?
            .map(|s| s.data)
            .unwrap_or_default())
    }

    /// Recent history, newest first.
    pub async fn history(&self, limit: u32) -> Result<Vec<HistoryEntry>, EngineError> {
        Ok(self.repo.history(limit).await?)
    }

    /// Classify a candidate file edit under the current step's policy.
    ///
    /// Fails open: no active flow, a stopped/terminated flow, or a step
    /// with no registered policy all classify as `Silent`.
    pub async fn check_edit(&self, path: &str) -> Result<PolicyDecision, EngineError> {
        let Some(state) = self.repo.load().await? else {
            return Ok(PolicyDecision::Silent);
        };
        if matches!(
            state.status,
            WorkflowStatus::Stopped | WorkflowStatus::Terminated
        ) {
            return Ok(PolicyDecision::Silent);
        }
        let policy = self
            .behaviors
            .get(&state.current_step)
            .and_then(|b| b.edit_policy().cloned())
            .unwrap_or_default();
        Ok(evaluate_edit(&policy, path))
    }

    // -----------------------------------------------------------------------
    // Submission and resolution
    // -----------------------------------------------------------------------

    /// Submit the current step's output and resolve the next step.
    ///
    /// A `_goto` key in the payload is an explicit path choice: it resolves
    /// a pending judgment, or overrides resolution while running.
    pub async fn submit(&self, data: Map<String, Value>) -> Result<Advance, EngineError> {
        let _guard = self.write_lock.lock().await;
        let mut state = self.require_state().await?;
        self.submit_inner(&mut state, data).await
    }

    async fn submit_inner(
        &self,
        state: &mut WorkflowState,
        mut data: Map<String, Value>,
    ) -> Result<Advance, EngineError> {
        match state.status {
            WorkflowStatus::Terminated => return Err(EngineError::Terminated),
            WorkflowStatus::Stopped => return Err(EngineError::Stopped),
            WorkflowStatus::AwaitingJudgment => match &state.pending {
                Some(PendingDecision::Judgment { .. }) if data.contains_key("_goto") => {}
                Some(PendingDecision::Judgment { .. }) => {
                    return Err(EngineError::JudgmentPending {
                        step: state.current_step.clone(),
                    })
                }
                _ => {
                    return Err(EngineError::ApprovalPending {
                        step: state.current_step.clone(),
                    })
                }
            },
            WorkflowStatus::Running | WorkflowStatus::NotStarted => {}
        }

        let step = self
            .flow
            .step(&state.current_step)
            .ok_or_else(|| EngineError::UnknownStep(state.current_step.clone()))?;
        let step_id = step.id.clone();

        let goto_target = match data.remove("_goto") {
            None => None,
            Some(Value::String(target)) => Some(target),
            Some(other) => {
                return Err(self.invalid_target(&other.to_string()));
            }
        };

        if let Some(behavior) = self.behaviors.get(&step_id) {
            if let Some(schema) = behavior.schema() {
                let problems = schema.violations(&data);
                if !problems.is_empty() {
                    return Err(EngineError::SchemaViolation {
                        step: step_id,
                        problems: problems.join("; "),
                    });
                }
            }
            if let CheckOutcome::Fail(reason) = behavior.check(&data) {
                return Err(EngineError::CheckFailure {
                    step: step_id,
                    reason,
                });
            }
        }

        state
            .data
            .insert(step_id.clone(), Value::Object(data.clone()));
        self.record(state, ActionKind::Submit, Some(Value::Object(data)))
            .await?;

        if let Some(target) = goto_target {
            if !self.flow.contains(&target) {
                return Err(self.invalid_target(&target));
            }
            state.status = WorkflowStatus::Running;
            state.pending = None;
            self.record(
                state,
                ActionKind::Judgment,
                Some(json!({ "target": target.as_str() })),
            )
            .await?;
            return self.advance_to(state, target).await;
        }

        self.resolve_and_move(state, &step_id).await
    }

    /// Resolve a pending cognitive judgment by naming the target step.
    ///
    /// Permissive by design: any step known to the flow is accepted, not
    /// only the offered candidates (which are advisory).
    pub async fn resolve_judgment(&self, target: &str) -> Result<Advance, EngineError> {
        let _guard = self.write_lock.lock().await;
        let mut state = self.require_state().await?;
        if !matches!(state.pending, Some(PendingDecision::Judgment { .. })) {
            return Err(EngineError::NoJudgmentPending {
                step: state.current_step.clone(),
            });
        }
        if !self.flow.contains(target) {
            // Suspension stands; nothing was mutated or persisted.
            return Err(self.invalid_target(target));
        }
        state.status = WorkflowStatus::Running;
        state.pending = None;
        self.record(
            &state,
            ActionKind::Judgment,
            Some(json!({ "target": target })),
        )
        .await?;
        self.advance_to(&mut state, target.to_string()).await
    }

    /// Approve a wait-gated step and submit its output.
    pub async fn approve(
        &self,
        data: Option<Map<String, Value>>,
    ) -> Result<Advance, EngineError> {
        let _guard = self.write_lock.lock().await;
        let mut state = self.require_state().await?;
        if !matches!(state.pending, Some(PendingDecision::Approval)) {
            return Err(EngineError::NoApprovalPending {
                step: state.current_step.clone(),
            });
        }
        state.status = WorkflowStatus::Running;
        state.pending = None;
        self.record(&state, ActionKind::Approve, None).await?;
        self.submit_inner(&mut state, data.unwrap_or_default()).await
    }

    /// Reject a wait-gated step; the suspension stands.
    pub async fn reject(&self, reason: Option<&str>) -> Result<Advance, EngineError> {
        let _guard = self.write_lock.lock().await;
        let state = self.require_state().await?;
        if !matches!(state.pending, Some(PendingDecision::Approval)) {
            return Err(EngineError::NoApprovalPending {
                step: state.current_step.clone(),
            });
        }
        self.record(
            &state,
            ActionKind::Reject,
            reason.map(|r| json!(r)),
        )
        .await?;
        Ok(Advance {
            step: state.current_step.clone(),
            status: state.status,
            message: format!("Rejected: {}", reason.unwrap_or("no reason given")),
            pending: state.pending.clone(),
        })
    }

    // -----------------------------------------------------------------------
    // Navigation
    // -----------------------------------------------------------------------

    /// Operator override: jump to any known step, bypassing resolution.
    pub async fn goto(&self, target: &str) -> Result<Advance, EngineError> {
        let _guard = self.write_lock.lock().await;
        let mut state = self.require_state().await?;
        if !self.flow.contains(target) {
            return Err(self.invalid_target(target));
        }
        state.current_step = target.to_string();
        state.status = WorkflowStatus::Running;
        state.pending = None;
        self.record(&state, ActionKind::Goto, None).await?;
        Ok(Advance {
            step: target.to_string(),
            status: WorkflowStatus::Running,
            message: format!("Jumped to: {target}"),
            pending: None,
        })
    }

    /// Return to the most recent previously visited step. Restores the
    /// position only -- persisted data is not undone.
    pub async fn back(&self) -> Result<Advance, EngineError> {
        let _guard = self.write_lock.lock().await;
        let mut state = self.require_state().await?;
        let recent = self.repo.history(20).await?;
        let target = recent
            .iter()
            .map(|entry| entry.step.as_str())
            .find(|step| *step != state.current_step && self.flow.contains(step))
            .map(String::from)
            .ok_or(EngineError::NoPreviousStep)?;

        state.current_step = target.clone();
        state.status = WorkflowStatus::Running;
        state.pending = None;
        self.record(&state, ActionKind::Back, None).await?;
        Ok(Advance {
            step: target.clone(),
            status: WorkflowStatus::Running,
            message: format!("Moved back to: {target}"),
            pending: None,
        })
    }

    /// Advance via transition resolution without requiring output.
    pub async fn skip(&self, reason: Option<&str>) -> Result<Advance, EngineError> {
        let _guard = self.write_lock.lock().await;
        let mut state = self.require_state().await?;
        match state.status {
            WorkflowStatus::Terminated => return Err(EngineError::Terminated),
            WorkflowStatus::Stopped => return Err(EngineError::Stopped),
            _ => {}
        }
        let step_id = state.current_step.clone();
        if !self.flow.contains(&step_id) {
            return Err(EngineError::UnknownStep(step_id));
        }
        state.status = WorkflowStatus::Running;
        state.pending = None;
        self.record(&state, ActionKind::Skip, reason.map(|r| json!(r)))
            .await?;
        self.resolve_and_move(&mut state, &step_id).await
    }

    /// Re-enter the current step, clearing only its own submitted data.
    pub async fn retry(&self) -> Result<Advance, EngineError> {
        let _guard = self.write_lock.lock().await;
        let mut state = self.require_state().await?;
        if state.status == WorkflowStatus::Terminated {
            return Err(EngineError::Terminated);
        }
        let step_id = state.current_step.clone();
        state.data.remove(&step_id);
        state.status = WorkflowStatus::Running;
        state.pending = None;
        self.record(&state, ActionKind::Retry, None).await?;
        Ok(Advance {
            step: step_id.clone(),
            status: WorkflowStatus::Running,
            message: format!("Retrying step \"{step_id}\". Attempt it again."),
            pending: None,
        })
    }

    // -----------------------------------------------------------------------
    // Checkpoints
    // -----------------------------------------------------------------------

    /// Snapshot the live state under `name`. Does not mutate live state.
    pub async fn save_checkpoint(&self, name: &str) -> Result<Checkpoint, EngineError> {
        let state = self.require_state().await?;
        let checkpoint = Checkpoint {
            id: Uuid::now_v7(),
            name: name.to_string(),
            state,
            created_at: Utc::now(),
        };
        self.repo.save_checkpoint(&checkpoint).await?;
        tracing::debug!(name, "checkpoint saved");
        Ok(checkpoint)
    }

    /// Replace live state wholesale with a named snapshot.
    pub async fn restore_checkpoint(&self, name: &str) -> Result<Advance, EngineError> {
        let _guard = self.write_lock.lock().await;
        let checkpoint = self
            .repo
            .load_checkpoint(name)
            .await?
            .ok_or_else(|| EngineError::UnknownCheckpoint(name.to_string()))?;

        let state = checkpoint.state;
        let snapshot = serde_json::to_value(&state)
            .map_err(|e| RepositoryError::Query(e.to_string()))?;
        self.record(&state, ActionKind::Restore, Some(snapshot))
            .await?;
        tracing::info!(name, step = state.current_step.as_str(), "checkpoint restored");
        Ok(Advance {
            step: state.current_step.clone(),
            status: state.status,
            message: format!("Restored checkpoint \"{name}\" at: {}", state.current_step),
            pending: state.pending,
        })
    }

    /// All saved checkpoints, newest first.
    pub async fn list_checkpoints(&self) -> Result<Vec<Checkpoint>, EngineError> {
        Ok(self.repo.list_checkpoints().await?)
    }

    // -----------------------------------------------------------------------
    // Resolution internals
    // -----------------------------------------------------------------------

    async fn require_state(&self) -> Result<WorkflowState, EngineError> {
        self.repo.load().await?.ok_or(EngineError::NotStarted)
    }

    fn invalid_target(&self, target: &str) -> EngineError {
        let mut known: Vec<&str> = self.flow.order.iter().map(String::as_str).collect();
        known.sort_unstable();
        EngineError::InvalidTarget {
            target: target.to_string(),
            known: known.join(", "),
        }
    }

    async fn record(
        &self,
        state: &WorkflowState,
        action: ActionKind,
        payload: Option<Value>,
    ) -> Result<(), EngineError> {
        self.record_at(state, &state.current_step.clone(), action, payload)
            .await
    }

    async fn record_at(
        &self,
        state: &WorkflowState,
        step: &str,
        action: ActionKind,
        payload: Option<Value>,
    ) -> Result<(), EngineError> {
        let entry = HistoryEntry::new(&state.flow, step, action, payload, Utc::now());
        self.repo.persist(state, &entry).await?;
        tracing::debug!(
            step,
            action = action.as_str(),
            status = state.status.as_str(),
            "state persisted"
        );
        Ok(())
    }

    /// A step advances on its own when it is a loop header, or an
    /// auto-flagged step whose conditions are all deterministic.
    fn should_auto_advance(&self, step: &StepDefinition) -> bool {
        if step.config.iterate.is_some() {
            return true;
        }
        if !step.config.auto {
            return false;
        }
        step.transitions.iter().all(|t| {
            t.condition
                .as_deref()
                .is_none_or(|c| classify(c) != ConditionKind::Cognitive)
        })
    }

    /// The three ordered resolution passes. Pure with respect to state.
    fn resolve_transitions(&self, state: &WorkflowState, step: &StepDefinition) -> Resolution {
        let ctx = expression_context(state);

        // Pass 1: deterministic conditions in declared order.
        for t in &step.transitions {
            let Some(condition) = t.condition.as_deref() else {
                continue;
            };
            match classify(condition) {
                ConditionKind::Expression => match self.evaluator.eval_bool(condition, &ctx) {
                    Ok(true) => return Resolution::Move(t.target.clone()),
                    Ok(false) => {}
                    Err(e) => {
                        tracing::warn!(
                            step = step.id.as_str(),
                            condition,
                            error = %e,
                            "defective condition treated as non-matching"
                        );
                    }
                },
                ConditionKind::EvalNode => {
                    let name = condition.trim().trim_start_matches('@');
                    match self.behaviors.run_check(name, &state.data) {
                        Some(CheckOutcome::Pass) => return Resolution::Move(t.target.clone()),
                        Some(CheckOutcome::Fail(_)) => {}
                        None => {
                            let err = EvaluationError::UnknownCheck {
                                name: name.to_string(),
                            };
                            tracing::warn!(
                                step = step.id.as_str(),
                                condition,
                                error = %err,
                                "defective condition treated as non-matching"
                            );
                        }
                    }
                }
                ConditionKind::Cognitive => {}
            }
        }

        // Pass 2: cognitive conditions suspend for external judgment.
        let candidates: Vec<JudgmentCandidate> = step
            .transitions
            .iter()
            .filter_map(|t| {
                let condition = t.condition.as_deref()?;
                (classify(condition) == ConditionKind::Cognitive).then(|| JudgmentCandidate {
                    target: t.target.clone(),
                    condition: condition.to_string(),
                })
            })
            .collect();
        if !candidates.is_empty() {
            return Resolution::Suspend(candidates);
        }

        // Pass 3: the unconditional default.
        for t in &step.transitions {
            if t.condition.is_none() {
                return Resolution::Move(t.target.clone());
            }
        }

        Resolution::NoMatch
    }

    async fn resolve_and_move(
        &self,
        state: &mut WorkflowState,
        step_id: &str,
    ) -> Result<Advance, EngineError> {
        let step = self
            .flow
            .step(step_id)
            .ok_or_else(|| EngineError::UnknownStep(step_id.to_string()))?;
        match self.resolve_transitions(state, step) {
            Resolution::Move(target) => self.advance_to(state, target).await,
            Resolution::Suspend(candidates) => {
                self.suspend_judgment(state, candidates).await
            }
            Resolution::NoMatch => Err(EngineError::NoTransitionMatched {
                step: step_id.to_string(),
            }),
        }
    }

    /// Walk the graph from `target`, expanding loop headers and chaining
    /// through auto steps, until the flow lands somewhere it must wait.
    async fn advance_to(
        &self,
        state: &mut WorkflowState,
        mut target: String,
    ) -> Result<Advance, EngineError> {
        loop {
            let step = self
                .flow
                .step(&target)
                .ok_or_else(|| self.invalid_target(&target))?;

            if step.config.iterate.is_some() {
                match self.loop_progress(state, step).await? {
                    LoopOutcome::Continue(next) => {
                        target = next;
                        continue;
                    }
                    LoopOutcome::Finished(advance) => return Ok(advance),
                }
            }

            if step.config.terminate {
                let reason = step
                    .config
                    .reason
                    .clone()
                    .unwrap_or_else(|| "workflow completed".to_string());
                state.current_step = step.id.clone();
                state.status = WorkflowStatus::Terminated;
                state.pending = None;
                self.record(state, ActionKind::Terminate, Some(json!(reason.as_str())))
                    .await?;
                tracing::info!(step = step.id.as_str(), reason = reason.as_str(), "flow terminated");
                return Ok(Advance {
                    step: step.id.clone(),
                    status: WorkflowStatus::Terminated,
                    message: format!("Workflow completed: {reason}"),
                    pending: None,
                });
            }

            state.current_step = step.id.clone();
            state.status = WorkflowStatus::Running;
            state.pending = None;
            self.record(state, ActionKind::Transition, None).await?;

            if step.config.wait {
                return self.suspend_approval(state).await;
            }

            if self.should_auto_advance(step) {
                match self.resolve_transitions(state, step) {
                    Resolution::Move(next) => {
                        target = next;
                        continue;
                    }
                    Resolution::Suspend(candidates) => {
                        return self.suspend_judgment(state, candidates).await;
                    }
                    Resolution::NoMatch => {
                        return Err(EngineError::NoTransitionMatched {
                            step: step.id.clone(),
                        })
                    }
                }
            }

            return Ok(Advance {
                step: state.current_step.clone(),
                status: WorkflowStatus::Running,
                message: format!("Advanced to: {}", state.current_step),
                pending: None,
            });
        }
    }

    async fn suspend_approval(&self, state: &mut WorkflowState) -> Result<Advance, EngineError> {
        state.status = WorkflowStatus::AwaitingJudgment;
        state.pending = Some(PendingDecision::Approval);
        let payload = serde_json::to_value(PendingDecision::Approval)
            .map_err(|e| RepositoryError::Query(e.to_string()))?;
        self.record(state, ActionKind::AwaitJudgment, Some(payload))
            .await?;
        Ok(Advance {
            step: state.current_step.clone(),
            status: WorkflowStatus::AwaitingJudgment,
            message: format!(
                "Step \"{}\" is waiting for approval. Approve to continue or reject to send it back.",
                state.current_step
            ),
            pending: state.pending.clone(),
        })
    }

    async fn suspend_judgment(
        &self,
        state: &mut WorkflowState,
        candidates: Vec<JudgmentCandidate>,
    ) -> Result<Advance, EngineError> {
        let hint = judgment_hint(&candidates);
        let pending = PendingDecision::Judgment { candidates };
        state.status = WorkflowStatus::AwaitingJudgment;
        state.pending = Some(pending.clone());
        let payload = serde_json::to_value(&pending)
            .map_err(|e| RepositoryError::Query(e.to_string()))?;
        self.record(state, ActionKind::AwaitJudgment, Some(payload))
            .await?;
        Ok(Advance {
            step: state.current_step.clone(),
            status: WorkflowStatus::AwaitingJudgment,
            message: hint,
            pending: state.pending.clone(),
        })
    }

    async fn loop_progress(
        &self,
        state: &mut WorkflowState,
        step: &StepDefinition,
    ) -> Result<LoopOutcome, EngineError> {
        let name = step.id.clone();
        let Some(body) = step.transitions.first() else {
            return Err(EngineError::NoTransitionMatched { step: name });
        };
        let body_target = body.target.clone();

        match state.loops.get(&name).copied() {
            None => {
                let expr = step.config.iterate.as_deref().unwrap_or_default();
                let ctx = expression_context(state);
                let items = self.evaluator.eval_value(expr, &ctx)?;
                let total = items.as_array().map(|a| a.len()).unwrap_or(0);
                if total == 0 {
                    return self.exit_loop(state, step, "skipped (empty)", false).await;
                }
                state
                    .loops
                    .insert(name.clone(), LoopCounter { index: 0, total });
                self.record_at(
                    state,
                    &name,
                    ActionKind::LoopEnter,
                    Some(json!({ "name": name.as_str(), "index": 0, "total": total })),
                )
                .await?;
                Ok(LoopOutcome::Continue(body_target))
            }
            Some(counter) => {
                let next = counter.index + 1;
                if next < counter.total {
                    state.loops.insert(
                        name.clone(),
                        LoopCounter {
                            index: next,
                            total: counter.total,
                        },
                    );
                    self.record_at(
                        state,
                        &name,
                        ActionKind::LoopAdvance,
                        Some(json!({ "name": name.as_str(), "index": next, "total": counter.total })),
                    )
                    .await?;
                    Ok(LoopOutcome::Continue(body_target))
                } else {
                    self.exit_loop(state, step, "completed", true).await
                }
            }
        }
    }

    async fn exit_loop(
        &self,
        state: &mut WorkflowState,
        step: &StepDefinition,
        what: &str,
        had_counter: bool,
    ) -> Result<LoopOutcome, EngineError> {
        if had_counter {
            state.loops.remove(&step.id);
            self.record_at(
                state,
                &step.id,
                ActionKind::LoopExit,
                Some(json!({ "name": step.id.as_str() })),
            )
            .await?;
        }
        if let Some(exit) = step.transitions.get(1) {
            return Ok(LoopOutcome::Continue(exit.target.clone()));
        }

        // No exit edge (the validator flags this); the loop ends the flow.
        let reason = format!("loop {what}: {}", step.id);
        state.current_step = step.id.clone();
        state.status = WorkflowStatus::Terminated;
        state.pending = None;
        self.record(state, ActionKind::Terminate, Some(json!(reason)))
            .await?;
        Ok(LoopOutcome::Finished(Advance {
            step: step.id.clone(),
            status: WorkflowStatus::Terminated,
            message: format!("Loop {what}: {}", step.id),
            pending: None,
        }))
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn judgment_hint(candidates: &[JudgmentCandidate]) -> String {
    let options = candidates
        .iter()
        .map(|c| format!("\"{}\" ({})", c.target, c.condition))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "This step has conditions that require your judgment. \
         Evaluate the situation and resolve with one of: {options}."
    )
}

fn display_path(state: &WorkflowState) -> String {
    let mut frames: Vec<(&String, &LoopCounter)> = state.loops.iter().collect();
    frames.sort_by_key(|(name, _)| name.as_str());
    let mut parts: Vec<String> = frames
        .iter()
        .map(|(name, c)| format!("{name}[{}/{}]", c.index + 1, c.total))
        .collect();
    parts.push(state.current_step.clone());
    parts.join(" > ")
}

fn format_elapsed(started_at: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let seconds = (now - started_at).num_seconds().max(0);
    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    if hours > 0 {
        format!("{hours}h{minutes:02}m")
    } else {
        format!("{minutes}m")
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
