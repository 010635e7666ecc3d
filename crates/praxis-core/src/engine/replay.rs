//! Deterministic history replay.
//!
//! Folding the persisted history over an empty initial state reproduces
//! the exact final `WorkflowState`. This is the crash-recovery contract:
//! every engine mutation records a history entry carrying enough payload
//! to reconstruct it, so a store that survives only the history can still
//! recover the state, and an intact state record can be audited against
//! its history.

use praxis_types::state::{
    ActionKind, HistoryEntry, LoopCounter, PendingDecision, WorkflowState, WorkflowStatus,
};
use serde_json::Value;
use thiserror::Error;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors raised while replaying a history.
#[derive(Debug, Error)]
pub enum ReplayError {
    /// The first non-restore entry is not a `start`.
    #[error("history does not begin with a start entry")]
    MissingStart,

    /// An entry's payload does not decode to what its action requires.
    #[error("entry {seq} ({action}) has a malformed payload: {reason}")]
    BadPayload {
        seq: i64,
        action: &'static str,
        reason: String,
    },
}

fn bad_payload(entry: &HistoryEntry, reason: impl Into<String>) -> ReplayError {
    ReplayError::BadPayload {
        seq: entry.seq,
        action: entry.action.as_str(),
        reason: reason.into(),
    }
}

// ---------------------------------------------------------------------------
// Replay
// ---------------------------------------------------------------------------

/// Fold `entries` (oldest first) into the state they produce. Returns
/// `None` for an empty history.
pub fn replay_history(entries: &[HistoryEntry]) -> Result<Option<WorkflowState>, ReplayError> {
    let mut state: Option<WorkflowState> = None;

    for entry in entries {
        match entry.action {
            ActionKind::Start => {
                let seed = match &entry.payload {
                    Some(Value::Object(map)) => map.clone(),
                    None => serde_json::Map::new(),
                    Some(_) => return Err(bad_payload(entry, "seed data must be an object")),
                };
                state = Some(WorkflowState::new(
                    &entry.flow,
                    &entry.step,
                    seed,
                    entry.recorded_at,
                ));
            }
            ActionKind::Restore => {
                let snapshot = entry
                    .payload
                    .clone()
                    .ok_or_else(|| bad_payload(entry, "missing snapshot"))?;
                let restored: WorkflowState = serde_json::from_value(snapshot)
                    .map_err(|e| bad_payload(entry, e.to_string()))?;
                state = Some(restored);
            }
            _ => {
                let current = state.as_mut().ok_or(ReplayError::MissingStart)?;
                apply(current, entry)?;
            }
        }
    }

    Ok(state)
}

/// Apply one non-start entry to a live state.
fn apply(state: &mut WorkflowState, entry: &HistoryEntry) -> Result<(), ReplayError> {
    match entry.action {
        ActionKind::Submit => {
            let Some(data @ Value::Object(_)) = entry.payload.clone() else {
                return Err(bad_payload(entry, "submitted data must be an object"));
            };
            state.data.insert(entry.step.clone(), data);
        }
        ActionKind::Transition | ActionKind::Goto | ActionKind::Back => {
            state.current_step = entry.step.clone();
            state.status = WorkflowStatus::Running;
            state.pending = None;
        }
        ActionKind::AwaitJudgment => {
            let pending: PendingDecision = entry
                .payload
                .clone()
                .ok_or_else(|| bad_payload(entry, "missing pending decision"))
                .and_then(|p| {
                    serde_json::from_value(p).map_err(|e| bad_payload(entry, e.to_string()))
                })?;
            state.status = WorkflowStatus::AwaitingJudgment;
            state.pending = Some(pending);
        }
        ActionKind::Judgment | ActionKind::Approve | ActionKind::Skip => {
            state.status = WorkflowStatus::Running;
            state.pending = None;
        }
        ActionKind::Reject => {
            // The rejection is recorded; the suspension stands.
        }
        ActionKind::Retry => {
            state.data.remove(&entry.step);
            state.status = WorkflowStatus::Running;
            state.pending = None;
        }
        ActionKind::Stop => {
            state.status = WorkflowStatus::Stopped;
        }
        ActionKind::Resume => {
            state.status = if state.pending.is_some() {
                WorkflowStatus::AwaitingJudgment
            } else {
                WorkflowStatus::Running
            };
        }
        ActionKind::Terminate => {
            state.current_step = entry.step.clone();
            state.status = WorkflowStatus::Terminated;
            state.pending = None;
        }
        ActionKind::LoopEnter | ActionKind::LoopAdvance => {
            let (name, counter) = loop_payload(entry)?;
            state.loops.insert(name, counter);
        }
        ActionKind::LoopExit => {
            let name = entry
                .payload
                .as_ref()
                .and_then(|p| p.get("name"))
                .and_then(Value::as_str)
                .ok_or_else(|| bad_payload(entry, "missing loop name"))?;
            state.loops.remove(name);
        }
        ActionKind::Start | ActionKind::Restore => unreachable!("handled by caller"),
    }
    Ok(())
}

fn loop_payload(entry: &HistoryEntry) -> Result<(String, LoopCounter), ReplayError> {
    let payload = entry
        .payload
        .as_ref()
        .ok_or_else(|| bad_payload(entry, "missing loop counter"))?;
    let name = payload
        .get("name")
        .and_then(Value::as_str)
        .ok_or_else(|| bad_payload(entry, "missing loop name"))?;
    let index = payload
        .get("index")
        .and_then(Value::as_u64)
        .ok_or_else(|| bad_payload(entry, "missing loop index"))?;
    let total = payload
        .get("total")
        .and_then(Value::as_u64)
        .ok_or_else(|| bad_payload(entry, "missing loop total"))?;
    Ok((
        name.to_string(),
        LoopCounter {
            index: index as usize,
            total: total as usize,
        },
    ))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
