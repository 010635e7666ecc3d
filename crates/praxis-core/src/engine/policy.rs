//! Edit-policy matching: classify a candidate file modification against
//! the current step's policy.
//!
//! Rules are evaluated in declared order and the first matching glob wins;
//! when nothing matches, the policy's default applies. Pure function, no
//! persisted state -- the external file-edit interceptor queries this with
//! policy data carried on the current step's behavior.

use glob::Pattern;
use praxis_types::policy::{EditPolicy, PolicyDecision};

/// Classify `path` under `policy`.
pub fn evaluate_edit(policy: &EditPolicy, path: &str) -> PolicyDecision {
    for rule in &policy.rules {
        match Pattern::new(&rule.pattern) {
            Ok(pattern) => {
                if pattern.matches(path) {
                    return rule.decision;
                }
            }
            Err(e) => {
                tracing::warn!(
                    pattern = rule.pattern.as_str(),
                    error = %e,
                    "skipping unparseable edit-policy pattern"
                );
            }
        }
    }
    policy.default
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
