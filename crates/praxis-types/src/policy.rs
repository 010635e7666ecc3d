//! Edit policy types: per-step rules classifying file modifications.
//!
//! A policy is a default decision plus an ordered list of glob-pattern
//! rules. Matching lives in `praxis-core::engine::policy`; these are the
//! data shapes carried on a step's registered behavior and handed to the
//! external file-edit interceptor.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Decisions
// ---------------------------------------------------------------------------

/// How a candidate file modification is classified.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyDecision {
    /// Allowed without comment.
    #[default]
    Silent,
    /// Allowed, but the interceptor should surface a warning.
    Warn,
    /// Rejected.
    Block,
}

impl PolicyDecision {
    /// Stable string form, matching the serde representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Silent => "silent",
            Self::Warn => "warn",
            Self::Block => "block",
        }
    }
}

// ---------------------------------------------------------------------------
// Policy
// ---------------------------------------------------------------------------

/// One glob-pattern rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyRule {
    /// Glob pattern matched against the candidate path (e.g. `src/**/*.rs`).
    pub pattern: String,
    /// Decision applied when the pattern matches.
    pub decision: PolicyDecision,
}

/// A step's edit policy: ordered rules, first match wins, otherwise the
/// default decision applies.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditPolicy {
    /// Decision when no rule matches.
    #[serde(default)]
    pub default: PolicyDecision,
    /// Rules in priority order.
    #[serde(default)]
    pub rules: Vec<PolicyRule>,
}

impl EditPolicy {
    /// A policy that blocks everything except the given patterns.
    pub fn allow_only<S: Into<String>>(patterns: impl IntoIterator<Item = S>) -> Self {
        Self {
            default: PolicyDecision::Block,
            rules: patterns
                .into_iter()
                .map(|p| PolicyRule {
                    pattern: p.into(),
                    decision: PolicyDecision::Silent,
                })
                .collect(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policy_is_silent() {
        let policy = EditPolicy::default();
        assert_eq!(policy.default, PolicyDecision::Silent);
        assert!(policy.rules.is_empty());
    }

    #[test]
    fn allow_only_blocks_by_default() {
        let policy = EditPolicy::allow_only(["docs/**", "*.md"]);
        assert_eq!(policy.default, PolicyDecision::Block);
        assert_eq!(policy.rules.len(), 2);
        assert_eq!(policy.rules[0].decision, PolicyDecision::Silent);
    }

    #[test]
    fn decision_serde_is_snake_case() {
        assert_eq!(
            serde_json::to_string(&PolicyDecision::Warn).unwrap(),
            "\"warn\""
        );
        assert_eq!(PolicyDecision::Block.as_str(), "block");
    }
}
