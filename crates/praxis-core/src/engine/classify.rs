//! Transition condition classification.
//!
//! A condition's evaluation kind is a pure function of its text:
//!
//! 1. `@name`              -> `EvalNode`: a registered check function decides
//! 2. `tests_pass == true` -> `Expression`: the engine evaluates it
//! 3. `design covers all cases` -> `Cognitive`: the external collaborator decides
//!
//! Classification is total and referentially transparent; the resolver
//! re-classifies on every pass rather than caching at compile time.

/// How a transition condition is evaluated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConditionKind {
    /// Named deterministic check, resolved through the behavior registry.
    EvalNode,
    /// Boolean/comparison expression over workflow data.
    Expression,
    /// Natural-language judgment, resolved only by an external decision.
    Cognitive,
}

/// Comparison operators that mark a condition as an expression.
const COMPARISON_OPS: &[&str] = &["===", "!==", "==", "!=", ">=", "<=", ">", "<"];

/// Classify a condition string.
pub fn classify(condition: &str) -> ConditionKind {
    let c = condition.trim();
    if c.starts_with('@') {
        return ConditionKind::EvalNode;
    }
    if COMPARISON_OPS.iter().any(|op| c.contains(op)) {
        return ConditionKind::Expression;
    }
    if is_identifier_path(c) {
        return ConditionKind::Expression;
    }
    ConditionKind::Cognitive
}

/// A bare data reference: dotted identifier segments with an optional
/// trailing `[N]` index (e.g. `quality.checks[0]`).
fn is_identifier_path(text: &str) -> bool {
    let path = match text.find('[') {
        Some(open) => {
            let Some(inner) = text[open..].strip_prefix('[').and_then(|s| s.strip_suffix(']'))
            else {
                return false;
            };
            if inner.is_empty() || !inner.chars().all(|c| c.is_ascii_digit()) {
                return false;
            }
            &text[..open]
        }
        None => text,
    };
    !path.is_empty()
        && path
            .split('.')
            .all(|part| !part.is_empty() && part.chars().all(|c| c.is_alphanumeric() || c == '_'))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn at_prefix_is_eval_node() {
        assert_eq!(classify("@check_coverage"), ConditionKind::EvalNode);
        assert_eq!(classify("  @verify "), ConditionKind::EvalNode);
    }

    #[test]
    fn comparison_operators_are_expressions() {
        for condition in [
            "x == 1",
            "score >= 8",
            "result != 'fail'",
            "a===b",
            "count<10",
        ] {
            assert_eq!(classify(condition), ConditionKind::Expression, "{condition}");
        }
    }

    #[test]
    fn bare_identifier_paths_are_expressions() {
        for condition in ["tests_pass", "quality.approved", "checks[0]", "a.b.c[12]"] {
            assert_eq!(classify(condition), ConditionKind::Expression, "{condition}");
        }
    }

    #[test]
    fn natural_language_is_cognitive() {
        for condition in [
            "design covers all cases",
            "the fix looks correct",
            "needs another review pass",
        ] {
            assert_eq!(classify(condition), ConditionKind::Cognitive, "{condition}");
        }
    }

    #[test]
    fn malformed_index_paths_are_cognitive() {
        assert_eq!(classify("items[a]"), ConditionKind::Cognitive);
        assert_eq!(classify("items["), ConditionKind::Cognitive);
        assert_eq!(classify(""), ConditionKind::Cognitive);
    }

    #[test]
    fn classification_is_stable_under_repetition() {
        for condition in ["@go", "x == 1", "ship it when ready", "flag"] {
            let first = classify(condition);
            for _ in 0..3 {
                assert_eq!(classify(condition), first);
            }
        }
    }
}
