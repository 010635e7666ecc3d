//! JEXL expression evaluator for deterministic transition conditions.
//!
//! Wraps `jexl_eval::Evaluator` with pre-registered transforms and
//! workflow-specific plumbing: `{{name}}` placeholders are substituted
//! with stored values before evaluation, the strict `===`/`!==` operators
//! accepted by the definition surface are normalized to `==`/`!=`, and
//! results are coerced to boolean with JavaScript-like truthiness.
//!
//! Workflow data is always passed as a context object, never interpolated
//! into expression strings (placeholders substitute as JSON literals).

use praxis_types::state::WorkflowState;
use serde_json::{json, Map, Value};

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors raised while evaluating a deterministic condition. The resolver
/// treats these as "condition did not match" and logs the condition as
/// defective; they never abort resolution.
#[derive(Debug, thiserror::Error)]
pub enum EvaluationError {
    #[error("condition '{condition}' failed to evaluate: {reason}")]
    Eval { condition: String, reason: String },

    #[error("unknown check '@{name}'")]
    UnknownCheck { name: String },

    #[error("invalid context: {0}")]
    InvalidContext(String),
}

// ---------------------------------------------------------------------------
// ConditionEvaluator
// ---------------------------------------------------------------------------

/// JEXL expression evaluator with standard transforms pre-registered.
pub struct ConditionEvaluator {
    evaluator: jexl_eval::Evaluator<'static>,
}

impl ConditionEvaluator {
    /// Create a new evaluator with all standard transforms registered.
    pub fn new() -> Self {
        let evaluator = jexl_eval::Evaluator::new()
            .with_transform("length", |args: &[Value]| {
                let val = args.first().cloned().unwrap_or(Value::Null);
                let len = match &val {
                    Value::String(s) => s.len(),
                    Value::Array(a) => a.len(),
                    Value::Object(o) => o.len(),
                    _ => 0,
                };
                Ok(json!(len as f64))
            })
            .with_transform("contains", |args: &[Value]| {
                let subject = args.first().and_then(|v| v.as_str()).unwrap_or("");
                let search = args.get(1).and_then(|v| v.as_str()).unwrap_or("");
                Ok(json!(subject.contains(search)))
            })
            .with_transform("not", |args: &[Value]| {
                let val = args.first().cloned().unwrap_or(Value::Null);
                Ok(json!(!value_to_bool(&val)))
            });

        Self { evaluator }
    }

    /// Evaluate an expression and return the raw JSON value.
    pub fn eval_value(&self, expression: &str, context: &Value) -> Result<Value, EvaluationError> {
        if !context.is_object() {
            return Err(EvaluationError::InvalidContext(
                "context must be a JSON object".to_string(),
            ));
        }
        let prepared = prepare(expression, context);
        self.evaluator
            .eval_in_context(&prepared, context)
            .map_err(|e| EvaluationError::Eval {
                condition: expression.to_string(),
                reason: e.to_string(),
            })
    }

    /// Evaluate an expression to a boolean, coercing with JS-like truthiness.
    pub fn eval_bool(&self, expression: &str, context: &Value) -> Result<bool, EvaluationError> {
        let result = self.eval_value(expression, context)?;
        Ok(value_to_bool(&result))
    }
}

impl Default for ConditionEvaluator {
    fn default() -> Self {
        Self::new()
    }
}

/// Substitute `{{name}}` placeholders and normalize strict operators.
fn prepare(expression: &str, context: &Value) -> String {
    let substituted = substitute_placeholders(expression, context);
    substituted.replace("===", "==").replace("!==", "!=")
}

/// Coerce a JSON value to boolean using JavaScript-like truthiness.
pub fn value_to_bool(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Null => false,
        Value::Number(n) => n.as_f64().unwrap_or(0.0) != 0.0,
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

// ---------------------------------------------------------------------------
// Placeholder substitution
// ---------------------------------------------------------------------------

/// Replace `{{path}}` markers with JSON literals resolved from the context.
///
/// Unresolvable references are left as-is; the subsequent JEXL parse then
/// fails with a typed `EvaluationError` identifying the condition.
fn substitute_placeholders(text: &str, context: &Value) -> String {
    let mut result = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(open) = rest.find("{{") {
        let Some(close) = rest[open + 2..].find("}}") else {
            break;
        };
        let path = rest[open + 2..open + 2 + close].trim();
        result.push_str(&rest[..open]);
        match resolve_path(path, context) {
            Some(value) => {
                result.push_str(&serde_json::to_string(value).unwrap_or_default())
            }
            None => {
                result.push_str("{{");
                result.push_str(path);
                result.push_str("}}");
            }
        }
        rest = &rest[open + 2 + close + 2..];
    }
    result.push_str(rest);
    result
}

/// Resolve a dotted path with optional `[N]` indexes against a JSON value.
fn resolve_path<'a>(path: &str, context: &'a Value) -> Option<&'a Value> {
    let mut current = context;
    for part in path.split('.') {
        let (field, index) = match part.find('[') {
            Some(open) if part.ends_with(']') => {
                let idx: usize = part[open + 1..part.len() - 1].parse().ok()?;
                (&part[..open], Some(idx))
            }
            _ => (part, None),
        };
        current = current.get(field)?;
        if let Some(idx) = index {
            current = current.get(idx)?;
        }
    }
    Some(current)
}

// ---------------------------------------------------------------------------
// Expression context
// ---------------------------------------------------------------------------

/// Build the JSON object that conditions evaluate against.
///
/// Shape:
/// - keys of every step's submitted output map, merged at the top level
/// - scalar/array seed data under its own key
/// - each step's full output map under `steps.<id>`
/// - each live loop counter's current index under the dimension name,
///   plus `{i, n}` under `loops.<name>`
pub fn expression_context(state: &WorkflowState) -> Value {
    let mut root = Map::new();
    let mut steps = Map::new();

    for (key, value) in &state.data {
        if let Value::Object(fields) = value {
            for (k, v) in fields {
                root.insert(k.clone(), v.clone());
            }
            steps.insert(key.clone(), value.clone());
        } else {
            root.insert(key.clone(), value.clone());
        }
    }

    let mut loops = Map::new();
    for (name, counter) in &state.loops {
        root.insert(name.clone(), json!(counter.index));
        loops.insert(name.clone(), json!({ "i": counter.index, "n": counter.total }));
    }

    root.insert("steps".to_string(), Value::Object(steps));
    root.insert("loops".to_string(), Value::Object(loops));
    // JEXL numeric literals parse as floats; level the context so integer
    // data compares equal to them.
    level_numbers(Value::Object(root))
}

fn level_numbers(value: Value) -> Value {
    match value {
        Value::Number(n) => serde_json::Number::from_f64(n.as_f64().unwrap_or(0.0))
            .map(Value::Number)
            .unwrap_or(Value::Null),
        Value::Array(items) => Value::Array(items.into_iter().map(level_numbers).collect()),
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| (k, level_numbers(v)))
                .collect(),
        ),
        other => other,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use praxis_types::state::LoopCounter;

    fn evaluator() -> ConditionEvaluator {
        ConditionEvaluator::new()
    }

    // -------------------------------------------------------------------
    // Comparison and boolean operators
    // -------------------------------------------------------------------

    #[test]
    fn comparison_operators() {
        let ctx = json!({ "x": 1.0, "result": "pass" });
        let eval = evaluator();
        assert!(eval.eval_bool("x == 1", &ctx).unwrap());
        assert!(!eval.eval_bool("x == 2", &ctx).unwrap());
        assert!(eval.eval_bool("result == 'pass'", &ctx).unwrap());
        assert!(eval.eval_bool("x >= 1 && result != 'fail'", &ctx).unwrap());
    }

    #[test]
    fn strict_operators_are_normalized() {
        let ctx = json!({ "x": 1.0 });
        let eval = evaluator();
        assert!(eval.eval_bool("x === 1", &ctx).unwrap());
        assert!(eval.eval_bool("x !== 2", &ctx).unwrap());
    }

    // -------------------------------------------------------------------
    // Truthiness coercion
    // -------------------------------------------------------------------

    #[test]
    fn bare_references_coerce_to_truthiness() {
        let eval = evaluator();
        assert!(eval.eval_bool("flag", &json!({ "flag": true })).unwrap());
        assert!(!eval.eval_bool("flag", &json!({ "flag": false })).unwrap());
        assert!(!eval.eval_bool("name", &json!({ "name": "" })).unwrap());
        assert!(eval.eval_bool("name", &json!({ "name": "x" })).unwrap());
        assert!(!eval.eval_bool("count", &json!({ "count": 0.0 })).unwrap());
    }

    #[test]
    fn missing_reference_is_falsy_not_an_error() {
        let eval = evaluator();
        assert!(!eval.eval_bool("ghost", &json!({ "x": 1 })).unwrap());
    }

    // -------------------------------------------------------------------
    // Placeholder substitution
    // -------------------------------------------------------------------

    #[test]
    fn placeholders_substitute_as_json_literals() {
        let ctx = json!({ "phase": "green", "count": 3.0 });
        let eval = evaluator();
        assert!(eval.eval_bool("{{phase}} == 'green'", &ctx).unwrap());
        assert!(eval.eval_bool("{{count}} > 2", &ctx).unwrap());
    }

    #[test]
    fn nested_placeholder_paths_resolve() {
        let ctx = json!({ "review": { "scores": [7.0, 9.0] } });
        let eval = evaluator();
        assert!(eval.eval_bool("{{review.scores[1]}} >= 8", &ctx).unwrap());
    }

    #[test]
    fn unresolved_placeholder_is_a_typed_error() {
        let eval = evaluator();
        let err = eval
            .eval_bool("{{missing}} == 1", &json!({ "x": 1 }))
            .unwrap_err();
        match err {
            EvaluationError::Eval { condition, .. } => {
                assert!(condition.contains("missing"));
            }
            other => panic!("expected Eval error, got {other:?}"),
        }
    }

    // -------------------------------------------------------------------
    // Transforms
    // -------------------------------------------------------------------

    #[test]
    fn transforms_are_registered() {
        let ctx = json!({ "items": ["a", "b", "c"], "msg": "all tests pass" });
        let eval = evaluator();
        assert!(eval.eval_bool("items|length > 2", &ctx).unwrap());
        assert!(eval.eval_bool("msg|contains('pass')", &ctx).unwrap());
        assert!(eval.eval_bool("(items|length > 9)|not", &ctx).unwrap());
    }

    // -------------------------------------------------------------------
    // Error cases
    // -------------------------------------------------------------------

    #[test]
    fn malformed_expression_is_a_typed_error() {
        let eval = evaluator();
        let err = eval.eval_bool("x ==", &json!({ "x": 1 })).unwrap_err();
        assert!(matches!(err, EvaluationError::Eval { .. }));
    }

    #[test]
    fn non_object_context_is_rejected() {
        let eval = evaluator();
        assert!(matches!(
            eval.eval_bool("true", &json!("nope")),
            Err(EvaluationError::InvalidContext(_))
        ));
    }

    // -------------------------------------------------------------------
    // Workflow context shape
    // -------------------------------------------------------------------

    #[test]
    fn context_flattens_step_output_and_keeps_step_maps() {
        let mut state = WorkflowState::new("demo", "gate", Map::new(), Utc::now());
        state
            .data
            .insert("features".to_string(), json!(["a", "b"]));
        state
            .data
            .insert("build".to_string(), json!({ "tests_pass": true }));

        let ctx = expression_context(&state);
        assert_eq!(ctx["tests_pass"], json!(true));
        assert_eq!(ctx["features"], json!(["a", "b"]));
        assert_eq!(ctx["steps"]["build"]["tests_pass"], json!(true));

        let eval = evaluator();
        assert!(eval.eval_bool("tests_pass == true", &ctx).unwrap());
    }

    #[test]
    fn context_exposes_loop_counters() {
        let mut state = WorkflowState::new("demo", "loop", Map::new(), Utc::now());
        state
            .loops
            .insert("features".to_string(), LoopCounter { index: 2, total: 5 });

        let ctx = expression_context(&state);
        assert_eq!(ctx["features"], json!(2.0));
        assert_eq!(ctx["loops"]["features"]["n"], json!(5.0));
    }
}
