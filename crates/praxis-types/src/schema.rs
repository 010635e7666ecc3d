//! Output schema types: the expected shape of a step's submitted output.
//!
//! Schemas are opaque to the engine beyond key presence and scalar kind;
//! they exist so a step can reject structurally wrong submissions before
//! any transition resolution happens.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ---------------------------------------------------------------------------
// Field kinds
// ---------------------------------------------------------------------------

/// The expected kind of one output field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    String,
    Number,
    Boolean,
    /// A list of strings (declared as `string[]` in definitions).
    #[serde(rename = "string[]")]
    StringList,
    /// Any JSON value; only presence is checked.
    Any,
}

impl FieldKind {
    /// Whether `value` satisfies this kind.
    pub fn accepts(&self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Number => value.is_number(),
            Self::Boolean => value.is_boolean(),
            Self::StringList => value
                .as_array()
                .is_some_and(|items| items.iter().all(Value::is_string)),
            Self::Any => true,
        }
    }
}

// ---------------------------------------------------------------------------
// Schema
// ---------------------------------------------------------------------------

/// Required fields of a step's output, keyed by field name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OutputSchema {
    pub fields: BTreeMap<String, FieldKind>,
}

impl OutputSchema {
    /// Build a schema from `(name, kind)` pairs.
    pub fn of<S: Into<String>>(fields: impl IntoIterator<Item = (S, FieldKind)>) -> Self {
        Self {
            fields: fields
                .into_iter()
                .map(|(name, kind)| (name.into(), kind))
                .collect(),
        }
    }

    /// Check `data` against the schema. Returns the list of violations
    /// (missing keys and kind mismatches), empty when the shape is valid.
    pub fn violations(&self, data: &serde_json::Map<String, Value>) -> Vec<String> {
        let mut problems = Vec::new();
        for (name, kind) in &self.fields {
            match data.get(name) {
                None => problems.push(format!("missing required field '{name}'")),
                Some(value) if !kind.accepts(value) => {
                    problems.push(format!("field '{name}' has the wrong kind"))
                }
                Some(_) => {}
            }
        }
        problems
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn data(value: Value) -> serde_json::Map<String, Value> {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn accepts_matching_shape() {
        let schema = OutputSchema::of([
            ("root_cause", FieldKind::String),
            ("evidence", FieldKind::StringList),
        ]);
        let ok = data(json!({"root_cause": "race", "evidence": ["log line"]}));
        assert!(schema.violations(&ok).is_empty());
    }

    #[test]
    fn reports_missing_and_mismatched_fields() {
        let schema = OutputSchema::of([
            ("count", FieldKind::Number),
            ("summary", FieldKind::String),
        ]);
        let bad = data(json!({"count": "three"}));
        let problems = schema.violations(&bad);
        assert_eq!(problems.len(), 2);
        assert!(problems.iter().any(|p| p.contains("wrong kind")));
        assert!(problems.iter().any(|p| p.contains("missing required field")));
    }

    #[test]
    fn string_list_rejects_mixed_arrays() {
        assert!(FieldKind::StringList.accepts(&json!(["a", "b"])));
        assert!(!FieldKind::StringList.accepts(&json!(["a", 1])));
        assert!(!FieldKind::StringList.accepts(&json!("a")));
    }

    #[test]
    fn serde_uses_definition_spelling() {
        let schema: OutputSchema =
            serde_json::from_value(json!({"tags": "string[]", "done": "boolean"})).unwrap();
        assert_eq!(schema.fields["tags"], FieldKind::StringList);
        assert_eq!(schema.fields["done"], FieldKind::Boolean);
    }
}
