//! Bilingual YAML parsing into the `FlowDefinition` IR.
//!
//! Flow files may use either of two keyword vocabularies; a static lookup
//! table maps every accepted token to one canonical token in a single
//! normalization pass before graph construction. The parser handles shape
//! only -- semantic analysis (reachability, dangling targets) belongs to
//! the validator.
//!
//! Step sugar lowered here:
//! - sibling order induces an implicit default transition to the next step
//! - `loop`/`branch` children are flattened into ordinary steps
//! - `assert`, `jump`, `wait`, and `terminate` bodies become config flags
//!   plus the equivalent explicit transitions

use std::collections::{HashMap, HashSet};

use praxis_types::flow::{FlowDefinition, StepConfig, StepDefinition, Transition};
use serde_json::{Map, Value};
use thiserror::Error;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors raised while compiling a flow definition. All are fatal at load
/// time; nothing executes against a definition that failed to compile.
#[derive(Debug, Error)]
pub enum CompileError {
    /// The document is not parseable YAML.
    #[error("invalid YAML: {0}")]
    Yaml(String),

    /// The top level is not a mapping.
    #[error("invalid flow: expected a mapping at the top level")]
    NotAMapping,

    /// The `steps` list is missing or not a list.
    #[error("invalid flow: missing \"steps\" list")]
    MissingSteps,

    /// Two steps (anywhere in the tree) share a name.
    #[error("duplicate step names: {0}")]
    DuplicateSteps(String),

    /// A step body has a malformed key.
    #[error("step '{step}': key '{key}' {problem}")]
    InvalidStep {
        step: String,
        key: String,
        problem: String,
    },
}

impl CompileError {
    fn invalid(step: &str, key: &str, problem: impl Into<String>) -> Self {
        Self::InvalidStep {
            step: step.to_string(),
            key: key.to_string(),
            problem: problem.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Keyword normalization
// ---------------------------------------------------------------------------

/// Accepted keyword translations, mapped to the canonical vocabulary.
const KEYWORD_MAP: &[(&str, &str)] = &[
    ("步骤", "steps"),
    ("名称", "name"),
    ("描述", "description"),
    ("分支", "branch"),
    ("如果", "if"),
    ("否则", "else"),
    ("循环", "loop"),
    ("遍历", "iterate"),
    ("等待", "wait"),
    ("跳转", "jump"),
    ("断言", "assert"),
    ("条件", "condition"),
    ("终止", "terminate"),
    ("目标", "target"),
    ("原因", "reason"),
    ("子步骤", "children"),
    ("类型", "type"),
    ("配置", "config"),
    ("失败跳转", "onFail"),
    ("重试", "retry"),
    ("次数", "count"),
    ("下一步", "next"),
    ("去", "go"),
];

fn canonical_key(key: &str) -> &str {
    KEYWORD_MAP
        .iter()
        .find(|(alias, _)| *alias == key)
        .map(|(_, canon)| *canon)
        .unwrap_or(key)
}

/// Recursively rewrite mapping keys to the canonical vocabulary.
fn normalize(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| (canonical_key(&k).to_string(), normalize(v)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.into_iter().map(normalize).collect()),
        other => other,
    }
}

// ---------------------------------------------------------------------------
// Step shape
// ---------------------------------------------------------------------------

/// Keys consumed by the parser, not forwarded into `config.extra`.
const CONSUMED_KEYS: &[&str] = &[
    "steps",
    "children",
    "name",
    "type",
    "next",
    "if",
    "else",
    "condition",
    "onFail",
    "target",
    "iterate",
    "go",
    "assert",
    "wait",
    "jump",
    "terminate",
    "branch",
    "reason",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StepKind {
    Task,
    Branch,
    Loop,
    Wait,
    Jump,
    Assert,
    Terminate,
}

/// Infer a step's kind from its body, unless declared via `type`.
fn infer_step_kind(name: &str, body: &Map<String, Value>) -> Result<StepKind, CompileError> {
    if let Some(declared) = body.get("type") {
        let kind = declared
            .as_str()
            .ok_or_else(|| CompileError::invalid(name, "type", "must be a string"))?;
        return match kind {
            "task" => Ok(StepKind::Task),
            "branch" => Ok(StepKind::Branch),
            "loop" => Ok(StepKind::Loop),
            "wait" => Ok(StepKind::Wait),
            "jump" => Ok(StepKind::Jump),
            "assert" => Ok(StepKind::Assert),
            "terminate" => Ok(StepKind::Terminate),
            other => Err(CompileError::invalid(
                name,
                "type",
                format!("names an unknown step type '{other}'"),
            )),
        };
    }

    let has = |k: &str| body.contains_key(k);
    if has("branch") || (has("if") && !has("children") && !has("steps")) {
        Ok(StepKind::Branch)
    } else if has("loop") || has("iterate") {
        Ok(StepKind::Loop)
    } else if has("wait") {
        Ok(StepKind::Wait)
    } else if has("jump") || (has("target") && !has("condition")) {
        Ok(StepKind::Jump)
    } else if has("assert") || has("condition") {
        Ok(StepKind::Assert)
    } else if has("terminate") {
        Ok(StepKind::Terminate)
    } else {
        Ok(StepKind::Task)
    }
}

/// Split one raw step into `(name, body)`.
///
/// Accepted shapes: a bare string (task with no body), a mapping with a
/// `name` key, or a single-entry mapping `{name: body}` where the body is
/// a mapping or null.
fn parse_raw_step(raw: &Value) -> Result<(String, Map<String, Value>), CompileError> {
    match raw {
        Value::String(name) => Ok((name.clone(), Map::new())),
        Value::Object(map) => {
            if let Some(name) = map.get("name") {
                let name = name
                    .as_str()
                    .ok_or_else(|| CompileError::invalid("?", "name", "must be a string"))?;
                return Ok((name.to_string(), map.clone()));
            }
            if map.len() == 1 {
                if let Some((name, body)) = map.iter().next() {
                    return match body {
                        Value::Null => Ok((name.clone(), Map::new())),
                        Value::Object(body) => Ok((name.clone(), body.clone())),
                        _ => Err(CompileError::invalid(
                            name,
                            name,
                            "step body must be a mapping or null",
                        )),
                    };
                }
            }
            let hint = map.keys().next().cloned().unwrap_or_default();
            Err(CompileError::invalid(
                &hint,
                "name",
                "step mapping needs a 'name' key or a single name-to-body entry",
            ))
        }
        _ => Err(CompileError::invalid(
            "?",
            "steps",
            "each step must be a string or a mapping",
        )),
    }
}

fn string_key<'a>(
    name: &str,
    body: &'a Map<String, Value>,
    key: &str,
) -> Result<Option<&'a str>, CompileError> {
    match body.get(key) {
        None => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.as_str())),
        Some(_) => Err(CompileError::invalid(name, key, "must be a string")),
    }
}

/// The child step list of a loop/branch body, if any.
fn child_steps<'a>(
    name: &str,
    body: &'a Map<String, Value>,
) -> Result<&'a [Value], CompileError> {
    for key in ["steps", "children"] {
        match body.get(key) {
            None => continue,
            Some(Value::Array(items)) if items.is_empty() => continue,
            Some(Value::Array(items)) => return Ok(items),
            Some(_) => return Err(CompileError::invalid(name, key, "must be a list of steps")),
        }
    }
    Ok(&[])
}

// ---------------------------------------------------------------------------
// Graph construction
// ---------------------------------------------------------------------------

struct FlowBuilder {
    order: Vec<String>,
    steps: HashMap<String, StepDefinition>,
}

impl FlowBuilder {
    /// Flatten `raw_steps` into the step map, threading the implicit
    /// fall-through target (`next_after`) through sibling order and into
    /// child subgraphs.
    fn process(
        &mut self,
        raw_steps: &[Value],
        next_after: Option<&str>,
        parent_loop: Option<&str>,
    ) -> Result<(), CompileError> {
        let parsed = raw_steps
            .iter()
            .map(parse_raw_step)
            .collect::<Result<Vec<_>, _>>()?;

        for (idx, (name, body)) in parsed.iter().enumerate() {
            let implicit_next = parsed
                .get(idx + 1)
                .map(|(next_name, _)| next_name.as_str())
                .or(next_after);
            let kind = infer_step_kind(name, body)?;
            let children = child_steps(name, body)?;
            let mut config = StepConfig {
                parent: parent_loop.map(String::from),
                ..StepConfig::default()
            };
            let mut transitions = Vec::new();

            self.order.push(name.clone());

            if kind == StepKind::Wait {
                config.wait = true;
            }
            if kind == StepKind::Terminate {
                config.terminate = true;
                config.reason = string_key(name, body, "reason")?.map(String::from);
            }

            // Transition priority: loop/branch children > explicit next >
            // kind-specific sugar > implicit sibling fall-through.
            match kind {
                StepKind::Loop if !children.is_empty() => {
                    config.iterate = string_key(name, body, "iterate")?.map(String::from);
                    self.process(children, Some(name.as_str()), Some(name.as_str()))?;
                    let (first_child, _) = parse_raw_step(&children[0])?;
                    transitions.push(Transition::to(first_child));
                    if let Some(next) = implicit_next {
                        transitions.push(Transition::to(next));
                    }
                }
                StepKind::Branch if !children.is_empty() => {
                    config.auto = true;
                    let condition = string_key(name, body, "if")?
                        .or(string_key(name, body, "condition")?);
                    self.process(children, implicit_next, parent_loop)?;
                    let (first_child, _) = parse_raw_step(&children[0])?;
                    match condition {
                        Some(cond) => transitions.push(Transition::when(cond, first_child)),
                        None => transitions.push(Transition::to(first_child)),
                    }
                    if let Some(next) = implicit_next {
                        transitions.push(Transition::to(next));
                    }
                }
                _ if body.contains_key("next") => {
                    parse_explicit_transitions(name, &body["next"], &mut transitions)?;
                }
                StepKind::Terminate => {}
                StepKind::Assert => {
                    config.auto = true;
                    let condition = string_key(name, body, "condition")?
                        .or(string_key(name, body, "assert")?);
                    let fail_target = string_key(name, body, "onFail")?
                        .or(string_key(name, body, "target")?);
                    match condition {
                        Some(cond) => {
                            if let Some(next) = implicit_next {
                                transitions.push(Transition::when(cond, next));
                            }
                            if let Some(fail) = fail_target {
                                transitions.push(Transition::to(fail));
                            }
                        }
                        None => {
                            if let Some(next) = implicit_next {
                                transitions.push(Transition::to(next));
                            }
                        }
                    }
                }
                StepKind::Jump => {
                    config.auto = true;
                    if let Some(target) = string_key(name, body, "target")? {
                        transitions.push(Transition::to(target));
                    }
                }
                _ => {
                    if let Some(next) = implicit_next {
                        transitions.push(Transition::to(next));
                    }
                }
            }

            // Forward unrecognized keys opaquely.
            for (key, value) in body {
                if !CONSUMED_KEYS.contains(&key.as_str()) {
                    config.extra.insert(key.clone(), value.clone());
                }
            }

            self.steps.insert(
                name.clone(),
                StepDefinition {
                    id: name.clone(),
                    transitions,
                    config,
                },
            );
        }

        Ok(())
    }
}

/// Lower an explicit `next:` value into transitions.
fn parse_explicit_transitions(
    step: &str,
    next_def: &Value,
    transitions: &mut Vec<Transition>,
) -> Result<(), CompileError> {
    match next_def {
        Value::String(target) => transitions.push(Transition::to(target.clone())),
        Value::Array(items) => {
            for item in items {
                match item {
                    Value::String(target) => transitions.push(Transition::to(target.clone())),
                    Value::Object(rule) => {
                        let condition = rule
                            .get("if")
                            .or_else(|| rule.get("condition"))
                            .and_then(Value::as_str);
                        let target = rule
                            .get("go")
                            .or_else(|| rule.get("target"))
                            .and_then(Value::as_str)
                            .ok_or_else(|| {
                                CompileError::invalid(step, "next", "rule is missing a target")
                            })?;
                        transitions.push(Transition {
                            target: target.to_string(),
                            condition: condition.map(String::from),
                        });
                    }
                    _ => {
                        return Err(CompileError::invalid(
                            step,
                            "next",
                            "entries must be step names or {if, go} rules",
                        ))
                    }
                }
            }
        }
        _ => {
            return Err(CompileError::invalid(
                step,
                "next",
                "must be a step name or a list",
            ))
        }
    }
    Ok(())
}

/// Recursively collect all step names for duplicate detection.
fn collect_names(raw_steps: &[Value], names: &mut Vec<String>) -> Result<(), CompileError> {
    for raw in raw_steps {
        let (name, body) = parse_raw_step(raw)?;
        let children = child_steps(&name, &body)?.to_vec();
        names.push(name);
        collect_names(&children, names)?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

/// Compile a YAML flow document (in either keyword vocabulary) into a
/// `FlowDefinition`.
pub fn parse_flow_yaml(content: &str) -> Result<FlowDefinition, CompileError> {
    let raw: Value =
        serde_yaml_ng::from_str(content).map_err(|e| CompileError::Yaml(e.to_string()))?;
    let Value::Object(doc) = normalize(raw) else {
        return Err(CompileError::NotAMapping);
    };

    let name = match doc.get("name") {
        None => "unnamed flow".to_string(),
        Some(Value::String(s)) => s.clone(),
        Some(_) => return Err(CompileError::invalid("flow", "name", "must be a string")),
    };
    let description = doc
        .get("description")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    let raw_steps = match doc.get("steps") {
        Some(Value::Array(items)) => items.as_slice(),
        _ => return Err(CompileError::MissingSteps),
    };

    // Duplicate names break the id->step mapping; reject before flattening.
    let mut names = Vec::new();
    collect_names(raw_steps, &mut names)?;
    let mut seen = HashSet::new();
    let mut dupes: Vec<&str> = Vec::new();
    for n in &names {
        if !seen.insert(n.as_str()) && !dupes.contains(&n.as_str()) {
            dupes.push(n);
        }
    }
    if !dupes.is_empty() {
        return Err(CompileError::DuplicateSteps(dupes.join(", ")));
    }

    let mut builder = FlowBuilder {
        order: Vec::new(),
        steps: HashMap::new(),
    };
    builder.process(raw_steps, None, None)?;

    Ok(FlowDefinition {
        name,
        description,
        order: builder.order,
        steps: builder.steps,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_strings_chain_in_declaration_order() {
        let flow = parse_flow_yaml(
            r#"
name: linear
steps:
  - gather
  - design
  - build
"#,
        )
        .unwrap();

        assert_eq!(flow.order, vec!["gather", "design", "build"]);
        assert_eq!(flow.entry(), Some("gather"));
        assert_eq!(
            flow.steps["gather"].transitions,
            vec![Transition::to("design")]
        );
        assert_eq!(
            flow.steps["design"].transitions,
            vec![Transition::to("build")]
        );
        assert!(flow.steps["build"].transitions.is_empty());
    }

    #[test]
    fn explicit_next_preserves_priority_order() {
        let flow = parse_flow_yaml(
            r#"
name: branching
steps:
  - review:
      next:
        - if: score >= 8
          go: ship
        - if: design needs another pass
          go: design
        - go: rework
  - design
  - rework
  - ship:
      terminate: true
"#,
        )
        .unwrap();

        let ts = &flow.steps["review"].transitions;
        assert_eq!(ts.len(), 3);
        assert_eq!(ts[0], Transition::when("score >= 8", "ship"));
        assert_eq!(ts[1], Transition::when("design needs another pass", "design"));
        assert_eq!(ts[2], Transition::to("rework"));
    }

    #[test]
    fn loop_children_flatten_with_loop_back_edge() {
        let flow = parse_flow_yaml(
            r#"
name: looped
steps:
  - plan
  - features:
      iterate: feature_list
      children:
        - red
        - green
  - wrap_up:
      terminate: true
      reason: all features done
"#,
        )
        .unwrap();

        assert_eq!(flow.order, vec!["plan", "features", "red", "green", "wrap_up"]);
        let header = &flow.steps["features"];
        assert_eq!(header.config.iterate.as_deref(), Some("feature_list"));
        // transitions[0] enters the body, transitions[1] exits the loop
        assert_eq!(header.transitions[0], Transition::to("red"));
        assert_eq!(header.transitions[1], Transition::to("wrap_up"));
        // last child falls through back to the loop header
        assert_eq!(
            flow.steps["green"].transitions,
            vec![Transition::to("features")]
        );
        assert_eq!(flow.steps["red"].config.parent.as_deref(), Some("features"));
    }

    #[test]
    fn assert_sugar_produces_guarded_pair() {
        let flow = parse_flow_yaml(
            r#"
name: checked
steps:
  - build
  - gate:
      assert: tests_pass == true
      onFail: build
  - ship:
      terminate: true
"#,
        )
        .unwrap();

        let gate = &flow.steps["gate"];
        assert!(gate.config.auto);
        assert_eq!(gate.transitions[0], Transition::when("tests_pass == true", "ship"));
        assert_eq!(gate.transitions[1], Transition::to("build"));
    }

    #[test]
    fn terminate_reason_and_wait_flags() {
        let flow = parse_flow_yaml(
            r#"
name: flags
steps:
  - confirm:
      wait: true
  - done:
      terminate: true
      reason: shipped
"#,
        )
        .unwrap();

        assert!(flow.steps["confirm"].config.wait);
        let done = &flow.steps["done"];
        assert!(done.config.terminate);
        assert_eq!(done.config.reason.as_deref(), Some("shipped"));
        assert!(done.transitions.is_empty());
    }

    #[test]
    fn both_vocabularies_compile_to_identical_ir() {
        let english = parse_flow_yaml(
            r#"
name: bilingual
steps:
  - gather
  - gate:
      condition: approved == true
      onFail: gather
  - done:
      terminate: true
      reason: finished
"#,
        )
        .unwrap();

        let chinese = parse_flow_yaml(
            r#"
名称: bilingual
步骤:
  - gather
  - gate:
      条件: approved == true
      失败跳转: gather
  - done:
      终止: true
      原因: finished
"#,
        )
        .unwrap();

        assert_eq!(english.name, chinese.name);
        assert_eq!(english.order, chinese.order);
        for id in &english.order {
            assert_eq!(
                english.steps[id].transitions, chinese.steps[id].transitions,
                "transitions differ for step '{id}'"
            );
            assert_eq!(
                english.steps[id].config.terminate,
                chinese.steps[id].config.terminate
            );
            assert_eq!(
                english.steps[id].config.reason,
                chinese.steps[id].config.reason
            );
        }
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let err = parse_flow_yaml(
            r#"
name: dupes
steps:
  - build
  - build
"#,
        )
        .unwrap_err();
        assert!(matches!(err, CompileError::DuplicateSteps(ref names) if names == "build"));
    }

    #[test]
    fn missing_steps_list_is_rejected() {
        assert!(matches!(
            parse_flow_yaml("name: empty\n"),
            Err(CompileError::MissingSteps)
        ));
        assert!(matches!(
            parse_flow_yaml("name: bad\nsteps: not-a-list\n"),
            Err(CompileError::MissingSteps)
        ));
    }

    #[test]
    fn malformed_next_names_the_step_and_key() {
        let err = parse_flow_yaml(
            r#"
name: bad
steps:
  - review:
      next:
        - if: looks good
"#,
        )
        .unwrap_err();
        match err {
            CompileError::InvalidStep { step, key, .. } => {
                assert_eq!(step, "review");
                assert_eq!(key, "next");
            }
            other => panic!("expected InvalidStep, got {other:?}"),
        }
    }

    #[test]
    fn unconsumed_keys_are_forwarded_to_extra() {
        let flow = parse_flow_yaml(
            r#"
name: extras
steps:
  - gather:
      owner: product
      effort: 3
"#,
        )
        .unwrap();
        let extra = &flow.steps["gather"].config.extra;
        assert_eq!(extra["owner"], "product");
        assert_eq!(extra["effort"], 3);
    }
}
