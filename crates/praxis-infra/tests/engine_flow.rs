//! End-to-end scenario tests: compiled flows driven through `FlowEngine`
//! against the SQLite repository.
//!
//! The flow under test mirrors a TDD methodology: gated requirements
//! gathering, a design review with cognitive branching, a red/green feature
//! loop with a deterministic quality gate, and a terminal shipping step.

use praxis_core::compiler::parser::parse_flow_yaml;
use praxis_core::compiler::validator::{has_errors, validate_flow};
use praxis_core::engine::executor::{EngineError, FlowEngine};
use praxis_core::engine::replay::replay_history;
use praxis_core::node::{BehaviorRegistry, BehaviorSpec, CheckOutcome};
use praxis_core::repository::state::StateRepository;
use praxis_infra::{DatabasePool, SqliteStateRepository};
use praxis_types::state::{PendingDecision, WorkflowStatus};
use serde_json::{json, Map, Value};

const TDD_FLOW: &str = r#"
name: tdd
description: red/green feature loop with review gates
steps:
  - "1.1 Gather requirements":
      wait: true
  - "1.2 Design architecture"
  - "1.3 Design review":
      wait: true
      next:
        - if: the design is approved
          go: "2.0 Feature loop"
        - if: the design has gaps
          go: "1.2 Design architecture"
  - "2.0 Feature loop":
      iterate: features
      children:
        - "2.1 Write failing test"
        - "2.2 Make it pass"
        - "2.3 Quality check":
            next:
              - if: "@suite_green"
                go: "2.0 Feature loop"
              - go: "2.2 Make it pass"
  - "3.1 Final review":
      wait: true
  - Done:
      terminate: true
      reason: shipped
"#;

fn obj(value: Value) -> Map<String, Value> {
    value.as_object().expect("object literal").clone()
}

fn behaviors() -> BehaviorRegistry {
    let mut registry = BehaviorRegistry::new();
    registry.register(
        "suite_green",
        BehaviorSpec::new().with_check(|data| {
            let green = data
                .get("2.3 Quality check")
                .and_then(|d| d.get("green"))
                .and_then(Value::as_bool)
                .unwrap_or(false);
            if green {
                CheckOutcome::Pass
            } else {
                CheckOutcome::Fail("suite is red".to_string())
            }
        }),
    );
    registry
}

async fn engine_at(
    dir: &tempfile::TempDir,
    yaml: &str,
    registry: BehaviorRegistry,
) -> FlowEngine<SqliteStateRepository> {
    let flow = parse_flow_yaml(yaml).expect("flow should compile");
    let findings = validate_flow(&flow);
    assert!(!has_errors(&findings), "flow should validate: {findings:?}");

    let db_path = dir.path().join("praxis.db");
    let url = format!("sqlite://{}?mode=rwc", db_path.display());
    let pool = DatabasePool::new(&url).await.expect("pool should open");
    FlowEngine::new(flow, registry, SqliteStateRepository::new(pool))
}

/// Drive the flow from start through one full feature-loop pass.
async fn advance_to_loop(eng: &FlowEngine<SqliteStateRepository>) {
    eng.start(Some(obj(json!({ "features": ["add_todo", "delete_todo"] }))))
        .await
        .unwrap();
    assert_eq!(
        eng.status().await.unwrap().current_step,
        "1.1 Gather requirements"
    );

    eng.approve(Some(obj(json!({ "requirements": "a todo app" }))))
        .await
        .unwrap();
    eng.submit(obj(json!({ "design": "modular monolith" })))
        .await
        .unwrap();

    // 1.3 is an approval gate over cognitive transitions: approving the
    // gate surfaces the judgment, resolving it enters the loop.
    let gate = eng.status().await.unwrap();
    assert_eq!(gate.current_step, "1.3 Design review");
    assert_eq!(gate.pending, Some(PendingDecision::Approval));

    let suspended = eng.approve(None).await.unwrap();
    assert_eq!(suspended.status, WorkflowStatus::AwaitingJudgment);
    match suspended.pending {
        Some(PendingDecision::Judgment { ref candidates }) => {
            let targets: Vec<&str> = candidates.iter().map(|c| c.target.as_str()).collect();
            assert_eq!(targets, ["2.0 Feature loop", "1.2 Design architecture"]);
        }
        ref other => panic!("expected judgment candidates, got {other:?}"),
    }

    let entered = eng.resolve_judgment("2.0 Feature loop").await.unwrap();
    assert_eq!(entered.step, "2.1 Write failing test");
}

#[tokio::test]
async fn full_walkthrough_reaches_done() {
    let dir = tempfile::tempdir().unwrap();
    let eng = engine_at(&dir, TDD_FLOW, behaviors()).await;
    advance_to_loop(&eng).await;

    for feature in ["add_todo", "delete_todo"] {
        assert_eq!(
            eng.status().await.unwrap().current_step,
            "2.1 Write failing test"
        );
        eng.submit(obj(json!({ "test": format!("test_{feature}") })))
            .await
            .unwrap();
        eng.submit(obj(json!({ "code": format!("impl_{feature}") })))
            .await
            .unwrap();
        eng.submit(obj(json!({ "green": true }))).await.unwrap();
    }

    // loop exhausted -> final review gate
    let report = eng.status().await.unwrap();
    assert_eq!(report.current_step, "3.1 Final review");
    assert_eq!(report.pending, Some(PendingDecision::Approval));

    let done = eng.approve(None).await.unwrap();
    assert_eq!(done.step, "Done");
    assert_eq!(done.status, WorkflowStatus::Terminated);
    assert!(done.message.contains("shipped"));
}

#[tokio::test]
async fn red_quality_gate_sends_the_loop_back() {
    let dir = tempfile::tempdir().unwrap();
    let eng = engine_at(&dir, TDD_FLOW, behaviors()).await;
    advance_to_loop(&eng).await;

    eng.submit(obj(json!({ "test": "test_add" }))).await.unwrap();
    eng.submit(obj(json!({ "code": "impl_add" }))).await.unwrap();

    // a red suite falls through the @suite_green gate to "make it pass"
    let bounced = eng.submit(obj(json!({ "green": false }))).await.unwrap();
    assert_eq!(bounced.step, "2.2 Make it pass");

    eng.submit(obj(json!({ "code": "impl_add_fixed" })))
        .await
        .unwrap();
    let advanced = eng.submit(obj(json!({ "green": true }))).await.unwrap();
    assert_eq!(advanced.step, "2.1 Write failing test");
    assert_eq!(
        eng.status().await.unwrap().display_path,
        "features[2/2] > 2.1 Write failing test"
    );
}

#[tokio::test]
async fn suspension_survives_a_process_restart() {
    let dir = tempfile::tempdir().unwrap();
    {
        let eng = engine_at(&dir, TDD_FLOW, behaviors()).await;
        eng.start(Some(obj(json!({ "features": ["one"] }))))
            .await
            .unwrap();
        eng.approve(Some(obj(json!({ "requirements": "r" }))))
            .await
            .unwrap();
        eng.submit(obj(json!({ "design": "d" }))).await.unwrap();
        eng.approve(None).await.unwrap();
        // dropped here, mid-judgment
    }

    let eng = engine_at(&dir, TDD_FLOW, behaviors()).await;
    let report = eng.status().await.unwrap();
    assert_eq!(report.status, WorkflowStatus::AwaitingJudgment);
    assert_eq!(report.current_step, "1.3 Design review");
    assert!(matches!(
        report.pending,
        Some(PendingDecision::Judgment { .. })
    ));

    // the restarted engine resolves the judgment as if nothing happened
    let entered = eng.resolve_judgment("2.0 Feature loop").await.unwrap();
    assert_eq!(entered.step, "2.1 Write failing test");
}

#[tokio::test]
async fn accumulated_data_and_history_survive_restart() {
    let dir = tempfile::tempdir().unwrap();
    {
        let eng = engine_at(&dir, TDD_FLOW, behaviors()).await;
        eng.start(Some(obj(json!({ "features": ["one"] }))))
            .await
            .unwrap();
        eng.approve(Some(obj(json!({ "requirements": "a todo app" }))))
            .await
            .unwrap();
    }

    let eng = engine_at(&dir, TDD_FLOW, behaviors()).await;
    assert_eq!(
        eng.context("1.1 Gather requirements").await.unwrap(),
        Some(json!({ "requirements": "a todo app" }))
    );
    let history = eng.history(50).await.unwrap();
    assert!(history.len() >= 3, "start, approve, submit, transition");
    // newest first; the run began with a start entry
    assert_eq!(
        history.last().unwrap().action,
        praxis_types::state::ActionKind::Start
    );
}

#[tokio::test]
async fn replaying_the_sqlite_history_reproduces_the_state() {
    let dir = tempfile::tempdir().unwrap();
    let eng = engine_at(&dir, TDD_FLOW, behaviors()).await;
    advance_to_loop(&eng).await;
    eng.submit(obj(json!({ "test": "test_add" }))).await.unwrap();
    eng.stop().await.unwrap();

    let live = eng.repo().load().await.unwrap().unwrap();
    let entries = eng.repo().history_all().await.unwrap();
    let replayed = replay_history(&entries).unwrap().unwrap();
    assert_eq!(replayed, live);
}

#[tokio::test]
async fn checkpoint_rollback_across_restart() {
    let dir = tempfile::tempdir().unwrap();
    {
        let eng = engine_at(&dir, TDD_FLOW, behaviors()).await;
        advance_to_loop(&eng).await;
        eng.save_checkpoint("loop-entry").await.unwrap();
        eng.submit(obj(json!({ "test": "test_add" }))).await.unwrap();
        eng.submit(obj(json!({ "code": "impl_add" }))).await.unwrap();
    }

    let eng = engine_at(&dir, TDD_FLOW, behaviors()).await;
    assert_eq!(
        eng.status().await.unwrap().current_step,
        "2.3 Quality check"
    );

    let restored = eng.restore_checkpoint("loop-entry").await.unwrap();
    assert_eq!(restored.step, "2.1 Write failing test");
    let data = eng.data().await.unwrap();
    assert!(!data.contains_key("2.1 Write failing test"));
    assert!(data.contains_key("1.2 Design architecture"));
}

#[tokio::test]
async fn reset_is_the_only_destructive_operation() {
    let dir = tempfile::tempdir().unwrap();
    let eng = engine_at(&dir, TDD_FLOW, behaviors()).await;
    advance_to_loop(&eng).await;

    eng.stop().await.unwrap();
    assert!(eng.repo().load().await.unwrap().is_some());

    eng.reset().await.unwrap();
    assert!(eng.repo().load().await.unwrap().is_none());
    assert!(matches!(
        eng.submit(Map::new()).await.unwrap_err(),
        EngineError::NotStarted
    ));
}

#[tokio::test]
async fn chinese_vocabulary_flow_runs_end_to_end() {
    let flow_yaml = r#"
名称: 双语
步骤:
  - 收集需求
  - 检查:
      断言: ready == true
      失败跳转: 收集需求
  - 完成:
      终止: true
      原因: 完成了
"#;
    let dir = tempfile::tempdir().unwrap();
    let eng = engine_at(&dir, flow_yaml, BehaviorRegistry::new()).await;

    eng.start(None).await.unwrap();
    let bounced = eng.submit(obj(json!({ "ready": false }))).await.unwrap();
    assert_eq!(bounced.step, "收集需求");

    let done = eng.submit(obj(json!({ "ready": true }))).await.unwrap();
    assert_eq!(done.step, "完成");
    assert_eq!(done.status, WorkflowStatus::Terminated);
    assert!(done.message.contains("完成了"));
}
