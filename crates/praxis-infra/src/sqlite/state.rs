//! SQLite state repository implementation.
//!
//! Implements `StateRepository` from `praxis-core` using sqlx with split
//! read/write pools. The live workflow state is a singleton row; history is
//! append-only; checkpoints are keyed by name. `persist` writes the state
//! row and the history entry in one transaction, so a crash mid-write never
//! leaves history and state inconsistent.

use chrono::{DateTime, Utc};
use praxis_core::repository::state::StateRepository;
use praxis_types::error::RepositoryError;
use praxis_types::state::{
    ActionKind, Checkpoint, HistoryEntry, PendingDecision, WorkflowState, WorkflowStatus,
};
use sqlx::Row;
use uuid::Uuid;

use super::pool::DatabasePool;

/// SQLite-backed implementation of `StateRepository`.
pub struct SqliteStateRepository {
    pool: DatabasePool,
}

impl SqliteStateRepository {
    /// Create a new repository backed by the given database pool.
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

// ---------------------------------------------------------------------------
// Internal row types
// ---------------------------------------------------------------------------

struct StateRow {
    flow: String,
    current_step: String,
    status: String,
    data: String,
    loops: String,
    pending: Option<String>,
    started_at: String,
}

impl StateRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            flow: row.try_get("flow")?,
            current_step: row.try_get("current_step")?,
            status: row.try_get("status")?,
            data: row.try_get("data")?,
            loops: row.try_get("loops")?,
            pending: row.try_get("pending")?,
            started_at: row.try_get("started_at")?,
        })
    }

    fn into_state(self) -> Result<WorkflowState, RepositoryError> {
        let status: WorkflowStatus =
            serde_json::from_value(serde_json::Value::String(self.status.clone()))
                .map_err(|_| RepositoryError::Query(format!("invalid status: {}", self.status)))?;

        let data = serde_json::from_str(&self.data)
            .map_err(|e| RepositoryError::Query(format!("invalid data JSON: {e}")))?;
        let loops = serde_json::from_str(&self.loops)
            .map_err(|e| RepositoryError::Query(format!("invalid loops JSON: {e}")))?;

        let pending: Option<PendingDecision> = self
            .pending
            .as_deref()
            .map(|s| {
                serde_json::from_str(s)
                    .map_err(|e| RepositoryError::Query(format!("invalid pending JSON: {e}")))
            })
            .transpose()?;

        Ok(WorkflowState {
            flow: self.flow,
            current_step: self.current_step,
            status,
            data,
            loops,
            pending,
            started_at: parse_datetime(&self.started_at)?,
        })
    }
}

struct HistoryRow {
    seq: i64,
    flow: String,
    step: String,
    action: String,
    payload: Option<String>,
    recorded_at: String,
}

impl HistoryRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            seq: row.try_get("seq")?,
            flow: row.try_get("flow")?,
            step: row.try_get("step")?,
            action: row.try_get("action")?,
            payload: row.try_get("payload")?,
            recorded_at: row.try_get("recorded_at")?,
        })
    }

    fn into_entry(self) -> Result<HistoryEntry, RepositoryError> {
        let action: ActionKind =
            serde_json::from_value(serde_json::Value::String(self.action.clone()))
                .map_err(|_| RepositoryError::Query(format!("invalid action: {}", self.action)))?;

        let payload = self
            .payload
            .as_deref()
            .map(|s| {
                serde_json::from_str(s)
                    .map_err(|e| RepositoryError::Query(format!("invalid payload JSON: {e}")))
            })
            .transpose()?;

        Ok(HistoryEntry {
            seq: self.seq,
            flow: self.flow,
            step: self.step,
            action,
            payload,
            recorded_at: parse_datetime(&self.recorded_at)?,
        })
    }
}

struct CheckpointRow {
    id: String,
    name: String,
    state: String,
    created_at: String,
}

impl CheckpointRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            state: row.try_get("state")?,
            created_at: row.try_get("created_at")?,
        })
    }

    fn into_checkpoint(self) -> Result<Checkpoint, RepositoryError> {
        let state: WorkflowState = serde_json::from_str(&self.state)
            .map_err(|e| RepositoryError::Query(format!("invalid checkpoint state: {e}")))?;
        Ok(Checkpoint {
            id: parse_uuid(&self.id)?,
            name: self.name,
            state,
            created_at: parse_datetime(&self.created_at)?,
        })
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn parse_uuid(s: &str) -> Result<Uuid, RepositoryError> {
    s.parse::<Uuid>()
        .map_err(|e| RepositoryError::Query(format!("invalid UUID: {e}")))
}

fn parse_datetime(s: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Query(format!("invalid datetime: {e}")))
}

fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

fn json_string<T: serde::Serialize>(value: &T) -> Result<String, RepositoryError> {
    serde_json::to_string(value).map_err(|e| RepositoryError::Query(e.to_string()))
}

// ---------------------------------------------------------------------------
// StateRepository impl
// ---------------------------------------------------------------------------

impl StateRepository for SqliteStateRepository {
    async fn persist(
        &self,
        state: &WorkflowState,
        entry: &HistoryEntry,
    ) -> Result<i64, RepositoryError> {
        let data_json = json_string(&state.data)?;
        let loops_json = json_string(&state.loops)?;
        let pending_json = state.pending.as_ref().map(json_string).transpose()?;
        let payload_json = entry.payload.as_ref().map(json_string).transpose()?;

        let mut tx = self
            .pool
            .writer
            .begin()
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        sqlx::query(
            r#"INSERT INTO workflow_state
               (id, flow, current_step, status, data, loops, pending, started_at)
               VALUES (1, ?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT(id) DO UPDATE SET
                 flow = excluded.flow,
                 current_step = excluded.current_step,
                 status = excluded.status,
                 data = excluded.data,
                 loops = excluded.loops,
                 pending = excluded.pending,
                 started_at = excluded.started_at"#,
        )
        .bind(&state.flow)
        .bind(&state.current_step)
        .bind(state.status.as_str())
        .bind(&data_json)
        .bind(&loops_json)
        .bind(&pending_json)
        .bind(format_datetime(&state.started_at))
        .execute(&mut *tx)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        let result = sqlx::query(
            r#"INSERT INTO workflow_history (flow, step, action, payload, recorded_at)
               VALUES (?, ?, ?, ?, ?)"#,
        )
        .bind(&entry.flow)
        .bind(&entry.step)
        .bind(entry.action.as_str())
        .bind(&payload_json)
        .bind(format_datetime(&entry.recorded_at))
        .execute(&mut *tx)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        tx.commit()
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        Ok(result.last_insert_rowid())
    }

    async fn load(&self) -> Result<Option<WorkflowState>, RepositoryError> {
        let row = sqlx::query(
            "SELECT flow, current_step, status, data, loops, pending, started_at
             FROM workflow_state WHERE id = 1",
        )
        .fetch_optional(&self.pool.reader)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        match row {
            Some(row) => {
                let r = StateRow::from_row(&row)
                    .map_err(|e| RepositoryError::Query(e.to_string()))?;
                Ok(Some(r.into_state()?))
            }
            None => Ok(None),
        }
    }

    async fn history(&self, limit: u32) -> Result<Vec<HistoryEntry>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT seq, flow, step, action, payload, recorded_at
             FROM workflow_history ORDER BY seq DESC LIMIT ?",
        )
        .bind(limit as i64)
        .fetch_all(&self.pool.reader)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        let mut entries = Vec::with_capacity(rows.len());
        for row in &rows {
            let r = HistoryRow::from_row(row)
                .map_err(|e| RepositoryError::Query(e.to_string()))?;
            entries.push(r.into_entry()?);
        }
        Ok(entries)
    }

    async fn history_all(&self) -> Result<Vec<HistoryEntry>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT seq, flow, step, action, payload, recorded_at
             FROM workflow_history ORDER BY seq ASC",
        )
        .fetch_all(&self.pool.reader)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        let mut entries = Vec::with_capacity(rows.len());
        for row in &rows {
            let r = HistoryRow::from_row(row)
                .map_err(|e| RepositoryError::Query(e.to_string()))?;
            entries.push(r.into_entry()?);
        }
        Ok(entries)
    }

    async fn save_checkpoint(&self, checkpoint: &Checkpoint) -> Result<(), RepositoryError> {
        let state_json = json_string(&checkpoint.state)?;

        sqlx::query(
            r#"INSERT INTO workflow_checkpoints (id, name, state, created_at)
               VALUES (?, ?, ?, ?)
               ON CONFLICT(name) DO UPDATE SET
                 id = excluded.id,
                 state = excluded.state,
                 created_at = excluded.created_at"#,
        )
        .bind(checkpoint.id.to_string())
        .bind(&checkpoint.name)
        .bind(&state_json)
        .bind(format_datetime(&checkpoint.created_at))
        .execute(&self.pool.writer)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        Ok(())
    }

    async fn load_checkpoint(&self, name: &str) -> Result<Option<Checkpoint>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, name, state, created_at FROM workflow_checkpoints WHERE name = ?",
        )
        .bind(name)
        .fetch_optional(&self.pool.reader)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        match row {
            Some(row) => {
                let r = CheckpointRow::from_row(&row)
                    .map_err(|e| RepositoryError::Query(e.to_string()))?;
                Ok(Some(r.into_checkpoint()?))
            }
            None => Ok(None),
        }
    }

    async fn list_checkpoints(&self) -> Result<Vec<Checkpoint>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, name, state, created_at FROM workflow_checkpoints
             ORDER BY created_at DESC",
        )
        .fetch_all(&self.pool.reader)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        let mut checkpoints = Vec::with_capacity(rows.len());
        for row in &rows {
            let r = CheckpointRow::from_row(row)
                .map_err(|e| RepositoryError::Query(e.to_string()))?;
            checkpoints.push(r.into_checkpoint()?);
        }
        Ok(checkpoints)
    }

    async fn reset(&self) -> Result<(), RepositoryError> {
        let mut tx = self
            .pool
            .writer
            .begin()
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        sqlx::query("DELETE FROM workflow_state")
            .execute(&mut *tx)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;
        sqlx::query("DELETE FROM workflow_history")
            .execute(&mut *tx)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        tx.commit()
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        tracing::debug!("workflow state and history cleared");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use praxis_types::state::{JudgmentCandidate, LoopCounter};
    use serde_json::json;

    async fn repo(dir: &tempfile::TempDir) -> SqliteStateRepository {
        let db_path = dir.path().join("state.db");
        let url = format!("sqlite://{}?mode=rwc", db_path.display());
        let pool = DatabasePool::new(&url).await.unwrap();
        SqliteStateRepository::new(pool)
    }

    fn sample_state() -> WorkflowState {
        let mut state = WorkflowState::new("demo", "gather", serde_json::Map::new(), Utc::now());
        state.data.insert("gather".to_string(), json!({"notes": "ok"}));
        state
            .loops
            .insert("features".to_string(), LoopCounter { index: 0, total: 3 });
        state.pending = Some(PendingDecision::Judgment {
            candidates: vec![JudgmentCandidate {
                target: "rework".to_string(),
                condition: "needs another pass".to_string(),
            }],
        });
        state
    }

    fn sample_entry(action: ActionKind, payload: Option<serde_json::Value>) -> HistoryEntry {
        HistoryEntry::new("demo", "gather", action, payload, Utc::now())
    }

    #[tokio::test]
    async fn persist_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let repo = repo(&dir).await;

        let state = sample_state();
        let seq = repo
            .persist(&state, &sample_entry(ActionKind::Start, Some(json!({}))))
            .await
            .unwrap();
        assert_eq!(seq, 1);

        let loaded = repo.load().await.unwrap().unwrap();
        assert_eq!(loaded.flow, "demo");
        assert_eq!(loaded.current_step, "gather");
        assert_eq!(loaded.status, WorkflowStatus::Running);
        assert_eq!(loaded.data["gather"], json!({"notes": "ok"}));
        assert_eq!(loaded.loops["features"], LoopCounter { index: 0, total: 3 });
        assert!(matches!(
            loaded.pending,
            Some(PendingDecision::Judgment { .. })
        ));
    }

    #[tokio::test]
    async fn empty_database_loads_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let repo = repo(&dir).await;
        assert!(repo.load().await.unwrap().is_none());
        assert!(repo.history_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn history_orders_and_limits() {
        let dir = tempfile::tempdir().unwrap();
        let repo = repo(&dir).await;
        let state = sample_state();

        repo.persist(&state, &sample_entry(ActionKind::Start, Some(json!({}))))
            .await
            .unwrap();
        repo.persist(
            &state,
            &sample_entry(ActionKind::Submit, Some(json!({"x": 1}))),
        )
        .await
        .unwrap();
        repo.persist(&state, &sample_entry(ActionKind::Transition, None))
            .await
            .unwrap();

        let newest_first = repo.history(2).await.unwrap();
        assert_eq!(newest_first.len(), 2);
        assert_eq!(newest_first[0].action, ActionKind::Transition);
        assert_eq!(newest_first[0].seq, 3);

        let oldest_first = repo.history_all().await.unwrap();
        assert_eq!(oldest_first.len(), 3);
        assert_eq!(oldest_first[0].action, ActionKind::Start);
        assert_eq!(oldest_first[1].payload, Some(json!({"x": 1})));
    }

    #[tokio::test]
    async fn checkpoint_upsert_by_name() {
        let dir = tempfile::tempdir().unwrap();
        let repo = repo(&dir).await;

        let mut state = sample_state();
        repo.save_checkpoint(&Checkpoint {
            id: Uuid::now_v7(),
            name: "before".to_string(),
            state: state.clone(),
            created_at: Utc::now(),
        })
        .await
        .unwrap();

        state.current_step = "build".to_string();
        repo.save_checkpoint(&Checkpoint {
            id: Uuid::now_v7(),
            name: "before".to_string(),
            state: state.clone(),
            created_at: Utc::now(),
        })
        .await
        .unwrap();

        let loaded = repo.load_checkpoint("before").await.unwrap().unwrap();
        assert_eq!(loaded.state.current_step, "build");
        assert_eq!(repo.list_checkpoints().await.unwrap().len(), 1);
        assert!(repo.load_checkpoint("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn reset_preserves_checkpoints() {
        let dir = tempfile::tempdir().unwrap();
        let repo = repo(&dir).await;
        let state = sample_state();

        repo.persist(&state, &sample_entry(ActionKind::Start, Some(json!({}))))
            .await
            .unwrap();
        repo.save_checkpoint(&Checkpoint {
            id: Uuid::now_v7(),
            name: "keep-me".to_string(),
            state: state.clone(),
            created_at: Utc::now(),
        })
        .await
        .unwrap();

        repo.reset().await.unwrap();
        assert!(repo.load().await.unwrap().is_none());
        assert!(repo.history_all().await.unwrap().is_empty());
        assert!(repo.load_checkpoint("keep-me").await.unwrap().is_some());
    }
}
