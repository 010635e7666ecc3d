//! In-memory `StateRepository` for tests and embedded use.
//!
//! Mirrors the transactional contract of the SQLite adapter: `persist`
//! applies the state write and the history append under one lock, so a
//! reader never observes one without the other.

use std::collections::HashMap;
use std::sync::Mutex;

use praxis_types::error::RepositoryError;
use praxis_types::state::{Checkpoint, HistoryEntry, WorkflowState};

use super::state::StateRepository;

#[derive(Default)]
struct Inner {
    state: Option<WorkflowState>,
    history: Vec<HistoryEntry>,
    checkpoints: HashMap<String, Checkpoint>,
    next_seq: i64,
}

/// Lock-guarded in-memory store.
#[derive(Default)]
pub struct MemoryStateRepository {
    inner: Mutex<Inner>,
}

impl MemoryStateRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Inner>, RepositoryError> {
        self.inner
            .lock()
            .map_err(|_| RepositoryError::Query("repository lock poisoned".to_string()))
    }
}

impl StateRepository for MemoryStateRepository {
    async fn persist(
        &self,
        state: &WorkflowState,
        entry: &HistoryEntry,
    ) -> Result<i64, RepositoryError> {
        let mut inner = self.lock()?;
        inner.next_seq += 1;
        let seq = inner.next_seq;
        let mut entry = entry.clone();
        entry.seq = seq;
        inner.state = Some(state.clone());
        inner.history.push(entry);
        Ok(seq)
    }

    async fn load(&self) -> Result<Option<WorkflowState>, RepositoryError> {
        Ok(self.lock()?.state.clone())
    }

    async fn history(&self, limit: u32) -> Result<Vec<HistoryEntry>, RepositoryError> {
        let inner = self.lock()?;
        Ok(inner
            .history
            .iter()
            .rev()
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn history_all(&self) -> Result<Vec<HistoryEntry>, RepositoryError> {
        Ok(self.lock()?.history.clone())
    }

    async fn save_checkpoint(&self, checkpoint: &Checkpoint) -> Result<(), RepositoryError> {
        self.lock()?
            .checkpoints
            .insert(checkpoint.name.clone(), checkpoint.clone());
        Ok(())
    }

    async fn load_checkpoint(&self, name: &str) -> Result<Option<Checkpoint>, RepositoryError> {
        Ok(self.lock()?.checkpoints.get(name).cloned())
    }

    async fn list_checkpoints(&self) -> Result<Vec<Checkpoint>, RepositoryError> {
        let inner = self.lock()?;
        let mut checkpoints: Vec<Checkpoint> = inner.checkpoints.values().cloned().collect();
        checkpoints.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(checkpoints)
    }

    async fn reset(&self) -> Result<(), RepositoryError> {
        let mut inner = self.lock()?;
        inner.state = None;
        inner.history.clear();
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
