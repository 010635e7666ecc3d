//! State repository trait definition.
//!
//! Defines the storage interface for workflow execution state: the current
//! state record, the append-only action history, and named checkpoints.
//! The infrastructure layer implements this trait with SQLite persistence.
//!
//! The core correctness requirement is that `persist` couples the state
//! mutation with the history entry it resulted from in one transaction: a
//! crash mid-write must never leave history and state inconsistent.
//!
//! Uses native async fn in traits (Rust 2024 edition, no async_trait macro).

use praxis_types::error::RepositoryError;
use praxis_types::state::{Checkpoint, HistoryEntry, WorkflowState};

/// Repository trait for workflow state persistence.
pub trait StateRepository: Send + Sync {
    /// Atomically write `state` and append `entry`. Returns the sequence
    /// number assigned to the entry.
    fn persist(
        &self,
        state: &WorkflowState,
        entry: &HistoryEntry,
    ) -> impl std::future::Future<Output = Result<i64, RepositoryError>> + Send;

    /// Read the latest workflow state, if any exists.
    fn load(
        &self,
    ) -> impl std::future::Future<Output = Result<Option<WorkflowState>, RepositoryError>> + Send;

    /// The most recent history entries, newest first.
    fn history(
        &self,
        limit: u32,
    ) -> impl std::future::Future<Output = Result<Vec<HistoryEntry>, RepositoryError>> + Send;

    /// The full history, oldest first (replay order).
    fn history_all(
        &self,
    ) -> impl std::future::Future<Output = Result<Vec<HistoryEntry>, RepositoryError>> + Send;

    /// Save a named checkpoint, replacing any existing snapshot of that name.
    fn save_checkpoint(
        &self,
        checkpoint: &Checkpoint,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Load a checkpoint by name.
    fn load_checkpoint(
        &self,
        name: &str,
    ) -> impl std::future::Future<Output = Result<Option<Checkpoint>, RepositoryError>> + Send;

    /// List all checkpoints, newest first.
    fn list_checkpoints(
        &self,
    ) -> impl std::future::Future<Output = Result<Vec<Checkpoint>, RepositoryError>> + Send;

    /// Destroy state and history (checkpoints survive). The one
    /// destructive operation; callers gate it behind explicit intent.
    fn reset(
        &self,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;
}
