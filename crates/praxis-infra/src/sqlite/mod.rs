//! SQLite adapters: connection pooling and the state repository.

pub mod pool;
pub mod state;
