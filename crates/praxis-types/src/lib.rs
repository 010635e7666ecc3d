//! Shared domain types for Praxis.
//!
//! This crate contains the core domain types used across the Praxis engine:
//! the compiled flow IR, workflow runtime state and history, edit policies,
//! output schemas, and repository error types.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror.

pub mod error;
pub mod flow;
pub mod policy;
pub mod schema;
pub mod state;
