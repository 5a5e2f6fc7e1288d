//! Error types for the task domain.
//!
//! This module defines the central `Error` enum, which captures every
//! recoverable and reportable failure of the task store, its prepared
//! statements and the statement cache. The RPC layer maps each variant to a
//! client-facing error code.
//!
//! ## Error Cases
//! - `Database`: SQLite rejected a statement, failed to run it, or the schema
//!   could not be migrated.
//! - `InvalidArguments`: A prepared statement was bound with the wrong
//!   arguments.
//! - `StatementKind`: A statement was run through the wrong entry point
//!   (`query` on a write, `execute` on a read).
//! - `StatementReleased`: A prepared statement was used after release.
//! - `NotFound`: The requested task does not exist.
//! - `InvalidRequest`: The client request was malformed or out of bounds.
//! - `CacheClosed`: The statement cache was torn down.

use crate::cache::Closed;

pub type Result<T> = core::result::Result<T, Error>;

/// Unified error type for the task domain.
#[derive(Clone, thiserror::Error, Debug, PartialEq, Eq)]
pub enum Error {
    /// The database failed to prepare or run a statement.
    #[error("Database error: {message}")]
    Database { message: String },

    /// The arguments bound to a statement do not match its parameters.
    #[error("Invalid arguments: {reason}")]
    InvalidArguments { reason: String },

    /// The statement was used through the wrong entry point.
    #[error("Statement `{sql}` cannot be used with {operation}")]
    StatementKind {
        sql: String,
        operation: &'static str,
    },

    /// The prepared statement has already been released.
    #[error("Statement has been released")]
    StatementReleased,

    /// No task exists with the given id.
    #[error("Task {id} not found")]
    NotFound { id: u64 },

    /// The client request was invalid or exceeded constraints.
    #[error("Invalid request: {reason}")]
    InvalidRequest { reason: String },

    /// The statement cache has been closed.
    #[error(transparent)]
    CacheClosed(#[from] Closed),
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        Self::Database {
            message: err.to_string(),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for Error {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        Self::Database {
            message: format!("migration failed: {err}"),
        }
    }
}
