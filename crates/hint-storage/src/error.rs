//! Storage error types for hint-storage.
//!
//! [`StorageError`] covers every failure a store operation can report. Each
//! variant belongs to exactly one [`ErrorKind`], which is what callers (the
//! CLI, an HTTP layer) translate into exit codes or status codes. Nothing in
//! this crate retries on error.

use std::fmt;

use rusqlite::ErrorCode;
use thiserror::Error;

/// Coarse classification of a [`StorageError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Malformed input: empty name, non-positive ordinal.
    Validation,
    /// A referenced user, project or version does not exist.
    NotFound,
    /// The acting user does not own the target.
    Authorization,
    /// Optimistic-lock mismatch, mutation after soft delete, duplicate id.
    Conflict,
    /// The database could not be locked within the busy timeout.
    Timeout,
    /// Database or migration fault.
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Validation => "validation",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Authorization => "authorization",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Internal => "internal",
        };
        f.write_str(s)
    }
}

/// Errors produced by storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Input failed validation before touching storage.
    #[error("validation error: {reason}")]
    Validation { reason: String },

    /// A user with the given ID was not found.
    #[error("user not found: {0}")]
    UserNotFound(String),

    /// A user with the given ID is already registered.
    #[error("user already exists: {0}")]
    UserExists(String),

    /// A project with the given ID was not found (or is deleted).
    #[error("project not found: {0}")]
    ProjectNotFound(i64),

    /// No live version carries the given session token.
    #[error("version not found: {0}")]
    VersionNotFound(String),

    /// No live version holds the given ordinal within the project.
    #[error("version not found: project={project}, version_id={version_id}")]
    VersionOrdinalNotFound { project: i64, version_id: i64 },

    /// The acting user does not own the project.
    #[error("user {user} does not own project {project}")]
    NotOwner { user: String, project: i64 },

    /// The version was modified after the caller last read it.
    #[error("version {session} was modified concurrently: expected updated={expected}, found {actual}")]
    StaleVersion {
        session: String,
        expected: i64,
        actual: i64,
    },

    /// The version is soft-deleted and no longer accepts mutations.
    #[error("version {0} is deleted")]
    VersionDeleted(String),

    /// The database stayed locked past the configured busy timeout.
    #[error("timed out waiting for database lock: {0}")]
    Timeout(String),

    /// Schema migration failed.
    #[error("migration error: {0}")]
    Migration(String),

    /// Any other SQLite failure.
    #[error("sqlite error: {0}")]
    Sqlite(#[source] rusqlite::Error),
}

impl StorageError {
    /// Returns the taxonomy bucket for this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            StorageError::Validation { .. } => ErrorKind::Validation,
            StorageError::UserNotFound(_)
            | StorageError::ProjectNotFound(_)
            | StorageError::VersionNotFound(_)
            | StorageError::VersionOrdinalNotFound { .. } => ErrorKind::NotFound,
            StorageError::NotOwner { .. } => ErrorKind::Authorization,
            StorageError::UserExists(_)
            | StorageError::StaleVersion { .. }
            | StorageError::VersionDeleted(_) => ErrorKind::Conflict,
            StorageError::Timeout(_) => ErrorKind::Timeout,
            StorageError::Migration(_)
            | StorageError::Sqlite(_) => ErrorKind::Internal,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }

    pub fn is_conflict(&self) -> bool {
        self.kind() == ErrorKind::Conflict
    }

    pub fn is_timeout(&self) -> bool {
        self.kind() == ErrorKind::Timeout
    }

    pub(crate) fn validation(reason: impl Into<String>) -> Self {
        StorageError::Validation {
            reason: reason.into(),
        }
    }
}

impl From<rusqlite::Error> for StorageError {
    fn from(err: rusqlite::Error) -> Self {
        match err.sqlite_error_code() {
            Some(ErrorCode::DatabaseBusy) | Some(ErrorCode::DatabaseLocked) => {
                StorageError::Timeout(err.to_string())
            }
            _ => StorageError::Sqlite(err),
        }
    }
}
