//! Backend-independent checks applied before any write.
//!
//! Both [`crate::InMemoryStore`] and [`crate::SqliteStore`] call these so the
//! two backends reject exactly the same inputs with exactly the same errors.

use crate::clock::Clock;
use crate::error::StorageError;
use crate::types::{Project, ProjectId, Timestamp, UserId, Version, VersionUpdate};

/// Rejects empty or whitespace-only project names.
pub fn validate_name(name: &str) -> Result<(), StorageError> {
    if name.trim().is_empty() {
        return Err(StorageError::validation("project name must not be empty"));
    }
    Ok(())
}

pub fn validate_user_id(id: &UserId) -> Result<(), StorageError> {
    if id.as_str().trim().is_empty() {
        return Err(StorageError::validation("user id must not be empty"));
    }
    Ok(())
}

/// Version ordinals start at 1.
pub fn validate_ordinal(version_id: i64) -> Result<(), StorageError> {
    if version_id <= 0 {
        return Err(StorageError::validation(format!(
            "version_id must be positive, got {version_id}"
        )));
    }
    Ok(())
}

/// Fails unless `user` owns `project`.
pub fn require_owner(project: &Project, user: &UserId) -> Result<(), StorageError> {
    if !project.is_owned_by(user) {
        return Err(StorageError::NotOwner {
            user: user.to_string(),
            project: project.id.0,
        });
    }
    Ok(())
}

/// Fails if the version may no longer be mutated.
pub fn require_live(version: &Version) -> Result<(), StorageError> {
    if version.deleted {
        return Err(StorageError::VersionDeleted(version.session.to_string()));
    }
    Ok(())
}

/// The optimistic-lock check for [`crate::ProjectStore::update_version`].
///
/// Any difference between the stored `updated` and the value the caller last
/// read counts as a conflict.
pub fn check_update(version: &Version, update: &VersionUpdate) -> Result<(), StorageError> {
    require_live(version)?;
    if version.updated != update.expected_updated {
        tracing::warn!(
            session = %version.session,
            expected = update.expected_updated.as_millis(),
            actual = version.updated.as_millis(),
            "rejected stale version write"
        );
        return Err(StorageError::StaleVersion {
            session: version.session.to_string(),
            expected: update.expected_updated.as_millis(),
            actual: version.updated.as_millis(),
        });
    }
    Ok(())
}

/// New `updated` value for a row last touched at `previous`.
///
/// Strictly greater than `previous` even if the clock stalls or steps back,
/// so every successful write invalidates every earlier read.
pub fn next_updated(clock: &dyn Clock, previous: Timestamp) -> Timestamp {
    clock.now().max(previous.next())
}

/// Builds a version not-found error for a project/ordinal pair.
pub fn ordinal_not_found(project: ProjectId, version_id: i64) -> StorageError {
    StorageError::VersionOrdinalNotFound {
        project: project.0,
        version_id,
    }
}
