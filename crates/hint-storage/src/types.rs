//! Storage-layer records and identifiers.
//!
//! Users, projects and versions are plain structs with named fields. The two
//! user references on [`Project`] are kept as separate named fields:
//! `user_id` is the owner and `shared_by` is the sharer.

use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier of a registered user (in practice an email address).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        UserId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        UserId(s.to_string())
    }
}

/// Unique identifier for a stored project.
///
/// The inner `i64` aligns with SQLite's `INTEGER PRIMARY KEY`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProjectId(pub i64);

/// External handle of a single version.
///
/// Tokens are random and globally unique; they never change once assigned.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionToken(pub String);

impl SessionToken {
    /// Allocates a fresh random token.
    pub fn generate() -> Self {
        SessionToken(Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionToken {
    fn from(s: &str) -> Self {
        SessionToken(s.to_string())
    }
}

/// Milliseconds since the Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(pub i64);

impl Timestamp {
    pub fn from_millis(ms: i64) -> Self {
        Timestamp(ms)
    }

    pub fn as_millis(self) -> i64 {
        self.0
    }

    /// The smallest timestamp strictly after `self`.
    pub fn next(self) -> Self {
        Timestamp(self.0 + 1)
    }

    pub fn to_datetime(self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.0)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_datetime() {
            Some(dt) => f.write_str(&dt.to_rfc3339_opts(SecondsFormat::Millis, true)),
            None => write!(f, "{}ms", self.0),
        }
    }
}

/// A registered user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub created: Timestamp,
}

/// A named container of versions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub id: ProjectId,
    /// Owner. `None` only for orphaned legacy rows.
    pub user_id: Option<UserId>,
    pub name: String,
    pub note: Option<String>,
    /// The user who shared this copy with its owner.
    pub shared_by: Option<UserId>,
    pub is_uploaded: bool,
    pub deleted: bool,
}

impl Project {
    pub fn is_owned_by(&self, user: &UserId) -> bool {
        self.user_id.as_ref() == Some(user)
    }
}

/// One persisted snapshot of a project's state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Version {
    pub session: SessionToken,
    pub project_id: ProjectId,
    pub user_id: UserId,
    /// Dense 1-based ordinal within the project.
    pub version_id: i64,
    /// Opaque reference to the serialized application state.
    pub state: String,
    pub note: Option<String>,
    pub created: Timestamp,
    pub updated: Timestamp,
    pub deleted: bool,
}

/// Fields a caller may change on an existing version.
///
/// `expected_updated` is the `updated` value the caller last observed; the
/// write is rejected if the row has moved on since.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionUpdate {
    pub expected_updated: Timestamp,
    pub state: Option<String>,
    /// `None` keeps the note, `Some(None)` clears it.
    pub note: Option<Option<String>>,
}

impl VersionUpdate {
    pub fn new(expected_updated: Timestamp) -> Self {
        VersionUpdate {
            expected_updated,
            state: None,
            note: None,
        }
    }

    pub fn state(mut self, state: impl Into<String>) -> Self {
        self.state = Some(state.into());
        self
    }

    pub fn note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(Some(note.into()));
        self
    }

    pub fn clear_note(mut self) -> Self {
        self.note = Some(None);
        self
    }
}

/// Summary of a stored project (for listing).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectSummary {
    pub project: Project,
    /// Live versions in ascending `version_id` order.
    pub versions: Vec<Version>,
}

impl ProjectSummary {
    /// Most recent `updated` among the live versions.
    pub fn last_updated(&self) -> Option<Timestamp> {
        self.versions.iter().map(|v| v.updated).max()
    }
}
