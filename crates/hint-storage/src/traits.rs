//! The [`ProjectStore`] trait defining the storage contract for users,
//! projects and versions.
//!
//! All backends (InMemoryStore, SqliteStore) implement this trait with the
//! same validation, ordering and error semantics, so callers can swap them
//! without changing behavior.

use crate::error::StorageError;
use crate::types::{
    Project, ProjectId, ProjectSummary, SessionToken, Timestamp, User, UserId, Version,
    VersionUpdate,
};

/// The storage contract for the project/version model.
///
/// The trait is synchronous. Each mutating call is one atomic unit: it
/// either applies completely or leaves the store untouched.
pub trait ProjectStore {
    // -------------------------------------------------------------------
    // User registry
    // -------------------------------------------------------------------

    /// Registers a new user.
    fn create_user(&mut self, id: &UserId) -> Result<User, StorageError>;

    /// Retrieves a user by ID.
    fn get_user(&self, id: &UserId) -> Result<User, StorageError>;

    fn user_exists(&self, id: &UserId) -> Result<bool, StorageError>;

    // -------------------------------------------------------------------
    // Projects
    // -------------------------------------------------------------------

    /// Creates a project owned by `user`.
    ///
    /// New projects are not uploaded and not shared.
    fn create_project(
        &mut self,
        user: &UserId,
        name: &str,
        note: Option<&str>,
    ) -> Result<ProjectId, StorageError>;

    /// Retrieves a live project by ID.
    fn get_project(&self, id: ProjectId) -> Result<Project, StorageError>;

    fn rename_project(&mut self, id: ProjectId, name: &str) -> Result<(), StorageError>;

    /// Sets or clears the project's note.
    fn update_project_note(
        &mut self,
        id: ProjectId,
        note: Option<&str>,
    ) -> Result<(), StorageError>;

    /// Marks the project as published elsewhere. Idempotent.
    fn mark_uploaded(&mut self, id: ProjectId) -> Result<(), StorageError>;

    /// Gives `to` an independent copy of the project, recording `from` as
    /// the sharer.
    ///
    /// The copy receives every live version of the source, renumbered from
    /// 1 with fresh session tokens. The source project is left unchanged.
    fn share_project(
        &mut self,
        id: ProjectId,
        from: &UserId,
        to: &UserId,
    ) -> Result<ProjectId, StorageError>;

    /// Shares one project with several users at once.
    ///
    /// All-or-nothing: if any recipient is unknown, no copy is created.
    fn share_project_with_many(
        &mut self,
        id: ProjectId,
        from: &UserId,
        recipients: &[UserId],
    ) -> Result<Vec<ProjectId>, StorageError>;

    /// Lists the user's live projects, most recently updated first.
    fn list_projects(&self, user: &UserId) -> Result<Vec<ProjectSummary>, StorageError>;

    /// Soft-deletes a project and all its versions.
    fn delete_project(&mut self, id: ProjectId, requester: &UserId) -> Result<(), StorageError>;

    /// Resolves who shared the project with its owner, if anyone.
    fn get_share_lineage(&self, id: ProjectId) -> Result<Option<User>, StorageError>;

    // -------------------------------------------------------------------
    // Versions
    // -------------------------------------------------------------------

    /// Appends a new version to a project.
    ///
    /// Allocates a fresh session token and the next ordinal for the project.
    fn create_version(
        &mut self,
        project: ProjectId,
        user: &UserId,
        state: &str,
        note: Option<&str>,
    ) -> Result<SessionToken, StorageError>;

    /// Appends a new version whose state and note are copied from `parent`.
    fn copy_version(
        &mut self,
        parent: &SessionToken,
        project: ProjectId,
        user: &UserId,
    ) -> Result<SessionToken, StorageError>;

    /// Applies `update` if the version is unchanged since the caller read it.
    ///
    /// Returns the new `updated` timestamp.
    fn update_version(
        &mut self,
        session: &SessionToken,
        update: &VersionUpdate,
    ) -> Result<Timestamp, StorageError>;

    /// Marks a version deleted. Deleting an already deleted version is a no-op.
    fn soft_delete_version(&mut self, session: &SessionToken) -> Result<(), StorageError>;

    /// Retrieves a live version by token.
    fn get_version(&self, session: &SessionToken) -> Result<Version, StorageError>;

    /// Retrieves a version by token whether or not it or its project is
    /// deleted.
    fn get_version_including_deleted(
        &self,
        session: &SessionToken,
    ) -> Result<Version, StorageError>;

    /// Retrieves a live version by its ordinal within a live project.
    fn get_version_by_ordinal(
        &self,
        project: ProjectId,
        version_id: i64,
    ) -> Result<Version, StorageError>;

    /// Lists a project's versions in ascending `version_id` order.
    ///
    /// Also answers for deleted projects, so their history stays auditable.
    fn list_versions(
        &self,
        project: ProjectId,
        include_deleted: bool,
    ) -> Result<Vec<Version>, StorageError>;

    // -------------------------------------------------------------------
    // Derived queries
    // -------------------------------------------------------------------

    /// The live version with the highest ordinal, if any.
    fn latest_version(&self, project: ProjectId) -> Result<Option<Version>, StorageError> {
        Ok(self.list_versions(project, false)?.pop())
    }

    /// Resolves a version the user last worked on to its project.
    ///
    /// Returns `None` when the token is unknown, deleted, owned by another
    /// user, or belongs to a deleted project.
    fn find_current_project(
        &self,
        session: &SessionToken,
        user: &UserId,
    ) -> Result<Option<(Project, Version)>, StorageError> {
        let version = match self.get_version(session) {
            Ok(v) => v,
            Err(StorageError::VersionNotFound(_)) => return Ok(None),
            Err(e) => return Err(e),
        };
        if version.user_id != *user {
            return Ok(None);
        }
        match self.get_project(version.project_id) {
            Ok(project) => Ok(Some((project, version))),
            Err(StorageError::ProjectNotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }
}
