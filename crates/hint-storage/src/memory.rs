//! In-memory implementation of [`ProjectStore`].
//!
//! [`InMemoryStore`] is a first-class backend for tests and anywhere
//! persistence isn't needed. It stores all data in maps with identical
//! semantics to the SQLite backend. Exclusive `&mut self` access is the
//! serialization point for ordinal allocation.

use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::clock::{Clock, SystemClock};
use crate::error::StorageError;
use crate::guard;
use crate::traits::ProjectStore;
use crate::types::{
    Project, ProjectId, ProjectSummary, SessionToken, Timestamp, User, UserId, Version,
    VersionUpdate,
};

/// In-memory implementation of [`ProjectStore`].
#[derive(Debug)]
pub struct InMemoryStore {
    users: HashMap<UserId, User>,
    /// Includes soft-deleted projects.
    projects: BTreeMap<ProjectId, Project>,
    /// Includes soft-deleted versions.
    versions: HashMap<SessionToken, Version>,
    next_project_id: i64,
    clock: Arc<dyn Clock>,
}

impl InMemoryStore {
    /// Creates a new empty in-memory store.
    pub fn new() -> Self {
        InMemoryStore {
            users: HashMap::new(),
            projects: BTreeMap::new(),
            versions: HashMap::new(),
            next_project_id: 1,
            clock: Arc::new(SystemClock),
        }
    }

    /// Replaces the time source.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    fn require_user(&self, id: &UserId) -> Result<&User, StorageError> {
        self.users
            .get(id)
            .ok_or_else(|| StorageError::UserNotFound(id.to_string()))
    }

    /// Returns the project row whether or not it is deleted.
    fn get_any_project(&self, id: ProjectId) -> Result<&Project, StorageError> {
        self.projects
            .get(&id)
            .ok_or(StorageError::ProjectNotFound(id.0))
    }

    fn get_live_project_mut(&mut self, id: ProjectId) -> Result<&mut Project, StorageError> {
        self.projects
            .get_mut(&id)
            .filter(|p| !p.deleted)
            .ok_or(StorageError::ProjectNotFound(id.0))
    }

    fn get_stored_version(&self, session: &SessionToken) -> Result<&Version, StorageError> {
        self.versions
            .get(session)
            .ok_or_else(|| StorageError::VersionNotFound(session.to_string()))
    }

    /// All versions of a project, ascending by ordinal.
    fn versions_of(&self, project: ProjectId, include_deleted: bool) -> Vec<&Version> {
        let mut versions: Vec<&Version> = self
            .versions
            .values()
            .filter(|v| v.project_id == project && (include_deleted || !v.deleted))
            .collect();
        versions.sort_by_key(|v| v.version_id);
        versions
    }

    /// Deleted rows keep their ordinal, so the next one is past all of them.
    fn next_ordinal(&self, project: ProjectId) -> i64 {
        self.versions
            .values()
            .filter(|v| v.project_id == project)
            .map(|v| v.version_id)
            .max()
            .unwrap_or(0)
            + 1
    }

    fn fresh_token(&self) -> SessionToken {
        let mut token = SessionToken::generate();
        while self.versions.contains_key(&token) {
            token = SessionToken::generate();
        }
        token
    }

    fn insert_version(
        &mut self,
        project: ProjectId,
        user: &UserId,
        state: &str,
        note: Option<&str>,
    ) -> SessionToken {
        let session = self.fresh_token();
        let now = self.clock.now();
        let version = Version {
            session: session.clone(),
            project_id: project,
            user_id: user.clone(),
            version_id: self.next_ordinal(project),
            state: state.to_string(),
            note: note.map(str::to_string),
            created: now,
            updated: now,
            deleted: false,
        };
        tracing::info!(
            project = project.0,
            version_id = version.version_id,
            session = %session,
            "created version"
        );
        self.versions.insert(session.clone(), version);
        session
    }

    /// Checks that `user` may append versions to `project`.
    fn check_version_writer(&self, project: ProjectId, user: &UserId) -> Result<(), StorageError> {
        let stored = self.get_project(project)?;
        self.require_user(user)?;
        guard::require_owner(&stored, user)
    }

    /// Checks the source project and sharer of a share request.
    fn check_share_source(&self, id: ProjectId, from: &UserId) -> Result<Project, StorageError> {
        let project = self.get_project(id)?;
        self.require_user(from)?;
        guard::require_owner(&project, from)?;
        Ok(project)
    }

    fn copy_project_to(&mut self, source: &Project, from: &UserId, to: &UserId) -> ProjectId {
        let id = ProjectId(self.next_project_id);
        self.next_project_id += 1;
        self.projects.insert(
            id,
            Project {
                id,
                user_id: Some(to.clone()),
                name: source.name.clone(),
                note: source.note.clone(),
                shared_by: Some(from.clone()),
                is_uploaded: false,
                deleted: false,
            },
        );

        let originals: Vec<(String, Option<String>)> = self
            .versions_of(source.id, false)
            .into_iter()
            .map(|v| (v.state.clone(), v.note.clone()))
            .collect();
        for (state, note) in &originals {
            self.insert_version(id, to, state, note.as_deref());
        }

        tracing::info!(
            source = source.id.0,
            copy = id.0,
            from = %from,
            to = %to,
            versions = originals.len(),
            "shared project"
        );
        id
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ProjectStore for InMemoryStore {
    // -------------------------------------------------------------------
    // User registry
    // -------------------------------------------------------------------

    fn create_user(&mut self, id: &UserId) -> Result<User, StorageError> {
        guard::validate_user_id(id)?;
        if self.users.contains_key(id) {
            return Err(StorageError::UserExists(id.to_string()));
        }
        let user = User {
            id: id.clone(),
            created: self.clock.now(),
        };
        self.users.insert(id.clone(), user.clone());
        tracing::info!(user = %id, "created user");
        Ok(user)
    }

    fn get_user(&self, id: &UserId) -> Result<User, StorageError> {
        self.require_user(id).cloned()
    }

    fn user_exists(&self, id: &UserId) -> Result<bool, StorageError> {
        Ok(self.users.contains_key(id))
    }

    // -------------------------------------------------------------------
    // Projects
    // -------------------------------------------------------------------

    fn create_project(
        &mut self,
        user: &UserId,
        name: &str,
        note: Option<&str>,
    ) -> Result<ProjectId, StorageError> {
        guard::validate_name(name)?;
        self.require_user(user)?;
        let id = ProjectId(self.next_project_id);
        self.next_project_id += 1;
        self.projects.insert(
            id,
            Project {
                id,
                user_id: Some(user.clone()),
                name: name.to_string(),
                note: note.map(str::to_string),
                shared_by: None,
                is_uploaded: false,
                deleted: false,
            },
        );
        tracing::info!(project = id.0, user = %user, "created project");
        Ok(id)
    }

    fn get_project(&self, id: ProjectId) -> Result<Project, StorageError> {
        self.get_any_project(id)
            .ok()
            .filter(|p| !p.deleted)
            .cloned()
            .ok_or(StorageError::ProjectNotFound(id.0))
    }

    fn rename_project(&mut self, id: ProjectId, name: &str) -> Result<(), StorageError> {
        guard::validate_name(name)?;
        let project = self.get_live_project_mut(id)?;
        project.name = name.to_string();
        tracing::debug!(project = id.0, "renamed project");
        Ok(())
    }

    fn update_project_note(
        &mut self,
        id: ProjectId,
        note: Option<&str>,
    ) -> Result<(), StorageError> {
        let project = self.get_live_project_mut(id)?;
        project.note = note.map(str::to_string);
        tracing::debug!(project = id.0, "updated project note");
        Ok(())
    }

    fn mark_uploaded(&mut self, id: ProjectId) -> Result<(), StorageError> {
        let project = self.get_live_project_mut(id)?;
        project.is_uploaded = true;
        tracing::debug!(project = id.0, "marked project uploaded");
        Ok(())
    }

    fn share_project(
        &mut self,
        id: ProjectId,
        from: &UserId,
        to: &UserId,
    ) -> Result<ProjectId, StorageError> {
        let source = self.check_share_source(id, from)?;
        self.require_user(to)?;
        Ok(self.copy_project_to(&source, from, to))
    }

    fn share_project_with_many(
        &mut self,
        id: ProjectId,
        from: &UserId,
        recipients: &[UserId],
    ) -> Result<Vec<ProjectId>, StorageError> {
        let source = self.check_share_source(id, from)?;
        for to in recipients {
            self.require_user(to)?;
        }
        Ok(recipients
            .iter()
            .map(|to| self.copy_project_to(&source, from, to))
            .collect())
    }

    fn list_projects(&self, user: &UserId) -> Result<Vec<ProjectSummary>, StorageError> {
        self.require_user(user)?;
        let mut summaries: Vec<ProjectSummary> = self
            .projects
            .values()
            .filter(|p| !p.deleted && p.is_owned_by(user))
            .map(|p| ProjectSummary {
                project: p.clone(),
                versions: self.versions_of(p.id, false).into_iter().cloned().collect(),
            })
            .collect();
        // Newest activity first, projects without versions last.
        summaries.sort_by_key(|s| Reverse((s.last_updated(), s.project.id)));
        Ok(summaries)
    }

    fn delete_project(&mut self, id: ProjectId, requester: &UserId) -> Result<(), StorageError> {
        let project = self.get_project(id)?;
        guard::require_owner(&project, requester)?;

        let clock = Arc::clone(&self.clock);
        let mut cascaded = 0usize;
        for version in self
            .versions
            .values_mut()
            .filter(|v| v.project_id == id && !v.deleted)
        {
            version.deleted = true;
            version.updated = guard::next_updated(clock.as_ref(), version.updated);
            cascaded += 1;
        }
        self.get_live_project_mut(id)?.deleted = true;
        tracing::info!(project = id.0, versions = cascaded, "deleted project");
        Ok(())
    }

    fn get_share_lineage(&self, id: ProjectId) -> Result<Option<User>, StorageError> {
        let project = self.get_project(id)?;
        project
            .shared_by
            .as_ref()
            .map(|sharer| self.get_user(sharer))
            .transpose()
    }

    // -------------------------------------------------------------------
    // Versions
    // -------------------------------------------------------------------

    fn create_version(
        &mut self,
        project: ProjectId,
        user: &UserId,
        state: &str,
        note: Option<&str>,
    ) -> Result<SessionToken, StorageError> {
        self.check_version_writer(project, user)?;
        Ok(self.insert_version(project, user, state, note))
    }

    fn copy_version(
        &mut self,
        parent: &SessionToken,
        project: ProjectId,
        user: &UserId,
    ) -> Result<SessionToken, StorageError> {
        self.check_version_writer(project, user)?;
        let source = self.get_version(parent)?;
        if source.project_id != project {
            return Err(StorageError::VersionNotFound(parent.to_string()));
        }
        Ok(self.insert_version(project, user, &source.state, source.note.as_deref()))
    }

    fn update_version(
        &mut self,
        session: &SessionToken,
        update: &VersionUpdate,
    ) -> Result<Timestamp, StorageError> {
        let clock = Arc::clone(&self.clock);
        let version = self
            .versions
            .get_mut(session)
            .ok_or_else(|| StorageError::VersionNotFound(session.to_string()))?;
        guard::check_update(version, update)?;

        if let Some(state) = &update.state {
            version.state = state.clone();
        }
        if let Some(note) = &update.note {
            version.note = note.clone();
        }
        version.updated = guard::next_updated(clock.as_ref(), version.updated);
        tracing::debug!(session = %session, updated = %version.updated, "updated version");
        Ok(version.updated)
    }

    fn soft_delete_version(&mut self, session: &SessionToken) -> Result<(), StorageError> {
        let clock = Arc::clone(&self.clock);
        let version = self
            .versions
            .get_mut(session)
            .ok_or_else(|| StorageError::VersionNotFound(session.to_string()))?;
        if version.deleted {
            return Ok(());
        }
        version.deleted = true;
        version.updated = guard::next_updated(clock.as_ref(), version.updated);
        tracing::info!(session = %session, "deleted version");
        Ok(())
    }

    fn get_version(&self, session: &SessionToken) -> Result<Version, StorageError> {
        let version = self.get_stored_version(session)?;
        if version.deleted {
            return Err(StorageError::VersionNotFound(session.to_string()));
        }
        Ok(version.clone())
    }

    fn get_version_including_deleted(
        &self,
        session: &SessionToken,
    ) -> Result<Version, StorageError> {
        self.get_stored_version(session).cloned()
    }

    fn get_version_by_ordinal(
        &self,
        project: ProjectId,
        version_id: i64,
    ) -> Result<Version, StorageError> {
        guard::validate_ordinal(version_id)?;
        self.get_project(project)?;
        self.versions
            .values()
            .find(|v| v.project_id == project && v.version_id == version_id && !v.deleted)
            .cloned()
            .ok_or_else(|| guard::ordinal_not_found(project, version_id))
    }

    fn list_versions(
        &self,
        project: ProjectId,
        include_deleted: bool,
    ) -> Result<Vec<Version>, StorageError> {
        // Audit read: answers for deleted projects too.
        self.get_any_project(project)?;
        Ok(self
            .versions_of(project, include_deleted)
            .into_iter()
            .cloned()
            .collect())
    }
}
