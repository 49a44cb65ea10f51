//! SQLite implementation of [`ProjectStore`].
//!
//! [`SqliteStore`] persists users, projects and versions in a SQLite database
//! with WAL mode, foreign keys and automatic schema migrations. Every write
//! runs in a `BEGIN IMMEDIATE` transaction: the write lock is taken before
//! the first read, so ordinal allocation and the optimistic-lock check see
//! the same snapshot they commit against, across any number of connections.

use std::sync::Arc;

use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};

use crate::clock::{Clock, SystemClock};
use crate::error::StorageError;
use crate::guard;
use crate::schema::StoreConfig;
use crate::traits::ProjectStore;
use crate::types::{
    Project, ProjectId, ProjectSummary, SessionToken, Timestamp, User, UserId, Version,
    VersionUpdate,
};

/// SQLite-backed implementation of [`ProjectStore`].
pub struct SqliteStore {
    conn: Connection,
    clock: Arc<dyn Clock>,
}

impl SqliteStore {
    /// Opens (or creates) a SQLite database at `path` with default settings.
    pub fn new(path: &str) -> Result<Self, StorageError> {
        Self::open(&StoreConfig::new(path))
    }

    /// Opens (or creates) the database described by `config`.
    pub fn open(config: &StoreConfig) -> Result<Self, StorageError> {
        let conn = crate::schema::open_database(config)?;
        tracing::debug!(path = %config.path, "opened sqlite store");
        Ok(SqliteStore {
            conn,
            clock: Arc::new(SystemClock),
        })
    }

    /// Opens an in-memory SQLite database (for testing).
    pub fn in_memory() -> Result<Self, StorageError> {
        let conn = crate::schema::open_in_memory()?;
        Ok(SqliteStore {
            conn,
            clock: Arc::new(SystemClock),
        })
    }

    /// Replaces the time source.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    fn write_transaction(&mut self) -> Result<rusqlite::Transaction<'_>, StorageError> {
        Ok(self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?)
    }
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: UserId(row.get(0)?),
        created: Timestamp(row.get(1)?),
    })
}

fn project_from_row(row: &Row<'_>) -> rusqlite::Result<Project> {
    Ok(Project {
        id: ProjectId(row.get(0)?),
        user_id: row.get::<_, Option<String>>(1)?.map(UserId),
        name: row.get(2)?,
        note: row.get(3)?,
        shared_by: row.get::<_, Option<String>>(4)?.map(UserId),
        is_uploaded: row.get(5)?,
        deleted: row.get(6)?,
    })
}

fn version_from_row(row: &Row<'_>) -> rusqlite::Result<Version> {
    Ok(Version {
        session: SessionToken(row.get(0)?),
        project_id: ProjectId(row.get(1)?),
        user_id: UserId(row.get(2)?),
        version_id: row.get(3)?,
        state: row.get(4)?,
        note: row.get(5)?,
        created: Timestamp(row.get(6)?),
        updated: Timestamp(row.get(7)?),
        deleted: row.get(8)?,
    })
}

// ---------------------------------------------------------------------------
// Queries shared by plain reads and write transactions
// ---------------------------------------------------------------------------

fn require_user(conn: &Connection, id: &UserId) -> Result<User, StorageError> {
    conn.prepare_cached(r#"SELECT id, created FROM "user" WHERE id = ?1"#)?
        .query_row(params![id.as_str()], user_from_row)
        .optional()?
        .ok_or_else(|| StorageError::UserNotFound(id.to_string()))
}

/// Returns the project row whether or not it is deleted.
fn require_any_project(conn: &Connection, id: ProjectId) -> Result<Project, StorageError> {
    conn.prepare_cached(
        "SELECT id, user_id, name, note, shared_by, is_uploaded, deleted FROM project WHERE id = ?1",
    )?
    .query_row(params![id.0], project_from_row)
    .optional()?
    .ok_or(StorageError::ProjectNotFound(id.0))
}

fn require_live_project(conn: &Connection, id: ProjectId) -> Result<Project, StorageError> {
    let project = require_any_project(conn, id)?;
    if project.deleted {
        return Err(StorageError::ProjectNotFound(id.0));
    }
    Ok(project)
}

fn require_stored_version(conn: &Connection, session: &SessionToken) -> Result<Version, StorageError> {
    conn.prepare_cached(
        "SELECT session, project_id, user_id, version_id, state, note, created, updated, deleted FROM user_session WHERE session = ?1",
    )?
    .query_row(params![session.as_str()], version_from_row)
    .optional()?
    .ok_or_else(|| StorageError::VersionNotFound(session.to_string()))
}

fn require_live_version(conn: &Connection, session: &SessionToken) -> Result<Version, StorageError> {
    let version = require_stored_version(conn, session)?;
    if version.deleted {
        return Err(StorageError::VersionNotFound(session.to_string()));
    }
    Ok(version)
}

fn query_versions(
    conn: &Connection,
    project: ProjectId,
    include_deleted: bool,
) -> Result<Vec<Version>, StorageError> {
    let mut stmt = conn.prepare_cached(
        "SELECT session, project_id, user_id, version_id, state, note, created, updated, deleted FROM user_session WHERE project_id = ?1 AND (?2 OR deleted = 0) ORDER BY version_id",
    )?;
    let rows = stmt.query_map(params![project.0, include_deleted], version_from_row)?;
    let mut result = Vec::new();
    for row in rows {
        result.push(row?);
    }
    Ok(result)
}

/// Checks that `user` may append versions to `project`.
fn check_version_writer(conn: &Connection, project: ProjectId, user: &UserId) -> Result<(), StorageError> {
    let stored = require_live_project(conn, project)?;
    require_user(conn, user)?;
    guard::require_owner(&stored, user)
}

/// Checks the source project and sharer of a share request.
fn check_share_source(conn: &Connection, id: ProjectId, from: &UserId) -> Result<Project, StorageError> {
    let project = require_live_project(conn, id)?;
    require_user(conn, from)?;
    guard::require_owner(&project, from)?;
    Ok(project)
}

/// Inserts a version with the next ordinal. Must run inside a write
/// transaction so the `MAX` read and the insert are not interleaved.
fn insert_version(
    conn: &Connection,
    clock: &dyn Clock,
    project: ProjectId,
    user: &UserId,
    state: &str,
    note: Option<&str>,
) -> Result<SessionToken, StorageError> {
    // Deleted rows keep their ordinal, so count them too.
    let version_id: i64 = conn.query_row(
        "SELECT COALESCE(MAX(version_id), 0) + 1 FROM user_session WHERE project_id = ?1",
        params![project.0],
        |row| row.get(0),
    )?;
    let session = SessionToken::generate();
    let now = clock.now();
    conn.prepare_cached(
        "INSERT INTO user_session (session, project_id, user_id, version_id, state, note, created, updated, deleted) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7, 0)",
    )?
    .execute(params![
        session.as_str(),
        project.0,
        user.as_str(),
        version_id,
        state,
        note,
        now.as_millis(),
    ])?;
    tracing::info!(
        project = project.0,
        version_id,
        session = %session,
        "created version"
    );
    Ok(session)
}

fn insert_project(
    conn: &Connection,
    owner: &UserId,
    name: &str,
    note: Option<&str>,
    shared_by: Option<&UserId>,
) -> Result<ProjectId, StorageError> {
    conn.prepare_cached(
        "INSERT INTO project (user_id, name, note, shared_by, is_uploaded, deleted) VALUES (?1, ?2, ?3, ?4, 0, 0)",
    )?
    .execute(params![
        owner.as_str(),
        name,
        note,
        shared_by.map(UserId::as_str),
    ])?;
    Ok(ProjectId(conn.last_insert_rowid()))
}

fn copy_project_to(
    conn: &Connection,
    clock: &dyn Clock,
    source: &Project,
    from: &UserId,
    to: &UserId,
) -> Result<ProjectId, StorageError> {
    let id = insert_project(conn, to, &source.name, source.note.as_deref(), Some(from))?;
    let originals = query_versions(conn, source.id, false)?;
    for version in &originals {
        insert_version(conn, clock, id, to, &version.state, version.note.as_deref())?;
    }
    tracing::info!(
        source = source.id.0,
        copy = id.0,
        from = %from,
        to = %to,
        versions = originals.len(),
        "shared project"
    );
    Ok(id)
}

/// Executes a single-row update on a live project.
fn update_live_project(
    conn: &Connection,
    id: ProjectId,
    sql: &str,
    value: &dyn rusqlite::ToSql,
) -> Result<(), StorageError> {
    let changed = conn.prepare_cached(sql)?.execute(params![value, id.0])?;
    if changed == 0 {
        return Err(StorageError::ProjectNotFound(id.0));
    }
    Ok(())
}

impl ProjectStore for SqliteStore {
    // -------------------------------------------------------------------
    // User registry
    // -------------------------------------------------------------------

    fn create_user(&mut self, id: &UserId) -> Result<User, StorageError> {
        guard::validate_user_id(id)?;
        let now = self.clock.now();
        let tx = self.write_transaction()?;
        let exists: bool = tx.query_row(
            r#"SELECT EXISTS(SELECT 1 FROM "user" WHERE id = ?1)"#,
            params![id.as_str()],
            |row| row.get(0),
        )?;
        if exists {
            return Err(StorageError::UserExists(id.to_string()));
        }
        tx.execute(
            r#"INSERT INTO "user" (id, created) VALUES (?1, ?2)"#,
            params![id.as_str(), now.as_millis()],
        )?;
        tx.commit()?;
        tracing::info!(user = %id, "created user");
        Ok(User {
            id: id.clone(),
            created: now,
        })
    }

    fn get_user(&self, id: &UserId) -> Result<User, StorageError> {
        require_user(&self.conn, id)
    }

    fn user_exists(&self, id: &UserId) -> Result<bool, StorageError> {
        Ok(self.conn.query_row(
            r#"SELECT EXISTS(SELECT 1 FROM "user" WHERE id = ?1)"#,
            params![id.as_str()],
            |row| row.get(0),
        )?)
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
        let tx = self.write_transaction()?;
        require_user(&tx, user)?;
        let id = insert_project(&tx, user, name, note, None)?;
        tx.commit()?;
        tracing::info!(project = id.0, user = %user, "created project");
        Ok(id)
    }

    fn get_project(&self, id: ProjectId) -> Result<Project, StorageError> {
        require_live_project(&self.conn, id)
    }

    fn rename_project(&mut self, id: ProjectId, name: &str) -> Result<(), StorageError> {
        guard::validate_name(name)?;
        let tx = self.write_transaction()?;
        update_live_project(
            &tx,
            id,
            "UPDATE project SET name = ?1 WHERE id = ?2 AND deleted = 0",
            &name,
        )?;
        tx.commit()?;
        tracing::debug!(project = id.0, "renamed project");
        Ok(())
    }

    fn update_project_note(
        &mut self,
        id: ProjectId,
        note: Option<&str>,
    ) -> Result<(), StorageError> {
        let tx = self.write_transaction()?;
        update_live_project(
            &tx,
            id,
            "UPDATE project SET note = ?1 WHERE id = ?2 AND deleted = 0",
            &note,
        )?;
        tx.commit()?;
        tracing::debug!(project = id.0, "updated project note");
        Ok(())
    }

    fn mark_uploaded(&mut self, id: ProjectId) -> Result<(), StorageError> {
        let tx = self.write_transaction()?;
        update_live_project(
            &tx,
            id,
            "UPDATE project SET is_uploaded = ?1 WHERE id = ?2 AND deleted = 0",
            &true,
        )?;
        tx.commit()?;
        tracing::debug!(project = id.0, "marked project uploaded");
        Ok(())
    }

    fn share_project(
        &mut self,
        id: ProjectId,
        from: &UserId,
        to: &UserId,
    ) -> Result<ProjectId, StorageError> {
        let clock = Arc::clone(&self.clock);
        let tx = self.write_transaction()?;
        let source = check_share_source(&tx, id, from)?;
        require_user(&tx, to)?;
        let copy = copy_project_to(&tx, clock.as_ref(), &source, from, to)?;
        tx.commit()?;
        Ok(copy)
    }

    fn share_project_with_many(
        &mut self,
        id: ProjectId,
        from: &UserId,
        recipients: &[UserId],
    ) -> Result<Vec<ProjectId>, StorageError> {
        let clock = Arc::clone(&self.clock);
        let tx = self.write_transaction()?;
        let source = check_share_source(&tx, id, from)?;
        for to in recipients {
            require_user(&tx, to)?;
        }
        let mut copies = Vec::with_capacity(recipients.len());
        for to in recipients {
            copies.push(copy_project_to(&tx, clock.as_ref(), &source, from, to)?);
        }
        tx.commit()?;
        Ok(copies)
    }

    fn list_projects(&self, user: &UserId) -> Result<Vec<ProjectSummary>, StorageError> {
        require_user(&self.conn, user)?;
        let projects: Vec<Project> = {
            let mut stmt = self.conn.prepare_cached(
                "SELECT p.id, p.user_id, p.name, p.note, p.shared_by, p.is_uploaded, p.deleted \
                 FROM project p \
                 LEFT JOIN user_session v ON v.project_id = p.id AND v.deleted = 0 \
                 WHERE p.user_id = ?1 AND p.deleted = 0 \
                 GROUP BY p.id \
                 ORDER BY MAX(v.updated) IS NULL, MAX(v.updated) DESC, p.id DESC",
            )?;
            let rows = stmt.query_map(params![user.as_str()], project_from_row)?;
            let mut result = Vec::new();
            for row in rows {
                result.push(row?);
            }
            result
        };

        let mut summaries = Vec::with_capacity(projects.len());
        for project in projects {
            let versions = query_versions(&self.conn, project.id, false)?;
            summaries.push(ProjectSummary { project, versions });
        }
        Ok(summaries)
    }

    fn delete_project(&mut self, id: ProjectId, requester: &UserId) -> Result<(), StorageError> {
        let clock = Arc::clone(&self.clock);
        let tx = self.write_transaction()?;
        let project = require_live_project(&tx, id)?;
        guard::require_owner(&project, requester)?;

        let live = query_versions(&tx, id, false)?;
        {
            let mut stmt = tx.prepare_cached(
                "UPDATE user_session SET deleted = 1, updated = ?1 WHERE session = ?2",
            )?;
            for version in &live {
                let updated = guard::next_updated(clock.as_ref(), version.updated);
                stmt.execute(params![updated.as_millis(), version.session.as_str()])?;
            }
        }
        tx.execute("UPDATE project SET deleted = 1 WHERE id = ?1", params![id.0])?;
        tx.commit()?;
        tracing::info!(project = id.0, versions = live.len(), "deleted project");
        Ok(())
    }

    fn get_share_lineage(&self, id: ProjectId) -> Result<Option<User>, StorageError> {
        let project = require_live_project(&self.conn, id)?;
        project
            .shared_by
            .as_ref()
            .map(|sharer| require_user(&self.conn, sharer))
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
        let clock = Arc::clone(&self.clock);
        let tx = self.write_transaction()?;
        check_version_writer(&tx, project, user)?;
        let session = insert_version(&tx, clock.as_ref(), project, user, state, note)?;
        tx.commit()?;
        Ok(session)
    }

    fn copy_version(
        &mut self,
        parent: &SessionToken,
        project: ProjectId,
        user: &UserId,
    ) -> Result<SessionToken, StorageError> {
        let clock = Arc::clone(&self.clock);
        let tx = self.write_transaction()?;
        check_version_writer(&tx, project, user)?;
        let source = require_live_version(&tx, parent)?;
        if source.project_id != project {
            return Err(StorageError::VersionNotFound(parent.to_string()));
        }
        let session = insert_version(
            &tx,
            clock.as_ref(),
            project,
            user,
            &source.state,
            source.note.as_deref(),
        )?;
        tx.commit()?;
        Ok(session)
    }

    fn update_version(
        &mut self,
        session: &SessionToken,
        update: &VersionUpdate,
    ) -> Result<Timestamp, StorageError> {
        let clock = Arc::clone(&self.clock);
        let tx = self.write_transaction()?;
        let current = require_stored_version(&tx, session)?;
        guard::check_update(&current, update)?;

        let state = update.state.as_deref().unwrap_or(&current.state);
        let note = match &update.note {
            Some(note) => note.as_deref(),
            None => current.note.as_deref(),
        };
        let updated = guard::next_updated(clock.as_ref(), current.updated);
        tx.execute(
            "UPDATE user_session SET state = ?1, note = ?2, updated = ?3 WHERE session = ?4",
            params![state, note, updated.as_millis(), session.as_str()],
        )?;
        tx.commit()?;
        tracing::debug!(session = %session, updated = %updated, "updated version");
        Ok(updated)
    }

    fn soft_delete_version(&mut self, session: &SessionToken) -> Result<(), StorageError> {
        let clock = Arc::clone(&self.clock);
        let tx = self.write_transaction()?;
        let current = require_stored_version(&tx, session)?;
        if current.deleted {
            return Ok(());
        }
        let updated = guard::next_updated(clock.as_ref(), current.updated);
        tx.execute(
            "UPDATE user_session SET deleted = 1, updated = ?1 WHERE session = ?2",
            params![updated.as_millis(), session.as_str()],
        )?;
        tx.commit()?;
        tracing::info!(session = %session, "deleted version");
        Ok(())
    }

    fn get_version(&self, session: &SessionToken) -> Result<Version, StorageError> {
        require_live_version(&self.conn, session)
    }

    fn get_version_including_deleted(
        &self,
        session: &SessionToken,
    ) -> Result<Version, StorageError> {
        require_stored_version(&self.conn, session)
    }

    fn get_version_by_ordinal(
        &self,
        project: ProjectId,
        version_id: i64,
    ) -> Result<Version, StorageError> {
        guard::validate_ordinal(version_id)?;
        require_live_project(&self.conn, project)?;
        self.conn
            .prepare_cached(
                "SELECT session, project_id, user_id, version_id, state, note, created, updated, deleted FROM user_session WHERE project_id = ?1 AND version_id = ?2 AND deleted = 0",
            )?
            .query_row(params![project.0, version_id], version_from_row)
            .optional()?
            .ok_or_else(|| guard::ordinal_not_found(project, version_id))
    }

    fn list_versions(
        &self,
        project: ProjectId,
        include_deleted: bool,
    ) -> Result<Vec<Version>, StorageError> {
        // Audit read: answers for deleted projects too.
        require_any_project(&self.conn, project)?;
        query_versions(&self.conn, project, include_deleted)
    }
}
