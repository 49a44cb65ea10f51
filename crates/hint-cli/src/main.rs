//! Command-line client for the hint project store.
//!
//! Provides the `hint` binary, a thin collaborator over
//! [`hint_storage::ProjectStore`]: every subcommand maps to one store call
//! and prints its result as JSON on stdout.
//!
//! Configuration comes from flags or environment variables:
//! - `HINT_DB_PATH`: SQLite database file path (default: "hint.db")
//! - `HINT_BUSY_TIMEOUT_MS`: how long to wait on a locked database (default: 5000)

use std::process;
use std::time::Duration;

use clap::{Parser, Subcommand};
use serde::Serialize;

use hint_storage::{
    ErrorKind, Project, ProjectId, ProjectStore, ProjectSummary, SessionToken, SqliteStore,
    StorageError, StoreConfig, Timestamp, User, UserId, Version, VersionUpdate,
};

/// Manage modelling projects and their saved versions.
#[derive(Parser)]
#[command(name = "hint", about = "Manage modelling projects and their saved versions")]
struct Cli {
    /// Path to the project database file.
    #[arg(long, env = "HINT_DB_PATH", default_value = StoreConfig::DEFAULT_PATH, global = true)]
    db: String,

    /// Milliseconds to wait on a locked database before failing.
    #[arg(long, env = "HINT_BUSY_TIMEOUT_MS", default_value_t = 5000, global = true)]
    busy_timeout_ms: u64,

    #[command(subcommand)]
    command: Commands,
}

/// Available subcommands.
#[derive(Subcommand)]
enum Commands {
    /// Register and inspect users.
    User {
        #[command(subcommand)]
        action: UserCommand,
    },
    /// Create, share and manage projects.
    Project {
        #[command(subcommand)]
        action: ProjectCommand,
    },
    /// Save, update and inspect project versions.
    Version {
        #[command(subcommand)]
        action: VersionCommand,
    },
}

#[derive(Subcommand)]
enum UserCommand {
    /// Register a new user.
    Add { id: String },
    /// Show a registered user.
    Show { id: String },
}

#[derive(Subcommand)]
enum ProjectCommand {
    /// Create a project owned by a user.
    Create {
        #[arg(long)]
        user: String,
        #[arg(long)]
        name: String,
        #[arg(long)]
        note: Option<String>,
    },
    /// Show one project.
    Show { id: i64 },
    /// List a user's projects, most recently updated first.
    List {
        #[arg(long)]
        user: String,
    },
    /// Rename a project.
    Rename { id: i64, name: String },
    /// Set the project note, or clear it when omitted.
    Note {
        id: i64,
        #[arg(long)]
        note: Option<String>,
    },
    /// Mark a project as uploaded.
    Upload { id: i64 },
    /// Give one or more users their own copy of a project.
    Share {
        id: i64,
        #[arg(long)]
        from: String,
        #[arg(long = "to", required = true)]
        to: Vec<String>,
    },
    /// Show who shared a project with its owner.
    Lineage { id: i64 },
    /// Delete a project and all its versions.
    Delete {
        id: i64,
        #[arg(long)]
        user: String,
    },
}

#[derive(Subcommand)]
enum VersionCommand {
    /// Save a new version of a project.
    Create {
        #[arg(long)]
        project: i64,
        #[arg(long)]
        user: String,
        #[arg(long)]
        state: String,
        #[arg(long)]
        note: Option<String>,
    },
    /// Save a new version copied from an existing one.
    Copy {
        parent: String,
        #[arg(long)]
        project: i64,
        #[arg(long)]
        user: String,
    },
    /// Update a version last read at `--expected-updated` (epoch millis).
    Update {
        session: String,
        #[arg(long)]
        expected_updated: i64,
        #[arg(long)]
        state: Option<String>,
        #[arg(long, conflicts_with = "clear_note")]
        note: Option<String>,
        /// Remove the version's note.
        #[arg(long)]
        clear_note: bool,
    },
    /// Soft-delete a version.
    Delete { session: String },
    /// Show a version by session token.
    Show {
        session: String,
        #[arg(long)]
        include_deleted: bool,
    },
    /// Show a version by its number within a project.
    Get {
        #[arg(long)]
        project: i64,
        #[arg(long)]
        ordinal: i64,
    },
    /// List a project's versions.
    List {
        #[arg(long)]
        project: i64,
        #[arg(long)]
        include_deleted: bool,
    },
    /// Show the newest live version of a project.
    Latest {
        #[arg(long)]
        project: i64,
    },
    /// Resolve a user's session token to its project.
    Current {
        session: String,
        #[arg(long)]
        user: String,
    },
}

/// A version together with the project it belongs to.
#[derive(Serialize)]
struct CurrentProject {
    project: Project,
    version: Version,
}

/// Result of one subcommand, printed as JSON.
#[derive(Serialize)]
#[serde(untagged)]
enum Output {
    User(User),
    Project(Project),
    Projects(Vec<ProjectSummary>),
    Created { id: ProjectId },
    Shared { ids: Vec<ProjectId> },
    Lineage { shared_by: Option<User> },
    Version(Version),
    Versions(Vec<Version>),
    Latest { version: Option<Version> },
    Session { session: SessionToken },
    Updated { updated: Timestamp, updated_at: String },
    Current(Option<CurrentProject>),
    Done { ok: bool },
}

const DONE: Output = Output::Done { ok: true };

fn main() {
    tracing_subscriber::fmt().with_writer(std::io::stderr).init();
    let cli = Cli::parse();

    let config = StoreConfig::new(cli.db)
        .with_busy_timeout(Duration::from_millis(cli.busy_timeout_ms));
    let mut store = match SqliteStore::open(&config) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Error: failed to open database '{}': {}", config.path, e);
            process::exit(exit_code(e.kind()));
        }
    };

    process::exit(run(&mut store, cli.command));
}

/// Executes one command and reports its outcome.
///
/// Returns exit code: 0 = success, otherwise see [`exit_code`].
fn run<S: ProjectStore>(store: &mut S, command: Commands) -> i32 {
    match execute(store, command) {
        Ok(output) => {
            let json = serde_json::to_string_pretty(&output).unwrap_or_else(|e| {
                format!("{{\"error\": \"failed to serialize result: {}\"}}", e)
            });
            println!("{}", json);
            0
        }
        Err(e) => {
            tracing::debug!(kind = %e.kind(), "command failed");
            eprintln!("Error ({}): {}", e.kind(), e);
            exit_code(e.kind())
        }
    }
}

/// Maps an error kind to the process exit code.
fn exit_code(kind: ErrorKind) -> i32 {
    match kind {
        ErrorKind::Internal => 1,
        ErrorKind::Validation => 2,
        ErrorKind::NotFound => 3,
        ErrorKind::Authorization => 4,
        ErrorKind::Conflict => 5,
        ErrorKind::Timeout => 6,
    }
}

fn execute<S: ProjectStore>(store: &mut S, command: Commands) -> Result<Output, StorageError> {
    match command {
        Commands::User { action } => execute_user(store, action),
        Commands::Project { action } => execute_project(store, action),
        Commands::Version { action } => execute_version(store, action),
    }
}

fn execute_user<S: ProjectStore>(store: &mut S, action: UserCommand) -> Result<Output, StorageError> {
    match action {
        UserCommand::Add { id } => Ok(Output::User(store.create_user(&UserId(id))?)),
        UserCommand::Show { id } => Ok(Output::User(store.get_user(&UserId(id))?)),
    }
}

fn execute_project<S: ProjectStore>(
    store: &mut S,
    action: ProjectCommand,
) -> Result<Output, StorageError> {
    match action {
        ProjectCommand::Create { user, name, note } => {
            let id = store.create_project(&UserId(user), &name, note.as_deref())?;
            Ok(Output::Created { id })
        }
        ProjectCommand::Show { id } => Ok(Output::Project(store.get_project(ProjectId(id))?)),
        ProjectCommand::List { user } => Ok(Output::Projects(store.list_projects(&UserId(user))?)),
        ProjectCommand::Rename { id, name } => {
            store.rename_project(ProjectId(id), &name)?;
            Ok(DONE)
        }
        ProjectCommand::Note { id, note } => {
            store.update_project_note(ProjectId(id), note.as_deref())?;
            Ok(DONE)
        }
        ProjectCommand::Upload { id } => {
            store.mark_uploaded(ProjectId(id))?;
            Ok(DONE)
        }
        ProjectCommand::Share { id, from, to } => {
            let recipients: Vec<UserId> = to.into_iter().map(UserId).collect();
            let ids = match recipients.as_slice() {
                [single] => vec![store.share_project(ProjectId(id), &UserId(from), single)?],
                many => store.share_project_with_many(ProjectId(id), &UserId(from), many)?,
            };
            Ok(Output::Shared { ids })
        }
        ProjectCommand::Lineage { id } => Ok(Output::Lineage {
            shared_by: store.get_share_lineage(ProjectId(id))?,
        }),
        ProjectCommand::Delete { id, user } => {
            store.delete_project(ProjectId(id), &UserId(user))?;
            Ok(DONE)
        }
    }
}

fn execute_version<S: ProjectStore>(
    store: &mut S,
    action: VersionCommand,
) -> Result<Output, StorageError> {
    match action {
        VersionCommand::Create {
            project,
            user,
            state,
            note,
        } => {
            let session =
                store.create_version(ProjectId(project), &UserId(user), &state, note.as_deref())?;
            Ok(Output::Session { session })
        }
        VersionCommand::Copy {
            parent,
            project,
            user,
        } => {
            let session =
                store.copy_version(&SessionToken(parent), ProjectId(project), &UserId(user))?;
            Ok(Output::Session { session })
        }
        VersionCommand::Update {
            session,
            expected_updated,
            state,
            note,
            clear_note,
        } => {
            let note = if clear_note { Some(None) } else { note.map(Some) };
            let update = VersionUpdate {
                expected_updated: Timestamp::from_millis(expected_updated),
                state,
                note,
            };
            let updated = store.update_version(&SessionToken(session), &update)?;
            Ok(Output::Updated {
                updated,
                updated_at: updated.to_string(),
            })
        }
        VersionCommand::Delete { session } => {
            store.soft_delete_version(&SessionToken(session))?;
            Ok(DONE)
        }
        VersionCommand::Show {
            session,
            include_deleted,
        } => {
            let token = SessionToken(session);
            let version = if include_deleted {
                store.get_version_including_deleted(&token)?
            } else {
                store.get_version(&token)?
            };
            Ok(Output::Version(version))
        }
        VersionCommand::Get { project, ordinal } => Ok(Output::Version(
            store.get_version_by_ordinal(ProjectId(project), ordinal)?,
        )),
        VersionCommand::List {
            project,
            include_deleted,
        } => Ok(Output::Versions(
            store.list_versions(ProjectId(project), include_deleted)?,
        )),
        VersionCommand::Latest { project } => Ok(Output::Latest {
            version: store.latest_version(ProjectId(project))?,
        }),
        VersionCommand::Current { session, user } => {
            let current = store
                .find_current_project(&SessionToken(session), &UserId(user))?
                .map(|(project, version)| CurrentProject { project, version });
            Ok(Output::Current(current))
        }
    }
}
