//! Storage for modelling projects and their versioned sessions.
//!
//! Provides the [`ProjectStore`] trait defining the storage contract that all
//! backends implement, plus the [`InMemoryStore`] and [`SqliteStore`] as
//! first-class backends.
//!
//! # Model
//!
//! - A **user** owns projects.
//! - A **project** is a named container; sharing one gives the recipient an
//!   independent copy whose `shared_by` records the sharer.
//! - A **version** (persisted session) is a snapshot of application state
//!   addressed by a random token, numbered densely within its project,
//!   guarded by an optimistic check on its `updated` timestamp and removed
//!   only by soft delete.
//!
//! # Modules
//!
//! - [`error`]: StorageError enum and its ErrorKind taxonomy
//! - [`types`]: identifiers and records
//! - [`traits`]: ProjectStore trait definition
//! - [`guard`]: validation and optimistic-lock rules shared by backends
//! - [`clock`]: time source abstraction
//! - [`memory`]: InMemoryStore implementation
//! - [`schema`]: store configuration, SQL schema and migration setup
//! - [`sqlite`]: SqliteStore implementation

pub mod clock;
pub mod error;
pub mod guard;
pub mod memory;
pub mod schema;
pub mod sqlite;
pub mod traits;
pub mod types;

#[cfg(test)]
mod contract;

// Re-export key types for ergonomic use.
#[cfg(any(test, feature = "testing"))]
pub use clock::FixedClock;
pub use clock::{Clock, SystemClock};
pub use error::{ErrorKind, StorageError};
pub use memory::InMemoryStore;
pub use schema::StoreConfig;
pub use sqlite::SqliteStore;
pub use traits::ProjectStore;
pub use types::{
    Project, ProjectId, ProjectSummary, SessionToken, Timestamp, User, UserId, Version,
    VersionUpdate,
};
