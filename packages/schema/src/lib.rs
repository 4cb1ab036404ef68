#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! File-based schema migrations.
//!
//! Migrations are pairs of `<id>_<name>.up.sql` and `<id>_<name>.down.sql` files in one
//! directory. Applied ids are recorded in a ledger table through the adapter, and the
//! [`migrator::Migrator`] reconciles the two.

pub mod config;
pub mod discovery;
pub mod migration;
pub mod migrator;

use datum_database::DatabaseError;
use datum_database_connection::ConnectionError;
use thiserror::Error;

pub use migration::{Migration, MigrationStatus};
pub use migrator::Migrator;

#[derive(Debug, Error)]
pub enum MigrationError {
    #[error(transparent)]
    Database(#[from] DatabaseError),
    #[error(transparent)]
    Connection(#[from] ConnectionError),
    #[error("Migration directory not set")]
    MigrationDirectoryNotSet,
    #[error("{id}_{name} is asymmetrical; migrations must have a .up.sql and .down.sql pair")]
    AsymmetricalMigration { id: String, name: String },
    #[error("Invalid migration name '{0}'")]
    InvalidName(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, MigrationError>;
