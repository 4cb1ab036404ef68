#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Maps table rows to [`Record`]s.
//!
//! A model is any type implementing [`Model`]. Its columns are reflected from the live table
//! the first time they are needed, and every operation resolves its adapter through an
//! explicit [`ConnectionScope`].
//!
//! ```rust,no_run
//! use datum_database_connection::ConnectionScope;
//! use datum_orm::{Model, Queries as _, Record};
//!
//! struct User;
//!
//! impl Model for User {
//!     const NAME: &'static str = "User";
//! }
//!
//! # fn main() -> Result<(), datum_orm::OrmError> {
//! let mut scope = ConnectionScope::new();
//!
//! let mut user = Record::<User>::new(&mut scope)?;
//! user.set("email", "a@example.org")?;
//! user.save(&mut scope)?;
//!
//! let active = User::where_eq("active", true).count(&mut scope)?;
//! # Ok(())
//! # }
//! ```

pub mod enumerator;
pub mod inflector;
pub mod lifecycle;
pub mod messages;
pub mod queries;
pub mod query_proxy;
pub mod record;
pub mod reflect;

use datum_database::{CastError, DatabaseError, TryFromError};
use datum_database_connection::{ConnectionError, ROOT_HIERARCHY};
use thiserror::Error;

pub use datum_database::{
    Column, ColumnType, DatabaseValue,
    query::{Condition, SortDirection, where_eq, where_in},
};
pub use datum_database_connection::ConnectionScope;
pub use enumerator::RecordEnumerator;
pub use queries::Queries;
pub use query_proxy::QueryProxy;
pub use record::Record;
pub use reflect::{Schema, clear_column_cache};

pub const CREATED_AT: &str = "created_at";
pub const UPDATED_AT: &str = "updated_at";

#[derive(Debug, Error)]
pub enum OrmError {
    #[error(transparent)]
    Database(#[from] DatabaseError),
    #[error(transparent)]
    Connection(#[from] ConnectionError),
    #[error(transparent)]
    Cast(#[from] CastError),
    #[error(transparent)]
    Conversion(#[from] TryFromError),
    #[error("{0}")]
    RecordNotFound(String),
    #[error("Unknown field '{field}' for {model}")]
    UnknownField { model: &'static str, field: String },
    #[error("{0}")]
    InvalidArgument(String),
}

/// A type whose instances are rows of one table.
///
/// Only [`Model::NAME`] is required. The table name is derived from it by pluralizing and
/// snake-casing, so `BlogPost` maps to `blog_posts`.
pub trait Model: Sized + 'static {
    const NAME: &'static str;

    /// Connection configuration key. Models sharing a hierarchy share a connection.
    const HIERARCHY: &'static str = ROOT_HIERARCHY;

    const PRIMARY_KEY: &'static str = "id";

    #[must_use]
    fn table_name() -> String {
        inflector::snakefy(&inflector::pluralize(Self::NAME))
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    struct BlogPost;

    impl Model for BlogPost {
        const NAME: &'static str = "BlogPost";
    }

    struct Person;

    impl Model for Person {
        const NAME: &'static str = "Person";

        fn table_name() -> String {
            "humans".to_string()
        }
    }

    #[test_log::test]
    fn table_name_is_pluralized_snake_case() {
        assert_eq!(BlogPost::table_name(), "blog_posts");
        assert_eq!(BlogPost::PRIMARY_KEY, "id");
        assert_eq!(BlogPost::HIERARCHY, ROOT_HIERARCHY);
    }

    #[test_log::test]
    fn table_name_can_be_overridden() {
        assert_eq!(Person::table_name(), "humans");
    }
}
