//! Process-wide migrations directory

use std::{
    path::PathBuf,
    sync::{LazyLock, RwLock},
};

/// Environment variable consulted when no directory was set explicitly
pub const MIGRATIONS_PATH_ENV: &str = "DATUM_MIGRATIONS_PATH";

static MIGRATIONS_PATH: LazyLock<RwLock<Option<PathBuf>>> = LazyLock::new(|| RwLock::new(None));

/// Sets the directory [`crate::Migrator::from_config`] reads migrations from. `None` falls
/// back to [`MIGRATIONS_PATH_ENV`].
///
/// # Panics
///
/// * If the `MIGRATIONS_PATH` `RwLock` is poisoned
pub fn set_migrations_path(path: Option<PathBuf>) {
    *MIGRATIONS_PATH.write().unwrap() = path;
}

/// The explicitly set directory, else the value of [`MIGRATIONS_PATH_ENV`]
///
/// # Panics
///
/// * If the `MIGRATIONS_PATH` `RwLock` is poisoned
#[must_use]
pub fn migrations_path() -> Option<PathBuf> {
    if let Some(path) = MIGRATIONS_PATH.read().unwrap().clone() {
        return Some(path);
    }

    std::env::var_os(MIGRATIONS_PATH_ENV)
        .filter(|x| !x.is_empty())
        .map(PathBuf::from)
}
