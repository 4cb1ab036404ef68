//! Finds migration scripts in a directory

use std::{
    collections::BTreeMap,
    path::Path,
    sync::LazyLock,
};

use regex::Regex;

use crate::{Result, migration::Migration};

static MIGRATION_FILE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d+)_([^.]+)\.(up|down)\.sql$").expect("Invalid Regex")
});

/// Splits a script file name into its migration id and name
#[must_use]
pub fn parse_file_name(file_name: &str) -> Option<(&str, &str)> {
    let captures = MIGRATION_FILE.captures(file_name)?;
    Some((captures.get(1)?.as_str(), captures.get(2)?.as_str()))
}

/// Every migration in `root`, sorted by id.
///
/// Files are visited in name order and only the first file seen for an id is kept.
///
/// # Errors
///
/// * If `root` cannot be read
/// * [`crate::MigrationError::AsymmetricalMigration`] if a migration lacks one of its
///   scripts
pub fn discover(root: &Path) -> Result<Vec<Migration>> {
    log::trace!("discover: scanning '{}'", root.display());

    let mut file_names = std::fs::read_dir(root)?
        .map(|entry| entry.map(|x| x.file_name()))
        .collect::<std::io::Result<Vec<_>>>()?;
    file_names.sort();

    let mut migrations = BTreeMap::new();

    for file_name in &file_names {
        let file_name = file_name.to_string_lossy();

        let Some((id, name)) = parse_file_name(&file_name) else {
            log::trace!("discover: skipping '{file_name}'");
            continue;
        };

        if migrations.contains_key(id) {
            continue;
        }

        let migration = Migration::new(root, id, name);
        migration.validate()?;
        migrations.insert(id.to_string(), migration);
    }

    log::trace!("discover: found {} migration(s)", migrations.len());

    Ok(migrations.into_values().collect())
}
