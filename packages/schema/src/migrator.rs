//! Reconciles migrations on disk with the ledger and applies them

use std::{
    collections::BTreeSet,
    path::{Path, PathBuf},
};

use chrono::Utc;
use datum_database::{Adapter, adapter::transaction};
use datum_database_connection::{ConnectionScope, ROOT_HIERARCHY};

use crate::{
    MigrationError, Result, config,
    discovery::{discover, parse_file_name},
    migration::{Migration, MigrationStatus},
};

/// Applies and reverts the migrations of one directory through the adapter of one
/// connection hierarchy.
#[derive(Debug, Clone)]
pub struct Migrator {
    root: PathBuf,
    hierarchy: String,
    dry_run: bool,
}

impl Migrator {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            hierarchy: ROOT_HIERARCHY.to_string(),
            dry_run: false,
        }
    }

    /// A migrator for the configured migrations directory
    ///
    /// # Errors
    ///
    /// * [`MigrationError::MigrationDirectoryNotSet`] if no directory is configured
    pub fn from_config() -> Result<Self> {
        config::migrations_path()
            .map(Self::new)
            .ok_or(MigrationError::MigrationDirectoryNotSet)
    }

    /// Runs against the connection of `hierarchy` instead of the root one
    #[must_use]
    pub fn with_hierarchy(mut self, hierarchy: impl Into<String>) -> Self {
        self.hierarchy = hierarchy.into();
        self
    }

    /// Logs what would run without executing any script or recording it in the ledger
    #[must_use]
    pub const fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Migrations on disk
    ///
    /// # Errors
    ///
    /// * See [`discover`]
    pub fn migrations(&self) -> Result<Vec<Migration>> {
        discover(&self.root)
    }

    /// Every migration on disk and every ledger entry, sorted by id.
    ///
    /// Migrations on disk are `Up` when their id is in the ledger and `Down` otherwise.
    /// Ledger ids without scripts are reported as `Missing`.
    ///
    /// # Errors
    ///
    /// * If the migrations cannot be discovered
    /// * If no connection is configured
    /// * If the ledger cannot be created or read
    pub fn status(&self, scope: &mut ConnectionScope) -> Result<Vec<Migration>> {
        let migrations = self.migrations()?;
        let db = scope.adapter_for(&self.hierarchy)?;

        reconcile(migrations, db)
    }

    /// Applies every pending migration in ascending id order, in one transaction, and
    /// returns them. Nothing runs when there is nothing pending.
    ///
    /// # Errors
    ///
    /// * See [`Migrator::status`]
    /// * If a script cannot be read or fails. Nothing is applied in that case.
    pub fn move_forward(&self, scope: &mut ConnectionScope) -> Result<Vec<Migration>> {
        let migrations = self.migrations()?;
        let db = scope.adapter_for(&self.hierarchy)?;

        let pending = reconcile(migrations, db)?
            .into_iter()
            .filter(Migration::is_down)
            .collect::<Vec<_>>();

        if pending.is_empty() {
            log::debug!("No pending migrations");
            return Ok(pending);
        }

        log::info!(
            "About to apply {} migration{}",
            pending.len(),
            if pending.len() == 1 { "" } else { "s" }
        );

        self.run(db, &pending, Direction::Up)?;

        Ok(pending)
    }

    /// Reverts the `steps` most recently applied migrations in descending id order, in one
    /// transaction, and returns them. Their ledger rows are removed. Ledger entries without
    /// scripts are skipped.
    ///
    /// # Errors
    ///
    /// * See [`Migrator::status`]
    /// * If a script cannot be read or fails. Nothing is reverted in that case.
    pub fn rollback(&self, scope: &mut ConnectionScope, steps: usize) -> Result<Vec<Migration>> {
        let migrations = self.migrations()?;
        let db = scope.adapter_for(&self.hierarchy)?;

        let applied = reconcile(migrations, db)?
            .into_iter()
            .rev()
            .filter(|x| x.is_up() && !x.is_missing())
            .take(steps)
            .collect::<Vec<_>>();

        if applied.is_empty() {
            log::debug!("No migrations to revert");
            return Ok(applied);
        }

        log::info!(
            "About to revert {} migration{}",
            applied.len(),
            if applied.len() == 1 { "" } else { "s" }
        );

        self.run(db, &applied, Direction::Down)?;

        Ok(applied)
    }

    fn run(
        &self,
        db: &mut dyn Adapter,
        migrations: &[Migration],
        direction: Direction,
    ) -> Result<()> {
        let scripts = migrations
            .iter()
            .map(|migration| -> Result<_> {
                let path = match direction {
                    Direction::Up => migration.up_path(),
                    Direction::Down => migration.down_path(),
                };
                let sql = match path {
                    Some(path) => std::fs::read_to_string(path)?,
                    None => String::new(),
                };
                Ok((migration, sql))
            })
            .collect::<Result<Vec<_>>>()?;

        for (migration, sql) in &scripts {
            log::info!("  {direction} {}", migration.full_name());
            for line in sql.lines() {
                log::trace!("    {line}");
            }
        }

        if self.dry_run {
            log::info!("Dry run, nothing was executed");
            return Ok(());
        }

        transaction(db, |db| {
            for (migration, sql) in &scripts {
                if !sql.trim().is_empty() {
                    db.execute_ddl(sql)?;
                }
                match direction {
                    Direction::Up => db.register_migration(migration.id())?,
                    Direction::Down => db.unregister_migration(migration.id())?,
                }
            }
            Ok::<_, MigrationError>(())
        })
    }

    /// Writes an empty `<timestamp>_<name>.up.sql`/`.down.sql` pair and returns the new
    /// migration. The id is bumped past any id already present in the directory.
    ///
    /// # Errors
    ///
    /// * [`MigrationError::InvalidName`] if `name` is empty or contains a `.`, `/` or
    ///   whitespace
    /// * If the files cannot be written
    pub fn create(&self, name: &str) -> Result<Migration> {
        if name.is_empty() || name.contains(['.', '/', '\\']) || name.contains(char::is_whitespace)
        {
            return Err(MigrationError::InvalidName(name.to_string()));
        }

        std::fs::create_dir_all(&self.root)?;

        let taken = std::fs::read_dir(&self.root)?
            .map(|entry| entry.map(|x| x.file_name().to_string_lossy().into_owned()))
            .collect::<std::io::Result<Vec<_>>>()?
            .iter()
            .filter_map(|x| parse_file_name(x).map(|(id, _)| id.to_string()))
            .collect::<BTreeSet<_>>();

        let mut id = Utc::now().format("%Y%m%d%H%M%S").to_string();
        while taken.contains(&id) {
            id = id
                .parse::<u64>()
                .map_or_else(|_| format!("{id}1"), |x| (x + 1).to_string());
        }

        let migration = Migration::new(&self.root, id, name);

        for path in [migration.up_path(), migration.down_path()].into_iter().flatten() {
            log::info!("Creating {}", path.display());
            std::fs::write(path, "")?;
        }

        Ok(migration)
    }
}

#[derive(Debug, Clone, Copy)]
enum Direction {
    Up,
    Down,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Up => "Apply",
            Self::Down => "Revert",
        })
    }
}

fn reconcile(mut migrations: Vec<Migration>, db: &mut dyn Adapter) -> Result<Vec<Migration>> {
    db.prepare_migration_log()?;
    let applied = db.load_migration_log()?;

    for migration in &mut migrations {
        migration.set_status(if applied.iter().any(|x| x == migration.id()) {
            MigrationStatus::Up
        } else {
            MigrationStatus::Down
        });
    }

    let missing = applied
        .iter()
        .filter(|id| !migrations.iter().any(|x| x.id() == id.as_str()))
        .collect::<BTreeSet<_>>();

    migrations.extend(missing.into_iter().map(Migration::missing));
    migrations.sort_by(|a, b| a.id().cmp(b.id()));

    Ok(migrations)
}
