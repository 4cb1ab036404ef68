#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use datum_database_connection::{
    ConnectionError, ConnectionScope, ROOT_HIERARCHY, establish_connection,
    establish_connection_from_env,
};
use datum_schema::{Migration, MigrationError, Migrator};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Migration(#[from] MigrationError),
    #[error(transparent)]
    Connection(#[from] ConnectionError),
}

#[derive(Parser, Debug)]
#[command(version, about = "Manages Datum schema migrations", long_about = None)]
pub struct Args {
    /// Directory holding `<id>_<name>.up.sql`/`.down.sql` pairs. Defaults to
    /// `DATUM_MIGRATIONS_PATH`.
    #[arg(long, global = true)]
    pub migrations_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub cmd: Commands,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Show migration status
    Status {
        /// Defaults to `DATABASE_URL` or the `DB_*` variables
        #[arg(long)]
        database_url: Option<String>,
    },
    /// Run pending migrations
    Migrate {
        #[arg(long)]
        database_url: Option<String>,

        /// Print what would run without executing it
        #[arg(long)]
        dry_run: bool,
    },
    /// Rollback the most recently applied migrations
    Rollback {
        #[arg(long)]
        database_url: Option<String>,

        #[arg(long, default_value_t = 1)]
        steps: usize,

        #[arg(long)]
        dry_run: bool,
    },
    /// Create a new migration file pair
    Create {
        #[arg(index = 1)]
        name: String,
    },
}

fn migrator(args: &Args) -> Result<Migrator, MigrationError> {
    args.migrations_dir
        .clone()
        .map_or_else(Migrator::from_config, |dir| Ok(Migrator::new(dir)))
}

fn connect(database_url: Option<&str>) -> Result<ConnectionScope, ConnectionError> {
    match database_url {
        Some(url) => establish_connection(ROOT_HIERARCHY, url)?,
        None => establish_connection_from_env(ROOT_HIERARCHY)?,
    }

    Ok(ConnectionScope::new())
}

fn render(migrations: &[Migration], verb: &str) -> String {
    if migrations.is_empty() {
        return format!("Nothing to {verb}\n");
    }

    migrations
        .iter()
        .map(|x| format!("{verb} {}\n", x.full_name()))
        .collect()
}

/// Runs the command and returns what it prints
///
/// # Errors
///
/// * If no migrations directory is configured
/// * If the database cannot be reached
/// * If a migration fails
pub fn run(args: &Args) -> Result<String, CliError> {
    let migrator = migrator(args)?;

    log::debug!("Using migrations in '{}'", migrator.root().display());

    Ok(match &args.cmd {
        Commands::Status { database_url } => {
            let mut scope = connect(database_url.as_deref())?;
            let status = migrator.status(&mut scope)?;
            scope.disconnect()?;

            status
                .iter()
                .map(|x| format!("{:<8} {}\n", x.status(), x.full_name()))
                .collect()
        }
        Commands::Migrate {
            database_url,
            dry_run,
        } => {
            let mut scope = connect(database_url.as_deref())?;
            let applied = migrator.dry_run(*dry_run).move_forward(&mut scope)?;
            scope.disconnect()?;

            render(&applied, "apply")
        }
        Commands::Rollback {
            database_url,
            steps,
            dry_run,
        } => {
            let mut scope = connect(database_url.as_deref())?;
            let reverted = migrator.dry_run(*dry_run).rollback(&mut scope, *steps)?;
            scope.disconnect()?;

            render(&reverted, "revert")
        }
        Commands::Create { name } => {
            let migration = migrator.create(name)?;

            [migration.up_path(), migration.down_path()]
                .into_iter()
                .flatten()
                .map(|x| format!("Created {}\n", x.display()))
                .collect()
        }
    })
}
