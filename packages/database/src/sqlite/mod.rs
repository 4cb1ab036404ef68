//! `SQLite` adapter using rusqlite
//!
//! Values are bound positionally with `?`. Generated keys come back through
//! `last_insert_rowid`, and table structure is read with `PRAGMA table_info`.

use std::{path::PathBuf, sync::LazyLock, time::Duration};

use regex::Regex;
use rusqlite::{Connection, Rows, Statement, types::Value};
use thiserror::Error;

use crate::{
    Adapter, Column, DatabaseError, DatabaseValue, Dialect, Dsn, Row,
    instrument::instrument,
    query::{CountQuery, DeleteStatement, InsertStatement, SelectQuery, UpdateStatement},
    sql,
};

const DEFAULT_BUSY_TIMEOUT_MS: u64 = 10;
const KNOWN_OPTIONS: &[&str] = &["busy_timeout"];

#[derive(Debug, Error)]
pub enum SqliteDatabaseError {
    #[error(transparent)]
    Rusqlite(#[from] rusqlite::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("No row")]
    NoRow,
    #[error("Connection is closed")]
    Disconnected,
    #[error("Blob value in column '{0}' is not supported")]
    UnsupportedBlob(String),
}

impl From<SqliteDatabaseError> for DatabaseError {
    fn from(value: SqliteDatabaseError) -> Self {
        Self::Sqlite(value)
    }
}

impl From<rusqlite::Error> for DatabaseError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sqlite(value.into())
    }
}

#[derive(Debug)]
pub struct SqliteAdapter {
    connection: Option<Connection>,
    path: Option<PathBuf>,
}

impl SqliteAdapter {
    /// Opens the database described by `dsn`. `sqlite://memory` and `sqlite::memory:` open
    /// a private in-memory database.
    ///
    /// # Errors
    ///
    /// * If the parent directory of the database file could not be created
    /// * If the database could not be opened
    pub fn open(dsn: &Dsn) -> Result<Self, SqliteDatabaseError> {
        for key in dsn.options.keys() {
            if !KNOWN_OPTIONS.contains(&key.as_str()) {
                log::warn!("Ignoring unknown sqlite option '{key}'");
            }
        }

        let path = dsn.sqlite_path();

        let connection = if let Some(path) = &path {
            if let Some(parent) = path.parent().filter(|x| !x.as_os_str().is_empty()) {
                if !parent.exists() {
                    std::fs::create_dir_all(parent)?;
                }
            }
            log::debug!("Opening sqlite database at {}", path.display());
            Connection::open(path)?
        } else {
            log::debug!("Opening in-memory sqlite database");
            Connection::open_in_memory()?
        };

        connection.busy_timeout(Duration::from_millis(
            dsn.option_as("busy_timeout")
                .unwrap_or(DEFAULT_BUSY_TIMEOUT_MS),
        ))?;

        Ok(Self {
            connection: Some(connection),
            path,
        })
    }

    /// # Errors
    ///
    /// * If the in-memory database could not be created
    pub fn open_in_memory() -> Result<Self, SqliteDatabaseError> {
        Ok(Self {
            connection: Some(Connection::open_in_memory()?),
            path: None,
        })
    }

    #[must_use]
    pub const fn path(&self) -> Option<&PathBuf> {
        self.path.as_ref()
    }

    fn connection(&self) -> Result<&Connection, SqliteDatabaseError> {
        self.connection.as_ref().ok_or(SqliteDatabaseError::Disconnected)
    }

    fn fetch(
        &self,
        name: &str,
        sql: &str,
        params: &[DatabaseValue],
    ) -> Result<Vec<Row>, DatabaseError> {
        let connection = self.connection()?;
        instrument(name, sql, params, || Ok(query(connection, sql, params)?))
    }

    fn exec(&self, name: &str, sql: &str, params: &[DatabaseValue]) -> Result<u64, DatabaseError> {
        let connection = self.connection()?;
        instrument(name, sql, params, || Ok(execute(connection, sql, params)?))
    }
}

impl Drop for SqliteAdapter {
    fn drop(&mut self) {
        if self.connection.is_some() {
            log::debug!("Closing sqlite connection");
        }
    }
}

impl Adapter for SqliteAdapter {
    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    fn select(&mut self, query: &SelectQuery) -> Result<Vec<Row>, DatabaseError> {
        let statement = sql::render_select(query, Dialect::Sqlite)?;
        self.fetch(&query.name, &statement.sql, &statement.params)
    }

    fn count(&mut self, query: &CountQuery) -> Result<u64, DatabaseError> {
        let statement = sql::render_count(query, Dialect::Sqlite)?;
        let rows = self.fetch(&query.name, &statement.sql, &statement.params)?;

        let count = rows
            .first()
            .and_then(Row::first)
            .and_then(DatabaseValue::as_i64)
            .ok_or(SqliteDatabaseError::NoRow)?;

        Ok(u64::try_from(count).unwrap_or_default())
    }

    fn insert(&mut self, statement: &InsertStatement) -> Result<Row, DatabaseError> {
        let rendered = sql::render_insert(statement, Dialect::Sqlite);
        self.exec(&statement.name, &rendered.sql, &rendered.params)?;

        let id = self.connection()?.last_insert_rowid();
        log::trace!("Inserted row with id {id}");

        Ok(Row {
            columns: vec![("id".to_string(), DatabaseValue::Int64(id))],
        })
    }

    fn update(&mut self, statement: &UpdateStatement) -> Result<u64, DatabaseError> {
        let rendered = sql::render_update(statement, Dialect::Sqlite)?;
        self.exec(&statement.name, &rendered.sql, &rendered.params)
    }

    fn delete(&mut self, statement: &DeleteStatement) -> Result<u64, DatabaseError> {
        let rendered = sql::render_delete(statement, Dialect::Sqlite)?;
        self.exec(&statement.name, &rendered.sql, &rendered.params)
    }

    fn columns_of(&mut self, table_name: &str) -> Result<Vec<Column>, DatabaseError> {
        let rows = self.fetch("SCHEMA", &format!("PRAGMA table_info({table_name})"), &[])?;

        Ok(rows
            .iter()
            .filter_map(|row| {
                let name = row.get("name")?.as_str()?.to_string();
                let raw_type = row.get("type");
                let default = row.get("dflt_value").and_then(|x| match x {
                    DatabaseValue::String(x) => Some(parse_default(&x)),
                    _ => None,
                });

                Some(Column::new(
                    name,
                    default,
                    raw_type.as_ref().and_then(DatabaseValue::as_str),
                ))
            })
            .collect())
    }

    fn execute(&mut self, sql: &str, params: &[DatabaseValue]) -> Result<Vec<Row>, DatabaseError> {
        let params = params
            .iter()
            .map(|x| crate::cast::to_param(x, Dialect::Sqlite))
            .collect::<Vec<_>>();
        self.fetch("SQL", sql, &params)
    }

    fn execute_ddl(&mut self, sql: &str) -> Result<(), DatabaseError> {
        let connection = self.connection()?;
        instrument("DDL", sql, &[], || Ok(connection.execute_batch(sql)?))
    }

    fn tx_begin(&mut self) -> Result<(), DatabaseError> {
        if self.in_transaction() {
            log::trace!("tx_begin: transaction already active");
            return Ok(());
        }
        self.execute_ddl("BEGIN")
    }

    fn tx_commit(&mut self) -> Result<(), DatabaseError> {
        self.execute_ddl("COMMIT")
    }

    fn tx_rollback(&mut self) -> Result<(), DatabaseError> {
        self.execute_ddl("ROLLBACK")
    }

    fn in_transaction(&self) -> bool {
        self.connection
            .as_ref()
            .is_some_and(|x| !x.is_autocommit())
    }

    fn disconnect(&mut self) -> Result<(), DatabaseError> {
        if let Some(connection) = self.connection.take() {
            log::debug!("Disconnecting sqlite connection");
            connection
                .close()
                .map_err(|(_, e)| SqliteDatabaseError::Rusqlite(e))?;
        }
        Ok(())
    }
}

static INTEGER_DEFAULT_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^-?[0-9]+$").expect("Invalid Regex"));
static FLOAT_DEFAULT_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^-?[0-9]+\.[0-9]*$").expect("Invalid Regex"));

/// Interprets the `dflt_value` column of `PRAGMA table_info`, which holds the default as
/// SQL text.
fn parse_default(value: &str) -> DatabaseValue {
    let value = value.trim();

    if value.eq_ignore_ascii_case("null") {
        return DatabaseValue::Null;
    }
    if value.eq_ignore_ascii_case("true") {
        return DatabaseValue::Bool(true);
    }
    if value.eq_ignore_ascii_case("false") {
        return DatabaseValue::Bool(false);
    }
    if let Some(quoted) = value
        .strip_prefix('\'')
        .and_then(|x| x.strip_suffix('\''))
    {
        return DatabaseValue::String(quoted.replace("''", "'"));
    }
    if INTEGER_DEFAULT_REGEX.is_match(value) {
        if let Ok(parsed) = value.parse() {
            return DatabaseValue::Int64(parsed);
        }
    }
    if FLOAT_DEFAULT_REGEX.is_match(value) {
        if let Ok(parsed) = value.parse() {
            return DatabaseValue::Real64(parsed);
        }
    }

    DatabaseValue::String(value.to_string())
}

fn query(
    connection: &Connection,
    sql: &str,
    params: &[DatabaseValue],
) -> Result<Vec<Row>, SqliteDatabaseError> {
    let mut statement = connection.prepare_cached(sql)?;
    let column_names = statement
        .column_names()
        .iter()
        .map(std::string::ToString::to_string)
        .collect::<Vec<_>>();

    bind_values(&mut statement, params)?;

    to_rows(&column_names, statement.raw_query())
}

fn execute(
    connection: &Connection,
    sql: &str,
    params: &[DatabaseValue],
) -> Result<u64, SqliteDatabaseError> {
    let mut statement = connection.prepare_cached(sql)?;

    bind_values(&mut statement, params)?;

    let affected = statement.raw_execute()?;
    log::trace!("Affected {affected} row{}", if affected == 1 { "" } else { "s" });

    Ok(affected as u64)
}

fn bind_values(
    statement: &mut Statement<'_>,
    values: &[DatabaseValue],
) -> Result<(), SqliteDatabaseError> {
    for (i, value) in values.iter().enumerate() {
        let i = i + 1;
        match value {
            DatabaseValue::Null => statement.raw_bind_parameter(i, rusqlite::types::Null)?,
            DatabaseValue::String(value) => statement.raw_bind_parameter(i, value)?,
            DatabaseValue::Bool(value) => statement.raw_bind_parameter(i, i64::from(*value))?,
            DatabaseValue::Int64(value) => statement.raw_bind_parameter(i, *value)?,
            DatabaseValue::Real64(value) => statement.raw_bind_parameter(i, *value)?,
            DatabaseValue::DateTime(_) | DatabaseValue::Date(_) | DatabaseValue::Time(_) => {
                let value = crate::cast::to_param(value, Dialect::Sqlite);
                statement.raw_bind_parameter(i, value.to_string())?;
            }
        }
    }

    Ok(())
}

fn from_value(column: &str, value: Value) -> Result<DatabaseValue, SqliteDatabaseError> {
    Ok(match value {
        Value::Null => DatabaseValue::Null,
        Value::Integer(value) => DatabaseValue::Int64(value),
        Value::Real(value) => DatabaseValue::Real64(value),
        Value::Text(value) => DatabaseValue::String(value),
        Value::Blob(_) => return Err(SqliteDatabaseError::UnsupportedBlob(column.to_string())),
    })
}

fn from_row(column_names: &[String], row: &rusqlite::Row<'_>) -> Result<Row, SqliteDatabaseError> {
    let mut columns = vec![];

    for (i, column) in column_names.iter().enumerate() {
        columns.push((column.clone(), from_value(column, row.get::<_, Value>(i)?)?));
    }

    Ok(Row { columns })
}

fn to_rows(column_names: &[String], mut rows: Rows<'_>) -> Result<Vec<Row>, SqliteDatabaseError> {
    let mut results = vec![];

    while let Some(row) = rows.next()? {
        results.push(from_row(column_names, row)?);
    }

    log::trace!(
        "Got {} row{}",
        results.len(),
        if results.len() == 1 { "" } else { "s" }
    );

    Ok(results)
}
