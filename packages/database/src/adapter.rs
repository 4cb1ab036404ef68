//! The uniform contract every dialect adapter implements
//!
//! An adapter owns exactly one live connection. It renders statements for its dialect,
//! executes them through [`crate::instrument::instrument`] and casts values at the wire
//! boundary. Adapters are not shared between execution contexts.

use crate::{
    CastError, Column, DatabaseError, DatabaseValue, Dialect, MIGRATION_LEDGER_TABLE, Row, cast,
    query::{
        CountQuery, DeleteStatement, InsertStatement, SelectQuery, UpdateStatement, delete,
        update, where_eq,
    },
};

/// Identifies a persisted model row for [`Adapter::update_model`] and
/// [`Adapter::delete_model`]
#[derive(Debug, Clone, Copy)]
pub struct ModelRef<'a> {
    pub model_name: &'a str,
    pub table_name: &'a str,
    pub primary_key: &'a str,
    pub id: &'a DatabaseValue,
}

pub trait Adapter: Send + std::fmt::Debug {
    fn dialect(&self) -> Dialect;

    /// # Errors
    ///
    /// * If the query fails to execute
    fn select(&mut self, query: &SelectQuery) -> Result<Vec<Row>, DatabaseError>;

    /// # Errors
    ///
    /// * If the query fails to execute
    fn count(&mut self, query: &CountQuery) -> Result<u64, DatabaseError>;

    /// Inserts a row and returns the generated values.
    ///
    /// Dialects with `RETURNING` return the requested columns. The others return only the
    /// primary key under the name `id`.
    ///
    /// # Errors
    ///
    /// * If the statement fails to execute
    fn insert(&mut self, statement: &InsertStatement) -> Result<Row, DatabaseError>;

    /// Returns the number of affected rows
    ///
    /// # Errors
    ///
    /// * If the statement fails to execute
    fn update(&mut self, statement: &UpdateStatement) -> Result<u64, DatabaseError>;

    /// Returns the number of affected rows
    ///
    /// # Errors
    ///
    /// * If the statement fails to execute
    fn delete(&mut self, statement: &DeleteStatement) -> Result<u64, DatabaseError>;

    /// # Errors
    ///
    /// * If the table structure could not be read
    fn columns_of(&mut self, table_name: &str) -> Result<Vec<Column>, DatabaseError>;

    /// Runs raw SQL with positional parameters written in the dialect's placeholder syntax
    ///
    /// # Errors
    ///
    /// * If the statement fails to execute
    fn execute(&mut self, sql: &str, params: &[DatabaseValue]) -> Result<Vec<Row>, DatabaseError>;

    /// Runs one or more DDL statements without parameters
    ///
    /// # Errors
    ///
    /// * If any statement fails to execute
    fn execute_ddl(&mut self, sql: &str) -> Result<(), DatabaseError>;

    /// # Errors
    ///
    /// * If the transaction could not be started
    fn tx_begin(&mut self) -> Result<(), DatabaseError>;

    /// # Errors
    ///
    /// * If the transaction could not be committed
    fn tx_commit(&mut self) -> Result<(), DatabaseError>;

    /// # Errors
    ///
    /// * If the transaction could not be rolled back
    fn tx_rollback(&mut self) -> Result<(), DatabaseError>;

    fn in_transaction(&self) -> bool;

    /// Closes the connection. Further calls fail.
    ///
    /// # Errors
    ///
    /// * If the driver reports an error while closing
    fn disconnect(&mut self) -> Result<(), DatabaseError>;

    /// Positional placeholder for the `index`th (1-based) parameter
    fn placeholder(&self, index: usize) -> String {
        match self.dialect() {
            Dialect::Postgres => format!("${index}"),
            Dialect::Sqlite | Dialect::Mysql => "?".to_string(),
        }
    }

    /// Creates the migration ledger if it does not exist
    ///
    /// # Errors
    ///
    /// * If the DDL fails
    fn prepare_migration_log(&mut self) -> Result<(), DatabaseError> {
        self.execute_ddl(&format!(
            "CREATE TABLE IF NOT EXISTS {MIGRATION_LEDGER_TABLE} (mid TEXT);
             CREATE INDEX IF NOT EXISTS metadata_mid ON {MIGRATION_LEDGER_TABLE} (mid);"
        ))
    }

    /// # Errors
    ///
    /// * If the ledger row could not be inserted
    fn register_migration(&mut self, id: &str) -> Result<(), DatabaseError> {
        let sql = format!(
            "INSERT INTO {MIGRATION_LEDGER_TABLE} (mid) VALUES ({})",
            self.placeholder(1)
        );
        self.execute(&sql, &[id.into()])?;
        Ok(())
    }

    /// # Errors
    ///
    /// * If the ledger row could not be deleted
    fn unregister_migration(&mut self, id: &str) -> Result<(), DatabaseError> {
        let statement = delete(MIGRATION_LEDGER_TABLE)
            .filter(where_eq("mid", id))
            .named("Migration Unregister");
        self.delete(&statement)?;
        Ok(())
    }

    /// Applied migration ids, in ledger order
    ///
    /// # Errors
    ///
    /// * If the ledger could not be read
    fn load_migration_log(&mut self) -> Result<Vec<String>, DatabaseError> {
        let rows = self.execute(&format!("SELECT mid FROM {MIGRATION_LEDGER_TABLE}"), &[])?;

        Ok(rows
            .into_iter()
            .filter_map(|row| row.first().map(ToString::to_string))
            .collect())
    }

    /// # Errors
    ///
    /// * If the value cannot represent the column's type
    fn cast_to_storage(
        &self,
        value: &DatabaseValue,
        column: &Column,
    ) -> Result<DatabaseValue, CastError> {
        cast::to_storage(value, column, self.dialect())
    }

    /// # Errors
    ///
    /// * If the stored value cannot be parsed as the column's type
    fn cast_to_model(
        &self,
        value: &DatabaseValue,
        column: &Column,
    ) -> Result<DatabaseValue, CastError> {
        cast::to_model(value, column, self.dialect())
    }

    /// Updates the row identified by `target` with already cast values
    ///
    /// # Errors
    ///
    /// * If the statement fails to execute
    fn update_model(
        &mut self,
        target: ModelRef<'_>,
        values: Vec<(String, DatabaseValue)>,
    ) -> Result<u64, DatabaseError> {
        let statement = update(target.table_name)
            .values(values)
            .filter(where_eq(target.primary_key, target.id.clone()))
            .named(format!("{} Update", target.model_name));

        self.update(&statement)
    }

    /// # Errors
    ///
    /// * If the statement fails to execute
    fn delete_model(&mut self, target: ModelRef<'_>) -> Result<u64, DatabaseError> {
        let statement = delete(target.table_name)
            .filter(where_eq(target.primary_key, target.id.clone()))
            .named(format!("{} Delete", target.model_name));

        self.delete(&statement)
    }
}

/// Runs `f` inside a transaction on `db`.
///
/// Commits when `f` returns `Ok`. Any `Err` rolls the transaction back before it is
/// returned. Only one transaction may be outstanding per connection.
///
/// # Errors
///
/// * [`DatabaseError::AlreadyInTransaction`] if a transaction is already open
/// * If begin or commit fail
/// * Whatever `f` returns
pub fn transaction<T, E: From<DatabaseError>>(
    db: &mut dyn Adapter,
    f: impl FnOnce(&mut dyn Adapter) -> Result<T, E>,
) -> Result<T, E> {
    if db.in_transaction() {
        return Err(DatabaseError::AlreadyInTransaction.into());
    }

    db.tx_begin()?;

    match f(&mut *db) {
        Ok(value) => {
            db.tx_commit()?;
            Ok(value)
        }
        Err(e) => {
            if let Err(rollback_error) = db.tx_rollback() {
                log::error!("Failed to roll back transaction: {rollback_error:?}");
            }
            Err(e)
        }
    }
}
