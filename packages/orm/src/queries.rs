//! Finders available on every [`Model`]

use std::sync::Arc;

use datum_database::{
    DatabaseError, DatabaseValue,
    query::{Condition, Filter, SortDirection, select, where_eq, where_in},
};
use datum_database_connection::ConnectionScope;

use crate::{
    Model, OrmError, QueryProxy, Record, messages,
    query_proxy::load_records,
    reflect::{self, Schema, schema_for},
};

/// Model-level entry points. Implemented for every [`Model`].
pub trait Queries: Model {
    /// A proxy without criteria
    #[must_use]
    fn query() -> QueryProxy<Self> {
        QueryProxy::new()
    }

    #[must_use]
    fn where_sql<V: Into<DatabaseValue>>(
        sql: impl Into<String>,
        args: impl IntoIterator<Item = V>,
    ) -> QueryProxy<Self> {
        Self::query().where_sql(sql, args)
    }

    #[must_use]
    fn where_eq(column: impl Into<String>, value: impl Into<DatabaseValue>) -> QueryProxy<Self> {
        Self::query().where_eq(column, value)
    }

    #[must_use]
    fn where_in<V: Into<DatabaseValue>>(
        column: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> QueryProxy<Self> {
        Self::query().where_in(column, values)
    }

    #[must_use]
    fn order_by(column: impl Into<String>, direction: SortDirection) -> QueryProxy<Self> {
        Self::query().order_by(column, direction)
    }

    /// # Errors
    ///
    /// * If no connection is configured for the model
    /// * If the query fails
    fn find(
        scope: &mut ConnectionScope,
        id: impl Into<DatabaseValue>,
    ) -> Result<Option<Record<Self>>, OrmError> {
        let query = select(Self::table_name())
            .filter(where_eq(Self::PRIMARY_KEY, id))
            .named(format!("{} Load", Self::NAME));

        Ok(load_records(scope.adapter_for(Self::HIERARCHY)?, &query)?
            .into_iter()
            .next())
    }

    /// Records whose primary key is among `ids`. Missing ids are skipped.
    ///
    /// # Errors
    ///
    /// * If no connection is configured for the model
    /// * If the query fails
    fn find_many<V: Into<DatabaseValue>>(
        scope: &mut ConnectionScope,
        ids: impl IntoIterator<Item = V>,
    ) -> Result<Vec<Record<Self>>, OrmError> {
        let ids = ids.into_iter().map(Into::into).collect::<Vec<DatabaseValue>>();

        if ids.is_empty() {
            return Ok(vec![]);
        }

        let query = select(Self::table_name())
            .filter(where_in(Self::PRIMARY_KEY, ids))
            .named(format!("{} Load", Self::NAME));

        load_records(scope.adapter_for(Self::HIERARCHY)?, &query)
    }

    /// # Errors
    ///
    /// * [`OrmError::RecordNotFound`] if there is no such record
    /// * See [`Queries::find`]
    fn find_or_not_found(
        scope: &mut ConnectionScope,
        id: impl Into<DatabaseValue>,
    ) -> Result<Record<Self>, OrmError> {
        let id = id.into();

        Self::find(scope, id.clone())?.ok_or_else(|| {
            OrmError::RecordNotFound(messages::find_not_found::<Self>(&[id], 0))
        })
    }

    /// # Errors
    ///
    /// * [`OrmError::RecordNotFound`] unless every id was found
    /// * See [`Queries::find_many`]
    fn find_many_or_not_found<V: Into<DatabaseValue>>(
        scope: &mut ConnectionScope,
        ids: impl IntoIterator<Item = V>,
    ) -> Result<Vec<Record<Self>>, OrmError> {
        let ids = ids.into_iter().map(Into::into).collect::<Vec<DatabaseValue>>();
        let records = Self::find_many(scope, ids.clone())?;

        if ids.is_empty() || records.len() != ids.len() {
            return Err(OrmError::RecordNotFound(messages::find_not_found::<Self>(
                &ids,
                records.len(),
            )));
        }

        Ok(records)
    }

    /// First record matching every condition
    ///
    /// # Errors
    ///
    /// * See [`QueryProxy::first`]
    fn find_by(
        scope: &mut ConnectionScope,
        conditions: impl IntoIterator<Item = Condition>,
    ) -> Result<Option<Record<Self>>, OrmError> {
        conditions
            .into_iter()
            .fold(Self::query(), QueryProxy::filter)
            .first(scope)
    }

    /// # Errors
    ///
    /// * [`OrmError::RecordNotFound`] if nothing matches
    /// * See [`QueryProxy::first`]
    fn find_by_or_not_found(
        scope: &mut ConnectionScope,
        conditions: impl IntoIterator<Item = Condition>,
    ) -> Result<Record<Self>, OrmError> {
        conditions
            .into_iter()
            .fold(Self::query(), QueryProxy::filter)
            .first_or_not_found(scope)
    }

    /// First record matching a raw SQL fragment
    ///
    /// # Errors
    ///
    /// * See [`QueryProxy::first`]
    fn find_by_sql<V: Into<DatabaseValue>>(
        scope: &mut ConnectionScope,
        sql: impl Into<String>,
        args: impl IntoIterator<Item = V>,
    ) -> Result<Option<Record<Self>>, OrmError> {
        Self::where_sql(sql, args).first(scope)
    }

    /// # Errors
    ///
    /// * [`OrmError::RecordNotFound`] if nothing matches
    /// * See [`QueryProxy::first`]
    fn find_by_sql_or_not_found<V: Into<DatabaseValue>>(
        scope: &mut ConnectionScope,
        sql: impl Into<String>,
        args: impl IntoIterator<Item = V>,
    ) -> Result<Record<Self>, OrmError> {
        Self::where_sql(sql, args).first_or_not_found(scope)
    }

    /// # Errors
    ///
    /// * See [`QueryProxy::first`]
    fn first(scope: &mut ConnectionScope) -> Result<Option<Record<Self>>, OrmError> {
        Self::query().first(scope)
    }

    /// # Errors
    ///
    /// * See [`QueryProxy::first_n`]
    fn first_n(scope: &mut ConnectionScope, n: u64) -> Result<Vec<Record<Self>>, OrmError> {
        Self::query().first_n(scope, n)
    }

    /// # Errors
    ///
    /// * See [`QueryProxy::first_or_not_found`]
    fn first_or_not_found(scope: &mut ConnectionScope) -> Result<Record<Self>, OrmError> {
        Self::query().first_or_not_found(scope)
    }

    /// Record with the greatest primary key
    ///
    /// # Errors
    ///
    /// * See [`QueryProxy::last`]
    fn last(scope: &mut ConnectionScope) -> Result<Option<Record<Self>>, OrmError> {
        Self::query().last(scope)
    }

    /// # Errors
    ///
    /// * See [`QueryProxy::last_n`]
    fn last_n(scope: &mut ConnectionScope, n: u64) -> Result<Vec<Record<Self>>, OrmError> {
        Self::query().last_n(scope, n)
    }

    /// # Errors
    ///
    /// * See [`QueryProxy::last_or_not_found`]
    fn last_or_not_found(scope: &mut ConnectionScope) -> Result<Record<Self>, OrmError> {
        Self::query().last_or_not_found(scope)
    }

    /// # Errors
    ///
    /// * See [`QueryProxy::to_a`]
    fn all(scope: &mut ConnectionScope) -> Result<Vec<Record<Self>>, OrmError> {
        Self::query().to_a(scope)
    }

    /// # Errors
    ///
    /// * See [`QueryProxy::count`]
    fn count(scope: &mut ConnectionScope) -> Result<u64, OrmError> {
        Self::query().count(scope)
    }

    /// Runs `f` inside a transaction on this model's connection.
    ///
    /// Commits when `f` returns `Ok`. An `Err` rolls back before it is returned.
    ///
    /// # Errors
    ///
    /// * If a transaction is already open on the connection
    /// * If begin or commit fail
    /// * Whatever `f` returns
    fn transaction<T>(
        scope: &mut ConnectionScope,
        f: impl FnOnce(&mut ConnectionScope) -> Result<T, OrmError>,
    ) -> Result<T, OrmError> {
        let db = scope.adapter_for(Self::HIERARCHY)?;

        if db.in_transaction() {
            return Err(DatabaseError::AlreadyInTransaction.into());
        }
        db.tx_begin()?;

        match f(scope) {
            Ok(value) => {
                scope.adapter_for(Self::HIERARCHY)?.tx_commit()?;
                Ok(value)
            }
            Err(e) => {
                let rollback = scope
                    .adapter_for(Self::HIERARCHY)
                    .map_err(OrmError::from)
                    .and_then(|db| Ok(db.tx_rollback()?));

                if let Err(rollback_error) = rollback {
                    log::error!("Failed to roll back {} transaction: {rollback_error:?}", Self::NAME);
                }

                Err(e)
            }
        }
    }

    /// Reflected columns of the model's table
    ///
    /// # Errors
    ///
    /// * If no connection is configured for the model
    /// * If the table structure could not be read
    fn columns(scope: &mut ConnectionScope) -> Result<Arc<Schema>, OrmError> {
        schema_for::<Self>(scope.adapter_for(Self::HIERARCHY)?)
    }

    /// Whether the table has both `created_at` and `updated_at`
    ///
    /// # Errors
    ///
    /// * See [`Queries::columns`]
    fn has_timestamp_columns(scope: &mut ConnectionScope) -> Result<bool, OrmError> {
        Ok(Self::columns(scope)?.has_timestamp_columns())
    }

    /// Forgets the reflected columns so the next use reflects them again
    fn clear_column_cache() {
        reflect::clear_column_cache::<Self>();
    }

    /// Not-found message for `filter`
    #[must_use]
    fn not_found_message(filter: Option<&Filter>) -> String {
        messages::not_found::<Self>(filter)
    }
}

impl<M: Model> Queries for M {}
