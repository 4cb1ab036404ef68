//! Chainable criteria for a model and the operations that run them

use std::marker::PhantomData;

use chrono::Utc;
use datum_database::{
    Adapter, DatabaseValue,
    query::{
        Condition, Filter, SelectQuery, Sort, SortDirection, count, delete, select, sort, update,
        where_eq, where_in,
    },
};
use datum_database_connection::ConnectionScope;

use crate::{Model, OrmError, Record, RecordEnumerator, UPDATED_AT, messages, reflect::schema_for};

const MIXED_FILTER_ERROR: &str =
    "where supports either a SQL fragment with arguments, or conditions; not both";

/// Criteria accumulated for one query against `M`'s table.
///
/// Builder methods never fail. Usage errors, such as mixing a SQL fragment with equality
/// conditions, are kept and reported by the next terminal operation before any SQL runs.
pub struct QueryProxy<M: Model> {
    filter: Option<Filter>,
    order: Vec<Sort>,
    limit: Option<u64>,
    skip: Option<u64>,
    batch_size: Option<u64>,
    error: Option<String>,
    model: PhantomData<fn() -> M>,
}

impl<M: Model> Default for QueryProxy<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M: Model> Clone for QueryProxy<M> {
    fn clone(&self) -> Self {
        Self {
            filter: self.filter.clone(),
            order: self.order.clone(),
            limit: self.limit,
            skip: self.skip,
            batch_size: self.batch_size,
            error: self.error.clone(),
            model: PhantomData,
        }
    }
}

impl<M: Model> std::fmt::Debug for QueryProxy<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryProxy")
            .field("model", &M::NAME)
            .field("filter", &self.filter)
            .field("order", &self.order)
            .field("limit", &self.limit)
            .field("skip", &self.skip)
            .field("batch_size", &self.batch_size)
            .field("error", &self.error)
            .finish()
    }
}

impl<M: Model> QueryProxy<M> {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            filter: None,
            order: vec![],
            limit: None,
            skip: None,
            batch_size: None,
            error: None,
            model: PhantomData,
        }
    }

    fn fail(mut self, message: &str) -> Self {
        if self.error.is_none() {
            self.error = Some(message.to_string());
        }
        self
    }

    /// Filters by a raw SQL fragment whose placeholders are bound to `args`, in the
    /// dialect's placeholder syntax. Replaces an earlier fragment.
    #[must_use]
    pub fn where_sql<V: Into<DatabaseValue>>(
        mut self,
        sql: impl Into<String>,
        args: impl IntoIterator<Item = V>,
    ) -> Self {
        if matches!(self.filter, Some(Filter::Conditions(_))) {
            return self.fail(MIXED_FILTER_ERROR);
        }

        self.filter = Some(Filter::sql(sql, args.into_iter().map(Into::into).collect()));
        self
    }

    /// Adds `condition` to the conjunction of equality conditions
    #[must_use]
    pub fn filter(mut self, condition: Condition) -> Self {
        match self.filter.take() {
            None => self.filter = Some(Filter::Conditions(vec![condition])),
            Some(Filter::Conditions(mut conditions)) => {
                conditions.push(condition);
                self.filter = Some(Filter::Conditions(conditions));
            }
            Some(filter @ Filter::Sql { .. }) => {
                self.filter = Some(filter);
                return self.fail(MIXED_FILTER_ERROR);
            }
        }
        self
    }

    /// Requires `column = value`. Records are compared by primary key.
    #[must_use]
    pub fn where_eq(self, column: impl Into<String>, value: impl Into<DatabaseValue>) -> Self {
        self.filter(where_eq(column, value))
    }

    /// Requires `column IN (values)`
    #[must_use]
    pub fn where_in<V: Into<DatabaseValue>>(
        self,
        column: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        self.filter(where_in(column, values))
    }

    #[must_use]
    pub fn order_by(mut self, column: impl Into<String>, direction: SortDirection) -> Self {
        self.order.push(sort(column, direction));
        self
    }

    #[must_use]
    pub const fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    #[must_use]
    pub const fn skip(mut self, amount: u64) -> Self {
        self.skip = Some(amount);
        self
    }

    /// Makes [`QueryProxy::iter`] load `size` records per query
    #[must_use]
    pub fn in_batches_of(mut self, size: u64) -> Self {
        if size == 0 {
            return self.fail("in_batches_of expects a positive batch size");
        }
        self.batch_size = Some(size);
        self
    }

    #[must_use]
    pub const fn filter_ref(&self) -> Option<&Filter> {
        self.filter.as_ref()
    }

    #[must_use]
    pub fn order(&self) -> &[Sort] {
        &self.order
    }

    #[must_use]
    pub const fn limit_value(&self) -> Option<u64> {
        self.limit
    }

    #[must_use]
    pub const fn skip_value(&self) -> Option<u64> {
        self.skip
    }

    #[must_use]
    pub const fn batch_size(&self) -> Option<u64> {
        self.batch_size
    }

    pub(crate) fn check(&self) -> Result<(), OrmError> {
        match &self.error {
            Some(message) => Err(OrmError::InvalidArgument(message.clone())),
            None => Ok(()),
        }
    }

    fn check_unbounded(&self, operation: &str) -> Result<(), OrmError> {
        self.check()?;

        let conflict = if self.limit.is_some() {
            Some("limit")
        } else if self.skip.is_some() {
            Some("skip")
        } else if !self.order.is_empty() {
            Some("order_by")
        } else if self.batch_size.is_some() {
            Some("in_batches_of")
        } else {
            None
        };

        match conflict {
            Some(conflict) => Err(OrmError::InvalidArgument(format!(
                "Cannot use {operation} with {conflict}"
            ))),
            None => Ok(()),
        }
    }

    pub(crate) fn select_query(&self) -> SelectQuery {
        let mut query = select(M::table_name())
            .filter_if_some(self.filter.clone())
            .sorts(self.order.iter().cloned())
            .named(format!("{} Load", M::NAME));

        if let Some(limit) = self.limit {
            query = query.limit(limit);
        }
        if let Some(skip) = self.skip {
            query = query.offset(skip);
        }

        query
    }

    fn not_found(&self) -> OrmError {
        OrmError::RecordNotFound(messages::not_found::<M>(self.filter.as_ref()))
    }

    /// Every matching record, in one query. Batching does not apply.
    ///
    /// # Errors
    ///
    /// * If the criteria are invalid
    /// * If no connection is configured for the model
    /// * If the query fails
    pub fn to_a(&self, scope: &mut ConnectionScope) -> Result<Vec<Record<M>>, OrmError> {
        self.check()?;
        load_records(scope.adapter_for(M::HIERARCHY)?, &self.select_query())
    }

    /// Alias of [`QueryProxy::to_a`]
    ///
    /// # Errors
    ///
    /// * See [`QueryProxy::to_a`]
    pub fn all(&self, scope: &mut ConnectionScope) -> Result<Vec<Record<M>>, OrmError> {
        self.to_a(scope)
    }

    /// Number of records [`QueryProxy::to_a`] returns
    ///
    /// # Errors
    ///
    /// * See [`QueryProxy::to_a`]
    pub fn length(&self, scope: &mut ConnectionScope) -> Result<usize, OrmError> {
        Ok(self.to_a(scope)?.len())
    }

    /// Lazily iterates the matching records, loading them page by page when
    /// [`QueryProxy::in_batches_of`] is set.
    #[must_use]
    pub fn iter<'a>(&self, scope: &'a mut ConnectionScope) -> RecordEnumerator<'a, M> {
        RecordEnumerator::new(scope, self.clone())
    }

    /// # Errors
    ///
    /// * See [`QueryProxy::to_a`]
    pub fn first(&self, scope: &mut ConnectionScope) -> Result<Option<Record<M>>, OrmError> {
        Ok(self.first_n(scope, 1)?.into_iter().next())
    }

    /// Up to `n` records. `n == 0` returns nothing without querying.
    ///
    /// # Errors
    ///
    /// * See [`QueryProxy::to_a`]
    pub fn first_n(
        &self,
        scope: &mut ConnectionScope,
        n: u64,
    ) -> Result<Vec<Record<M>>, OrmError> {
        self.check()?;

        if n == 0 {
            return Ok(vec![]);
        }

        let mut proxy = self.clone().limit(n);
        proxy.batch_size = None;
        proxy.to_a(scope)
    }

    /// # Errors
    ///
    /// * [`OrmError::RecordNotFound`] if nothing matches
    /// * See [`QueryProxy::to_a`]
    pub fn first_or_not_found(&self, scope: &mut ConnectionScope) -> Result<Record<M>, OrmError> {
        self.first(scope)?.ok_or_else(|| self.not_found())
    }

    /// # Errors
    ///
    /// * See [`QueryProxy::to_a`]
    pub fn last(&self, scope: &mut ConnectionScope) -> Result<Option<Record<M>>, OrmError> {
        Ok(self.last_n(scope, 1)?.into_iter().last())
    }

    /// The last `n` records, returned in ascending order.
    ///
    /// They are fetched in reverse order (primary key descending, or the explicit order
    /// reversed) so that the limit picks the tail.
    ///
    /// # Errors
    ///
    /// * See [`QueryProxy::to_a`]
    pub fn last_n(&self, scope: &mut ConnectionScope, n: u64) -> Result<Vec<Record<M>>, OrmError> {
        self.check()?;

        if n == 0 {
            return Ok(vec![]);
        }

        let mut proxy = self.clone().limit(n);
        proxy.batch_size = None;
        proxy.order = if self.order.is_empty() {
            vec![sort(M::PRIMARY_KEY, SortDirection::Desc)]
        } else {
            self.order
                .iter()
                .map(|x| sort(x.column.clone(), x.direction.reverse()))
                .collect()
        };

        let mut records = proxy.to_a(scope)?;
        records.reverse();
        Ok(records)
    }

    /// # Errors
    ///
    /// * [`OrmError::RecordNotFound`] if nothing matches
    /// * See [`QueryProxy::to_a`]
    pub fn last_or_not_found(&self, scope: &mut ConnectionScope) -> Result<Record<M>, OrmError> {
        self.last(scope)?.ok_or_else(|| self.not_found())
    }

    /// # Errors
    ///
    /// * [`OrmError::InvalidArgument`] if a limit, skip, order or batch size is set
    /// * If no connection is configured for the model
    /// * If the query fails
    pub fn count(&self, scope: &mut ConnectionScope) -> Result<u64, OrmError> {
        self.check_unbounded("count")?;

        Ok(count(M::table_name())
            .filter_if_some(self.filter.clone())
            .named(format!("{} Count", M::NAME))
            .execute(scope.adapter_for(M::HIERARCHY)?)?)
    }

    /// Writes `values` to every matching row and returns how many rows changed.
    ///
    /// `updated_at` is stamped when the model has timestamp columns and `values` does not
    /// set it. Names that are not columns are dropped.
    ///
    /// # Errors
    ///
    /// * [`OrmError::InvalidArgument`] if a limit, skip, order or batch size is set
    /// * If a value cannot be cast for its column
    /// * If no connection is configured for the model
    /// * If the statement fails
    pub fn update<K: Into<String>, V: Into<DatabaseValue>>(
        &self,
        scope: &mut ConnectionScope,
        values: impl IntoIterator<Item = (K, V)>,
    ) -> Result<u64, OrmError> {
        self.check_unbounded("update")?;

        let db = scope.adapter_for(M::HIERARCHY)?;
        let schema = schema_for::<M>(db)?;

        let mut values = values
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect::<Vec<(String, DatabaseValue)>>();

        if schema.has_timestamp_columns() && !values.iter().any(|(k, _)| k == UPDATED_AT) {
            values.push((UPDATED_AT.to_string(), Utc::now().into()));
        }

        let mut changeset = Vec::with_capacity(values.len());
        for (name, value) in values {
            match schema.column(&name) {
                Some(column) => changeset.push((name, db.cast_to_storage(&value, column)?)),
                None => log::trace!("Dropping unknown field '{name}' for {}", M::NAME),
            }
        }

        if changeset.is_empty() {
            log::debug!("Nothing to update for {}", M::NAME);
            return Ok(0);
        }

        Ok(update(M::table_name())
            .filter_if_some(self.filter.clone())
            .values(changeset)
            .named(format!("{} Update", M::NAME))
            .execute(db)?)
    }

    /// Deletes every matching row and returns how many were removed
    ///
    /// # Errors
    ///
    /// * [`OrmError::InvalidArgument`] if a limit, skip, order or batch size is set
    /// * If no connection is configured for the model
    /// * If the statement fails
    pub fn delete(&self, scope: &mut ConnectionScope) -> Result<u64, OrmError> {
        self.check_unbounded("delete")?;

        Ok(delete(M::table_name())
            .filter_if_some(self.filter.clone())
            .named(format!("{} Delete", M::NAME))
            .execute(scope.adapter_for(M::HIERARCHY)?)?)
    }
}

/// Runs `query` and builds a record from each row
///
/// # Errors
///
/// * If the table structure could not be read
/// * If the query fails
/// * If a value cannot be cast for its column
pub(crate) fn load_records<M: Model>(
    db: &mut dyn Adapter,
    query: &SelectQuery,
) -> Result<Vec<Record<M>>, OrmError> {
    let schema = schema_for::<M>(db)?;
    let rows = db.select(query)?;

    rows.iter()
        .map(|row| Record::load(schema.clone(), row, db))
        .collect()
}
