use crate::{Adapter, DatabaseError, DatabaseValue, Row};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    #[must_use]
    pub const fn as_sql(self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }

    #[must_use]
    pub const fn reverse(self) -> Self {
        match self {
            Self::Asc => Self::Desc,
            Self::Desc => Self::Asc,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sort {
    pub column: String,
    pub direction: SortDirection,
}

pub fn sort(column: impl Into<String>, direction: SortDirection) -> Sort {
    Sort {
        column: column.into(),
        direction,
    }
}

/// Right-hand side of an equality condition
#[derive(Debug, Clone, PartialEq)]
pub enum ConditionValue {
    Eq(DatabaseValue),
    In(Vec<DatabaseValue>),
}

impl From<DatabaseValue> for ConditionValue {
    fn from(value: DatabaseValue) -> Self {
        Self::Eq(value)
    }
}

impl From<Vec<DatabaseValue>> for ConditionValue {
    fn from(values: Vec<DatabaseValue>) -> Self {
        Self::In(values)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub column: String,
    pub value: ConditionValue,
}

pub fn where_eq(column: impl Into<String>, value: impl Into<DatabaseValue>) -> Condition {
    Condition {
        column: column.into(),
        value: ConditionValue::Eq(value.into()),
    }
}

pub fn where_in<T: Into<DatabaseValue>>(
    column: impl Into<String>,
    values: impl IntoIterator<Item = T>,
) -> Condition {
    Condition {
        column: column.into(),
        value: ConditionValue::In(values.into_iter().map(Into::into).collect()),
    }
}

/// A WHERE clause: either a raw fragment with positional arguments or a conjunction
/// of equality conditions. The two kinds never mix.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Sql {
        sql: String,
        args: Vec<DatabaseValue>,
    },
    Conditions(Vec<Condition>),
}

impl Filter {
    pub fn sql(sql: impl Into<String>, args: Vec<DatabaseValue>) -> Self {
        Self::Sql {
            sql: sql.into(),
            args,
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Sql { sql, .. } => sql.trim().is_empty(),
            Self::Conditions(conditions) => conditions.is_empty(),
        }
    }
}

impl From<Condition> for Filter {
    fn from(value: Condition) -> Self {
        Self::Conditions(vec![value])
    }
}

impl From<Vec<Condition>> for Filter {
    fn from(value: Vec<Condition>) -> Self {
        Self::Conditions(value)
    }
}

const DEFAULT_STATEMENT_NAME: &str = "SQL";

#[derive(Debug, Clone)]
pub struct SelectQuery {
    pub table_name: String,
    pub filter: Option<Filter>,
    pub sorts: Vec<Sort>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
    pub name: String,
}

pub fn select(table_name: impl Into<String>) -> SelectQuery {
    SelectQuery {
        table_name: table_name.into(),
        filter: None,
        sorts: vec![],
        limit: None,
        offset: None,
        name: DEFAULT_STATEMENT_NAME.to_string(),
    }
}

impl SelectQuery {
    #[must_use]
    pub fn filter(mut self, filter: impl Into<Filter>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    #[must_use]
    pub fn filter_if_some(mut self, filter: Option<Filter>) -> Self {
        if filter.is_some() {
            self.filter = filter;
        }
        self
    }

    #[must_use]
    pub fn sort(mut self, column: impl Into<String>, direction: SortDirection) -> Self {
        self.sorts.push(sort(column, direction));
        self
    }

    #[must_use]
    pub fn sorts(mut self, sorts: impl IntoIterator<Item = Sort>) -> Self {
        self.sorts.extend(sorts);
        self
    }

    #[must_use]
    pub const fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    #[must_use]
    pub const fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    #[must_use]
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// # Errors
    ///
    /// * If the query fails to execute
    pub fn execute(&self, db: &mut dyn Adapter) -> Result<Vec<Row>, DatabaseError> {
        db.select(self)
    }

    /// # Errors
    ///
    /// * If the query fails to execute
    pub fn execute_first(self, db: &mut dyn Adapter) -> Result<Option<Row>, DatabaseError> {
        let this = if self.limit.is_none() {
            self.limit(1)
        } else {
            self
        };

        Ok(db.select(&this)?.into_iter().next())
    }
}

#[derive(Debug, Clone)]
pub struct CountQuery {
    pub table_name: String,
    pub filter: Option<Filter>,
    pub name: String,
}

pub fn count(table_name: impl Into<String>) -> CountQuery {
    CountQuery {
        table_name: table_name.into(),
        filter: None,
        name: DEFAULT_STATEMENT_NAME.to_string(),
    }
}

impl CountQuery {
    #[must_use]
    pub fn filter(mut self, filter: impl Into<Filter>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    #[must_use]
    pub fn filter_if_some(mut self, filter: Option<Filter>) -> Self {
        if filter.is_some() {
            self.filter = filter;
        }
        self
    }

    #[must_use]
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// # Errors
    ///
    /// * If the query fails to execute
    pub fn execute(&self, db: &mut dyn Adapter) -> Result<u64, DatabaseError> {
        db.count(self)
    }
}

#[derive(Debug, Clone)]
pub struct InsertStatement {
    pub table_name: String,
    pub values: Vec<(String, DatabaseValue)>,
    /// Columns the caller needs back. Only dialects with `RETURNING` honor more than the id.
    pub returning: Vec<String>,
    pub name: String,
}

pub fn insert(table_name: impl Into<String>) -> InsertStatement {
    InsertStatement {
        table_name: table_name.into(),
        values: vec![],
        returning: vec![],
        name: DEFAULT_STATEMENT_NAME.to_string(),
    }
}

impl InsertStatement {
    #[must_use]
    pub fn value(mut self, name: impl Into<String>, value: impl Into<DatabaseValue>) -> Self {
        self.values.push((name.into(), value.into()));
        self
    }

    #[must_use]
    pub fn values(mut self, values: impl IntoIterator<Item = (String, DatabaseValue)>) -> Self {
        self.values.extend(values);
        self
    }

    #[must_use]
    pub fn returning(mut self, columns: impl IntoIterator<Item = String>) -> Self {
        self.returning.extend(columns);
        self
    }

    #[must_use]
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// # Errors
    ///
    /// * If the statement fails to execute
    pub fn execute(&self, db: &mut dyn Adapter) -> Result<Row, DatabaseError> {
        db.insert(self)
    }
}

#[derive(Debug, Clone)]
pub struct UpdateStatement {
    pub table_name: String,
    pub filter: Option<Filter>,
    pub values: Vec<(String, DatabaseValue)>,
    pub name: String,
}

pub fn update(table_name: impl Into<String>) -> UpdateStatement {
    UpdateStatement {
        table_name: table_name.into(),
        filter: None,
        values: vec![],
        name: DEFAULT_STATEMENT_NAME.to_string(),
    }
}

impl UpdateStatement {
    #[must_use]
    pub fn filter(mut self, filter: impl Into<Filter>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    #[must_use]
    pub fn filter_if_some(mut self, filter: Option<Filter>) -> Self {
        if filter.is_some() {
            self.filter = filter;
        }
        self
    }

    #[must_use]
    pub fn value(mut self, name: impl Into<String>, value: impl Into<DatabaseValue>) -> Self {
        self.values.push((name.into(), value.into()));
        self
    }

    #[must_use]
    pub fn values(mut self, values: impl IntoIterator<Item = (String, DatabaseValue)>) -> Self {
        self.values.extend(values);
        self
    }

    #[must_use]
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// # Errors
    ///
    /// * If the statement fails to execute
    pub fn execute(&self, db: &mut dyn Adapter) -> Result<u64, DatabaseError> {
        db.update(self)
    }
}

#[derive(Debug, Clone)]
pub struct DeleteStatement {
    pub table_name: String,
    pub filter: Option<Filter>,
    pub name: String,
}

pub fn delete(table_name: impl Into<String>) -> DeleteStatement {
    DeleteStatement {
        table_name: table_name.into(),
        filter: None,
        name: DEFAULT_STATEMENT_NAME.to_string(),
    }
}

impl DeleteStatement {
    #[must_use]
    pub fn filter(mut self, filter: impl Into<Filter>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    #[must_use]
    pub fn filter_if_some(mut self, filter: Option<Filter>) -> Self {
        if filter.is_some() {
            self.filter = filter;
        }
        self
    }

    #[must_use]
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// # Errors
    ///
    /// * If the statement fails to execute
    pub fn execute(&self, db: &mut dyn Adapter) -> Result<u64, DatabaseError> {
        db.delete(self)
    }
}
