//! Dialect-aware SQL rendering
//!
//! All dialects share one statement shape. They differ in placeholder syntax (`?` versus
//! `$n`), in how an `OFFSET` without a `LIMIT` is spelled, and in whether an insert can
//! `RETURN` columns.

use std::sync::LazyLock;

use regex::{Captures, Regex};

use crate::{
    DatabaseError, DatabaseValue, Dialect, cast,
    query::{
        ConditionValue, CountQuery, DeleteStatement, Filter, InsertStatement, SelectQuery, Sort,
        UpdateStatement,
    },
};

/// Rendered SQL plus its bound parameters, in placeholder order
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<DatabaseValue>,
}

static NUMBERED_PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$(\d+)").expect("Invalid Regex"));

struct Binder {
    dialect: Dialect,
    params: Vec<DatabaseValue>,
}

impl Binder {
    const fn new(dialect: Dialect) -> Self {
        Self {
            dialect,
            params: vec![],
        }
    }

    fn bind(&mut self, value: &DatabaseValue) -> String {
        self.params.push(cast::to_param(value, self.dialect));

        match self.dialect {
            Dialect::Postgres => format!("${}", self.params.len()),
            Dialect::Sqlite | Dialect::Mysql => "?".to_string(),
        }
    }

    /// Raw fragments carry their own placeholders. Numbered ones are shifted past the
    /// parameters already bound so that `$1` still refers to the fragment's first argument.
    fn push_raw(&mut self, sql: &str, args: &[DatabaseValue]) -> String {
        let offset = self.params.len();
        self.params
            .extend(args.iter().map(|x| cast::to_param(x, self.dialect)));

        if self.dialect != Dialect::Postgres || offset == 0 {
            return sql.to_string();
        }

        NUMBERED_PLACEHOLDER
            .replace_all(sql, |caps: &Captures| {
                caps[1].parse::<usize>().map_or_else(
                    |_| caps[0].to_string(),
                    |index| format!("${}", index + offset),
                )
            })
            .into_owned()
    }

    fn finish(self, sql: Vec<String>) -> Statement {
        Statement {
            sql: sql.join(" "),
            params: self.params,
        }
    }
}

fn render_where(
    filter: Option<&Filter>,
    binder: &mut Binder,
) -> Result<Option<String>, DatabaseError> {
    let Some(filter) = filter.filter(|x| !x.is_empty()) else {
        return Ok(None);
    };

    Ok(Some(match filter {
        Filter::Sql { sql, args } => binder.push_raw(sql, args),
        Filter::Conditions(conditions) => {
            let mut clauses = Vec::with_capacity(conditions.len());

            for condition in conditions {
                let column = &condition.column;
                clauses.push(match &condition.value {
                    ConditionValue::Eq(DatabaseValue::Null) => {
                        format!("{column} IS NULL")
                    }
                    ConditionValue::Eq(value) => {
                        format!("{column} = {}", binder.bind(value))
                    }
                    ConditionValue::In(values) => {
                        if values.is_empty() {
                            return Err(DatabaseError::UnsupportedValue(format!(
                                "Empty list for condition on '{column}'"
                            )));
                        }
                        let placeholders = values
                            .iter()
                            .map(|x| binder.bind(x))
                            .collect::<Vec<_>>()
                            .join(", ");
                        format!("{column} IN ({placeholders})")
                    }
                });
            }

            clauses.join(" AND ")
        }
    }))
}

/// `col DIRECTION` pairs joined by commas
#[must_use]
pub fn render_order(sorts: &[Sort]) -> Option<String> {
    if sorts.is_empty() {
        return None;
    }

    Some(
        sorts
            .iter()
            .map(|x| format!("{} {}", x.column, x.direction.as_sql()))
            .collect::<Vec<_>>()
            .join(", "),
    )
}

#[allow(clippy::cast_possible_wrap)]
fn bind_count(binder: &mut Binder, value: u64) -> String {
    binder.bind(&DatabaseValue::Int64(value as i64))
}

/// # Errors
///
/// * If a condition carries an empty value list
pub fn render_select(query: &SelectQuery, dialect: Dialect) -> Result<Statement, DatabaseError> {
    let mut binder = Binder::new(dialect);
    let mut sql = vec![format!("SELECT * FROM {}", query.table_name)];

    if let Some(condition) = render_where(query.filter.as_ref(), &mut binder)? {
        sql.push(format!("WHERE ({condition})"));
    }

    if let Some(order) = render_order(&query.sorts) {
        sql.push(format!("ORDER BY {order}"));
    }

    match (query.limit, query.offset) {
        (Some(limit), offset) => {
            sql.push(format!("LIMIT {}", bind_count(&mut binder, limit)));
            if let Some(offset) = offset {
                sql.push(format!("OFFSET {}", bind_count(&mut binder, offset)));
            }
        }
        (None, Some(offset)) => {
            match dialect {
                Dialect::Sqlite => sql.push("LIMIT -1".to_string()),
                Dialect::Mysql => sql.push(format!("LIMIT {}", u64::MAX)),
                Dialect::Postgres => {}
            }
            sql.push(format!("OFFSET {}", bind_count(&mut binder, offset)));
        }
        (None, None) => {}
    }

    Ok(binder.finish(sql))
}

/// # Errors
///
/// * If a condition carries an empty value list
pub fn render_count(query: &CountQuery, dialect: Dialect) -> Result<Statement, DatabaseError> {
    let mut binder = Binder::new(dialect);
    let mut sql = vec![format!("SELECT COUNT(*) FROM {}", query.table_name)];

    if let Some(condition) = render_where(query.filter.as_ref(), &mut binder)? {
        sql.push(format!("WHERE ({condition})"));
    }

    Ok(binder.finish(sql))
}

/// Renders an insert. `RETURNING` is only emitted for dialects that support it and only
/// when columns were requested.
#[must_use]
pub fn render_insert(statement: &InsertStatement, dialect: Dialect) -> Statement {
    let mut binder = Binder::new(dialect);
    let mut sql = vec![format!("INSERT INTO {}", statement.table_name)];

    if statement.values.is_empty() {
        sql.push(match dialect {
            Dialect::Mysql => "() VALUES ()".to_string(),
            Dialect::Sqlite | Dialect::Postgres => "DEFAULT VALUES".to_string(),
        });
    } else {
        let columns = statement
            .values
            .iter()
            .map(|(name, _)| name.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        let placeholders = statement
            .values
            .iter()
            .map(|(_, value)| binder.bind(value))
            .collect::<Vec<_>>()
            .join(", ");

        sql.push(format!("({columns})"));
        sql.push(format!("VALUES ({placeholders})"));
    }

    if dialect == Dialect::Postgres && !statement.returning.is_empty() {
        sql.push(format!("RETURNING {}", statement.returning.join(", ")));
    }

    binder.finish(sql)
}

/// # Errors
///
/// * If there is nothing to set
/// * If a condition carries an empty value list
pub fn render_update(
    statement: &UpdateStatement,
    dialect: Dialect,
) -> Result<Statement, DatabaseError> {
    if statement.values.is_empty() {
        return Err(DatabaseError::InvalidStatement(format!(
            "UPDATE {} has no values to set",
            statement.table_name
        )));
    }

    let mut binder = Binder::new(dialect);
    let setters = statement
        .values
        .iter()
        .map(|(name, value)| format!("{name} = {}", binder.bind(value)))
        .collect::<Vec<_>>()
        .join(", ");
    let mut sql = vec![format!("UPDATE {} SET {setters}", statement.table_name)];

    if let Some(condition) = render_where(statement.filter.as_ref(), &mut binder)? {
        sql.push(format!("WHERE ({condition})"));
    }

    Ok(binder.finish(sql))
}

/// # Errors
///
/// * If a condition carries an empty value list
pub fn render_delete(
    statement: &DeleteStatement,
    dialect: Dialect,
) -> Result<Statement, DatabaseError> {
    let mut binder = Binder::new(dialect);
    let mut sql = vec![format!("DELETE FROM {}", statement.table_name)];

    if let Some(condition) = render_where(statement.filter.as_ref(), &mut binder)? {
        sql.push(format!("WHERE ({condition})"));
    }

    Ok(binder.finish(sql))
}
