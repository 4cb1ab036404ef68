//! `MySQL` adapter using the synchronous `mysql` driver
//!
//! Statements run over the binary protocol with positional `?` parameters. Generated keys
//! come back through `last_insert_id`, and table structure is read with `SHOW FIELDS`.

use std::time::Duration;

use chrono::{NaiveDate, NaiveTime};
use mysql::{Conn, OptsBuilder, Params, Value, consts::ColumnType as MysqlColumnType, prelude::*};
use thiserror::Error;

use crate::{
    Adapter, Column, DatabaseError, DatabaseValue, Dialect, Dsn, MIGRATION_LEDGER_TABLE, Row,
    instrument::instrument,
    query::{CountQuery, DeleteStatement, InsertStatement, SelectQuery, UpdateStatement},
    sql,
};

const KNOWN_OPTIONS: &[&str] = &["connect_timeout", "prefer_socket"];

#[derive(Debug, Error)]
pub enum MysqlDatabaseError {
    #[error(transparent)]
    Mysql(#[from] mysql::Error),
    #[error("No row")]
    NoRow,
    #[error("Connection is closed")]
    Disconnected,
    #[error("Invalid {kind} value {value:?} in column '{column}'")]
    InvalidValue {
        kind: &'static str,
        column: String,
        value: String,
    },
}

impl From<MysqlDatabaseError> for DatabaseError {
    fn from(value: MysqlDatabaseError) -> Self {
        Self::Mysql(value)
    }
}

impl From<mysql::Error> for DatabaseError {
    fn from(value: mysql::Error) -> Self {
        Self::Mysql(value.into())
    }
}

/// Rows plus the bookkeeping the driver reports for the statement
struct Outcome {
    rows: Vec<Row>,
    affected_rows: u64,
    last_insert_id: Option<u64>,
}

#[derive(Debug)]
pub struct MysqlAdapter {
    connection: Option<Conn>,
    in_transaction: bool,
}

impl MysqlAdapter {
    /// Connects to the server described by `dsn`.
    ///
    /// # Errors
    ///
    /// * If the connection could not be established
    pub fn connect(dsn: &Dsn) -> Result<Self, MysqlDatabaseError> {
        for key in dsn.options.keys() {
            if !KNOWN_OPTIONS.contains(&key.as_str()) {
                log::warn!("Ignoring unknown mysql option '{key}'");
            }
        }

        let mut opts = OptsBuilder::new()
            .ip_or_hostname(dsn.host.clone())
            .user(dsn.username.clone())
            .pass(dsn.password.clone())
            .db_name(Some(dsn.database_name.clone()))
            .tcp_connect_timeout(
                dsn.option_as::<u64>("connect_timeout")
                    .map(Duration::from_secs),
            );

        if let Some(port) = dsn.port {
            opts = opts.tcp_port(port);
        }
        if let Some(prefer_socket) = dsn.option_as::<bool>("prefer_socket") {
            opts = opts.prefer_socket(prefer_socket);
        }

        log::debug!("Connecting to mysql at {dsn}");

        let mut connection = Conn::new(opts)?;
        connection.query_drop("SET time_zone = '+00:00'")?;

        Ok(Self {
            connection: Some(connection),
            in_transaction: false,
        })
    }

    fn connection(&mut self) -> Result<&mut Conn, MysqlDatabaseError> {
        self.connection.as_mut().ok_or(MysqlDatabaseError::Disconnected)
    }

    fn run(
        &mut self,
        name: &str,
        sql: &str,
        params: &[DatabaseValue],
    ) -> Result<Outcome, DatabaseError> {
        let connection = self.connection()?;
        instrument(name, sql, params, || Ok(run(connection, sql, params)?))
    }

    fn text(&mut self, name: &str, sql: &str) -> Result<(), DatabaseError> {
        let connection = self.connection()?;
        instrument(name, sql, &[], || Ok(connection.query_drop(sql)?))
    }
}

impl Drop for MysqlAdapter {
    fn drop(&mut self) {
        if self.connection.is_some() {
            log::debug!("Closing mysql connection");
        }
    }
}

impl Adapter for MysqlAdapter {
    fn dialect(&self) -> Dialect {
        Dialect::Mysql
    }

    fn select(&mut self, query: &SelectQuery) -> Result<Vec<Row>, DatabaseError> {
        let statement = sql::render_select(query, Dialect::Mysql)?;
        Ok(self.run(&query.name, &statement.sql, &statement.params)?.rows)
    }

    fn count(&mut self, query: &CountQuery) -> Result<u64, DatabaseError> {
        let statement = sql::render_count(query, Dialect::Mysql)?;
        let outcome = self.run(&query.name, &statement.sql, &statement.params)?;

        let count = outcome
            .rows
            .first()
            .and_then(Row::first)
            .and_then(DatabaseValue::as_i64)
            .ok_or(MysqlDatabaseError::NoRow)?;

        Ok(u64::try_from(count).unwrap_or_default())
    }

    fn insert(&mut self, statement: &InsertStatement) -> Result<Row, DatabaseError> {
        let rendered = sql::render_insert(statement, Dialect::Mysql);
        let outcome = self.run(&statement.name, &rendered.sql, &rendered.params)?;

        let id = outcome.last_insert_id.unwrap_or_default();
        log::trace!("Inserted row with id {id}");

        Ok(Row {
            columns: vec![("id".to_string(), DatabaseValue::from(id))],
        })
    }

    fn update(&mut self, statement: &UpdateStatement) -> Result<u64, DatabaseError> {
        let rendered = sql::render_update(statement, Dialect::Mysql)?;
        Ok(self
            .run(&statement.name, &rendered.sql, &rendered.params)?
            .affected_rows)
    }

    fn delete(&mut self, statement: &DeleteStatement) -> Result<u64, DatabaseError> {
        let rendered = sql::render_delete(statement, Dialect::Mysql)?;
        Ok(self
            .run(&statement.name, &rendered.sql, &rendered.params)?
            .affected_rows)
    }

    fn columns_of(&mut self, table_name: &str) -> Result<Vec<Column>, DatabaseError> {
        let outcome = self.run("SCHEMA", &format!("SHOW FIELDS FROM {table_name}"), &[])?;

        Ok(outcome
            .rows
            .iter()
            .filter_map(|row| {
                let name = row.get("Field")?.as_str()?.to_string();
                let raw_type = row.get("Type");
                let default = row.get("Default").filter(|x| !x.is_null());

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
            .map(|x| crate::cast::to_param(x, Dialect::Mysql))
            .collect::<Vec<_>>();
        Ok(self.run("SQL", sql, &params)?.rows)
    }

    fn execute_ddl(&mut self, sql: &str) -> Result<(), DatabaseError> {
        self.text("DDL", sql)
    }

    fn tx_begin(&mut self) -> Result<(), DatabaseError> {
        if self.in_transaction {
            return Err(DatabaseError::AlreadyInTransaction);
        }
        self.text("BEGIN", "START TRANSACTION")?;
        self.in_transaction = true;
        Ok(())
    }

    fn tx_commit(&mut self) -> Result<(), DatabaseError> {
        self.in_transaction = false;
        self.text("COMMIT", "COMMIT")
    }

    fn tx_rollback(&mut self) -> Result<(), DatabaseError> {
        self.in_transaction = false;
        self.text("ROLLBACK", "ROLLBACK")
    }

    fn in_transaction(&self) -> bool {
        self.in_transaction
    }

    fn disconnect(&mut self) -> Result<(), DatabaseError> {
        if self.connection.take().is_some() {
            log::debug!("Disconnecting mysql connection");
        }
        Ok(())
    }

    /// `TEXT` columns cannot be indexed without a prefix length
    fn prepare_migration_log(&mut self) -> Result<(), DatabaseError> {
        self.execute_ddl(&format!(
            "CREATE TABLE IF NOT EXISTS {MIGRATION_LEDGER_TABLE} (mid VARCHAR(255), INDEX(mid))"
        ))
    }
}

fn run(
    connection: &mut Conn,
    sql: &str,
    params: &[DatabaseValue],
) -> Result<Outcome, MysqlDatabaseError> {
    let params = if params.is_empty() {
        Params::Empty
    } else {
        Params::Positional(params.iter().map(to_value).collect())
    };

    let mut result = connection.exec_iter(sql, params)?;
    let mut rows = vec![];

    if let Some(set) = result.iter() {
        for row in set {
            rows.push(from_row(row?)?);
        }
    }

    log::trace!(
        "Got {} row{}",
        rows.len(),
        if rows.len() == 1 { "" } else { "s" }
    );

    Ok(Outcome {
        rows,
        affected_rows: result.affected_rows(),
        last_insert_id: result.last_insert_id(),
    })
}

fn to_value(value: &DatabaseValue) -> Value {
    match value {
        DatabaseValue::Null => Value::NULL,
        DatabaseValue::String(x) => Value::Bytes(x.as_bytes().to_vec()),
        DatabaseValue::Bool(x) => Value::Int(i64::from(*x)),
        DatabaseValue::Int64(x) => Value::Int(*x),
        DatabaseValue::Real64(x) => Value::Double(*x),
        DatabaseValue::DateTime(_) | DatabaseValue::Date(_) | DatabaseValue::Time(_) => {
            to_value(&crate::cast::to_param(value, Dialect::Mysql))
        }
    }
}

fn invalid(kind: &'static str, column: &str, value: &Value) -> MysqlDatabaseError {
    MysqlDatabaseError::InvalidValue {
        kind,
        column: column.to_string(),
        value: format!("{value:?}"),
    }
}

fn from_value(
    column: &str,
    column_type: MysqlColumnType,
    value: Value,
) -> Result<DatabaseValue, MysqlDatabaseError> {
    Ok(match value {
        Value::NULL => DatabaseValue::Null,
        Value::Bytes(bytes) => DatabaseValue::String(String::from_utf8_lossy(&bytes).into_owned()),
        Value::Int(x) => DatabaseValue::Int64(x),
        Value::UInt(x) => DatabaseValue::from(x),
        Value::Float(x) => DatabaseValue::Real64(f64::from(x)),
        Value::Double(x) => DatabaseValue::Real64(x),
        Value::Date(year, month, day, hour, minute, second, micros) => {
            let date = NaiveDate::from_ymd_opt(i32::from(year), u32::from(month), u32::from(day))
                .ok_or_else(|| invalid("date", column, &value))?;

            if column_type == MysqlColumnType::MYSQL_TYPE_DATE {
                DatabaseValue::Date(date)
            } else {
                let time = NaiveTime::from_hms_micro_opt(
                    u32::from(hour),
                    u32::from(minute),
                    u32::from(second),
                    micros,
                )
                .ok_or_else(|| invalid("datetime", column, &value))?;
                DatabaseValue::DateTime(date.and_time(time).and_utc())
            }
        }
        Value::Time(negative, days, hours, minutes, seconds, micros) => {
            if negative || days > 0 {
                return Err(invalid("time", column, &value));
            }
            DatabaseValue::Time(
                NaiveTime::from_hms_micro_opt(
                    u32::from(hours),
                    u32::from(minutes),
                    u32::from(seconds),
                    micros,
                )
                .ok_or_else(|| invalid("time", column, &value))?,
            )
        }
    })
}

fn from_row(row: mysql::Row) -> Result<Row, MysqlDatabaseError> {
    let columns = row.columns();
    let values = row.unwrap();
    let mut result = Vec::with_capacity(values.len());

    for (column, value) in columns.iter().zip(values) {
        let name = column.name_str().into_owned();
        let value = from_value(&name, column.column_type(), value)?;
        result.push((name, value));
    }

    Ok(Row { columns: result })
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone as _;
    use pretty_assertions::assert_eq;

    use super::*;

    #[test_log::test]
    fn datetimes_become_utc() {
        let value = from_value(
            "created_at",
            MysqlColumnType::MYSQL_TYPE_DATETIME,
            Value::Date(2008, 10, 27, 18, 43, 0, 0),
        )
        .unwrap();

        assert_eq!(
            value,
            DatabaseValue::DateTime(chrono::Utc.with_ymd_and_hms(2008, 10, 27, 18, 43, 0).unwrap())
        );
    }

    #[test_log::test]
    fn date_columns_stay_dates() {
        let value = from_value(
            "born_on",
            MysqlColumnType::MYSQL_TYPE_DATE,
            Value::Date(2008, 10, 27, 0, 0, 0, 0),
        )
        .unwrap();

        assert_eq!(
            value,
            DatabaseValue::Date(NaiveDate::from_ymd_opt(2008, 10, 27).unwrap())
        );
    }

    #[test_log::test]
    fn negative_durations_are_not_times_of_day() {
        assert!(matches!(
            from_value(
                "alarm",
                MysqlColumnType::MYSQL_TYPE_TIME,
                Value::Time(true, 0, 1, 0, 0, 0)
            ),
            Err(MysqlDatabaseError::InvalidValue { kind: "time", .. })
        ));
    }

    #[test_log::test]
    fn params_are_bound_with_numeric_booleans() {
        assert_eq!(to_value(&DatabaseValue::Bool(true)), Value::Int(1));
        assert_eq!(
            to_value(&DatabaseValue::String("a".into())),
            Value::Bytes(b"a".to_vec())
        );
        assert_eq!(
            to_value(&DatabaseValue::DateTime(
                chrono::Utc.with_ymd_and_hms(2008, 10, 27, 18, 43, 0).unwrap()
            )),
            Value::Bytes(b"2008-10-27 18:43:00".to_vec())
        );
    }
}
