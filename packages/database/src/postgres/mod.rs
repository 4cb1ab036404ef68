//! `PostgreSQL` adapter using tokio-postgres
//!
//! The adapter owns a private current-thread tokio runtime and drives every client call
//! with `block_on`, so callers see the same blocking contract as the other dialects.
//! Parameters use numbered `$n` placeholders and inserts return generated values with
//! `RETURNING`.

use std::{sync::LazyLock, time::Duration};

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use postgres_protocol::types::{
    bool_from_sql, float4_from_sql, float8_from_sql, int2_from_sql, int4_from_sql, int8_from_sql,
    text_from_sql,
};
use regex::Regex;
use thiserror::Error;
use tokio::{runtime::Runtime, task::JoinHandle};
use tokio_postgres::{
    Client, NoTls,
    config::SslMode,
    types::{FromSql, IsNull, ToSql, Type},
};

use crate::{
    Adapter, Column, DatabaseError, DatabaseValue, Dialect, Dsn, Row,
    instrument::instrument,
    query::{CountQuery, DeleteStatement, InsertStatement, SelectQuery, UpdateStatement},
    sql,
};

type BoxError = Box<dyn std::error::Error + Sync + Send>;

const KNOWN_OPTIONS: &[&str] = &["sslmode", "application_name", "connect_timeout"];

#[allow(clippy::module_name_repetitions)]
#[derive(Debug, Error)]
pub enum PostgresDatabaseError {
    #[error(transparent)]
    Postgres(#[from] tokio_postgres::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("No row")]
    NoRow,
    #[error("Connection is closed")]
    Disconnected,
    #[error("Type Not Found: '{type_name}'")]
    TypeNotFound { type_name: String },
    #[error("Cannot bind {value:?} as '{type_name}'")]
    UnsupportedParam {
        type_name: String,
        value: DatabaseValue,
    },
    #[error("Invalid sslmode '{0}'")]
    InvalidSslMode(String),
}

impl From<PostgresDatabaseError> for DatabaseError {
    fn from(value: PostgresDatabaseError) -> Self {
        Self::Postgres(value)
    }
}

impl From<tokio_postgres::Error> for DatabaseError {
    fn from(value: tokio_postgres::Error) -> Self {
        Self::Postgres(value.into())
    }
}

#[derive(Debug)]
pub struct PostgresAdapter {
    client: Option<Client>,
    handle: Option<JoinHandle<()>>,
    runtime: Runtime,
    database_name: String,
    in_transaction: bool,
}

impl PostgresAdapter {
    /// Connects to the server described by `dsn`.
    ///
    /// # Errors
    ///
    /// * If the runtime could not be built
    /// * If `sslmode` is not `disable` or `prefer`
    /// * If the connection could not be established
    pub fn connect(dsn: &Dsn) -> Result<Self, PostgresDatabaseError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;

        let mut config = tokio_postgres::Config::new();
        config.dbname(&dsn.database_name);

        if let Some(host) = &dsn.host {
            config.host(host);
        }
        if let Some(port) = dsn.port {
            config.port(port);
        }
        if let Some(user) = &dsn.username {
            config.user(user);
        }
        if let Some(password) = &dsn.password {
            config.password(password);
        }
        if let Some(name) = dsn.option("application_name") {
            config.application_name(name);
        }
        if let Some(seconds) = dsn.option_as::<u64>("connect_timeout") {
            config.connect_timeout(Duration::from_secs(seconds));
        }
        match dsn.option("sslmode") {
            None | Some("prefer") => {
                config.ssl_mode(SslMode::Prefer);
            }
            Some("disable") => {
                config.ssl_mode(SslMode::Disable);
            }
            Some(other) => return Err(PostgresDatabaseError::InvalidSslMode(other.to_string())),
        }
        for key in dsn.options.keys() {
            if !KNOWN_OPTIONS.contains(&key.as_str()) {
                log::warn!("Ignoring unknown postgres option '{key}'");
            }
        }

        log::debug!("Connecting to postgres at {dsn}");

        let (client, connection) = runtime.block_on(config.connect(NoTls))?;
        let handle = runtime.spawn(async move {
            if let Err(e) = connection.await {
                log::error!("Postgres connection error: {e:?}");
            }
        });

        Ok(Self {
            client: Some(client),
            handle: Some(handle),
            runtime,
            database_name: dsn.database_name.clone(),
            in_transaction: false,
        })
    }

    fn client(&self) -> Result<&Client, PostgresDatabaseError> {
        self.client.as_ref().ok_or(PostgresDatabaseError::Disconnected)
    }

    fn fetch(
        &self,
        name: &str,
        sql: &str,
        params: &[DatabaseValue],
    ) -> Result<Vec<Row>, DatabaseError> {
        let client = self.client()?;
        instrument(name, sql, params, || {
            Ok(self.runtime.block_on(query(client, sql, params))?)
        })
    }

    fn exec(&self, name: &str, sql: &str, params: &[DatabaseValue]) -> Result<u64, DatabaseError> {
        let client = self.client()?;
        instrument(name, sql, params, || {
            Ok(self.runtime.block_on(execute(client, sql, params))?)
        })
    }

    fn batch(&self, name: &str, sql: &str) -> Result<(), DatabaseError> {
        let client = self.client()?;
        instrument(name, sql, &[], || {
            Ok(self.runtime.block_on(client.batch_execute(sql))?)
        })
    }
}

impl Drop for PostgresAdapter {
    fn drop(&mut self) {
        if let Err(e) = self.disconnect() {
            log::error!("Failed to close postgres connection: {e:?}");
        }
    }
}

impl Adapter for PostgresAdapter {
    fn dialect(&self) -> Dialect {
        Dialect::Postgres
    }

    fn select(&mut self, query: &SelectQuery) -> Result<Vec<Row>, DatabaseError> {
        let statement = sql::render_select(query, Dialect::Postgres)?;
        self.fetch(&query.name, &statement.sql, &statement.params)
    }

    fn count(&mut self, query: &CountQuery) -> Result<u64, DatabaseError> {
        let statement = sql::render_count(query, Dialect::Postgres)?;
        let rows = self.fetch(&query.name, &statement.sql, &statement.params)?;

        let count = rows
            .first()
            .and_then(Row::first)
            .and_then(DatabaseValue::as_i64)
            .ok_or(PostgresDatabaseError::NoRow)?;

        Ok(u64::try_from(count).unwrap_or_default())
    }

    fn insert(&mut self, statement: &InsertStatement) -> Result<Row, DatabaseError> {
        let rendered = sql::render_insert(statement, Dialect::Postgres);

        if statement.returning.is_empty() {
            self.exec(&statement.name, &rendered.sql, &rendered.params)?;
            return Ok(Row { columns: vec![] });
        }

        self.fetch(&statement.name, &rendered.sql, &rendered.params)?
            .into_iter()
            .next()
            .ok_or_else(|| PostgresDatabaseError::NoRow.into())
    }

    fn update(&mut self, statement: &UpdateStatement) -> Result<u64, DatabaseError> {
        let rendered = sql::render_update(statement, Dialect::Postgres)?;
        self.exec(&statement.name, &rendered.sql, &rendered.params)
    }

    fn delete(&mut self, statement: &DeleteStatement) -> Result<u64, DatabaseError> {
        let rendered = sql::render_delete(statement, Dialect::Postgres)?;
        self.exec(&statement.name, &rendered.sql, &rendered.params)
    }

    fn columns_of(&mut self, table_name: &str) -> Result<Vec<Column>, DatabaseError> {
        // information_schema columns are domain types; cast to plain types for decoding
        let rows = self.fetch(
            "SCHEMA",
            "SELECT column_name::text AS column_name,
                    column_default::text AS column_default,
                    character_maximum_length::int4 AS character_maximum_length,
                    data_type::text AS data_type
               FROM information_schema.columns
              WHERE table_catalog = $1
                AND table_name = $2
              ORDER BY ordinal_position",
            &[
                self.database_name.clone().into(),
                table_name.into(),
            ],
        )?;

        Ok(rows
            .iter()
            .filter_map(|row| {
                let name = row.get("column_name")?.as_str()?.to_string();
                let raw_type = row.get("data_type");
                let default = row
                    .get("column_default")
                    .and_then(|x| x.as_str().map(infer_default_value));
                let limit = row
                    .get("character_maximum_length")
                    .and_then(|x| x.as_i64())
                    .and_then(|x| u32::try_from(x).ok());

                Some(
                    Column::new(name, default, raw_type.as_ref().and_then(DatabaseValue::as_str))
                        .with_limit(limit),
                )
            })
            .collect())
    }

    fn execute(&mut self, sql: &str, params: &[DatabaseValue]) -> Result<Vec<Row>, DatabaseError> {
        let params = params
            .iter()
            .map(|x| crate::cast::to_param(x, Dialect::Postgres))
            .collect::<Vec<_>>();
        self.fetch("SQL", sql, &params)
    }

    fn execute_ddl(&mut self, sql: &str) -> Result<(), DatabaseError> {
        self.batch("DDL", sql)
    }

    fn tx_begin(&mut self) -> Result<(), DatabaseError> {
        if self.in_transaction {
            return Err(DatabaseError::AlreadyInTransaction);
        }
        self.batch("BEGIN", "BEGIN")?;
        self.in_transaction = true;
        Ok(())
    }

    fn tx_commit(&mut self) -> Result<(), DatabaseError> {
        self.in_transaction = false;
        self.batch("COMMIT", "COMMIT")
    }

    fn tx_rollback(&mut self) -> Result<(), DatabaseError> {
        self.in_transaction = false;
        self.batch("ROLLBACK", "ROLLBACK")
    }

    fn in_transaction(&self) -> bool {
        self.in_transaction
    }

    fn disconnect(&mut self) -> Result<(), DatabaseError> {
        if self.client.take().is_some() {
            log::debug!("Disconnecting postgres connection");
        }
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
        Ok(())
    }
}

static STRING_DEFAULT_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^'(.*)'::(bpchar|text|character varying)$").expect("Invalid Regex")
});
static INTEGER_DEFAULT_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9]+$").expect("Invalid Regex"));
static FLOAT_DEFAULT_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9]+(\.[0-9]*)$").expect("Invalid Regex"));

/// Interprets `information_schema.columns.column_default`. Expressions such as
/// `nextval(...)` have no literal value and yield `Null`.
fn infer_default_value(value: &str) -> DatabaseValue {
    let lower = value.to_ascii_lowercase();

    if lower.contains("true") {
        return DatabaseValue::Bool(true);
    }
    if lower.contains("false") {
        return DatabaseValue::Bool(false);
    }
    if let Some(captures) = STRING_DEFAULT_REGEX.captures(value) {
        return captures
            .get(1)
            .map_or(DatabaseValue::Null, |x| x.as_str().into());
    }
    if INTEGER_DEFAULT_REGEX.is_match(value) {
        return value.parse().map_or(DatabaseValue::Null, DatabaseValue::Int64);
    }
    if FLOAT_DEFAULT_REGEX.is_match(value) {
        return value.parse().map_or(DatabaseValue::Null, DatabaseValue::Real64);
    }

    DatabaseValue::Null
}

async fn query(
    client: &Client,
    sql: &str,
    params: &[DatabaseValue],
) -> Result<Vec<Row>, PostgresDatabaseError> {
    let params = to_params(params);
    let refs = params
        .iter()
        .map(|x| x as &(dyn ToSql + Sync))
        .collect::<Vec<_>>();

    let rows = client.query(sql, &refs).await?;
    let mut results = Vec::with_capacity(rows.len());

    for row in &rows {
        results.push(from_row(row)?);
    }

    log::trace!(
        "Got {} row{}",
        results.len(),
        if results.len() == 1 { "" } else { "s" }
    );

    Ok(results)
}

async fn execute(
    client: &Client,
    sql: &str,
    params: &[DatabaseValue],
) -> Result<u64, PostgresDatabaseError> {
    let params = to_params(params);
    let refs = params
        .iter()
        .map(|x| x as &(dyn ToSql + Sync))
        .collect::<Vec<_>>();

    let affected = client.execute(sql, &refs).await?;
    log::trace!("Affected {affected} row{}", if affected == 1 { "" } else { "s" });

    Ok(affected)
}

fn from_row(row: &tokio_postgres::Row) -> Result<Row, PostgresDatabaseError> {
    let mut columns = vec![];

    for (i, column) in row.columns().iter().enumerate() {
        log::trace!("Mapping column {:?}", column.name());
        let value = row
            .try_get::<_, DatabaseValue>(i)
            .map_err(|_| PostgresDatabaseError::TypeNotFound {
                type_name: column.type_().name().to_string(),
            })?;
        columns.push((column.name().to_string(), value));
    }

    Ok(Row { columns })
}

fn to_params(values: &[DatabaseValue]) -> Vec<PgDatabaseValue> {
    values.iter().cloned().map(PgDatabaseValue).collect()
}

impl<'a> FromSql<'a> for DatabaseValue {
    fn from_sql(ty: &Type, raw: &'a [u8]) -> Result<Self, BoxError> {
        Ok(match ty.name() {
            "bool" => Self::Bool(bool_from_sql(raw)?),
            "int2" => Self::Int64(i64::from(int2_from_sql(raw)?)),
            "int4" => Self::Int64(i64::from(int4_from_sql(raw)?)),
            "int8" => Self::Int64(int8_from_sql(raw)?),
            "float4" => Self::Real64(f64::from(float4_from_sql(raw)?)),
            "float8" => Self::Real64(float8_from_sql(raw)?),
            "varchar" | "bpchar" | "text" | "name" | "citext" | "unknown" => {
                Self::String(text_from_sql(raw)?.to_string())
            }
            "timestamp" => Self::DateTime(NaiveDateTime::from_sql(ty, raw)?.and_utc()),
            "timestamptz" => Self::DateTime(DateTime::<Utc>::from_sql(ty, raw)?),
            "date" => Self::Date(NaiveDate::from_sql(ty, raw)?),
            "time" => Self::Time(NaiveTime::from_sql(ty, raw)?),
            _ => {
                return Err(Box::new(PostgresDatabaseError::TypeNotFound {
                    type_name: ty.to_string(),
                }));
            }
        })
    }

    fn from_sql_null(ty: &Type) -> Result<Self, BoxError> {
        log::trace!("FromSql from_sql_null: ty={}", ty.name());
        Ok(Self::Null)
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }
}

/// A bound parameter, encoded according to the type the server inferred for its
/// placeholder
#[derive(Debug, Clone)]
pub struct PgDatabaseValue(DatabaseValue);

fn unsupported(value: &DatabaseValue, ty: &Type) -> BoxError {
    Box::new(PostgresDatabaseError::UnsupportedParam {
        type_name: ty.name().to_string(),
        value: value.clone(),
    })
}

#[allow(clippy::cast_possible_truncation)]
fn int_param(value: &DatabaseValue, ty: &Type) -> Result<i64, BoxError> {
    match value {
        DatabaseValue::Int64(x) => Ok(*x),
        DatabaseValue::Bool(x) => Ok(i64::from(*x)),
        DatabaseValue::Real64(x) => Ok(*x as i64),
        DatabaseValue::String(x) => x.trim().parse().map_err(|_| unsupported(value, ty)),
        _ => Err(unsupported(value, ty)),
    }
}

#[allow(clippy::cast_precision_loss)]
fn float_param(value: &DatabaseValue, ty: &Type) -> Result<f64, BoxError> {
    match value {
        DatabaseValue::Real64(x) => Ok(*x),
        DatabaseValue::Int64(x) => Ok(*x as f64),
        DatabaseValue::String(x) => x.trim().parse().map_err(|_| unsupported(value, ty)),
        _ => Err(unsupported(value, ty)),
    }
}

fn bool_param(value: &DatabaseValue, ty: &Type) -> Result<bool, BoxError> {
    match value {
        DatabaseValue::Bool(x) => Ok(*x),
        DatabaseValue::Int64(x) => Ok(*x != 0),
        DatabaseValue::String(x) => Ok(matches!(x.as_str(), "t" | "true" | "1")),
        _ => Err(unsupported(value, ty)),
    }
}

fn datetime_param(value: &DatabaseValue, ty: &Type) -> Result<DateTime<Utc>, BoxError> {
    match value {
        DatabaseValue::DateTime(x) => Ok(*x),
        DatabaseValue::Date(x) => Ok(x.and_time(NaiveTime::MIN).and_utc()),
        DatabaseValue::String(x) => parse_datetime(x).ok_or_else(|| unsupported(value, ty)),
        _ => Err(unsupported(value, ty)),
    }
}

fn date_param(value: &DatabaseValue, ty: &Type) -> Result<NaiveDate, BoxError> {
    match value {
        DatabaseValue::Date(x) => Ok(*x),
        DatabaseValue::DateTime(x) => Ok(x.date_naive()),
        DatabaseValue::String(x) => NaiveDate::parse_from_str(x, "%Y-%m-%d")
            .ok()
            .or_else(|| parse_datetime(x).map(|x| x.date_naive()))
            .ok_or_else(|| unsupported(value, ty)),
        _ => Err(unsupported(value, ty)),
    }
}

fn time_param(value: &DatabaseValue, ty: &Type) -> Result<NaiveTime, BoxError> {
    match value {
        DatabaseValue::Time(x) => Ok(*x),
        DatabaseValue::DateTime(x) => Ok(x.time()),
        DatabaseValue::String(x) => {
            DateTime::parse_from_str(&format!("1970-01-01 {x}"), "%Y-%m-%d %H:%M:%S%z")
                .map(|x| x.with_timezone(&Utc).time())
                .or_else(|_| NaiveTime::parse_from_str(x, "%H:%M:%S"))
                .map_err(|_| unsupported(value, ty))
        }
        _ => Err(unsupported(value, ty)),
    }
}

fn parse_datetime(value: &str) -> Option<DateTime<Utc>> {
    ["%Y-%m-%d %H:%M:%S%z", "%Y-%m-%dT%H:%M:%S%z"]
        .iter()
        .find_map(|format| DateTime::parse_from_str(value, format).ok())
        .map(|x| x.with_timezone(&Utc))
        .or_else(|| DateTime::parse_from_rfc3339(value).ok().map(|x| x.with_timezone(&Utc)))
        .or_else(|| {
            ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"]
                .iter()
                .find_map(|format| NaiveDateTime::parse_from_str(value, format).ok())
                .map(|x| x.and_utc())
        })
}

impl ToSql for PgDatabaseValue {
    fn accepts(ty: &Type) -> bool
    where
        Self: Sized,
    {
        log::trace!("ToSql accepts: ty={}", ty.name());
        true
    }

    fn to_sql_checked(
        &self,
        ty: &Type,
        out: &mut tokio_util::bytes::BytesMut,
    ) -> Result<IsNull, BoxError> {
        log::trace!("to_sql_checked: ty={}", ty.name());

        let value = &self.0;

        if value.is_null() {
            return Ok(IsNull::Yes);
        }

        match ty.name() {
            "bool" => bool_param(value, ty)?.to_sql(ty, out),
            "int2" => i16::try_from(int_param(value, ty)?)?.to_sql(ty, out),
            "int4" => i32::try_from(int_param(value, ty)?)?.to_sql(ty, out),
            "int8" => int_param(value, ty)?.to_sql(ty, out),
            #[allow(clippy::cast_possible_truncation)]
            "float4" => (float_param(value, ty)? as f32).to_sql(ty, out),
            "float8" => float_param(value, ty)?.to_sql(ty, out),
            "timestamptz" => datetime_param(value, ty)?.to_sql(ty, out),
            "timestamp" => datetime_param(value, ty)?.naive_utc().to_sql(ty, out),
            "date" => date_param(value, ty)?.to_sql(ty, out),
            "time" => time_param(value, ty)?.to_sql(ty, out),
            _ => value.to_string().to_sql(ty, out),
        }
    }

    fn to_sql(
        &self,
        ty: &Type,
        out: &mut tokio_util::bytes::BytesMut,
    ) -> Result<IsNull, BoxError>
    where
        Self: Sized,
    {
        self.to_sql_checked(ty, out)
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone as _;
    use pretty_assertions::assert_eq;

    use super::*;

    #[test_log::test]
    fn infers_literal_defaults() {
        assert_eq!(infer_default_value("true"), DatabaseValue::Bool(true));
        assert_eq!(infer_default_value("FALSE"), DatabaseValue::Bool(false));
        assert_eq!(
            infer_default_value("'anon'::character varying"),
            DatabaseValue::String("anon".into())
        );
        assert_eq!(
            infer_default_value("'x'::bpchar"),
            DatabaseValue::String("x".into())
        );
        assert_eq!(infer_default_value("42"), DatabaseValue::Int64(42));
        assert_eq!(infer_default_value("1.5"), DatabaseValue::Real64(1.5));
        assert_eq!(
            infer_default_value("nextval('users_id_seq'::regclass)"),
            DatabaseValue::Null
        );
    }

    #[test_log::test]
    fn stored_timestamp_strings_are_parsed_for_binding() {
        let expected = Utc.with_ymd_and_hms(2008, 10, 27, 18, 43, 0).unwrap();

        assert_eq!(parse_datetime("2008-10-27 18:43:00+0000"), Some(expected));
        assert_eq!(parse_datetime("2008-10-27T20:43:00+0200"), Some(expected));
        assert_eq!(parse_datetime("2008-10-27 18:43:00"), Some(expected));
        assert_eq!(parse_datetime("not a date"), None);
    }

    #[test_log::test]
    fn params_convert_between_numeric_kinds() {
        assert_eq!(int_param(&DatabaseValue::Bool(true), &Type::INT4).unwrap(), 1);
        assert!(bool_param(&DatabaseValue::Int64(1), &Type::BOOL).unwrap());
        assert_eq!(
            float_param(&DatabaseValue::Int64(2), &Type::FLOAT8).unwrap(),
            2.0
        );
        assert!(int_param(&DatabaseValue::Date(NaiveDate::default()), &Type::INT8).is_err());
    }

    #[test_log::test]
    fn unknown_sslmode_is_rejected_before_connecting() {
        let dsn = Dsn::parse("postgres://localhost/app?sslmode=require").unwrap();

        assert!(matches!(
            PostgresAdapter::connect(&dsn),
            Err(PostgresDatabaseError::InvalidSslMode(x)) if x == "require"
        ));
    }
}
