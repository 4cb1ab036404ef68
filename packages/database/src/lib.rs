#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

pub mod adapter;
pub mod cast;
pub mod column;
pub mod dsn;
pub mod instrument;
pub mod query;
pub mod sql;

#[cfg(feature = "mysql")]
pub mod mysql;
#[cfg(feature = "postgres")]
pub mod postgres;
#[cfg(feature = "sqlite")]
pub mod sqlite;

use std::num::TryFromIntError;

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use thiserror::Error;

pub use adapter::Adapter;
pub use cast::CastError;
pub use column::{Column, ColumnType};
pub use dsn::{Dsn, DsnError};

/// Table holding the ids of applied migrations
pub const MIGRATION_LEDGER_TABLE: &str = "datum_metadata";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Dialect {
    Sqlite,
    Postgres,
    Mysql,
}

impl Dialect {
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Sqlite => "sqlite",
            Self::Postgres => "postgres",
            Self::Mysql => "mysql",
        }
    }
}

impl std::fmt::Display for Dialect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DatabaseValue {
    Null,
    String(String),
    Bool(bool),
    Int64(i64),
    Real64(f64),
    DateTime(DateTime<Utc>),
    Date(NaiveDate),
    Time(NaiveTime),
}

impl DatabaseValue {
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    #[must_use]
    #[allow(clippy::missing_const_for_fn)]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(value) => Some(value),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int64(value) => Some(*value),
            _ => None,
        }
    }

    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub const fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Real64(value) => Some(*value),
            Self::Int64(value) => Some(*value as f64),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(value) => Some(*value),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_datetime(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::DateTime(value) => Some(*value),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_date(&self) -> Option<NaiveDate> {
        match self {
            Self::Date(value) => Some(*value),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_time(&self) -> Option<NaiveTime> {
        match self {
            Self::Time(value) => Some(*value),
            _ => None,
        }
    }
}

impl std::fmt::Display for DatabaseValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Null => f.write_str("NULL"),
            Self::String(value) => f.write_str(value),
            Self::Bool(value) => write!(f, "{value}"),
            Self::Int64(value) => write!(f, "{value}"),
            Self::Real64(value) => write!(f, "{value}"),
            Self::DateTime(value) => write!(f, "{value}"),
            Self::Date(value) => write!(f, "{value}"),
            Self::Time(value) => write!(f, "{value}"),
        }
    }
}

impl<T: Into<Self>> From<Option<T>> for DatabaseValue {
    fn from(val: Option<T>) -> Self {
        val.map_or(Self::Null, std::convert::Into::into)
    }
}

impl From<bool> for DatabaseValue {
    fn from(val: bool) -> Self {
        Self::Bool(val)
    }
}

impl From<&str> for DatabaseValue {
    fn from(val: &str) -> Self {
        Self::String(val.to_string())
    }
}

impl From<&String> for DatabaseValue {
    fn from(val: &String) -> Self {
        Self::String(val.clone())
    }
}

impl From<String> for DatabaseValue {
    fn from(val: String) -> Self {
        Self::String(val)
    }
}

impl From<f32> for DatabaseValue {
    fn from(val: f32) -> Self {
        Self::Real64(f64::from(val))
    }
}

impl From<f64> for DatabaseValue {
    fn from(val: f64) -> Self {
        Self::Real64(val)
    }
}

impl From<i8> for DatabaseValue {
    fn from(val: i8) -> Self {
        Self::Int64(i64::from(val))
    }
}

impl From<i16> for DatabaseValue {
    fn from(val: i16) -> Self {
        Self::Int64(i64::from(val))
    }
}

impl From<i32> for DatabaseValue {
    fn from(val: i32) -> Self {
        Self::Int64(i64::from(val))
    }
}

impl From<i64> for DatabaseValue {
    fn from(val: i64) -> Self {
        Self::Int64(val)
    }
}

impl From<u8> for DatabaseValue {
    fn from(val: u8) -> Self {
        Self::Int64(i64::from(val))
    }
}

impl From<u16> for DatabaseValue {
    fn from(val: u16) -> Self {
        Self::Int64(i64::from(val))
    }
}

impl From<u32> for DatabaseValue {
    fn from(val: u32) -> Self {
        Self::Int64(i64::from(val))
    }
}

impl From<u64> for DatabaseValue {
    fn from(val: u64) -> Self {
        Self::Int64(i64::try_from(val).unwrap_or(i64::MAX))
    }
}

impl From<DateTime<Utc>> for DatabaseValue {
    fn from(val: DateTime<Utc>) -> Self {
        Self::DateTime(val)
    }
}

impl From<NaiveDateTime> for DatabaseValue {
    fn from(val: NaiveDateTime) -> Self {
        Self::DateTime(val.and_utc())
    }
}

impl From<NaiveDate> for DatabaseValue {
    fn from(val: NaiveDate) -> Self {
        Self::Date(val)
    }
}

impl From<NaiveTime> for DatabaseValue {
    fn from(val: NaiveTime) -> Self {
        Self::Time(val)
    }
}

#[derive(Debug, Error)]
pub enum TryFromError {
    #[error("Could not convert to type '{0}'")]
    CouldNotConvert(String),
    #[error(transparent)]
    TryFromInt(#[from] TryFromIntError),
}

macro_rules! try_from_value {
    ($type:ty, $name:literal, $($pattern:pat => $value:expr),+ $(,)?) => {
        impl TryFrom<DatabaseValue> for $type {
            type Error = TryFromError;

            fn try_from(value: DatabaseValue) -> Result<Self, Self::Error> {
                match value {
                    $($pattern => Ok($value),)+
                    _ => Err(TryFromError::CouldNotConvert($name.into())),
                }
            }
        }
    };
}

try_from_value!(String, "String", DatabaseValue::String(value) => value);
try_from_value!(i64, "i64", DatabaseValue::Int64(value) => value);
try_from_value!(f64, "f64", DatabaseValue::Real64(value) => value);
try_from_value!(
    bool,
    "bool",
    DatabaseValue::Bool(value) => value,
    DatabaseValue::Int64(value) => value != 0,
);
try_from_value!(DateTime<Utc>, "DateTime<Utc>", DatabaseValue::DateTime(value) => value);
try_from_value!(NaiveDate, "NaiveDate", DatabaseValue::Date(value) => value);
try_from_value!(NaiveTime, "NaiveTime", DatabaseValue::Time(value) => value);

impl TryFrom<DatabaseValue> for u64 {
    type Error = TryFromError;

    fn try_from(value: DatabaseValue) -> Result<Self, Self::Error> {
        match value {
            DatabaseValue::Int64(value) => Ok(Self::try_from(value)?),
            _ => Err(TryFromError::CouldNotConvert("u64".into())),
        }
    }
}

impl TryFrom<DatabaseValue> for i32 {
    type Error = TryFromError;

    fn try_from(value: DatabaseValue) -> Result<Self, Self::Error> {
        match value {
            DatabaseValue::Int64(value) => Ok(Self::try_from(value)?),
            _ => Err(TryFromError::CouldNotConvert("i32".into())),
        }
    }
}

#[derive(Debug, Error)]
pub enum DatabaseError {
    #[cfg(feature = "sqlite")]
    #[error(transparent)]
    Sqlite(sqlite::SqliteDatabaseError),
    #[cfg(feature = "postgres")]
    #[error(transparent)]
    Postgres(postgres::PostgresDatabaseError),
    #[cfg(feature = "mysql")]
    #[error(transparent)]
    Mysql(mysql::MysqlDatabaseError),
    #[error(transparent)]
    Cast(#[from] CastError),
    #[error("Invalid statement: {0}")]
    InvalidStatement(String),
    #[error("Unsupported value: {0}")]
    UnsupportedValue(String),
    #[error("Already in transaction - nested transactions not supported")]
    AlreadyInTransaction,
    #[error("No row")]
    NoRow,
}

/// A single result row, keeping the column order reported by the driver
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    pub columns: Vec<(String, DatabaseValue)>,
}

impl Row {
    #[must_use]
    pub fn get(&self, column_name: &str) -> Option<DatabaseValue> {
        self.columns
            .iter()
            .find(|c| c.0 == column_name)
            .map(|c| c.1.clone())
    }

    #[must_use]
    pub fn id(&self) -> Option<DatabaseValue> {
        self.get("id")
    }

    /// First column of the row, used for scalar results such as `COUNT(*)`
    #[must_use]
    pub fn first(&self) -> Option<&DatabaseValue> {
        self.columns.first().map(|c| &c.1)
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone as _;
    use pretty_assertions::assert_eq;

    use super::*;

    #[test_log::test]
    fn option_none_converts_to_null() {
        assert_eq!(DatabaseValue::from(None::<i64>), DatabaseValue::Null);
        assert_eq!(DatabaseValue::from(Some("a")), DatabaseValue::String("a".into()));
    }

    #[test_log::test]
    fn naive_datetime_is_assumed_utc() {
        let naive = NaiveDate::from_ymd_opt(2008, 10, 27)
            .unwrap()
            .and_hms_opt(18, 43, 0)
            .unwrap();

        assert_eq!(
            DatabaseValue::from(naive),
            DatabaseValue::DateTime(Utc.with_ymd_and_hms(2008, 10, 27, 18, 43, 0).unwrap())
        );
    }

    #[test_log::test]
    fn bool_can_be_read_from_integer() {
        assert!(bool::try_from(DatabaseValue::Int64(1)).unwrap());
        assert!(!bool::try_from(DatabaseValue::Int64(0)).unwrap());
        assert!(bool::try_from(DatabaseValue::String("t".into())).is_err());
    }

    #[test_log::test]
    fn negative_number_does_not_convert_to_u64() {
        assert!(matches!(
            u64::try_from(DatabaseValue::Int64(-1)),
            Err(TryFromError::TryFromInt(_))
        ));
    }

    #[test_log::test]
    fn row_get_finds_column_by_name() {
        let row = Row {
            columns: vec![
                ("id".into(), DatabaseValue::Int64(1)),
                ("email".into(), DatabaseValue::String("a@example.org".into())),
            ],
        };

        assert_eq!(row.id(), Some(DatabaseValue::Int64(1)));
        assert_eq!(row.get("missing"), None);
        assert_eq!(row.first(), Some(&DatabaseValue::Int64(1)));
    }
}
