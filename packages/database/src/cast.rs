//! Casting between in-memory field values and their stored representation
//!
//! [`to_storage`] and [`to_model`] are inverse casts driven by a [`Column`]'s semantic
//! type and the [`Dialect`] of the adapter performing the I/O. Temporal values are stored
//! as UTC strings in a fixed per-dialect format. Booleans are stored as `1`/`0` unless
//! the dialect has a native boolean type.

use std::sync::LazyLock;

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, TimeZone as _, Utc};
use regex::Regex;
use thiserror::Error;

use crate::{Column, ColumnType, DatabaseValue, Dialect};

#[derive(Debug, Error)]
pub enum CastError {
    #[error(
        "Could not parse '{value}' as {column_type} for column '{column}' (expected format '{format}')"
    )]
    Unparsable {
        column: String,
        column_type: ColumnType,
        value: String,
        format: String,
    },
    #[error("Unsupported value {value:?} for {column_type} column '{column}'")]
    UnsupportedValue {
        column: String,
        column_type: ColumnType,
        value: DatabaseValue,
    },
}

impl Dialect {
    #[must_use]
    pub const fn date_format(self) -> &'static str {
        "%Y-%m-%d"
    }

    #[must_use]
    pub const fn time_format(self) -> &'static str {
        match self {
            Self::Sqlite | Self::Postgres => "%H:%M:%S%z",
            Self::Mysql => "%H:%M:%S%:z",
        }
    }

    #[must_use]
    pub const fn timestamp_format(self) -> &'static str {
        match self {
            Self::Sqlite => "%Y-%m-%dT%H:%M:%S%z",
            Self::Postgres => "%Y-%m-%d %H:%M:%S%z",
            Self::Mysql => "%Y-%m-%d %H:%M:%S%:z",
        }
    }

    /// Whether booleans are bound as native booleans rather than `1`/`0`
    #[must_use]
    pub const fn native_bool(self) -> bool {
        matches!(self, Self::Postgres)
    }

    /// MySQL temporal columns carry no zone, so a zero offset suffix is dropped
    const fn strips_zero_offset(self) -> bool {
        matches!(self, Self::Mysql)
    }

    const fn naive_timestamp_format(self) -> &'static str {
        match self {
            Self::Sqlite => "%Y-%m-%dT%H:%M:%S",
            Self::Postgres | Self::Mysql => "%Y-%m-%d %H:%M:%S",
        }
    }
}

static ZERO_OFFSET_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(-|\+)00:00$").expect("Invalid Regex"));
static LEADING_INTEGER_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*[-+]?\d+").expect("Invalid Regex"));
static LEADING_FLOAT_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*[-+]?\d+(\.\d+)?([eE][-+]?\d+)?").expect("Invalid Regex")
});

fn epoch() -> NaiveDate {
    NaiveDate::from_ymd_opt(1970, 1, 1).unwrap_or_default()
}

fn format_utc(value: DateTime<Utc>, format: &str, dialect: Dialect) -> String {
    let formatted = value.format(format).to_string();

    if dialect.strips_zero_offset() {
        ZERO_OFFSET_REGEX.replace(&formatted, "").into_owned()
    } else {
        formatted
    }
}

fn strip_zero_offset(value: &str, dialect: Dialect) -> String {
    if dialect.strips_zero_offset() {
        ZERO_OFFSET_REGEX.replace(value, "").into_owned()
    } else {
        value.to_string()
    }
}

/// Numeric prefix of a string, `0` when there is none
fn leading_integer(value: &str) -> i64 {
    LEADING_INTEGER_REGEX
        .find(value)
        .and_then(|x| x.as_str().trim().parse().ok())
        .unwrap_or(0)
}

fn leading_float(value: &str) -> f64 {
    LEADING_FLOAT_REGEX
        .find(value)
        .and_then(|x| x.as_str().trim().parse().ok())
        .unwrap_or(0.0)
}

fn truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "t" | "true" | "y" | "yes"
    )
}

fn unsupported(value: &DatabaseValue, column: &Column) -> CastError {
    CastError::UnsupportedValue {
        column: column.name.clone(),
        column_type: column.column_type,
        value: value.clone(),
    }
}

/// Casts an in-memory value into the representation written to the database.
///
/// # Errors
///
/// * If the value cannot represent the column's semantic type (e.g. a date in an integer
///   column)
#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
pub fn to_storage(
    value: &DatabaseValue,
    column: &Column,
    dialect: Dialect,
) -> Result<DatabaseValue, CastError> {
    if value.is_null() {
        return Ok(DatabaseValue::Null);
    }

    Ok(match column.column_type {
        ColumnType::Integer => DatabaseValue::Int64(match value {
            DatabaseValue::Int64(x) => *x,
            DatabaseValue::Real64(x) => *x as i64,
            DatabaseValue::Bool(x) => i64::from(*x),
            DatabaseValue::String(x) => leading_integer(x),
            _ => return Err(unsupported(value, column)),
        }),
        ColumnType::Float => DatabaseValue::Real64(match value {
            DatabaseValue::Real64(x) => *x,
            DatabaseValue::Int64(x) => *x as f64,
            DatabaseValue::String(x) => leading_float(x),
            _ => return Err(unsupported(value, column)),
        }),
        ColumnType::DateTime => DatabaseValue::String(match value {
            DatabaseValue::DateTime(x) => format_utc(*x, dialect.timestamp_format(), dialect),
            DatabaseValue::Date(x) => format_utc(
                Utc.from_utc_datetime(&x.and_time(NaiveTime::MIN)),
                dialect.timestamp_format(),
                dialect,
            ),
            DatabaseValue::String(x) => strip_zero_offset(x, dialect),
            _ => return Err(unsupported(value, column)),
        }),
        ColumnType::Time => DatabaseValue::String(match value {
            DatabaseValue::Time(x) => format_utc(
                Utc.from_utc_datetime(&epoch().and_time(*x)),
                dialect.time_format(),
                dialect,
            ),
            DatabaseValue::DateTime(x) => format_utc(*x, dialect.time_format(), dialect),
            DatabaseValue::String(x) => strip_zero_offset(x, dialect),
            _ => return Err(unsupported(value, column)),
        }),
        ColumnType::Date => DatabaseValue::String(match value {
            DatabaseValue::Date(x) => x.format(dialect.date_format()).to_string(),
            DatabaseValue::DateTime(x) => x.format(dialect.date_format()).to_string(),
            DatabaseValue::String(x) => strip_zero_offset(x, dialect),
            _ => return Err(unsupported(value, column)),
        }),
        ColumnType::Text | ColumnType::String => DatabaseValue::String(value.to_string()),
        ColumnType::Boolean => {
            let flag = match value {
                DatabaseValue::Bool(x) => *x,
                DatabaseValue::Int64(x) => *x != 0,
                DatabaseValue::Real64(x) => *x != 0.0,
                DatabaseValue::String(x) => truthy(x),
                _ => return Err(unsupported(value, column)),
            };
            if dialect.native_bool() {
                DatabaseValue::Bool(flag)
            } else {
                DatabaseValue::Int64(i64::from(flag))
            }
        }
        ColumnType::Unknown => value.clone(),
    })
}

/// Casts a value read from the database into its in-memory representation.
///
/// Values the driver already produced with the right type pass through untouched.
///
/// # Errors
///
/// * If a stored date/time string does not match the dialect's format
/// * If the value cannot represent the column's semantic type
#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
pub fn to_model(
    value: &DatabaseValue,
    column: &Column,
    dialect: Dialect,
) -> Result<DatabaseValue, CastError> {
    if value.is_null() {
        return Ok(DatabaseValue::Null);
    }

    Ok(match column.column_type {
        ColumnType::Integer => DatabaseValue::Int64(match value {
            DatabaseValue::Int64(x) => *x,
            DatabaseValue::Real64(x) => *x as i64,
            DatabaseValue::Bool(x) => i64::from(*x),
            DatabaseValue::String(x) => leading_integer(x),
            _ => return Err(unsupported(value, column)),
        }),
        ColumnType::Float => DatabaseValue::Real64(match value {
            DatabaseValue::Real64(x) => *x,
            DatabaseValue::Int64(x) => *x as f64,
            DatabaseValue::String(x) => leading_float(x),
            _ => return Err(unsupported(value, column)),
        }),
        ColumnType::DateTime => match value {
            DatabaseValue::DateTime(_) => value.clone(),
            DatabaseValue::Date(x) => {
                DatabaseValue::DateTime(Utc.from_utc_datetime(&x.and_time(NaiveTime::MIN)))
            }
            DatabaseValue::String(x) => DatabaseValue::DateTime(parse_datetime(x, column, dialect)?),
            _ => return Err(unsupported(value, column)),
        },
        ColumnType::Time => match value {
            DatabaseValue::Time(_) => value.clone(),
            DatabaseValue::DateTime(x) => DatabaseValue::Time(x.time()),
            DatabaseValue::String(x) => DatabaseValue::Time(parse_time(x, column, dialect)?),
            _ => return Err(unsupported(value, column)),
        },
        ColumnType::Date => match value {
            DatabaseValue::Date(_) => value.clone(),
            DatabaseValue::DateTime(x) => DatabaseValue::Date(x.date_naive()),
            DatabaseValue::String(x) => DatabaseValue::Date(parse_date(x, column, dialect)?),
            _ => return Err(unsupported(value, column)),
        },
        ColumnType::Text | ColumnType::String => match value {
            DatabaseValue::String(_) => value.clone(),
            _ => DatabaseValue::String(value.to_string()),
        },
        ColumnType::Boolean => DatabaseValue::Bool(match value {
            DatabaseValue::Bool(x) => *x,
            DatabaseValue::Int64(x) => *x == 1,
            DatabaseValue::String(x) => x == "t",
            _ => false,
        }),
        ColumnType::Unknown => value.clone(),
    })
}

/// Prepares a bound parameter that did not go through a column cast, such as the
/// arguments of a raw SQL filter.
#[must_use]
pub fn to_param(value: &DatabaseValue, dialect: Dialect) -> DatabaseValue {
    match value {
        DatabaseValue::Bool(x) if !dialect.native_bool() => DatabaseValue::Int64(i64::from(*x)),
        DatabaseValue::DateTime(x) if dialect != Dialect::Postgres => {
            DatabaseValue::String(format_utc(*x, dialect.timestamp_format(), dialect))
        }
        DatabaseValue::Date(x) if dialect != Dialect::Postgres => {
            DatabaseValue::String(x.format(dialect.date_format()).to_string())
        }
        DatabaseValue::Time(x) if dialect != Dialect::Postgres => DatabaseValue::String(
            format_utc(
                Utc.from_utc_datetime(&epoch().and_time(*x)),
                dialect.time_format(),
                dialect,
            ),
        ),
        _ => value.clone(),
    }
}

fn unparsable(value: &str, column: &Column, format: &str) -> CastError {
    CastError::Unparsable {
        column: column.name.clone(),
        column_type: column.column_type,
        value: value.to_string(),
        format: format.to_string(),
    }
}

/// Parses a stored timestamp. Strings without an offset are read as UTC.
///
/// # Errors
///
/// * If the string matches neither the dialect's timestamp format nor its offset-less form
pub fn parse_datetime(
    value: &str,
    column: &Column,
    dialect: Dialect,
) -> Result<DateTime<Utc>, CastError> {
    let format = dialect.timestamp_format();

    if let Ok(parsed) = DateTime::parse_from_str(value, format) {
        return Ok(parsed.with_timezone(&Utc));
    }

    NaiveDateTime::parse_from_str(value, dialect.naive_timestamp_format())
        .map(|x| x.and_utc())
        .map_err(|_| unparsable(value, column, format))
}

/// Parses a stored time of day, normalized to UTC.
///
/// # Errors
///
/// * If the string matches neither the dialect's time format nor `HH:MM:SS`
pub fn parse_time(value: &str, column: &Column, dialect: Dialect) -> Result<NaiveTime, CastError> {
    let format = dialect.time_format();
    let anchored = format!("{} {value}", epoch().format("%Y-%m-%d"));

    if let Ok(parsed) = DateTime::parse_from_str(&anchored, &format!("%Y-%m-%d {format}")) {
        return Ok(parsed.with_timezone(&Utc).time());
    }

    NaiveTime::parse_from_str(value, "%H:%M:%S").map_err(|_| unparsable(value, column, format))
}

/// # Errors
///
/// * If the string does not match `YYYY-MM-DD`
pub fn parse_date(value: &str, column: &Column, dialect: Dialect) -> Result<NaiveDate, CastError> {
    let format = dialect.date_format();

    NaiveDate::parse_from_str(value, format).map_err(|_| unparsable(value, column, format))
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    const DIALECTS: [Dialect; 3] = [Dialect::Sqlite, Dialect::Postgres, Dialect::Mysql];

    fn time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2008, 10, 27, 18, 43, 0).unwrap()
    }

    fn round_trip(value: &DatabaseValue, column: &Column, dialect: Dialect) -> DatabaseValue {
        let stored = to_storage(value, column, dialect).unwrap();
        to_model(&stored, column, dialect).unwrap()
    }

    #[test_log::test]
    fn timestamps_are_formatted_per_dialect() {
        let column = Column::typed("created_at", ColumnType::DateTime);
        let value = DatabaseValue::DateTime(time());

        assert_eq!(
            to_storage(&value, &column, Dialect::Sqlite).unwrap(),
            DatabaseValue::String("2008-10-27T18:43:00+0000".into())
        );
        assert_eq!(
            to_storage(&value, &column, Dialect::Postgres).unwrap(),
            DatabaseValue::String("2008-10-27 18:43:00+0000".into())
        );
        assert_eq!(
            to_storage(&value, &column, Dialect::Mysql).unwrap(),
            DatabaseValue::String("2008-10-27 18:43:00".into())
        );
    }

    #[test_log::test]
    fn temporal_values_survive_a_round_trip() {
        let datetime = Column::typed("created_at", ColumnType::DateTime);
        let date = Column::typed("born_on", ColumnType::Date);
        let time_of_day = Column::typed("alarm", ColumnType::Time);

        for dialect in DIALECTS {
            let value = DatabaseValue::DateTime(time());
            assert_eq!(round_trip(&value, &datetime, dialect), value, "{dialect}");

            let value = DatabaseValue::Date(time().date_naive());
            assert_eq!(round_trip(&value, &date, dialect), value, "{dialect}");

            let value = DatabaseValue::Time(time().time());
            assert_eq!(round_trip(&value, &time_of_day, dialect), value, "{dialect}");
        }
    }

    #[test_log::test]
    fn offsets_are_normalized_to_utc_on_read() {
        let column = Column::typed("created_at", ColumnType::DateTime);
        let stored = DatabaseValue::String("2008-10-27T20:43:00+0200".into());

        assert_eq!(
            to_model(&stored, &column, Dialect::Sqlite).unwrap(),
            DatabaseValue::DateTime(time())
        );
    }

    #[test_log::test]
    fn unparsable_timestamp_is_an_error() {
        let column = Column::typed("created_at", ColumnType::DateTime);
        let stored = DatabaseValue::String("yesterday".into());

        assert!(matches!(
            to_model(&stored, &column, Dialect::Sqlite),
            Err(CastError::Unparsable { .. })
        ));
    }

    #[test_log::test]
    fn booleans_are_numeric_without_native_support() {
        let column = Column::typed("active", ColumnType::Boolean);

        assert_eq!(
            to_storage(&DatabaseValue::Bool(true), &column, Dialect::Sqlite).unwrap(),
            DatabaseValue::Int64(1)
        );
        assert_eq!(
            to_storage(&DatabaseValue::Bool(false), &column, Dialect::Mysql).unwrap(),
            DatabaseValue::Int64(0)
        );
        assert_eq!(
            to_storage(&DatabaseValue::Bool(true), &column, Dialect::Postgres).unwrap(),
            DatabaseValue::Bool(true)
        );
    }

    #[test_log::test]
    fn booleans_are_read_from_one_and_t() {
        let column = Column::typed("active", ColumnType::Boolean);

        for (stored, expected) in [
            (DatabaseValue::Int64(1), true),
            (DatabaseValue::Int64(0), false),
            (DatabaseValue::String("t".into()), true),
            (DatabaseValue::String("f".into()), false),
            (DatabaseValue::Bool(true), true),
        ] {
            assert_eq!(
                to_model(&stored, &column, Dialect::Sqlite).unwrap(),
                DatabaseValue::Bool(expected)
            );
        }
    }

    #[test_log::test]
    fn numbers_are_coerced_without_range_checks() {
        let integer = Column::typed("age", ColumnType::Integer);
        let float = Column::typed("score", ColumnType::Float);

        assert_eq!(
            to_storage(&DatabaseValue::String("42abc".into()), &integer, Dialect::Sqlite).unwrap(),
            DatabaseValue::Int64(42)
        );
        assert_eq!(
            to_storage(&DatabaseValue::Real64(3.9), &integer, Dialect::Sqlite).unwrap(),
            DatabaseValue::Int64(3)
        );
        assert_eq!(
            to_model(&DatabaseValue::String("1.5".into()), &float, Dialect::Mysql).unwrap(),
            DatabaseValue::Real64(1.5)
        );
    }

    #[test_log::test]
    fn strings_are_stringified() {
        let column = Column::typed("name", ColumnType::String);

        assert_eq!(
            to_storage(&DatabaseValue::Int64(7), &column, Dialect::Postgres).unwrap(),
            DatabaseValue::String("7".into())
        );
    }

    #[test_log::test]
    fn unknown_and_null_pass_through() {
        let column = Column::typed("payload", ColumnType::Unknown);
        let value = DatabaseValue::Real64(1.25);

        assert_eq!(to_storage(&value, &column, Dialect::Sqlite).unwrap(), value);
        assert_eq!(
            to_model(&DatabaseValue::Null, &Column::typed("x", ColumnType::Date), Dialect::Sqlite)
                .unwrap(),
            DatabaseValue::Null
        );
    }

    #[test_log::test]
    fn dates_in_integer_columns_are_unsupported() {
        let column = Column::typed("age", ColumnType::Integer);

        assert!(matches!(
            to_storage(&DatabaseValue::Date(time().date_naive()), &column, Dialect::Sqlite),
            Err(CastError::UnsupportedValue { .. })
        ));
    }

    #[test_log::test]
    fn raw_params_are_prepared_for_the_dialect() {
        assert_eq!(
            to_param(&DatabaseValue::Bool(true), Dialect::Sqlite),
            DatabaseValue::Int64(1)
        );
        assert_eq!(
            to_param(&DatabaseValue::Bool(true), Dialect::Postgres),
            DatabaseValue::Bool(true)
        );
        assert_eq!(
            to_param(&DatabaseValue::DateTime(time()), Dialect::Mysql),
            DatabaseValue::String("2008-10-27 18:43:00".into())
        );
    }
}
