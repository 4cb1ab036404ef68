//! Column descriptors reflected from live tables
//!
//! Every dialect reports column types as free-form strings (`VARCHAR(255)`,
//! `timestamp with time zone`, `tinyint(1)`, ...). [`classify`] folds those into the
//! small set of [`ColumnType`]s that drive casting between stored and in-memory values.

use std::sync::LazyLock;

use regex::Regex;

use crate::DatabaseValue;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnType {
    Integer,
    Float,
    DateTime,
    Time,
    Date,
    Text,
    String,
    Boolean,
    Unknown,
}

impl ColumnType {
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Integer => "integer",
            Self::Float => "float",
            Self::DateTime => "datetime",
            Self::Time => "time",
            Self::Date => "date",
            Self::Text => "text",
            Self::String => "string",
            Self::Boolean => "boolean",
            Self::Unknown => "unknown",
        }
    }

    #[must_use]
    pub const fn is_temporal(self) -> bool {
        matches!(self, Self::DateTime | Self::Time | Self::Date)
    }
}

impl std::fmt::Display for ColumnType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

static INTEGER_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(big|small|medium)?int(eger|[0-9])?\b|(?i)serial").expect("Invalid Regex")
});
static FLOAT_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)float|double|decimal|numeric|real|money").expect("Invalid Regex")
});
static DATETIME_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)datetime|timestamp with time zone|time").expect("Invalid Regex")
});
static DATE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)date|timestamp without time zone").expect("Invalid Regex")
});
static TEXT_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(c|b)lob|text").expect("Invalid Regex"));
static STRING_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)char|string|interval").expect("Invalid Regex"));
static BOOLEAN_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)bool(ean)?").expect("Invalid Regex"));
static LIMIT_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\((.*)\)").expect("Invalid Regex"));

/// Maps a driver-reported type string to its semantic [`ColumnType`].
///
/// Rules are checked in order and the first match wins. `tinyint` is only a boolean
/// when its display width is exactly 1.
#[must_use]
pub fn classify(raw_type: &str) -> ColumnType {
    if raw_type.to_ascii_lowercase().contains("tinyint") {
        return if extract_limit(raw_type) == Some(1) {
            ColumnType::Boolean
        } else {
            ColumnType::Integer
        };
    }

    let rules: [(&Regex, ColumnType); 7] = [
        (&INTEGER_REGEX, ColumnType::Integer),
        (&FLOAT_REGEX, ColumnType::Float),
        (&DATETIME_REGEX, ColumnType::DateTime),
        (&DATE_REGEX, ColumnType::Date),
        (&TEXT_REGEX, ColumnType::Text),
        (&STRING_REGEX, ColumnType::String),
        (&BOOLEAN_REGEX, ColumnType::Boolean),
    ];

    rules
        .iter()
        .find(|(regex, _)| regex.is_match(raw_type))
        .map_or(ColumnType::Unknown, |(_, column_type)| *column_type)
}

/// Extracts the numeric size from a parenthesized type suffix, e.g. `VARCHAR(255)`.
///
/// Only the leading digits are used, so `decimal(10,2)` yields `10`.
#[must_use]
pub fn extract_limit(raw_type: &str) -> Option<u32> {
    let captures = LIMIT_REGEX.captures(raw_type)?;
    let inner = captures.get(1)?.as_str().trim();
    let digits = inner
        .chars()
        .take_while(char::is_ascii_digit)
        .collect::<String>();

    digits.parse().ok()
}

#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub column_type: ColumnType,
    pub default: Option<DatabaseValue>,
    pub limit: Option<u32>,
    pub raw_type: Option<String>,
}

impl Column {
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        default: Option<DatabaseValue>,
        raw_type: Option<&str>,
    ) -> Self {
        Self {
            name: name.into(),
            column_type: raw_type.map_or(ColumnType::Unknown, classify),
            default,
            limit: raw_type.and_then(extract_limit),
            raw_type: raw_type.map(ToString::to_string),
        }
    }

    /// Column with an already known semantic type
    #[must_use]
    pub fn typed(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            default: None,
            limit: None,
            raw_type: None,
        }
    }

    /// Overrides the limit extracted from the raw type string
    #[must_use]
    pub fn with_limit(mut self, limit: Option<u32>) -> Self {
        if limit.is_some() {
            self.limit = limit;
        }
        self
    }
}
