use std::{sync::LazyLock, time::Instant};

use regex::Regex;

use crate::{DatabaseError, DatabaseValue};

static WHITESPACE_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("Invalid Regex"));

#[must_use]
pub fn collapse_whitespace(sql: &str) -> String {
    WHITESPACE_REGEX.replace_all(sql.trim(), " ").into_owned()
}

/// Runs a statement, logging its name, SQL, params and duration.
///
/// Failures are logged at `error` and returned unchanged.
///
/// # Errors
///
/// * Whatever `f` returns
pub fn instrument<T>(
    name: &str,
    sql: &str,
    params: &[DatabaseValue],
    f: impl FnOnce() -> Result<T, DatabaseError>,
) -> Result<T, DatabaseError> {
    let start = Instant::now();
    let result = f();
    let duration = start.elapsed().as_secs_f64() * 1000.0;
    let sql = collapse_whitespace(sql);

    match &result {
        Ok(_) => {
            log::debug!("{name} ({duration:.2}ms) {sql} params={params:?}");
        }
        Err(e) => {
            log::error!("{name} ({duration:.2}ms) {sql} params={params:?} failed: {e:?}");
        }
    }

    result
}
