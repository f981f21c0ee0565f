//! Column decoding helpers shared by the row mappers.
//!
//! Values are stored as text (UUIDs, RFC-3339 timestamps, `YYYY-MM-DD`
//! days, enum names); these turn them back into domain types and report
//! failures as `FromSqlConversionFailure` on the offending column.

use chrono::{DateTime, NaiveDate, SecondsFormat, SubsecRound, Utc};
use rusqlite::types::Type;
use rusqlite::Row;
use uuid::Uuid;

pub(crate) const DAY_FORMAT: &str = "%Y-%m-%d";

fn conversion(idx: usize, err: impl std::error::Error + Send + Sync + 'static) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}

#[derive(Debug)]
struct UnknownVariant(String);

impl std::fmt::Display for UnknownVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "unknown variant `{}`", self.0)
    }
}

impl std::error::Error for UnknownVariant {}

pub(crate) fn uuid_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Uuid> {
    let s: String = row.get(idx)?;
    Uuid::parse_str(&s).map_err(|e| conversion(idx, e))
}

pub(crate) fn ts_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let s: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion(idx, e))
}

pub(crate) fn day_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<NaiveDate> {
    let s: String = row.get(idx)?;
    NaiveDate::parse_from_str(&s, DAY_FORMAT).map_err(|e| conversion(idx, e))
}

/// Decode an enum column with the type's own `parse` function.
pub(crate) fn enum_at<T>(
    row: &Row<'_>,
    idx: usize,
    parse: impl FnOnce(&str) -> Option<T>,
) -> rusqlite::Result<T> {
    let s: String = row.get(idx)?;
    parse(&s).ok_or_else(|| conversion(idx, UnknownVariant(s)))
}

pub(crate) fn day_key(day: NaiveDate) -> String {
    day.format(DAY_FORMAT).to_string()
}

/// Fixed-width UTC timestamp text, so columns compare and sort correctly as
/// strings (`MAX(last_seen_at, ...)`, `ORDER BY timestamp`).
pub(crate) fn ts_key(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// The current time at the precision [`ts_key`] stores.
pub(crate) fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}
