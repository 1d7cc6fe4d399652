//! Timestamp coercion for the date column.
//!
//! Every cell of the timestamp column is coerced with a [`TimestampParser`];
//! rows whose value cannot be coerced are dropped, never repaired. The
//! bounds of the surviving timestamps pre-populate the date range filter.

use chrono::{NaiveDate, NaiveDateTime};
use dash_core::error::ConfigError;
use dash_core::schema::ColumnType;
use dash_core::table::{datetime_column, Table};
use dash_core::time_utils::TimestampParser;
use polars::prelude::BooleanChunked;
use serde::Serialize;
use tracing::debug;

/// Earliest and latest valid timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DateBounds {
    pub min: NaiveDateTime,
    pub max: NaiveDateTime,
}

impl DateBounds {
    pub fn start_date(&self) -> NaiveDate {
        self.min.date()
    }

    pub fn end_date(&self) -> NaiveDate {
        self.max.date()
    }
}

/// Output of [`normalize_dates`].
#[derive(Debug, Clone)]
pub struct NormalizedDates {
    pub table: Table,
    /// Rows dropped because their timestamp could not be coerced.
    pub dropped: usize,
    /// `None` when the column is absent or no row survived.
    pub bounds: Option<DateBounds>,
}

/// Coerce `column` to timestamps and drop the rows that fail.
///
/// An absent column is not an error: the table is returned unchanged. A
/// column present under another type is a [`ConfigError`].
pub fn normalize_dates(
    table: &Table,
    column: &str,
    parser: &TimestampParser,
) -> Result<NormalizedDates, ConfigError> {
    if table.column_index(column).is_none() {
        debug!("No \"{}\" column; skipping date normalization", column);
        return Ok(NormalizedDates {
            table: table.clone(),
            dropped: 0,
            bounds: None,
        });
    }
    table.require_kind(column, "timestamp", ColumnType::Timestamp)?;

    let coerced: Vec<Option<NaiveDateTime>> = if table.has_timestamps(column) {
        table.timestamps(column)?
    } else {
        let raw = table.text(column)?;
        raw.into_iter()
            .map(|cell| cell.and_then(|s| parser.parse(s)))
            .collect()
    };

    let bounds = coerced.iter().flatten().fold(None, |acc: Option<DateBounds>, &ts| {
        Some(match acc {
            None => DateBounds { min: ts, max: ts },
            Some(b) => DateBounds {
                min: b.min.min(ts),
                max: b.max.max(ts),
            },
        })
    });
    let valid: BooleanChunked = coerced.iter().map(Option::is_some).collect();

    let normalized = table
        .with_column(datetime_column(column, coerced))?
        .filter(&valid)?;

    let dropped = table.len() - normalized.len();
    debug!(
        "Normalized \"{}\": {} valid, {} dropped",
        column,
        normalized.len(),
        dropped
    );

    Ok(NormalizedDates {
        table: normalized,
        dropped,
        bounds,
    })
}

// ── Tests ─────────────────────────────────────────────────────────────────────
