//! Median imputation of implausible amounts.
//!
//! Zero and negative amounts are treated as data-entry artifacts: they are
//! masked as missing and every missing cell of the column is then filled
//! with the median of the remaining (strictly positive) values.

use dash_core::error::ConfigError;
use dash_core::schema::ColumnType;
use dash_core::table::Table;
use polars::prelude::*;
use serde::Serialize;
use tracing::{debug, warn};

/// What the sanitizer did to the column.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SanitizeReport {
    pub column: String,
    /// Cells that were zero or negative before masking.
    pub masked: usize,
    /// Cells replaced by the median (masked plus originally missing).
    pub imputed: usize,
    /// Median of the valid values; `None` when there were none.
    pub median: Option<f64>,
}

/// A sanitized table plus its report.
#[derive(Debug, Clone)]
pub struct Sanitized {
    pub table: Table,
    pub report: SanitizeReport,
}

/// Mask non-positive values of `column` and impute the median.
///
/// When the column holds no positive value at all the median is undefined:
/// masked cells are left missing, a warning is logged and the report carries
/// `median: None`.
pub fn sanitize_amounts(table: &Table, column: &str) -> Result<Sanitized, ConfigError> {
    table.require_kind(column, "amount", ColumnType::Numeric)?;

    let values = table.numbers(column)?;
    let positive = values.filter(&values.gt(0.0))?;
    let median = positive.median();

    let masked = values.into_iter().flatten().filter(|n| *n <= 0.0).count();
    let imputed = table.len() - positive.len();

    if median.is_none() && imputed > 0 {
        warn!(
            "Column \"{}\" has no positive values; {} cells left missing",
            column, imputed
        );
    }

    let filled: Float64Chunked = values
        .into_iter()
        .map(|v| match v {
            Some(n) if n > 0.0 => Some(n),
            _ => median,
        })
        .collect();
    let sanitized = table.with_column(filled.with_name(column.into()).into_series().into())?;

    debug!(
        "Sanitized \"{}\": {} masked, {} imputed, median {:?}",
        column, masked, imputed, median
    );

    Ok(Sanitized {
        table: sanitized,
        report: SanitizeReport {
            column: column.to_string(),
            masked,
            imputed,
            median,
        },
    })
}

// ── Tests ─────────────────────────────────────────────────────────────────────
