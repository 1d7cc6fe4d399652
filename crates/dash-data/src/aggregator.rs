//! Grouped summaries over a filtered transaction table.
//!
//! Every view is a pure function of its input table. An empty table yields
//! an empty view; a selection that names an absent column, or a column of the
//! wrong type, yields a [`ConfigError`].

use std::fmt;
use std::str::FromStr;

use chrono::NaiveDateTime;
use dash_core::error::ConfigError;
use dash_core::formatting::round2;
use dash_core::schema::ColumnType;
use dash_core::table::{from_millis, Table};
use polars::prelude::*;
use serde::{Deserialize, Serialize};

// ── TimeBucket ────────────────────────────────────────────────────────────────

/// Granularity of a time-series view.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeBucket {
    #[default]
    Day,
    Month,
}

impl TimeBucket {
    /// Period key format: `"2024-01-15"` or `"2024-01"`.
    pub fn key_format(self) -> &'static str {
        match self {
            TimeBucket::Day => "%Y-%m-%d",
            TimeBucket::Month => "%Y-%m",
        }
    }

    fn key(self, ts: NaiveDateTime) -> String {
        ts.format(self.key_format()).to_string()
    }
}

impl fmt::Display for TimeBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimeBucket::Day => f.write_str("day"),
            TimeBucket::Month => f.write_str("month"),
        }
    }
}

impl FromStr for TimeBucket {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "day" | "daily" => Ok(TimeBucket::Day),
            "month" | "monthly" => Ok(TimeBucket::Month),
            other => Err(format!("unknown time bucket \"{other}\" (expected day or month)")),
        }
    }
}

// ── View rows ─────────────────────────────────────────────────────────────────

/// Row count for one period.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PeriodCount {
    pub period: String,
    pub count: usize,
}

/// Sum of the value column for one category.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategoryTotal {
    pub category: String,
    pub total: f64,
}

/// Mean of the value column for one period.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PeriodMean {
    pub period: String,
    /// `None` when every value in the period is missing.
    pub mean: Option<f64>,
    /// Non-missing values that went into the mean.
    pub count: usize,
}

/// Mean, sum and count of one value column within one group, rounded to
/// two decimals.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ColumnStats {
    pub mean: Option<f64>,
    pub sum: f64,
    /// Non-missing cells.
    pub count: usize,
}

/// One group of a [`GroupedSummary`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupRow {
    pub group: String,
    /// Rows in the group, missing values included.
    pub rows: usize,
    /// Aligned with [`GroupedSummary::value_columns`].
    pub stats: Vec<ColumnStats>,
}

/// Per-group statistics keyed by the distinct values of the group column.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupedSummary {
    pub group_column: String,
    pub value_columns: Vec<String>,
    /// Sorted by group key.
    pub rows: Vec<GroupRow>,
}

impl GroupedSummary {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// `describe()`-style statistics of a numeric column.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NumericSummary {
    pub column: String,
    pub count: usize,
    pub mean: Option<f64>,
    /// Sample standard deviation; needs at least two values.
    pub std: Option<f64>,
    pub min: Option<f64>,
    pub p25: Option<f64>,
    pub median: Option<f64>,
    pub p75: Option<f64>,
    pub max: Option<f64>,
}

/// Extent of a timestamp column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DateSummary {
    pub column: String,
    pub count: usize,
    pub min: Option<NaiveDateTime>,
    pub max: Option<NaiveDateTime>,
}

// ── Views ─────────────────────────────────────────────────────────────────────

/// Row count per calendar day, ascending.
pub fn counts_by_day(table: &Table, date_col: &str) -> Result<Vec<PeriodCount>, ConfigError> {
    table.require_kind(date_col, "date", ColumnType::Timestamp)?;
    let by_day = period_frame(table, date_col, TimeBucket::Day, None)?
        .lazy()
        .group_by([col(PERIOD)])
        .agg([len().alias(ROWS)])
        .collect()?;

    let periods = text_cells(&by_day, PERIOD)?;
    let counts = count_cells(&by_day, ROWS)?;
    let mut out: Vec<PeriodCount> = periods
        .into_iter()
        .zip(counts)
        .filter_map(|(period, count)| Some(PeriodCount { period: period?, count }))
        .collect();
    out.sort_by(|a, b| a.period.cmp(&b.period));
    Ok(out)
}

/// Sum of `value_col` per category, largest first.
///
/// Missing values contribute nothing; ties are ordered by category.
pub fn sum_by_category(
    table: &Table,
    cat_col: &str,
    value_col: &str,
) -> Result<Vec<CategoryTotal>, ConfigError> {
    table.require_kind(cat_col, "category", ColumnType::Categorical)?;
    table.require_kind(value_col, "value", ColumnType::Numeric)?;

    let totals = table
        .frame()
        .clone()
        .lazy()
        .group_by([col(cat_col)])
        .agg([col(value_col).sum().alias("total")])
        .collect()?;

    let mut out: Vec<CategoryTotal> = text_cells(&totals, cat_col)?
        .into_iter()
        .zip(float_cells(&totals, "total")?)
        .map(|(category, total)| CategoryTotal {
            category: category.unwrap_or_default(),
            total: total.unwrap_or_default(),
        })
        .collect();
    out.sort_by(|a, b| a.category.cmp(&b.category));
    // Stable: equal totals stay in category order.
    out.sort_by(|a, b| b.total.total_cmp(&a.total));
    Ok(out)
}

/// Daily mean of `value_col`.
pub fn mean_over_time(
    table: &Table,
    date_col: &str,
    value_col: &str,
) -> Result<Vec<PeriodMean>, ConfigError> {
    mean_over_time_by(table, date_col, value_col, TimeBucket::Day)
}

/// Mean of `value_col` per `bucket`, ascending by period.
pub fn mean_over_time_by(
    table: &Table,
    date_col: &str,
    value_col: &str,
    bucket: TimeBucket,
) -> Result<Vec<PeriodMean>, ConfigError> {
    table.require_kind(date_col, "date", ColumnType::Timestamp)?;
    table.require_kind(value_col, "trend", ColumnType::Numeric)?;

    let means = period_frame(table, date_col, bucket, Some(value_col))?
        .lazy()
        .group_by([col(PERIOD)])
        .agg([
            col(value_col).mean().alias("mean"),
            col(value_col).count().alias("count"),
        ])
        .collect()?;

    let periods = text_cells(&means, PERIOD)?;
    let values = float_cells(&means, "mean")?;
    let counts = count_cells(&means, "count")?;
    let mut out: Vec<PeriodMean> = periods
        .into_iter()
        .zip(values.into_iter().zip(counts))
        .filter_map(|(period, (mean, count))| {
            Some(PeriodMean {
                period: period?,
                mean,
                count,
            })
        })
        .collect();
    out.sort_by(|a, b| a.period.cmp(&b.period));
    Ok(out)
}

/// Mean, sum and count of each of `value_cols` per distinct `group_col`.
pub fn grouped_summary(
    table: &Table,
    group_col: &str,
    value_cols: &[String],
) -> Result<GroupedSummary, ConfigError> {
    table.require_kind(group_col, "group-by", ColumnType::Categorical)?;
    if value_cols.is_empty() {
        return Err(ConfigError::NoValueColumns);
    }
    for column in value_cols {
        table.require_kind(column, "aggregation", ColumnType::Numeric)?;
    }

    let mut aggs = vec![len().alias(ROWS)];
    for (i, column) in value_cols.iter().enumerate() {
        aggs.push(col(column.as_str()).sum().alias(format!("sum_{i}")));
        aggs.push(col(column.as_str()).mean().alias(format!("mean_{i}")));
        aggs.push(col(column.as_str()).count().alias(format!("count_{i}")));
    }
    let groups = table
        .frame()
        .clone()
        .lazy()
        .group_by([col(group_col)])
        .agg(aggs)
        .collect()?;

    let keys = text_cells(&groups, group_col)?;
    let rows = count_cells(&groups, ROWS)?;
    let mut per_column = Vec::with_capacity(value_cols.len());
    for i in 0..value_cols.len() {
        per_column.push((
            float_cells(&groups, &format!("sum_{i}"))?,
            float_cells(&groups, &format!("mean_{i}"))?,
            count_cells(&groups, &format!("count_{i}"))?,
        ));
    }

    let mut out: Vec<GroupRow> = keys
        .into_iter()
        .enumerate()
        .map(|(g, key)| GroupRow {
            group: key.unwrap_or_default(),
            rows: rows[g],
            stats: per_column
                .iter()
                .map(|(sums, means, counts)| ColumnStats {
                    mean: means[g].map(round2),
                    sum: round2(sums[g].unwrap_or_default()),
                    count: counts[g],
                })
                .collect(),
        })
        .collect();
    out.sort_by(|a, b| a.group.cmp(&b.group));

    Ok(GroupedSummary {
        group_column: group_col.to_string(),
        value_columns: value_cols.to_vec(),
        rows: out,
    })
}

/// Count, mean, sample std, min, quartiles and max of a numeric column.
pub fn describe_numeric(table: &Table, column: &str) -> Result<NumericSummary, ConfigError> {
    table.require_kind(column, "describe", ColumnType::Numeric)?;
    let values = table.numbers(column)?;
    let count = values.len() - values.null_count();

    let mut sorted: Vec<f64> = values.into_iter().flatten().collect();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let q = |p: f64| (count > 0).then(|| percentile(&sorted, p));

    Ok(NumericSummary {
        column: column.to_string(),
        count,
        mean: values.mean(),
        std: if count > 1 { values.std(1) } else { None },
        min: values.min(),
        p25: q(25.0),
        median: values.median(),
        p75: q(75.0),
        max: values.max(),
    })
}

/// Count and extent of a timestamp column.
pub fn describe_dates(table: &Table, column: &str) -> Result<DateSummary, ConfigError> {
    table.require_kind(column, "date", ColumnType::Timestamp)?;
    let ms = table.timestamp_millis(column)?;
    Ok(DateSummary {
        column: column.to_string(),
        count: ms.len() - ms.null_count(),
        min: ms.min().and_then(from_millis),
        max: ms.max().and_then(from_millis),
    })
}

// ── Private ───────────────────────────────────────────────────────────────────

const PERIOD: &str = "__period";
const ROWS: &str = "__rows";

/// A frame holding the period key of every row, plus `value_col` if given.
///
/// Rows whose timestamp is missing get a null key and are skipped on read.
fn period_frame(
    table: &Table,
    date_col: &str,
    bucket: TimeBucket,
    value_col: Option<&str>,
) -> PolarsResult<DataFrame> {
    let keys: StringChunked = table
        .timestamps(date_col)?
        .into_iter()
        .map(|ts| ts.map(|t| bucket.key(t)))
        .collect();
    let mut columns: Vec<polars::prelude::Column> =
        vec![keys.with_name(PERIOD.into()).into_series().into()];
    if let Some(value_col) = value_col {
        columns.push(table.frame().column(value_col)?.clone());
    }
    DataFrame::new(columns)
}

fn text_cells(frame: &DataFrame, name: &str) -> PolarsResult<Vec<Option<String>>> {
    let text = frame
        .column(name)?
        .as_materialized_series()
        .cast(&DataType::String)?;
    Ok(text.str()?.into_iter().map(|v| v.map(str::to_string)).collect())
}

fn float_cells(frame: &DataFrame, name: &str) -> PolarsResult<Vec<Option<f64>>> {
    let values = frame
        .column(name)?
        .as_materialized_series()
        .cast(&DataType::Float64)?;
    Ok(values.f64()?.into_iter().collect())
}

fn count_cells(frame: &DataFrame, name: &str) -> PolarsResult<Vec<usize>> {
    let counts = frame
        .column(name)?
        .as_materialized_series()
        .cast(&DataType::Int64)?;
    Ok(counts
        .i64()?
        .into_iter()
        .map(|n| n.unwrap_or_default().max(0) as usize)
        .collect())
}

/// Linear-interpolated percentile of a **sorted** non-empty slice.
fn percentile(sorted: &[f64], p: f64) -> f64 {
    let len = sorted.len();
    if len == 1 {
        return sorted[0];
    }
    let rank = (p / 100.0) * (len as f64 - 1.0);
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    if lo == hi {
        return sorted[lo];
    }
    let frac = rank - lo as f64;
    sorted[lo] + frac * (sorted[hi] - sorted[lo])
}

// ── Tests ─────────────────────────────────────────────────────────────────────
