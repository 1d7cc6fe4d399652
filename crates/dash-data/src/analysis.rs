//! One dashboard pass over a loaded table.
//!
//! [`prepare`] runs the load-time stages (sanitize, then normalize dates)
//! once per load. [`run`] filters the prepared table and computes every view
//! from the filtered result; it is re-run whenever a selection changes.

use std::collections::BTreeMap;
use std::time::Instant;

use chrono::Utc;
use dash_core::error::{ConfigError, Result};
use dash_core::table::{Row, Table};
use dash_core::time_utils::TimestampParser;
use polars::prelude::PolarsResult;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::aggregator::{
    counts_by_day, describe_dates, describe_numeric, grouped_summary, mean_over_time_by,
    sum_by_category, CategoryTotal, DateSummary, GroupedSummary, NumericSummary, PeriodCount,
    PeriodMean, TimeBucket,
};
use crate::dates::{normalize_dates, DateBounds};
use crate::filter::{apply_filters, FilterColumns, FilterSelection, FilterState, FilterTrace};
use crate::sanitizer::{sanitize_amounts, SanitizeReport};

// ── Configuration ─────────────────────────────────────────────────────────────

/// Columns with a fixed role in the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub amount_column: String,
    pub value_column: String,
    pub category_column: String,
    pub timestamp_column: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            amount_column: "Amount".to_string(),
            value_column: "Value".to_string(),
            category_column: "ProductCategory".to_string(),
            timestamp_column: "TransactionStartTime".to_string(),
        }
    }
}

impl PipelineConfig {
    pub fn filter_columns(&self) -> FilterColumns {
        FilterColumns {
            amount: self.amount_column.clone(),
            timestamp: self.timestamp_column.clone(),
        }
    }
}

// ── prepare ───────────────────────────────────────────────────────────────────

/// What the filter controls are populated with.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FilterOptions {
    pub date_bounds: Option<DateBounds>,
    /// Distinct values per categorical column, in order of first appearance.
    pub categories: BTreeMap<String, Vec<String>>,
    pub categorical_columns: Vec<String>,
    pub numeric_columns: Vec<String>,
}

impl FilterOptions {
    fn from_table(table: &Table, date_bounds: Option<DateBounds>) -> PolarsResult<Self> {
        let categorical_columns = table.categorical_columns();
        let mut categories = BTreeMap::new();
        for name in &categorical_columns {
            categories.insert(name.clone(), table.distinct_text(name)?);
        }
        Ok(Self {
            date_bounds,
            categories,
            categorical_columns,
            numeric_columns: table.numeric_columns(),
        })
    }
}

/// A sanitized, date-normalized table ready to be filtered.
#[derive(Debug, Clone)]
pub struct Prepared {
    pub table: Table,
    pub config: PipelineConfig,
    pub rows_loaded: usize,
    pub sanitize: SanitizeReport,
    /// Rows dropped for an unparseable timestamp.
    pub dates_dropped: usize,
    pub options: FilterOptions,
    pub prepare_time_seconds: f64,
    initial: FilterState,
}

impl Prepared {
    /// Everything permitted, full date range.
    pub fn initial_filters(&self) -> FilterState {
        self.initial.clone()
    }

    /// Derive this load's filter state from the user's selection.
    pub fn filters_for(&self, selection: &FilterSelection) -> FilterState {
        selection.apply_to(self.initial.clone(), self.options.date_bounds.as_ref())
    }
}

/// Sanitize the amount column, then coerce the timestamp column.
pub fn prepare(raw: &Table, config: &PipelineConfig, parser: &TimestampParser) -> Result<Prepared> {
    let start = Instant::now();

    let sanitized = sanitize_amounts(raw, &config.amount_column)?;
    let normalized = normalize_dates(&sanitized.table, &config.timestamp_column, parser)?;

    if normalized.dropped > 0 {
        info!(
            "Dropped {} rows with an invalid \"{}\"",
            normalized.dropped, config.timestamp_column
        );
    }

    let options = FilterOptions::from_table(&normalized.table, normalized.bounds)?;
    let initial = FilterState::initial(&normalized.table, normalized.bounds.as_ref())?;
    Ok(Prepared {
        table: normalized.table,
        config: config.clone(),
        rows_loaded: raw.len(),
        sanitize: sanitized.report,
        dates_dropped: normalized.dropped,
        options,
        prepare_time_seconds: start.elapsed().as_secs_f64(),
        initial,
    })
}

// ── run ───────────────────────────────────────────────────────────────────────

/// Column choices for the selectable views.
///
/// Unset fields fall back to the first categorical (group-by) or first
/// numeric (aggregate, trend) column of the table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ViewRequest {
    pub group_by: Option<String>,
    pub aggregate: Vec<String>,
    pub trend_column: Option<String>,
    pub bucket: TimeBucket,
    pub preview_rows: usize,
}

/// The first rows of the filtered table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Preview {
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
}

impl Preview {
    fn of(table: &Table, n: usize) -> PolarsResult<Self> {
        Ok(Self {
            columns: table.column_names().into_iter().map(String::from).collect(),
            rows: table.head(n).rows()?,
        })
    }
}

/// Metadata produced alongside the views.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DashboardMetadata {
    /// ISO-8601 timestamp when this result was generated.
    pub generated_at: String,
    pub rows_loaded: usize,
    pub rows_after_dates: usize,
    pub rows_filtered: usize,
    pub prepare_time_seconds: f64,
    pub filter_time_seconds: f64,
    pub aggregate_time_seconds: f64,
}

/// Every view of one pass.
///
/// Each selectable view carries its own `Result` so an invalid selection is
/// reported next to that view while the others still render. Views keyed on
/// the timestamp column are `None` when the table has no such column.
#[derive(Debug, Clone)]
pub struct DashboardResult {
    pub filtered: Table,
    pub trace: FilterTrace,
    pub preview: Preview,
    pub sanitize: SanitizeReport,
    pub dates_dropped: usize,
    pub date_summary: Option<std::result::Result<DateSummary, ConfigError>>,
    pub amount_summary: std::result::Result<NumericSummary, ConfigError>,
    pub counts_by_day: Option<std::result::Result<Vec<PeriodCount>, ConfigError>>,
    pub revenue_by_category: std::result::Result<Vec<CategoryTotal>, ConfigError>,
    pub trend: Option<std::result::Result<Vec<PeriodMean>, ConfigError>>,
    pub trend_column: Option<String>,
    pub summary: std::result::Result<GroupedSummary, ConfigError>,
    pub metadata: DashboardMetadata,
}

/// Filter the prepared table and compute every view.
///
/// Only an unusable filter state fails the pass; view selection errors are
/// carried inside the result.
pub fn run(
    prepared: &Prepared,
    filters: &FilterState,
    request: &ViewRequest,
) -> Result<DashboardResult> {
    let config = &prepared.config;

    // ── Filter ────────────────────────────────────────────────────────────────
    let filter_start = Instant::now();
    let filtered = apply_filters(&prepared.table, filters, &config.filter_columns())?;
    let filter_time = filter_start.elapsed().as_secs_f64();
    let table = &filtered.table;

    // ── Aggregate ─────────────────────────────────────────────────────────────
    let aggregate_start = Instant::now();
    let has_dates = table.column_index(&config.timestamp_column).is_some();
    let ts_col = config.timestamp_column.as_str();

    let trend_column = request
        .trend_column
        .clone()
        .or_else(|| prepared.options.numeric_columns.first().cloned());
    let trend = match (&trend_column, has_dates) {
        (Some(col), true) => Some(mean_over_time_by(table, ts_col, col, request.bucket)),
        (None, true) => Some(Err(ConfigError::InvalidSelection(
            "no numeric column available for the trend".to_string(),
        ))),
        (_, false) => None,
    };

    let summary = match request
        .group_by
        .clone()
        .or_else(|| prepared.options.categorical_columns.first().cloned())
    {
        Some(group_by) => {
            let aggregate = if request.aggregate.is_empty() {
                prepared.options.numeric_columns.iter().take(1).cloned().collect()
            } else {
                request.aggregate.clone()
            };
            grouped_summary(table, &group_by, &aggregate)
        }
        None => Err(ConfigError::InvalidSelection(
            "no categorical column available to group by".to_string(),
        )),
    };

    let result = DashboardResult {
        trace: filtered.trace.clone(),
        preview: Preview::of(table, request.preview_rows)?,
        sanitize: prepared.sanitize.clone(),
        dates_dropped: prepared.dates_dropped,
        date_summary: has_dates.then(|| describe_dates(&prepared.table, ts_col)),
        amount_summary: describe_numeric(&prepared.table, &config.amount_column),
        counts_by_day: has_dates.then(|| counts_by_day(table, ts_col)),
        revenue_by_category: sum_by_category(
            table,
            &config.category_column,
            &config.value_column,
        ),
        trend,
        trend_column,
        summary,
        metadata: DashboardMetadata {
            generated_at: Utc::now().to_rfc3339(),
            rows_loaded: prepared.rows_loaded,
            rows_after_dates: prepared.table.len(),
            rows_filtered: table.len(),
            prepare_time_seconds: prepared.prepare_time_seconds,
            filter_time_seconds: filter_time,
            aggregate_time_seconds: aggregate_start.elapsed().as_secs_f64(),
        },
        filtered: filtered.table,
    };

    debug!(
        "Dashboard pass: {} loaded, {} after dates, {} after filters",
        result.metadata.rows_loaded, result.metadata.rows_after_dates, result.metadata.rows_filtered
    );

    Ok(result)
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::DateRange;
    use crate::reader::{export_csv, load_csv, read_csv, EXPORT_FILE_NAME};
    use chrono::NaiveDate;
    use dash_core::error::DashError;
    use dash_core::schema::Schema;
    use dash_core::table::Value;
    use std::path::Path;
    use tempfile::TempDir;

    const SCENARIO: &str = "\
ProductCategory,Amount,Value,TransactionStartTime
A,-5,5,2023-01-01
B,0,7,2023-01-02
A,10,3,2023-01-02
";

    fn load(csv: &str) -> Table {
        read_csv(csv.as_bytes(), Path::new("test.csv"), &Schema::transactions()).unwrap()
    }

    fn prepared(csv: &str) -> Prepared {
        prepare(&load(csv), &PipelineConfig::default(), &TimestampParser::utc()).unwrap()
    }

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn amounts(table: &Table) -> Vec<Value> {
        table.values("Amount").unwrap()
    }

    // ── prepare ───────────────────────────────────────────────────────────────

    #[test]
    fn test_prepare_sanitizes_then_normalizes() {
        let p = prepared(SCENARIO);
        assert_eq!(amounts(&p.table), vec![Value::Number(10.0); 3]);
        assert_eq!(p.sanitize.median, Some(10.0));
        assert_eq!(p.dates_dropped, 0);
        let bounds = p.options.date_bounds.unwrap();
        assert_eq!(bounds.start_date(), day(2023, 1, 1));
        assert_eq!(bounds.end_date(), day(2023, 1, 2));
        assert_eq!(p.options.categories["ProductCategory"], vec!["A", "B"]);
        assert_eq!(p.options.numeric_columns, vec!["Amount", "Value"]);
    }

    #[test]
    fn test_prepare_counts_dropped_dates() {
        let p = prepared(
            "ProductCategory,Amount,Value,TransactionStartTime\nA,1,1,2023-01-01\nB,2,2,soon\n",
        );
        assert_eq!(p.rows_loaded, 2);
        assert_eq!(p.dates_dropped, 1);
        assert_eq!(p.table.len(), 1);
    }

    #[test]
    fn test_prepare_rejects_bad_amount_column() {
        let config = PipelineConfig {
            amount_column: "ProductCategory".to_string(),
            ..Default::default()
        };
        let err = prepare(&load(SCENARIO), &config, &TimestampParser::utc()).unwrap_err();
        assert!(matches!(err, DashError::Config(ConfigError::WrongColumnType { .. })));
    }

    // ── run ───────────────────────────────────────────────────────────────────

    #[test]
    fn test_run_date_filter_scenario() {
        let p = prepared(SCENARIO);
        let mut filters = p.initial_filters();
        filters.date_range = Some(DateRange::new(day(2023, 1, 2), day(2023, 1, 2)));

        let result = run(&p, &filters, &ViewRequest::default()).unwrap();
        assert_eq!(result.filtered.len(), 2);
        assert_eq!(amounts(&result.filtered), vec![Value::Number(10.0); 2]);
        assert_eq!(result.metadata.rows_filtered, 2);
    }

    #[test]
    fn test_run_computes_all_views_with_defaults() {
        let p = prepared(SCENARIO);
        let result = run(&p, &p.initial_filters(), &ViewRequest::default()).unwrap();

        let counts = result.counts_by_day.unwrap().unwrap();
        assert_eq!(counts.len(), 2);
        assert_eq!(counts[1].count, 2);

        let revenue = result.revenue_by_category.unwrap();
        assert_eq!(revenue[0].category, "A");
        assert_eq!(revenue[0].total, 8.0);

        assert_eq!(result.trend_column.as_deref(), Some("Amount"));
        assert_eq!(result.trend.unwrap().unwrap().len(), 2);

        let summary = result.summary.unwrap();
        assert_eq!(summary.group_column, "ProductCategory");
        assert_eq!(summary.value_columns, vec!["Amount"]);
        assert_eq!(result.amount_summary.unwrap().count, 3);
        assert_eq!(result.date_summary.unwrap().unwrap().count, 3);
    }

    #[test]
    fn test_run_reports_bad_selection_per_view() {
        let p = prepared(SCENARIO);
        let request = ViewRequest {
            group_by: Some("Region".to_string()),
            trend_column: Some("ProductCategory".to_string()),
            ..Default::default()
        };
        let result = run(&p, &p.initial_filters(), &request).unwrap();
        assert!(matches!(result.summary, Err(ConfigError::MissingColumn { .. })));
        assert!(matches!(
            result.trend,
            Some(Err(ConfigError::WrongColumnType { .. }))
        ));
        assert!(result.revenue_by_category.is_ok());
    }

    #[test]
    fn test_run_empty_filter_result_degrades_gracefully() {
        let p = prepared(SCENARIO);
        let mut filters = p.initial_filters();
        filters.restrict("ProductCategory", Vec::<String>::new());

        let result = run(&p, &filters, &ViewRequest::default()).unwrap();
        assert!(result.filtered.is_empty());
        assert!(result.counts_by_day.unwrap().unwrap().is_empty());
        assert!(result.revenue_by_category.unwrap().is_empty());
        assert!(result.summary.unwrap().is_empty());
        assert!(result.preview.rows.is_empty());
    }

    #[test]
    fn test_run_without_timestamp_column_skips_time_views() {
        let p = prepared("ProductCategory,Amount,Value\nA,1,2\nB,3,4\n");
        let result = run(&p, &p.initial_filters(), &ViewRequest::default()).unwrap();
        assert!(result.counts_by_day.is_none());
        assert!(result.trend.is_none());
        assert!(result.date_summary.is_none());
        assert_eq!(result.filtered.len(), 2);
    }

    #[test]
    fn test_run_preview_is_bounded() {
        let p = prepared(SCENARIO);
        let request = ViewRequest {
            preview_rows: 1,
            ..Default::default()
        };
        let result = run(&p, &p.initial_filters(), &request).unwrap();
        assert_eq!(result.preview.rows.len(), 1);
        assert_eq!(result.preview.columns[0], "ProductCategory");
    }

    #[test]
    fn test_filter_options_serialize_for_controls() {
        let p = prepared(SCENARIO);
        let json = serde_json::to_value(&p.options).unwrap();
        assert_eq!(json["categories"]["ProductCategory"], serde_json::json!(["A", "B"]));
        assert_eq!(json["date_bounds"]["min"], "2023-01-01T00:00:00");
    }

    // ── export round trip ─────────────────────────────────────────────────────

    #[test]
    fn test_exported_filtered_table_reprepares_unchanged() {
        let dir = TempDir::new().unwrap();
        let p = prepared(
            "\
TransactionId,ProductCategory,Amount,Value,TransactionStartTime
T1,A,-5,5,2023-01-01T08:15:00Z
T2,B,2.5,7,2023-01-02 09:30:00
T3,A,10,3,2023-01-02
T4,A,,1,2023-01-03T23:59:59Z
T5,B,4,2,garbage
",
        );
        let mut filters = p.initial_filters();
        filters.restrict("ProductCategory", ["A"]);
        let result = run(&p, &filters, &ViewRequest::default()).unwrap();
        assert_eq!(result.filtered.len(), 3);

        let path = dir.path().join(EXPORT_FILE_NAME);
        export_csv(&result.filtered, &path).unwrap();
        let reloaded = load_csv(&path, &Schema::transactions()).unwrap();
        let reprepared =
            prepare(&reloaded, &PipelineConfig::default(), &TimestampParser::utc()).unwrap();

        assert_eq!(reprepared.sanitize.imputed, 0);
        assert_eq!(reprepared.dates_dropped, 0);
        assert_eq!(reprepared.table, result.filtered);
    }
}
