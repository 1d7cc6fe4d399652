//! The ordered conjunction of row-narrowing filters.
//!
//! Filters run in a fixed order: date interval, amount non-negativity, then
//! one inclusion filter per categorical column in table order. Each stage
//! narrows the output of the previous one and row order is preserved.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use dash_core::error::ConfigError;
use dash_core::schema::ColumnType;
use dash_core::table::Table;
use polars::prelude::*;
use serde::Serialize;
use tracing::debug;

use crate::dates::DateBounds;

// ── DateRange ─────────────────────────────────────────────────────────────────

/// An inclusive interval of calendar dates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self { start, end }
    }

    /// The full range covered by `bounds`.
    pub fn from_bounds(bounds: &DateBounds) -> Self {
        Self::new(bounds.start_date(), bounds.end_date())
    }

    /// Fill whichever end the user left open from `bounds`.
    ///
    /// Returns `None` when there is nothing to filter on: no bounds (no
    /// timestamp column, or no valid dates) and no explicit end points.
    pub fn resolve(
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
        bounds: Option<&DateBounds>,
    ) -> Option<Self> {
        match (start, end, bounds) {
            (Some(s), Some(e), _) => Some(Self::new(s, e)),
            (s, e, Some(b)) => Some(Self::new(
                s.unwrap_or_else(|| b.start_date()),
                e.unwrap_or_else(|| b.end_date()),
            )),
            (_, _, None) => None,
        }
    }

    /// Whether the timestamp's calendar date lies within the range.
    pub fn contains(&self, ts: NaiveDateTime) -> bool {
        let date = ts.date();
        self.start <= date && date <= self.end
    }

    /// Half-open `[start midnight, day after end midnight)` in epoch millis.
    pub fn millis_bounds(&self) -> (i64, i64) {
        let midnight = |d: NaiveDate| d.and_time(NaiveTime::MIN).and_utc().timestamp_millis();
        (midnight(self.start), midnight(self.end) + MILLIS_PER_DAY)
    }
}

const MILLIS_PER_DAY: i64 = 86_400_000;

// ── FilterState ───────────────────────────────────────────────────────────────

/// The user's current filter selections.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FilterState {
    /// `None` disables the date filter.
    pub date_range: Option<DateRange>,
    /// Drop rows whose amount is negative (or missing).
    pub exclude_negative: bool,
    /// Permitted values per categorical column; absent columns are unrestricted.
    pub categories: BTreeMap<String, BTreeSet<String>>,
}

impl Default for FilterState {
    fn default() -> Self {
        Self {
            date_range: None,
            exclude_negative: true,
            categories: BTreeMap::new(),
        }
    }
}

impl FilterState {
    /// Everything permitted: the full date range, every distinct value of
    /// every categorical column. The negative exclusion starts enabled.
    pub fn initial(table: &Table, bounds: Option<&DateBounds>) -> Result<Self, ConfigError> {
        let mut categories = BTreeMap::new();
        for name in table.categorical_columns() {
            let values = table.distinct_text(&name)?.into_iter().collect();
            categories.insert(name, values);
        }
        Ok(Self {
            date_range: bounds.map(DateRange::from_bounds),
            exclude_negative: true,
            categories,
        })
    }

    /// Permit only `values` for `column`.
    pub fn restrict<I, S>(&mut self, column: &str, values: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.categories.insert(
            column.to_string(),
            values.into_iter().map(Into::into).collect(),
        );
        self
    }
}

/// Restrictions chosen by the user, independent of any particular load.
///
/// A fresh [`FilterState`] is derived from it after every (re)load, so the
/// permitted values always start from what the current table contains.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterSelection {
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
    pub exclude_negative: bool,
    pub include: BTreeMap<String, BTreeSet<String>>,
}

impl Default for FilterSelection {
    fn default() -> Self {
        Self {
            start: None,
            end: None,
            exclude_negative: true,
            include: BTreeMap::new(),
        }
    }
}

impl FilterSelection {
    /// Start from [`FilterState::initial`] and apply the user's choices.
    pub fn resolve(
        &self,
        table: &Table,
        bounds: Option<&DateBounds>,
    ) -> Result<FilterState, ConfigError> {
        Ok(self.apply_to(FilterState::initial(table, bounds)?, bounds))
    }

    /// Apply the user's choices on top of an everything-permitted `state`.
    pub fn apply_to(&self, mut state: FilterState, bounds: Option<&DateBounds>) -> FilterState {
        state.exclude_negative = self.exclude_negative;
        if self.start.is_some() || self.end.is_some() {
            state.date_range = DateRange::resolve(self.start, self.end, bounds);
        }
        for (column, values) in &self.include {
            state.restrict(column, values.iter().cloned());
        }
        state
    }
}

/// Which columns the date and amount filters read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterColumns {
    pub amount: String,
    pub timestamp: String,
}

impl Default for FilterColumns {
    fn default() -> Self {
        Self {
            amount: "Amount".to_string(),
            timestamp: "TransactionStartTime".to_string(),
        }
    }
}

// ── Output ────────────────────────────────────────────────────────────────────

/// Row counts after each stage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FilterTrace {
    pub input: usize,
    pub after_date: usize,
    pub after_amount: usize,
    /// `(column, rows remaining)` in the order the columns were applied.
    pub after_categories: Vec<(String, usize)>,
}

impl FilterTrace {
    pub fn output(&self) -> usize {
        self.after_categories
            .last()
            .map(|(_, n)| *n)
            .unwrap_or(self.after_amount)
    }
}

/// The narrowed table and how it got there.
#[derive(Debug, Clone)]
pub struct Filtered {
    pub table: Table,
    pub trace: FilterTrace,
}

// ── apply_filters ─────────────────────────────────────────────────────────────

/// Apply `state` to `table`, returning a new row-subset of it.
///
/// The input is never modified. Restricting a column that is absent or not
/// categorical is a [`ConfigError`], as is enabling the amount filter on a
/// table without a numeric amount column.
pub fn apply_filters(
    table: &Table,
    state: &FilterState,
    columns: &FilterColumns,
) -> Result<Filtered, ConfigError> {
    for name in state.categories.keys() {
        table.require_kind(name, "filter", ColumnType::Categorical)?;
    }

    let mut trace = FilterTrace {
        input: table.len(),
        ..Default::default()
    };

    // 1. Date interval, only when the table has the timestamp column.
    //    Uncoerced or missing timestamps never match.
    let mut current = match (state.date_range, table.column_index(&columns.timestamp)) {
        (Some(range), Some(_)) => {
            table.require_kind(&columns.timestamp, "timestamp", ColumnType::Timestamp)?;
            let (lo, hi) = range.millis_bounds();
            let ms = table.timestamp_millis(&columns.timestamp)?;
            table.filter(&(ms.gt_eq(lo) & ms.lt(hi)))?
        }
        _ => table.clone(),
    };
    trace.after_date = current.len();

    // 2. Amount non-negativity. Sanitized amounts are already positive; the
    //    check is kept so the filter holds on unsanitized input too.
    if state.exclude_negative {
        current.require_kind(&columns.amount, "amount", ColumnType::Numeric)?;
        let amounts = current.numbers(&columns.amount)?;
        current = current.filter(&amounts.gt_eq(0.0))?;
    }
    trace.after_amount = current.len();

    // 3. Categorical inclusion, one column at a time.
    for name in current.categorical_columns() {
        let Some(permitted) = state.categories.get(&name) else {
            continue;
        };
        let text = current.text(&name)?;
        let mask: BooleanChunked = text
            .into_iter()
            .map(|v| permitted.contains(v.unwrap_or_default()))
            .collect();
        current = current.filter(&mask)?;
        trace.after_categories.push((name, current.len()));
    }

    debug!(
        "Filtered {} -> {} rows (date {}, amount {})",
        trace.input,
        current.len(),
        trace.after_date,
        trace.after_amount
    );

    Ok(Filtered {
        table: current,
        trace,
    })
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use dash_core::schema::Column;
    use dash_core::table::{Row, Value};

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn ts(y: i32, m: u32, d: u32, h: u32) -> Value {
        Value::Timestamp(day(y, m, d).and_hms_opt(h, 0, 0).unwrap())
    }

    /// Columns: Cat, Channel, Amount, TransactionStartTime.
    fn sample() -> Table {
        let row = |cat: &str, ch: &str, amount: Value, when: Value| {
            Row(vec![
                Value::Text(cat.into()),
                Value::Text(ch.into()),
                amount,
                when,
            ])
        };
        Table::from_rows(
            vec![
                Column::new("Cat", ColumnType::Categorical),
                Column::new("Channel", ColumnType::Categorical),
                Column::new("Amount", ColumnType::Numeric),
                Column::new("TransactionStartTime", ColumnType::Timestamp),
            ],
            &[
                row("A", "web", Value::Number(10.0), ts(2023, 1, 1, 8)),
                row("B", "web", Value::Number(-4.0), ts(2023, 1, 2, 23)),
                row("A", "app", Value::Number(0.0), ts(2023, 1, 2, 0)),
                row("C", "app", Value::Missing, ts(2023, 1, 3, 12)),
                row("B", "", Value::Number(7.5), ts(2023, 1, 4, 1)),
            ],
        )
        .unwrap()
    }

    fn ids(table: &Table) -> Vec<String> {
        table
            .rows()
            .unwrap()
            .iter()
            .map(|r| format!("{}:{}", r.get(0), r.get(2)))
            .collect()
    }

    fn all_permitted(table: &Table) -> FilterState {
        let mut state = FilterState::initial(table, None).unwrap();
        state.exclude_negative = false;
        state
    }

    // ── DateRange ─────────────────────────────────────────────────────────────

    #[test]
    fn test_date_range_inclusive_of_whole_end_day() {
        let range = DateRange::new(day(2023, 1, 2), day(2023, 1, 2));
        assert!(range.contains(day(2023, 1, 2).and_hms_opt(0, 0, 0).unwrap()));
        assert!(range.contains(day(2023, 1, 2).and_hms_opt(23, 59, 59).unwrap()));
        assert!(!range.contains(day(2023, 1, 3).and_hms_opt(0, 0, 0).unwrap()));
    }

    #[test]
    fn test_date_range_resolve_fills_open_ends() {
        let bounds = DateBounds {
            min: day(2023, 1, 1).and_hms_opt(5, 0, 0).unwrap(),
            max: day(2023, 2, 1).and_hms_opt(5, 0, 0).unwrap(),
        };
        assert_eq!(
            DateRange::resolve(Some(day(2023, 1, 10)), None, Some(&bounds)),
            Some(DateRange::new(day(2023, 1, 10), day(2023, 2, 1)))
        );
        assert_eq!(DateRange::resolve(None, None, None), None);
        assert_eq!(
            DateRange::resolve(Some(day(2023, 1, 1)), Some(day(2023, 1, 5)), None),
            Some(DateRange::new(day(2023, 1, 1), day(2023, 1, 5)))
        );
    }

    #[test]
    fn test_date_range_millis_bounds_cover_whole_days() {
        let range = DateRange::new(day(2023, 1, 2), day(2023, 1, 2));
        let (lo, hi) = range.millis_bounds();
        let at = |h, m, s| {
            day(2023, 1, 2)
                .and_hms_opt(h, m, s)
                .unwrap()
                .and_utc()
                .timestamp_millis()
        };
        assert_eq!(lo, at(0, 0, 0));
        assert!(at(23, 59, 59) < hi);
        assert_eq!(hi - lo, 86_400_000);
    }

    // ── apply_filters ─────────────────────────────────────────────────────────

    #[test]
    fn test_initial_state_keeps_every_row() {
        let table = sample();
        let out = apply_filters(&table, &all_permitted(&table), &FilterColumns::default()).unwrap();
        assert_eq!(out.table, table);
        assert_eq!(out.trace.output(), 5);
    }

    #[test]
    fn test_initial_state_lists_distinct_values() {
        let state = FilterState::initial(&sample(), None).unwrap();
        assert_eq!(state.categories.len(), 2);
        assert_eq!(state.categories["Cat"].len(), 3);
        assert!(state.categories["Channel"].contains(""));
        assert!(state.exclude_negative);
    }

    #[test]
    fn test_date_filter_inclusive_calendar_days() {
        let table = sample();
        let mut state = all_permitted(&table);
        state.date_range = Some(DateRange::new(day(2023, 1, 2), day(2023, 1, 3)));

        let out = apply_filters(&table, &state, &FilterColumns::default()).unwrap();
        assert_eq!(ids(&out.table), vec!["B:-4", "A:0", "C:"]);
        assert_eq!(out.trace.after_date, 3);
    }

    #[test]
    fn test_date_filter_drops_uncoerced_timestamps() {
        let table = Table::from_rows(
            vec![
                Column::new("Cat", ColumnType::Categorical),
                Column::new("TransactionStartTime", ColumnType::Timestamp),
            ],
            &[
                Row(vec![Value::Text("A".into()), Value::Text("2023-01-01".into())]),
                Row(vec![Value::Text("B".into()), Value::Missing]),
            ],
        )
        .unwrap();
        let mut state = all_permitted(&table);
        state.date_range = Some(DateRange::new(day(2000, 1, 1), day(2100, 1, 1)));
        let out = apply_filters(&table, &state, &FilterColumns::default()).unwrap();
        assert!(out.table.is_empty());
    }

    #[test]
    fn test_inverted_date_range_is_empty_not_error() {
        let table = sample();
        let mut state = all_permitted(&table);
        state.date_range = Some(DateRange::new(day(2023, 1, 5), day(2023, 1, 1)));
        let out = apply_filters(&table, &state, &FilterColumns::default()).unwrap();
        assert!(out.table.is_empty());
    }

    #[test]
    fn test_amount_filter_drops_negative_and_missing() {
        let table = sample();
        let mut state = all_permitted(&table);
        state.exclude_negative = true;

        let out = apply_filters(&table, &state, &FilterColumns::default()).unwrap();
        assert_eq!(ids(&out.table), vec!["A:10", "A:0", "B:7.5"]);
    }

    #[test]
    fn test_categorical_filters_narrow_sequentially() {
        let table = sample();
        let mut state = all_permitted(&table);
        state.restrict("Cat", ["A", "B"]).restrict("Channel", ["web"]);

        let out = apply_filters(&table, &state, &FilterColumns::default()).unwrap();
        assert_eq!(ids(&out.table), vec!["A:10", "B:-4"]);
        assert_eq!(
            out.trace.after_categories,
            vec![("Cat".to_string(), 4), ("Channel".to_string(), 2)]
        );
    }

    #[test]
    fn test_empty_selection_yields_empty_table() {
        let table = sample();
        let mut state = all_permitted(&table);
        state.restrict("Cat", Vec::<String>::new());
        let out = apply_filters(&table, &state, &FilterColumns::default()).unwrap();
        assert!(out.table.is_empty());
        assert_eq!(out.table.columns(), table.columns());
    }

    #[test]
    fn test_filters_are_monotonic() {
        let table = sample();
        let columns = FilterColumns::default();
        let loose = all_permitted(&table);

        let mut tighter_cat = loose.clone();
        tighter_cat.restrict("Cat", ["A", "C"]);
        let mut tighter_dates = loose.clone();
        tighter_dates.date_range = Some(DateRange::new(day(2023, 1, 1), day(2023, 1, 3)));
        let mut tighter_amount = loose.clone();
        tighter_amount.exclude_negative = true;

        let base = apply_filters(&table, &loose, &columns).unwrap().table;
        let base_rows = base.rows().unwrap();
        for state in [&tighter_cat, &tighter_dates, &tighter_amount] {
            let narrowed = apply_filters(&table, state, &columns).unwrap().table;
            assert!(narrowed.len() <= base.len());
            assert!(narrowed.rows().unwrap().iter().all(|r| base_rows.contains(r)));
        }
    }

    #[test]
    fn test_date_filter_skipped_without_timestamp_column() {
        let table = sample();
        let mut state = all_permitted(&table);
        state.date_range = Some(DateRange::new(day(2030, 1, 1), day(2030, 1, 1)));
        let columns = FilterColumns {
            timestamp: "Elsewhere".to_string(),
            ..Default::default()
        };
        let out = apply_filters(&table, &state, &columns).unwrap();
        assert_eq!(out.table.len(), 5);
    }

    #[test]
    fn test_restricting_unknown_column_is_config_error() {
        let table = sample();
        let mut state = all_permitted(&table);
        state.restrict("Region", ["north"]);
        assert!(matches!(
            apply_filters(&table, &state, &FilterColumns::default()),
            Err(ConfigError::MissingColumn { .. })
        ));

        let mut state = all_permitted(&table);
        state.restrict("Amount", ["10"]);
        assert!(matches!(
            apply_filters(&table, &state, &FilterColumns::default()),
            Err(ConfigError::WrongColumnType { .. })
        ));
    }

    #[test]
    fn test_selection_resolves_against_current_table() {
        let table = sample();
        let mut selection = FilterSelection::default();
        selection.start = Some(day(2023, 1, 2));
        selection
            .include
            .insert("Channel".to_string(), ["app".to_string()].into());

        let bounds = DateBounds {
            min: day(2023, 1, 1).and_hms_opt(8, 0, 0).unwrap(),
            max: day(2023, 1, 4).and_hms_opt(1, 0, 0).unwrap(),
        };
        let state = selection.resolve(&table, Some(&bounds)).unwrap();
        assert_eq!(
            state.date_range,
            Some(DateRange::new(day(2023, 1, 2), day(2023, 1, 4)))
        );
        assert_eq!(state.categories["Cat"].len(), 3);
        assert_eq!(state.categories["Channel"].len(), 1);

        let out = apply_filters(&table, &state, &FilterColumns::default()).unwrap();
        assert_eq!(ids(&out.table), vec!["A:0"]);
    }

    #[test]
    fn test_input_table_untouched() {
        let table = sample();
        let mut state = FilterState::initial(&table, None).unwrap();
        state.restrict("Cat", ["A"]);
        let _ = apply_filters(&table, &state, &FilterColumns::default()).unwrap();
        assert_eq!(table, sample());
    }
}
