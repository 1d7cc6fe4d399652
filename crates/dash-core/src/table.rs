//! The transaction table threaded through every pipeline stage.
//!
//! A [`Table`] pairs a polars [`DataFrame`] with the declared column kinds.
//! The kinds are the dtype contract: numeric columns are `Float64`,
//! categorical columns are non-null `String`, and the timestamp column is
//! raw `String` until the date normalizer turns it into millisecond
//! `Datetime`. Stages never mutate a table in place; they build a new one.

use std::collections::HashSet;
use std::fmt;

use chrono::{DateTime, NaiveDateTime};
use polars::prelude::*;
use serde::{Serialize, Serializer};

use crate::error::ConfigError;
use crate::schema::{Column, ColumnType};

/// Format used whenever a timestamp cell is turned back into text.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

// ── Value ─────────────────────────────────────────────────────────────────────

/// A single cell, as seen by previews and the CSV writer.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Missing,
    Text(String),
    Number(f64),
    Timestamp(NaiveDateTime),
}

impl Value {
    pub fn is_missing(&self) -> bool {
        matches!(self, Value::Missing)
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_timestamp(&self) -> Option<NaiveDateTime> {
        match self {
            Value::Timestamp(ts) => Some(*ts),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Missing => Ok(()),
            Value::Text(s) => f.write_str(s),
            Value::Number(n) => write!(f, "{n}"),
            Value::Timestamp(ts) => write!(f, "{}", ts.format(TIMESTAMP_FORMAT)),
        }
    }
}

impl Serialize for Value {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            Value::Missing => serializer.serialize_none(),
            Value::Number(n) => serializer.serialize_f64(*n),
            other => serializer.serialize_str(&other.to_string()),
        }
    }
}

// ── Row ───────────────────────────────────────────────────────────────────────

/// One row; cells are positionally aligned with [`Table::columns`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Row(pub Vec<Value>);

impl Row {
    pub fn get(&self, idx: usize) -> &Value {
        self.0.get(idx).unwrap_or(&Value::Missing)
    }
}

// ── Timestamp columns ─────────────────────────────────────────────────────────

/// Build a millisecond `Datetime` column.
pub fn datetime_column<I>(name: &str, stamps: I) -> polars::prelude::Column
where
    I: IntoIterator<Item = Option<NaiveDateTime>>,
{
    let millis = stamps
        .into_iter()
        .map(|ts| ts.map(|t| t.and_utc().timestamp_millis()));
    Int64Chunked::from_iter_options(name.into(), millis)
        .into_datetime(TimeUnit::Milliseconds, None)
        .into_series()
        .into()
}

/// Inverse of the encoding used by [`datetime_column`].
pub fn from_millis(ms: i64) -> Option<NaiveDateTime> {
    DateTime::from_timestamp_millis(ms).map(|dt| dt.naive_utc())
}

fn build_column<'a>(
    column: &Column,
    cells: impl Iterator<Item = &'a Value>,
) -> polars::prelude::Column {
    let name: PlSmallStr = column.name.as_str().into();
    match column.kind {
        ColumnType::Numeric => {
            let values: Vec<Option<f64>> = cells.map(Value::as_number).collect();
            polars::prelude::Column::new(name, values)
        }
        // Categorical cells are never null; an empty cell is the category "".
        ColumnType::Categorical => {
            let values: Vec<String> = cells.map(|v| v.to_string()).collect();
            polars::prelude::Column::new(name, values)
        }
        ColumnType::Timestamp => {
            let cells: Vec<&Value> = cells.collect();
            if cells.iter().any(|v| matches!(v, Value::Text(_) | Value::Number(_))) {
                let raw: Vec<Option<String>> = cells
                    .iter()
                    .map(|v| (!v.is_missing()).then(|| v.to_string()))
                    .collect();
                polars::prelude::Column::new(name, raw)
            } else {
                datetime_column(&column.name, cells.iter().map(|v| v.as_timestamp()))
            }
        }
    }
}

// ── Table ─────────────────────────────────────────────────────────────────────

/// A data frame plus the semantic kind of each of its columns.
#[derive(Debug, Clone)]
pub struct Table {
    columns: Vec<Column>,
    frame: DataFrame,
}

impl Default for Table {
    fn default() -> Self {
        Self {
            columns: Vec::new(),
            frame: DataFrame::empty(),
        }
    }
}

impl PartialEq for Table {
    fn eq(&self, other: &Self) -> bool {
        self.columns == other.columns && self.frame.equals_missing(&other.frame)
    }
}

impl Table {
    /// Wrap a frame whose columns match `columns` by name and order.
    pub fn from_frame(columns: Vec<Column>, frame: DataFrame) -> Self {
        Self { columns, frame }
    }

    /// Build a table from row-shaped cells; short rows read as missing.
    pub fn from_rows(columns: Vec<Column>, rows: &[Row]) -> PolarsResult<Self> {
        let built = columns
            .iter()
            .enumerate()
            .map(|(idx, column)| build_column(column, rows.iter().map(|r| r.get(idx))))
            .collect();
        let frame = DataFrame::new(built)?;
        Ok(Self { columns, frame })
    }

    /// A table with the same columns and no rows.
    pub fn empty_like(&self) -> Self {
        Self::from_frame(self.columns.clone(), self.frame.slice(0, 0))
    }

    pub fn frame(&self) -> &DataFrame {
        &self.frame
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.frame.height()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Resolve `name` or report it as an invalid selection for `role`.
    pub fn require_column(&self, name: &str, role: &str) -> Result<usize, ConfigError> {
        self.column_index(name)
            .ok_or_else(|| ConfigError::MissingColumn {
                column: name.to_string(),
                role: role.to_string(),
            })
    }

    /// Like [`require_column`](Self::require_column) but also checks the kind.
    pub fn require_kind(
        &self,
        name: &str,
        role: &str,
        expected: ColumnType,
    ) -> Result<usize, ConfigError> {
        let idx = self.require_column(name, role)?;
        let actual = self.columns[idx].kind;
        if actual != expected {
            return Err(ConfigError::WrongColumnType {
                column: name.to_string(),
                expected,
                actual,
            });
        }
        Ok(idx)
    }

    fn names_of_kind(&self, kind: ColumnType) -> Vec<String> {
        self.columns
            .iter()
            .filter(|c| c.kind == kind)
            .map(|c| c.name.clone())
            .collect()
    }

    pub fn categorical_columns(&self) -> Vec<String> {
        self.names_of_kind(ColumnType::Categorical)
    }

    pub fn numeric_columns(&self) -> Vec<String> {
        self.names_of_kind(ColumnType::Numeric)
    }

    /// The (single) timestamp column, if the table has one.
    pub fn timestamp_column(&self) -> Option<&str> {
        self.columns
            .iter()
            .find(|c| c.kind == ColumnType::Timestamp)
            .map(|c| c.name.as_str())
    }

    // ── Column access ─────────────────────────────────────────────────────

    fn series(&self, name: &str) -> PolarsResult<&Series> {
        Ok(self.frame.column(name)?.as_materialized_series())
    }

    /// `name` as `f64` values.
    pub fn numbers(&self, name: &str) -> PolarsResult<Float64Chunked> {
        Ok(self.series(name)?.cast(&DataType::Float64)?.f64()?.clone())
    }

    /// `name` as text.
    pub fn text(&self, name: &str) -> PolarsResult<StringChunked> {
        Ok(self.series(name)?.cast(&DataType::String)?.str()?.clone())
    }

    /// Whether `name` already holds coerced timestamps.
    pub fn has_timestamps(&self, name: &str) -> bool {
        self.series(name)
            .is_ok_and(|s| matches!(s.dtype(), DataType::Datetime(_, _)))
    }

    /// Milliseconds since the epoch; all null while `name` is still raw text.
    pub fn timestamp_millis(&self, name: &str) -> PolarsResult<Int64Chunked> {
        let series = self.series(name)?;
        if !matches!(series.dtype(), DataType::Datetime(_, _)) {
            return Ok(Int64Chunked::full_null(name.into(), series.len()));
        }
        let ms = series
            .cast(&DataType::Datetime(TimeUnit::Milliseconds, None))?
            .cast(&DataType::Int64)?;
        Ok(ms.i64()?.clone())
    }

    pub fn timestamps(&self, name: &str) -> PolarsResult<Vec<Option<NaiveDateTime>>> {
        let ms = self.timestamp_millis(name)?;
        Ok(ms.into_iter().map(|v| v.and_then(from_millis)).collect())
    }

    /// Cells of `name`, typed by the column's dtype.
    pub fn values(&self, name: &str) -> PolarsResult<Vec<Value>> {
        let series = self.series(name)?;
        let values = match series.dtype() {
            DataType::Float64 => series
                .f64()?
                .into_iter()
                .map(|v| v.map_or(Value::Missing, Value::Number))
                .collect(),
            DataType::Datetime(_, _) => self
                .timestamps(name)?
                .into_iter()
                .map(|ts| ts.map_or(Value::Missing, Value::Timestamp))
                .collect(),
            _ => {
                let text = self.text(name)?;
                text.into_iter()
                    .map(|v| v.map_or(Value::Missing, |s| Value::Text(s.to_string())))
                    .collect()
            }
        };
        Ok(values)
    }

    /// Materialize every row.
    pub fn rows(&self) -> PolarsResult<Vec<Row>> {
        let columns = self
            .columns
            .iter()
            .map(|c| self.values(&c.name))
            .collect::<PolarsResult<Vec<_>>>()?;
        Ok((0..self.len())
            .map(|i| {
                Row(columns
                    .iter()
                    .map(|cells| cells.get(i).cloned().unwrap_or(Value::Missing))
                    .collect())
            })
            .collect())
    }

    /// Distinct text values of a column, in order of first appearance.
    pub fn distinct_text(&self, name: &str) -> PolarsResult<Vec<String>> {
        let text = self.text(name)?;
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for value in text.into_iter() {
            let value = value.unwrap_or_default();
            if seen.insert(value) {
                out.push(value.to_string());
            }
        }
        Ok(out)
    }

    // ── Derivation ────────────────────────────────────────────────────────

    /// Keep the rows where `mask` is true, preserving order. Nulls drop.
    pub fn filter(&self, mask: &BooleanChunked) -> PolarsResult<Table> {
        Ok(Self::from_frame(self.columns.clone(), self.frame.filter(mask)?))
    }

    /// Replace the frame column of the same name.
    pub fn with_column(&self, column: polars::prelude::Column) -> PolarsResult<Table> {
        let mut frame = self.frame.clone();
        frame.with_column(column)?;
        Ok(Self::from_frame(self.columns.clone(), frame))
    }

    /// The first `n` rows.
    pub fn head(&self, n: usize) -> Table {
        Self::from_frame(self.columns.clone(), self.frame.head(Some(n)))
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
