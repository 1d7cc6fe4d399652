use std::path::PathBuf;

use polars::prelude::PolarsError;
use thiserror::Error;

use crate::schema::ColumnType;

/// Fatal failures while reading the source table.
///
/// Any of these aborts the whole pass; there is no partial-table recovery.
#[derive(Error, Debug)]
pub enum LoadError {
    /// The source path does not exist.
    #[error("Source file not found: {0}")]
    NotFound(PathBuf),

    /// The source exists but could not be opened or read.
    #[error("Failed to read file {path}: {source}")]
    FileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The CSV layer rejected the file (ragged rows, bad UTF-8, ...).
    #[error("Malformed CSV in {path}: {source}")]
    Malformed {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    /// Header present (or not) but no data rows.
    #[error("No data rows in {0}")]
    Empty(PathBuf),

    /// A required schema column is absent from the header.
    #[error("Required column \"{column}\" is missing from the source header")]
    MissingColumn { column: String },

    /// A numeric column holds a value that is not a number.
    #[error("Column \"{column}\" line {line}: \"{value}\" is not a number")]
    InvalidNumber {
        column: String,
        line: u64,
        value: String,
    },

    /// The declared schema itself is unusable.
    #[error("Invalid schema: {0}")]
    InvalidSchema(String),

    /// The parsed rows could not be assembled into a data frame.
    #[error("Failed to build table: {0}")]
    Frame(#[from] PolarsError),
}

/// A user selection that cannot be honoured against the current table.
///
/// These are reported next to the affected view; they never abort the pass
/// and no other column is substituted.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// The selected column is not present in the table.
    #[error("Column \"{column}\" selected as {role} does not exist; choose another {role} column")]
    MissingColumn { column: String, role: String },

    /// The selected column exists but has the wrong semantic type.
    #[error("Column \"{column}\" is {actual}, expected a {expected} column")]
    WrongColumnType {
        column: String,
        expected: ColumnType,
        actual: ColumnType,
    },

    /// A grouped summary was requested with nothing to summarise.
    #[error("No value columns selected for aggregation")]
    NoValueColumns,

    /// Any other unusable selection.
    #[error("Invalid selection: {0}")]
    InvalidSelection(String),

    /// The frame engine rejected the computation for this view.
    #[error("Table operation failed: {0}")]
    Frame(String),
}

impl From<PolarsError> for ConfigError {
    fn from(err: PolarsError) -> Self {
        ConfigError::Frame(err.to_string())
    }
}

/// All errors produced by the dashboard crates.
#[derive(Error, Debug)]
pub enum DashError {
    /// The source table could not be loaded.
    #[error(transparent)]
    Load(#[from] LoadError),

    /// A column selection is invalid.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// A table operation failed outside any single view.
    #[error("Table error: {0}")]
    Frame(#[from] PolarsError),

    /// Writing CSV output failed.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// A JSON document could not be parsed or written.
    #[error("Failed to parse JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// Pass-through for any raw I/O error that does not carry a path.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Catch-all for errors from third-party crates via `anyhow`.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Convenience alias used throughout the dashboard crates.
pub type Result<T> = std::result::Result<T, DashError>;
