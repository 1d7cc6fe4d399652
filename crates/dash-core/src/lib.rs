//! Shared building blocks for the transaction dashboard.
//!
//! Holds the declared column schema, the polars-backed [`table::Table`], error
//! types, timestamp coercion, CLI settings and number formatting used by the
//! pipeline, runtime and binary crates.

pub mod error;
pub mod formatting;
pub mod schema;
pub mod settings;
pub mod table;
pub mod time_utils;

pub use error::{ConfigError, DashError, LoadError, Result};
pub use schema::{Column, ColumnType, Schema};
pub use table::{Row, Table, Value};
