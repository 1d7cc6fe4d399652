//! Data pipeline for the transaction dashboard.
//!
//! Loads the CSV source, sanitizes amounts, normalizes the timestamp column,
//! applies the user's filters and computes the summary views. Every stage
//! takes a table and returns a new one.

pub mod aggregator;
pub mod analysis;
pub mod dates;
pub mod filter;
pub mod reader;
pub mod sanitizer;

pub use dash_core as core;
