//! Runtime layer for the transaction dashboard.
//!
//! Caches the loaded source between passes and drives the watch loop that
//! re-runs the dashboard when the source changes.

pub mod data_manager;
pub mod orchestrator;

pub use dash_core as core;
pub use dash_data as data;
