use chrono::NaiveDate;
use clap::{CommandFactory, Parser};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;

use crate::time_utils::parse_date;

/// Default file name offered by the export action.
pub const EXPORT_FILE_NAME: &str = "transactions_filtrées.csv";

/// MIME type of the exported file.
pub const EXPORT_MIME_TYPE: &str = "text/csv";

/// Source file looked up when none is given on the command line.
pub const DEFAULT_SOURCE_FILE: &str = "Transactions_data.csv";

// ── Inclusion ──────────────────────────────────────────────────────────────────

/// A `COLUMN=v1,v2` restriction of one categorical column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inclusion {
    pub column: String,
    pub values: Vec<String>,
}

impl FromStr for Inclusion {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (column, values) = s
            .split_once('=')
            .ok_or_else(|| format!("expected COLUMN=VALUE[,VALUE...], got \"{s}\""))?;
        let column = column.trim();
        if column.is_empty() {
            return Err(format!("missing column name in \"{s}\""));
        }
        // `COLUMN=` with nothing after it permits no value at all.
        let values = if values.is_empty() {
            Vec::new()
        } else {
            values.split(',').map(|v| v.trim().to_string()).collect()
        };
        Ok(Self {
            column: column.to_string(),
            values,
        })
    }
}

// ── Settings (CLI) ─────────────────────────────────────────────────────────────

/// Filter a transaction CSV and print summary tables
#[derive(Parser, Debug, Clone)]
#[command(
    name = "txdash",
    about = "Filter a transaction CSV and print summary tables",
    version
)]
pub struct Settings {
    /// CSV source file (defaults to Transactions_data.csv in the working
    /// directory, then in ~/.txdash/data/)
    pub source: Option<PathBuf>,

    /// JSON schema declaration; the built-in transactions schema otherwise
    #[arg(long)]
    pub schema: Option<PathBuf>,

    /// Amount-like column sanitized and checked by the negative filter
    #[arg(long, default_value = "Amount")]
    pub amount_column: String,

    /// Numeric column summed per category
    #[arg(long, default_value = "Value")]
    pub value_column: String,

    /// Categorical column the revenue view groups by
    #[arg(long, default_value = "ProductCategory")]
    pub category_column: String,

    /// Timestamp column driving the date filter and time views
    #[arg(long, default_value = "TransactionStartTime")]
    pub timestamp_column: String,

    /// First day kept by the date filter (YYYY-MM-DD, inclusive)
    #[arg(long, value_parser = parse_date)]
    pub start_date: Option<NaiveDate>,

    /// Last day kept by the date filter (YYYY-MM-DD, inclusive)
    #[arg(long, value_parser = parse_date)]
    pub end_date: Option<NaiveDate>,

    /// Keep rows whose amount is negative (excluded by default)
    #[arg(long)]
    pub keep_negative: bool,

    /// Permit only these values of a categorical column (repeatable)
    #[arg(long = "include", value_name = "COLUMN=V1,V2")]
    pub include: Vec<Inclusion>,

    /// Categorical column of the grouped summary table (not remembered between runs)
    #[arg(long)]
    pub group_by: Option<String>,

    /// Numeric column aggregated in the grouped summary (repeatable)
    #[arg(long = "aggregate", value_name = "COLUMN")]
    pub aggregate: Vec<String>,

    /// Numeric column averaged over time
    #[arg(long)]
    pub trend_column: Option<String>,

    /// Time bucket of the trend view
    #[arg(long, default_value = "day", value_parser = ["day", "month"])]
    pub bucket: String,

    /// Write the filtered table to this CSV file
    #[arg(long, num_args = 0..=1, default_missing_value = EXPORT_FILE_NAME)]
    pub export: Option<PathBuf>,

    /// Report format
    #[arg(long, default_value = "text", value_parser = ["text", "json"])]
    pub format: String,

    /// Rows shown in the data preview
    #[arg(long, default_value = "5")]
    pub preview_rows: usize,

    /// Timezone timestamps are displayed and bucketed in; `auto` uses the system timezone
    #[arg(long, default_value = "UTC")]
    pub timezone: String,

    /// Re-run the report whenever the source file changes
    #[arg(long)]
    pub watch: bool,

    /// Source polling interval in seconds for --watch (1-3600)
    #[arg(long, default_value = "5", value_parser = clap::value_parser!(u32).range(1..=3600))]
    pub refresh_rate: u32,

    /// Logging level
    #[arg(long, default_value = "INFO", value_parser = ["DEBUG", "INFO", "WARNING", "ERROR", "CRITICAL"])]
    pub log_level: String,

    /// Log file path
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long)]
    pub debug: bool,

    /// Clear saved preferences
    #[arg(long)]
    pub clear: bool,
}

// ── LastUsedParams ─────────────────────────────────────────────────────────────

/// View preferences persisted to `~/.txdash/last_used.json`.
///
/// Filter selections (dates, inclusions, the negative toggle) and view column
/// choices are absent: every load starts from the full table and the default
/// columns.
#[derive(Debug, Serialize, Deserialize, Default, Clone)]
pub struct LastUsedParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bucket: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preview_rows: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_rate: Option<u32>,
}

impl LastUsedParams {
    /// Return the default path to the persisted config file.
    pub fn config_path() -> PathBuf {
        Self::config_path_in(&dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")))
    }

    /// Return the config path rooted at `base_dir` (used for testing).
    pub fn config_path_in(base_dir: &std::path::Path) -> PathBuf {
        base_dir.join(".txdash").join("last_used.json")
    }

    /// Load persisted params from the default path.
    pub fn load() -> Self {
        Self::load_from(&Self::config_path())
    }

    /// Load persisted params from an explicit path.
    ///
    /// Returns `Default` when the file is absent or cannot be parsed.
    pub fn load_from(path: &std::path::Path) -> Self {
        let Ok(content) = std::fs::read_to_string(path) else {
            return Self::default();
        };
        serde_json::from_str(&content).unwrap_or_default()
    }

    /// Atomically write params to the default path.
    pub fn save(&self) -> Result<(), std::io::Error> {
        self.save_to(&Self::config_path())
    }

    /// Atomically write params to an explicit path, creating parent
    /// directories if needed.
    pub fn save_to(&self, path: &std::path::Path) -> Result<(), std::io::Error> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let json = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;

        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, &json)?;
        std::fs::rename(&tmp, path)?;

        Ok(())
    }

    /// Delete the config file at an explicit path if it exists.
    pub fn clear_at(path: &std::path::Path) -> Result<(), std::io::Error> {
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        Ok(())
    }
}

// ── Settings impl ──────────────────────────────────────────────────────────────

impl Settings {
    /// Parse CLI arguments, merge with last-used params where no explicit CLI
    /// value was provided, resolve `"auto"` values, and persist the result.
    pub fn load_with_last_used() -> Self {
        Self::load_with_last_used_impl(
            std::env::args_os().collect(),
            &LastUsedParams::config_path(),
        )
    }

    /// Full implementation – accepts args and an explicit config path so that
    /// tests can redirect to a temporary directory.
    pub fn load_with_last_used_impl(
        args: Vec<std::ffi::OsString>,
        config_path: &std::path::Path,
    ) -> Self {
        let matches = Settings::command().get_matches_from(args.clone());
        let mut settings = Settings::parse_from(args);

        if settings.clear {
            let _ = LastUsedParams::clear_at(config_path);
            return Self::resolve_auto_values(settings);
        }

        let last = LastUsedParams::load_from(config_path);

        // CLI always wins. clap stores arg ids by field name (underscores).
        if !is_arg_explicitly_set(&matches, "timezone") {
            if let Some(v) = last.timezone {
                settings.timezone = v;
            }
        }
        if !is_arg_explicitly_set(&matches, "bucket") {
            if let Some(v) = last.bucket {
                settings.bucket = v;
            }
        }
        if !is_arg_explicitly_set(&matches, "format") {
            if let Some(v) = last.format {
                settings.format = v;
            }
        }
        if !is_arg_explicitly_set(&matches, "preview_rows") {
            if let Some(v) = last.preview_rows {
                settings.preview_rows = v;
            }
        }
        if !is_arg_explicitly_set(&matches, "refresh_rate") {
            if let Some(v) = last.refresh_rate {
                settings.refresh_rate = v;
            }
        }

        settings = Self::resolve_auto_values(settings);

        let params = LastUsedParams::from(&settings);
        let _ = params.save_to(config_path);

        settings
    }

    /// Resolve `"auto"` sentinel values and apply the `--debug` flag.
    fn resolve_auto_values(mut settings: Settings) -> Settings {
        if settings.timezone == "auto" {
            settings.timezone = crate::time_utils::get_system_timezone();
        }

        if settings.debug {
            settings.log_level = "DEBUG".to_string();
        }

        settings
    }
}

// ── Conversion ─────────────────────────────────────────────────────────────────

impl From<&Settings> for LastUsedParams {
    fn from(s: &Settings) -> Self {
        LastUsedParams {
            timezone: Some(s.timezone.clone()),
            bucket: Some(s.bucket.clone()),
            format: Some(s.format.clone()),
            preview_rows: Some(s.preview_rows),
            refresh_rate: Some(s.refresh_rate),
        }
    }
}

/// Returns `true` when `name` was supplied explicitly on the command line
/// (not via default value or environment variable).
fn is_arg_explicitly_set(matches: &clap::ArgMatches, name: &str) -> bool {
    matches.value_source(name) == Some(clap::parser::ValueSource::CommandLine)
}

// ── Tests ──────────────────────────────────────────────────────────────────────
