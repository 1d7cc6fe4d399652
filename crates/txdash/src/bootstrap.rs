use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use dash_core::settings::DEFAULT_SOURCE_FILE;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// `~/.txdash`, or `./.txdash` when the home directory is unknown.
pub fn app_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".txdash")
}

// ── Directory bootstrap ────────────────────────────────────────────────────────

/// Ensure the standard `~/.txdash/` directory hierarchy exists.
pub fn ensure_directories() -> anyhow::Result<()> {
    ensure_directories_in(&app_dir())
}

/// Create `base`, `base/logs` and `base/data` (including missing parents).
pub fn ensure_directories_in(base: &Path) -> anyhow::Result<()> {
    std::fs::create_dir_all(base)?;
    std::fs::create_dir_all(base.join("logs"))?;
    std::fs::create_dir_all(base.join("data"))?;
    Ok(())
}

// ── Logging bootstrap ──────────────────────────────────────────────────────────

/// Map a `DEBUG`/`INFO`/`WARNING`/`ERROR`/`CRITICAL` level name to an
/// [`EnvFilter`] directive. Unknown names pass through unchanged.
fn filter_directive(log_level: &str) -> String {
    match log_level.to_uppercase().as_str() {
        "DEBUG" => "debug".to_string(),
        "INFO" => "info".to_string(),
        "WARNING" => "warn".to_string(),
        "ERROR" | "CRITICAL" => "error".to_string(),
        _ => log_level.to_string(),
    }
}

/// Initialise the global `tracing` subscriber.
///
/// Console output goes to stderr so stdout carries only the report. With
/// `log_file` set, the same events are appended to that file without ANSI
/// colouring.
pub fn setup_logging(log_level: &str, log_file: Option<&PathBuf>) -> anyhow::Result<()> {
    let filter = EnvFilter::try_new(filter_directive(log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let console = fmt::layer()
        .with_target(false)
        .with_thread_ids(false)
        .with_writer(std::io::stderr);

    let file_layer = match log_file {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            Some(
                fmt::layer()
                    .with_ansi(false)
                    .with_target(false)
                    .with_writer(Arc::new(file)),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file_layer)
        .init();

    Ok(())
}

// ── Source discovery ───────────────────────────────────────────────────────────

/// Locate the CSV source.
///
/// An explicit path is returned as given (the loader reports it if missing).
/// Otherwise checks, in order:
/// 1. `./Transactions_data.csv`
/// 2. `~/.txdash/data/Transactions_data.csv`
pub fn discover_source(explicit: Option<&Path>) -> Option<PathBuf> {
    discover_source_in(explicit, Path::new("."), &app_dir())
}

pub fn discover_source_in(explicit: Option<&Path>, cwd: &Path, base: &Path) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }
    let candidates = [
        cwd.join(DEFAULT_SOURCE_FILE),
        base.join("data").join(DEFAULT_SOURCE_FILE),
    ];
    candidates.into_iter().find(|p| p.exists())
}

// ── Tests ──────────────────────────────────────────────────────────────────────
