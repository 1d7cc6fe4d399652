//! Source-keyed table cache.
//!
//! Callers use [`DataManager::get_data`] to obtain the loaded [`Table`]. The
//! file is only re-read when its identity (canonical path, size, modification
//! time) differs from the one the cache was filled from, or when a refresh is
//! forced. Load failures are returned as-is: no retry, no stale fallback.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};

use dash_core::error::LoadError;
use dash_core::schema::Schema;
use dash_core::table::Table;
use dash_data::reader::load_csv;

// ── SourceIdentity ────────────────────────────────────────────────────────────

/// What makes two reads of a source interchangeable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceIdentity {
    pub path: PathBuf,
    pub len: u64,
    pub modified: Option<SystemTime>,
}

impl SourceIdentity {
    /// Stat `path` without reading its contents.
    pub fn of(path: &Path) -> Result<Self, LoadError> {
        if !path.exists() {
            return Err(LoadError::NotFound(path.to_path_buf()));
        }
        let read_err = |source| LoadError::FileRead {
            path: path.to_path_buf(),
            source,
        };
        let canonical = fs::canonicalize(path).map_err(read_err)?;
        let meta = fs::metadata(&canonical).map_err(read_err)?;
        Ok(Self {
            path: canonical,
            len: meta.len(),
            modified: meta.modified().ok(),
        })
    }
}

// ── DataManager ───────────────────────────────────────────────────────────────

/// Cached loader for a single CSV source.
///
/// # Example
/// ```no_run
/// use dash_core::schema::Schema;
/// use dash_runtime::data_manager::DataManager;
///
/// let mut mgr = DataManager::new("Transactions_data.csv", Schema::transactions());
/// if let Ok(table) = mgr.get_data(false) {
///     println!("rows: {}", table.len());
/// }
/// ```
pub struct DataManager {
    source: PathBuf,
    schema: Schema,
    cache: Option<Table>,
    /// Identity of the source the cache was filled from.
    identity: Option<SourceIdentity>,
    cache_timestamp: Option<Instant>,
    last_error: Option<String>,
    load_count: usize,
}

impl DataManager {
    pub fn new(source: impl Into<PathBuf>, schema: Schema) -> Self {
        Self {
            source: source.into(),
            schema,
            cache: None,
            identity: None,
            cache_timestamp: None,
            last_error: None,
            load_count: 0,
        }
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    // ── Public API ────────────────────────────────────────────────────────

    /// Return the table, re-reading the source only if it changed.
    ///
    /// With `force_refresh` the source is always re-read.
    pub fn get_data(&mut self, force_refresh: bool) -> Result<&Table, LoadError> {
        let identity = match SourceIdentity::of(&self.source) {
            Ok(id) => id,
            Err(e) => return Err(self.record_error(e)),
        };

        if !force_refresh && self.cache.is_some() && self.identity.as_ref() == Some(&identity) {
            tracing::debug!("returning cached table");
        } else {
            match load_csv(&identity.path, &self.schema) {
                Ok(table) => {
                    tracing::debug!(
                        rows = table.len(),
                        path = %identity.path.display(),
                        "table cache updated"
                    );
                    self.cache = Some(table);
                    self.identity = Some(identity);
                    self.cache_timestamp = Some(Instant::now());
                    self.last_error = None;
                    self.load_count += 1;
                }
                Err(e) => return Err(self.record_error(e)),
            }
        }

        self.cache
            .as_ref()
            .ok_or_else(|| LoadError::Empty(self.source.clone()))
    }

    /// Whether the source differs from what the cache holds.
    ///
    /// `true` when nothing is cached or the source can no longer be stat'ed.
    pub fn is_stale(&self) -> bool {
        match (&self.identity, SourceIdentity::of(&self.source)) {
            (Some(cached), Ok(current)) => *cached != current,
            _ => true,
        }
    }

    /// Discard the current cache, forcing the next [`get_data`](Self::get_data)
    /// call to read the source.
    pub fn invalidate_cache(&mut self) {
        self.cache = None;
        self.identity = None;
        self.cache_timestamp = None;
        tracing::debug!("cache invalidated");
    }

    /// Age of the current cache entry, or `None` if nothing has been loaded.
    pub fn cache_age(&self) -> Option<Duration> {
        self.cache_timestamp.map(|ts| ts.elapsed())
    }

    /// Human-readable description of the last load error, or `None`.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Number of times the source has actually been read.
    pub fn load_count(&self) -> usize {
        self.load_count
    }

    /// The table from the last successful load, without touching the source.
    pub fn cached(&self) -> Option<&Table> {
        self.cache.as_ref()
    }

    // ── Private helpers ───────────────────────────────────────────────────

    fn record_error(&mut self, e: LoadError) -> LoadError {
        tracing::warn!(error = %e, "failed to load source");
        self.last_error = Some(e.to_string());
        e
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
