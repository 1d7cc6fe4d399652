//! Async watch orchestrator.
//!
//! Polls a [`DataManager`] in a tokio task and, whenever the source changes,
//! re-runs the dashboard pass and sends a [`DashboardSnapshot`] through an
//! `mpsc` channel. The consumer never shares state with the loop.
//!
//! A failed load or pass is fatal: the error is sent as the last item and the
//! loop ends, closing the channel.

use std::path::PathBuf;
use std::time::Duration;

use dash_core::error::DashError;
use dash_core::schema::Schema;
use dash_core::time_utils::TimestampParser;
use dash_data::analysis::{prepare, run, DashboardResult, PipelineConfig, ViewRequest};
use dash_data::filter::FilterSelection;
use tokio::sync::mpsc;
use tokio::time;

use crate::data_manager::DataManager;

// ── Public types ──────────────────────────────────────────────────────────────

/// One dashboard pass, sent after every (re)load of the source.
#[derive(Debug, Clone)]
pub struct DashboardSnapshot {
    pub result: DashboardResult,
    pub source: PathBuf,
    /// How many times the source has been read, this load included.
    pub load_count: usize,
}

/// Everything one pass needs besides the table itself.
#[derive(Debug, Clone)]
pub struct PassConfig {
    pub schema: Schema,
    pub pipeline: PipelineConfig,
    pub parser: TimestampParser,
    pub selection: FilterSelection,
    pub request: ViewRequest,
}

/// What the watch channel carries.
pub type SnapshotResult = Result<DashboardSnapshot, DashError>;

// ── DashboardOrchestrator ─────────────────────────────────────────────────────

/// Background watch loop.
///
/// Call [`DashboardOrchestrator::start`] to spin up the loop in a dedicated
/// tokio task and receive a channel endpoint for [`DashboardSnapshot`]s.
pub struct DashboardOrchestrator {
    update_interval: Duration,
    source: PathBuf,
    pass: PassConfig,
}

impl DashboardOrchestrator {
    pub fn new(update_interval_secs: u64, source: impl Into<PathBuf>, pass: PassConfig) -> Self {
        Self {
            update_interval: Duration::from_secs(update_interval_secs),
            source: source.into(),
            pass,
        }
    }

    /// Spawn the loop. The loop exits once the receiver is dropped or after
    /// sending an error.
    pub fn start(self) -> (mpsc::Receiver<SnapshotResult>, DashboardHandle) {
        let (tx, rx) = mpsc::channel(16);

        let handle = tokio::spawn(async move {
            self.watch_loop(tx).await;
        });

        (rx, DashboardHandle { handle })
    }

    // ── Private implementation ────────────────────────────────────────────

    async fn watch_loop(self, tx: mpsc::Sender<SnapshotResult>) {
        let mut data_manager = DataManager::new(self.source.clone(), self.pass.schema.clone());

        let mut interval = time::interval(self.update_interval);

        loop {
            // The first tick fires immediately.
            interval.tick().await;

            if tx.is_closed() {
                tracing::debug!("dashboard channel closed; exiting loop");
                break;
            }

            let item = match self.refresh(&mut data_manager) {
                Ok(Some(snapshot)) => Ok(snapshot),
                Ok(None) => continue,
                Err(e) => {
                    tracing::error!(error = %e, "dashboard pass failed; stopping watch");
                    Err(e)
                }
            };
            let fatal = item.is_err();
            if tx.send(item).await.is_err() {
                tracing::warn!("failed to send dashboard snapshot; receiver dropped");
                break;
            }
            if fatal {
                break;
            }
        }
    }

    /// Reload if the source changed and run a pass over each new load.
    ///
    /// `Ok(None)` means the source is unchanged since the last pass.
    fn refresh(
        &self,
        data_manager: &mut DataManager,
    ) -> Result<Option<DashboardSnapshot>, DashError> {
        let before = data_manager.load_count();
        data_manager.get_data(false)?;
        let load_count = data_manager.load_count();
        if load_count == before {
            return Ok(None);
        }
        let Some(table) = data_manager.cached() else {
            return Ok(None);
        };

        let pass = &self.pass;
        let prepared = prepare(table, &pass.pipeline, &pass.parser)?;
        let filters = prepared.filters_for(&pass.selection);
        let result = run(&prepared, &filters, &pass.request)?;

        Ok(Some(DashboardSnapshot {
            result,
            source: self.source.clone(),
            load_count,
        }))
    }
}

// ── DashboardHandle ───────────────────────────────────────────────────────────

/// A handle to the background watch task.
pub struct DashboardHandle {
    handle: tokio::task::JoinHandle<()>,
}

impl DashboardHandle {
    /// Immediately abort the watch loop.
    pub fn abort(&self) {
        self.handle.abort();
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
