mod bootstrap;
mod report;

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Result};
use dash_core::error::LoadError;
use dash_core::schema::Schema;
use dash_core::settings::{Settings, DEFAULT_SOURCE_FILE};
use dash_core::time_utils::TimestampParser;
use dash_data::aggregator::TimeBucket;
use dash_data::analysis::{prepare, run, DashboardResult, PipelineConfig, ViewRequest};
use dash_data::filter::FilterSelection;
use dash_data::reader::{export_csv, EXPORT_MIME_TYPE};
use dash_runtime::data_manager::DataManager;
use dash_runtime::orchestrator::{DashboardOrchestrator, PassConfig};

#[tokio::main]
async fn main() -> Result<()> {
    let settings = Settings::load_with_last_used();

    bootstrap::ensure_directories()?;
    bootstrap::setup_logging(&settings.log_level, settings.log_file.as_ref())?;

    tracing::info!("txdash v{} starting", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        "Timezone: {}, bucket: {}, format: {}",
        settings.timezone,
        settings.bucket,
        settings.format
    );

    let source = bootstrap::discover_source(settings.source.as_deref())
        .ok_or_else(|| LoadError::NotFound(PathBuf::from(DEFAULT_SOURCE_FILE)))?;
    let schema = match &settings.schema {
        Some(path) => Schema::from_json_file(path)?,
        None => Schema::transactions(),
    };
    let pass = pass_config(&settings, schema)?;

    if settings.watch {
        tracing::info!("Watching {} every {}s", source.display(), settings.refresh_rate);

        let orchestrator =
            DashboardOrchestrator::new(u64::from(settings.refresh_rate), source, pass);
        let (mut rx, handle) = orchestrator.start();

        loop {
            tokio::select! {
                snapshot = rx.recv() => match snapshot {
                    Some(Ok(snapshot)) => emit(&settings, &snapshot.result)?,
                    Some(Err(e)) => {
                        handle.abort();
                        return Err(e.into());
                    }
                    None => break,
                },
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("Ctrl+C received; shutting down watch task");
                    break;
                }
            }
        }
        handle.abort();
    } else {
        let mut data_manager = DataManager::new(source, pass.schema.clone());
        let table = data_manager.get_data(false)?;
        let prepared = prepare(table, &pass.pipeline, &pass.parser)?;
        let filters = prepared.filters_for(&pass.selection);
        let result = run(&prepared, &filters, &pass.request)?;
        emit(&settings, &result)?;
    }

    Ok(())
}

/// Translate CLI settings into the inputs of one dashboard pass.
fn pass_config(settings: &Settings, schema: Schema) -> Result<PassConfig> {
    let bucket: TimeBucket = settings.bucket.parse().map_err(|e: String| anyhow!(e))?;

    let mut include: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    for inclusion in &settings.include {
        // Repeating a column widens its permitted set.
        include
            .entry(inclusion.column.clone())
            .or_default()
            .extend(inclusion.values.iter().cloned());
    }

    Ok(PassConfig {
        schema,
        pipeline: PipelineConfig {
            amount_column: settings.amount_column.clone(),
            value_column: settings.value_column.clone(),
            category_column: settings.category_column.clone(),
            timestamp_column: settings.timestamp_column.clone(),
        },
        parser: TimestampParser::new(&settings.timezone),
        selection: FilterSelection {
            start: settings.start_date,
            end: settings.end_date,
            exclude_negative: !settings.keep_negative,
            include,
        },
        request: ViewRequest {
            group_by: settings.group_by.clone(),
            aggregate: settings.aggregate.clone(),
            trend_column: settings.trend_column.clone(),
            bucket,
            preview_rows: settings.preview_rows,
        },
    })
}

/// Print the report and run the export action if requested.
fn emit(settings: &Settings, result: &DashboardResult) -> Result<()> {
    match settings.format.as_str() {
        "json" => println!("{}", report::render_json(result)?),
        _ => print!("{}", report::render_text(result)),
    }

    if let Some(path) = &settings.export {
        export(result, path)?;
    }
    Ok(())
}

fn export(result: &DashboardResult, path: &Path) -> Result<()> {
    export_csv(&result.filtered, path)?;
    tracing::info!(
        "Exported {} rows to {} ({})",
        result.filtered.len(),
        path.display(),
        EXPORT_MIME_TYPE
    );
    Ok(())
}

// ── Tests ──────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use clap::Parser;
    use dash_core::settings::EXPORT_FILE_NAME;

    fn settings(args: &[&str]) -> Settings {
        Settings::parse_from(std::iter::once("txdash").chain(args.iter().copied()))
    }

    #[test]
    fn test_pass_config_defaults() {
        let pass = pass_config(&settings(&[]), Schema::transactions()).unwrap();
        assert_eq!(pass.pipeline, PipelineConfig::default());
        assert_eq!(pass.selection, FilterSelection::default());
        assert_eq!(pass.request.bucket, TimeBucket::Day);
        assert_eq!(pass.request.preview_rows, 5);
        assert!(pass.request.group_by.is_none());
    }

    #[test]
    fn test_pass_config_maps_filters() {
        let pass = pass_config(
            &settings(&[
                "--start-date",
                "2023-01-02",
                "--keep-negative",
                "--include",
                "ProductCategory=airtime",
                "--include",
                "ProductCategory=utility_bill,tv",
                "--include",
                "ChannelId=",
                "--bucket",
                "month",
            ]),
            Schema::transactions(),
        )
        .unwrap();

        let selection = &pass.selection;
        assert_eq!(selection.start, NaiveDate::from_ymd_opt(2023, 1, 2));
        assert_eq!(selection.end, None);
        assert!(!selection.exclude_negative);
        assert_eq!(selection.include["ProductCategory"].len(), 3);
        assert!(selection.include["ChannelId"].is_empty());
        assert_eq!(pass.request.bucket, TimeBucket::Month);
    }

    #[test]
    fn test_export_flag_defaults_file_name() {
        let s = settings(&["--export"]);
        assert_eq!(s.export, Some(PathBuf::from(EXPORT_FILE_NAME)));
    }

    #[test]
    fn test_export_writes_filtered_table() {
        let dir = tempfile::TempDir::new().unwrap();
        let source = dir.path().join("tx.csv");
        std::fs::write(
            &source,
            "ProductCategory,Amount,Value\nairtime,5,5\ntv,-2,3\n",
        )
        .unwrap();

        let pass = pass_config(
            &settings(&["--include", "ProductCategory=tv"]),
            Schema::transactions(),
        )
        .unwrap();
        let mut data_manager = DataManager::new(&source, pass.schema.clone());
        let prepared = prepare(
            data_manager.get_data(false).unwrap(),
            &pass.pipeline,
            &pass.parser,
        )
        .unwrap();
        let result = run(
            &prepared,
            &prepared.filters_for(&pass.selection),
            &pass.request,
        )
        .unwrap();

        let out = dir.path().join(EXPORT_FILE_NAME);
        export(&result, &out).unwrap();
        let written = std::fs::read_to_string(&out).unwrap();
        assert_eq!(written, "ProductCategory,Amount,Value\ntv,5,3\n");
    }
}
