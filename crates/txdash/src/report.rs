//! Plain-text and JSON rendering of a dashboard pass.

use std::fmt::Write as _;

use chrono::NaiveDateTime;
use dash_core::error::ConfigError;
use dash_core::formatting::{format_count, format_number, format_optional, percentage};
use dash_core::table::TIMESTAMP_FORMAT;
use dash_data::analysis::DashboardResult;
use serde::Serialize;
use serde_json::{json, Value};

// ── Text ───────────────────────────────────────────────────────────────────────

/// Render every view as aligned plain-text tables.
pub fn render_text(result: &DashboardResult) -> String {
    let mut out = String::new();
    let meta = &result.metadata;

    let _ = writeln!(
        out,
        "{} of {} rows after filters ({}%), generated {}",
        format_count(meta.rows_filtered),
        format_count(meta.rows_loaded),
        format_number(
            percentage(meta.rows_filtered as f64, meta.rows_loaded as f64, 1),
            1
        ),
        meta.generated_at
    );

    // ── Preview ────────────────────────────────────────────────────────────────
    section(&mut out, "Data preview");
    let rows: Vec<Vec<String>> = result
        .preview
        .rows
        .iter()
        .map(|r| r.0.iter().map(|v| v.to_string()).collect())
        .collect();
    let headers: Vec<&str> = result.preview.columns.iter().map(String::as_str).collect();
    table(&mut out, &headers, &rows);

    // ── Diagnostics ────────────────────────────────────────────────────────────
    if let Some(dates) = &result.date_summary {
        section(&mut out, "Dates");
        match dates {
            Ok(d) => {
                let _ = writeln!(out, "count  {}", format_count(d.count));
                let _ = writeln!(out, "min    {}", format_ts(d.min));
                let _ = writeln!(out, "max    {}", format_ts(d.max));
                let _ = writeln!(out, "invalid rows dropped  {}", format_count(result.dates_dropped));
            }
            Err(e) => invalid(&mut out, e),
        }
    }

    section(&mut out, &format!("{} after sanitizing", result.sanitize.column));
    match &result.amount_summary {
        Ok(s) => {
            let stats = [
                ("count", Some(s.count as f64)),
                ("mean", s.mean),
                ("std", s.std),
                ("min", s.min),
                ("25%", s.p25),
                ("50%", s.median),
                ("75%", s.p75),
                ("max", s.max),
            ];
            for (label, value) in stats {
                let _ = writeln!(out, "{:<6} {}", label, format_optional(value, 2));
            }
        }
        Err(e) => invalid(&mut out, e),
    }
    let _ = writeln!(
        out,
        "masked {}, imputed {}, median {}",
        format_count(result.sanitize.masked),
        format_count(result.sanitize.imputed),
        format_optional(result.sanitize.median, 2)
    );

    // ── Views ──────────────────────────────────────────────────────────────────
    if let Some(counts) = &result.counts_by_day {
        section(&mut out, "Transactions per day");
        match counts {
            Ok(counts) => {
                let rows: Vec<Vec<String>> = counts
                    .iter()
                    .map(|c| vec![c.period.clone(), format_count(c.count)])
                    .collect();
                table(&mut out, &["Date", "Count"], &rows);
            }
            Err(e) => invalid(&mut out, e),
        }
    }

    section(&mut out, "Revenue by category");
    match &result.revenue_by_category {
        Ok(totals) => {
            let rows: Vec<Vec<String>> = totals
                .iter()
                .map(|t| vec![t.category.clone(), format_number(t.total, 2)])
                .collect();
            table(&mut out, &["Category", "Total"], &rows);
        }
        Err(e) => invalid(&mut out, e),
    }

    if let Some(trend) = &result.trend {
        let column = result.trend_column.as_deref().unwrap_or("value");
        section(&mut out, &format!("Mean {column} over time"));
        match trend {
            Ok(trend) => {
                let rows: Vec<Vec<String>> = trend
                    .iter()
                    .map(|p| vec![p.period.clone(), format_optional(p.mean, 2)])
                    .collect();
                table(&mut out, &["Period", "Mean"], &rows);
            }
            Err(e) => invalid(&mut out, e),
        }
    }

    match &result.summary {
        Ok(summary) => {
            section(&mut out, &format!("Summary by {}", summary.group_column));
            let mut headers = vec![summary.group_column.clone()];
            for col in &summary.value_columns {
                headers.push(format!("{col} mean"));
                headers.push(format!("{col} sum"));
                headers.push(format!("{col} count"));
            }
            let rows: Vec<Vec<String>> = summary
                .rows
                .iter()
                .map(|g| {
                    let mut row = vec![g.group.clone()];
                    for s in &g.stats {
                        row.push(format_optional(s.mean, 2));
                        row.push(format_number(s.sum, 2));
                        row.push(format_count(s.count));
                    }
                    row
                })
                .collect();
            let headers: Vec<&str> = headers.iter().map(String::as_str).collect();
            table(&mut out, &headers, &rows);
        }
        Err(e) => {
            section(&mut out, "Summary");
            invalid(&mut out, e);
        }
    }

    // ── Filter trace ───────────────────────────────────────────────────────────
    section(&mut out, "Filters");
    let trace = &result.trace;
    let _ = writeln!(out, "{:<24} {}", "input", format_count(trace.input));
    let _ = writeln!(out, "{:<24} {}", "date range", format_count(trace.after_date));
    let _ = writeln!(out, "{:<24} {}", "amount >= 0", format_count(trace.after_amount));
    for (column, remaining) in &trace.after_categories {
        let _ = writeln!(out, "{:<24} {}", column, format_count(*remaining));
    }

    out
}

fn section(out: &mut String, title: &str) {
    let _ = writeln!(out, "\n{title}\n{}", "─".repeat(title.chars().count()));
}

fn invalid(out: &mut String, err: &ConfigError) {
    let _ = writeln!(out, "! {err}");
}

fn format_ts(ts: Option<NaiveDateTime>) -> String {
    ts.map(|t| t.format(TIMESTAMP_FORMAT).to_string())
        .unwrap_or_else(|| "-".to_string())
}

/// Left-aligned columns separated by two spaces.
fn table<S: AsRef<str>>(out: &mut String, headers: &[S], rows: &[Vec<String>]) {
    if rows.is_empty() {
        let _ = writeln!(out, "(no rows)");
        return;
    }
    let mut widths: Vec<usize> = headers.iter().map(|h| h.as_ref().chars().count()).collect();
    for row in rows {
        for (w, cell) in widths.iter_mut().zip(row) {
            *w = (*w).max(cell.chars().count());
        }
    }

    let line = |cells: Vec<&str>| -> String {
        cells
            .iter()
            .zip(&widths)
            .map(|(c, w)| format!("{c:<w$}", w = *w))
            .collect::<Vec<_>>()
            .join("  ")
            .trim_end()
            .to_string()
    };

    let _ = writeln!(out, "{}", line(headers.iter().map(|h| h.as_ref()).collect()));
    for row in rows {
        let _ = writeln!(out, "{}", line(row.iter().map(String::as_str).collect()));
    }
}

// ── JSON ───────────────────────────────────────────────────────────────────────

/// A view as `{"ok": ...}` or `{"error": "..."}`.
fn view<T: Serialize>(result: &Result<T, ConfigError>) -> Value {
    match result {
        Ok(v) => json!({ "ok": v }),
        Err(e) => json!({ "error": e.to_string() }),
    }
}

fn optional_view<T: Serialize>(v: &Option<Result<T, ConfigError>>) -> Value {
    v.as_ref().map(view).unwrap_or(Value::Null)
}

/// Render the pass as a single JSON document.
pub fn render_json(result: &DashboardResult) -> serde_json::Result<String> {
    let doc = json!({
        "metadata": result.metadata,
        "filters": result.trace,
        "sanitize": result.sanitize,
        "dates_dropped": result.dates_dropped,
        "preview": result.preview,
        "date_summary": optional_view(&result.date_summary),
        "amount_summary": view(&result.amount_summary),
        "counts_by_day": optional_view(&result.counts_by_day),
        "revenue_by_category": view(&result.revenue_by_category),
        "trend_column": result.trend_column,
        "trend": optional_view(&result.trend),
        "summary": view(&result.summary),
    });
    serde_json::to_string_pretty(&doc)
}

// ── Tests ──────────────────────────────────────────────────────────────────────
