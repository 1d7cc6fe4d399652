//! CSV loading and export for the transaction table.
//!
//! The header is matched against the declared [`Schema`] before any row is
//! read, numeric cells are parsed eagerly, and timestamp cells are kept as
//! raw text for the date normalizer to coerce. Parsed rows are then assembled
//! column-wise into the table's data frame.

use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

use dash_core::error::{DashError, LoadError};
use dash_core::schema::{ColumnType, Schema};
use dash_core::table::{Row, Table, Value};
use tracing::debug;

pub use dash_core::settings::{EXPORT_FILE_NAME, EXPORT_MIME_TYPE};

// ── Loading ───────────────────────────────────────────────────────────────────

/// Load a CSV file into a [`Table`] shaped by `schema`.
pub fn load_csv(path: &Path, schema: &Schema) -> Result<Table, LoadError> {
    if !path.exists() {
        return Err(LoadError::NotFound(path.to_path_buf()));
    }
    let file = File::open(path).map_err(|source| LoadError::FileRead {
        path: path.to_path_buf(),
        source,
    })?;
    read_csv(file, path, schema)
}

/// Read CSV from any reader; `origin` is only used in error messages.
pub fn read_csv<R: Read>(reader: R, origin: &Path, schema: &Schema) -> Result<Table, LoadError> {
    let malformed = |source: csv::Error| LoadError::Malformed {
        path: origin.to_path_buf(),
        source,
    };

    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_reader(reader);

    let header: Vec<String> = rdr
        .headers()
        .map_err(malformed)?
        .iter()
        .map(|h| h.to_string())
        .collect();
    if header.iter().all(|h| h.is_empty()) {
        return Err(LoadError::Empty(origin.to_path_buf()));
    }

    let resolved = schema.resolve(&header)?;

    let mut rows = Vec::new();
    for record in rdr.records() {
        let record = record.map_err(malformed)?;
        let line = record.position().map(|p| p.line()).unwrap_or_default();

        let mut cells = Vec::with_capacity(resolved.columns.len());
        for (column, &src) in resolved.columns.iter().zip(&resolved.source_indices) {
            let raw = record.get(src).unwrap_or_default();
            let cell = match column.kind {
                ColumnType::Categorical => Value::Text(raw.to_string()),
                ColumnType::Timestamp if raw.trim().is_empty() => Value::Missing,
                ColumnType::Timestamp => Value::Text(raw.to_string()),
                ColumnType::Numeric => {
                    parse_number(raw).ok_or_else(|| LoadError::InvalidNumber {
                        column: column.name.clone(),
                        line,
                        value: raw.to_string(),
                    })?
                }
            };
            cells.push(cell);
        }
        rows.push(Row(cells));
    }

    if rows.is_empty() {
        return Err(LoadError::Empty(origin.to_path_buf()));
    }

    debug!(
        "Loaded {} rows x {} columns from {}",
        rows.len(),
        resolved.columns.len(),
        origin.display()
    );

    Ok(Table::from_rows(resolved.columns, &rows)?)
}

/// Parse a numeric cell.
///
/// Empty cells and `NaN` are missing; `,` is accepted only as a thousands
/// separator between groups of three digits. Returns `None` when the text is
/// not a number at all.
fn parse_number(raw: &str) -> Option<Value> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Some(Value::Missing);
    }
    let cleaned = strip_grouping(trimmed)?;
    let n: f64 = cleaned.parse().ok()?;
    if n.is_nan() {
        Some(Value::Missing)
    } else {
        Some(Value::Number(n))
    }
}

/// Remove well-formed thousands separators: `1,234,567.8` but not `1,5`.
fn strip_grouping(text: &str) -> Option<String> {
    if !text.contains(',') {
        return Some(text.to_string());
    }
    let unsigned = text.strip_prefix(['+', '-']).unwrap_or(text);
    let (integer, fraction) = unsigned.split_once('.').unwrap_or((unsigned, ""));
    if fraction.contains(',') {
        return None;
    }
    let digits = |g: &str| g.bytes().all(|b| b.is_ascii_digit());
    let mut groups = integer.split(',');
    let lead = groups.next()?;
    if lead.is_empty() || lead.len() > 3 || !digits(lead) {
        return None;
    }
    if !groups.all(|g| g.len() == 3 && digits(g)) {
        return None;
    }
    Some(text.replace(',', ""))
}

// ── Export ────────────────────────────────────────────────────────────────────

/// A ready-to-offer download of the filtered table.
#[derive(Debug, Clone)]
pub struct ExportPayload {
    pub file_name: &'static str,
    pub mime_type: &'static str,
    pub bytes: Vec<u8>,
}

/// Serialize `table` as CSV with the source's header order.
pub fn write_csv<W: Write>(table: &Table, writer: W) -> Result<(), DashError> {
    let mut wtr = csv::Writer::from_writer(writer);
    wtr.write_record(table.column_names())?;
    for row in table.rows()? {
        wtr.write_record(row.0.iter().map(|v| v.to_string()))?;
    }
    wtr.flush()?;
    Ok(())
}

/// The table as UTF-8 CSV bytes, labelled for download.
pub fn export_payload(table: &Table) -> Result<ExportPayload, DashError> {
    let mut bytes = Vec::new();
    write_csv(table, &mut bytes)?;
    Ok(ExportPayload {
        file_name: EXPORT_FILE_NAME,
        mime_type: EXPORT_MIME_TYPE,
        bytes,
    })
}

/// Write the table to `path`.
pub fn export_csv(table: &Table, path: &Path) -> Result<(), DashError> {
    let file = File::create(path)?;
    write_csv(table, file)?;
    debug!("Exported {} rows to {}", table.len(), path.display());
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use dash_core::schema::{ColumnSpec, ExtraColumns};
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn write_file(dir: &Path, name: &str, content: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    const SAMPLE: &str = "\
TransactionId,ProductCategory,Amount,Value,TransactionStartTime
T1,airtime,-5,5,2023-01-01T08:00:00Z
T2,financial_services,0,100,2023-01-02T09:30:00Z
T3,airtime,\"1,000\",1000,not-a-date
T4,utility_bill,,20,
";

    // ── load_csv ──────────────────────────────────────────────────────────────

    #[test]
    fn test_load_csv_types_cells_by_schema() {
        let dir = TempDir::new().unwrap();
        let path = write_file(dir.path(), "tx.csv", SAMPLE);

        let table = load_csv(&path, &Schema::transactions()).unwrap();
        assert_eq!(table.len(), 4);
        assert_eq!(
            table.column_names(),
            vec!["TransactionId", "ProductCategory", "Amount", "Value", "TransactionStartTime"]
        );

        assert_eq!(
            table.values("Amount").unwrap(),
            vec![
                Value::Number(-5.0),
                Value::Number(0.0),
                Value::Number(1000.0),
                Value::Missing
            ]
        );
        let ts = table.values("TransactionStartTime").unwrap();
        assert_eq!(ts[2], Value::Text("not-a-date".to_string()));
        assert_eq!(ts[3], Value::Missing);
        assert!(!table.has_timestamps("TransactionStartTime"));
    }

    #[test]
    fn test_load_csv_missing_file() {
        let dir = TempDir::new().unwrap();
        let err = load_csv(&dir.path().join("absent.csv"), &Schema::transactions()).unwrap_err();
        assert!(matches!(err, LoadError::NotFound(_)));
    }

    #[test]
    fn test_load_csv_header_only_is_empty() {
        let dir = TempDir::new().unwrap();
        let path = write_file(dir.path(), "h.csv", "ProductCategory,Amount,Value\n");
        let err = load_csv(&path, &Schema::transactions()).unwrap_err();
        assert!(matches!(err, LoadError::Empty(_)));
    }

    #[test]
    fn test_load_csv_zero_byte_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let path = write_file(dir.path(), "z.csv", "");
        let err = load_csv(&path, &Schema::transactions()).unwrap_err();
        assert!(matches!(err, LoadError::Empty(_)));
    }

    #[test]
    fn test_load_csv_missing_required_column() {
        let dir = TempDir::new().unwrap();
        let path = write_file(dir.path(), "m.csv", "ProductCategory,Amount\nairtime,5\n");
        let err = load_csv(&path, &Schema::transactions()).unwrap_err();
        assert!(matches!(err, LoadError::MissingColumn { column } if column == "Value"));
    }

    #[test]
    fn test_load_csv_rejects_non_numeric_amount() {
        let dir = TempDir::new().unwrap();
        let path = write_file(
            dir.path(),
            "n.csv",
            "ProductCategory,Amount,Value\nairtime,5,5\nairtime,ten,5\n",
        );
        let err = load_csv(&path, &Schema::transactions()).unwrap_err();
        match err {
            LoadError::InvalidNumber {
                column,
                line,
                value,
            } => {
                assert_eq!(column, "Amount");
                assert_eq!(line, 3);
                assert_eq!(value, "ten");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_load_csv_ragged_row_is_malformed() {
        let dir = TempDir::new().unwrap();
        let path = write_file(
            dir.path(),
            "r.csv",
            "ProductCategory,Amount,Value\nairtime,5,5,extra\n",
        );
        let err = load_csv(&path, &Schema::transactions()).unwrap_err();
        assert!(matches!(err, LoadError::Malformed { .. }));
    }

    #[test]
    fn test_load_csv_custom_schema_ignores_extras() {
        let dir = TempDir::new().unwrap();
        let path = write_file(dir.path(), "c.csv", "Shop,Total,Note\nA,1.5,x\n");
        let schema = Schema {
            columns: vec![
                ColumnSpec::required("Shop", ColumnType::Categorical),
                ColumnSpec::required("Total", ColumnType::Numeric),
            ],
            extra_columns: ExtraColumns::Ignore,
        };
        let table = load_csv(&path, &schema).unwrap();
        assert_eq!(table.column_names(), vec!["Shop", "Total"]);
        assert_eq!(table.values("Total").unwrap(), vec![Value::Number(1.5)]);
    }

    #[test]
    fn test_parse_number_nan_is_missing() {
        assert_eq!(parse_number("NaN"), Some(Value::Missing));
        assert_eq!(parse_number(" 2.5 "), Some(Value::Number(2.5)));
        assert_eq!(parse_number("abc"), None);
    }

    #[test]
    fn test_parse_number_accepts_thousands_grouping() {
        assert_eq!(parse_number("1,000"), Some(Value::Number(1000.0)));
        assert_eq!(parse_number("12,345.5"), Some(Value::Number(12345.5)));
        assert_eq!(parse_number("-1,234,567"), Some(Value::Number(-1234567.0)));
    }

    #[test]
    fn test_parse_number_rejects_malformed_grouping() {
        assert_eq!(parse_number("1,5"), None);
        assert_eq!(parse_number("1,2,3"), None);
        assert_eq!(parse_number(",100"), None);
        assert_eq!(parse_number("1000,000"), None);
        assert_eq!(parse_number("1.000,5"), None);
    }

    #[test]
    fn test_load_csv_rejects_decimal_comma() {
        let dir = TempDir::new().unwrap();
        let path = write_file(
            dir.path(),
            "dc.csv",
            "ProductCategory,Amount,Value\nairtime,\"1,5\",5\n",
        );
        let err = load_csv(&path, &Schema::transactions()).unwrap_err();
        assert!(matches!(err, LoadError::InvalidNumber { value, .. } if value == "1,5"));
    }

    // ── export ────────────────────────────────────────────────────────────────

    #[test]
    fn test_export_round_trip() {
        let dir = TempDir::new().unwrap();
        let source = write_file(dir.path(), "tx.csv", SAMPLE);
        let table = load_csv(&source, &Schema::transactions()).unwrap();

        let out = dir.path().join(EXPORT_FILE_NAME);
        export_csv(&table, &out).unwrap();
        let reloaded = load_csv(&out, &Schema::transactions()).unwrap();

        assert_eq!(reloaded.len(), table.len());
        assert_eq!(reloaded, table);
    }

    #[test]
    fn test_export_payload_labels() {
        let dir = TempDir::new().unwrap();
        let source = write_file(dir.path(), "tx.csv", SAMPLE);
        let table = load_csv(&source, &Schema::transactions()).unwrap();

        let payload = export_payload(&table).unwrap();
        assert_eq!(payload.file_name, "transactions_filtrées.csv");
        assert_eq!(payload.mime_type, "text/csv");
        let text = String::from_utf8(payload.bytes).unwrap();
        assert!(text.starts_with("TransactionId,ProductCategory,Amount,Value,TransactionStartTime\n"));
        assert!(text.contains("T3,airtime,1000,1000,not-a-date"));
    }
}
