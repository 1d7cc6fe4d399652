//! Declared column schema for the transaction table.
//!
//! Column semantics are never inferred from cell contents: every column is
//! either declared here or handled by the schema's [`ExtraColumns`] policy.
//! The schema is validated against the CSV header at load time so that a
//! mismatch fails fast instead of surfacing halfway through the pipeline.

use std::collections::HashSet;
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::LoadError;

// ── ColumnType ────────────────────────────────────────────────────────────────

/// Semantic type of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    /// Free text or category labels; the unit of the inclusion filters.
    Categorical,
    /// Floating point values; the unit of sums and means.
    Numeric,
    /// Date/time values, coerced by the date normalizer.
    Timestamp,
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ColumnType::Categorical => "categorical",
            ColumnType::Numeric => "numeric",
            ColumnType::Timestamp => "timestamp",
        };
        f.write_str(name)
    }
}

// ── Column ────────────────────────────────────────────────────────────────────

/// A concrete column of a loaded table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub kind: ColumnType,
}

impl Column {
    pub fn new(name: impl Into<String>, kind: ColumnType) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}

// ── Schema declaration ────────────────────────────────────────────────────────

/// One declared column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ColumnType,
    /// Whether the source must contain this column.
    #[serde(default = "default_required")]
    pub required: bool,
}

fn default_required() -> bool {
    true
}

impl ColumnSpec {
    pub fn required(name: &str, kind: ColumnType) -> Self {
        Self {
            name: name.to_string(),
            kind,
            required: true,
        }
    }

    pub fn optional(name: &str, kind: ColumnType) -> Self {
        Self {
            name: name.to_string(),
            kind,
            required: false,
        }
    }
}

/// What to do with header columns the schema does not mention.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtraColumns {
    /// Keep them as categorical text.
    #[default]
    Categorical,
    /// Drop them at load time.
    Ignore,
}

/// The declared list of `{name, semantic type}` pairs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    pub columns: Vec<ColumnSpec>,
    #[serde(default)]
    pub extra_columns: ExtraColumns,
}

/// A schema matched against a concrete header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedSchema {
    /// Columns of the resulting table, in header order.
    pub columns: Vec<Column>,
    /// For each entry of `columns`, its position in the source header.
    pub source_indices: Vec<usize>,
}

impl Schema {
    /// The schema of the public mobile-money transactions dataset.
    ///
    /// Only `Amount`, `Value` and `ProductCategory` are required; the rest
    /// are typed when present.
    pub fn transactions() -> Self {
        use ColumnType::*;
        Self {
            columns: vec![
                ColumnSpec::optional("TransactionId", Categorical),
                ColumnSpec::optional("BatchId", Categorical),
                ColumnSpec::optional("AccountId", Categorical),
                ColumnSpec::optional("SubscriptionId", Categorical),
                ColumnSpec::optional("CustomerId", Categorical),
                ColumnSpec::optional("CurrencyCode", Categorical),
                ColumnSpec::optional("CountryCode", Numeric),
                ColumnSpec::optional("ProviderId", Categorical),
                ColumnSpec::optional("ProductId", Categorical),
                ColumnSpec::required("ProductCategory", Categorical),
                ColumnSpec::optional("ChannelId", Categorical),
                ColumnSpec::required("Amount", Numeric),
                ColumnSpec::required("Value", Numeric),
                ColumnSpec::optional("TransactionStartTime", Timestamp),
                ColumnSpec::optional("PricingStrategy", Numeric),
                ColumnSpec::optional("FraudResult", Numeric),
            ],
            extra_columns: ExtraColumns::Categorical,
        }
    }

    /// Read a schema declaration from a JSON file.
    pub fn from_json_file(path: &Path) -> crate::error::Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| LoadError::FileRead {
            path: path.to_path_buf(),
            source,
        })?;
        let schema: Schema = serde_json::from_str(&content)?;
        schema.validate()?;
        Ok(schema)
    }

    /// Look up the declaration for `name`.
    pub fn spec(&self, name: &str) -> Option<&ColumnSpec> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Reject duplicate names and more than one timestamp column.
    pub fn validate(&self) -> Result<(), LoadError> {
        let mut seen = HashSet::new();
        for spec in &self.columns {
            if !seen.insert(spec.name.as_str()) {
                return Err(LoadError::InvalidSchema(format!(
                    "column \"{}\" declared twice",
                    spec.name
                )));
            }
        }
        let timestamps = self
            .columns
            .iter()
            .filter(|c| c.kind == ColumnType::Timestamp)
            .count();
        if timestamps > 1 {
            return Err(LoadError::InvalidSchema(format!(
                "{timestamps} timestamp columns declared, at most one is supported"
            )));
        }
        Ok(())
    }

    /// Match the schema against a CSV header.
    ///
    /// Fails when a required column is absent or the header repeats a name.
    pub fn resolve(&self, header: &[String]) -> Result<ResolvedSchema, LoadError> {
        self.validate()?;

        let mut seen = HashSet::new();
        for name in header {
            if !seen.insert(name.as_str()) {
                return Err(LoadError::InvalidSchema(format!(
                    "header repeats column \"{name}\""
                )));
            }
        }

        if let Some(missing) = self
            .columns
            .iter()
            .find(|spec| spec.required && !seen.contains(spec.name.as_str()))
        {
            return Err(LoadError::MissingColumn {
                column: missing.name.clone(),
            });
        }

        let mut columns = Vec::with_capacity(header.len());
        let mut source_indices = Vec::with_capacity(header.len());
        for (idx, name) in header.iter().enumerate() {
            let kind = match (self.spec(name), self.extra_columns) {
                (Some(spec), _) => spec.kind,
                (None, ExtraColumns::Categorical) => ColumnType::Categorical,
                (None, ExtraColumns::Ignore) => continue,
            };
            columns.push(Column::new(name.clone(), kind));
            source_indices.push(idx);
        }

        Ok(ResolvedSchema {
            columns,
            source_indices,
        })
    }
}

impl Default for Schema {
    fn default() -> Self {
        Self::transactions()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
