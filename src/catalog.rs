//! Table catalog: the declarative list of tables a run may copy.
//!
//! Catalogs are CSV files with a header row or YAML lists:
//!
//! ```csv
//! table_name,to_be_loaded,load_mode,watermark_column,watermark_type,key_columns
//! customers,yes,full,,,
//! orders,yes,incremental,order_id,integer,
//! order_items,no,incremental,updated_at,timestamp,order_id|line_no
//! ```
//!
//! ```yaml
//! - table_name: orders
//!   enabled: true
//!   load_mode: incremental
//!   watermark_column: order_id
//!   watermark_type: integer_sequence
//! ```
//!
//! `load_mode` defaults to `full` and `enabled` to `true`. Any malformed
//! entry fails the whole load.

use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use sync_core::{LoadMode, ParseEnumError, TableConfig, WatermarkType};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("failed to read catalog {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("catalog {0} must have a .csv, .yaml or .yml extension")]
    UnsupportedFormat(PathBuf),

    #[error("malformed CSV catalog: {0}")]
    Csv(#[from] csv::Error),

    #[error("malformed YAML catalog: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("entry {index}: invalid table name '{name}'")]
    InvalidTableName { index: usize, name: String },

    #[error("table '{0}' is declared more than once")]
    DuplicateTable(String),

    #[error("table '{table}': incremental load requires {field}")]
    MissingField { table: String, field: &'static str },

    #[error("table '{table}': {source}")]
    InvalidValue {
        table: String,
        #[source]
        source: ParseEnumError,
    },

    #[error("table '{table}': invalid enabled flag '{value}'")]
    InvalidFlag { table: String, value: String },
}

/// Parsed catalog, in declaration order. Immutable once loaded.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Catalog {
    tables: Vec<TableConfig>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Flag {
    Bool(bool),
    Int(i64),
    Text(String),
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum KeyColumns {
    List(Vec<String>),
    Joined(String),
}

/// One catalog entry as written, before validation.
#[derive(Debug, Deserialize)]
struct RawEntry {
    #[serde(default)]
    table_name: Option<String>,
    #[serde(default, alias = "to_be_loaded")]
    enabled: Option<Flag>,
    #[serde(default)]
    load_mode: Option<String>,
    #[serde(default)]
    watermark_column: Option<String>,
    #[serde(default)]
    watermark_type: Option<String>,
    #[serde(default)]
    key_columns: Option<KeyColumns>,
}

impl Catalog {
    pub fn new(tables: Vec<TableConfig>) -> Result<Self, CatalogError> {
        let mut seen = HashSet::new();
        for (index, table) in tables.iter().enumerate() {
            if !is_valid_table_name(&table.name) {
                return Err(CatalogError::InvalidTableName {
                    index: index + 1,
                    name: table.name.clone(),
                });
            }
            if !seen.insert(table.name.clone()) {
                return Err(CatalogError::DuplicateTable(table.name.clone()));
            }
        }
        Ok(Self { tables })
    }

    /// Load a catalog file, picking the format from its extension.
    pub fn from_file(path: &Path) -> Result<Self, CatalogError> {
        let text = std::fs::read_to_string(path).map_err(|source| CatalogError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);
        let catalog = match extension.as_deref() {
            Some("csv") => Self::from_csv_str(&text)?,
            Some("yaml") | Some("yml") => Self::from_yaml_str(&text)?,
            _ => return Err(CatalogError::UnsupportedFormat(path.to_path_buf())),
        };
        info!(
            "Loaded {} tables from catalog {}",
            catalog.tables.len(),
            path.display()
        );
        Ok(catalog)
    }

    pub fn from_csv_str(text: &str) -> Result<Self, CatalogError> {
        let mut reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_reader(text.as_bytes());
        let mut entries = Vec::new();
        for record in reader.deserialize::<RawEntry>() {
            entries.push(record?);
        }
        Self::from_entries(entries)
    }

    pub fn from_yaml_str(text: &str) -> Result<Self, CatalogError> {
        let entries: Vec<RawEntry> = serde_yaml::from_str(text)?;
        Self::from_entries(entries)
    }

    fn from_entries(entries: Vec<RawEntry>) -> Result<Self, CatalogError> {
        let tables = entries
            .into_iter()
            .enumerate()
            .map(|(index, entry)| entry.into_config(index + 1))
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(tables)
    }

    pub fn tables(&self) -> &[TableConfig] {
        &self.tables
    }

    pub fn get(&self, name: &str) -> Option<&TableConfig> {
        self.tables.iter().find(|t| t.name == name)
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Tables named by a selection argument: `all` or a comma-separated
    /// list. Disabled tables are kept so the run reports them as skipped.
    /// Requested names missing from the catalog are logged and ignored.
    pub fn select(&self, selection: &str) -> Vec<TableConfig> {
        let selection = selection.trim();
        if selection.is_empty() || selection.eq_ignore_ascii_case("all") {
            return self.tables.clone();
        }

        let requested: Vec<&str> = selection
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect();
        let missing: Vec<&str> = requested
            .iter()
            .copied()
            .filter(|name| self.get(name).is_none())
            .collect();
        if !missing.is_empty() {
            warn!("Requested tables not found in catalog: {}", missing.join(", "));
        }

        self.tables
            .iter()
            .filter(|t| requested.contains(&t.name.as_str()))
            .cloned()
            .collect()
    }
}

impl RawEntry {
    fn into_config(self, index: usize) -> Result<TableConfig, CatalogError> {
        let name = self.table_name.unwrap_or_default().trim().to_string();
        if !is_valid_table_name(&name) {
            return Err(CatalogError::InvalidTableName { index, name });
        }

        let invalid = |source| CatalogError::InvalidValue {
            table: name.clone(),
            source,
        };

        let enabled = match self.enabled {
            None => true,
            Some(flag) => parse_flag(&flag).ok_or_else(|| CatalogError::InvalidFlag {
                table: name.clone(),
                value: match flag {
                    Flag::Bool(b) => b.to_string(),
                    Flag::Int(i) => i.to_string(),
                    Flag::Text(s) => s,
                },
            })?,
        };

        let load_mode = match non_empty(self.load_mode) {
            Some(mode) => mode.parse::<LoadMode>().map_err(invalid)?,
            None => LoadMode::Full,
        };
        let watermark_column = non_empty(self.watermark_column);
        let watermark_type = match non_empty(self.watermark_type) {
            Some(ty) => Some(ty.parse::<WatermarkType>().map_err(invalid)?),
            None => None,
        };

        if load_mode == LoadMode::Incremental {
            if watermark_column.is_none() {
                return Err(CatalogError::MissingField {
                    table: name,
                    field: "watermark_column",
                });
            }
            if watermark_type.is_none() {
                return Err(CatalogError::MissingField {
                    table: name,
                    field: "watermark_type",
                });
            }
        }

        let key_columns = match self.key_columns {
            None => Vec::new(),
            Some(KeyColumns::List(columns)) => columns,
            Some(KeyColumns::Joined(joined)) => joined
                .split('|')
                .map(str::trim)
                .filter(|c| !c.is_empty())
                .map(str::to_string)
                .collect(),
        };

        Ok(TableConfig {
            name,
            load_mode,
            watermark_column,
            watermark_type,
            enabled,
            key_columns,
        })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn parse_flag(flag: &Flag) -> Option<bool> {
    match flag {
        Flag::Bool(b) => Some(*b),
        Flag::Int(1) => Some(true),
        Flag::Int(0) => Some(false),
        Flag::Int(_) => None,
        Flag::Text(s) => match s.trim().to_ascii_lowercase().as_str() {
            "yes" | "y" | "true" | "1" => Some(true),
            "no" | "n" | "false" | "0" => Some(false),
            _ => None,
        },
    }
}

/// `table` or `schema.table`, each part an identifier.
fn is_valid_table_name(name: &str) -> bool {
    let is_ident = |part: &str| {
        let mut chars = part.chars();
        matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
            && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
    };
    match name.split_once('.') {
        Some((schema, table)) => is_ident(schema) && is_ident(table),
        None => is_ident(name),
    }
}
