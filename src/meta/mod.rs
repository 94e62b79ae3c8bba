//! Metadata table bootstrap.
//!
//! Reads table descriptor files from a `Metadata/<dbName>/Tables/*.json`
//! tree and installs a transient dynamic table for each through the normal
//! manager API. Descriptor fields follow the external format: `DataType`
//! names like INT or NVARCHAR, `AllowBlank`, `AutoGenerated`.

use crate::data::DataType;
use crate::db::DatabaseManager;
use crate::schema::{ColumnSpec, RowSchema, SchemaBuilder};
use crate::{Result, RowbaseError};
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TableDescriptor {
    pub database_name: String,
    pub table_name: String,
    #[serde(default)]
    pub fields: Vec<FieldDescriptor>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct FieldDescriptor {
    pub name: String,
    pub data_type: String,
    #[serde(default)]
    pub length: u32,
    #[serde(default)]
    pub allow_blank: bool,
    #[serde(default)]
    pub auto_generated: bool,
}

impl TableDescriptor {
    pub fn parse(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| {
            RowbaseError::InvalidArgument(format!("malformed table descriptor: {}", e))
        })
    }

    /// Build the row schema this descriptor describes. The type tag is
    /// `<database>.<table>`, stable across restarts.
    pub fn to_schema(&self) -> Result<Arc<RowSchema>> {
        if self.database_name.trim().is_empty() || self.table_name.trim().is_empty() {
            return Err(RowbaseError::InvalidArgument(
                "table descriptor needs DatabaseName and TableName".to_string(),
            ));
        }
        let tag = format!(
            "{}.{}",
            self.database_name.trim(),
            self.table_name.trim()
        );
        let mut builder = SchemaBuilder::new(tag);
        for field in &self.fields {
            let data_type = map_data_type(&field.data_type)?;
            let mut spec = ColumnSpec::new(field.name.clone(), data_type);
            if field.auto_generated {
                spec = spec.primary_key().auto_increment();
            }
            if !field.allow_blank && !field.auto_generated {
                spec = spec.required();
            }
            builder = builder.column(spec);
        }
        builder.build()
    }
}

fn map_data_type(name: &str) -> Result<DataType> {
    match name.trim().to_ascii_uppercase().as_str() {
        "INT" => Ok(DataType::Int32),
        "BIGINT" => Ok(DataType::Int64),
        "DECIMAL" => Ok(DataType::Decimal),
        "BIT" => Ok(DataType::Bool),
        "DATE" | "DATETIME" => Ok(DataType::DateTime),
        "NVARCHAR" | "VARCHAR" => Ok(DataType::String),
        "UNIQUEIDENTIFIER" => Ok(DataType::Uuid),
        other => Err(RowbaseError::SchemaInvalid(format!(
            "unknown descriptor data type {}",
            other
        ))),
    }
}

/// Walk `<root>/<dbName>/Tables/*.json`, creating each described database
/// and a transient dynamic table per descriptor. Returns the installed
/// table names as `<database>.<table>`. Descriptors that fail to parse or
/// validate fail the whole call; nothing is partially skipped silently.
pub fn load_metadata_tables(
    manager: &DatabaseManager,
    metadata_root: &Path,
) -> Result<Vec<String>> {
    let mut installed = Vec::new();
    if !metadata_root.exists() {
        debug!(root = %metadata_root.display(), "no metadata directory");
        return Ok(installed);
    }

    for db_entry in sorted_dir(metadata_root)? {
        if !db_entry.is_dir() {
            continue;
        }
        let tables_dir = db_entry.join("Tables");
        if !tables_dir.is_dir() {
            warn!(dir = %db_entry.display(), "metadata directory without Tables/");
            continue;
        }
        for file in sorted_dir(&tables_dir)? {
            if file.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let text = fs::read_to_string(&file)?;
            let descriptor = TableDescriptor::parse(&text)?;
            let schema = descriptor.to_schema()?;
            manager.create_database(descriptor.database_name.trim())?;
            manager.create_dynamic_table(
                descriptor.database_name.trim(),
                descriptor.table_name.trim(),
                schema,
                true,
            )?;
            debug!(
                database = descriptor.database_name.trim(),
                table = descriptor.table_name.trim(),
                "installed metadata table"
            );
            installed.push(format!(
                "{}.{}",
                descriptor.database_name.trim(),
                descriptor.table_name.trim()
            ));
        }
    }
    Ok(installed)
}

fn sorted_dir(dir: &Path) -> Result<Vec<std::path::PathBuf>> {
    let mut entries: Vec<_> = fs::read_dir(dir)?
        .collect::<std::io::Result<Vec<_>>>()?
        .into_iter()
        .map(|e| e.path())
        .collect();
    entries.sort();
    Ok(entries)
}
