//! Snapshot codec.
//!
//! A database serializes to JSON as `{ "<table>": { "TypeName": tag,
//! "Rows": [...] } }`, the whole manager as the same shape keyed by database
//! name. On-disk forms are gzip-compressed UTF-8 JSON (`.json.gz`).
//! Transient tables never appear in either direction.

use super::{Database, RowTypeRegistry};
use crate::catalog::Catalog;
use crate::{Result, RowbaseError};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;
use tracing::warn;

pub(crate) const SNAPSHOT_SUFFIX: &str = ".json.gz";

/// One database as a JSON object, tables in creation order. The table list
/// is snapshotted at entry; tables attached while rows are being copied may
/// be missing and will be present in the next serialization.
pub(crate) fn database_to_json(db: &Database) -> Result<serde_json::Value> {
    let mut out = serde_json::Map::new();
    for table in db.tables() {
        if table.is_transient() {
            continue;
        }
        let mut entry = serde_json::Map::new();
        entry.insert(
            "TypeName".to_string(),
            serde_json::Value::String(table.type_tag().to_string()),
        );
        entry.insert(
            "Rows".to_string(),
            serde_json::Value::Array(table.rows_to_json()?),
        );
        out.insert(table.name().to_string(), serde_json::Value::Object(entry));
    }
    Ok(serde_json::Value::Object(out))
}

/// Rebuild a database's tables from its JSON object. Existing non-transient
/// tables are dropped first; transient tables are left untouched.
pub(crate) fn load_database_json(
    db: &Database,
    registry: &RowTypeRegistry,
    catalog: &Arc<Catalog>,
    json: &serde_json::Value,
) -> Result<()> {
    let object = json.as_object().ok_or_else(|| {
        RowbaseError::Serialization(format!("{}: database payload is not an object", db.name()))
    })?;

    for table in db.tables() {
        if !table.is_transient() {
            db.drop_table(table.name());
        }
    }

    for (table_name, entry) in object {
        let entry = entry.as_object().ok_or_else(|| {
            RowbaseError::Serialization(format!("table {}: payload is not an object", table_name))
        })?;
        let tag = entry
            .get("TypeName")
            .and_then(|v| v.as_str())
            .ok_or_else(|| {
                RowbaseError::Serialization(format!("table {}: missing TypeName", table_name))
            })?;
        let rows = entry
            .get("Rows")
            .and_then(|v| v.as_array())
            .ok_or_else(|| {
                RowbaseError::Serialization(format!("table {}: missing Rows", table_name))
            })?;

        let def = registry.resolve(tag).ok_or_else(|| {
            RowbaseError::SchemaInvalid(format!(
                "row type tag {} is not registered; cannot load table {}",
                tag, table_name
            ))
        })?;
        let handle = def.make_table(table_name, Arc::downgrade(catalog));
        handle.load_rows_json(rows)?;
        db.attach(handle);
    }
    Ok(())
}

pub(crate) fn write_gzip_json(path: &Path, json: &serde_json::Value) -> Result<()> {
    let text = serde_json::to_string(json)
        .map_err(|e| RowbaseError::Serialization(e.to_string()))?;
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let file = File::create(path)?;
    let mut encoder = GzEncoder::new(file, Compression::best());
    encoder.write_all(text.as_bytes())?;
    encoder.finish()?;
    Ok(())
}

pub(crate) fn read_gzip_json(path: &Path) -> Result<serde_json::Value> {
    let file = File::open(path)?;
    let mut decoder = GzDecoder::new(file);
    let mut text = String::new();
    decoder.read_to_string(&mut text)?;
    serde_json::from_str(&text).map_err(|e| RowbaseError::Serialization(e.to_string()))
}

/// Snapshot files for a prefix, newest first by last-write time.
pub(crate) fn list_snapshots(dir: &Path, prefix: &str) -> Result<Vec<PathBuf>> {
    let needle = format!("{}_", prefix);
    let mut found: Vec<(SystemTime, PathBuf)> = Vec::new();
    if !dir.exists() {
        return Ok(Vec::new());
    }
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if !name.starts_with(&needle) || !name.ends_with(SNAPSHOT_SUFFIX) {
            continue;
        }
        let modified = entry
            .metadata()
            .and_then(|m| m.modified())
            .unwrap_or(SystemTime::UNIX_EPOCH);
        found.push((modified, entry.path()));
    }
    found.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| b.1.cmp(&a.1)));
    Ok(found.into_iter().map(|(_, path)| path).collect())
}

/// Delete the oldest snapshots for a prefix until at most `max_history`
/// remain. Individual delete failures are logged and swallowed. Returns the
/// number of files removed.
pub(crate) fn trim_history(dir: &Path, prefix: &str, max_history: usize) -> Result<usize> {
    let snapshots = list_snapshots(dir, prefix)?;
    let mut removed = 0;
    for stale in snapshots.iter().skip(max_history) {
        match fs::remove_file(stale) {
            Ok(()) => removed += 1,
            Err(e) => warn!(path = %stale.display(), error = %e, "failed to delete stale snapshot"),
        }
    }
    Ok(removed)
}
