//! Table catalog.
//!
//! The catalog maps row-type tags to the live table handle for that type. It
//! exists for exactly one job: resolving cross-table references — foreign-key
//! targets on insert/update, and "who references me" on delete. Every
//! registration change bumps a monotonic version; tables key their cached
//! dependent sets on it.

use crate::data::Value;
use crate::schema::RowSchema;
use crate::Result;
use ahash::AHashMap;
use dashmap::DashMap;
use std::any::Any;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

/// A row flattened to column name → value. Always an independent copy.
pub type ValueRow = AHashMap<String, Value>;

/// Predicate over a flattened row, compiled from a SQL WHERE clause.
pub type RowPredicate = Arc<dyn Fn(&ValueRow) -> bool + Send + Sync>;

/// Per-row column assignments computed from the row's current values.
pub type RowAssignments = Arc<dyn Fn(&ValueRow) -> Result<Vec<(String, Value)>> + Send + Sync>;

/// The abstract row interface of a table.
///
/// Everything outside the typed `Table<R>` API — the SQL interpreter, the
/// foreign-key machinery, the snapshot codec — works through this trait and
/// only ever sees copies of stored rows.
pub trait TableHandle: Send + Sync {
    fn name(&self) -> &str;
    fn type_tag(&self) -> &str;
    fn schema(&self) -> Arc<RowSchema>;
    fn len(&self) -> usize;
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Excluded from snapshots (metadata-born / dynamic tables).
    fn is_transient(&self) -> bool;

    /// Whether a row with this primary-key value exists.
    fn contains_pk(&self, key: &Value) -> bool;

    /// Whether any row's `fk_column` equals `key`. Reads under this table's
    /// read lock.
    fn holds_reference(&self, fk_column: &str, key: &Value) -> bool;

    /// Snapshot of every row, flattened.
    fn rows_as_values(&self) -> Vec<ValueRow>;

    /// Build a row from column values and run the full insert pipeline.
    fn insert_values(&self, values: ValueRow) -> Result<()>;

    /// Update matching rows by applying computed assignments; returns the
    /// number of rows changed.
    fn update_values(&self, predicate: RowPredicate, assignments: RowAssignments)
        -> Result<usize>;

    /// Delete matching rows; returns the number removed.
    fn delete_values(&self, predicate: RowPredicate) -> Result<usize>;

    /// Drop all rows and reset auto-increment.
    fn clear_all(&self);

    /// Rows in insertion order, in the snapshot wire form.
    fn rows_to_json(&self) -> Result<Vec<serde_json::Value>>;

    /// Replace this table's rows from the snapshot wire form.
    fn load_rows_json(&self, rows: &[serde_json::Value]) -> Result<()>;

    /// For typed downcasting back to `Table<R>`.
    fn as_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

/// A table that holds foreign keys into some other row type.
pub struct Dependent {
    pub handle: Arc<dyn TableHandle>,
    /// The dependent's columns that reference the target type.
    pub fk_columns: Vec<String>,
}

/// Registry of live tables, keyed by row-type tag.
pub struct Catalog {
    tables: DashMap<String, Weak<dyn TableHandle>>,
    version: AtomicU64,
}

impl Catalog {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            tables: DashMap::new(),
            version: AtomicU64::new(0),
        })
    }

    /// Install or replace the active table for a row type.
    pub fn register(&self, handle: &Arc<dyn TableHandle>) {
        self.tables
            .insert(handle.type_tag().to_string(), Arc::downgrade(handle));
        self.version.fetch_add(1, Ordering::Release);
    }

    /// Drop the entry for `tag` if its table is gone. Called by tables on
    /// drop; a replacement already registered under the same tag is left
    /// alone.
    pub fn deregister(&self, tag: &str) {
        let removed = self
            .tables
            .remove_if(tag, |_, weak| weak.strong_count() == 0)
            .is_some();
        if removed {
            self.version.fetch_add(1, Ordering::Release);
        }
    }

    /// Force-remove the entry for `tag`.
    pub fn remove(&self, tag: &str) {
        if self.tables.remove(tag).is_some() {
            self.version.fetch_add(1, Ordering::Release);
        }
    }

    /// The currently active table for a row type, if any.
    pub fn lookup(&self, tag: &str) -> Option<Arc<dyn TableHandle>> {
        self.tables.get(tag).and_then(|weak| weak.upgrade())
    }

    /// Monotonic registration version, for cache invalidation.
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    /// Every live table whose row type has a foreign-key column pointing at
    /// `target_tag`. Includes self-references.
    pub fn dependents_of(&self, target_tag: &str) -> Vec<Dependent> {
        let mut out = Vec::new();
        for entry in self.tables.iter() {
            let Some(handle) = entry.value().upgrade() else {
                continue;
            };
            let fk_columns = handle.schema().foreign_keys_to(target_tag);
            if !fk_columns.is_empty() {
                out.push(Dependent { handle, fk_columns });
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::DataType;
    use crate::schema::{ColumnSpec, DynRecord, SchemaBuilder};
    use crate::table::Table;

    fn parent_child(catalog: &Arc<Catalog>) -> (Arc<dyn TableHandle>, Arc<dyn TableHandle>) {
        let parent_schema = SchemaBuilder::new("Parent")
            .column(ColumnSpec::new("Id", DataType::Int32).primary_key().auto_increment())
            .build()
            .unwrap();
        let child_schema = SchemaBuilder::new("Child")
            .column(ColumnSpec::new("Id", DataType::Int32).primary_key().auto_increment())
            .column(ColumnSpec::new("ParentId", DataType::Int32).references("Parent"))
            .build()
            .unwrap();

        let parent: Arc<dyn TableHandle> =
            Table::<DynRecord>::dynamic("Parent", parent_schema, false, Arc::downgrade(catalog));
        let child: Arc<dyn TableHandle> =
            Table::<DynRecord>::dynamic("Child", child_schema, false, Arc::downgrade(catalog));
        catalog.register(&parent);
        catalog.register(&child);
        (parent, child)
    }

    #[test]
    fn test_register_bumps_version() {
        let catalog = Catalog::new();
        let v0 = catalog.version();
        let (_parent, _child) = parent_child(&catalog);
        assert!(catalog.version() > v0);
        assert!(catalog.lookup("Parent").is_some());
        assert!(catalog.lookup("Nope").is_none());
    }

    #[test]
    fn test_dependents_scan() {
        let catalog = Catalog::new();
        let (_parent, _child) = parent_child(&catalog);

        let deps = catalog.dependents_of("Parent");
        assert_eq!(deps.len(), 1);
        assert_eq!(deps[0].handle.type_tag(), "Child");
        assert_eq!(deps[0].fk_columns, vec!["ParentId".to_string()]);
        assert!(catalog.dependents_of("Child").is_empty());
    }

    #[test]
    fn test_dropped_table_disappears() {
        let catalog = Catalog::new();
        let (parent, child) = parent_child(&catalog);
        drop(child);
        assert!(catalog.lookup("Child").is_none());
        drop(parent);
        assert!(catalog.lookup("Parent").is_none());
    }
}
