//! Databases and the database manager.

mod config;
mod manager;
mod registry;
pub(crate) mod snapshot;

pub use config::PersistenceConfig;
pub use manager::DatabaseManager;
pub use registry::{RowTypeDef, RowTypeRegistry};

use crate::catalog::{Catalog, TableHandle};
use crate::schema::TypedRecord;
use crate::table::Table;
use crate::{Result, RowbaseError};
use parking_lot::RwLock;
use std::sync::Arc;

/// A named, ordered collection of tables.
///
/// Table names compare byte-exact after trimming surrounding whitespace.
pub struct Database {
    name: String,
    catalog: Arc<Catalog>,
    tables: RwLock<Vec<Arc<dyn TableHandle>>>,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database").field("name", &self.name).finish()
    }
}

impl Database {
    pub(crate) fn new(name: impl Into<String>, catalog: Arc<Catalog>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into().trim().to_string(),
            catalog,
            tables: RwLock::new(Vec::new()),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Create a table for a compile-time row type. The table name defaults
    /// to the row type's tag.
    pub fn create_table<R: TypedRecord>(&self, name: Option<&str>) -> Result<Arc<Table<R>>> {
        let table_name = name.unwrap_or_else(|| R::type_tag()).trim().to_string();
        if table_name.is_empty() {
            return Err(RowbaseError::InvalidArgument(
                "empty table name".to_string(),
            ));
        }
        let mut tables = self.tables.write();
        if tables.iter().any(|t| t.name() == table_name) {
            return Err(RowbaseError::TableAlreadyExists(table_name));
        }
        let table = Table::<R>::typed(table_name, Arc::downgrade(&self.catalog));
        let handle: Arc<dyn TableHandle> = table.clone();
        self.catalog.register(&handle);
        tables.push(handle);
        Ok(table)
    }

    /// Look up a typed table by name. Fails when the name is absent or the
    /// stored table holds a different row type.
    pub fn get_table<R: TypedRecord>(&self, name: &str) -> Result<Arc<Table<R>>> {
        let trimmed = name.trim();
        let handle = self
            .table(trimmed)
            .ok_or_else(|| RowbaseError::TableNotFound(trimmed.to_string()))?;
        handle
            .as_any_arc()
            .downcast::<Table<R>>()
            .map_err(|_| {
                RowbaseError::TableNotFound(format!(
                    "{} (stored row type is not {})",
                    trimmed,
                    R::type_tag()
                ))
            })
    }

    /// The table handle with this name, if any.
    pub fn table(&self, name: &str) -> Option<Arc<dyn TableHandle>> {
        let trimmed = name.trim();
        self.tables
            .read()
            .iter()
            .find(|t| t.name() == trimmed)
            .cloned()
    }

    /// Install a pre-built table handle, replacing any table of the same
    /// name. Used by the snapshot loader and the metadata bootstrap.
    pub fn attach(&self, handle: Arc<dyn TableHandle>) {
        let mut tables = self.tables.write();
        if let Some(existing) = tables.iter().position(|t| t.name() == handle.name()) {
            let old = tables.remove(existing);
            self.catalog.remove(old.type_tag());
            self.catalog.register(&handle);
            tables.insert(existing, handle);
        } else {
            self.catalog.register(&handle);
            tables.push(handle);
        }
    }

    /// Remove every table of that name. Returns whether anything was
    /// removed.
    pub fn drop_table(&self, name: &str) -> bool {
        let trimmed = name.trim();
        let mut tables = self.tables.write();
        let before = tables.len();
        tables.retain(|t| {
            if t.name() == trimmed {
                self.catalog.remove(t.type_tag());
                false
            } else {
                true
            }
        });
        tables.len() != before
    }

    /// Empty every table, keeping the tables themselves.
    pub fn clear_all_tables(&self) {
        for table in self.tables.read().iter() {
            table.clear_all();
        }
    }

    /// Snapshot of the table list, in creation order.
    pub fn tables(&self) -> Vec<Arc<dyn TableHandle>> {
        self.tables.read().to_vec()
    }

    pub fn table_names(&self) -> Vec<String> {
        self.tables
            .read()
            .iter()
            .map(|t| t.name().to_string())
            .collect()
    }

    /// Detach every table and drop the catalog entries. Called when the
    /// database is removed from the manager.
    pub(crate) fn dispose(&self) {
        let mut tables = self.tables.write();
        for table in tables.drain(..) {
            self.catalog.remove(table.type_tag());
        }
    }
}
