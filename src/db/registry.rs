//! Row-type registry.
//!
//! Snapshots identify row types by an opaque, stable tag string. This
//! registry maps each tag back to its schema and a factory for rebuilding a
//! table of that type on load. Loading a snapshot requires the same
//! registrations as when it was written; Rust type names never reach disk.

use crate::catalog::{Catalog, TableHandle};
use crate::schema::RowSchema;
use crate::table::Table;
use crate::TypedRecord;
use dashmap::DashMap;
use std::sync::{Arc, Weak};

type TableFactory = Arc<dyn Fn(&str, Weak<Catalog>) -> Arc<dyn TableHandle> + Send + Sync>;

/// One registered row type: its schema and how to build a table for it.
#[derive(Clone)]
pub struct RowTypeDef {
    pub schema: Arc<RowSchema>,
    make: TableFactory,
}

impl RowTypeDef {
    pub fn make_table(&self, name: &str, catalog: Weak<Catalog>) -> Arc<dyn TableHandle> {
        (self.make)(name, catalog)
    }
}

/// Tag → row-type definition.
#[derive(Default)]
pub struct RowTypeRegistry {
    defs: DashMap<String, RowTypeDef>,
}

impl RowTypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a compile-time row type under its declared tag.
    pub fn register<R: TypedRecord>(&self) {
        let def = RowTypeDef {
            schema: R::schema(),
            make: Arc::new(|name, catalog| -> Arc<dyn TableHandle> {
                Table::<R>::typed(name, catalog)
            }),
        };
        self.defs.insert(R::type_tag().to_string(), def);
    }

    /// Register a runtime-described row type under its schema tag. Tables
    /// built from it hold `DynRecord` rows and are included in snapshots.
    pub fn register_dynamic(&self, schema: Arc<RowSchema>) {
        let tag = schema.type_tag().to_string();
        let def = RowTypeDef {
            schema: schema.clone(),
            make: Arc::new(move |name, catalog| -> Arc<dyn TableHandle> {
                Table::dynamic(name, schema.clone(), false, catalog)
            }),
        };
        self.defs.insert(tag, def);
    }

    pub fn resolve(&self, tag: &str) -> Option<RowTypeDef> {
        self.defs.get(tag).map(|def| def.value().clone())
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.defs.contains_key(tag)
    }
}
