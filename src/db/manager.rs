//! Database manager.
//!
//! The registry of named databases, owner of the table catalog and the
//! snapshot codec, and enforcer of snapshot retention.

use super::snapshot::{self, SNAPSHOT_SUFFIX};
use super::{Database, PersistenceConfig, RowTypeRegistry};
use crate::catalog::Catalog;
use crate::schema::{RowSchema, TypedRecord};
use crate::table::Table;
use crate::{DynRecord, Result, RowbaseError};
use chrono::Utc;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

pub struct DatabaseManager {
    catalog: Arc<Catalog>,
    databases: RwLock<Vec<Arc<Database>>>,
    configs: DashMap<String, PersistenceConfig>,
    row_types: RowTypeRegistry,
}

impl Default for DatabaseManager {
    fn default() -> Self {
        Self {
            catalog: Catalog::new(),
            databases: RwLock::new(Vec::new()),
            configs: DashMap::new(),
            row_types: RowTypeRegistry::new(),
        }
    }
}

impl DatabaseManager {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    pub fn row_types(&self) -> &RowTypeRegistry {
        &self.row_types
    }

    // ---- databases ----

    /// Create a database, or return the existing one of that name.
    pub fn create_database(&self, name: &str) -> Result<Arc<Database>> {
        let trimmed = name.trim();
        if trimmed.is_empty() {
            return Err(RowbaseError::InvalidArgument(
                "empty database name".to_string(),
            ));
        }
        let mut databases = self.databases.write();
        if let Some(existing) = databases.iter().find(|db| db.name() == trimmed) {
            return Ok(existing.clone());
        }
        debug!(database = trimmed, "creating database");
        let db = Database::new(trimmed, self.catalog.clone());
        databases.push(db.clone());
        Ok(db)
    }

    /// Create a database and register its persistence configuration,
    /// replacing any prior configuration for the same name.
    pub fn create_database_with(&self, config: PersistenceConfig) -> Result<Arc<Database>> {
        config.validate()?;
        let db = self.create_database(&config.database_name)?;
        self.configs.insert(db.name().to_string(), config);
        Ok(db)
    }

    /// The registered persistence configuration for a database, if any.
    pub fn config_for(&self, name: &str) -> Option<PersistenceConfig> {
        self.configs.get(name.trim()).map(|c| c.value().clone())
    }

    /// Remove and dispose a database. Returns whether anything was removed.
    pub fn drop_database(&self, name: &str) -> bool {
        let trimmed = name.trim();
        let mut databases = self.databases.write();
        let Some(idx) = databases.iter().position(|db| db.name() == trimmed) else {
            return false;
        };
        let db = databases.remove(idx);
        db.dispose();
        self.configs.remove(trimmed);
        info!(database = trimmed, "dropped database");
        true
    }

    pub fn exists(&self, name: &str) -> bool {
        let trimmed = name.trim();
        self.databases.read().iter().any(|db| db.name() == trimmed)
    }

    /// Independent snapshot of the database list.
    pub fn databases(&self) -> Vec<Arc<Database>> {
        self.databases.read().to_vec()
    }

    pub fn database_names(&self) -> Vec<String> {
        self.databases
            .read()
            .iter()
            .map(|db| db.name().to_string())
            .collect()
    }

    pub fn get_database(&self, name: &str) -> Result<Arc<Database>> {
        let trimmed = name.trim();
        self.databases
            .read()
            .iter()
            .find(|db| db.name() == trimmed)
            .cloned()
            .ok_or_else(|| RowbaseError::DatabaseNotFound(trimmed.to_string()))
    }

    /// The first database registered, used as the SQL interpreter's
    /// fallback target.
    pub fn first_database(&self) -> Option<Arc<Database>> {
        self.databases.read().first().cloned()
    }

    // ---- tables ----

    /// Create a typed table. The row type is registered so snapshots of it
    /// can be loaded back on this manager.
    pub fn create_table<R: TypedRecord>(
        &self,
        database: &str,
        name: Option<&str>,
    ) -> Result<Arc<Table<R>>> {
        let db = self.get_database(database)?;
        self.row_types.register::<R>();
        db.create_table::<R>(name)
    }

    pub fn get_table<R: TypedRecord>(&self, database: &str, name: &str) -> Result<Arc<Table<R>>> {
        self.get_database(database)?.get_table::<R>(name)
    }

    /// Create a table over a runtime-described schema. Transient tables are
    /// excluded from snapshots.
    pub fn create_dynamic_table(
        &self,
        database: &str,
        name: &str,
        schema: Arc<RowSchema>,
        transient: bool,
    ) -> Result<Arc<Table<DynRecord>>> {
        let db = self.get_database(database)?;
        let table_name = name.trim();
        if table_name.is_empty() {
            return Err(RowbaseError::InvalidArgument(
                "empty table name".to_string(),
            ));
        }
        if db.table(table_name).is_some() {
            return Err(RowbaseError::TableAlreadyExists(table_name.to_string()));
        }
        if !transient {
            self.row_types.register_dynamic(schema.clone());
        }
        let table = Table::dynamic(table_name, schema, transient, Arc::downgrade(&self.catalog));
        db.attach(table.clone());
        Ok(table)
    }

    pub fn drop_table(&self, database: &str, name: &str) -> Result<bool> {
        Ok(self.get_database(database)?.drop_table(name))
    }

    /// Empty every table of a database, keeping the database itself.
    pub fn clear_database(&self, name: &str) -> Result<()> {
        self.get_database(name)?.clear_all_tables();
        Ok(())
    }

    // ---- snapshots ----

    /// Write one database to `path` as gzip-compressed JSON.
    pub fn dump_database(&self, name: &str, path: &Path) -> Result<()> {
        let db = self.get_database(name)?;
        let json = snapshot::database_to_json(&db)?;
        snapshot::write_gzip_json(path, &json)?;
        info!(database = db.name(), path = %path.display(), "dumped database");
        Ok(())
    }

    /// Write a timestamped snapshot into the configured dump directory and
    /// apply retention. Returns the path written. The stamp carries
    /// milliseconds so sub-second intervals produce distinct files instead
    /// of overwriting one another.
    pub fn dump_database_with(&self, config: &PersistenceConfig) -> Result<PathBuf> {
        config.validate()?;
        let file_name = format!(
            "{}_{}{}",
            config.dump_file_prefix,
            Utc::now().format("%Y%m%d_%H%M%S%3f"),
            SNAPSHOT_SUFFIX
        );
        let path = config.dump_directory.join(file_name);
        self.dump_database(&config.database_name, &path)?;
        self.trim_snapshot_history(config)?;
        Ok(path)
    }

    /// Delete the oldest snapshots matching the configured prefix until at
    /// most `max_snapshot_history` remain.
    pub fn trim_snapshot_history(&self, config: &PersistenceConfig) -> Result<usize> {
        snapshot::trim_history(
            &config.dump_directory,
            &config.dump_file_prefix,
            config.max_snapshot_history,
        )
    }

    /// The newest snapshot file for the configured prefix, if any.
    pub fn latest_snapshot(&self, config: &PersistenceConfig) -> Result<Option<PathBuf>> {
        Ok(snapshot::list_snapshots(&config.dump_directory, &config.dump_file_prefix)?
            .into_iter()
            .next())
    }

    /// Create or overwrite a database from a gzip-compressed JSON snapshot.
    pub fn load_database(&self, name: &str, path: &Path) -> Result<Arc<Database>> {
        let json = snapshot::read_gzip_json(path)?;
        let db = self.create_database(name)?;
        snapshot::load_database_json(&db, &self.row_types, &self.catalog, &json)?;
        info!(database = db.name(), path = %path.display(), "loaded database");
        Ok(db)
    }

    /// Write every database to `path` as gzip-compressed JSON.
    pub fn save_all_databases(&self, path: &Path) -> Result<()> {
        let json = self.all_to_json()?;
        snapshot::write_gzip_json(path, &json)
    }

    /// Replace all databases from a gzip-compressed JSON snapshot.
    pub fn load_all_databases(&self, path: &Path) -> Result<()> {
        let json = snapshot::read_gzip_json(path)?;
        self.replace_all_from_json(&json)
    }

    /// Uncompressed JSON of the whole set of databases.
    pub fn serialize_databases(&self) -> Result<String> {
        serde_json::to_string(&self.all_to_json()?)
            .map_err(|e| RowbaseError::Serialization(e.to_string()))
    }

    /// Replace all existing databases with the content of `text`. The swap
    /// is atomic: either every database loads or nothing changes.
    pub fn deserialize_databases(&self, text: &str) -> Result<()> {
        let json: serde_json::Value =
            serde_json::from_str(text).map_err(|e| RowbaseError::Serialization(e.to_string()))?;
        self.replace_all_from_json(&json)
    }

    fn all_to_json(&self) -> Result<serde_json::Value> {
        let mut out = serde_json::Map::new();
        for db in self.databases() {
            out.insert(db.name().to_string(), snapshot::database_to_json(&db)?);
        }
        Ok(serde_json::Value::Object(out))
    }

    fn replace_all_from_json(&self, json: &serde_json::Value) -> Result<()> {
        let object = json.as_object().ok_or_else(|| {
            RowbaseError::Serialization("manager payload is not an object".to_string())
        })?;

        let mut loaded: Vec<Arc<Database>> = Vec::with_capacity(object.len());
        for (name, payload) in object {
            let db = Database::new(name.as_str(), self.catalog.clone());
            snapshot::load_database_json(&db, &self.row_types, &self.catalog, payload)?;
            loaded.push(db);
        }

        let mut databases = self.databases.write();
        for old in databases.drain(..) {
            old.dispose();
        }
        // Dispose above removed the old catalog entries; the freshly loaded
        // tables must be the registered ones.
        for db in &loaded {
            for table in db.tables() {
                self.catalog.register(&table);
            }
        }
        *databases = loaded;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{DataType, Value};
    use crate::record;
    use crate::schema::{ColumnSpec, SchemaBuilder};
    use tempfile::tempdir;

    record! {
        pub struct Account("mgr.Account") {
            id: i32 => Int32 [primary_key auto_increment],
            owner: String => String [required],
            balance: f64 => Decimal,
        }
    }

    fn account(owner: &str, balance: f64) -> Account {
        Account {
            id: 0,
            owner: owner.to_string(),
            balance,
        }
    }

    #[test]
    fn test_create_is_idempotent() {
        let manager = DatabaseManager::new();
        let a = manager.create_database("app").unwrap();
        let b = manager.create_database(" app ").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert!(manager.exists("app"));
        assert_eq!(manager.database_names(), vec!["app".to_string()]);
    }

    #[test]
    fn test_empty_name_rejected() {
        let manager = DatabaseManager::new();
        assert!(matches!(
            manager.create_database("  "),
            Err(RowbaseError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_drop_database() {
        let manager = DatabaseManager::new();
        manager.create_database("app").unwrap();
        manager.create_table::<Account>("app", None).unwrap();
        assert!(manager.catalog().lookup("mgr.Account").is_some());

        assert!(manager.drop_database("app"));
        assert!(!manager.drop_database("app"));
        assert!(!manager.exists("app"));
        assert!(manager.catalog().lookup("mgr.Account").is_none());
    }

    #[test]
    fn test_config_replaced_on_reregistration() {
        let dir = tempdir().unwrap();
        let manager = DatabaseManager::new();
        manager
            .create_database_with(PersistenceConfig::new("app", dir.path()).max_history(3))
            .unwrap();
        manager
            .create_database_with(PersistenceConfig::new("app", dir.path()).max_history(9))
            .unwrap();
        assert_eq!(manager.config_for("app").unwrap().max_snapshot_history, 9);
    }

    #[test]
    fn test_serialize_round_trip() {
        let manager = DatabaseManager::new();
        manager.create_database("app").unwrap();
        let accounts = manager
            .create_table::<Account>("app", Some("Accounts"))
            .unwrap();
        accounts.insert(&account("alice", 10.5)).unwrap();
        accounts.insert(&account("bob", -2.0)).unwrap();

        let text = manager.serialize_databases().unwrap();
        manager.deserialize_databases(&text).unwrap();

        let reloaded = manager.get_table::<Account>("app", "Accounts").unwrap();
        let rows = reloaded.rows();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].owner, "alice");
        assert_eq!(rows[0].id, 1);
        assert_eq!(rows[1].balance, -2.0);

        // Auto-increment continues after the round trip.
        let next = reloaded.insert(&account("carol", 0.0)).unwrap();
        assert_eq!(next.id, 3);
    }

    #[test]
    fn test_dump_and_load_on_fresh_manager() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("app.json.gz");

        let manager = DatabaseManager::new();
        manager.create_database("app").unwrap();
        let accounts = manager
            .create_table::<Account>("app", Some("Accounts"))
            .unwrap();
        accounts.insert(&account("alice", 1.0)).unwrap();
        manager.dump_database("app", &path).unwrap();

        let fresh = DatabaseManager::new();
        fresh.row_types().register::<Account>();
        fresh.load_database("app", &path).unwrap();
        let loaded = fresh.get_table::<Account>("app", "Accounts").unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded.rows()[0].owner, "alice");
    }

    #[test]
    fn test_load_unknown_tag_fails() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("app.json.gz");

        let manager = DatabaseManager::new();
        manager.create_database("app").unwrap();
        manager
            .create_table::<Account>("app", Some("Accounts"))
            .unwrap();
        manager.dump_database("app", &path).unwrap();

        let fresh = DatabaseManager::new();
        let err = fresh.load_database("app", &path).unwrap_err();
        assert!(matches!(err, RowbaseError::SchemaInvalid(_)));
    }

    #[test]
    fn test_transient_tables_skipped_by_snapshots() {
        let manager = DatabaseManager::new();
        manager.create_database("app").unwrap();
        let schema = SchemaBuilder::new("mgr.Scratch")
            .column(ColumnSpec::new("Id", DataType::Int32).primary_key().auto_increment())
            .build()
            .unwrap();
        let scratch = manager
            .create_dynamic_table("app", "Scratch", schema, true)
            .unwrap();
        let row = crate::DynRecord::new(scratch.schema().clone());
        scratch.insert(&row).unwrap();

        let text = manager.serialize_databases().unwrap();
        assert!(!text.contains("Scratch"));

        manager.deserialize_databases(&text).unwrap();
        assert!(manager.get_database("app").unwrap().table("Scratch").is_none());
    }

    #[test]
    fn test_dynamic_persistent_table_round_trips() {
        let manager = DatabaseManager::new();
        manager.create_database("app").unwrap();
        let schema = SchemaBuilder::new("mgr.Metric")
            .column(ColumnSpec::new("Id", DataType::Int32).primary_key().auto_increment())
            .column(ColumnSpec::new("Name", DataType::String).required())
            .build()
            .unwrap();
        let metrics = manager
            .create_dynamic_table("app", "Metrics", schema.clone(), false)
            .unwrap();
        let row = crate::DynRecord::new(schema).with("Name", "latency").unwrap();
        metrics.insert(&row).unwrap();

        let text = manager.serialize_databases().unwrap();
        manager.deserialize_databases(&text).unwrap();

        let table = manager.get_database("app").unwrap().table("Metrics").unwrap();
        let rows = table.rows_as_values();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("Name"), Some(&Value::String("latency".into())));
    }

    #[test]
    fn test_save_and_load_all_databases() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("all.json.gz");

        let manager = DatabaseManager::new();
        manager.create_database("one").unwrap();
        manager.create_database("two").unwrap();
        let accounts = manager
            .create_table::<Account>("one", Some("Accounts"))
            .unwrap();
        accounts.insert(&account("alice", 1.0)).unwrap();
        manager.save_all_databases(&path).unwrap();

        let fresh = DatabaseManager::new();
        fresh.row_types().register::<Account>();
        fresh.create_database("stale").unwrap();
        fresh.load_all_databases(&path).unwrap();

        // The load replaces the whole set.
        assert!(!fresh.exists("stale"));
        assert_eq!(
            fresh.database_names(),
            vec!["one".to_string(), "two".to_string()]
        );
        assert_eq!(fresh.get_table::<Account>("one", "Accounts").unwrap().len(), 1);
    }

    #[test]
    fn test_clear_database_keeps_tables() {
        let manager = DatabaseManager::new();
        manager.create_database("app").unwrap();
        let accounts = manager
            .create_table::<Account>("app", Some("Accounts"))
            .unwrap();
        accounts.insert(&account("alice", 1.0)).unwrap();

        manager.clear_database("app").unwrap();
        assert!(manager.get_table::<Account>("app", "Accounts").unwrap().is_empty());
    }

    #[test]
    fn test_dump_with_config_applies_retention() {
        let dir = tempdir().unwrap();
        let manager = DatabaseManager::new();
        let config = PersistenceConfig::new("app", dir.path()).max_history(2);
        manager.create_database_with(config.clone()).unwrap();
        let accounts = manager
            .create_table::<Account>("app", Some("Accounts"))
            .unwrap();
        accounts.insert(&account("alice", 1.0)).unwrap();

        let mut written = Vec::new();
        for _ in 0..3 {
            written.push(manager.dump_database_with(&config).unwrap());
            std::thread::sleep(std::time::Duration::from_millis(20));
        }

        // The millisecond stamps keep the three files distinct; retention
        // drops only the oldest.
        assert_eq!(written.iter().collect::<std::collections::HashSet<_>>().len(), 3);
        let left = snapshot::list_snapshots(dir.path(), "app").unwrap();
        assert_eq!(left.len(), 2);
        assert!(!written[0].exists());
        assert!(written[1].exists() && written[2].exists());
    }
}
