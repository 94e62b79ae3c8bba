//! Rowbase — an in-process relational database kernel.
//!
//! Keeps every row in memory, enforces schema-first constraints (primary
//! keys, auto-increment, required fields, foreign keys), executes a subset of
//! SQL over those tables, and persists databases as gzip-compressed JSON
//! snapshots that can be reloaded on startup.

pub mod data;
pub mod schema;
pub mod catalog;
pub mod table;
pub mod db;
pub mod query;
pub mod scheduler;
pub mod meta;

// Re-export main types
pub use data::{DataType, Value};
pub use schema::{ColumnSpec, DynRecord, Record, RowSchema, SchemaBuilder, TypedRecord};
pub use catalog::{Catalog, TableHandle};
pub use table::Table;
pub use db::{Database, DatabaseManager, PersistenceConfig};
pub use query::{CancelToken, SqlExecutor, SqlQueue, SqlResult, SqlRow};
pub use scheduler::SnapshotScheduler;

/// Kernel error type
#[derive(Debug, thiserror::Error)]
pub enum RowbaseError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Database not found: {0}")]
    DatabaseNotFound(String),

    #[error("Table not found: {0}")]
    TableNotFound(String),

    #[error("Table already exists: {0}")]
    TableAlreadyExists(String),

    #[error("Invalid schema: {0}")]
    SchemaInvalid(String),

    #[error("Required column missing: {0}")]
    RequiredMissing(String),

    #[error("Duplicate primary key: {0}")]
    DuplicatePrimaryKey(String),

    #[error("Primary key missing: {0}")]
    PrimaryKeyMissing(String),

    #[error("Foreign key violation: {0}")]
    ForeignKeyViolation(String),

    #[error("Referential integrity violation: {0}")]
    ReferentialIntegrity(String),

    #[error("Unsupported command: {0}")]
    UnsupportedCommand(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Request cancelled before execution")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, RowbaseError>;
