//! SQL execution against the table engine.
//!
//! The executor parses a statement and evaluates it through the abstract
//! row interface of the tables in the target database. SELECT is evaluated
//! here; INSERT/UPDATE/DELETE compile into row operations and delegate to
//! the table, which performs every integrity check.

mod dml;
mod expressions;
mod select;

use crate::data::Value;
use crate::db::{Database, DatabaseManager};
use crate::query::sql_parser::{SqlParser, SqlStatement};
use crate::{Result, RowbaseError};
use std::sync::Arc;

/// One projected result row: ordered column/value pairs.
#[derive(Debug, Clone, PartialEq)]
pub struct SqlRow {
    cells: Vec<(String, Value)>,
}

impl SqlRow {
    pub(crate) fn new(cells: Vec<(String, Value)>) -> Self {
        Self { cells }
    }

    /// Case-insensitive column lookup.
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.cells
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(column))
            .map(|(_, value)| value)
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.cells.iter().map(|(name, _)| name.as_str())
    }

    pub fn values(&self) -> impl Iterator<Item = &Value> {
        self.cells.iter().map(|(_, value)| value)
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}

/// Outcome of one statement.
#[derive(Debug, Clone)]
pub struct SqlResult {
    /// Present only for SELECT.
    pub rows: Option<Vec<SqlRow>>,
    pub affected_rows: usize,
    pub is_query: bool,
}

impl SqlResult {
    pub(crate) fn query(rows: Vec<SqlRow>) -> Self {
        Self {
            affected_rows: rows.len(),
            rows: Some(rows),
            is_query: true,
        }
    }

    pub(crate) fn affected(count: usize) -> Self {
        Self {
            rows: None,
            affected_rows: count,
            is_query: false,
        }
    }
}

/// SQL interpreter bound to a database manager.
pub struct SqlExecutor {
    manager: Arc<DatabaseManager>,
    default_database: Option<String>,
}

impl SqlExecutor {
    pub fn new(manager: Arc<DatabaseManager>) -> Self {
        Self {
            manager,
            default_database: None,
        }
    }

    pub fn with_default(manager: Arc<DatabaseManager>, database: impl Into<String>) -> Self {
        Self {
            manager,
            default_database: Some(database.into()),
        }
    }

    pub fn set_default_database(&mut self, database: impl Into<String>) {
        self.default_database = Some(database.into());
    }

    /// Execute against the default target (the configured default database,
    /// else the first database registered in the manager).
    pub fn execute(&self, sql: &str) -> Result<SqlResult> {
        self.execute_on(None, sql)
    }

    /// Execute against a named database.
    pub fn execute_on(&self, database: Option<&str>, sql: &str) -> Result<SqlResult> {
        let db = self.resolve_database(database)?;
        let statement = SqlParser::parse(sql)?;
        match statement {
            SqlStatement::Select(select) => select::execute_select(&db, &select),
            SqlStatement::Insert {
                table,
                columns,
                values,
            } => dml::execute_insert(&db, &table, &columns, &values),
            SqlStatement::Update {
                table,
                assignments,
                where_clause,
            } => dml::execute_update(&db, &table, &assignments, where_clause.as_ref()),
            SqlStatement::Delete {
                table,
                where_clause,
            } => dml::execute_delete(&db, &table, where_clause.as_ref()),
        }
    }

    fn resolve_database(&self, explicit: Option<&str>) -> Result<Arc<Database>> {
        if let Some(name) = explicit {
            return self.manager.get_database(name);
        }
        if let Some(name) = &self.default_database {
            return self.manager.get_database(name);
        }
        self.manager
            .first_database()
            .ok_or_else(|| RowbaseError::DatabaseNotFound("no database registered".to_string()))
    }
}
