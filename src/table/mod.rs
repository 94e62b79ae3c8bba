//! Table engine.
//!
//! Row storage for one row type with primary-key indexing, auto-increment
//! allocation, required-field validation, and cross-table referential
//! integrity, behind one reader/writer lock per table.

#[allow(clippy::module_inception)]
mod table;

pub use table::Table;
