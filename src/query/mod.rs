//! SQL parsing and execution.

pub mod executor;
mod queue;
pub mod sql_parser;

pub use executor::{SqlExecutor, SqlResult, SqlRow};
pub use queue::{CancelToken, Pending, SqlQueue};
