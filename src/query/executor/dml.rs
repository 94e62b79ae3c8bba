//! INSERT / UPDATE / DELETE execution.
//!
//! Literals convert to the target column's logical type here; every
//! integrity check (required, primary key, foreign keys, referential
//! integrity) happens inside the table operation the statement compiles
//! into. Affected counts come from the table.

use super::expressions::{eval, truthy, validate_expr, RowContext};
use super::SqlResult;
use crate::catalog::{RowAssignments, RowPredicate, TableHandle, ValueRow};
use crate::data::Value;
use crate::db::Database;
use crate::query::sql_parser::SqlExpr;
use crate::schema::RowSchema;
use crate::{Result, RowbaseError};
use std::sync::Arc;

pub(crate) fn execute_insert(
    db: &Database,
    table: &str,
    columns: &[String],
    values: &[Value],
) -> Result<SqlResult> {
    let handle = resolve_table(db, table)?;
    let schema = handle.schema();

    let mut row = ValueRow::with_capacity(columns.len());
    for (column, literal) in columns.iter().zip(values) {
        let spec = schema.column_ci(column).ok_or_else(|| {
            RowbaseError::InvalidArgument(format!("unknown column {} in INSERT", column))
        })?;
        if row.contains_key(&spec.name) {
            return Err(RowbaseError::InvalidArgument(format!(
                "column {} listed twice in INSERT",
                spec.name
            )));
        }
        row.insert(spec.name.clone(), literal.coerce_to(spec.data_type)?);
    }

    handle.insert_values(row)?;
    Ok(SqlResult::affected(1))
}

pub(crate) fn execute_update(
    db: &Database,
    table: &str,
    assignments: &[(String, SqlExpr)],
    where_clause: Option<&SqlExpr>,
) -> Result<SqlResult> {
    let handle = resolve_table(db, table)?;
    let schema = handle.schema();
    let binding = binding_of(&handle, &schema);

    // Resolve assignment targets and validate value expressions up front.
    let mut compiled: Vec<(String, crate::data::DataType, SqlExpr)> = Vec::new();
    for (column, expr) in assignments {
        let spec = schema.column_ci(column).ok_or_else(|| {
            RowbaseError::InvalidArgument(format!("unknown column {} in SET", column))
        })?;
        validate_expr(expr, &binding)?;
        compiled.push((spec.name.clone(), spec.data_type, expr.clone()));
    }
    let predicate = compile_predicate(where_clause, &binding)?;

    let binding_name = binding[0].0.clone();
    let assignments: RowAssignments = Arc::new(move |row: &ValueRow| {
        let ctx = RowContext::single(&binding_name, row.clone());
        let mut out = Vec::with_capacity(compiled.len());
        for (column, data_type, expr) in &compiled {
            let value = eval(expr, &ctx)?.coerce_to(*data_type)?;
            out.push((column.clone(), value));
        }
        Ok(out)
    });

    let affected = handle.update_values(predicate, assignments)?;
    Ok(SqlResult::affected(affected))
}

pub(crate) fn execute_delete(
    db: &Database,
    table: &str,
    where_clause: Option<&SqlExpr>,
) -> Result<SqlResult> {
    let handle = resolve_table(db, table)?;
    let schema = handle.schema();
    let binding = binding_of(&handle, &schema);
    let predicate = compile_predicate(where_clause, &binding)?;
    let affected = handle.delete_values(predicate)?;
    Ok(SqlResult::affected(affected))
}

fn resolve_table(db: &Database, name: &str) -> Result<Arc<dyn TableHandle>> {
    db.table(name)
        .ok_or_else(|| RowbaseError::TableNotFound(name.trim().to_string()))
}

fn binding_of(
    handle: &Arc<dyn TableHandle>,
    schema: &Arc<RowSchema>,
) -> Vec<(String, Arc<RowSchema>)> {
    vec![(handle.name().to_lowercase(), schema.clone())]
}

/// Compile a WHERE clause into a row predicate. The expression is validated
/// once here; evaluation failures on individual rows read as non-matches.
fn compile_predicate(
    where_clause: Option<&SqlExpr>,
    binding: &[(String, Arc<RowSchema>)],
) -> Result<RowPredicate> {
    let Some(expr) = where_clause else {
        return Ok(Arc::new(|_| true));
    };
    validate_expr(expr, binding)?;
    let expr = expr.clone();
    let binding_name = binding[0].0.clone();
    Ok(Arc::new(move |row: &ValueRow| {
        let ctx = RowContext::single(&binding_name, row.clone());
        eval(&expr, &ctx).map(|v| truthy(&v)).unwrap_or(false)
    }))
}
