//! SELECT evaluation.
//!
//! The pipeline follows the statement shape: build one context per FROM row,
//! fold each JOIN in with a hash lookup of the joined table, filter with
//! WHERE, bucket for GROUP BY, project (applying aggregates within each
//! bucket), then ORDER BY and LIMIT/OFFSET over the projected rows.

use super::expressions::{eval, map_get_ci, truthy, validate_column, validate_expr, RowContext};
use super::{SqlResult, SqlRow};
use crate::catalog::{TableHandle, ValueRow};
use crate::data::Value;
use crate::db::Database;
use crate::query::sql_parser::{
    AggregateFunc, JoinClause, JoinType, OrderByClause, QualifiedName, SelectColumn,
    SelectStatement, SqlExpr,
};
use crate::schema::RowSchema;
use crate::{Result, RowbaseError};
use ahash::AHashMap;
use std::cmp::Ordering;
use std::sync::Arc;

pub(crate) fn execute_select(db: &Database, stmt: &SelectStatement) -> Result<SqlResult> {
    let from_table = resolve_table(db, &stmt.from.table)?;
    let from_binding = stmt.from.binding().to_lowercase();

    // Tables in scope, in join order; flat column order for SELECT *.
    let mut bindings: Vec<(String, Arc<RowSchema>)> =
        vec![(from_binding.clone(), from_table.schema())];
    let mut flat_order: Vec<String> = from_table
        .schema()
        .columns()
        .iter()
        .map(|c| c.name.clone())
        .collect();

    let mut contexts: Vec<RowContext> = from_table
        .rows_as_values()
        .into_iter()
        .map(|row| RowContext::single(&from_binding, row))
        .collect();

    for join in &stmt.joins {
        let right_table = resolve_table(db, &join.table.table)?;
        let right_binding = join.table.binding().to_lowercase();
        if bindings.iter().any(|(b, _)| *b == right_binding) {
            return Err(RowbaseError::InvalidArgument(format!(
                "duplicate table alias {}",
                join.table.binding()
            )));
        }
        contexts = apply_join(contexts, &bindings, join, &right_table, &right_binding)?;
        for column in right_table.schema().columns() {
            if !flat_order.iter().any(|n| n.eq_ignore_ascii_case(&column.name)) {
                flat_order.push(column.name.clone());
            }
        }
        bindings.push((right_binding, right_table.schema()));
    }

    if let Some(where_clause) = &stmt.where_clause {
        validate_expr(where_clause, &bindings)?;
        let mut filtered = Vec::with_capacity(contexts.len());
        for ctx in contexts {
            if truthy(&eval(where_clause, &ctx)?) {
                filtered.push(ctx);
            }
        }
        contexts = filtered;
    }

    for expr in &stmt.group_by {
        validate_expr(expr, &bindings)?;
    }
    for column in &stmt.columns {
        match column {
            SelectColumn::All => {}
            SelectColumn::Expr { expr, .. } => validate_expr(expr, &bindings)?,
            SelectColumn::Aggregate { arg: Some(expr), .. } => validate_expr(expr, &bindings)?,
            SelectColumn::Aggregate { arg: None, .. } => {}
        }
    }

    let labels = projection_labels(&stmt.columns, &flat_order);

    let has_aggregates = stmt
        .columns
        .iter()
        .any(|c| matches!(c, SelectColumn::Aggregate { .. }));

    // Each projected row keeps a representative context for ORDER BY
    // fallback resolution.
    let mut projected: Vec<(SqlRow, Option<RowContext>)> = Vec::new();
    if has_aggregates || !stmt.group_by.is_empty() {
        for bucket in bucket_contexts(contexts, &stmt.group_by)? {
            let row = project_bucket(&stmt.columns, &flat_order, &bucket)?;
            projected.push((row, bucket.into_iter().next()));
        }
    } else {
        for ctx in contexts {
            let row = project_context(&stmt.columns, &flat_order, &ctx)?;
            projected.push((row, Some(ctx)));
        }
    }

    if !stmt.order_by.is_empty() {
        order_rows(&mut projected, &stmt.order_by, &labels, &bindings)?;
    }

    let rows: Vec<SqlRow> = projected
        .into_iter()
        .map(|(row, _)| row)
        .skip(stmt.offset.unwrap_or(0))
        .take(stmt.limit.unwrap_or(usize::MAX))
        .collect();
    Ok(SqlResult::query(rows))
}

fn resolve_table(db: &Database, name: &str) -> Result<Arc<dyn TableHandle>> {
    db.table(name)
        .ok_or_else(|| RowbaseError::TableNotFound(name.trim().to_string()))
}

/// Fold one JOIN into the accumulated contexts.
fn apply_join(
    contexts: Vec<RowContext>,
    bindings: &[(String, Arc<RowSchema>)],
    join: &JoinClause,
    right_table: &Arc<dyn TableHandle>,
    right_binding: &str,
) -> Result<Vec<RowContext>> {
    let right_schema = right_table.schema();
    let (left_key, right_key) = orient_join_keys(join, right_binding, &right_schema)?;
    validate_column(&left_key, bindings)?;
    let right_column = right_schema
        .column_ci(&right_key.name)
        .ok_or_else(|| {
            RowbaseError::InvalidArgument(format!("unknown column {}", right_key))
        })?
        .name
        .clone();

    // Hash the right side on its join key.
    let mut lookup: AHashMap<Value, Vec<ValueRow>> = AHashMap::new();
    for row in right_table.rows_as_values() {
        let Some(key) = row.get(&right_column) else { continue };
        if key.is_null() {
            continue;
        }
        lookup.entry(key.key_form()).or_default().push(row);
    }

    let mut out = Vec::with_capacity(contexts.len());
    for ctx in contexts {
        let left_value = eval(&SqlExpr::Column(left_key.clone()), &ctx)?;
        let matches = if left_value.is_null() {
            None
        } else {
            lookup.get(&left_value.key_form())
        };
        match matches {
            Some(rows) => {
                for row in rows {
                    out.push(extend_context(&ctx, right_binding, row.clone()));
                }
            }
            None => match join.join_type {
                JoinType::Inner => {}
                JoinType::Left => {
                    let mut null_row = ValueRow::with_capacity(right_schema.columns().len());
                    for column in right_schema.columns() {
                        null_row.insert(column.name.clone(), Value::Null);
                    }
                    out.push(extend_context(&ctx, right_binding, null_row));
                }
            },
        }
    }
    Ok(out)
}

/// Figure out which side of `ON a = b` belongs to the joined table.
fn orient_join_keys(
    join: &JoinClause,
    right_binding: &str,
    right_schema: &Arc<RowSchema>,
) -> Result<(QualifiedName, QualifiedName)> {
    let names = [&join.on_left, &join.on_right];
    for (i, candidate) in names.iter().enumerate() {
        let is_right = match &candidate.qualifier {
            Some(q) => q.eq_ignore_ascii_case(right_binding),
            None => right_schema.column_ci(&candidate.name).is_some(),
        };
        if is_right {
            let other = names[1 - i];
            return Ok((other.clone(), (*candidate).clone()));
        }
    }
    Err(RowbaseError::InvalidArgument(format!(
        "JOIN ON {} = {} does not reference the joined table {}",
        join.on_left, join.on_right, join.table.table
    )))
}

fn extend_context(ctx: &RowContext, right_binding: &str, row: ValueRow) -> RowContext {
    let mut next = ctx.clone();
    for (name, value) in &row {
        if map_get_ci(&next.flat, name).is_none() {
            next.flat.insert(name.clone(), value.clone());
        }
    }
    next.aliases.insert(right_binding.to_lowercase(), row);
    next
}

/// Bucket contexts by the GROUP BY key, preserving first-seen order. With no
/// GROUP BY (aggregates only), everything lands in one bucket.
fn bucket_contexts(
    contexts: Vec<RowContext>,
    group_by: &[SqlExpr],
) -> Result<Vec<Vec<RowContext>>> {
    if group_by.is_empty() {
        return Ok(vec![contexts]);
    }
    let mut order: Vec<Vec<RowContext>> = Vec::new();
    let mut index: AHashMap<Vec<Value>, usize> = AHashMap::new();
    for ctx in contexts {
        let mut key = Vec::with_capacity(group_by.len());
        for expr in group_by {
            key.push(eval(expr, &ctx)?.key_form());
        }
        match index.get(&key) {
            Some(&i) => order[i].push(ctx),
            None => {
                index.insert(key, order.len());
                order.push(vec![ctx]);
            }
        }
    }
    Ok(order)
}

/// Column labels of the projected rows, used for ORDER BY alias resolution.
fn projection_labels(columns: &[SelectColumn], flat_order: &[String]) -> Vec<String> {
    let mut labels = Vec::new();
    for (i, column) in columns.iter().enumerate() {
        match column {
            SelectColumn::All => labels.extend(flat_order.iter().cloned()),
            SelectColumn::Expr { expr, alias } => labels.push(expr_label(expr, alias, i)),
            SelectColumn::Aggregate { func, alias, .. } => labels.push(
                alias
                    .clone()
                    .unwrap_or_else(|| func.to_string()),
            ),
        }
    }
    labels
}

fn expr_label(expr: &SqlExpr, alias: &Option<String>, index: usize) -> String {
    if let Some(alias) = alias {
        return alias.clone();
    }
    match expr {
        SqlExpr::Column(qname) => qname.name.clone(),
        _ => format!("col{}", index + 1),
    }
}

fn project_context(
    columns: &[SelectColumn],
    flat_order: &[String],
    ctx: &RowContext,
) -> Result<SqlRow> {
    let mut cells = Vec::new();
    for (i, column) in columns.iter().enumerate() {
        match column {
            SelectColumn::All => {
                for name in flat_order {
                    let value = map_get_ci(&ctx.flat, name).cloned().unwrap_or(Value::Null);
                    cells.push((name.clone(), value));
                }
            }
            SelectColumn::Expr { expr, alias } => {
                cells.push((expr_label(expr, alias, i), eval(expr, ctx)?));
            }
            SelectColumn::Aggregate { .. } => {
                return Err(RowbaseError::InvalidArgument(
                    "aggregate outside GROUP BY context".to_string(),
                ))
            }
        }
    }
    Ok(SqlRow::new(cells))
}

fn project_bucket(
    columns: &[SelectColumn],
    flat_order: &[String],
    bucket: &[RowContext],
) -> Result<SqlRow> {
    let representative = bucket.first();
    let mut cells = Vec::new();
    for (i, column) in columns.iter().enumerate() {
        match column {
            SelectColumn::All => {
                for name in flat_order {
                    let value = representative
                        .and_then(|ctx| map_get_ci(&ctx.flat, name).cloned())
                        .unwrap_or(Value::Null);
                    cells.push((name.clone(), value));
                }
            }
            SelectColumn::Expr { expr, alias } => {
                let value = match representative {
                    Some(ctx) => eval(expr, ctx)?,
                    None => Value::Null,
                };
                cells.push((expr_label(expr, alias, i), value));
            }
            SelectColumn::Aggregate { func, arg, alias } => {
                let label = alias.clone().unwrap_or_else(|| func.to_string());
                cells.push((label, aggregate(*func, arg.as_ref(), bucket)?));
            }
        }
    }
    Ok(SqlRow::new(cells))
}

fn aggregate(
    func: AggregateFunc,
    arg: Option<&SqlExpr>,
    bucket: &[RowContext],
) -> Result<Value> {
    let values = match arg {
        None => {
            // COUNT(*)
            return Ok(Value::Int64(bucket.len() as i64));
        }
        Some(expr) => {
            let mut out = Vec::with_capacity(bucket.len());
            for ctx in bucket {
                let value = eval(expr, ctx)?;
                if !value.is_null() {
                    out.push(value);
                }
            }
            out
        }
    };

    match func {
        AggregateFunc::Count => Ok(Value::Int64(values.len() as i64)),
        AggregateFunc::Sum | AggregateFunc::Avg => {
            if values.is_empty() {
                return Ok(Value::Null);
            }
            let mut sum = 0.0;
            for value in &values {
                sum += value.as_numeric().ok_or_else(|| {
                    RowbaseError::InvalidArgument(format!("{} over non-numeric value", func))
                })?;
            }
            if func == AggregateFunc::Avg {
                Ok(Value::Decimal(sum / values.len() as f64))
            } else {
                Ok(Value::Decimal(sum))
            }
        }
        AggregateFunc::Min | AggregateFunc::Max => {
            let mut best: Option<Value> = None;
            for value in values {
                best = Some(match best {
                    None => value,
                    Some(current) => {
                        let keep_new = match value.compare(&current) {
                            Some(Ordering::Less) => func == AggregateFunc::Min,
                            Some(Ordering::Greater) => func == AggregateFunc::Max,
                            _ => false,
                        };
                        if keep_new {
                            value
                        } else {
                            current
                        }
                    }
                });
            }
            Ok(best.unwrap_or(Value::Null))
        }
    }
}

/// Sort projected rows. ORDER BY expressions resolve against the projected
/// row first (aliases win), falling back to the row's source context.
fn order_rows(
    rows: &mut [(SqlRow, Option<RowContext>)],
    order_by: &[OrderByClause],
    labels: &[String],
    bindings: &[(String, Arc<RowSchema>)],
) -> Result<()> {
    // Validate context-resolved order keys up front, so a bad identifier
    // fails even on an empty result.
    for clause in order_by {
        let projected = matches!(
            &clause.expr,
            SqlExpr::Column(QualifiedName { qualifier: None, name })
                if labels.iter().any(|l| l.eq_ignore_ascii_case(name))
        );
        if !projected {
            validate_expr(&clause.expr, bindings)?;
        }
    }

    let mut keyed: Vec<(Vec<Value>, usize)> = Vec::with_capacity(rows.len());
    for (i, (row, ctx)) in rows.iter().enumerate() {
        let mut keys = Vec::with_capacity(order_by.len());
        for clause in order_by {
            keys.push(order_key(&clause.expr, row, ctx.as_ref())?);
        }
        keyed.push((keys, i));
    }

    keyed.sort_by(|(a, _), (b, _)| {
        for (clause, (lhs, rhs)) in order_by.iter().zip(a.iter().zip(b.iter())) {
            let mut ord = lhs.sort_cmp(rhs);
            if clause.descending {
                ord = ord.reverse();
            }
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    });

    let reordered: Vec<(SqlRow, Option<RowContext>)> = keyed
        .iter()
        .map(|&(_, i)| rows[i].clone())
        .collect();
    for (slot, row) in rows.iter_mut().zip(reordered) {
        *slot = row;
    }
    Ok(())
}

fn order_key(expr: &SqlExpr, row: &SqlRow, ctx: Option<&RowContext>) -> Result<Value> {
    if let SqlExpr::Column(QualifiedName { qualifier: None, name }) = expr {
        if let Some(value) = row.get(name) {
            return Ok(value.clone());
        }
    }
    match ctx {
        Some(ctx) => eval(expr, ctx),
        None => Ok(Value::Null),
    }
}
