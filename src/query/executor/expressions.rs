//! Expression evaluation over row contexts.
//!
//! A context is the per-row environment identifiers resolve against: one row
//! map per table alias, plus the flat column names of every table in scope.
//! Resolution is case-insensitive. NULL on either side of a comparison
//! yields false; only IS NULL / IS NOT NULL see nulls.

use crate::catalog::ValueRow;
use crate::data::Value;
use crate::query::sql_parser::{BinaryOperator, QualifiedName, SqlExpr};
use crate::schema::RowSchema;
use crate::{Result, RowbaseError};
use ahash::AHashMap;
use std::cmp::Ordering;
use std::sync::Arc;

/// The environment one row of evaluation sees.
#[derive(Debug, Clone)]
pub(crate) struct RowContext {
    /// Lowercased alias → that table's row.
    pub aliases: AHashMap<String, ValueRow>,
    /// Flat column name → value; on name collisions the FROM table wins.
    pub flat: ValueRow,
}

impl RowContext {
    pub fn single(binding: &str, row: ValueRow) -> Self {
        let mut aliases = AHashMap::with_capacity(1);
        aliases.insert(binding.to_lowercase(), row.clone());
        Self { aliases, flat: row }
    }
}

/// Case-insensitive lookup in a row map.
pub(crate) fn map_get_ci<'a>(map: &'a ValueRow, name: &str) -> Option<&'a Value> {
    map.get(name).or_else(|| {
        map.iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value)
    })
}

fn resolve(ctx: &RowContext, qname: &QualifiedName) -> Result<Value> {
    match &qname.qualifier {
        Some(qualifier) => {
            let row = ctx.aliases.get(&qualifier.to_lowercase()).ok_or_else(|| {
                RowbaseError::InvalidArgument(format!("unknown table alias {}", qualifier))
            })?;
            map_get_ci(row, &qname.name).cloned().ok_or_else(|| {
                RowbaseError::InvalidArgument(format!("unknown column {}", qname))
            })
        }
        None => map_get_ci(&ctx.flat, &qname.name).cloned().ok_or_else(|| {
            RowbaseError::InvalidArgument(format!("unknown column {}", qname.name))
        }),
    }
}

pub(crate) fn truthy(value: &Value) -> bool {
    matches!(value, Value::Bool(true))
}

pub(crate) fn eval(expr: &SqlExpr, ctx: &RowContext) -> Result<Value> {
    match expr {
        SqlExpr::Column(qname) => resolve(ctx, qname),
        SqlExpr::Literal(value) => Ok(value.clone()),
        SqlExpr::Not(inner) => {
            let value = eval(inner, ctx)?;
            Ok(Value::Bool(!truthy(&value)))
        }
        SqlExpr::IsNull { expr, negated } => {
            let value = eval(expr, ctx)?;
            Ok(Value::Bool(value.is_null() != *negated))
        }
        SqlExpr::Binary { left, op, right } => match op {
            BinaryOperator::And => {
                if !truthy(&eval(left, ctx)?) {
                    return Ok(Value::Bool(false));
                }
                Ok(Value::Bool(truthy(&eval(right, ctx)?)))
            }
            BinaryOperator::Or => {
                if truthy(&eval(left, ctx)?) {
                    return Ok(Value::Bool(true));
                }
                Ok(Value::Bool(truthy(&eval(right, ctx)?)))
            }
            BinaryOperator::Eq
            | BinaryOperator::NotEq
            | BinaryOperator::Lt
            | BinaryOperator::Le
            | BinaryOperator::Gt
            | BinaryOperator::Ge => {
                let lhs = eval(left, ctx)?;
                let rhs = eval(right, ctx)?;
                Ok(Value::Bool(compare_op(&lhs, &rhs, *op)))
            }
            BinaryOperator::Add | BinaryOperator::Sub | BinaryOperator::Mul | BinaryOperator::Div => {
                arithmetic(&eval(left, ctx)?, &eval(right, ctx)?, *op)
            }
        },
    }
}

fn compare_op(lhs: &Value, rhs: &Value, op: BinaryOperator) -> bool {
    if lhs.is_null() || rhs.is_null() {
        return false;
    }
    match lhs.compare(rhs) {
        Some(ord) => match op {
            BinaryOperator::Eq => ord == Ordering::Equal,
            BinaryOperator::NotEq => ord != Ordering::Equal,
            BinaryOperator::Lt => ord == Ordering::Less,
            BinaryOperator::Le => ord != Ordering::Greater,
            BinaryOperator::Gt => ord == Ordering::Greater,
            BinaryOperator::Ge => ord != Ordering::Less,
            _ => false,
        },
        // Incomparable types are never equal
        None => op == BinaryOperator::NotEq,
    }
}

fn arithmetic(lhs: &Value, rhs: &Value, op: BinaryOperator) -> Result<Value> {
    if lhs.is_null() || rhs.is_null() {
        return Ok(Value::Null);
    }
    if op != BinaryOperator::Div {
        if let (Some(a), Some(b)) = (lhs.as_integer(), rhs.as_integer()) {
            let result = match op {
                BinaryOperator::Add => a.checked_add(b),
                BinaryOperator::Sub => a.checked_sub(b),
                BinaryOperator::Mul => a.checked_mul(b),
                _ => None,
            };
            return result.map(Value::Int64).ok_or_else(|| {
                RowbaseError::InvalidArgument("integer overflow in expression".to_string())
            });
        }
    }
    let (Some(a), Some(b)) = (lhs.as_numeric(), rhs.as_numeric()) else {
        return Err(RowbaseError::InvalidArgument(format!(
            "cannot apply arithmetic to {} and {}",
            lhs, rhs
        )));
    };
    let result = match op {
        BinaryOperator::Add => a + b,
        BinaryOperator::Sub => a - b,
        BinaryOperator::Mul => a * b,
        BinaryOperator::Div => {
            if b == 0.0 {
                return Err(RowbaseError::InvalidArgument("division by zero".to_string()));
            }
            a / b
        }
        _ => unreachable!("non-arithmetic operator"),
    };
    Ok(Value::Decimal(result))
}

/// Check every column reference in an expression against the tables in
/// scope, so malformed identifiers fail the statement instead of silently
/// matching nothing. `bindings` pairs each lowercased alias with its schema.
pub(crate) fn validate_expr(
    expr: &SqlExpr,
    bindings: &[(String, Arc<RowSchema>)],
) -> Result<()> {
    match expr {
        SqlExpr::Column(qname) => validate_column(qname, bindings),
        SqlExpr::Literal(_) => Ok(()),
        SqlExpr::Not(inner) => validate_expr(inner, bindings),
        SqlExpr::IsNull { expr, .. } => validate_expr(expr, bindings),
        SqlExpr::Binary { left, right, .. } => {
            validate_expr(left, bindings)?;
            validate_expr(right, bindings)
        }
    }
}

pub(crate) fn validate_column(
    qname: &QualifiedName,
    bindings: &[(String, Arc<RowSchema>)],
) -> Result<()> {
    match &qname.qualifier {
        Some(qualifier) => {
            let lowered = qualifier.to_lowercase();
            let (_, schema) = bindings
                .iter()
                .find(|(binding, _)| *binding == lowered)
                .ok_or_else(|| {
                    RowbaseError::InvalidArgument(format!("unknown table alias {}", qualifier))
                })?;
            schema.column_ci(&qname.name).map(|_| ()).ok_or_else(|| {
                RowbaseError::InvalidArgument(format!("unknown column {}", qname))
            })
        }
        None => {
            if bindings
                .iter()
                .any(|(_, schema)| schema.column_ci(&qname.name).is_some())
            {
                Ok(())
            } else {
                Err(RowbaseError::InvalidArgument(format!(
                    "unknown column {}",
                    qname.name
                )))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::sql_parser::{SqlParser, SqlStatement};

    fn where_of(sql: &str) -> SqlExpr {
        match SqlParser::parse(sql).unwrap() {
            SqlStatement::Select(select) => select.where_clause.unwrap(),
            _ => panic!("expected SELECT"),
        }
    }

    fn ctx(pairs: &[(&str, Value)]) -> RowContext {
        let mut row = ValueRow::new();
        for (name, value) in pairs {
            row.insert(name.to_string(), value.clone());
        }
        RowContext::single("t", row)
    }

    #[test]
    fn test_comparisons_and_logic() {
        let ctx = ctx(&[
            ("Age", Value::Int32(30)),
            ("Name", Value::String("Ada".into())),
        ]);
        let expr = where_of("SELECT * FROM t WHERE Age >= 30 AND Name = 'Ada'");
        assert_eq!(eval(&expr, &ctx).unwrap(), Value::Bool(true));

        let expr = where_of("SELECT * FROM t WHERE Age < 30 OR Name <> 'Ada'");
        assert_eq!(eval(&expr, &ctx).unwrap(), Value::Bool(false));

        let expr = where_of("SELECT * FROM t WHERE NOT Age = 30");
        assert_eq!(eval(&expr, &ctx).unwrap(), Value::Bool(false));
    }

    #[test]
    fn test_null_comparisons_are_false() {
        let ctx = ctx(&[("Age", Value::Null)]);
        for sql in [
            "SELECT * FROM t WHERE Age = 1",
            "SELECT * FROM t WHERE Age <> 1",
            "SELECT * FROM t WHERE Age < 1",
        ] {
            let expr = where_of(sql);
            assert_eq!(eval(&expr, &ctx).unwrap(), Value::Bool(false), "{}", sql);
        }

        let expr = where_of("SELECT * FROM t WHERE Age IS NULL");
        assert_eq!(eval(&expr, &ctx).unwrap(), Value::Bool(true));
        let expr = where_of("SELECT * FROM t WHERE Age IS NOT NULL");
        assert_eq!(eval(&expr, &ctx).unwrap(), Value::Bool(false));
    }

    #[test]
    fn test_qualified_resolution_is_case_insensitive() {
        let ctx = ctx(&[("Total", Value::Decimal(5.0))]);
        let expr = where_of("SELECT * FROM t WHERE T.TOTAL = 5.0");
        assert_eq!(eval(&expr, &ctx).unwrap(), Value::Bool(true));
    }

    #[test]
    fn test_arithmetic() {
        let ctx = ctx(&[("A", Value::Int32(7)), ("B", Value::Decimal(2.0))]);
        let expr = where_of("SELECT * FROM t WHERE A + 1 = 8");
        assert_eq!(eval(&expr, &ctx).unwrap(), Value::Bool(true));
        let expr = where_of("SELECT * FROM t WHERE A / 2 = 3.5");
        assert_eq!(eval(&expr, &ctx).unwrap(), Value::Bool(true));
        let expr = where_of("SELECT * FROM t WHERE B * 3 = 6");
        assert_eq!(eval(&expr, &ctx).unwrap(), Value::Bool(true));
    }

    #[test]
    fn test_unknown_identifiers_error() {
        let ctx = ctx(&[("A", Value::Int32(1))]);
        let expr = where_of("SELECT * FROM t WHERE missing = 1");
        assert!(eval(&expr, &ctx).is_err());
        let expr = where_of("SELECT * FROM t WHERE x.A = 1");
        assert!(eval(&expr, &ctx).is_err());
    }
}
