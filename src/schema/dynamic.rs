//! Dynamic rows.
//!
//! A `DynRecord` is the schema-plus-dictionary row variant used for tables
//! that only exist as metadata descriptors at runtime. It implements the
//! same `Record` interface as compile-time row structs, so every table
//! operation works unchanged.

use super::{Record, RowSchema};
use crate::data::Value;
use crate::{Result, RowbaseError};
use ahash::AHashMap;
use std::sync::Arc;

/// A row whose shape is known only at runtime.
#[derive(Debug, Clone)]
pub struct DynRecord {
    schema: Arc<RowSchema>,
    values: AHashMap<String, Value>,
}

impl DynRecord {
    /// A blank row for the given schema; every column starts as `Null`.
    pub fn new(schema: Arc<RowSchema>) -> Self {
        Self {
            schema,
            values: AHashMap::new(),
        }
    }

    pub fn schema(&self) -> &Arc<RowSchema> {
        &self.schema
    }

    /// Builder-style column assignment, coercing to the column type.
    pub fn with(mut self, column: &str, value: impl Into<Value>) -> Result<Self> {
        self.set(column, value.into())?;
        Ok(self)
    }
}

impl Record for DynRecord {
    fn get(&self, column: &str) -> Option<Value> {
        let spec = self.schema.column_ci(column)?;
        Some(self.values.get(&spec.name).cloned().unwrap_or(Value::Null))
    }

    fn set(&mut self, column: &str, value: Value) -> Result<()> {
        let spec = self.schema.column_ci(column).ok_or_else(|| {
            RowbaseError::InvalidArgument(format!(
                "no column {} on {}",
                column,
                self.schema.type_tag()
            ))
        })?;
        let coerced = value.coerce_to(spec.data_type)?;
        self.values.insert(spec.name.clone(), coerced);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::DataType;
    use crate::schema::{ColumnSpec, SchemaBuilder};

    fn schema() -> Arc<RowSchema> {
        SchemaBuilder::new("Order")
            .column(ColumnSpec::new("Id", DataType::Int32).primary_key().auto_increment())
            .column(ColumnSpec::new("Total", DataType::Decimal))
            .build()
            .unwrap()
    }

    #[test]
    fn test_unset_columns_read_null() {
        let row = DynRecord::new(schema());
        assert_eq!(row.get("Id"), Some(Value::Null));
        assert_eq!(row.get("missing"), None);
    }

    #[test]
    fn test_set_coerces_to_column_type() {
        let mut row = DynRecord::new(schema());
        row.set("total", Value::Int64(40)).unwrap();
        assert_eq!(row.get("Total"), Some(Value::Decimal(40.0)));
    }

    #[test]
    fn test_set_unknown_column_fails() {
        let mut row = DynRecord::new(schema());
        assert!(row.set("nope", Value::Int64(1)).is_err());
    }
}
