//! Row schemas.
//!
//! A `RowSchema` describes one row shape: its ordered columns and their
//! constraint flags (primary key, auto-increment, required, foreign key).
//! Schemas are validated once at construction and immutable afterwards.

mod dynamic;
mod record;

pub use dynamic::DynRecord;
pub use record::{ColumnCodec, Record, TypedRecord};

use crate::data::DataType;
use crate::{Result, RowbaseError};
use std::sync::Arc;

/// One column of a row type.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnSpec {
    pub name: String,
    pub data_type: DataType,
    pub primary_key: bool,
    pub auto_increment: bool,
    pub required: bool,
    /// Type tag of the referenced row type, for foreign-key columns.
    pub references: Option<String>,
}

impl ColumnSpec {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            primary_key: false,
            auto_increment: false,
            required: false,
            references: None,
        }
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }

    pub fn auto_increment(mut self) -> Self {
        self.auto_increment = true;
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn references(mut self, target_tag: impl Into<String>) -> Self {
        self.references = Some(target_tag.into());
        self
    }
}

/// Validated, immutable description of a row type.
#[derive(Debug, Clone)]
pub struct RowSchema {
    type_tag: String,
    columns: Vec<ColumnSpec>,
    primary_key: Option<usize>,
}

impl RowSchema {
    /// Validate and freeze a descriptor.
    ///
    /// Rejected with `SchemaInvalid`: duplicate column names, more than one
    /// primary key, auto-increment on anything but an integer primary key,
    /// a foreign key without a target tag.
    pub fn new(type_tag: impl Into<String>, columns: Vec<ColumnSpec>) -> Result<Self> {
        let type_tag = type_tag.into();
        if type_tag.trim().is_empty() {
            return Err(RowbaseError::SchemaInvalid("empty type tag".to_string()));
        }

        let mut primary_key = None;
        let mut auto_seen = false;
        for (i, col) in columns.iter().enumerate() {
            if col.name.trim().is_empty() {
                return Err(RowbaseError::SchemaInvalid(format!(
                    "{}: empty column name",
                    type_tag
                )));
            }
            if columns[..i]
                .iter()
                .any(|c| c.name.eq_ignore_ascii_case(&col.name))
            {
                return Err(RowbaseError::SchemaInvalid(format!(
                    "{}: duplicate column {}",
                    type_tag, col.name
                )));
            }
            if col.primary_key {
                if primary_key.is_some() {
                    return Err(RowbaseError::SchemaInvalid(format!(
                        "{}: multiple primary key columns",
                        type_tag
                    )));
                }
                primary_key = Some(i);
            }
            if col.auto_increment {
                if auto_seen {
                    return Err(RowbaseError::SchemaInvalid(format!(
                        "{}: multiple auto-increment columns",
                        type_tag
                    )));
                }
                auto_seen = true;
                if !col.primary_key {
                    return Err(RowbaseError::SchemaInvalid(format!(
                        "{}: auto-increment column {} is not the primary key",
                        type_tag, col.name
                    )));
                }
                if !matches!(col.data_type, DataType::Int32 | DataType::Int64) {
                    return Err(RowbaseError::SchemaInvalid(format!(
                        "{}: auto-increment column {} must be an integer",
                        type_tag, col.name
                    )));
                }
            }
            if let Some(target) = &col.references {
                if target.trim().is_empty() {
                    return Err(RowbaseError::SchemaInvalid(format!(
                        "{}: foreign key {} has no target row type",
                        type_tag, col.name
                    )));
                }
            }
        }

        Ok(Self {
            type_tag,
            columns,
            primary_key,
        })
    }

    pub fn type_tag(&self) -> &str {
        &self.type_tag
    }

    pub fn columns(&self) -> &[ColumnSpec] {
        &self.columns
    }

    /// The primary-key column, if the row type has one.
    pub fn primary_key(&self) -> Option<&ColumnSpec> {
        self.primary_key.map(|i| &self.columns[i])
    }

    /// Exact-name lookup.
    pub fn column(&self, name: &str) -> Option<&ColumnSpec> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Case-insensitive lookup, as SQL identifiers resolve.
    pub fn column_ci(&self, name: &str) -> Option<&ColumnSpec> {
        self.columns
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
    }

    /// Foreign-key columns with their target tags.
    pub fn foreign_keys(&self) -> impl Iterator<Item = (&ColumnSpec, &str)> {
        self.columns
            .iter()
            .filter_map(|c| c.references.as_deref().map(|t| (c, t)))
    }

    /// Foreign-key columns pointing at `target_tag`.
    pub fn foreign_keys_to(&self, target_tag: &str) -> Vec<String> {
        self.foreign_keys()
            .filter(|(_, t)| *t == target_tag)
            .map(|(c, _)| c.name.clone())
            .collect()
    }
}

/// Chaining builder for row schemas.
pub struct SchemaBuilder {
    type_tag: String,
    columns: Vec<ColumnSpec>,
}

impl SchemaBuilder {
    pub fn new(type_tag: impl Into<String>) -> Self {
        Self {
            type_tag: type_tag.into(),
            columns: Vec::new(),
        }
    }

    pub fn column(mut self, spec: ColumnSpec) -> Self {
        self.columns.push(spec);
        self
    }

    pub fn build(self) -> Result<Arc<RowSchema>> {
        RowSchema::new(self.type_tag, self.columns).map(Arc::new)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_basics() {
        let schema = SchemaBuilder::new("Order")
            .column(ColumnSpec::new("Id", DataType::Int32).primary_key().auto_increment())
            .column(ColumnSpec::new("Status", DataType::String).required())
            .column(ColumnSpec::new("CustomerId", DataType::Int32).references("Customer"))
            .build()
            .unwrap();

        assert_eq!(schema.type_tag(), "Order");
        assert_eq!(schema.columns().len(), 3);
        assert_eq!(schema.primary_key().unwrap().name, "Id");
        assert!(schema.column("Status").unwrap().required);
        assert_eq!(
            schema.foreign_keys_to("Customer"),
            vec!["CustomerId".to_string()]
        );
    }

    #[test]
    fn test_rejects_two_primary_keys() {
        let err = SchemaBuilder::new("T")
            .column(ColumnSpec::new("A", DataType::Int32).primary_key())
            .column(ColumnSpec::new("B", DataType::Int32).primary_key())
            .build()
            .unwrap_err();
        assert!(matches!(err, RowbaseError::SchemaInvalid(_)));
    }

    #[test]
    fn test_rejects_auto_increment_off_the_pk() {
        let err = SchemaBuilder::new("T")
            .column(ColumnSpec::new("A", DataType::Int32).primary_key())
            .column(ColumnSpec::new("B", DataType::Int32).auto_increment())
            .build()
            .unwrap_err();
        assert!(matches!(err, RowbaseError::SchemaInvalid(_)));
    }

    #[test]
    fn test_rejects_non_integer_auto_increment() {
        let err = SchemaBuilder::new("T")
            .column(ColumnSpec::new("A", DataType::String).primary_key().auto_increment())
            .build()
            .unwrap_err();
        assert!(matches!(err, RowbaseError::SchemaInvalid(_)));
    }

    #[test]
    fn test_rejects_duplicate_columns() {
        let err = SchemaBuilder::new("T")
            .column(ColumnSpec::new("A", DataType::Int32))
            .column(ColumnSpec::new("a", DataType::Int64))
            .build()
            .unwrap_err();
        assert!(matches!(err, RowbaseError::SchemaInvalid(_)));
    }

    #[test]
    fn test_column_lookup_is_case_insensitive() {
        let schema = SchemaBuilder::new("T")
            .column(ColumnSpec::new("Name", DataType::String))
            .build()
            .unwrap();
        assert!(schema.column_ci("name").is_some());
        assert!(schema.column("name").is_none());
    }
}
