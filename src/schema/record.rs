//! Row access traits.
//!
//! The table engine never inspects a row struct directly; it goes through
//! `Record`, which exposes column values by name. Typed application structs
//! implement `TypedRecord` (usually via the `record!` macro), dynamic rows
//! use [`super::DynRecord`]. Both share every table operation.

use crate::data::{DataType, Value};
use crate::{Result, RowbaseError};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use uuid::Uuid;

/// Column-addressable row access.
pub trait Record: Clone + Send + Sync + 'static {
    /// `None` when the column does not exist on this row type.
    fn get(&self, column: &str) -> Option<Value>;

    /// Store a value into the named column.
    fn set(&mut self, column: &str, value: Value) -> Result<()>;
}

/// A row type with a compile-time schema and a stable type tag.
pub trait TypedRecord: Record {
    /// The opaque tag written into snapshots for this row type.
    fn type_tag() -> &'static str;

    /// The row type's descriptor. Built once, shared.
    fn schema() -> Arc<super::RowSchema>;

    /// A blank row, used when materializing from SQL or a snapshot.
    fn empty() -> Self;
}

/// Conversion between a Rust field type and the stored `Value`.
///
/// `from_value` receives a value already coerced to the column's logical
/// type; `Null` maps to the field type's absent form (zero, empty, `None`).
pub trait ColumnCodec: Sized {
    const DATA_TYPE: DataType;

    fn to_value(&self) -> Value;
    fn from_value(value: Value) -> Result<Self>;
}

fn unexpected(expected: DataType, got: &Value) -> RowbaseError {
    RowbaseError::InvalidArgument(format!("expected {} value, got {}", expected, got))
}

impl ColumnCodec for i32 {
    const DATA_TYPE: DataType = DataType::Int32;

    fn to_value(&self) -> Value {
        Value::Int32(*self)
    }

    fn from_value(value: Value) -> Result<Self> {
        match value.coerce_to(Self::DATA_TYPE)? {
            Value::Int32(v) => Ok(v),
            Value::Null => Ok(0),
            other => Err(unexpected(Self::DATA_TYPE, &other)),
        }
    }
}

impl ColumnCodec for i64 {
    const DATA_TYPE: DataType = DataType::Int64;

    fn to_value(&self) -> Value {
        Value::Int64(*self)
    }

    fn from_value(value: Value) -> Result<Self> {
        match value.coerce_to(Self::DATA_TYPE)? {
            Value::Int64(v) => Ok(v),
            Value::Null => Ok(0),
            other => Err(unexpected(Self::DATA_TYPE, &other)),
        }
    }
}

impl ColumnCodec for f64 {
    const DATA_TYPE: DataType = DataType::Decimal;

    fn to_value(&self) -> Value {
        Value::Decimal(*self)
    }

    fn from_value(value: Value) -> Result<Self> {
        match value.coerce_to(Self::DATA_TYPE)? {
            Value::Decimal(v) => Ok(v),
            Value::Null => Ok(0.0),
            other => Err(unexpected(Self::DATA_TYPE, &other)),
        }
    }
}

impl ColumnCodec for bool {
    const DATA_TYPE: DataType = DataType::Bool;

    fn to_value(&self) -> Value {
        Value::Bool(*self)
    }

    fn from_value(value: Value) -> Result<Self> {
        match value.coerce_to(Self::DATA_TYPE)? {
            Value::Bool(v) => Ok(v),
            Value::Null => Ok(false),
            other => Err(unexpected(Self::DATA_TYPE, &other)),
        }
    }
}

impl ColumnCodec for String {
    const DATA_TYPE: DataType = DataType::String;

    fn to_value(&self) -> Value {
        Value::String(self.clone())
    }

    fn from_value(value: Value) -> Result<Self> {
        match value.coerce_to(Self::DATA_TYPE)? {
            Value::String(v) => Ok(v),
            Value::Null => Ok(String::new()),
            other => Err(unexpected(Self::DATA_TYPE, &other)),
        }
    }
}

impl ColumnCodec for DateTime<Utc> {
    const DATA_TYPE: DataType = DataType::DateTime;

    fn to_value(&self) -> Value {
        Value::DateTime(*self)
    }

    fn from_value(value: Value) -> Result<Self> {
        match value.coerce_to(Self::DATA_TYPE)? {
            Value::DateTime(v) => Ok(v),
            Value::Null => Ok(DateTime::<Utc>::UNIX_EPOCH),
            other => Err(unexpected(Self::DATA_TYPE, &other)),
        }
    }
}

impl ColumnCodec for Uuid {
    const DATA_TYPE: DataType = DataType::Uuid;

    fn to_value(&self) -> Value {
        Value::Uuid(*self)
    }

    fn from_value(value: Value) -> Result<Self> {
        match value.coerce_to(Self::DATA_TYPE)? {
            Value::Uuid(v) => Ok(v),
            Value::Null => Ok(Uuid::nil()),
            other => Err(unexpected(Self::DATA_TYPE, &other)),
        }
    }
}

impl ColumnCodec for Vec<u8> {
    const DATA_TYPE: DataType = DataType::Bytes;

    fn to_value(&self) -> Value {
        Value::Bytes(self.clone())
    }

    fn from_value(value: Value) -> Result<Self> {
        match value.coerce_to(Self::DATA_TYPE)? {
            Value::Bytes(v) => Ok(v),
            Value::Null => Ok(Vec::new()),
            other => Err(unexpected(Self::DATA_TYPE, &other)),
        }
    }
}

impl<T: ColumnCodec> ColumnCodec for Option<T> {
    const DATA_TYPE: DataType = T::DATA_TYPE;

    fn to_value(&self) -> Value {
        match self {
            Some(v) => v.to_value(),
            None => Value::Null,
        }
    }

    fn from_value(value: Value) -> Result<Self> {
        if value.is_null() {
            return Ok(None);
        }
        T::from_value(value).map(Some)
    }
}

/// Define a struct implementing [`Record`] and [`TypedRecord`].
///
/// ```
/// use rowbase::record;
///
/// record! {
///     pub struct Customer("Customer") {
///         id: i32 => Int32 [primary_key auto_increment],
///         name: String => String [required],
///         region: String => String,
///     }
/// }
/// ```
///
/// Flags: `primary_key`, `auto_increment`, `required`,
/// `references "TargetTag"`. A field stores under its own name unless an
/// `as "ColumnName"` override is given.
#[macro_export]
macro_rules! record {
    (
        $(#[$meta:meta])*
        $vis:vis struct $name:ident ($tag:literal) {
            $(
                $field:ident $(as $col:literal)? : $fty:ty => $dt:ident $([ $($flags:tt)* ])?
            ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Default)]
        $vis struct $name {
            $( pub $field: $fty, )+
        }

        impl $crate::schema::Record for $name {
            fn get(&self, column: &str) -> ::std::option::Option<$crate::data::Value> {
                $(
                    if column.eq_ignore_ascii_case($crate::record_name!($field $(, $col)?)) {
                        return ::std::option::Option::Some(
                            $crate::schema::ColumnCodec::to_value(&self.$field),
                        );
                    }
                )+
                ::std::option::Option::None
            }

            fn set(&mut self, column: &str, value: $crate::data::Value) -> $crate::Result<()> {
                $(
                    if column.eq_ignore_ascii_case($crate::record_name!($field $(, $col)?)) {
                        self.$field =
                            <$fty as $crate::schema::ColumnCodec>::from_value(value)?;
                        return ::std::result::Result::Ok(());
                    }
                )+
                ::std::result::Result::Err($crate::RowbaseError::InvalidArgument(
                    ::std::format!("no column {} on {}", column, $tag),
                ))
            }
        }

        impl $crate::schema::TypedRecord for $name {
            fn type_tag() -> &'static str {
                $tag
            }

            fn schema() -> ::std::sync::Arc<$crate::schema::RowSchema> {
                static SCHEMA: ::std::sync::OnceLock<::std::sync::Arc<$crate::schema::RowSchema>> =
                    ::std::sync::OnceLock::new();
                SCHEMA
                    .get_or_init(|| {
                        $crate::schema::SchemaBuilder::new($tag)
                            $(
                                .column($crate::record_column!(
                                    $crate::record_name!($field $(, $col)?),
                                    $dt $(, $($flags)* )?
                                ))
                            )+
                            .build()
                            .expect("record! produced an invalid schema")
                    })
                    .clone()
            }

            fn empty() -> Self {
                ::std::default::Default::default()
            }
        }
    };
}

/// Internal helper for [`record!`]: the stored column name of a field.
#[doc(hidden)]
#[macro_export]
macro_rules! record_name {
    ($field:ident) => {
        stringify!($field)
    };
    ($field:ident, $col:literal) => {
        $col
    };
}

/// Internal helper for [`record!`]: builds one `ColumnSpec` from flag tokens.
#[doc(hidden)]
#[macro_export]
macro_rules! record_column {
    ($name:expr, $dt:ident) => {
        $crate::schema::ColumnSpec::new($name, $crate::data::DataType::$dt)
    };
    ($name:expr, $dt:ident, $($flags:tt)*) => {
        $crate::record_flags!(
            $crate::schema::ColumnSpec::new($name, $crate::data::DataType::$dt);
            $($flags)*
        )
    };
}

#[doc(hidden)]
#[macro_export]
macro_rules! record_flags {
    ($spec:expr; ) => { $spec };
    ($spec:expr; primary_key $($rest:tt)*) => {
        $crate::record_flags!($spec.primary_key(); $($rest)*)
    };
    ($spec:expr; auto_increment $($rest:tt)*) => {
        $crate::record_flags!($spec.auto_increment(); $($rest)*)
    };
    ($spec:expr; required $($rest:tt)*) => {
        $crate::record_flags!($spec.required(); $($rest)*)
    };
    ($spec:expr; references $target:literal $($rest:tt)*) => {
        $crate::record_flags!($spec.references($target); $($rest)*)
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    crate::record! {
        pub struct Person("Person") {
            id: i32 => Int32 [primary_key auto_increment],
            name: String => String [required],
            age: Option<i64> => Int64,
        }
    }

    #[test]
    fn test_macro_schema() {
        let schema = Person::schema();
        assert_eq!(schema.type_tag(), "Person");
        let pk = schema.primary_key().unwrap();
        assert_eq!(pk.name, "id");
        assert!(pk.auto_increment);
        assert!(schema.column("name").unwrap().required);
        assert!(!schema.column("age").unwrap().required);
    }

    #[test]
    fn test_macro_get_set() {
        let mut p = Person::empty();
        p.set("name", Value::String("Ada".into())).unwrap();
        p.set("age", Value::Int64(37)).unwrap();
        assert_eq!(p.get("Name"), Some(Value::String("Ada".into())));
        assert_eq!(p.get("age"), Some(Value::Int64(37)));
        assert_eq!(p.get("id"), Some(Value::Int32(0)));
        assert_eq!(p.get("missing"), None);

        p.set("age", Value::Null).unwrap();
        assert_eq!(p.get("age"), Some(Value::Null));
        assert!(p.set("missing", Value::Null).is_err());
    }

    #[test]
    fn test_codec_coerces_before_storing() {
        let mut p = Person::empty();
        // SQL literals arrive as Int64; the field is i32.
        p.set("id", Value::Int64(12)).unwrap();
        assert_eq!(p.get("id"), Some(Value::Int32(12)));
    }

    crate::record! {
        struct Renamed("RenamedRow") {
            id as "Id": i32 => Int32 [primary_key auto_increment],
            display_name as "DisplayName": String => String,
        }
    }

    #[test]
    fn test_column_name_override() {
        let schema = Renamed::schema();
        assert!(schema.column("DisplayName").is_some());
        assert!(schema.column("display_name").is_none());

        let mut row = Renamed::empty();
        row.set("displayname", Value::String("x".into())).unwrap();
        assert_eq!(row.display_name, "x");
        assert_eq!(row.get("DISPLAYNAME"), Some(Value::String("x".into())));
    }
}
