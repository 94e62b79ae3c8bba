//! Logical data types and runtime values.

mod value;

pub use value::{DataType, Value};
