use thiserror::Error;

use crate::value::DataType;

/// Violations of the value and schema contracts.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TypeError {
    #[error("cannot compare {left} with {right}")]
    Incomparable { left: DataType, right: DataType },

    #[error("expected {expected} fields but found {found}")]
    Arity { expected: usize, found: usize },

    #[error("field {index} is {found} instead of {expected}")]
    FieldType {
        index: usize,
        expected: DataType,
        found: DataType,
    },

    #[error("expected {expected} bytes but found {found}")]
    Length { expected: usize, found: usize },

    #[error("string field is not valid utf-8")]
    InvalidString,

    #[error("schema has {names} field names but {types} field types")]
    Shape { names: usize, types: usize },

    #[error("column '{0}' not found")]
    ColumnNotFound(String),

    #[error("column '{0}' is ambiguous")]
    AmbiguousColumn(String),
}
