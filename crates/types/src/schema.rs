//! Row schemas.
//!
//! A schema is an ordered list of named, typed fields. Its physical row
//! length is the sum of the field widths, and rows are encoded by
//! concatenating each field's fixed-width bytes in schema order with no
//! tags, so decoding requires the exact schema used to encode.

use serde::{Deserialize, Serialize};

use crate::error::TypeError;
use crate::record::Row;
use crate::value::{DataType, Value};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    pub data_type: DataType,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Schema {
    fields: Vec<Field>,
}

impl Schema {
    pub fn new(names: Vec<String>, types: Vec<DataType>) -> Result<Self, TypeError> {
        if names.len() != types.len() {
            return Err(TypeError::Shape {
                names: names.len(),
                types: types.len(),
            });
        }
        let fields = names
            .into_iter()
            .zip(types)
            .map(|(name, data_type)| Field { name, data_type })
            .collect();
        Ok(Self { fields })
    }

    pub fn from_fields<S: Into<String>>(fields: impl IntoIterator<Item = (S, DataType)>) -> Self {
        Self {
            fields: fields
                .into_iter()
                .map(|(name, data_type)| Field {
                    name: name.into(),
                    data_type,
                })
                .collect(),
        }
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.name.as_str())
    }

    pub fn name(&self, index: usize) -> Option<&str> {
        self.fields.get(index).map(|f| f.name.as_str())
    }

    pub fn data_type(&self, index: usize) -> Option<DataType> {
        self.fields.get(index).map(|f| f.data_type)
    }

    /// Physical length of one encoded row.
    pub fn entry_size(&self) -> usize {
        self.fields.iter().map(|f| f.data_type.size()).sum()
    }

    /// Prefix every field with `prefix.`, replacing any existing qualifier.
    pub fn qualified(&self, prefix: &str) -> Schema {
        Schema {
            fields: self
                .fields
                .iter()
                .map(|f| Field {
                    name: format!("{prefix}.{}", unqualified(&f.name)),
                    data_type: f.data_type,
                })
                .collect(),
        }
    }

    /// Left fields followed by right fields, names untouched.
    pub fn concat(&self, other: &Schema) -> Schema {
        let mut fields = self.fields.clone();
        fields.extend(other.fields.iter().cloned());
        Schema { fields }
    }

    /// Resolve a column reference to its position.
    ///
    /// An exact name match wins. Otherwise the reference's unqualified part is
    /// matched against each field's unqualified part and must hit exactly one
    /// field.
    pub fn column_index(&self, column: &str) -> Result<usize, TypeError> {
        if let Some(idx) = self.fields.iter().position(|f| f.name == column) {
            return Ok(idx);
        }
        if column.contains('.') {
            return Err(TypeError::ColumnNotFound(column.to_string()));
        }
        let mut hits = self
            .fields
            .iter()
            .enumerate()
            .filter(|(_, f)| unqualified(&f.name) == column)
            .map(|(i, _)| i);
        match (hits.next(), hits.next()) {
            (Some(idx), None) => Ok(idx),
            (Some(_), Some(_)) => Err(TypeError::AmbiguousColumn(column.to_string())),
            (None, _) => Err(TypeError::ColumnNotFound(column.to_string())),
        }
    }

    /// Check that `values` conforms to this schema and wrap them as a row.
    pub fn verify(&self, values: Vec<Value>) -> Result<Row, TypeError> {
        if values.len() != self.fields.len() {
            return Err(TypeError::Arity {
                expected: self.fields.len(),
                found: values.len(),
            });
        }
        for (index, (value, field)) in values.iter().zip(&self.fields).enumerate() {
            let found = value.data_type();
            if found != field.data_type {
                return Err(TypeError::FieldType {
                    index,
                    expected: field.data_type,
                    found,
                });
            }
        }
        Ok(values)
    }

    pub fn encode(&self, row: &[Value]) -> Result<Vec<u8>, TypeError> {
        if row.len() != self.fields.len() {
            return Err(TypeError::Arity {
                expected: self.fields.len(),
                found: row.len(),
            });
        }
        let mut out = Vec::with_capacity(self.entry_size());
        for value in row {
            value.encode_into(&mut out);
        }
        if out.len() != self.entry_size() {
            return Err(TypeError::Length {
                expected: self.entry_size(),
                found: out.len(),
            });
        }
        Ok(out)
    }

    pub fn decode(&self, bytes: &[u8]) -> Result<Row, TypeError> {
        if bytes.len() < self.entry_size() {
            return Err(TypeError::Length {
                expected: self.entry_size(),
                found: bytes.len(),
            });
        }
        let mut offset = 0;
        let mut row = Vec::with_capacity(self.fields.len());
        for field in &self.fields {
            let size = field.data_type.size();
            row.push(Value::decode(&field.data_type, &bytes[offset..offset + size])?);
            offset += size;
        }
        Ok(row)
    }
}

/// The column part of a possibly table-qualified name.
pub fn unqualified(name: &str) -> &str {
    match name.rfind('.') {
        Some(pos) => &name[pos + 1..],
        None => name,
    }
}
