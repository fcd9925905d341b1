//! Fixed-size scalar values.
//!
//! Every value has a fixed byte width determined by its data type: one byte
//! for booleans, four for integers and floats, and the declared length for
//! strings. Multi-byte numbers are stored big-endian.

use std::cmp::Ordering;
use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// The kind of a column, with the declared length for strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    Bool,
    Int,
    Float,
    String(usize),
}

impl DataType {
    /// Encoded width in bytes.
    pub fn size(&self) -> usize {
        match self {
            DataType::Bool => 1,
            DataType::Int | DataType::Float => 4,
            DataType::String(len) => *len,
        }
    }

    /// Same variant, ignoring string length.
    pub fn same_kind(&self, other: &DataType) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other)
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, DataType::Int | DataType::Float)
    }
}

impl Display for DataType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            DataType::Bool => f.write_str("bool"),
            DataType::Int => f.write_str("int"),
            DataType::Float => f.write_str("float"),
            DataType::String(len) => write!(f, "string({len})"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    Int(i32),
    Float(f32),
    /// Already normalized to its declared width; see [`Value::string`].
    String(String),
}

impl Value {
    /// Build a fixed-length string value.
    ///
    /// Input longer than `len` bytes is truncated without error and shorter
    /// input is right-padded with spaces. The truncation is lossy.
    pub fn string(s: &str, len: usize) -> Value {
        let mut out = String::with_capacity(len);
        for ch in s.chars() {
            if out.len() + ch.len_utf8() > len {
                break;
            }
            out.push(ch);
        }
        while out.len() < len {
            out.push(' ');
        }
        Value::String(out)
    }

    pub fn data_type(&self) -> DataType {
        match self {
            Value::Bool(_) => DataType::Bool,
            Value::Int(_) => DataType::Int,
            Value::Float(_) => DataType::Float,
            Value::String(s) => DataType::String(s.len()),
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i32> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f32> {
        match self {
            Value::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Numeric view used by aggregates and histograms.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(f64::from(*i)),
            Value::Float(v) => Some(f64::from(*v)),
            _ => None,
        }
    }

    /// Re-normalize a string constant to a column's declared width. Other
    /// values are returned unchanged.
    pub fn conform_to(&self, data_type: &DataType) -> Value {
        match (self, data_type) {
            (Value::String(s), DataType::String(len)) => Value::string(s, *len),
            _ => self.clone(),
        }
    }

    /// Total order within one variant. Comparing different variants is an
    /// error.
    pub fn compare(&self, other: &Value) -> Result<Ordering, TypeError> {
        match (self, other) {
            (Value::Bool(a), Value::Bool(b)) => Ok(a.cmp(b)),
            (Value::Int(a), Value::Int(b)) => Ok(a.cmp(b)),
            (Value::Float(a), Value::Float(b)) => {
                Ok(a.partial_cmp(b).unwrap_or_else(|| a.total_cmp(b)))
            }
            (Value::String(a), Value::String(b)) => Ok(a.cmp(b)),
            _ => Err(TypeError::Incomparable {
                left: self.data_type(),
                right: other.data_type(),
            }),
        }
    }

    /// Append the fixed-width encoding of this value.
    pub fn encode_into(&self, out: &mut Vec<u8>) {
        match self {
            Value::Bool(b) => out.push(u8::from(*b)),
            Value::Int(i) => out.extend_from_slice(&i.to_be_bytes()),
            Value::Float(v) => {
                // -0.0 and 0.0 compare equal, so they must encode the same.
                let v = if *v == 0.0 { 0.0f32 } else { *v };
                out.extend_from_slice(&v.to_be_bytes());
            }
            Value::String(s) => out.extend_from_slice(s.as_bytes()),
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.data_type().size());
        self.encode_into(&mut out);
        out
    }

    /// Decode one value of `data_type` from exactly `data_type.size()` bytes.
    pub fn decode(data_type: &DataType, bytes: &[u8]) -> Result<Value, TypeError> {
        if bytes.len() != data_type.size() {
            return Err(TypeError::Length {
                expected: data_type.size(),
                found: bytes.len(),
            });
        }
        let mut offset = 0;
        match data_type {
            DataType::Bool => Ok(Value::Bool(bytes[0] != 0)),
            DataType::Int => Ok(Value::Int(read_i32(bytes, &mut offset)?)),
            DataType::Float => Ok(Value::Float(f32::from_bits(read_u32(
                bytes,
                &mut offset,
            )?))),
            DataType::String(_) => String::from_utf8(bytes.to_vec())
                .map(Value::String)
                .map_err(|_| TypeError::InvalidString),
        }
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(v) => write!(f, "{v:?}"),
            Value::String(s) => f.write_str(s),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::Float(v)
    }
}

// ─── Encoding Helpers ────────────────────────────────────────────────────────

fn read_u32(buf: &[u8], offset: &mut usize) -> Result<u32, TypeError> {
    let end = *offset + 4;
    let bytes: [u8; 4] = buf
        .get(*offset..end)
        .and_then(|s| s.try_into().ok())
        .ok_or(TypeError::Length {
            expected: end,
            found: buf.len(),
        })?;
    *offset = end;
    Ok(u32::from_be_bytes(bytes))
}

fn read_i32(buf: &[u8], offset: &mut usize) -> Result<i32, TypeError> {
    read_u32(buf, offset).map(|v| v as i32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_is_padded_to_declared_length() {
        assert_eq!(Value::string("ab", 5), Value::String("ab   ".to_string()));
        assert_eq!(Value::string("ab", 5).data_type(), DataType::String(5));
    }

    #[test]
    fn string_is_truncated_silently() {
        assert_eq!(
            Value::string("predicate", 3),
            Value::String("pre".to_string())
        );
    }

    #[test]
    fn compare_within_variant() {
        assert_eq!(
            Value::Int(3).compare(&Value::Int(7)).unwrap(),
            Ordering::Less
        );
        assert_eq!(
            Value::Bool(true).compare(&Value::Bool(false)).unwrap(),
            Ordering::Greater
        );
        assert_eq!(
            Value::string("abc", 3)
                .compare(&Value::string("abc", 3))
                .unwrap(),
            Ordering::Equal
        );
        assert_eq!(
            Value::Float(1.5).compare(&Value::Float(-2.0)).unwrap(),
            Ordering::Greater
        );
    }

    #[test]
    fn compare_across_variants_is_an_error() {
        let err = Value::Int(1).compare(&Value::Float(1.0)).unwrap_err();
        assert_eq!(
            err,
            TypeError::Incomparable {
                left: DataType::Int,
                right: DataType::Float
            }
        );
    }

    #[test]
    fn encode_is_big_endian_and_fixed_width() {
        assert_eq!(Value::Int(1).to_bytes(), vec![0, 0, 0, 1]);
        assert_eq!(Value::Bool(true).to_bytes(), vec![1]);
        assert_eq!(Value::string("a", 3).to_bytes(), b"a  ".to_vec());
        assert_eq!(Value::Float(-0.0).to_bytes(), Value::Float(0.0).to_bytes());
    }

    #[test]
    fn decode_checks_width() {
        let err = Value::decode(&DataType::Int, &[0, 1]).unwrap_err();
        assert_eq!(
            err,
            TypeError::Length {
                expected: 4,
                found: 2
            }
        );
        assert_eq!(
            Value::decode(&DataType::Float, &2.5f32.to_be_bytes()).unwrap(),
            Value::Float(2.5)
        );
    }

    #[test]
    fn conform_to_renormalizes_strings_only() {
        let v = Value::String("cs186".to_string());
        assert_eq!(v.conform_to(&DataType::String(3)), Value::string("cs1", 3));
        assert_eq!(Value::Int(4).conform_to(&DataType::Int), Value::Int(4));
    }

    #[test]
    fn display_matches_plan_rendering() {
        assert_eq!(Value::Int(500).to_string(), "500");
        assert_eq!(Value::Float(1.0).to_string(), "1.0");
        assert_eq!(Value::Bool(false).to_string(), "false");
    }
}
