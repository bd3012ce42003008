//! Runtime scalar values held by the reference store and scalar defaults.

use std::fmt;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value as JsonValue;

use crate::error::ValueError;
use crate::kind::ScalarType;

/// Opaque scalar value.
///
/// Each variant is the canonical representation of one or more [`ScalarType`]s: `sint32` and `sfixed32` are stored as
/// [`Value::Int32`], `fixed64` as [`Value::Uint64`] and so on. Use [`Value::coerce`] to move between them.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    Int32(i32),
    Int64(i64),
    Uint32(u32),
    Uint64(u64),
    Float32(f32),
    Float64(f64),
    String(String),
    Bytes(Vec<u8>),
}

impl Value {
    /// Natural scalar type of the stored representation.
    pub fn scalar_type(&self) -> ScalarType {
        match self {
            Value::Bool(_) => ScalarType::Bool,
            Value::Int32(_) => ScalarType::Int32,
            Value::Int64(_) => ScalarType::Int64,
            Value::Uint32(_) => ScalarType::Uint32,
            Value::Uint64(_) => ScalarType::Uint64,
            Value::Float32(_) => ScalarType::Float,
            Value::Float64(_) => ScalarType::Double,
            Value::String(_) => ScalarType::String,
            Value::Bytes(_) => ScalarType::Bytes,
        }
    }

    /// Convert the value into the canonical representation of `target`.
    ///
    /// Integer conversions are range checked, floats only convert to integers when they carry no fraction, strings are
    /// parsed, and `bytes` accepts base64 text.
    pub fn coerce(&self, target: ScalarType) -> Result<Value, ValueError> {
        match target {
            ScalarType::Bool => match self {
                Value::Bool(value) => Ok(Value::Bool(*value)),
                Value::String(text) => match text.trim() {
                    "true" => Ok(Value::Bool(true)),
                    "false" => Ok(Value::Bool(false)),
                    _ => Err(self.error(target, "expected 'true' or 'false'")),
                },
                _ => Err(self.error(target, "not a boolean")),
            },
            ScalarType::String => match self {
                Value::String(text) => Ok(Value::String(text.clone())),
                other => Ok(Value::String(other.to_text())),
            },
            ScalarType::Bytes => match self {
                Value::Bytes(bytes) => Ok(Value::Bytes(bytes.clone())),
                Value::String(text) => STANDARD
                    .decode(text.trim())
                    .map(Value::Bytes)
                    .map_err(|error| self.error(target, &error.to_string())),
                _ => Err(self.error(target, "not a byte sequence")),
            },
            ScalarType::Int32 | ScalarType::Sint32 | ScalarType::Sfixed32 => {
                let integer = self.integer(target)?;
                i32::try_from(integer).map(Value::Int32).map_err(|_| self.error(target, "out of range"))
            }
            ScalarType::Int64 | ScalarType::Sint64 | ScalarType::Sfixed64 => {
                let integer = self.integer(target)?;
                i64::try_from(integer).map(Value::Int64).map_err(|_| self.error(target, "out of range"))
            }
            ScalarType::Uint32 | ScalarType::Fixed32 => {
                let integer = self.integer(target)?;
                u32::try_from(integer).map(Value::Uint32).map_err(|_| self.error(target, "out of range"))
            }
            ScalarType::Uint64 | ScalarType::Fixed64 => {
                let integer = self.integer(target)?;
                u64::try_from(integer).map(Value::Uint64).map_err(|_| self.error(target, "out of range"))
            }
            ScalarType::Float => self.float(target).map(|value| Value::Float32(value as f32)),
            ScalarType::Double => self.float(target).map(Value::Float64),
        }
    }

    /// Parse the textual form used by text based formats (XML character data, form values, headers).
    pub fn decode_from_str(kind: ScalarType, text: &str) -> Result<Value, ValueError> {
        Value::String(text.to_string()).coerce(kind)
    }

    /// Textual form of the value; byte sequences are framed as standard padded base64.
    pub fn to_text(&self) -> String {
        match self {
            Value::Bytes(bytes) => STANDARD.encode(bytes),
            other => other.to_string(),
        }
    }

    /// JSON rendering of the value. Non finite floats have no JSON form and render as `null`.
    pub fn to_json(&self) -> JsonValue {
        match self {
            Value::Bool(value) => JsonValue::Bool(*value),
            Value::Int32(value) => JsonValue::from(*value),
            Value::Int64(value) => JsonValue::from(*value),
            Value::Uint32(value) => JsonValue::from(*value),
            Value::Uint64(value) => JsonValue::from(*value),
            Value::Float32(value) => serde_json::Number::from_f64(f64::from(*value)).map(JsonValue::Number).unwrap_or(JsonValue::Null),
            Value::Float64(value) => serde_json::Number::from_f64(*value).map(JsonValue::Number).unwrap_or(JsonValue::Null),
            Value::String(text) => JsonValue::String(text.clone()),
            Value::Bytes(bytes) => JsonValue::String(STANDARD.encode(bytes)),
        }
    }

    /// Build a value from an untyped JSON literal. Objects, arrays and `null` have no scalar form.
    pub fn from_json(value: &JsonValue) -> Option<Value> {
        match value {
            JsonValue::Bool(flag) => Some(Value::Bool(*flag)),
            JsonValue::Number(number) => {
                if let Some(signed) = number.as_i64() {
                    Some(Value::Int64(signed))
                } else if let Some(unsigned) = number.as_u64() {
                    Some(Value::Uint64(unsigned))
                } else {
                    number.as_f64().map(Value::Float64)
                }
            }
            JsonValue::String(text) => Some(Value::String(text.clone())),
            JsonValue::Null | JsonValue::Array(_) | JsonValue::Object(_) => None,
        }
    }

    fn integer(&self, target: ScalarType) -> Result<i128, ValueError> {
        match self {
            Value::Int32(value) => Ok(i128::from(*value)),
            Value::Int64(value) => Ok(i128::from(*value)),
            Value::Uint32(value) => Ok(i128::from(*value)),
            Value::Uint64(value) => Ok(i128::from(*value)),
            Value::Float32(value) => whole_number(f64::from(*value)).ok_or_else(|| self.error(target, "fractional value")),
            Value::Float64(value) => whole_number(*value).ok_or_else(|| self.error(target, "fractional value")),
            Value::String(text) => text.trim().parse::<i128>().map_err(|error| self.error(target, &error.to_string())),
            Value::Bool(_) | Value::Bytes(_) => Err(self.error(target, "not a number")),
        }
    }

    fn float(&self, target: ScalarType) -> Result<f64, ValueError> {
        match self {
            Value::Int32(value) => Ok(f64::from(*value)),
            Value::Int64(value) => Ok(*value as f64),
            Value::Uint32(value) => Ok(f64::from(*value)),
            Value::Uint64(value) => Ok(*value as f64),
            Value::Float32(value) => Ok(f64::from(*value)),
            Value::Float64(value) => Ok(*value),
            Value::String(text) => text.trim().parse::<f64>().map_err(|error| self.error(target, &error.to_string())),
            Value::Bool(_) | Value::Bytes(_) => Err(self.error(target, "not a number")),
        }
    }

    fn error(&self, target: ScalarType, reason: &str) -> ValueError {
        ValueError {
            value: self.to_text(),
            target,
            reason: reason.to_string(),
        }
    }
}

fn whole_number(value: f64) -> Option<i128> {
    if value.is_finite() && value.fract() == 0.0 {
        Some(value as i128)
    } else {
        None
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(value) => write!(f, "{value}"),
            Value::Int32(value) => write!(f, "{value}"),
            Value::Int64(value) => write!(f, "{value}"),
            Value::Uint32(value) => write!(f, "{value}"),
            Value::Uint64(value) => write!(f, "{value}"),
            Value::Float32(value) => write!(f, "{value}"),
            Value::Float64(value) => write!(f, "{value}"),
            Value::String(text) => f.write_str(text),
            Value::Bytes(bytes) => f.write_str(&STANDARD.encode(bytes)),
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int32(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int64(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float64(value)
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = JsonValue::deserialize(deserializer)?;
        Value::from_json(&raw).ok_or_else(|| D::Error::custom(format!("expected a scalar literal, got {raw}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coerce_narrows_integers_with_range_checks() {
        assert_eq!(Value::Int64(42).coerce(ScalarType::Int32).expect("fits"), Value::Int32(42));
        assert_eq!(Value::Int64(7).coerce(ScalarType::Fixed64).expect("fits"), Value::Uint64(7));
        assert!(Value::Int64(-1).coerce(ScalarType::Uint32).is_err());
        assert!(Value::Int64(i64::from(i32::MAX) + 1).coerce(ScalarType::Sint32).is_err());
    }

    #[test]
    fn coerce_parses_text_for_every_scalar_family() {
        assert_eq!(Value::decode_from_str(ScalarType::Bool, "true").expect("bool"), Value::Bool(true));
        assert_eq!(Value::decode_from_str(ScalarType::Sint64, "-12").expect("sint64"), Value::Int64(-12));
        assert_eq!(Value::decode_from_str(ScalarType::Float, "1.5").expect("float"), Value::Float32(1.5));
        assert_eq!(Value::decode_from_str(ScalarType::Bytes, "aGk=").expect("bytes"), Value::Bytes(b"hi".to_vec()));
        assert!(Value::decode_from_str(ScalarType::Int32, "1.5").is_err());
    }

    #[test]
    fn floats_convert_to_integers_only_without_fraction() {
        assert_eq!(Value::Float64(3.0).coerce(ScalarType::Int64).expect("whole"), Value::Int64(3));
        let error = Value::Float64(3.25).coerce(ScalarType::Int64).expect_err("fraction");
        assert!(error.to_string().contains("fractional value"), "unexpected error: {error}");
    }

    #[test]
    fn bytes_render_as_base64_text_and_json() {
        let value = Value::Bytes(vec![0xde, 0xad, 0xbe, 0xef]);
        assert_eq!(value.to_text(), "3q2+7w==");
        assert_eq!(value.to_json(), JsonValue::String("3q2+7w==".into()));
    }

    #[test]
    fn deserialize_rejects_structured_literals() {
        let parsed: Value = serde_json::from_str("12").expect("number literal");
        assert_eq!(parsed, Value::Int64(12));
        assert!(serde_json::from_str::<Value>("[1]").is_err());
    }
}
