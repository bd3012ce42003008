//! Protobuf wire format primitives.

use bytes::{Buf, BufMut};
use switchyard_types::{ScalarType, Value};

use super::NAME;
use crate::CodecError;

const MAX_VARINT_BYTES: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireType {
    Varint = 0,
    Fixed64 = 1,
    LengthDelimited = 2,
    Fixed32 = 5,
}

impl WireType {
    /// Wire type a scalar of `kind` is written with.
    pub fn of(kind: ScalarType) -> Self {
        match kind {
            ScalarType::Double | ScalarType::Fixed64 | ScalarType::Sfixed64 => WireType::Fixed64,
            ScalarType::Float | ScalarType::Fixed32 | ScalarType::Sfixed32 => WireType::Fixed32,
            ScalarType::String | ScalarType::Bytes => WireType::LengthDelimited,
            ScalarType::Int32
            | ScalarType::Int64
            | ScalarType::Uint32
            | ScalarType::Uint64
            | ScalarType::Sint32
            | ScalarType::Sint64
            | ScalarType::Bool => WireType::Varint,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            WireType::Varint => "varint",
            WireType::Fixed64 => "fixed64",
            WireType::LengthDelimited => "length delimited",
            WireType::Fixed32 => "fixed32",
        }
    }
}

/// Scalars other than strings and bytes can be packed into a single length delimited field.
pub fn packable(kind: ScalarType) -> bool {
    WireType::of(kind) != WireType::LengthDelimited
}

pub fn put_key(buffer: &mut impl BufMut, number: u32, wire: WireType) {
    put_varint(buffer, (u64::from(number) << 3) | wire as u64);
}

pub fn put_varint(buffer: &mut impl BufMut, mut value: u64) {
    while value >= 0x80 {
        buffer.put_u8((value as u8 & 0x7f) | 0x80);
        value >>= 7;
    }
    buffer.put_u8(value as u8);
}

pub fn put_length_delimited(buffer: &mut impl BufMut, number: u32, payload: &[u8]) {
    put_key(buffer, number, WireType::LengthDelimited);
    put_varint(buffer, payload.len() as u64);
    buffer.put_slice(payload);
}

/// Write `value` as `kind` without field key. Strings and bytes carry their length prefix.
pub fn put_value(buffer: &mut impl BufMut, kind: ScalarType, value: &Value, path: &str) -> Result<(), CodecError> {
    let value = value.coerce(kind).map_err(|error| CodecError::invalid_value(path, error))?;
    match (kind, value) {
        (ScalarType::Double, Value::Float64(value)) => buffer.put_f64_le(value),
        (ScalarType::Float, Value::Float32(value)) => buffer.put_f32_le(value),
        // Negative int32 values are sign extended to ten bytes.
        (ScalarType::Int32, Value::Int32(value)) => put_varint(buffer, i64::from(value) as u64),
        (ScalarType::Sint32, Value::Int32(value)) => put_varint(buffer, u64::from(((value << 1) ^ (value >> 31)) as u32)),
        (ScalarType::Sfixed32, Value::Int32(value)) => buffer.put_i32_le(value),
        (ScalarType::Int64, Value::Int64(value)) => put_varint(buffer, value as u64),
        (ScalarType::Sint64, Value::Int64(value)) => put_varint(buffer, ((value << 1) ^ (value >> 63)) as u64),
        (ScalarType::Sfixed64, Value::Int64(value)) => buffer.put_i64_le(value),
        (ScalarType::Uint32, Value::Uint32(value)) => put_varint(buffer, u64::from(value)),
        (ScalarType::Fixed32, Value::Uint32(value)) => buffer.put_u32_le(value),
        (ScalarType::Uint64, Value::Uint64(value)) => put_varint(buffer, value),
        (ScalarType::Fixed64, Value::Uint64(value)) => buffer.put_u64_le(value),
        (ScalarType::Bool, Value::Bool(value)) => put_varint(buffer, u64::from(value)),
        (ScalarType::String, Value::String(text)) => {
            put_varint(buffer, text.len() as u64);
            buffer.put_slice(text.as_bytes());
        }
        (ScalarType::Bytes, Value::Bytes(bytes)) => {
            put_varint(buffer, bytes.len() as u64);
            buffer.put_slice(&bytes);
        }
        _ => return Err(CodecError::UnknownScalarType { path: path.to_string() }),
    }
    Ok(())
}

/// Undecoded field value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Raw<'a> {
    Varint(u64),
    Fixed64(u64),
    Fixed32(u32),
    Bytes(&'a [u8]),
}

impl Raw<'_> {
    pub fn wire_type(&self) -> WireType {
        match self {
            Raw::Varint(_) => WireType::Varint,
            Raw::Fixed64(_) => WireType::Fixed64,
            Raw::Fixed32(_) => WireType::Fixed32,
            Raw::Bytes(_) => WireType::LengthDelimited,
        }
    }
}

/// Split a message payload into `(field number, value)` pairs in wire order.
pub fn read_fields(mut payload: &[u8]) -> Result<Vec<(u32, Raw<'_>)>, CodecError> {
    let mut fields = Vec::new();
    while payload.has_remaining() {
        let key = read_varint(&mut payload)?;
        let number = u32::try_from(key >> 3).map_err(|_| CodecError::malformed(NAME, format!("field number {} out of range", key >> 3)))?;
        if number == 0 {
            return Err(CodecError::malformed(NAME, "field number 0 is reserved"));
        }

        let raw = match key & 0x7 {
            0 => Raw::Varint(read_varint(&mut payload)?),
            1 => Raw::Fixed64(read_fixed64(&mut payload)?),
            2 => Raw::Bytes(read_length_delimited(&mut payload)?),
            5 => Raw::Fixed32(read_fixed32(&mut payload)?),
            other => return Err(CodecError::malformed(NAME, format!("unsupported wire type {other} for field {number}"))),
        };
        fields.push((number, raw));
    }
    Ok(fields)
}

pub fn read_varint(buffer: &mut &[u8]) -> Result<u64, CodecError> {
    let mut value = 0u64;
    for index in 0..MAX_VARINT_BYTES {
        if !buffer.has_remaining() {
            return Err(CodecError::malformed(NAME, "truncated varint"));
        }
        let byte = buffer.get_u8();
        value |= u64::from(byte & 0x7f) << (7 * index);
        if byte < 0x80 {
            return Ok(value);
        }
    }
    Err(CodecError::malformed(NAME, "varint exceeds ten bytes"))
}

fn read_fixed64(buffer: &mut &[u8]) -> Result<u64, CodecError> {
    if buffer.remaining() < 8 {
        return Err(CodecError::malformed(NAME, "truncated fixed64"));
    }
    Ok(buffer.get_u64_le())
}

fn read_fixed32(buffer: &mut &[u8]) -> Result<u32, CodecError> {
    if buffer.remaining() < 4 {
        return Err(CodecError::malformed(NAME, "truncated fixed32"));
    }
    Ok(buffer.get_u32_le())
}

fn read_length_delimited<'a>(buffer: &mut &'a [u8]) -> Result<&'a [u8], CodecError> {
    let length = read_varint(buffer)?;
    let length = usize::try_from(length).map_err(|_| CodecError::malformed(NAME, "length prefix out of range"))?;
    if buffer.len() < length {
        return Err(CodecError::malformed(NAME, format!("length prefix {length} exceeds the {} remaining bytes", buffer.len())));
    }
    let (value, rest) = buffer.split_at(length);
    *buffer = rest;
    Ok(value)
}

/// Split the body of a packed repeated field into its values.
pub fn unpack(wire: WireType, mut packed: &[u8]) -> Result<Vec<Raw<'_>>, CodecError> {
    let mut values = Vec::new();
    while packed.has_remaining() {
        let raw = match wire {
            WireType::Varint => Raw::Varint(read_varint(&mut packed)?),
            WireType::Fixed64 => Raw::Fixed64(read_fixed64(&mut packed)?),
            WireType::Fixed32 => Raw::Fixed32(read_fixed32(&mut packed)?),
            WireType::LengthDelimited => return Err(CodecError::malformed(NAME, "length delimited values cannot be packed")),
        };
        values.push(raw);
    }
    Ok(values)
}

/// Interpret `raw` as a scalar of `kind`.
pub fn decode_value(kind: ScalarType, raw: Raw<'_>, path: &str) -> Result<Value, CodecError> {
    let value = match (kind, raw) {
        (ScalarType::Double, Raw::Fixed64(bits)) => Value::Float64(f64::from_bits(bits)),
        (ScalarType::Float, Raw::Fixed32(bits)) => Value::Float32(f32::from_bits(bits)),
        (ScalarType::Int32, Raw::Varint(value)) => Value::Int32(value as i64 as i32),
        (ScalarType::Sint32, Raw::Varint(value)) => {
            let value = value as u32;
            Value::Int32((value >> 1) as i32 ^ -((value & 1) as i32))
        }
        (ScalarType::Sfixed32, Raw::Fixed32(value)) => Value::Int32(value as i32),
        (ScalarType::Int64, Raw::Varint(value)) => Value::Int64(value as i64),
        (ScalarType::Sint64, Raw::Varint(value)) => Value::Int64((value >> 1) as i64 ^ -((value & 1) as i64)),
        (ScalarType::Sfixed64, Raw::Fixed64(value)) => Value::Int64(value as i64),
        (ScalarType::Uint32, Raw::Varint(value)) => Value::Uint32(value as u32),
        (ScalarType::Fixed32, Raw::Fixed32(value)) => Value::Uint32(value),
        (ScalarType::Uint64, Raw::Varint(value)) => Value::Uint64(value),
        (ScalarType::Fixed64, Raw::Fixed64(value)) => Value::Uint64(value),
        (ScalarType::Bool, Raw::Varint(value)) => Value::Bool(value != 0),
        (ScalarType::String, Raw::Bytes(bytes)) => {
            let text = std::str::from_utf8(bytes).map_err(|error| CodecError::malformed(NAME, format!("'{path}': {error}")))?;
            Value::String(text.to_string())
        }
        (ScalarType::Bytes, Raw::Bytes(bytes)) => Value::Bytes(bytes.to_vec()),
        (kind, raw) => {
            return Err(CodecError::UnexpectedToken {
                token: format!("{} value at '{path}'", raw.wire_type().name()),
                expected: format!("{kind} ({})", WireType::of(kind).name()),
            });
        }
    };
    Ok(value)
}
