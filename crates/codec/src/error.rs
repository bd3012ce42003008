use switchyard_types::{SchemaError, Type, ValueError};
use thiserror::Error;

/// Failure while encoding a store into wire bytes or decoding wire bytes into a store.
///
/// A failed decode leaves every entry it already wrote in the store.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CodecError {
    #[error("unable to determine the wire type of '{path}'")]
    UnknownScalarType { path: String },
    #[error("malformed {codec} payload: {reason}")]
    Malformed { codec: &'static str, reason: String },
    #[error("unexpected {token}, expected {expected}")]
    UnexpectedToken { token: String, expected: String },
    #[error("unknown enum key '{key}' at '{path}'")]
    UnknownEnumKey { path: String, key: String },
    #[error("unknown enum position {position} at '{path}'")]
    UnknownEnumPosition { path: String, position: i32 },
    #[error("undefined property '{key}' in object '{path}'")]
    UndefinedProperty { path: String, key: String },
    #[error("invalid value at '{path}': {source}")]
    InvalidValue {
        path: String,
        #[source]
        source: ValueError,
    },
    #[error("the root of a protobuf message has to be a message, got '{kind}'")]
    NonMessageRoot { kind: Type },
    #[error("field number {number} is used more than once in message '{message}'")]
    DuplicateFieldNumber { message: String, number: i32 },
    #[error("property '{path}' has no valid field number, got {number}")]
    InvalidFieldNumber { path: String, number: i32 },
    #[error("unknown codec '{0}'")]
    UnknownCodec(String),
    #[error(transparent)]
    Schema(#[from] SchemaError),
}

impl CodecError {
    pub(crate) fn malformed(codec: &'static str, reason: impl ToString) -> Self {
        CodecError::Malformed {
            codec,
            reason: reason.to_string(),
        }
    }

    pub(crate) fn invalid_value(path: &str, source: ValueError) -> Self {
        CodecError::InvalidValue {
            path: path.to_string(),
            source,
        }
    }
}
