//! Errors raised by the template model.

use thiserror::Error;

use crate::kind::{Label, ScalarType, Type};

/// First structural difference found while comparing a template against the expected schema.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Mismatch {
    #[error("expected type '{expected}', got '{given}'")]
    Type { expected: Type, given: Type },
    #[error("expected label '{expected}', got '{given}'")]
    Label { expected: Label, given: Label },
    #[error("expected enum '{expected}', got '{given}'")]
    EnumName { expected: String, given: String },
    #[error("expected enum '{name}' to have {expected} keys, got {given}")]
    EnumKeyCount { name: String, expected: usize, given: usize },
    #[error("expected enum '{name}' to have {expected} positions, got {given}")]
    EnumPositionCount { name: String, expected: usize, given: usize },
    #[error("enum '{name}' is missing key '{key}'")]
    EnumKey { name: String, key: String },
    #[error("enum '{name}' is missing position {position}")]
    EnumPosition { name: String, position: i32 },
    #[error("expected enum value {expected_key}:{expected_position}, got {given_key}:{given_position}")]
    EnumValue {
        expected_key: String,
        expected_position: i32,
        given_key: String,
        given_position: i32,
    },
    #[error("expected at most {expected} fields, got {given}")]
    FieldCount { expected: usize, given: usize },
    #[error("field '{name}' is not declared by the schema")]
    UndefinedField { name: String },
    #[error("field '{name}': {source}")]
    Field { name: String, source: Box<Mismatch> },
    #[error("repeated element: {source}")]
    Element { source: Box<Mismatch> },
}

/// Schema level failure: incompatible shapes, oneOf violations or undeclared schemas.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SchemaError {
    #[error("type mismatch: {0}")]
    TypeMismatch(#[from] Mismatch),
    #[error("all the elements inside the array must have the same type, element {index} differs: {source}")]
    IncompatibleElements { index: usize, source: Mismatch },
    #[error("only a single oneOf field is allowed to be set, '{path}' already holds '{first}' and received '{second}'")]
    MultipleOneOfBranches { path: String, first: String, second: String },
    #[error("undeclared schema for path '{0}'")]
    UndeclaredSchema(String),
    #[error("invalid reference '{0}', expected 'resource:path'")]
    InvalidReference(String),
    #[error("invalid default for '{kind}': {reason}")]
    InvalidDefault { kind: ScalarType, reason: String },
}

/// Conversion failure between a runtime value and a declared scalar type.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("cannot convert '{value}' into {target}: {reason}")]
pub struct ValueError {
    pub value: String,
    pub target: ScalarType,
    pub reason: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_mismatch_message_includes_nested_cause() {
        let error = SchemaError::from(Mismatch::Field {
            name: "user".into(),
            source: Box::new(Mismatch::Type {
                expected: Type::Scalar(ScalarType::String),
                given: Type::Scalar(ScalarType::Int64),
            }),
        });
        assert_eq!(error.to_string(), "type mismatch: field 'user': expected type 'string', got 'int64'");
    }
}
