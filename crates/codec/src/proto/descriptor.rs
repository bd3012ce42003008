//! Protobuf message descriptors derived from a property tree.
//!
//! Field numbers are property positions. Nested messages are declared inside their parent as `<Key>Nested`, enums as
//! `<Key>Enum`, oneOf properties become a nested message holding a single `oneof value` group. Recursion markers
//! refer back to the enclosing message with the same identifier.

use std::collections::HashSet;
use std::fmt::{self, Write};

use heck::ToUpperCamelCase;
use switchyard_types::{Enum, Identifier, Message, Property, ScalarType, Template, TemplateKind};

use crate::CodecError;

const ONE_OF_GROUP: &str = "value";

#[derive(Debug, Clone, PartialEq)]
pub struct MessageDescriptor {
    pub name: String,
    pub description: String,
    pub fields: Vec<FieldDescriptor>,
    pub messages: Vec<MessageDescriptor>,
    pub enums: Vec<EnumDescriptor>,
    /// Name of the oneof group wrapping every field.
    pub one_of: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldDescriptor {
    pub name: String,
    pub description: String,
    pub number: u32,
    pub repeated: bool,
    pub kind: FieldKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FieldKind {
    Scalar(ScalarType),
    Message(String),
    Enum(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct EnumDescriptor {
    pub name: String,
    pub values: Vec<(String, i32)>,
}

impl MessageDescriptor {
    /// Descriptor named `name` for the message or oneOf `property`.
    pub fn from_property(name: &str, property: &Property) -> Result<Self, CodecError> {
        let (fields, one_of) = match &property.template.kind {
            TemplateKind::Message(fields) => (fields, false),
            TemplateKind::OneOf(fields) => (fields, true),
            _ => {
                return Err(CodecError::NonMessageRoot {
                    kind: property.template.r#type(),
                });
            }
        };
        let mut builder = Builder::default();
        let mut descriptor = builder.message(name, &property.template, fields, one_of)?;
        descriptor.description = property.description.clone();
        Ok(descriptor)
    }

    pub fn field(&self, number: u32) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|field| field.number == number)
    }

    /// Complete `.proto` file declaring this message.
    pub fn to_proto(&self, package: Option<&str>) -> String {
        let mut out = String::from("syntax = \"proto3\";\n\n");
        if let Some(package) = package {
            let _ = writeln!(out, "package {package};\n");
        }
        let _ = self.render(&mut out, 0);
        out
    }

    fn render(&self, out: &mut impl Write, depth: usize) -> fmt::Result {
        let indent = "  ".repeat(depth);
        comment(out, &indent, &self.description)?;
        writeln!(out, "{indent}message {} {{", self.name)?;

        let mut inner = format!("{indent}  ");
        if let Some(group) = &self.one_of {
            writeln!(out, "{inner}oneof {group} {{")?;
            inner.push_str("  ");
        }
        for field in &self.fields {
            comment(out, &inner, &field.description)?;
            writeln!(out, "{inner}{field};")?;
        }
        if self.one_of.is_some() {
            writeln!(out, "{indent}  }}")?;
        }

        for enumeration in &self.enums {
            writeln!(out)?;
            enumeration.render(out, depth + 1)?;
        }
        for message in &self.messages {
            writeln!(out)?;
            message.render(out, depth + 1)?;
        }
        writeln!(out, "{indent}}}")
    }
}

impl fmt::Display for MessageDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.render(f, 0)
    }
}

impl fmt::Display for FieldDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.repeated {
            f.write_str("repeated ")?;
        }
        match &self.kind {
            FieldKind::Scalar(kind) => write!(f, "{kind}")?,
            FieldKind::Message(name) | FieldKind::Enum(name) => f.write_str(name)?,
        }
        write!(f, " {} = {}", self.name, self.number)
    }
}

impl EnumDescriptor {
    fn from_enum(name: String, enumeration: &Enum) -> Self {
        let values = enumeration
            .positions()
            .values()
            .map(|value| (value.key.clone(), value.position))
            .collect();
        Self { name, values }
    }

    fn render(&self, out: &mut impl Write, depth: usize) -> fmt::Result {
        let indent = "  ".repeat(depth);
        writeln!(out, "{indent}enum {} {{", self.name)?;
        for (key, position) in &self.values {
            writeln!(out, "{indent}  {key} = {position};")?;
        }
        writeln!(out, "{indent}}}")
    }
}

fn comment(out: &mut impl Write, indent: &str, description: &str) -> fmt::Result {
    for line in description.lines() {
        writeln!(out, "{indent}// {line}")?;
    }
    Ok(())
}

/// Identified messages currently being built, innermost last.
#[derive(Default)]
struct Builder {
    scope: Vec<(Identifier, String)>,
}

impl Builder {
    fn message(&mut self, name: &str, template: &Template, fields: &Message, one_of: bool) -> Result<MessageDescriptor, CodecError> {
        let mut descriptor = MessageDescriptor {
            name: name.to_string(),
            description: String::new(),
            fields: Vec::with_capacity(fields.len()),
            messages: Vec::new(),
            enums: Vec::new(),
            one_of: one_of.then(|| ONE_OF_GROUP.to_string()),
        };

        let scoped = template.identifier.clone();
        if let Some(identifier) = &scoped {
            self.scope.push((identifier.clone(), name.to_string()));
        }
        let result = self.fields(&mut descriptor, fields);
        if scoped.is_some() {
            self.scope.pop();
        }
        result?;
        Ok(descriptor)
    }

    fn fields(&mut self, descriptor: &mut MessageDescriptor, fields: &Message) -> Result<(), CodecError> {
        let mut numbers = HashSet::new();
        for property in fields.sorted_properties() {
            let number = u32::try_from(property.position)
                .ok()
                .filter(|number| *number > 0)
                .ok_or_else(|| CodecError::InvalidFieldNumber {
                    path: property.path.clone(),
                    number: property.position,
                })?;
            if !numbers.insert(number) {
                return Err(CodecError::DuplicateFieldNumber {
                    message: descriptor.name.clone(),
                    number: property.position,
                });
            }

            let (template, repeated) = match &property.template.kind {
                TemplateKind::Repeated(repeated) => (repeated.normalize()?, true),
                _ => (property.template.clone(), false),
            };
            let kind = self.kind(descriptor, property, &template)?;
            descriptor.fields.push(FieldDescriptor {
                name: property.name.clone(),
                description: property.description.clone(),
                number,
                repeated,
                kind,
            });
        }
        Ok(())
    }

    fn kind(&mut self, parent: &mut MessageDescriptor, property: &Property, template: &Template) -> Result<FieldKind, CodecError> {
        if template.is_recursion_marker() {
            let enclosing = template.identifier.as_ref().and_then(|identifier| {
                self.scope
                    .iter()
                    .rev()
                    .find(|(scoped, _)| scoped == identifier)
                    .map(|(_, name)| name.clone())
            });
            return enclosing.map(FieldKind::Message).ok_or_else(|| CodecError::UnknownScalarType {
                path: property.path.clone(),
            });
        }

        let key = property.name.to_upper_camel_case();
        match &template.kind {
            TemplateKind::Scalar(scalar) => Ok(FieldKind::Scalar(scalar.kind)),
            TemplateKind::Enum(enumeration) => {
                let name = format!("{key}Enum");
                parent.enums.push(EnumDescriptor::from_enum(name.clone(), enumeration));
                Ok(FieldKind::Enum(name))
            }
            TemplateKind::Message(fields) | TemplateKind::OneOf(fields) => {
                let name = format!("{key}Nested");
                let one_of = matches!(template.kind, TemplateKind::OneOf(_));
                let nested = self.message(&name, template, fields, one_of)?;
                parent.messages.push(nested);
                Ok(FieldKind::Message(name))
            }
            // Nested arrays have no protobuf representation.
            TemplateKind::Repeated(_) | TemplateKind::Unknown => Err(CodecError::UnknownScalarType {
                path: property.path.clone(),
            }),
        }
    }
}
