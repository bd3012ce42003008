//! The schema/value template: a closed union of scalar, enum, repeated, message and oneOf nodes.
//!
//! Templates form an owned tree. Recursive schemas are expressed with a *recursion marker*: a template whose kind is
//! [`TemplateKind::Unknown`] but which carries an [`Identifier`] stands for the nearest enclosing template with the
//! same identifier. Clone, Compare and Define thread a visited map keyed by identifier so shared and recursive
//! fragments are handled exactly once.

use std::collections::{BTreeMap, HashMap, HashSet};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::{Mismatch, SchemaError};
use crate::kind::{ScalarType, Type};
use crate::property::{Property, PropertyReference};
use crate::value::Value;

/// Stable identifier of a schema node, typically the fully qualified message or enum name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identifier(pub String);

impl Identifier {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Identifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Primitive template with an optional literal default.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Scalar {
    #[serde(rename = "type")]
    pub kind: ScalarType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

impl Scalar {
    pub fn new(kind: ScalarType) -> Self {
        Self { kind, default: None }
    }

    pub fn with_default(kind: ScalarType, default: Value) -> Result<Self, SchemaError> {
        let default = default.coerce(kind).map_err(|error| SchemaError::InvalidDefault {
            kind,
            reason: error.to_string(),
        })?;
        Ok(Self {
            kind,
            default: Some(default),
        })
    }
}

#[derive(Deserialize)]
struct ScalarDefinition {
    #[serde(rename = "type")]
    kind: ScalarType,
    #[serde(default)]
    default: Option<Value>,
}

impl<'de> Deserialize<'de> for Scalar {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let definition = ScalarDefinition::deserialize(deserializer)?;
        match definition.default {
            Some(default) => Scalar::with_default(definition.kind, default).map_err(serde::de::Error::custom),
            None => Ok(Scalar::new(definition.kind)),
        }
    }
}

/// One member of an enum.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnumValue {
    pub key: String,
    pub position: i32,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
}

impl EnumValue {
    pub fn new(key: impl Into<String>, position: i32) -> Self {
        Self {
            key: key.into(),
            position,
            description: String::new(),
        }
    }
}

/// Enum with lookup tables in both directions. Both tables are maintained together so every value is reachable by
/// key and by position.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(from = "EnumDefinition", into = "EnumDefinition")]
pub struct Enum {
    pub name: String,
    pub description: String,
    keys: IndexMap<String, EnumValue>,
    positions: BTreeMap<i32, EnumValue>,
}

impl Enum {
    pub fn new(name: impl Into<String>, values: impl IntoIterator<Item = EnumValue>) -> Self {
        let mut result = Self {
            name: name.into(),
            ..Self::default()
        };
        for value in values {
            result.insert(value);
        }
        result
    }

    /// Insert or replace a value in both lookup tables.
    pub fn insert(&mut self, value: EnumValue) {
        if let Some(previous) = self.keys.shift_remove(&value.key) {
            self.positions.remove(&previous.position);
        }
        if let Some(previous) = self.positions.remove(&value.position) {
            self.keys.shift_remove(&previous.key);
        }
        self.positions.insert(value.position, value.clone());
        self.keys.insert(value.key.clone(), value);
    }

    pub fn key(&self, key: &str) -> Option<&EnumValue> {
        self.keys.get(key)
    }

    pub fn position(&self, position: i32) -> Option<&EnumValue> {
        self.positions.get(&position)
    }

    pub fn keys(&self) -> &IndexMap<String, EnumValue> {
        &self.keys
    }

    pub fn positions(&self) -> &BTreeMap<i32, EnumValue> {
        &self.positions
    }

    fn compare(&self, expected: &Enum) -> Result<(), Mismatch> {
        if self.name != expected.name {
            return Err(Mismatch::EnumName {
                expected: expected.name.clone(),
                given: self.name.clone(),
            });
        }
        if self.keys.len() != expected.keys.len() {
            return Err(Mismatch::EnumKeyCount {
                name: expected.name.clone(),
                expected: expected.keys.len(),
                given: self.keys.len(),
            });
        }
        if self.positions.len() != expected.positions.len() {
            return Err(Mismatch::EnumPositionCount {
                name: expected.name.clone(),
                expected: expected.positions.len(),
                given: self.positions.len(),
            });
        }
        for (key, value) in &expected.keys {
            let given = self.keys.get(key).ok_or_else(|| Mismatch::EnumKey {
                name: expected.name.clone(),
                key: key.clone(),
            })?;
            compare_enum_values(value, given)?;
        }
        for (position, value) in &expected.positions {
            let given = self.positions.get(position).ok_or_else(|| Mismatch::EnumPosition {
                name: expected.name.clone(),
                position: *position,
            })?;
            compare_enum_values(value, given)?;
        }
        Ok(())
    }
}

fn compare_enum_values(expected: &EnumValue, given: &EnumValue) -> Result<(), Mismatch> {
    if expected.key != given.key || expected.position != given.position {
        return Err(Mismatch::EnumValue {
            expected_key: expected.key.clone(),
            expected_position: expected.position,
            given_key: given.key.clone(),
            given_position: given.position,
        });
    }
    Ok(())
}

#[derive(Serialize, Deserialize)]
struct EnumDefinition {
    name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    description: String,
    values: Vec<EnumValue>,
}

impl From<EnumDefinition> for Enum {
    fn from(definition: EnumDefinition) -> Self {
        let mut result = Enum::new(definition.name, definition.values);
        result.description = definition.description;
        result
    }
}

impl From<Enum> for EnumDefinition {
    fn from(value: Enum) -> Self {
        EnumDefinition {
            name: value.name,
            description: value.description,
            values: value.positions.into_values().collect(),
        }
    }
}

/// Ordered list of candidate element slots. All slots must share one shape, see [`Repeated::normalize`].
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Repeated {
    pub elements: Vec<Template>,
}

impl Repeated {
    pub fn new(elements: Vec<Template>) -> Self {
        Self { elements }
    }

    /// Validate that every pair of slots is structurally compatible and return one representative element with its
    /// literal default cleared. Runtime array elements are always store backed.
    pub fn normalize(&self) -> Result<Template, SchemaError> {
        let Some(first) = self.elements.first() else {
            return Ok(Template::default());
        };
        for (index, element) in self.elements.iter().enumerate() {
            for (other_index, other) in self.elements.iter().enumerate() {
                if index == other_index {
                    continue;
                }
                element
                    .compare_visited(other, &mut HashSet::new())
                    .map_err(|source| SchemaError::IncompatibleElements { index, source })?;
            }
        }
        let mut template = first.clone();
        template.clear_default();
        Ok(template)
    }
}

/// Message fields keyed by name. Iteration for encoding must go through [`Message::sorted_properties`].
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(transparent)]
pub struct Message {
    fields: IndexMap<String, Property>,
}

/// A oneOf shares the message representation; at most one branch may be populated at runtime.
pub type OneOf = Message;

impl Message {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a field keyed by its name.
    pub fn insert(&mut self, property: Property) -> Option<Property> {
        self.fields.insert(property.name.clone(), property)
    }

    pub fn with(mut self, property: Property) -> Self {
        self.insert(property);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Property> {
        self.fields.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Property> {
        self.fields.get_mut(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Property)> {
        self.fields.iter()
    }

    pub fn values(&self) -> impl Iterator<Item = &Property> {
        self.fields.values()
    }

    pub fn values_mut(&mut self) -> impl Iterator<Item = &mut Property> {
        self.fields.values_mut()
    }

    /// Fields ordered by position, ties broken by name.
    pub fn sorted_properties(&self) -> Vec<&Property> {
        let mut properties: Vec<&Property> = self.fields.values().collect();
        properties.sort_by(|left, right| left.position.cmp(&right.position).then_with(|| left.name.cmp(&right.name)));
        properties
    }

    fn clone_visited(&self, visited: &mut HashMap<Identifier, Template>) -> Message {
        let fields = self
            .fields
            .iter()
            .map(|(name, property)| (name.clone(), property.clone_visited(visited)))
            .collect();
        Message { fields }
    }

    fn compare_visited(&self, expected: &Message, visited: &mut HashSet<Identifier>) -> Result<(), Mismatch> {
        if self.fields.len() > expected.fields.len() {
            return Err(Mismatch::FieldCount {
                expected: expected.fields.len(),
                given: self.fields.len(),
            });
        }
        for (name, property) in &self.fields {
            let Some(declared) = expected.fields.get(name) else {
                return Err(Mismatch::UndefinedField { name: name.clone() });
            };
            property.compare_visited(declared, visited).map_err(|source| Mismatch::Field {
                name: name.clone(),
                source: Box::new(source),
            })?;
        }
        Ok(())
    }

    fn define_visited(&mut self, expected: &Message, visited: &mut HashSet<Identifier>) {
        for (name, declared) in &expected.fields {
            match self.fields.get_mut(name) {
                Some(existing) => existing.define_visited(declared, visited),
                None => {
                    self.fields.insert(name.clone(), declared.clone_visited(&mut HashMap::new()));
                }
            }
        }
    }
}

impl<'de> Deserialize<'de> for Message {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let mut fields = IndexMap::<String, Property>::deserialize(deserializer)?;
        for (name, property) in &mut fields {
            if property.name.is_empty() {
                property.name = name.clone();
            }
        }
        Ok(Message { fields })
    }
}

impl FromIterator<Property> for Message {
    fn from_iter<T: IntoIterator<Item = Property>>(iter: T) -> Self {
        let mut message = Message::new();
        for property in iter {
            message.insert(property);
        }
        message
    }
}

/// Kind of a template node. Exactly one variant applies.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum TemplateKind {
    #[default]
    Unknown,
    Scalar(Scalar),
    Enum(Enum),
    Repeated(Repeated),
    Message(Message),
    OneOf(OneOf),
}

/// Schema node plus the symbolic reference that fills it at runtime.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(from = "TemplateDefinition", into = "TemplateDefinition")]
pub struct Template {
    pub identifier: Option<Identifier>,
    pub reference: Option<PropertyReference>,
    pub kind: TemplateKind,
}

impl Template {
    pub fn new(kind: TemplateKind) -> Self {
        Self {
            identifier: None,
            reference: None,
            kind,
        }
    }

    pub fn scalar(kind: ScalarType) -> Self {
        Self::new(TemplateKind::Scalar(Scalar::new(kind)))
    }

    pub fn enumeration(value: Enum) -> Self {
        Self::new(TemplateKind::Enum(value))
    }

    pub fn repeated(elements: Vec<Template>) -> Self {
        Self::new(TemplateKind::Repeated(Repeated::new(elements)))
    }

    pub fn message(message: Message) -> Self {
        Self::new(TemplateKind::Message(message))
    }

    pub fn one_of(branches: OneOf) -> Self {
        Self::new(TemplateKind::OneOf(branches))
    }

    /// Marker standing for the enclosing template carrying `identifier`.
    pub fn recursion(identifier: Identifier) -> Self {
        Self {
            identifier: Some(identifier),
            reference: None,
            kind: TemplateKind::Unknown,
        }
    }

    pub fn with_reference(mut self, reference: PropertyReference) -> Self {
        self.reference = Some(reference);
        self
    }

    pub fn with_identifier(mut self, identifier: Identifier) -> Self {
        self.identifier = Some(identifier);
        self
    }

    pub fn is_recursion_marker(&self) -> bool {
        self.identifier.is_some() && matches!(self.kind, TemplateKind::Unknown)
    }

    /// Resolved type used for codec dispatch.
    pub fn r#type(&self) -> Type {
        match &self.kind {
            TemplateKind::Message(_) => Type::Message,
            TemplateKind::Repeated(_) => Type::Array,
            TemplateKind::Enum(_) => Type::Enum,
            TemplateKind::Scalar(scalar) => Type::Scalar(scalar.kind),
            TemplateKind::OneOf(_) => Type::OneOf,
            TemplateKind::Unknown => Type::Unknown,
        }
    }

    /// Literal default of a scalar template.
    pub fn default_value(&self) -> Option<&Value> {
        match &self.kind {
            TemplateKind::Scalar(scalar) => scalar.default.as_ref(),
            _ => None,
        }
    }

    pub fn clear_default(&mut self) {
        if let TemplateKind::Scalar(scalar) = &mut self.kind {
            scalar.default = None;
        }
    }

    pub fn as_message(&self) -> Option<&Message> {
        match &self.kind {
            TemplateKind::Message(message) => Some(message),
            _ => None,
        }
    }

    pub fn as_enum(&self) -> Option<&Enum> {
        match &self.kind {
            TemplateKind::Enum(value) => Some(value),
            _ => None,
        }
    }

    /// Deep copy memoized by identifier: a node carrying an identifier is cloned once and later visits reuse the
    /// clone. Recursion markers are copied as-is, which terminates self-referencing schemas.
    pub fn clone_visited(&self, visited: &mut HashMap<Identifier, Template>) -> Template {
        if self.is_recursion_marker() {
            return self.clone();
        }
        if let Some(identifier) = &self.identifier
            && let Some(built) = visited.get(identifier)
        {
            let mut reused = built.clone();
            reused.reference = self.reference.clone();
            return reused;
        }

        let kind = match &self.kind {
            TemplateKind::Message(message) => TemplateKind::Message(message.clone_visited(visited)),
            TemplateKind::OneOf(branches) => TemplateKind::OneOf(branches.clone_visited(visited)),
            TemplateKind::Repeated(repeated) => TemplateKind::Repeated(Repeated::new(
                repeated.elements.iter().map(|element| element.clone_visited(visited)).collect(),
            )),
            other => other.clone(),
        };
        let clone = Template {
            identifier: self.identifier.clone(),
            reference: self.reference.clone(),
            kind,
        };
        if let Some(identifier) = &self.identifier {
            visited.insert(identifier.clone(), clone.clone());
        }
        clone
    }

    /// Structural equality check against the expected schema, returning the first mismatch.
    pub fn compare(&self, expected: &Template) -> Result<(), SchemaError> {
        self.compare_visited(expected, &mut HashSet::new()).map_err(SchemaError::TypeMismatch)
    }

    pub(crate) fn compare_visited(&self, expected: &Template, visited: &mut HashSet<Identifier>) -> Result<(), Mismatch> {
        if self.is_recursion_marker() || expected.is_recursion_marker() {
            if self.identifier == expected.identifier {
                return Ok(());
            }
            return Err(Mismatch::Type {
                expected: expected.r#type(),
                given: self.r#type(),
            });
        }
        if let Some(identifier) = &expected.identifier
            && !visited.insert(identifier.clone())
        {
            return Ok(());
        }

        match (&self.kind, &expected.kind) {
            (TemplateKind::Unknown, TemplateKind::Unknown) => Ok(()),
            (TemplateKind::Scalar(given), TemplateKind::Scalar(declared)) if given.kind == declared.kind => Ok(()),
            (TemplateKind::Enum(given), TemplateKind::Enum(declared)) => given.compare(declared),
            (TemplateKind::Message(given), TemplateKind::Message(declared)) => given.compare_visited(declared, visited),
            (TemplateKind::OneOf(given), TemplateKind::OneOf(declared)) => given.compare_visited(declared, visited),
            (TemplateKind::Repeated(given), TemplateKind::Repeated(declared)) => {
                let element_error = |error: SchemaError| match error {
                    SchemaError::IncompatibleElements { source, .. } | SchemaError::TypeMismatch(source) => Mismatch::Element {
                        source: Box::new(source),
                    },
                    other => Mismatch::Element {
                        source: Box::new(Mismatch::UndefinedField { name: other.to_string() }),
                    },
                };
                let given = given.normalize().map_err(element_error)?;
                let declared = declared.normalize().map_err(element_error)?;
                given.compare_visited(&declared, visited).map_err(|source| Mismatch::Element {
                    source: Box::new(source),
                })
            }
            _ => Err(Mismatch::Type {
                expected: expected.r#type(),
                given: self.r#type(),
            }),
        }
    }

    /// Fill structural gaps from the expected schema without overwriting what is already present.
    pub fn define(&mut self, expected: &Template) {
        self.define_visited(expected, &mut HashSet::new());
    }

    pub(crate) fn define_visited(&mut self, expected: &Template, visited: &mut HashSet<Identifier>) {
        if self.is_recursion_marker() {
            return;
        }
        if let Some(identifier) = &expected.identifier
            && !visited.insert(identifier.clone())
        {
            return;
        }
        if self.identifier.is_none() {
            self.identifier = expected.identifier.clone();
        }
        if matches!(self.kind, TemplateKind::Unknown) {
            self.kind = expected.clone_visited(&mut HashMap::new()).kind;
            return;
        }

        match (&mut self.kind, &expected.kind) {
            (TemplateKind::Message(given), TemplateKind::Message(declared)) => given.define_visited(declared, visited),
            (TemplateKind::OneOf(given), TemplateKind::OneOf(declared)) => given.define_visited(declared, visited),
            (TemplateKind::Repeated(given), TemplateKind::Repeated(declared)) => {
                if given.elements.is_empty() {
                    given.elements = declared.elements.clone();
                } else if let Ok(element) = declared.normalize() {
                    for slot in &mut given.elements {
                        slot.define_visited(&element, visited);
                    }
                }
            }
            _ => {}
        }
    }

    /// Point this template at a referenced runtime value.
    ///
    /// Scalars and enums read the reference itself, message fields read `resource:path.field`, and repeated
    /// elements inherit the array reference so the tracker can index them.
    pub fn bind_reference(&mut self, reference: &PropertyReference) {
        match &mut self.kind {
            TemplateKind::Message(fields) | TemplateKind::OneOf(fields) => {
                for field in fields.values_mut() {
                    let nested = reference.join(&field.name);
                    field.template.bind_reference(&nested);
                }
            }
            TemplateKind::Repeated(repeated) => {
                for element in &mut repeated.elements {
                    element.bind_reference(reference);
                }
            }
            TemplateKind::Scalar(_) | TemplateKind::Enum(_) | TemplateKind::Unknown => {}
        }
        self.reference = Some(reference.unresolved());
    }
}

#[derive(Serialize, Deserialize)]
struct TemplateDefinition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    identifier: Option<Identifier>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    reference: Option<PropertyReference>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    scalar: Option<Scalar>,
    #[serde(default, rename = "enum", skip_serializing_if = "Option::is_none")]
    enumeration: Option<Enum>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    repeated: Option<Repeated>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    message: Option<Message>,
    #[serde(default, rename = "oneOf", skip_serializing_if = "Option::is_none")]
    one_of: Option<OneOf>,
}

impl From<TemplateDefinition> for Template {
    // Authored documents may set several kinds; the first match wins: message, repeated, enum, scalar, oneOf.
    fn from(definition: TemplateDefinition) -> Self {
        let kind = if let Some(message) = definition.message {
            TemplateKind::Message(message)
        } else if let Some(repeated) = definition.repeated {
            TemplateKind::Repeated(repeated)
        } else if let Some(value) = definition.enumeration {
            TemplateKind::Enum(value)
        } else if let Some(scalar) = definition.scalar {
            TemplateKind::Scalar(scalar)
        } else if let Some(branches) = definition.one_of {
            TemplateKind::OneOf(branches)
        } else {
            TemplateKind::Unknown
        };
        Template {
            identifier: definition.identifier,
            reference: definition.reference,
            kind,
        }
    }
}

impl From<Template> for TemplateDefinition {
    fn from(template: Template) -> Self {
        let mut definition = TemplateDefinition {
            identifier: template.identifier,
            reference: template.reference.map(|reference| reference.unresolved()),
            scalar: None,
            enumeration: None,
            repeated: None,
            message: None,
            one_of: None,
        };
        match template.kind {
            TemplateKind::Unknown => {}
            TemplateKind::Scalar(scalar) => definition.scalar = Some(scalar),
            TemplateKind::Enum(value) => definition.enumeration = Some(value),
            TemplateKind::Repeated(repeated) => definition.repeated = Some(repeated),
            TemplateKind::Message(message) => definition.message = Some(message),
            TemplateKind::OneOf(branches) => definition.one_of = Some(branches),
        }
        definition
    }
}
