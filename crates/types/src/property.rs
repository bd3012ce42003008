//! Properties and symbolic property references.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;

use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{Mismatch, SchemaError};
use crate::kind::Label;
use crate::path::{PATH_DELIMITER, RESOURCE_DELIMITER, join_path, resource_path};
use crate::template::{Identifier, Template, TemplateKind};

static REFERENCE_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z0-9_\-\.]*:[a-zA-Z0-9\^\&%\$@_\-\.]*$").expect("reference pattern should compile"));

/// Free-form options copied from the owning schema (for example transport specific annotations).
pub type Options = IndexMap<String, String>;

/// Named, positioned wrapper around a [`Template`].
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Property {
    /// Field name inside the parent message.
    #[serde(default)]
    pub name: String,
    /// Dotted path, absolute within the root property.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub path: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    /// Ordering key, and the field number for binary formats.
    #[serde(default)]
    pub position: i32,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub options: Options,
    /// Raw authored expression, kept for diagnostics.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expression: Option<String>,
    #[serde(default)]
    pub label: Label,
    #[serde(flatten)]
    pub template: Template,
}

impl Property {
    pub fn new(name: impl Into<String>, template: Template) -> Self {
        let name = name.into();
        Self {
            path: name.clone(),
            name,
            template,
            ..Self::default()
        }
    }

    pub fn with_position(mut self, position: i32) -> Self {
        self.position = position;
        self
    }

    pub fn with_label(mut self, label: Label) -> Self {
        self.label = label;
        self
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    pub fn with_reference(mut self, reference: PropertyReference) -> Self {
        self.template.reference = Some(reference);
        self
    }

    /// Property the reference resolved to, when resolution has run.
    pub fn resolved_reference(&self) -> Option<&Property> {
        self.template.reference.as_ref().and_then(|reference| reference.property.as_deref())
    }

    /// Assign absolute paths below `parent` and fill missing field positions in declaration order.
    ///
    /// Repeated element fields share the array path; the tracker adds indices at runtime.
    pub fn layout(&mut self, parent: &str) {
        self.path = join_path([parent, self.name.as_str()]);
        let path = self.path.clone();
        layout_template(&mut self.template, &path);
    }

    pub fn clone_visited(&self, visited: &mut HashMap<Identifier, Template>) -> Property {
        Property {
            name: self.name.clone(),
            path: self.path.clone(),
            description: self.description.clone(),
            position: self.position,
            options: self.options.clone(),
            expression: self.expression.clone(),
            label: self.label,
            template: self.template.clone_visited(visited),
        }
    }

    /// Compare this property against the expected schema property.
    pub fn compare(&self, expected: &Property) -> Result<(), SchemaError> {
        self.compare_visited(expected, &mut HashSet::new()).map_err(SchemaError::TypeMismatch)
    }

    pub(crate) fn compare_visited(&self, expected: &Property, visited: &mut HashSet<Identifier>) -> Result<(), Mismatch> {
        if self.label != expected.label {
            return Err(Mismatch::Label {
                expected: expected.label,
                given: self.label,
            });
        }
        self.template.compare_visited(&expected.template, visited)
    }

    /// Backfill structure and metadata declared by the schema but omitted by the author.
    pub fn define(&mut self, expected: &Property) {
        self.define_visited(expected, &mut HashSet::new());
    }

    pub(crate) fn define_visited(&mut self, expected: &Property, visited: &mut HashSet<Identifier>) {
        if self.position == 0 {
            self.position = expected.position;
        }
        if self.description.is_empty() {
            self.description = expected.description.clone();
        }
        if self.options.is_empty() {
            self.options = expected.options.clone();
        }
        self.template.define_visited(&expected.template, visited);
    }
}

fn layout_template(template: &mut Template, path: &str) {
    match &mut template.kind {
        TemplateKind::Message(fields) | TemplateKind::OneOf(fields) => {
            let mut next_position = fields.values().map(|field| field.position).max().unwrap_or(0);
            for field in fields.values_mut() {
                if field.position == 0 {
                    next_position += 1;
                    field.position = next_position;
                }
                field.layout(path);
            }
        }
        TemplateKind::Repeated(repeated) => {
            for element in &mut repeated.elements {
                layout_template(element, path);
            }
        }
        TemplateKind::Scalar(_) | TemplateKind::Enum(_) | TemplateKind::Unknown => {}
    }
}

/// Symbolic `resource:path` address of a value.
///
/// `resource` may carry a qualifier (`node.header`). Once resolved, `property` holds a copy of the target.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PropertyReference {
    pub resource: String,
    pub path: String,
    pub property: Option<Box<Property>>,
}

impl PropertyReference {
    pub fn new(resource: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            path: path.into(),
            property: None,
        }
    }

    /// Reference to a nested field below this reference.
    pub fn join(&self, segment: &str) -> Self {
        Self::new(self.resource.clone(), join_path([self.path.as_str(), segment]))
    }

    /// Copy of this reference without the resolved target.
    pub fn unresolved(&self) -> Self {
        Self::new(self.resource.clone(), self.path.clone())
    }

    pub fn is_resolved(&self) -> bool {
        self.property.is_some()
    }

    /// Store key addressed by this reference.
    pub fn key(&self) -> String {
        resource_path(&self.resource, &self.path)
    }
}

impl PartialEq for PropertyReference {
    fn eq(&self, other: &Self) -> bool {
        self.resource == other.resource && self.path == other.path
    }
}

impl fmt::Display for PropertyReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.resource, RESOURCE_DELIMITER, self.path.trim_matches(PATH_DELIMITER))
    }
}

impl FromStr for PropertyReference {
    type Err = SchemaError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        if !REFERENCE_PATTERN.is_match(trimmed) {
            return Err(SchemaError::InvalidReference(value.to_string()));
        }
        let (resource, path) = trimmed
            .split_once(RESOURCE_DELIMITER)
            .ok_or_else(|| SchemaError::InvalidReference(value.to_string()))?;
        Ok(Self::new(resource, path))
    }
}

impl TryFrom<String> for PropertyReference {
    type Error = SchemaError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<PropertyReference> for String {
    fn from(reference: PropertyReference) -> Self {
        reference.to_string()
    }
}
