//! Format independent walk of a template against the reference store.
//!
//! Encoding reads the value behind every template reference and hands it to an [`Emitter`]. Decoding asks a
//! [`Source`] for the node matching every declared field and stores what it finds below the decode path. Both walks
//! own the [`Tracker`] of one marshal/unmarshal call, which turns template paths into indexed store keys while
//! repeated values are iterated.

use switchyard_store::{Store, Tracker};
use switchyard_types::path::join_path;
use switchyard_types::{Enum, EnumValue, Identifier, Message, Property, Repeated, ScalarType, SchemaError, Template, TemplateKind, Value};

use crate::error::CodecError;

/// Position of the value being written or read.
#[derive(Debug, Clone, Copy)]
pub enum Slot<'a> {
    /// The property handed to the manager.
    Root(&'a Property),
    /// Field of an enclosing message or oneOf.
    Field(&'a Property),
    /// Element of the given repeated property.
    Element(&'a Property),
}

impl<'a> Slot<'a> {
    pub fn property(&self) -> &'a Property {
        match self {
            Slot::Root(property) | Slot::Field(property) | Slot::Element(property) => property,
        }
    }

    /// Object key of field slots.
    pub fn key(&self) -> Option<&'a str> {
        match self {
            Slot::Field(property) => Some(property.name.as_str()),
            Slot::Root(_) | Slot::Element(_) => None,
        }
    }

    pub fn is_element(&self) -> bool {
        matches!(self, Slot::Element(_))
    }
}

/// Leaf writers of one wire format.
///
/// `path` is the absolute, tracker resolved store path of the slot (`input:items[1].name`).
pub trait Emitter {
    fn begin_message(&mut self, slot: Slot<'_>) -> Result<(), CodecError>;
    fn end_message(&mut self, slot: Slot<'_>) -> Result<(), CodecError>;
    /// `element` is the normalized element template.
    fn begin_array(&mut self, slot: Slot<'_>, element: &Template) -> Result<(), CodecError>;
    fn end_array(&mut self, slot: Slot<'_>) -> Result<(), CodecError>;
    /// `value` is already coerced into `kind`.
    fn scalar(&mut self, slot: Slot<'_>, path: &str, kind: ScalarType, value: &Value) -> Result<(), CodecError>;
    fn enumeration(&mut self, slot: Slot<'_>, path: &str, value: &EnumValue) -> Result<(), CodecError>;
    /// Slot without a value. Keyed slots are usually left out, elements keep their index.
    fn absent(&mut self, slot: Slot<'_>, path: &str) -> Result<(), CodecError>;
}

/// Enum literal as it appears on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Symbol {
    Key(String),
    Position(i32),
}

/// Parsed payload node of one wire format.
pub trait Source: Sized {
    /// Node carrying `property` inside this message node, `None` when the payload leaves it out.
    fn field(&self, property: &Property) -> Result<Option<Self>, CodecError>;

    /// Nodes of this array node.
    fn elements(&self, element: &Template) -> Result<Vec<Self>, CodecError>;

    /// Scalar converted into `kind`. `path` is the store path used in errors.
    fn scalar(&self, kind: ScalarType, path: &str) -> Result<Value, CodecError>;

    fn enumeration(&self) -> Result<Symbol, CodecError>;

    fn is_null(&self) -> bool {
        false
    }

    /// Keys of this message node that `message` does not declare.
    fn undeclared(&self, _message: &Message) -> Vec<String> {
        Vec::new()
    }
}

/// How a decoder treats object keys the message does not declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UndefinedKeys {
    Ignore,
    Reject,
}

/// Encode `property` whose values live below the absolute `path` (`resource:` followed by the property path).
pub fn encode<E: Emitter>(property: &Property, path: &str, store: &Store, tracker: &mut Tracker, emitter: &mut E) -> Result<(), CodecError> {
    let mut encoder = Encoder { store, tracker, emitter };
    encoder.template(Slot::Root(property), &property.template, path, None)
}

/// Decode `source` into the store below the absolute `path`.
pub fn decode<S: Source>(
    source: &S,
    property: &Property,
    path: &str,
    store: &Store,
    tracker: &mut Tracker,
    policy: UndefinedKeys,
) -> Result<(), CodecError> {
    if source.is_null() {
        return Ok(());
    }
    let mut decoder = Decoder { store, tracker, policy };
    decoder.template(source, &property.template, path, None)
}

struct Encoder<'w, E> {
    store: &'w Store,
    tracker: &'w mut Tracker,
    emitter: &'w mut E,
}

impl<E: Emitter> Encoder<'_, E> {
    fn template(&mut self, slot: Slot<'_>, template: &Template, path: &str, scope: Option<&Scope<'_>>) -> Result<(), CodecError> {
        if template.is_recursion_marker() {
            return self.recursion(slot, template, path, scope);
        }

        let nested;
        let scope = if template.identifier.is_some() {
            nested = Scope { template, parent: scope };
            Some(&nested)
        } else {
            scope
        };

        match &template.kind {
            TemplateKind::Message(fields) | TemplateKind::OneOf(fields) => {
                self.emitter.begin_message(slot)?;
                for field in fields.sorted_properties() {
                    self.template(Slot::Field(field), &field.template, &join_path([path, field.name.as_str()]), scope)?;
                }
                self.emitter.end_message(slot)
            }
            TemplateKind::Repeated(repeated) => self.repeated(slot, template, repeated, path, scope),
            TemplateKind::Enum(enumeration) => self.enumeration(slot, template, enumeration, path),
            TemplateKind::Scalar(scalar) => {
                let resolved = self.tracker.resolve(path);
                let stored = template
                    .reference
                    .as_ref()
                    .and_then(|reference| self.store.load_value(&self.tracker.resolve(&reference.key())));
                let Some(value) = stored.as_ref().or(scalar.default.as_ref()) else {
                    return self.emitter.absent(slot, &resolved);
                };
                let value = value.coerce(scalar.kind).map_err(|error| CodecError::invalid_value(&resolved, error))?;
                self.emitter.scalar(slot, &resolved, scalar.kind, &value)
            }
            TemplateKind::Unknown => {
                let resolved = self.tracker.resolve(path);
                self.emitter.absent(slot, &resolved)
            }
        }
    }

    /// Expand a recursion marker into a copy of its enclosing template reading below the marker's reference. Markers
    /// whose reference holds nothing are absent, which ends the expansion.
    fn recursion(&mut self, slot: Slot<'_>, marker: &Template, path: &str, scope: Option<&Scope<'_>>) -> Result<(), CodecError> {
        let resolved = self.tracker.resolve(path);
        let enclosing = marker
            .identifier
            .as_ref()
            .and_then(|identifier| scope.and_then(|scope| scope.find(identifier)));
        let (Some(enclosing), Some(reference)) = (enclosing, &marker.reference) else {
            return self.emitter.absent(slot, &resolved);
        };
        if !self.store.contains_below(&self.tracker.resolve(&reference.key())) {
            return self.emitter.absent(slot, &resolved);
        }

        let mut expanded = enclosing.clone();
        expanded.bind_reference(reference);
        self.template(slot, &expanded, path, scope)
    }

    fn enumeration(&mut self, slot: Slot<'_>, template: &Template, enumeration: &Enum, path: &str) -> Result<(), CodecError> {
        let resolved = self.tracker.resolve(path);
        let ordinal = template
            .reference
            .as_ref()
            .and_then(|reference| self.store.load_enum(&self.tracker.resolve(&reference.key())));
        let Some(position) = ordinal else {
            return self.emitter.absent(slot, &resolved);
        };
        let value = enumeration
            .position(position)
            .ok_or_else(|| CodecError::UnknownEnumPosition { path: resolved.clone(), position })?;
        self.emitter.enumeration(slot, &resolved, value)
    }

    /// Referenced arrays iterate the length declared in the store, literal arrays iterate their slots.
    fn repeated(
        &mut self,
        slot: Slot<'_>,
        template: &Template,
        repeated: &Repeated,
        path: &str,
        scope: Option<&Scope<'_>>,
    ) -> Result<(), CodecError> {
        let owner = slot.property();
        let target = self.tracker.resolve(path);

        let Some(reference) = &template.reference else {
            let element = repeated.normalize()?;
            self.emitter.begin_array(slot, &element)?;
            self.tracker.track(target.clone(), 0);
            for element in &repeated.elements {
                self.template(Slot::Element(owner), element, path, scope)?;
                self.tracker.next(&target);
            }
            return self.emitter.end_array(slot);
        };

        let source = self.tracker.resolve(&reference.key());
        let length = self.store.length(&source);
        if length == 0 {
            return self.emitter.absent(slot, &target);
        }

        let mut element = repeated.normalize()?;
        if element.reference.is_none() {
            element.bind_reference(reference);
        }

        self.emitter.begin_array(slot, &element)?;
        self.tracker.track(source.clone(), 0);
        if target != source {
            self.tracker.track(target.clone(), 0);
        }
        for _ in 0..length {
            self.template(Slot::Element(owner), &element, path, scope)?;
            self.tracker.next(&source);
            if target != source {
                self.tracker.next(&target);
            }
        }
        self.emitter.end_array(slot)
    }
}

/// Enclosing templates carrying an identifier, innermost first.
#[derive(Clone, Copy)]
struct Scope<'p> {
    template: &'p Template,
    parent: Option<&'p Scope<'p>>,
}

impl<'p> Scope<'p> {
    fn find(&self, identifier: &Identifier) -> Option<&'p Template> {
        if self.template.identifier.as_ref() == Some(identifier) {
            return Some(self.template);
        }
        self.parent.and_then(|parent| parent.find(identifier))
    }
}

struct Decoder<'w> {
    store: &'w Store,
    tracker: &'w mut Tracker,
    policy: UndefinedKeys,
}

impl Decoder<'_> {
    fn template<S: Source>(&mut self, source: &S, template: &Template, path: &str, scope: Option<&Scope<'_>>) -> Result<(), CodecError> {
        if template.is_recursion_marker() {
            let enclosing = template
                .identifier
                .as_ref()
                .and_then(|identifier| scope.and_then(|scope| scope.find(identifier)));
            return match enclosing {
                Some(enclosing) => self.template(source, enclosing, path, scope),
                None => Ok(()),
            };
        }

        let nested;
        let scope = if template.identifier.is_some() {
            nested = Scope { template, parent: scope };
            Some(&nested)
        } else {
            scope
        };

        match &template.kind {
            TemplateKind::Message(fields) => self.message(source, fields, false, path, scope),
            TemplateKind::OneOf(branches) => self.message(source, branches, true, path, scope),
            TemplateKind::Repeated(repeated) => {
                let element = repeated.normalize()?;
                let items = source.elements(&element)?;
                let resolved = self.tracker.resolve(path);
                if items.is_empty() {
                    self.store.define(resolved, 0);
                    return Ok(());
                }
                for (index, item) in items.iter().enumerate() {
                    self.store.define(resolved.clone(), index + 1);
                    self.tracker.track(resolved.clone(), index);
                    if item.is_null() {
                        continue;
                    }
                    self.template(item, &element, path, scope)?;
                }
                Ok(())
            }
            TemplateKind::Enum(enumeration) => {
                let resolved = self.tracker.resolve(path);
                let position = match source.enumeration()? {
                    Symbol::Key(key) => match enumeration.key(&key) {
                        Some(value) => value.position,
                        None => return Err(CodecError::UnknownEnumKey { path: resolved, key }),
                    },
                    Symbol::Position(position) => match enumeration.position(position) {
                        Some(value) => value.position,
                        None => return Err(CodecError::UnknownEnumPosition { path: resolved, position }),
                    },
                };
                self.store.store_enum(resolved, position);
                Ok(())
            }
            TemplateKind::Scalar(scalar) => {
                let resolved = self.tracker.resolve(path);
                let value = source.scalar(scalar.kind, &resolved)?;
                self.store.store_value(resolved, value);
                Ok(())
            }
            TemplateKind::Unknown => Ok(()),
        }
    }

    fn message<S: Source>(
        &mut self,
        source: &S,
        fields: &Message,
        one_of: bool,
        path: &str,
        scope: Option<&Scope<'_>>,
    ) -> Result<(), CodecError> {
        if self.policy == UndefinedKeys::Reject
            && let Some(key) = source.undeclared(fields).into_iter().next()
        {
            return Err(CodecError::UndefinedProperty {
                path: self.tracker.resolve(path),
                key,
            });
        }

        let mut branch: Option<&str> = None;
        for field in fields.sorted_properties() {
            let Some(child) = source.field(field)? else {
                continue;
            };
            if child.is_null() {
                continue;
            }
            if one_of {
                if let Some(first) = branch {
                    return Err(SchemaError::MultipleOneOfBranches {
                        path: self.tracker.resolve(path),
                        first: first.to_string(),
                        second: field.name.clone(),
                    }
                    .into());
                }
                branch = Some(field.name.as_str());
            }
            self.template(&child, &field.template, &join_path([path, field.name.as_str()]), scope)?;
        }
        Ok(())
    }
}
