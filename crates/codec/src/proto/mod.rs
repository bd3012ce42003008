//! Protobuf binding.
//!
//! Every manager builds a [`MessageDescriptor`] from its property when constructed, so schemas without a usable
//! protobuf shape fail early. Field numbers are property positions. Repeated numeric and enum fields are written
//! packed; decoding accepts packed and unpacked repeated fields and skips fields the schema does not declare.

pub mod descriptor;
pub mod wire;

use heck::ToUpperCamelCase;
use switchyard_store::{Store, Tracker};
use switchyard_types::{EnumValue, ParameterMap, Property, ScalarType, Template, TemplateKind, Type, Value};
use tracing::{Span, debug, debug_span};

pub use descriptor::{EnumDescriptor, FieldDescriptor, FieldKind, MessageDescriptor};

use crate::walk::{self, Emitter, Slot, Source, Symbol, UndefinedKeys};
use crate::{CodecError, Constructor, Manager, root_path};
use wire::{Raw, WireType};

pub const NAME: &str = "proto";

#[derive(Debug, Default, Clone, Copy)]
pub struct ProtoConstructor;

impl Constructor for ProtoConstructor {
    fn name(&self) -> &'static str {
        NAME
    }

    fn new_manager(&self, resource: &str, parameters: &ParameterMap) -> Result<Box<dyn Manager>, CodecError> {
        Ok(Box::new(ProtoManager::new(resource, parameters.property.clone())?))
    }
}

#[derive(Debug)]
pub struct ProtoManager {
    resource: String,
    property: Option<Property>,
    descriptor: Option<MessageDescriptor>,
    span: Span,
}

impl ProtoManager {
    /// Manager for `property`. The root message is named after `resource` in upper camel case.
    pub fn new(resource: impl Into<String>, property: Option<Property>) -> Result<Self, CodecError> {
        let resource = resource.into();
        let descriptor = property
            .as_ref()
            .map(|property| MessageDescriptor::from_property(&resource.to_upper_camel_case(), property))
            .transpose()?;
        let span = debug_span!("codec", codec = NAME, resource = %resource);
        Ok(Self {
            resource,
            property,
            descriptor,
            span,
        })
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn descriptor(&self) -> Option<&MessageDescriptor> {
        self.descriptor.as_ref()
    }
}

impl Manager for ProtoManager {
    fn name(&self) -> &'static str {
        NAME
    }

    fn property(&self) -> Option<&Property> {
        self.property.as_ref()
    }

    fn marshal(&self, store: &Store) -> Result<Vec<u8>, CodecError> {
        let _entered = self.span.enter();
        let Some(property) = &self.property else {
            return Ok(Vec::new());
        };

        let mut emitter = ProtoEmitter::default();
        walk::encode(property, &root_path(&self.resource, property), store, &mut Tracker::new(), &mut emitter)?;
        let payload = emitter.output.unwrap_or_default();
        debug!(bytes = payload.len(), "encoded protobuf payload");
        Ok(payload)
    }

    fn unmarshal(&self, payload: &[u8], store: &Store) -> Result<(), CodecError> {
        let _entered = self.span.enter();
        let Some(property) = &self.property else {
            return Ok(());
        };

        let root = ProtoNode::Message(wire::read_fields(payload)?);
        walk::decode(
            &root,
            property,
            &root_path(&self.resource, property),
            store,
            &mut Tracker::new(),
            UndefinedKeys::Ignore,
        )?;
        debug!(bytes = payload.len(), "decoded protobuf payload");
        Ok(())
    }
}

/// Repeated fields of these elements are written packed.
fn packed(element: &Template) -> Option<WireType> {
    match &element.kind {
        TemplateKind::Scalar(scalar) if wire::packable(scalar.kind) => Some(WireType::of(scalar.kind)),
        TemplateKind::Enum(_) => Some(WireType::Varint),
        _ => None,
    }
}

/// Field number of the slot. Positions are validated by the descriptor.
fn field_number(slot: Slot<'_>) -> u32 {
    match slot {
        Slot::Root(_) => 0,
        Slot::Field(property) | Slot::Element(property) => u32::try_from(property.position).unwrap_or_default(),
    }
}

enum Frame {
    Message { number: u32, buffer: Vec<u8> },
    Packed { number: u32, buffer: Vec<u8> },
}

#[derive(Default)]
struct ProtoEmitter {
    frames: Vec<Frame>,
    output: Option<Vec<u8>>,
}

impl ProtoEmitter {
    fn message_buffer(&mut self, kind: Type) -> Result<&mut Vec<u8>, CodecError> {
        match self.frames.last_mut() {
            Some(Frame::Message { buffer, .. }) => Ok(buffer),
            Some(Frame::Packed { .. }) | None => Err(CodecError::NonMessageRoot { kind }),
        }
    }
}

impl Emitter for ProtoEmitter {
    fn begin_message(&mut self, slot: Slot<'_>) -> Result<(), CodecError> {
        self.frames.push(Frame::Message {
            number: field_number(slot),
            buffer: Vec::new(),
        });
        Ok(())
    }

    fn end_message(&mut self, _slot: Slot<'_>) -> Result<(), CodecError> {
        let Some(Frame::Message { number, buffer }) = self.frames.pop() else {
            return Err(CodecError::malformed(NAME, "message closed without being opened"));
        };
        if self.frames.is_empty() {
            self.output = Some(buffer);
            return Ok(());
        }
        let parent = self.message_buffer(Type::Message)?;
        wire::put_length_delimited(parent, number, &buffer);
        Ok(())
    }

    fn begin_array(&mut self, slot: Slot<'_>, element: &Template) -> Result<(), CodecError> {
        if self.frames.is_empty() {
            return Err(CodecError::NonMessageRoot { kind: Type::Array });
        }
        if packed(element).is_some() {
            self.frames.push(Frame::Packed {
                number: field_number(slot),
                buffer: Vec::new(),
            });
        }
        Ok(())
    }

    fn end_array(&mut self, _slot: Slot<'_>) -> Result<(), CodecError> {
        if !matches!(self.frames.last(), Some(Frame::Packed { .. })) {
            return Ok(());
        }
        let Some(Frame::Packed { number, buffer }) = self.frames.pop() else {
            return Ok(());
        };
        if !buffer.is_empty() {
            let parent = self.message_buffer(Type::Array)?;
            wire::put_length_delimited(parent, number, &buffer);
        }
        Ok(())
    }

    fn scalar(&mut self, slot: Slot<'_>, path: &str, kind: ScalarType, value: &Value) -> Result<(), CodecError> {
        match self.frames.last_mut() {
            Some(Frame::Packed { buffer, .. }) => wire::put_value(buffer, kind, value, path),
            Some(Frame::Message { buffer, .. }) => {
                wire::put_key(buffer, field_number(slot), WireType::of(kind));
                wire::put_value(buffer, kind, value, path)
            }
            None => Err(CodecError::NonMessageRoot { kind: Type::Scalar(kind) }),
        }
    }

    fn enumeration(&mut self, slot: Slot<'_>, _path: &str, value: &EnumValue) -> Result<(), CodecError> {
        let position = i64::from(value.position) as u64;
        match self.frames.last_mut() {
            Some(Frame::Packed { buffer, .. }) => wire::put_varint(buffer, position),
            Some(Frame::Message { buffer, .. }) => {
                wire::put_key(buffer, field_number(slot), WireType::Varint);
                wire::put_varint(buffer, position);
            }
            None => return Err(CodecError::NonMessageRoot { kind: Type::Enum }),
        }
        Ok(())
    }

    // Protobuf has no null; absent values, packed elements included, are left out.
    fn absent(&mut self, _slot: Slot<'_>, _path: &str) -> Result<(), CodecError> {
        Ok(())
    }
}

/// Payload node. Embedded messages stay length delimited bytes until one of their fields is requested.
enum ProtoNode<'a> {
    Message(Vec<(u32, Raw<'a>)>),
    Value(Raw<'a>),
    Repeated(Vec<Raw<'a>>),
}

impl<'a> ProtoNode<'a> {
    fn fields(&self) -> Result<Vec<(u32, Raw<'a>)>, CodecError> {
        match self {
            ProtoNode::Message(fields) => Ok(fields.clone()),
            ProtoNode::Value(Raw::Bytes(bytes)) => wire::read_fields(*bytes),
            ProtoNode::Value(raw) => Err(unexpected(*raw, "embedded message")),
            ProtoNode::Repeated(_) => Err(CodecError::UnexpectedToken {
                token: "repeated field".to_string(),
                expected: "embedded message".to_string(),
            }),
        }
    }

    fn value(&self, expected: &str) -> Result<Raw<'a>, CodecError> {
        match self {
            ProtoNode::Value(raw) => Ok(*raw),
            ProtoNode::Message(_) | ProtoNode::Repeated(_) => Err(CodecError::UnexpectedToken {
                token: "message".to_string(),
                expected: expected.to_string(),
            }),
        }
    }
}

fn unexpected(raw: Raw<'_>, expected: &str) -> CodecError {
    CodecError::UnexpectedToken {
        token: format!("{} value", raw.wire_type().name()),
        expected: expected.to_string(),
    }
}

impl<'a> Source for ProtoNode<'a> {
    fn field(&self, property: &Property) -> Result<Option<Self>, CodecError> {
        let number = u32::try_from(property.position).unwrap_or_default();
        let values: Vec<Raw<'a>> = self
            .fields()?
            .into_iter()
            .filter(|(field, _)| *field == number)
            .map(|(_, raw)| raw)
            .collect();

        if matches!(property.template.kind, TemplateKind::Repeated(_)) {
            if values.is_empty() {
                return Ok(None);
            }
            return Ok(Some(ProtoNode::Repeated(values)));
        }
        Ok(values.last().copied().map(ProtoNode::Value))
    }

    fn elements(&self, element: &Template) -> Result<Vec<Self>, CodecError> {
        let ProtoNode::Repeated(values) = self else {
            return Err(CodecError::UnexpectedToken {
                token: "singular field".to_string(),
                expected: "repeated field".to_string(),
            });
        };

        let mut elements = Vec::with_capacity(values.len());
        for raw in values.iter().copied() {
            match (packed(element), raw) {
                (Some(wire), Raw::Bytes(bytes)) => elements.extend(wire::unpack(wire, bytes)?.into_iter().map(ProtoNode::Value)),
                _ => elements.push(ProtoNode::Value(raw)),
            }
        }
        Ok(elements)
    }

    fn scalar(&self, kind: ScalarType, path: &str) -> Result<Value, CodecError> {
        wire::decode_value(kind, self.value(kind.as_str())?, path)
    }

    fn enumeration(&self) -> Result<Symbol, CodecError> {
        match self.value("enum")? {
            Raw::Varint(position) => Ok(Symbol::Position(position as i64 as i32)),
            raw => Err(unexpected(raw, "enum varint")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{bound_order, bound_tree, order, rebased, seeded_store, seeded_tree, tree};
    use bytes::BufMut;
    use switchyard_types::{Message, PropertyReference};

    fn ids(reference: Option<PropertyReference>) -> Property {
        let mut template = Template::repeated(vec![Template::scalar(ScalarType::Int32)]);
        template.reference = reference;
        Property::new("", Template::message(Message::new().with(Property::new("ids", template).with_position(1))))
    }

    #[test]
    fn repeated_numbers_are_packed() {
        let store = Store::new();
        store.define("input:ids", 3);
        store.store_value("input:ids[0]", 1i64);
        store.store_value("input:ids[1]", 2i64);
        store.store_value("input:ids[2]", 300i64);

        let manager = ProtoManager::new("output", Some(ids(Some(PropertyReference::new("input", "ids"))))).expect("manager");
        assert_eq!(manager.marshal(&store).expect("marshal"), vec![0x0a, 0x04, 0x01, 0x02, 0xac, 0x02]);
    }

    #[test]
    fn unpacked_repeated_fields_are_accepted() {
        let store = Store::new();
        let manager = ProtoManager::new("input", Some(ids(None))).expect("manager");
        manager.unmarshal(&[0x08, 0x05, 0x08, 0x06, 0x0a, 0x01, 0x07], &store).expect("unmarshal");
        assert_eq!(store.length("input:ids"), 3);
        assert_eq!(store.load_value("input:ids[0]"), Some(Value::Int32(5)));
        assert_eq!(store.load_value("input:ids[2]"), Some(Value::Int32(7)));
    }

    #[test]
    fn undeclared_fields_are_skipped() {
        let mut payload = Vec::new();
        wire::put_key(&mut payload, 9, WireType::Fixed64);
        payload.put_u64_le(42);
        wire::put_length_delimited(&mut payload, 1, b"A-1");
        wire::put_key(&mut payload, 12, WireType::Varint);
        wire::put_varint(&mut payload, 1);

        let store = Store::new();
        ProtoManager::new("input", Some(order())).expect("manager").unmarshal(&payload, &store).expect("unmarshal");
        assert_eq!(store.snapshot().values.len(), 1);
        assert_eq!(store.load_value("input:id"), Some(Value::from("A-1")));
    }

    #[test]
    fn wire_type_mismatches_are_rejected() {
        let mut payload = Vec::new();
        wire::put_key(&mut payload, 2, WireType::LengthDelimited);
        wire::put_varint(&mut payload, 0);

        let error = ProtoManager::new("input", Some(order()))
            .expect("manager")
            .unmarshal(&payload, &Store::new())
            .expect_err("should fail");
        assert!(matches!(error, CodecError::UnexpectedToken { .. }), "unexpected error: {error}");
    }

    #[test]
    fn root_is_named_after_the_resource() {
        let manager = ProtoManager::new("create-order", Some(order())).expect("manager");
        assert_eq!(manager.descriptor().map(|descriptor| descriptor.name.as_str()), Some("CreateOrder"));

        let error = ProtoManager::new("input", Some(Property::new("", Template::scalar(ScalarType::String)))).expect_err("should fail");
        assert_eq!(error, CodecError::NonMessageRoot { kind: Type::Scalar(ScalarType::String) });
    }

    #[test]
    fn unknown_enum_positions_fail_to_decode() {
        let mut payload = Vec::new();
        wire::put_key(&mut payload, 3, WireType::Varint);
        wire::put_varint(&mut payload, 7);

        let error = ProtoManager::new("input", Some(order()))
            .expect("manager")
            .unmarshal(&payload, &Store::new())
            .expect_err("should fail");
        assert_eq!(
            error,
            CodecError::UnknownEnumPosition {
                path: "input:status".into(),
                position: 7
            }
        );
    }

    #[test]
    fn recursive_schemas_round_trip() {
        let store = seeded_tree();
        let payload = ProtoManager::new("output", Some(bound_tree("input")))
            .expect("manager")
            .marshal(&store)
            .expect("marshal");

        let decoded = Store::new();
        ProtoManager::new("copy", Some(tree())).expect("manager").unmarshal(&payload, &decoded).expect("unmarshal");
        assert_eq!(decoded.snapshot(), rebased(&store, "input", "copy"));
    }

    #[test]
    fn round_trip_reproduces_the_store() {
        let store = seeded_store();
        let payload = ProtoManager::new("output", Some(bound_order("input")))
            .expect("manager")
            .marshal(&store)
            .expect("marshal");

        let decoded = Store::new();
        ProtoManager::new("copy", Some(order())).expect("manager").unmarshal(&payload, &decoded).expect("unmarshal");
        assert_eq!(decoded.snapshot(), rebased(&store, "input", "copy"));
    }
}
