//! JSON binding.
//!
//! Unresolved object fields are left out while array elements without value are written as `null` so sibling
//! indices stay aligned. Enums are written as their key, byte sequences as base64 strings. Object keys the schema
//! does not declare are ignored on decode.

use serde_json::{Map, Value as JsonValue};
use switchyard_store::{Store, Tracker};
use switchyard_types::{EnumValue, ParameterMap, Property, ScalarType, Template, Value};
use tracing::{Span, debug, debug_span};

use crate::walk::{self, Emitter, Slot, Source, Symbol, UndefinedKeys};
use crate::{CodecError, Constructor, Manager, root_path};

pub const NAME: &str = "json";

#[derive(Debug, Default, Clone, Copy)]
pub struct JsonConstructor;

impl Constructor for JsonConstructor {
    fn name(&self) -> &'static str {
        NAME
    }

    fn new_manager(&self, resource: &str, parameters: &ParameterMap) -> Result<Box<dyn Manager>, CodecError> {
        Ok(Box::new(JsonManager::new(resource, parameters.property.clone())))
    }
}

#[derive(Debug)]
pub struct JsonManager {
    resource: String,
    property: Option<Property>,
    span: Span,
}

impl JsonManager {
    pub fn new(resource: impl Into<String>, property: Option<Property>) -> Self {
        let resource = resource.into();
        let span = debug_span!("codec", codec = NAME, resource = %resource);
        Self { resource, property, span }
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }
}

impl Manager for JsonManager {
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

        let mut emitter = JsonEmitter::default();
        walk::encode(property, &root_path(&self.resource, property), store, &mut Tracker::new(), &mut emitter)?;
        let Some(document) = emitter.finish()? else {
            return Ok(Vec::new());
        };
        let payload = serde_json::to_vec(&document).map_err(|error| CodecError::malformed(NAME, error))?;
        debug!(bytes = payload.len(), "encoded json payload");
        Ok(payload)
    }

    fn unmarshal(&self, payload: &[u8], store: &Store) -> Result<(), CodecError> {
        let _entered = self.span.enter();
        let Some(property) = &self.property else {
            return Ok(());
        };
        if payload.iter().all(u8::is_ascii_whitespace) {
            return Ok(());
        }

        let document: JsonValue = serde_json::from_slice(payload).map_err(|error| CodecError::malformed(NAME, error))?;
        walk::decode(
            &JsonNode(&document),
            property,
            &root_path(&self.resource, property),
            store,
            &mut Tracker::new(),
            UndefinedKeys::Ignore,
        )?;
        debug!(bytes = payload.len(), "decoded json payload");
        Ok(())
    }
}

enum Frame {
    Object(Map<String, JsonValue>),
    Array(Vec<JsonValue>),
}

/// Builds a JSON document from the walk.
#[derive(Default)]
struct JsonEmitter {
    frames: Vec<Frame>,
    root: Option<JsonValue>,
}

impl JsonEmitter {
    fn attach(&mut self, slot: Slot<'_>, value: JsonValue) {
        match self.frames.last_mut() {
            Some(Frame::Object(fields)) => {
                if let Some(key) = slot.key() {
                    fields.insert(key.to_string(), value);
                }
            }
            Some(Frame::Array(items)) => items.push(value),
            None => self.root = Some(value),
        }
    }

    fn finish(self) -> Result<Option<JsonValue>, CodecError> {
        if !self.frames.is_empty() {
            return Err(CodecError::UnexpectedToken {
                token: "end of document".into(),
                expected: "end of object or array".into(),
            });
        }
        Ok(self.root)
    }
}

impl Emitter for JsonEmitter {
    fn begin_message(&mut self, _slot: Slot<'_>) -> Result<(), CodecError> {
        self.frames.push(Frame::Object(Map::new()));
        Ok(())
    }

    fn end_message(&mut self, slot: Slot<'_>) -> Result<(), CodecError> {
        match self.frames.pop() {
            Some(Frame::Object(fields)) => {
                self.attach(slot, JsonValue::Object(fields));
                Ok(())
            }
            _ => Err(CodecError::UnexpectedToken {
                token: "end of object".into(),
                expected: "end of array".into(),
            }),
        }
    }

    fn begin_array(&mut self, _slot: Slot<'_>, _element: &Template) -> Result<(), CodecError> {
        self.frames.push(Frame::Array(Vec::new()));
        Ok(())
    }

    fn end_array(&mut self, slot: Slot<'_>) -> Result<(), CodecError> {
        match self.frames.pop() {
            Some(Frame::Array(items)) => {
                self.attach(slot, JsonValue::Array(items));
                Ok(())
            }
            _ => Err(CodecError::UnexpectedToken {
                token: "end of array".into(),
                expected: "end of object".into(),
            }),
        }
    }

    fn scalar(&mut self, slot: Slot<'_>, _path: &str, _kind: ScalarType, value: &Value) -> Result<(), CodecError> {
        self.attach(slot, value.to_json());
        Ok(())
    }

    fn enumeration(&mut self, slot: Slot<'_>, _path: &str, value: &EnumValue) -> Result<(), CodecError> {
        self.attach(slot, JsonValue::String(value.key.clone()));
        Ok(())
    }

    fn absent(&mut self, slot: Slot<'_>, _path: &str) -> Result<(), CodecError> {
        if slot.is_element() {
            self.attach(slot, JsonValue::Null);
        }
        Ok(())
    }
}

struct JsonNode<'a>(&'a JsonValue);

impl<'a> Source for JsonNode<'a> {
    fn field(&self, property: &Property) -> Result<Option<Self>, CodecError> {
        match self.0 {
            JsonValue::Object(fields) => Ok(fields.get(&property.name).map(JsonNode)),
            other => Err(unexpected(other, "object")),
        }
    }

    fn elements(&self, _element: &Template) -> Result<Vec<Self>, CodecError> {
        match self.0 {
            JsonValue::Array(items) => Ok(items.iter().map(JsonNode).collect()),
            other => Err(unexpected(other, "array")),
        }
    }

    fn scalar(&self, kind: ScalarType, path: &str) -> Result<Value, CodecError> {
        let value = Value::from_json(self.0).ok_or_else(|| unexpected(self.0, kind.as_str()))?;
        value.coerce(kind).map_err(|error| CodecError::invalid_value(path, error))
    }

    fn enumeration(&self) -> Result<Symbol, CodecError> {
        match self.0 {
            JsonValue::String(key) => Ok(Symbol::Key(key.clone())),
            JsonValue::Number(number) => number
                .as_i64()
                .and_then(|position| i32::try_from(position).ok())
                .map(Symbol::Position)
                .ok_or_else(|| unexpected(self.0, "enum key")),
            other => Err(unexpected(other, "enum key")),
        }
    }

    fn is_null(&self) -> bool {
        self.0.is_null()
    }
}

fn unexpected(value: &JsonValue, expected: &str) -> CodecError {
    let token = match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "boolean",
        JsonValue::Number(_) => "number",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "array",
        JsonValue::Object(_) => "object",
    };
    CodecError::UnexpectedToken {
        token: token.to_string(),
        expected: expected.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{bound_order, bound_tree, order, rebased, seeded_store, seeded_tree, status, tree};
    use serde_json::json;
    use switchyard_types::{Message, PropertyReference, SchemaError};

    fn marshal(property: Property, store: &Store) -> JsonValue {
        let payload = JsonManager::new("output", Some(property)).marshal(store).expect("marshal");
        serde_json::from_slice(&payload).expect("json payload")
    }

    #[test]
    fn message_fields_read_their_references() {
        let body = Property::new(
            "",
            Template::message(
                Message::new()
                    .with(Property::new("message", Template::scalar(ScalarType::String)).with_reference(PropertyReference::new("input", "message"))),
            ),
        );
        let store = Store::new();
        store.store_value("input:message", "hi");

        let payload = JsonManager::new("output", Some(body)).marshal(&store).expect("marshal");
        assert_eq!(String::from_utf8(payload).expect("utf8"), r#"{"message":"hi"}"#);
    }

    #[test]
    fn object_fields_follow_position_order() {
        let mut body = Property::new(
            "",
            Template::message(
                Message::new()
                    .with(Property::new("alpha", Template::scalar(ScalarType::String)).with_position(2))
                    .with(Property::new("zeta", Template::scalar(ScalarType::String)).with_position(1)),
            ),
        );
        body.template.bind_reference(&PropertyReference::new("input", ""));
        let store = Store::new();
        store.store_value("input:alpha", "a");
        store.store_value("input:zeta", "z");

        let payload = JsonManager::new("output", Some(body)).marshal(&store).expect("marshal");
        assert_eq!(String::from_utf8(payload).expect("utf8"), r#"{"zeta":"z","alpha":"a"}"#);
    }

    #[test]
    fn referenced_arrays_iterate_the_declared_length() {
        let list = Property::new(
            "",
            Template::repeated(vec![Template::scalar(ScalarType::String)]).with_reference(PropertyReference::new("input", "list")),
        );
        let store = Store::new();
        store.define("input:list", 2);
        store.store_value("input:list[0]", "a");
        store.store_value("input:list[1]", "b");

        assert_eq!(marshal(list, &store), json!(["a", "b"]));
    }

    #[test]
    fn missing_array_elements_keep_a_null_placeholder() {
        let list = Property::new(
            "",
            Template::message(Message::new().with(Property::new(
                "list",
                Template::repeated(vec![Template::scalar(ScalarType::String)]).with_reference(PropertyReference::new("input", "list")),
            ))),
        );
        let store = Store::new();
        store.define("input:list", 2);
        store.store_value("input:list[1]", "b");

        assert_eq!(marshal(list, &store), json!({ "list": [null, "b"] }));
    }

    #[test]
    fn enums_encode_and_decode_by_key() {
        let property = Property::new("", Template::enumeration(status()).with_reference(PropertyReference::new("input", "status")));
        let store = Store::new();
        store.store_enum("input:status", 1);
        assert_eq!(marshal(property, &store), json!("PENDING"));

        let body = Property::new("", Template::message(Message::new().with(Property::new("status", Template::enumeration(status())))));
        let manager = JsonManager::new("input", Some(body));
        let decoded = Store::new();
        manager.unmarshal(br#"{"status":"PENDING"}"#, &decoded).expect("unmarshal");
        assert_eq!(decoded.load_enum("input:status"), Some(1));

        let error = manager.unmarshal(br#"{"status":"LOST"}"#, &decoded).expect_err("should fail");
        assert_eq!(
            error,
            CodecError::UnknownEnumKey {
                path: "input:status".into(),
                key: "LOST".into()
            }
        );
    }

    #[test]
    fn unresolved_fields_are_omitted() {
        let store = seeded_store();
        let document = marshal(bound_order("input"), &store);
        assert_eq!(document["customer"], json!({ "name": "Ada" }));
        assert_eq!(document["contact"], json!({ "email": "ada@example.com" }));
        assert_eq!(document["status"], json!("PENDING"));
        assert_eq!(document["lines"][1], json!({ "sku": "X-2", "price": 10.0 }));
    }

    #[test]
    fn decode_flattens_objects_and_arrays_into_the_store() {
        let manager = JsonManager::new("input", Some(order()));
        let store = Store::new();
        manager
            .unmarshal(
                br#"{"id":"A-1","quantity":3,"tags":["fragile","gift"],"lines":[{"sku":"X-1","price":2.5}],"extra":true}"#,
                &store,
            )
            .expect("unmarshal");

        assert_eq!(store.load_value("input:id"), Some(Value::from("A-1")));
        assert_eq!(store.load_value("input:quantity"), Some(Value::Int32(3)));
        assert_eq!(store.length("input:tags"), 2);
        assert_eq!(store.load_value("input:tags[1]"), Some(Value::from("gift")));
        assert_eq!(store.length("input:lines"), 1);
        assert_eq!(store.load_value("input:lines[0].price"), Some(Value::Float64(2.5)));
        assert_eq!(store.load("input:extra"), None);
    }

    #[test]
    fn decoding_a_second_one_of_branch_fails() {
        let manager = JsonManager::new("input", Some(order()));
        let error = manager
            .unmarshal(br#"{"contact":{"email":"ada@example.com","phone":"555"}}"#, &Store::new())
            .expect_err("should fail");
        assert!(matches!(error, CodecError::Schema(SchemaError::MultipleOneOfBranches { .. })), "unexpected error: {error}");
    }

    #[test]
    fn mismatched_tokens_are_reported() {
        let manager = JsonManager::new("input", Some(order()));
        let error = manager.unmarshal(br#"{"tags":"fragile"}"#, &Store::new()).expect_err("should fail");
        assert_eq!(
            error,
            CodecError::UnexpectedToken {
                token: "string".into(),
                expected: "array".into()
            }
        );

        let error = manager.unmarshal(b"{", &Store::new()).expect_err("should fail");
        assert!(matches!(error, CodecError::Malformed { codec: "json", .. }));
    }

    #[test]
    fn empty_payloads_leave_the_store_untouched() {
        let store = Store::new();
        JsonManager::new("input", Some(order())).unmarshal(b"  ", &store).expect("unmarshal");
        assert!(store.is_empty());
    }

    #[test]
    fn recursive_schemas_round_trip() {
        let store = seeded_tree();
        let payload = JsonManager::new("output", Some(bound_tree("input"))).marshal(&store).expect("marshal");
        assert_eq!(
            serde_json::from_slice::<JsonValue>(&payload).expect("json payload"),
            json!({
                "value": "a",
                "children": [{ "value": "b", "children": [{ "value": "c" }] }, { "value": "d" }]
            })
        );

        let decoded = Store::new();
        JsonManager::new("copy", Some(tree())).unmarshal(&payload, &decoded).expect("unmarshal");
        assert_eq!(decoded.snapshot(), rebased(&store, "input", "copy"));
    }

    #[test]
    fn round_trip_reproduces_the_store() {
        let store = seeded_store();
        let payload = JsonManager::new("output", Some(bound_order("input"))).marshal(&store).expect("marshal");

        let decoded = Store::new();
        JsonManager::new("copy", Some(order())).unmarshal(&payload, &decoded).expect("unmarshal");
        assert_eq!(decoded.snapshot(), rebased(&store, "input", "copy"));
    }
}
