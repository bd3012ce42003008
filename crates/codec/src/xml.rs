//! XML binding.
//!
//! The root element is named after the manager resource and every property renders as a child element named after
//! the property. Repeated values repeat their element; elements of an unnamed root array are called `item`. Enums
//! hold their key as character data and an enum without value is written as an empty element.
//!
//! Payloads are read with a streaming reader into an element tree; tokens out of place are reported as
//! [`CodecError::UnexpectedToken`] and child elements the schema does not declare as
//! [`CodecError::UndefinedProperty`]. Empty elements carry no value, so an empty string field decodes as absent.

use quick_xml::Reader;
use quick_xml::Writer;
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use switchyard_store::{Store, Tracker};
use switchyard_types::{EnumValue, Message, ParameterMap, Property, ScalarType, Template, TemplateKind, Value};
use tracing::{Span, debug, debug_span};

use crate::walk::{self, Emitter, Slot, Source, Symbol, UndefinedKeys};
use crate::{CodecError, Constructor, Manager, root_path};

pub const NAME: &str = "xml";

const ELEMENT_NAME: &str = "item";

#[derive(Debug, Default, Clone, Copy)]
pub struct XmlConstructor;

impl Constructor for XmlConstructor {
    fn name(&self) -> &'static str {
        NAME
    }

    fn new_manager(&self, resource: &str, parameters: &ParameterMap) -> Result<Box<dyn Manager>, CodecError> {
        Ok(Box::new(XmlManager::new(resource, parameters.property.clone())))
    }
}

#[derive(Debug)]
pub struct XmlManager {
    resource: String,
    property: Option<Property>,
    span: Span,
}

impl XmlManager {
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

impl Manager for XmlManager {
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

        let mut emitter = XmlEmitter::new(&self.resource);
        walk::encode(property, &root_path(&self.resource, property), store, &mut Tracker::new(), &mut emitter)?;
        let payload = emitter.writer.into_inner();
        debug!(bytes = payload.len(), "encoded xml payload");
        Ok(payload)
    }

    fn unmarshal(&self, payload: &[u8], store: &Store) -> Result<(), CodecError> {
        let _entered = self.span.enter();
        let Some(property) = &self.property else {
            return Ok(());
        };
        let text = std::str::from_utf8(payload).map_err(|error| CodecError::malformed(NAME, error))?;
        let Some(root) = parse(text)? else {
            return Ok(());
        };

        walk::decode(
            &XmlNode::Element(&root),
            property,
            &root_path(&self.resource, property),
            store,
            &mut Tracker::new(),
            UndefinedKeys::Reject,
        )?;
        debug!(bytes = payload.len(), "decoded xml payload");
        Ok(())
    }
}

struct XmlEmitter {
    root: String,
    writer: Writer<Vec<u8>>,
}

impl XmlEmitter {
    fn new(resource: &str) -> Self {
        Self {
            root: resource.to_string(),
            writer: Writer::new(Vec::new()),
        }
    }

    fn element_name(&self, slot: Slot<'_>) -> String {
        match slot {
            Slot::Root(_) => self.root.clone(),
            Slot::Field(property) => property.name.clone(),
            Slot::Element(property) if property.name.is_empty() => ELEMENT_NAME.to_string(),
            Slot::Element(property) => property.name.clone(),
        }
    }

    fn write(&mut self, event: Event<'_>) -> Result<(), CodecError> {
        self.writer.write_event(event).map_err(|error| CodecError::malformed(NAME, error))
    }

    fn start(&mut self, slot: Slot<'_>) -> Result<(), CodecError> {
        let name = self.element_name(slot);
        self.write(Event::Start(BytesStart::new(name)))
    }

    fn end(&mut self, slot: Slot<'_>) -> Result<(), CodecError> {
        let name = self.element_name(slot);
        self.write(Event::End(BytesEnd::new(name)))
    }

    fn text_element(&mut self, slot: Slot<'_>, text: &str) -> Result<(), CodecError> {
        self.start(slot)?;
        self.write(Event::Text(BytesText::new(text)))?;
        self.end(slot)
    }

    fn empty_element(&mut self, slot: Slot<'_>) -> Result<(), CodecError> {
        let name = self.element_name(slot);
        self.write(Event::Empty(BytesStart::new(name)))
    }
}

impl Emitter for XmlEmitter {
    fn begin_message(&mut self, slot: Slot<'_>) -> Result<(), CodecError> {
        self.start(slot)
    }

    fn end_message(&mut self, slot: Slot<'_>) -> Result<(), CodecError> {
        self.end(slot)
    }

    // Repeated values repeat their element; only a root array needs a wrapping element.
    fn begin_array(&mut self, slot: Slot<'_>, _element: &Template) -> Result<(), CodecError> {
        match slot {
            Slot::Root(_) => self.start(slot),
            Slot::Field(_) | Slot::Element(_) => Ok(()),
        }
    }

    fn end_array(&mut self, slot: Slot<'_>) -> Result<(), CodecError> {
        match slot {
            Slot::Root(_) => self.end(slot),
            Slot::Field(_) | Slot::Element(_) => Ok(()),
        }
    }

    fn scalar(&mut self, slot: Slot<'_>, _path: &str, _kind: ScalarType, value: &Value) -> Result<(), CodecError> {
        self.text_element(slot, &value.to_text())
    }

    fn enumeration(&mut self, slot: Slot<'_>, _path: &str, value: &EnumValue) -> Result<(), CodecError> {
        self.text_element(slot, &value.key)
    }

    fn absent(&mut self, slot: Slot<'_>, _path: &str) -> Result<(), CodecError> {
        match slot {
            Slot::Element(_) => self.empty_element(slot),
            Slot::Field(property) if matches!(property.template.kind, TemplateKind::Enum(_)) => self.empty_element(slot),
            Slot::Root(_) | Slot::Field(_) => Ok(()),
        }
    }
}

/// Parsed element: its name, concatenated character data and child elements.
#[derive(Debug, Clone, PartialEq, Default)]
struct Element {
    name: String,
    text: String,
    children: Vec<Element>,
}

impl Element {
    fn new(name: String) -> Self {
        Self {
            name,
            ..Self::default()
        }
    }

    fn is_empty(&self) -> bool {
        self.text.is_empty() && self.children.is_empty()
    }
}

/// Read `payload` into its root element. Documents without elements return `None`.
fn parse(payload: &str) -> Result<Option<Element>, CodecError> {
    let mut reader = Reader::from_str(payload);
    let mut open: Vec<Element> = Vec::new();
    let mut root: Option<Element> = None;

    loop {
        match reader.read_event().map_err(|error| CodecError::malformed(NAME, error))? {
            Event::Start(start) => {
                let name = element_name(start.local_name().as_ref())?;
                if root.is_some() {
                    return Err(unexpected(format!("element <{name}>"), "end of document"));
                }
                open.push(Element::new(name));
            }
            Event::Empty(start) => {
                let name = element_name(start.local_name().as_ref())?;
                if root.is_some() {
                    return Err(unexpected(format!("element <{name}>"), "end of document"));
                }
                close(&mut open, &mut root, Element::new(name));
            }
            Event::End(end) => {
                let name = element_name(end.local_name().as_ref())?;
                let Some(element) = open.pop() else {
                    return Err(unexpected(format!("closing </{name}>"), "start element"));
                };
                if element.name != name {
                    return Err(unexpected(format!("closing </{name}>"), &format!("</{}>", element.name)));
                }
                close(&mut open, &mut root, element);
            }
            Event::Text(text) => {
                let text = text.unescape().map_err(|error| CodecError::malformed(NAME, error))?;
                push_text(&mut open, &text)?;
            }
            Event::CData(data) => push_text(&mut open, &String::from_utf8_lossy(&data))?,
            Event::Eof => break,
            _ => {}
        }
    }

    if let Some(element) = open.last() {
        return Err(unexpected("end of document".to_string(), &format!("</{}>", element.name)));
    }
    Ok(root)
}

fn close(open: &mut [Element], root: &mut Option<Element>, element: Element) {
    match open.last_mut() {
        Some(parent) => parent.children.push(element),
        None => *root = Some(element),
    }
}

fn push_text(open: &mut [Element], text: &str) -> Result<(), CodecError> {
    match open.last_mut() {
        Some(element) => {
            element.text.push_str(text);
            Ok(())
        }
        None if text.trim().is_empty() => Ok(()),
        None => Err(unexpected("character data".to_string(), "start element")),
    }
}

fn element_name(raw: &[u8]) -> Result<String, CodecError> {
    std::str::from_utf8(raw)
        .map(str::to_string)
        .map_err(|error| CodecError::malformed(NAME, error))
}

fn unexpected(token: String, expected: &str) -> CodecError {
    CodecError::UnexpectedToken {
        token,
        expected: expected.to_string(),
    }
}

enum XmlNode<'a> {
    Element(&'a Element),
    Repeated(Vec<&'a Element>),
}

impl<'a> XmlNode<'a> {
    fn element(&self, expected: &str) -> Result<&'a Element, CodecError> {
        match self {
            XmlNode::Element(element) => Ok(*element),
            XmlNode::Repeated(_) => Err(unexpected("repeated element".to_string(), expected)),
        }
    }
}

impl<'a> Source for XmlNode<'a> {
    fn field(&self, property: &Property) -> Result<Option<Self>, CodecError> {
        let element = self.element("element")?;
        let matches: Vec<&'a Element> = element.children.iter().filter(|child| child.name == property.name).collect();
        if matches.is_empty() {
            return Ok(None);
        }
        if matches!(property.template.kind, TemplateKind::Repeated(_)) {
            return Ok(Some(XmlNode::Repeated(matches)));
        }
        Ok(matches.last().copied().map(XmlNode::Element))
    }

    fn elements(&self, _element: &Template) -> Result<Vec<Self>, CodecError> {
        match self {
            XmlNode::Repeated(elements) => Ok(elements.iter().copied().map(XmlNode::Element).collect()),
            XmlNode::Element(root) => Ok(root.children.iter().map(XmlNode::Element).collect()),
        }
    }

    fn scalar(&self, kind: ScalarType, path: &str) -> Result<Value, CodecError> {
        let element = self.element("character data")?;
        if !element.children.is_empty() {
            return Err(unexpected(format!("element <{}>", element.children[0].name), "character data"));
        }
        let text = match kind {
            ScalarType::String => element.text.as_str(),
            _ => element.text.trim(),
        };
        Value::decode_from_str(kind, text).map_err(|error| CodecError::invalid_value(path, error))
    }

    fn enumeration(&self) -> Result<Symbol, CodecError> {
        let element = self.element("enum key")?;
        Ok(Symbol::Key(element.text.trim().to_string()))
    }

    fn is_null(&self) -> bool {
        match self {
            XmlNode::Element(element) => element.is_empty(),
            XmlNode::Repeated(_) => false,
        }
    }

    fn undeclared(&self, message: &Message) -> Vec<String> {
        let XmlNode::Element(element) = self else {
            return Vec::new();
        };
        let mut undeclared: Vec<String> = Vec::new();
        for child in &element.children {
            if !message.contains(&child.name) && !undeclared.contains(&child.name) {
                undeclared.push(child.name.clone());
            }
        }
        undeclared
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{bound_order, bound_tree, order, rebased, seeded_store, seeded_tree, status, tree};
    use switchyard_types::{PropertyReference, SchemaError};

    fn marshal(property: Property, store: &Store) -> String {
        let payload = XmlManager::new("order", Some(property)).marshal(store).expect("marshal");
        String::from_utf8(payload).expect("utf8")
    }

    #[test]
    fn properties_render_as_named_elements() {
        let store = seeded_store();
        let document = marshal(bound_order("input"), &store);
        assert_eq!(
            document,
            "<order><id>A-1</id><quantity>3</quantity><status>PENDING</status><tags>fragile</tags><tags>gift</tags>\
             <customer><name>Ada</name></customer><lines><sku>X-1</sku><price>2.5</price></lines>\
             <lines><sku>X-2</sku><price>10</price></lines><contact><email>ada@example.com</email></contact></order>"
        );
    }

    #[test]
    fn enums_without_value_close_immediately() {
        let body = Property::new(
            "",
            Template::message(
                Message::new()
                    .with(Property::new("status", Template::enumeration(status()).with_reference(PropertyReference::new("input", "status")))),
            ),
        );
        assert_eq!(marshal(body, &Store::new()), "<order><status/></order>");
    }

    #[test]
    fn root_arrays_wrap_their_items() {
        let list = Property::new(
            "",
            Template::repeated(vec![Template::scalar(ScalarType::String)]).with_reference(PropertyReference::new("input", "list")),
        );
        let store = Store::new();
        store.define("input:list", 2);
        store.store_value("input:list[0]", "a");
        store.store_value("input:list[1]", "b");
        let document = marshal(list.clone(), &store);
        assert_eq!(document, "<order><item>a</item><item>b</item></order>");

        let decoded = Store::new();
        XmlManager::new("copy", Some(Property::new("", Template::repeated(vec![Template::scalar(ScalarType::String)]))))
            .unmarshal(document.as_bytes(), &decoded)
            .expect("unmarshal");
        assert_eq!(decoded.length("copy:"), 2);
        assert_eq!(decoded.load_value("copy:[1]"), Some(Value::from("b")));
    }

    #[test]
    fn decode_reads_character_data_and_entities() {
        let store = Store::new();
        XmlManager::new("input", Some(order()))
            .unmarshal(
                b"<?xml version=\"1.0\"?>\n<order>\n  <id>A &amp; B</id>\n  <quantity> 4 </quantity>\n  <status>SHIPPED</status>\n</order>",
                &store,
            )
            .expect("unmarshal");
        assert_eq!(store.load_value("input:id"), Some(Value::from("A & B")));
        assert_eq!(store.load_value("input:quantity"), Some(Value::Int32(4)));
        assert_eq!(store.load_enum("input:status"), Some(2));
    }

    #[test]
    fn empty_elements_decode_as_absent() {
        let store = Store::new();
        XmlManager::new("input", Some(order()))
            .unmarshal(b"<order><id></id><quantity/><customer><name>Ada</name></customer></order>", &store)
            .expect("unmarshal");
        assert_eq!(store.load("input:id"), None);
        assert_eq!(store.load("input:quantity"), None);
        assert_eq!(store.load_value("input:customer.name"), Some(Value::from("Ada")));
    }

    #[test]
    fn undeclared_elements_are_rejected() {
        let error = XmlManager::new("input", Some(order()))
            .unmarshal(b"<order><id>A-1</id><coupon>FREE</coupon></order>", &Store::new())
            .expect_err("should fail");
        assert_eq!(
            error,
            CodecError::UndefinedProperty {
                path: "input:".into(),
                key: "coupon".into()
            }
        );
    }

    #[test]
    fn unexpected_tokens_are_rejected() {
        let manager = XmlManager::new("input", Some(order()));

        let error = manager.unmarshal(b"<order><id>A-1</id></order><order/>", &Store::new()).expect_err("should fail");
        assert!(matches!(error, CodecError::UnexpectedToken { .. }), "unexpected error: {error}");

        let error = manager.unmarshal(b"stray<order/>", &Store::new()).expect_err("should fail");
        assert!(matches!(error, CodecError::UnexpectedToken { .. }), "unexpected error: {error}");

        let error = manager.unmarshal(b"<order><id><b>x</b></id></order>", &Store::new()).expect_err("should fail");
        assert!(matches!(error, CodecError::UnexpectedToken { .. }), "unexpected error: {error}");
    }

    #[test]
    fn unknown_enum_keys_fail_to_decode() {
        let error = XmlManager::new("input", Some(order()))
            .unmarshal(b"<order><status>LOST</status></order>", &Store::new())
            .expect_err("should fail");
        assert!(matches!(error, CodecError::UnknownEnumKey { ref key, .. } if key == "LOST"));
    }

    #[test]
    fn second_one_of_branch_is_rejected() {
        let error = XmlManager::new("input", Some(order()))
            .unmarshal(b"<order><contact><email>a@b</email><phone>555</phone></contact></order>", &Store::new())
            .expect_err("should fail");
        assert!(matches!(error, CodecError::Schema(SchemaError::MultipleOneOfBranches { .. })));
    }

    #[test]
    fn recursive_schemas_round_trip() {
        let store = seeded_tree();
        let payload = XmlManager::new("tree", Some(bound_tree("input"))).marshal(&store).expect("marshal");
        assert_eq!(
            String::from_utf8(payload.clone()).expect("utf8"),
            "<tree><value>a</value><children><value>b</value><children><value>c</value></children></children>\
             <children><value>d</value></children></tree>"
        );

        let decoded = Store::new();
        XmlManager::new("copy", Some(tree())).unmarshal(&payload, &decoded).expect("unmarshal");
        assert_eq!(decoded.snapshot(), rebased(&store, "input", "copy"));
    }

    #[test]
    fn round_trip_reproduces_the_store() {
        let store = seeded_store();
        let payload = XmlManager::new("order", Some(bound_order("input"))).marshal(&store).expect("marshal");

        let decoded = Store::new();
        XmlManager::new("copy", Some(order())).unmarshal(&payload, &decoded).expect("unmarshal");
        assert_eq!(decoded.snapshot(), rebased(&store, "input", "copy"));
    }
}
