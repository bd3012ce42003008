//! `application/x-www-form-urlencoded` binding.
//!
//! Every scalar and enum becomes one pair keyed by its store path without the resource: `customer.name=Ada`,
//! `tags[0]=fragile`, `lines[1].sku=X-2`. Decoding accepts the same keys in any order; unknown keys are ignored.

use indexmap::IndexMap;
use switchyard_store::{Store, Tracker};
use switchyard_types::path::{index_path, join_path, trim_resource};
use switchyard_types::{EnumValue, ParameterMap, Property, ScalarType, Template, Value};
use tracing::{Span, debug, debug_span};
use url::form_urlencoded;

use crate::walk::{self, Emitter, Slot, Source, Symbol, UndefinedKeys};
use crate::{CodecError, Constructor, Manager, root_path};

pub const NAME: &str = "form-urlencoded";

#[derive(Debug, Default, Clone, Copy)]
pub struct FormConstructor;

impl Constructor for FormConstructor {
    fn name(&self) -> &'static str {
        NAME
    }

    fn new_manager(&self, resource: &str, parameters: &ParameterMap) -> Result<Box<dyn Manager>, CodecError> {
        Ok(Box::new(FormManager::new(resource, parameters.property.clone())))
    }
}

#[derive(Debug)]
pub struct FormManager {
    resource: String,
    property: Option<Property>,
    span: Span,
}

impl FormManager {
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

impl Manager for FormManager {
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

        let mut emitter = FormEmitter::default();
        walk::encode(property, &root_path(&self.resource, property), store, &mut Tracker::new(), &mut emitter)?;
        let encoded = form_urlencoded::Serializer::new(String::new())
            .extend_pairs(&emitter.pairs)
            .finish();
        debug!(pairs = emitter.pairs.len(), "encoded form payload");
        Ok(encoded.into_bytes())
    }

    fn unmarshal(&self, payload: &[u8], store: &Store) -> Result<(), CodecError> {
        let _entered = self.span.enter();
        let Some(property) = &self.property else {
            return Ok(());
        };

        let pairs: IndexMap<String, String> = form_urlencoded::parse(payload)
            .map(|(key, value)| (key.into_owned(), value.into_owned()))
            .collect();
        if pairs.is_empty() {
            return Ok(());
        }

        let root = FormNode {
            pairs: &pairs,
            key: String::new(),
        };
        walk::decode(
            &root,
            property,
            &root_path(&self.resource, property),
            store,
            &mut Tracker::new(),
            UndefinedKeys::Ignore,
        )?;
        debug!(pairs = pairs.len(), "decoded form payload");
        Ok(())
    }
}

#[derive(Default)]
struct FormEmitter {
    pairs: Vec<(String, String)>,
}

impl Emitter for FormEmitter {
    fn begin_message(&mut self, _slot: Slot<'_>) -> Result<(), CodecError> {
        Ok(())
    }

    fn end_message(&mut self, _slot: Slot<'_>) -> Result<(), CodecError> {
        Ok(())
    }

    fn begin_array(&mut self, _slot: Slot<'_>, _element: &Template) -> Result<(), CodecError> {
        Ok(())
    }

    fn end_array(&mut self, _slot: Slot<'_>) -> Result<(), CodecError> {
        Ok(())
    }

    fn scalar(&mut self, _slot: Slot<'_>, path: &str, _kind: ScalarType, value: &Value) -> Result<(), CodecError> {
        self.pairs.push((trim_resource(path).to_string(), value.to_text()));
        Ok(())
    }

    fn enumeration(&mut self, _slot: Slot<'_>, path: &str, value: &EnumValue) -> Result<(), CodecError> {
        self.pairs.push((trim_resource(path).to_string(), value.key.clone()));
        Ok(())
    }

    fn absent(&mut self, _slot: Slot<'_>, _path: &str) -> Result<(), CodecError> {
        Ok(())
    }
}

/// Node addressed by `key` within the decoded pairs. The root node has an empty key.
struct FormNode<'a> {
    pairs: &'a IndexMap<String, String>,
    key: String,
}

impl FormNode<'_> {
    fn child(&self, key: String) -> Self {
        Self { pairs: self.pairs, key }
    }

    fn value(&self) -> Result<&str, CodecError> {
        self.pairs.get(&self.key).map(String::as_str).ok_or_else(|| CodecError::UnexpectedToken {
            token: format!("nested keys below '{}'", self.key),
            expected: "a value".to_string(),
        })
    }

    fn has_descendants(&self) -> bool {
        if self.key.is_empty() {
            return !self.pairs.is_empty();
        }
        let field = format!("{}.", self.key);
        let element = format!("{}[", self.key);
        self.pairs.keys().any(|key| key.starts_with(&field) || key.starts_with(&element))
    }
}

impl Source for FormNode<'_> {
    fn field(&self, property: &Property) -> Result<Option<Self>, CodecError> {
        let child = self.child(join_path([self.key.as_str(), property.name.as_str()]));
        if child.is_null() {
            return Ok(None);
        }
        Ok(Some(child))
    }

    fn elements(&self, _element: &Template) -> Result<Vec<Self>, CodecError> {
        let prefix = format!("{}[", self.key);
        let length = self
            .pairs
            .keys()
            .filter_map(|key| key.strip_prefix(&prefix))
            .filter_map(|rest| rest.split_once(']'))
            .filter_map(|(index, _)| index.parse::<usize>().ok())
            .map(|index| index + 1)
            .max()
            .unwrap_or_default();
        Ok((0..length).map(|index| self.child(index_path(&self.key, index))).collect())
    }

    fn scalar(&self, kind: ScalarType, path: &str) -> Result<Value, CodecError> {
        Value::decode_from_str(kind, self.value()?).map_err(|error| CodecError::invalid_value(path, error))
    }

    fn enumeration(&self) -> Result<Symbol, CodecError> {
        Ok(Symbol::Key(self.value()?.to_string()))
    }

    fn is_null(&self) -> bool {
        !self.pairs.contains_key(&self.key) && !self.has_descendants()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{bound_order, bound_tree, order, rebased, seeded_store, seeded_tree, tree};

    #[test]
    fn keys_are_store_paths_without_resource() {
        let payload = FormManager::new("output", Some(bound_order("input")))
            .marshal(&seeded_store())
            .expect("marshal");
        assert_eq!(
            String::from_utf8(payload).expect("utf8"),
            "id=A-1&quantity=3&status=PENDING&tags%5B0%5D=fragile&tags%5B1%5D=gift&customer.name=Ada\
             &lines%5B0%5D.sku=X-1&lines%5B0%5D.price=2.5&lines%5B1%5D.sku=X-2&lines%5B1%5D.price=10\
             &contact.email=ada%40example.com"
        );
    }

    #[test]
    fn decode_accepts_keys_in_any_order() {
        let store = Store::new();
        FormManager::new("input", Some(order()))
            .unmarshal(b"tags[1]=gift&customer.name=Ada+L&tags[0]=fragile&quantity=4&coupon=FREE", &store)
            .expect("unmarshal");

        assert_eq!(store.length("input:tags"), 2);
        assert_eq!(store.load_value("input:tags[0]"), Some(Value::from("fragile")));
        assert_eq!(store.load_value("input:customer.name"), Some(Value::from("Ada L")));
        assert_eq!(store.load_value("input:quantity"), Some(Value::Int32(4)));
        assert_eq!(store.load_value("input:coupon"), None);
    }

    #[test]
    fn sparse_indices_keep_their_position() {
        let store = Store::new();
        FormManager::new("input", Some(order()))
            .unmarshal(b"lines[2].sku=X-3", &store)
            .expect("unmarshal");
        assert_eq!(store.length("input:lines"), 3);
        assert_eq!(store.load_value("input:lines[2].sku"), Some(Value::from("X-3")));
        assert_eq!(store.load_value("input:lines[0].sku"), None);
    }

    #[test]
    fn invalid_values_name_their_path() {
        let error = FormManager::new("input", Some(order()))
            .unmarshal(b"quantity=lots", &Store::new())
            .expect_err("should fail");
        assert!(matches!(error, CodecError::InvalidValue { ref path, .. } if path == "input:quantity"));

        let error = FormManager::new("input", Some(order()))
            .unmarshal(b"status=LOST", &Store::new())
            .expect_err("should fail");
        assert!(matches!(error, CodecError::UnknownEnumKey { ref key, .. } if key == "LOST"));
    }

    #[test]
    fn recursive_schemas_round_trip() {
        let store = seeded_tree();
        let payload = FormManager::new("output", Some(bound_tree("input"))).marshal(&store).expect("marshal");
        assert_eq!(
            String::from_utf8(payload.clone()).expect("utf8"),
            "value=a&children%5B0%5D.value=b&children%5B0%5D.children%5B0%5D.value=c&children%5B1%5D.value=d"
        );

        let decoded = Store::new();
        FormManager::new("copy", Some(tree())).unmarshal(&payload, &decoded).expect("unmarshal");
        assert_eq!(decoded.snapshot(), rebased(&store, "input", "copy"));
    }

    #[test]
    fn round_trip_reproduces_the_store() {
        let store = seeded_store();
        let payload = FormManager::new("output", Some(bound_order("input"))).marshal(&store).expect("marshal");

        let decoded = Store::new();
        FormManager::new("copy", Some(order())).unmarshal(&payload, &decoded).expect("unmarshal");
        assert_eq!(decoded.snapshot(), rebased(&store, "input", "copy"));
    }
}
