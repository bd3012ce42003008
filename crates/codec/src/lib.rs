//! # Switchyard Codec
//!
//! Schema driven wire codecs. Every binding shares one walk ([`walk::encode`], [`walk::decode`]) of a resolved
//! [`Property`] against the per-execution [`Store`] and differs only in its leaf writers and payload parser:
//!
//! - `json`: objects omit unresolved fields, arrays keep `null` placeholders, undeclared keys are ignored.
//! - `xml`: one element per property, repeated values repeat the element, undeclared elements are rejected.
//! - `proto`: protobuf wire format with field numbers taken from property positions, unknown fields are skipped.
//! - `form-urlencoded`: `user.name=bob&tags[0]=a` pairs.
//!
//! Header metadata is handled by [`metadata::HeaderManager`].
//!
//! ## Usage
//!
//! ```rust
//! use switchyard_codec::Constructors;
//! use switchyard_store::Store;
//! use switchyard_types::{Message, ParameterMap, Property, PropertyReference, ScalarType, Template};
//!
//! let body = Property::new(
//!     "",
//!     Template::message(Message::new().with(
//!         Property::new("message", Template::scalar(ScalarType::String)).with_reference(PropertyReference::new("input", "message")),
//!     )),
//! );
//! let store = Store::new();
//! store.store_value("input:message", "hi");
//!
//! let manager = Constructors::default().new_manager("json", "output", &ParameterMap::with_property(body)).unwrap();
//! assert_eq!(manager.marshal(&store).unwrap(), br#"{"message":"hi"}"#);
//! ```

mod error;
#[cfg(test)]
mod fixtures;
pub mod form;
pub mod json;
pub mod metadata;
pub mod proto;
pub mod walk;
pub mod xml;

use indexmap::IndexMap;
use switchyard_store::Store;
use switchyard_types::path::resource_path;
use switchyard_types::{ParameterMap, Property};

pub use error::CodecError;
pub use form::{FormConstructor, FormManager};
pub use json::{JsonConstructor, JsonManager};
pub use metadata::HeaderManager;
pub use proto::{ProtoConstructor, ProtoManager};
pub use xml::{XmlConstructor, XmlManager};

/// Builds managers of one codec for a call site.
pub trait Constructor: Send + Sync {
    fn name(&self) -> &'static str;

    /// Manager encoding and decoding the body of `parameters`. Values are read from and written below `resource`.
    fn new_manager(&self, resource: &str, parameters: &ParameterMap) -> Result<Box<dyn Manager>, CodecError>;
}

/// Encodes and decodes one body property.
pub trait Manager: Send + Sync {
    fn name(&self) -> &'static str;

    /// Body property, `None` when the call site declares no body.
    fn property(&self) -> Option<&Property>;

    /// Encode the values behind the property references. Managers without property return an empty payload.
    fn marshal(&self, store: &Store) -> Result<Vec<u8>, CodecError>;

    /// Decode `payload` into `store`. Empty payloads are accepted and leave the store untouched.
    fn unmarshal(&self, payload: &[u8], store: &Store) -> Result<(), CodecError>;
}

/// Codec constructors keyed by name.
pub struct Constructors {
    constructors: IndexMap<&'static str, Box<dyn Constructor>>,
}

impl Default for Constructors {
    /// Registry holding every built-in codec.
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(Box::new(JsonConstructor));
        registry.register(Box::new(XmlConstructor));
        registry.register(Box::new(ProtoConstructor));
        registry.register(Box::new(FormConstructor));
        registry
    }
}

impl Constructors {
    pub fn empty() -> Self {
        Self {
            constructors: IndexMap::new(),
        }
    }

    /// Register a constructor, replacing any constructor with the same name.
    pub fn register(&mut self, constructor: Box<dyn Constructor>) {
        self.constructors.insert(constructor.name(), constructor);
    }

    pub fn get(&self, name: &str) -> Result<&dyn Constructor, CodecError> {
        self.constructors
            .get(name)
            .map(|constructor| constructor.as_ref())
            .ok_or_else(|| CodecError::UnknownCodec(name.to_string()))
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.constructors.keys().copied().collect()
    }

    pub fn new_manager(&self, codec: &str, resource: &str, parameters: &ParameterMap) -> Result<Box<dyn Manager>, CodecError> {
        self.get(codec)?.new_manager(resource, parameters)
    }
}

/// Absolute store path of the property handed to a manager (`resource:` followed by the property path).
pub(crate) fn root_path(resource: &str, property: &Property) -> String {
    resource_path(resource, &property.path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_registry_holds_every_builtin_codec() {
        let constructors = Constructors::default();
        assert_eq!(constructors.names(), vec!["json", "xml", "proto", "form-urlencoded"]);
    }

    #[test]
    fn unknown_codec_names_are_rejected() {
        let error = Constructors::default()
            .new_manager("yaml", "input", &ParameterMap::default())
            .err()
            .expect("should fail");
        assert_eq!(error, CodecError::UnknownCodec("yaml".into()));
    }

    #[test]
    fn managers_without_body_encode_nothing() {
        let constructors = Constructors::default();
        for name in constructors.names() {
            let manager = constructors.new_manager(name, "input", &ParameterMap::default()).expect("manager");
            assert!(manager.property().is_none());
            assert!(manager.marshal(&Store::new()).expect("marshal").is_empty(), "{name} encoded a payload");
            manager.unmarshal(b"", &Store::new()).expect("unmarshal");
        }
    }
}
