//! Header metadata codec.
//!
//! Headers are flat `name -> string` maps. Outgoing headers are built from the scalar properties of a
//! [`Header`] declaration; incoming headers are stored below `<resource>.header` with lower-cased names.

use indexmap::IndexMap;
use switchyard_store::Store;
use switchyard_types::path::{HEADER_RESOURCE, header_key, join_path, resource_path};
use switchyard_types::{Header, TemplateKind, Value};
use tracing::{Span, debug, debug_span};

#[derive(Debug)]
pub struct HeaderManager {
    resource: String,
    header: Header,
    span: Span,
}

impl HeaderManager {
    /// Manager for the headers of `resource`, stored under `<resource>.header`.
    pub fn new(resource: &str, header: Header) -> Self {
        let resource = join_path([resource, HEADER_RESOURCE]);
        let span = debug_span!("codec", codec = "header", resource = %resource);
        let header = header.into_iter().map(|(key, property)| (header_key(&key), property)).collect();
        Self { resource, header, span }
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Store resource incoming headers are written to.
    pub fn resource(&self) -> &str {
        &self.resource
    }

    /// Render every scalar header that has a stored value or a default. Headers without value are left out.
    pub fn marshal(&self, store: &Store) -> IndexMap<String, String> {
        let _entered = self.span.enter();
        let mut headers = IndexMap::with_capacity(self.header.len());
        for (key, property) in &self.header {
            let TemplateKind::Scalar(scalar) = &property.template.kind else {
                continue;
            };
            let stored = property
                .template
                .reference
                .as_ref()
                .and_then(|reference| store.load_value(&reference.key()));
            let Some(value) = stored.or_else(|| scalar.default.clone()) else {
                debug!(key = %key, "header has no value");
                continue;
            };
            debug!(key = %key, "marshalling header");
            headers.insert(key.clone(), value.to_text());
        }
        headers
    }

    /// Store the declared headers of `headers`. Names are matched case-insensitively; undeclared headers are ignored.
    pub fn unmarshal<'h, I>(&self, headers: I, store: &Store)
    where
        I: IntoIterator<Item = (&'h str, &'h str)>,
    {
        let _entered = self.span.enter();
        for (name, value) in headers {
            let key = header_key(name);
            if !self.header.contains_key(&key) {
                continue;
            }
            debug!(key = %key, "unmarshalling header");
            store.store_value(resource_path(&self.resource, &key), Value::from(value));
        }
    }
}
