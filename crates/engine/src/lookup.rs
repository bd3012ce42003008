//! Resource naming rules and path lookups inside declared properties.

use switchyard_types::path::{
    ERROR_RESOURCE, INPUT_RESOURCE, OUTPUT_RESOURCE, PATH_DELIMITER, REQUEST_RESOURCE, RESPONSE_RESOURCE, SELF_REF, header_key, join_path,
};
use switchyard_types::{FlowInterface, Header, Label, OnError, Property, PropertyReference, ScalarType, Template, TemplateKind};

/// Split a reference resource into its target and qualifier, defaulting the qualifier when none is given.
///
/// ```
/// use switchyard_engine::lookup::parse_resource;
///
/// assert_eq!(parse_resource("input"), ("input", "request"));
/// assert_eq!(parse_resource("user.header"), ("user", "header"));
/// ```
pub fn parse_resource(resource: &str) -> (&str, &str) {
    match resource.split_once(PATH_DELIMITER) {
        Some((target, qualifier)) if !qualifier.is_empty() => (target, qualifier),
        Some((target, _)) => (target, default_qualifier(target)),
        None => (resource, default_qualifier(resource)),
    }
}

/// Qualifier assumed when a reference names only its target.
pub fn default_qualifier(target: &str) -> &'static str {
    match target {
        INPUT_RESOURCE => REQUEST_RESOURCE,
        ERROR_RESOURCE => RESPONSE_RESOURCE,
        _ => RESPONSE_RESOURCE,
    }
}

/// Resource part of the store key holding values of `resource` at runtime.
///
/// The default body qualifier is dropped (`input.request` is stored under `input`), every other qualifier is kept.
pub fn store_resource(resource: &str) -> String {
    let (target, qualifier) = parse_resource(resource);
    if qualifier == default_qualifier(target) {
        return target.to_string();
    }
    join_path([target, qualifier])
}

/// Resource executed after `breakpoint`: the next node id, or `output` after the last node.
///
/// Unknown breakpoints are returned unchanged.
pub fn next_resource(flow: &dyn FlowInterface, breakpoint: &str) -> String {
    let nodes = flow.nodes();
    match nodes.iter().position(|node| node.id == breakpoint) {
        Some(index) => nodes.get(index + 1).map(|node| node.id.clone()).unwrap_or_else(|| OUTPUT_RESOURCE.to_string()),
        None => breakpoint.to_string(),
    }
}

/// Substitute the breakpoint for a leading self-reference marker (`.header` from node `user` becomes `user.header`).
pub fn resolve_self_reference(resource: &str, breakpoint: &str) -> String {
    match resource.strip_prefix(SELF_REF) {
        Some(rest) => join_path([breakpoint, rest]),
        None => resource.to_string(),
    }
}

/// Find the property declared at `path` inside `property`.
///
/// A bare self reference returns the root. Repeated properties are searched through their normalized element
/// template and messages through their fields. Recursion markers are not descended.
pub fn property_lookup(property: &Property, path: &str) -> Option<Property> {
    if path == SELF_REF || property.path == path.trim_matches(PATH_DELIMITER) {
        return Some(property.clone());
    }
    template_lookup(&property.template, path)
}

fn template_lookup(template: &Template, path: &str) -> Option<Property> {
    match &template.kind {
        TemplateKind::Message(fields) | TemplateKind::OneOf(fields) => fields.values().find_map(|field| property_lookup(field, path)),
        TemplateKind::Repeated(repeated) => {
            let element = repeated.normalize().ok()?;
            template_lookup(&element, path)
        }
        TemplateKind::Scalar(_) | TemplateKind::Enum(_) | TemplateKind::Unknown => None,
    }
}

/// Case-insensitive header lookup.
pub fn header_lookup(header: &Header, path: &str) -> Option<Property> {
    header.iter().find(|(key, _)| key.eq_ignore_ascii_case(path)).map(|(_, property)| property.clone())
}

/// Header of an upstream response. Undeclared names resolve to an optional string header.
pub fn variable_header_lookup(header: Option<&Header>, path: &str) -> Property {
    header.and_then(|header| header_lookup(header, path)).unwrap_or_else(|| variable_header(path))
}

/// Optional string property describing a response header that was referenced but never declared.
pub fn variable_header(name: &str) -> Property {
    Property::new(name, Template::scalar(ScalarType::String)).with_path(header_key(name))
}

/// `message` and `status` are always available on the error resource, set by the executor when a call fails.
///
/// Declared error properties are returned as-is unless they read from the error resource themselves, in which
/// case the built-in defaults apply.
pub fn on_error_lookup(on_error: Option<&OnError>, path: &str) -> Option<Property> {
    let (declared, kind) = match path {
        "message" => (on_error.and_then(|on_error| on_error.message.as_ref()), ScalarType::String),
        "status" => (on_error.and_then(|on_error| on_error.status.as_ref()), ScalarType::Int64),
        _ => return None,
    };
    match declared {
        Some(property) if !reads_error_resource(property) => Some(property.clone()),
        _ => Some(Property::new(path, Template::scalar(kind)).with_label(Label::Optional)),
    }
}

fn reads_error_resource(property: &Property) -> bool {
    property.template.reference.as_ref().is_some_and(|reference: &PropertyReference| parse_resource(&reference.resource).0 == ERROR_RESOURCE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use switchyard_types::{Flow, Message, Node, Type};

    fn user() -> Property {
        let mut property = Property::new(
            "",
            Template::message(
                Message::new()
                    .with(Property::new("name", Template::scalar(ScalarType::String)))
                    .with(Property::new(
                        "tags",
                        Template::repeated(vec![Template::message(
                            Message::new().with(Property::new("key", Template::scalar(ScalarType::String))),
                        )]),
                    )),
            ),
        );
        property.layout("");
        property
    }

    #[test]
    fn qualifiers_default_per_target() {
        assert_eq!(parse_resource("input"), ("input", "request"));
        assert_eq!(parse_resource("error"), ("error", "response"));
        assert_eq!(parse_resource("user"), ("user", "response"));
        assert_eq!(parse_resource("user.request"), ("user", "request"));
        assert_eq!(parse_resource("stack.hash.value"), ("stack", "hash.value"));
    }

    #[test]
    fn store_resource_drops_default_qualifier() {
        assert_eq!(store_resource("input.request"), "input");
        assert_eq!(store_resource("input.header"), "input.header");
        assert_eq!(store_resource("user"), "user");
        assert_eq!(store_resource("user.response"), "user");
        assert_eq!(store_resource("user.request"), "user.request");
    }

    #[test]
    fn next_resource_walks_declared_order() {
        let flow = Flow {
            name: "checkout".into(),
            nodes: vec![Node::new("first"), Node::new("second")],
            ..Flow::default()
        };
        assert_eq!(next_resource(&flow, "first"), "second");
        assert_eq!(next_resource(&flow, "second"), "output");
        assert_eq!(next_resource(&flow, "missing"), "missing");
    }

    #[test]
    fn self_reference_uses_breakpoint() {
        assert_eq!(resolve_self_reference(".", "user"), "user");
        assert_eq!(resolve_self_reference(".header", "user"), "user.header");
        assert_eq!(resolve_self_reference("input", "user"), "input");
    }

    #[test]
    fn property_lookup_descends_messages_and_repeated_elements() {
        let root = user();
        assert_eq!(property_lookup(&root, ".").map(|property| property.template.r#type()), Some(Type::Message));
        assert_eq!(property_lookup(&root, "name").map(|property| property.path), Some("name".to_string()));
        assert_eq!(property_lookup(&root, "tags.key").map(|property| property.path), Some("tags.key".to_string()));
        assert!(property_lookup(&root, "tags.missing").is_none());
    }

    #[test]
    fn header_lookup_ignores_case() {
        let mut header = Header::new();
        header.insert("Authorization".into(), Property::new("Authorization", Template::scalar(ScalarType::String)));
        assert!(header_lookup(&header, "authorization").is_some());
        assert!(header_lookup(&header, "cookie").is_none());
        assert_eq!(variable_header_lookup(Some(&header), "X-Request-Id").path, "x-request-id");
    }

    #[test]
    fn on_error_lookup_provides_defaults() {
        let message = on_error_lookup(None, "message").expect("message");
        assert_eq!(message.template.r#type(), Type::Scalar(ScalarType::String));
        let status = on_error_lookup(None, "status").expect("status");
        assert_eq!(status.template.r#type(), Type::Scalar(ScalarType::Int64));
        assert!(on_error_lookup(None, "other").is_none());
    }
}
