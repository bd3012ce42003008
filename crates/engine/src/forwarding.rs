//! Reference forwarding.
//!
//! A property referencing another property that is itself a reference (an output field pointing at a request field
//! that reads `input:id`) is re-scoped to the innermost reference, so runtime loads hit the store key that actually
//! holds the value.

use std::collections::HashSet;

use switchyard_types::{FlowInterface, Node, OnError, ParameterMap, Property, Template, TemplateKind};

/// Re-scope every resolved reference of `flow` to the reference its target forwards to.
pub fn forward_references(flow: &mut dyn FlowInterface) {
    for node in flow.nodes_mut() {
        forward_node(node);
    }
    if let Some(on_error) = flow.on_error_mut() {
        forward_on_error(on_error);
    }
    if let Some(output) = flow.output_mut() {
        forward_parameter_map(output);
    }
    if let Some(request) = flow.forward_mut().and_then(|forward| forward.request.as_mut()) {
        for header in request.header.values_mut() {
            forward_property(header);
        }
    }
}

fn forward_node(node: &mut Node) {
    if let Some(on_error) = &mut node.on_error {
        forward_on_error(on_error);
    }
    if let Some(condition) = &mut node.condition {
        forward_parameter_map(&mut condition.params);
    }
    for call in [node.call.as_mut(), node.rollback.as_mut()].into_iter().flatten() {
        if let Some(request) = &mut call.request {
            forward_parameter_map(request);
        }
        if let Some(response) = &mut call.response {
            forward_parameter_map(response);
        }
    }
}

fn forward_on_error(on_error: &mut OnError) {
    if let Some(response) = &mut on_error.response {
        forward_parameter_map(response);
    }
    for property in [on_error.message.as_mut(), on_error.status.as_mut()].into_iter().flatten() {
        forward_property(property);
    }
    for param in on_error.params.values_mut() {
        forward_property(param);
    }
}

fn forward_parameter_map(parameters: &mut ParameterMap) {
    for param in parameters.params.values_mut() {
        forward_property(param);
    }
    for header in parameters.header.values_mut() {
        forward_property(header);
    }
    if let Some(property) = &mut parameters.property {
        forward_property(property);
    }
}

/// Forward `property` and every property nested below it.
pub fn forward_property(property: &mut Property) {
    forward_nested(&mut property.template);
    scope_reference(&mut property.template);
}

fn forward_nested(template: &mut Template) {
    match &mut template.kind {
        TemplateKind::Message(fields) | TemplateKind::OneOf(fields) => {
            for field in fields.values_mut() {
                forward_property(field);
            }
        }
        TemplateKind::Repeated(repeated) => {
            for element in &mut repeated.elements {
                forward_nested(element);
                scope_reference(element);
            }
        }
        TemplateKind::Scalar(_) | TemplateKind::Enum(_) | TemplateKind::Unknown => {}
    }
}

fn scope_reference(template: &mut Template) {
    let mut seen = HashSet::new();
    loop {
        let Some(reference) = &template.reference else {
            return;
        };
        let Some(next) = reference.property.as_ref().and_then(|target| target.template.reference.as_ref()) else {
            return;
        };
        if !seen.insert(reference.key()) || next == reference {
            return;
        }

        let forwarded = next.clone();
        if matches!(template.kind, TemplateKind::Message(_) | TemplateKind::OneOf(_) | TemplateKind::Repeated(_)) {
            template.bind_reference(&forwarded);
        }
        template.reference = Some(forwarded);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use switchyard_types::{Message, PropertyReference, ScalarType};

    fn resolved(reference: PropertyReference, target: Property) -> PropertyReference {
        let mut reference = reference;
        reference.property = Some(Box::new(target));
        reference
    }

    #[test]
    fn nested_references_are_scoped_to_the_innermost_reference() {
        let input = Property::new("id", Template::scalar(ScalarType::String));
        let request = Property::new("id", Template::scalar(ScalarType::String))
            .with_reference(resolved(PropertyReference::new("input", "id"), input));
        let mut output = Property::new("id", Template::scalar(ScalarType::String))
            .with_reference(resolved(PropertyReference::new("user.request", "id"), request));

        forward_property(&mut output);

        let reference = output.template.reference.expect("reference");
        assert_eq!(reference.to_string(), "input:id");
        assert!(reference.is_resolved());
    }

    #[test]
    fn unresolved_references_are_left_alone() {
        let mut property = Property::new("id", Template::scalar(ScalarType::String)).with_reference(PropertyReference::new("user", "id"));
        forward_property(&mut property);
        assert_eq!(property.template.reference.map(|reference| reference.to_string()), Some("user:id".to_string()));
    }

    #[test]
    fn forwarded_messages_rebind_their_fields() {
        let input = Property::new(
            "",
            Template::message(Message::new().with(Property::new("name", Template::scalar(ScalarType::String)))),
        );
        let request = Property::new("user", input.template.clone()).with_reference(resolved(PropertyReference::new("input", ""), input));
        let mut output = Property::new("user", request.template.clone())
            .with_reference(resolved(PropertyReference::new("user.request", "user"), request));

        forward_property(&mut output);

        let name = output.template.as_message().and_then(|message| message.get("name")).expect("name");
        assert_eq!(name.template.reference.as_ref().map(|reference| reference.to_string()), Some("input:name".to_string()));
    }
}
