//! Breakpoint visibility: which resources a reference may address from a given point in the flow.

use std::collections::HashMap;

use indexmap::IndexMap;
use switchyard_types::path::{
    ERROR_RESOURCE, HEADER_RESOURCE, INPUT_RESOURCE, OUTPUT_RESOURCE, PARAMS_RESOURCE, REQUEST_RESOURCE, RESPONSE_RESOURCE, STACK_RESOURCE,
};
use switchyard_types::{FlowInterface, Header, OnError, ParameterMap, Property};

use crate::lookup::{header_lookup, on_error_lookup, property_lookup, variable_header_lookup};

/// How a single `target.qualifier` pair answers path lookups.
#[derive(Debug, Clone)]
pub enum ResourceLookup<'a> {
    /// Body property; `None` when the call declares no body.
    Property(Option<&'a Property>),
    /// Named call parameters. Entries carrying a reference are resolved against `breakpoint` by the resolver.
    Params { params: &'a IndexMap<String, Property>, breakpoint: String },
    /// Declared headers, matched case-insensitively.
    Header(&'a Header),
    /// Response headers of an upstream node; undeclared names are accepted and added to that node.
    VariableHeader { node: String, header: Option<&'a Header> },
    /// Error object of a node or flow.
    OnError(Option<&'a OnError>),
}

impl ResourceLookup<'_> {
    /// Property declared at `path`. Params are returned as declared, without following their references.
    pub fn lookup(&self, path: &str) -> Option<Property> {
        match self {
            ResourceLookup::Property(property) => property.and_then(|property| property_lookup(property, path)),
            ResourceLookup::Params { params, .. } => params.get(path).cloned(),
            ResourceLookup::Header(header) => header_lookup(header, path),
            ResourceLookup::VariableHeader { header, .. } => Some(variable_header_lookup(*header, path)),
            ResourceLookup::OnError(on_error) => on_error_lookup(*on_error, path),
        }
    }
}

/// Qualifier lookups keyed by qualifier name.
pub type ReferenceMap<'a> = IndexMap<String, ResourceLookup<'a>>;

/// Resources visible at a breakpoint.
#[derive(Debug, Clone)]
pub struct AvailableResources<'a> {
    breakpoint: String,
    resources: HashMap<String, ReferenceMap<'a>>,
}

impl<'a> AvailableResources<'a> {
    pub fn breakpoint(&self) -> &str {
        &self.breakpoint
    }

    pub fn resource(&self, target: &str) -> Option<&ReferenceMap<'a>> {
        self.resources.get(target)
    }

    pub fn get(&self, target: &str, qualifier: &str) -> Option<&ResourceLookup<'a>> {
        self.resources.get(target)?.get(qualifier)
    }

    pub fn contains(&self, target: &str) -> bool {
        self.resources.contains_key(target)
    }

    /// Visible resource names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.resources.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

/// Collect the resources visible from `breakpoint` (a node id, or `output`).
///
/// Visible are the flow input, the function stack, every node declared up to and including the breakpoint, the
/// error object of the breakpoint node, and the flow error object for the `output` breakpoint.
pub fn available_resources<'a>(flow: &'a dyn FlowInterface, breakpoint: &str) -> AvailableResources<'a> {
    let mut resources: HashMap<String, ReferenceMap<'a>> = HashMap::with_capacity(flow.nodes().len() + 3);
    let mut stack = ReferenceMap::new();

    if let Some(input) = flow.input() {
        let mut references = ReferenceMap::new();
        references.insert(REQUEST_RESOURCE.into(), ResourceLookup::Property(input.property.as_ref()));
        references.insert(HEADER_RESOURCE.into(), ResourceLookup::Header(&input.header));
        resources.insert(INPUT_RESOURCE.into(), references);
    }

    if breakpoint == OUTPUT_RESOURCE
        && let Some(on_error) = flow.on_error()
    {
        resources.insert(ERROR_RESOURCE.into(), error_references(on_error, OUTPUT_RESOURCE));
    }

    for node in flow.nodes() {
        let mut references = ReferenceMap::new();

        if let Some(intermediate) = &node.intermediate {
            collect_stack(&mut stack, intermediate);
            references.insert(RESPONSE_RESOURCE.into(), ResourceLookup::Property(intermediate.property.as_ref()));
            references.insert(
                HEADER_RESOURCE.into(),
                ResourceLookup::VariableHeader {
                    node: node.id.clone(),
                    header: Some(&intermediate.header),
                },
            );
        }

        if let Some(call) = &node.call {
            if let Some(request) = &call.request {
                collect_stack(&mut stack, request);
                references.insert(
                    PARAMS_RESOURCE.into(),
                    ResourceLookup::Params {
                        params: &request.params,
                        breakpoint: breakpoint.to_string(),
                    },
                );
                references.insert(REQUEST_RESOURCE.into(), ResourceLookup::Property(request.property.as_ref()));
            }
            if let Some(response) = &call.response {
                collect_stack(&mut stack, response);
                references.insert(RESPONSE_RESOURCE.into(), ResourceLookup::Property(response.property.as_ref()));
            }
            references.insert(
                HEADER_RESOURCE.into(),
                ResourceLookup::VariableHeader {
                    node: node.id.clone(),
                    header: call.response.as_ref().map(|response| &response.header),
                },
            );
        }

        if node.id == breakpoint {
            if let Some(on_error) = &node.on_error {
                resources.insert(ERROR_RESOURCE.into(), error_references(on_error, breakpoint));
                if let Some(response) = &on_error.response {
                    references.insert(ERROR_RESOURCE.into(), ResourceLookup::Property(response.property.as_ref()));
                }
            }
            resources.insert(node.id.clone(), references);
            break;
        }
        resources.insert(node.id.clone(), references);
    }

    if let Some(output) = flow.output() {
        collect_stack(&mut stack, output);
    }
    resources.insert(STACK_RESOURCE.into(), stack);

    AvailableResources {
        breakpoint: breakpoint.to_string(),
        resources,
    }
}

fn error_references<'a>(on_error: &'a OnError, breakpoint: &str) -> ReferenceMap<'a> {
    let mut references = ReferenceMap::new();
    references.insert(RESPONSE_RESOURCE.into(), ResourceLookup::OnError(Some(on_error)));
    references.insert(
        PARAMS_RESOURCE.into(),
        ResourceLookup::Params {
            params: &on_error.params,
            breakpoint: breakpoint.to_string(),
        },
    );
    references
}

fn collect_stack<'a>(stack: &mut ReferenceMap<'a>, parameters: &'a ParameterMap) {
    for (key, returns) in &parameters.stack {
        stack.insert(key.clone(), ResourceLookup::Property(Some(returns)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use switchyard_types::FlowsManifest;

    const MANIFEST: &str = r#"
flows:
  - name: checkout
    input:
      property:
        message:
          id: { scalar: { type: string } }
    on_error:
      message: { scalar: { type: string } }
    nodes:
      - id: first
        call:
          request:
            params:
              id: { reference: "input:id" }
          response:
            property:
              message:
                value: { scalar: { type: int64 } }
      - id: second
        call:
          response:
            property:
              message:
                value: { scalar: { type: string } }
        on_error:
          status: { scalar: { type: int32 } }
    output:
      property:
        message:
          value: { reference: "second:value" }
"#;

    fn manifest() -> FlowsManifest {
        FlowsManifest::from_yaml_str(MANIFEST).expect("manifest")
    }

    #[test]
    fn nodes_after_the_breakpoint_are_not_visible() {
        let manifest = manifest();
        let flow = manifest.get("checkout").expect("flow");

        let available = available_resources(flow, "first");
        assert_eq!(available.names(), vec!["first", "input", "stack"]);
        assert!(!available.contains("second"));
        assert!(available.get("first", "params").is_some());
    }

    #[test]
    fn output_breakpoint_sees_every_node_and_flow_error() {
        let manifest = manifest();
        let flow = manifest.get("checkout").expect("flow");

        let available = available_resources(flow, OUTPUT_RESOURCE);
        assert!(available.contains("first"));
        assert!(available.contains("second"));
        let error = available.get("error", "response").expect("error lookup");
        assert!(error.lookup("message").is_some());
        assert!(error.lookup("status").is_some());
    }

    #[test]
    fn flow_error_is_only_visible_at_the_output() {
        let manifest = manifest();
        let flow = manifest.get("checkout").expect("flow");

        assert!(!available_resources(flow, "first").contains("error"));
        let message = available_resources(flow, OUTPUT_RESOURCE)
            .get("error", "response")
            .and_then(|lookup| lookup.lookup("message"))
            .expect("message");
        assert_eq!(message.template.r#type(), switchyard_types::Type::Scalar(switchyard_types::ScalarType::String));
    }

    #[test]
    fn breakpoint_node_error_replaces_flow_error() {
        let manifest = manifest();
        let flow = manifest.get("checkout").expect("flow");

        let available = available_resources(flow, "second");
        let status = available.get("error", "response").and_then(|lookup| lookup.lookup("status")).expect("status");
        assert_eq!(status.template.r#type(), switchyard_types::Type::Scalar(switchyard_types::ScalarType::Int32));
    }

    #[test]
    fn upstream_response_headers_are_variable() {
        let manifest = manifest();
        let flow = manifest.get("checkout").expect("flow");

        let available = available_resources(flow, "second");
        let header = available.get("first", "header").and_then(|lookup| lookup.lookup("X-Trace")).expect("header");
        assert_eq!(header.path, "x-trace");
    }
}
