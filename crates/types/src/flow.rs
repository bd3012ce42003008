//! Flow graph model consumed by reference resolution and the codecs.
//!
//! Flows are usually produced by an authoring front end. The types derive serde so a manifest can also be loaded from
//! YAML or JSON directly; call [`FlowsManifest::layout`] afterwards (the loaders do this) so every property carries
//! its absolute path.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::SchemaError;
use crate::expression::references_in;
use crate::path::header_key;
use crate::property::Property;
use crate::template::Template;

/// Header properties keyed by header name.
pub type Header = IndexMap<String, Property>;

/// Collection of flows and proxies.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FlowsManifest {
    #[serde(default)]
    pub flows: Vec<Flow>,
    #[serde(default)]
    pub proxies: Vec<Proxy>,
}

impl FlowsManifest {
    pub fn from_yaml_str(content: &str) -> Result<Self, serde_yaml::Error> {
        let mut manifest: FlowsManifest = serde_yaml::from_str(content)?;
        manifest.layout();
        Ok(manifest)
    }

    pub fn from_json_str(content: &str) -> Result<Self, serde_json::Error> {
        let mut manifest: FlowsManifest = serde_json::from_str(content)?;
        manifest.layout();
        Ok(manifest)
    }

    /// Find a flow or proxy by name.
    pub fn get(&self, name: &str) -> Option<&dyn FlowInterface> {
        if let Some(flow) = self.flows.iter().find(|flow| flow.name == name) {
            return Some(flow as &dyn FlowInterface);
        }
        self.proxies.iter().find(|proxy| proxy.name == name).map(|proxy| proxy as &dyn FlowInterface)
    }

    /// Append the flows and proxies of other manifests.
    pub fn merge(&mut self, incoming: impl IntoIterator<Item = FlowsManifest>) {
        for manifest in incoming {
            self.flows.extend(manifest.flows);
            self.proxies.extend(manifest.proxies);
        }
    }

    /// Assign absolute property paths throughout the manifest.
    pub fn layout(&mut self) {
        for flow in &mut self.flows {
            layout_flow(flow);
        }
        for proxy in &mut self.proxies {
            layout_flow(proxy);
        }
    }
}

fn layout_flow(flow: &mut dyn FlowInterface) {
    if let Some(input) = flow.input_mut() {
        input.layout();
    }
    if let Some(output) = flow.output_mut() {
        output.layout();
    }
    if let Some(on_error) = flow.on_error_mut() {
        on_error.layout();
    }
    if let Some(forward) = flow.forward_mut() {
        forward.layout();
    }
    for node in flow.nodes_mut() {
        node.layout();
    }
}

/// Shared surface of flows and proxies.
pub trait FlowInterface {
    fn name(&self) -> &str;
    fn nodes(&self) -> &[Node];
    fn nodes_mut(&mut self) -> &mut [Node];
    fn input(&self) -> Option<&ParameterMap>;
    fn input_mut(&mut self) -> Option<&mut ParameterMap>;
    fn output(&self) -> Option<&ParameterMap>;
    fn output_mut(&mut self) -> Option<&mut ParameterMap>;
    fn on_error(&self) -> Option<&OnError>;
    fn on_error_mut(&mut self) -> Option<&mut OnError>;
    fn forward(&self) -> Option<&Call>;
    fn forward_mut(&mut self) -> Option<&mut Call>;
    /// Identifiers of the nodes declared inside the `before` block.
    fn before(&self) -> &[String];

    fn node(&self, id: &str) -> Option<&Node> {
        self.nodes().iter().find(|node| node.id == id)
    }
}

/// Sequence of calls producing an output message.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Flow {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<ParameterMap>,
    /// Node identifiers every other node waits for.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub before: Vec<String>,
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<ParameterMap>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_error: Option<OnError>,
}

impl FlowInterface for Flow {
    fn name(&self) -> &str {
        &self.name
    }

    fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    fn nodes_mut(&mut self) -> &mut [Node] {
        &mut self.nodes
    }

    fn input(&self) -> Option<&ParameterMap> {
        self.input.as_ref()
    }

    fn input_mut(&mut self) -> Option<&mut ParameterMap> {
        self.input.as_mut()
    }

    fn output(&self) -> Option<&ParameterMap> {
        self.output.as_ref()
    }

    fn output_mut(&mut self) -> Option<&mut ParameterMap> {
        self.output.as_mut()
    }

    fn on_error(&self) -> Option<&OnError> {
        self.on_error.as_ref()
    }

    fn on_error_mut(&mut self) -> Option<&mut OnError> {
        self.on_error.as_mut()
    }

    fn forward(&self) -> Option<&Call> {
        None
    }

    fn forward_mut(&mut self) -> Option<&mut Call> {
        None
    }

    fn before(&self) -> &[String] {
        &self.before
    }
}

/// Streams the incoming request to a service after running its nodes.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Proxy {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<ParameterMap>,
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub forward: Option<Call>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_error: Option<OnError>,
}

impl FlowInterface for Proxy {
    fn name(&self) -> &str {
        &self.name
    }

    fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    fn nodes_mut(&mut self) -> &mut [Node] {
        &mut self.nodes
    }

    fn input(&self) -> Option<&ParameterMap> {
        self.input.as_ref()
    }

    fn input_mut(&mut self) -> Option<&mut ParameterMap> {
        self.input.as_mut()
    }

    fn output(&self) -> Option<&ParameterMap> {
        None
    }

    fn output_mut(&mut self) -> Option<&mut ParameterMap> {
        None
    }

    fn on_error(&self) -> Option<&OnError> {
        self.on_error.as_ref()
    }

    fn on_error_mut(&mut self) -> Option<&mut OnError> {
        self.on_error.as_mut()
    }

    fn forward(&self) -> Option<&Call> {
        self.forward.as_ref()
    }

    fn forward_mut(&mut self) -> Option<&mut Call> {
        self.forward.as_mut()
    }

    fn before(&self) -> &[String] {
        &[]
    }
}

/// Point inside a flow where a call, and optionally its rollback, is performed.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    /// Explicitly declared upstream node identifiers.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<Condition>,
    /// Values computed without calling a service (function results, static resources).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intermediate: Option<ParameterMap>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call: Option<Call>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rollback: Option<Call>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_error: Option<OnError>,
}

impl Node {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    fn layout(&mut self) {
        if let Some(condition) = &mut self.condition {
            condition.params.layout();
        }
        if let Some(intermediate) = &mut self.intermediate {
            intermediate.layout();
        }
        if let Some(call) = &mut self.call {
            call.layout();
        }
        if let Some(rollback) = &mut self.rollback {
            rollback.layout();
        }
        if let Some(on_error) = &mut self.on_error {
            on_error.layout();
        }
    }
}

/// Service method invocation with request and response messages.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Call {
    #[serde(default)]
    pub service: String,
    #[serde(default)]
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request: Option<ParameterMap>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<ParameterMap>,
}

impl Call {
    fn layout(&mut self) {
        if let Some(request) = &mut self.request {
            request.layout();
        }
        if let Some(response) = &mut self.response {
            response.layout();
        }
    }
}

/// Message body, headers, named params and function stack of a call site.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ParameterMap {
    /// Name of the schema message the body is checked against.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub params: IndexMap<String, Property>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub header: Header,
    /// Function return values addressable through the `stack` resource.
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub stack: IndexMap<String, Property>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub property: Option<Property>,
}

impl ParameterMap {
    pub fn with_property(property: Property) -> Self {
        Self {
            property: Some(property),
            ..Self::default()
        }
    }

    pub fn layout(&mut self) {
        for (key, param) in &mut self.params {
            param.name = key.clone();
            param.layout("");
        }
        for (key, header) in &mut self.header {
            header.name = key.clone();
            header.layout("");
            header.path = header_key(&header.path);
        }
        for (key, returns) in &mut self.stack {
            returns.name = key.clone();
            returns.layout("");
        }
        if let Some(property) = &mut self.property {
            property.layout("");
        }
    }
}

/// Error object returned to the caller when a node or flow fails.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct OnError {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<Property>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<Property>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub params: IndexMap<String, Property>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<ParameterMap>,
}

impl OnError {
    fn layout(&mut self) {
        if let Some(status) = &mut self.status {
            status.name = "status".into();
            status.layout("");
        }
        if let Some(message) = &mut self.message {
            message.name = "message".into();
            message.layout("");
        }
        for (key, param) in &mut self.params {
            param.name = key.clone();
            param.layout("");
        }
        if let Some(response) = &mut self.response {
            response.layout();
        }
    }
}

/// Guard expression gating a node; each embedded reference becomes a parameter.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Condition {
    pub expression: String,
    pub params: ParameterMap,
}

impl Condition {
    pub fn new(expression: impl Into<String>) -> Result<Self, SchemaError> {
        let expression = expression.into();
        let mut params = ParameterMap::default();
        for reference in references_in(&expression)? {
            let key = reference.to_string();
            let property = Property::new(key.clone(), Template::default().with_reference(reference));
            params.params.insert(key, property);
        }
        Ok(Self { expression, params })
    }
}

impl TryFrom<String> for Condition {
    type Error = SchemaError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Condition::new(value)
    }
}

impl From<Condition> for String {
    fn from(condition: Condition) -> Self {
        condition.expression
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kind::Type;

    const MANIFEST: &str = r#"
flows:
  - name: checkout
    input:
      property:
        message:
          id: { scalar: { type: string } }
      header:
        Authorization: { scalar: { type: string } }
    nodes:
      - id: user
        condition: "{{ input:id }} != ''"
        call:
          service: users
          method: Get
          request:
            property:
              message:
                id: { reference: "input:id" }
          response:
            property:
              message:
                name: { scalar: { type: string } }
    output:
      property:
        message:
          name: { reference: "user:name" }
"#;

    #[test]
    fn yaml_manifest_loads_with_absolute_paths() {
        let manifest = FlowsManifest::from_yaml_str(MANIFEST).expect("manifest");
        let flow = manifest.get("checkout").expect("flow");
        assert_eq!(flow.nodes().len(), 1);

        let input = flow.input().expect("input");
        assert_eq!(input.header.get("Authorization").map(|header| header.path.as_str()), Some("authorization"));
        let id = input
            .property
            .as_ref()
            .and_then(|property| property.template.as_message())
            .and_then(|message| message.get("id"))
            .expect("id");
        assert_eq!(id.path, "id");
        assert_eq!(id.position, 1);
        assert_eq!(id.template.r#type(), Type::Scalar(crate::kind::ScalarType::String));
    }

    #[test]
    fn condition_collects_embedded_references_as_params() {
        let manifest = FlowsManifest::from_yaml_str(MANIFEST).expect("manifest");
        let node = manifest.flows[0].node("user").expect("node");
        let condition = node.condition.as_ref().expect("condition");
        assert_eq!(condition.params.params.keys().collect::<Vec<_>>(), vec!["input:id"]);
    }

    #[test]
    fn merge_appends_flows_and_proxies() {
        let mut manifest = FlowsManifest::default();
        manifest.merge([
            FlowsManifest {
                flows: vec![Flow {
                    name: "a".into(),
                    ..Flow::default()
                }],
                proxies: vec![],
            },
            FlowsManifest {
                flows: vec![],
                proxies: vec![Proxy {
                    name: "b".into(),
                    ..Proxy::default()
                }],
            },
        ]);
        assert!(manifest.get("a").is_some());
        assert_eq!(manifest.get("b").map(|flow| flow.name()), Some("b"));
    }
}
