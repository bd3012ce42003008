//! Node dependency graph and execution ordering.

use std::collections::{HashMap, HashSet, VecDeque};

use indexmap::IndexMap;
use serde::Serialize;
use switchyard_types::path::{ERROR_RESOURCE, INPUT_RESOURCE, OUTPUT_RESOURCE, STACK_RESOURCE};
use switchyard_types::{FlowInterface, Node, ParameterMap, Property, PropertyReference, Template, TemplateKind};

use crate::error::ReferenceError;
use crate::lookup::parse_resource;

/// Upstream node ids of every node in a flow, plus a topological execution order for the scheduler.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DependencyGraph {
    flow: String,
    edges: IndexMap<String, Vec<String>>,
    order: Vec<String>,
}

impl DependencyGraph {
    /// Build the graph of `flow`.
    ///
    /// A node depends on the nodes it declares in `depends_on`, on the nodes of the `before` block (before nodes
    /// depend on earlier before nodes only), and on every node whose resources it references from its condition,
    /// call or error object. Self references are dropped. Rollback bodies are excluded since they run after their
    /// downstream nodes.
    ///
    /// Returns an error for duplicate node identifiers, unknown dependencies, or cycles.
    pub fn build(flow: &dyn FlowInterface) -> Result<Self, ReferenceError> {
        let mut lookup: IndexMap<&str, &Node> = IndexMap::new();
        for node in flow.nodes() {
            if lookup.insert(node.id.as_str(), node).is_some() {
                return Err(ReferenceError::DuplicateNode {
                    flow: flow.name().to_string(),
                    node: node.id.clone(),
                });
            }
        }

        let before = flow.before();
        let mut edges: IndexMap<String, Vec<String>> = IndexMap::with_capacity(lookup.len());
        for (node_id, node) in &lookup {
            let mut dependencies: Vec<String> = node.depends_on.clone();
            match before.iter().position(|id| id.as_str() == *node_id) {
                Some(index) => dependencies.extend(before[..index].iter().cloned()),
                None => dependencies.extend(before.iter().cloned()),
            }
            dependencies.extend(referenced_nodes(node));

            let mut seen = HashSet::new();
            let mut resolved = Vec::with_capacity(dependencies.len());
            for dependency in dependencies {
                if dependency == *node_id || !seen.insert(dependency.clone()) {
                    continue;
                }
                if !lookup.contains_key(dependency.as_str()) {
                    return Err(ReferenceError::UnknownDependency {
                        flow: flow.name().to_string(),
                        node: node_id.to_string(),
                        dependency,
                    });
                }
                resolved.push(dependency);
            }
            edges.insert(node_id.to_string(), resolved);
        }

        let order = execution_order(flow.name(), &edges)?;
        Ok(Self {
            flow: flow.name().to_string(),
            edges,
            order,
        })
    }

    pub fn flow(&self) -> &str {
        &self.flow
    }

    /// Upstream node ids of `node`, empty for unknown nodes.
    pub fn dependencies(&self, node: &str) -> &[String] {
        self.edges.get(node).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn edges(&self) -> &IndexMap<String, Vec<String>> {
        &self.edges
    }

    /// Node ids ordered so every node follows its dependencies. Ready nodes are taken in declaration order.
    pub fn execution_order(&self) -> &[String] {
        &self.order
    }
}

fn execution_order(flow: &str, edges: &IndexMap<String, Vec<String>>) -> Result<Vec<String>, ReferenceError> {
    let mut in_degrees: HashMap<&str, usize> = edges.iter().map(|(node, dependencies)| (node.as_str(), dependencies.len())).collect();
    let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();
    for (node, dependencies) in edges {
        for dependency in dependencies {
            adjacency.entry(dependency.as_str()).or_default().push(node.as_str());
        }
    }

    let mut queue: VecDeque<&str> = edges
        .keys()
        .map(String::as_str)
        .filter(|node| in_degrees.get(node).copied().unwrap_or(0) == 0)
        .collect();

    let mut ordered = Vec::with_capacity(edges.len());
    while let Some(node) = queue.pop_front() {
        ordered.push(node.to_string());
        for child in adjacency.get(node).into_iter().flatten() {
            if let Some(degree) = in_degrees.get_mut(child) {
                *degree -= 1;
                if *degree == 0 {
                    queue.push_back(*child);
                }
            }
        }
    }

    if ordered.len() != edges.len() {
        let mut involved: Vec<String> = in_degrees
            .into_iter()
            .filter(|(_, degree)| *degree > 0)
            .map(|(node, _)| node.to_string())
            .collect();
        involved.sort();
        return Err(ReferenceError::CircularDependency {
            flow: flow.to_string(),
            involved,
        });
    }
    Ok(ordered)
}

/// Node ids referenced from the condition, call and error object of `node`.
fn referenced_nodes(node: &Node) -> Vec<String> {
    let mut references = Vec::new();
    if let Some(condition) = &node.condition {
        parameter_references(&condition.params, &mut references);
    }
    if let Some(intermediate) = &node.intermediate {
        parameter_references(intermediate, &mut references);
    }
    if let Some(call) = &node.call {
        for parameters in [call.request.as_ref(), call.response.as_ref()].into_iter().flatten() {
            parameter_references(parameters, &mut references);
        }
    }
    if let Some(response) = node.on_error.as_ref().and_then(|on_error| on_error.response.as_ref()) {
        parameter_references(response, &mut references);
    }

    references
        .into_iter()
        .filter_map(|reference| {
            let (target, _) = parse_resource(&reference.resource);
            let internal = target.is_empty() || [INPUT_RESOURCE, STACK_RESOURCE, ERROR_RESOURCE, OUTPUT_RESOURCE].contains(&target);
            (!internal).then(|| target.to_string())
        })
        .collect()
}

fn parameter_references<'a>(parameters: &'a ParameterMap, references: &mut Vec<&'a PropertyReference>) {
    for property in parameters.params.values().chain(parameters.header.values()).chain(parameters.stack.values()) {
        property_references(property, references);
    }
    if let Some(property) = &parameters.property {
        property_references(property, references);
    }
}

fn property_references<'a>(property: &'a Property, references: &mut Vec<&'a PropertyReference>) {
    template_references(&property.template, references);
}

fn template_references<'a>(template: &'a Template, references: &mut Vec<&'a PropertyReference>) {
    if let Some(reference) = &template.reference {
        references.push(reference);
    }
    match &template.kind {
        TemplateKind::Message(fields) | TemplateKind::OneOf(fields) => {
            for field in fields.values() {
                property_references(field, references);
            }
        }
        TemplateKind::Repeated(repeated) => {
            for element in &repeated.elements {
                template_references(element, references);
            }
        }
        TemplateKind::Scalar(_) | TemplateKind::Enum(_) | TemplateKind::Unknown => {}
    }
}
