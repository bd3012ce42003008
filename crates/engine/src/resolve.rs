//! Reference resolution with type back-propagation.
//!
//! Every property carrying a `resource:path` reference is looked up against the resources visible at its
//! breakpoint. On success the property takes over the label and type of its target, its nested fields are bound to
//! the target's store keys, and the reference keeps a copy of the target.
//!
//! Nodes are resolved in declaration order against a snapshot of the flow taken before each node, so later nodes
//! observe the already resolved types of earlier ones.

use std::collections::HashMap;

use indexmap::IndexMap;
use switchyard_types::path::{HEADER_RESOURCE, OUTPUT_RESOURCE, header_key, join_path};
use switchyard_types::{
    Call, FlowInterface, FlowsManifest, Node, OnError, ParameterMap, Property, PropertyReference, Template, TemplateKind,
};
use tracing::{Span, debug, info, info_span};

use crate::dependencies::DependencyGraph;
use crate::error::ReferenceError;
use crate::forwarding::forward_references;
use crate::lookup::{next_resource, parse_resource, resolve_self_reference, store_resource, variable_header};
use crate::resources::{ResourceLookup, available_resources};

/// Resolves the references of flows and proxies in place.
///
/// ## Usage
///
/// ```
/// use switchyard_engine::Resolver;
/// use switchyard_types::FlowsManifest;
///
/// let mut manifest = FlowsManifest::from_yaml_str(r#"
/// flows:
///   - name: echo
///     input:
///       property:
///         message:
///           message: { scalar: { type: string } }
///     output:
///       property:
///         message:
///           message: { reference: "input:message" }
/// "#)?;
///
/// let graphs = Resolver::default().resolve_manifest(&mut manifest)?;
/// assert!(graphs["echo"].execution_order().is_empty());
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
#[derive(Debug, Clone)]
pub struct Resolver {
    span: Span,
}

impl Default for Resolver {
    fn default() -> Self {
        Self::new(info_span!("references"))
    }
}

/// State of one resolution pass at a single breakpoint.
struct Scope<'a> {
    flow: &'a dyn FlowInterface,
    breakpoint: String,
    /// Undeclared upstream response headers referenced during this pass, as `(node, header)`.
    headers: Vec<(String, String)>,
    /// References currently being resolved, used to detect reference cycles.
    visiting: Vec<String>,
}

impl<'a> Scope<'a> {
    fn new(flow: &'a dyn FlowInterface, breakpoint: impl Into<String>) -> Self {
        Self {
            flow,
            breakpoint: breakpoint.into(),
            headers: Vec::new(),
            visiting: Vec::new(),
        }
    }
}

impl Resolver {
    /// Resolver logging inside the given span.
    pub fn new(span: Span) -> Self {
        Self { span }
    }

    /// Resolve every flow and proxy, returning their dependency graphs keyed by name.
    pub fn resolve_manifest(&self, manifest: &mut FlowsManifest) -> Result<IndexMap<String, DependencyGraph>, ReferenceError> {
        let _entered = self.span.enter();
        info!(flows = manifest.flows.len(), proxies = manifest.proxies.len(), "defining manifest types");

        let mut graphs = IndexMap::new();
        for flow in &mut manifest.flows {
            let graph = self.resolve_flow(flow)?;
            graphs.insert(flow.name.clone(), graph);
        }
        for proxy in &mut manifest.proxies {
            let graph = self.resolve_flow(proxy)?;
            graphs.insert(proxy.name.clone(), graph);
        }
        Ok(graphs)
    }

    /// Resolve every reference inside `flow`, build its dependency graph, then forward references to the store keys
    /// that actually hold their values.
    pub fn resolve_flow<F>(&self, flow: &mut F) -> Result<DependencyGraph, ReferenceError>
    where
        F: FlowInterface + Clone,
    {
        let span = info_span!(parent: &self.span, "flow", flow = %flow.name());
        let _entered = span.enter();
        info!("defining flow types");

        if flow.on_error().is_some() {
            let snapshot = flow.clone();
            let mut scope = Scope::new(&snapshot, OUTPUT_RESOURCE);
            if let Some(on_error) = flow.on_error_mut() {
                self.resolve_on_error(&mut scope, on_error)?;
            }
            insert_variable_headers(flow, scope.headers);
        }

        for index in 0..flow.nodes().len() {
            let snapshot = flow.clone();
            let headers = self.resolve_node(&snapshot, &mut flow.nodes_mut()[index])?;
            insert_variable_headers(flow, headers);
        }

        if flow.output().is_some() {
            let snapshot = flow.clone();
            let mut scope = Scope::new(&snapshot, OUTPUT_RESOURCE);
            if let Some(output) = flow.output_mut() {
                self.resolve_parameter_map(&mut scope, output)?;
            }
            insert_variable_headers(flow, scope.headers);
        }

        if flow.forward().and_then(|forward| forward.request.as_ref()).is_some() {
            let snapshot = flow.clone();
            let mut scope = Scope::new(&snapshot, OUTPUT_RESOURCE);
            if let Some(request) = flow.forward_mut().and_then(|forward| forward.request.as_mut()) {
                for header in request.header.values_mut() {
                    self.resolve_property(&mut scope, header)?;
                }
            }
            insert_variable_headers(flow, scope.headers);
        }

        let graph = DependencyGraph::build(&*flow)?;
        forward_references(flow);
        debug!(order = ?graph.execution_order(), "resolved flow dependencies");
        Ok(graph)
    }

    fn resolve_node(&self, snapshot: &dyn FlowInterface, node: &mut Node) -> Result<Vec<(String, String)>, ReferenceError> {
        let mut scope = Scope::new(snapshot, node.id.clone());

        if let Some(condition) = &mut node.condition {
            self.resolve_parameter_map(&mut scope, &mut condition.params)?;
        }
        if let Some(call) = &mut node.call {
            self.resolve_call(&mut scope, call)?;
        }
        if let Some(rollback) = &mut node.rollback {
            // Rollbacks run in reverse order, so the rollback body may read the node executed after this one.
            let mut rollback_scope = Scope::new(snapshot, next_resource(snapshot, &node.id));
            if let Some(request) = &mut rollback.request {
                if let Some(property) = &mut request.property {
                    self.resolve_property(&mut rollback_scope, property)?;
                }
                for header in request.header.values_mut() {
                    self.resolve_property(&mut scope, header)?;
                }
                self.resolve_params(&mut scope, &mut request.params)?;
            }
            if let Some(response) = &mut rollback.response {
                self.resolve_parameter_map(&mut scope, response)?;
            }
            scope.headers.append(&mut rollback_scope.headers);
        }
        if let Some(on_error) = &mut node.on_error {
            self.resolve_on_error(&mut scope, on_error)?;
        }

        Ok(scope.headers)
    }

    fn resolve_call(&self, scope: &mut Scope<'_>, call: &mut Call) -> Result<(), ReferenceError> {
        if let Some(request) = &mut call.request {
            self.resolve_parameter_map(scope, request)?;
        }
        if let Some(response) = &mut call.response {
            self.resolve_parameter_map(scope, response)?;
        }
        Ok(())
    }

    fn resolve_parameter_map(&self, scope: &mut Scope<'_>, parameters: &mut ParameterMap) -> Result<(), ReferenceError> {
        for header in parameters.header.values_mut() {
            self.resolve_property(scope, header)?;
        }
        self.resolve_params(scope, &mut parameters.params)?;
        if let Some(property) = &mut parameters.property {
            self.resolve_property(scope, property)?;
        }
        Ok(())
    }

    fn resolve_params(&self, scope: &mut Scope<'_>, params: &mut IndexMap<String, Property>) -> Result<(), ReferenceError> {
        for param in params.values_mut() {
            if param.template.reference.is_some() {
                self.resolve_property(scope, param)?;
            }
        }
        Ok(())
    }

    fn resolve_on_error(&self, scope: &mut Scope<'_>, on_error: &mut OnError) -> Result<(), ReferenceError> {
        if let Some(response) = &mut on_error.response {
            self.resolve_parameter_map(scope, response)?;
        }
        if let Some(message) = &mut on_error.message {
            self.resolve_property(scope, message)?;
        }
        if let Some(status) = &mut on_error.status {
            self.resolve_property(scope, status)?;
        }
        self.resolve_params(scope, &mut on_error.params)
    }

    fn resolve_property(&self, scope: &mut Scope<'_>, property: &mut Property) -> Result<(), ReferenceError> {
        self.resolve_nested(scope, &mut property.template, &property.path)?;

        let Some(reference) = property.template.reference.clone() else {
            return Ok(());
        };
        if reference.is_resolved() {
            return Ok(());
        }

        let (key, target) = self.lookup_reference(scope, &reference, &property.path)?;
        debug!(
            reference = %reference,
            name = %property.name,
            path = %property.path,
            target = %target.path,
            "references lookup result"
        );
        back_propagate(property, key, target);
        Ok(())
    }

    fn resolve_nested(&self, scope: &mut Scope<'_>, template: &mut Template, path: &str) -> Result<(), ReferenceError> {
        match &mut template.kind {
            TemplateKind::Message(fields) | TemplateKind::OneOf(fields) => {
                for field in fields.values_mut() {
                    self.resolve_property(scope, field)?;
                }
            }
            TemplateKind::Repeated(repeated) => {
                for element in &mut repeated.elements {
                    if element.reference.is_some() {
                        let mut wrapper = Property::new("", std::mem::take(element)).with_path(path);
                        let result = self.resolve_property(scope, &mut wrapper);
                        *element = wrapper.template;
                        result?;
                    } else {
                        self.resolve_nested(scope, element, path)?;
                    }
                }
            }
            TemplateKind::Scalar(_) | TemplateKind::Enum(_) | TemplateKind::Unknown => {}
        }
        Ok(())
    }

    /// Look `reference` up at the scope's breakpoint and return the store-key form of the reference with the
    /// resolved target.
    fn lookup_reference(
        &self,
        scope: &mut Scope<'_>,
        reference: &PropertyReference,
        path: &str,
    ) -> Result<(PropertyReference, Property), ReferenceError> {
        let resource = resolve_self_reference(&reference.resource, &scope.breakpoint);
        debug!(reference = %reference, breakpoint = %scope.breakpoint, "lookup references until breakpoint");

        let (target, qualifier) = parse_resource(&resource);
        let target = if target.is_empty() { scope.breakpoint.clone() } else { target.to_string() };
        let qualifier = qualifier.to_string();

        let available = available_resources(scope.flow, &scope.breakpoint);
        let Some(references) = available.resource(&target) else {
            return Err(ReferenceError::UndefinedResource {
                flow: scope.flow.name().to_string(),
                breakpoint: scope.breakpoint.clone(),
                reference: reference.to_string(),
            });
        };
        let Some(lookup) = references.get(&qualifier) else {
            return Err(ReferenceError::UnresolvedQualifier {
                flow: scope.flow.name().to_string(),
                breakpoint: scope.breakpoint.clone(),
                resource: target,
                qualifier,
            });
        };

        let found = match lookup {
            ResourceLookup::Params { params, breakpoint } => {
                let params = *params;
                let breakpoint = breakpoint.clone();
                self.lookup_param(scope, params, &breakpoint, &reference.path)?
            }
            ResourceLookup::VariableHeader { node, .. } => {
                scope.headers.push((node.clone(), reference.path.clone()));
                lookup.lookup(&reference.path)
            }
            other => other.lookup(&reference.path),
        };
        let Some(mut resolved) = found else {
            return Err(ReferenceError::UndefinedReference {
                flow: scope.flow.name().to_string(),
                breakpoint: scope.breakpoint.clone(),
                path: path.to_string(),
                reference: reference.to_string(),
            });
        };

        let qualified = join_path([target.as_str(), qualifier.as_str()]);
        if resolved.template.reference.as_ref().is_some_and(|inner| !inner.is_resolved()) {
            let marker = format!("{qualified}:{}", reference.path);
            if scope.visiting.contains(&marker) {
                let mut involved = scope.visiting.clone();
                involved.push(marker);
                return Err(ReferenceError::CircularDependency {
                    flow: scope.flow.name().to_string(),
                    involved,
                });
            }
            scope.visiting.push(marker);
            let result = self.resolve_property(scope, &mut resolved);
            scope.visiting.pop();
            result?;
        }

        let path = if qualifier == HEADER_RESOURCE {
            header_key(&reference.path)
        } else {
            reference.path.clone()
        };
        let key = PropertyReference::new(store_resource(&qualified), path);
        Ok((key, resolved))
    }

    /// Params carrying a reference are resolved transitively at the breakpoint they were declared for.
    fn lookup_param(
        &self,
        scope: &mut Scope<'_>,
        params: &IndexMap<String, Property>,
        breakpoint: &str,
        path: &str,
    ) -> Result<Option<Property>, ReferenceError> {
        let Some(param) = params.get(path) else {
            return Ok(None);
        };
        let mut param = param.clone();
        if param.template.reference.is_none() {
            return Ok(Some(param));
        }

        let previous = std::mem::replace(&mut scope.breakpoint, breakpoint.to_string());
        let result = self.resolve_property(scope, &mut param);
        scope.breakpoint = previous;
        result?;
        Ok(Some(param))
    }
}

/// Copy label and type of the resolved target onto the referencing property.
///
/// Declared messages and arrays keep their authored structure; everything else takes the target's kind (and so its
/// default and enum) and binds nested fields to the target's store keys.
fn back_propagate(property: &mut Property, key: PropertyReference, target: Property) {
    property.label = target.label;

    let keeps_structure = matches!(
        (&property.template.kind, &target.template.kind),
        (TemplateKind::Message(_), TemplateKind::Message(_))
            | (TemplateKind::OneOf(_), TemplateKind::OneOf(_))
            | (TemplateKind::Repeated(_), TemplateKind::Repeated(_))
    );
    if !keeps_structure {
        property.template.kind = target.template.clone_visited(&mut HashMap::new()).kind;
        if property.template.identifier.is_none() {
            property.template.identifier = target.template.identifier.clone();
        }
        property.template.bind_reference(&key);
    }

    let mut reference = key;
    reference.property = Some(Box::new(target));
    property.template.reference = Some(reference);
}

/// Declare referenced upstream response headers on the nodes that will receive them.
fn insert_variable_headers<F: FlowInterface + ?Sized>(flow: &mut F, headers: Vec<(String, String)>) {
    for (node_id, name) in headers {
        let Some(node) = flow.nodes_mut().iter_mut().find(|node| node.id == node_id) else {
            continue;
        };
        let header = match (&mut node.call, &mut node.intermediate) {
            (Some(call), _) => &mut call.response.get_or_insert_with(ParameterMap::default).header,
            (None, Some(intermediate)) => &mut intermediate.header,
            (None, None) => continue,
        };
        if !header.keys().any(|key| key.eq_ignore_ascii_case(&name)) {
            header.insert(name.clone(), variable_header(&name));
        }
    }
}
