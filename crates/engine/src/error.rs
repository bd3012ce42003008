use switchyard_types::SchemaError;
use thiserror::Error;

/// Failures raised while resolving references or building the dependency graph.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ReferenceError {
    #[error("undefined resource '{reference}' in '{flow}.{breakpoint}'")]
    UndefinedResource { flow: String, breakpoint: String, reference: String },

    #[error("undefined reference '{reference}' in '{flow}.{breakpoint}.{path}'")]
    UndefinedReference {
        flow: String,
        breakpoint: String,
        path: String,
        reference: String,
    },

    #[error("unresolved qualifier '{qualifier}' of resource '{resource}' in '{flow}.{breakpoint}'")]
    UnresolvedQualifier {
        flow: String,
        breakpoint: String,
        resource: String,
        qualifier: String,
    },

    #[error("node '{node}' in '{flow}' depends on unknown node '{dependency}'")]
    UnknownDependency { flow: String, node: String, dependency: String },

    #[error("circular dependency detected in '{flow}': {}", .involved.join(" <-> "))]
    CircularDependency { flow: String, involved: Vec<String> },

    #[error("duplicate node identifier '{node}' in '{flow}'")]
    DuplicateNode { flow: String, node: String },

    #[error(transparent)]
    Schema(#[from] SchemaError),
}
