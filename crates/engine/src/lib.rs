//! # Switchyard Engine
//!
//! Compile-time reference resolution for flows and proxies.
//!
//! ## Key Features
//!
//! - **Breakpoint visibility**: a reference may only address resources produced before the point where it is used
//! - **Type back-propagation**: un-annotated properties take the type of the property they reference
//! - **Reference forwarding**: chains of references collapse onto the store key that holds the value
//! - **Dependency graph**: per-node upstream edges and a topological order for the external scheduler
//!
//! ## Usage
//!
//! ```rust
//! use switchyard_engine::Resolver;
//! use switchyard_types::FlowsManifest;
//!
//! let mut manifest = FlowsManifest::from_yaml_str(r#"
//! flows:
//!   - name: greet
//!     input:
//!       property:
//!         message:
//!           name: { scalar: { type: string } }
//!     nodes:
//!       - id: hello
//!         call:
//!           request:
//!             property:
//!               message:
//!                 name: { reference: "input:name" }
//!           response:
//!             property:
//!               message:
//!                 greeting: { scalar: { type: string } }
//!     output:
//!       property:
//!         message:
//!           greeting: { reference: "hello:greeting" }
//! "#)?;
//!
//! let graphs = Resolver::default().resolve_manifest(&mut manifest)?;
//! assert_eq!(graphs["greet"].execution_order(), ["hello"]);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Architecture
//!
//! - **`lookup`**: resource naming rules and property path lookups
//! - **`resources`**: the resources visible at a breakpoint
//! - **`resolve`**: the [`Resolver`] walking flows in declaration order
//! - **`forwarding`**: re-scoping of reference chains
//! - **`dependencies`**: the [`DependencyGraph`]

pub mod dependencies;
pub mod error;
pub mod forwarding;
pub mod lookup;
pub mod resolve;
pub mod resources;

pub use dependencies::DependencyGraph;
pub use error::ReferenceError;
pub use lookup::{next_resource, parse_resource, store_resource};
pub use resolve::Resolver;
pub use resources::{AvailableResources, ResourceLookup, available_resources};
