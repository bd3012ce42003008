//! # Switchyard Types
//!
//! Shared model for the switchyard runtime core: the recursive schema/value [`Template`], the [`Property`] wrapper
//! and its symbolic [`PropertyReference`], runtime scalar [`Value`]s, path helpers, and the flow graph that reference
//! resolution walks.
//!
//! The model is built once per flow at resolve time and is read-only while flows execute.
//!
//! ## Usage
//!
//! ```rust
//! use switchyard_types::{Message, Property, ScalarType, Template};
//!
//! let message = Message::new().with(Property::new("message", Template::scalar(ScalarType::String)).with_position(1));
//! let expected = Template::message(message.clone());
//! assert!(Template::message(message).compare(&expected).is_ok());
//! ```

pub mod error;
pub mod expression;
pub mod flow;
pub mod kind;
pub mod path;
pub mod property;
pub mod template;
pub mod value;

pub use error::{Mismatch, SchemaError, ValueError};
pub use flow::{Call, Condition, Flow, FlowInterface, FlowsManifest, Header, Node, OnError, ParameterMap, Proxy};
pub use kind::{Label, ScalarType, Type};
pub use property::{Options, Property, PropertyReference};
pub use template::{Enum, EnumValue, Identifier, Message, OneOf, Repeated, Scalar, Template, TemplateKind};
pub use value::Value;
