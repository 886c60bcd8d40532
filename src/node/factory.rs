//! Factory traits: plugins that supply implementations for systems
//! described by a sparkable.

use serde_json::Value as JsonValue;

use crate::node::node::Node;
use crate::node::system::System;
use crate::node::NodeError;

/// Implementation data of one factory for one system.
pub trait Implementation: Send + Sync {
    /// Apply this implementation to a freshly defined system.
    fn implement(&self, node: &Node, sys: &System) -> Result<(), NodeError>;

    /// Interchange form for persistence; None when there is nothing to
    /// store.
    fn to_value(&self) -> Option<JsonValue>;
}

/// A plugin that decodes and applies implementation entries of its name.
pub trait Factory: Send + Sync {
    fn name(&self) -> &'static str;

    fn implementation(&self, raw: Option<&JsonValue>) -> Result<Box<dyn Implementation>, NodeError>;
}

/// Factory-supplied runtime state attached to a system, exposing its
/// implementation back to persistence.
pub trait FactoryExtension: Send + Sync {
    fn implementation(&self) -> Option<Box<dyn Implementation>>;
}
