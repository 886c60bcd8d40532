//! Blueprints: an interface paired with per-factory implementation data.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::core::interface::{Interface, ItemsInterface};

/// A blueprint a system can be created from. The implementation map keys
/// are factory names; each entry is opaque data that factory decodes.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Sparkable {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub domain: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interface: Option<Interface>,
    #[serde(default, skip_serializing_if = "ItemsInterface::is_empty")]
    pub constructor: ItemsInterface,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub implementation: BTreeMap<String, Vec<JsonValue>>,
}

impl Sparkable {
    /// Fully-qualified name, used in a system's extends list.
    pub fn full_name(&self) -> String {
        if self.domain.is_empty() {
            format!("{}$", self.name)
        } else {
            format!("{}.{}$", self.domain, self.name)
        }
    }

    pub fn add_implementation(&mut self, factory: &str, raw: JsonValue) {
        self.implementation
            .entry(factory.to_string())
            .or_default()
            .push(raw);
    }
}
