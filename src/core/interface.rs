//! Compiled interface descriptions consumed by the runtime.
//!
//! The YAML schema and its resolver live outside this crate; what arrives
//! here is the already-compiled shape of a system: its hubs, their kinds
//! and directions, and the item types they carry.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::item::{BadValue, Item};
use crate::core::types::{Middlewares, Type};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HubKind {
    Pipe,
    Channel,
    Value,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HubDirection {
    None,
    In,
    Out,
    Both,
}

impl HubDirection {
    /// Whether the hub accepts traffic flowing into the system.
    pub fn accepts_in(&self) -> bool {
        matches!(self, HubDirection::In | HubDirection::Both)
    }

    /// Whether the hub produces traffic flowing out of the system.
    pub fn accepts_out(&self) -> bool {
        matches!(self, HubDirection::Out | HubDirection::Both)
    }
}

#[derive(Error, Debug)]
pub enum InterfaceError {
    #[error("already have hub with that name: {0}")]
    DuplicateHub(String),
}

/// One named slot of a hub's input, output or value.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ItemInterface {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default)]
    pub value: Type,
}

impl ItemInterface {
    pub fn new(name: &str, value: Type) -> Self {
        Self {
            name: name.to_string(),
            value,
        }
    }

    pub fn apply_middlewares(
        &self,
        mws: &Middlewares,
        val: Item,
        out: bool,
    ) -> Result<Item, BadValue> {
        self.value.apply_middlewares(mws, val, out)
    }
}

/// The positional item slots of a pipe's input or output.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemsInterface(pub Vec<ItemInterface>);

impl ItemsInterface {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn apply_middlewares(
        &self,
        mws: &Middlewares,
        vals: Vec<Item>,
        out: bool,
    ) -> Result<Vec<Item>, BadValue> {
        if vals.len() != self.0.len() {
            return Err(BadValue::new(format!(
                "expected {} values, got {}",
                self.0.len(),
                vals.len()
            )));
        }
        let mut conformed = Vec::with_capacity(vals.len());
        for (slot, val) in self.0.iter().zip(vals) {
            conformed.push(slot.apply_middlewares(mws, val, out)?);
        }
        Ok(conformed)
    }
}

/// One interaction point of an interface.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HubInterface {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: HubKind,
    pub direction: HubDirection,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default, skip_serializing_if = "ItemsInterface::is_empty")]
    pub input: ItemsInterface,
    #[serde(default, skip_serializing_if = "ItemsInterface::is_empty")]
    pub output: ItemsInterface,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<ItemInterface>,
}

impl HubInterface {
    pub fn pipe(name: &str, direction: HubDirection) -> Self {
        Self {
            name: name.to_string(),
            kind: HubKind::Pipe,
            direction,
            description: String::new(),
            input: ItemsInterface::default(),
            output: ItemsInterface::default(),
            value: None,
        }
    }

    pub fn channel(name: &str, direction: HubDirection, value: Type) -> Self {
        Self {
            name: name.to_string(),
            kind: HubKind::Channel,
            direction,
            description: String::new(),
            input: ItemsInterface::default(),
            output: ItemsInterface::default(),
            value: Some(ItemInterface::new("", value)),
        }
    }

    pub fn value(name: &str, direction: HubDirection, value: Type) -> Self {
        Self {
            name: name.to_string(),
            kind: HubKind::Value,
            direction,
            description: String::new(),
            input: ItemsInterface::default(),
            output: ItemsInterface::default(),
            value: Some(ItemInterface::new("", value)),
        }
    }

    pub fn with_input(mut self, slots: Vec<ItemInterface>) -> Self {
        self.input = ItemsInterface(slots);
        self
    }

    pub fn with_output(mut self, slots: Vec<ItemInterface>) -> Self {
        self.output = ItemsInterface(slots);
        self
    }
}

/// Structural contract of a system: the set of its hubs.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Interface {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extends: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hubs: Vec<HubInterface>,
}

impl Interface {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Self::default()
        }
    }

    pub fn add_hub(&mut self, hub: HubInterface) -> Result<(), InterfaceError> {
        if self.get_hub(&hub.name).is_some() {
            return Err(InterfaceError::DuplicateHub(hub.name));
        }
        self.hubs.push(hub);
        Ok(())
    }

    pub fn get_hub(&self, name: &str) -> Option<&HubInterface> {
        self.hubs.iter().find(|hub| hub.name == name)
    }

    /// Wrap this interface into an implementation-free blueprint.
    pub fn blank(&self) -> crate::core::sparkable::Sparkable {
        crate::core::sparkable::Sparkable {
            name: format!("Blank{}", self.name),
            interface: Some(self.clone()),
            ..crate::core::sparkable::Sparkable::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::LeafType;

    #[test]
    fn duplicate_hub_names_rejected() {
        let mut interface = Interface::new("Test");
        interface
            .add_hub(HubInterface::pipe("run", HubDirection::In))
            .unwrap();
        let dup = interface.add_hub(HubInterface::pipe("run", HubDirection::In));
        assert!(dup.is_err());
    }

    #[test]
    fn structural_equality_survives_serde() {
        let mut interface = Interface::new("Test");
        interface
            .add_hub(
                HubInterface::pipe("echo", HubDirection::In)
                    .with_input(vec![ItemInterface::new("val", Type::leaf(LeafType::String))])
                    .with_output(vec![ItemInterface::new("val", Type::leaf(LeafType::String))]),
            )
            .unwrap();
        interface
            .add_hub(HubInterface::channel(
                "tick",
                HubDirection::Out,
                Type::leaf(LeafType::Integer),
            ))
            .unwrap();

        let json = serde_json::to_string(&interface).unwrap();
        let back: Interface = serde_json::from_str(&json).unwrap();
        assert_eq!(back, interface);
    }

    #[test]
    fn hub_kind_serializes_as_type_field() {
        let hub = HubInterface::value("state", HubDirection::Both, Type::leaf(LeafType::Any));
        let json = serde_json::to_value(&hub).unwrap();
        assert_eq!(json["type"], "value");
        assert_eq!(json["direction"], "both");
    }
}
