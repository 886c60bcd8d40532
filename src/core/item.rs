//! The closed dynamic value model carried by hubs.
//!
//! Plain leaves and containers map one-to-one onto JSON. Reference leaves
//! (systems, interfaces, blueprints, credentials, ids) exist only on the
//! local side of a hub; the middleware chain must have replaced them with
//! plain values before a frame is encoded, so serializing one is an error.

use std::collections::BTreeMap;
use std::fmt;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use bytes::Bytes;
use serde_json::Value as JsonValue;
use thiserror::Error;

use crate::core::creds::Credentials;
use crate::core::id::{Id, ObjectId, SystemId};
use crate::core::interface::Interface;
use crate::core::sparkable::Sparkable;
use crate::node::system::System;

/// A value transformation or type conformance failure.
#[derive(Error, Debug, Clone)]
#[error("bad value: {0}")]
pub struct BadValue(pub String);

impl BadValue {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

#[derive(Clone)]
pub enum Item {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Raw(Bytes),
    List(Vec<Item>),
    Map(BTreeMap<String, Item>),

    // Reference leaves, replaced by middlewares at the wire boundary.
    System(System),
    Iface(Box<Interface>),
    Blueprint(Box<Sparkable>),
    Credentials(Box<Credentials>),
    FullId(Id),
    SysId(SystemId),
    ObjId(ObjectId),
}

impl Item {
    pub fn kind(&self) -> &'static str {
        match self {
            Item::Null => "null",
            Item::Bool(_) => "boolean",
            Item::Int(_) => "integer",
            Item::Float(_) => "float",
            Item::Str(_) => "string",
            Item::Raw(_) => "raw",
            Item::List(_) => "list",
            Item::Map(_) => "map",
            Item::System(_) => "system",
            Item::Iface(_) => "interface",
            Item::Blueprint(_) => "blueprint",
            Item::Credentials(_) => "credentials",
            Item::FullId(_) => "id",
            Item::SysId(_) => "system id",
            Item::ObjId(_) => "object id",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Item::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Item::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Item::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Item::Float(f) => Some(*f),
            Item::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Item::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Item]> {
        match self {
            Item::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, Item>> {
        match self {
            Item::Map(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_system(&self) -> Option<&System> {
        match self {
            Item::System(sys) => Some(sys),
            _ => None,
        }
    }

    /// Convert a JSON value into an item. Numbers land on Int when they
    /// are integral, Float otherwise; base64 decoding of raw leaves is the
    /// type conformance step's concern.
    pub fn from_json(value: JsonValue) -> Item {
        match value {
            JsonValue::Null => Item::Null,
            JsonValue::Bool(b) => Item::Bool(b),
            JsonValue::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Item::Int(i)
                } else {
                    Item::Float(n.as_f64().unwrap_or(0.0))
                }
            }
            JsonValue::String(s) => Item::Str(s),
            JsonValue::Array(items) => Item::List(items.into_iter().map(Item::from_json).collect()),
            JsonValue::Object(map) => Item::Map(
                map.into_iter()
                    .map(|(k, v)| (k, Item::from_json(v)))
                    .collect(),
            ),
        }
    }

    /// Convert to a JSON value. Fails on untransformed reference leaves.
    pub fn to_json(&self) -> Result<JsonValue, BadValue> {
        match self {
            Item::Null => Ok(JsonValue::Null),
            Item::Bool(b) => Ok(JsonValue::Bool(*b)),
            Item::Int(i) => Ok(JsonValue::from(*i)),
            Item::Float(f) => Ok(JsonValue::from(*f)),
            Item::Str(s) => Ok(JsonValue::String(s.clone())),
            Item::Raw(bytes) => Ok(JsonValue::String(BASE64.encode(bytes))),
            Item::List(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    out.push(item.to_json()?);
                }
                Ok(JsonValue::Array(out))
            }
            Item::Map(map) => {
                let mut out = serde_json::Map::with_capacity(map.len());
                for (k, v) in map {
                    out.insert(k.clone(), v.to_json()?);
                }
                Ok(JsonValue::Object(out))
            }
            other => Err(BadValue::new(format!(
                "untransformed {} reference cannot cross the wire",
                other.kind()
            ))),
        }
    }
}

impl fmt::Debug for Item {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Item::Null => write!(f, "Null"),
            Item::Bool(b) => write!(f, "Bool({})", b),
            Item::Int(i) => write!(f, "Int({})", i),
            Item::Float(v) => write!(f, "Float({})", v),
            Item::Str(s) => write!(f, "Str({:?})", s),
            Item::Raw(b) => write!(f, "Raw({} bytes)", b.len()),
            Item::List(items) => f.debug_tuple("List").field(items).finish(),
            Item::Map(map) => f.debug_tuple("Map").field(map).finish(),
            Item::System(sys) => write!(f, "System({})", sys.id()),
            Item::Iface(i) => write!(f, "Iface({})", i.name),
            Item::Blueprint(b) => write!(f, "Blueprint({})", b.name),
            Item::Credentials(_) => write!(f, "Credentials(..)"),
            Item::FullId(id) => write!(f, "FullId({})", id),
            Item::SysId(id) => write!(f, "SysId({})", id),
            Item::ObjId(id) => write!(f, "ObjId({})", id),
        }
    }
}

impl PartialEq for Item {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Item::Null, Item::Null) => true,
            (Item::Bool(a), Item::Bool(b)) => a == b,
            (Item::Int(a), Item::Int(b)) => a == b,
            (Item::Float(a), Item::Float(b)) => a == b,
            (Item::Str(a), Item::Str(b)) => a == b,
            (Item::Raw(a), Item::Raw(b)) => a == b,
            (Item::List(a), Item::List(b)) => a == b,
            (Item::Map(a), Item::Map(b)) => a == b,
            (Item::System(a), Item::System(b)) => a.id() == b.id(),
            (Item::Iface(a), Item::Iface(b)) => a == b,
            (Item::FullId(a), Item::FullId(b)) => a == b,
            (Item::SysId(a), Item::SysId(b)) => a == b,
            (Item::ObjId(a), Item::ObjId(b)) => a == b,
            _ => false,
        }
    }
}

impl serde::Serialize for Item {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let json = self.to_json().map_err(serde::ser::Error::custom)?;
        json.serialize(serializer)
    }
}

impl<'de> serde::Deserialize<'de> for Item {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = JsonValue::deserialize(deserializer)?;
        Ok(Item::from_json(value))
    }
}

impl From<&str> for Item {
    fn from(s: &str) -> Self {
        Item::Str(s.to_string())
    }
}

impl From<String> for Item {
    fn from(s: String) -> Self {
        Item::Str(s)
    }
}

impl From<i64> for Item {
    fn from(i: i64) -> Self {
        Item::Int(i)
    }
}

impl From<f64> for Item {
    fn from(f: f64) -> Self {
        Item::Float(f)
    }
}

impl From<bool> for Item {
    fn from(b: bool) -> Self {
        Item::Bool(b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_round_trip_plain() {
        let item = Item::Map(BTreeMap::from([
            ("n".to_string(), Item::Int(3)),
            ("f".to_string(), Item::Float(1.5)),
            ("s".to_string(), Item::Str("x".into())),
            ("l".to_string(), Item::List(vec![Item::Bool(true), Item::Null])),
        ]));
        let json = item.to_json().unwrap();
        assert_eq!(Item::from_json(json), item);
    }

    #[test]
    fn raw_encodes_as_base64() {
        let item = Item::Raw(Bytes::from_static(b"\x00\x01\x02"));
        let json = item.to_json().unwrap();
        assert_eq!(json, JsonValue::String("AAEC".to_string()));
    }

    #[test]
    fn integral_numbers_become_int() {
        assert_eq!(Item::from_json(serde_json::json!(7)), Item::Int(7));
        assert_eq!(Item::from_json(serde_json::json!(7.25)), Item::Float(7.25));
    }

    #[test]
    fn reference_leaves_refuse_serialization() {
        let item = Item::SysId(SystemId::generate());
        assert!(item.to_json().is_err());
        assert!(serde_json::to_string(&item).is_err());
    }
}
