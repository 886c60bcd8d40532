//! Structural value types and the middleware machinery that transforms
//! items at serialization boundaries.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::core::item::{BadValue, Item};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LeafType {
    String,
    Integer,
    Float,
    Boolean,
    Raw,
    Any,
}

/// A named transform applied to hub items at the serialization boundary.
///
/// Whether a middleware acts on a value is decided by the value's type:
/// each type extension whose key equals the middleware name selects it.
pub trait Middleware: Send + Sync {
    fn name(&self) -> &'static str;

    /// Transform a value. `out` is true on the local-to-wire direction.
    fn transform(&self, ext: &JsonValue, val: Item, out: bool) -> Result<Item, BadValue>;
}

/// An ordered middleware chain, applied left-to-right on outbound values
/// and right-to-left on inbound values.
#[derive(Clone, Default)]
pub struct Middlewares {
    entries: Vec<Arc<dyn Middleware>>,
}

impl Middlewares {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, mw: Arc<dyn Middleware>) {
        self.entries.push(mw);
    }

    pub fn extend(&mut self, other: &Middlewares) {
        self.entries.extend(other.entries.iter().cloned());
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in application order for the given direction.
    fn ordered(&self, out: bool) -> Box<dyn Iterator<Item = &Arc<dyn Middleware>> + '_> {
        if out {
            Box::new(self.entries.iter())
        } else {
            Box::new(self.entries.iter().rev())
        }
    }
}

impl fmt::Debug for Middlewares {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.entries.iter().map(|mw| mw.name()))
            .finish()
    }
}

/// Structural type of a hub item.
///
/// Exactly one of `leaf`, `list_of`, `tuple_of`, `map_of` is expected to be
/// set; a type with none of them passes values through untouched. The
/// `extensions` map routes values through middlewares instead of the
/// structural check.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Type {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub leaf: Option<LeafType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub list_of: Option<Box<Type>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tuple_of: Option<Vec<Type>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub map_of: Option<BTreeMap<String, Type>>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub optional: bool,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub extensions: BTreeMap<String, JsonValue>,
}

impl Type {
    pub fn leaf(leaf: LeafType) -> Self {
        Type {
            leaf: Some(leaf),
            ..Type::default()
        }
    }

    pub fn list_of(elem: Type) -> Self {
        Type {
            list_of: Some(Box::new(elem)),
            ..Type::default()
        }
    }

    pub fn map_of(entries: BTreeMap<String, Type>) -> Self {
        Type {
            map_of: Some(entries),
            ..Type::default()
        }
    }

    pub fn with_extension(mut self, name: &str, ext: JsonValue) -> Self {
        self.extensions.insert(name.to_string(), ext);
        self
    }

    /// Route a value through the middleware chain, or conform it to the
    /// declared structure where no middleware claims it.
    pub fn apply_middlewares(
        &self,
        mws: &Middlewares,
        val: Item,
        out: bool,
    ) -> Result<Item, BadValue> {
        let mut val = val;
        let mut transformed = false;
        for (name, ext) in &self.extensions {
            for mw in mws.ordered(out) {
                if mw.name() == name {
                    val = mw.transform(ext, val, out)?;
                    transformed = true;
                }
            }
        }
        if transformed {
            return Ok(val);
        }

        if self.optional && val.is_null() {
            return Ok(Item::Null);
        }

        if let Some(leaf) = self.leaf {
            return conform_leaf(leaf, val);
        }

        if let Some(elem) = &self.list_of {
            let items = match val {
                Item::Null => Vec::new(),
                Item::List(items) => items,
                other => return Err(BadValue::new(format!("not a list: {}", other.kind()))),
            };
            let mut conformed = Vec::with_capacity(items.len());
            for item in items {
                conformed.push(elem.apply_middlewares(mws, item, out)?);
            }
            return Ok(Item::List(conformed));
        }

        if let Some(positions) = &self.tuple_of {
            let items = match val {
                Item::List(items) => items,
                other => return Err(BadValue::new(format!("not a tuple: {}", other.kind()))),
            };
            if items.len() != positions.len() {
                return Err(BadValue::new(format!(
                    "tuple length {} does not match {}",
                    items.len(),
                    positions.len()
                )));
            }
            let mut conformed = Vec::with_capacity(items.len());
            for (item, tp) in items.into_iter().zip(positions) {
                conformed.push(tp.apply_middlewares(mws, item, out)?);
            }
            return Ok(Item::List(conformed));
        }

        if let Some(entries) = &self.map_of {
            let mut map = match val {
                Item::Map(map) => map,
                other => return Err(BadValue::new(format!("not a map: {}", other.kind()))),
            };
            let mut conformed = BTreeMap::new();
            for (key, tp) in entries {
                match map.remove(key) {
                    Some(item) => {
                        conformed.insert(key.clone(), tp.apply_middlewares(mws, item, out)?);
                    }
                    None => {
                        if !tp.optional {
                            return Err(BadValue::new(format!("missing map entry: {}", key)));
                        }
                    }
                }
            }
            return Ok(Item::Map(conformed));
        }

        Ok(val)
    }
}

fn conform_leaf(leaf: LeafType, val: Item) -> Result<Item, BadValue> {
    match leaf {
        LeafType::String => match val {
            Item::Str(s) => Ok(Item::Str(s)),
            other => Err(BadValue::new(format!("not a string: {}", other.kind()))),
        },
        LeafType::Integer => match val {
            Item::Int(i) => Ok(Item::Int(i)),
            Item::Float(f) => Ok(Item::Int(f as i64)),
            other => Err(BadValue::new(format!("not an integer: {}", other.kind()))),
        },
        LeafType::Float => match val {
            Item::Float(f) => Ok(Item::Float(f)),
            Item::Int(i) => Ok(Item::Float(i as f64)),
            other => Err(BadValue::new(format!("not a float: {}", other.kind()))),
        },
        LeafType::Boolean => match val {
            Item::Bool(b) => Ok(Item::Bool(b)),
            other => Err(BadValue::new(format!("not a boolean: {}", other.kind()))),
        },
        LeafType::Raw => match val {
            Item::Raw(bytes) => Ok(Item::Raw(bytes)),
            Item::Str(s) => BASE64
                .decode(s.as_bytes())
                .map(|b| Item::Raw(Bytes::from(b)))
                .map_err(|err| BadValue::new(format!("not raw bytes: {}", err))),
            other => Err(BadValue::new(format!("not raw bytes: {}", other.kind()))),
        },
        LeafType::Any => Ok(val),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_ingress_widens_to_declared_kind() {
        let mws = Middlewares::new();
        let int = Type::leaf(LeafType::Integer);
        let float = Type::leaf(LeafType::Float);

        assert_eq!(
            int.apply_middlewares(&mws, Item::Float(3.0), false).unwrap(),
            Item::Int(3)
        );
        assert_eq!(
            float.apply_middlewares(&mws, Item::Int(3), false).unwrap(),
            Item::Float(3.0)
        );
        assert!(int
            .apply_middlewares(&mws, Item::Str("3".into()), false)
            .is_err());
    }

    #[test]
    fn optional_null_passes() {
        let mws = Middlewares::new();
        let mut tp = Type::leaf(LeafType::String);
        tp.optional = true;
        assert_eq!(
            tp.apply_middlewares(&mws, Item::Null, false).unwrap(),
            Item::Null
        );
    }

    #[test]
    fn raw_leaf_decodes_base64_ingress() {
        let mws = Middlewares::new();
        let tp = Type::leaf(LeafType::Raw);
        let conformed = tp
            .apply_middlewares(&mws, Item::Str("AAEC".into()), false)
            .unwrap();
        assert_eq!(conformed, Item::Raw(Bytes::from_static(b"\x00\x01\x02")));
    }

    #[test]
    fn map_requires_non_optional_entries() {
        let mws = Middlewares::new();
        let mut opt = Type::leaf(LeafType::Integer);
        opt.optional = true;
        let tp = Type::map_of(BTreeMap::from([
            ("must".to_string(), Type::leaf(LeafType::String)),
            ("may".to_string(), opt),
        ]));

        let ok = tp
            .apply_middlewares(
                &mws,
                Item::Map(BTreeMap::from([("must".to_string(), Item::Str("x".into()))])),
                false,
            )
            .unwrap();
        assert_eq!(
            ok,
            Item::Map(BTreeMap::from([("must".to_string(), Item::Str("x".into()))]))
        );

        let missing = tp.apply_middlewares(&mws, Item::Map(BTreeMap::new()), false);
        assert!(missing.is_err());
    }

    #[test]
    fn direction_controls_chain_order() {
        struct Tag(&'static str);
        impl Middleware for Tag {
            fn name(&self) -> &'static str {
                "tag"
            }
            fn transform(&self, _ext: &JsonValue, val: Item, _out: bool) -> Result<Item, BadValue> {
                match val {
                    Item::Str(s) => Ok(Item::Str(format!("{}{}", s, self.0))),
                    other => Ok(other),
                }
            }
        }

        let mut mws = Middlewares::new();
        mws.push(Arc::new(Tag("a")));
        mws.push(Arc::new(Tag("b")));
        let tp = Type::default().with_extension("tag", JsonValue::Null);

        let outbound = tp
            .apply_middlewares(&mws, Item::Str("".into()), true)
            .unwrap();
        assert_eq!(outbound, Item::Str("ab".into()));

        let inbound = tp
            .apply_middlewares(&mws, Item::Str("".into()), false)
            .unwrap();
        assert_eq!(inbound, Item::Str("ba".into()));
    }

    #[test]
    fn serde_uses_camel_case_keys() {
        let tp = Type::list_of(Type::leaf(LeafType::Integer));
        let json = serde_json::to_value(&tp).unwrap();
        assert_eq!(json, serde_json::json!({"listOf": {"leaf": "integer"}}));
    }
}
