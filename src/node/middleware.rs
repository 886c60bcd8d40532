//! Default node middlewares: id and credential transforms, plus the
//! persistence-scoped system transform.

use std::sync::{Arc, Weak};

use serde_json::Value as JsonValue;

use crate::core::creds::Credentials;
use crate::core::id::{Id, ObjectId, SystemId};
use crate::core::item::{BadValue, Item};
use crate::core::types::{Middleware, Middlewares};
use crate::node::node::{Node, NodeShared};

/// Id/SystemId/ObjectId ⇔ hex string, selected by `extensions["id"].type`.
pub struct IdMiddleware;

impl Middleware for IdMiddleware {
    fn name(&self) -> &'static str {
        "id"
    }

    fn transform(&self, ext: &JsonValue, val: Item, out: bool) -> Result<Item, BadValue> {
        let id_kind = ext.get("type").and_then(|v| v.as_str());
        if out {
            match (id_kind, &val) {
                (None, Item::FullId(id)) => Ok(Item::Str(id.hex())),
                (Some("system"), Item::SysId(id)) => Ok(Item::Str(id.hex())),
                (Some("object"), Item::ObjId(id)) => Ok(Item::Str(id.hex())),
                _ => Err(BadValue::new(format!("not an id: {}", val.kind()))),
            }
        } else {
            let s = match &val {
                Item::Str(s) => s,
                other => return Err(BadValue::new(format!("not an id: {}", other.kind()))),
            };
            match id_kind {
                None => Ok(Item::FullId(Id::parse(s))),
                Some("system") => Ok(Item::SysId(SystemId::parse(s))),
                Some("object") => Ok(Item::ObjId(ObjectId::parse(s))),
                Some(other) => Err(BadValue::new(format!("unknown id kind: {}", other))),
            }
        }
    }
}

/// Opaque JSON round-trip for credentials.
pub struct CredentialsMiddleware;

impl Middleware for CredentialsMiddleware {
    fn name(&self) -> &'static str {
        "credentials"
    }

    fn transform(&self, _ext: &JsonValue, val: Item, out: bool) -> Result<Item, BadValue> {
        if out {
            match val {
                Item::Credentials(creds) => {
                    let json = serde_json::to_value(&*creds)
                        .map_err(|err| BadValue::new(err.to_string()))?;
                    Ok(Item::from_json(json))
                }
                Item::Null => Ok(Item::Null),
                other => Err(BadValue::new(format!("not credentials: {}", other.kind()))),
            }
        } else {
            if val.is_null() {
                return Ok(Item::Null);
            }
            let json = val.to_json()?;
            let creds: Credentials =
                serde_json::from_value(json).map_err(|err| BadValue::new(err.to_string()))?;
            Ok(Item::Credentials(Box::new(creds)))
        }
    }
}

/// System ⇔ local system id, used on the persistence boundary where a
/// stored value refers to a system of the same node.
pub struct NodeSystemMiddleware {
    node: Weak<NodeShared>,
}

impl NodeSystemMiddleware {
    pub fn new(node: &Node) -> Self {
        Self {
            node: node.downgrade(),
        }
    }
}

impl Middleware for NodeSystemMiddleware {
    fn name(&self) -> &'static str {
        "system"
    }

    fn transform(&self, _ext: &JsonValue, val: Item, out: bool) -> Result<Item, BadValue> {
        if out {
            match val {
                Item::System(sys) => Ok(Item::Str(sys.id().hex())),
                Item::Null => Ok(Item::Null),
                other => Err(BadValue::new(format!("not a system: {}", other.kind()))),
            }
        } else {
            let s = match &val {
                Item::Str(s) => s.clone(),
                Item::Null => return Ok(Item::Null),
                other => return Err(BadValue::new(format!("not a system: {}", other.kind()))),
            };
            let node = self
                .node
                .upgrade()
                .map(Node::from_shared)
                .ok_or_else(|| BadValue::new("node gone".to_string()))?;
            let sys = node
                .get_system_by_id(&Credentials::default(), SystemId::parse(&s))
                .map_err(|err| BadValue::new(err.to_string()))?;
            Ok(Item::System(sys))
        }
    }
}

/// The default node chain: ids and credentials.
pub fn default_middlewares() -> Middlewares {
    let mut mws = Middlewares::new();
    mws.push(Arc::new(IdMiddleware));
    mws.push(Arc::new(CredentialsMiddleware));
    mws
}
