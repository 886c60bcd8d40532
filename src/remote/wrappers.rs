//! Wire wrappers: session-scoped middlewares that transform reference
//! leaves between their local and wire forms.

use std::sync::Weak;

use serde_json::Value as JsonValue;

use crate::core::creds::Credentials;
use crate::core::id::SystemId;
use crate::core::interface::Interface;
use crate::core::item::{BadValue, Item};
use crate::core::sparkable::Sparkable;
use crate::core::types::Middleware;
use crate::remote::client::{ClientSession, ClientShared};

/// A system crossing the wire becomes `{node, system, credentials}`;
/// inbound records are materialized as fresh sessions over the same
/// connection.
pub struct SystemWireMiddleware {
    session: Weak<ClientShared>,
}

impl SystemWireMiddleware {
    pub(crate) fn new(session: &ClientSession) -> Self {
        Self {
            session: std::sync::Arc::downgrade(&session.0),
        }
    }

    fn session(&self) -> Result<ClientSession, BadValue> {
        self.session
            .upgrade()
            .map(ClientSession)
            .ok_or_else(|| BadValue::new("session gone".to_string()))
    }
}

impl Middleware for SystemWireMiddleware {
    fn name(&self) -> &'static str {
        "system"
    }

    fn transform(&self, _ext: &JsonValue, val: Item, out: bool) -> Result<Item, BadValue> {
        if out {
            let sys = match val {
                Item::System(sys) => sys,
                Item::Null => return Ok(Item::Null),
                other => return Err(BadValue::new(format!("not a system: {}", other.kind()))),
            };
            let node_name = sys.node().map(|node| node.name()).unwrap_or_default();
            let creds_json = serde_json::to_value(sys.credentials())
                .map_err(|err| BadValue::new(err.to_string()))?;
            let mut record = std::collections::BTreeMap::new();
            record.insert("node".to_string(), Item::Str(node_name));
            record.insert("system".to_string(), Item::Str(sys.id().hex()));
            record.insert("credentials".to_string(), Item::from_json(creds_json));
            Ok(Item::Map(record))
        } else {
            if val.is_null() {
                return Ok(Item::Null);
            }
            let record = val
                .as_map()
                .ok_or_else(|| BadValue::new(format!("not a system record: {}", val.kind())))?;
            let system_hex = record
                .get("system")
                .and_then(|item| item.as_str())
                .ok_or_else(|| BadValue::new("system record without id".to_string()))?;
            let creds = match record.get("credentials") {
                Some(item) => serde_json::from_value(item.to_json()?)
                    .map_err(|err| BadValue::new(err.to_string()))?,
                None => Credentials::default(),
            };

            let session = self.session()?;
            let conn = session
                .conn()
                .ok_or_else(|| BadValue::new("session inactive".to_string()))?;
            let proxy = conn
                .add_client()
                .map_err(|err| BadValue::new(err.to_string()))?;
            proxy
                .connect(SystemId::parse(system_hex), creds)
                .map_err(|err| BadValue::new(err.to_string()))?;
            let handle = proxy
                .handle_system()
                .ok_or_else(|| BadValue::new("proxy without system".to_string()))?;
            Ok(Item::System(handle))
        }
    }
}

fn permissions_for(creds: &Credentials) -> JsonValue {
    serde_json::json!({
        "owner": creds.admin,
        "admin": creds.admin,
        "extend": creds.admin,
        "view": true,
    })
}

/// Compiled interfaces serialize to their interchange form, annotated
/// with the caller's permissions.
pub struct InterfaceWireMiddleware {
    creds: Credentials,
}

impl InterfaceWireMiddleware {
    pub fn new(creds: Credentials) -> Self {
        Self { creds }
    }
}

impl Middleware for InterfaceWireMiddleware {
    fn name(&self) -> &'static str {
        "interface"
    }

    fn transform(&self, _ext: &JsonValue, val: Item, out: bool) -> Result<Item, BadValue> {
        if out {
            let interface = match val {
                Item::Iface(interface) => interface,
                Item::Null => return Ok(Item::Null),
                other => return Err(BadValue::new(format!("not an interface: {}", other.kind()))),
            };
            let mut json = serde_json::to_value(&*interface)
                .map_err(|err| BadValue::new(err.to_string()))?;
            if let Some(obj) = json.as_object_mut() {
                obj.insert("myPermissions".to_string(), permissions_for(&self.creds));
            }
            Ok(Item::from_json(json))
        } else {
            if val.is_null() {
                return Ok(Item::Null);
            }
            let interface: Interface = serde_json::from_value(val.to_json()?)
                .map_err(|err| BadValue::new(err.to_string()))?;
            Ok(Item::Iface(Box::new(interface)))
        }
    }
}

/// Blueprints serialize like interfaces, annotated the same way.
pub struct BlueprintWireMiddleware {
    creds: Credentials,
}

impl BlueprintWireMiddleware {
    pub fn new(creds: Credentials) -> Self {
        Self { creds }
    }
}

impl Middleware for BlueprintWireMiddleware {
    fn name(&self) -> &'static str {
        "blueprint"
    }

    fn transform(&self, _ext: &JsonValue, val: Item, out: bool) -> Result<Item, BadValue> {
        if out {
            let sparkable = match val {
                Item::Blueprint(sparkable) => sparkable,
                Item::Null => return Ok(Item::Null),
                other => return Err(BadValue::new(format!("not a blueprint: {}", other.kind()))),
            };
            let mut json = serde_json::to_value(&*sparkable)
                .map_err(|err| BadValue::new(err.to_string()))?;
            if let Some(obj) = json.as_object_mut() {
                obj.insert("myPermissions".to_string(), permissions_for(&self.creds));
            }
            Ok(Item::from_json(json))
        } else {
            if val.is_null() {
                return Ok(Item::Null);
            }
            let sparkable: Sparkable = serde_json::from_value(val.to_json()?)
                .map_err(|err| BadValue::new(err.to_string()))?;
            Ok(Item::Blueprint(Box::new(sparkable)))
        }
    }
}
