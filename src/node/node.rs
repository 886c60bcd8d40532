//! The node: registry of systems and factories, middleware aggregation
//! and root persistence.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, Weak};
use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::Value as JsonValue;

use crate::core::creds::Credentials;
use crate::core::id::{random_token, SystemId};
use crate::core::interface::{HubKind, Interface};
use crate::core::item::Item;
use crate::core::sparkable::Sparkable;
use crate::core::status::Status;
use crate::core::types::Middlewares;
use crate::node::factory::Factory;
use crate::node::middleware::{IdMiddleware, NodeSystemMiddleware};
use crate::node::system::{
    NativeSystem, System, SystemOrigin, LIFECYCLE_CREATE, LIFECYCLE_DELETE, LIFECYCLE_LOAD,
    LIFECYCLE_LOG, LIFECYCLE_NAME, LIFECYCLE_STATUS, LIFECYCLE_STORE,
};
use crate::node::NodeError;
use crate::store::Store;

pub(crate) struct NodeShared {
    name: Mutex<String>,
    description: String,
    created: SystemTime,
    addresses: Mutex<BTreeMap<String, String>>,
    root: Mutex<Option<NativeSystem>>,
    systems: Mutex<BTreeMap<SystemId, NativeSystem>>,
    factories: Mutex<BTreeMap<String, Arc<dyn Factory>>>,
    middlewares: Mutex<Middlewares>,
}

/// A process-local registry of systems and factories. Cheap to clone; all
/// state is shared.
#[derive(Clone)]
pub struct Node(Arc<NodeShared>);

impl Default for Node {
    fn default() -> Self {
        Self::new()
    }
}

impl Node {
    pub fn new() -> Node {
        let name = random_token(8);
        let description = format!("Node {}", name);
        Node(Arc::new(NodeShared {
            name: Mutex::new(name),
            description,
            created: SystemTime::now(),
            addresses: Mutex::new(BTreeMap::new()),
            root: Mutex::new(None),
            systems: Mutex::new(BTreeMap::new()),
            factories: Mutex::new(BTreeMap::new()),
            middlewares: Mutex::new(Middlewares::new()),
        }))
    }

    pub(crate) fn from_shared(shared: Arc<NodeShared>) -> Node {
        Node(shared)
    }

    pub(crate) fn downgrade(&self) -> Weak<NodeShared> {
        Arc::downgrade(&self.0)
    }

    pub fn name(&self) -> String {
        self.0.name.lock().expect("node lock poisoned").clone()
    }

    pub fn description(&self) -> &str {
        &self.0.description
    }

    pub fn created(&self) -> SystemTime {
        self.0.created
    }

    pub fn set_address(&self, network: &str, address: &str) {
        let mut addresses = self.0.addresses.lock().expect("node lock poisoned");
        addresses.insert(network.to_string(), address.to_string());
    }

    pub fn addresses(&self) -> BTreeMap<String, String> {
        self.0.addresses.lock().expect("node lock poisoned").clone()
    }

    pub fn add_middlewares(&self, mws: &Middlewares) {
        self.0
            .middlewares
            .lock()
            .expect("node lock poisoned")
            .extend(mws);
    }

    pub fn middlewares(&self) -> Middlewares {
        self.0.middlewares.lock().expect("node lock poisoned").clone()
    }

    pub fn add_factory(&self, factory: Arc<dyn Factory>) -> Result<(), NodeError> {
        let mut factories = self.0.factories.lock().expect("node lock poisoned");
        let name = factory.name().to_string();
        if factories.contains_key(&name) {
            return Err(NodeError::Misconfigured(format!(
                "factory already set: {}",
                name
            )));
        }
        factories.insert(name, factory);
        Ok(())
    }

    pub fn get_factory(&self, name: &str) -> Result<Arc<dyn Factory>, NodeError> {
        let factories = self.0.factories.lock().expect("node lock poisoned");
        factories
            .get(name)
            .cloned()
            .ok_or_else(|| NodeError::Misconfigured(format!("factory not found: {}", name)))
    }

    /// Create a new blank system and attach it to this node.
    pub fn blank_system(&self, name: &str) -> Result<NativeSystem, NodeError> {
        let sys = self.detached_system(name)?;
        let mut systems = self.0.systems.lock().expect("node lock poisoned");
        systems.insert(sys.id(), sys.clone());
        Ok(sys)
    }

    /// Create a system bound to this node without registering it. Origin
    /// mirrors are built from these so they do not show up alongside the
    /// node's real systems.
    pub fn detached_system(&self, name: &str) -> Result<NativeSystem, NodeError> {
        let sys = NativeSystem::blank(SystemId::generate(), name);
        sys.set_node(self.downgrade());
        self.init_system(&sys);
        Ok(sys)
    }

    /// Default lifecycle callbacks: meta events update the corresponding
    /// fields, delete removes the system from the registry.
    fn init_system(&self, sys: &NativeSystem) {
        let target = sys.clone();
        sys.add_callback(
            LIFECYCLE_NAME,
            Arc::new(move |args| {
                if let Some(Item::Str(name)) = args.first() {
                    target.apply_name(name);
                }
                Ok(())
            }),
        );

        let target = sys.clone();
        sys.add_callback(
            LIFECYCLE_STATUS,
            Arc::new(move |args| {
                if let Some(Item::Int(bits)) = args.first() {
                    target.apply_status(Status::from_bits(*bits as u32));
                }
                Ok(())
            }),
        );

        let target = sys.clone();
        sys.add_callback(
            LIFECYCLE_LOG,
            Arc::new(move |args| {
                if let (Some(Item::Int(time)), Some(Item::Int(level)), Some(Item::Str(message))) =
                    (args.first(), args.get(1), args.get(2))
                {
                    target.append_log(crate::node::system::LogMessage {
                        level: *level,
                        time: *time,
                        message: message.clone(),
                    });
                }
                Ok(())
            }),
        );

        let node = self.downgrade();
        let id = sys.id();
        sys.add_callback(
            LIFECYCLE_DELETE,
            Arc::new(move |_args| {
                if let Some(node) = node.upgrade() {
                    node.systems.lock().expect("node lock poisoned").remove(&id);
                }
                Ok(())
            }),
        );
    }

    /// Instantiate the hubs of a compiled interface on the system.
    pub fn define_system(&self, sys: &NativeSystem, interface: &Interface) -> Result<(), NodeError> {
        sys.define(interface)
    }

    /// Define the system from the sparkable's interface and run each
    /// factory implementation it names.
    pub fn implement_system(&self, sys: &NativeSystem, sparkable: &Sparkable) -> Result<(), NodeError> {
        if let Some(interface) = &sparkable.interface {
            sys.define(interface)?;
        }
        sys.set_sparkable(sparkable.clone());
        if !sparkable.name.is_empty() {
            sys.add_extends(sparkable.full_name());
        }

        sys.status_update(Status::IMPLEMENTING, Status::empty());
        let handle = sys.wrap(Credentials::default(), self.middlewares());
        for (factory_name, entries) in &sparkable.implementation {
            let factory = self.get_factory(factory_name)?;
            for raw in entries {
                let implementation = factory.implementation(Some(raw))?;
                if let Err(err) = implementation.implement(self, &handle) {
                    sys.status_update(Status::empty(), Status::IMPLEMENTING);
                    return Err(err);
                }
            }
        }
        sys.status_update(Status::IMPLEMENTED, Status::IMPLEMENTING);
        Ok(())
    }

    /// Create and implement a system without triggering its lifecycle.
    pub fn prepare_system(&self, creds: &Credentials, sparkable: &Sparkable) -> Result<System, NodeError> {
        let name = if sparkable.name.is_empty() {
            String::new()
        } else {
            let id = SystemId::generate();
            format!("{} {}", sparkable.name, &id.hex()[..4])
        };
        let sys = self.blank_system(&name)?;
        if let Err(err) = self.implement_system(&sys, sparkable) {
            // Unwind the partially-built state.
            self.0
                .systems
                .lock()
                .expect("node lock poisoned")
                .remove(&sys.id());
            return Err(err);
        }
        Ok(sys.wrap(creds.clone(), self.middlewares()))
    }

    /// Create a system and run its create/load event chain in the
    /// background.
    pub fn new_system(
        &self,
        creds: &Credentials,
        sparkable: &Sparkable,
        payload: Vec<Item>,
    ) -> Result<System, NodeError> {
        let sys = self.prepare_system(creds, sparkable)?;
        let native = sys.native().clone();
        std::thread::spawn(move || {
            if let Err(err) = native.emit_event(LIFECYCLE_CREATE, &payload) {
                tracing::warn!(target: "node", system = %native.id(), "create failed: {err}");
            }
            if let Err(err) = native.emit_event(LIFECYCLE_LOAD, &[]) {
                tracing::warn!(target: "node", system = %native.id(), "load failed: {err}");
            }
        });
        Ok(sys)
    }

    /// Attach an existing system to this node.
    pub fn add_system(&self, sys: &NativeSystem) -> Result<(), NodeError> {
        let mut systems = self.0.systems.lock().expect("node lock poisoned");
        if systems.contains_key(&sys.id()) {
            return Err(NodeError::Misconfigured(format!(
                "already have a system with id {}",
                sys.id()
            )));
        }
        systems.insert(sys.id(), sys.clone());
        Ok(())
    }

    /// Set the root system of the node.
    pub fn set_system(&self, sys: &NativeSystem) {
        *self.0.root.lock().expect("node lock poisoned") = Some(sys.clone());
    }

    pub fn system(&self, creds: &Credentials) -> Option<System> {
        let root = self.0.root.lock().expect("node lock poisoned");
        root.as_ref()
            .map(|sys| sys.wrap(creds.clone(), self.middlewares()))
    }

    pub fn systems(&self, creds: &Credentials) -> Vec<System> {
        let systems = self.0.systems.lock().expect("node lock poisoned");
        systems
            .values()
            .map(|sys| sys.wrap(creds.clone(), self.middlewares()))
            .collect()
    }

    /// Resolve a system; the null id denotes the root system.
    pub fn get_system_by_id(&self, creds: &Credentials, id: SystemId) -> Result<System, NodeError> {
        if id.is_null() {
            return self
                .system(creds)
                .ok_or_else(|| NodeError::NotFound("have no root system".to_string()));
        }
        let systems = self.0.systems.lock().expect("node lock poisoned");
        systems
            .get(&id)
            .map(|sys| sys.wrap(creds.clone(), self.middlewares()))
            .ok_or_else(|| NodeError::NotFound(format!("system not found: {}", id.hex())))
    }

    pub fn get_system_by_name(&self, creds: &Credentials, name: &str) -> Result<System, NodeError> {
        if name.is_empty() {
            return self
                .system(creds)
                .ok_or_else(|| NodeError::NotFound("have no root system".to_string()));
        }
        let systems = self.0.systems.lock().expect("node lock poisoned");
        systems
            .values()
            .find(|sys| sys.name() == name)
            .map(|sys| sys.wrap(creds.clone(), self.middlewares()))
            .ok_or_else(|| NodeError::NotFound(format!("system not found: {}", name)))
    }

    pub fn native_system(&self, id: SystemId) -> Option<NativeSystem> {
        let systems = self.0.systems.lock().expect("node lock poisoned");
        systems.get(&id).cloned()
    }

    /// The chain used when values cross the persistence boundary.
    fn persist_middlewares(&self) -> Middlewares {
        let mut mws = Middlewares::new();
        mws.push(Arc::new(NodeSystemMiddleware::new(self)));
        mws.push(Arc::new(IdMiddleware));
        mws
    }

    // Persistence

    /// Store the node state: properties, addresses and every system.
    pub fn store_into(&self, st: &Store) -> Result<(), NodeError> {
        let systems: Vec<NativeSystem> = {
            let systems = self.0.systems.lock().expect("node lock poisoned");
            systems.values().cloned().collect()
        };
        for sys in &systems {
            // Transient snapshot opportunity for factories.
            let _ = sys.emit_event(LIFECYCLE_STORE, &[]);
            let child = Store::new(&sys.id().hex());
            self.store_system(sys, &child)?;
            st.child_put("systems", child)?;
        }

        st.kv_set("node", "name", &self.name())?;
        let created = self
            .0
            .created
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        st.kv_set("node", "created", &created.to_string())?;
        if let Some(root) = self.0.root.lock().expect("node lock poisoned").as_ref() {
            st.kv_set("node", "system", &root.id().hex())?;
        }

        for (network, addr) in self.addresses() {
            st.kv_set("addresses", &network, &addr)?;
        }
        Ok(())
    }

    fn store_system(&self, sys: &NativeSystem, st: &Store) -> Result<(), NodeError> {
        st.kv_set("system", "id", &sys.id().hex())?;
        st.kv_set("system", "name", &sys.name())?;
        st.kv_set("system", "status", &sys.status().bits().to_string())?;
        st.kv_set("system", "extends", &sys.extends().join(","))?;
        st.kv_set("system", "remoteNode", &sys.remote_node())?;
        st.kv_set("system", "remoteID", &sys.remote_id().hex())?;

        let sparkable = sys.sparkable();
        let sparkable_json = serde_json::to_string(&sparkable)
            .map_err(|err| NodeError::Failed(err.to_string()))?;
        st.kv_set("system", "sparkable", &sparkable_json)?;

        let origins = serde_json::to_string(&sys.origin_tree())
            .map_err(|err| NodeError::Failed(err.to_string()))?;
        st.kv_set("system", "origins", &origins)?;

        let persist = self.persist_middlewares();
        for hub in sys.hubs() {
            if hub.interface().kind != HubKind::Value {
                continue;
            }
            let val = match hub.get() {
                Ok(val) => val,
                Err(err) => {
                    tracing::warn!(target: "node", hub = hub.name(), "value read failed: {err}");
                    continue;
                }
            };
            if val.is_null() {
                continue;
            }
            let slot = match hub.interface().value.as_ref() {
                Some(slot) => slot.clone(),
                None => continue,
            };
            match slot.apply_middlewares(&persist, val, true) {
                Ok(wire) => match wire.to_json() {
                    Ok(json) => {
                        st.kv_set("hubs", hub.name(), &json.to_string())?;
                    }
                    Err(err) => {
                        tracing::warn!(target: "node", hub = hub.name(), "value store failed: {err}");
                    }
                },
                Err(err) => {
                    tracing::warn!(target: "node", hub = hub.name(), "value store failed: {err}");
                }
            }
        }

        for child in sys.systems() {
            st.kv_set("children", &child.id().hex(), &child.name())?;
        }
        Ok(())
    }

    /// Load a saved node state. Systems are re-created in two phases so
    /// cross-references resolve: first identity, then compiled state.
    pub fn load_from(&self, st: &Store) -> Result<(), NodeError> {
        let children = st.children("systems");

        // Phase 1: identity.
        let mut loaded = Vec::new();
        for child in &children {
            let sys = self.load_system_init(child)?;
            loaded.push((sys, child.clone()));
        }

        if let Some(name) = st.kv_get("node", "name") {
            if !name.is_empty() {
                *self.0.name.lock().expect("node lock poisoned") = name;
            }
        }
        if let Some(root_id) = st.kv_get("node", "system") {
            if let Some(root) = self.native_system(SystemId::parse(&root_id)) {
                self.set_system(&root);
            }
        }
        for network in st.kv_keys("addresses") {
            if let Some(addr) = st.kv_get("addresses", &network) {
                self.set_address(&network, &addr);
            }
        }

        // Phase 2: compiled state.
        for (sys, child) in &loaded {
            self.load_system_state(sys, child)?;
        }

        for (sys, _) in &loaded {
            if let Err(err) = sys.emit_event(LIFECYCLE_LOAD, &[]) {
                tracing::warn!(target: "node", system = %sys.id(), "load event failed: {err}");
            }
        }
        Ok(())
    }

    fn load_system_init(&self, st: &Store) -> Result<NativeSystem, NodeError> {
        let id = st
            .kv_get("system", "id")
            .ok_or_else(|| NodeError::NotFound("system id".to_string()))?;
        let name = st.kv_get("system", "name").unwrap_or_default();

        let sys = NativeSystem::blank(SystemId::parse(&id), &name);
        sys.set_node(self.downgrade());
        self.init_system(&sys);

        if let Some(status) = st.kv_get("system", "status") {
            if let Ok(bits) = status.parse::<u32>() {
                sys.apply_status(Status::from_bits(bits));
            }
        }
        if let Some(extends) = st.kv_get("system", "extends") {
            sys.set_extends(
                extends
                    .split(',')
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect(),
            );
        }
        if let Some(remote_node) = st.kv_get("system", "remoteNode") {
            sys.set_remote_node(&remote_node);
        }
        if let Some(remote_id) = st.kv_get("system", "remoteID") {
            sys.set_remote_id(SystemId::parse(&remote_id));
        }

        let mut systems = self.0.systems.lock().expect("node lock poisoned");
        systems.insert(sys.id(), sys.clone());
        drop(systems);
        Ok(sys)
    }

    fn load_system_state(&self, sys: &NativeSystem, st: &Store) -> Result<(), NodeError> {
        if let Some(sparkable_json) = st.kv_get("system", "sparkable") {
            let sparkable: Sparkable = serde_json::from_str(&sparkable_json)
                .map_err(|err| NodeError::Failed(err.to_string()))?;
            self.implement_system(sys, &sparkable)?;
        }

        let persist = self.persist_middlewares();
        for hub_name in st.kv_keys("hubs") {
            let hub = match sys.get_hub(&hub_name) {
                Some(hub) => hub,
                None => continue,
            };
            if hub.interface().kind != HubKind::Value {
                continue;
            }
            let raw = match st.kv_get("hubs", &hub_name) {
                Some(raw) => raw,
                None => continue,
            };
            let json: JsonValue = serde_json::from_str(&raw)
                .map_err(|err| NodeError::Failed(err.to_string()))?;
            let slot = match hub.interface().value.as_ref() {
                Some(slot) => slot.clone(),
                None => continue,
            };
            match slot.apply_middlewares(&persist, Item::from_json(json), false) {
                Ok(val) => {
                    let _ = hub.set(&Credentials::default(), &self.middlewares(), "", val);
                }
                Err(err) => {
                    tracing::warn!(target: "node", hub = %hub_name, "value restore failed: {err}");
                }
            }
        }

        for child_id in st.kv_keys("children") {
            if let Some(child) = self.native_system(SystemId::parse(&child_id)) {
                let _ = sys.add_system(child);
            }
        }

        if let Some(origins_json) = st.kv_get("system", "origins") {
            if let Ok(tree) = serde_json::from_str::<SystemOrigin>(&origins_json) {
                self.rebuild_origins(sys, &tree)?;
            }
        }
        Ok(())
    }

    fn rebuild_origins(&self, sys: &NativeSystem, tree: &SystemOrigin) -> Result<(), NodeError> {
        for (name, child_tree) in &tree.origin {
            let origin = match sys.origin(name) {
                Some(origin) => origin,
                None => {
                    let origin = self.blank_system(&child_tree.name)?;
                    sys.add_origin(name, origin.clone());
                    origin
                }
            };
            origin.set_remote_id(child_tree.id);
            origin.set_remote_node(&child_tree.node);
            origin.apply_name(&child_tree.name);
            origin.apply_status(Status::from_bits(child_tree.status as u32));
            self.rebuild_origins(&origin, child_tree)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::interface::{HubDirection, HubInterface};
    use crate::core::types::{LeafType, Type};
    use crate::node::middleware::default_middlewares;
    use std::time::{Duration, Instant};

    fn test_node() -> Node {
        let node = Node::new();
        node.add_middlewares(&default_middlewares());
        node
    }

    fn clock_sparkable() -> Sparkable {
        let mut interface = Interface::new("Clock");
        interface
            .add_hub(HubInterface::value(
                "state",
                HubDirection::Both,
                Type::leaf(LeafType::String),
            ))
            .unwrap();
        interface.blank()
    }

    #[test]
    fn new_system_runs_create_and_load() {
        let node = test_node();
        let sys = node
            .new_system(&Credentials::default(), &clock_sparkable(), vec![])
            .unwrap();

        let deadline = Instant::now() + Duration::from_secs(2);
        loop {
            let status = sys.status();
            if status.contains(Status::CREATED) && status.contains(Status::LOADED) {
                break;
            }
            assert!(Instant::now() < deadline, "lifecycle chain did not run");
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn unknown_factory_is_misconfigured_and_unwinds() {
        let node = test_node();
        let mut sparkable = clock_sparkable();
        sparkable.add_implementation("nope", serde_json::json!({}));
        let err = node
            .prepare_system(&Credentials::default(), &sparkable)
            .unwrap_err();
        assert!(matches!(err, NodeError::Misconfigured(_)));
        assert!(node.systems(&Credentials::default()).is_empty());
    }

    #[test]
    fn null_id_resolves_root() {
        let node = test_node();
        let creds = Credentials::default();
        assert!(node.get_system_by_id(&creds, SystemId::default()).is_err());

        let sys = node.prepare_system(&creds, &clock_sparkable()).unwrap();
        node.set_system(sys.native());
        let root = node.get_system_by_id(&creds, SystemId::default()).unwrap();
        assert_eq!(root.id(), sys.id());
    }

    #[test]
    fn delete_event_removes_from_registry() {
        let node = test_node();
        let creds = Credentials::default();
        let sys = node.prepare_system(&creds, &clock_sparkable()).unwrap();
        assert_eq!(node.systems(&creds).len(), 1);
        sys.emit_event(crate::node::system::LIFECYCLE_DELETE, &[])
            .unwrap();
        assert!(node.systems(&creds).is_empty());
        assert!(sys.status().contains(Status::DELETED));
    }

    #[test]
    fn store_and_load_round_trip() {
        let node = test_node();
        let creds = Credentials::default();
        let sys = node.prepare_system(&creds, &clock_sparkable()).unwrap();
        sys.get_hub("state")
            .unwrap()
            .set("", Item::Str("persisted".into()))
            .unwrap();
        node.set_system(sys.native());

        let st = Store::new("test");
        node.store_into(&st).unwrap();

        let restored = test_node();
        restored.load_from(&st).unwrap();

        assert_eq!(restored.name(), node.name());
        let loaded = restored.get_system_by_id(&creds, sys.id()).unwrap();
        assert_eq!(
            loaded.get_hub("state").unwrap().get().unwrap(),
            Item::Str("persisted".into())
        );
        assert!(loaded.status().contains(Status::LOADED));
    }
}
