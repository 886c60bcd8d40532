//! The system runtime: identity, hubs, lifecycle events, origin topology,
//! extensions and persistence of one system.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, Weak};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::core::creds::Credentials;
use crate::core::id::SystemId;
use crate::core::interface::{HubInterface, HubKind, Interface};
use crate::core::item::Item;
use crate::core::sparkable::Sparkable;
use crate::core::status::{self, Post, Status};
use crate::core::types::Middlewares;
use crate::node::factory::FactoryExtension;
use crate::node::hub::{Hub, HubHandle};
use crate::node::NodeError;

pub const LIFECYCLE_CREATE: &str = "create";
pub const LIFECYCLE_LOAD: &str = "load";
pub const LIFECYCLE_STORE: &str = "store";
pub const LIFECYCLE_START: &str = "start";
pub const LIFECYCLE_STOP: &str = "stop";
pub const LIFECYCLE_DELETE: &str = "delete";
pub const LIFECYCLE_NAME: &str = "name";
pub const LIFECYCLE_STATUS: &str = "status";
pub const LIFECYCLE_LOG: &str = "log";

pub type EventFn = Arc<dyn Fn(&[Item]) -> Result<(), NodeError> + Send + Sync>;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LogMessage {
    pub level: i64,
    pub time: i64,
    pub message: String,
}

/// Identity and lifecycle state of an upstream system, replicated along a
/// session's origin tree.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SystemOrigin {
    pub id: SystemId,
    #[serde(default)]
    pub node: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub status: i64,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub origin: BTreeMap<String, SystemOrigin>,
}

pub(crate) struct SystemShared {
    pub(crate) node: Mutex<Weak<crate::node::node::NodeShared>>,
    id: SystemId,
    name: Mutex<String>,
    status: Mutex<Status>,
    sparkable: Mutex<Sparkable>,
    created: SystemTime,
    hubs: Mutex<Vec<Hub>>,
    systems: Mutex<BTreeMap<SystemId, Option<NativeSystem>>>,
    origins: Mutex<Vec<(String, NativeSystem)>>,
    parents: Mutex<Vec<Weak<SystemShared>>>,
    events: Mutex<BTreeMap<String, Vec<EventFn>>>,
    logs: Mutex<BTreeMap<i64, LogMessage>>,
    extends: Mutex<Vec<String>>,
    extensions: Mutex<Vec<(String, Arc<dyn FactoryExtension>)>>,
    remote_id: Mutex<SystemId>,
    remote_node: Mutex<String>,
}

impl SystemShared {
    pub(crate) fn label(&self) -> String {
        let name = self.name.lock().expect("system lock poisoned");
        format!("{} ({})", self.id.hex(), name)
    }
}

/// A system owned by a node. Cheap to clone; all state is shared.
#[derive(Clone)]
pub struct NativeSystem(pub(crate) Arc<SystemShared>);

impl NativeSystem {
    pub(crate) fn blank(id: SystemId, name: &str) -> NativeSystem {
        NativeSystem(Arc::new(SystemShared {
            node: Mutex::new(Weak::new()),
            id,
            name: Mutex::new(name.to_string()),
            status: Mutex::new(Status::empty()),
            sparkable: Mutex::new(Sparkable::default()),
            created: SystemTime::now(),
            hubs: Mutex::new(Vec::new()),
            systems: Mutex::new(BTreeMap::new()),
            origins: Mutex::new(Vec::new()),
            parents: Mutex::new(Vec::new()),
            events: Mutex::new(BTreeMap::new()),
            logs: Mutex::new(BTreeMap::new()),
            extends: Mutex::new(Vec::new()),
            extensions: Mutex::new(Vec::new()),
            remote_id: Mutex::new(SystemId::default()),
            remote_node: Mutex::new(String::new()),
        }))
    }

    pub fn id(&self) -> SystemId {
        self.0.id
    }

    pub fn name(&self) -> String {
        self.0.name.lock().expect("system lock poisoned").clone()
    }

    pub fn status(&self) -> Status {
        *self.0.status.lock().expect("system lock poisoned")
    }

    pub fn created(&self) -> SystemTime {
        self.0.created
    }

    pub fn same(&self, other: &NativeSystem) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub fn node(&self) -> Option<crate::node::node::Node> {
        self.0
            .node
            .lock()
            .expect("system lock poisoned")
            .upgrade()
            .map(crate::node::node::Node::from_shared)
    }

    pub(crate) fn set_node(&self, node: Weak<crate::node::node::NodeShared>) {
        *self.0.node.lock().expect("system lock poisoned") = node;
    }

    /// Change the name through the lifecycle event path.
    pub fn set_name(&self, _creds: &Credentials, name: &str) {
        let _ = self.emit_event(LIFECYCLE_NAME, &[Item::Str(name.to_string())]);
    }

    /// Change the status mask through the lifecycle event path.
    pub fn set_status(&self, _creds: &Credentials, status: Status) {
        let _ = self.emit_event(LIFECYCLE_STATUS, &[Item::Int(status.as_i64())]);
    }

    pub fn log(&self, level: i64, message: &str) {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as i64)
            .unwrap_or(0);
        let _ = self.emit_event(
            LIFECYCLE_LOG,
            &[Item::Int(now), Item::Int(level), Item::Str(message.to_string())],
        );
    }

    pub fn logs(&self) -> Vec<LogMessage> {
        self.0
            .logs
            .lock()
            .expect("system lock poisoned")
            .values()
            .cloned()
            .collect()
    }

    // Fields mutated directly by the default meta callbacks.

    pub(crate) fn apply_name(&self, name: &str) {
        *self.0.name.lock().expect("system lock poisoned") = name.to_string();
    }

    pub(crate) fn apply_status(&self, status: Status) {
        *self.0.status.lock().expect("system lock poisoned") = status;
    }

    pub(crate) fn status_update(&self, set: Status, clear: Status) {
        let mut status = self.0.status.lock().expect("system lock poisoned");
        status.clear(clear);
        status.set(set);
    }

    pub(crate) fn append_log(&self, msg: LogMessage) {
        let mut logs = self.0.logs.lock().expect("system lock poisoned");
        let mut key = msg.time;
        while logs.contains_key(&key) {
            key += 1;
        }
        logs.insert(key, msg);
    }

    // Hubs

    pub fn get_hub(&self, name: &str) -> Option<Hub> {
        let hubs = self.0.hubs.lock().expect("system lock poisoned");
        hubs.iter().find(|hub| hub.name() == name).cloned()
    }

    pub fn hubs(&self) -> Vec<Hub> {
        self.0.hubs.lock().expect("system lock poisoned").clone()
    }

    /// Instantiate the hubs of a compiled interface on this system.
    pub fn define(&self, interface: &Interface) -> Result<(), NodeError> {
        {
            let mut extends = self.0.extends.lock().expect("system lock poisoned");
            for ext in &interface.extends {
                if !extends.contains(ext) {
                    extends.push(ext.clone());
                }
            }
        }
        let mut hubs = self.0.hubs.lock().expect("system lock poisoned");
        for hub_interface in &interface.hubs {
            if hubs.iter().any(|h| h.name() == hub_interface.name) {
                return Err(NodeError::Misconfigured(format!(
                    "duplicate hub name: {}",
                    hub_interface.name
                )));
            }
            hubs.push(Hub::new(Arc::downgrade(&self.0), hub_interface.clone()));
        }
        Ok(())
    }

    pub(crate) fn add_hub(&self, interface: HubInterface) -> Hub {
        let hub = Hub::new(Arc::downgrade(&self.0), interface);
        let mut hubs = self.0.hubs.lock().expect("system lock poisoned");
        hubs.push(hub.clone());
        hub
    }

    /// The compiled interface this system currently exposes.
    pub fn interface(&self) -> Interface {
        let hubs = self.0.hubs.lock().expect("system lock poisoned");
        Interface {
            name: String::new(),
            description: String::new(),
            extends: self.extends(),
            hubs: hubs.iter().map(|hub| hub.interface().clone()).collect(),
        }
    }

    // Lifecycle events

    pub fn add_callback(&self, event: &str, cb: EventFn) {
        let mut events = self.0.events.lock().expect("system lock poisoned");
        events.entry(event.to_string()).or_default().push(cb);
    }

    /// Run the callbacks registered for an event in insertion order,
    /// wrapped in the automatic status transition for lifecycle events.
    /// The first failing callback short-circuits the rest; the pre-phase
    /// bit is cleared even then.
    pub fn emit_event(&self, event: &str, args: &[Item]) -> Result<(), NodeError> {
        let transition = status::transition_for(event);
        if let Some(tr) = transition {
            self.0
                .status
                .lock()
                .expect("system lock poisoned")
                .set(tr.pre);
        }

        let callbacks = {
            let events = self.0.events.lock().expect("system lock poisoned");
            events.get(event).cloned().unwrap_or_default()
        };
        for cb in callbacks {
            if let Err(err) = cb(args) {
                if let Some(tr) = transition {
                    self.0
                        .status
                        .lock()
                        .expect("system lock poisoned")
                        .clear(tr.pre);
                }
                return Err(err);
            }
        }

        if let Some(tr) = transition {
            let new_status = {
                let mut status = self.0.status.lock().expect("system lock poisoned");
                status.clear(tr.pre);
                match tr.post {
                    Post::Set(bit) => status.set(bit),
                    Post::Clear(bit) => status.clear(bit),
                }
                *status
            };
            // Status watchers see lifecycle transitions too.
            self.notify_status(new_status);
        }
        Ok(())
    }

    /// Invoke the status callbacks without driving the machine again.
    pub(crate) fn notify_status(&self, status: Status) {
        let callbacks = {
            let events = self.0.events.lock().expect("system lock poisoned");
            events.get(LIFECYCLE_STATUS).cloned().unwrap_or_default()
        };
        let args = [Item::Int(status.as_i64())];
        for cb in callbacks {
            let _ = cb(&args);
        }
    }

    // Origin topology

    pub fn add_origin(&self, name: &str, origin: NativeSystem) {
        origin
            .0
            .parents
            .lock()
            .expect("system lock poisoned")
            .push(Arc::downgrade(&self.0));
        let mut origins = self.0.origins.lock().expect("system lock poisoned");
        origins.retain(|(n, _)| n != name);
        origins.push((name.to_string(), origin));
    }

    pub fn origins(&self) -> Vec<(String, NativeSystem)> {
        self.0.origins.lock().expect("system lock poisoned").clone()
    }

    /// Systems holding this one as an origin.
    pub fn parents(&self) -> Vec<NativeSystem> {
        self.0
            .parents
            .lock()
            .expect("system lock poisoned")
            .iter()
            .filter_map(|parent| parent.upgrade().map(NativeSystem))
            .collect()
    }

    /// Resolve an origin by "/"-joined path.
    pub fn origin(&self, path: &str) -> Option<NativeSystem> {
        let mut current = self.clone();
        for part in path.split('/') {
            if part.is_empty() {
                continue;
            }
            let next = {
                let origins = current.0.origins.lock().expect("system lock poisoned");
                origins
                    .iter()
                    .find(|(name, _)| name == part)
                    .map(|(_, sys)| sys.clone())
            };
            current = next?;
        }
        Some(current)
    }

    /// Serialize the origin tree rooted at this system. Origin links may
    /// form cycles on adversarial data; traversal is guarded.
    pub fn origin_tree(&self) -> SystemOrigin {
        fn build(sys: &NativeSystem, visited: &mut Vec<*const SystemShared>) -> SystemOrigin {
            let ptr = Arc::as_ptr(&sys.0);
            let mut tree = SystemOrigin {
                id: sys.remote_id(),
                node: sys.remote_node(),
                name: sys.name(),
                status: sys.status().as_i64(),
                origin: BTreeMap::new(),
            };
            if tree.id.is_null() {
                tree.id = sys.id();
            }
            if tree.node.is_empty() {
                if let Some(node) = sys.node() {
                    tree.node = node.name();
                }
            }
            if visited.contains(&ptr) {
                return tree;
            }
            visited.push(ptr);
            for (name, origin) in sys.origins() {
                tree.origin.insert(name, build(&origin, visited));
            }
            tree
        }
        build(self, &mut Vec::new())
    }

    // Child systems

    pub fn add_system(&self, sys: NativeSystem) -> Result<(), NodeError> {
        let mut systems = self.0.systems.lock().expect("system lock poisoned");
        if systems.contains_key(&sys.id()) {
            return Err(NodeError::Misconfigured(format!(
                "already have child system: {}",
                sys.name()
            )));
        }
        systems.insert(sys.id(), Some(sys));
        Ok(())
    }

    pub fn systems(&self) -> Vec<NativeSystem> {
        self.0
            .systems
            .lock()
            .expect("system lock poisoned")
            .values()
            .filter_map(|sys| sys.clone())
            .collect()
    }

    pub fn get_system_by_name(&self, name: &str) -> Option<NativeSystem> {
        self.systems().into_iter().find(|sys| sys.name() == name)
    }

    // Extensions

    /// Replace or insert the extension with the given factory name.
    pub fn set_extension(&self, name: &str, ext: Arc<dyn FactoryExtension>) {
        let mut extensions = self.0.extensions.lock().expect("system lock poisoned");
        extensions.retain(|(n, _)| n != name);
        extensions.push((name.to_string(), ext));
    }

    pub fn add_extension(&self, name: &str, ext: Arc<dyn FactoryExtension>) {
        let mut extensions = self.0.extensions.lock().expect("system lock poisoned");
        extensions.push((name.to_string(), ext));
    }

    pub fn extension(&self, name: &str) -> Option<Arc<dyn FactoryExtension>> {
        let extensions = self.0.extensions.lock().expect("system lock poisoned");
        extensions
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, ext)| ext.clone())
    }

    pub fn extensions(&self) -> Vec<(String, Arc<dyn FactoryExtension>)> {
        self.0.extensions.lock().expect("system lock poisoned").clone()
    }

    // Extends

    pub fn extends(&self) -> Vec<String> {
        self.0.extends.lock().expect("system lock poisoned").clone()
    }

    pub fn set_extends(&self, extends: Vec<String>) {
        *self.0.extends.lock().expect("system lock poisoned") = extends;
    }

    pub fn add_extends(&self, name: String) {
        let mut extends = self.0.extends.lock().expect("system lock poisoned");
        if !extends.contains(&name) {
            extends.push(name);
        }
    }

    // Upstream identity (client-side wrappers)

    pub fn remote_id(&self) -> SystemId {
        *self.0.remote_id.lock().expect("system lock poisoned")
    }

    pub fn set_remote_id(&self, id: SystemId) {
        *self.0.remote_id.lock().expect("system lock poisoned") = id;
    }

    pub fn remote_node(&self) -> String {
        self.0.remote_node.lock().expect("system lock poisoned").clone()
    }

    pub fn set_remote_node(&self, node: &str) {
        *self.0.remote_node.lock().expect("system lock poisoned") = node.to_string();
    }

    pub(crate) fn sparkable_ref(&self) -> Sparkable {
        self.0.sparkable.lock().expect("system lock poisoned").clone()
    }

    pub(crate) fn set_sparkable(&self, sparkable: Sparkable) {
        *self.0.sparkable.lock().expect("system lock poisoned") = sparkable;
    }

    /// Rebuild the blueprint of this system: its current interface plus
    /// the implementations exposed by its factory extensions.
    pub fn sparkable(&self) -> Sparkable {
        let stored = self.sparkable_ref();
        let mut sparkable = Sparkable {
            name: stored.name,
            domain: stored.domain,
            interface: Some(self.interface()),
            constructor: stored.constructor,
            implementation: BTreeMap::new(),
        };
        for (factory, ext) in self.extensions() {
            if let Some(implementation) = ext.implementation() {
                if let Some(raw) = implementation.to_value() {
                    sparkable.add_implementation(&factory, raw);
                }
            }
        }
        sparkable
    }

    /// Bind this system as a mirror of `origin`: pipe calls forward
    /// through, channel emissions and value changes cross in both
    /// directions. Ping-pong is stopped by the hubs' dedup sets only.
    pub fn redirect_from(
        &self,
        origin: &NativeSystem,
        creds: &Credentials,
        mws: &Middlewares,
    ) -> Result<(), NodeError> {
        for origin_hub in origin.hubs() {
            let local_hub = match self.get_hub(origin_hub.name()) {
                Some(hub) => hub,
                None => self.add_hub(origin_hub.interface().clone()),
            };
            match origin_hub.interface().kind {
                HubKind::Pipe => {
                    let target = origin_hub.clone();
                    let mws = mws.clone();
                    local_hub.handle(Arc::new(move |creds, vals| {
                        target.invoke(creds, &mws, vals)
                    }))?;
                }
                HubKind::Channel => {
                    link_channel(&local_hub, &origin_hub, creds, mws)?;
                    link_channel(&origin_hub, &local_hub, creds, mws)?;
                }
                HubKind::Value => {
                    link_value(&local_hub, &origin_hub, creds, mws)?;
                    link_value(&origin_hub, &local_hub, creds, mws)?;
                }
            }
        }
        Ok(())
    }

    pub fn wrap(&self, creds: Credentials, mws: Middlewares) -> System {
        System {
            core: self.clone(),
            creds,
            mws,
        }
    }
}

fn link_channel(
    from: &Hub,
    to: &Hub,
    _creds: &Credentials,
    mws: &Middlewares,
) -> Result<(), NodeError> {
    let target = to.clone();
    let mws = mws.clone();
    from.subscribe(
        &Credentials::default(),
        Box::new(move |id, creds, val| {
            let _ = target.emit(creds, &mws, id, val.clone());
        }),
    )?;
    Ok(())
}

fn link_value(
    from: &Hub,
    to: &Hub,
    _creds: &Credentials,
    mws: &Middlewares,
) -> Result<(), NodeError> {
    let target = to.clone();
    let mws = mws.clone();
    from.subscribe(
        &Credentials::default(),
        Box::new(move |id, creds, val| {
            let _ = target.set(creds, &mws, id, val.clone());
        }),
    )?;
    Ok(())
}

/// A system bound to the caller's credentials and middleware chain.
#[derive(Clone)]
pub struct System {
    pub(crate) core: NativeSystem,
    pub(crate) creds: Credentials,
    pub(crate) mws: Middlewares,
}

impl System {
    pub fn id(&self) -> SystemId {
        self.core.id()
    }

    pub fn name(&self) -> String {
        self.core.name()
    }

    pub fn status(&self) -> Status {
        self.core.status()
    }

    pub fn set_name(&self, name: &str) {
        self.core.set_name(&self.creds, name);
    }

    pub fn set_status(&self, status: Status) {
        self.core.set_status(&self.creds, status);
    }

    pub fn get_hub(&self, name: &str) -> Option<HubHandle> {
        self.core.get_hub(name).map(|hub| HubHandle {
            hub,
            creds: self.creds.clone(),
            mws: self.mws.clone(),
        })
    }

    pub fn hubs(&self) -> Vec<HubHandle> {
        self.core
            .hubs()
            .into_iter()
            .map(|hub| HubHandle {
                hub,
                creds: self.creds.clone(),
                mws: self.mws.clone(),
            })
            .collect()
    }

    pub fn emit_event(&self, event: &str, args: &[Item]) -> Result<(), NodeError> {
        self.core.emit_event(event, args)
    }

    pub fn add_callback(&self, event: &str, cb: EventFn) {
        self.core.add_callback(event, cb);
    }

    pub fn systems(&self) -> Vec<System> {
        self.core
            .systems()
            .into_iter()
            .map(|sys| sys.wrap(self.creds.clone(), self.mws.clone()))
            .collect()
    }

    pub fn extends(&self) -> Vec<String> {
        self.core.extends()
    }

    pub fn node(&self) -> Option<crate::node::node::Node> {
        self.core.node()
    }

    pub fn native(&self) -> &NativeSystem {
        &self.core
    }

    pub fn credentials(&self) -> &Credentials {
        &self.creds
    }

    pub fn middlewares(&self) -> &Middlewares {
        &self.mws
    }
}

impl std::fmt::Debug for System {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "System({})", self.core.0.label())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::interface::HubDirection;
    use crate::core::types::{LeafType, Type};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn blank() -> NativeSystem {
        NativeSystem::blank(SystemId::generate(), "test")
    }

    #[test]
    fn lifecycle_transitions_accumulate_status() {
        let sys = blank();
        sys.emit_event(LIFECYCLE_CREATE, &[]).unwrap();
        assert!(sys.status().contains(Status::CREATED));
        assert!(!sys.status().contains(Status::CREATING));

        sys.emit_event(LIFECYCLE_LOAD, &[]).unwrap();
        assert!(sys.status().contains(Status::CREATED));
        assert!(sys.status().contains(Status::LOADED));

        sys.emit_event(LIFECYCLE_START, &[]).unwrap();
        assert!(sys.status().contains(Status::RUNNING));

        sys.emit_event(LIFECYCLE_STOP, &[]).unwrap();
        assert!(!sys.status().contains(Status::RUNNING));
        assert!(sys.status().contains(Status::LOADED));
    }

    #[test]
    fn failing_callback_clears_pre_bit_and_short_circuits() {
        let sys = blank();
        let later = Arc::new(AtomicUsize::new(0));
        sys.add_callback(
            LIFECYCLE_CREATE,
            Arc::new(|_args| Err(NodeError::Failed("boom".to_string()))),
        );
        let counter = later.clone();
        sys.add_callback(
            LIFECYCLE_CREATE,
            Arc::new(move |_args| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
        );

        let err = sys.emit_event(LIFECYCLE_CREATE, &[]).unwrap_err();
        assert!(err.to_string().contains("boom"));
        assert_eq!(later.load(Ordering::SeqCst), 0);
        assert!(!sys.status().contains(Status::CREATING));
        assert!(!sys.status().contains(Status::CREATED));
    }

    #[test]
    fn origin_paths_resolve() {
        let root = blank();
        let ws = blank();
        let child = blank();
        ws.add_origin("child", child.clone());
        root.add_origin("ws", ws.clone());

        assert!(root.origin("ws").unwrap().same(&ws));
        assert!(root.origin("ws/child").unwrap().same(&child));
        assert!(root.origin("").unwrap().same(&root));
        assert!(root.origin("nope").is_none());
    }

    #[test]
    fn origin_tree_handles_cycles() {
        let a = blank();
        let b = blank();
        a.add_origin("b", b.clone());
        b.add_origin("a", a.clone());
        // Must terminate.
        let tree = a.origin_tree();
        assert!(tree.origin.contains_key("b"));
    }

    #[test]
    fn redirect_mirrors_pipe_and_value() {
        let origin = blank();
        origin.add_hub(
            HubInterface::pipe("echo", HubDirection::In)
                .with_input(vec![crate::core::interface::ItemInterface::new(
                    "v",
                    Type::leaf(LeafType::String),
                )])
                .with_output(vec![crate::core::interface::ItemInterface::new(
                    "v",
                    Type::leaf(LeafType::String),
                )]),
        );
        origin.add_hub(HubInterface::value(
            "state",
            HubDirection::Both,
            Type::leaf(LeafType::Integer),
        ));
        origin
            .get_hub("echo")
            .unwrap()
            .handle(Arc::new(|_c, vals| Ok(vals)))
            .unwrap();

        let mirror = blank();
        let creds = Credentials::default();
        let mws = Middlewares::new();
        mirror.redirect_from(&origin, &creds, &mws).unwrap();

        let rets = mirror
            .get_hub("echo")
            .unwrap()
            .invoke(&creds, &mws, vec![Item::Str("x".into())])
            .unwrap();
        assert_eq!(rets, vec![Item::Str("x".into())]);

        origin
            .get_hub("state")
            .unwrap()
            .set(&creds, &mws, "e1", Item::Int(7))
            .unwrap();
        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        loop {
            if mirror.get_hub("state").unwrap().get().unwrap() == Item::Int(7) {
                break;
            }
            assert!(std::time::Instant::now() < deadline, "value did not mirror");
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn duplicate_hub_definition_is_misconfigured() {
        let sys = blank();
        let mut interface = Interface::new("I");
        interface
            .add_hub(HubInterface::pipe("p", HubDirection::In))
            .unwrap();
        sys.define(&interface).unwrap();
        assert!(matches!(
            sys.define(&interface),
            Err(NodeError::Misconfigured(_))
        ));
    }
}
