//! Client sessions: one logical attachment of a local system handle to a
//! remote system, carried over a connection.
//!
//! The dialer side plays the client role: it sends `conn` and builds its
//! local system from the `init` reply. The acceptor side plays the server
//! role: it resolves the target system, answers `init` and replicates
//! lifecycle state along the origin tree.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::SystemTime;

use crate::core::creds::Credentials;
use crate::core::id::SystemId;
use crate::core::interface::{HubKind, ItemInterface, ItemsInterface};
use crate::core::item::{BadValue, Item};
use crate::core::status::Status;
use crate::core::types::Middlewares;
use crate::node::hub::{Hub, HubError, HubHandle};
use crate::node::middleware::{CredentialsMiddleware, IdMiddleware};
use crate::node::node::Node;
use crate::node::system::{
    NativeSystem, System, SystemOrigin, LIFECYCLE_CREATE, LIFECYCLE_DELETE, LIFECYCLE_LOAD,
    LIFECYCLE_NAME, LIFECYCLE_START, LIFECYCLE_STATUS, LIFECYCLE_STOP,
};
use crate::remote::conn::{Conn, ConnShared};
use crate::remote::pool::SessionExt;
use crate::remote::proto::{
    ConnBody, CreateBody, CredsBody, InitBody, InvokeBody, NameBody, ProtoError, PushBody,
    ReturnBody, StatusBody, StopBody, SystemPayload,
};
use crate::remote::wrappers::{BlueprintWireMiddleware, InterfaceWireMiddleware, SystemWireMiddleware};
use crate::remote::SessionError;

pub(crate) struct ClientShared {
    cid: String,
    server: bool,
    created: SystemTime,
    remote_node: Mutex<String>,
    remote_id: Mutex<SystemId>,
    creds: Mutex<Credentials>,
    conn: Mutex<Weak<ConnShared>>,
    system: Mutex<Option<NativeSystem>>,
    middlewares: Middlewares,
    // Event ids last pushed by the peer, used to suppress echoes.
    incoming: Mutex<HashSet<String>>,
    attached: AtomicBool,
    defined: AtomicBool,
    // Serializes frame handling per session.
    handle_lock: Mutex<()>,
}

/// One session over a connection. Cheap to clone; all state is shared.
#[derive(Clone)]
pub struct ClientSession(pub(crate) Arc<ClientShared>);

impl ClientSession {
    pub(crate) fn new(
        conn: Option<&Conn>,
        cid: &str,
        server: bool,
        remote_node: &str,
        system: Option<NativeSystem>,
        middlewares: Middlewares,
    ) -> ClientSession {
        ClientSession(Arc::new(ClientShared {
            cid: cid.to_string(),
            server,
            created: SystemTime::now(),
            remote_node: Mutex::new(remote_node.to_string()),
            remote_id: Mutex::new(SystemId::default()),
            creds: Mutex::new(Credentials::default()),
            conn: Mutex::new(match conn {
                Some(conn) => Arc::downgrade(&conn.0),
                None => Weak::new(),
            }),
            system: Mutex::new(system),
            middlewares,
            incoming: Mutex::new(HashSet::new()),
            attached: AtomicBool::new(false),
            defined: AtomicBool::new(false),
            handle_lock: Mutex::new(()),
        }))
    }

    pub fn cid(&self) -> String {
        self.0.cid.clone()
    }

    pub fn is_server(&self) -> bool {
        self.0.server
    }

    pub fn created(&self) -> SystemTime {
        self.0.created
    }

    pub fn remote_node(&self) -> String {
        self.0.remote_node.lock().expect("client lock poisoned").clone()
    }

    pub fn remote_id(&self) -> SystemId {
        *self.0.remote_id.lock().expect("client lock poisoned")
    }

    pub fn credentials(&self) -> Credentials {
        self.0.creds.lock().expect("client lock poisoned").clone()
    }

    pub(crate) fn set_defined(&self) {
        self.0.defined.store(true, Ordering::SeqCst);
    }

    pub(crate) fn set_remote_id(&self, id: SystemId) {
        *self.0.remote_id.lock().expect("client lock poisoned") = id;
    }

    pub(crate) fn apply_credentials(&self, creds: Credentials) {
        *self.0.creds.lock().expect("client lock poisoned") = creds;
    }

    pub fn conn(&self) -> Option<Conn> {
        self.0
            .conn
            .lock()
            .expect("client lock poisoned")
            .upgrade()
            .map(Conn)
    }

    pub(crate) fn set_conn(&self, conn: &Conn) {
        *self.0.conn.lock().expect("client lock poisoned") = Arc::downgrade(&conn.0);
        let mut remote_node = self.0.remote_node.lock().expect("client lock poisoned");
        *remote_node = conn.node_name();
    }

    /// Whether the peer link is up.
    pub fn active(&self) -> bool {
        self.conn().map(|conn| conn.active()).unwrap_or(false)
    }

    pub fn connected(&self) -> bool {
        self.0.attached.load(Ordering::SeqCst) && self.active()
    }

    pub fn system(&self) -> Option<NativeSystem> {
        self.0.system.lock().expect("client lock poisoned").clone()
    }

    pub(crate) fn set_system(&self, sys: NativeSystem) {
        *self.0.system.lock().expect("client lock poisoned") = Some(sys);
    }

    pub(crate) fn install_extension(&self) {
        if let Some(sys) = self.system() {
            sys.set_extension("ws", Arc::new(SessionExt::new(self)));
        }
    }

    /// The wrapped local system handle.
    pub fn handle_system(&self) -> Option<System> {
        self.system()
            .map(|sys| sys.wrap(self.credentials(), self.0.middlewares.clone()))
    }

    pub fn get_hub(&self, name: &str) -> Option<HubHandle> {
        self.handle_system().and_then(|sys| sys.get_hub(name))
    }

    /// Name of the upstream system, mirrored into the "ws" origin.
    pub fn remote_name(&self) -> String {
        self.system()
            .and_then(|sys| sys.origin("ws"))
            .map(|origin| origin.name())
            .unwrap_or_default()
    }

    /// Status of the upstream system, mirrored into the "ws" origin.
    pub fn remote_status(&self) -> Status {
        self.system()
            .and_then(|sys| sys.origin("ws"))
            .map(|origin| origin.status())
            .unwrap_or_default()
    }

    /// Rename the local handle; the change propagates to the peer.
    pub fn set_name(&self, name: &str) {
        if let Some(sys) = self.system() {
            sys.set_name(&self.credentials(), name);
        }
    }

    /// Change the local handle's status. Status is authoritative
    /// server-to-client only, so this never propagates.
    pub fn set_status(&self, status: Status) {
        if let Some(sys) = self.system() {
            sys.set_status(&self.credentials(), status);
        }
    }

    pub fn set_credentials(&self, creds: Credentials) -> Result<(), SessionError> {
        self.apply_credentials(creds.clone());
        self.request(SystemPayload::Creds(CredsBody { credentials: creds }))?;
        Ok(())
    }

    // Outbound plumbing

    pub(crate) fn send(
        &self,
        payload: SystemPayload,
        reference: &str,
        returns: bool,
    ) -> Result<Option<crossbeam::channel::Receiver<crate::remote::proto::NodePayload>>, SessionError>
    {
        let conn = self
            .conn()
            .ok_or_else(|| SessionError::Inactive(self.cid()))?;
        conn.send(
            crate::remote::proto::NodePayload::Client(Box::new(
                crate::remote::proto::ClientFrame {
                    client: self.cid(),
                    payload,
                },
            )),
            reference,
            returns,
        )
    }

    /// Send a payload that expects a reply and wait for it.
    pub(crate) fn request(&self, payload: SystemPayload) -> Result<SystemPayload, SessionError> {
        let conn = self
            .conn()
            .ok_or_else(|| SessionError::Inactive(self.cid()))?;
        let rx = self.send(payload, "", true)?.ok_or(SessionError::Canceled)?;
        match conn.await_reply(rx)? {
            crate::remote::proto::NodePayload::Client(frame) => match frame.payload {
                SystemPayload::Error(body) => Err(SessionError::Remote(body.error)),
                payload => Ok(payload),
            },
            crate::remote::proto::NodePayload::None => Ok(SystemPayload::None),
            other => Err(SessionError::Protocol(ProtoError::UnknownCommand(
                other.cmd().to_string(),
            ))),
        }
    }

    fn ack(&self, request: &str) -> Result<(), SessionError> {
        if !request.is_empty() {
            self.send(SystemPayload::None, request, false)?;
        }
        Ok(())
    }

    /// Connect the session to a concrete remote system. The `init` reply
    /// has been fully applied when this returns.
    pub fn connect(&self, remote_id: SystemId, creds: Credentials) -> Result<(), SessionError> {
        {
            let mut id = self.0.remote_id.lock().expect("client lock poisoned");
            *id = remote_id;
        }
        self.apply_credentials(creds);
        self.connect_existing()
    }

    /// Re-issue `conn` with the stored identity and credentials.
    pub(crate) fn connect_existing(&self) -> Result<(), SessionError> {
        if self.is_server() {
            return Err(SessionError::Other(
                "server sessions cannot connect".to_string(),
            ));
        }
        self.request(SystemPayload::Conn(ConnBody {
            id: self.remote_id().hex(),
            credentials: self.credentials(),
        }))?;
        Ok(())
    }

    // Client-to-server lifecycle

    pub fn emit_create(&self, types: ItemsInterface, vals: Vec<Item>) -> Result<(), SessionError> {
        let values = self.wrap_values(&types, vals)?;
        self.request(SystemPayload::Create(CreateBody { values, types }))?;
        Ok(())
    }

    pub fn emit_load(&self) -> Result<(), SessionError> {
        self.request(SystemPayload::Load)?;
        Ok(())
    }

    pub fn emit_start(&self) -> Result<(), SessionError> {
        self.request(SystemPayload::Start)?;
        Ok(())
    }

    pub fn emit_stop(&self, timeout: Option<f64>) -> Result<(), SessionError> {
        self.request(SystemPayload::Stop(StopBody { timeout }))?;
        Ok(())
    }

    pub fn emit_delete(&self) -> Result<(), SessionError> {
        self.request(SystemPayload::Delete)?;
        Ok(())
    }

    /// The peer link went down: stop the local handle.
    pub(crate) fn connection_lost(&self) {
        if let Some(sys) = self.system() {
            let _ = sys.emit_event(LIFECYCLE_STOP, &[Item::Float(0.0)]);
            sys.log(2, "connection lost");
        }
    }

    // Frame handling

    pub(crate) fn handle(&self, payload: &SystemPayload, request: &str) -> Result<(), SessionError> {
        let _guard = self.0.handle_lock.lock().expect("client lock poisoned");
        match payload {
            SystemPayload::None => Ok(()),
            SystemPayload::Error(body) => Err(SessionError::Remote(body.error.clone())),
            SystemPayload::Conn(body) => self.handle_conn(body, request),
            SystemPayload::Creds(body) => {
                self.apply_credentials(body.credentials.clone());
                self.ack(request)
            }
            SystemPayload::Init(body) => self.handle_init(body.as_ref()),
            SystemPayload::Invoke(body) => self.handle_invoke(body, request),
            SystemPayload::Return(_) => {
                if self.is_server() {
                    Err(SessionError::Other(format!(
                        "return: {} not a client",
                        self.cid()
                    )))
                } else {
                    Ok(())
                }
            }
            SystemPayload::Push(body) => self.handle_push(body),
            SystemPayload::Create(body) => {
                let sys = match self.system() {
                    Some(sys) => sys,
                    None => return Ok(()),
                };
                let params = self.unwrap_values(&body.types, body.values.clone())?;
                sys.emit_event(LIFECYCLE_CREATE, &params)?;
                self.ack(request)
            }
            SystemPayload::Load => {
                if let Some(sys) = self.system() {
                    sys.emit_event(LIFECYCLE_LOAD, &[])?;
                }
                self.ack(request)
            }
            SystemPayload::Stop(body) => {
                if let Some(sys) = self.system() {
                    sys.emit_event(LIFECYCLE_STOP, &[Item::Float(body.timeout.unwrap_or(0.0))])?;
                }
                self.ack(request)
            }
            SystemPayload::Start => {
                if let Some(sys) = self.system() {
                    sys.emit_event(LIFECYCLE_START, &[])?;
                }
                self.ack(request)
            }
            SystemPayload::Delete => {
                if let Some(sys) = self.system() {
                    sys.emit_event(LIFECYCLE_DELETE, &[])?;
                }
                self.ack(request)
            }
            SystemPayload::Name(body) => self.handle_name(body),
            SystemPayload::Status(body) => self.handle_status(body),
        }
    }

    /// Server role: bind to the requested system and answer `init`.
    fn handle_conn(&self, body: &ConnBody, request: &str) -> Result<(), SessionError> {
        let conn = self
            .conn()
            .ok_or_else(|| SessionError::Inactive(self.cid()))?;
        let node = conn.pool()?.node();

        if self.system().is_none() {
            let creds = body.credentials.clone();
            let sys = node.get_system_by_id(&creds, SystemId::parse(&body.id))?;
            self.set_system(sys.native().clone());
            self.install_extension();
        }
        self.apply_credentials(body.credentials.clone());

        let sys = self
            .system()
            .ok_or_else(|| SessionError::NotFound("system".to_string()))?;
        self.send(
            SystemPayload::Init(Box::new(InitBody {
                interface: sys.interface(),
                extends: sys.extends(),
                origin: sys.origin_tree(),
            })),
            request,
            false,
        )?;

        if !self.0.attached.swap(true, Ordering::SeqCst) {
            self.attach_system()?;
        }
        Ok(())
    }

    /// Client role: define the local system from the peer's interface,
    /// mirror its origin tree and attach the hub forwarders.
    fn handle_init(&self, body: &InitBody) -> Result<(), SessionError> {
        if self.is_server() {
            return Err(SessionError::Other(format!(
                "init: {} not a client",
                self.cid()
            )));
        }
        let conn = self
            .conn()
            .ok_or_else(|| SessionError::Inactive(self.cid()))?;
        let node = conn.pool()?.node();
        let sys = self
            .system()
            .ok_or_else(|| SessionError::NotFound("system".to_string()))?;

        if !self.0.defined.swap(true, Ordering::SeqCst) {
            node.implement_system(&sys, &body.interface.blank())?;
        }

        let origin = match sys.origin("ws") {
            Some(origin) => origin,
            None => {
                let origin = node.detached_system("")?;
                sys.add_origin("ws", origin.clone());
                origin
            }
        };
        self.attach_origin(&origin, &body.origin, &node)?;

        if !self.0.attached.swap(true, Ordering::SeqCst) {
            self.attach_system()?;
        }
        sys.set_extends(body.extends.clone());
        let _ = sys.emit_event(LIFECYCLE_START, &[]);
        Ok(())
    }

    fn attach_origin(
        &self,
        sys: &NativeSystem,
        tree: &SystemOrigin,
        node: &Node,
    ) -> Result<(), SessionError> {
        let creds = self.credentials();
        sys.set_remote_node(&tree.node);
        sys.set_remote_id(tree.id);
        sys.set_name(&creds, &tree.name);
        sys.set_status(&creds, Status::from_bits(tree.status as u32));
        for (name, child_tree) in &tree.origin {
            let origin = match sys.origin(name) {
                Some(origin) => origin,
                None => {
                    let origin = node.detached_system(&child_tree.name)?;
                    sys.add_origin(name, origin.clone());
                    origin
                }
            };
            self.attach_origin(&origin, child_tree, node)?;
        }
        Ok(())
    }

    fn handle_invoke(&self, body: &InvokeBody, request: &str) -> Result<(), SessionError> {
        if !self.is_server() {
            return Err(SessionError::Other(format!(
                "invoke: {} not a server",
                self.cid()
            )));
        }
        let sys = self
            .system()
            .ok_or_else(|| SessionError::NotFound("system".to_string()))?;
        let hub = sys
            .get_hub(&body.hub)
            .ok_or_else(|| SessionError::NotFound(format!("could not find hub: {}", body.hub)))?;

        let vals = self.unwrap_values(&hub.interface().input, body.value.clone())?;
        let rets = hub.invoke(&self.credentials(), &self.0.middlewares, vals)?;
        let values = self.wrap_values(&hub.interface().output, rets)?;
        self.send(SystemPayload::Return(ReturnBody { values }), request, false)?;
        Ok(())
    }

    fn handle_push(&self, body: &PushBody) -> Result<(), SessionError> {
        let sys = match self.system() {
            Some(sys) => sys,
            None => return Ok(()),
        };
        {
            let mut incoming = self.0.incoming.lock().expect("client lock poisoned");
            incoming.insert(body.id.clone());
        }
        let hub = sys
            .get_hub(&body.hub)
            .ok_or_else(|| SessionError::NotFound(format!("could not find hub: {}", body.hub)))?;
        let interf = hub.interface();

        let direction_ok = if self.is_server() {
            interf.direction.accepts_in()
        } else {
            interf.direction.accepts_out()
        };
        if !direction_ok {
            return Err(SessionError::Protocol(ProtoError::WrongDirection));
        }

        let slot = interf
            .value
            .clone()
            .ok_or_else(|| BadValue::new(format!("hub {} has no value interface", body.hub)))?;
        let val = self.unwrap_value(&slot, body.value.clone())?;
        match interf.kind {
            HubKind::Value => {
                hub.set(&self.credentials(), &self.0.middlewares, &body.id, val)?;
            }
            HubKind::Channel => {
                hub.emit(&self.credentials(), &self.0.middlewares, &body.id, val)?;
            }
            HubKind::Pipe => {}
        }
        Ok(())
    }

    fn handle_name(&self, body: &NameBody) -> Result<(), SessionError> {
        let sys = match self.system() {
            Some(sys) => sys,
            None => return Ok(()),
        };
        let target = if self.is_server() {
            sys.origin(body.path.trim_start_matches('/'))
        } else {
            sys.origin(&format!("ws/{}", body.path.trim_start_matches('/')))
        };
        let target = target
            .ok_or_else(|| SessionError::NotFound(format!("name: path not found: {}", body.path)))?;
        target.set_name(&self.credentials(), &body.name);
        Ok(())
    }

    fn handle_status(&self, body: &StatusBody) -> Result<(), SessionError> {
        if self.is_server() {
            // Status is authoritative server-to-client only.
            return Err(SessionError::Other(format!(
                "status: {} not a client",
                self.cid()
            )));
        }
        let sys = match self.system() {
            Some(sys) => sys,
            None => return Ok(()),
        };
        let target = sys
            .origin(&format!("ws/{}", body.path.trim_start_matches('/')))
            .ok_or_else(|| {
                SessionError::NotFound(format!("status: path not found: {}", body.path))
            })?;
        target.set_status(&self.credentials(), Status::from_bits(body.status as u32));
        Ok(())
    }

    // Hub attachment

    fn attach_system(&self) -> Result<(), SessionError> {
        let sys = self
            .system()
            .ok_or_else(|| SessionError::NotFound("system".to_string()))?;
        if self.is_server() {
            self.attach_server_meta(&sys);
            for hub in sys.hubs() {
                self.attach_server_hub(&hub)?;
            }
        } else {
            // Forward local renames to the peer; incoming name frames are
            // applied to the origin subtree, so no echo arises.
            let weak = Arc::downgrade(&self.0);
            sys.add_callback(
                LIFECYCLE_NAME,
                Arc::new(move |args| {
                    if let (Some(session), Some(Item::Str(name))) =
                        (weak.upgrade().map(ClientSession), args.first())
                    {
                        let _ = session.send(
                            SystemPayload::Name(NameBody {
                                path: String::new(),
                                name: name.clone(),
                            }),
                            "",
                            false,
                        );
                    }
                    Ok(())
                }),
            );
            for hub in sys.hubs() {
                self.attach_client_hub(&hub)?;
            }
        }
        Ok(())
    }

    /// Replicate name and status changes of the whole origin tree to the
    /// peer, keyed by "/"-joined path.
    fn attach_server_meta(&self, root: &NativeSystem) {
        let mut visited = Vec::new();
        self.attach_meta_at(root, String::new(), &mut visited);
    }

    fn attach_meta_at(
        &self,
        sys: &NativeSystem,
        path: String,
        visited: &mut Vec<*const crate::node::system::SystemShared>,
    ) {
        let ptr = Arc::as_ptr(&sys.0);
        if visited.contains(&ptr) {
            return;
        }
        visited.push(ptr);

        let weak = Arc::downgrade(&self.0);
        let name_path = path.clone();
        sys.add_callback(
            LIFECYCLE_NAME,
            Arc::new(move |args| {
                if let (Some(session), Some(Item::Str(name))) =
                    (weak.upgrade().map(ClientSession), args.first())
                {
                    let _ = session.send(
                        SystemPayload::Name(NameBody {
                            path: name_path.clone(),
                            name: name.clone(),
                        }),
                        "",
                        false,
                    );
                }
                Ok(())
            }),
        );

        let weak = Arc::downgrade(&self.0);
        let status_path = path.clone();
        sys.add_callback(
            LIFECYCLE_STATUS,
            Arc::new(move |args| {
                if let (Some(session), Some(Item::Int(status))) =
                    (weak.upgrade().map(ClientSession), args.first())
                {
                    let _ = session.send(
                        SystemPayload::Status(StatusBody {
                            path: status_path.clone(),
                            status: *status,
                        }),
                        "",
                        false,
                    );
                }
                Ok(())
            }),
        );

        for (name, origin) in sys.origins() {
            self.attach_meta_at(&origin, format!("{}/{}", path, name), visited);
        }
    }

    fn attach_client_hub(&self, hub: &Hub) -> Result<(), SessionError> {
        let interf = hub.interface().clone();
        if !interf.direction.accepts_in() {
            return Ok(());
        }
        match interf.kind {
            HubKind::Pipe => {
                let weak = Arc::downgrade(&self.0);
                let input = interf.input.clone();
                let output = interf.output.clone();
                let hub_name = interf.name.clone();
                hub.handle(Arc::new(move |_creds, vals| {
                    let session = weak
                        .upgrade()
                        .map(ClientSession)
                        .ok_or_else(|| HubError::Failed("client inactive: dropped".to_string()))?;
                    if !session.active() {
                        return Err(HubError::Failed(format!(
                            "client inactive: {}",
                            session.cid()
                        )));
                    }
                    let wrapped = session
                        .wrap_values(&input, vals)
                        .map_err(|err| HubError::Failed(err.to_string()))?;
                    let reply = session
                        .request(SystemPayload::Invoke(InvokeBody {
                            hub: hub_name.clone(),
                            value: wrapped,
                        }))
                        .map_err(|err| HubError::Failed(err.to_string()))?;
                    match reply {
                        SystemPayload::Return(ret) => session
                            .unwrap_values(&output, ret.values)
                            .map_err(|err| HubError::Failed(err.to_string())),
                        other => Err(HubError::Failed(format!(
                            "unexpected reply: {}",
                            other.cmd()
                        ))),
                    }
                }))?;
            }
            HubKind::Channel => {
                self.attach_forwarder(hub, &interf.value, false)?;
            }
            HubKind::Value => {
                self.attach_forwarder(hub, &interf.value, true)?;
            }
        }
        Ok(())
    }

    fn attach_server_hub(&self, hub: &Hub) -> Result<(), SessionError> {
        let interf = hub.interface().clone();
        if !interf.direction.accepts_out() {
            return Ok(());
        }
        match interf.kind {
            HubKind::Pipe => {}
            HubKind::Channel => {
                self.attach_forwarder(hub, &interf.value, false)?;
            }
            HubKind::Value => {
                self.attach_forwarder(hub, &interf.value, true)?;
            }
        }
        Ok(())
    }

    /// Subscribe to a hub and forward every emission as a `push` frame.
    /// With `dedup` set, events whose id arrived from the peer are
    /// suppressed so value replication does not ping-pong.
    fn attach_forwarder(
        &self,
        hub: &Hub,
        slot: &Option<ItemInterface>,
        dedup: bool,
    ) -> Result<(), SessionError> {
        let slot = match slot {
            Some(slot) => slot.clone(),
            None => return Ok(()),
        };
        let weak = Arc::downgrade(&self.0);
        let hub_name = hub.name().to_string();
        hub.subscribe(
            &self.credentials(),
            Box::new(move |id, _creds, val| {
                let session = match weak.upgrade().map(ClientSession) {
                    Some(session) => session,
                    None => return,
                };
                if !session.active() {
                    return;
                }
                if dedup && session.was_incoming(id) {
                    return;
                }
                let wrapped = match session.wrap_value(&slot, val.clone()) {
                    Ok(wrapped) => wrapped,
                    Err(err) => {
                        tracing::warn!(target: "remote", hub = %hub_name, "push wrap failed: {err}");
                        return;
                    }
                };
                let _ = session.send(
                    SystemPayload::Push(PushBody {
                        hub: hub_name.clone(),
                        id: id.to_string(),
                        value: wrapped,
                    }),
                    "",
                    false,
                );
            }),
        )?;
        Ok(())
    }

    fn was_incoming(&self, id: &str) -> bool {
        self.0
            .incoming
            .lock()
            .expect("client lock poisoned")
            .contains(id)
    }

    // Value wrapping

    fn wire_middlewares(&self) -> Middlewares {
        let mut mws = Middlewares::new();
        mws.push(Arc::new(SystemWireMiddleware::new(self)));
        mws.push(Arc::new(InterfaceWireMiddleware::new(self.credentials())));
        mws.push(Arc::new(BlueprintWireMiddleware::new(self.credentials())));
        mws.push(Arc::new(CredentialsMiddleware));
        mws.push(Arc::new(IdMiddleware));
        mws
    }

    pub(crate) fn wrap_values(
        &self,
        interf: &ItemsInterface,
        vals: Vec<Item>,
    ) -> Result<Vec<Item>, BadValue> {
        interf.apply_middlewares(&self.wire_middlewares(), vals, true)
    }

    pub(crate) fn unwrap_values(
        &self,
        interf: &ItemsInterface,
        vals: Vec<Item>,
    ) -> Result<Vec<Item>, BadValue> {
        interf.apply_middlewares(&self.wire_middlewares(), vals, false)
    }

    pub(crate) fn wrap_value(&self, slot: &ItemInterface, val: Item) -> Result<Item, BadValue> {
        slot.apply_middlewares(&self.wire_middlewares(), val, true)
    }

    pub(crate) fn unwrap_value(&self, slot: &ItemInterface, val: Item) -> Result<Item, BadValue> {
        slot.apply_middlewares(&self.wire_middlewares(), val, false)
    }
}

impl std::fmt::Debug for ClientSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let role = if self.is_server() { "server" } else { "client" };
        write!(f, "ClientSession({}, {})", self.cid(), role)
    }
}
