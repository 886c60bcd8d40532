//! The connection pool: maintains connections to peer nodes, queues
//! sessions for peers that are not linked yet, and doubles as the "ws"
//! factory that revives persisted client systems.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::config::RemoteConfig;
use crate::core::creds::Credentials;
use crate::core::id::SystemId;
use crate::node::factory::{Factory, FactoryExtension, Implementation};
use crate::node::node::Node;
use crate::node::system::{NativeSystem, System};
use crate::node::NodeError;
use crate::remote::client::{ClientSession, ClientShared};
use crate::remote::conn::{Conn, ConnState, Ws};
use crate::remote::SessionError;

pub(crate) struct PoolShared {
    node: Node,
    config: RemoteConfig,
    address: Mutex<String>,
    conns: Mutex<HashMap<String, Conn>>,
    queued: Mutex<HashMap<String, HashMap<String, ClientSession>>>,
    shutdown: AtomicBool,
}

/// Maintains this node's connections to other nodes. Cheap to clone; all
/// state is shared.
#[derive(Clone)]
pub struct Pool(Arc<PoolShared>);

impl Pool {
    pub fn new(node: Node, address: &str) -> Pool {
        Pool::with_config(node, address, RemoteConfig::default())
    }

    pub fn with_config(node: Node, address: &str, config: RemoteConfig) -> Pool {
        Pool(Arc::new(PoolShared {
            node,
            config,
            address: Mutex::new(address.to_string()),
            conns: Mutex::new(HashMap::new()),
            queued: Mutex::new(HashMap::new()),
            shutdown: AtomicBool::new(false),
        }))
    }

    pub(crate) fn from_shared(shared: Arc<PoolShared>) -> Pool {
        Pool(shared)
    }

    pub(crate) fn downgrade(&self) -> Weak<PoolShared> {
        Arc::downgrade(&self.0)
    }

    pub fn node(&self) -> Node {
        self.0.node.clone()
    }

    pub fn config(&self) -> RemoteConfig {
        self.0.config.clone()
    }

    /// Advertised websocket address of this node, empty on passive-only
    /// nodes.
    pub fn address(&self) -> String {
        self.0.address.lock().expect("pool lock poisoned").clone()
    }

    pub fn set_address(&self, address: &str) {
        *self.0.address.lock().expect("pool lock poisoned") = address.to_string();
    }

    pub fn is_shutdown(&self) -> bool {
        self.0.shutdown.load(Ordering::SeqCst)
    }

    /// Dial a peer node; the connection is installed in the table once
    /// the peer's handshake arrives.
    pub fn connect_node(&self, address: &str) -> Result<Conn, SessionError> {
        let conn = Conn::new(self, address);
        conn.dial()?;
        Ok(conn)
    }

    /// Adopt an accepted websocket as a supervised connection.
    pub(crate) fn adopt_transport(&self, reader: Ws, writer: Ws, socket: std::net::TcpStream) -> Conn {
        let conn = Conn::new(self, "");
        conn.attach_transport(reader, writer, socket);
        conn
    }

    pub fn get_conn_by_name(&self, name: &str) -> Option<Conn> {
        let conns = self.0.conns.lock().expect("pool lock poisoned");
        conns.get(name).cloned()
    }

    pub fn get_conn_by_address(&self, address: &str) -> Option<Conn> {
        let conns = self.0.conns.lock().expect("pool lock poisoned");
        conns
            .values()
            .find(|conn| conn.remote_address() == address)
            .cloned()
    }

    pub fn conns(&self) -> Vec<Conn> {
        let conns = self.0.conns.lock().expect("pool lock poisoned");
        conns.values().cloned().collect()
    }

    /// Install a connection under its peer name, returning the one it
    /// replaces (the take-over victim), if any.
    pub(crate) fn install_conn(&self, name: &str, conn: &Conn) -> Option<Conn> {
        let mut conns = self.0.conns.lock().expect("pool lock poisoned");
        let previous = conns.insert(name.to_string(), conn.clone());
        previous.filter(|prev| !Arc::ptr_eq(&prev.0, &conn.0))
    }

    pub(crate) fn queue_client(&self, node_name: &str, session: ClientSession) {
        let mut queued = self.0.queued.lock().expect("pool lock poisoned");
        queued
            .entry(node_name.to_string())
            .or_default()
            .insert(session.cid(), session);
    }

    pub(crate) fn take_queued(&self, node_name: &str) -> Vec<ClientSession> {
        let mut queued = self.0.queued.lock().expect("pool lock poisoned");
        queued
            .remove(node_name)
            .map(|sessions| sessions.into_values().collect())
            .unwrap_or_default()
    }

    /// Server-role session for a peer-announced token.
    pub(crate) fn accept_client(&self, conn: &Conn, cid: &str) -> Result<ClientSession, SessionError> {
        let session = ClientSession::new(
            Some(conn),
            cid,
            true,
            &conn.node_name(),
            None,
            self.node().middlewares(),
        );
        conn.register_client(&session);
        Ok(session)
    }

    /// Re-create a session for a persisted client system: bind it to the
    /// peer's connection when one exists, queue it otherwise.
    pub fn reconnect_client(
        &self,
        node_name: &str,
        cid: &str,
        remote_id: SystemId,
        creds: Credentials,
        native: &NativeSystem,
        server: bool,
    ) -> Result<ClientSession, SessionError> {
        match self.get_conn_by_name(node_name) {
            None => {
                let session = ClientSession::new(
                    None,
                    cid,
                    server,
                    node_name,
                    Some(native.clone()),
                    self.node().middlewares(),
                );
                session.set_remote_id(remote_id);
                session.apply_credentials(creds);
                session.set_defined();
                session.install_extension();
                self.queue_client(node_name, session.clone());
                Ok(session)
            }
            Some(conn) => {
                let session = match conn.get_client(cid) {
                    Some(session) => {
                        session.set_conn(&conn);
                        session.set_system(native.clone());
                        session.apply_credentials(creds);
                        session.set_remote_id(remote_id);
                        session
                    }
                    None => {
                        let session = ClientSession::new(
                            Some(&conn),
                            cid,
                            server,
                            node_name,
                            Some(native.clone()),
                            self.node().middlewares(),
                        );
                        session.set_remote_id(remote_id);
                        session.apply_credentials(creds);
                        session.set_defined();
                        conn.register_client(&session);
                        session
                    }
                };
                session.install_extension();
                if !session.is_server() {
                    conn.connect_client(&session)?;
                    session.connect_existing()?;
                }
                Ok(session)
            }
        }
    }

    /// Halt reconnect loops and close every peer link. Systems stay on
    /// the node until it is dropped.
    pub fn shutdown(&self) {
        self.0.shutdown.store(true, Ordering::SeqCst);
        for conn in self.conns() {
            conn.close_transport();
        }
    }

    // Persistence

    pub fn store_into(&self, st: &crate::store::Store) -> Result<(), SessionError> {
        st.kv_set("properties", "address", &self.address())?;
        for conn in self.conns() {
            let state = conn.state();
            if state.node.is_empty() {
                continue;
            }
            let child = crate::store::Store::new(&state.node);
            child.kv_set("conn", "remoteAddress", &state.remote_address)?;
            child.kv_set("conn", "node", &state.node)?;
            child.kv_set("conn", "version", &state.version)?;
            child.kv_set("conn", "implId", &state.impl_id)?;
            st.child_put("conns", child)?;
        }
        Ok(())
    }

    /// Restore persisted peer links; dialer-side connections reconnect in
    /// the background.
    pub fn load_from(&self, st: &crate::store::Store) -> Result<(), SessionError> {
        if let Some(address) = st.kv_get("properties", "address") {
            self.set_address(&address);
        }
        for child in st.children("conns") {
            let state = ConnState {
                node: child.kv_get("conn", "node").unwrap_or_default(),
                version: child.kv_get("conn", "version").unwrap_or_default(),
                impl_id: child.kv_get("conn", "implId").unwrap_or_default(),
                remote_address: child.kv_get("conn", "remoteAddress").unwrap_or_default(),
            };
            let remote_address = state.remote_address.clone();
            let conn = Conn::new(self, &remote_address);
            conn.set_state(state);
            if !remote_address.is_empty() {
                let conn = conn.clone();
                std::thread::spawn(move || conn.reconnect_loop());
            }
        }
        Ok(())
    }
}

/// Persisted form of a client session.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ClientRecord {
    #[serde(default)]
    pub cid: String,
    #[serde(default)]
    pub node: String,
    #[serde(rename = "remoteId", default)]
    pub remote_id: SystemId,
    #[serde(default)]
    pub credentials: Credentials,
    #[serde(default)]
    pub server: bool,
}

struct ClientImpl {
    record: ClientRecord,
    pool: Weak<PoolShared>,
}

impl Implementation for ClientImpl {
    fn implement(&self, _node: &Node, sys: &System) -> Result<(), NodeError> {
        let pool = self
            .pool
            .upgrade()
            .map(Pool::from_shared)
            .ok_or_else(|| NodeError::Misconfigured("connection pool gone".to_string()))?;
        pool.reconnect_client(
            &self.record.node,
            &self.record.cid,
            self.record.remote_id,
            self.record.credentials.clone(),
            sys.native(),
            self.record.server,
        )
        .map_err(|err| NodeError::Failed(err.to_string()))?;
        Ok(())
    }

    fn to_value(&self) -> Option<JsonValue> {
        serde_json::to_value(&self.record).ok()
    }
}

impl Factory for Pool {
    fn name(&self) -> &'static str {
        "ws"
    }

    fn implementation(&self, raw: Option<&JsonValue>) -> Result<Box<dyn Implementation>, NodeError> {
        let record = match raw {
            Some(raw) => serde_json::from_value(raw.clone())
                .map_err(|err| NodeError::Misconfigured(format!("not a ws implementation: {err}")))?,
            None => ClientRecord::default(),
        };
        Ok(Box::new(ClientImpl {
            record,
            pool: self.downgrade(),
        }))
    }
}

/// The `extensions["ws"]` record of a session-backed system, exposing the
/// session to persistence.
pub struct SessionExt {
    session: Weak<ClientShared>,
}

impl SessionExt {
    pub(crate) fn new(session: &ClientSession) -> SessionExt {
        SessionExt {
            session: Arc::downgrade(&session.0),
        }
    }

    pub fn session(&self) -> Option<ClientSession> {
        self.session.upgrade().map(ClientSession)
    }
}

impl FactoryExtension for SessionExt {
    fn implementation(&self) -> Option<Box<dyn Implementation>> {
        let session = self.session()?;
        let pool = session
            .conn()
            .and_then(|conn| conn.pool().ok())
            .map(|pool| pool.downgrade())
            .unwrap_or_default();
        Some(Box::new(ClientImpl {
            record: ClientRecord {
                cid: session.cid(),
                node: session.remote_node(),
                remote_id: session.remote_id(),
                credentials: session.credentials(),
                server: session.is_server(),
            },
            pool,
        }))
    }
}
