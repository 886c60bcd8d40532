//! Connection supervisor: one peer link, multiplexing many client
//! sessions and many in-flight requests.
//!
//! The read loop handles control frames (handshake, heartbeat,
//! new_client, error acks) inline so their ordering on the wire is
//! preserved; client frames run on their own threads. A handshake for a
//! peer name that is already connected takes the existing connection
//! over: it adopts the client map and cancels the old connection's
//! pending references.

use std::collections::HashMap;
use std::net::{Shutdown, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use rand::Rng;
use tungstenite::protocol::{Role, WebSocket};
use tungstenite::Message;

use crate::core::id::random_token;
use crate::remote::client::ClientSession;
use crate::remote::pool::{Pool, PoolShared};
use crate::remote::proto::{
    decode_frame, encode_frame, ErrorBody, Handshake, Heartbeat, NewClient, NodeFrame, NodePayload,
    ProtoError, API_VERSION, IMPL_ID, WS_PATH,
};
use crate::remote::refs::RefTable;
use crate::remote::SessionError;

pub(crate) type Ws = WebSocket<TcpStream>;

#[derive(Clone, Debug, Default)]
pub(crate) struct ConnState {
    pub node: String,
    pub version: String,
    pub impl_id: String,
    pub remote_address: String,
}

pub(crate) struct ConnShared {
    pool: Weak<PoolShared>,
    state: Mutex<ConnState>,
    clients: Mutex<HashMap<String, ClientSession>>,
    pub(crate) refs: RefTable,
    active: AtomicBool,
    // Set when another connection took this one over; suppresses the
    // reconnect loop for the orphaned link.
    superseded: AtomicBool,
    // At most one reconnect loop per connection.
    reconnecting: AtomicBool,
    writer: Mutex<Option<Ws>>,
    socket: Mutex<Option<TcpStream>>,
    beat_count: AtomicI64,
    remote_beat: Mutex<(i64, f64)>,
}

/// A connection to a peer node. Cheap to clone; all state is shared.
#[derive(Clone)]
pub struct Conn(pub(crate) Arc<ConnShared>);

impl Conn {
    pub(crate) fn new(pool: &Pool, remote_address: &str) -> Conn {
        Conn(Arc::new(ConnShared {
            pool: pool.downgrade(),
            state: Mutex::new(ConnState {
                remote_address: remote_address.to_string(),
                ..ConnState::default()
            }),
            clients: Mutex::new(HashMap::new()),
            refs: RefTable::new(),
            active: AtomicBool::new(false),
            superseded: AtomicBool::new(false),
            reconnecting: AtomicBool::new(false),
            writer: Mutex::new(None),
            socket: Mutex::new(None),
            beat_count: AtomicI64::new(0),
            remote_beat: Mutex::new((0, 0.0)),
        }))
    }

    pub(crate) fn pool(&self) -> Result<Pool, SessionError> {
        self.0
            .pool
            .upgrade()
            .map(Pool::from_shared)
            .ok_or_else(|| SessionError::Inactive("pool gone".to_string()))
    }

    /// Name of the peer node, known after the handshake.
    pub fn node_name(&self) -> String {
        self.0.state.lock().expect("conn lock poisoned").node.clone()
    }

    pub fn remote_address(&self) -> String {
        self.0
            .state
            .lock()
            .expect("conn lock poisoned")
            .remote_address
            .clone()
    }

    pub fn active(&self) -> bool {
        self.0.active.load(Ordering::SeqCst)
    }

    pub(crate) fn state(&self) -> ConnState {
        self.0.state.lock().expect("conn lock poisoned").clone()
    }

    pub(crate) fn set_state(&self, state: ConnState) {
        *self.0.state.lock().expect("conn lock poisoned") = state;
    }

    pub fn last_heartbeat(&self) -> (i64, f64) {
        *self.0.remote_beat.lock().expect("conn lock poisoned")
    }

    pub(crate) fn register_client(&self, session: &ClientSession) {
        let mut clients = self.0.clients.lock().expect("conn lock poisoned");
        clients.insert(session.cid(), session.clone());
    }

    pub(crate) fn get_client(&self, cid: &str) -> Option<ClientSession> {
        let clients = self.0.clients.lock().expect("conn lock poisoned");
        clients.get(cid).cloned()
    }

    pub fn clients(&self) -> Vec<ClientSession> {
        let clients = self.0.clients.lock().expect("conn lock poisoned");
        clients.values().cloned().collect()
    }

    /// Create a fresh client session over this connection: a blank local
    /// system with a "ws" origin, announced to the peer with `new_client`.
    /// The caller connects it to a concrete remote system afterwards.
    pub fn add_client(&self) -> Result<ClientSession, SessionError> {
        let pool = self.pool()?;
        let node = pool.node();
        let sys = node.blank_system("")?;
        let session = ClientSession::new(
            Some(self),
            &random_token(8),
            false,
            &self.node_name(),
            Some(sys.clone()),
            node.middlewares(),
        );
        session.install_extension();
        let origin = node.detached_system("")?;
        sys.add_origin("ws", origin);

        self.register_client(&session);
        self.connect_client(&session)?;
        Ok(session)
    }

    /// Announce a session token to the peer and wait for the ack.
    pub(crate) fn connect_client(&self, session: &ClientSession) -> Result<(), SessionError> {
        let rx = self
            .send(
                NodePayload::NewClient(NewClient {
                    client: session.cid(),
                }),
                "",
                true,
            )?
            .ok_or(SessionError::Canceled)?;
        self.await_reply(rx)?;
        Ok(())
    }

    /// Write one frame. When `returns` is set and no reference is given, a
    /// reply slot is registered before the write and its receiver is
    /// returned.
    pub(crate) fn send(
        &self,
        payload: NodePayload,
        reference: &str,
        returns: bool,
    ) -> Result<Option<crossbeam::channel::Receiver<NodePayload>>, SessionError> {
        let mut request = String::new();
        let mut rx = None;
        if returns && reference.is_empty() {
            let (token, receiver) = self.0.refs.register();
            request = token;
            rx = Some(receiver);
        }

        let frame = NodeFrame {
            request: request.clone(),
            reference: reference.to_string(),
            payload,
        };
        let text = encode_frame(&frame)?;

        let mut writer = self.0.writer.lock().expect("conn lock poisoned");
        let result = match writer.as_mut() {
            Some(ws) => ws.send(Message::Text(text)).map_err(SessionError::from),
            None => Err(SessionError::Inactive("no transport".to_string())),
        };
        drop(writer);

        if let Err(err) = result {
            if !request.is_empty() {
                self.0.refs.cancel(&request);
            }
            return Err(err);
        }
        Ok(rx)
    }

    pub(crate) fn send_error(&self, message: &str, reference: &str) {
        let _ = self.send(
            NodePayload::Error(ErrorBody {
                error: message.to_string(),
            }),
            reference,
            false,
        );
    }

    /// Block on a reply slot. Exactly one of payload, remote error or
    /// cancellation is observed.
    pub(crate) fn await_reply(
        &self,
        rx: crossbeam::channel::Receiver<NodePayload>,
    ) -> Result<NodePayload, SessionError> {
        match rx.recv() {
            Err(_) => Err(SessionError::Canceled),
            Ok(NodePayload::Error(body)) => Err(SessionError::Remote(body.error)),
            Ok(payload) => Ok(payload),
        }
    }

    /// Install the transport halves and start the read loop and the
    /// heartbeat ticker.
    pub(crate) fn attach_transport(&self, reader: Ws, writer: Ws, socket: TcpStream) {
        {
            let mut slot = self.0.writer.lock().expect("conn lock poisoned");
            *slot = Some(writer);
        }
        {
            let mut slot = self.0.socket.lock().expect("conn lock poisoned");
            *slot = Some(socket);
        }
        let conn = self.clone();
        std::thread::spawn(move || conn.read_loop(reader));
        let conn = self.clone();
        std::thread::spawn(move || conn.heartbeat_loop());
    }

    /// Dial the peer's websocket endpoint and perform the handshake.
    pub(crate) fn dial(&self) -> Result<(), SessionError> {
        let address = self.remote_address();
        if address.is_empty() {
            return Err(SessionError::Inactive("no remote address".to_string()));
        }
        let host = address
            .strip_prefix("ws://")
            .unwrap_or(address.as_str())
            .trim_end_matches('/');
        let url = format!("ws://{}{}", host, WS_PATH);

        let stream = TcpStream::connect(host)?;
        let (ws, _response) = tungstenite::client(url.as_str(), stream)
            .map_err(|err| SessionError::Other(format!("websocket connect failed: {err}")))?;
        let raw = ws.get_ref().try_clone()?;
        let socket = ws.get_ref().try_clone()?;
        let writer = WebSocket::from_raw_socket(raw, Role::Client, None);
        self.attach_transport(ws, writer, socket);

        let pool = self.pool()?;
        let rx = self
            .send(
                NodePayload::Handshake(Handshake {
                    version: API_VERSION.to_string(),
                    impl_id: IMPL_ID.to_string(),
                    node: pool.node().name(),
                    address: pool.address(),
                }),
                "",
                true,
            )?
            .ok_or(SessionError::Canceled)?;
        self.await_reply(rx)?;
        self.0.active.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn read_loop(&self, mut reader: Ws) {
        loop {
            match reader.read() {
                Ok(Message::Text(text)) => match decode_frame(&text) {
                    Ok(frame) => self.dispatch(frame),
                    Err(err) => {
                        tracing::warn!(target: "remote", node = %self.node_name(), "protocol error: {err}");
                        break;
                    }
                },
                Ok(Message::Close(_)) => break,
                Ok(_) => continue,
                Err(err) => {
                    tracing::debug!(target: "remote", node = %self.node_name(), "read failed: {err}");
                    break;
                }
            }
        }
        self.disconnected();
    }

    fn dispatch(&self, frame: NodeFrame) {
        // Client frames can block on user code; they get their own
        // thread. Control frames stay on the read loop: their wire order
        // is the link-ready condition for session replays.
        if matches!(frame.payload, NodePayload::Client(_)) {
            let conn = self.clone();
            std::thread::spawn(move || conn.handle_frame(frame));
        } else {
            self.handle_frame(frame);
        }
    }

    fn handle_frame(&self, frame: NodeFrame) {
        let result = self.handle_payload(&frame.payload, &frame.request);
        if !frame.reference.is_empty() && !self.0.refs.resolve(&frame.reference, frame.payload) {
            tracing::debug!(target: "remote", reference = %frame.reference, "reference not found");
        }
        if let Err(err) = result {
            tracing::warn!(target: "remote", node = %self.node_name(), "frame handling failed: {err}");
            if !frame.request.is_empty() {
                self.send_error(&err.to_string(), &frame.request);
            }
        }
    }

    fn handle_payload(&self, payload: &NodePayload, request: &str) -> Result<(), SessionError> {
        match payload {
            NodePayload::None => Ok(()),
            NodePayload::Error(body) => Err(SessionError::Remote(body.error.clone())),
            NodePayload::Heartbeat(beat) => {
                let mut remote = self.0.remote_beat.lock().expect("conn lock poisoned");
                *remote = (beat.count, beat.time);
                Ok(())
            }
            NodePayload::Handshake(handshake) => self.handle_handshake(handshake, request),
            NodePayload::NewClient(body) => {
                let pool = self.pool()?;
                pool.accept_client(self, &body.client)?;
                self.send(NodePayload::None, request, false)?;
                Ok(())
            }
            NodePayload::Client(frame) => {
                let session = self
                    .get_client(&frame.client)
                    .ok_or_else(|| SessionError::NotFound(format!("client not found: {}", frame.client)))?;
                session.handle(&frame.payload, request)
            }
        }
    }

    fn handle_handshake(&self, handshake: &Handshake, request: &str) -> Result<(), SessionError> {
        if handshake.version != API_VERSION {
            return Err(SessionError::Protocol(ProtoError::UnsupportedVersion(
                handshake.version.clone(),
            )));
        }
        if handshake.impl_id.is_empty() {
            return Err(SessionError::Protocol(ProtoError::MissingImplId));
        }

        {
            let mut state = self.0.state.lock().expect("conn lock poisoned");
            state.node = handshake.node.clone();
            state.version = handshake.version.clone();
            state.impl_id = handshake.impl_id.clone();
            state.remote_address = handshake.address.clone();
        }
        self.0.active.store(true, Ordering::SeqCst);

        let pool = self.pool()?;
        let mut replay_adopted = false;
        if let Some(old) = pool.install_conn(&handshake.node, self) {
            self.take_over(&old);
            // The passive side cannot redial; it replays the adopted
            // sessions through this fresh link.
            if handshake.address.is_empty() {
                replay_adopted = true;
            }
        }

        if !request.is_empty() {
            self.send(
                NodePayload::Handshake(Handshake {
                    version: API_VERSION.to_string(),
                    impl_id: IMPL_ID.to_string(),
                    node: pool.node().name(),
                    address: pool.address(),
                }),
                request,
                false,
            )?;
        }

        let queued = pool.take_queued(&handshake.node);
        if replay_adopted || !queued.is_empty() {
            let conn = self.clone();
            std::thread::spawn(move || {
                if replay_adopted {
                    if let Err(err) = conn.reconnect_clients() {
                        tracing::warn!(target: "remote", "session replay failed: {err}");
                    }
                }
                for session in queued {
                    session.set_conn(&conn);
                    if session.is_server() {
                        continue;
                    }
                    conn.register_client(&session);
                    if let Err(err) = conn
                        .connect_client(&session)
                        .and_then(|_| session.connect_existing())
                    {
                        tracing::warn!(target: "remote", cid = %session.cid(), "queued session failed: {err}");
                    }
                }
            });
        }
        Ok(())
    }

    /// Adopt another connection's sessions and cancel its waiters.
    fn take_over(&self, old: &Conn) {
        if Arc::ptr_eq(&self.0, &old.0) {
            return;
        }
        let adopted: Vec<ClientSession> = {
            let mut theirs = old.0.clients.lock().expect("conn lock poisoned");
            theirs.drain().map(|(_, session)| session).collect()
        };
        {
            let mut ours = self.0.clients.lock().expect("conn lock poisoned");
            for session in &adopted {
                session.set_conn(self);
                ours.insert(session.cid(), session.clone());
            }
        }
        // The old link is left to die on its own; closing it here would
        // race the peer's matching take-over. It is merely deactivated so
        // nothing routes through it anymore.
        old.0.superseded.store(true, Ordering::SeqCst);
        old.0.active.store(false, Ordering::SeqCst);
        old.0.refs.drain();
    }

    /// Replay `new_client` + `conn` for every non-server session so
    /// handlers and subscriptions resume.
    pub(crate) fn reconnect_clients(&self) -> Result<(), SessionError> {
        for session in self.clients() {
            if session.is_server() {
                continue;
            }
            self.connect_client(&session)?;
            session.connect_existing()?;
        }
        Ok(())
    }

    fn heartbeat_loop(&self) {
        let interval = match self.pool() {
            Ok(pool) => pool.config().heartbeat_interval(),
            Err(_) => return,
        };
        loop {
            let count = self.0.beat_count.fetch_add(1, Ordering::SeqCst) + 1;
            let time = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs_f64())
                .unwrap_or(0.0);
            if self
                .send(NodePayload::Heartbeat(Heartbeat { count, time }), "", false)
                .is_err()
            {
                return;
            }
            let mut slept = Duration::ZERO;
            while slept < interval {
                let chunk = Duration::from_millis(500).min(interval - slept);
                std::thread::sleep(chunk);
                slept += chunk;
                let writer_gone = self
                    .0
                    .writer
                    .lock()
                    .expect("conn lock poisoned")
                    .is_none();
                if writer_gone {
                    return;
                }
            }
        }
    }

    pub(crate) fn close_transport(&self) {
        if let Some(writer) = self.0.writer.lock().expect("conn lock poisoned").take() {
            drop(writer);
        }
        if let Some(socket) = self.0.socket.lock().expect("conn lock poisoned").take() {
            let _ = socket.shutdown(Shutdown::Both);
        }
    }

    /// Post-read-loop cleanup: cancel waiters, notify sessions, schedule
    /// the reconnect when this side knows the peer's address.
    fn disconnected(&self) {
        self.close_transport();
        self.0.active.store(false, Ordering::SeqCst);
        self.0.refs.drain();
        tracing::info!(target: "remote", node = %self.node_name(), "disconnected");

        for session in self.clients() {
            if session.is_server() {
                continue;
            }
            session.connection_lost();
        }

        let pool = match self.pool() {
            Ok(pool) => pool,
            Err(_) => return,
        };
        if pool.is_shutdown()
            || self.0.superseded.load(Ordering::SeqCst)
            || self.remote_address().is_empty()
        {
            return;
        }
        let conn = self.clone();
        std::thread::spawn(move || conn.reconnect_loop());
    }

    /// Redial with multiplicative jittered backoff until the pool shuts
    /// down: `wait' = wait * (rand(0,1) + 1) + 1ms`.
    pub(crate) fn reconnect_loop(&self) {
        if self.0.reconnecting.swap(true, Ordering::SeqCst) {
            return;
        }
        self.reconnect_with_backoff();
        self.0.reconnecting.store(false, Ordering::SeqCst);
    }

    fn reconnect_with_backoff(&self) {
        let mut wait = match self.pool() {
            Ok(pool) => pool.config().reconnect_initial(),
            Err(_) => return,
        };
        loop {
            match self.pool() {
                Ok(pool) if !pool.is_shutdown() => {}
                _ => return,
            }
            std::thread::sleep(wait);

            match self.dial() {
                Ok(()) => {
                    if let Err(err) = self.reconnect_clients() {
                        tracing::warn!(target: "remote", "client replay failed: {err}");
                    }
                    return;
                }
                Err(err) => {
                    tracing::debug!(target: "remote", address = %self.remote_address(), "reconnect failed: {err}");
                }
            }

            let factor = rand::rng().random::<f64>() + 1.0;
            wait = Duration::from_secs_f64(wait.as_secs_f64() * factor) + Duration::from_millis(1);
        }
    }
}
