//! The websocket endpoint: one HTTP path upgrades to a full-duplex text
//! transport. Origin checking is permissive.

use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tungstenite::protocol::{Role, WebSocket};

use crate::remote::pool::Pool;
use crate::remote::proto::WS_PATH;
use crate::remote::SessionError;

pub struct Server {
    local_addr: SocketAddr,
    pool: Pool,
    stop: Arc<AtomicBool>,
    accept_thread: Mutex<Option<JoinHandle<()>>>,
}

impl Server {
    /// Bind the listener and start accepting peers in the background.
    pub fn bind(pool: &Pool, addr: &str) -> Result<Server, SessionError> {
        let listener = TcpListener::bind(addr)?;
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;

        let stop = Arc::new(AtomicBool::new(false));
        let accept_stop = stop.clone();
        let accept_pool = pool.clone();
        let accept_thread = std::thread::spawn(move || {
            accept_loop(listener, accept_pool, accept_stop);
        });

        tracing::info!(target: "remote", %local_addr, "listening");
        Ok(Server {
            local_addr,
            pool: pool.clone(),
            stop,
            accept_thread: Mutex::new(Some(accept_thread)),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The websocket address peers can dial.
    pub fn address(&self) -> String {
        format!("ws://{}", self.local_addr)
    }

    /// Stop accepting and close every peer link of the pool.
    pub fn shutdown(&self) {
        self.stop.store(true, Ordering::SeqCst);
        self.pool.shutdown();
        if let Some(handle) = self
            .accept_thread
            .lock()
            .expect("server lock poisoned")
            .take()
        {
            let _ = handle.join();
        }
    }
}

fn accept_loop(listener: TcpListener, pool: Pool, stop: Arc<AtomicBool>) {
    loop {
        if stop.load(Ordering::SeqCst) {
            return;
        }
        match listener.accept() {
            Ok((stream, peer)) => {
                let pool = pool.clone();
                std::thread::spawn(move || {
                    if let Err(err) = accept_connection(&pool, stream) {
                        tracing::debug!(target: "remote", %peer, "accept failed: {err}");
                    } else {
                        tracing::info!(target: "remote", %peer, "accepted node");
                    }
                });
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(Duration::from_millis(25));
            }
            Err(err) => {
                tracing::warn!(target: "remote", "listener failed: {err}");
                return;
            }
        }
    }
}

fn accept_connection(pool: &Pool, stream: TcpStream) -> Result<(), SessionError> {
    stream.set_nonblocking(false)?;

    let check_path = |request: &Request, response: Response| {
        if request.uri().path() == WS_PATH {
            Ok(response)
        } else {
            let reject = tungstenite::http::Response::builder()
                .status(404)
                .body(None)
                .expect("static response");
            Err::<Response, ErrorResponse>(reject)
        }
    };
    let ws = tungstenite::accept_hdr(stream, check_path)
        .map_err(|err| SessionError::Other(format!("websocket upgrade failed: {err}")))?;

    let raw = ws.get_ref().try_clone()?;
    let socket = ws.get_ref().try_clone()?;
    let writer = WebSocket::from_raw_socket(raw, Role::Server, None);
    pool.adopt_transport(ws, writer, socket);
    Ok(())
}
