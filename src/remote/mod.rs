//! The remote-system RPC fabric: wire codec, reference multiplexer,
//! connection supervisor, client sessions, connection pool and the
//! websocket endpoint.

pub mod client;
pub mod conn;
pub mod pool;
pub mod proto;
pub mod refs;
pub mod server;
pub mod wrappers;

use thiserror::Error;

use crate::core::item::BadValue;
use crate::node::{HubError, NodeError};

pub use client::ClientSession;
pub use conn::Conn;
pub use pool::{ClientRecord, Pool, SessionExt};
pub use proto::{ProtoError, API_VERSION, IMPL_ID, WS_PATH};
pub use refs::RefTable;
pub use server::Server;

#[derive(Error, Debug)]
pub enum SessionError {
    /// A call on a session whose connection is down.
    #[error("client inactive: {0}")]
    Inactive(String),
    /// The reply slot was closed without a payload (connection loss).
    #[error("caller canceled")]
    Canceled,
    /// An error payload sent by the peer.
    #[error("{0}")]
    Remote(String),
    #[error(transparent)]
    Protocol(#[from] ProtoError),
    #[error("not found: {0}")]
    NotFound(String),
    #[error(transparent)]
    Hub(#[from] HubError),
    #[error(transparent)]
    Value(#[from] BadValue),
    #[error(transparent)]
    Node(#[from] NodeError),
    #[error(transparent)]
    Store(#[from] crate::store::StoreError),
    #[error("transport: {0}")]
    Ws(#[from] tungstenite::Error),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Other(String),
}
