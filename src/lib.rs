#![forbid(unsafe_code)]

pub mod config;
pub mod core;
pub mod error;
pub mod node;
pub mod remote;
pub mod store;
pub mod telemetry;

pub use error::Error;
pub type Result<T> = std::result::Result<T, Error>;

// Re-export core types at crate root for convenience
pub use crate::core::{
    BadValue, Credentials, HubDirection, HubInterface, HubKind, Id, Interface, Item,
    ItemInterface, ItemsInterface, LeafType, ObjectId, Sparkable, Status, SystemId, Type, User,
};
pub use crate::node::{
    Factory, FactoryExtension, Hub, HubError, HubHandle, Implementation, Middleware, Middlewares,
    NativeSystem, Node, NodeError, System,
};
pub use crate::remote::{ClientSession, Conn, Pool, Server, SessionError};
pub use crate::store::{Store, StoreError};
