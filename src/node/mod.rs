//! The node runtime: system registry, hub engine, middleware chain and
//! factory plumbing.

pub mod factory;
pub mod hub;
pub mod middleware;
pub mod node;
pub mod system;

use thiserror::Error;

use crate::core::item::BadValue;
use crate::store::StoreError;

pub use factory::{Factory, FactoryExtension, Implementation};
pub use hub::{HandlerFn, Hub, HubError, HubHandle, SubscribeFn};
pub use middleware::{default_middlewares, CredentialsMiddleware, IdMiddleware, NodeSystemMiddleware};
pub use node::Node;
pub use system::{
    NativeSystem, System, SystemOrigin, LIFECYCLE_CREATE, LIFECYCLE_DELETE, LIFECYCLE_LOAD,
    LIFECYCLE_LOG, LIFECYCLE_NAME, LIFECYCLE_START, LIFECYCLE_STATUS, LIFECYCLE_STOP,
    LIFECYCLE_STORE,
};

pub use crate::core::types::{Middleware, Middlewares};

#[derive(Error, Debug)]
pub enum NodeError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("misconfigured: {0}")]
    Misconfigured(String),
    #[error(transparent)]
    Value(#[from] BadValue),
    #[error(transparent)]
    Hub(#[from] HubError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("{0}")]
    Failed(String),
}
