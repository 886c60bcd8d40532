//! Domain atoms consumed by the runtime: identities, the dynamic value
//! model, structural types, compiled interfaces, blueprints, lifecycle
//! status and credentials.

pub mod creds;
pub mod id;
pub mod interface;
pub mod item;
pub mod sparkable;
pub mod status;
pub mod types;

pub use creds::{Credentials, CredentialsError, User};
pub use id::{random_token, Id, ObjectId, SystemId};
pub use interface::{
    HubDirection, HubInterface, HubKind, Interface, InterfaceError, ItemInterface, ItemsInterface,
};
pub use item::{BadValue, Item};
pub use sparkable::Sparkable;
pub use status::{transition_for, Post, Status, Transition};
pub use types::{LeafType, Middleware, Middlewares, Type};
