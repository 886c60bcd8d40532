use thiserror::Error;

use crate::core::BadValue;
use crate::node::{HubError, NodeError};
use crate::remote::{ProtoError, SessionError};
use crate::store::StoreError;

/// Crate-level convenience error.
///
/// A thin wrapper over the per-module errors, not a replacement for them:
/// library APIs return the specific error of their module.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    Value(#[from] BadValue),

    #[error(transparent)]
    Hub(#[from] HubError),

    #[error(transparent)]
    Node(#[from] NodeError),

    #[error(transparent)]
    Proto(#[from] ProtoError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Store(#[from] StoreError),
}
