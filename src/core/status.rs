//! Lifecycle status bitmask.
//!
//! Phases are not mutually exclusive: a system is commonly Loaded and
//! Running at the same time. Consumers that need a single phase must
//! project the mask themselves.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Status(u32);

impl Status {
    pub const IMPLEMENTING: Status = Status(1 << 0);
    pub const IMPLEMENTED: Status = Status(1 << 1);
    pub const CREATING: Status = Status(1 << 2);
    pub const CREATED: Status = Status(1 << 3);
    pub const LOADING: Status = Status(1 << 4);
    pub const LOADED: Status = Status(1 << 5);
    pub const STOPPING: Status = Status(1 << 6);
    pub const STARTING: Status = Status(1 << 7);
    pub const RUNNING: Status = Status(1 << 8);
    pub const DELETING: Status = Status(1 << 9);
    pub const DELETED: Status = Status(1 << 10);

    pub fn empty() -> Status {
        Status(0)
    }

    pub fn from_bits(bits: u32) -> Status {
        Status(bits)
    }

    pub fn bits(&self) -> u32 {
        self.0
    }

    pub fn contains(&self, other: Status) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn set(&mut self, other: Status) {
        self.0 |= other.0;
    }

    pub fn clear(&mut self, other: Status) {
        self.0 &= !other.0;
    }

    pub fn as_i64(&self) -> i64 {
        self.0 as i64
    }
}

impl fmt::Debug for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NAMES: &[(Status, &str)] = &[
            (Status::IMPLEMENTING, "Implementing"),
            (Status::IMPLEMENTED, "Implemented"),
            (Status::CREATING, "Creating"),
            (Status::CREATED, "Created"),
            (Status::LOADING, "Loading"),
            (Status::LOADED, "Loaded"),
            (Status::STOPPING, "Stopping"),
            (Status::STARTING, "Starting"),
            (Status::RUNNING, "Running"),
            (Status::DELETING, "Deleting"),
            (Status::DELETED, "Deleted"),
        ];
        let mut names = Vec::new();
        for (bit, name) in NAMES {
            if self.contains(*bit) {
                names.push(*name);
            }
        }
        if names.is_empty() {
            write!(f, "Status(0)")
        } else {
            write!(f, "Status({})", names.join("|"))
        }
    }
}

/// Phase bits around one lifecycle event: the pre bit is set while the
/// callbacks run and cleared afterwards even on failure; the post action
/// applies only on success.
#[derive(Clone, Copy, Debug)]
pub struct Transition {
    pub pre: Status,
    pub post: Post,
}

#[derive(Clone, Copy, Debug)]
pub enum Post {
    Set(Status),
    Clear(Status),
}

/// Lifecycle transition table. Meta events (name, status, log) have no
/// entry: they do not drive the status machine.
pub fn transition_for(event: &str) -> Option<Transition> {
    match event {
        "create" => Some(Transition {
            pre: Status::CREATING,
            post: Post::Set(Status::CREATED),
        }),
        "load" => Some(Transition {
            pre: Status::LOADING,
            post: Post::Set(Status::LOADED),
        }),
        "start" => Some(Transition {
            pre: Status::STARTING,
            post: Post::Set(Status::RUNNING),
        }),
        "stop" => Some(Transition {
            pre: Status::STOPPING,
            post: Post::Clear(Status::RUNNING),
        }),
        "delete" => Some(Transition {
            pre: Status::DELETING,
            post: Post::Set(Status::DELETED),
        }),
        _ => None,
    }
}
