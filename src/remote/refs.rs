//! Reference multiplexer: pairs outbound requests with their replies.
//!
//! Every frame that expects a response carries an 8-char alphanumeric
//! request token. The sender registers a single-shot reply slot under
//! that token before writing the frame; the reader delivers the echoed
//! payload to the slot and removes it. Draining the table cancels every
//! waiter.

use std::collections::HashMap;
use std::sync::Mutex;

use crossbeam::channel::{bounded, Receiver, Sender};

use crate::core::id::random_token;
use crate::remote::proto::NodePayload;

pub struct RefTable {
    slots: Mutex<HashMap<String, Sender<NodePayload>>>,
}

impl Default for RefTable {
    fn default() -> Self {
        Self::new()
    }
}

impl RefTable {
    pub fn new() -> RefTable {
        RefTable {
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Register a fresh reply slot and return its token with the
    /// receiving end. A dropped sender is observed as cancellation.
    pub fn register(&self) -> (String, Receiver<NodePayload>) {
        let token = random_token(8);
        let (tx, rx) = bounded(1);
        self.slots
            .lock()
            .expect("refs lock poisoned")
            .insert(token.clone(), tx);
        (token, rx)
    }

    /// Deliver a reply payload to the slot for `reference`, removing it.
    /// Returns false when no slot is registered under that token.
    pub fn resolve(&self, reference: &str, payload: NodePayload) -> bool {
        let slot = self
            .slots
            .lock()
            .expect("refs lock poisoned")
            .remove(reference);
        match slot {
            Some(tx) => {
                let _ = tx.send(payload);
                true
            }
            None => false,
        }
    }

    /// Remove a slot without delivering anything; the waiter observes
    /// cancellation.
    pub fn cancel(&self, reference: &str) {
        self.slots
            .lock()
            .expect("refs lock poisoned")
            .remove(reference);
    }

    /// Cancel every pending waiter.
    pub fn drain(&self) {
        self.slots.lock().expect("refs lock poisoned").clear();
    }

    pub fn pending(&self) -> usize {
        self.slots.lock().expect("refs lock poisoned").len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::proto::{ErrorBody, NodePayload};
    use std::time::Duration;

    #[test]
    fn reply_reaches_the_waiter_once() {
        let table = RefTable::new();
        let (token, rx) = table.register();
        assert_eq!(table.pending(), 1);

        assert!(table.resolve(
            &token,
            NodePayload::Error(ErrorBody {
                error: "e".to_string()
            })
        ));
        let payload = rx.recv_timeout(Duration::from_secs(1)).unwrap();
        assert!(matches!(payload, NodePayload::Error(_)));

        // Slot is single-shot.
        assert_eq!(table.pending(), 0);
        assert!(!table.resolve(&token, NodePayload::None));
    }

    #[test]
    fn drain_cancels_waiters() {
        let table = RefTable::new();
        let (_token, rx) = table.register();
        table.drain();
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
        assert_eq!(table.pending(), 0);
    }

    #[test]
    fn unknown_reference_is_reported() {
        let table = RefTable::new();
        assert!(!table.resolve("missing", NodePayload::None));
    }
}
