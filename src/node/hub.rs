//! The hub engine: per-hub state and semantics for pipes, channels and
//! value hubs.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, Weak};

use thiserror::Error;

use crate::core::creds::Credentials;
use crate::core::id::random_token;
use crate::core::interface::{HubInterface, HubKind};
use crate::core::item::{BadValue, Item};
use crate::core::types::Middlewares;
use crate::node::system::SystemShared;

pub type HandlerFn = Arc<dyn Fn(&Credentials, Vec<Item>) -> Result<Vec<Item>, HubError> + Send + Sync>;
pub type SubscribeFn = Box<dyn Fn(&str, &Credentials, &Item) + Send + Sync>;

#[derive(Error, Debug)]
pub enum HubError {
    #[error("require a {0} hub")]
    WrongKind(&'static str),
    #[error("misconfigured: {0}")]
    Misconfigured(String),
    #[error("no handler for hub {hub} of system {system}")]
    NotImplemented { system: String, hub: String },
    #[error("subscription not found: {0}")]
    UnknownSubscription(String),
    #[error(transparent)]
    Value(#[from] BadValue),
    #[error("{0}")]
    Failed(String),
}

pub(crate) struct HubShared {
    interface: HubInterface,
    parent: Weak<SystemShared>,
    // Insertion order is the fan-out order.
    subs: Mutex<Vec<(String, SubscribeFn)>>,
    function: Mutex<Option<HandlerFn>>,
    value: Mutex<Item>,
    handled: Mutex<HashSet<String>>,
}

/// A hub of a system. Cheap to clone; all state is shared.
#[derive(Clone)]
pub struct Hub(pub(crate) Arc<HubShared>);

impl Hub {
    pub(crate) fn new(parent: Weak<SystemShared>, interface: HubInterface) -> Hub {
        Hub(Arc::new(HubShared {
            interface,
            parent,
            subs: Mutex::new(Vec::new()),
            function: Mutex::new(None),
            value: Mutex::new(Item::Null),
            handled: Mutex::new(HashSet::new()),
        }))
    }

    pub fn name(&self) -> &str {
        &self.0.interface.name
    }

    pub fn interface(&self) -> &HubInterface {
        &self.0.interface
    }

    fn parent_label(&self) -> String {
        match self.0.parent.upgrade() {
            Some(parent) => parent.label(),
            None => "<detached>".to_string(),
        }
    }

    /// Install the invocation handler. A pipe has at most one handler for
    /// its whole lifetime; installing a second one is a programmer error
    /// and aborts loudly.
    pub fn handle(&self, f: HandlerFn) -> Result<(), HubError> {
        if self.0.interface.kind != HubKind::Pipe {
            return Err(HubError::WrongKind("pipe"));
        }
        let mut function = self.0.function.lock().expect("hub lock poisoned");
        if function.is_some() {
            panic!(
                "hub {} of system {} already has a handler",
                self.name(),
                self.parent_label()
            );
        }
        *function = Some(f);
        Ok(())
    }

    /// Invoke the pipe: input middleware, handler, output middleware.
    pub fn invoke(
        &self,
        creds: &Credentials,
        mws: &Middlewares,
        vals: Vec<Item>,
    ) -> Result<Vec<Item>, HubError> {
        if self.0.interface.kind != HubKind::Pipe {
            return Err(HubError::WrongKind("pipe"));
        }
        let vals = self.0.interface.input.apply_middlewares(mws, vals, false)?;
        let function = {
            let function = self.0.function.lock().expect("hub lock poisoned");
            function.clone()
        };
        let function = function.ok_or_else(|| HubError::NotImplemented {
            system: self.parent_label(),
            hub: self.name().to_string(),
        })?;
        let rets = function(creds, vals)?;
        let rets = self.0.interface.output.apply_middlewares(mws, rets, true)?;
        Ok(rets)
    }

    /// Emit a value inside the system onto a channel hub. Generates an
    /// event id when none is given; duplicate ids are dropped silently.
    pub fn emit(
        &self,
        creds: &Credentials,
        mws: &Middlewares,
        id: &str,
        val: Item,
    ) -> Result<(), HubError> {
        if self.0.interface.kind != HubKind::Channel {
            return Err(HubError::WrongKind("channel"));
        }
        let id = ensure_id(id);
        if !self.mark_handled(&id) {
            return Ok(());
        }
        let val = self.conform_value(mws, val)?;
        self.broadcast_async(id, creds.clone(), val);
        Ok(())
    }

    /// External ingress into a channel hub; same dedup and middleware
    /// handling as `emit`, delivered synchronously.
    pub fn push(
        &self,
        creds: &Credentials,
        mws: &Middlewares,
        id: &str,
        val: Item,
    ) -> Result<(), HubError> {
        if self.0.interface.kind != HubKind::Channel {
            return Err(HubError::WrongKind("channel"));
        }
        if val.is_null() {
            return Ok(());
        }
        let id = ensure_id(id);
        if !self.mark_handled(&id) {
            return Ok(());
        }
        let val = self.conform_value(mws, val)?;
        self.broadcast(&id, creds, &val);
        Ok(())
    }

    /// Set the current value of a value hub. The value is stored even when
    /// the event id was already handled; only the fan-out is suppressed.
    pub fn set(
        &self,
        creds: &Credentials,
        mws: &Middlewares,
        id: &str,
        val: Item,
    ) -> Result<(), HubError> {
        if self.0.interface.kind != HubKind::Value {
            return Err(HubError::WrongKind("value"));
        }
        let id = ensure_id(id);
        let val = self.conform_value(mws, val)?;
        {
            let mut value = self.0.value.lock().expect("hub lock poisoned");
            *value = val.clone();
        }
        if !self.mark_handled(&id) {
            return Ok(());
        }
        self.broadcast_async(id, creds.clone(), val);
        Ok(())
    }

    /// Current value of a value hub.
    pub fn get(&self) -> Result<Item, HubError> {
        if self.0.interface.kind != HubKind::Value {
            return Err(HubError::WrongKind("value"));
        }
        Ok(self.0.value.lock().expect("hub lock poisoned").clone())
    }

    /// Add a subscriber. On value hubs the current value is delivered
    /// synchronously before this returns.
    pub fn subscribe(&self, creds: &Credentials, cb: SubscribeFn) -> Result<String, HubError> {
        let kind = self.0.interface.kind;
        if kind != HubKind::Channel && kind != HubKind::Value {
            return Err(HubError::WrongKind("channel or value"));
        }
        let sub_id = random_token(8);
        {
            let mut subs = self.0.subs.lock().expect("hub lock poisoned");
            subs.push((sub_id.clone(), cb));
        }
        if kind == HubKind::Value {
            let val = self.0.value.lock().expect("hub lock poisoned").clone();
            let subs = self.0.subs.lock().expect("hub lock poisoned");
            if let Some((_, cb)) = subs.iter().find(|(id, _)| id == &sub_id) {
                cb(&random_token(8), creds, &val);
            }
        }
        Ok(sub_id)
    }

    pub fn unsubscribe(&self, sub_id: &str) -> Result<(), HubError> {
        let mut subs = self.0.subs.lock().expect("hub lock poisoned");
        let before = subs.len();
        subs.retain(|(id, _)| id != sub_id);
        if subs.len() == before {
            return Err(HubError::UnknownSubscription(sub_id.to_string()));
        }
        Ok(())
    }

    fn conform_value(&self, mws: &Middlewares, val: Item) -> Result<Item, BadValue> {
        match &self.0.interface.value {
            Some(slot) => slot.apply_middlewares(mws, val, false),
            None => Err(BadValue::new(format!(
                "hub {} has no value interface",
                self.name()
            ))),
        }
    }

    /// Record an event id; returns false when it was already handled.
    fn mark_handled(&self, id: &str) -> bool {
        let mut handled = self.0.handled.lock().expect("hub lock poisoned");
        handled.insert(id.to_string())
    }

    /// Fan out to subscribers in insertion order under the hub lock.
    fn broadcast(&self, id: &str, creds: &Credentials, val: &Item) {
        let subs = self.0.subs.lock().expect("hub lock poisoned");
        for (_, cb) in subs.iter() {
            cb(id, creds, val);
        }
    }

    fn broadcast_async(&self, id: String, creds: Credentials, val: Item) {
        let hub = self.clone();
        std::thread::spawn(move || hub.broadcast(&id, &creds, &val));
    }
}

fn ensure_id(id: &str) -> String {
    if id.is_empty() {
        random_token(8)
    } else {
        id.to_string()
    }
}

/// A hub bound to the caller's credentials and middleware chain.
#[derive(Clone)]
pub struct HubHandle {
    pub(crate) hub: Hub,
    pub(crate) creds: Credentials,
    pub(crate) mws: Middlewares,
}

impl HubHandle {
    pub fn name(&self) -> &str {
        self.hub.name()
    }

    pub fn interface(&self) -> &HubInterface {
        self.hub.interface()
    }

    pub fn native(&self) -> &Hub {
        &self.hub
    }

    pub fn handle(&self, f: HandlerFn) -> Result<(), HubError> {
        self.hub.handle(f)
    }

    pub fn invoke(&self, user: Option<&crate::core::User>, vals: Vec<Item>) -> Result<Vec<Item>, HubError> {
        let mut creds = self.creds.clone();
        if let Some(user) = user {
            creds.user = user.clone();
        }
        self.hub.invoke(&creds, &self.mws, vals)
    }

    pub fn emit(&self, id: &str, val: Item) -> Result<(), HubError> {
        self.hub.emit(&self.creds, &self.mws, id, val)
    }

    pub fn push(&self, id: &str, val: Item) -> Result<(), HubError> {
        self.hub.push(&self.creds, &self.mws, id, val)
    }

    pub fn set(&self, id: &str, val: Item) -> Result<(), HubError> {
        self.hub.set(&self.creds, &self.mws, id, val)
    }

    pub fn get(&self) -> Result<Item, HubError> {
        self.hub.get()
    }

    pub fn subscribe(&self, cb: SubscribeFn) -> Result<String, HubError> {
        self.hub.subscribe(&self.creds, cb)
    }

    pub fn unsubscribe(&self, sub_id: &str) -> Result<(), HubError> {
        self.hub.unsubscribe(sub_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::interface::{HubDirection, HubInterface, ItemInterface};
    use crate::core::types::{LeafType, Type};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::{Duration, Instant};

    fn pipe_hub() -> Hub {
        let interface = HubInterface::pipe("double", HubDirection::In)
            .with_input(vec![ItemInterface::new("n", Type::leaf(LeafType::Integer))])
            .with_output(vec![ItemInterface::new("n", Type::leaf(LeafType::Integer))]);
        Hub::new(Weak::new(), interface)
    }

    fn channel_hub() -> Hub {
        let interface =
            HubInterface::channel("tick", HubDirection::Out, Type::leaf(LeafType::Integer));
        Hub::new(Weak::new(), interface)
    }

    fn value_hub() -> Hub {
        let interface =
            HubInterface::value("state", HubDirection::Both, Type::leaf(LeafType::String));
        Hub::new(Weak::new(), interface)
    }

    fn wait_for(probe: impl Fn() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if probe() {
                return;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        panic!("condition not reached in time");
    }

    #[test]
    fn pipe_invokes_handler() {
        let hub = pipe_hub();
        hub.handle(Arc::new(|_creds, vals| {
            let n = vals[0].as_int().unwrap();
            Ok(vec![Item::Int(n * 2)])
        }))
        .unwrap();

        let rets = hub
            .invoke(&Credentials::default(), &Middlewares::new(), vec![Item::Int(21)])
            .unwrap();
        assert_eq!(rets, vec![Item::Int(42)]);
    }

    #[test]
    fn pipe_without_handler_is_not_implemented() {
        let hub = pipe_hub();
        let err = hub
            .invoke(&Credentials::default(), &Middlewares::new(), vec![Item::Int(1)])
            .unwrap_err();
        assert!(matches!(err, HubError::NotImplemented { .. }));
    }

    #[test]
    #[should_panic(expected = "already has a handler")]
    fn second_handler_panics() {
        let hub = pipe_hub();
        hub.handle(Arc::new(|_c, vals| Ok(vals))).unwrap();
        let _ = hub.handle(Arc::new(|_c, vals| Ok(vals)));
    }

    #[test]
    fn channel_deduplicates_by_event_id() {
        let hub = channel_hub();
        let count = Arc::new(AtomicUsize::new(0));
        let seen = count.clone();
        hub.subscribe(
            &Credentials::default(),
            Box::new(move |_id, _creds, _val| {
                seen.fetch_add(1, Ordering::SeqCst);
            }),
        )
        .unwrap();

        let creds = Credentials::default();
        let mws = Middlewares::new();
        hub.emit(&creds, &mws, "ev1", Item::Int(1)).unwrap();
        hub.emit(&creds, &mws, "ev1", Item::Int(1)).unwrap();
        hub.push(&creds, &mws, "ev1", Item::Int(1)).unwrap();
        hub.emit(&creds, &mws, "ev2", Item::Int(2)).unwrap();

        wait_for(|| count.load(Ordering::SeqCst) == 2);
    }

    #[test]
    fn value_hub_replays_current_value_synchronously() {
        let hub = value_hub();
        let creds = Credentials::default();
        let mws = Middlewares::new();
        hub.set(&creds, &mws, "", Item::Str("hello".into())).unwrap();

        let got = Arc::new(Mutex::new(None));
        let sink = got.clone();
        hub.subscribe(
            &creds,
            Box::new(move |_id, _creds, val| {
                *sink.lock().unwrap() = Some(val.clone());
            }),
        )
        .unwrap();

        assert_eq!(*got.lock().unwrap(), Some(Item::Str("hello".into())));
        assert_eq!(hub.get().unwrap(), Item::Str("hello".into()));
    }

    #[test]
    fn value_set_with_handled_id_stores_but_does_not_fan_out() {
        let hub = value_hub();
        let creds = Credentials::default();
        let mws = Middlewares::new();
        hub.set(&creds, &mws, "dup", Item::Str("a".into())).unwrap();

        let count = Arc::new(AtomicUsize::new(0));
        let seen = count.clone();
        hub.subscribe(
            &creds,
            Box::new(move |_id, _creds, _val| {
                seen.fetch_add(1, Ordering::SeqCst);
            }),
        )
        .unwrap();
        // The replay on subscribe is delivery one.
        assert_eq!(count.load(Ordering::SeqCst), 1);

        hub.set(&creds, &mws, "dup", Item::Str("b".into())).unwrap();
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(hub.get().unwrap(), Item::Str("b".into()));
    }

    #[test]
    fn wrong_kind_operations_fail() {
        let hub = channel_hub();
        let creds = Credentials::default();
        let mws = Middlewares::new();
        assert!(matches!(hub.get(), Err(HubError::WrongKind(_))));
        assert!(matches!(
            hub.set(&creds, &mws, "", Item::Int(1)),
            Err(HubError::WrongKind(_))
        ));
        assert!(matches!(
            hub.invoke(&creds, &mws, vec![]),
            Err(HubError::WrongKind(_))
        ));
    }

    #[test]
    fn fan_out_keeps_insertion_order() {
        let hub = channel_hub();
        let order = Arc::new(Mutex::new(Vec::new()));
        for tag in ["first", "second", "third"] {
            let sink = order.clone();
            hub.subscribe(
                &Credentials::default(),
                Box::new(move |_id, _creds, _val| {
                    sink.lock().unwrap().push(tag);
                }),
            )
            .unwrap();
        }
        hub.push(&Credentials::default(), &Middlewares::new(), "e", Item::Int(1))
            .unwrap();
        assert_eq!(*order.lock().unwrap(), vec!["first", "second", "third"]);
    }

    #[test]
    fn unsubscribe_removes_callback() {
        let hub = channel_hub();
        let count = Arc::new(AtomicUsize::new(0));
        let seen = count.clone();
        let sub = hub
            .subscribe(
                &Credentials::default(),
                Box::new(move |_id, _creds, _val| {
                    seen.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .unwrap();
        hub.unsubscribe(&sub).unwrap();
        assert!(hub.unsubscribe(&sub).is_err());
        hub.push(&Credentials::default(), &Middlewares::new(), "e", Item::Int(1))
            .unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }
}
