//! Shared harness for the remote-fabric tests: node/pool builders, a few
//! canned interfaces with business logic, and bounded polling.

use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use serde_json::Value as JsonValue;

use sparknet::node::default_middlewares;
use sparknet::{
    Credentials, Factory, HubDirection, HubInterface, Implementation, Interface, Item,
    ItemInterface, LeafType, Node, NodeError, Pool, System, Type,
};

/// A node with the default middlewares and its pool registered as the
/// "ws" factory, the way every peer in these tests is assembled.
pub fn test_node() -> (Node, Pool) {
    sparknet::telemetry::init(0);
    let node = Node::new();
    node.add_middlewares(&default_middlewares());
    let pool = Pool::new(node.clone(), "");
    node.add_factory(Arc::new(pool.clone())).unwrap();
    (node, pool)
}

/// Poll until the probe passes or the deadline expires.
pub fn wait_until(timeout: Duration, probe: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if probe() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    false
}

pub fn system_type() -> Type {
    Type::default().with_extension("system", serde_json::json!({}))
}

/// Interface of a clock system: one pipe returning the current unix
/// timestamp.
pub fn clock_interface() -> Interface {
    let mut interface = Interface::new("Clock");
    interface
        .add_hub(
            HubInterface::pipe("getTimestamp", HubDirection::In)
                .with_output(vec![ItemInterface::new("ts", Type::leaf(LeafType::Float))]),
        )
        .unwrap();
    interface
}

/// A factory that installs the clock handler, so restored clock systems
/// answer again after a node reload.
pub struct ClockFactory;

impl Factory for ClockFactory {
    fn name(&self) -> &'static str {
        "clock"
    }

    fn implementation(
        &self,
        _raw: Option<&JsonValue>,
    ) -> Result<Box<dyn Implementation>, NodeError> {
        Ok(Box::new(ClockImpl))
    }
}

struct ClockImpl;

impl Implementation for ClockImpl {
    fn implement(&self, _node: &Node, sys: &System) -> Result<(), NodeError> {
        let hub = sys
            .get_hub("getTimestamp")
            .ok_or_else(|| NodeError::NotFound("getTimestamp".to_string()))?;
        hub.handle(Arc::new(|_creds, _vals| {
            let ts = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs_f64())
                .unwrap_or(0.0);
            Ok(vec![Item::Float(ts)])
        }))?;
        sys.native()
            .add_extension("clock", Arc::new(ClockExt));
        Ok(())
    }

    fn to_value(&self) -> Option<JsonValue> {
        Some(serde_json::json!({"system": "Clock"}))
    }
}

struct ClockExt;

impl sparknet::FactoryExtension for ClockExt {
    fn implementation(&self) -> Option<Box<dyn Implementation>> {
        Some(Box::new(ClockImpl))
    }
}

/// Blueprint for a clock system backed by the clock factory.
pub fn clock_sparkable() -> sparknet::Sparkable {
    let mut sparkable = clock_interface().blank();
    sparkable.add_implementation("clock", serde_json::json!({"system": "Clock"}));
    sparkable
}

/// Interface of a node meta system: system registry access over hubs.
pub fn node_meta_interface() -> Interface {
    let mut interface = Interface::new("NodeMeta");
    interface
        .add_hub(
            HubInterface::pipe("getSystemCount", HubDirection::In)
                .with_output(vec![ItemInterface::new("count", Type::leaf(LeafType::Integer))]),
        )
        .unwrap();
    interface
        .add_hub(
            HubInterface::pipe("getSystems", HubDirection::In).with_output(vec![
                ItemInterface::new("systems", Type::list_of(system_type())),
            ]),
        )
        .unwrap();
    interface
        .add_hub(
            HubInterface::pipe("addSystem", HubDirection::In)
                .with_input(vec![ItemInterface::new("system", system_type())])
                .with_output(vec![ItemInterface::new("system", system_type())]),
        )
        .unwrap();
    interface
}

/// Build a node meta system on the given node and wire its handlers.
pub fn node_meta_system(node: &Node) -> System {
    let creds = Credentials::default();
    let sys = node
        .prepare_system(&creds, &node_meta_interface().blank())
        .unwrap();

    let registry = node.clone();
    sys.get_hub("getSystemCount")
        .unwrap()
        .handle(Arc::new(move |creds, _vals| {
            Ok(vec![Item::Int(registry.systems(creds).len() as i64)])
        }))
        .unwrap();

    let registry = node.clone();
    sys.get_hub("getSystems")
        .unwrap()
        .handle(Arc::new(move |creds, _vals| {
            let systems = registry
                .systems(creds)
                .into_iter()
                .map(Item::System)
                .collect();
            Ok(vec![Item::List(systems)])
        }))
        .unwrap();

    let registry = node.clone();
    sys.get_hub("addSystem")
        .unwrap()
        .handle(Arc::new(move |creds, vals| {
            let sys = match vals.first() {
                Some(Item::System(sys)) => sys.clone(),
                other => {
                    return Err(sparknet::HubError::Failed(format!(
                        "not a system: {:?}",
                        other
                    )))
                }
            };
            if registry.get_system_by_name(creds, &sys.name()).is_err() {
                registry
                    .add_system(sys.native())
                    .map_err(|err| sparknet::HubError::Failed(err.to_string()))?;
            }
            Ok(vec![Item::System(sys)])
        }))
        .unwrap();

    sys
}
