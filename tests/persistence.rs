//! Restart scenarios: node state survives a store round-trip and
//! sessions resume on both the server and the client side.

mod common;

use std::time::Duration;

use common::{clock_sparkable, test_node, wait_until, ClockFactory};
use sparknet::{Credentials, Item, Server, Store};
use std::sync::Arc;

#[test]
fn server_restart_with_persisted_state() {
    let creds = Credentials::default();

    let (snode, spool) = test_node();
    snode.add_factory(Arc::new(ClockFactory)).unwrap();
    let server = Server::bind(&spool, "127.0.0.1:0").unwrap();
    spool.set_address(&server.address());
    let port = server.local_addr().port();

    let sys = snode.prepare_system(&creds, &clock_sparkable()).unwrap();

    let (_cnode, cpool) = test_node();
    cpool.connect_node(&server.address()).unwrap();
    let conn = cpool.get_conn_by_name(&snode.name()).unwrap();
    let clt = conn.add_client().unwrap();
    clt.connect(sys.id(), creds.clone()).unwrap();

    let hub = clt.get_hub("getTimestamp").unwrap();
    let ret = hub.invoke(None, vec![]).unwrap();
    assert!(matches!(ret[0], Item::Float(ts) if ts > 0.0));

    // Take the server down and capture its state.
    server.shutdown();
    let st = Store::new("server");
    snode.store_into(&st).unwrap();

    assert!(wait_until(Duration::from_secs(2), || {
        matches!(
            hub.invoke(None, vec![]),
            Err(err) if err.to_string().contains("client inactive")
        )
    }));

    // A fresh process: new node, state loaded, same address.
    let (snode2, spool2) = test_node();
    snode2.add_factory(Arc::new(ClockFactory)).unwrap();
    snode2.load_from(&st).unwrap();
    let server2 = Server::bind(&spool2, &format!("127.0.0.1:{}", port)).unwrap();
    spool2.set_address(&server2.address());

    // The same client handle resumes within the reconnect window.
    assert!(wait_until(Duration::from_secs(3), || {
        matches!(
            hub.invoke(None, vec![]),
            Ok(ret) if matches!(ret[0], Item::Float(ts) if ts > 0.0)
        )
    }));

    server2.shutdown();
}

#[test]
fn client_restart_with_persisted_state() {
    let creds = Credentials::default();

    let (snode, spool) = test_node();
    snode.add_factory(Arc::new(ClockFactory)).unwrap();
    let server = Server::bind(&spool, "127.0.0.1:0").unwrap();
    spool.set_address(&server.address());

    let sys = snode.prepare_system(&creds, &clock_sparkable()).unwrap();

    let (cnode, cpool) = test_node();
    cpool.connect_node(&server.address()).unwrap();
    let conn = cpool.get_conn_by_name(&snode.name()).unwrap();
    let clt = conn.add_client().unwrap();
    clt.connect(sys.id(), creds.clone()).unwrap();

    let ret = clt
        .get_hub("getTimestamp")
        .unwrap()
        .invoke(None, vec![])
        .unwrap();
    assert!(matches!(ret[0], Item::Float(ts) if ts > 0.0));

    let client_sys_id = clt.handle_system().unwrap().id();

    // Persist the client node, then drop its pool.
    let st = Store::new("client");
    cnode.store_into(&st).unwrap();
    cpool.shutdown();

    // A fresh client process, linked to the server before the restore.
    let (cnode2, cpool2) = test_node();
    cpool2.connect_node(&server.address()).unwrap();
    cnode2.load_from(&st).unwrap();

    let restored = cnode2.get_system_by_id(&creds, client_sys_id).unwrap();
    let hub = restored.get_hub("getTimestamp").unwrap();
    assert!(wait_until(Duration::from_secs(3), || {
        matches!(
            hub.invoke(None, vec![]),
            Ok(ret) if matches!(ret[0], Item::Float(ts) if ts > 0.0)
        )
    }));

    server.shutdown();
}

#[test]
fn store_survives_a_directory_round_trip() {
    let creds = Credentials::default();
    let (snode, _spool) = test_node();
    snode.add_factory(Arc::new(ClockFactory)).unwrap();
    let sys = snode.prepare_system(&creds, &clock_sparkable()).unwrap();
    snode.set_system(sys.native());

    let st = Store::new("node");
    snode.store_into(&st).unwrap();

    let dir = tempfile::tempdir().unwrap();
    st.write(dir.path()).unwrap();
    let st2 = Store::read(dir.path(), "node").unwrap();

    let (snode2, _spool2) = test_node();
    snode2.add_factory(Arc::new(ClockFactory)).unwrap();
    snode2.load_from(&st2).unwrap();

    assert_eq!(snode2.name(), snode.name());
    let restored = snode2.get_system_by_id(&creds, sys.id()).unwrap();
    let ret = restored
        .get_hub("getTimestamp")
        .unwrap()
        .invoke(None, vec![])
        .unwrap();
    assert!(matches!(ret[0], Item::Float(ts) if ts > 0.0));
}
