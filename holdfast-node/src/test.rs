use crate::ReplicaNode;
use holdfast_base::{NodeId, Strategy};
use tempfile::TempDir;
use test_log::test;

fn node(id: i64, dir: &TempDir) -> ReplicaNode {
    ReplicaNode::create(NodeId(id), 5000 + id as u16, dir.path()).unwrap()
}

#[test]
fn test_write_read_delete() {
    let dir = TempDir::new().unwrap();
    let n = node(0, &dir);
    assert_eq!(n.read("k1").unwrap(), None);
    n.write("k1", "v1").unwrap();
    assert_eq!(n.read("k1").unwrap(), Some("v1".to_string()));
    assert!(n.key_exists("k1").unwrap());
    n.write("k1", "v2").unwrap();
    assert_eq!(n.read("k1").unwrap(), Some("v2".to_string()));
    n.delete("k1").unwrap();
    assert_eq!(n.read("k1").unwrap(), None);
    assert!(!n.key_exists("k1").unwrap());
}

#[test]
fn test_dead_node_gates_public_api() {
    let dir = TempDir::new().unwrap();
    let n = node(0, &dir);
    n.write("k1", "v1").unwrap();
    n.fail();
    assert!(!n.is_alive());

    // Gated ops are silent no-ops.
    n.write("k2", "v2").unwrap();
    n.delete("k1").unwrap();
    assert_eq!(n.read("k1").unwrap(), None);
    assert!(!n.key_exists("k1").unwrap());

    // The raw scan still sees the backing file: k1 survived the
    // gated delete and k2 never landed.
    let all = n.get_all_keys().unwrap();
    assert_eq!(all, vec![("k1".to_string(), "v1".to_string())]);
}

#[test]
fn test_storage_survives_reopen() {
    let dir = TempDir::new().unwrap();
    {
        let n = node(7, &dir);
        n.write("durable", "yes").unwrap();
    }
    let n = node(7, &dir);
    assert_eq!(n.read("durable").unwrap(), Some("yes".to_string()));
}

#[test]
fn test_fail_recover_idempotent() {
    let dir = TempDir::new().unwrap();
    let nodes = vec![node(0, &dir)];
    nodes[0].fail();
    nodes[0].fail();
    assert!(!nodes[0].is_alive());
    nodes[0].recover(&nodes, Strategy::Full).unwrap();
    nodes[0].recover(&nodes, Strategy::Full).unwrap();
    assert!(nodes[0].is_alive());
}

#[test]
fn test_resync_converges_to_live_union() {
    let d0 = TempDir::new().unwrap();
    let d1 = TempDir::new().unwrap();
    let d2 = TempDir::new().unwrap();
    let nodes = vec![node(0, &d0), node(1, &d1), node(2, &d2)];

    for n in &nodes {
        n.write("k1", "v1").unwrap();
        n.write("stale", "old").unwrap();
    }
    nodes[0].fail();

    // While node 0 is out: a new key lands on the others, and a
    // cluster-wide delete of "stale" no-ops on the dead node.
    nodes[1].write("k2", "v2").unwrap();
    nodes[2].write("k2", "v2").unwrap();
    for n in &nodes {
        n.delete("stale").unwrap();
    }
    assert_eq!(
        nodes[0].get_all_keys().unwrap().len(),
        2 // k1 and stale, untouched behind the gate
    );

    nodes[0].recover(&nodes, Strategy::Full).unwrap();
    assert_eq!(nodes[0].read("k1").unwrap(), Some("v1".to_string()));
    assert_eq!(nodes[0].read("k2").unwrap(), Some("v2".to_string()));
    assert_eq!(nodes[0].read("stale").unwrap(), None);
}

#[test]
fn test_resync_without_live_peers_leaves_node_as_is() {
    let d0 = TempDir::new().unwrap();
    let d1 = TempDir::new().unwrap();
    let nodes = vec![node(0, &d0), node(1, &d1)];
    nodes[0].write("k1", "v1").unwrap();
    nodes[0].fail();
    nodes[1].fail();
    nodes[0].recover(&nodes, Strategy::Full).unwrap();
    assert_eq!(nodes[0].read("k1").unwrap(), Some("v1".to_string()));
}

#[test]
fn test_resync_last_peer_wins_on_disagreement() {
    let d0 = TempDir::new().unwrap();
    let d1 = TempDir::new().unwrap();
    let d2 = TempDir::new().unwrap();
    let nodes = vec![node(0, &d0), node(1, &d1), node(2, &d2)];
    nodes[1].write("k", "from-1").unwrap();
    nodes[2].write("k", "from-2").unwrap();
    nodes[0].fail();
    nodes[0].recover(&nodes, Strategy::Full).unwrap();
    // Peers are ingested in slice order, so the later peer's value
    // is the one that sticks.
    assert_eq!(nodes[0].read("k").unwrap(), Some("from-2".to_string()));
}
