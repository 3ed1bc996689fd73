// Consistent-hash placement for the store.
//
// Each physical node contributes `replicas` virtual positions to the
// ring, at rapidhash("{node_id}:{i}") for i in 0..replicas. A key
// lands at the first position clockwise from its own hash, and its
// replica set is the first `replicas` _distinct_ physical nodes on
// that walk. `replicas` therefore does double duty: virtual-node
// count per physical node, and replication fan-out.
//
// The ring itself is only placement. Membership changes move no data:
// add_node/remove_node touch positions, nothing else. Data movement
// happens in exactly two places, both driven by the manager:
//
//  1. redistribute_keys, after a node is marked dead. The dead node's
//     whole backing file is scanned (the file outlives the alive
//     flag) and every key the ring successor doesn't already hold is
//     written there and recorded in temp_key_storage as
//     key -> (custodian, value). Keys the successor already held are
//     natural replicas, not custody: they are neither overwritten nor
//     recorded.
//
//  2. recover_node, after a node is marked alive again. Every custody
//     entry held elsewhere is drained: the custodian drops its copy
//     unless it is a natural replica of that key, the revived node is
//     written unless it already holds the key, and the entry is
//     removed. Recording in (1) happens only after the custodian
//     write succeeds, so a custody entry always denotes a key the
//     custodian really holds, and a crash mid-way leaves the map
//     describing only completed handoffs; re-running either step is
//     safe because of the key_exists guards.
//
// temp_key_storage is process memory, deliberately not persisted: a
// process restart forgets custody and a later recover_node has
// nothing to rehome. The backing files still hold the data.
//
// One compatibility quirk, kept on purpose: when replicas >= the
// number of physical nodes, get_nodes_for_key returns all physical
// nodes in ring-insertion order rather than walk order from the
// key's hash.

use std::collections::BTreeMap;

use tracing::{debug, info};

use holdfast_base::{NodeId, Result};
use holdfast_node::ReplicaNode;


pub struct HashRing {
    replicas: usize,
    ring: BTreeMap<u64, NodeId>,
    // Physical nodes in join order, for the replicas >= |nodes| case.
    joined: Vec<NodeId>,
    temp_key_storage: BTreeMap<String, (NodeId, String)>,
}

fn position(s: &str) -> u64 {
    rapidhash::rapidhash(s.as_bytes())
}

fn node_by_id(nodes: &[ReplicaNode], id: NodeId) -> Option<&ReplicaNode> {
    nodes.iter().find(|n| n.node_id() == id)
}

impl HashRing {
    // replicas defaults to the number of physical nodes.
    pub fn new(nodes: &[ReplicaNode], replicas: Option<usize>) -> Self {
        let mut ring = HashRing {
            replicas: replicas.unwrap_or(nodes.len()),
            ring: BTreeMap::new(),
            joined: Vec::new(),
            temp_key_storage: BTreeMap::new(),
        };
        for node in nodes {
            ring.add_node(node);
        }
        ring
    }

    pub fn replicas(&self) -> usize {
        self.replicas
    }

    pub fn add_node(&mut self, node: &ReplicaNode) {
        let id = node.node_id();
        for i in 0..self.replicas {
            self.ring.insert(position(&format!("{id}:{i}")), id);
        }
        if !self.joined.contains(&id) {
            self.joined.push(id);
        }
    }

    pub fn remove_node(&mut self, node: &ReplicaNode) {
        let id = node.node_id();
        for i in 0..self.replicas {
            self.ring.remove(&position(&format!("{id}:{i}")));
        }
        self.joined.retain(|j| *j != id);
    }

    // First ring position at or clockwise-after the key's hash,
    // wrapping to the lowest position past the top of the ring.
    pub fn get_node(&self, key: &str) -> Option<NodeId> {
        if self.ring.is_empty() {
            return None;
        }
        let h = position(key);
        self.ring
            .range(h..)
            .next()
            .or_else(|| self.ring.iter().next())
            .map(|(_, id)| *id)
    }

    // The key's replica set: distinct physical nodes collected on the
    // clockwise walk from the key's hash, min(replicas, |nodes|) of
    // them. Liveness is not consulted here; callers skip dead nodes.
    pub fn get_nodes_for_key(&self, key: &str) -> Vec<NodeId> {
        if self.ring.is_empty() {
            return Vec::new();
        }
        if self.replicas >= self.joined.len() {
            return self.joined.clone();
        }
        let h = position(key);
        let mut out: Vec<NodeId> = Vec::new();
        for (_, id) in self.ring.range(h..).chain(self.ring.range(..h)) {
            if !out.contains(id) {
                out.push(*id);
                if out.len() == self.replicas {
                    break;
                }
            }
        }
        out
    }

    // First alive node on the clockwise walk whose id differs from
    // `exclude`. None when nothing qualifies.
    pub fn get_next_node(
        &self,
        key: &str,
        exclude: Option<NodeId>,
        nodes: &[ReplicaNode],
    ) -> Option<NodeId> {
        if self.ring.is_empty() {
            return None;
        }
        let h = position(key);
        for (_, id) in self.ring.range(h..).chain(self.ring.range(..h)) {
            if Some(*id) == exclude {
                continue;
            }
            match node_by_id(nodes, *id) {
                Some(n) if n.is_alive() => return Some(*id),
                _ => continue,
            }
        }
        None
    }

    // Hinted handoff for a freshly-failed node: hand every key of its
    // backing file to the next alive successor on the ring, recording
    // custody for each key the successor did not already hold.
    pub fn redistribute_keys(&mut self, nodes: &[ReplicaNode], failed: NodeId) -> Result<()> {
        let probe = format!("{failed}:0");
        let Some(succ_id) = self.get_next_node(&probe, Some(failed), nodes) else {
            info!(target: "holdfast", "no alive successor for failed node {failed}, keys stay put");
            return Ok(());
        };
        let (Some(failed_node), Some(succ)) =
            (node_by_id(nodes, failed), node_by_id(nodes, succ_id))
        else {
            return Ok(());
        };
        info!(target: "holdfast", "redistributing keys of node {failed} to node {succ_id}");
        for (k, v) in failed_node.get_all_keys()? {
            if succ.key_exists(&k)? {
                debug!(target: "holdfast", "successor {succ_id} already holds {k:?}");
                continue;
            }
            succ.write(&k, &v)?;
            // Record only after the write lands, so every custody
            // entry denotes a key the custodian actually holds.
            self.temp_key_storage.insert(k, (succ_id, v));
        }
        Ok(())
    }

    // Restitution for a freshly-revived node: drain every custody
    // entry held elsewhere back to it. Custodians that are natural
    // replicas of a key keep their copy; stand-ins drop theirs.
    pub fn recover_node(&mut self, nodes: &[ReplicaNode], revived: NodeId) -> Result<()> {
        let Some(revived_node) = node_by_id(nodes, revived) else {
            return Ok(());
        };
        let displaced: Vec<(String, NodeId, String)> = self
            .temp_key_storage
            .iter()
            .filter(|(_, (custodian, _))| *custodian != revived)
            .map(|(k, (custodian, v))| (k.clone(), *custodian, v.clone()))
            .collect();
        info!(target: "holdfast",
              "recovering node {revived}: {} displaced keys to rehome", displaced.len());
        for (k, custodian_id, v) in displaced {
            let Some(custodian) = node_by_id(nodes, custodian_id) else {
                continue;
            };
            if !self.get_nodes_for_key(&k).contains(&custodian_id) {
                debug!(target: "holdfast",
                       "dropping {k:?} from stand-in custodian {custodian_id}");
                custodian.delete(&k)?;
            }
            if !revived_node.key_exists(&k)? {
                revived_node.write(&k, &v)?;
            }
            self.temp_key_storage.remove(&k);
        }
        Ok(())
    }

    // Custody map: key -> (custodian, value). Entries exist only for
    // keys displaced from a failed node and not yet rehomed.
    pub fn temp_key_storage(&self) -> &BTreeMap<String, (NodeId, String)> {
        &self.temp_key_storage
    }
}
