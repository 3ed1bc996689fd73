// The replication manager is the front door to the core: it owns the
// replica nodes, the chosen strategy, and (under consistent
// placement) the hash ring. All placement and membership state lives
// here, in one place; the ring refers to nodes by id only and is
// handed the node slice for every operation that touches data.
//
// The manager is designed to sit behind a single lock: mutating
// operations take &mut self, observing operations take &self, and
// the HTTP layer maps those onto a reader-writer lock. Redistribution
// and recovery run in the foreground under that lock, so an
// operation's effects are fully applied before the next call begins.
//
// Deletes broadcast to every node under both strategies. This is what
// keeps former custodians and natural replicas from accumulating
// stale residues: any node that ever legitimately held the key gets
// the delete, and dead nodes (where delete silently no-ops) shed the
// key later through recovery/resync.

use std::path::Path;

use serde::Serialize;
use thiserror::Error;
use tracing::info;

use holdfast_base::{err, NodeId, Strategy};
use holdfast_node::ReplicaNode;
use holdfast_ring::HashRing;


#[derive(Debug, Error)]
pub enum StoreError {
    #[error("key not found")]
    KeyAbsent,
    #[error("the key {0} already exists")]
    KeyConflict(String),
    #[error("no node with id {0}")]
    InvalidNodeId(i64),
    #[error("unknown replication strategy: {0}")]
    InvalidStrategy(String),
    #[error("internal error: {0}")]
    Internal(holdfast_base::Error),
}

impl From<holdfast_base::Error> for StoreError {
    fn from(e: holdfast_base::Error) -> Self {
        StoreError::Internal(e)
    }
}

// A successful read, tagged with the node that served it.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ReadHit {
    pub value: String,
    pub node: NodeId,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct NodeStatus {
    pub node_id: NodeId,
    pub status: &'static str,
    pub port: u16,
}

pub struct ReplicationManager {
    nodes: Vec<ReplicaNode>,
    strategy: Strategy,
    // Present iff strategy is Consistent.
    ring: Option<HashRing>,
}

impl ReplicationManager {
    // Creates nodes_db replica nodes with ids 0.. and ports
    // base_port+0.. under data_dir. replication_factor defaults to
    // the node count and only matters under consistent placement.
    pub fn new(
        nodes_db: usize,
        base_port: u16,
        strategy: Strategy,
        replication_factor: Option<usize>,
        data_dir: &Path,
    ) -> Result<Self, StoreError> {
        let mut nodes = Vec::with_capacity(nodes_db);
        for i in 0..nodes_db {
            nodes.push(ReplicaNode::create(
                NodeId(i as i64),
                base_port + i as u16,
                data_dir,
            )?);
        }
        let ring = match strategy {
            Strategy::Consistent => Some(HashRing::new(&nodes, replication_factor)),
            Strategy::Full => None,
        };
        info!(target: "holdfast",
              "manager up: {nodes_db} nodes, strategy {strategy}");
        Ok(ReplicationManager {
            nodes,
            strategy,
            ring,
        })
    }

    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    pub fn nodes(&self) -> &[ReplicaNode] {
        &self.nodes
    }

    pub fn ring(&self) -> Option<&HashRing> {
        self.ring.as_ref()
    }

    fn node(&self, id: NodeId) -> Result<&ReplicaNode, StoreError> {
        self.nodes
            .iter()
            .find(|n| n.node_id() == id)
            .ok_or(StoreError::InvalidNodeId(id.0))
    }

    fn ring_ref(&self) -> Result<&HashRing, StoreError> {
        self.ring
            .as_ref()
            .ok_or_else(|| StoreError::Internal(err("consistent strategy with no ring")))
    }

    // Reconfigures in place. The ring is rebuilt (or discarded) with
    // the current nodes; data already placed stays where it lies.
    pub fn set_replication_strategy(
        &mut self,
        strategy: Strategy,
        replication_factor: Option<usize>,
    ) {
        self.strategy = strategy;
        self.ring = match strategy {
            Strategy::Consistent => Some(HashRing::new(&self.nodes, replication_factor)),
            Strategy::Full => None,
        };
        info!(target: "holdfast", "replication strategy set to {strategy}");
    }

    // Upsert-to-targets, but a key may only enter the store once:
    // writing a key any alive replica already holds is a conflict.
    // Dead targets are skipped; handoff happens at fail_node, not
    // at write time.
    pub fn write_to_replicas(&mut self, key: &str, value: &str) -> Result<(), StoreError> {
        if self.key_exists_in_replicas(key)? {
            return Err(StoreError::KeyConflict(key.to_string()));
        }
        match self.strategy {
            Strategy::Full => {
                for node in &self.nodes {
                    if node.is_alive() {
                        node.write(key, value)?;
                    }
                }
            }
            Strategy::Consistent => {
                for id in self.ring_ref()?.get_nodes_for_key(key) {
                    let node = self.node(id)?;
                    if node.is_alive() {
                        node.write(key, value)?;
                    }
                }
            }
        }
        Ok(())
    }

    // Full: first hit scanning nodes in id order. Consistent: the
    // ring owner or nothing (no fallback walk).
    pub fn read_from_replicas(&self, key: &str) -> Result<Option<ReadHit>, StoreError> {
        match self.strategy {
            Strategy::Full => {
                for node in &self.nodes {
                    if !node.is_alive() {
                        continue;
                    }
                    if let Some(value) = node.read(key)? {
                        return Ok(Some(ReadHit {
                            value,
                            node: node.node_id(),
                        }));
                    }
                }
                Ok(None)
            }
            Strategy::Consistent => {
                let Some(id) = self.ring_ref()?.get_node(key) else {
                    return Ok(None);
                };
                let node = self.node(id)?;
                Ok(node.read(key)?.map(|value| ReadHit {
                    value,
                    node: id,
                }))
            }
        }
    }

    // Broadcast to every node under both strategies, so former
    // custodians and natural replicas shed their copies too. Dead
    // nodes no-op and drop the key later via recovery.
    pub fn delete_from_replicas(&mut self, key: &str) -> Result<(), StoreError> {
        if !self.key_exists_in_replicas(key)? {
            return Err(StoreError::KeyAbsent);
        }
        for node in &self.nodes {
            node.delete(key)?;
        }
        Ok(())
    }

    pub fn key_exists_in_replicas(&self, key: &str) -> Result<bool, StoreError> {
        for node in &self.nodes {
            if node.is_alive() && node.key_exists(key)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    pub fn fail_node(&mut self, id: NodeId) -> Result<(), StoreError> {
        self.node(id)?.fail();
        if self.strategy == Strategy::Consistent {
            if let Some(ring) = self.ring.as_mut() {
                ring.redistribute_keys(&self.nodes, id)?;
            }
        }
        Ok(())
    }

    pub fn recover_node(&mut self, id: NodeId) -> Result<(), StoreError> {
        self.node(id)?.recover(&self.nodes, self.strategy)?;
        if self.strategy == Strategy::Consistent {
            if let Some(ring) = self.ring.as_mut() {
                ring.recover_node(&self.nodes, id)?;
            }
        }
        Ok(())
    }

    pub fn nodes_status(&self) -> Vec<NodeStatus> {
        self.nodes
            .iter()
            .map(|n| NodeStatus {
                node_id: n.node_id(),
                status: if n.is_alive() { "alive" } else { "dead" },
                port: n.port(),
            })
            .collect()
    }

    // None unless consistent placement is active.
    pub fn nodes_for_key(&self, key: &str) -> Option<Vec<NodeId>> {
        self.ring.as_ref().map(|r| r.get_nodes_for_key(key))
    }
}
