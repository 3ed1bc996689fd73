// A replica node is one physical member of the store: a single-file
// redb database holding one kv_store table, plus an alive flag.
//
// The alive flag gates the public API only. It does not close the
// backing file: a dead node still has a readable database, and the
// redistribution path in the ring crate depends on scanning it
// (get_all_keys is deliberately ungated). Dead-node writes and reads
// are silent no-ops rather than errors so that broadcast operations
// tolerate partial failure without aborting.
//
// The file is created at node construction and persists across
// process restarts; node death in this system is a logical state the
// operator toggles, never a detected condition.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use redb::{Database, ReadableTable, TableDefinition};
use tracing::info;

use holdfast_base::{NodeId, Result, Strategy};

#[cfg(test)]
mod test;

const KV_STORE: TableDefinition<&str, &str> = TableDefinition::new("kv_store");

pub struct ReplicaNode {
    node_id: NodeId,
    port: u16,
    path: PathBuf,
    db: Database,
    // Mutations are serialized by the manager lock; the atomic only
    // lets gated ops take &self.
    alive: AtomicBool,
}

impl std::fmt::Debug for ReplicaNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplicaNode")
            .field("node_id", &self.node_id)
            .field("port", &self.port)
            .field("path", &self.path)
            .field("alive", &self.is_alive())
            .finish()
    }
}

impl ReplicaNode {
    // Opens (or creates) db/replica_<id>.db under data_dir and makes
    // sure the kv_store table exists so later read transactions never
    // see a missing table.
    pub fn create(node_id: NodeId, port: u16, data_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(data_dir)?;
        let path = data_dir.join(format!("replica_{node_id}.db"));
        let db = Database::create(&path)?;
        let wtx = db.begin_write()?;
        {
            let _ = wtx.open_table(KV_STORE)?;
        }
        wtx.commit()?;
        Ok(ReplicaNode {
            node_id,
            port,
            path,
            db,
            alive: AtomicBool::new(true),
        })
    }

    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Relaxed)
    }

    pub fn fail(&self) {
        info!(target: "holdfast", "node {} marked dead", self.node_id);
        self.alive.store(false, Ordering::Relaxed);
    }

    // Upsert. No-op when dead.
    pub fn write(&self, key: &str, value: &str) -> Result<()> {
        if !self.is_alive() {
            return Ok(());
        }
        let wtx = self.db.begin_write()?;
        {
            let mut tab = wtx.open_table(KV_STORE)?;
            tab.insert(key, value)?;
        }
        wtx.commit()?;
        Ok(())
    }

    // Most recent value written to this node, None when absent or dead.
    pub fn read(&self, key: &str) -> Result<Option<String>> {
        if !self.is_alive() {
            return Ok(None);
        }
        let rtx = self.db.begin_read()?;
        let tab = rtx.open_table(KV_STORE)?;
        Ok(tab.get(key)?.map(|v| v.value().to_string()))
    }

    // No-op when dead: a dead node keeps the key until it recovers
    // and resynchronizes.
    pub fn delete(&self, key: &str) -> Result<()> {
        if !self.is_alive() {
            return Ok(());
        }
        let wtx = self.db.begin_write()?;
        {
            let mut tab = wtx.open_table(KV_STORE)?;
            tab.remove(key)?;
        }
        wtx.commit()?;
        Ok(())
    }

    pub fn key_exists(&self, key: &str) -> Result<bool> {
        if !self.is_alive() {
            return Ok(false);
        }
        let rtx = self.db.begin_read()?;
        let tab = rtx.open_table(KV_STORE)?;
        Ok(tab.get(key)?.is_some())
    }

    // Raw snapshot of the backing file, readable regardless of the
    // alive flag. Order unspecified (redb yields key order).
    pub fn get_all_keys(&self) -> Result<Vec<(String, String)>> {
        let rtx = self.db.begin_read()?;
        let tab = rtx.open_table(KV_STORE)?;
        let mut out = Vec::new();
        for entry in tab.iter()? {
            let (k, v) = entry?;
            out.push((k.value().to_string(), v.value().to_string()));
        }
        Ok(out)
    }

    // Transition back to alive. Already-alive nodes are left alone.
    // Under full replication the revived node pulls itself back to
    // the union of its live peers; under consistent placement the
    // ring-level recovery protocol does the rehoming instead.
    pub fn recover(&self, peers: &[ReplicaNode], strategy: Strategy) -> Result<()> {
        if self.is_alive() {
            return Ok(());
        }
        self.alive.store(true, Ordering::Relaxed);
        info!(target: "holdfast", "node {} marked alive", self.node_id);
        if strategy == Strategy::Full {
            self.sync_with_active_nodes(peers)?;
        }
        Ok(())
    }

    // Ingest every live peer's full snapshot (in peer order: when two
    // peers disagree on a value the last one ingested wins), then
    // drop any local key no live peer holds. With no live peers at
    // all, self is left untouched.
    pub fn sync_with_active_nodes(&self, peers: &[ReplicaNode]) -> Result<()> {
        let mut union: BTreeSet<String> = BTreeSet::new();
        let mut saw_peer = false;
        for peer in peers {
            if !peer.is_alive() || peer.node_id == self.node_id {
                continue;
            }
            saw_peer = true;
            for (k, v) in peer.get_all_keys()? {
                self.write(&k, &v)?;
                union.insert(k);
            }
        }
        if !saw_peer {
            return Ok(());
        }
        for (k, _) in self.get_all_keys()? {
            if !union.contains(&k) {
                self.delete(&k)?;
            }
        }
        info!(target: "holdfast",
              "node {} resynced to {} keys from live peers", self.node_id, union.len());
        Ok(())
    }
}
