//! Replica set configuration.
//!
//! The configuration is populated once, before the protocol starts:
//! `add_replica` for every member, then the core's `on_init` fixes the
//! quorum size from the tolerated fault count. Public keys are kept as
//! opaque bytes so the configuration does not depend on a concrete
//! signature suite; the suite implementation interprets them.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;

use crate::primitives::ReplicaId;

/// Per-replica membership entry.
#[derive(Clone, Debug)]
pub struct ReplicaInfo {
    /// The replica's id.
    pub id: ReplicaId,
    /// Network address (owned by the transport layer; the core never
    /// dials it).
    pub addr: SocketAddr,
    /// Suite-specific public key bytes.
    pub pubkey: Vec<u8>,
}

/// Static configuration of the replica set.
#[derive(Clone, Debug)]
pub struct ReplicaConfig {
    /// Total number of replicas, `n = 3f + 1`.
    pub nreplicas: usize,
    /// Quorum size, `n - f`. Zero until `on_init` runs.
    pub nmajority: usize,
    /// The protocol timing unit. Timer durations are small multiples of
    /// this.
    pub delta: Duration,
    /// Heights divisible by this value are commit heights: the proposal
    /// runs the full echo/ack broadcast round and embeds the highest QC.
    /// Must be positive.
    pub commit_interval: u32,
    replicas: HashMap<ReplicaId, ReplicaInfo>,
}

impl Default for ReplicaConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl ReplicaConfig {
    /// Create an empty configuration with a 1-second delta and a commit
    /// interval of 1 (every height is a commit height).
    pub fn new() -> Self {
        ReplicaConfig {
            nreplicas: 0,
            nmajority: 0,
            delta: Duration::from_secs(1),
            commit_interval: 1,
            replicas: HashMap::new(),
        }
    }

    /// Register a replica. Configuration-time only; never call once the
    /// protocol is running.
    pub fn add_replica(&mut self, rid: ReplicaId, addr: SocketAddr, pubkey: Vec<u8>) {
        self.replicas.insert(rid, ReplicaInfo { id: rid, addr, pubkey });
        self.nreplicas = self.replicas.len();
    }

    /// Look up a member.
    pub fn replica(&self, rid: ReplicaId) -> Option<&ReplicaInfo> {
        self.replicas.get(&rid)
    }

    /// Look up a member's public key bytes.
    pub fn pubkey(&self, rid: ReplicaId) -> Option<&[u8]> {
        self.replicas.get(&rid).map(|info| info.pubkey.as_slice())
    }

    /// Whether `rid` is a configured member.
    pub fn contains(&self, rid: ReplicaId) -> bool {
        self.replicas.contains_key(&rid)
    }

    /// Iterate over all member ids (unordered).
    pub fn replica_ids(&self) -> impl Iterator<Item = ReplicaId> + '_ {
        self.replicas.keys().copied()
    }
}
