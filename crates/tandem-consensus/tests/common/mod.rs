//! Shared test harness: a core under test for replica 0 plus the key
//! material of the whole replica set, so tests can forge valid messages
//! from any peer.

#![allow(dead_code)]

use std::sync::Arc;

use rand::rngs::OsRng;
use tandem_consensus::{
    Ack, Blame, Block, BlockRef, ConsensusCore, Echo, PreCommit, RecordingHooks, Vote,
};
use tandem_crypto::{generate_keypair, CertScheme, Ed25519Scheme, SecretKey};
use tandem_hash::{blame_obj_hash, pre_commit_obj_hash, propagate_obj_hash, vote_obj_hash};
use tandem_types::{Hash32, PropagateKind, ReplicaId, View};

pub struct Harness {
    pub keys: Vec<SecretKey>,
    pub core: ConsensusCore<RecordingHooks>,
}

/// The standard scenario configuration: `n = 4`, `f = 1`, `delta = 1.0`,
/// replica ids `0..3`, the core under test running as replica 0.
pub fn four_replicas() -> Harness {
    setup(4, 1, 1.0)
}

pub fn setup(n: u16, nfaulty: usize, delta: f64) -> Harness {
    let scheme: Arc<dyn CertScheme> = Arc::new(Ed25519Scheme);
    let mut keys = Vec::new();
    let mut pubkeys = Vec::new();
    for _ in 0..n {
        let (sk, pk) = generate_keypair(&mut OsRng);
        keys.push(sk);
        pubkeys.push(pk);
    }
    let mut core = ConsensusCore::new(
        ReplicaId::new(0),
        keys[0].clone(),
        scheme,
        RecordingHooks::new(),
    );
    for (i, pk) in pubkeys.iter().enumerate() {
        core.add_replica(
            ReplicaId::new(i as u16),
            format!("127.0.0.1:{}", 9000 + i).parse().unwrap(),
            pk.clone(),
        );
    }
    core.on_init(nfaulty, delta);
    Harness { keys, core }
}

impl Harness {
    pub fn hash_of(&self, blk: BlockRef) -> Hash32 {
        self.core.store().get(blk).unwrap().hash()
    }

    /// Store and deliver a child of `parent` (no embedded QC).
    pub fn deliver_child(&mut self, parent: BlockRef, cmds: Vec<Hash32>, extra: Vec<u8>) -> BlockRef {
        let parent_hash = self.hash_of(parent);
        let blk = Block::new(vec![parent_hash], cmds, None, None, extra);
        let r = self.core.store_mut().add_blk(blk);
        assert!(self.core.on_deliver_blk(r).unwrap());
        r
    }

    /// Store and deliver a linear chain of `len` empty blocks on top of
    /// `parent`, returning the refs lowest-first.
    pub fn deliver_chain(&mut self, parent: BlockRef, len: usize) -> Vec<BlockRef> {
        let mut refs = Vec::with_capacity(len);
        let mut tip = parent;
        for _ in 0..len {
            tip = self.deliver_child(tip, Vec::new(), Vec::new());
            refs.push(tip);
        }
        refs
    }

    pub fn echo_from(&self, rid: u16, blk_hash: &Hash32) -> Echo {
        let cert = self
            .core
            .scheme()
            .create_part_cert(&self.keys[rid as usize], &propagate_obj_hash(blk_hash));
        Echo {
            rid: ReplicaId::new(rid),
            blk_hash: *blk_hash,
            kind: PropagateKind::Block,
            cert,
        }
    }

    pub fn ack_from(&self, rid: u16, blk_hash: &Hash32) -> Ack {
        let cert = self
            .core
            .scheme()
            .create_part_cert(&self.keys[rid as usize], &propagate_obj_hash(blk_hash));
        Ack {
            rid: ReplicaId::new(rid),
            blk_hash: *blk_hash,
            kind: PropagateKind::Block,
            cert,
        }
    }

    pub fn vote_from(&self, rid: u16, blk_hash: &Hash32) -> Vote {
        let cert = self
            .core
            .scheme()
            .create_part_cert(&self.keys[rid as usize], &vote_obj_hash(blk_hash));
        Vote {
            voter: ReplicaId::new(rid),
            blk_hash: *blk_hash,
            cert,
        }
    }

    pub fn pre_commit_from(&self, rid: u16, blk_hash: &Hash32) -> PreCommit {
        let cert = self
            .core
            .scheme()
            .create_part_cert(&self.keys[rid as usize], &pre_commit_obj_hash(blk_hash));
        PreCommit {
            rid: ReplicaId::new(rid),
            blk_hash: *blk_hash,
            cert,
        }
    }

    pub fn blame_from(&self, rid: u16, view: View) -> Blame {
        let cert = self
            .core
            .scheme()
            .create_part_cert(&self.keys[rid as usize], &blame_obj_hash(view));
        Blame {
            blamer: ReplicaId::new(rid),
            view,
            cert,
        }
    }

    /// Drive `blk` through a full pre-commit quorum: the local replica's
    /// timer fires first, then peers 1 and 2 pre-commit.
    pub fn pre_commit_quorum(&mut self, blk: BlockRef) {
        let hash = self.hash_of(blk);
        self.core.on_pre_commit_timeout(blk).unwrap();
        for rid in [1u16, 2] {
            let pc = self.pre_commit_from(rid, &hash);
            self.core.on_receive_pre_commit(&pc).unwrap();
        }
    }
}
