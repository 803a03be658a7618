//! Pruning: stale ancestors are released, everything the protocol still
//! points at survives.

mod common;

use common::four_replicas;

#[test]
fn prune_releases_blocks_below_the_staleness_window() {
    let mut h = four_replicas();
    let genesis = h.core.genesis();
    let chain = h.deliver_chain(genesis, 10);
    let hashes: Vec<_> = chain.iter().map(|&b| h.hash_of(b)).collect();

    h.pre_commit_quorum(chain[9]);
    assert_eq!(h.core.last_exec(), chain[9]);

    h.core.prune(3);

    // Heights 1..=7 are gone, 8..=10 remain.
    for hash in &hashes[..7] {
        assert!(h.core.store().find(hash).is_none());
    }
    for hash in &hashes[7..] {
        assert!(h.core.store().find(hash).is_some());
    }
}

#[test]
fn prune_keeps_genesis_b_exec_hqc_and_tails() {
    let mut h = four_replicas();
    let genesis = h.core.genesis();
    let chain = h.deliver_chain(genesis, 10);
    let b10_hash = h.hash_of(chain[9]);

    // Give b10 a real QC so hqc points above the pruned region.
    for rid in [0u16, 1, 2] {
        let vote = h.vote_from(rid, &b10_hash);
        h.core.on_receive_vote(&vote).unwrap();
    }
    assert_eq!(h.core.hqc().0, chain[9]);
    h.pre_commit_quorum(chain[9]);

    h.core.prune(3);

    assert!(h.core.store().get(h.core.genesis()).is_some());
    assert!(h.core.store().get(h.core.last_exec()).is_some());
    assert!(h.core.store().get(h.core.hqc().0).is_some());
    for &(_, tail) in h.core.tails() {
        assert!(h.core.store().get(tail).is_some());
    }
}

#[test]
fn prune_with_a_short_chain_is_a_no_op() {
    let mut h = four_replicas();
    let genesis = h.core.genesis();
    let chain = h.deliver_chain(genesis, 2);
    h.pre_commit_quorum(chain[1]);

    let live_before = h.core.store().len();
    h.core.prune(5);
    assert_eq!(h.core.store().len(), live_before, "window larger than chain");
}

#[test]
fn pruning_twice_is_idempotent() {
    let mut h = four_replicas();
    let genesis = h.core.genesis();
    let chain = h.deliver_chain(genesis, 10);
    h.pre_commit_quorum(chain[9]);

    h.core.prune(3);
    let live_after_first = h.core.store().len();
    h.core.prune(3);
    assert_eq!(h.core.store().len(), live_after_first);
}
