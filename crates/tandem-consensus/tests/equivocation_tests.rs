//! Equivocation detection: a second distinct block at the same height in
//! the same view triggers exactly one blame broadcast.

mod common;

use common::four_replicas;
use tandem_consensus::Proposal;
use tandem_types::ReplicaId;

#[test]
fn second_block_at_same_height_triggers_exactly_one_blame() {
    let mut h = four_replicas();
    let genesis = h.core.genesis();

    let b1 = h.deliver_child(genesis, Vec::new(), vec![1]);
    let b1_prime = h.deliver_child(genesis, Vec::new(), vec![2]);
    assert_ne!(b1, b1_prime);

    let prop = Proposal {
        proposer: ReplicaId::new(1),
        blk: b1,
    };
    h.core.on_receive_proposal(&prop).unwrap();
    assert!(h.core.hooks().blames.is_empty());
    assert_eq!(h.core.vheight(), 1, "first proposal is voteworthy");

    let prop_prime = Proposal {
        proposer: ReplicaId::new(1),
        blk: b1_prime,
    };
    h.core.on_receive_proposal(&prop_prime).unwrap();

    assert_eq!(h.core.hooks().blames.len(), 1);
    assert_eq!(h.core.hooks().blames[0].view, 0);
    assert_eq!(h.core.hooks().blames[0].blamer, ReplicaId::new(0));
    assert_eq!(
        h.core.hooks().blame_timer_stop_count,
        1,
        "blaming stops the blame timer"
    );
}

#[test]
fn a_third_conflicting_block_does_not_blame_again() {
    let mut h = four_replicas();
    let genesis = h.core.genesis();

    let blocks = [
        h.deliver_child(genesis, Vec::new(), vec![1]),
        h.deliver_child(genesis, Vec::new(), vec![2]),
        h.deliver_child(genesis, Vec::new(), vec![3]),
    ];
    for blk in blocks {
        let prop = Proposal {
            proposer: ReplicaId::new(1),
            blk,
        };
        h.core.on_receive_proposal(&prop).unwrap();
    }
    assert_eq!(h.core.hooks().blames.len(), 1, "one blame per discovery");
}

#[test]
fn equivocating_proposal_is_not_propagated() {
    let mut h = four_replicas();
    let genesis = h.core.genesis();

    let b1 = h.deliver_child(genesis, Vec::new(), vec![1]);
    let b1_prime = h.deliver_child(genesis, Vec::new(), vec![2]);

    h.core
        .on_receive_proposal(&Proposal {
            proposer: ReplicaId::new(1),
            blk: b1,
        })
        .unwrap();
    let echoes_after_first = h.core.hooks().echoes_broadcast.len();

    h.core
        .on_receive_proposal(&Proposal {
            proposer: ReplicaId::new(1),
            blk: b1_prime,
        })
        .unwrap();
    assert_eq!(
        h.core.hooks().echoes_broadcast.len(),
        echoes_after_first,
        "no echo round for the equivocating block"
    );
}

#[test]
fn replaying_the_same_proposal_does_not_blame() {
    let mut h = four_replicas();
    let genesis = h.core.genesis();
    let b1 = h.deliver_child(genesis, Vec::new(), vec![1]);

    let prop = Proposal {
        proposer: ReplicaId::new(1),
        blk: b1,
    };
    h.core.on_receive_proposal(&prop).unwrap();
    h.core.on_receive_proposal(&prop).unwrap();
    assert!(h.core.hooks().blames.is_empty());
}
