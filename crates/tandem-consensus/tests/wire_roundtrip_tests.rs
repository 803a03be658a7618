//! Wire round-trip laws: serialize then deserialize is the identity on
//! every message type (given the same configuration), and parse-then-
//! verify succeeds exactly when the original verified.

mod common;

use common::four_replicas;
use tandem_consensus::{
    Ack, Blame, BlameNotify, Block, BlockStore, Echo, Finality, Notify, PreCommit, Proposal, Vote,
};
use tandem_crypto::{CertScheme, QuorumCert};
use tandem_hash::{blame_obj_hash, vote_obj_hash};
use tandem_types::ReplicaId;
use tandem_wire::WireError;

#[test]
fn vote_round_trips_and_verifies() {
    let h = four_replicas();
    let vote = h.vote_from(1, &[0x11u8; 32]);
    assert!(vote.verify(h.core.config()));

    let mut bytes = Vec::new();
    vote.encode(&mut bytes);
    let mut cursor = bytes.as_slice();
    let decoded = Vote::decode(&mut cursor, h.core.scheme().as_ref()).unwrap();
    assert!(cursor.is_empty());

    assert_eq!(decoded.voter, vote.voter);
    assert_eq!(decoded.blk_hash, vote.blk_hash);
    let mut reencoded = Vec::new();
    decoded.encode(&mut reencoded);
    assert_eq!(reencoded, bytes);
    assert!(decoded.verify(h.core.config()));
}

#[test]
fn tampered_vote_fails_verification_after_parsing() {
    let h = four_replicas();
    let vote = h.vote_from(1, &[0x11u8; 32]);

    let mut bytes = Vec::new();
    vote.encode(&mut bytes);
    let last = bytes.len() - 1;
    bytes[last] ^= 0x01;

    let mut cursor = bytes.as_slice();
    let decoded = Vote::decode(&mut cursor, h.core.scheme().as_ref()).unwrap();
    assert!(!decoded.verify(h.core.config()));
}

#[test]
fn vote_from_an_unknown_replica_does_not_verify() {
    let h = four_replicas();
    let mut vote = h.vote_from(1, &[0x11u8; 32]);
    vote.voter = ReplicaId::new(9);
    assert!(!vote.verify(h.core.config()));
}

#[test]
fn echo_and_ack_round_trip() {
    let h = four_replicas();
    let echo = h.echo_from(2, &[0x22u8; 32]);
    let ack = h.ack_from(3, &[0x22u8; 32]);

    let mut bytes = Vec::new();
    echo.encode(&mut bytes);
    let decoded = Echo::decode(&mut bytes.as_slice(), h.core.scheme().as_ref()).unwrap();
    let mut reencoded = Vec::new();
    decoded.encode(&mut reencoded);
    assert_eq!(reencoded, bytes);
    assert!(decoded.verify(h.core.config()));

    let mut bytes = Vec::new();
    ack.encode(&mut bytes);
    let decoded = Ack::decode(&mut bytes.as_slice(), h.core.scheme().as_ref()).unwrap();
    let mut reencoded = Vec::new();
    decoded.encode(&mut reencoded);
    assert_eq!(reencoded, bytes);
    assert!(decoded.verify(h.core.config()));
}

#[test]
fn echo_with_unknown_opcode_is_rejected() {
    let h = four_replicas();
    let echo = h.echo_from(2, &[0x22u8; 32]);
    let mut bytes = Vec::new();
    echo.encode(&mut bytes);
    bytes[2 + 32] = 0x5a; // opcode byte after rid(u16) and hash(32)

    let err = Echo::decode(&mut bytes.as_slice(), h.core.scheme().as_ref()).unwrap_err();
    assert_eq!(err, WireError::InvalidValue("propagate opcode"));
}

#[test]
fn pre_commit_round_trips_and_verifies() {
    let h = four_replicas();
    let pc = h.pre_commit_from(1, &[0x33u8; 32]);

    let mut bytes = Vec::new();
    pc.encode(&mut bytes);
    let decoded = PreCommit::decode(&mut bytes.as_slice(), h.core.scheme().as_ref()).unwrap();
    let mut reencoded = Vec::new();
    decoded.encode(&mut reencoded);
    assert_eq!(reencoded, bytes);
    assert!(decoded.verify(h.core.config()));
}

#[test]
fn blame_round_trips_and_verifies() {
    let h = four_replicas();
    let blame = h.blame_from(2, 7);

    let mut bytes = Vec::new();
    blame.encode(&mut bytes);
    let decoded = Blame::decode(&mut bytes.as_slice(), h.core.scheme().as_ref()).unwrap();
    assert_eq!(decoded.view, 7);
    let mut reencoded = Vec::new();
    decoded.encode(&mut reencoded);
    assert_eq!(reencoded, bytes);
    assert!(decoded.verify(h.core.config()));
}

fn quorum_cert_over(
    h: &common::Harness,
    obj_hash: tandem_types::Hash32,
) -> Box<dyn QuorumCert> {
    let scheme = h.core.scheme();
    let mut qc = scheme.create_quorum_cert(&obj_hash);
    for rid in 0..3u16 {
        let part = scheme.create_part_cert(&h.keys[rid as usize], &obj_hash);
        qc.add_part(ReplicaId::new(rid), part.as_ref());
    }
    qc.compute();
    qc
}

#[test]
fn notify_round_trips_and_verifies() {
    let h = four_replicas();
    let blk_hash = [0x44u8; 32];
    let notify = Notify {
        blk_hash,
        qc: quorum_cert_over(&h, vote_obj_hash(&blk_hash)),
    };
    assert!(notify.verify(h.core.config()));

    let mut bytes = Vec::new();
    notify.encode(&mut bytes);
    let decoded = Notify::decode(&mut bytes.as_slice(), h.core.scheme().as_ref()).unwrap();
    let mut reencoded = Vec::new();
    decoded.encode(&mut reencoded);
    assert_eq!(reencoded, bytes);
    assert!(decoded.verify(h.core.config()));
}

#[test]
fn blamenotify_round_trips_and_verifies() {
    let h = four_replicas();
    let hqc_hash = h.hash_of(h.core.genesis());
    let bn = BlameNotify {
        view: 3,
        hqc_hash,
        hqc_qc: quorum_cert_over(&h, vote_obj_hash(&hqc_hash)),
        qc: quorum_cert_over(&h, blame_obj_hash(3)),
    };
    assert!(bn.verify(h.core.config()));

    let mut bytes = Vec::new();
    bn.encode(&mut bytes);
    let decoded = BlameNotify::decode(&mut bytes.as_slice(), h.core.scheme().as_ref()).unwrap();
    assert_eq!(decoded.view, 3);
    assert_eq!(decoded.hqc_hash, hqc_hash);
    let mut reencoded = Vec::new();
    decoded.encode(&mut reencoded);
    assert_eq!(reencoded, bytes);
    assert!(decoded.verify(h.core.config()));
}

#[test]
fn blamenotify_with_mismatched_view_fails_verification() {
    let h = four_replicas();
    let hqc_hash = h.hash_of(h.core.genesis());
    let bn = BlameNotify {
        view: 4, // the blame quorum below signs view 3
        hqc_hash,
        hqc_qc: quorum_cert_over(&h, vote_obj_hash(&hqc_hash)),
        qc: quorum_cert_over(&h, blame_obj_hash(3)),
    };
    assert!(!bn.verify(h.core.config()));
}

#[test]
fn proposal_round_trips_through_a_fresh_store() {
    let mut h = four_replicas();
    let genesis_hash = h.hash_of(h.core.genesis());
    let qc = quorum_cert_over(&h, vote_obj_hash(&genesis_hash));
    let blk = Block::new(
        vec![genesis_hash],
        vec![[0xA1u8; 32], [0xA2u8; 32]],
        Some(qc),
        Some(genesis_hash),
        vec![1, 2, 3],
    );
    let blk_hash = blk.hash();
    let blk_ref = h.core.store_mut().add_blk(blk);
    let prop = Proposal {
        proposer: ReplicaId::new(0),
        blk: blk_ref,
    };

    let mut bytes = Vec::new();
    prop.encode(h.core.store(), &mut bytes).unwrap();

    let mut receiver_store = BlockStore::new();
    let mut cursor = bytes.as_slice();
    let decoded =
        Proposal::decode(&mut cursor, h.core.scheme().as_ref(), &mut receiver_store).unwrap();
    assert!(cursor.is_empty());
    assert_eq!(decoded.proposer, ReplicaId::new(0));

    // Content addressing: the receiver derives the same block hash.
    let received = receiver_store.get(decoded.blk).unwrap();
    assert_eq!(received.hash(), blk_hash);
    assert_eq!(received.cmds.len(), 2);
    assert_eq!(received.extra, vec![1, 2, 3]);
    assert_eq!(received.qc_ref_hash, Some(genesis_hash));

    let mut reencoded = Vec::new();
    Proposal {
        proposer: decoded.proposer,
        blk: decoded.blk,
    }
    .encode(&receiver_store, &mut reencoded)
    .unwrap();
    assert_eq!(reencoded, bytes);
}

#[test]
fn finality_round_trips_with_and_without_block_hash() {
    let committed = Finality {
        rid: ReplicaId::new(2),
        decision: 1,
        cmd_idx: 5,
        cmd_height: 9,
        cmd_hash: [0xC1u8; 32],
        blk_hash: [0xC2u8; 32],
    };
    let mut bytes = Vec::new();
    committed.encode(&mut bytes);
    let decoded = Finality::decode(&mut bytes.as_slice()).unwrap();
    assert_eq!(decoded, committed);

    let undecided = Finality {
        decision: 0,
        blk_hash: [0u8; 32],
        ..committed
    };
    let mut bytes = Vec::new();
    undecided.encode(&mut bytes);
    assert_eq!(bytes.len(), 2 + 1 + 4 + 4 + 32, "no trailing block hash");
    let decoded = Finality::decode(&mut bytes.as_slice()).unwrap();
    assert_eq!(decoded, undecided);
}

#[test]
fn truncated_messages_fail_cleanly() {
    let h = four_replicas();
    let vote = h.vote_from(1, &[0x11u8; 32]);
    let mut bytes = Vec::new();
    vote.encode(&mut bytes);
    bytes.truncate(bytes.len() / 2);

    let err = Vote::decode(&mut bytes.as_slice(), h.core.scheme().as_ref()).unwrap_err();
    assert_eq!(err, WireError::UnexpectedEof);
}
