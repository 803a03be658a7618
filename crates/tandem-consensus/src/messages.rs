//! Protocol messages.
//!
//! Each message is a flat big-endian byte stream; field order is part of
//! the format. Deserialization takes the certificate scheme (and, for
//! proposals, the block store) as an explicit parser context — the
//! deserializer needs it to reconstruct the polymorphic certificates.
//!
//! Verification is offered twice: a synchronous `verify(config)` and a
//! `verify_promise(config, pool)` that runs the signature check on the
//! verification pool and resolves a one-shot receiver. A message must not
//! be acted on before its verification resolves positively.

use tandem_crypto::{CertScheme, PartialCert, QuorumCert, VerifyPool};
use tandem_hash::{blame_obj_hash, pre_commit_obj_hash, propagate_obj_hash, short_hex, vote_obj_hash};
use tandem_types::{Hash32, Height, PropagateKind, ReplicaConfig, ReplicaId, View};
use tandem_wire::io::{
    get_hash32, get_i8, get_u16, get_u32, get_u8, put_bytes, put_i8, put_u16, put_u32, put_u8,
};
use tandem_wire::WireError;
use tokio::sync::oneshot;

use crate::block::Block;
use crate::store::{BlockRef, BlockStore};

fn verify_part(
    cert: &dyn PartialCert,
    config: &ReplicaConfig,
    signer: ReplicaId,
    expected_obj: &Hash32,
) -> bool {
    let Some(pubkey) = config.pubkey(signer) else {
        return false;
    };
    cert.verify(pubkey) && cert.obj_hash() == *expected_obj
}

fn verify_part_promise(
    cert: &dyn PartialCert,
    config: &ReplicaConfig,
    signer: ReplicaId,
    expected_obj: Hash32,
    pool: &VerifyPool,
) -> oneshot::Receiver<bool> {
    let cert = cert.clone_box();
    let pubkey = config.pubkey(signer).map(|pk| pk.to_vec());
    pool.verify(move || {
        let Some(pubkey) = pubkey else {
            return false;
        };
        cert.verify(&pubkey) && cert.obj_hash() == expected_obj
    })
}

// ============================================================================
// Proposal
// ============================================================================

/// A proposal: a proposer id plus a block already resident in the store.
///
/// On the wire the whole block travels inline; decoding parses it and
/// inserts it into the store, so the in-memory proposal is just a handle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Proposal {
    pub proposer: ReplicaId,
    /// The block being proposed.
    pub blk: BlockRef,
}

impl Proposal {
    /// Wire layout: `proposer(u16) ∥ Block`.
    pub fn encode(&self, store: &BlockStore, out: &mut Vec<u8>) -> Result<(), WireError> {
        let blk = store
            .get(self.blk)
            .ok_or(WireError::InvalidValue("proposal references released block"))?;
        put_u16(out, self.proposer.as_u16());
        blk.encode_content(out);
        Ok(())
    }

    /// Parse and store the proposed block. The caller still owes the
    /// delivery protocol (`on_deliver_blk`) before the core may reason
    /// about it.
    pub fn decode(
        input: &mut &[u8],
        scheme: &dyn CertScheme,
        store: &mut BlockStore,
    ) -> Result<Self, WireError> {
        let proposer = ReplicaId::new(get_u16(input)?);
        let blk = Block::decode(input, scheme)?;
        let blk = store.add_blk(blk);
        Ok(Proposal { proposer, blk })
    }
}

// ============================================================================
// Vote
// ============================================================================

/// A vote: one replica's partial certificate over `H(VOTE ∥ blk_hash)`.
#[derive(Clone, Debug)]
pub struct Vote {
    pub voter: ReplicaId,
    /// Hash of the block being voted for.
    pub blk_hash: Hash32,
    /// Proof of validity for the vote.
    pub cert: Box<dyn PartialCert>,
}

impl Vote {
    /// Wire layout: `voter(u16) ∥ blk_hash(32B) ∥ part_cert`.
    pub fn encode(&self, out: &mut Vec<u8>) {
        put_u16(out, self.voter.as_u16());
        put_bytes(out, &self.blk_hash);
        self.cert.encode(out);
    }

    pub fn decode(input: &mut &[u8], scheme: &dyn CertScheme) -> Result<Self, WireError> {
        let voter = ReplicaId::new(get_u16(input)?);
        let blk_hash = get_hash32(input)?;
        let cert = scheme.parse_part_cert(input)?;
        Ok(Vote {
            voter,
            blk_hash,
            cert,
        })
    }

    pub fn verify(&self, config: &ReplicaConfig) -> bool {
        verify_part(
            self.cert.as_ref(),
            config,
            self.voter,
            &vote_obj_hash(&self.blk_hash),
        )
    }

    pub fn verify_promise(&self, config: &ReplicaConfig, pool: &VerifyPool) -> oneshot::Receiver<bool> {
        verify_part_promise(
            self.cert.as_ref(),
            config,
            self.voter,
            vote_obj_hash(&self.blk_hash),
            pool,
        )
    }
}

impl std::fmt::Display for Vote {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "<vote rid={} blk={}>", self.voter, short_hex(&self.blk_hash))
    }
}

// ============================================================================
// Notify
// ============================================================================

/// Carries the sender's highest certified block into a new view.
#[derive(Clone, Debug)]
pub struct Notify {
    pub blk_hash: Hash32,
    pub qc: Box<dyn QuorumCert>,
}

impl Notify {
    /// Wire layout: `blk_hash(32B) ∥ quorum_cert`.
    pub fn encode(&self, out: &mut Vec<u8>) {
        put_bytes(out, &self.blk_hash);
        self.qc.encode(out);
    }

    pub fn decode(input: &mut &[u8], scheme: &dyn CertScheme) -> Result<Self, WireError> {
        let blk_hash = get_hash32(input)?;
        let qc = scheme.parse_quorum_cert(input)?;
        Ok(Notify { blk_hash, qc })
    }

    pub fn verify(&self, config: &ReplicaConfig) -> bool {
        self.qc.verify(config) && self.qc.obj_hash() == vote_obj_hash(&self.blk_hash)
    }

    pub fn verify_promise(&self, config: &ReplicaConfig, pool: &VerifyPool) -> oneshot::Receiver<bool> {
        let qc = self.qc.clone();
        let config = config.clone();
        let expected = vote_obj_hash(&self.blk_hash);
        pool.verify(move || qc.verify(&config) && qc.obj_hash() == expected)
    }
}

impl std::fmt::Display for Notify {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "<notify blk={}>", short_hex(&self.blk_hash))
    }
}

// ============================================================================
// Blame
// ============================================================================

/// A signed statement that the current view failed to make progress or
/// equivocated.
#[derive(Clone, Debug)]
pub struct Blame {
    pub blamer: ReplicaId,
    pub view: View,
    pub cert: Box<dyn PartialCert>,
}

impl Blame {
    /// Wire layout: `blamer(u16) ∥ view(u32) ∥ part_cert`.
    pub fn encode(&self, out: &mut Vec<u8>) {
        put_u16(out, self.blamer.as_u16());
        put_u32(out, self.view);
        self.cert.encode(out);
    }

    pub fn decode(input: &mut &[u8], scheme: &dyn CertScheme) -> Result<Self, WireError> {
        let blamer = ReplicaId::new(get_u16(input)?);
        let view = get_u32(input)?;
        let cert = scheme.parse_part_cert(input)?;
        Ok(Blame { blamer, view, cert })
    }

    pub fn verify(&self, config: &ReplicaConfig) -> bool {
        verify_part(self.cert.as_ref(), config, self.blamer, &blame_obj_hash(self.view))
    }

    pub fn verify_promise(&self, config: &ReplicaConfig, pool: &VerifyPool) -> oneshot::Receiver<bool> {
        verify_part_promise(
            self.cert.as_ref(),
            config,
            self.blamer,
            blame_obj_hash(self.view),
            pool,
        )
    }
}

impl std::fmt::Display for Blame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "<blame rid={} view={}>", self.blamer, self.view)
    }
}

// ============================================================================
// BlameNotify
// ============================================================================

/// Proof of a blame quorum, paired with the sender's highest QC so the
/// next view starts from it.
#[derive(Clone, Debug)]
pub struct BlameNotify {
    pub view: View,
    pub hqc_hash: Hash32,
    pub hqc_qc: Box<dyn QuorumCert>,
    pub qc: Box<dyn QuorumCert>,
}

impl BlameNotify {
    /// Wire layout: `view(u32) ∥ hqc_hash(32B) ∥ hqc_qc ∥ qc`.
    pub fn encode(&self, out: &mut Vec<u8>) {
        put_u32(out, self.view);
        put_bytes(out, &self.hqc_hash);
        self.hqc_qc.encode(out);
        self.qc.encode(out);
    }

    pub fn decode(input: &mut &[u8], scheme: &dyn CertScheme) -> Result<Self, WireError> {
        let view = get_u32(input)?;
        let hqc_hash = get_hash32(input)?;
        let hqc_qc = scheme.parse_quorum_cert(input)?;
        let qc = scheme.parse_quorum_cert(input)?;
        Ok(BlameNotify {
            view,
            hqc_hash,
            hqc_qc,
            qc,
        })
    }

    pub fn verify(&self, config: &ReplicaConfig) -> bool {
        self.qc.obj_hash() == blame_obj_hash(self.view)
            && self.hqc_qc.obj_hash() == vote_obj_hash(&self.hqc_hash)
            && self.qc.verify(config)
            && self.hqc_qc.verify(config)
    }

    pub fn verify_promise(&self, config: &ReplicaConfig, pool: &VerifyPool) -> oneshot::Receiver<bool> {
        let qc = self.qc.clone();
        let hqc_qc = self.hqc_qc.clone();
        let config = config.clone();
        let blame_obj = blame_obj_hash(self.view);
        let hqc_obj = vote_obj_hash(&self.hqc_hash);
        pool.verify(move || {
            qc.obj_hash() == blame_obj
                && hqc_qc.obj_hash() == hqc_obj
                && qc.verify(&config)
                && hqc_qc.verify(&config)
        })
    }
}

impl std::fmt::Display for BlameNotify {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "<blame notify view={}>", self.view)
    }
}

// ============================================================================
// Echo / Ack
// ============================================================================

/// First round of the propagation phase: "I hold this message".
#[derive(Clone, Debug)]
pub struct Echo {
    pub rid: ReplicaId,
    /// Hash of the message being propagated (a block hash today).
    pub blk_hash: Hash32,
    /// What is being propagated.
    pub kind: PropagateKind,
    pub cert: Box<dyn PartialCert>,
}

/// Second round of the propagation phase: "a quorum echoed this message".
#[derive(Clone, Debug)]
pub struct Ack {
    pub rid: ReplicaId,
    pub blk_hash: Hash32,
    pub kind: PropagateKind,
    pub cert: Box<dyn PartialCert>,
}

macro_rules! propagate_msg_impl {
    ($name:ident, $label:literal) => {
        impl $name {
            /// Wire layout: `rid(u16) ∥ blk_hash(32B) ∥ opcode(u8) ∥ part_cert`.
            pub fn encode(&self, out: &mut Vec<u8>) {
                put_u16(out, self.rid.as_u16());
                put_bytes(out, &self.blk_hash);
                put_u8(out, self.kind.opcode());
                self.cert.encode(out);
            }

            pub fn decode(input: &mut &[u8], scheme: &dyn CertScheme) -> Result<Self, WireError> {
                let rid = ReplicaId::new(get_u16(input)?);
                let blk_hash = get_hash32(input)?;
                let kind = PropagateKind::from_opcode(get_u8(input)?)
                    .ok_or(WireError::InvalidValue("propagate opcode"))?;
                let cert = scheme.parse_part_cert(input)?;
                Ok($name {
                    rid,
                    blk_hash,
                    kind,
                    cert,
                })
            }

            pub fn verify(&self, config: &ReplicaConfig) -> bool {
                verify_part(
                    self.cert.as_ref(),
                    config,
                    self.rid,
                    &propagate_obj_hash(&self.blk_hash),
                )
            }

            pub fn verify_promise(
                &self,
                config: &ReplicaConfig,
                pool: &VerifyPool,
            ) -> oneshot::Receiver<bool> {
                verify_part_promise(
                    self.cert.as_ref(),
                    config,
                    self.rid,
                    propagate_obj_hash(&self.blk_hash),
                    pool,
                )
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, concat!("<", $label, " rid={} msg={}>"), self.rid, short_hex(&self.blk_hash))
            }
        }
    };
}

propagate_msg_impl!(Echo, "echo");
propagate_msg_impl!(Ack, "ack");

// ============================================================================
// PreCommit
// ============================================================================

/// A signed statement that the sender has voted and locked on a block.
#[derive(Clone, Debug)]
pub struct PreCommit {
    pub rid: ReplicaId,
    pub blk_hash: Hash32,
    pub cert: Box<dyn PartialCert>,
}

impl PreCommit {
    /// Wire layout: `rid(u16) ∥ blk_hash(32B) ∥ part_cert`.
    pub fn encode(&self, out: &mut Vec<u8>) {
        put_u16(out, self.rid.as_u16());
        put_bytes(out, &self.blk_hash);
        self.cert.encode(out);
    }

    pub fn decode(input: &mut &[u8], scheme: &dyn CertScheme) -> Result<Self, WireError> {
        let rid = ReplicaId::new(get_u16(input)?);
        let blk_hash = get_hash32(input)?;
        let cert = scheme.parse_part_cert(input)?;
        Ok(PreCommit {
            rid,
            blk_hash,
            cert,
        })
    }

    pub fn verify(&self, config: &ReplicaConfig) -> bool {
        verify_part(
            self.cert.as_ref(),
            config,
            self.rid,
            &pre_commit_obj_hash(&self.blk_hash),
        )
    }

    pub fn verify_promise(&self, config: &ReplicaConfig, pool: &VerifyPool) -> oneshot::Receiver<bool> {
        verify_part_promise(
            self.cert.as_ref(),
            config,
            self.rid,
            pre_commit_obj_hash(&self.blk_hash),
            pool,
        )
    }
}

impl std::fmt::Display for PreCommit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "<pre_commit rid={} blk={}>", self.rid, short_hex(&self.blk_hash))
    }
}

// ============================================================================
// Finality
// ============================================================================

/// Externally visible decision event, one per command of a committed
/// block.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Finality {
    pub rid: ReplicaId,
    /// 1 = committed.
    pub decision: i8,
    /// Index of the command within its block.
    pub cmd_idx: u32,
    /// Height of the deciding block.
    pub cmd_height: Height,
    pub cmd_hash: Hash32,
    /// Hash of the deciding block; meaningful only when `decision == 1`.
    pub blk_hash: Hash32,
}

impl Finality {
    /// Wire layout: `rid(u16) ∥ decision(i8) ∥ cmd_idx(u32) ∥ cmd_height(u32)
    /// ∥ cmd_hash(32B) [∥ blk_hash(32B) if decision == 1]`.
    pub fn encode(&self, out: &mut Vec<u8>) {
        put_u16(out, self.rid.as_u16());
        put_i8(out, self.decision);
        put_u32(out, self.cmd_idx);
        put_u32(out, self.cmd_height);
        put_bytes(out, &self.cmd_hash);
        if self.decision == 1 {
            put_bytes(out, &self.blk_hash);
        }
    }

    pub fn decode(input: &mut &[u8]) -> Result<Self, WireError> {
        let rid = ReplicaId::new(get_u16(input)?);
        let decision = get_i8(input)?;
        let cmd_idx = get_u32(input)?;
        let cmd_height = get_u32(input)?;
        let cmd_hash = get_hash32(input)?;
        let blk_hash = if decision == 1 { get_hash32(input)? } else { [0u8; 32] };
        Ok(Finality {
            rid,
            decision,
            cmd_idx,
            cmd_height,
            cmd_hash,
            blk_hash,
        })
    }
}

impl std::fmt::Display for Finality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "<fin decision={} cmd_idx={} cmd_height={} cmd={} blk={}>",
            self.decision,
            self.cmd_idx,
            self.cmd_height,
            short_hex(&self.cmd_hash),
            short_hex(&self.blk_hash)
        )
    }
}

// ============================================================================
// Wire trait plumbing
// ============================================================================

// Messages whose decoding needs no parser context also implement the wire
// traits directly; the rest keep their context-taking inherent `decode`.

macro_rules! wire_encode_impl {
    ($($name:ident),*) => {
        $(
            impl tandem_wire::WireEncode for $name {
                fn encode(&self, out: &mut Vec<u8>) {
                    $name::encode(self, out);
                }
            }
        )*
    };
}

wire_encode_impl!(Vote, Notify, Blame, BlameNotify, Echo, Ack, PreCommit, Finality);

impl tandem_wire::WireDecode for Finality {
    fn decode(input: &mut &[u8]) -> Result<Self, WireError> {
        Finality::decode(input)
    }
}
