//! Blocks of the consensus DAG.
//!
//! A block is identified by a SHA3-256 hash over its wire content. Besides
//! the content fields it carries mutable protocol state: the delivery
//! flag, resolved parent and `qc_ref` handles, the decision, the quorum
//! certificate under construction and the voter/pre-committer sets. The
//! content hash is fixed at construction; later state changes never alter
//! identity.

use std::collections::HashSet;

use tandem_crypto::{CertScheme, QuorumCert};
use tandem_hash::{sha3_256_tagged, short_hex};
use tandem_types::{Hash32, Height, ReplicaId};
use tandem_wire::io::{get_hash32, get_u8, get_var_bytes, get_varint, put_bytes, put_u8, put_var_bytes, put_varint};
use tandem_wire::WireError;

use crate::store::BlockRef;

/// Domain tag for block content hashes.
const BLOCK_HASH_TAG: &str = "TANDEM:BLOCK:v1";

/// Commit decision recorded on a block.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum BlockDecision {
    /// Not yet decided.
    #[default]
    Pending,
    /// Part of the committed chain.
    Committed,
}

/// A block of the consensus DAG.
///
/// Wire content: parent hashes (the first is *the* parent, the rest are
/// uncles), ordered command hashes, an optional embedded quorum
/// certificate with the hash of the block it certifies, and opaque extra
/// bytes.
#[derive(Clone, Debug)]
pub struct Block {
    /// Hashes of the parents; non-empty for every block except genesis.
    pub parent_hashes: Vec<Hash32>,
    /// Ordered command hashes carried by this block.
    pub cmds: Vec<Hash32>,
    /// Embedded quorum certificate for `qc_ref_hash`, if any.
    pub qc: Option<Box<dyn QuorumCert>>,
    /// Hash of the block `qc` certifies. Present iff `qc` came off the
    /// wire with one.
    pub qc_ref_hash: Option<Hash32>,
    /// Opaque payload bytes.
    pub extra: Vec<u8>,

    /// Content hash, fixed at construction.
    hash: Hash32,

    /// Height in the chain: parent₀'s height plus one. Zero until
    /// delivery resolves the parents (and for genesis).
    pub height: Height,
    /// Whether delivery has resolved this block's structure. Monotonic and
    /// one-shot.
    pub delivered: bool,
    /// Commit decision.
    pub decision: BlockDecision,
    /// Resolved parent handles; filled at delivery.
    pub parents: Vec<BlockRef>,
    /// Resolved handle of the block `qc` certifies; filled at delivery.
    pub qc_ref: Option<BlockRef>,
    /// Quorum certificate under construction from incoming votes.
    pub self_qc: Option<Box<dyn QuorumCert>>,
    /// Replicas whose vote has been counted.
    pub voted: HashSet<ReplicaId>,
    /// Replicas whose pre-commit has been counted.
    pub pre_committed: HashSet<ReplicaId>,
}

impl Block {
    /// Create a block from its wire content. The hash is computed here and
    /// never changes.
    pub fn new(
        parent_hashes: Vec<Hash32>,
        cmds: Vec<Hash32>,
        qc: Option<Box<dyn QuorumCert>>,
        qc_ref_hash: Option<Hash32>,
        extra: Vec<u8>,
    ) -> Self {
        let mut blk = Block {
            parent_hashes,
            cmds,
            qc,
            qc_ref_hash,
            extra,
            hash: [0u8; 32],
            height: 0,
            delivered: false,
            decision: BlockDecision::Pending,
            parents: Vec::new(),
            qc_ref: None,
            self_qc: None,
            voted: HashSet::new(),
            pre_committed: HashSet::new(),
        };
        let mut content = Vec::new();
        blk.encode_content(&mut content);
        blk.hash = sha3_256_tagged(BLOCK_HASH_TAG, &content);
        blk
    }

    /// The genesis block: no parents, no commands, height 0, implicitly
    /// delivered. Its quorum certificates are installed by the core.
    pub fn genesis() -> Self {
        let mut blk = Block::new(Vec::new(), Vec::new(), None, None, Vec::new());
        blk.delivered = true;
        blk
    }

    /// The content hash identifying this block.
    pub fn hash(&self) -> Hash32 {
        self.hash
    }

    /// Append the wire content:
    /// `parents(varint list) ∥ cmds(varint list) ∥ has_qc(u8){qc ∥ qc_ref_hash} ∥ extra(varint bytes)`
    pub fn encode_content(&self, out: &mut Vec<u8>) {
        put_varint(out, self.parent_hashes.len() as u64);
        for hash in &self.parent_hashes {
            put_bytes(out, hash);
        }
        put_varint(out, self.cmds.len() as u64);
        for cmd in &self.cmds {
            put_bytes(out, cmd);
        }
        match (&self.qc, &self.qc_ref_hash) {
            (Some(qc), Some(qc_ref_hash)) => {
                put_u8(out, 1);
                qc.encode(out);
                put_bytes(out, qc_ref_hash);
            }
            _ => put_u8(out, 0),
        }
        put_var_bytes(out, &self.extra);
    }

    /// Parse a block from a wire cursor. The certificate scheme is the
    /// parser context for the embedded quorum certificate.
    pub fn decode(input: &mut &[u8], scheme: &dyn CertScheme) -> Result<Self, WireError> {
        let nparents = get_varint(input)?;
        let mut parent_hashes = Vec::new();
        for _ in 0..nparents {
            parent_hashes.push(get_hash32(input)?);
        }
        let ncmds = get_varint(input)?;
        let mut cmds = Vec::new();
        for _ in 0..ncmds {
            cmds.push(get_hash32(input)?);
        }
        let (qc, qc_ref_hash) = match get_u8(input)? {
            0 => (None, None),
            1 => {
                let qc = scheme.parse_quorum_cert(input)?;
                let qc_ref_hash = get_hash32(input)?;
                (Some(qc), Some(qc_ref_hash))
            }
            _ => return Err(WireError::InvalidValue("block has_qc flag")),
        };
        let extra = get_var_bytes(input)?;
        Ok(Block::new(parent_hashes, cmds, qc, qc_ref_hash, extra))
    }
}

impl std::fmt::Display for Block {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "<block {} height={} parents={} cmds={}>",
            short_hex(&self.hash),
            self.height,
            self.parent_hashes.len(),
            self.cmds.len()
        )
    }
}
