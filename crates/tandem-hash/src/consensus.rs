//! Proof object digests.
//!
//! A partial certificate signs `H(kind-byte ∥ payload)`, never the payload
//! directly. The payload is the block hash for votes, echoes/acks and
//! pre-commits, and the big-endian view number for blames.

use crate::hash::sha3_256;
use tandem_types::{Hash32, ProofKind, View};

fn obj_hash(kind: ProofKind, payload: &[u8]) -> Hash32 {
    let mut buf = Vec::with_capacity(1 + payload.len());
    buf.push(kind.prefix());
    buf.extend_from_slice(payload);
    sha3_256(&buf)
}

/// Object hash signed by votes on a block; also the object hash of a
/// block's quorum certificate.
pub fn vote_obj_hash(blk_hash: &Hash32) -> Hash32 {
    obj_hash(ProofKind::Vote, blk_hash)
}

/// Object hash signed by blames of a view.
pub fn blame_obj_hash(view: View) -> Hash32 {
    obj_hash(ProofKind::Blame, &view.to_be_bytes())
}

/// Object hash signed by echoes and acks propagating a message.
pub fn propagate_obj_hash(msg_hash: &Hash32) -> Hash32 {
    obj_hash(ProofKind::Propagate, msg_hash)
}

/// Object hash signed by pre-commits on a block.
pub fn pre_commit_obj_hash(blk_hash: &Hash32) -> Hash32 {
    obj_hash(ProofKind::PreCommit, blk_hash)
}
