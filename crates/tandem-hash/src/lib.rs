//! Hashing for the tandem BFT protocol: raw SHA3-256 helpers plus the
//! domain-separated object digests that partial certificates sign.

pub mod consensus;
pub mod hash;

pub use consensus::{blame_obj_hash, pre_commit_obj_hash, propagate_obj_hash, vote_obj_hash};
pub use hash::{sha3_256, sha3_256_tagged, short_hex};
