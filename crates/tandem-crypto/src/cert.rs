//! Object-safe certificate traits and the scheme factory.

use tandem_types::{Hash32, ReplicaConfig, ReplicaId};
use tandem_wire::WireError;

use crate::keys::SecretKey;

/// A single replica's signature over a proof object hash.
///
/// Partial certificates travel inside votes, blames, echoes, acks and
/// pre-commits. They are cheap to clone and carry their own object hash so
/// the receiver can cross-check it against the expected
/// `H(kind ∥ payload)`.
pub trait PartialCert: std::fmt::Debug + Send + Sync {
    /// The object hash this certificate signs.
    fn obj_hash(&self) -> Hash32;

    /// Raw signature bytes.
    fn signature(&self) -> &[u8];

    /// Verify the signature against a member's public key bytes.
    fn verify(&self, pubkey: &[u8]) -> bool;

    /// Append the canonical encoding.
    fn encode(&self, out: &mut Vec<u8>);

    fn clone_box(&self) -> Box<dyn PartialCert>;
}

impl Clone for Box<dyn PartialCert> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}

/// An aggregate of `n - f` partial certificates over one object hash.
///
/// A quorum certificate is built incrementally: `add_part` for each
/// accepted partial certificate, then `compute` once the quorum is full.
/// Verification is against the replica configuration, which supplies the
/// quorum size and the member public keys.
pub trait QuorumCert: std::fmt::Debug + Send + Sync {
    /// The object hash all aggregated parts sign.
    fn obj_hash(&self) -> Hash32;

    /// Record a member's partial certificate. Parts whose object hash does
    /// not match the aggregate's are dropped.
    fn add_part(&mut self, rid: ReplicaId, part: &dyn PartialCert);

    /// Seal the aggregate once the quorum is full.
    fn compute(&mut self);

    /// Verify the aggregate: enough distinct members, every signature
    /// valid for this object hash.
    fn verify(&self, config: &ReplicaConfig) -> bool;

    /// Append the canonical encoding.
    fn encode(&self, out: &mut Vec<u8>);

    fn clone_box(&self) -> Box<dyn QuorumCert>;
}

impl Clone for Box<dyn QuorumCert> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}

/// Factory for a concrete certificate suite.
///
/// The core holds one scheme instance and uses it wherever the protocol
/// needs to mint or parse certificates; messages received off the wire are
/// parsed with the same scheme the sender used.
pub trait CertScheme: Send + Sync {
    /// Sign a proof object hash with a replica's secret key.
    fn create_part_cert(&self, priv_key: &SecretKey, obj_hash: &Hash32) -> Box<dyn PartialCert>;

    /// Parse a partial certificate from a wire cursor.
    fn parse_part_cert(&self, input: &mut &[u8]) -> Result<Box<dyn PartialCert>, WireError>;

    /// Create an empty quorum certificate builder for an object hash.
    fn create_quorum_cert(&self, obj_hash: &Hash32) -> Box<dyn QuorumCert>;

    /// Parse a quorum certificate from a wire cursor.
    fn parse_quorum_cert(&self, input: &mut &[u8]) -> Result<Box<dyn QuorumCert>, WireError>;
}
