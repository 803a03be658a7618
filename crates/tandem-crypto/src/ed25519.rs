//! Ed25519 certificate suite.
//!
//! Partial certificates are a single Ed25519 signature over the proof
//! object hash. A quorum certificate aggregates per-signer signatures in
//! an ordered map; there is no cryptographic aggregation, the certificate
//! is the signer set itself.
//!
//! Wire layout:
//! - partial cert: `obj_hash(32B) ∥ sig_len(varint) ∥ sig`
//! - quorum cert:  `obj_hash(32B) ∥ n(varint) ∥ { rid(u16) ∥ sig_len(varint) ∥ sig }ⁿ`

use std::collections::BTreeMap;

use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use tandem_types::{Hash32, ReplicaConfig, ReplicaId};
use tandem_wire::io::{get_hash32, get_u16, get_var_bytes, get_varint, put_bytes, put_u16, put_var_bytes, put_varint};
use tandem_wire::WireError;

use crate::cert::{CertScheme, PartialCert, QuorumCert};
use crate::keys::SecretKey;

/// Generate an Ed25519 keypair; returns the secret key and the public key
/// bytes to register in the replica configuration.
pub fn generate_keypair<R: rand_core::CryptoRngCore>(rng: &mut R) -> (SecretKey, Vec<u8>) {
    let signing = SigningKey::generate(rng);
    let pubkey = signing.verifying_key().to_bytes().to_vec();
    (SecretKey::from_bytes(signing.to_bytes().to_vec()), pubkey)
}

fn verify_raw(pubkey: &[u8], obj_hash: &Hash32, sig: &[u8]) -> bool {
    let Ok(pk_bytes) = <[u8; 32]>::try_from(pubkey) else {
        return false;
    };
    let Ok(vk) = VerifyingKey::from_bytes(&pk_bytes) else {
        return false;
    };
    let Ok(sig) = Signature::from_slice(sig) else {
        return false;
    };
    vk.verify_strict(obj_hash, &sig).is_ok()
}

/// One replica's Ed25519 signature over a proof object hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ed25519PartCert {
    obj_hash: Hash32,
    sig: Vec<u8>,
}

impl PartialCert for Ed25519PartCert {
    fn obj_hash(&self) -> Hash32 {
        self.obj_hash
    }

    fn signature(&self) -> &[u8] {
        &self.sig
    }

    fn verify(&self, pubkey: &[u8]) -> bool {
        verify_raw(pubkey, &self.obj_hash, &self.sig)
    }

    fn encode(&self, out: &mut Vec<u8>) {
        put_bytes(out, &self.obj_hash);
        put_var_bytes(out, &self.sig);
    }

    fn clone_box(&self) -> Box<dyn PartialCert> {
        Box::new(self.clone())
    }
}

/// Aggregate of per-signer Ed25519 signatures over one object hash.
///
/// The signer map is ordered so the encoding is canonical regardless of
/// arrival order.
#[derive(Debug, Clone)]
pub struct Ed25519QuorumCert {
    obj_hash: Hash32,
    sigs: BTreeMap<ReplicaId, Vec<u8>>,
    sealed: bool,
}

impl Ed25519QuorumCert {
    fn new(obj_hash: Hash32) -> Self {
        Ed25519QuorumCert {
            obj_hash,
            sigs: BTreeMap::new(),
            sealed: false,
        }
    }

    /// Number of distinct signers recorded so far.
    pub fn signer_count(&self) -> usize {
        self.sigs.len()
    }
}

impl QuorumCert for Ed25519QuorumCert {
    fn obj_hash(&self) -> Hash32 {
        self.obj_hash
    }

    fn add_part(&mut self, rid: ReplicaId, part: &dyn PartialCert) {
        if part.obj_hash() != self.obj_hash {
            // A part for a different object cannot belong to this quorum.
            return;
        }
        self.sigs.insert(rid, part.signature().to_vec());
    }

    fn compute(&mut self) {
        self.sealed = true;
    }

    fn verify(&self, config: &ReplicaConfig) -> bool {
        if self.sigs.len() < config.nmajority {
            return false;
        }
        self.sigs.iter().all(|(rid, sig)| {
            config
                .pubkey(*rid)
                .is_some_and(|pk| verify_raw(pk, &self.obj_hash, sig))
        })
    }

    fn encode(&self, out: &mut Vec<u8>) {
        put_bytes(out, &self.obj_hash);
        put_varint(out, self.sigs.len() as u64);
        for (rid, sig) in &self.sigs {
            put_u16(out, rid.as_u16());
            put_var_bytes(out, sig);
        }
    }

    fn clone_box(&self) -> Box<dyn QuorumCert> {
        Box::new(self.clone())
    }
}

/// The Ed25519 certificate suite.
#[derive(Debug, Clone, Copy, Default)]
pub struct Ed25519Scheme;

impl CertScheme for Ed25519Scheme {
    fn create_part_cert(&self, priv_key: &SecretKey, obj_hash: &Hash32) -> Box<dyn PartialCert> {
        // A malformed local key yields a certificate nobody will accept,
        // never a panic.
        let key_bytes = <[u8; 32]>::try_from(priv_key.as_bytes()).unwrap_or([0u8; 32]);
        let signing = SigningKey::from_bytes(&key_bytes);
        let sig = signing.sign(obj_hash).to_bytes().to_vec();
        Box::new(Ed25519PartCert {
            obj_hash: *obj_hash,
            sig,
        })
    }

    fn parse_part_cert(&self, input: &mut &[u8]) -> Result<Box<dyn PartialCert>, WireError> {
        let obj_hash = get_hash32(input)?;
        let sig = get_var_bytes(input)?;
        if sig.len() != Signature::BYTE_SIZE {
            return Err(WireError::InvalidValue("ed25519 signature length"));
        }
        Ok(Box::new(Ed25519PartCert { obj_hash, sig }))
    }

    fn create_quorum_cert(&self, obj_hash: &Hash32) -> Box<dyn QuorumCert> {
        Box::new(Ed25519QuorumCert::new(*obj_hash))
    }

    fn parse_quorum_cert(&self, input: &mut &[u8]) -> Result<Box<dyn QuorumCert>, WireError> {
        let obj_hash = get_hash32(input)?;
        let count = get_varint(input)?;
        let mut sigs = BTreeMap::new();
        for _ in 0..count {
            let rid = ReplicaId::new(get_u16(input)?);
            let sig = get_var_bytes(input)?;
            if sig.len() != Signature::BYTE_SIZE {
                return Err(WireError::InvalidValue("ed25519 signature length"));
            }
            if sigs.insert(rid, sig).is_some() {
                return Err(WireError::InvalidValue("duplicate quorum cert signer"));
            }
        }
        Ok(Box::new(Ed25519QuorumCert {
            obj_hash,
            sigs,
            sealed: true,
        }))
    }
}
