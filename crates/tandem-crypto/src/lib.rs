//! Certificate abstractions for the tandem BFT protocol.
//!
//! The consensus core never names a concrete signature scheme. It works
//! against two object-safe capability sets — [`PartialCert`] for a single
//! replica's signature over a proof object hash, and [`QuorumCert`] for an
//! `n - f` aggregate over the same object hash — plus a [`CertScheme`]
//! factory for creating and parsing both. [`Ed25519Scheme`] is the
//! concrete suite shipped here.
//!
//! Signature checks can also run off-thread: [`VerifyPool`] answers
//! submitted checks through one-shot channels so the event loop never
//! blocks on cryptography.

pub mod cert;
pub mod ed25519;
pub mod keys;
pub mod pool;

pub use cert::{CertScheme, PartialCert, QuorumCert};
pub use ed25519::{generate_keypair, Ed25519Scheme};
pub use keys::SecretKey;
pub use pool::{SubmitError, VerifyPool, VerifyPoolConfig, VerifyPoolMetrics};
