//! Core identifiers and configuration for the tandem BFT protocol.

pub mod config;
pub mod domain;
pub mod primitives;

pub use config::{ReplicaConfig, ReplicaInfo};
pub use domain::{ProofKind, PropagateKind};
pub use primitives::{Hash32, Height, ReplicaId, View, GENESIS_HEIGHT};
