//! Event-driven BFT consensus core in the HotStuff family, extended with an
//! explicit echo/ack propagation phase and a pre-commit phase.
//!
//! One [`ConsensusCore`] runs per replica. It ingests signed messages
//! (proposals, votes, echoes, acks, pre-commits, blames), drives a block
//! DAG through commit, and emits outbound messages and decide events
//! through the [`ConsensusHooks`] trait its collaborator implements. The
//! core is single-threaded and cooperatively scheduled: every handler runs
//! to completion, asynchrony is expressed only through timers, the
//! verification pool and the one-shot wait-points of [`waitpoint`].
//!
//! # Message flow per block
//!
//! `on_propose` (leader) → Echo broadcast → Ack quorum → Proposal
//! broadcast → Vote to leader → QC formed → PreCommit broadcast → commit.
//!
//! Liveness under a faulty leader is restored by the blame/view-change
//! sub-protocol: a blame quorum produces a `BlameNotify`, replicas enter a
//! view transition, and the view-transition timer installs the next view.

pub mod block;
pub mod core;
pub mod error;
pub mod hooks;
pub mod messages;
pub mod store;
pub mod waitpoint;

pub use self::block::{Block, BlockDecision};
pub use self::core::ConsensusCore;
pub use self::error::ConsensusError;
pub use self::hooks::{ConsensusHooks, RecordingHooks};
pub use self::messages::{Ack, Blame, BlameNotify, Echo, Finality, Notify, PreCommit, Proposal, Vote};
pub use self::store::{BlockRef, BlockStore};
