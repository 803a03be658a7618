//! Consensus core errors.
//!
//! Only invariant violations surface as errors; the event loop must halt
//! the core when it sees one. Protocol-level rejections (duplicates,
//! late quorum messages, view-transition drops) are absorbed inside the
//! handlers with a log line, and verification failures are dropped at the
//! verifier.

use tandem_types::Height;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConsensusError {
    /// A handler was given the hash of a block that is not delivered (or
    /// not even stored). The caller broke the delivery precondition.
    #[error("block {0} not delivered")]
    BlockNotDelivered(String),

    /// A delivered block embeds a QC whose referenced block is not in the
    /// store.
    #[error("block referred by qc not in store: {0}")]
    QcRefMissing(String),

    /// `check_commit` walked the parent chain down to the executed height
    /// and found neither `b_exec` nor a committed block: two conflicting
    /// chains have been certified.
    #[error("safety breached: {blk} does not extend {b_exec}")]
    SafetyViolation { blk: String, b_exec: String },

    /// A proposal with no parents.
    #[error("proposal has empty parents")]
    EmptyParents,

    /// A leader proposed a block that is not higher than its own last
    /// voted height.
    #[error("new block height {height} not greater than vheight {vheight}")]
    HeightRegression { height: Height, vheight: Height },
}
