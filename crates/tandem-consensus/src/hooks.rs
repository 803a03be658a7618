//! Outbound interface of the consensus core.
//!
//! The core computes; the collaborator (node, simulator, test harness)
//! performs. Every outbound message, decide event and timer operation goes
//! through [`ConsensusHooks`]. Timer predicates (`is_*_timeout`) let the
//! core observe late fires without a cancellation protocol: a stopped
//! timer that fires anyway is simply seen as timed out.

use std::collections::HashSet;
use std::time::Duration;

use tandem_types::{Hash32, Height, ReplicaId};

use crate::messages::{Ack, Blame, BlameNotify, Echo, Finality, Notify, PreCommit, Proposal, Vote};
use crate::store::BlockRef;

/// Everything the consensus core asks of its environment.
pub trait ConsensusHooks {
    /// A command reached finality.
    fn do_decide(&mut self, fin: Finality);
    /// A block was committed.
    fn do_consensus(&mut self, blk: BlockRef);

    /// Send a proposal to all replicas except the local one.
    fn do_broadcast_proposal(&mut self, prop: &Proposal);
    fn do_broadcast_vote(&mut self, vote: &Vote);
    fn do_broadcast_blame(&mut self, blame: &Blame);
    fn do_broadcast_blamenotify(&mut self, bn: &BlameNotify);
    /// Deliver the new-view notify to the pacemaker's choice of peers.
    fn do_notify(&mut self, notify: &Notify);

    fn do_broadcast_echo(&mut self, echo: &Echo);
    /// Unicast counterpart of `do_broadcast_echo`.
    fn do_send_echo(&mut self, echo: &Echo, dest: ReplicaId);
    fn do_broadcast_ack(&mut self, ack: &Ack);
    fn do_multicast_ack(&mut self, ack: &Ack, dests: &HashSet<ReplicaId>);
    fn do_send_ack(&mut self, ack: &Ack, dest: ReplicaId);
    fn do_broadcast_pre_commit(&mut self, pc: &PreCommit);

    /// The current view's leader, as decided by the pacemaker.
    fn get_proposer(&self) -> ReplicaId;

    /// Commit watchdog timers; the core itself never arms these, the
    /// pacemaker may.
    fn set_commit_timer(&mut self, blk: BlockRef, t: Duration);
    fn stop_commit_timer(&mut self, height: Height);
    fn stop_commit_timer_all(&mut self);

    fn set_blame_timer(&mut self, t: Duration);
    fn stop_blame_timer(&mut self);

    fn set_viewtrans_timer(&mut self, t: Duration);
    fn stop_viewtrans_timer(&mut self);

    fn set_propagate_timer(&mut self, echo: &Echo, t: Duration);
    fn stop_propagate_timer(&mut self, msg_hash: &Hash32);
    /// Whether the propagate timer for `msg_hash` has already fired.
    fn is_propagate_timeout(&self, msg_hash: &Hash32) -> bool;

    fn set_ack_timer(&mut self, ack: &Ack, t: Duration);
    fn stop_ack_timer(&mut self, msg_hash: &Hash32);
    /// Whether the ack timer for `msg_hash` has already fired.
    fn is_ack_timeout(&self, msg_hash: &Hash32) -> bool;

    fn set_pre_commit_timer(&mut self, blk: BlockRef, t: Duration);
    fn stop_pre_commit_timer(&mut self, height: Height);
}

/// Hook implementation that records every call.
///
/// Integration tests drive the core through whole scenarios and then
/// assert on what it emitted; this mock is the ledger. Timer fires are
/// simulated by inserting into the `*_timed_out` sets before feeding the
/// message that consults them.
#[derive(Debug, Default)]
pub struct RecordingHooks {
    pub decided: Vec<Finality>,
    pub committed: Vec<BlockRef>,

    pub proposals: Vec<Proposal>,
    pub votes: Vec<Vote>,
    pub blames: Vec<Blame>,
    pub blame_notifies: Vec<BlameNotify>,
    pub notifies: Vec<Notify>,

    pub echoes_broadcast: Vec<Echo>,
    pub echoes_sent: Vec<(Echo, ReplicaId)>,
    pub acks_broadcast: Vec<Ack>,
    pub acks_multicast: Vec<(Ack, HashSet<ReplicaId>)>,
    pub acks_sent: Vec<(Ack, ReplicaId)>,
    pub pre_commits: Vec<PreCommit>,

    /// Answer for `get_proposer`.
    pub proposer: ReplicaId,

    pub commit_timers: Vec<(BlockRef, Duration)>,
    pub commit_timer_stops: Vec<Height>,
    pub commit_timer_clear_count: u32,
    pub blame_timers: Vec<Duration>,
    pub blame_timer_stop_count: u32,
    pub viewtrans_timers: Vec<Duration>,
    pub viewtrans_timer_stop_count: u32,
    pub propagate_timers: Vec<(Hash32, Duration)>,
    pub propagate_timer_stops: Vec<Hash32>,
    pub propagate_timed_out: HashSet<Hash32>,
    pub ack_timers: Vec<(Hash32, Duration)>,
    pub ack_timer_stops: Vec<Hash32>,
    pub ack_timed_out: HashSet<Hash32>,
    pub pre_commit_timers: Vec<(BlockRef, Duration)>,
    pub pre_commit_timer_stops: Vec<Height>,
}

impl RecordingHooks {
    pub fn new() -> Self {
        RecordingHooks::default()
    }
}

impl ConsensusHooks for RecordingHooks {
    fn do_decide(&mut self, fin: Finality) {
        self.decided.push(fin);
    }

    fn do_consensus(&mut self, blk: BlockRef) {
        self.committed.push(blk);
    }

    fn do_broadcast_proposal(&mut self, prop: &Proposal) {
        self.proposals.push(*prop);
    }

    fn do_broadcast_vote(&mut self, vote: &Vote) {
        self.votes.push(vote.clone());
    }

    fn do_broadcast_blame(&mut self, blame: &Blame) {
        self.blames.push(blame.clone());
    }

    fn do_broadcast_blamenotify(&mut self, bn: &BlameNotify) {
        self.blame_notifies.push(bn.clone());
    }

    fn do_notify(&mut self, notify: &Notify) {
        self.notifies.push(notify.clone());
    }

    fn do_broadcast_echo(&mut self, echo: &Echo) {
        self.echoes_broadcast.push(echo.clone());
    }

    fn do_send_echo(&mut self, echo: &Echo, dest: ReplicaId) {
        self.echoes_sent.push((echo.clone(), dest));
    }

    fn do_broadcast_ack(&mut self, ack: &Ack) {
        self.acks_broadcast.push(ack.clone());
    }

    fn do_multicast_ack(&mut self, ack: &Ack, dests: &HashSet<ReplicaId>) {
        self.acks_multicast.push((ack.clone(), dests.clone()));
    }

    fn do_send_ack(&mut self, ack: &Ack, dest: ReplicaId) {
        self.acks_sent.push((ack.clone(), dest));
    }

    fn do_broadcast_pre_commit(&mut self, pc: &PreCommit) {
        self.pre_commits.push(pc.clone());
    }

    fn get_proposer(&self) -> ReplicaId {
        self.proposer
    }

    fn set_commit_timer(&mut self, blk: BlockRef, t: Duration) {
        self.commit_timers.push((blk, t));
    }

    fn stop_commit_timer(&mut self, height: Height) {
        self.commit_timer_stops.push(height);
    }

    fn stop_commit_timer_all(&mut self) {
        self.commit_timer_clear_count += 1;
    }

    fn set_blame_timer(&mut self, t: Duration) {
        self.blame_timers.push(t);
    }

    fn stop_blame_timer(&mut self) {
        self.blame_timer_stop_count += 1;
    }

    fn set_viewtrans_timer(&mut self, t: Duration) {
        self.viewtrans_timers.push(t);
    }

    fn stop_viewtrans_timer(&mut self) {
        self.viewtrans_timer_stop_count += 1;
    }

    fn set_propagate_timer(&mut self, echo: &Echo, t: Duration) {
        self.propagate_timers.push((echo.blk_hash, t));
    }

    fn stop_propagate_timer(&mut self, msg_hash: &Hash32) {
        self.propagate_timer_stops.push(*msg_hash);
    }

    fn is_propagate_timeout(&self, msg_hash: &Hash32) -> bool {
        self.propagate_timed_out.contains(msg_hash)
    }

    fn set_ack_timer(&mut self, ack: &Ack, t: Duration) {
        self.ack_timers.push((ack.blk_hash, t));
    }

    fn stop_ack_timer(&mut self, msg_hash: &Hash32) {
        self.ack_timer_stops.push(*msg_hash);
    }

    fn is_ack_timeout(&self, msg_hash: &Hash32) -> bool {
        self.ack_timed_out.contains(msg_hash)
    }

    fn set_pre_commit_timer(&mut self, blk: BlockRef, t: Duration) {
        self.pre_commit_timers.push((blk, t));
    }

    fn stop_pre_commit_timer(&mut self, height: Height) {
        self.pre_commit_timer_stops.push(height);
    }
}
