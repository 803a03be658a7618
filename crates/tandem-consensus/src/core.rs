//! The consensus state machine.
//!
//! One [`ConsensusCore`] per replica. Handlers are the inputs of the state
//! machine and run to completion on the caller's event loop; outputs leave
//! through the [`ConsensusHooks`] implementation the core is generic over.
//! Blocks mentioned in messages must be delivered before their handler is
//! invoked; the block-fetch layer owns that ordering.
//!
//! Fatal invariant violations surface as [`ConsensusError`] — the event
//! loop must halt the core on one. Everything else (duplicates, quorum
//! overflow, messages during a view transition) is absorbed with a log
//! line so replays and reorderings are harmless.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use tandem_crypto::{CertScheme, QuorumCert, SecretKey};
use tandem_hash::{blame_obj_hash, pre_commit_obj_hash, propagate_obj_hash, short_hex, vote_obj_hash};
use tandem_types::{Hash32, Height, PropagateKind, ReplicaConfig, ReplicaId, View};

use crate::block::{Block, BlockDecision};
use crate::error::ConsensusError;
use crate::hooks::ConsensusHooks;
use crate::messages::{Ack, Blame, BlameNotify, Echo, Finality, Notify, PreCommit, Proposal, Vote};
use crate::store::{BlockRef, BlockStore};
use crate::waitpoint::WaitPoint;

/// The protocol state machine of a single replica.
pub struct ConsensusCore<H: ConsensusHooks> {
    id: ReplicaId,
    priv_key: SecretKey,
    scheme: Arc<dyn CertScheme>,
    config: ReplicaConfig,
    store: BlockStore,
    hooks: H,

    /// The genesis block.
    b0: BlockRef,
    /// Highest block known to carry a vote-QC, with that QC.
    hqc: (BlockRef, Box<dyn QuorumCert>),
    /// Last executed block.
    b_exec: BlockRef,
    /// Height of the block last voted for.
    vheight: Height,
    /// Current view number.
    view: View,
    /// Whether a proposal has been heard in the current view.
    progress: bool,
    /// Whether the replica is in-between views.
    view_trans: bool,
    /// Distinct blocks seen per height in the current view; a second entry
    /// is an equivocation.
    proposals: HashMap<Height, HashSet<BlockRef>>,
    /// Blocks whose proposal handling already ran.
    finished_propose: HashSet<BlockRef>,
    /// Blame certificate under construction for the current view.
    blame_qc: Box<dyn QuorumCert>,
    /// Replicas whose blame has been counted this view.
    blamed: HashSet<ReplicaId>,
    /// Echo senders per propagated message hash.
    propagate_echos: HashMap<Hash32, HashSet<ReplicaId>>,
    /// Ack senders per propagated message hash.
    propagate_acks: HashMap<Hash32, HashSet<ReplicaId>>,
    /// Block whose QC was last embedded in a commit-height proposal.
    /// Unset until the first one, so the first commit-height proposal
    /// always embeds `hqc`.
    last_qc_ref: Option<BlockRef>,
    /// DAG tails ordered by height.
    tails: BTreeSet<(Height, BlockRef)>,
    /// Always vote negatively; useful for some pacemakers.
    vote_disabled: bool,

    qc_waiting: HashMap<BlockRef, WaitPoint<()>>,
    propose_waiting: WaitPoint<Proposal>,
    receive_proposal_waiting: WaitPoint<Proposal>,
    hqc_update_waiting: WaitPoint<BlockRef>,
    view_change_waiting: WaitPoint<View>,
    view_trans_waiting: WaitPoint<()>,
}

impl<H: ConsensusHooks> ConsensusCore<H> {
    /// Create a fully initialized core: genesis stored and pinned, its
    /// trivially-valid self-QC installed, `hqc` and the view-0 blame
    /// certificate in place. Only the quorum size and delta remain for
    /// [`ConsensusCore::on_init`].
    pub fn new(id: ReplicaId, priv_key: SecretKey, scheme: Arc<dyn CertScheme>, hooks: H) -> Self {
        let mut store = BlockStore::new();
        let b0 = store.add_blk(Block::genesis());
        store.pin(b0);

        let b0_hash = store.get(b0).expect("genesis just stored").hash();
        let mut genesis_qc = scheme.create_quorum_cert(&vote_obj_hash(&b0_hash));
        genesis_qc.compute();
        {
            let genesis = store.get_mut(b0).expect("genesis just stored");
            genesis.qc = Some(genesis_qc.clone());
            genesis.self_qc = Some(genesis_qc.clone());
            genesis.qc_ref = Some(b0);
        }

        let blame_qc = scheme.create_quorum_cert(&blame_obj_hash(0));
        let mut tails = BTreeSet::new();
        tails.insert((0, b0));

        ConsensusCore {
            id,
            priv_key,
            scheme,
            config: ReplicaConfig::new(),
            store,
            hooks,
            b0,
            hqc: (b0, genesis_qc),
            b_exec: b0,
            vheight: 0,
            view: 0,
            progress: false,
            view_trans: false,
            proposals: HashMap::new(),
            finished_propose: HashSet::new(),
            blame_qc,
            blamed: HashSet::new(),
            propagate_echos: HashMap::new(),
            propagate_acks: HashMap::new(),
            last_qc_ref: None,
            tails,
            vote_disabled: false,
            qc_waiting: HashMap::new(),
            propose_waiting: WaitPoint::new(),
            receive_proposal_waiting: WaitPoint::new(),
            hqc_update_waiting: WaitPoint::new(),
            view_change_waiting: WaitPoint::new(),
            view_trans_waiting: WaitPoint::new(),
        }
    }

    /// Fix the quorum size and timing unit. Call once, after every
    /// `add_replica`, before any protocol input.
    pub fn on_init(&mut self, nfaulty: usize, delta: f64) {
        self.config.nmajority = self.config.nreplicas - nfaulty;
        self.config.delta = std::time::Duration::from_secs_f64(delta);
    }

    /// Register a replica. Configuration-time only. The new member counts
    /// as a voter of genesis.
    pub fn add_replica(&mut self, rid: ReplicaId, addr: SocketAddr, pubkey: Vec<u8>) {
        self.config.add_replica(rid, addr, pubkey);
        self.blk_mut(self.b0).voted.insert(rid);
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn id(&self) -> ReplicaId {
        self.id
    }

    pub fn genesis(&self) -> BlockRef {
        self.b0
    }

    /// The highest certified block and its QC.
    pub fn hqc(&self) -> (BlockRef, &dyn QuorumCert) {
        (self.hqc.0, self.hqc.1.as_ref())
    }

    /// The last executed block.
    pub fn last_exec(&self) -> BlockRef {
        self.b_exec
    }

    pub fn vheight(&self) -> Height {
        self.vheight
    }

    pub fn view(&self) -> View {
        self.view
    }

    pub fn view_trans(&self) -> bool {
        self.view_trans
    }

    pub fn config(&self) -> &ReplicaConfig {
        &self.config
    }

    /// Configuration-time tuning (commit interval and friends).
    pub fn config_mut(&mut self) -> &mut ReplicaConfig {
        &mut self.config
    }

    pub fn store(&self) -> &BlockStore {
        &self.store
    }

    /// The block-parser path adds incoming blocks here before delivery.
    pub fn store_mut(&mut self) -> &mut BlockStore {
        &mut self.store
    }

    /// DAG tails ordered by height.
    pub fn tails(&self) -> &BTreeSet<(Height, BlockRef)> {
        &self.tails
    }

    pub fn hooks(&self) -> &H {
        &self.hooks
    }

    pub fn hooks_mut(&mut self) -> &mut H {
        &mut self.hooks
    }

    pub fn scheme(&self) -> &Arc<dyn CertScheme> {
        &self.scheme
    }

    pub fn set_vote_disabled(&mut self, disabled: bool) {
        self.vote_disabled = disabled;
    }

    // ========================================================================
    // Internal helpers
    // ========================================================================

    fn blk(&self, r: BlockRef) -> &Block {
        self.store.get(r).expect("live block handle")
    }

    fn blk_mut(&mut self, r: BlockRef) -> &mut Block {
        self.store.get_mut(r).expect("live block handle")
    }

    fn parent0(&self, r: BlockRef) -> BlockRef {
        *self
            .blk(r)
            .parents
            .first()
            .expect("delivered non-genesis block has a parent")
    }

    fn get_delivered_blk(&self, blk_hash: &Hash32) -> Result<BlockRef, ConsensusError> {
        match self.store.find(blk_hash) {
            Some(r) if self.blk(r).delivered => Ok(r),
            _ => Err(ConsensusError::BlockNotDelivered(short_hex(blk_hash))),
        }
    }

    fn sanity_check_delivered(&self, r: BlockRef) -> Result<(), ConsensusError> {
        let blk = self.blk(r);
        if !blk.delivered {
            return Err(ConsensusError::BlockNotDelivered(short_hex(&blk.hash())));
        }
        Ok(())
    }

    // ========================================================================
    // Delivery
    // ========================================================================

    /// Resolve a stored block's structure: parent handles, height,
    /// `qc_ref`, tails. Preconditions owed by the caller: every parent is
    /// already delivered and the block referenced by an embedded QC is in
    /// the store. Re-delivery is a no-op returning `false`.
    pub fn on_deliver_blk(&mut self, blk: BlockRef) -> Result<bool, ConsensusError> {
        if self.blk(blk).delivered {
            warn!("attempt to deliver a block twice");
            return Ok(false);
        }
        let parent_hashes = self.blk(blk).parent_hashes.clone();
        if parent_hashes.is_empty() {
            return Err(ConsensusError::EmptyParents);
        }
        let mut parents = Vec::with_capacity(parent_hashes.len());
        for hash in &parent_hashes {
            parents.push(self.get_delivered_blk(hash)?);
        }
        let height = self.blk(parents[0]).height + 1;

        let qc_ref = match (self.blk(blk).qc.is_some(), self.blk(blk).qc_ref_hash) {
            (true, Some(qc_ref_hash)) => Some(
                self.store
                    .find(&qc_ref_hash)
                    .ok_or_else(|| ConsensusError::QcRefMissing(short_hex(&qc_ref_hash)))?,
            ),
            _ => None,
        };

        for &parent in &parents {
            let parent_height = self.blk(parent).height;
            self.tails.remove(&(parent_height, parent));
        }
        self.tails.insert((height, blk));

        let b = self.blk_mut(blk);
        b.parents = parents;
        b.height = height;
        b.qc_ref = qc_ref;
        b.delivered = true;
        debug!(block = %self.blk(blk), "deliver");
        Ok(true)
    }

    // ========================================================================
    // Safety core
    // ========================================================================

    /// Adopt a higher certified block. The QC must certify exactly this
    /// block; mismatches are dropped. Monotone in height.
    fn update_hqc(&mut self, new_hqc: BlockRef, qc: &dyn QuorumCert) {
        let blk_hash = self.blk(new_hqc).hash();
        if qc.obj_hash() != vote_obj_hash(&blk_hash) {
            warn!(blk = %short_hex(&blk_hash), "qc does not certify the claimed block");
            return;
        }
        if self.blk(new_hqc).height > self.blk(self.hqc.0).height {
            self.hqc = (new_hqc, qc.clone_box());
            self.on_hqc_update();
        }
    }

    /// Execute the chain: walk parent₀ from `blk` down to `b_exec`'s
    /// height, then commit the walked blocks lowest-first. Finding neither
    /// `b_exec` nor a committed block at the bottom is a safety violation.
    fn check_commit(&mut self, blk: BlockRef) -> Result<(), ConsensusError> {
        if self.blk(blk).height == 0 {
            return Ok(());
        }
        let mut commit_queue = Vec::new();
        let mut b = blk;
        while self.blk(b).height > self.blk(self.b_exec).height {
            commit_queue.push(b);
            b = self.parent0(b);
        }
        if b != self.b_exec && self.blk(b).decision != BlockDecision::Committed {
            return Err(ConsensusError::SafetyViolation {
                blk: short_hex(&self.blk(blk).hash()),
                b_exec: short_hex(&self.blk(self.b_exec).hash()),
            });
        }
        for &b in commit_queue.iter().rev() {
            self.blk_mut(b).decision = BlockDecision::Committed;
            self.hooks.do_consensus(b);
            debug!(block = %self.blk(b), "commit");
            let (height, blk_hash, cmds) = {
                let blk = self.blk(b);
                (blk.height, blk.hash(), blk.cmds.clone())
            };
            for (idx, cmd_hash) in cmds.iter().enumerate() {
                self.hooks.do_decide(Finality {
                    rid: self.id,
                    decision: 1,
                    cmd_idx: idx as u32,
                    cmd_height: height,
                    cmd_hash: *cmd_hash,
                    blk_hash,
                });
            }
        }
        self.b_exec = blk;
        Ok(())
    }

    fn vote(&mut self, blk: BlockRef) -> Result<(), ConsensusError> {
        let blk_hash = self.blk(blk).hash();
        debug!(blk = %short_hex(&blk_hash), "vote");
        let cert = self
            .scheme
            .create_part_cert(&self.priv_key, &vote_obj_hash(&blk_hash));
        let vote = Vote {
            voter: self.id,
            blk_hash,
            cert,
        };
        self.on_receive_vote(&vote)?;
        self.hooks.do_broadcast_vote(&vote);
        Ok(())
    }

    // ========================================================================
    // Propose and propagation pipeline
    // ========================================================================

    /// Leader entry point: build a block on `parents` carrying `cmds`,
    /// deliver it locally and start propagating. Returns `None` during a
    /// view transition.
    pub fn on_propose(
        &mut self,
        cmds: Vec<Hash32>,
        parents: &[BlockRef],
        extra: Vec<u8>,
    ) -> Result<Option<BlockRef>, ConsensusError> {
        if self.view_trans {
            warn!("pacemaker tries to propose during view transition");
            return Ok(None);
        }
        if parents.is_empty() {
            return Err(ConsensusError::EmptyParents);
        }
        for &parent in parents {
            let height = self.blk(parent).height;
            self.tails.remove(&(height, parent));
        }
        let new_height = self.blk(parents[0]).height + 1;
        let is_commit_height = new_height % self.config.commit_interval == 0;
        let embed_qc = is_commit_height && self.last_qc_ref != Some(self.hqc.0);
        let (qc, qc_ref_hash) = if embed_qc {
            (Some(self.hqc.1.clone()), Some(self.blk(self.hqc.0).hash()))
        } else {
            (None, None)
        };
        let parent_hashes: Vec<Hash32> = parents.iter().map(|&p| self.blk(p).hash()).collect();
        let bnew = self
            .store
            .add_blk(Block::new(parent_hashes, cmds, qc, qc_ref_hash, extra));
        if is_commit_height {
            self.last_qc_ref = Some(self.hqc.0);
        }
        let bnew_hash = self.blk(bnew).hash();
        let self_qc = self.scheme.create_quorum_cert(&vote_obj_hash(&bnew_hash));
        self.blk_mut(bnew).self_qc = Some(self_qc);
        self.on_deliver_blk(bnew)?;
        let prop = Proposal {
            proposer: self.id,
            blk: bnew,
        };
        debug!(block = %self.blk(bnew), "propose");
        if self.blk(bnew).height <= self.vheight {
            return Err(ConsensusError::HeightRegression {
                height: self.blk(bnew).height,
                vheight: self.vheight,
            });
        }
        self.vheight = new_height;
        self.finished_propose.insert(bnew);
        self.progress = true;
        self.propagate_blk(bnew)?;
        self.propose_waiting.resolve(prop);
        self.hooks.do_broadcast_proposal(&prop);
        Ok(Some(bnew))
    }

    /// Start the propagation phase for a block. Commit heights run the
    /// all-to-all echo round under a `3·delta` timer; other heights send a
    /// single echo to the current proposer, which aggregates them.
    fn propagate_blk(&mut self, blk: BlockRef) -> Result<(), ConsensusError> {
        let blk_hash = self.blk(blk).hash();
        debug!(blk = %short_hex(&blk_hash), "propagate");
        let cert = self
            .scheme
            .create_part_cert(&self.priv_key, &propagate_obj_hash(&blk_hash));
        let echo = Echo {
            rid: self.id,
            blk_hash,
            kind: PropagateKind::Block,
            cert,
        };
        if self.blk(blk).height % self.config.commit_interval == 0 {
            self.hooks.do_broadcast_echo(&echo);
            self.on_receive_echo(&echo)?;
            self.hooks.set_propagate_timer(&echo, 3 * self.config.delta);
        } else {
            let proposer = self.hooks.get_proposer();
            if self.id == proposer {
                self.on_receive_echo(&echo)?;
            } else {
                self.hooks.do_send_echo(&echo, proposer);
            }
        }
        Ok(())
    }

    /// Handle an echo. On the `n - f`-th distinct echo before the
    /// propagate timer fires, the block's `qc_finish` wait-point resolves;
    /// for commit heights the proposal is broadcast and an ack is
    /// multicast to the echo senders under a `2·delta` timer. Later echoes
    /// that arrive before the ack timer fires are answered with a unicast
    /// ack.
    pub fn on_receive_echo(&mut self, echo: &Echo) -> Result<(), ConsensusError> {
        debug!(msg = %echo, "got echo");
        let msg_hash = echo.blk_hash;

        let senders = self.propagate_echos.entry(msg_hash).or_default();
        let qsize = senders.len();
        if !senders.insert(echo.rid) {
            warn!(msg = %short_hex(&msg_hash), rid = %echo.rid, "duplicate echo");
            return Ok(());
        }

        if qsize + 1 == self.config.nmajority && !self.hooks.is_propagate_timeout(&msg_hash) {
            if echo.kind == PropagateKind::Block {
                let blk = self.get_delivered_blk(&msg_hash)?;
                self.on_qc_finish(blk);

                if self.blk(blk).height % self.config.commit_interval != 0 {
                    return Ok(());
                }

                let prop = Proposal {
                    proposer: self.id,
                    blk,
                };
                self.hooks.do_broadcast_proposal(&prop);

                let cert = self
                    .scheme
                    .create_part_cert(&self.priv_key, &propagate_obj_hash(&msg_hash));
                let ack = Ack {
                    rid: self.id,
                    blk_hash: msg_hash,
                    kind: PropagateKind::Block,
                    cert,
                };
                let dests = self
                    .propagate_echos
                    .get(&msg_hash)
                    .cloned()
                    .unwrap_or_default();
                self.hooks.do_multicast_ack(&ack, &dests);
                if dests.contains(&self.id) {
                    self.on_receive_ack(&ack)?;
                }
                self.hooks.set_ack_timer(&ack, 2 * self.config.delta);
            }
        }

        if qsize + 1 > self.config.nmajority && !self.hooks.is_ack_timeout(&msg_hash) {
            let blk = self.get_delivered_blk(&msg_hash)?;
            if self.blk(blk).height % self.config.commit_interval != 0 {
                return Ok(());
            }
            let cert = self
                .scheme
                .create_part_cert(&self.priv_key, &propagate_obj_hash(&msg_hash));
            let ack = Ack {
                rid: self.id,
                blk_hash: msg_hash,
                kind: PropagateKind::Block,
                cert,
            };
            if echo.rid == self.id {
                self.on_receive_ack(&ack)?;
            } else {
                self.hooks.do_send_ack(&ack, echo.rid);
            }
        }
        Ok(())
    }

    /// Handle an ack. Capped at `n - f`; the quorum-completing ack (before
    /// the ack timer fires) transitions the block to propagated.
    pub fn on_receive_ack(&mut self, ack: &Ack) -> Result<(), ConsensusError> {
        debug!(msg = %ack, "got ack");
        let msg_hash = ack.blk_hash;

        let senders = self.propagate_acks.entry(msg_hash).or_default();
        let qsize = senders.len();
        if qsize >= self.config.nmajority {
            return Ok(());
        }
        if !senders.insert(ack.rid) {
            warn!(msg = %short_hex(&msg_hash), rid = %ack.rid, "duplicate ack");
            return Ok(());
        }
        if qsize + 1 == self.config.nmajority && !self.hooks.is_ack_timeout(&msg_hash) {
            if ack.kind == PropagateKind::Block {
                self.on_propose_propagated(&msg_hash)?;
            }
        }
        Ok(())
    }

    /// A block is held by an `n - f` quorum: vote for it, and if it embeds
    /// a QC, arm the pre-commit timer on the referenced block.
    fn on_propose_propagated(&mut self, blk_hash: &Hash32) -> Result<(), ConsensusError> {
        if self.view_trans {
            return Ok(());
        }
        debug!(blk = %short_hex(blk_hash), "propagated");
        let blk = self.get_delivered_blk(blk_hash)?;
        self.sanity_check_delivered(blk)?;

        if !self.vote_disabled {
            self.vote(blk)?;
        }

        if let Some(qc_ref) = self.blk(blk).qc_ref {
            self.hooks.set_pre_commit_timer(qc_ref, 2 * self.config.delta);
        }
        Ok(())
    }

    // ========================================================================
    // Proposal and vote handling
    // ========================================================================

    /// Handle a proposal whose block is already delivered. Computes the
    /// voting opinion (extends `hqc`, higher than `vheight`, no
    /// equivocation) and, when positive, joins the propagation phase.
    pub fn on_receive_proposal(&mut self, prop: &Proposal) -> Result<(), ConsensusError> {
        if self.view_trans {
            warn!("proposal received during view transition");
            return Ok(());
        }
        let bnew = prop.blk;
        if self.finished_propose.contains(&bnew) {
            return Ok(());
        }
        self.sanity_check_delivered(bnew)?;
        debug!(proposer = %prop.proposer, block = %self.blk(bnew), "got proposal");

        if let Some(qc_ref) = self.blk(bnew).qc_ref {
            let qc = self
                .blk(bnew)
                .qc
                .clone()
                .expect("delivered block with qc_ref embeds a qc");
            self.update_hqc(qc_ref, qc.as_ref());
        }

        let height = self.blk(bnew).height;
        let mut opinion = false;
        let mut equivocated = false;
        {
            let slot = self.proposals.entry(height).or_default();
            if slot.len() <= 1 {
                slot.insert(bnew);
                if slot.len() > 1 {
                    equivocated = true;
                } else {
                    opinion = true;
                }
            }
        }
        if equivocated {
            info!(height, "conflicting proposal detected, start blaming");
            self.blame()?;
        }

        if opinion {
            if height > self.vheight {
                let pref = self.hqc.0;
                let pref_height = self.blk(pref).height;
                let mut b = bnew;
                while self.blk(b).height > pref_height {
                    b = self.parent0(b);
                }
                if b == pref {
                    // On the same branch: safe to vote.
                    self.vheight = height;
                } else {
                    opinion = false;
                }
            } else {
                opinion = false;
            }
        }
        debug!(state = %self, "now state");

        if let Some(qc_ref) = self.blk(bnew).qc_ref {
            self.on_qc_finish(qc_ref);
        }
        self.finished_propose.insert(bnew);
        self.progress = true;
        self.receive_proposal_waiting.resolve(*prop);
        if opinion {
            self.propagate_blk(bnew)?;
        }
        Ok(())
    }

    /// Handle a vote. Deduplicated per voter and capped at `n - f`; the
    /// quorum-completing vote seals the block's QC and advances `hqc`.
    pub fn on_receive_vote(&mut self, vote: &Vote) -> Result<(), ConsensusError> {
        debug!(msg = %vote, "got vote");
        debug!(state = %self, "now state");
        let blk = self.get_delivered_blk(&vote.blk_hash)?;
        if !self.finished_propose.contains(&blk) {
            // The voter observed a proposal we never processed; run the
            // proposal handler with the voter standing in as proposer.
            let prop = Proposal {
                proposer: vote.voter,
                blk,
            };
            self.on_receive_proposal(&prop)?;
        }
        let qsize = self.blk(blk).voted.len();
        if qsize >= self.config.nmajority {
            warn!(msg = %vote, "vote arrived after quorum was closed");
            return Ok(());
        }
        if !self.blk_mut(blk).voted.insert(vote.voter) {
            warn!(blk = %short_hex(&vote.blk_hash), rid = %vote.voter, "duplicate vote");
            return Ok(());
        }
        let blk_hash = self.blk(blk).hash();
        if self.blk(blk).self_qc.is_none() {
            let qc = self.scheme.create_quorum_cert(&vote_obj_hash(&blk_hash));
            self.blk_mut(blk).self_qc = Some(qc);
        }
        let nmajority = self.config.nmajority;
        let sealed = if let Some(qc) = self.blk_mut(blk).self_qc.as_mut() {
            qc.add_part(vote.voter, vote.cert.as_ref());
            if qsize + 1 == nmajority {
                qc.compute();
                Some(qc.clone())
            } else {
                None
            }
        } else {
            None
        };
        if let Some(qc) = sealed {
            self.update_hqc(blk, qc.as_ref());
        }
        Ok(())
    }

    /// Adopt the highest certified block announced by a new-view notify.
    pub fn on_receive_notify(&mut self, notify: &Notify) -> Result<(), ConsensusError> {
        debug!(msg = %notify, "got notify");
        let blk = self.get_delivered_blk(&notify.blk_hash)?;
        self.update_hqc(blk, notify.qc.as_ref());
        Ok(())
    }

    // ========================================================================
    // Pre-commit pipeline
    // ========================================================================

    /// The pre-commit timer fired: announce and count our own pre-commit.
    pub fn on_pre_commit_timeout(&mut self, blk: BlockRef) -> Result<(), ConsensusError> {
        let blk_hash = self.blk(blk).hash();
        let cert = self
            .scheme
            .create_part_cert(&self.priv_key, &pre_commit_obj_hash(&blk_hash));
        let pc = PreCommit {
            rid: self.id,
            blk_hash,
            cert,
        };
        self.hooks.do_broadcast_pre_commit(&pc);
        self.on_receive_pre_commit(&pc)
    }

    /// Handle a pre-commit. Deduplicated and capped at `n - f`; the
    /// quorum-completing pre-commit triggers the commit rule.
    pub fn on_receive_pre_commit(&mut self, pc: &PreCommit) -> Result<(), ConsensusError> {
        debug!(msg = %pc, "got pre_commit");
        let blk = self.get_delivered_blk(&pc.blk_hash)?;
        let qsize = self.blk(blk).pre_committed.len();
        if qsize >= self.config.nmajority {
            return Ok(());
        }
        if !self.blk_mut(blk).pre_committed.insert(pc.rid) {
            warn!(blk = %short_hex(&pc.blk_hash), rid = %pc.rid, "duplicate pre_commit");
            return Ok(());
        }
        if qsize + 1 == self.config.nmajority {
            self.check_commit(blk)?;
        }
        Ok(())
    }

    // ========================================================================
    // Blame and view change
    // ========================================================================

    fn blame(&mut self) -> Result<(), ConsensusError> {
        self.hooks.stop_blame_timer();
        let cert = self
            .scheme
            .create_part_cert(&self.priv_key, &blame_obj_hash(self.view));
        let blame = Blame {
            blamer: self.id,
            view: self.view,
            cert,
        };
        self.on_receive_blame(&blame)?;
        self.hooks.do_broadcast_blame(&blame);
        Ok(())
    }

    fn new_view(&mut self) -> Result<(), ConsensusError> {
        info!(view = self.view, "preparing new-view");
        self.blame_qc.compute();
        let bn = BlameNotify {
            view: self.view,
            hqc_hash: self.blk(self.hqc.0).hash(),
            hqc_qc: self.hqc.1.clone(),
            qc: self.blame_qc.clone(),
        };
        self.view_trans = true;
        self.on_view_trans();
        self.on_receive_blamenotify(&bn)?;
        self.hooks.do_broadcast_blamenotify(&bn);
        self.hooks.stop_commit_timer_all();
        self.hooks.set_viewtrans_timer(2 * self.config.delta);
        Ok(())
    }

    /// Handle a blame. Deduplicated per blamer and capped at `n - f`; the
    /// quorum-completing blame starts the view transition.
    pub fn on_receive_blame(&mut self, blame: &Blame) -> Result<(), ConsensusError> {
        if self.view_trans {
            return Ok(());
        }
        debug!(msg = %blame, "got blame");
        let qsize = self.blamed.len();
        if qsize >= self.config.nmajority {
            return Ok(());
        }
        if !self.blamed.insert(blame.blamer) {
            warn!(rid = %blame.blamer, "duplicate blame");
            return Ok(());
        }
        self.blame_qc.add_part(blame.blamer, blame.cert.as_ref());
        if qsize + 1 == self.config.nmajority {
            self.new_view()?;
        }
        Ok(())
    }

    /// Handle a blame-notify: adopt the blame quorum and enter the view
    /// transition ourselves. A no-op when already transitioning.
    pub fn on_receive_blamenotify(&mut self, bn: &BlameNotify) -> Result<(), ConsensusError> {
        if self.view_trans {
            return Ok(());
        }
        debug!(msg = %bn, "got blamenotify");
        self.blame_qc = bn.qc.clone();
        self.new_view()
    }

    /// Commit watchdog fired: re-run the commit rule from `blk`.
    pub fn on_commit_timeout(&mut self, blk: BlockRef) -> Result<(), ConsensusError> {
        self.check_commit(blk)
    }

    /// Blame timer fired: blame unless the view made progress.
    pub fn on_blame_timeout(&mut self) -> Result<(), ConsensusError> {
        if self.progress {
            return Ok(());
        }
        info!(view = self.view, "no progress, start blaming");
        self.blame()
    }

    /// View-transition timer fired: install the next view.
    pub fn on_viewtrans_timeout(&mut self) {
        self.view += 1;
        self.view_trans = false;
        self.proposals.clear();
        self.blame_qc = self.scheme.create_quorum_cert(&blame_obj_hash(self.view));
        self.blamed.clear();
        self.progress = false;
        self.hooks.set_blame_timer(3 * self.config.delta);
        self.on_view_change();
        info!(view = self.view, "entering view");
        let notify = Notify {
            blk_hash: self.blk(self.hqc.0).hash(),
            qc: self.hqc.1.clone(),
        };
        self.hooks.do_notify(&notify);
    }

    // ========================================================================
    // Pruning
    // ========================================================================

    /// Release blocks more than `staleness` parent₀ steps below the last
    /// executed block: walk back that many ancestors, then depth-first
    /// release everything reachable from there, detaching `qc_ref` and
    /// parent edges on the way down so cycles cannot keep blocks alive.
    ///
    /// Blocks the protocol still points at — `b_exec`, `hqc`, the tails
    /// and pinned genesis — are never released. A walk that runs into an
    /// already-released slot stops there, which makes repeated pruning
    /// harmless.
    pub fn prune(&mut self, staleness: u32) {
        let mut start = self.b_exec;
        for _ in 0..staleness {
            let Some(&parent) = self.blk(start).parents.first() else {
                return;
            };
            if self.store.get(parent).is_none() {
                // A previous prune already took everything below here.
                return;
            }
            start = parent;
        }

        let mut protected: HashSet<BlockRef> = self.tails.iter().map(|&(_, r)| r).collect();
        protected.insert(self.b_exec);
        protected.insert(self.hqc.0);

        if let Some(blk) = self.store.get_mut(start) {
            blk.qc_ref = None;
        }
        let mut stack = vec![start];
        while let Some(&top) = stack.last() {
            let Some(top_blk) = self.store.get_mut(top) else {
                stack.pop();
                continue;
            };
            if top_blk.parents.is_empty() {
                if !protected.contains(&top) {
                    self.store.try_release(top);
                }
                stack.pop();
                continue;
            }
            top_blk.qc_ref = None;
            let parent = top_blk
                .parents
                .pop()
                .expect("non-empty parents just checked");
            if self.store.get(parent).is_some() {
                stack.push(parent);
            }
        }
    }

    // ========================================================================
    // Wait-points
    // ========================================================================

    /// Resolves when `blk` has its QC under way: immediately for genesis
    /// or once echoes already reached quorum, otherwise on the echo-quorum
    /// event.
    pub fn async_qc_finish(&mut self, blk: BlockRef) -> oneshot::Receiver<()> {
        let echoes = self
            .propagate_echos
            .get(&self.blk(blk).hash())
            .map_or(0, HashSet::len);
        if self.blk(blk).height == 0 || echoes >= self.config.nmajority {
            return WaitPoint::resolved(());
        }
        self.qc_waiting.entry(blk).or_default().subscribe()
    }

    /// Resolves on the next locally created proposal.
    pub fn async_wait_proposal(&mut self) -> oneshot::Receiver<Proposal> {
        self.propose_waiting.subscribe()
    }

    /// Resolves on the next received proposal.
    pub fn async_wait_receive_proposal(&mut self) -> oneshot::Receiver<Proposal> {
        self.receive_proposal_waiting.subscribe()
    }

    /// Resolves on the next `hqc` advance.
    pub fn async_hqc_update(&mut self) -> oneshot::Receiver<BlockRef> {
        self.hqc_update_waiting.subscribe()
    }

    /// Resolves after the next view increment.
    pub fn async_wait_view_change(&mut self) -> oneshot::Receiver<View> {
        self.view_change_waiting.subscribe()
    }

    /// Resolves on entering the next view transition.
    pub fn async_wait_view_trans(&mut self) -> oneshot::Receiver<()> {
        self.view_trans_waiting.subscribe()
    }

    fn on_qc_finish(&mut self, blk: BlockRef) {
        if let Some(mut wp) = self.qc_waiting.remove(&blk) {
            wp.resolve(());
        }
    }

    fn on_hqc_update(&mut self) {
        let hqc = self.hqc.0;
        self.hqc_update_waiting.resolve(hqc);
    }

    fn on_view_change(&mut self) {
        let view = self.view;
        self.view_change_waiting.resolve(view);
    }

    fn on_view_trans(&mut self) {
        self.view_trans_waiting.resolve(());
    }
}

impl<H: ConsensusHooks> std::fmt::Display for ConsensusCore<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "<tandem hqc={} hqc.height={} b_exec={} vheight={} view={} tails={}>",
            short_hex(&self.blk(self.hqc.0).hash()),
            self.blk(self.hqc.0).height,
            short_hex(&self.blk(self.b_exec).hash()),
            self.vheight,
            self.view,
            self.tails.len()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::RecordingHooks;
    use rand::rngs::OsRng;
    use tandem_crypto::{generate_keypair, Ed25519Scheme};

    fn make_core() -> ConsensusCore<RecordingHooks> {
        let (sk, pk) = generate_keypair(&mut OsRng);
        let mut core = ConsensusCore::new(
            ReplicaId::new(0),
            sk,
            Arc::new(Ed25519Scheme),
            RecordingHooks::new(),
        );
        core.add_replica(ReplicaId::new(0), "127.0.0.1:9000".parse().unwrap(), pk);
        core
    }

    #[test]
    fn new_core_starts_at_genesis() {
        let core = make_core();
        let genesis = core.genesis();
        assert_eq!(core.hqc().0, genesis);
        assert_eq!(core.last_exec(), genesis);
        assert_eq!(core.vheight(), 0);
        assert_eq!(core.view(), 0);
        assert!(!core.view_trans());
        assert_eq!(core.tails().len(), 1);
    }

    #[test]
    fn genesis_counts_registered_replicas_as_voters() {
        let core = make_core();
        let genesis = core.genesis();
        assert!(core
            .store()
            .get(genesis)
            .unwrap()
            .voted
            .contains(&ReplicaId::new(0)));
    }

    #[test]
    fn on_init_fixes_quorum_size() {
        let mut core = make_core();
        for i in 1..4u16 {
            let (_, pk) = generate_keypair(&mut OsRng);
            core.add_replica(
                ReplicaId::new(i),
                format!("127.0.0.1:{}", 9000 + i).parse().unwrap(),
                pk,
            );
        }
        core.on_init(1, 1.0);
        assert_eq!(core.config().nreplicas, 4);
        assert_eq!(core.config().nmajority, 3);
    }
}
