//! Shared state of the running consensus instance.
//!
//! One `Core` exists per process; its height-scoped parts (round store,
//! committee snapshot, locks) are rebuilt on every commit. All mutation
//! happens on the driver task, so no field needs a lock.

use crate::backend::Backend;
use crate::driver::ConsensusEvent;
use crate::error::ConsensusError;
use crate::metrics::metrics;
use crate::round_messages::{MessageStore, RoundMessages};
use crate::timer::{FutureProposalTimer, ProposeTimeout};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tendermill_messages::{ConsensusMsg, Vote, VoteKind};
use tendermill_types::{
    Block, BlockHeight, CommitteeSet, Hash, Round, Step, ValidatorId, VotePower,
};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Propose-step timeout at round 0.
pub const PROPOSE_TIMEOUT_BASE: Duration = Duration::from_secs(3);

/// Extra propose-step timeout per round, so later rounds wait longer for a
/// proposal to propagate.
pub const PROPOSE_TIMEOUT_DELTA: Duration = Duration::from_millis(500);

/// Propose timeout for `round`.
pub fn timeout_propose(round: Round) -> Duration {
    PROPOSE_TIMEOUT_BASE + PROPOSE_TIMEOUT_DELTA * round.min(u32::MAX as u64) as u32
}

/// Consensus core context.
///
/// The proposer role methods live in the `proposer` module; the prevote and
/// precommit roles (external to this crate's scope) reach the round store
/// through [`Core::round_messages`] and the lock setters.
pub struct Core {
    pub(crate) address: ValidatorId,
    pub(crate) backend: Arc<dyn Backend>,

    pub(crate) height: BlockHeight,
    pub(crate) round: Round,
    pub(crate) step: Step,
    pub(crate) sent_proposal: bool,

    /// Round and value we precommitted to and protect until unlocked.
    /// The pairing "value is present iff round is present" is structural.
    pub(crate) locked: Option<(Round, Block)>,

    /// Most recent round with an observed prevote quorum, and its value.
    pub(crate) valid: Option<(Round, Block)>,

    /// When the current round began; proposal latency metrics measure from
    /// here.
    pub(crate) new_round: Instant,

    pub(crate) propose_timeout: ProposeTimeout,
    pub(crate) future_proposal_timer: FutureProposalTimer,

    pub(crate) messages: MessageStore,

    /// Latest locally produced candidate per height; entries below the
    /// current height are garbage-collected on every candidate event.
    pub(crate) pending_candidates: BTreeMap<BlockHeight, Block>,

    pub(crate) committee: CommitteeSet,

    mailbox: mpsc::Sender<ConsensusEvent>,
}

impl Core {
    /// Create the core at `height` with a driver mailbox handle.
    ///
    /// The instance is inert until [`start_round`](Self::start_round) runs;
    /// the driver calls it on entry.
    pub fn new(
        address: ValidatorId,
        backend: Arc<dyn Backend>,
        height: BlockHeight,
        mailbox: mpsc::Sender<ConsensusEvent>,
    ) -> Self {
        let committee = backend.committee(height);
        Self {
            address,
            backend,
            height,
            round: 0,
            step: Step::Propose,
            sent_proposal: false,
            locked: None,
            valid: None,
            new_round: Instant::now(),
            propose_timeout: ProposeTimeout::new(),
            future_proposal_timer: FutureProposalTimer::new(),
            messages: MessageStore::default(),
            pending_candidates: BTreeMap::new(),
            committee,
            mailbox,
        }
    }

    /// Current height.
    pub fn height(&self) -> BlockHeight {
        self.height
    }

    /// Current round.
    pub fn round(&self) -> Round {
        self.round
    }

    /// Current step.
    pub fn step(&self) -> Step {
        self.step
    }

    /// Local validator identity.
    pub fn address(&self) -> ValidatorId {
        self.address
    }

    /// Committee snapshot for the current height.
    pub fn committee(&self) -> &CommitteeSet {
        &self.committee
    }

    /// Whether we sent a proposal this round.
    pub fn sent_proposal(&self) -> bool {
        self.sent_proposal
    }

    /// Round we are locked on, if any.
    pub fn locked_round(&self) -> Option<Round> {
        self.locked.as_ref().map(|(round, _)| *round)
    }

    /// Round of the last observed prevote quorum, if any.
    pub fn valid_round(&self) -> Option<Round> {
        self.valid.as_ref().map(|(round, _)| *round)
    }

    /// True iff we are the designated proposer for the current (H, R).
    pub fn is_proposer(&self) -> bool {
        self.committee.proposer(self.round) == self.address
    }

    /// True iff `sender` is the designated proposer at `round` of the
    /// current height.
    pub fn is_from_proposer(&self, round: Round, sender: ValidatorId) -> bool {
        self.committee.proposer(round) == sender
    }

    /// Round store access for the voting roles and tests.
    pub fn round_messages(&mut self, round: Round) -> &mut RoundMessages {
        self.messages.get_or_create(round)
    }

    /// Lock onto `value` at `round`. Called by the precommit role; the
    /// round/value pairing is kept transactionally by construction.
    pub fn set_locked(&mut self, round: Round, value: Block) {
        self.locked = Some((round, value));
    }

    /// Release the lock after unlocking evidence.
    pub fn clear_locked(&mut self) {
        self.locked = None;
    }

    /// Record `value` as valid at `round`. Called by the prevote role.
    pub fn set_valid(&mut self, round: Round, value: Block) {
        self.valid = Some((round, value));
    }

    /// Move to `step` within the current round.
    pub fn set_step(&mut self, step: Step) {
        debug!(height = %self.height, round = self.round, from = %self.step, to = %step, "Step change");
        self.step = step;
    }

    /// Enqueue an event into the driver mailbox from a non-driver context.
    pub fn send_event(&self, event: ConsensusEvent) {
        if let Err(err) = self.mailbox.try_send(event) {
            warn!(%err, "Dropping consensus event, mailbox unavailable");
        }
    }

    pub(crate) fn mailbox(&self) -> mpsc::Sender<ConsensusEvent> {
        self.mailbox.clone()
    }

    /// Classify a message's (round, height, step) against our view.
    ///
    /// Shared by every role: proposals classify with [`Step::Propose`],
    /// the lowest step, so they can never be [`FutureStepMessage`]; the
    /// voting roles pass their own step and a vote ahead of the local
    /// step is classified as future.
    ///
    /// [`FutureStepMessage`]: ConsensusError::FutureStepMessage
    pub(crate) fn check_message(
        &self,
        round: Round,
        height: BlockHeight,
        step: Step,
    ) -> Result<(), ConsensusError> {
        if height < self.height {
            return Err(ConsensusError::OldHeightMessage);
        }
        if height > self.height {
            return Err(ConsensusError::FutureHeightMessage);
        }
        if round < self.round {
            return Err(ConsensusError::OldRoundMessage);
        }
        if round > self.round {
            return Err(ConsensusError::FutureRoundMessage);
        }
        if self.step < step {
            return Err(ConsensusError::FutureStepMessage);
        }
        Ok(())
    }

    /// Begin `round` of the current height.
    ///
    /// Resets the per-round flags and restarts the propose timeout. When we
    /// are the round's proposer, proposes the valid value if one exists,
    /// else the buffered candidate for this height.
    pub fn start_round(&mut self, round: Round) {
        self.round = round;
        self.sent_proposal = false;
        self.step = Step::Propose;
        self.new_round = Instant::now();
        self.propose_timeout.cancel();
        metrics().round.set(round as f64);
        debug!(height = %self.height, round, proposer = %self.committee.proposer(round), "Starting round");

        if self.is_proposer() {
            let value = self
                .valid
                .as_ref()
                .map(|(_, value)| value.clone())
                .or_else(|| self.pending_candidates.get(&self.height).cloned());
            match value {
                Some(block) => self.send_proposal(block),
                None => debug!("No candidate block yet, waiting for the worker"),
            }
        }

        self.propose_timeout.schedule(
            self.height,
            round,
            timeout_propose(round),
            self.mailbox.clone(),
        );
    }

    /// Begin a new height with a fresh committee snapshot.
    pub fn start_height(&mut self, height: BlockHeight, committee: CommitteeSet) {
        self.height = height;
        self.committee = committee;
        self.messages.reset();
        self.locked = None;
        self.valid = None;
        self.future_proposal_timer.stop();
        self.pending_candidates.retain(|number, _| *number >= height);
        metrics().height.set(height.0 as f64);
        self.start_round(0);
    }

    /// Finalize the block whose hash holds a precommit quorum at `round`
    /// and advance to the next height.
    pub(crate) fn commit(&mut self, round: Round) {
        let Some(proposal) = self.messages.get(round).and_then(|rm| rm.proposal().cloned())
        else {
            warn!(round, "Commit requested without a stored proposal");
            return;
        };
        let block = proposal.block().clone();
        let hash = block.hash();
        debug_assert!(
            self.messages
                .get(round)
                .map(|rm| rm.precommits_power(&hash))
                .unwrap_or(VotePower::ZERO)
                >= self.committee.quorum(),
            "commit without a precommit quorum"
        );

        self.set_step(Step::Commit);
        info!(height = %self.height, round, ?hash, "Committing block");
        self.backend.commit(&block, round);
        metrics().blocks_committed.inc();

        let next = self.height.next();
        let committee = self.backend.committee(next);
        self.start_height(next, committee);
    }

    /// Broadcast a prevote for the current round's proposal, or nil.
    pub(crate) fn send_prevote(&mut self, nil: bool) {
        let value = if nil {
            Hash::ZERO
        } else {
            match self.messages.get(self.round).and_then(|rm| rm.proposal()) {
                Some(proposal) => proposal.block_hash(),
                None => {
                    warn!(round = self.round, "No proposal to prevote for, voting nil");
                    Hash::ZERO
                }
            }
        };
        let backend = Arc::clone(&self.backend);
        let vote = Vote::new(
            VoteKind::Prevote,
            self.round,
            self.height,
            value,
            self.address,
            |payload| backend.sign(payload),
        );
        debug!(height = %self.height, round = self.round, nil = value.is_zero(), "Prevote sent");
        self.backend.broadcast(ConsensusMsg::Vote(vote));
    }

    /// React to the propose timeout: prevote nil and leave the propose
    /// step, unless the fire is stale.
    pub fn on_propose_timeout(&mut self, height: BlockHeight, round: Round) {
        self.propose_timeout.consume_fire();
        if height != self.height || round != self.round || self.step != Step::Propose {
            debug!(%height, round, "Ignoring stale propose timeout");
            return;
        }
        debug!(%height, round, "Propose timeout expired, prevoting nil");
        self.send_prevote(true);
        self.set_step(Step::Prevote);
    }

    /// Cancel all timers; called when the driver shuts down.
    pub fn shutdown(&mut self) {
        self.propose_timeout.cancel();
        self.future_proposal_timer.stop();
        debug!("Consensus core shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::VerifyError;
    use parking_lot::Mutex;
    use tendermill_types::test_utils::test_committee;
    use tendermill_types::Signature;

    struct NullBackend {
        broadcasts: Mutex<Vec<ConsensusMsg>>,
    }

    impl NullBackend {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                broadcasts: Mutex::new(Vec::new()),
            })
        }
    }

    impl Backend for NullBackend {
        fn sign(&self, payload: &[u8]) -> Signature {
            Signature(payload.to_vec())
        }

        fn verify_proposal(&self, _block: &Block) -> Result<(), VerifyError> {
            Ok(())
        }

        fn broadcast(&self, msg: ConsensusMsg) {
            self.broadcasts.lock().push(msg);
        }

        fn set_proposed_block_hash(&self, _hash: Hash) {}

        fn commit(&self, _block: &Block, _round: Round) {}

        fn committee(&self, height: BlockHeight) -> CommitteeSet {
            test_committee(height.0, 4)
        }
    }

    fn test_core(
        height: u64,
        address: u64,
    ) -> (Core, Arc<NullBackend>, mpsc::Receiver<ConsensusEvent>) {
        let (tx, rx) = mpsc::channel(64);
        let backend = NullBackend::new();
        let core = Core::new(
            ValidatorId(address),
            Arc::clone(&backend) as Arc<dyn Backend>,
            BlockHeight(height),
            tx,
        );
        (core, backend, rx)
    }

    #[tokio::test]
    async fn check_message_classification() {
        let (mut core, _backend, _rx) = test_core(10, 0);
        core.round = 2;

        assert_eq!(
            core.check_message(2, BlockHeight(9), Step::Propose),
            Err(ConsensusError::OldHeightMessage)
        );
        assert_eq!(
            core.check_message(2, BlockHeight(11), Step::Propose),
            Err(ConsensusError::FutureHeightMessage)
        );
        assert_eq!(
            core.check_message(1, BlockHeight(10), Step::Propose),
            Err(ConsensusError::OldRoundMessage)
        );
        assert_eq!(
            core.check_message(3, BlockHeight(10), Step::Propose),
            Err(ConsensusError::FutureRoundMessage)
        );
        assert_eq!(core.check_message(2, BlockHeight(10), Step::Propose), Ok(()));
        assert_eq!(
            core.check_message(2, BlockHeight(10), Step::Prevote),
            Err(ConsensusError::FutureStepMessage)
        );
    }

    #[tokio::test]
    async fn proposer_rotation_follows_committee() {
        let (core, _backend, _rx) = test_core(10, 2);
        // Committee of 4 at height 10: proposer for round 0 is (10 + 0) % 4.
        assert!(core.is_proposer());
        assert!(core.is_from_proposer(1, ValidatorId(3)));
        assert!(!core.is_from_proposer(1, ValidatorId(2)));
    }

    #[tokio::test]
    async fn propose_timeout_grows_with_round() {
        assert!(timeout_propose(4) > timeout_propose(0));
        assert_eq!(
            timeout_propose(0),
            PROPOSE_TIMEOUT_BASE
        );
    }

    #[tokio::test]
    async fn stale_timeout_fire_is_ignored() {
        let (mut core, backend, _rx) = test_core(10, 0);
        core.start_round(1);
        let before = backend.broadcasts.lock().len();

        // Fire for a round we already left.
        core.on_propose_timeout(BlockHeight(10), 0);
        assert_eq!(core.step(), Step::Propose);
        assert_eq!(backend.broadcasts.lock().len(), before);

        // A live fire prevotes nil and moves on.
        core.on_propose_timeout(BlockHeight(10), 1);
        assert_eq!(core.step(), Step::Prevote);
        assert_eq!(backend.broadcasts.lock().len(), before + 1);
        core.shutdown();
    }

    #[tokio::test]
    async fn start_height_resets_round_state() {
        let (mut core, _backend, _rx) = test_core(10, 0);
        core.start_round(3);
        core.set_locked(1, tendermill_types::test_utils::test_block(10, 1));
        core.set_valid(1, tendermill_types::test_utils::test_block(10, 1));
        core.round_messages(3);

        core.start_height(BlockHeight(11), test_committee(11, 4));
        assert_eq!(core.height(), BlockHeight(11));
        assert_eq!(core.round(), 0);
        assert_eq!(core.step(), Step::Propose);
        assert!(!core.sent_proposal());
        assert_eq!(core.locked_round(), None);
        assert_eq!(core.valid_round(), None);
        assert_eq!(core.messages.rounds().count(), 0);
        core.shutdown();
    }
}
