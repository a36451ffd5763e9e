//! Proposer role: sending our own proposals and dispatching incoming ones.
//!
//! Follows Algorithm 1 of "The latest gossip on BFT consensus"; the line
//! numbers in comments refer to it.

use crate::core::Core;
use crate::error::{ConsensusError, VerifyError};
use crate::metrics::{metrics, observe};
use crate::round_messages::SetOutcome;
use std::sync::Arc;
use std::time::Instant;
use tendermill_messages::{ConsensusMsg, Propose};
use tendermill_types::{Block, Step};
use tracing::{debug, info, warn};

impl Core {
    /// Broadcast a proposal for `block` if we are the proposer at the
    /// current (height, round) and have not proposed yet; otherwise a
    /// no-op.
    pub fn send_proposal(&mut self, block: Block) {
        if self.height != block.number() || !self.is_proposer() || self.sent_proposal {
            return;
        }
        let valid_round = self.valid.as_ref().map(|(round, _)| *round);
        let hash = block.hash();
        let backend = Arc::clone(&self.backend);
        let proposal = Propose::new(
            self.round,
            self.height,
            valid_round,
            block,
            self.address,
            |payload| backend.sign(payload),
        );
        self.sent_proposal = true;
        self.backend.set_proposed_block_hash(hash);
        observe(&metrics().proposal_sent_latency, self.new_round.elapsed());
        debug!(
            height = %self.height,
            round = self.round,
            ?valid_round,
            ?hash,
            "Proposal sent"
        );
        self.backend.broadcast(ConsensusMsg::Propose(proposal));
    }

    /// Dispatch a proposal received from the network.
    ///
    /// Mismatched views are classified for the caller: future rounds and
    /// heights belong in the backlog, old rounds get one shot at the
    /// late-commit rule below, everything else is dropped.
    pub fn handle_proposal(&mut self, proposal: Propose) -> Result<(), ConsensusError> {
        if let Err(step_err) = self.check_message(proposal.round(), proposal.height(), Step::Propose)
        {
            if step_err == ConsensusError::OldRoundMessage {
                return self.handle_old_round_proposal(proposal, step_err);
            }
            return Err(step_err);
        }

        // Current-round proposal. Only the scheduled proposer may send it.
        if !self.is_from_proposer(self.round, proposal.sender()) {
            warn!(
                sender = %proposal.sender(),
                round = self.round,
                "Ignoring proposal message from non-proposer"
            );
            return Err(ConsensusError::NotFromProposer);
        }

        observe(
            &metrics().proposal_received_latency,
            self.new_round.elapsed(),
        );

        let verify_started = Instant::now();
        let verified = self.backend.verify_proposal(proposal.block());
        observe(
            &metrics().proposal_verify_latency,
            verify_started.elapsed(),
        );

        if let Err(err) = verified {
            self.propose_timeout.stop()?;
            if let VerifyError::FutureTimestampBlock { retry_in } = err {
                // Not invalid, just early: re-inject once the verifier's
                // delay hint elapses.
                let mailbox = self.mailbox();
                self.future_proposal_timer.arm(retry_in, proposal, mailbox);
                return Err(err.into());
            }
            warn!(%err, "Failed to verify proposal");
            // Line 26: prevote nil on an invalid proposal, and accept no
            // further proposal this round.
            self.send_prevote(true);
            self.set_step(Step::Prevote);
            return Err(err.into());
        }

        let hash = proposal.block_hash();
        let valid_round = proposal.valid_round();
        let sender = proposal.sender();
        match self
            .messages
            .get_or_create(self.round)
            .set_proposal(proposal, true)
        {
            SetOutcome::Stored => {}
            SetOutcome::AlreadySet { existing } if existing != hash => {
                metrics().equivocations_detected.inc();
                warn!(?existing, ?hash, "Conflicting proposal for current round");
            }
            SetOutcome::AlreadySet { .. } => {}
        }
        debug!(
            from = %sender,
            height = %self.height,
            round = self.round,
            ?hash,
            "Proposal received"
        );

        // Line 49: a precommit quorum may already be waiting on this value.
        let quorum = self.committee.quorum();
        if self
            .messages
            .get_or_create(self.round)
            .precommits_power(&hash)
            >= quorum
        {
            self.commit(self.round);
            return Ok(());
        }

        if self.step == Step::Propose {
            self.propose_timeout.stop()?;
            match valid_round {
                // Line 22: a fresh value. Prevote it unless we are locked
                // on something else.
                None => {
                    let acceptable = match &self.locked {
                        None => true,
                        Some((_, locked_value)) => locked_value.hash() == hash,
                    };
                    self.send_prevote(!acceptable);
                    self.set_step(Step::Prevote);
                }
                // Line 28: a relayed value, claimed valid at `vr`. Only act
                // on prevote-quorum evidence from that round.
                Some(vr) => {
                    let evidence = vr < self.round
                        && self.messages.get_or_create(vr).prevotes_power(&hash) >= quorum;
                    if evidence {
                        let acceptable = match &self.locked {
                            None => true,
                            Some((locked_round, locked_value)) => {
                                *locked_round <= vr || locked_value.hash() == hash
                            }
                        };
                        self.send_prevote(!acceptable);
                        self.set_step(Step::Prevote);
                    }
                    // Without the evidence we stay in Propose; a later
                    // prevote delivery re-evaluates the condition.
                }
            }
        }

        Ok(())
    }

    /// Old-round proposal: park it unverified, then check whether an
    /// existing precommit quorum lets us commit that round late (line 49
    /// applied retroactively).
    fn handle_old_round_proposal(
        &mut self,
        proposal: Propose,
        step_err: ConsensusError,
    ) -> Result<(), ConsensusError> {
        let round = proposal.round();
        let hash = proposal.block_hash();
        let legit = self.is_from_proposer(round, proposal.sender());
        let quorum = self.committee.quorum();

        let round_msgs = self.messages.get_or_create(round);
        if let Some(existing) = round_msgs.proposal() {
            // A second, distinct proposal for a settled round can only be
            // Byzantine. Do not gossip it; accountability is handled
            // elsewhere.
            if existing.block_hash() != hash {
                metrics().equivocations_detected.inc();
            }
            return Err(step_err);
        }
        if !legit {
            warn!(sender = %proposal.sender(), round, "Ignoring proposal from non-proposer");
            return Err(ConsensusError::NotFromProposer);
        }

        // Stored unverified: the slot is provisional until the commit path
        // below verifies the block.
        round_msgs.set_proposal(proposal.clone(), false);
        let power = round_msgs.precommits_power(&hash);
        if power >= quorum {
            self.backend.verify_proposal(proposal.block())?;
            self.messages.get_or_create(round).set_verified();
            debug!(round, ?hash, "Committing old round proposal");
            self.commit(round);
            return Ok(());
        }

        Err(step_err)
    }

    /// Buffer a locally produced candidate block; if it is the one we were
    /// waiting on to propose this round, propose it now.
    pub fn handle_new_candidate_block(&mut self, candidate: Block) {
        let number = candidate.number();
        if number < self.height {
            info!(%number, height = %self.height, "Discarding old height candidate block");
            return;
        }

        self.pending_candidates.insert(number, candidate.clone());

        if self.is_proposer()
            && self.step == Step::Propose
            && !self.sent_proposal
            && number == self.height
        {
            debug!(%number, "Sending proposal that was missed before");
            self.send_proposal(candidate);
        }

        // Release buffered candidates below the current height.
        let height = self.height;
        self.pending_candidates.retain(|number, _| *number >= height);
    }

    /// Cancel any pending future-proposal re-injection.
    pub fn stop_future_proposal_timer(&mut self) {
        self.future_proposal_timer.stop();
    }
}
