//! Single-task consensus driver.
//!
//! The driver owns the [`Core`] and is the only task that mutates it. It
//! consumes mailbox events strictly in enqueue order, parks proposals for
//! future rounds/heights in a backlog, and replays them when the view
//! catches up.

use crate::core::Core;
use crate::error::ConsensusError;
use crate::metrics::metrics;
use std::collections::BTreeMap;
use tendermill_messages::Propose;
use tendermill_types::{Block, BlockHeight, Round};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error};

/// Default driver mailbox capacity.
pub const MAILBOX_CAPACITY: usize = 1024;

/// Inputs to the consensus driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsensusEvent {
    /// A proposal arrived from the network.
    Proposal(Propose),

    /// The worker produced a new candidate block.
    CandidateBlock(Block),

    /// A deferred proposal re-entering the pipeline (future-timestamp
    /// retry or backlog replay).
    Backlogged(Propose),

    /// The propose-step timeout expired.
    ProposeTimeoutFired { height: BlockHeight, round: Round },

    /// Shut the driver down.
    Stop,
}

/// Create the driver mailbox pair.
pub fn mailbox() -> (mpsc::Sender<ConsensusEvent>, mpsc::Receiver<ConsensusEvent>) {
    mpsc::channel(MAILBOX_CAPACITY)
}

/// The consensus event loop.
pub struct Driver {
    core: Core,
    mailbox: mpsc::Receiver<ConsensusEvent>,
    backlog: BTreeMap<(BlockHeight, Round), Vec<Propose>>,
}

impl Driver {
    pub fn new(core: Core, mailbox: mpsc::Receiver<ConsensusEvent>) -> Self {
        Self {
            core,
            mailbox,
            backlog: BTreeMap::new(),
        }
    }

    /// Read access to the core, for wiring and inspection.
    pub fn core(&self) -> &Core {
        &self.core
    }

    /// Mutable access to the core, for the sibling voting roles.
    pub fn core_mut(&mut self) -> &mut Core {
        &mut self.core
    }

    /// Run until [`ConsensusEvent::Stop`] or mailbox closure. Only a timer
    /// invariant breach aborts with an error.
    pub async fn run(mut self) -> Result<(), ConsensusError> {
        self.core.start_round(0);
        while let Some(event) = self.mailbox.recv().await {
            if event == ConsensusEvent::Stop {
                break;
            }
            if let Err(err) = self.process(event) {
                error!(%err, "Consensus driver aborting");
                self.core.shutdown();
                return Err(err);
            }
        }
        self.core.shutdown();
        Ok(())
    }

    /// Spawn the loop on the current runtime.
    pub fn spawn(self) -> JoinHandle<Result<(), ConsensusError>> {
        tokio::spawn(self.run())
    }

    /// Handle one event, then replay whatever the new view unblocks.
    pub fn process(&mut self, event: ConsensusEvent) -> Result<(), ConsensusError> {
        match event {
            ConsensusEvent::Proposal(proposal) | ConsensusEvent::Backlogged(proposal) => {
                self.dispatch_proposal(proposal)?;
            }
            ConsensusEvent::CandidateBlock(block) => {
                self.core.handle_new_candidate_block(block);
            }
            ConsensusEvent::ProposeTimeoutFired { height, round } => {
                self.core.on_propose_timeout(height, round);
            }
            ConsensusEvent::Stop => {}
        }
        self.replay_backlog()
    }

    fn dispatch_proposal(&mut self, proposal: Propose) -> Result<(), ConsensusError> {
        match self.core.handle_proposal(proposal.clone()) {
            Ok(()) => {}
            // FutureStepMessage never fires for a proposal, but the voting
            // dispatchers share this parking path and their votes do.
            Err(
                ConsensusError::FutureHeightMessage
                | ConsensusError::FutureRoundMessage
                | ConsensusError::FutureStepMessage,
            ) => {
                debug!(
                    height = %proposal.height(),
                    round = proposal.round(),
                    "Backlogging future proposal"
                );
                metrics().proposals_backlogged.inc();
                self.backlog
                    .entry((proposal.height(), proposal.round()))
                    .or_default()
                    .push(proposal);
            }
            Err(ConsensusError::TimerStop(err)) => return Err(err.into()),
            Err(err) => {
                // Old, invalid, or misattributed proposals are terminal
                // here; the core already reacted where the protocol asks
                // for it.
                debug!(%err, "Dropping proposal");
            }
        }
        Ok(())
    }

    /// Replay backlog entries the current view can act on, dropping those
    /// for committed heights. Replays can commit and advance the view, so
    /// iterate until a pass changes nothing.
    fn replay_backlog(&mut self) -> Result<(), ConsensusError> {
        loop {
            let height = self.core.height();
            let round = self.core.round();

            let stale: Vec<_> = self
                .backlog
                .range(..(height, 0))
                .map(|(key, _)| *key)
                .collect();
            for key in stale {
                if let Some(dropped) = self.backlog.remove(&key) {
                    debug!(
                        height = %key.0,
                        round = key.1,
                        count = dropped.len(),
                        "Dropping stale backlog entries"
                    );
                }
            }

            let ready: Vec<_> = self
                .backlog
                .range((height, 0)..=(height, round))
                .map(|(key, _)| *key)
                .collect();
            if ready.is_empty() {
                return Ok(());
            }
            for key in ready {
                if let Some(proposals) = self.backlog.remove(&key) {
                    for proposal in proposals {
                        self.dispatch_proposal(proposal)?;
                    }
                }
            }
        }
    }

    /// Number of parked proposals, for inspection.
    pub fn backlog_len(&self) -> usize {
        self.backlog.values().map(Vec::len).sum()
    }
}
